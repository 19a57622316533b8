pub mod sweep;

pub use sweep::{SweepConfig, SweepWorker};
