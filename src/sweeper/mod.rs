pub mod daemon;
pub mod tasks;

pub use daemon::SweepDaemon;
