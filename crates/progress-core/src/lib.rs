pub mod clock;
pub mod config;
pub mod models;
pub mod observer;
pub mod persistence;
pub mod sqlite;
pub mod tracker;

pub use tracker::{ProgressTracker, SweepReport, TrackerResult};
