#![forbid(unsafe_code)]

pub mod clock;
pub mod detectors;
pub mod engine;
mod error;
pub mod interfaces;
pub mod persistence;
pub mod tasks;
pub mod telemetry;
pub mod threats;

pub use engine::{ControlPlane, Services};
pub use error::Error;
