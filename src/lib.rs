//! imgspin library exports.
//!
//! The binary is a thin CLI over [`orchestrator::Spinner`]. Everything is
//! public so integration tests can drive the pipeline pieces directly.

pub mod boot;
pub mod build;
pub mod config;
pub mod error;
pub mod image_spec;
pub mod mount;
pub mod orchestrator;
pub mod pkg;
pub mod preflight;
pub mod process;
pub mod spec;
pub mod timing;

pub use error::{SpinError, SpinResult};
pub use image_spec::ImageSpec;
pub use orchestrator::Spinner;
