pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod generation;
pub mod questions;
pub mod telemetry;

pub use error::{GenerationError, GeneratorError};
