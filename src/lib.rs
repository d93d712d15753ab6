pub mod bridge;
pub mod config;
pub mod error;
pub mod keymap;

pub use error::{AppError, Result};
