//! Core types shared by the manager, the stores and the HTTP layer.

pub mod error;
pub mod status;

pub use error::{DeskError, DeskResult};
