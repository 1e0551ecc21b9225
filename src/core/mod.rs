//! Shared primitives: the document model, errors, configuration, URLs,
//! cancellation, staged writes and terminal output.

pub mod cancel;
pub mod config;
pub mod error;
pub mod model;
pub mod output;
pub mod staging;
pub mod urls;
