//! Image resolution and container lifecycle.

pub mod image;
pub mod lifecycle;
