//! Renderer error type. Capacity and geometry edge cases never surface here; only device-level
//! failures and invalid setup do.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    /// The device could not allocate a texture, render target or mesh.
    #[error("Resource creation failed: {0}")]
    ResourceCreationFailed(String),

    /// Data did not fit the destination resource.
    #[error("Upload failed: {0}")]
    Upload(String),

    /// A handle did not resolve to a live resource.
    #[error("Unknown resource: {0}")]
    MissingResource(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Backend-specific failure (wgpu validation, surface loss, ...).
    #[error("Backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, RenderError>;
