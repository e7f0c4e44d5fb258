//! Opaque handles to backend-owned GPU resources.
//!
//! The numeric value is assigned by the backend; the host only stores and passes them back.

/// A texture (2D, cube or atlas) owned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub u64);

/// A render target (one or more attachments). `None` in a render action means the back buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderTargetHandle(pub u64);

/// Uploaded vertex + index data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshHandle(pub u64);
