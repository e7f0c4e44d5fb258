//! Shared render API for Lucent.
//! Defines the per-frame scene data model and the RenderBackend trait so the host drives
//! any backend with the same code path (prepare + render_frame).

mod backend;
mod handles;
mod light;
mod scene;

pub use backend::{MeshUpload, RenderBackend, RenderBackendWindow};
pub use handles::{MeshHandle, RenderTargetHandle, TextureHandle};
pub use light::{
    Cookie, CookieChannel, FalloffMode, GammaCorrection, Light, LightId, LightKind, LightMask, LightShape,
    ShadowSettings, ShadowType, ShadowUpdate,
};
pub use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
pub use scene::{
    Aabb, BlendMode, Camera, CameraId, CompareFunc, CullMode, DepthState, DrawCommand, Layer, LayerComposition,
    LayerId, LayerKind, Material, MaterialId, MeshInstance, Projection, RenderAction, Scene, StencilState,
};
