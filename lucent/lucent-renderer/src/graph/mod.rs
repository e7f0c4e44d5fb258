//! Lucent frame graph: ordered render passes with load/store resolution and pass merging.
//!
//! Passes are plain data. What a pass executes is described by [`PassKind`], work around it by
//! [`PassHook`]; the renderer interprets both when the graph is executed.

use glam::Vec4;
use render_api::{CameraId, LightId, RenderTargetHandle};

use crate::device::{ColorOps, DepthStencilOps, PassDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PassId(pub usize);

/// What a pass renders.
#[derive(Debug, Clone, PartialEq)]
pub enum PassKind {
    /// Copy light cookies into the cookie atlas.
    ClusteredCookies,
    /// All shadow faces of local lights rendered into the shared atlas.
    ClusteredLocalShadows { jobs: Vec<(LightId, usize)> },
    /// One face of a local light's own shadow map.
    LocalShadowFace { light: LightId, face: usize },
    /// All cascades of a directional light, as seen from `camera`.
    DirectionalShadow { light: LightId, camera: CameraId, clear_per_cascade: bool },
    /// Render actions `start..=end` (indices into the composition's action list).
    Main { start: usize, end: usize },
    /// Copy scene color and/or depth of the pass target for the action's camera.
    SceneGrab { action: usize, color: bool, depth: bool },
    Postprocess { action: usize },
}

/// Work run immediately before or after a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassHook {
    UpdateClusters,
    CameraPreRender(CameraId),
    CameraPostRender(CameraId),
    /// Separable blur of a variance shadow map; `camera` is set for directional lights.
    VsmBlur { light: LightId, camera: Option<CameraId> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderPass {
    pub name: String,
    pub kind: PassKind,
    /// `None` is the back buffer.
    pub target: Option<RenderTargetHandle>,
    /// False for passes that do not open a device render pass (grabs, empty work); they take no
    /// part in load/store resolution or merging.
    pub real: bool,
    pub color_ops: ColorOps,
    pub depth_stencil_ops: DepthStencilOps,
    pub before: Option<PassHook>,
    pub after: Option<PassHook>,
    /// Continue the previous pass instead of beginning a new one.
    pub skip_start: bool,
    /// Keep the pass open for the next one.
    pub skip_end: bool,
}

impl RenderPass {
    pub fn new(name: impl Into<String>, kind: PassKind, target: Option<RenderTargetHandle>) -> Self {
        Self {
            name: name.into(),
            kind,
            target,
            real: true,
            color_ops: ColorOps::default(),
            depth_stencil_ops: DepthStencilOps::default(),
            before: None,
            after: None,
            skip_start: false,
            skip_end: false,
        }
    }

    /// A pass that runs its work and hooks without opening a device pass.
    pub fn virtual_pass(name: impl Into<String>, kind: PassKind) -> Self {
        Self { real: false, ..Self::new(name, kind, None) }
    }

    /// A virtual pass that copies color and/or depth out of `target`.
    pub fn scene_grab(
        name: impl Into<String>,
        action: usize,
        target: Option<RenderTargetHandle>,
        color: bool,
        depth: bool,
    ) -> Self {
        Self { target, ..Self::virtual_pass(name, PassKind::SceneGrab { action, color, depth }) }
    }

    pub fn with_ops(mut self, color: ColorOps, depth_stencil: DepthStencilOps) -> Self {
        self.color_ops = color;
        self.depth_stencil_ops = depth_stencil;
        self
    }

    pub fn clears_anything(&self) -> bool {
        self.color_ops.clear || self.depth_stencil_ops.clear_depth || self.depth_stencil_ops.clear_stencil
    }

    pub fn descriptor(&self) -> PassDescriptor {
        PassDescriptor {
            label: self.name.clone(),
            target: self.target,
            color: self.color_ops,
            depth_stencil: self.depth_stencil_ops,
        }
    }

    /// Fold a camera's clears into the pass ops.
    pub fn set_clears(&mut self, color: Option<Vec4>, depth: Option<f32>, stencil: Option<u32>) {
        if let Some(c) = color {
            self.color_ops.clear = true;
            self.color_ops.clear_value = c;
        }
        if let Some(d) = depth {
            self.depth_stencil_ops.clear_depth = true;
            self.depth_stencil_ops.clear_depth_value = d;
        }
        if let Some(s) = stencil {
            self.depth_stencil_ops.clear_stencil = true;
            self.depth_stencil_ops.clear_stencil_value = s;
        }
    }
}

/// Ordered list of passes built and executed once per frame.
#[derive(Default)]
pub struct FrameGraph {
    passes: Vec<RenderPass>,
}

impl FrameGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_render_pass(&mut self, pass: RenderPass) -> PassId {
        let id = PassId(self.passes.len());
        log::debug!("frame graph: pass {} '{}'", id.0, pass.name);
        self.passes.push(pass);
        id
    }

    pub fn passes(&self) -> &[RenderPass] {
        &self.passes
    }

    pub fn pass(&self, id: PassId) -> Option<&RenderPass> {
        self.passes.get(id.0)
    }

    pub fn pass_mut(&mut self, id: PassId) -> Option<&mut RenderPass> {
        self.passes.get_mut(id.0)
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn reset(&mut self) {
        self.passes.clear();
    }

    pub fn take_passes(&mut self) -> Vec<RenderPass> {
        std::mem::take(&mut self.passes)
    }

    /// Resolve store ops and merge adjacent passes.
    ///
    /// A pass that does not clear an attachment reads what the previous pass on the same target
    /// left there, so that pass must store it. A scene grab reads the attachments it copies.
    /// Two neighbouring passes on the same target are merged when the second clears nothing and
    /// no hook sits between them.
    pub fn compile(&mut self) {
        let mut last_on_target: Vec<(Option<RenderTargetHandle>, usize)> = Vec::new();
        for i in 0..self.passes.len() {
            if !self.passes[i].real {
                if let PassKind::SceneGrab { color, depth, .. } = self.passes[i].kind {
                    let target = self.passes[i].target;
                    if let Some(&(_, last)) = last_on_target.iter().find(|(t, _)| *t == target) {
                        let prev = &mut self.passes[last];
                        prev.color_ops.store |= color;
                        prev.depth_stencil_ops.store_depth |= depth;
                    }
                }
                continue;
            }
            let target = self.passes[i].target;
            let color_clear = self.passes[i].color_ops.clear;
            let depth_clear = self.passes[i].depth_stencil_ops.clear_depth;
            let stencil_clear = self.passes[i].depth_stencil_ops.clear_stencil;
            match last_on_target.iter_mut().find(|(t, _)| *t == target) {
                Some(entry) => {
                    let prev = &mut self.passes[entry.1];
                    if !color_clear {
                        prev.color_ops.store = true;
                    }
                    if !depth_clear {
                        prev.depth_stencil_ops.store_depth = true;
                    }
                    if !stencil_clear {
                        prev.depth_stencil_ops.store_stencil = true;
                    }
                    entry.1 = i;
                }
                None => last_on_target.push((target, i)),
            }
        }

        for i in 1..self.passes.len() {
            let (head, tail) = self.passes.split_at_mut(i);
            let first = &mut head[i - 1];
            let second = &mut tail[0];
            if !first.real || !second.real || first.target != second.target {
                continue;
            }
            if second.clears_anything() || first.after.is_some() || second.before.is_some() {
                continue;
            }
            first.skip_end = true;
            second.skip_start = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn main_pass(target: Option<RenderTargetHandle>, clear: bool) -> RenderPass {
        let mut pass = RenderPass::new("main", PassKind::Main { start: 0, end: 0 }, target);
        if clear {
            pass.set_clears(Some(Vec4::ZERO), Some(1.0), Some(0));
        }
        pass.color_ops.store = false;
        pass
    }

    #[test]
    fn loading_pass_makes_previous_store() {
        let mut graph = FrameGraph::new();
        let rt = Some(RenderTargetHandle(3));
        graph.add_render_pass(main_pass(rt, true));
        graph.add_render_pass(main_pass(None, true));
        graph.add_render_pass(main_pass(rt, false));
        graph.compile();
        let p = graph.passes();
        assert!(p[0].color_ops.store);
        assert!(p[0].depth_stencil_ops.store_depth);
        assert!(p[0].depth_stencil_ops.store_stencil);
        assert!(!p[1].color_ops.store);
    }

    #[test]
    fn clearing_pass_leaves_previous_store_alone() {
        let mut graph = FrameGraph::new();
        graph.add_render_pass(main_pass(None, true));
        graph.add_render_pass(main_pass(None, true));
        graph.compile();
        assert!(!graph.passes()[0].color_ops.store);
        assert!(!graph.passes()[0].skip_end);
    }

    #[test]
    fn adjacent_passes_merge_without_hooks() {
        let mut graph = FrameGraph::new();
        graph.add_render_pass(main_pass(None, true));
        graph.add_render_pass(main_pass(None, false));
        let mut third = main_pass(None, false);
        third.before = Some(PassHook::CameraPreRender(CameraId(1)));
        graph.add_render_pass(third);
        graph.compile();
        let p = graph.passes();
        assert!(p[0].skip_end && p[1].skip_start);
        assert!(!p[1].skip_end && !p[2].skip_start);
    }

    #[test]
    fn scene_grab_stores_what_it_copies() {
        let mut graph = FrameGraph::new();
        let rt = Some(RenderTargetHandle(3));
        graph.add_render_pass(main_pass(rt, true));
        graph.add_render_pass(RenderPass::scene_grab("grab", 0, rt, false, true));
        graph.add_render_pass(main_pass(rt, true));
        graph.compile();
        let p = graph.passes();
        assert!(p[0].depth_stencil_ops.store_depth);
        assert!(!p[0].color_ops.store);
        assert!(!p[0].skip_end && !p[2].skip_start);
    }

    #[test]
    fn virtual_passes_are_ignored() {
        let mut graph = FrameGraph::new();
        graph.add_render_pass(main_pass(None, true));
        graph.add_render_pass(RenderPass::virtual_pass("post", PassKind::Postprocess { action: 0 }));
        graph.add_render_pass(main_pass(None, false));
        graph.compile();
        let p = graph.passes();
        assert!(p[0].color_ops.store);
        assert!(!p[0].skip_end);
        graph.reset();
        assert!(graph.is_empty());
    }
}
