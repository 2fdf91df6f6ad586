use crate::camera::OrbitCamera;
use blockview_kernel::{ClockState, WorldEvent, WorldModel};
use std::fmt::Write;

/// Errors a render sink can report.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("render backend lost: {0}")]
    BackendLost(String),
    #[error("formatting failed")]
    Format(#[from] std::fmt::Error),
}

/// Everything one frame is drawn from.
///
/// The world reference is a consistent snapshot: the caller holds the world's
/// read lock for as long as this context lives.
#[derive(Debug, Clone, Copy)]
pub struct FrameContext<'a> {
    pub world_time: f64,
    pub render_alpha: f64,
    pub world: &'a WorldModel,
    pub camera: &'a OrbitCamera,
}

impl<'a> FrameContext<'a> {
    pub fn new(clock: &ClockState, world: &'a WorldModel, camera: &'a OrbitCamera) -> Self {
        Self {
            world_time: clock.world_time(),
            render_alpha: clock.render_alpha(),
            world,
            camera,
        }
    }
}

/// Renderer-agnostic sink. All renderers implement this trait.
///
/// A sink reads the world; it never mutates it. World truth is owned by the
/// synchronization layer.
pub trait RenderSink {
    /// What one drawn frame produces.
    type Output;

    /// Blocks changed since the last call. Runs from the update phase, before
    /// the next render.
    fn world_changed(&mut self, _events: &[WorldEvent]) {}

    /// Draw one frame.
    fn render(&mut self, frame: &FrameContext<'_>) -> Result<Self::Output, RenderError>;
}

/// Debug text sink.
///
/// Produces a human-readable description of the frame. Used by the CLI and
/// by tests of the render interface.
#[derive(Debug, Default)]
pub struct DebugTextRenderer {
    /// List every block, not just the count.
    pub list_blocks: bool,
    changed: usize,
}

impl DebugTextRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listing_blocks() -> Self {
        Self {
            list_blocks: true,
            changed: 0,
        }
    }

    /// Blocks reported through [`RenderSink::world_changed`] so far.
    pub fn changed_blocks(&self) -> usize {
        self.changed
    }
}

impl RenderSink for DebugTextRenderer {
    type Output = String;

    fn world_changed(&mut self, events: &[WorldEvent]) {
        self.changed += events.len();
    }

    fn render(&mut self, frame: &FrameContext<'_>) -> Result<String, RenderError> {
        let mut out = String::new();
        writeln!(
            out,
            "=== Frame (t={:.3}s, alpha={:.2}, version={}) ===",
            frame.world_time,
            frame.render_alpha,
            frame.world.version()
        )?;
        writeln!(out, "Blocks: {}", frame.world.block_count())?;
        let eye = frame.camera.eye();
        let anchor = frame.camera.anchor;
        writeln!(
            out,
            "Camera: eye=({:.1}, {:.1}, {:.1}) anchor=({:.1}, {:.1}, {:.1}) yaw={:.0} pitch={:.0}",
            eye.x, eye.y, eye.z, anchor.x, anchor.y, anchor.z, frame.camera.yaw, frame.camera.pitch
        )?;
        if self.list_blocks {
            for pos in frame.world.blocks() {
                writeln!(out, "  block {pos}")?;
            }
        }
        tracing::trace!(bytes = out.len(), "debug frame rendered");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockview_common::BlockPos;
    use blockview_kernel::{ClockConfig, SimulationLoop};

    fn clock() -> ClockState {
        *SimulationLoop::new(ClockConfig::default()).unwrap().clock()
    }

    #[test]
    fn debug_renderer_empty_world() {
        let world = WorldModel::new();
        let camera = OrbitCamera::default();
        let mut renderer = DebugTextRenderer::new();
        let output = renderer
            .render(&FrameContext::new(&clock(), &world, &camera))
            .unwrap();

        assert!(output.contains("t=0.000"));
        assert!(output.contains("Blocks: 0"));
    }

    #[test]
    fn debug_renderer_lists_blocks() {
        let mut world = WorldModel::new();
        world.insert_block(BlockPos::ORIGIN);
        world.insert_block(BlockPos::new(1, 2, 3));
        let camera = OrbitCamera::default();

        let mut renderer = DebugTextRenderer::listing_blocks();
        let output = renderer
            .render(&FrameContext::new(&clock(), &world, &camera))
            .unwrap();

        assert!(output.contains("Blocks: 2"));
        assert!(output.contains("block (1, 2, 3)"));
    }

    #[test]
    fn world_changes_are_counted() {
        let mut world = WorldModel::new();
        world.insert_block(BlockPos::ORIGIN);
        let mut renderer = DebugTextRenderer::new();
        renderer.world_changed(&world.drain_events());
        assert_eq!(renderer.changed_blocks(), 1);
    }
}
