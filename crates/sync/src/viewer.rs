use crate::config::{ConfigError, ViewerConfig};
use crate::coordinator::{SyncCoordinator, SyncError, ViewerStatus};
use blockview_kernel::{ClockError, ClockState, FramePhases, FrameStats, SimulationLoop};
use blockview_input::{Action, Modifiers, PointerController};
use blockview_render::{FrameContext, OrbitCamera, RenderError, RenderSink};
use blockview_stream::Transport;
use glam::Vec2;
use std::sync::Arc;

/// Errors surfaced by a viewer frame or setup.
#[derive(Debug, thiserror::Error)]
pub enum ViewerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Clock(#[from] ClockError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("render failed: {0}")]
    Render(#[from] RenderError),
}

/// A viewer session: clock, synchronized world, camera and render sink.
pub struct Viewer<R: RenderSink> {
    sim: SimulationLoop,
    sync: SyncCoordinator,
    camera: OrbitCamera,
    pointer: PointerController,
    viewport: Vec2,
    renderer: R,
    last_output: Option<R::Output>,
}

impl<R: RenderSink> Viewer<R> {
    pub fn connect(
        transport: Arc<dyn Transport>,
        config: &ViewerConfig,
        renderer: R,
    ) -> Result<Self, ViewerError> {
        config.validate()?;
        let sim = SimulationLoop::new(config.clock)?;
        let sync = SyncCoordinator::connect(transport, config.channel)?;
        tracing::info!(time_step = config.clock.time_step, "viewer connected");
        Ok(Self {
            sim,
            sync,
            camera: OrbitCamera::default(),
            pointer: PointerController::new(),
            viewport: Vec2::new(1280.0, 720.0),
            renderer,
            last_output: None,
        })
    }

    /// One host callback at `now_ms`.
    ///
    /// Each update step pumps the channel; the render step draws from one
    /// read-locked snapshot of the world.
    pub fn frame(&mut self, now_ms: f64) -> Result<FrameStats, ViewerError> {
        let mut phases = ViewerPhases {
            sync: &mut self.sync,
            renderer: &mut self.renderer,
            camera: &self.camera,
            output: &mut self.last_output,
        };
        self.sim.frame(now_ms, &mut phases)
    }

    pub fn pointer_down(&mut self, position: Vec2, modifiers: Modifiers) {
        self.pointer.press(position, modifiers);
    }

    pub fn pointer_move(&mut self, position: Vec2) -> Result<(), ViewerError> {
        match self.pointer.move_to(position) {
            Some(action) => self.apply_action(action),
            None => Ok(()),
        }
    }

    pub fn pointer_up(&mut self) {
        self.pointer.release();
    }

    /// Camera actions change the local view. Placement goes to the
    /// authority and shows up once it is broadcast back.
    pub fn apply_action(&mut self, action: Action) -> Result<(), ViewerError> {
        match action {
            Action::Orbit { yaw_deg, pitch_deg } => {
                self.camera.orbit_yaw(yaw_deg);
                self.camera.orbit_pitch(pitch_deg);
            }
            Action::Pan { pixels } => self.camera.pan_screen(pixels, self.viewport),
            Action::PlaceAdjacent { existing, face } => {
                self.sync.add_adjacent_block(existing, face, move |result| {
                    if result.is_ok() {
                        tracing::debug!(%existing, ?face, "block placement accepted");
                    }
                })?;
            }
        }
        Ok(())
    }

    pub fn resize(&mut self, width: f32, height: f32) {
        self.viewport = Vec2::new(width, height);
        self.camera.resize(width, height);
    }

    pub fn clock(&self) -> &ClockState {
        self.sim.clock()
    }

    pub fn camera(&self) -> &OrbitCamera {
        &self.camera
    }

    pub fn status(&self) -> &ViewerStatus {
        self.sync.status()
    }

    pub fn sync(&self) -> &SyncCoordinator {
        &self.sync
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Output of the most recent render.
    pub fn last_output(&self) -> Option<&R::Output> {
        self.last_output.as_ref()
    }

    pub fn reconnect(&mut self) -> Result<(), ViewerError> {
        self.sync.reconnect()?;
        Ok(())
    }

    /// Close the channel. Frames keep drawing the last known world.
    pub fn shutdown(&mut self) {
        self.sync.shutdown();
    }
}

struct ViewerPhases<'a, R: RenderSink> {
    sync: &'a mut SyncCoordinator,
    renderer: &'a mut R,
    camera: &'a OrbitCamera,
    output: &'a mut Option<R::Output>,
}

impl<R: RenderSink> FramePhases for ViewerPhases<'_, R> {
    type Error = ViewerError;

    fn update(&mut self, _clock: &ClockState) -> Result<(), ViewerError> {
        let report = self.sync.pump();
        if !report.changes.is_empty() {
            self.renderer.world_changed(&report.changes);
        }
        Ok(())
    }

    fn render(&mut self, clock: &ClockState) -> Result<(), ViewerError> {
        let world = self.sync.read();
        let frame = FrameContext::new(clock, &world, self.camera);
        *self.output = Some(self.renderer.render(&frame)?);
        Ok(())
    }
}
