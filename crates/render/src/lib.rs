//! Rendering Adapter: render sink interface and camera.
//!
//! # Invariants
//! - A sink cannot mutate world truth.
//! - Every frame is drawn from one consistent world snapshot.
//!
//! # Workaround
//! Ships a debug text sink in place of a GPU backend. The trait is stable;
//! a GPU sink plugs in without changing the viewer.

mod camera;
mod renderer;

pub use camera::OrbitCamera;
pub use renderer::{DebugTextRenderer, FrameContext, RenderError, RenderSink};
