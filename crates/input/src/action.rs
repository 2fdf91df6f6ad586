use blockview_common::{BlockFace, BlockPos};
use glam::Vec2;

/// A high-level action produced by pointer input.
///
/// The viewer consumes actions, never raw pointer events.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    /// Rotate the camera around its anchor, in degrees.
    Orbit { yaw_deg: f32, pitch_deg: f32 },
    /// Slide the camera anchor by a screen-space drag, in pixels.
    Pan { pixels: Vec2 },
    /// Ask the authority to place a block next to an existing one.
    PlaceAdjacent { existing: BlockPos, face: BlockFace },
}

impl Action {
    /// True for actions that only touch the local camera.
    pub fn is_camera(&self) -> bool {
        matches!(self, Action::Orbit { .. } | Action::Pan { .. })
    }
}
