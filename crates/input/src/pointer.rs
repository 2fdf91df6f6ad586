use crate::action::Action;
use glam::Vec2;

/// Degrees of camera rotation per pixel of drag.
pub const ORBIT_DEGREES_PER_PIXEL: f32 = 0.5;

/// What the current drag is doing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Movement {
    #[default]
    None,
    Orbit,
    Pan,
}

/// Modifier keys held when the pointer went down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub ctrl: bool,
}

/// Turns press / move / release into camera actions.
///
/// A plain drag orbits, a ctrl-drag pans. Moves with no button down produce
/// nothing.
#[derive(Debug, Clone, Default)]
pub struct PointerController {
    movement: Movement,
    last: Vec2,
}

impl PointerController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn movement(&self) -> Movement {
        self.movement
    }

    pub fn press(&mut self, position: Vec2, modifiers: Modifiers) {
        self.movement = if modifiers.ctrl {
            Movement::Pan
        } else {
            Movement::Orbit
        };
        self.last = position;
        tracing::trace!(movement = ?self.movement, "pointer down");
    }

    pub fn move_to(&mut self, position: Vec2) -> Option<Action> {
        let delta = self.last - position;
        self.last = position;
        match self.movement {
            Movement::None => None,
            Movement::Orbit => Some(Action::Orbit {
                yaw_deg: delta.x * ORBIT_DEGREES_PER_PIXEL,
                pitch_deg: delta.y * ORBIT_DEGREES_PER_PIXEL,
            }),
            Movement::Pan => Some(Action::Pan { pixels: -delta }),
        }
    }

    pub fn release(&mut self) {
        self.movement = Movement::None;
    }
}
