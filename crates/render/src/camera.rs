use glam::{Mat4, Vec2, Vec3};

/// Camera orbiting an anchor point at a fixed distance.
///
/// Camera motion is outside the synchronized world; nothing here feeds back
/// into the world model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrbitCamera {
    pub anchor: Vec3,
    pub offset_from_anchor: f32,
    /// Degrees around +Y.
    pub yaw: f32,
    /// Degrees above (+) or below (-) the horizon.
    pub pitch: f32,
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self {
            anchor: Vec3::ZERO,
            offset_from_anchor: 5.0,
            yaw: 37.0,
            pitch: -23.0,
            fov: 60.0_f32.to_radians(),
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl OrbitCamera {
    const PITCH_LIMIT: f32 = 89.0;

    /// Unit vector from the eye toward the anchor.
    pub fn forward(&self) -> Vec3 {
        let (yaw, pitch) = (self.yaw.to_radians(), self.pitch.to_radians());
        Vec3::new(
            -yaw.sin() * pitch.cos(),
            pitch.sin(),
            -yaw.cos() * pitch.cos(),
        )
        .normalize()
    }

    pub fn right(&self) -> Vec3 {
        self.forward().cross(Vec3::Y).normalize()
    }

    pub fn up(&self) -> Vec3 {
        self.right().cross(self.forward()).normalize()
    }

    pub fn eye(&self) -> Vec3 {
        self.anchor - self.forward() * self.offset_from_anchor
    }

    pub fn orbit_yaw(&mut self, degrees: f32) {
        self.yaw = (self.yaw + degrees).rem_euclid(360.0);
    }

    pub fn orbit_pitch(&mut self, degrees: f32) {
        self.pitch = (self.pitch + degrees).clamp(-Self::PITCH_LIMIT, Self::PITCH_LIMIT);
    }

    /// Move the anchor in the view plane by a world-space delta.
    pub fn pan(&mut self, delta: Vec3) {
        self.anchor += delta;
    }

    /// Pan so that content under the pointer follows a screen-space drag of
    /// `pixels` within a `viewport`.
    pub fn pan_screen(&mut self, pixels: Vec2, viewport: Vec2) {
        if viewport.y <= 0.0 {
            return;
        }
        // World units per pixel at the anchor's depth.
        let scale = 2.0 * self.offset_from_anchor * (self.fov * 0.5).tan() / viewport.y;
        let delta = self.right() * (-pixels.x * scale) + self.up() * (pixels.y * scale);
        self.pan(delta);
    }

    pub fn resize(&mut self, width: f32, height: f32) {
        if height > 0.0 {
            self.aspect = width / height;
        }
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye(), self.anchor, Vec3::Y)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov, self.aspect, self.near, self.far)
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }
}
