//! Frame and input parameters forwarded to the guest

use serde::{Deserialize, Serialize};
use wasmtime::Val;

/// Camera projection used when configuring a frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectionKind {
    #[default]
    Perspective,
    Orthographic,
}

impl ProjectionKind {
    pub fn from_ortho(is_ortho: bool) -> Self {
        if is_ortho {
            ProjectionKind::Orthographic
        } else {
            ProjectionKind::Perspective
        }
    }

    fn wire(self) -> i32 {
        match self {
            ProjectionKind::Perspective => 0,
            ProjectionKind::Orthographic => 1,
        }
    }
}

/// Viewport and projection parameters of a frame.
///
/// `fov` is in degrees for perspective projection; for orthographic projection
/// it is the half-height of the view volume at unit camera distance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameParams {
    pub projection: ProjectionKind,
    /// Width in character cells
    pub width: u32,
    /// Height in character cells
    pub height: u32,
    pub aspect: f32,
    pub fov: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for FrameParams {
    fn default() -> Self {
        Self {
            projection: ProjectionKind::Perspective,
            width: 64,
            height: 18,
            aspect: 16.0 / 9.0,
            fov: 1.0,
            near: 0.01,
            far: 100.0,
        }
    }
}

impl FrameParams {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }

    pub fn with_projection(mut self, projection: ProjectionKind) -> Self {
        self.projection = projection;
        self
    }

    pub fn with_aspect(mut self, aspect: f32) -> Self {
        self.aspect = aspect;
        self
    }

    pub fn with_fov(mut self, fov: f32) -> Self {
        self.fov = fov;
        self
    }

    pub fn with_clip(mut self, near: f32, far: f32) -> Self {
        self.near = near;
        self.far = far;
        self
    }

    /// Arguments of `new_frame` following the scene handle.
    pub(crate) fn to_args(self, slot: u32) -> [Val; 8] {
        [
            Val::I32(slot as i32),
            Val::I32(self.projection.wire()),
            Val::I32(self.width as i32),
            Val::I32(self.height as i32),
            Val::from(self.aspect),
            Val::from(self.fov),
            Val::from(self.near),
            Val::from(self.far),
        ]
    }
}

/// Pointer button reported to the guest camera controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Primary,
    Secondary,
}
