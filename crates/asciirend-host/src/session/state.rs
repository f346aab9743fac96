//! Scene handles and their lifecycle

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Host-side reference to a scene living in the guest.
///
/// The guest identifies scenes by small slot integers that it recycles after
/// removal. The handle also records the session that created it and a
/// generation unique within that session, so a handle outliving its scene is
/// still recognised as stale after the slot has been reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SceneHandle {
    session: Uuid,
    slot: u32,
    generation: u64,
}

impl SceneHandle {
    pub(crate) fn new(session: Uuid, slot: u32, generation: u64) -> Self {
        Self {
            session,
            slot,
            generation,
        }
    }

    /// Guest slot id
    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn session(&self) -> Uuid {
        self.session
    }
}

impl fmt::Display for SceneHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.slot, self.generation)
    }
}

/// Lifecycle state of one scene
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SceneState {
    #[default]
    Uninitialized,
    SceneLoaded,
    FrameConfigured,
    Rendered,
    /// A guest call trapped; only removal is allowed.
    Faulted,
    /// Terminal
    Freed,
}

impl fmt::Display for SceneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SceneState::Uninitialized => write!(f, "Uninitialized"),
            SceneState::SceneLoaded => write!(f, "SceneLoaded"),
            SceneState::FrameConfigured => write!(f, "FrameConfigured"),
            SceneState::Rendered => write!(f, "Rendered"),
            SceneState::Faulted => write!(f, "Faulted"),
            SceneState::Freed => write!(f, "Freed"),
        }
    }
}

/// Operations on an existing scene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SceneOp {
    ConfigureFrame,
    Render,
    Serialize,
    /// Camera updates and input events
    Input,
    Remove,
}

impl fmt::Display for SceneOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SceneOp::ConfigureFrame => write!(f, "configure frame of"),
            SceneOp::Render => write!(f, "render"),
            SceneOp::Serialize => write!(f, "serialize"),
            SceneOp::Input => write!(f, "forward input to"),
            SceneOp::Remove => write!(f, "remove"),
        }
    }
}

impl SceneState {
    /// Whether `op` may be issued in this state
    pub fn permits(&self, op: SceneOp) -> bool {
        use SceneOp::*;
        use SceneState::*;
        matches!(
            (self, op),
            (SceneLoaded, ConfigureFrame | Serialize | Input | Remove)
                | (
                    FrameConfigured | Rendered,
                    ConfigureFrame | Render | Serialize | Input | Remove
                )
                | (Faulted, Remove)
        )
    }

    /// State after `op` completes successfully
    pub fn after(&self, op: SceneOp) -> SceneState {
        match op {
            SceneOp::ConfigureFrame => SceneState::FrameConfigured,
            SceneOp::Render => SceneState::Rendered,
            SceneOp::Remove => SceneState::Freed,
            SceneOp::Serialize | SceneOp::Input => *self,
        }
    }

    /// Whether the guest still holds resources for the scene
    pub fn is_live(&self) -> bool {
        !matches!(self, SceneState::Uninitialized | SceneState::Freed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_requires_frame() {
        assert!(!SceneState::SceneLoaded.permits(SceneOp::Render));
        assert!(SceneState::FrameConfigured.permits(SceneOp::Render));
        assert!(SceneState::Rendered.permits(SceneOp::Render));
    }

    #[test]
    fn test_configure_is_idempotent() {
        for state in [
            SceneState::SceneLoaded,
            SceneState::FrameConfigured,
            SceneState::Rendered,
        ] {
            assert!(state.permits(SceneOp::ConfigureFrame));
            assert_eq!(state.after(SceneOp::ConfigureFrame), SceneState::FrameConfigured);
        }
    }

    #[test]
    fn test_faulted_and_freed() {
        assert!(SceneState::Faulted.permits(SceneOp::Remove));
        assert!(!SceneState::Faulted.permits(SceneOp::Serialize));
        assert!(!SceneState::Faulted.permits(SceneOp::Input));

        for op in [SceneOp::ConfigureFrame, SceneOp::Render, SceneOp::Remove] {
            assert!(!SceneState::Freed.permits(op));
            assert!(!SceneState::Uninitialized.permits(op));
        }
        assert!(!SceneState::Freed.is_live());
        assert!(SceneState::Faulted.is_live());
    }

    #[test]
    fn test_input_keeps_state() {
        assert_eq!(SceneState::Rendered.after(SceneOp::Input), SceneState::Rendered);
        assert_eq!(SceneState::SceneLoaded.after(SceneOp::Serialize), SceneState::SceneLoaded);
    }

    #[test]
    fn test_handle_display() {
        let handle = SceneHandle::new(Uuid::nil(), 3, 7);
        assert_eq!(handle.to_string(), "#3.7");
    }
}
