//! Scoped scene ownership
//!
//! [`SceneScope`] ties a scene handle to a borrow of its session and removes
//! the scene when dropped.

use tracing::warn;

use super::{FrameParams, SceneHandle, SceneSession};
use crate::error::HostResult;
use crate::memory::GuestPixels;
use crate::pixels::{PaletteId, PixelBuffer};

/// A scene that is removed when the guard goes out of scope.
///
/// Removal errors during drop are logged; use [`close`](Self::close) to
/// observe them.
pub struct SceneScope<'s> {
    session: &'s mut SceneSession,
    handle: Option<SceneHandle>,
}

impl<'s> SceneScope<'s> {
    pub(super) fn new(session: &'s mut SceneSession, handle: SceneHandle) -> Self {
        Self {
            session,
            handle: Some(handle),
        }
    }

    pub fn handle(&self) -> SceneHandle {
        self.handle
            .expect("scene handle is present until detached or closed")
    }

    /// The owning session, for operations the guard does not forward.
    pub fn session(&mut self) -> &mut SceneSession {
        self.session
    }

    pub fn configure_frame(&mut self, frame: &FrameParams) -> HostResult<()> {
        let handle = self.handle();
        self.session.configure_frame(handle, frame)
    }

    pub fn render(
        &mut self,
        palette: impl Into<PaletteId>,
        width: u32,
        height: u32,
    ) -> HostResult<GuestPixels> {
        let handle = self.handle();
        self.session.render(handle, palette, width, height)
    }

    pub fn render_frame(&mut self, palette: impl Into<PaletteId>) -> HostResult<PixelBuffer> {
        let handle = self.handle();
        self.session.render_frame(handle, palette)
    }

    pub fn scene_to_json(&mut self) -> HostResult<String> {
        let handle = self.handle();
        self.session.scene_to_json(handle)
    }

    /// Keep the scene alive; the caller becomes responsible for removing it.
    pub fn detach(mut self) -> SceneHandle {
        self.handle
            .take()
            .expect("scene handle is present until detached or closed")
    }

    /// Remove the scene now and report the outcome.
    pub fn close(mut self) -> HostResult<()> {
        match self.handle.take() {
            Some(handle) => self.session.remove_scene(handle),
            None => Ok(()),
        }
    }
}

impl Drop for SceneScope<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.session.remove_scene(handle) {
                warn!("Failed to remove scene {} on scope exit: {}", handle, e);
            }
        }
    }
}
