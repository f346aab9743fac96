//! Scene lifecycle on top of the marshaler
//!
//! A [`SceneSession`] owns one guest instance and every scene created in it.
//! Each scene moves through
//!
//! ```text
//! Uninitialized ─▶ SceneLoaded ─▶ FrameConfigured ◀─▶ Rendered
//!                       │                │                │
//!                       └────────────────┴────────────────┴──▶ Freed
//! ```
//!
//! and the session checks every operation against the scene's state before
//! the guest is called, so a removed handle fails with
//! [`HostError::UseAfterFree`] instead of reaching the guest. A guest trap
//! during a scene operation moves the scene to [`SceneState::Faulted`], from
//! which only [`SceneSession::remove_scene`] is accepted.

mod frame;
mod scope;
mod state;

pub use frame::{FrameParams, MouseButton, ProjectionKind};
pub use scope::SceneScope;
pub use state::{SceneHandle, SceneOp, SceneState};

use error_stack::ResultExt;
use std::collections::HashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wasmtime::Val;

use crate::config::HostConfig;
use crate::error::{HostError, HostReport, HostResult, IntoHostReport};
use crate::guest::{GuestModule, GuestRuntime, exports};
use crate::memory::{GuestAllocation, GuestPixels, MemoryMarshaler};
use crate::pixels::{PaletteId, PixelBuffer, pixel_byte_len};

#[derive(Debug)]
struct SceneEntry {
    generation: u64,
    state: SceneState,
    frame: Option<FrameParams>,
}

/// Scenes of one guest instance and the state machine guarding them.
pub struct SceneSession {
    id: Uuid,
    marshaler: MemoryMarshaler,
    /// Live scenes keyed by guest slot
    scenes: HashMap<u32, SceneEntry>,
    next_generation: u64,
}

impl SceneSession {
    /// Wrap an instance, verifying it exports everything a session calls.
    pub fn new(guest: GuestModule) -> HostResult<Self> {
        let missing: Vec<&str> = exports::REQUIRED
            .iter()
            .copied()
            .filter(|name| !guest.has_export(name))
            .collect();
        if !missing.is_empty() {
            return Err(HostError::Load(format!(
                "guest is missing required exports: {}",
                missing.join(", ")
            )));
        }

        let id = Uuid::now_v7();
        debug!("Scene session {} created", id);

        Ok(Self {
            id,
            marshaler: MemoryMarshaler::new(guest),
            scenes: HashMap::new(),
            next_generation: 0,
        })
    }

    /// Load module bytes (binary or WAT) with default limits.
    pub fn from_bytes(bytes: &[u8]) -> HostResult<Self> {
        Self::new(GuestModule::load(bytes)?)
    }

    /// Compile and instantiate the module named by `config.module_path`.
    pub fn from_config(config: &HostConfig) -> HostReport<Self> {
        let path = config
            .module_path
            .as_deref()
            .ok_or_else(|| HostError::Config("module_path is not set".to_string()))
            .into_report()?;

        let guest = GuestRuntime::from_config(config)
            .and_then(|runtime| runtime.compile_file(path))
            .and_then(|compiled| compiled.instantiate())
            .into_report()
            .attach(format!("loading guest module {}", path.display()))?;

        Self::new(guest).into_report()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn marshaler(&self) -> &MemoryMarshaler {
        &self.marshaler
    }

    pub fn marshaler_mut(&mut self) -> &mut MemoryMarshaler {
        &mut self.marshaler
    }

    /// Create a scene from its JSON description.
    ///
    /// The text is staged in guest memory for the duration of the call only.
    pub fn scene_from_json(&mut self, text: &str) -> HostResult<SceneHandle> {
        let blob = self.marshaler.encode_string(text)?;
        let mut guard = self.marshaler.scoped(blob);
        let args = [guard.ptr().to_val(), Val::I32(guard.len() as i32)];

        let raw = guard
            .marshaler()
            .guest_mut()
            .call_i32(exports::SCENE_FROM_JSON, &args);
        let released = guard.release();

        let raw = raw?;
        released?;
        self.adopt_scene(raw)
    }

    pub fn scene_from_value(&mut self, scene: &serde_json::Value) -> HostResult<SceneHandle> {
        self.scene_from_json(&scene.to_string())
    }

    /// Create the guest's default empty scene.
    pub fn new_scene(&mut self) -> HostResult<SceneHandle> {
        let raw = self
            .marshaler
            .guest_mut()
            .call_i32(exports::NEW_SCENE, &[])?;
        self.adopt_scene(raw)
    }

    fn adopt_scene(&mut self, raw: i32) -> HostResult<SceneHandle> {
        if raw == -1 {
            return Err(HostError::SceneParse);
        }

        self.next_generation += 1;
        let handle = SceneHandle::new(self.id, raw as u32, self.next_generation);
        let entry = SceneEntry {
            generation: self.next_generation,
            state: SceneState::SceneLoaded,
            frame: None,
        };
        if let Some(previous) = self.scenes.insert(handle.slot(), entry) {
            warn!(
                "Guest reused slot {} while generation {} was still live",
                handle.slot(),
                previous.generation
            );
        }

        info!("Scene {} loaded", handle);
        Ok(handle)
    }

    /// Set viewport and projection. May be repeated; the last call wins.
    pub fn configure_frame(&mut self, handle: SceneHandle, frame: &FrameParams) -> HostResult<()> {
        let args = frame.to_args(handle.slot());
        self.scene_call(handle, SceneOp::ConfigureFrame, |m, _| {
            m.guest_mut().call_void(exports::NEW_FRAME, &args)
        })?;

        if let Some(entry) = self.scenes.get_mut(&handle.slot()) {
            entry.frame = Some(*frame);
        }
        debug!(
            "Scene {} frame set to {}x{} {:?}",
            handle, frame.width, frame.height, frame.projection
        );
        Ok(())
    }

    /// Rasterize the scene into a guest-allocated grid.
    ///
    /// The grid stays in guest memory until passed to
    /// [`free_pixels`](Self::free_pixels).
    pub fn render(
        &mut self,
        handle: SceneHandle,
        palette: impl Into<PaletteId>,
        width: u32,
        height: u32,
    ) -> HostResult<GuestPixels> {
        let PaletteId(palette) = palette.into();
        pixel_byte_len(width, height)?;

        self.scene_call(handle, SceneOp::Render, |m, slot| {
            let args = [
                Val::I32(slot as i32),
                Val::I32(palette as i32),
                Val::I32(width as i32),
                Val::I32(height as i32),
            ];
            let raw = m.guest_mut().call_i32(exports::RENDER_RAW, &args)?;
            m.adopt_pixels(raw, width, height)
        })
    }

    /// Render at the configured frame size and copy the result to the host.
    pub fn render_frame(
        &mut self,
        handle: SceneHandle,
        palette: impl Into<PaletteId>,
    ) -> HostResult<PixelBuffer> {
        let frame = self.entry(handle, SceneOp::Render)?.frame.ok_or(HostError::InvalidState {
            handle,
            op: SceneOp::Render,
            state: SceneState::SceneLoaded,
        })?;

        let pixels = self.render(handle, palette, frame.width, frame.height)?;
        let buffer = self.marshaler.decode_pixel_buffer(&pixels);
        self.marshaler.free_pixels(pixels)?;
        buffer
    }

    pub fn free_pixels(&mut self, pixels: GuestPixels) -> HostResult<()> {
        self.marshaler.free_pixels(pixels)
    }

    /// Serialize the scene back to JSON.
    pub fn scene_to_json(&mut self, handle: SceneHandle) -> HostResult<String> {
        self.scene_call(handle, SceneOp::Serialize, |m, slot| {
            let raw = m
                .guest_mut()
                .call_i32(exports::SCENE_TO_JSON_TUPLE, &[Val::I32(slot as i32)])?;
            let tuple = m.adopt_tuple(raw);
            let blob = m.decode_tuple(tuple)?;
            m.take_string(blob)
        })
    }

    /// Destroy the scene. The handle is invalid afterwards whatever the outcome
    /// of the guest call, unless the call could not be made at all.
    pub fn remove_scene(&mut self, handle: SceneHandle) -> HostResult<()> {
        self.entry(handle, SceneOp::Remove)?;

        let result = self
            .marshaler
            .guest_mut()
            .call_void(exports::REMOVE_SCENE, &[Val::I32(handle.slot() as i32)]);
        match &result {
            Ok(()) => info!("Scene {} removed", handle),
            Err(e) if e.is_guest_fault() => {
                warn!("Scene {} trapped while being removed: {}", handle, e)
            }
            Err(_) => return result,
        }

        self.scenes.remove(&handle.slot());
        result
    }

    /// Load, configure, render and remove a scene in one go.
    ///
    /// The scene is removed exactly once on every path, including parse
    /// failures after creation and guest traps while rendering.
    pub fn render_once(
        &mut self,
        text: &str,
        palette: impl Into<PaletteId>,
        frame: &FrameParams,
    ) -> HostResult<PixelBuffer> {
        let mut scene = self.scoped_scene(text)?;
        scene.configure_frame(frame)?;
        let buffer = scene.render_frame(palette)?;
        scene.close()?;
        Ok(buffer)
    }

    /// [`render_once`](Self::render_once) straight to text.
    pub fn render_text_once(
        &mut self,
        text: &str,
        palette: impl Into<PaletteId>,
        frame: &FrameParams,
    ) -> HostResult<String> {
        self.render_once(text, palette, frame)?.to_text()
    }

    /// Create a scene that is removed when the returned guard drops.
    pub fn scoped_scene(&mut self, text: &str) -> HostResult<SceneScope<'_>> {
        let handle = self.scene_from_json(text)?;
        Ok(SceneScope::new(self, handle))
    }

    /// Apply pointer and scroll input to the scene camera.
    pub fn update_camera(&mut self, handle: SceneHandle) -> HostResult<()> {
        self.input(handle, exports::UPDATE_CAMERA, &[])
    }

    pub fn set_focus(&mut self, handle: SceneHandle, focused: bool) -> HostResult<()> {
        self.input(handle, exports::EVENT_FOCUS, &[Val::I32(focused as i32)])
    }

    /// Pointer position in cell coordinates
    pub fn set_pointer(&mut self, handle: SceneHandle, x: f32, y: f32) -> HostResult<()> {
        self.input(handle, exports::EVENT_MOUSE_POS, &[Val::from(x), Val::from(y)])
    }

    pub fn clear_pointer(&mut self, handle: SceneHandle) -> HostResult<()> {
        self.input(handle, exports::EVENT_MOUSE_POS_CLEAR, &[])
    }

    pub fn set_mouse_button(
        &mut self,
        handle: SceneHandle,
        button: MouseButton,
        down: bool,
    ) -> HostResult<()> {
        let primary = button == MouseButton::Primary;
        self.input(
            handle,
            exports::EVENT_MOUSE_BUTTON_STATE,
            &[Val::I32(down as i32), Val::I32(primary as i32)],
        )
    }

    pub fn scroll(&mut self, handle: SceneHandle, x: f32, y: f32) -> HostResult<()> {
        self.input(handle, exports::EVENT_SCROLL, &[Val::from(x), Val::from(y)])
    }

    /// Advance the dither pattern with every rendered frame.
    pub fn set_dither_count_frames(&mut self, handle: SceneHandle, enabled: bool) -> HostResult<()> {
        self.input(
            handle,
            exports::SET_DITHER_COUNT_FRAMES,
            &[Val::I32(enabled as i32)],
        )
    }

    /// Current state of a handle produced by this session.
    ///
    /// Removed handles report [`SceneState::Freed`].
    pub fn state(&self, handle: SceneHandle) -> HostResult<SceneState> {
        if handle.session() != self.id {
            return Err(HostError::ForeignHandle { handle });
        }
        Ok(match self.scenes.get(&handle.slot()) {
            Some(entry) if entry.generation == handle.generation() => entry.state,
            _ => SceneState::Freed,
        })
    }

    /// Scenes the guest still holds resources for
    pub fn live_scenes(&self) -> usize {
        self.scenes.len()
    }

    fn entry(&self, handle: SceneHandle, op: SceneOp) -> HostResult<&SceneEntry> {
        if handle.session() != self.id {
            return Err(HostError::ForeignHandle { handle });
        }
        let entry = match self.scenes.get(&handle.slot()) {
            Some(entry) if entry.generation == handle.generation() => entry,
            _ => return Err(HostError::UseAfterFree { handle }),
        };

        if entry.state.permits(op) {
            return Ok(entry);
        }
        Err(match entry.state {
            SceneState::Faulted => HostError::SceneFaulted { handle },
            state => HostError::InvalidState { handle, op, state },
        })
    }

    /// Run `call` for a live scene, advancing its state on success and
    /// faulting it when the guest traps.
    fn scene_call<T>(
        &mut self,
        handle: SceneHandle,
        op: SceneOp,
        call: impl FnOnce(&mut MemoryMarshaler, u32) -> HostResult<T>,
    ) -> HostResult<T> {
        self.entry(handle, op)?;
        let result = call(&mut self.marshaler, handle.slot());

        if let Some(entry) = self.scenes.get_mut(&handle.slot()) {
            match &result {
                Ok(_) => entry.state = entry.state.after(op),
                Err(e) if e.is_guest_fault() => {
                    warn!("Scene {} faulted during {:?}: {}", handle, op, e);
                    entry.state = SceneState::Faulted;
                }
                Err(_) => {}
            }
        }
        result
    }

    fn input(&mut self, handle: SceneHandle, export: &str, args: &[Val]) -> HostResult<()> {
        self.scene_call(handle, SceneOp::Input, |m, slot| {
            let mut full = Vec::with_capacity(args.len() + 1);
            full.push(Val::I32(slot as i32));
            full.extend_from_slice(args);
            m.guest_mut().call_void(export, &full)
        })
    }
}
