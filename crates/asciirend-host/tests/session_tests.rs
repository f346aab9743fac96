//! Integration tests for SceneSession
//!
//! Drives the scene state machine against the WAT test guest, which traps on
//! any call against a dead scene slot and on mismatched frees, so protocol
//! violations surface as test failures.

mod common;

use asciirend_host::pixels::PaletteId;
use asciirend_host::session::{MouseButton, SceneOp};
use asciirend_host::{FrameParams, HostError, Palette, SceneState, SharedSession};
use common::{CUBE_SCENE, guest_allocations, guest_scenes, session};
use wasmtime::Val;

// ============================================================================
// Helper Functions
// ============================================================================

fn call_count(session: &asciirend_host::SceneSession) -> u64 {
    session.marshaler().guest().metrics().call_count
}

fn scene_probe(session: &mut asciirend_host::SceneSession, export: &str, slot: u32) -> i32 {
    session
        .marshaler_mut()
        .guest_mut()
        .call_i32(export, &[Val::I32(slot as i32)])
        .expect("Failed to probe scene")
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_scene_lifecycle() {
    let mut session = session();

    let scene = session.scene_from_json(CUBE_SCENE).unwrap();
    assert_eq!(session.state(scene).unwrap(), SceneState::SceneLoaded);
    assert_eq!(session.live_scenes(), 1);

    session
        .configure_frame(scene, &FrameParams::new(4, 2))
        .unwrap();
    assert_eq!(session.state(scene).unwrap(), SceneState::FrameConfigured);

    let pixels = session.render(scene, Palette::Ansi16, 4, 2).unwrap();
    assert_eq!(session.state(scene).unwrap(), SceneState::Rendered);
    assert_eq!((pixels.width(), pixels.height()), (4, 2));

    let buffer = session.marshaler().decode_pixel_buffer(&pixels).unwrap();
    assert_eq!(buffer.to_text().unwrap(), "#.#.\n.#.#\n");
    assert_eq!(buffer.pixel(0, 0).map(|p| p.r), Some(1));
    session.free_pixels(pixels).unwrap();

    assert_eq!(session.scene_to_json(scene).unwrap(), CUBE_SCENE);

    session.remove_scene(scene).unwrap();
    assert_eq!(session.state(scene).unwrap(), SceneState::Freed);
    assert_eq!(session.live_scenes(), 0);

    assert_eq!(guest_scenes(&mut session), 0);
    assert_eq!(guest_allocations(&mut session), 0);
    assert_eq!(session.marshaler().outstanding(), 0);
}

#[test]
fn test_invalid_json_is_parse_error() {
    let mut session = session();

    for text in ["not json", "", "{\"objects\":["] {
        assert!(matches!(
            session.scene_from_json(text),
            Err(HostError::SceneParse)
        ));
    }

    assert_eq!(session.live_scenes(), 0);
    assert_eq!(guest_allocations(&mut session), 0);
    assert_eq!(session.marshaler().outstanding(), 0);
}

#[test]
fn test_new_scene_and_from_value() {
    let mut session = session();

    let empty = session.new_scene().unwrap();
    assert_eq!(session.scene_to_json(empty).unwrap(), "{}");

    let value = serde_json::json!({ "objects": [] });
    let scene = session.scene_from_value(&value).unwrap();
    assert_eq!(session.scene_to_json(scene).unwrap(), value.to_string());

    assert_ne!(empty, scene);
    assert_eq!(session.live_scenes(), 2);
}

#[test]
fn test_missing_exports_refused() {
    let wat = r#"(module (memory (export "memory") 1))"#;

    match asciirend_host::SceneSession::from_bytes(wat.as_bytes()) {
        Err(HostError::Load(msg)) => {
            assert!(msg.contains("alloc_string"), "{msg}");
            assert!(msg.contains("remove_scene"), "{msg}");
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("session must not accept an incomplete guest"),
    }
}

// ============================================================================
// State machine
// ============================================================================

#[test]
fn test_render_requires_configured_frame() {
    let mut session = session();
    let scene = session.scene_from_json(CUBE_SCENE).unwrap();

    assert!(matches!(
        session.render(scene, Palette::TrueColor, 2, 2),
        Err(HostError::InvalidState {
            op: SceneOp::Render,
            state: SceneState::SceneLoaded,
            ..
        })
    ));
    assert!(matches!(
        session.render_frame(scene, Palette::TrueColor),
        Err(HostError::InvalidState { .. })
    ));
    assert_eq!(session.state(scene).unwrap(), SceneState::SceneLoaded);
}

#[test]
fn test_configure_frame_is_idempotent() {
    let mut session = session();
    let scene = session.scene_from_json(CUBE_SCENE).unwrap();

    session
        .configure_frame(scene, &FrameParams::new(8, 4))
        .unwrap();
    session
        .configure_frame(scene, &FrameParams::new(6, 3))
        .unwrap();
    assert_eq!(session.state(scene).unwrap(), SceneState::FrameConfigured);
    assert_eq!(scene_probe(&mut session, "frame_width", scene.slot()), 6);

    let buffer = session.render_frame(scene, Palette::Ansi256).unwrap();
    assert_eq!((buffer.width(), buffer.height()), (6, 3));
    assert_eq!(session.state(scene).unwrap(), SceneState::Rendered);

    session
        .configure_frame(scene, &FrameParams::new(2, 1))
        .unwrap();
    assert_eq!(session.state(scene).unwrap(), SceneState::FrameConfigured);
    assert_eq!(session.render_frame(scene, Palette::Ansi256).unwrap().to_text().unwrap(), "#.\n");
    assert_eq!(session.marshaler().outstanding(), 0);
}

#[test]
fn test_oversized_render_rejected_before_guest() {
    let mut session = session();
    let scene = session.scene_from_json(CUBE_SCENE).unwrap();
    session
        .configure_frame(scene, &FrameParams::new(2, 2))
        .unwrap();

    let calls = call_count(&session);
    assert!(matches!(
        session.render(scene, Palette::Ansi16, u32::MAX, 2),
        Err(HostError::InvalidDimensions { .. })
    ));
    assert_eq!(call_count(&session), calls);
    assert_eq!(session.state(scene).unwrap(), SceneState::FrameConfigured);
}

// ============================================================================
// Handle validity
// ============================================================================

#[test]
fn test_use_after_free_never_reaches_guest() {
    let mut session = session();
    let scene = session.scene_from_json(CUBE_SCENE).unwrap();
    session.remove_scene(scene).unwrap();

    let calls = call_count(&session);
    let frame = FrameParams::default();

    assert!(matches!(
        session.configure_frame(scene, &frame),
        Err(HostError::UseAfterFree { .. })
    ));
    assert!(matches!(
        session.render(scene, Palette::Ansi16, 2, 2),
        Err(HostError::UseAfterFree { .. })
    ));
    assert!(matches!(
        session.scene_to_json(scene),
        Err(HostError::UseAfterFree { .. })
    ));
    assert!(matches!(
        session.update_camera(scene),
        Err(HostError::UseAfterFree { .. })
    ));
    assert!(matches!(
        session.remove_scene(scene),
        Err(HostError::UseAfterFree { handle }) if handle == scene
    ));

    assert_eq!(call_count(&session), calls);
    assert_eq!(session.marshaler().guest().metrics().trap_count, 0);
}

#[test]
fn test_recycled_slot_is_still_stale() {
    let mut session = session();

    let first = session.scene_from_json(CUBE_SCENE).unwrap();
    session.remove_scene(first).unwrap();
    let second = session.scene_from_json(CUBE_SCENE).unwrap();

    // The guest hands out the freed slot again.
    assert_eq!(first.slot(), second.slot());
    assert_ne!(first, second);

    assert!(matches!(
        session.scene_to_json(first),
        Err(HostError::UseAfterFree { .. })
    ));
    assert_eq!(session.state(first).unwrap(), SceneState::Freed);
    assert_eq!(session.scene_to_json(second).unwrap(), CUBE_SCENE);
}

#[test]
fn test_foreign_handle_rejected() {
    let mut a = session();
    let mut b = session();

    let scene = a.scene_from_json(CUBE_SCENE).unwrap();
    let _ = b.scene_from_json(CUBE_SCENE).unwrap();

    assert!(matches!(
        b.scene_to_json(scene),
        Err(HostError::ForeignHandle { .. })
    ));
    assert!(matches!(b.state(scene), Err(HostError::ForeignHandle { .. })));
    assert!(matches!(
        b.remove_scene(scene),
        Err(HostError::ForeignHandle { .. })
    ));
    assert_eq!(b.live_scenes(), 1);
    assert_eq!(a.scene_to_json(scene).unwrap(), CUBE_SCENE);
}

// ============================================================================
// Traps
// ============================================================================

#[test]
fn test_faulted_scene_only_removable() {
    let mut session = session();
    let scene = session.scene_from_json(CUBE_SCENE).unwrap();
    session
        .configure_frame(scene, &FrameParams::new(2, 2))
        .unwrap();

    let err = session.render(scene, PaletteId(255), 2, 2).unwrap_err();
    assert!(err.is_guest_fault(), "{err}");
    assert_eq!(session.state(scene).unwrap(), SceneState::Faulted);

    assert!(matches!(
        session.configure_frame(scene, &FrameParams::new(2, 2)),
        Err(HostError::SceneFaulted { .. })
    ));
    assert!(matches!(
        session.scene_to_json(scene),
        Err(HostError::SceneFaulted { .. })
    ));
    assert!(matches!(
        session.set_focus(scene, true),
        Err(HostError::SceneFaulted { .. })
    ));

    session.remove_scene(scene).unwrap();
    assert_eq!(session.state(scene).unwrap(), SceneState::Freed);
    assert_eq!(guest_scenes(&mut session), 0);
    assert_eq!(guest_allocations(&mut session), 0);
}

// ============================================================================
// One-shot rendering
// ============================================================================

#[test]
fn test_render_once() {
    let mut session = session();
    let frame = FrameParams::new(3, 2);

    let buffer = session
        .render_once(CUBE_SCENE, Palette::TrueColor, &frame)
        .unwrap();
    assert_eq!(buffer.to_text().unwrap(), "#.#\n.#.\n");
    assert_eq!(buffer.pixel(1, 0).map(|p| p.r), Some(3));

    let text = session
        .render_text_once(CUBE_SCENE, Palette::SingleColor, &frame)
        .unwrap();
    assert_eq!(text, "#.#\n.#.\n");

    assert_eq!(session.live_scenes(), 0);
    assert_eq!(guest_scenes(&mut session), 0);
    assert_eq!(guest_allocations(&mut session), 0);
}

#[test]
fn test_render_once_removes_scene_after_trap() {
    let mut session = session();
    let baseline = guest_scenes(&mut session);

    let err = session
        .render_once(CUBE_SCENE, PaletteId(255), &FrameParams::new(2, 2))
        .unwrap_err();
    assert!(err.is_guest_fault(), "{err}");

    assert_eq!(session.live_scenes(), 0);
    assert_eq!(guest_scenes(&mut session), baseline);
    assert_eq!(guest_allocations(&mut session), 0);
    // Only the render trapped; a second removal would have trapped as well.
    assert_eq!(session.marshaler().guest().metrics().trap_count, 1);
}

#[test]
fn test_render_once_parse_failure() {
    let mut session = session();

    assert!(matches!(
        session.render_once("<scene/>", Palette::Ansi16, &FrameParams::default()),
        Err(HostError::SceneParse)
    ));
    assert_eq!(session.live_scenes(), 0);
    assert_eq!(guest_allocations(&mut session), 0);
}

#[test]
fn test_scoped_scene() {
    let mut session = session();

    {
        let mut scene = session.scoped_scene(CUBE_SCENE).unwrap();
        scene.configure_frame(&FrameParams::new(2, 1)).unwrap();
        let pixels = scene.render(Palette::Ansi16, 2, 1).unwrap();
        scene.session().free_pixels(pixels).unwrap();
        assert_eq!(scene.scene_to_json().unwrap(), CUBE_SCENE);
    }
    assert_eq!(session.live_scenes(), 0);
    assert_eq!(guest_scenes(&mut session), 0);

    let kept = session.scoped_scene(CUBE_SCENE).unwrap().detach();
    assert_eq!(session.state(kept).unwrap(), SceneState::SceneLoaded);

    let scene = session.scoped_scene(CUBE_SCENE).unwrap();
    scene.close().unwrap();
    assert_eq!(session.live_scenes(), 1);
}

// ============================================================================
// Input forwarding
// ============================================================================

#[test]
fn test_input_forwarding() {
    let mut session = session();
    let scene = session.scene_from_json(CUBE_SCENE).unwrap();

    session.set_focus(scene, false).unwrap();
    assert_eq!(scene_probe(&mut session, "scene_focused", scene.slot()), 0);

    session.scroll(scene, 0.0, 1.5).unwrap();
    session.scroll(scene, 0.0, -1.5).unwrap();
    assert_eq!(scene_probe(&mut session, "scene_scrolls", scene.slot()), 2);

    session.set_pointer(scene, 10.0, 4.0).unwrap();
    session
        .set_mouse_button(scene, MouseButton::Primary, true)
        .unwrap();
    session.update_camera(scene).unwrap();
    session
        .set_mouse_button(scene, MouseButton::Primary, false)
        .unwrap();
    session.clear_pointer(scene).unwrap();
    session.set_dither_count_frames(scene, true).unwrap();

    assert_eq!(session.state(scene).unwrap(), SceneState::SceneLoaded);
}

// ============================================================================
// Shared access
// ============================================================================

#[test]
fn test_shared_session_serializes_threads() {
    let shared = SharedSession::new(session());
    let frame = FrameParams::new(4, 2);

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let shared = shared.clone();
            std::thread::spawn(move || {
                shared.with(|session| {
                    session.render_text_once(CUBE_SCENE, Palette::Ansi256, &frame)
                })
            })
        })
        .collect();

    for worker in workers {
        let text = worker.join().unwrap().unwrap();
        assert_eq!(text, "#.#.\n.#.#\n");
    }

    let mut session = shared.into_inner().ok().unwrap();
    assert_eq!(session.live_scenes(), 0);
    assert_eq!(guest_allocations(&mut session), 0);
}
