//! Common test utilities shared across all `asciirend-host` integration tests.
//!
//! This module is **not** a standalone test binary. It is declared with
//! `mod common;` inside each integration test file that needs it.

#![allow(dead_code)]

use asciirend_host::{GuestModule, SceneSession};

/// WAT stand-in for the renderer module.
pub const GUEST_WAT: &str = include_str!("../fixtures/guest.wat");

pub const CUBE_SCENE: &str = r#"{"objects":[{"ty":{"Cube":{"size":[1.0,1.0,1.0]}},"material":1,"text":"Test"}],"bg":{"color":[0.01,0.01,0.01]}}"#;

/// Install a fmt subscriber once per test binary; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn guest() -> GuestModule {
    init_tracing();
    GuestModule::load(GUEST_WAT.as_bytes()).expect("Failed to load test guest")
}

pub fn session() -> SceneSession {
    init_tracing();
    SceneSession::from_bytes(GUEST_WAT.as_bytes()).expect("Failed to load test guest")
}

/// Allocations the guest allocator considers live.
pub fn guest_allocations(session: &mut SceneSession) -> i32 {
    session
        .marshaler_mut()
        .guest_mut()
        .call_i32("live_allocations", &[])
        .expect("Failed to query guest allocations")
}

/// Scenes the guest considers live.
pub fn guest_scenes(session: &mut SceneSession) -> i32 {
    session
        .marshaler_mut()
        .guest_mut()
        .call_i32("live_scenes", &[])
        .expect("Failed to query guest scenes")
}
