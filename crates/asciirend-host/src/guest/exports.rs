//! Names of the functions the renderer module exports.

pub const MEMORY: &str = "memory";

pub const ALLOC_STRING: &str = "alloc_string";
pub const DEALLOC_STRING: &str = "dealloc_string";
pub const DEALLOC_STRTUP: &str = "dealloc_strtup";

pub const SCENE_FROM_JSON: &str = "scene_from_json";
pub const SCENE_TO_JSON_TUPLE: &str = "scene_to_json_tuple";
pub const NEW_FRAME: &str = "new_frame";
pub const RENDER_RAW: &str = "render_raw";
pub const FREE_RAW_PIXELS: &str = "free_raw_pixels";
pub const REMOVE_SCENE: &str = "remove_scene";

pub const NEW_SCENE: &str = "new_scene";
pub const UPDATE_CAMERA: &str = "update_camera";
pub const EVENT_FOCUS: &str = "event_focus";
pub const EVENT_MOUSE_POS: &str = "event_mouse_pos";
pub const EVENT_MOUSE_POS_CLEAR: &str = "event_mouse_pos_clear";
pub const EVENT_MOUSE_BUTTON_STATE: &str = "event_mouse_button_state";
pub const EVENT_SCROLL: &str = "event_scroll";
pub const SET_DITHER_COUNT_FRAMES: &str = "set_dither_count_frames";

/// Exports a scene session cannot work without.
pub const REQUIRED: &[&str] = &[
    ALLOC_STRING,
    DEALLOC_STRING,
    DEALLOC_STRTUP,
    SCENE_FROM_JSON,
    SCENE_TO_JSON_TUPLE,
    NEW_FRAME,
    RENDER_RAW,
    FREE_RAW_PIXELS,
    REMOVE_SCENE,
];
