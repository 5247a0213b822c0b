/// Expression category the pipeline watches by default (eyebrows raised).
pub const DEFAULT_CATEGORY: &str = "browInnerUp";

pub const DEFAULT_TRIGGER_THRESHOLD: f32 = 0.7;
pub const DEFAULT_COOLDOWN_MS: u64 = 500;
pub const DEFAULT_MIRROR: bool = true;

pub const DEFAULT_DETECTION_CONFIDENCE: f32 = 0.5;
pub const DEFAULT_TRACKING_CONFIDENCE: f32 = 0.5;
pub const DEFAULT_PRESENCE_CONFIDENCE: f32 = 0.5;
pub const DEFAULT_MAX_SUBJECTS: usize = 1;

pub const DEFAULT_SURFACE_WIDTH: u32 = 800;
pub const DEFAULT_SURFACE_HEIGHT: u32 = 600;

pub const EXPRESSION_MODEL_NAME: &str = "face_blendshapes.onnx";

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp"];

/// Blendshape labels in the order face-landmark models emit them.
pub const BLENDSHAPE_LABELS: [&str; 52] = [
    "_neutral",
    "browDownLeft",
    "browDownRight",
    "browInnerUp",
    "browOuterUpLeft",
    "browOuterUpRight",
    "cheekPuff",
    "cheekSquintLeft",
    "cheekSquintRight",
    "eyeBlinkLeft",
    "eyeBlinkRight",
    "eyeLookDownLeft",
    "eyeLookDownRight",
    "eyeLookInLeft",
    "eyeLookInRight",
    "eyeLookOutLeft",
    "eyeLookOutRight",
    "eyeLookUpLeft",
    "eyeLookUpRight",
    "eyeSquintLeft",
    "eyeSquintRight",
    "eyeWideLeft",
    "eyeWideRight",
    "jawForward",
    "jawLeft",
    "jawOpen",
    "jawRight",
    "mouthClose",
    "mouthDimpleLeft",
    "mouthDimpleRight",
    "mouthFrownLeft",
    "mouthFrownRight",
    "mouthFunnel",
    "mouthLeft",
    "mouthLowerDownLeft",
    "mouthLowerDownRight",
    "mouthPressLeft",
    "mouthPressRight",
    "mouthPucker",
    "mouthRight",
    "mouthRollLower",
    "mouthRollUpper",
    "mouthShrugLower",
    "mouthShrugUpper",
    "mouthSmileLeft",
    "mouthSmileRight",
    "mouthStretchLeft",
    "mouthStretchRight",
    "mouthUpperUpLeft",
    "mouthUpperUpRight",
    "noseSneerLeft",
    "noseSneerRight",
];

/// Position of `name` in [`BLENDSHAPE_LABELS`], if it is a known label.
pub fn blendshape_index(name: &str) -> Option<usize> {
    BLENDSHAPE_LABELS.iter().position(|label| *label == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_category_is_a_known_blendshape() {
        assert_eq!(blendshape_index(DEFAULT_CATEGORY), Some(3));
    }

    #[test]
    fn test_unknown_label_has_no_index() {
        assert_eq!(blendshape_index("wiggleEars"), None);
    }
}
