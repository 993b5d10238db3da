//! Canonical joint-angle metric names.
//!
//! These keys appear in every persisted `FrameResult::metrics` map, in the
//! summary handed to the language model, and in API responses, so they must
//! stay stable.

/// Right knee flexion (right hip, right knee, right ankle).
pub const RIGHT_KNEE_ANGLE: &str = "right_knee_angle";

/// Left knee flexion (left hip, left knee, left ankle).
pub const LEFT_KNEE_ANGLE: &str = "left_knee_angle";

/// Right elbow flexion (right shoulder, right elbow, right wrist).
pub const RIGHT_ELBOW_ANGLE: &str = "right_elbow_angle";

/// Left elbow flexion (left shoulder, left elbow, left wrist).
pub const LEFT_ELBOW_ANGLE: &str = "left_elbow_angle";
