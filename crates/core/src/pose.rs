//! Pose landmarks, joint-angle computation, and per-frame results.
//!
//! Landmark indices follow the 33-point BlazePose topology produced by the
//! pose service. Only the hips, knees, ankles, shoulders, elbows and wrists
//! take part in metric computation, but every landmark is persisted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::metric_names::{LEFT_ELBOW_ANGLE, LEFT_KNEE_ANGLE, RIGHT_ELBOW_ANGLE, RIGHT_KNEE_ANGLE};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Number of landmarks in a successful detection.
pub const LANDMARK_COUNT: usize = 33;

/// A joint angle is only computed when every contributing landmark has a
/// visibility strictly above this value.
pub const VISIBILITY_THRESHOLD: f64 = 0.5;

/// Landmark indices used by the joint-angle triples.
pub mod index {
    pub const LEFT_SHOULDER: usize = 11;
    pub const RIGHT_SHOULDER: usize = 12;
    pub const LEFT_ELBOW: usize = 13;
    pub const RIGHT_ELBOW: usize = 14;
    pub const LEFT_WRIST: usize = 15;
    pub const RIGHT_WRIST: usize = 16;
    pub const LEFT_HIP: usize = 23;
    pub const RIGHT_HIP: usize = 24;
    pub const LEFT_KNEE: usize = 25;
    pub const RIGHT_KNEE: usize = 26;
    pub const LEFT_ANKLE: usize = 27;
    pub const RIGHT_ANKLE: usize = 28;
}

/// An ordered landmark triple `(a, b, c)` whose angle is measured at `b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JointTriple {
    pub metric: &'static str,
    pub a: usize,
    pub b: usize,
    pub c: usize,
}

/// The joint angles computed for every frame, in evaluation order.
pub const JOINT_TRIPLES: [JointTriple; 4] = [
    JointTriple {
        metric: RIGHT_KNEE_ANGLE,
        a: index::RIGHT_HIP,
        b: index::RIGHT_KNEE,
        c: index::RIGHT_ANKLE,
    },
    JointTriple {
        metric: LEFT_KNEE_ANGLE,
        a: index::LEFT_HIP,
        b: index::LEFT_KNEE,
        c: index::LEFT_ANKLE,
    },
    JointTriple {
        metric: RIGHT_ELBOW_ANGLE,
        a: index::RIGHT_SHOULDER,
        b: index::RIGHT_ELBOW,
        c: index::RIGHT_WRIST,
    },
    JointTriple {
        metric: LEFT_ELBOW_ANGLE,
        a: index::LEFT_SHOULDER,
        b: index::LEFT_ELBOW,
        c: index::LEFT_WRIST,
    },
];

// ---------------------------------------------------------------------------
// Landmark
// ---------------------------------------------------------------------------

/// A detected anatomical keypoint.
///
/// `x` and `y` are normalized to the frame width and height, `z` is the
/// detector's relative depth. `visibility` is the detection confidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub visibility: f64,
}

impl Landmark {
    pub fn new(x: f64, y: f64, z: f64, visibility: f64) -> Self {
        Self { x, y, z, visibility }
    }

    /// Whether this landmark is confident enough to contribute to a metric.
    pub fn is_visible(&self) -> bool {
        self.visibility > VISIBILITY_THRESHOLD
    }
}

/// Validate a landmark set returned by a detector.
///
/// Rules:
/// - Exactly [`LANDMARK_COUNT`] points.
/// - Every coordinate is finite.
/// - Visibility is within `0.0..=1.0`.
pub fn validate_landmarks(landmarks: &[Landmark]) -> Result<(), CoreError> {
    if landmarks.len() != LANDMARK_COUNT {
        return Err(CoreError::Validation(format!(
            "Expected {LANDMARK_COUNT} landmarks, got {}",
            landmarks.len()
        )));
    }
    for (i, lm) in landmarks.iter().enumerate() {
        if !(lm.x.is_finite() && lm.y.is_finite() && lm.z.is_finite()) {
            return Err(CoreError::Validation(format!(
                "Landmark {i} has a non-finite coordinate"
            )));
        }
        if !(0.0..=1.0).contains(&lm.visibility) {
            return Err(CoreError::Validation(format!(
                "Landmark {i} visibility {} is outside 0..=1",
                lm.visibility
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Angles
// ---------------------------------------------------------------------------

/// Planar angle at `b` between the vectors `b→a` and `b→c`, in degrees.
///
/// Only `x` and `y` take part; `z` is ignored. The result lies in
/// `0.0..=180.0`. Returns `None` when either vector has zero length, since
/// the angle is undefined there.
pub fn angle_degrees(a: &Landmark, b: &Landmark, c: &Landmark) -> Option<f64> {
    let (bax, bay) = (a.x - b.x, a.y - b.y);
    let (bcx, bcy) = (c.x - b.x, c.y - b.y);

    let norm = bax.hypot(bay) * bcx.hypot(bcy);
    if norm == 0.0 || !norm.is_finite() {
        return None;
    }

    let cosine = ((bax * bcx + bay * bcy) / norm).clamp(-1.0, 1.0);
    Some(cosine.acos().to_degrees())
}

/// Compute every joint angle whose three landmarks are visible.
///
/// Metrics for occluded joints are omitted rather than set to zero. A joint
/// is also omitted when an end landmark sits on the vertex, since the angle
/// is undefined there even with all three visible.
pub fn joint_metrics(landmarks: &[Landmark]) -> BTreeMap<String, f64> {
    let mut metrics = BTreeMap::new();
    for triple in JOINT_TRIPLES {
        let (Some(a), Some(b), Some(c)) = (
            landmarks.get(triple.a),
            landmarks.get(triple.b),
            landmarks.get(triple.c),
        ) else {
            continue;
        };
        if !(a.is_visible() && b.is_visible() && c.is_visible()) {
            continue;
        }
        if let Some(angle) = angle_degrees(a, b, c) {
            metrics.insert(triple.metric.to_string(), angle);
        }
    }
    metrics
}

// ---------------------------------------------------------------------------
// FrameResult
// ---------------------------------------------------------------------------

/// Landmarks and derived metrics for one decoded frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameResult {
    /// 0-based frame index in decode order.
    pub frame: u64,
    /// Presentation timestamp in seconds.
    pub timestamp: f64,
    /// Empty when no pose was detected in the frame.
    pub landmarks: Vec<Landmark>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

impl FrameResult {
    /// Build a frame result from a detector's output.
    ///
    /// `None` means the detector ran but found no pose; the frame is kept
    /// with empty landmarks and metrics so frame indices stay contiguous.
    pub fn from_detection(
        frame: u64,
        timestamp: f64,
        detection: Option<Vec<Landmark>>,
    ) -> Result<Self, CoreError> {
        let Some(landmarks) = detection else {
            return Ok(Self {
                frame,
                timestamp,
                landmarks: Vec::new(),
                metrics: BTreeMap::new(),
            });
        };

        validate_landmarks(&landmarks)?;
        let metrics = joint_metrics(&landmarks);
        Ok(Self {
            frame,
            timestamp,
            landmarks,
            metrics,
        })
    }

    /// Whether the detector found a pose in this frame.
    pub fn has_pose(&self) -> bool {
        !self.landmarks.is_empty()
    }
}
