//! Per-frame pose judgment. Pure functions: one estimate in, one verdict
//! out, no state carried between frames.

use crate::config::ValidationConfig;
use crate::keypoint::{KeypointIndex, PoseEstimate};

/// The orientation a detection stage asks the subject to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Front,
    Side,
}

/// Landmarks that must all be visible before orientation is judged.
pub const REQUIRED_KEYPOINTS: [KeypointIndex; 9] = [
    KeypointIndex::Nose,
    KeypointIndex::LeftShoulder,
    KeypointIndex::RightShoulder,
    KeypointIndex::LeftHip,
    KeypointIndex::RightHip,
    KeypointIndex::LeftKnee,
    KeypointIndex::RightKnee,
    KeypointIndex::LeftAnkle,
    KeypointIndex::RightAnkle,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    NoPerson,
    LowVisibility,
    UnknownOrientation,
    NotFacingCamera,
    NotSideways,
}

impl InvalidReason {
    /// The guidance text shown to the user for this verdict.
    pub fn message(self) -> &'static str {
        match self {
            Self::NoPerson => "No person detected. Ensure you are fully visible.",
            Self::LowVisibility => "Full body not visible or low confidence. Adjust position.",
            Self::UnknownOrientation => "Cannot determine orientation. Adjust position.",
            Self::NotFacingCamera => "Please face the camera directly.",
            Self::NotSideways => "Please turn 90 degrees (side view).",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationOutcome {
    Valid,
    Invalid(InvalidReason),
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// Judge a frame's estimate against the orientation the current stage
/// requires.
///
/// Orientation is read from the shoulder-to-hip width ratio: square
/// shoulders read as front-facing, collapsed shoulders as a side profile.
/// The two predicates are not complements; a span that satisfies neither
/// falls through to the stage's mismatch verdict.
pub fn validate_pose(
    estimate: Option<&PoseEstimate>,
    target: Orientation,
    config: &ValidationConfig,
) -> ValidationOutcome {
    let Some(pose) = estimate else {
        return ValidationOutcome::Invalid(InvalidReason::NoPerson);
    };

    let visible = REQUIRED_KEYPOINTS
        .iter()
        .filter(|&&index| {
            pose.get(index)
                .map(|k| k.is_visible(config.min_keypoint_score))
                .unwrap_or(false)
        })
        .count();
    if visible < REQUIRED_KEYPOINTS.len() {
        return ValidationOutcome::Invalid(InvalidReason::LowVisibility);
    }

    let (Some(left_shoulder), Some(right_shoulder), Some(left_hip), Some(right_hip)) = (
        pose.get(KeypointIndex::LeftShoulder),
        pose.get(KeypointIndex::RightShoulder),
        pose.get(KeypointIndex::LeftHip),
        pose.get(KeypointIndex::RightHip),
    ) else {
        return ValidationOutcome::Invalid(InvalidReason::UnknownOrientation);
    };

    let shoulder_width = (left_shoulder.x - right_shoulder.x).abs();
    let hip_width = (left_hip.x - right_hip.x).abs();

    let is_front = shoulder_width > hip_width * config.front_ratio
        && shoulder_width > config.min_shoulder_width;
    let is_side =
        shoulder_width < hip_width * config.side_ratio || shoulder_width < config.min_shoulder_width;

    let matched = match target {
        Orientation::Front => is_front,
        Orientation::Side => is_side,
    };

    if matched {
        ValidationOutcome::Valid
    } else {
        ValidationOutcome::Invalid(match target {
            Orientation::Front => InvalidReason::NotFacingCamera,
            Orientation::Side => InvalidReason::NotSideways,
        })
    }
}
