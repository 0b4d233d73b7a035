//! Skeletal landmark data model shared by the model session and the
//! pose validator.

/// The 17 landmarks of the MoveNet single-pose output, in model order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum KeypointIndex {
    Nose = 0,
    LeftEye = 1,
    RightEye = 2,
    LeftEar = 3,
    RightEar = 4,
    LeftShoulder = 5,
    RightShoulder = 6,
    LeftElbow = 7,
    RightElbow = 8,
    LeftWrist = 9,
    RightWrist = 10,
    LeftHip = 11,
    RightHip = 12,
    LeftKnee = 13,
    RightKnee = 14,
    LeftAnkle = 15,
    RightAnkle = 16,
}

impl KeypointIndex {
    pub const COUNT: usize = 17;

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Nose),
            1 => Some(Self::LeftEye),
            2 => Some(Self::RightEye),
            3 => Some(Self::LeftEar),
            4 => Some(Self::RightEar),
            5 => Some(Self::LeftShoulder),
            6 => Some(Self::RightShoulder),
            7 => Some(Self::LeftElbow),
            8 => Some(Self::RightElbow),
            9 => Some(Self::LeftWrist),
            10 => Some(Self::RightWrist),
            11 => Some(Self::LeftHip),
            12 => Some(Self::RightHip),
            13 => Some(Self::LeftKnee),
            14 => Some(Self::RightKnee),
            15 => Some(Self::LeftAnkle),
            16 => Some(Self::RightAnkle),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Nose => "nose",
            Self::LeftEye => "left_eye",
            Self::RightEye => "right_eye",
            Self::LeftEar => "left_ear",
            Self::RightEar => "right_ear",
            Self::LeftShoulder => "left_shoulder",
            Self::RightShoulder => "right_shoulder",
            Self::LeftElbow => "left_elbow",
            Self::RightElbow => "right_elbow",
            Self::LeftWrist => "left_wrist",
            Self::RightWrist => "right_wrist",
            Self::LeftHip => "left_hip",
            Self::RightHip => "right_hip",
            Self::LeftKnee => "left_knee",
            Self::RightKnee => "right_knee",
            Self::LeftAnkle => "left_ankle",
            Self::RightAnkle => "right_ankle",
        }
    }
}

/// One estimated landmark: pixel position in the source frame plus the
/// detector's confidence score in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub index: KeypointIndex,
    pub x: f32,
    pub y: f32,
    pub score: f32,
}

impl Keypoint {
    pub fn new(index: KeypointIndex, x: f32, y: f32, score: f32) -> Self {
        Self { index, x, y, score }
    }

    pub fn is_visible(&self, threshold: f32) -> bool {
        self.score > threshold
    }
}

/// The landmark set for one tracked person in one frame. The detector
/// normally emits all 17 landmarks, but consumers must not rely on that.
#[derive(Debug, Clone, Default)]
pub struct PoseEstimate {
    keypoints: Vec<Keypoint>,
}

impl PoseEstimate {
    pub fn new(keypoints: Vec<Keypoint>) -> Self {
        Self { keypoints }
    }

    pub fn get(&self, index: KeypointIndex) -> Option<&Keypoint> {
        self.keypoints.iter().find(|k| k.index == index)
    }

    pub fn keypoints(&self) -> &[Keypoint] {
        &self.keypoints
    }

    /// Highest confidence over the whole set; 0.0 for an empty estimate.
    pub fn max_score(&self) -> f32 {
        self.keypoints.iter().map(|k| k.score).fold(0.0, f32::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_index_bounds() {
        assert_eq!(KeypointIndex::from_index(0), Some(KeypointIndex::Nose));
        assert_eq!(KeypointIndex::from_index(16), Some(KeypointIndex::RightAnkle));
        assert_eq!(KeypointIndex::from_index(17), None);
    }

    #[test]
    fn test_is_visible_is_strict() {
        let kp = Keypoint::new(KeypointIndex::Nose, 10.0, 20.0, 0.3);
        assert!(!kp.is_visible(0.3));
        assert!(kp.is_visible(0.29));
    }

    #[test]
    fn test_get_missing_landmark() {
        let pose = PoseEstimate::new(vec![Keypoint::new(KeypointIndex::Nose, 1.0, 2.0, 0.9)]);
        assert!(pose.get(KeypointIndex::Nose).is_some());
        assert!(pose.get(KeypointIndex::LeftHip).is_none());
    }

    #[test]
    fn test_max_score() {
        let pose = PoseEstimate::new(vec![
            Keypoint::new(KeypointIndex::Nose, 0.0, 0.0, 0.4),
            Keypoint::new(KeypointIndex::LeftEye, 0.0, 0.0, 0.7),
        ]);
        assert!((pose.max_score() - 0.7).abs() < f32::EPSILON);
        assert_eq!(PoseEstimate::default().max_score(), 0.0);
    }
}
