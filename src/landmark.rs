//! Body joint vocabulary.
//!
//! The upstream pose detector emits the 17 COCO keypoints; [`Landmark`]
//! names them and parses the spellings found in keypoint tables.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A named body joint tracked per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Landmark {
    Nose,
    LeftEye,
    RightEye,
    LeftEar,
    RightEar,
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftWrist,
    RightWrist,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
}

impl Landmark {
    /// Number of landmarks in the COCO layout.
    pub const COUNT: usize = 17;

    /// All landmarks in COCO index order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Nose,
        Self::LeftEye,
        Self::RightEye,
        Self::LeftEar,
        Self::RightEar,
        Self::LeftShoulder,
        Self::RightShoulder,
        Self::LeftElbow,
        Self::RightElbow,
        Self::LeftWrist,
        Self::RightWrist,
        Self::LeftHip,
        Self::RightHip,
        Self::LeftKnee,
        Self::RightKnee,
        Self::LeftAnkle,
        Self::RightAnkle,
    ];

    /// Canonical upper snake case name (e.g. `LEFT_KNEE`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Nose => "NOSE",
            Self::LeftEye => "LEFT_EYE",
            Self::RightEye => "RIGHT_EYE",
            Self::LeftEar => "LEFT_EAR",
            Self::RightEar => "RIGHT_EAR",
            Self::LeftShoulder => "LEFT_SHOULDER",
            Self::RightShoulder => "RIGHT_SHOULDER",
            Self::LeftElbow => "LEFT_ELBOW",
            Self::RightElbow => "RIGHT_ELBOW",
            Self::LeftWrist => "LEFT_WRIST",
            Self::RightWrist => "RIGHT_WRIST",
            Self::LeftHip => "LEFT_HIP",
            Self::RightHip => "RIGHT_HIP",
            Self::LeftKnee => "LEFT_KNEE",
            Self::RightKnee => "RIGHT_KNEE",
            Self::LeftAnkle => "LEFT_ANKLE",
            Self::RightAnkle => "RIGHT_ANKLE",
        }
    }

    /// COCO keypoint index.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Landmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned for an unrecognised landmark name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown landmark '{0}'")]
pub struct UnknownLandmark(pub String);

impl FromStr for Landmark {
    type Err = UnknownLandmark;

    /// Accepts `LEFT_KNEE`, `left_knee`, `left-knee` and `Left Knee`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .map(|c| match c {
                '-' | ' ' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect();

        Self::ALL
            .iter()
            .copied()
            .find(|l| l.as_str() == normalized)
            .ok_or_else(|| UnknownLandmark(s.to_string()))
    }
}
