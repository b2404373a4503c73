//! Per-frame feature extraction.
//!
//! Turns a [`Frame`] into a fixed-width vector whose layout is fixed by the
//! [`EngineConfig`]:
//!
//! | Block | Width | Content |
//! |-------|-------|---------|
//! | landmarks | `3·L` | `x_norm, y_norm, visibility` per configured landmark |
//! | context | 3 | `center_x, center_y, unit_length` |
//! | angles | `A` | degrees at the middle joint of each triplet |
//! | distances | `D` | Euclidean distance on normalized positions |
//!
//! Extraction never fails: a missing landmark contributes zeros, and any
//! angle or distance that needs it is `0.0`.

use tracing::debug;

use crate::config::{EngineConfig, JointAngle, JointDistance};
use crate::frame::{Frame, Sequence};
use crate::math::{distance2, joint_angle};

/// Stateless frame-to-vector mapper bound to one feature layout.
#[derive(Debug, Clone, Copy)]
pub struct FeatureExtractor<'a> {
    config: &'a EngineConfig,
}

impl<'a> FeatureExtractor<'a> {
    #[must_use]
    pub const fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// Width of every vector produced by [`FeatureExtractor::extract`].
    #[must_use]
    pub fn width(&self) -> usize {
        self.config.feature_width()
    }

    /// Column names in layout order, for debugging and CSV export.
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.width());
        for landmark in &self.config.landmarks {
            let l = landmark.as_str().to_ascii_lowercase();
            names.push(format!("{l}_x"));
            names.push(format!("{l}_y"));
            names.push(format!("{l}_visibility"));
        }
        names.extend(["center_x", "center_y", "unit_length"].map(String::from));
        names.extend(self.config.angles.iter().map(|a| format!("{}_angle", a.name)));
        names.extend(self.config.distances.iter().map(|d| d.name.clone()));
        names
    }

    /// Feature vector of one frame.
    #[must_use]
    pub fn extract(&self, frame: &Frame) -> Vec<f64> {
        let mut features = Vec::with_capacity(self.width());

        for &landmark in &self.config.landmarks {
            match frame.get(landmark) {
                Some(kp) => features.extend([kp.x_norm, kp.y_norm, kp.visibility]),
                None => features.extend([0.0; 3]),
            }
        }

        features.extend([frame.center_x, frame.center_y, frame.unit_length]);
        features.extend(self.config.angles.iter().map(|a| angle_feature(frame, a)));
        features.extend(self.config.distances.iter().map(|d| distance_feature(frame, d)));

        features
    }

    /// Feature vectors of every frame, in sequence order.
    #[must_use]
    pub fn extract_sequence(&self, sequence: &Sequence) -> Vec<Vec<f64>> {
        let vectors: Vec<Vec<f64>> = sequence.frames().iter().map(|f| self.extract(f)).collect();
        debug!(frames = vectors.len(), width = self.width(), "extracted frame features");
        vectors
    }
}

/// Angle for a configured triplet, `0.0` when a joint is missing.
#[must_use]
pub fn angle_feature(frame: &Frame, angle: &JointAngle) -> f64 {
    let [a, vertex, c] = angle.points;
    match (frame.position(a), frame.position(vertex), frame.position(c)) {
        (Some(a), Some(vertex), Some(c)) => joint_angle(&a, &vertex, &c),
        _ => 0.0,
    }
}

/// Distance for a configured pair, `0.0` when a joint is missing.
#[must_use]
pub fn distance_feature(frame: &Frame, distance: &JointDistance) -> f64 {
    match (frame.position(distance.from), frame.position(distance.to)) {
        (Some(a), Some(b)) => distance2(&a, &b),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmark::Landmark;
    use approx::assert_relative_eq;

    fn bent_left_leg() -> Frame {
        Frame::new(0, 0.4, 0.6, 2.0)
            .with_keypoint(Landmark::LeftHip, 0.0, 0.0, 0.9)
            .with_keypoint(Landmark::LeftKnee, 0.0, 0.5, 0.8)
            .with_keypoint(Landmark::LeftAnkle, 0.5, 0.5, 0.7)
    }

    #[test]
    fn test_width_matches_config() {
        let config = EngineConfig::default();
        let extractor = FeatureExtractor::new(&config);
        let v = extractor.extract(&bent_left_leg());
        assert_eq!(v.len(), config.feature_width());
        assert_eq!(extractor.column_names().len(), config.feature_width());
    }

    #[test]
    fn test_absent_landmark_is_zero_triplet() {
        let config = EngineConfig::default();
        let v = FeatureExtractor::new(&config).extract(&bent_left_leg());

        let nose = Landmark::Nose.index() * 3;
        assert_eq!(&v[nose..nose + 3], &[0.0, 0.0, 0.0]);

        let knee = Landmark::LeftKnee.index() * 3;
        assert_eq!(&v[knee..knee + 3], &[0.0, 0.5, 0.8]);
    }

    #[test]
    fn test_context_and_angles() {
        let config = EngineConfig::default();
        let v = FeatureExtractor::new(&config).extract(&bent_left_leg());
        let context = config.landmarks.len() * 3;
        assert_eq!(&v[context..context + 3], &[0.4, 0.6, 2.0]);

        // left_knee is the first configured angle, right_knee the second.
        assert_relative_eq!(v[context + 3], 90.0, epsilon = 1e-9);
        assert_eq!(v[context + 4], 0.0);
    }

    #[test]
    fn test_missing_distance_is_zero() {
        let frame = bent_left_leg();
        let d = JointDistance::new("ankles", Landmark::LeftAnkle, Landmark::RightAnkle);
        assert_eq!(distance_feature(&frame, &d), 0.0);

        let d = JointDistance::new("thigh", Landmark::LeftHip, Landmark::LeftKnee);
        assert_relative_eq!(distance_feature(&frame, &d), 0.5);
    }

    #[test]
    fn test_custom_layout() {
        let config = EngineConfig::default()
            .with_landmarks(vec![Landmark::LeftKnee, Landmark::LeftHip]);
        let v = FeatureExtractor::new(&config).extract(&bent_left_leg());
        assert_eq!(&v[..6], &[0.0, 0.5, 0.8, 0.0, 0.0, 0.9]);
    }
}
