//! Configuration for exercise classification.
//!
//! [`EngineConfig`] centralizes every tunable of the pipeline: the feature
//! layout, the recurrent network shape, the label vocabulary and all numeric
//! thresholds of the heuristic rule engine and decision fusion. It is loaded
//! once and treated as read-only.
//!
//! # Example
//!
//! ```
//! use exercise_form::EngineConfig;
//!
//! // Use default configuration
//! let config = EngineConfig::default();
//! assert!(config.validate().is_ok());
//!
//! // Use a preset and override a field
//! let strict = EngineConfig::strict().with_max_seq_len(120);
//! assert_eq!(strict.max_seq_len, 120);
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ClassifyError, Result};
use crate::landmark::Landmark;
use crate::prediction::ExerciseType;

/// Angle measured at `points[1]` between the segments to `points[0]` and
/// `points[2]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JointAngle {
    pub name: String,
    pub points: [Landmark; 3],
}

impl JointAngle {
    #[must_use]
    pub fn new(name: &str, a: Landmark, vertex: Landmark, c: Landmark) -> Self {
        Self {
            name: name.to_string(),
            points: [a, vertex, c],
        }
    }
}

/// Euclidean distance between two joints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JointDistance {
    pub name: String,
    pub from: Landmark,
    pub to: Landmark,
}

impl JointDistance {
    #[must_use]
    pub fn new(name: &str, from: Landmark, to: Landmark) -> Self {
        Self {
            name: name.to_string(),
            from,
            to,
        }
    }
}

/// Shape and training schedule of the bidirectional recurrent classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Hidden units per direction.
    pub hidden_size: usize,
    /// Stacked bidirectional layers.
    pub num_layers: usize,
    /// Dropout applied between stacked layers during training.
    pub dropout: f64,
    /// Full-sequence gradient steps per clip.
    pub epochs: usize,
    /// Fixed SGD learning rate.
    pub learning_rate: f64,
    /// Global gradient norm clip.
    pub gradient_clip: f64,
    /// Seed for weight initialization and dropout masks.
    pub seed: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            hidden_size: 64,
            num_layers: 2,
            dropout: 0.3,
            epochs: 50,
            learning_rate: 0.01,
            gradient_clip: 5.0,
            seed: 42,
        }
    }
}

/// Thresholds of the movement detectors and correctness predicates.
///
/// Angles are in degrees. Displacements are in frame coordinates, ankle
/// separation in bounding-box normalized units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicThresholds {
    /// Below this average keypoint visibility no detector fires.
    pub min_visibility: f64,

    // Long jump detector
    pub jump_min_horizontal: f64,
    /// Required vertical hip travel as a fraction of the horizontal travel.
    pub jump_vertical_ratio: f64,
    pub jump_max_knee_angle: f64,
    pub jump_max_ankle_separation: f64,
    pub jump_takeoff_min: f64,
    pub jump_takeoff_max: f64,

    // Squat detector
    pub squat_max_knee_angle: f64,
    pub squat_min_torso_angle: f64,
    pub squat_max_horizontal: f64,
    pub squat_max_vertical: f64,

    // Push-up detector
    pub pushup_max_elbow_angle: f64,
    pub pushup_min_knee_angle: f64,
    pub pushup_max_torso_angle: f64,
    pub pushup_max_vertical: f64,

    // Squat correctness
    pub squat_correct_knee_angle: f64,
    pub squat_correct_max_drift: f64,
    pub squat_correct_max_stance: f64,

    // Push-up correctness
    pub pushup_correct_elbow_angle: f64,
    pub pushup_correct_max_torso: f64,
    pub pushup_correct_max_vertical: f64,
    pub pushup_correct_min_depth: f64,
    pub pushup_correct_min_knee: f64,

    // Long jump correctness
    pub jump_correct_knee_angle: f64,
    pub jump_correct_takeoff_min: f64,
    pub jump_correct_takeoff_max: f64,
    pub jump_correct_max_ankle_separation: f64,
    pub jump_correct_min_horizontal: f64,
}

impl Default for HeuristicThresholds {
    fn default() -> Self {
        Self {
            min_visibility: 0.5,

            jump_min_horizontal: 0.15,
            jump_vertical_ratio: 0.3,
            jump_max_knee_angle: 90.0,
            jump_max_ankle_separation: 0.5,
            jump_takeoff_min: 15.0,
            jump_takeoff_max: 150.0,

            squat_max_knee_angle: 100.0,
            squat_min_torso_angle: 60.0,
            squat_max_horizontal: 0.1,
            squat_max_vertical: 0.15,

            pushup_max_elbow_angle: 110.0,
            pushup_min_knee_angle: 140.0,
            pushup_max_torso_angle: 45.0,
            pushup_max_vertical: 0.1,

            squat_correct_knee_angle: 120.0,
            squat_correct_max_drift: 0.08,
            squat_correct_max_stance: 0.6,

            pushup_correct_elbow_angle: 90.0,
            pushup_correct_max_torso: 30.0,
            pushup_correct_max_vertical: 0.08,
            pushup_correct_min_depth: 0.05,
            pushup_correct_min_knee: 150.0,

            jump_correct_knee_angle: 80.0,
            jump_correct_takeoff_min: 30.0,
            jump_correct_takeoff_max: 120.0,
            jump_correct_max_ankle_separation: 0.4,
            jump_correct_min_horizontal: 0.25,
        }
    }
}

/// Decision fusion settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// The classifier label is only used above this confidence.
    pub classifier_min_confidence: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            classifier_min_confidence: 0.6,
        }
    }
}

/// Configuration for the whole classification engine.
///
/// # Feature Layout
///
/// - `landmarks`: ordered landmark list, 3 values each (x, y, visibility)
/// - 3 frame context values (center x, center y, unit length)
/// - `angles`: one value per configured triplet
/// - `distances`: one value per configured pair
///
/// The per-frame width is [`EngineConfig::feature_width`]; the normalized
/// sequence is twice as wide because of the appended deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub landmarks: Vec<Landmark>,
    pub angles: Vec<JointAngle>,
    pub distances: Vec<JointDistance>,

    /// Rows of the padded/truncated sequence matrix.
    pub max_seq_len: usize,

    pub network: NetworkConfig,

    /// Ordered label vocabulary of the classifier.
    pub vocabulary: Vec<ExerciseType>,

    pub heuristics: HeuristicThresholds,
    pub fusion: FusionConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        use Landmark::{
            LeftAnkle, LeftElbow, LeftHip, LeftKnee, LeftShoulder, LeftWrist, RightAnkle,
            RightElbow, RightHip, RightKnee, RightShoulder, RightWrist,
        };

        Self {
            landmarks: Landmark::ALL.to_vec(),
            angles: vec![
                JointAngle::new("left_knee", LeftHip, LeftKnee, LeftAnkle),
                JointAngle::new("right_knee", RightHip, RightKnee, RightAnkle),
                JointAngle::new("left_elbow", LeftShoulder, LeftElbow, LeftWrist),
                JointAngle::new("right_elbow", RightShoulder, RightElbow, RightWrist),
                JointAngle::new("left_hip", LeftShoulder, LeftHip, LeftKnee),
                JointAngle::new("right_hip", RightShoulder, RightHip, RightKnee),
                JointAngle::new("left_shoulder", LeftElbow, LeftShoulder, LeftHip),
                JointAngle::new("right_shoulder", RightElbow, RightShoulder, RightHip),
            ],
            distances: vec![
                JointDistance::new("ankle_separation", LeftAnkle, RightAnkle),
                JointDistance::new("wrist_separation", LeftWrist, RightWrist),
                JointDistance::new("shoulder_width", LeftShoulder, RightShoulder),
                JointDistance::new("hip_width", LeftHip, RightHip),
                JointDistance::new("left_body_length", LeftShoulder, LeftAnkle),
            ],
            max_seq_len: 100,
            network: NetworkConfig::default(),
            vocabulary: ExerciseType::ALL.to_vec(),
            heuristics: HeuristicThresholds::default(),
            fusion: FusionConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a TOML configuration file. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, does not parse, or fails
    /// [`EngineConfig::validate`].
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Parse a TOML configuration string.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed TOML or invalid values.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| ClassifyError::invalid_config(format!("toml: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Width of one frame's feature vector.
    #[must_use]
    pub fn feature_width(&self) -> usize {
        self.landmarks.len() * 3 + 3 + self.angles.len() + self.distances.len()
    }

    /// Width of a normalized sequence row (features plus deltas).
    #[must_use]
    pub fn sequence_width(&self) -> usize {
        self.feature_width() * 2
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any parameter is out of valid range.
    pub fn validate(&self) -> Result<()> {
        if self.landmarks.is_empty() {
            return Err(ClassifyError::invalid_config("landmarks must not be empty"));
        }
        let unique: HashSet<_> = self.landmarks.iter().collect();
        if unique.len() != self.landmarks.len() {
            return Err(ClassifyError::invalid_config("landmarks must be unique"));
        }
        for angle in &self.angles {
            let [a, b, c] = angle.points;
            if a == b || b == c || a == c {
                return Err(ClassifyError::invalid_config(format!(
                    "angle '{}' needs three distinct joints",
                    angle.name
                )));
            }
        }
        for distance in &self.distances {
            if distance.from == distance.to {
                return Err(ClassifyError::invalid_config(format!(
                    "distance '{}' needs two distinct joints",
                    distance.name
                )));
            }
        }
        if self.max_seq_len == 0 {
            return Err(ClassifyError::invalid_config("max_seq_len must be positive"));
        }

        let net = &self.network;
        if net.hidden_size == 0 {
            return Err(ClassifyError::invalid_config("hidden_size must be positive"));
        }
        if net.num_layers == 0 {
            return Err(ClassifyError::invalid_config("num_layers must be at least 1"));
        }
        if !(0.0..1.0).contains(&net.dropout) {
            return Err(ClassifyError::invalid_config("dropout must be in [0, 1)"));
        }
        if net.epochs == 0 {
            return Err(ClassifyError::invalid_config("epochs must be at least 1"));
        }
        if net.learning_rate <= 0.0 || !net.learning_rate.is_finite() {
            return Err(ClassifyError::invalid_config("learning_rate must be positive"));
        }
        if net.gradient_clip <= 0.0 {
            return Err(ClassifyError::invalid_config("gradient_clip must be positive"));
        }

        if self.vocabulary.is_empty() {
            return Err(ClassifyError::invalid_config("vocabulary must not be empty"));
        }
        let unique: HashSet<_> = self.vocabulary.iter().collect();
        if unique.len() != self.vocabulary.len() {
            return Err(ClassifyError::invalid_config("vocabulary entries must be unique"));
        }
        if !self.vocabulary.contains(&ExerciseType::Unknown) {
            return Err(ClassifyError::invalid_config(
                "vocabulary must include 'unknown'",
            ));
        }

        let h = &self.heuristics;
        if !(0.0..=1.0).contains(&h.min_visibility) {
            return Err(ClassifyError::invalid_config("min_visibility must be in [0, 1]"));
        }
        if h.jump_takeoff_min > h.jump_takeoff_max {
            return Err(ClassifyError::invalid_config(
                "jump_takeoff_min must not exceed jump_takeoff_max",
            ));
        }
        if h.jump_correct_takeoff_min > h.jump_correct_takeoff_max {
            return Err(ClassifyError::invalid_config(
                "jump_correct_takeoff_min must not exceed jump_correct_takeoff_max",
            ));
        }
        if !(0.0..=1.0).contains(&self.fusion.classifier_min_confidence) {
            return Err(ClassifyError::invalid_config(
                "classifier_min_confidence must be in [0, 1]",
            ));
        }
        Ok(())
    }

    /// Preset with tighter correctness bands, for coaching feedback.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            heuristics: HeuristicThresholds {
                min_visibility: 0.6,
                squat_correct_knee_angle: 100.0,
                squat_correct_max_drift: 0.05,
                pushup_correct_elbow_angle: 80.0,
                pushup_correct_max_torso: 20.0,
                pushup_correct_min_knee: 160.0,
                jump_correct_knee_angle: 70.0,
                jump_correct_takeoff_min: 35.0,
                jump_correct_takeoff_max: 110.0,
                ..HeuristicThresholds::default()
            },
            fusion: FusionConfig {
                classifier_min_confidence: 0.75,
            },
            ..Self::default()
        }
    }

    /// Preset with looser correctness bands, for beginners and noisy
    /// phone footage.
    #[must_use]
    pub fn lenient() -> Self {
        Self {
            heuristics: HeuristicThresholds {
                min_visibility: 0.35,
                squat_correct_knee_angle: 130.0,
                squat_correct_max_drift: 0.12,
                pushup_correct_elbow_angle: 100.0,
                pushup_correct_max_torso: 40.0,
                pushup_correct_min_knee: 140.0,
                jump_correct_knee_angle: 90.0,
                jump_correct_takeoff_min: 20.0,
                jump_correct_takeoff_max: 140.0,
                ..HeuristicThresholds::default()
            },
            fusion: FusionConfig {
                classifier_min_confidence: 0.5,
            },
            ..Self::default()
        }
    }

    /// Set the padded sequence length.
    #[must_use]
    pub fn with_max_seq_len(mut self, max_seq_len: usize) -> Self {
        self.max_seq_len = max_seq_len;
        self
    }

    /// Set the recurrent hidden size.
    #[must_use]
    pub fn with_hidden_size(mut self, hidden_size: usize) -> Self {
        self.network.hidden_size = hidden_size;
        self
    }

    /// Set the number of stacked recurrent layers.
    #[must_use]
    pub fn with_num_layers(mut self, num_layers: usize) -> Self {
        self.network.num_layers = num_layers;
        self
    }

    /// Set the number of training epochs.
    #[must_use]
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.network.epochs = epochs;
        self
    }

    /// Set the classifier fallback confidence threshold.
    #[must_use]
    pub fn with_classifier_min_confidence(mut self, confidence: f64) -> Self {
        self.fusion.classifier_min_confidence = confidence;
        self
    }

    /// Replace the landmark order.
    #[must_use]
    pub fn with_landmarks(mut self, landmarks: Vec<Landmark>) -> Self {
        self.landmarks = landmarks;
        self
    }
}
