//! Exercise Form Library
//!
//! Exercise type and form classification from 2D pose keypoint sequences.
//!
//! Given the per-frame keypoints of one clip (as produced by a COCO-style
//! pose detector), the engine decides which exercise is performed (squat,
//! push-up, long jump or unknown) and whether it is performed correctly.
//!
//! # Features
//!
//! - **Feature engineering**: positions, visibility, joint angles and
//!   inter-joint distances per frame, stacked with first-order deltas
//! - **Sequence classifier**: stacked bidirectional LSTM with seeded,
//!   reproducible training and versioned JSON artifacts
//! - **Heuristic rules**: biomechanical detectors and form predicates with
//!   configurable thresholds
//! - **Explainable fusion**: one priority order, with the deciding source,
//!   fired detectors and metrics recorded on every decision
//!
//! # Quick Start
//!
//! ```
//! use exercise_form::{EngineConfig, ExerciseEngine, KeypointRow, Landmark};
//!
//! let engine = ExerciseEngine::new(EngineConfig::default())?;
//!
//! let rows = vec![
//!     KeypointRow::new(0, Landmark::LeftHip, 0.0, 0.0, 0.9, 0.5, 0.5, 0.4),
//!     KeypointRow::new(0, Landmark::LeftKnee, 0.0, 0.5, 0.9, 0.5, 0.5, 0.4),
//!     KeypointRow::new(1, Landmark::LeftHip, 0.0, 0.1, 0.9, 0.5, 0.5, 0.4),
//! ];
//!
//! let analysis = engine.analyze_rows(rows)?;
//! assert_eq!(analysis.frame_count, 2);
//! if let Some(prediction) = analysis.outcome() {
//!     println!("{} ({})", prediction.exercise_type, prediction.correctness);
//! }
//! # Ok::<(), exercise_form::ClassifyError>(())
//! ```
//!
//! # Decision Priority
//!
//! | Rank | Source | Condition |
//! |------|--------|-----------|
//! | 1 | long jump detector | fires |
//! | 2 | squat detector | fires |
//! | 3 | push-up detector | fires |
//! | 4 | classifier | confidence above threshold, label not `unknown` |
//!
//! # Presets
//!
//! ```
//! use exercise_form::EngineConfig;
//!
//! let default_config = EngineConfig::default();
//! let coaching_config = EngineConfig::strict();
//! let beginner_config = EngineConfig::lenient();
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::similar_names)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod artifacts;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod features;
pub mod frame;
pub mod fusion;
pub mod heuristics;
pub mod landmark;
pub mod math;
pub mod normalizer;
pub mod prediction;
pub mod table;

// Re-exports for convenient access
pub use classifier::{
    BiLstmNetwork, ClassifierOutput, ClassifierState, LabelVocabulary, Trainer, TrainingClip,
};
pub use config::{
    EngineConfig, FusionConfig, HeuristicThresholds, JointAngle, JointDistance, NetworkConfig,
};
pub use engine::{Analysis, ExerciseEngine};
pub use error::{ArtifactError, ClassifyError, Result};
pub use features::FeatureExtractor;
pub use frame::{aggregate_rows, Frame, FrameLabel, Keypoint, KeypointRow, Sequence};
pub use fusion::{Decision, DecisionFusion, DecisionSource};
pub use heuristics::{HeuristicEngine, HeuristicReport, SequenceMetrics};
pub use landmark::Landmark;
pub use normalizer::{FeatureScaler, NormalizedSequence, SequenceNormalizer};
pub use prediction::{Correctness, ExerciseType, Prediction};
pub use table::{read_rows, read_table};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
