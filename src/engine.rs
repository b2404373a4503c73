//! Classification engine.
//!
//! [`ExerciseEngine`] wires the pipeline together:
//!
//! ```text
//! rows ─► aggregate ─► features ─► normalize ─► classifier ─┐
//!                 └──────────────► heuristics ──────────────┴─► fusion ─► Analysis
//! ```
//!
//! The classifier is optional; without one the engine runs heuristic-only.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::artifacts;
use crate::classifier::{ClassifierOutput, ClassifierState};
use crate::config::EngineConfig;
use crate::error::{ArtifactError, ClassifyError, Result};
use crate::features::FeatureExtractor;
use crate::frame::{aggregate_rows, KeypointRow, Sequence};
use crate::fusion::{Decision, DecisionFusion};
use crate::heuristics::HeuristicEngine;
use crate::prediction::Prediction;
use crate::table;

/// Result of analysing one clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub prediction: Prediction,
    pub decision: Decision,
    /// Classifier confidence, `0.0` when no classifier prediction exists.
    pub confidence: f64,
    pub frame_count: usize,
}

impl Analysis {
    /// The prediction, or `None` when no exercise was recognised.
    #[must_use]
    pub fn outcome(&self) -> Option<&Prediction> {
        if self.prediction.is_empty() {
            None
        } else {
            Some(&self.prediction)
        }
    }
}

/// End-to-end exercise classifier.
#[derive(Debug, Clone)]
pub struct ExerciseEngine {
    config: EngineConfig,
    classifier: Option<Arc<ClassifierState>>,
}

impl ExerciseEngine {
    /// Heuristic-only engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            classifier: None,
        })
    }

    /// Attach a shared classifier state.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::Incompatible`] (wrapped in
    /// [`ClassifyError::Artifact`]) when the state expects a different input
    /// width than this engine's feature layout produces.
    pub fn with_classifier(mut self, state: Arc<ClassifierState>) -> Result<Self> {
        let expected = self.config.sequence_width();
        if state.input_width() != expected {
            return Err(ArtifactError::incompatible(format!(
                "classifier expects {} input columns, the feature layout produces {expected}",
                state.input_width()
            ))
            .into());
        }
        self.classifier = Some(state);
        Ok(self)
    }

    /// Engine using the artifacts in `dir`, heuristic-only when none exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, and
    /// [`ClassifyError::Artifact`] for partial, corrupt or incompatible
    /// artifacts.
    pub fn from_artifacts(config: EngineConfig, dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let engine = Self::new(config)?;
        match artifacts::load(dir)? {
            Some(state) => {
                let engine = engine.with_classifier(Arc::new(state))?;
                info!(dir = %dir.display(), "loaded classifier artifacts");
                Ok(engine)
            }
            None => {
                info!(dir = %dir.display(), "no classifier artifacts, running heuristic-only");
                Ok(engine)
            }
        }
    }

    /// Like [`ExerciseEngine::from_artifacts`], but unusable artifacts are
    /// reported with a warning and the engine stays heuristic-only.
    ///
    /// # Errors
    ///
    /// Returns an error only if the configuration is invalid.
    pub fn with_artifacts(config: EngineConfig, dir: impl AsRef<Path>) -> Result<Self> {
        match Self::from_artifacts(config.clone(), dir) {
            Err(ClassifyError::Artifact(e)) => {
                warn!(error = %e, "classifier artifacts unusable, running heuristic-only");
                Self::new(config)
            }
            other => other,
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Whether a classifier state is attached.
    #[must_use]
    pub fn has_classifier(&self) -> bool {
        self.classifier.is_some()
    }

    #[must_use]
    pub fn classifier(&self) -> Option<&Arc<ClassifierState>> {
        self.classifier.as_ref()
    }

    /// Analyse a CSV keypoint table.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or holds no frames.
    pub fn analyze_csv(&self, path: impl AsRef<Path>) -> Result<Analysis> {
        let rows = table::read_table(path)?;
        self.analyze_rows(rows)
    }

    /// Analyse raw keypoint rows.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifyError::NoFrames`] for empty input.
    pub fn analyze_rows<I>(&self, rows: I) -> Result<Analysis>
    where
        I: IntoIterator<Item = KeypointRow>,
    {
        let sequence = aggregate_rows(rows)?;
        self.analyze_sequence(&sequence)
    }

    /// Analyse an already aggregated sequence.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifyError::NoFrames`] for an empty sequence.
    pub fn analyze_sequence(&self, sequence: &Sequence) -> Result<Analysis> {
        if sequence.is_empty() {
            return Err(ClassifyError::NoFrames);
        }

        let heuristics = HeuristicEngine::new(&self.config.heuristics);
        let report = heuristics.evaluate(sequence);
        let classifier = self.run_classifier(sequence);
        let confidence = classifier.as_ref().map_or(0.0, |c| c.confidence);

        let decision = DecisionFusion::new(heuristics, &self.config.fusion).decide(report, classifier);

        debug!(frames = sequence.len(), source = ?decision.source, "analysed clip");
        Ok(Analysis {
            prediction: decision.prediction,
            decision,
            confidence,
            frame_count: sequence.len(),
        })
    }

    /// Classifier output, or `None` when there is no classifier or it fails.
    fn run_classifier(&self, sequence: &Sequence) -> Option<ClassifierOutput> {
        let state = self.classifier.as_ref()?;
        let features = FeatureExtractor::new(&self.config).extract_sequence(sequence);
        match state.predict(&features, self.config.max_seq_len) {
            Ok(output) if output.confidence.is_finite() => Some(output),
            Ok(_) => {
                warn!("classifier returned non-finite confidence, ignoring it");
                None
            }
            Err(e) => {
                warn!(error = %e, "classifier failed, ignoring it");
                None
            }
        }
    }
}
