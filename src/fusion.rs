//! Decision fusion.
//!
//! Combines the heuristic report and the optional classifier output into
//! one [`Prediction`] with a single priority order:
//!
//! 1. long jump detector
//! 2. squat detector
//! 3. push-up detector
//! 4. classifier label, if its confidence clears the threshold and it is
//!    not `unknown`
//!
//! Correctness is always judged by the heuristic predicate of the chosen
//! exercise, whichever source picked it. When the clip failed the
//! visibility gate the metrics are not trusted, so a classifier-chosen
//! exercise carries `unknown` correctness.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classifier::ClassifierOutput;
use crate::config::FusionConfig;
use crate::heuristics::{HeuristicEngine, HeuristicReport, SequenceMetrics};
use crate::prediction::{Correctness, ExerciseType, Prediction};

/// Which component chose the exercise type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Heuristic,
    Classifier,
    /// Nothing was confident enough.
    None,
}

/// Final verdict plus everything that led to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub prediction: Prediction,
    pub source: DecisionSource,
    /// Detectors that fired, in priority order.
    pub fired: Vec<ExerciseType>,
    pub low_visibility: bool,
    pub metrics: SequenceMetrics,
    pub classifier: Option<ClassifierOutput>,
}

/// Applies the priority policy.
#[derive(Debug, Clone, Copy)]
pub struct DecisionFusion<'a> {
    heuristics: HeuristicEngine<'a>,
    config: &'a FusionConfig,
}

impl<'a> DecisionFusion<'a> {
    #[must_use]
    pub const fn new(heuristics: HeuristicEngine<'a>, config: &'a FusionConfig) -> Self {
        Self { heuristics, config }
    }

    #[must_use]
    pub fn decide(&self, report: HeuristicReport, classifier: Option<ClassifierOutput>) -> Decision {
        let (exercise_type, source) = if let Some(winner) = report.winner() {
            (winner, DecisionSource::Heuristic)
        } else {
            match &classifier {
                Some(out)
                    if out.confidence > self.config.classifier_min_confidence
                        && out.label.is_known() =>
                {
                    (out.label, DecisionSource::Classifier)
                }
                _ => (ExerciseType::Unknown, DecisionSource::None),
            }
        };

        let correctness = if exercise_type.is_known() && !report.low_visibility {
            self.heuristics.correctness(exercise_type, &report.metrics)
        } else {
            Correctness::Unknown
        };
        let prediction = Prediction::new(exercise_type, correctness);

        debug!(
            exercise_type = %prediction.exercise_type,
            correctness = %prediction.correctness,
            ?source,
            "fused decision"
        );

        Decision {
            prediction,
            source,
            fired: report.fired,
            low_visibility: report.low_visibility,
            metrics: report.metrics,
            classifier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, HeuristicThresholds};

    fn report(fired: Vec<ExerciseType>) -> HeuristicReport {
        HeuristicReport {
            metrics: SequenceMetrics {
                avg_visibility: Some(0.9),
                min_knee_angle: Some(70.0),
                avg_torso_angle: Some(80.0),
                max_hip_dx: Some(0.05),
                max_hip_dy: Some(0.05),
                max_ankle_separation: Some(0.3),
                ..SequenceMetrics::default()
            },
            fired,
            low_visibility: false,
        }
    }

    fn output(label: ExerciseType, confidence: f64) -> ClassifierOutput {
        ClassifierOutput {
            label,
            confidence,
            probabilities: vec![(label, confidence)],
        }
    }

    fn fuse(report: HeuristicReport, classifier: Option<ClassifierOutput>) -> Decision {
        let config = EngineConfig::default();
        let thresholds: &HeuristicThresholds = &config.heuristics;
        DecisionFusion::new(HeuristicEngine::new(thresholds), &config.fusion).decide(report, classifier)
    }

    #[test]
    fn test_heuristic_beats_classifier() {
        let d = fuse(
            report(vec![ExerciseType::Squat]),
            Some(output(ExerciseType::Pushup, 0.99)),
        );
        assert_eq!(d.prediction.exercise_type, ExerciseType::Squat);
        assert_eq!(d.prediction.correctness, Correctness::Correct);
        assert_eq!(d.source, DecisionSource::Heuristic);
        assert!(d.classifier.is_some());
    }

    #[test]
    fn test_first_fired_wins() {
        let d = fuse(report(vec![ExerciseType::LongJump, ExerciseType::Squat]), None);
        assert_eq!(d.prediction.exercise_type, ExerciseType::LongJump);
    }

    #[test]
    fn test_confident_classifier_fallback() {
        let d = fuse(report(Vec::new()), Some(output(ExerciseType::Squat, 0.8)));
        assert_eq!(d.source, DecisionSource::Classifier);
        assert_eq!(d.prediction.exercise_type, ExerciseType::Squat);
        assert_eq!(d.prediction.correctness, Correctness::Correct);
    }

    #[test]
    fn test_threshold_is_strict() {
        let d = fuse(report(Vec::new()), Some(output(ExerciseType::Squat, 0.6)));
        assert_eq!(d.prediction, Prediction::UNKNOWN);
        assert_eq!(d.source, DecisionSource::None);
    }

    #[test]
    fn test_unknown_label_not_used() {
        let d = fuse(report(Vec::new()), Some(output(ExerciseType::Unknown, 0.95)));
        assert_eq!(d.prediction, Prediction::UNKNOWN);
    }

    #[test]
    fn test_low_visibility_leaves_form_unjudged() {
        let gated = HeuristicReport {
            low_visibility: true,
            ..report(Vec::new())
        };
        let d = fuse(gated, Some(output(ExerciseType::Squat, 0.8)));
        assert_eq!(d.source, DecisionSource::Classifier);
        assert_eq!(d.prediction.exercise_type, ExerciseType::Squat);
        assert_eq!(d.prediction.correctness, Correctness::Unknown);
        assert!(d.low_visibility);
    }

    #[test]
    fn test_nothing_fires_without_classifier() {
        let d = fuse(report(Vec::new()), None);
        assert_eq!(d.prediction, Prediction::UNKNOWN);
        assert_eq!(d.source, DecisionSource::None);
    }
}
