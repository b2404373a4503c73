//! Heuristic rule engine.
//!
//! Summarizes a whole clip into [`SequenceMetrics`] and evaluates the
//! movement detectors and correctness predicates against the configured
//! [`HeuristicThresholds`].
//!
//! # Metrics
//!
//! | Metric | Definition |
//! |--------|------------|
//! | `avg_visibility` | mean visibility of every observed keypoint |
//! | `min_knee_angle` | per frame mean of left/right hip–knee–ankle, min over frames |
//! | `min_elbow_angle` | per frame mean of left/right shoulder–elbow–wrist, min over frames |
//! | `max_hip_dx`, `max_hip_dy` | largest frame-to-frame hip midpoint step, frame coordinates |
//! | `max_ankle_separation` | largest ankle–ankle distance, normalized coordinates |
//! | `avg_takeoff_angle` | mean hip–knee–ankle angle over frames |
//! | `avg_torso_angle` | mean shoulder–hip inclination vs. horizontal, `[0, 90]` |
//! | `shoulder_depth` | vertical range of the shoulder midpoint, frame coordinates |
//!
//! A metric is `None` when no frame provides the joints it needs; any
//! detector or predicate reading a `None` metric evaluates to `false`.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::HeuristicThresholds;
use crate::frame::{Frame, Sequence};
use crate::landmark::Landmark;
use crate::math::{distance2, inclination, joint_angle, midpoint2};
use crate::prediction::{Correctness, ExerciseType};

/// Detectors in decision priority order.
pub const DETECTOR_PRIORITY: [ExerciseType; 3] =
    [ExerciseType::LongJump, ExerciseType::Squat, ExerciseType::Pushup];

/// Whole-clip kinematic summary.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SequenceMetrics {
    pub avg_visibility: Option<f64>,
    pub min_knee_angle: Option<f64>,
    pub min_elbow_angle: Option<f64>,
    pub max_hip_dx: Option<f64>,
    pub max_hip_dy: Option<f64>,
    pub max_ankle_separation: Option<f64>,
    pub avg_takeoff_angle: Option<f64>,
    pub avg_torso_angle: Option<f64>,
    pub shoulder_depth: Option<f64>,
}

impl SequenceMetrics {
    /// Compute all metrics over the frames of `sequence`.
    #[must_use]
    pub fn from_sequence(sequence: &Sequence) -> Self {
        let frames = sequence.frames();

        let visibilities: Vec<f64> = frames
            .iter()
            .flat_map(|f| f.keypoints())
            .map(|kp| kp.visibility)
            .collect();

        let knees: Vec<f64> = frames.iter().filter_map(knee_angle).collect();
        let elbows: Vec<f64> = frames.iter().filter_map(elbow_angle).collect();

        // Hip steps are only taken between adjacent frames that both see the hips.
        let hips: Vec<Option<[f64; 2]>> = frames.iter().map(hip_midpoint).collect();
        let (max_hip_dx, max_hip_dy) = hips
            .windows(2)
            .filter_map(|w| match (w[0], w[1]) {
                (Some(a), Some(b)) => Some(((b[0] - a[0]).abs(), (b[1] - a[1]).abs())),
                _ => None,
            })
            .fold((None, None), |(mx, my), (dx, dy)| {
                (Some(max_opt(mx, dx)), Some(max_opt(my, dy)))
            });

        let ankle_separations = frames.iter().filter_map(|f| {
            Some(distance2(
                &f.position(Landmark::LeftAnkle)?,
                &f.position(Landmark::RightAnkle)?,
            ))
        });

        let torso: Vec<f64> = frames
            .iter()
            .filter_map(|f| {
                let shoulders = midpoint_of(f, Landmark::LeftShoulder, Landmark::RightShoulder)?;
                let hips = midpoint_of(f, Landmark::LeftHip, Landmark::RightHip)?;
                Some(inclination(&shoulders, &hips))
            })
            .collect();

        let shoulder_heights: Vec<f64> = frames
            .iter()
            .filter_map(|f| frame_midpoint(f, Landmark::LeftShoulder, Landmark::RightShoulder))
            .map(|p| p[1])
            .collect();
        let shoulder_depth = min_of(&shoulder_heights)
            .zip(max_of(&shoulder_heights))
            .map(|(lo, hi)| hi - lo);

        Self {
            avg_visibility: mean(&visibilities),
            min_knee_angle: min_of(&knees),
            min_elbow_angle: min_of(&elbows),
            max_hip_dx,
            max_hip_dy,
            max_ankle_separation: ankle_separations.reduce(f64::max),
            avg_takeoff_angle: mean(&knees),
            avg_torso_angle: mean(&torso),
            shoulder_depth,
        }
    }
}

/// Outcome of running every detector on one clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeuristicReport {
    pub metrics: SequenceMetrics,
    /// Detectors that fired, in priority order.
    pub fired: Vec<ExerciseType>,
    /// Visibility was too low for the detectors to be trusted.
    pub low_visibility: bool,
}

impl HeuristicReport {
    /// Highest-priority detector that fired.
    #[must_use]
    pub fn winner(&self) -> Option<ExerciseType> {
        self.fired.first().copied()
    }
}

/// Threshold-based detectors and correctness predicates.
#[derive(Debug, Clone, Copy)]
pub struct HeuristicEngine<'a> {
    thresholds: &'a HeuristicThresholds,
}

impl<'a> HeuristicEngine<'a> {
    #[must_use]
    pub const fn new(thresholds: &'a HeuristicThresholds) -> Self {
        Self { thresholds }
    }

    /// Compute metrics and run the detectors.
    #[must_use]
    pub fn evaluate(&self, sequence: &Sequence) -> HeuristicReport {
        let metrics = SequenceMetrics::from_sequence(sequence);
        let report = self.report(metrics);
        debug!(
            fired = ?report.fired,
            low_visibility = report.low_visibility,
            ?metrics,
            "heuristic evaluation"
        );
        report
    }

    /// Run the detectors on precomputed metrics.
    #[must_use]
    pub fn report(&self, metrics: SequenceMetrics) -> HeuristicReport {
        let low_visibility = !at_least(metrics.avg_visibility, self.thresholds.min_visibility);
        let fired = if low_visibility {
            Vec::new()
        } else {
            DETECTOR_PRIORITY
                .into_iter()
                .filter(|&e| self.detects(e, &metrics))
                .collect()
        };

        HeuristicReport {
            metrics,
            fired,
            low_visibility,
        }
    }

    /// Whether the detector for `exercise` fires. Always `false` for
    /// [`ExerciseType::Unknown`].
    #[must_use]
    pub fn detects(&self, exercise: ExerciseType, m: &SequenceMetrics) -> bool {
        let t = self.thresholds;
        match exercise {
            ExerciseType::LongJump => {
                let dx = m.max_hip_dx.filter(|&dx| dx > t.jump_min_horizontal);
                dx.is_some_and(|dx| at_least(m.max_hip_dy, t.jump_vertical_ratio * dx))
                    && at_most(m.min_knee_angle, t.jump_max_knee_angle)
                    && below(m.max_ankle_separation, t.jump_max_ankle_separation)
                    && within(m.avg_takeoff_angle, t.jump_takeoff_min, t.jump_takeoff_max)
            }
            ExerciseType::Squat => {
                at_most(m.min_knee_angle, t.squat_max_knee_angle)
                    && at_least(m.avg_torso_angle, t.squat_min_torso_angle)
                    && at_most(m.max_hip_dx, t.squat_max_horizontal)
                    && at_most(m.max_hip_dy, t.squat_max_vertical)
            }
            ExerciseType::Pushup => {
                at_most(m.min_elbow_angle, t.pushup_max_elbow_angle)
                    && at_least(m.min_knee_angle, t.pushup_min_knee_angle)
                    && at_most(m.avg_torso_angle, t.pushup_max_torso_angle)
                    && at_most(m.max_hip_dy, t.pushup_max_vertical)
            }
            ExerciseType::Unknown => false,
        }
    }

    /// Form verdict for a recognised exercise.
    #[must_use]
    pub fn correctness(&self, exercise: ExerciseType, m: &SequenceMetrics) -> Correctness {
        let t = self.thresholds;
        let correct = match exercise {
            ExerciseType::Squat => {
                below(m.min_knee_angle, t.squat_correct_knee_angle)
                    && at_most(m.max_hip_dx, t.squat_correct_max_drift)
                    && at_most(m.max_ankle_separation, t.squat_correct_max_stance)
            }
            ExerciseType::Pushup => {
                at_most(m.min_elbow_angle, t.pushup_correct_elbow_angle)
                    && at_most(m.avg_torso_angle, t.pushup_correct_max_torso)
                    && at_most(m.max_hip_dy, t.pushup_correct_max_vertical)
                    && at_least(m.shoulder_depth, t.pushup_correct_min_depth)
                    && at_least(m.min_knee_angle, t.pushup_correct_min_knee)
            }
            ExerciseType::LongJump => {
                at_most(m.min_knee_angle, t.jump_correct_knee_angle)
                    && within(
                        m.avg_takeoff_angle,
                        t.jump_correct_takeoff_min,
                        t.jump_correct_takeoff_max,
                    )
                    && at_most(m.max_ankle_separation, t.jump_correct_max_ankle_separation)
                    && at_least(m.max_hip_dx, t.jump_correct_min_horizontal)
            }
            ExerciseType::Unknown => return Correctness::Unknown,
        };
        Correctness::from_bool(correct)
    }
}

// =============================================================================
// Per-frame geometry
// =============================================================================

/// Mean of whichever of the two triplet angles the frame can measure.
fn paired_angle(frame: &Frame, left: [Landmark; 3], right: [Landmark; 3]) -> Option<f64> {
    let angle = |[a, b, c]: [Landmark; 3]| {
        Some(joint_angle(&frame.position(a)?, &frame.position(b)?, &frame.position(c)?))
    };
    match (angle(left), angle(right)) {
        (Some(l), Some(r)) => Some((l + r) / 2.0),
        (one, other) => one.or(other),
    }
}

fn knee_angle(frame: &Frame) -> Option<f64> {
    use Landmark::{LeftAnkle, LeftHip, LeftKnee, RightAnkle, RightHip, RightKnee};
    paired_angle(frame, [LeftHip, LeftKnee, LeftAnkle], [RightHip, RightKnee, RightAnkle])
}

fn elbow_angle(frame: &Frame) -> Option<f64> {
    use Landmark::{LeftElbow, LeftShoulder, LeftWrist, RightElbow, RightShoulder, RightWrist};
    paired_angle(
        frame,
        [LeftShoulder, LeftElbow, LeftWrist],
        [RightShoulder, RightElbow, RightWrist],
    )
}

/// Midpoint in normalized coordinates.
fn midpoint_of(frame: &Frame, a: Landmark, b: Landmark) -> Option<[f64; 2]> {
    Some(midpoint2(&frame.position(a)?, &frame.position(b)?))
}

/// Midpoint in frame coordinates.
fn frame_midpoint(frame: &Frame, a: Landmark, b: Landmark) -> Option<[f64; 2]> {
    Some(midpoint2(&frame.frame_position(a)?, &frame.frame_position(b)?))
}

fn hip_midpoint(frame: &Frame) -> Option<[f64; 2]> {
    frame_midpoint(frame, Landmark::LeftHip, Landmark::RightHip)
}

// =============================================================================
// Comparisons on optional metrics
// =============================================================================

fn at_most(value: Option<f64>, limit: f64) -> bool {
    value.is_some_and(|v| v <= limit)
}

fn at_least(value: Option<f64>, limit: f64) -> bool {
    value.is_some_and(|v| v >= limit)
}

fn below(value: Option<f64>, limit: f64) -> bool {
    value.is_some_and(|v| v < limit)
}

fn within(value: Option<f64>, lo: f64, hi: f64) -> bool {
    value.is_some_and(|v| (lo..=hi).contains(&v))
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn min_of(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::min)
}

fn max_of(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::max)
}

fn max_opt(current: Option<f64>, v: f64) -> f64 {
    current.map_or(v, |c| c.max(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn metrics() -> SequenceMetrics {
        SequenceMetrics {
            avg_visibility: Some(0.9),
            ..SequenceMetrics::default()
        }
    }

    fn squat_metrics() -> SequenceMetrics {
        SequenceMetrics {
            min_knee_angle: Some(70.0),
            min_elbow_angle: Some(160.0),
            avg_torso_angle: Some(80.0),
            max_hip_dx: Some(0.05),
            max_hip_dy: Some(0.05),
            max_ankle_separation: Some(0.3),
            avg_takeoff_angle: Some(120.0),
            ..metrics()
        }
    }

    fn pushup_metrics() -> SequenceMetrics {
        let t = HeuristicThresholds::default();
        SequenceMetrics {
            min_elbow_angle: Some(60.0),
            min_knee_angle: Some(150.0),
            avg_torso_angle: Some(20.0),
            max_hip_dx: Some(0.02),
            max_hip_dy: Some(0.9 * t.pushup_max_vertical),
            max_ankle_separation: Some(0.1),
            shoulder_depth: Some(0.1),
            avg_takeoff_angle: Some(172.0),
            ..metrics()
        }
    }

    fn jump_metrics() -> SequenceMetrics {
        SequenceMetrics {
            min_knee_angle: Some(75.0),
            min_elbow_angle: Some(150.0),
            avg_torso_angle: Some(70.0),
            max_hip_dx: Some(0.4),
            max_hip_dy: Some(0.2),
            max_ankle_separation: Some(0.3),
            avg_takeoff_angle: Some(110.0),
            ..metrics()
        }
    }

    #[test]
    fn test_squat_detected_and_correct() {
        let t = HeuristicThresholds::default();
        let engine = HeuristicEngine::new(&t);
        let report = engine.report(squat_metrics());
        assert_eq!(report.winner(), Some(ExerciseType::Squat));
        assert_eq!(
            engine.correctness(ExerciseType::Squat, &report.metrics),
            Correctness::Correct
        );
    }

    #[test]
    fn test_shallow_squat_is_incorrect() {
        let t = HeuristicThresholds::default();
        let engine = HeuristicEngine::new(&t);
        let m = SequenceMetrics {
            min_knee_angle: Some(125.0),
            ..squat_metrics()
        };
        assert_eq!(engine.correctness(ExerciseType::Squat, &m), Correctness::Incorrect);
    }

    #[test]
    fn test_pushup_detected() {
        let t = HeuristicThresholds::default();
        let engine = HeuristicEngine::new(&t);
        let report = engine.report(pushup_metrics());
        assert_eq!(report.fired, vec![ExerciseType::Pushup]);

        // Hip travel is inside the detector band but past the form bound.
        assert_eq!(
            engine.correctness(ExerciseType::Pushup, &report.metrics),
            Correctness::Incorrect
        );
        let steady = SequenceMetrics {
            max_hip_dy: Some(0.05),
            ..pushup_metrics()
        };
        assert_eq!(engine.correctness(ExerciseType::Pushup, &steady), Correctness::Correct);
    }

    #[test]
    fn test_pushup_knee_bound_is_inclusive() {
        let t = HeuristicThresholds::default();
        let engine = HeuristicEngine::new(&t);
        let at_bound = SequenceMetrics {
            min_knee_angle: Some(t.pushup_min_knee_angle),
            ..pushup_metrics()
        };
        let bent = SequenceMetrics {
            min_knee_angle: Some(t.pushup_min_knee_angle - 0.1),
            ..pushup_metrics()
        };
        assert!(engine.detects(ExerciseType::Pushup, &at_bound));
        assert!(!engine.detects(ExerciseType::Pushup, &bent));
    }

    #[test]
    fn test_takeoff_band_edges() {
        let t = HeuristicThresholds::default();
        let engine = HeuristicEngine::new(&t);
        let with_takeoff = |angle: f64| SequenceMetrics {
            avg_takeoff_angle: Some(angle),
            ..jump_metrics()
        };
        for angle in [15.0, 150.0] {
            assert!(engine.detects(ExerciseType::LongJump, &with_takeoff(angle)), "{angle}");
        }
        for angle in [14.9, 150.1] {
            assert!(!engine.detects(ExerciseType::LongJump, &with_takeoff(angle)), "{angle}");
        }
    }

    #[test]
    fn test_long_jump_wins_priority() {
        let t = HeuristicThresholds::default();
        let engine = HeuristicEngine::new(&t);
        let report = engine.report(jump_metrics());
        assert_eq!(report.winner(), Some(ExerciseType::LongJump));
        assert_eq!(
            engine.correctness(ExerciseType::LongJump, &report.metrics),
            Correctness::Correct
        );
    }

    #[test]
    fn test_jump_needs_vertical_component() {
        let t = HeuristicThresholds::default();
        let engine = HeuristicEngine::new(&t);
        let m = SequenceMetrics {
            max_hip_dy: Some(0.01),
            ..jump_metrics()
        };
        assert!(!engine.detects(ExerciseType::LongJump, &m));
    }

    #[test]
    fn test_missing_metric_never_fires() {
        let t = HeuristicThresholds::default();
        let engine = HeuristicEngine::new(&t);
        let m = SequenceMetrics {
            avg_torso_angle: None,
            ..squat_metrics()
        };
        assert!(!engine.detects(ExerciseType::Squat, &m));
        assert_eq!(engine.correctness(ExerciseType::Unknown, &m), Correctness::Unknown);
    }

    #[test]
    fn test_low_visibility_gates_detectors() {
        let t = HeuristicThresholds::default();
        let engine = HeuristicEngine::new(&t);
        let report = engine.report(SequenceMetrics {
            avg_visibility: Some(0.2),
            ..squat_metrics()
        });
        assert!(report.low_visibility);
        assert!(report.fired.is_empty());
    }

    #[test]
    fn test_metrics_from_frames() {
        // Hips move right by 10 px between frames with unit 100, center 0.
        let frame = |id: u64, shift: f64, knee_x: f64| {
            Frame::new(id, 0.0, 0.0, 100.0)
                .with_keypoint(Landmark::LeftHip, shift, 0.0, 1.0)
                .with_keypoint(Landmark::RightHip, shift + 0.2, 0.0, 0.5)
                .with_keypoint(Landmark::LeftKnee, shift + knee_x, 0.5, 1.0)
                .with_keypoint(Landmark::LeftAnkle, shift, 1.0, 1.0)
                .with_keypoint(Landmark::RightAnkle, shift + 0.2, 1.0, 1.0)
        };
        let seq = Sequence::new(vec![frame(0, 0.0, 0.0), frame(1, 0.1, 0.5)]).unwrap();
        let m = SequenceMetrics::from_sequence(&seq);

        assert_relative_eq!(m.avg_visibility.unwrap(), 0.9);
        assert_relative_eq!(m.max_hip_dx.unwrap(), 10.0, epsilon = 1e-9);
        assert_relative_eq!(m.max_hip_dy.unwrap(), 0.0);
        assert_relative_eq!(m.max_ankle_separation.unwrap(), 0.2, epsilon = 1e-12);
        // Straight leg in frame 0, 90° at the knee in frame 1.
        assert_relative_eq!(m.min_knee_angle.unwrap(), 90.0, epsilon = 1e-9);
        assert_relative_eq!(m.avg_takeoff_angle.unwrap(), 135.0, epsilon = 1e-9);
        assert!(m.min_elbow_angle.is_none());
        assert!(m.avg_torso_angle.is_none());
        assert!(m.shoulder_depth.is_none());
    }
}
