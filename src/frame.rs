//! Frame aggregation.
//!
//! Raw keypoint rows arrive one per (frame, landmark) observation in no
//! particular order. [`aggregate_rows`] groups them into [`Frame`]s and
//! orders those by the numeric frame id into a [`Sequence`].

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ClassifyError, Result};
use crate::landmark::Landmark;
use crate::prediction::ExerciseType;

/// One row of the input keypoint table.
///
/// Every field is optional so that a malformed row can be recognised and
/// skipped instead of failing the whole clip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeypointRow {
    pub frame_id: Option<u64>,
    pub landmark: Option<String>,
    pub x_norm: Option<f64>,
    pub y_norm: Option<f64>,
    pub visibility: Option<f64>,
    pub center_x: Option<f64>,
    pub center_y: Option<f64>,
    pub unit_length: Option<f64>,
    pub exercise_type: Option<String>,
    pub is_correct: Option<u8>,
}

impl KeypointRow {
    /// Convenience constructor for a fully populated unlabelled row.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        frame_id: u64,
        landmark: Landmark,
        x_norm: f64,
        y_norm: f64,
        visibility: f64,
        center_x: f64,
        center_y: f64,
        unit_length: f64,
    ) -> Self {
        Self {
            frame_id: Some(frame_id),
            landmark: Some(landmark.as_str().to_string()),
            x_norm: Some(x_norm),
            y_norm: Some(y_norm),
            visibility: Some(visibility),
            center_x: Some(center_x),
            center_y: Some(center_y),
            unit_length: Some(unit_length),
            exercise_type: None,
            is_correct: None,
        }
    }

    /// Attach a training label.
    #[must_use]
    pub fn with_label(mut self, exercise_type: ExerciseType, is_correct: bool) -> Self {
        self.exercise_type = Some(exercise_type.as_str().to_string());
        self.is_correct = Some(u8::from(is_correct));
        self
    }
}

/// One landmark observed in one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub landmark: Landmark,
    pub x_norm: f64,
    pub y_norm: f64,
    /// Detector confidence in `[0, 1]`.
    pub visibility: f64,
}

impl Keypoint {
    /// Normalized position `[x, y]`.
    #[must_use]
    #[inline]
    pub const fn position(&self) -> [f64; 2] {
        [self.x_norm, self.y_norm]
    }
}

/// Whole-clip training label carried by labelled frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameLabel {
    pub exercise_type: ExerciseType,
    pub is_correct: bool,
}

/// All keypoints of one video frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Frame {
    pub frame_id: u64,
    keypoints: BTreeMap<Landmark, Keypoint>,
    pub center_x: f64,
    pub center_y: f64,
    pub unit_length: f64,
    pub label: Option<FrameLabel>,
}

impl Frame {
    /// Create an empty frame with its bounding-box context.
    #[must_use]
    pub fn new(frame_id: u64, center_x: f64, center_y: f64, unit_length: f64) -> Self {
        Self {
            frame_id,
            keypoints: BTreeMap::new(),
            center_x,
            center_y,
            unit_length,
            label: None,
        }
    }

    /// Insert a keypoint. Returns `false` (and keeps the existing one) when
    /// the landmark is already present.
    pub fn insert(&mut self, keypoint: Keypoint) -> bool {
        match self.keypoints.entry(keypoint.landmark) {
            Entry::Vacant(slot) => {
                slot.insert(keypoint);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Builder-style insert used by tests and synthetic clips.
    #[must_use]
    pub fn with_keypoint(mut self, landmark: Landmark, x_norm: f64, y_norm: f64, visibility: f64) -> Self {
        self.insert(Keypoint {
            landmark,
            x_norm,
            y_norm,
            visibility,
        });
        self
    }

    /// Keypoint for a landmark, if observed.
    #[must_use]
    pub fn get(&self, landmark: Landmark) -> Option<&Keypoint> {
        self.keypoints.get(&landmark)
    }

    /// Normalized position of a landmark, if observed.
    #[must_use]
    pub fn position(&self, landmark: Landmark) -> Option<[f64; 2]> {
        self.get(landmark).map(Keypoint::position)
    }

    /// Position of a landmark in frame coordinates, undoing the
    /// bounding-box normalization (`center + norm * unit_length`).
    #[must_use]
    pub fn frame_position(&self, landmark: Landmark) -> Option<[f64; 2]> {
        let unit = if self.unit_length > 0.0 { self.unit_length } else { 1.0 };
        self.position(landmark)
            .map(|[x, y]| [self.center_x + x * unit, self.center_y + y * unit])
    }

    /// Iterate over observed keypoints in landmark order.
    pub fn keypoints(&self) -> impl Iterator<Item = &Keypoint> {
        self.keypoints.values()
    }

    /// Number of observed keypoints.
    #[must_use]
    pub fn keypoint_count(&self) -> usize {
        self.keypoints.len()
    }
}

/// Temporally ordered frames of one clip.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Sequence {
    frames: Vec<Frame>,
}

impl Sequence {
    /// Wrap frames that are already in order.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifyError::NoFrames`] for an empty list and
    /// [`ClassifyError::DuplicateFrame`] when ids are not strictly ascending.
    pub fn new(frames: Vec<Frame>) -> Result<Self> {
        if frames.is_empty() {
            return Err(ClassifyError::NoFrames);
        }
        for pair in frames.windows(2) {
            if pair[1].frame_id == pair[0].frame_id {
                return Err(ClassifyError::DuplicateFrame {
                    frame_id: pair[1].frame_id,
                });
            }
            if pair[1].frame_id < pair[0].frame_id {
                return Err(ClassifyError::invalid_input(format!(
                    "frame {} follows frame {}",
                    pair[1].frame_id, pair[0].frame_id
                )));
            }
        }
        Ok(Self { frames })
    }

    /// Sort arbitrary frames by numeric id, then validate.
    ///
    /// # Errors
    ///
    /// Same as [`Sequence::new`].
    pub fn from_unordered(mut frames: Vec<Frame>) -> Result<Self> {
        frames.sort_by_key(|f| f.frame_id);
        Self::new(frames)
    }

    #[must_use]
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Whole-clip label: the most frequent exercise type among labelled
    /// frames (earliest wins ties) and the majority correctness flag of the
    /// frames carrying that type.
    #[must_use]
    pub fn label(&self) -> Option<FrameLabel> {
        let labelled: Vec<FrameLabel> = self.frames.iter().filter_map(|f| f.label).collect();
        if labelled.is_empty() {
            return None;
        }

        let mut best: Option<(ExerciseType, usize)> = None;
        for candidate in &labelled {
            let count = labelled
                .iter()
                .filter(|l| l.exercise_type == candidate.exercise_type)
                .count();
            if best.map_or(true, |(_, c)| count > c) {
                best = Some((candidate.exercise_type, count));
            }
        }
        let (exercise_type, count) = best?;

        let correct = labelled
            .iter()
            .filter(|l| l.exercise_type == exercise_type && l.is_correct)
            .count();

        Some(FrameLabel {
            exercise_type,
            is_correct: correct * 2 > count,
        })
    }
}

/// Group raw rows into an ordered [`Sequence`].
///
/// Rows without a frame id are dropped. Rows with a frame id but an invalid
/// landmark or coordinate are skipped, while the frame itself is kept (as an
/// empty frame if nothing valid remains), so the sequence length follows the
/// number of distinct frame ids. A frame's bbox context is taken from its
/// first well-formed row with a finite center and unit length; skipped rows
/// never set it.
///
/// # Errors
///
/// Returns [`ClassifyError::NoFrames`] if no row carries a frame id.
pub fn aggregate_rows<I>(rows: I) -> Result<Sequence>
where
    I: IntoIterator<Item = KeypointRow>,
{
    let mut frames: BTreeMap<u64, Frame> = BTreeMap::new();
    let mut placed: BTreeSet<u64> = BTreeSet::new();
    let mut skipped = 0usize;

    for (row_index, row) in rows.into_iter().enumerate() {
        let Some(frame_id) = row.frame_id else {
            warn!(row = row_index, "skipping keypoint row without frame_id");
            skipped += 1;
            continue;
        };

        let frame = frames
            .entry(frame_id)
            .or_insert_with(|| Frame::new(frame_id, 0.0, 0.0, 0.0));

        if frame.label.is_none() {
            frame.label = parse_label(&row);
        }

        match parse_keypoint(&row) {
            Ok(keypoint) => {
                // The bbox context comes from the first well-formed row that carries one.
                if !placed.contains(&frame_id) {
                    if let Some([cx, cy, unit]) = bbox_context(&row) {
                        frame.center_x = cx;
                        frame.center_y = cy;
                        frame.unit_length = unit;
                        placed.insert(frame_id);
                    }
                }
                if !frame.insert(keypoint) {
                    warn!(
                        row = row_index,
                        frame_id,
                        landmark = %keypoint.landmark,
                        "duplicate landmark in frame, keeping first observation"
                    );
                    skipped += 1;
                }
            }
            Err(reason) => {
                warn!(row = row_index, frame_id, reason, "skipping malformed keypoint row");
                skipped += 1;
            }
        }
    }

    debug!(frames = frames.len(), skipped, "aggregated keypoint rows");
    Sequence::new(frames.into_values().collect())
}

fn parse_keypoint(row: &KeypointRow) -> std::result::Result<Keypoint, &'static str> {
    let landmark = row
        .landmark
        .as_deref()
        .ok_or("missing landmark")?
        .parse::<Landmark>()
        .map_err(|_| "unknown landmark")?;

    let x_norm = row.x_norm.filter(|v| v.is_finite()).ok_or("missing or non-finite x_norm")?;
    let y_norm = row.y_norm.filter(|v| v.is_finite()).ok_or("missing or non-finite y_norm")?;
    let visibility = row
        .visibility
        .filter(|v| v.is_finite())
        .ok_or("missing or non-finite visibility")?;

    Ok(Keypoint {
        landmark,
        x_norm,
        y_norm,
        visibility: visibility.clamp(0.0, 1.0),
    })
}

fn parse_label(row: &KeypointRow) -> Option<FrameLabel> {
    let exercise_type = row.exercise_type.as_deref()?.parse::<ExerciseType>().ok()?;
    Some(FrameLabel {
        exercise_type,
        is_correct: row.is_correct.unwrap_or(0) != 0,
    })
}

fn bbox_context(row: &KeypointRow) -> Option<[f64; 3]> {
    let finite = |v: Option<f64>| v.filter(|x| x.is_finite());
    Some([
        finite(row.center_x)?,
        finite(row.center_y)?,
        finite(row.unit_length)?,
    ])
}
