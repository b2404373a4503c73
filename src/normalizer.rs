//! Sequence normalization.
//!
//! Converts a variable-length list of frame feature vectors into the fixed
//! `max_seq_len × 2W` matrix consumed by the classifier.
//!
//! # Pipeline
//!
//! 1. Stack the vectors in frame order
//! 2. Append first-order deltas (`v[i+1] - v[i]`, zero for the last row)
//! 3. Truncate trailing frames or pad with trailing zero rows
//! 4. Standardize the real rows column-wise with the fitted scaler
//!
//! Padding rows are never touched by the scaler, so they stay all-zero.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ClassifyError, Result};

/// Column-wise standardization fitted on real (unpadded) rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScaler {
    mean: Vec<f64>,
    std: Vec<f64>,
}

impl FeatureScaler {
    /// Fit mean and population standard deviation per column.
    ///
    /// Columns with zero (or non-finite) spread get a standard deviation of
    /// `1.0` so they pass through centred but unscaled.
    ///
    /// # Errors
    ///
    /// Returns an error if there are no rows or widths disagree.
    pub fn fit<'r, I>(rows: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'r [f64]>,
    {
        let mut rows = rows.into_iter().peekable();
        let width = rows.peek().map(|r| r.len()).ok_or(ClassifyError::NoFrames)?;

        let mut sum = vec![0.0; width];
        let mut sum_sq = vec![0.0; width];
        let mut count = 0usize;

        for row in rows {
            if row.len() != width {
                return Err(ClassifyError::dimension_mismatch("scaler fit", width, row.len()));
            }
            for (c, &v) in row.iter().enumerate() {
                sum[c] += v;
                sum_sq[c] += v * v;
            }
            count += 1;
        }

        let n = count as f64;
        let mean: Vec<f64> = sum.iter().map(|s| s / n).collect();
        let std = sum_sq
            .iter()
            .zip(&mean)
            .map(|(sq, m)| {
                let var = (sq / n - m * m).max(0.0);
                let sd = var.sqrt();
                if sd > f64::EPSILON && sd.is_finite() {
                    sd
                } else {
                    1.0
                }
            })
            .collect();

        Ok(Self { mean, std })
    }

    /// Build from explicit statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the vectors differ in length or a deviation is
    /// not strictly positive.
    pub fn from_parts(mean: Vec<f64>, std: Vec<f64>) -> Result<Self> {
        if mean.len() != std.len() {
            return Err(ClassifyError::dimension_mismatch("scaler std", mean.len(), std.len()));
        }
        if std.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
            return Err(ClassifyError::invalid_input("scaler std must be positive"));
        }
        Ok(Self { mean, std })
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.mean.len()
    }

    #[must_use]
    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    #[must_use]
    pub fn std(&self) -> &[f64] {
        &self.std
    }

    /// Standardize one row in place.
    pub fn transform_row(&self, row: &mut [f64]) {
        for ((v, m), s) in row.iter_mut().zip(&self.mean).zip(&self.std) {
            *v = (*v - m) / s;
        }
    }
}

/// Fixed-shape classifier input.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSequence {
    matrix: DMatrix<f64>,
    real_rows: usize,
}

impl NormalizedSequence {
    /// `max_seq_len × 2W` matrix, one row per time step.
    #[must_use]
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// Rows backed by actual frames; the rest is padding.
    #[must_use]
    pub fn real_rows(&self) -> usize {
        self.real_rows
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.matrix.nrows()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.matrix.nrows() == 0
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.matrix.ncols()
    }

    /// Time steps as column vectors, the form the recurrent layers take.
    #[must_use]
    pub fn steps(&self) -> Vec<DVector<f64>> {
        (0..self.matrix.nrows())
            .map(|r| self.matrix.row(r).transpose())
            .collect()
    }
}

/// Stacks, pads and scales frame feature vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceNormalizer {
    max_seq_len: usize,
    scaler: Option<FeatureScaler>,
}

impl SequenceNormalizer {
    /// Normalizer without a fitted scaler.
    #[must_use]
    pub const fn new(max_seq_len: usize) -> Self {
        Self {
            max_seq_len,
            scaler: None,
        }
    }

    #[must_use]
    pub fn with_scaler(mut self, scaler: FeatureScaler) -> Self {
        self.scaler = Some(scaler);
        self
    }

    #[must_use]
    pub const fn max_seq_len(&self) -> usize {
        self.max_seq_len
    }

    #[must_use]
    pub const fn scaler_fitted(&self) -> bool {
        self.scaler.is_some()
    }

    #[must_use]
    pub fn scaler(&self) -> Option<&FeatureScaler> {
        self.scaler.as_ref()
    }

    /// Stack vectors, append deltas and truncate to `max_seq_len`.
    ///
    /// Deltas are computed over the full clip before truncation, so the last
    /// kept row still carries the step to the first dropped frame.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifyError::NoFrames`] for an empty list and a dimension
    /// mismatch when vectors disagree in width.
    pub fn stack(&self, vectors: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        let width = vectors.first().map(Vec::len).ok_or(ClassifyError::NoFrames)?;
        if let Some(bad) = vectors.iter().find(|v| v.len() != width) {
            return Err(ClassifyError::dimension_mismatch("frame features", width, bad.len()));
        }

        let kept = vectors.len().min(self.max_seq_len);
        let rows = (0..kept)
            .map(|i| {
                let mut row = Vec::with_capacity(2 * width);
                row.extend_from_slice(&vectors[i]);
                match vectors.get(i + 1) {
                    Some(next) => row.extend(next.iter().zip(&vectors[i]).map(|(b, a)| b - a)),
                    None => row.extend(std::iter::repeat(0.0).take(width)),
                }
                row
            })
            .collect();

        Ok(rows)
    }

    /// Normalize one clip for inference.
    ///
    /// # Errors
    ///
    /// Propagates [`SequenceNormalizer::stack`] errors, and a dimension
    /// mismatch when the fitted scaler has a different width.
    pub fn normalize(&self, vectors: &[Vec<f64>]) -> Result<NormalizedSequence> {
        let rows = self.stack(vectors)?;
        if let Some(scaler) = &self.scaler {
            let width = rows.first().map_or(0, Vec::len);
            if scaler.width() != width {
                return Err(ClassifyError::dimension_mismatch("scaler", scaler.width(), width));
            }
        }
        Ok(self.scale_and_pad(rows))
    }

    /// Fit the scaler on every real row of `clips`, then normalize them.
    ///
    /// # Errors
    ///
    /// Returns an error if any clip is empty or widths disagree.
    pub fn fit_transform(&mut self, clips: &[Vec<Vec<f64>>]) -> Result<Vec<NormalizedSequence>> {
        let stacked = clips
            .iter()
            .map(|c| self.stack(c))
            .collect::<Result<Vec<_>>>()?;

        let scaler = FeatureScaler::fit(stacked.iter().flatten().map(Vec::as_slice))?;
        debug!(
            clips = clips.len(),
            width = scaler.width(),
            "fitted feature scaler"
        );
        self.scaler = Some(scaler);

        Ok(stacked
            .into_iter()
            .map(|rows| self.scale_and_pad(rows))
            .collect())
    }

    fn scale_and_pad(&self, mut rows: Vec<Vec<f64>>) -> NormalizedSequence {
        if let Some(scaler) = &self.scaler {
            for row in &mut rows {
                scaler.transform_row(row);
            }
        }
        self.pad(&rows)
    }

    fn pad(&self, rows: &[Vec<f64>]) -> NormalizedSequence {
        let width = rows.first().map_or(0, Vec::len);
        let matrix = DMatrix::from_fn(self.max_seq_len, width, |r, c| {
            rows.get(r).map_or(0.0, |row| row[c])
        });
        NormalizedSequence {
            matrix,
            real_rows: rows.len().min(self.max_seq_len),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp(n: usize, width: usize) -> Vec<Vec<f64>> {
        (0..n)
            .map(|i| (0..width).map(|c| (i * width + c) as f64).collect())
            .collect()
    }

    #[test]
    fn test_deltas_forward_difference() {
        let normalizer = SequenceNormalizer::new(10);
        let vectors = vec![vec![1.0, 2.0], vec![4.0, 3.0], vec![4.0, 5.0]];
        let rows = normalizer.stack(&vectors).unwrap();
        assert_eq!(rows[0], vec![1.0, 2.0, 3.0, 1.0]);
        assert_eq!(rows[1], vec![4.0, 3.0, 0.0, 2.0]);
        assert_eq!(rows[2], vec![4.0, 5.0, 0.0, 0.0]);
    }

    #[test]
    fn test_single_frame_keeps_width() {
        let normalizer = SequenceNormalizer::new(4);
        let seq = normalizer.normalize(&[vec![1.0, 2.0, 3.0]]).unwrap();
        assert_eq!(seq.width(), 6);
        assert_eq!(seq.real_rows(), 1);
        assert_eq!(seq.matrix().row(0).iter().copied().collect::<Vec<_>>(), vec![1.0, 2.0, 3.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_one_short_pads_one_zero_row() {
        let normalizer = SequenceNormalizer::new(5);
        let seq = normalizer.normalize(&ramp(4, 3)).unwrap();
        assert_eq!(seq.len(), 5);
        assert_eq!(seq.real_rows(), 4);
        assert!(seq.matrix().row(4).iter().all(|&v| v == 0.0));
        assert!(seq.matrix().row(3).iter().any(|&v| v != 0.0));
    }

    #[test]
    fn test_truncation_keeps_leading_frames() {
        let normalizer = SequenceNormalizer::new(3);
        let vectors = ramp(7, 2);
        let seq = normalizer.normalize(&vectors).unwrap();
        assert_eq!(seq.len(), 3);
        for r in 0..3 {
            assert_eq!(seq.matrix()[(r, 0)], vectors[r][0]);
        }
    }

    #[test]
    fn test_empty_is_no_frames() {
        let normalizer = SequenceNormalizer::new(3);
        assert!(matches!(normalizer.normalize(&[]), Err(ClassifyError::NoFrames)));
    }

    #[test]
    fn test_ragged_rejected() {
        let normalizer = SequenceNormalizer::new(3);
        let result = normalizer.normalize(&[vec![1.0], vec![1.0, 2.0]]);
        assert!(matches!(result, Err(ClassifyError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_scaler_standardizes_real_rows_only() {
        let mut normalizer = SequenceNormalizer::new(6);
        let clips = vec![ramp(3, 2), ramp(2, 2)];
        let out = normalizer.fit_transform(&clips).unwrap();
        assert!(normalizer.scaler_fitted());

        // Column means over real rows vanish after scaling.
        let mut sum = 0.0;
        for seq in &out {
            for r in 0..seq.real_rows() {
                sum += seq.matrix()[(r, 0)];
            }
        }
        assert_relative_eq!(sum, 0.0, epsilon = 1e-9);

        for seq in &out {
            for r in seq.real_rows()..seq.len() {
                assert!(seq.matrix().row(r).iter().all(|&v| v == 0.0));
            }
        }
    }

    #[test]
    fn test_constant_column_gets_unit_std() {
        let rows = [vec![2.0, 1.0], vec![2.0, 3.0]];
        let scaler = FeatureScaler::fit(rows.iter().map(Vec::as_slice)).unwrap();
        assert_eq!(scaler.std()[0], 1.0);
        assert_relative_eq!(scaler.std()[1], 1.0);
        assert_relative_eq!(scaler.mean()[1], 2.0);
    }

    #[test]
    fn test_unfitted_passes_through() {
        let normalizer = SequenceNormalizer::new(2);
        let seq = normalizer.normalize(&[vec![7.0]]).unwrap();
        assert_eq!(seq.matrix()[(0, 0)], 7.0);
    }

    #[test]
    fn test_scaler_width_mismatch() {
        let scaler = FeatureScaler::from_parts(vec![0.0; 4], vec![1.0; 4]).unwrap();
        let normalizer = SequenceNormalizer::new(2).with_scaler(scaler);
        assert!(normalizer.normalize(&[vec![1.0]]).is_err());
    }
}
