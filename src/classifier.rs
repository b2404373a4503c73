//! Bidirectional LSTM sequence classifier.
//!
//! The classifier is an optional second opinion next to the heuristic rule
//! engine. Its learned state ([`ClassifierState`]) bundles the network
//! weights, the fitted feature scaler and the label vocabulary; it is built
//! by [`Trainer`] or loaded from disk, and never mutated by inference.
//!
//! # Network
//!
//! ```text
//! x(0..T) ─► BiLSTM ─► dropout ─► … ─► BiLSTM ─► [h_fwd(T-1); h_bwd(T-1)] ─► linear ─► softmax
//! ```
//!
//! Dropout is only active during training.

use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{EngineConfig, NetworkConfig};
use crate::error::{ClassifyError, Result};
use crate::features::FeatureExtractor;
use crate::frame::Sequence;
use crate::math::lstm::{BiLstmLayer, LayerGrads, LayerTrace};
use crate::math::{argmax, softmax};
use crate::normalizer::{FeatureScaler, NormalizedSequence, SequenceNormalizer};
use crate::prediction::ExerciseType;

/// Probabilities below this are clamped before taking the log in the loss.
const MIN_PROBABILITY: f64 = 1e-12;

// =============================================================================
// Vocabulary
// =============================================================================

/// Ordered mapping between class indices and exercise labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelVocabulary {
    labels: Vec<ExerciseType>,
}

impl LabelVocabulary {
    /// # Errors
    ///
    /// Returns an error for an empty vocabulary or duplicate labels.
    pub fn new(labels: Vec<ExerciseType>) -> Result<Self> {
        if labels.is_empty() {
            return Err(ClassifyError::invalid_input("label vocabulary is empty"));
        }
        for (i, label) in labels.iter().enumerate() {
            if labels[..i].contains(label) {
                return Err(ClassifyError::invalid_input(format!(
                    "duplicate label '{label}' in vocabulary"
                )));
            }
        }
        Ok(Self { labels })
    }

    /// Class index of a label.
    #[must_use]
    pub fn encode(&self, label: ExerciseType) -> Option<usize> {
        self.labels.iter().position(|&l| l == label)
    }

    /// Label of a class index.
    #[must_use]
    pub fn decode(&self, index: usize) -> Option<ExerciseType> {
        self.labels.get(index).copied()
    }

    #[must_use]
    pub fn labels(&self) -> &[ExerciseType] {
        &self.labels
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

// =============================================================================
// Network
// =============================================================================

/// Stacked bidirectional LSTM with a linear classification head.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiLstmNetwork {
    layers: Vec<BiLstmLayer>,
    /// `C × 2H`.
    head_weights: DMatrix<f64>,
    head_bias: DVector<f64>,
}

struct ForwardPass {
    traces: Vec<LayerTrace>,
    masks: Vec<Option<Vec<DVector<f64>>>>,
    last: DVector<f64>,
    logits: DVector<f64>,
}

impl BiLstmNetwork {
    /// Freshly initialized network.
    ///
    /// # Errors
    ///
    /// Returns an error when any dimension is zero.
    pub fn new<R: Rng>(
        input_size: usize,
        network: &NetworkConfig,
        num_classes: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if input_size == 0 || network.hidden_size == 0 || network.num_layers == 0 || num_classes == 0 {
            return Err(ClassifyError::invalid_config(
                "network dimensions must be positive",
            ));
        }

        let h = network.hidden_size;
        let layers = (0..network.num_layers)
            .map(|k| {
                let input = if k == 0 { input_size } else { 2 * h };
                BiLstmLayer::new(input, h, rng)
            })
            .collect();

        let k = 1.0 / ((2 * h) as f64).sqrt();
        let head_weights = DMatrix::from_fn(num_classes, 2 * h, |_, _| rng.random_range(-k..=k));
        let head_bias = DVector::from_fn(num_classes, |_, _| rng.random_range(-k..=k));

        Ok(Self {
            layers,
            head_weights,
            head_bias,
        })
    }

    /// Width of each input time step.
    #[must_use]
    pub fn input_size(&self) -> usize {
        self.layers.first().map_or(0, BiLstmLayer::input_size)
    }

    #[must_use]
    pub fn hidden_size(&self) -> usize {
        self.layers.first().map_or(0, BiLstmLayer::hidden_size)
    }

    #[must_use]
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Number of classes.
    #[must_use]
    pub fn output_size(&self) -> usize {
        self.head_weights.nrows()
    }

    /// Check that every weight matrix agrees with its neighbours.
    ///
    /// # Errors
    ///
    /// Returns a description of the first inconsistency found.
    pub fn validate(&self) -> Result<()> {
        let Some(first) = self.layers.first() else {
            return Err(ClassifyError::invalid_input("network has no layers"));
        };
        let h = first.hidden_size();
        for (k, layer) in self.layers.iter().enumerate() {
            if !layer.is_consistent() || layer.hidden_size() != h {
                return Err(ClassifyError::invalid_input(format!(
                    "layer {k} has inconsistent weight shapes"
                )));
            }
            if k > 0 && layer.input_size() != 2 * h {
                return Err(ClassifyError::dimension_mismatch(
                    "stacked layer input",
                    2 * h,
                    layer.input_size(),
                ));
            }
        }
        if self.head_weights.ncols() != 2 * h {
            return Err(ClassifyError::dimension_mismatch(
                "head input",
                2 * h,
                self.head_weights.ncols(),
            ));
        }
        if self.head_bias.len() != self.head_weights.nrows() {
            return Err(ClassifyError::dimension_mismatch(
                "head bias",
                self.head_weights.nrows(),
                self.head_bias.len(),
            ));
        }
        Ok(())
    }

    /// Class probabilities for one normalized sequence.
    ///
    /// # Errors
    ///
    /// Returns an error on a width mismatch, an empty sequence, or
    /// non-finite output.
    pub fn predict(&self, sequence: &NormalizedSequence) -> Result<DVector<f64>> {
        let pass = self.run(sequence, None::<&mut StdRng>, 0.0)?;
        if pass.logits.iter().any(|l| !l.is_finite()) {
            return Err(ClassifyError::numerical_instability("classifier logits"));
        }
        Ok(softmax(&pass.logits))
    }

    /// One full-sequence SGD step on a single labelled clip. Returns the
    /// cross-entropy loss before the update.
    ///
    /// # Errors
    ///
    /// Returns an error on a width mismatch or when the loss or gradient
    /// becomes non-finite; the weights are left unchanged in that case.
    pub fn train_step<R: Rng>(
        &mut self,
        sequence: &NormalizedSequence,
        target: usize,
        network: &NetworkConfig,
        rng: &mut R,
    ) -> Result<f64> {
        if target >= self.output_size() {
            return Err(ClassifyError::dimension_mismatch(
                "target class",
                self.output_size(),
                target,
            ));
        }

        let pass = self.run(sequence, Some(rng), network.dropout)?;
        let probabilities = softmax(&pass.logits);
        let loss = -probabilities[target].max(MIN_PROBABILITY).ln();
        if !loss.is_finite() {
            return Err(ClassifyError::numerical_instability("training loss"));
        }

        // Softmax + cross-entropy gradient.
        let mut d_logits = probabilities;
        d_logits[target] -= 1.0;

        let mut d_head_weights = DMatrix::<f64>::zeros(self.head_weights.nrows(), self.head_weights.ncols());
        d_head_weights.ger(1.0, &d_logits, &pass.last, 0.0);
        let d_head_bias = d_logits.clone();

        let steps = sequence.len();
        let mut d_outputs = vec![DVector::<f64>::zeros(pass.last.len()); steps];
        d_outputs[steps - 1] = self.head_weights.tr_mul(&d_logits);

        let mut layer_grads: Vec<LayerGrads> = Vec::with_capacity(self.layers.len());
        for (k, layer) in self.layers.iter().enumerate().rev() {
            if let Some(mask) = &pass.masks[k] {
                for (d, m) in d_outputs.iter_mut().zip(mask) {
                    d.component_mul_assign(m);
                }
            }
            let (grads, d_inputs) = layer.backward(&pass.traces[k], &d_outputs);
            layer_grads.push(grads);
            d_outputs = d_inputs;
        }
        layer_grads.reverse();

        let norm = (layer_grads.iter().map(LayerGrads::squared_norm).sum::<f64>()
            + d_head_weights.norm_squared()
            + d_head_bias.norm_squared())
        .sqrt();
        if !norm.is_finite() {
            return Err(ClassifyError::numerical_instability("gradient norm"));
        }

        let clip = if norm > network.gradient_clip {
            network.gradient_clip / norm
        } else {
            1.0
        };
        let rate = network.learning_rate * clip;

        for (layer, grads) in self.layers.iter_mut().zip(&layer_grads) {
            layer.apply(grads, rate);
        }
        self.head_weights -= d_head_weights * rate;
        self.head_bias -= d_head_bias * rate;

        Ok(loss)
    }

    fn run<R: Rng>(
        &self,
        sequence: &NormalizedSequence,
        mut rng: Option<&mut R>,
        dropout: f64,
    ) -> Result<ForwardPass> {
        if sequence.width() != self.input_size() {
            return Err(ClassifyError::dimension_mismatch(
                "classifier input",
                self.input_size(),
                sequence.width(),
            ));
        }
        if sequence.is_empty() {
            return Err(ClassifyError::NoFrames);
        }

        let mut input = sequence.steps();
        let mut traces = Vec::with_capacity(self.layers.len());
        let mut masks = Vec::with_capacity(self.layers.len());
        let top = self.layers.len().saturating_sub(1);

        for (k, layer) in self.layers.iter().enumerate() {
            let (trace, mut output) = layer.forward(&input);

            let mask = match rng.as_deref_mut() {
                Some(rng) if k < top && dropout > 0.0 => {
                    let keep = 1.0 - dropout;
                    let mask: Vec<DVector<f64>> = output
                        .iter()
                        .map(|o| {
                            DVector::from_fn(o.len(), |_, _| {
                                if rng.random_bool(keep) {
                                    1.0 / keep
                                } else {
                                    0.0
                                }
                            })
                        })
                        .collect();
                    for (o, m) in output.iter_mut().zip(&mask) {
                        o.component_mul_assign(m);
                    }
                    Some(mask)
                }
                _ => None,
            };

            traces.push(trace);
            masks.push(mask);
            input = output;
        }

        let last = input
            .pop()
            .ok_or(ClassifyError::NoFrames)?;
        let logits = &self.head_weights * &last + &self.head_bias;

        Ok(ForwardPass {
            traces,
            masks,
            last,
            logits,
        })
    }
}

// =============================================================================
// State and inference
// =============================================================================

/// Classifier verdict for one clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierOutput {
    /// Most probable label.
    pub label: ExerciseType,
    /// Probability of `label`.
    pub confidence: f64,
    /// Probability of every vocabulary label, in vocabulary order.
    pub probabilities: Vec<(ExerciseType, f64)>,
}

/// Learned classifier state: network, scaler and vocabulary.
///
/// Immutable once constructed; share it as `Arc<ClassifierState>`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierState {
    network: BiLstmNetwork,
    scaler: FeatureScaler,
    vocabulary: LabelVocabulary,
}

impl ClassifierState {
    /// Assemble a state, checking that the three parts fit together.
    ///
    /// # Errors
    ///
    /// Returns an error if the network is malformed, the scaler width differs
    /// from the network input width, or the vocabulary size differs from the
    /// network output width.
    pub fn new(network: BiLstmNetwork, scaler: FeatureScaler, vocabulary: LabelVocabulary) -> Result<Self> {
        network.validate()?;
        if scaler.width() != network.input_size() {
            return Err(ClassifyError::dimension_mismatch(
                "scaler width vs network input",
                network.input_size(),
                scaler.width(),
            ));
        }
        if vocabulary.len() != network.output_size() {
            return Err(ClassifyError::dimension_mismatch(
                "vocabulary size vs network output",
                network.output_size(),
                vocabulary.len(),
            ));
        }
        Ok(Self {
            network,
            scaler,
            vocabulary,
        })
    }

    #[must_use]
    pub fn network(&self) -> &BiLstmNetwork {
        &self.network
    }

    #[must_use]
    pub fn scaler(&self) -> &FeatureScaler {
        &self.scaler
    }

    #[must_use]
    pub fn vocabulary(&self) -> &LabelVocabulary {
        &self.vocabulary
    }

    /// Normalized-sequence width this state expects.
    #[must_use]
    pub fn input_width(&self) -> usize {
        self.network.input_size()
    }

    /// Normalizer carrying this state's fitted scaler.
    #[must_use]
    pub fn normalizer(&self, max_seq_len: usize) -> SequenceNormalizer {
        SequenceNormalizer::new(max_seq_len).with_scaler(self.scaler.clone())
    }

    /// Classify an already normalized sequence.
    ///
    /// # Errors
    ///
    /// Propagates network errors.
    pub fn classify(&self, sequence: &NormalizedSequence) -> Result<ClassifierOutput> {
        let probabilities = self.network.predict(sequence)?;
        let (index, confidence) = argmax(&probabilities)
            .ok_or_else(|| ClassifyError::numerical_instability("empty classifier output"))?;
        let label = self
            .vocabulary
            .decode(index)
            .ok_or(ClassifyError::dimension_mismatch("vocabulary", index + 1, self.vocabulary.len()))?;

        let probabilities = self
            .vocabulary
            .labels()
            .iter()
            .copied()
            .zip(probabilities.iter().copied())
            .collect();

        debug!(%label, confidence, "classifier prediction");
        Ok(ClassifierOutput {
            label,
            confidence,
            probabilities,
        })
    }

    /// Normalize raw frame features and classify them.
    ///
    /// # Errors
    ///
    /// Propagates normalization and network errors.
    pub fn predict(&self, features: &[Vec<f64>], max_seq_len: usize) -> Result<ClassifierOutput> {
        let sequence = self.normalizer(max_seq_len).normalize(features)?;
        self.classify(&sequence)
    }
}

// =============================================================================
// Training
// =============================================================================

/// One labelled training clip, as frame feature vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingClip {
    pub features: Vec<Vec<f64>>,
    pub label: ExerciseType,
}

/// Fits a fresh [`ClassifierState`] from labelled clips.
#[derive(Debug, Clone, Copy)]
pub struct Trainer<'a> {
    config: &'a EngineConfig,
}

impl<'a> Trainer<'a> {
    #[must_use]
    pub const fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// Train on labelled sequences; each sequence's majority frame label is
    /// its class.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifyError::Training`] when a sequence carries no label,
    /// plus everything [`Trainer::fit`] can return.
    pub fn fit_sequences(&self, sequences: &[Sequence]) -> Result<ClassifierState> {
        let extractor = FeatureExtractor::new(self.config);
        let clips = sequences
            .iter()
            .enumerate()
            .map(|(i, seq)| {
                let label = seq
                    .label()
                    .ok_or_else(|| ClassifyError::training(format!("clip {i} has no exercise label")))?;
                Ok(TrainingClip {
                    features: extractor.extract_sequence(seq),
                    label: label.exercise_type,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        self.fit(&clips)
    }

    /// Fit the scaler on all clips, then run `epochs` passes visiting the
    /// clips in order, one gradient step per clip.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty clip list, a label outside the
    /// vocabulary, or a numerical failure during training.
    pub fn fit(&self, clips: &[TrainingClip]) -> Result<ClassifierState> {
        if clips.is_empty() {
            return Err(ClassifyError::training("no training clips"));
        }
        let net_config = &self.config.network;
        let vocabulary = LabelVocabulary::new(self.config.vocabulary.clone())?;

        let targets = clips
            .iter()
            .map(|c| {
                vocabulary.encode(c.label).ok_or_else(|| {
                    ClassifyError::training(format!("label '{}' is not in the vocabulary", c.label))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut normalizer = SequenceNormalizer::new(self.config.max_seq_len);
        let features: Vec<Vec<Vec<f64>>> = clips.iter().map(|c| c.features.clone()).collect();
        let sequences = normalizer.fit_transform(&features)?;
        let scaler = normalizer
            .scaler()
            .cloned()
            .ok_or_else(|| ClassifyError::training("scaler was not fitted"))?;

        let mut rng = StdRng::seed_from_u64(net_config.seed);
        let input_width = sequences.first().map_or(0, NormalizedSequence::width);
        let mut network = BiLstmNetwork::new(input_width, net_config, vocabulary.len(), &mut rng)?;

        info!(
            clips = clips.len(),
            epochs = net_config.epochs,
            hidden_size = net_config.hidden_size,
            num_layers = net_config.num_layers,
            "training sequence classifier"
        );

        let mut mean_loss = f64::NAN;
        for epoch in 0..net_config.epochs {
            let mut total = 0.0;
            for (sequence, &target) in sequences.iter().zip(&targets) {
                total += network.train_step(sequence, target, net_config, &mut rng)?;
            }
            mean_loss = total / sequences.len() as f64;
            debug!(epoch, loss = mean_loss, "epoch finished");
        }

        info!(loss = mean_loss, "training finished");
        ClassifierState::new(network, scaler, vocabulary)
    }
}
