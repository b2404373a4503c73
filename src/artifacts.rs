//! Persisted classifier artifacts.
//!
//! A [`ClassifierState`] is stored as three JSON files in one directory:
//!
//! | File | Content |
//! |------|---------|
//! | `network.json` | recurrent weights and classification head |
//! | `scaler.json` | per-column mean and standard deviation |
//! | `vocabulary.json` | ordered label list |
//!
//! Every file is an internally tagged document whose `"schema"` field names
//! its layout version (currently `"v1"`). Loading is all-or-nothing: a
//! directory with none of the files means "no model", while a partial set,
//! an unreadable file, an unknown schema or mismatched widths is an error.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::classifier::{BiLstmNetwork, ClassifierState, LabelVocabulary};
use crate::error::ArtifactError;
use crate::normalizer::FeatureScaler;
use crate::prediction::ExerciseType;

pub const NETWORK_FILE: &str = "network.json";
pub const SCALER_FILE: &str = "scaler.json";
pub const VOCABULARY_FILE: &str = "vocabulary.json";

const ALL_FILES: [&str; 3] = [NETWORK_FILE, SCALER_FILE, VOCABULARY_FILE];

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "schema")]
enum NetworkDocument {
    #[serde(rename = "v1")]
    V1(BiLstmNetwork),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "schema")]
enum ScalerDocument {
    #[serde(rename = "v1")]
    V1 { mean: Vec<f64>, std: Vec<f64> },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "schema")]
enum VocabularyDocument {
    #[serde(rename = "v1")]
    V1 { labels: Vec<ExerciseType> },
}

/// Write all three artifact files into `dir`, creating it if needed.
///
/// # Errors
///
/// Returns [`ArtifactError::Io`] on filesystem failures.
pub fn save(state: &ClassifierState, dir: impl AsRef<Path>) -> Result<(), ArtifactError> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).map_err(|source| ArtifactError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    write_document(
        &dir.join(NETWORK_FILE),
        &NetworkDocument::V1(state.network().clone()),
    )?;
    write_document(
        &dir.join(SCALER_FILE),
        &ScalerDocument::V1 {
            mean: state.scaler().mean().to_vec(),
            std: state.scaler().std().to_vec(),
        },
    )?;
    write_document(
        &dir.join(VOCABULARY_FILE),
        &VocabularyDocument::V1 {
            labels: state.vocabulary().labels().to_vec(),
        },
    )?;

    info!(dir = %dir.display(), "saved classifier artifacts");
    Ok(())
}

/// Load a classifier state from `dir`.
///
/// Returns `Ok(None)` when none of the artifact files exist (including when
/// `dir` itself is missing).
///
/// # Errors
///
/// Returns an [`ArtifactError`] when only some files exist, a file cannot be
/// read or parsed, or the pieces do not fit together.
pub fn load(dir: impl AsRef<Path>) -> Result<Option<ClassifierState>, ArtifactError> {
    let dir = dir.as_ref();

    let mut present = Vec::new();
    let mut missing = Vec::new();
    for name in ALL_FILES {
        let path = dir.join(name);
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => present.push(name),
            Ok(_) => missing.push(name),
            Err(e) if e.kind() == ErrorKind::NotFound => missing.push(name),
            Err(source) => return Err(ArtifactError::Io { path, source }),
        }
    }

    if present.is_empty() {
        debug!(dir = %dir.display(), "no classifier artifacts found");
        return Ok(None);
    }
    if !missing.is_empty() {
        return Err(ArtifactError::Incomplete {
            dir: dir.to_path_buf(),
            missing,
        });
    }

    let NetworkDocument::V1(network) = read_document(&dir.join(NETWORK_FILE))?;
    let ScalerDocument::V1 { mean, std } = read_document(&dir.join(SCALER_FILE))?;
    let VocabularyDocument::V1 { labels } = read_document(&dir.join(VOCABULARY_FILE))?;

    let scaler = FeatureScaler::from_parts(mean, std)
        .map_err(|e| ArtifactError::incompatible(format!("scaler: {e}")))?;
    let vocabulary = LabelVocabulary::new(labels)
        .map_err(|e| ArtifactError::incompatible(format!("vocabulary: {e}")))?;
    let state = ClassifierState::new(network, scaler, vocabulary)
        .map_err(|e| ArtifactError::incompatible(e.to_string()))?;

    info!(
        dir = %dir.display(),
        input_width = state.input_width(),
        classes = state.vocabulary().len(),
        "loaded classifier artifacts"
    );
    Ok(Some(state))
}

fn write_document<T: Serialize>(path: &Path, document: &T) -> Result<(), ArtifactError> {
    let bytes = serde_json::to_vec_pretty(document).map_err(|source| ArtifactError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, bytes).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T, ArtifactError> {
    let bytes = fs::read(path).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| ArtifactError::Corrupt {
        path: PathBuf::from(path),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{Trainer, TrainingClip};
    use crate::config::EngineConfig;

    fn trained_state() -> ClassifierState {
        let config = EngineConfig::default()
            .with_max_seq_len(4)
            .with_hidden_size(3)
            .with_num_layers(1)
            .with_epochs(2);
        let clip = TrainingClip {
            features: vec![vec![0.0, 1.0], vec![0.5, 0.5], vec![1.0, 0.0]],
            label: ExerciseType::Squat,
        };
        Trainer::new(&config).fit(&[clip]).unwrap()
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let state = trained_state();
        save(&state, dir.path()).unwrap();

        let loaded = load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_absent_directory_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(dir.path().join("nothing-here")).unwrap().is_none());
        assert!(load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_partial_set_is_error() {
        let dir = tempfile::tempdir().unwrap();
        save(&trained_state(), dir.path()).unwrap();
        fs::remove_file(dir.path().join(SCALER_FILE)).unwrap();

        match load(dir.path()) {
            Err(ArtifactError::Incomplete { missing, .. }) => assert_eq!(missing, vec![SCALER_FILE]),
            other => panic!("expected Incomplete, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_schema_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        save(&trained_state(), dir.path()).unwrap();
        fs::write(
            dir.path().join(VOCABULARY_FILE),
            r#"{"schema":"v9","labels":["squat"]}"#,
        )
        .unwrap();

        assert!(matches!(load(dir.path()), Err(ArtifactError::Corrupt { .. })));
    }

    #[test]
    fn test_vocabulary_size_mismatch_is_incompatible() {
        let dir = tempfile::tempdir().unwrap();
        save(&trained_state(), dir.path()).unwrap();
        fs::write(
            dir.path().join(VOCABULARY_FILE),
            r#"{"schema":"v1","labels":["unknown","squat"]}"#,
        )
        .unwrap();

        assert!(matches!(load(dir.path()), Err(ArtifactError::Incompatible(_))));
    }

    #[test]
    fn test_scaler_width_mismatch_is_incompatible() {
        let dir = tempfile::tempdir().unwrap();
        save(&trained_state(), dir.path()).unwrap();
        fs::write(
            dir.path().join(SCALER_FILE),
            r#"{"schema":"v1","mean":[0.0],"std":[1.0]}"#,
        )
        .unwrap();

        assert!(matches!(load(dir.path()), Err(ArtifactError::Incompatible(_))));
    }

    #[test]
    fn test_documents_carry_schema_tag() {
        let dir = tempfile::tempdir().unwrap();
        save(&trained_state(), dir.path()).unwrap();
        let text = fs::read_to_string(dir.path().join(VOCABULARY_FILE)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["schema"], "v1");
    }
}
