//! Pipeline tests: CSV input, training, artifact persistence and the shape
//! of the classifier input.

use std::fmt::Write as _;
use std::sync::Arc;

use exercise_form::{
    aggregate_rows, artifacts, read_table, ArtifactError, EngineConfig, ExerciseEngine,
    ExerciseType, FeatureExtractor, KeypointRow, Landmark, Sequence, SequenceNormalizer, Trainer,
};

// =============================================================================
// HELPERS
// =============================================================================

/// Legs-only clip whose knees bend further each frame.
fn bending_rows(frames: u64, bend: f64) -> Vec<KeypointRow> {
    (0..frames)
        .flat_map(|i| {
            let offset = bend * i as f64;
            let kp = |l, x, y| KeypointRow::new(i, l, x, y, 0.9, 0.5, 0.5, 1.0);
            [
                kp(Landmark::LeftHip, -0.1, 0.0),
                kp(Landmark::RightHip, 0.1, 0.0),
                kp(Landmark::LeftKnee, -0.1 + offset, 0.3),
                kp(Landmark::RightKnee, 0.1 + offset, 0.3),
                kp(Landmark::LeftAnkle, -0.1, 0.6),
                kp(Landmark::RightAnkle, 0.1, 0.6),
            ]
        })
        .collect()
}

fn to_csv(rows: &[KeypointRow]) -> String {
    let mut text = String::from(
        "frame_id,landmark,x_norm,y_norm,visibility,center_x,center_y,unit_length,exercise_type,is_correct\n",
    );
    for r in rows {
        let opt = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_default();
        writeln!(
            text,
            "{},{},{},{},{},{},{},{},{},{}",
            r.frame_id.map(|v| v.to_string()).unwrap_or_default(),
            r.landmark.clone().unwrap_or_default(),
            opt(r.x_norm),
            opt(r.y_norm),
            opt(r.visibility),
            opt(r.center_x),
            opt(r.center_y),
            opt(r.unit_length),
            r.exercise_type.clone().unwrap_or_default(),
            r.is_correct.map(|v| v.to_string()).unwrap_or_default(),
        )
        .unwrap();
    }
    text
}

fn small_config() -> EngineConfig {
    EngineConfig::default()
        .with_max_seq_len(6)
        .with_hidden_size(4)
        .with_num_layers(1)
        .with_epochs(5)
}

fn labelled(rows: Vec<KeypointRow>, label: ExerciseType) -> Sequence {
    aggregate_rows(rows.into_iter().map(|r| r.with_label(label, true))).unwrap()
}

// =============================================================================
// CSV
// =============================================================================

#[test]
fn test_csv_round_trip_matches_rows() {
    let rows = bending_rows(8, 0.05);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clip.csv");
    std::fs::write(&path, to_csv(&rows)).unwrap();

    let engine = ExerciseEngine::new(EngineConfig::default()).unwrap();
    let from_file = engine.analyze_csv(&path).unwrap();
    let from_rows = engine.analyze_rows(rows).unwrap();

    assert_eq!(from_file, from_rows);
    assert_eq!(from_file.frame_count, 8);
}

#[test]
fn test_csv_labels_survive() {
    let rows: Vec<KeypointRow> = bending_rows(3, 0.1)
        .into_iter()
        .map(|r| r.with_label(ExerciseType::LongJump, false))
        .collect();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("labelled.csv");
    std::fs::write(&path, to_csv(&rows)).unwrap();

    let sequence = aggregate_rows(read_table(&path).unwrap()).unwrap();
    let label = sequence.label().unwrap();
    assert_eq!(label.exercise_type, ExerciseType::LongJump);
    assert!(!label.is_correct);
}

// =============================================================================
// ARTIFACTS
// =============================================================================

#[test]
fn test_trained_artifacts_reload_into_engine() {
    let config = small_config();
    let clips = vec![
        labelled(bending_rows(5, 0.08), ExerciseType::Squat),
        labelled(bending_rows(7, 0.0), ExerciseType::Unknown),
    ];
    let state = Trainer::new(&config).fit_sequences(&clips).unwrap();

    let dir = tempfile::tempdir().unwrap();
    artifacts::save(&state, dir.path()).unwrap();
    for file in [artifacts::NETWORK_FILE, artifacts::SCALER_FILE, artifacts::VOCABULARY_FILE] {
        assert!(dir.path().join(file).is_file(), "{file} missing");
    }

    let in_memory = ExerciseEngine::new(config.clone())
        .unwrap()
        .with_classifier(Arc::new(state))
        .unwrap();
    let reloaded = ExerciseEngine::with_artifacts(config, dir.path()).unwrap();
    assert!(reloaded.has_classifier());

    let clip = &clips[0];
    let expected = in_memory.analyze_sequence(clip).unwrap();
    let actual = reloaded.analyze_sequence(clip).unwrap();
    assert_eq!(expected, actual);
    assert!(actual.decision.classifier.is_some());
}

#[test]
fn test_missing_artifacts_mean_heuristic_only() {
    let dir = tempfile::tempdir().unwrap();
    assert!(artifacts::load(dir.path()).unwrap().is_none());

    let engine = ExerciseEngine::with_artifacts(EngineConfig::default(), dir.path()).unwrap();
    assert!(!engine.has_classifier());
    let analysis = engine.analyze_rows(bending_rows(4, 0.1)).unwrap();
    assert!(analysis.decision.classifier.is_none());
    assert_eq!(analysis.confidence, 0.0);
}

#[test]
fn test_partial_artifacts_are_reported() {
    let config = small_config();
    let state = Trainer::new(&config)
        .fit_sequences(&[labelled(bending_rows(4, 0.1), ExerciseType::Squat)])
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    artifacts::save(&state, dir.path()).unwrap();
    std::fs::remove_file(dir.path().join(artifacts::SCALER_FILE)).unwrap();

    assert!(matches!(
        artifacts::load(dir.path()),
        Err(ArtifactError::Incomplete { .. })
    ));
    let engine = ExerciseEngine::with_artifacts(config, dir.path()).unwrap();
    assert!(!engine.has_classifier());
}

// =============================================================================
// SEQUENCE SHAPE
// =============================================================================

#[test]
fn test_short_clip_gets_one_padding_row() {
    let config = small_config();
    let sequence = aggregate_rows(bending_rows(5, 0.05)).unwrap();
    let features = FeatureExtractor::new(&config).extract_sequence(&sequence);

    let normalized = SequenceNormalizer::new(config.max_seq_len)
        .normalize(&features)
        .unwrap();

    assert_eq!(normalized.len(), 6);
    assert_eq!(normalized.width(), config.sequence_width());
    assert_eq!(normalized.real_rows(), 5);
    assert!(normalized.matrix().row(5).iter().all(|&v| v == 0.0));
    assert!(normalized.matrix().row(4).iter().any(|&v| v != 0.0));
}

#[test]
fn test_long_clip_keeps_leading_frames() {
    let config = small_config();
    let sequence = aggregate_rows(bending_rows(9, 0.05)).unwrap();
    let extractor = FeatureExtractor::new(&config);
    let features = extractor.extract_sequence(&sequence);
    let width = extractor.width();

    let normalized = SequenceNormalizer::new(config.max_seq_len)
        .normalize(&features)
        .unwrap();

    assert_eq!(normalized.len(), 6);
    assert_eq!(normalized.real_rows(), 6);
    for (r, frame) in features.iter().take(6).enumerate() {
        let row = normalized.matrix().row(r);
        for (c, &value) in frame.iter().enumerate() {
            assert_eq!(row[c], value);
        }
    }

    // The last kept row still carries the step into the first dropped frame.
    let last = normalized.matrix().row(5);
    for c in 0..width {
        assert_eq!(last[width + c], features[6][c] - features[5][c]);
    }
}

#[test]
fn test_feature_width_follows_config() {
    let config = EngineConfig::default().with_landmarks(vec![Landmark::LeftHip, Landmark::RightHip]);
    let extractor = FeatureExtractor::new(&config);
    let sequence = aggregate_rows(bending_rows(2, 0.1)).unwrap();

    let features = extractor.extract_sequence(&sequence);
    assert_eq!(features.len(), 2);
    assert!(features.iter().all(|f| f.len() == extractor.width()));
    assert_eq!(extractor.column_names().len(), extractor.width());
}
