//! Whole-clip verdict types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Exercise category of a clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExerciseType {
    /// Nothing recognised.
    #[default]
    Unknown,
    Squat,
    Pushup,
    LongJump,
}

impl ExerciseType {
    /// All exercise types, `Unknown` first.
    pub const ALL: [Self; 4] = [Self::Unknown, Self::Squat, Self::Pushup, Self::LongJump];

    /// Canonical label string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Squat => "squat",
            Self::Pushup => "pushup",
            Self::LongJump => "long_jump",
        }
    }

    /// Whether a real exercise was recognised.
    #[must_use]
    pub const fn is_known(self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl fmt::Display for ExerciseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned for an unrecognised exercise label.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown exercise label '{0}'")]
pub struct UnknownExercise(pub String);

impl FromStr for ExerciseType {
    type Err = UnknownExercise;

    /// Accepts the canonical labels plus the `push_up` / `push-up` /
    /// `long-jump` spellings used by annotation tools.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "unknown" | "" => Ok(Self::Unknown),
            "squat" => Ok(Self::Squat),
            "pushup" | "push_up" => Ok(Self::Pushup),
            "long_jump" | "longjump" => Ok(Self::LongJump),
            _ => Err(UnknownExercise(s.to_string())),
        }
    }
}

/// Execution quality verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Correctness {
    #[default]
    Unknown,
    Correct,
    Incorrect,
}

impl Correctness {
    /// Map a predicate outcome to a verdict.
    #[must_use]
    pub const fn from_bool(correct: bool) -> Self {
        if correct {
            Self::Correct
        } else {
            Self::Incorrect
        }
    }

    /// Canonical label string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Correct => "correct",
            Self::Incorrect => "incorrect",
        }
    }
}

impl fmt::Display for Correctness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One verdict per clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Prediction {
    pub exercise_type: ExerciseType,
    pub correctness: Correctness,
}

impl Prediction {
    /// The "looked and found nothing" verdict.
    pub const UNKNOWN: Self = Self {
        exercise_type: ExerciseType::Unknown,
        correctness: Correctness::Unknown,
    };

    /// Build a verdict, forcing `Unknown` correctness for an unknown type.
    #[must_use]
    pub const fn new(exercise_type: ExerciseType, correctness: Correctness) -> Self {
        let correctness = if exercise_type.is_known() {
            correctness
        } else {
            Correctness::Unknown
        };
        Self {
            exercise_type,
            correctness,
        }
    }

    /// `true` when no exercise was recognised.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        !self.exercise_type.is_known()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_labels() {
        assert_eq!("push_up".parse::<ExerciseType>(), Ok(ExerciseType::Pushup));
        assert_eq!("Push-Up".parse::<ExerciseType>(), Ok(ExerciseType::Pushup));
        assert_eq!("long_jump".parse::<ExerciseType>(), Ok(ExerciseType::LongJump));
        assert_eq!("squat".parse::<ExerciseType>(), Ok(ExerciseType::Squat));
        assert!("burpee".parse::<ExerciseType>().is_err());
    }

    #[test]
    fn test_unknown_type_forces_unknown_correctness() {
        let p = Prediction::new(ExerciseType::Unknown, Correctness::Incorrect);
        assert_eq!(p, Prediction::UNKNOWN);
        assert!(p.is_empty());
    }

    #[test]
    fn test_serde_labels() {
        let p = Prediction::new(ExerciseType::LongJump, Correctness::Correct);
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, r#"{"exercise_type":"long_jump","correctness":"correct"}"#);
    }
}
