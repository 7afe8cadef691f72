//! The calibration artifact: everything serving needs, nothing more.
//!
//! # Text format
//!
//! ```text
//! <lambda_hat>
//! <gamma>
//! <c_reg>
//! <min>
//! <max>
//! <schedule length>
//! <effort_0> <effort_1> ... <effort_{len-1}>
//! ```
//!
//! Floats are written in their shortest round-trip form, so a saved artifact loads
//! back bit-identical. Reading trims surrounding whitespace, skips blank lines and
//! accepts the schedule values split across several lines.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::calibration::matrix::NormalizationBounds;
use crate::calibration::regularize::Regularization;
use crate::schedule::EffortSchedule;
use crate::{Result, RetrieveError};

/// Errors reading or writing a calibration artifact.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Artifact file does not exist
    #[error("calibration artifact not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Content does not parse or violates an artifact invariant
    #[error("corrupt calibration artifact at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },
}

/// Calibrated stopping rule.
///
/// Immutable after construction. A query at schedule position `p` with k-th
/// neighbor distance `d` stops when
/// `clamp((d - min) / (max - min), 0, 1) + gamma * max(0, p - c_reg) <= lambda_hat`,
/// or unconditionally at the last position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawArtifact")]
pub struct CalibrationArtifact {
    lambda_hat: f32,
    regularization: Regularization,
    bounds: NormalizationBounds,
    schedule: EffortSchedule,
}

/// Unvalidated serde form; every deserialized artifact goes through `new`.
#[derive(Deserialize)]
struct RawArtifact {
    lambda_hat: f32,
    regularization: Regularization,
    bounds: NormalizationBounds,
    schedule: EffortSchedule,
}

impl TryFrom<RawArtifact> for CalibrationArtifact {
    type Error = RetrieveError;

    fn try_from(raw: RawArtifact) -> Result<Self> {
        Self::new(raw.lambda_hat, raw.regularization, raw.bounds, raw.schedule)
    }
}

/// Upper bound on schedule slots reserved before any effort is parsed.
const MAX_PREALLOCATED_EFFORTS: usize = 4096;

impl CalibrationArtifact {
    /// Assemble an artifact, validating every component.
    pub fn new(
        lambda_hat: f32,
        regularization: Regularization,
        bounds: NormalizationBounds,
        schedule: EffortSchedule,
    ) -> Result<Self> {
        if !lambda_hat.is_finite() {
            return Err(RetrieveError::InvalidParameter(format!(
                "lambda_hat must be finite, got {lambda_hat}"
            )));
        }
        regularization.validate()?;
        let bounds = NormalizationBounds::new(bounds.min, bounds.max)?;
        Ok(Self {
            lambda_hat,
            regularization,
            bounds,
            schedule,
        })
    }

    /// Calibrated threshold.
    pub fn lambda_hat(&self) -> f32 {
        self.lambda_hat
    }

    /// Position penalty.
    pub fn regularization(&self) -> Regularization {
        self.regularization
    }

    /// Calibration-time normalization bounds.
    pub fn bounds(&self) -> NormalizationBounds {
        self.bounds
    }

    /// Effort schedule.
    pub fn schedule(&self) -> &EffortSchedule {
        &self.schedule
    }

    /// Regularized serving score of a k-th neighbor distance at `position`.
    #[inline]
    pub fn score(&self, kth_distance: f32, position: usize) -> f32 {
        self.regularization
            .apply(self.bounds.normalize_clamped(kth_distance), position)
    }

    /// Whether a query with this k-th distance stops at `position`.
    ///
    /// Always true at the last schedule position. A NaN distance never passes the
    /// threshold on its own.
    #[inline]
    pub fn resolves(&self, kth_distance: f32, position: usize) -> bool {
        self.score(kth_distance, position) <= self.lambda_hat || self.schedule.is_final(position)
    }

    /// Write the text format.
    pub fn write_to<W: Write>(&self, mut writer: W) -> std::result::Result<(), ArtifactError> {
        writeln!(writer, "{}", self.lambda_hat)?;
        writeln!(writer, "{}", self.regularization.gamma)?;
        writeln!(writer, "{}", self.regularization.c_reg)?;
        writeln!(writer, "{}", self.bounds.min)?;
        writeln!(writer, "{}", self.bounds.max)?;
        writeln!(writer, "{}", self.schedule.len())?;
        let efforts: Vec<String> = self.schedule.efforts().iter().map(|e| e.to_string()).collect();
        writeln!(writer, "{}", efforts.join(" "))?;
        writer.flush()?;
        Ok(())
    }

    /// Parse the text format.
    pub fn read_from<R: BufRead>(reader: R) -> std::result::Result<Self, ArtifactError> {
        let mut lines = Lines::new(reader);

        let lambda_hat: f32 = lines.scalar("lambda_hat")?;
        let gamma: f32 = lines.scalar("gamma")?;
        let c_reg: usize = lines.scalar("c_reg")?;
        let min: f32 = lines.scalar("min")?;
        let max: f32 = lines.scalar("max")?;
        let len: usize = lines.scalar("schedule length")?;

        // `len` is untrusted; growth follows the efforts actually read.
        let mut efforts = Vec::with_capacity(len.min(MAX_PREALLOCATED_EFFORTS));
        let mut last_line = lines.line;
        while efforts.len() < len {
            let Some((line, text)) = lines.next_nonblank()? else {
                return Err(ArtifactError::Corrupt {
                    line: last_line + 1,
                    reason: format!("schedule ends after {} of {len} efforts", efforts.len()),
                });
            };
            last_line = line;
            for token in text.split_whitespace() {
                if efforts.len() == len {
                    return Err(ArtifactError::Corrupt {
                        line,
                        reason: format!("more than {len} schedule efforts"),
                    });
                }
                efforts.push(token.parse::<usize>().map_err(|e| ArtifactError::Corrupt {
                    line,
                    reason: format!("bad schedule effort {token:?}: {e}"),
                })?);
            }
        }
        if let Some((line, _)) = lines.next_nonblank()? {
            return Err(ArtifactError::Corrupt {
                line,
                reason: "trailing content after schedule".into(),
            });
        }

        let corrupt = |reason: String| ArtifactError::Corrupt {
            line: last_line,
            reason,
        };
        let schedule = EffortSchedule::new(efforts).map_err(|e| corrupt(e.to_string()))?;
        let regularization = Regularization { gamma, c_reg };
        let bounds = NormalizationBounds { min, max };
        Self::new(lambda_hat, regularization, bounds, schedule).map_err(|e| corrupt(e.to_string()))
    }

    /// Write the artifact to `path`, replacing any existing file.
    pub fn save(&self, path: impl AsRef<Path>) -> std::result::Result<(), ArtifactError> {
        let path = path.as_ref();
        let file = File::create(path)?;
        self.write_to(BufWriter::new(file))?;
        tracing::info!(path = %path.display(), lambda_hat = self.lambda_hat, "saved calibration artifact");
        Ok(())
    }

    /// Load an artifact from `path`.
    pub fn load(path: impl AsRef<Path>) -> std::result::Result<Self, ArtifactError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ArtifactError::NotFound(path.to_path_buf()),
            _ => ArtifactError::Io(e),
        })?;
        let artifact = Self::read_from(BufReader::new(file))?;
        tracing::info!(
            path = %path.display(),
            lambda_hat = artifact.lambda_hat,
            positions = artifact.schedule.len(),
            "loaded calibration artifact"
        );
        Ok(artifact)
    }
}

/// Line reader that tracks 1-based line numbers and skips blank lines.
struct Lines<R> {
    reader: R,
    line: usize,
    buf: String,
}

impl<R: BufRead> Lines<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            line: 0,
            buf: String::new(),
        }
    }

    fn next_nonblank(&mut self) -> std::result::Result<Option<(usize, String)>, ArtifactError> {
        loop {
            self.buf.clear();
            if self.reader.read_line(&mut self.buf)? == 0 {
                return Ok(None);
            }
            self.line += 1;
            let trimmed = self.buf.trim();
            if !trimmed.is_empty() {
                return Ok(Some((self.line, trimmed.to_string())));
            }
        }
    }

    fn scalar<T>(&mut self, field: &str) -> std::result::Result<T, ArtifactError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        let Some((line, text)) = self.next_nonblank()? else {
            return Err(ArtifactError::Corrupt {
                line: self.line + 1,
                reason: format!("missing {field}"),
            });
        };
        text.parse().map_err(|e| ArtifactError::Corrupt {
            line,
            reason: format!("bad {field} {text:?}: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact() -> CalibrationArtifact {
        CalibrationArtifact::new(
            0.235,
            Regularization::default(),
            NormalizationBounds {
                min: 10_423.5,
                max: 198_220.5,
            },
            EffortSchedule::linear(1, 101, 20).unwrap(),
        )
        .unwrap()
    }

    fn parse(text: &str) -> std::result::Result<CalibrationArtifact, ArtifactError> {
        CalibrationArtifact::read_from(text.as_bytes())
    }

    #[test]
    fn text_layout() {
        let mut buf = Vec::new();
        artifact().write_to(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(
            text,
            "0.235\n0.01\n2\n10423.5\n198220.5\n6\n1 21 41 61 81 101\n"
        );
        assert_eq!(parse(&text).unwrap(), artifact());
    }

    #[test]
    fn whitespace_tolerant() {
        let text = "  0.5 \n\n0\n 0\n1\n2.5\n3\n1 2\n\t3  \n\n";
        let a = parse(text).unwrap();
        assert_eq!(a.lambda_hat(), 0.5);
        assert_eq!(a.schedule().efforts(), &[1, 2, 3]);
        assert_eq!(a.bounds().max, 2.5);
    }

    #[test]
    fn corrupt_inputs_name_the_line() {
        let cases = [
            ("", 1),
            ("abc\n", 1),
            ("0.5\n0.01\n2\n1\n2\n3\n1 2\n", 8),
            ("0.5\n0.01\n2\n1\n2\n2\n1 2 3\n", 7),
            ("0.5\n0.01\n2\n1\n2\n2\n1 x\n", 7),
            ("0.5\n0.01\n2\n1\n2\n2\n1 2\nextra\n", 8),
            ("0.5\n0.01\n2\n1\n2\n18446744073709551615\n1 2\n", 8),
        ];
        for (text, expected_line) in cases {
            match parse(text) {
                Err(ArtifactError::Corrupt { line, .. }) => {
                    assert_eq!(line, expected_line, "input {text:?}")
                }
                other => panic!("expected corrupt for {text:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn invariant_violations_are_corrupt() {
        // schedule not increasing
        assert!(matches!(
            parse("0.5\n0.01\n2\n1\n2\n2\n5 5\n"),
            Err(ArtifactError::Corrupt { .. })
        ));
        // min == max
        assert!(matches!(
            parse("0.5\n0.01\n2\n1\n1\n1\n5\n"),
            Err(ArtifactError::Corrupt { .. })
        ));
        // negative gamma
        assert!(matches!(
            parse("0.5\n-1\n2\n1\n2\n1\n5\n"),
            Err(ArtifactError::Corrupt { .. })
        ));
    }

    #[test]
    fn serving_score_clamps_and_penalizes() {
        let a = CalibrationArtifact::new(
            0.3,
            Regularization::new(0.1, 1).unwrap(),
            NormalizationBounds { min: 0.0, max: 2.0 },
            EffortSchedule::new(vec![1, 2, 4, 8]).unwrap(),
        )
        .unwrap();
        assert_eq!(a.score(1.0, 0), 0.5);
        assert_eq!(a.score(-5.0, 1), 0.0);
        assert!((a.score(0.0, 3) - 0.2).abs() < 1e-6);
        assert_eq!(a.score(f32::INFINITY, 0), 1.0);
        assert!(a.resolves(0.2, 0));
        assert!(!a.resolves(1.0, 2));
        assert!(a.resolves(1.0, 3));
        assert!(a.resolves(f32::NAN, 3));
        assert!(!a.resolves(f32::NAN, 0));
    }

    #[test]
    fn load_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.txt");
        assert!(matches!(
            CalibrationArtifact::load(&path),
            Err(ArtifactError::NotFound(p)) if p == path
        ));
    }

    #[test]
    fn serde_json_round_trip() {
        let json = serde_json::to_string(&artifact()).unwrap();
        let back: CalibrationArtifact = serde_json::from_str(&json).unwrap();
        assert_eq!(back, artifact());
    }

    #[test]
    fn serde_rejects_invalid_artifacts() {
        let json = |gamma: f32, min: f32, max: f32| {
            format!(
                r#"{{"lambda_hat":0.5,"regularization":{{"gamma":{gamma},"c_reg":2}},"bounds":{{"min":{min},"max":{max}}},"schedule":[1,2]}}"#
            )
        };
        assert!(serde_json::from_str::<CalibrationArtifact>(&json(0.01, 1.0, 2.0)).is_ok());
        assert!(serde_json::from_str::<CalibrationArtifact>(&json(0.01, 1.0, 1.0)).is_err());
        assert!(serde_json::from_str::<CalibrationArtifact>(&json(-3.0, 1.0, 2.0)).is_err());
        assert!(serde_json::from_str::<CalibrationArtifact>(&json(0.01, 2.0, 1.0)).is_err());
        assert!(serde_json::from_str::<NormalizationBounds>(r#"{"min":1.0,"max":1.0}"#).is_err());
        assert!(serde_json::from_str::<Regularization>(r#"{"gamma":-1.0,"c_reg":0}"#).is_err());
    }
}
