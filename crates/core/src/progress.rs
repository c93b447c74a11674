// crates/core/src/progress.rs
//! Progress normalization.
//!
//! Pipelines report phase-local signals ("unit 3 of 12 in extraction",
//! "merge 50% done", "token chunk"). The [`ProgressNormalizer`] maps them onto
//! one 0-100 scale using fixed phase bands and turns them into canonical
//! [`ProgressEvent`]s. Bands never overlap and are ordered, and the
//! normalizer never reports a value lower than one it already reported, so the
//! overall progress is non-decreasing whatever order signals arrive in.
//!
//! Pure: no I/O, no clocks other than the event timestamp.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::{
    Citation, EventPayload, ProgressEvent, ProgressUpdate, TokenUsage, ToolEvent, Warning,
};
use crate::types::JobId;

/// Named sub-stage of processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initializing,
    Download,
    Chunking,
    Extraction,
    Merge,
    Save,
    Generation,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Download => "download",
            Self::Chunking => "chunking",
            Self::Extraction => "extraction",
            Self::Merge => "merge",
            Self::Save => "save",
            Self::Generation => "generation",
        }
    }
}

/// The slice of the overall scale a phase occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseBand {
    pub phase: Phase,
    pub min: u8,
    pub max: u8,
}

impl PhaseBand {
    pub const fn new(phase: Phase, min: u8, max: u8) -> Self {
        Self { phase, min, max }
    }

    /// Linear position inside the band for `done` out of `of`.
    fn at(&self, done: u32, of: u32) -> u8 {
        if of == 0 {
            return self.min;
        }
        let span = u32::from(self.max - self.min);
        let done = done.min(of);
        // u64 so large unit counts cannot overflow the product.
        let offset = u64::from(span) * u64::from(done) / u64::from(of);
        self.min + offset as u8
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WeightsError {
    #[error("Phase {phase} has min {min} above max {max}")]
    Inverted { phase: &'static str, min: u8, max: u8 },

    #[error("Phase {phase} ends above 100 ({max})")]
    OutOfRange { phase: &'static str, max: u8 },

    #[error("Phase {phase} starts at {min}, before the previous phase ends at {previous_max}")]
    Overlap {
        phase: &'static str,
        min: u8,
        previous_max: u8,
    },

    #[error("Phase {0} appears more than once")]
    Duplicate(&'static str),
}

/// Ordered, non-overlapping phase bands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseWeights {
    bands: Vec<PhaseBand>,
}

impl PhaseWeights {
    /// Validate and build a band table. Each band's `min` must be at least the
    /// previous band's `max`.
    pub fn new(bands: Vec<PhaseBand>) -> Result<Self, WeightsError> {
        let mut previous_max = 0u8;
        for (i, band) in bands.iter().enumerate() {
            let name = band.phase.as_str();
            if band.min > band.max {
                return Err(WeightsError::Inverted {
                    phase: name,
                    min: band.min,
                    max: band.max,
                });
            }
            if band.max > 100 {
                return Err(WeightsError::OutOfRange {
                    phase: name,
                    max: band.max,
                });
            }
            if band.min < previous_max {
                return Err(WeightsError::Overlap {
                    phase: name,
                    min: band.min,
                    previous_max,
                });
            }
            if bands[..i].iter().any(|b| b.phase == band.phase) {
                return Err(WeightsError::Duplicate(name));
            }
            previous_max = band.max;
        }
        Ok(Self { bands })
    }

    /// Bands for chunked document extraction.
    pub fn extraction() -> Self {
        Self {
            bands: vec![
                PhaseBand::new(Phase::Initializing, 0, 5),
                PhaseBand::new(Phase::Download, 5, 10),
                PhaseBand::new(Phase::Chunking, 10, 10),
                PhaseBand::new(Phase::Extraction, 10, 80),
                PhaseBand::new(Phase::Merge, 80, 90),
                PhaseBand::new(Phase::Save, 90, 100),
            ],
        }
    }

    /// Bands for token-by-token chat generation.
    pub fn generation() -> Self {
        Self {
            bands: vec![
                PhaseBand::new(Phase::Initializing, 0, 5),
                PhaseBand::new(Phase::Generation, 5, 95),
                PhaseBand::new(Phase::Save, 95, 100),
            ],
        }
    }

    pub fn band(&self, phase: Phase) -> Option<&PhaseBand> {
        self.bands.iter().find(|b| b.phase == phase)
    }
}

impl Default for PhaseWeights {
    fn default() -> Self {
        Self::extraction()
    }
}

/// A raw signal reported by a pipeline at a unit boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// Entered or advanced inside a phase; `percent` is phase-local (0-100).
    Phase {
        phase: Phase,
        percent: u8,
        message: String,
    },
    /// `completed` of `total` units done inside a phase.
    Units {
        phase: Phase,
        completed: u32,
        total: u32,
        message: String,
    },
    /// A unit failed transiently; processing continues.
    Warning {
        phase: Phase,
        message: String,
        retry_count: u32,
        max_retries: u32,
    },
    Chunk(String),
    Reasoning(String),
    Citations(Vec<Citation>),
    Usage(TokenUsage),
    Tool(ToolEvent),
}

impl Signal {
    pub fn phase(phase: Phase, percent: u8, message: impl Into<String>) -> Self {
        Self::Phase {
            phase,
            percent,
            message: message.into(),
        }
    }

    pub fn units(phase: Phase, completed: u32, total: u32, message: impl Into<String>) -> Self {
        Self::Units {
            phase,
            completed,
            total,
            message: message.into(),
        }
    }
}

/// Stateful mapper from [`Signal`]s to [`ProgressEvent`]s for one job.
#[derive(Debug, Clone)]
pub struct ProgressNormalizer {
    weights: PhaseWeights,
    progress: u8,
    phase: Phase,
    total_units: Option<u32>,
    completed_units: Option<u32>,
}

impl ProgressNormalizer {
    pub fn new(weights: PhaseWeights) -> Self {
        Self {
            weights,
            progress: 0,
            phase: Phase::Initializing,
            total_units: None,
            completed_units: None,
        }
    }

    /// Highest progress reported so far.
    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Turn one signal into the canonical event for `job_id`.
    pub fn normalize(&mut self, job_id: &JobId, signal: Signal) -> ProgressEvent {
        let payload = match signal {
            Signal::Phase {
                phase,
                percent,
                message,
            } => {
                let percent = u32::from(percent.min(100));
                self.advance(phase, |band| band.at(percent, 100));
                EventPayload::Progress(self.update(message, None))
            }
            Signal::Units {
                phase,
                completed,
                total,
                message,
            } => {
                self.total_units = Some(total);
                self.completed_units = Some(completed.min(total));
                self.advance(phase, |band| band.at(completed, total));
                EventPayload::Progress(self.update(message, None))
            }
            Signal::Warning {
                phase,
                message,
                retry_count,
                max_retries,
            } => {
                self.advance(phase, |band| band.min);
                let warning = Warning {
                    message: message.clone(),
                    retry_count,
                    max_retries,
                };
                EventPayload::Progress(self.update(message, Some(warning)))
            }
            Signal::Chunk(content) => EventPayload::Chunk { content },
            Signal::Reasoning(content) => EventPayload::Reasoning { content },
            Signal::Citations(citations) => EventPayload::Citations { citations },
            Signal::Usage(usage) => EventPayload::Usage(usage),
            Signal::Tool(tool) => EventPayload::Tool(tool),
        };
        ProgressEvent::new(job_id.clone(), payload)
    }

    fn advance(&mut self, phase: Phase, position: impl FnOnce(&PhaseBand) -> u8) {
        let Some(band) = self.weights.band(phase) else {
            // Unknown phases carry no weight; progress stays where it is.
            self.phase = phase;
            return;
        };
        self.phase = phase;
        self.progress = self.progress.max(position(band));
    }

    fn update(&self, message: String, warning: Option<Warning>) -> ProgressUpdate {
        ProgressUpdate {
            phase: self.phase.as_str().to_string(),
            progress: self.progress,
            message,
            completed_units: self.completed_units,
            total_units: self.total_units,
            warning,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress_of(event: &ProgressEvent) -> u8 {
        match &event.payload {
            EventPayload::Progress(update) => update.progress,
            other => panic!("expected progress payload, got {other:?}"),
        }
    }

    #[test]
    fn test_extraction_units_interpolate_linearly() {
        let job = JobId::from("j-1");
        let mut n = ProgressNormalizer::new(PhaseWeights::extraction());

        let seen: Vec<u8> = (1..=4)
            .map(|done| progress_of(&n.normalize(&job, Signal::units(Phase::Extraction, done, 4, ""))))
            .collect();
        assert_eq!(seen, vec![27, 45, 62, 80]);

        assert_eq!(progress_of(&n.normalize(&job, Signal::phase(Phase::Merge, 0, "merging"))), 80);
        assert_eq!(progress_of(&n.normalize(&job, Signal::phase(Phase::Merge, 100, "merged"))), 90);
        assert_eq!(progress_of(&n.normalize(&job, Signal::phase(Phase::Save, 100, "saved"))), 100);
    }

    #[test]
    fn test_full_sequence_is_non_decreasing() {
        let job = JobId::from("j-2");
        let mut n = ProgressNormalizer::new(PhaseWeights::extraction());
        let signals = vec![
            Signal::phase(Phase::Initializing, 100, ""),
            Signal::phase(Phase::Download, 0, "downloading"),
            Signal::phase(Phase::Download, 100, "downloaded"),
            Signal::phase(Phase::Chunking, 100, "planned 3 chunks"),
            Signal::units(Phase::Extraction, 0, 3, ""),
            // Parallel units may complete out of order.
            Signal::units(Phase::Extraction, 2, 3, ""),
            Signal::units(Phase::Extraction, 1, 3, ""),
            Signal::Warning {
                phase: Phase::Extraction,
                message: "chunk 2 failed".into(),
                retry_count: 2,
                max_retries: 2,
            },
            Signal::units(Phase::Extraction, 3, 3, ""),
            // A late signal from an earlier phase must not pull progress back.
            Signal::phase(Phase::Download, 50, ""),
            Signal::phase(Phase::Merge, 50, ""),
            Signal::phase(Phase::Save, 100, ""),
        ];

        let mut last = 0;
        for signal in signals {
            let p = progress_of(&n.normalize(&job, signal));
            assert!(p >= last, "progress went from {last} to {p}");
            last = p;
        }
        assert_eq!(last, 100);
    }

    #[test]
    fn test_zero_total_units_reports_band_start() {
        let job = JobId::from("j-3");
        let mut n = ProgressNormalizer::new(PhaseWeights::extraction());
        let event = n.normalize(&job, Signal::units(Phase::Extraction, 0, 0, ""));
        assert_eq!(progress_of(&event), 10);
    }

    #[test]
    fn test_completed_above_total_is_capped() {
        let job = JobId::from("j-4");
        let mut n = ProgressNormalizer::new(PhaseWeights::extraction());
        let event = n.normalize(&job, Signal::units(Phase::Extraction, 9, 4, ""));
        assert_eq!(progress_of(&event), 80);
        match event.payload {
            EventPayload::Progress(update) => {
                assert_eq!(update.completed_units, Some(4));
                assert_eq!(update.total_units, Some(4));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_warning_keeps_progress_and_carries_detail() {
        let job = JobId::from("j-5");
        let mut n = ProgressNormalizer::new(PhaseWeights::extraction());
        n.normalize(&job, Signal::units(Phase::Extraction, 2, 4, ""));
        let event = n.normalize(
            &job,
            Signal::Warning {
                phase: Phase::Extraction,
                message: "pages 5-8 failed".into(),
                retry_count: 1,
                max_retries: 2,
            },
        );
        match event.payload {
            EventPayload::Progress(update) => {
                assert_eq!(update.progress, 45);
                let warning = update.warning.expect("warning attached");
                assert_eq!(warning.retry_count, 1);
                assert_eq!(warning.max_retries, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_phase_does_not_move_progress() {
        let job = JobId::from("j-6");
        let mut n = ProgressNormalizer::new(PhaseWeights::extraction());
        n.normalize(&job, Signal::phase(Phase::Download, 100, ""));
        let event = n.normalize(&job, Signal::phase(Phase::Generation, 100, ""));
        assert_eq!(progress_of(&event), 10);
        assert_eq!(n.phase(), Phase::Generation);
    }

    #[test]
    fn test_stream_signals_pass_through() {
        let job = JobId::from("j-7");
        let mut n = ProgressNormalizer::new(PhaseWeights::generation());
        let event = n.normalize(&job, Signal::Chunk("hel".into()));
        assert_eq!(event.payload, EventPayload::Chunk { content: "hel".into() });
        let event = n.normalize(
            &job,
            Signal::Usage(TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
        );
        assert_eq!(event.event_name(), "usage");
        assert_eq!(n.progress(), 0);
    }

    #[test]
    fn test_weights_validation() {
        assert!(PhaseWeights::new(PhaseWeights::extraction().bands.clone()).is_ok());
        assert!(PhaseWeights::new(PhaseWeights::generation().bands.clone()).is_ok());

        let overlap = PhaseWeights::new(vec![
            PhaseBand::new(Phase::Download, 0, 20),
            PhaseBand::new(Phase::Extraction, 15, 80),
        ]);
        assert_eq!(
            overlap,
            Err(WeightsError::Overlap {
                phase: "extraction",
                min: 15,
                previous_max: 20
            })
        );

        let inverted = PhaseWeights::new(vec![PhaseBand::new(Phase::Merge, 90, 80)]);
        assert!(matches!(inverted, Err(WeightsError::Inverted { .. })));

        let out_of_range = PhaseWeights::new(vec![PhaseBand::new(Phase::Save, 90, 120)]);
        assert!(matches!(out_of_range, Err(WeightsError::OutOfRange { .. })));

        let duplicate = PhaseWeights::new(vec![
            PhaseBand::new(Phase::Save, 0, 10),
            PhaseBand::new(Phase::Save, 10, 20),
        ]);
        assert_eq!(duplicate, Err(WeightsError::Duplicate("save")));
    }
}
