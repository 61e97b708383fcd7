use crate::volume::{NormalizedVolume, Volume};

use ndarray::Zip;
use thiserror::Error;
use tracing::instrument;

#[derive(Debug, Error, PartialEq)]
pub enum NormalizeError {
    #[error("Invalid clip range [{low}, {high}]")]
    InvalidClipRange { low: f32, high: f32 },

    #[error("Invalid-value substitute must be finite, got {0}")]
    InvalidSentinel(f32),
}

/// Intensity window mapping raw samples into `[0, 1]`.
///
/// The defaults are a CT soft-tissue window in Hounsfield units: air at
/// -1024 maps to 0, 300 maps to 1, and missing readings count as -2000.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntensityWindow {
    pub low_clip: f32,
    pub high_clip: f32,
    /// Substituted for NaN samples before windowing.
    pub invalid_value: f32,
}

impl Default for IntensityWindow {
    fn default() -> Self {
        Self {
            low_clip: -1024.0,
            high_clip: 300.0,
            invalid_value: -2000.0,
        }
    }
}

impl IntensityWindow {
    pub fn new(low_clip: f32, high_clip: f32) -> Self {
        Self {
            low_clip,
            high_clip,
            ..Self::default()
        }
    }

    pub fn with_invalid_value(mut self, invalid_value: f32) -> Self {
        self.invalid_value = invalid_value;
        self
    }

    pub fn validate(&self) -> Result<(), NormalizeError> {
        let (low, high) = (self.low_clip, self.high_clip);
        if !low.is_finite() || !high.is_finite() || low == high {
            return Err(NormalizeError::InvalidClipRange { low, high });
        }
        if !self.invalid_value.is_finite() {
            return Err(NormalizeError::InvalidSentinel(self.invalid_value));
        }
        Ok(())
    }

    /// Map one raw value. Assumes a validated window.
    #[inline]
    pub fn apply(&self, raw: f32) -> f32 {
        let value = if raw.is_nan() { self.invalid_value } else { raw };
        ((value - self.low_clip) / (self.high_clip - self.low_clip)).clamp(0.0, 1.0)
    }
}

/// Window every sample of `volume`, consuming it.
///
/// # Errors
///
/// Fails on a degenerate or non-finite window before any sample is read.
#[instrument(skip(volume), fields(size = %volume.size()))]
pub fn normalize(
    volume: Volume,
    window: &IntensityWindow,
) -> Result<NormalizedVolume, NormalizeError> {
    window.validate()?;
    let geometry = volume.geometry();
    let normalized = Zip::from(volume.data()).par_map_collect(|&raw| window.apply(f32::from(raw)));
    let samples = normalized.into_raw_vec_and_offset().0;
    Ok(NormalizedVolume::from_raw(samples, geometry))
}
