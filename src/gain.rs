use serde::{Deserialize, Serialize};

/// Knee above which the soft clipper starts bending the signal
const SOFT_KNEE: f32 = 0.9;

/// How out-of-range samples are brought back to [-1.0, 1.0]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaturationMode {
    /// Clamp to the representable range
    #[default]
    Hard,
    /// Pass through below the knee, tanh-shaped limiting above it
    Soft,
}

/// Per-sample scalar multiply with saturation.
///
/// The gain is supplied by the caller on every quantum; there is no
/// ramping between consecutive values.
#[derive(Debug, Clone, Copy, Default)]
pub struct GainStage {
    mode: SaturationMode,
}

impl GainStage {
    pub fn new(mode: SaturationMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> SaturationMode {
        self.mode
    }

    /// Multiply every sample in place and saturate.
    pub fn apply(&self, samples: &mut [f32], gain: f32) {
        for sample in samples.iter_mut() {
            *sample = self.process_sample(*sample, gain);
        }
    }

    #[inline]
    pub fn process_sample(&self, sample: f32, gain: f32) -> f32 {
        let boosted = sample * gain;
        match self.mode {
            SaturationMode::Hard => hard_clip(boosted),
            SaturationMode::Soft => soft_clip(boosted),
        }
    }
}

#[inline]
fn hard_clip(x: f32) -> f32 {
    if x.is_nan() {
        return 0.0;
    }
    x.clamp(-1.0, 1.0)
}

#[inline]
fn soft_clip(x: f32) -> f32 {
    if x.is_nan() {
        0.0
    } else if x > SOFT_KNEE {
        SOFT_KNEE + (1.0 - SOFT_KNEE) * ((x - SOFT_KNEE) * 5.0).tanh()
    } else if x < -SOFT_KNEE {
        -SOFT_KNEE + (1.0 - SOFT_KNEE) * ((x + SOFT_KNEE) * 5.0).tanh()
    } else {
        x
    }
}
