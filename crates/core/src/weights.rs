use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const MIN_WINDOW: usize = 1;
pub const MAX_WINDOW: usize = 64;

/// Shape of the per-frame weight curve across the blend window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlurWeighting {
    Equal,
    #[default]
    GaussianSym,
    Gaussian,
    GaussianReverse,
    Vegas,
    Pyramid,
    Ascending,
    Descending,
    Custom,
}

impl BlurWeighting {
    pub const ALL: [BlurWeighting; 9] = [
        BlurWeighting::Equal,
        BlurWeighting::GaussianSym,
        BlurWeighting::Gaussian,
        BlurWeighting::GaussianReverse,
        BlurWeighting::Vegas,
        BlurWeighting::Pyramid,
        BlurWeighting::Ascending,
        BlurWeighting::Descending,
        BlurWeighting::Custom,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BlurWeighting::Equal => "equal",
            BlurWeighting::GaussianSym => "gaussian_sym",
            BlurWeighting::Gaussian => "gaussian",
            BlurWeighting::GaussianReverse => "gaussian_reverse",
            BlurWeighting::Vegas => "vegas",
            BlurWeighting::Pyramid => "pyramid",
            BlurWeighting::Ascending => "ascending",
            BlurWeighting::Descending => "descending",
            BlurWeighting::Custom => "custom",
        }
    }
}

impl fmt::Display for BlurWeighting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlurWeighting {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        BlurWeighting::ALL
            .into_iter()
            .find(|w| w.as_str() == normalized)
            .with_context(|| format!("unknown blur weighting '{s}'"))
    }
}

/// Builds a weight vector of length `k` that sums to 1.
///
/// A `custom` vector with exactly `k` usable entries wins over any named
/// curve. [`BlurWeighting::Custom`] without one falls back to equal weights.
pub fn generate(weighting: BlurWeighting, k: usize, custom: &[f32]) -> Vec<f32> {
    if k <= 1 {
        return vec![1.0];
    }

    let custom_fits = custom.len() == k && custom.iter().all(|w| w.is_finite() && *w >= 0.0);
    if custom_fits {
        return normalize(custom.to_vec());
    }
    if !custom.is_empty() && weighting != BlurWeighting::Custom {
        debug!(
            window = k,
            provided = custom.len(),
            weighting = %weighting,
            "Custom weights do not fit the blend window; using the named curve"
        );
    }

    let raw = match weighting {
        BlurWeighting::Equal => vec![1.0; k],
        BlurWeighting::GaussianSym => gaussian(k, true),
        BlurWeighting::Gaussian => gaussian(k, false),
        BlurWeighting::GaussianReverse => gaussian(k, true).into_iter().map(|w| 1.0 - w).collect(),
        BlurWeighting::Vegas => (0..k)
            .map(|i| {
                let t = i as f32 / (k - 1) as f32;
                1.0 - (2.0 * t - 1.0).abs()
            })
            .collect(),
        BlurWeighting::Pyramid => (0..k)
            .map(|i| if i <= k / 2 { (i + 1) as f32 } else { (k - i) as f32 })
            .collect(),
        BlurWeighting::Ascending => (1..=k).map(|i| i as f32).collect(),
        BlurWeighting::Descending => (1..=k).rev().map(|i| i as f32).collect(),
        BlurWeighting::Custom => {
            warn!(
                expected = k,
                provided = custom.len(),
                "Custom weights do not match the blend window; using equal weights"
            );
            vec![1.0; k]
        }
    };

    normalize(raw)
}

fn gaussian(k: usize, symmetric: bool) -> Vec<f32> {
    let sigma = k as f32 / 6.0;
    let center = if symmetric { (k - 1) as f32 / 2.0 } else { 0.0 };
    (0..k)
        .map(|i| {
            let x = i as f32 - center;
            (-(x * x) / (2.0 * sigma * sigma)).exp()
        })
        .collect()
}

fn normalize(mut weights: Vec<f32>) -> Vec<f32> {
    let sum: f32 = weights.iter().sum();
    if !sum.is_finite() || sum <= f32::EPSILON {
        let uniform = 1.0 / weights.len() as f32;
        weights.iter_mut().for_each(|w| *w = uniform);
        return weights;
    }
    weights.iter_mut().for_each(|w| *w /= sum);
    weights
}

/// Parses a frame-rate expression: an absolute rate (`"60"`, `"59.94"`) or a
/// multiplier of `base` (`"5x"`).
pub fn parse_fps(expr: &str, base: f64) -> Result<f64> {
    let trimmed = expr.trim();
    let fps = if let Some(multiplier) = trimmed.strip_suffix(['x', 'X']) {
        let multiplier: f64 = multiplier
            .trim()
            .parse()
            .with_context(|| format!("invalid fps multiplier '{expr}'"))?;
        base * multiplier
    } else {
        trimmed
            .parse()
            .with_context(|| format!("invalid fps value '{expr}'"))?
    };

    if !fps.is_finite() || fps <= 0.0 {
        bail!("fps must be positive, got '{expr}' ({fps})");
    }
    Ok(fps)
}

/// Maps a run's frame rates and blur amount to a blend window size.
pub trait WindowSizing {
    fn window_size(&self, input_fps: f64, output_fps: f64, blur_amount: f64) -> usize;
}

/// `round(output / input * amount * 5)`, clamped to `[1, 64]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FpsRatioHeuristic;

impl FpsRatioHeuristic {
    const SCALE: f64 = 5.0;
}

impl WindowSizing for FpsRatioHeuristic {
    fn window_size(&self, input_fps: f64, output_fps: f64, blur_amount: f64) -> usize {
        if input_fps <= 0.0 || !input_fps.is_finite() {
            return MIN_WINDOW;
        }
        let raw = (output_fps / input_fps * blur_amount * Self::SCALE).round();
        if !raw.is_finite() || raw < MIN_WINDOW as f64 {
            return MIN_WINDOW;
        }
        (raw as usize).min(MAX_WINDOW)
    }
}
