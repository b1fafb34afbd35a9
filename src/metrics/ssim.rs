// src/metrics/ssim.rs

use super::math::{filter_valid, gaussian_kernel};
use super::{FallbackChain, ReferenceMetric, ensure_same_shape};
use crate::encoder::TensorBatch;
use crate::error::{EvalError, Result};
use ndarray::{ArrayView2, Axis};

const K1: f64 = 0.01;
const K2: f64 = 0.03;

/// SSIM tried in order: batched Gaussian-window first, classical windowed second.
pub fn standard_chain() -> FallbackChain {
    FallbackChain::new(
        "ssim",
        vec![Box::new(GaussianSsim::default()), Box::new(WindowedSsim::default())],
    )
}

/// Float SSIM over the whole batch with `data_range = 1.0`.
///
/// Frames are average-pooled by `max(1, round(min(H, W) / 256))` first, then
/// compared with an 11x11 Gaussian window (sigma 1.5) over valid positions only.
pub struct GaussianSsim {
    kernel_size: usize,
    sigma: f64,
}

impl Default for GaussianSsim {
    fn default() -> Self {
        Self { kernel_size: 11, sigma: 1.5 }
    }
}

impl ReferenceMetric for GaussianSsim {
    fn name(&self) -> &'static str {
        "ssim-gaussian"
    }

    fn frame_scores(&self, pred: &TensorBatch, gt: &TensorBatch) -> Result<Vec<f64>> {
        ensure_same_shape(self.name(), pred, gt)?;
        let (height, width) = (pred.height(), pred.width());
        let factor = ((height.min(width) as f64 / 256.0).round() as usize).max(1);
        let (ph, pw) = (height / factor, width / factor);
        if ph < self.kernel_size || pw < self.kernel_size {
            return Err(EvalError::backend(
                "ssim",
                format!(
                    "{}x{} frames are smaller than the {}x{} Gaussian window",
                    pw, ph, self.kernel_size, self.kernel_size
                ),
            ));
        }

        let kernel = gaussian_kernel(self.kernel_size, self.sigma);
        let c1 = K1 * K1;
        let c2 = K2 * K2;
        let mut scores = Vec::with_capacity(pred.len());
        for n in 0..pred.len() {
            let (p, g) = (pred.frame(n), gt.frame(n));
            let mut total = 0.0;
            for c in 0..3 {
                let x = avg_pool(p.index_axis(Axis(0), c), factor);
                let y = avg_pool(g.index_axis(Axis(0), c), factor);
                total += mean_ssim(&x, &y, pw, ph, &kernel, c1, c2, 1.0);
            }
            scores.push(total / 3.0);
        }
        check_finite(self.name(), scores)
    }
}

/// Per-frame SSIM on 8-bit frames with a 7x7 uniform window and sample covariance.
/// Channels are the last axis and averaged; borders the window cannot cover are cropped.
pub struct WindowedSsim {
    win_size: usize,
}

impl Default for WindowedSsim {
    fn default() -> Self {
        Self { win_size: 7 }
    }
}

impl ReferenceMetric for WindowedSsim {
    fn name(&self) -> &'static str {
        "ssim-windowed"
    }

    fn frame_scores(&self, pred: &TensorBatch, gt: &TensorBatch) -> Result<Vec<f64>> {
        ensure_same_shape(self.name(), pred, gt)?;
        let (height, width) = (pred.height(), pred.width());
        if height < self.win_size || width < self.win_size {
            return Err(EvalError::backend(
                "ssim",
                format!("{}x{} frames are smaller than the {}x{} window", width, height, self.win_size, self.win_size),
            ));
        }

        let data_range = 255.0;
        let c1 = (K1 * data_range) * (K1 * data_range);
        let c2 = (K2 * data_range) * (K2 * data_range);
        let np = (self.win_size * self.win_size) as f64;
        let cov_norm = np / (np - 1.0);
        let kernel = vec![1.0 / self.win_size as f64; self.win_size];

        let pred_u8 = pred.to_u8_frames();
        let gt_u8 = gt.to_u8_frames();
        let mut scores = Vec::with_capacity(pred_u8.len());
        for (p, g) in pred_u8.iter().zip(&gt_u8) {
            let mut total = 0.0;
            for c in 0..3 {
                let x: Vec<f64> = p.pixels().map(|px| px[c] as f64).collect();
                let y: Vec<f64> = g.pixels().map(|px| px[c] as f64).collect();
                total += mean_ssim(&x, &y, width, height, &kernel, c1, c2, cov_norm);
            }
            scores.push(total / 3.0);
        }
        check_finite(self.name(), scores)
    }
}

fn avg_pool(plane: ArrayView2<'_, f32>, factor: usize) -> Vec<f64> {
    let (h, w) = plane.dim();
    let (oh, ow) = (h / factor, w / factor);
    let area = (factor * factor) as f64;
    let mut out = Vec::with_capacity(oh * ow);
    for oy in 0..oh {
        for ox in 0..ow {
            let mut sum = 0.0f64;
            for y in oy * factor..(oy + 1) * factor {
                for x in ox * factor..(ox + 1) * factor {
                    sum += plane[[y, x]] as f64;
                }
            }
            out.push(sum / area);
        }
    }
    out
}

/// Mean of the SSIM map over every valid window position.
#[allow(clippy::too_many_arguments)]
fn mean_ssim(
    x: &[f64],
    y: &[f64],
    width: usize,
    height: usize,
    kernel: &[f64],
    c1: f64,
    c2: f64,
    cov_norm: f64,
) -> f64 {
    let product = |a: &[f64], b: &[f64]| -> Vec<f64> { a.iter().zip(b).map(|(p, q)| p * q).collect() };
    let (mu_x, ow, oh) = filter_valid(x, width, height, kernel);
    let (mu_y, _, _) = filter_valid(y, width, height, kernel);
    let (e_xx, _, _) = filter_valid(&product(x, x), width, height, kernel);
    let (e_yy, _, _) = filter_valid(&product(y, y), width, height, kernel);
    let (e_xy, _, _) = filter_valid(&product(x, y), width, height, kernel);

    let mut sum = 0.0;
    for i in 0..ow * oh {
        let (mx, my) = (mu_x[i], mu_y[i]);
        let sxx = cov_norm * (e_xx[i] - mx * mx);
        let syy = cov_norm * (e_yy[i] - my * my);
        let sxy = cov_norm * (e_xy[i] - mx * my);
        let luminance = (2.0 * mx * my + c1) / (mx * mx + my * my + c1);
        let structure = (2.0 * sxy + c2) / (sxx + syy + c2);
        sum += luminance * structure;
    }
    sum / (ow * oh) as f64
}

fn check_finite(name: &str, scores: Vec<f64>) -> Result<Vec<f64>> {
    if scores.iter().all(|s| s.is_finite()) {
        Ok(scores)
    } else {
        Err(EvalError::backend("ssim", format!("{} produced a non-finite score", name)))
    }
}
