// src/metrics/psnr.rs

use super::{ReferenceMetric, ensure_same_shape};
use crate::encoder::TensorBatch;
use crate::error::Result;

/// Floor on the MSE so identical frames stay finite (120 dB).
pub const MSE_EPSILON: f64 = 1e-12;

/// Peak signal-to-noise ratio for unit-range frames.
pub struct Psnr;

impl ReferenceMetric for Psnr {
    fn name(&self) -> &'static str {
        "psnr"
    }

    fn frame_scores(&self, pred: &TensorBatch, gt: &TensorBatch) -> Result<Vec<f64>> {
        ensure_same_shape(self.name(), pred, gt)?;
        Ok((0..pred.len())
            .map(|n| {
                let p = pred.frame(n);
                let g = gt.frame(n);
                let sum: f64 = p
                    .iter()
                    .zip(g.iter())
                    .map(|(a, b)| {
                        let d = (*a - *b) as f64;
                        d * d
                    })
                    .sum();
                let mse = sum / p.len() as f64;
                10.0 * (1.0 / mse.max(MSE_EPSILON)).log10()
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EvalError;
    use image::{Rgb, RgbImage};

    fn batch(px: [u8; 3], n: usize) -> TensorBatch {
        let frames: Vec<_> = (0..n).map(|_| RgbImage::from_pixel(4, 4, Rgb(px))).collect();
        TensorBatch::from_frames(&frames).unwrap()
    }

    #[test]
    fn test_identical_batches_hit_ceiling() {
        let a = batch([12, 200, 99], 3);
        let score = Psnr.score(&a, &a).unwrap();
        assert!(score >= 80.0);
        assert!((score - 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_known_error() {
        // Every sample off by 255/255 -> mse = 1 -> 0 dB.
        let score = Psnr.score(&batch([0, 0, 0], 2), &batch([255, 255, 255], 2)).unwrap();
        assert!(score.abs() < 1e-9);
    }

    #[test]
    fn test_shape_mismatch() {
        let err = Psnr.score(&batch([0, 0, 0], 2), &batch([0, 0, 0], 3)).unwrap_err();
        assert!(matches!(err, EvalError::ShapeMismatch(_)));
    }
}
