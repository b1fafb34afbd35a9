// src/metrics/niqe.rs
//
// Natural Image Quality Evaluator. Each frame's patch statistics are compared
// against a multivariate Gaussian fitted on pristine images. Lower is better.

use super::NoReferenceMetric;
use super::math::{filter_same_replicate, gaussian_kernel, ln_gamma, mean_and_covariance, pinv_symmetric};
use crate::encoder::TensorBatch;
use crate::error::{EvalError, Result};
use image::RgbImage;
use log::{debug, info};
use ndarray::ArrayView2;
use once_cell::sync::{Lazy, OnceCell};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const METRIC: &str = "niqe";

pub const PATCH_SIZE: usize = 96;
const SCALE_FEATURES: usize = 18;
pub const FEATURE_DIM: usize = 2 * SCALE_FEATURES;
const SHARPNESS_FRACTION: f64 = 0.75;
const MSCN_WINDOW: usize = 7;
const MSCN_SIGMA: f64 = 7.0 / 6.0;
const MSCN_C: f64 = 1.0;
/// Neighbour offsets (dx, dy) for the paired products: horizontal, vertical, both diagonals.
const SHIFTS: [(isize, isize); 4] = [(1, 0), (0, 1), (1, 1), (-1, 1)];

/// Shape grid 0.2..=10 in steps of 0.001 with the AGGD moment ratio for each shape.
struct ShapeTable {
    shapes: Vec<f64>,
    ratios: Vec<f64>,
}

static SHAPE_TABLE: Lazy<ShapeTable> = Lazy::new(|| {
    let shapes: Vec<f64> = (0..=9800).map(|i| 0.2 + i as f64 * 0.001).collect();
    let ratios = shapes
        .iter()
        .map(|g| (2.0 * ln_gamma(2.0 / g) - ln_gamma(1.0 / g) - ln_gamma(3.0 / g)).exp())
        .collect();
    ShapeTable { shapes, ratios }
});

impl ShapeTable {
    fn nearest_shape(&self, ratio: f64) -> f64 {
        let mut best = 0;
        let mut best_diff = f64::INFINITY;
        for (i, r) in self.ratios.iter().enumerate() {
            let diff = (r - ratio) * (r - ratio);
            if diff < best_diff {
                best = i;
                best_diff = diff;
            }
        }
        self.shapes[best]
    }
}

/// Luminance plane with samples in 0..=255, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct LumaPlane {
    pub data: Vec<f64>,
    pub width: usize,
    pub height: usize,
}

impl LumaPlane {
    /// From a unit-range luminance frame as produced by `TensorBatch::luminance`.
    pub fn from_unit(frame: ArrayView2<'_, f32>) -> Self {
        let (height, width) = frame.dim();
        let data = frame.iter().map(|v| *v as f64 * 255.0).collect();
        Self { data, width, height }
    }

    pub fn from_rgb(img: &RgbImage) -> Self {
        let data = img
            .pixels()
            .map(|p| 0.299 * p[0] as f64 + 0.587 * p[1] as f64 + 0.114 * p[2] as f64)
            .collect();
        Self { data, width: img.width() as usize, height: img.height() as usize }
    }

    fn crop(&self, width: usize, height: usize) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            data.extend_from_slice(&self.data[y * self.width..y * self.width + width]);
        }
        Self { data, width, height }
    }

    /// Half-size bicubic resize with antialiasing and symmetric borders.
    fn downsample_half(&self) -> Self {
        let (rows, width) = resample_half(&self.data, self.width, self.height, false);
        let (data, height) = resample_half(&rows, width, self.height, true);
        Self { data, width, height }
    }
}

/// Taps of the a = -0.5 cubic stretched by 2 for a 0.5 scale, offsets -3..=4 around `2i`.
const HALF_TAPS: [f64; 8] = [
    -0.011_718_75, -0.035_156_25, 0.113_281_25, 0.433_593_75,
    0.433_593_75, 0.113_281_25, -0.035_156_25, -0.011_718_75,
];

/// Halves one axis of a row-major `width` x `height` plane; returns the plane and the new axis length.
/// Out-of-range taps mirror at the border.
fn resample_half(data: &[f64], width: usize, height: usize, vertical: bool) -> (Vec<f64>, usize) {
    let len = if vertical { height } else { width };
    let out_len = len.div_ceil(2);
    let mirror = |i: isize| -> usize {
        let period = 2 * len as isize;
        let m = i.rem_euclid(period);
        if m < len as isize { m as usize } else { (period - 1 - m) as usize }
    };
    let (out_w, out_h) = if vertical { (width, out_len) } else { (out_len, height) };
    let mut out = vec![0.0; out_w * out_h];
    for y in 0..out_h {
        for x in 0..out_w {
            let o = if vertical { y } else { x };
            let base = 2 * o as isize - 3;
            out[y * out_w + x] = HALF_TAPS
                .iter()
                .enumerate()
                .map(|(k, w)| {
                    let i = mirror(base + k as isize);
                    w * if vertical { data[i * width + x] } else { data[y * width + i] }
                })
                .sum();
        }
    }
    (out, out_len)
}

/// Mean-subtracted contrast-normalized coefficients and the local deviation map.
fn mscn(plane: &LumaPlane) -> (Vec<f64>, Vec<f64>) {
    let kernel = gaussian_kernel(MSCN_WINDOW, MSCN_SIGMA);
    let mu = filter_same_replicate(&plane.data, plane.width, plane.height, &kernel);
    let squared: Vec<f64> = plane.data.iter().map(|v| v * v).collect();
    let mu_sq = filter_same_replicate(&squared, plane.width, plane.height, &kernel);
    let sigma: Vec<f64> = mu_sq.iter().zip(&mu).map(|(s, m)| (s - m * m).abs().sqrt()).collect();
    let coeffs = plane
        .data
        .iter()
        .zip(&mu)
        .zip(&sigma)
        .map(|((v, m), s)| (v - m) / (s + MSCN_C))
        .collect();
    (coeffs, sigma)
}

/// Asymmetric generalized Gaussian fit: (shape, left scale, right scale).
fn estimate_aggd(values: &[f64]) -> (f64, f64, f64) {
    let (mut left_sq, mut left_n, mut right_sq, mut right_n) = (0.0, 0usize, 0.0, 0usize);
    let (mut abs_sum, mut sq_sum) = (0.0, 0.0);
    for &v in values {
        if v < 0.0 {
            left_sq += v * v;
            left_n += 1;
        } else if v > 0.0 {
            right_sq += v * v;
            right_n += 1;
        }
        abs_sum += v.abs();
        sq_sum += v * v;
    }
    let n = values.len().max(1) as f64;
    let left_std = if left_n > 0 { (left_sq / left_n as f64).sqrt() } else { 0.0 };
    let right_std = if right_n > 0 { (right_sq / right_n as f64).sqrt() } else { 0.0 };

    let mean_sq = sq_sum / n;
    let r_hat = if mean_sq > 0.0 { (abs_sum / n).powi(2) / mean_sq } else { 0.0 };
    // The normalization tends to 1 as the left/right ratio grows, so a flat right side uses r_hat as is.
    let r_hat_norm = if right_std > 0.0 {
        let g = left_std / right_std;
        r_hat * (g.powi(3) + 1.0) * (g + 1.0) / (g * g + 1.0).powi(2)
    } else {
        r_hat
    };

    let alpha = SHAPE_TABLE.nearest_shape(r_hat_norm);
    let spread = (0.5 * (ln_gamma(1.0 / alpha) - ln_gamma(3.0 / alpha))).exp();
    (alpha, left_std * spread, right_std * spread)
}

fn scale_features(coeffs: &[f64], width: usize, x0: usize, y0: usize, size: usize) -> [f64; SCALE_FEATURES] {
    let mut patch = Vec::with_capacity(size * size);
    for y in y0..y0 + size {
        patch.extend_from_slice(&coeffs[y * width + x0..y * width + x0 + size]);
    }

    let mut feat = [0.0; SCALE_FEATURES];
    let (alpha, beta_l, beta_r) = estimate_aggd(&patch);
    feat[0] = alpha;
    feat[1] = (beta_l + beta_r) / 2.0;

    let wrap = |v: usize, d: isize| (v as isize + d).rem_euclid(size as isize) as usize;
    for (i, &(dx, dy)) in SHIFTS.iter().enumerate() {
        let mut pair = Vec::with_capacity(size * size);
        for y in 0..size {
            for x in 0..size {
                pair.push(patch[y * size + x] * patch[wrap(y, dy) * size + wrap(x, dx)]);
            }
        }
        let (alpha, beta_l, beta_r) = estimate_aggd(&pair);
        let eta = (beta_r - beta_l) * (ln_gamma(2.0 / alpha) - ln_gamma(1.0 / alpha)).exp();
        feat[2 + 4 * i..6 + 4 * i].copy_from_slice(&[alpha, eta, beta_l, beta_r]);
    }
    feat
}

struct PatchFeatures {
    values: Vec<f64>,
    sharpness: f64,
}

/// Two-scale features for every whole patch of `plane`, in row-major patch order.
fn image_features(plane: &LumaPlane) -> Result<Vec<PatchFeatures>> {
    let rows = plane.height / PATCH_SIZE;
    let cols = plane.width / PATCH_SIZE;
    if rows == 0 || cols == 0 {
        return Err(EvalError::backend(
            METRIC,
            format!(
                "{}x{} image is smaller than one {}x{} patch",
                plane.width, plane.height, PATCH_SIZE, PATCH_SIZE
            ),
        ));
    }
    let full = plane.crop(cols * PATCH_SIZE, rows * PATCH_SIZE);
    let (coeffs, sigma) = mscn(&full);
    let half = full.downsample_half();
    let (half_coeffs, _) = mscn(&half);
    let half_patch = PATCH_SIZE / 2;

    let mut patches = Vec::with_capacity(rows * cols);
    for r in 0..rows {
        for c in 0..cols {
            let (x0, y0) = (c * PATCH_SIZE, r * PATCH_SIZE);
            let mut values = Vec::with_capacity(FEATURE_DIM);
            values.extend_from_slice(&scale_features(&coeffs, full.width, x0, y0, PATCH_SIZE));
            values.extend_from_slice(&scale_features(&half_coeffs, half.width, x0 / 2, y0 / 2, half_patch));

            let mut sharpness = 0.0;
            for y in y0..y0 + PATCH_SIZE {
                sharpness += sigma[y * full.width + x0..y * full.width + x0 + PATCH_SIZE].iter().sum::<f64>();
            }
            sharpness /= (PATCH_SIZE * PATCH_SIZE) as f64;
            patches.push(PatchFeatures { values, sharpness });
        }
    }
    Ok(patches)
}

/// Pristine multivariate Gaussian over the 36 patch features.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NiqeModel {
    pub mu: Vec<f64>,
    pub cov: Vec<Vec<f64>>,
}

impl NiqeModel {
    /// Fits a model from pristine images, keeping each image's sharpest patches.
    pub fn fit(images: &[LumaPlane]) -> Result<Self> {
        let mut rows = Vec::new();
        for image in images {
            let patches = image_features(image)?;
            let max = patches.iter().fold(0.0f64, |m, p| m.max(p.sharpness));
            let threshold = SHARPNESS_FRACTION * max;
            rows.extend(patches.into_iter().filter(|p| p.sharpness > threshold).map(|p| p.values));
        }
        if rows.len() < 2 {
            return Err(EvalError::backend(
                METRIC,
                format!("need at least two sharp pristine patches, found {}", rows.len()),
            ));
        }
        info!("Fitted NIQE model from {} patches of {} images", rows.len(), images.len());
        let (mu, cov) = mean_and_covariance(&rows, FEATURE_DIM);
        Ok(Self { mu, cov })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            EvalError::backend(METRIC, format!("cannot read model {}: {}", path.display(), e))
        })?;
        let model: NiqeModel = serde_json::from_str(&content).map_err(|e| {
            EvalError::backend(METRIC, format!("invalid model {}: {}", path.display(), e))
        })?;
        model.validate()?;
        Ok(model)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let square = self.cov.len() == FEATURE_DIM && self.cov.iter().all(|row| row.len() == FEATURE_DIM);
        if self.mu.len() != FEATURE_DIM || !square {
            return Err(EvalError::backend(
                METRIC,
                format!("model must have a {}-dim mean and a {}x{} covariance", FEATURE_DIM, FEATURE_DIM, FEATURE_DIM),
            ));
        }
        if !self.mu.iter().chain(self.cov.iter().flatten()).all(|v| v.is_finite()) {
            return Err(EvalError::backend(METRIC, "model contains non-finite values"));
        }
        Ok(())
    }

    /// Distance between this model and the patch statistics of one luminance plane.
    pub fn score(&self, plane: &LumaPlane) -> Result<f64> {
        let rows: Vec<Vec<f64>> = image_features(plane)?.into_iter().map(|p| p.values).collect();
        let (mu_d, cov_d) = mean_and_covariance(&rows, FEATURE_DIM);

        let pooled: Vec<Vec<f64>> = (0..FEATURE_DIM)
            .map(|i| (0..FEATURE_DIM).map(|j| (self.cov[i][j] + cov_d[i][j]) / 2.0).collect())
            .collect();
        let inv = pinv_symmetric(&pooled);
        let diff: Vec<f64> = self.mu.iter().zip(&mu_d).map(|(a, b)| a - b).collect();
        let quad: f64 = (0..FEATURE_DIM)
            .map(|i| diff[i] * (0..FEATURE_DIM).map(|j| inv[i][j] * diff[j]).sum::<f64>())
            .sum();
        let score = quad.max(0.0).sqrt();
        if !score.is_finite() {
            return Err(EvalError::backend(METRIC, "score is not finite"));
        }
        Ok(score)
    }
}

/// Where the pristine model comes from.
#[derive(Debug, Clone)]
pub enum ModelSource {
    /// Model bundled with the crate, fitted on natural photographs with `tfeval-niqe-fit`.
    Builtin,
    File(PathBuf),
    Loaded(Arc<NiqeModel>),
}

const BUILTIN_MODEL_JSON: &str = include_str!("niqe_pristine.json");

static BUILTIN_MODEL: OnceCell<Arc<NiqeModel>> = OnceCell::new();

fn builtin_model() -> Result<Arc<NiqeModel>> {
    BUILTIN_MODEL
        .get_or_try_init(|| -> Result<Arc<NiqeModel>> {
            let model: NiqeModel = serde_json::from_str(BUILTIN_MODEL_JSON)
                .map_err(|e| EvalError::backend(METRIC, format!("invalid built-in model: {}", e)))?;
            model.validate()?;
            debug!("Loaded built-in NIQE model");
            Ok(Arc::new(model))
        })
        .map(Arc::clone)
}

// Models are loaded once per path and shared; the lock makes first use single-flight.
static MODEL_CACHE: Lazy<Mutex<HashMap<PathBuf, Arc<NiqeModel>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

fn load_shared(path: &Path) -> Result<Arc<NiqeModel>> {
    let mut cache = MODEL_CACHE.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(model) = cache.get(path) {
        return Ok(Arc::clone(model));
    }
    let model = Arc::new(NiqeModel::load(path)?);
    info!("Loaded NIQE model from {}", path.display());
    cache.insert(path.to_path_buf(), Arc::clone(&model));
    Ok(model)
}

pub struct Niqe {
    source: ModelSource,
}

impl Niqe {
    pub fn new(source: ModelSource) -> Self {
        Self { source }
    }

    pub fn from_path(path: Option<&Path>) -> Self {
        match path {
            Some(p) => Self::new(ModelSource::File(p.to_path_buf())),
            None => Self::new(ModelSource::Builtin),
        }
    }

    fn model(&self) -> Result<Arc<NiqeModel>> {
        match &self.source {
            ModelSource::Builtin => builtin_model(),
            ModelSource::File(path) => load_shared(path),
            ModelSource::Loaded(model) => Ok(Arc::clone(model)),
        }
    }
}

impl NoReferenceMetric for Niqe {
    fn name(&self) -> &'static str {
        METRIC
    }

    fn frame_scores(&self, frames: &TensorBatch) -> Result<Vec<f64>> {
        let model = self.model()?;
        let luminance = frames.luminance();
        let scores = luminance
            .outer_iter()
            .map(|frame| model.score(&LumaPlane::from_unit(frame)))
            .collect::<Result<Vec<f64>>>()?;
        debug!("NIQE per-frame scores: {:?}", scores);
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    /// Deterministic xorshift noise over a smooth ramp.
    fn textured(seed: u64, size: usize) -> LumaPlane {
        let mut state = seed.max(1);
        let mut next = || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state % 1000) as f64 / 1000.0
        };
        let data = (0..size * size)
            .map(|i| {
                let (x, y) = ((i % size) as f64, (i / size) as f64);
                let ramp = 128.0 + 60.0 * ((x / 9.0).sin() * (y / 13.0).cos());
                (ramp + 50.0 * (next() - 0.5)).clamp(0.0, 255.0)
            })
            .collect();
        LumaPlane { data, width: size, height: size }
    }

    fn pristine() -> NiqeModel {
        let images: Vec<_> = (1..=3).map(|s| textured(s * 7919, 288)).collect();
        NiqeModel::fit(&images).unwrap()
    }

    #[test]
    fn test_fit_produces_full_model() {
        let model = pristine();
        assert_eq!(model.mu.len(), FEATURE_DIM);
        assert_eq!(model.cov.len(), FEATURE_DIM);
        assert!(model.validate().is_ok());
    }

    #[test]
    fn test_score_is_finite_and_deterministic() {
        let model = pristine();
        let plane = textured(42, 192);
        let a = model.score(&plane).unwrap();
        let b = model.score(&plane).unwrap();
        assert!(a.is_finite() && a >= 0.0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_solid_frame_scores_finite() {
        let model = pristine();
        let solid = LumaPlane::from_rgb(&RgbImage::from_pixel(256, 256, Rgb([90, 90, 90])));
        assert!(model.score(&solid).unwrap().is_finite());
    }

    #[test]
    fn test_small_image_is_rejected() {
        let model = pristine();
        let err = model.score(&textured(3, 64)).unwrap_err();
        assert!(matches!(err, EvalError::Backend { metric: "niqe", .. }));
    }

    #[test]
    fn test_builtin_model_is_the_default() {
        let frame = RgbImage::from_fn(256, 256, |x, y| {
            let v = ((x * 13 + y * 29) % 251) as u8;
            Rgb([v, v / 2, 255 - v])
        });
        let batch = TensorBatch::from_frames(&[frame]).unwrap();
        let score = Niqe::from_path(None).score(&batch).unwrap();
        assert!(score.is_finite() && score >= 0.0);
        assert_eq!(builtin_model().unwrap().mu.len(), FEATURE_DIM);
    }

    #[test]
    fn test_builtin_model_penalizes_blank_frames() {
        let model = builtin_model().unwrap();
        let blank = LumaPlane { data: vec![90.0; 192 * 192], width: 192, height: 192 };
        assert!(model.score(&blank).unwrap() > 10.0 * model.score(&textured(11, 192)).unwrap());
    }

    #[test]
    fn test_missing_model_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let batch = TensorBatch::from_frames(&[RgbImage::from_pixel(128, 128, Rgb([1, 2, 3]))]).unwrap();
        let err = Niqe::from_path(Some(&dir.path().join("absent.json"))).score(&batch).unwrap_err();
        assert!(matches!(err, EvalError::Backend { metric: "niqe", .. }));
    }

    #[test]
    fn test_downsample_half_keeps_flat_and_linear_content() {
        let flat = LumaPlane { data: vec![77.0; 16 * 12], width: 16, height: 12 };
        let half = flat.downsample_half();
        assert_eq!((half.width, half.height), (8, 6));
        assert!(half.data.iter().all(|v| (v - 77.0).abs() < 1e-9));

        // Cubic taps reproduce a ramp away from the borders: output x samples input 2x + 0.5.
        let ramp = LumaPlane {
            data: (0..16 * 16).map(|i| (i % 16) as f64).collect(),
            width: 16,
            height: 16,
        };
        let half = ramp.downsample_half();
        for x in 2..6 {
            assert!((half.data[3 * half.width + x] - (2 * x) as f64 - 0.5).abs() < 1e-9);
        }
    }

    #[test]
    fn test_model_file_round_trip_and_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models").join("niqe.json");
        let model = pristine();
        model.save(&path).unwrap();
        assert_eq!(NiqeModel::load(&path).unwrap(), model);

        let bad = dir.path().join("bad.json");
        fs::write(&bad, r#"{"mu":[0.0],"cov":[[1.0]]}"#).unwrap();
        assert!(matches!(NiqeModel::load(&bad), Err(EvalError::Backend { .. })));
    }

    #[test]
    fn test_batch_scoring_uses_loaded_model() {
        let model = Arc::new(pristine());
        let frame = RgbImage::from_fn(128, 128, |x, y| {
            let v = ((x * 13 + y * 29) % 251) as u8;
            Rgb([v, v / 2, 255 - v])
        });
        let batch = TensorBatch::from_frames(&[frame.clone(), frame]).unwrap();
        let scores = Niqe::new(ModelSource::Loaded(model)).frame_scores(&batch).unwrap();
        assert_eq!(scores.len(), 2);
        assert!((scores[0] - scores[1]).abs() < 1e-9);
    }

    #[test]
    fn test_aggd_shape_of_gaussian_samples() {
        // Irwin-Hall(12) - 6 is close to a standard normal, whose shape parameter is 2.
        let mut state = 88172645463325252u64;
        let mut uniform = || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 11) as f64 / (1u64 << 53) as f64
        };
        let samples: Vec<f64> = (0..20000).map(|_| (0..12).map(|_| uniform()).sum::<f64>() - 6.0).collect();
        let (alpha, beta_l, beta_r) = estimate_aggd(&samples);
        assert!((1.7..2.4).contains(&alpha), "alpha = {}", alpha);
        assert!((beta_l - beta_r).abs() < 0.1);
    }
}
