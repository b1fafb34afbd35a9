// src/metrics/mod.rs

pub mod fid;
pub mod lse;
pub mod math;
pub mod niqe;
pub mod psnr;
pub mod ssim;

use crate::encoder::TensorBatch;
use crate::error::{EvalError, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use lse::LipSyncScores;

// --- Data Structures ---

/// Final metrics report. `None` means the metric was not computed; it never means zero.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct MetricResult {
    pub niqe: Option<f64>,
    pub psnr: Option<f64>,
    pub ssim: Option<f64>,
    pub fid: Option<f64>,
    pub lse_c: Option<f64>,
    pub lse_d: Option<f64>,
}

// --- Metric Interfaces ---

/// Compares aligned prediction and ground-truth batches frame by frame.
pub trait ReferenceMetric: Send + Sync {
    fn name(&self) -> &'static str;

    fn frame_scores(&self, pred: &TensorBatch, gt: &TensorBatch) -> Result<Vec<f64>>;

    fn score(&self, pred: &TensorBatch, gt: &TensorBatch) -> Result<f64> {
        mean(&self.frame_scores(pred, gt)?)
    }
}

/// Scores a single batch without a reference.
pub trait NoReferenceMetric: Send + Sync {
    fn name(&self) -> &'static str;

    fn frame_scores(&self, frames: &TensorBatch) -> Result<Vec<f64>>;

    fn score(&self, frames: &TensorBatch) -> Result<f64> {
        mean(&self.frame_scores(frames)?)
    }
}

/// Compares two directories of persisted frames as distributions.
pub trait DistributionMetric: Send + Sync {
    fn name(&self) -> &'static str;

    fn score(&self, dir_a: &Path, dir_b: &Path) -> Result<f64>;
}

/// Audio-visual lip-sync scoring over the original videos.
pub trait LipSyncMetric: Send + Sync {
    fn name(&self) -> &'static str;

    fn score(&self, gt_video: &Path, pred_video: &Path) -> LipSyncScores;
}

/// Ordered candidates for one capability; the first that succeeds wins.
pub struct FallbackChain {
    capability: &'static str,
    candidates: Vec<Box<dyn ReferenceMetric>>,
}

impl FallbackChain {
    pub fn new(capability: &'static str, candidates: Vec<Box<dyn ReferenceMetric>>) -> Self {
        Self { capability, candidates }
    }

    /// Returns the winning backend's name with its per-frame scores.
    pub fn frame_scores(&self, pred: &TensorBatch, gt: &TensorBatch) -> Result<(&'static str, Vec<f64>)> {
        let mut failures = Vec::new();
        for candidate in &self.candidates {
            match candidate.frame_scores(pred, gt) {
                Ok(scores) => {
                    if !failures.is_empty() {
                        info!("{} fell back to {} after: {}", self.capability, candidate.name(), failures.join("; "));
                    }
                    return Ok((candidate.name(), scores));
                }
                Err(e) => {
                    warn!("{} backend {} failed: {}", self.capability, candidate.name(), e);
                    failures.push(format!("{}: {}", candidate.name(), e));
                }
            }
        }
        Err(EvalError::backend(
            self.capability,
            if failures.is_empty() {
                "no backend configured".to_string()
            } else {
                failures.join("; ")
            },
        ))
    }
}

// --- Engine ---

/// Backend configuration for the standard engine.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub niqe_model: Option<PathBuf>,
    pub fid_command: String,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            niqe_model: None,
            fid_command: fid::DEFAULT_FID_COMMAND.to_string(),
        }
    }
}

/// Everything the strategies consume for one evaluation.
pub struct MetricInputs<'a> {
    pub pred: &'a TensorBatch,
    pub gt: &'a TensorBatch,
    pub pred_dir: &'a Path,
    pub gt_dir: &'a Path,
    pub gt_video: &'a Path,
    pub pred_video: &'a Path,
}

#[derive(Debug, Clone)]
pub struct EngineOutput {
    pub metrics: MetricResult,
    /// Which SSIM backend produced the score.
    pub ssim_backend: &'static str,
    pub psnr_frames: Vec<f64>,
    pub ssim_frames: Vec<f64>,
}

/// Runs PSNR, SSIM, NIQE, FID and LSE in that order.
pub struct MetricEngine {
    psnr: Box<dyn ReferenceMetric>,
    ssim: FallbackChain,
    niqe: Box<dyn NoReferenceMetric>,
    fid: Box<dyn DistributionMetric>,
    lse: Box<dyn LipSyncMetric>,
}

impl MetricEngine {
    /// Default strategies. Backend problems surface when the engine runs, never here.
    pub fn standard(settings: &BackendSettings) -> Self {
        Self {
            psnr: Box::new(psnr::Psnr),
            ssim: ssim::standard_chain(),
            niqe: Box::new(niqe::Niqe::from_path(settings.niqe_model.as_deref())),
            fid: Box::new(fid::ExternalFid::new(&settings.fid_command)),
            lse: Box::new(lse::UnavailableLipSync),
        }
    }

    pub fn with_niqe(mut self, niqe: Box<dyn NoReferenceMetric>) -> Self {
        self.niqe = niqe;
        self
    }

    pub fn with_fid(mut self, fid: Box<dyn DistributionMetric>) -> Self {
        self.fid = fid;
        self
    }

    pub fn with_lse(mut self, lse: Box<dyn LipSyncMetric>) -> Self {
        self.lse = lse;
        self
    }

    pub fn run(&self, inputs: &MetricInputs<'_>) -> Result<EngineOutput> {
        info!("Computing PSNR over {} frames...", inputs.pred.len());
        let psnr_frames = self.psnr.frame_scores(inputs.pred, inputs.gt)?;
        let psnr = mean(&psnr_frames)?;

        info!("Computing SSIM...");
        let (ssim_backend, ssim_frames) = self.ssim.frame_scores(inputs.pred, inputs.gt)?;
        let ssim = mean(&ssim_frames)?;
        info!("SSIM computed by {}", ssim_backend);

        // No fallback: a NIQE failure aborts the evaluation.
        info!("Computing NIQE...");
        let niqe = self.niqe.score(inputs.pred)?;

        info!("Computing FID...");
        let fid = match self.fid.score(inputs.pred_dir, inputs.gt_dir) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("FID computation failed (reported as null): {}", e);
                None
            }
        };

        let lse = self.lse.score(inputs.gt_video, inputs.pred_video);
        if lse.confidence.is_none() && lse.distance.is_none() {
            info!("{} not available; LSE-C/LSE-D reported as null", self.lse.name());
        }

        Ok(EngineOutput {
            metrics: MetricResult {
                niqe: Some(niqe),
                psnr: Some(psnr),
                ssim: Some(ssim),
                fid,
                lse_c: lse.confidence,
                lse_d: lse.distance,
            },
            ssim_backend,
            psnr_frames,
            ssim_frames,
        })
    }
}

// --- Helper Functions ---

pub(crate) fn ensure_same_shape(metric: &str, pred: &TensorBatch, gt: &TensorBatch) -> Result<()> {
    if pred.shape() != gt.shape() {
        return Err(EvalError::ShapeMismatch(format!(
            "{}: prediction {:?} vs ground truth {:?}",
            metric,
            pred.shape(),
            gt.shape()
        )));
    }
    Ok(())
}

fn mean(scores: &[f64]) -> Result<f64> {
    if scores.is_empty() {
        return Err(EvalError::EmptyBatch);
    }
    Ok(scores.iter().sum::<f64>() / scores.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    struct FixedNiqe(f64);

    impl NoReferenceMetric for FixedNiqe {
        fn name(&self) -> &'static str {
            "niqe"
        }

        fn frame_scores(&self, frames: &TensorBatch) -> Result<Vec<f64>> {
            Ok(vec![self.0; frames.len()])
        }
    }

    struct FailingNiqe;

    impl NoReferenceMetric for FailingNiqe {
        fn name(&self) -> &'static str {
            "niqe"
        }

        fn frame_scores(&self, _frames: &TensorBatch) -> Result<Vec<f64>> {
            Err(EvalError::backend("niqe", "forced failure"))
        }
    }

    struct FixedFid(f64);

    impl DistributionMetric for FixedFid {
        fn name(&self) -> &'static str {
            "fid"
        }

        fn score(&self, _a: &Path, _b: &Path) -> Result<f64> {
            Ok(self.0)
        }
    }

    struct FailingFid;

    impl DistributionMetric for FailingFid {
        fn name(&self) -> &'static str {
            "fid"
        }

        fn score(&self, _a: &Path, _b: &Path) -> Result<f64> {
            Err(EvalError::backend("fid", "weights could not be downloaded"))
        }
    }

    struct FailingReference(&'static str);

    impl ReferenceMetric for FailingReference {
        fn name(&self) -> &'static str {
            self.0
        }

        fn frame_scores(&self, _pred: &TensorBatch, _gt: &TensorBatch) -> Result<Vec<f64>> {
            Err(EvalError::backend("ssim", format!("{} unavailable", self.0)))
        }
    }

    fn batch() -> TensorBatch {
        let frames: Vec<_> = (0..4u8)
            .map(|i| RgbImage::from_fn(32, 32, |x, y| Rgb([(x * 8) as u8, (y * 8) as u8, i * 50])))
            .collect();
        TensorBatch::from_frames(&frames).unwrap()
    }

    fn engine() -> MetricEngine {
        MetricEngine::standard(&BackendSettings::default())
            .with_niqe(Box::new(FixedNiqe(4.5)))
            .with_fid(Box::new(FixedFid(0.0)))
    }

    fn run(engine: &MetricEngine, batch: &TensorBatch) -> Result<EngineOutput> {
        let dir = Path::new(".");
        engine.run(&MetricInputs {
            pred: batch,
            gt: batch,
            pred_dir: dir,
            gt_dir: dir,
            gt_video: dir,
            pred_video: dir,
        })
    }

    #[test]
    fn test_identical_batches_full_report() {
        let b = batch();
        let out = run(&engine(), &b).unwrap();
        assert!(out.metrics.psnr.unwrap() >= 80.0);
        assert!((out.metrics.ssim.unwrap() - 1.0).abs() < 1e-3);
        assert_eq!(out.metrics.niqe, Some(4.5));
        assert_eq!(out.metrics.fid, Some(0.0));
        assert_eq!(out.metrics.lse_c, None);
        assert_eq!(out.metrics.lse_d, None);
        assert_eq!(out.ssim_backend, "ssim-gaussian");
        assert_eq!(out.psnr_frames.len(), 4);
    }

    #[test]
    fn test_fid_failure_is_soft() {
        let b = batch();
        let out = run(&engine().with_fid(Box::new(FailingFid)), &b).unwrap();
        assert_eq!(out.metrics.fid, None);
        assert!(out.metrics.psnr.is_some());
        assert!(out.metrics.ssim.is_some());
        assert!(out.metrics.niqe.is_some());
    }

    #[test]
    fn test_niqe_failure_is_fatal() {
        let b = batch();
        let err = run(&engine().with_niqe(Box::new(FailingNiqe)), &b).unwrap_err();
        assert!(matches!(err, EvalError::Backend { metric: "niqe", .. }));
    }

    #[test]
    fn test_default_engine_scores_niqe_with_builtin_model() {
        let frames: Vec<_> = (0..2u32)
            .map(|i| RgbImage::from_fn(256, 256, |x, y| {
                let v = ((x * 13 + y * 29 + i * 7) % 251) as u8;
                Rgb([v, v / 2, 255 - v])
            }))
            .collect();
        let b = TensorBatch::from_frames(&frames).unwrap();
        let engine = MetricEngine::standard(&BackendSettings::default()).with_fid(Box::new(FailingFid));
        let out = run(&engine, &b).unwrap();
        assert!(out.metrics.niqe.unwrap().is_finite());
        assert_eq!(out.metrics.fid, None);
    }

    #[test]
    fn test_empty_fid_command_still_produces_report() {
        let settings = BackendSettings { niqe_model: None, fid_command: String::new() };
        let b = batch();
        let out = run(&MetricEngine::standard(&settings).with_niqe(Box::new(FixedNiqe(4.5))), &b).unwrap();
        assert_eq!(out.metrics.fid, None);
        assert!(out.metrics.psnr.is_some());
        assert!(out.metrics.ssim.is_some());
        assert_eq!(out.metrics.niqe, Some(4.5));
    }

    #[test]
    fn test_fallback_chain_aggregates_errors() {
        let chain = FallbackChain::new(
            "ssim",
            vec![Box::new(FailingReference("first")), Box::new(FailingReference("second"))],
        );
        let b = batch();
        match chain.frame_scores(&b, &b).unwrap_err() {
            EvalError::Backend { message, .. } => {
                assert!(message.contains("first"));
                assert!(message.contains("second"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_fallback_chain_uses_next_candidate() {
        let chain = FallbackChain::new(
            "ssim",
            vec![Box::new(FailingReference("first")), Box::new(psnr::Psnr)],
        );
        let b = batch();
        let (name, scores) = chain.frame_scores(&b, &b).unwrap();
        assert_eq!(name, "psnr");
        assert_eq!(scores.len(), 4);
    }

    #[test]
    fn test_absent_is_distinct_from_zero() {
        let result = MetricResult { fid: Some(0.0), ..Default::default() };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["fid"], serde_json::json!(0.0));
        assert!(json["lse_c"].is_null());
    }
}
