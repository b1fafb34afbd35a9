// src/eval.rs

use crate::align::{align, dropped};
use crate::encoder::{TensorBatch, load_batch};
use crate::error::{EvalError, Result};
use crate::metrics::{MetricEngine, MetricInputs, MetricResult};
use crate::sampler::{self, FrameSet, FrameSource, SampleOptions, sample_video};
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};

/// Resize target used when the caller does not pick one.
pub const DEFAULT_RESIZE: (u32, u32) = (256, 256);

#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    pub gt_path: PathBuf,
    pub pred_path: PathBuf,
    pub stride: usize,
    pub max_frames: usize,
    pub resize: Option<(u32, u32)>,
}

impl EvaluationRequest {
    pub fn new(gt_path: PathBuf, pred_path: PathBuf) -> Self {
        Self {
            gt_path,
            pred_path,
            stride: 2,
            max_frames: 300,
            resize: Some(DEFAULT_RESIZE),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.stride == 0 {
            return Err(EvalError::Input("stride must be >= 1".to_string()));
        }
        if self.max_frames == 0 {
            return Err(EvalError::Input("max_frames must be >= 1".to_string()));
        }
        if let Some((w, h)) = self.resize {
            if w == 0 || h == 0 {
                return Err(EvalError::Input(format!("resize target {}x{} must be non-zero", w, h)));
            }
        }
        Ok(())
    }

    fn sample_options(&self) -> SampleOptions {
        SampleOptions {
            max_frames: self.max_frames,
            stride: self.stride,
            resize: self.resize,
        }
    }
}

/// Result of one evaluation: the report plus details that stay out of it.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub metrics: MetricResult,
    /// Number of aligned frame pairs the metrics ran on.
    pub frames: usize,
    pub ssim_backend: &'static str,
    pub psnr_frames: Vec<f64>,
    pub ssim_frames: Vec<f64>,
}

/// Evaluates with working storage under the system temporary directory.
pub fn evaluate(request: &EvaluationRequest, engine: &MetricEngine) -> Result<Evaluation> {
    evaluate_in(request, engine, &std::env::temp_dir())
}

/// Evaluates with working storage created under `root`. The storage is removed on every exit path.
pub fn evaluate_in(request: &EvaluationRequest, engine: &MetricEngine, root: &Path) -> Result<Evaluation> {
    evaluate_with(request, engine, root, |video| {
        Ok(Box::new(sampler::open_video(video)?) as Box<dyn FrameSource>)
    })
}

/// Like [`evaluate_in`], decoding each video through the source `open` returns for it.
pub fn evaluate_with<F>(
    request: &EvaluationRequest,
    engine: &MetricEngine,
    root: &Path,
    mut open: F,
) -> Result<Evaluation>
where
    F: FnMut(&Path) -> Result<Box<dyn FrameSource>>,
{
    request.validate()?;

    let workspace = tempfile::Builder::new().prefix("eval_frames_").tempdir_in(root)?;
    debug!("Working directory: {}", workspace.path().display());
    let gt_dir = workspace.path().join("gt");
    let pred_dir = workspace.path().join("pred");

    let opts = request.sample_options();
    let gt_full = {
        let mut source = open(&request.gt_path)?;
        sample_video(&request.gt_path, source.as_mut(), &opts, &gt_dir)?
    };
    let pred_full = {
        let mut source = open(&request.pred_path)?;
        sample_video(&request.pred_path, source.as_mut(), &opts, &pred_dir)?
    };

    let (gt, pred) = align(gt_full.clone(), pred_full.clone());
    // Distribution metrics read the directories, so they must hold the aligned frames only.
    remove_files(dropped(&gt_full, &gt));
    remove_files(dropped(&pred_full, &pred));

    let (gt_batch, pred_batch) = encode_pairs(&gt, &pred)?;
    info!("Evaluating {} aligned frame pairs", pred_batch.len());

    let output = engine.run(&MetricInputs {
        pred: &pred_batch,
        gt: &gt_batch,
        pred_dir: &pred_dir,
        gt_dir: &gt_dir,
        gt_video: &request.gt_path,
        pred_video: &request.pred_path,
    })?;

    Ok(Evaluation {
        metrics: output.metrics,
        frames: pred_batch.len(),
        ssim_backend: output.ssim_backend,
        psnr_frames: output.psnr_frames,
        ssim_frames: output.ssim_frames,
    })
}

/// Loads aligned frames of both sides, keeping only positions where both frames decoded.
/// Files of unpaired positions are removed so the directories match the batches.
fn encode_pairs(gt: &FrameSet, pred: &FrameSet) -> Result<(TensorBatch, TensorBatch)> {
    let (gt_batch, gt_kept) = load_batch(&gt.frames)?;
    let (pred_batch, pred_kept) = load_batch(&pred.frames)?;
    if gt_kept == pred_kept {
        return Ok((gt_batch, pred_batch));
    }

    let common: Vec<usize> = gt_kept
        .iter()
        .copied()
        .filter(|i| pred_kept.binary_search(i).is_ok())
        .collect();
    warn!("Dropping {} unpaired frame positions ({} pairs left)",
          gt.len().max(pred.len()) - common.len(), common.len());
    for set in [gt, pred] {
        remove_files(
            set.frames
                .iter()
                .enumerate()
                .filter(|(i, _)| common.binary_search(i).is_err())
                .map(|(_, path)| path),
        );
    }
    if common.is_empty() {
        return Err(EvalError::EmptyBatch);
    }

    // Row of each common position within a batch.
    let rows = |kept: &[usize]| -> Vec<usize> {
        common.iter().filter_map(|i| kept.binary_search(i).ok()).collect()
    };
    Ok((gt_batch.select(&rows(&gt_kept)), pred_batch.select(&rows(&pred_kept))))
}

fn remove_files<'a>(paths: impl IntoIterator<Item = &'a PathBuf>) {
    for path in paths {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to remove unaligned frame {}: {}", path.display(), e);
        }
    }
}
