// src/lib.rs

//! Reproducible quality evaluation of generated talking-face videos against a
//! ground-truth recording: frame sampling, alignment and NIQE/PSNR/SSIM/FID/LSE scoring.

pub mod align;
pub mod cli;
pub mod encoder;
pub mod error;
pub mod eval;
pub mod ffmpeg;
pub mod metrics;
pub mod plot;
pub mod report;
pub mod sampler;

pub use error::{EvalError, Result};
pub use eval::{Evaluation, EvaluationRequest, evaluate, evaluate_in};
pub use metrics::{BackendSettings, MetricEngine, MetricResult};
