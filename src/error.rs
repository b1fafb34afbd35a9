// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EvalError {
    #[error("Input video file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to decode video: {0}")]
    Decode(String),

    #[error("No frames extracted from {}", .0.display())]
    EmptyResult(PathBuf),

    #[error("Failed to read any frame image: frame directory is empty or corrupt")]
    EmptyBatch,

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("{metric} backend failed: {message}")]
    Backend { metric: &'static str, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("FFmpeg/FFprobe command failed: {0}")]
    Command(String),

    #[error("Failed to parse command output: {0}")]
    Parse(String),

    #[error("JSON processing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Plotting error: {0}")]
    Plot(String),

    #[error("Input error: {0}")]
    Input(String),
}

impl EvalError {
    pub fn backend(metric: &'static str, message: impl Into<String>) -> Self {
        EvalError::Backend { metric, message: message.into() }
    }
}

// Define a standard Result type for the crate
pub type Result<T> = std::result::Result<T, EvalError>;
