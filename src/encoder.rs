// src/encoder.rs

use crate::error::{EvalError, Result};
use image::RgbImage;
use log::{debug, warn};
use ndarray::{Array3, Array4, ArrayView3, Axis, s};
use std::path::PathBuf;

/// Frames stacked as (N, C=3, H, W), RGB order, values in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct TensorBatch {
    data: Array4<f32>,
}

impl TensorBatch {
    /// Stacks 8-bit RGB frames; every frame must share the first frame's size.
    pub fn from_frames(frames: &[RgbImage]) -> Result<Self> {
        let first = frames.first().ok_or(EvalError::EmptyBatch)?;
        let (width, height) = first.dimensions();
        let mut data = Array4::<f32>::zeros((frames.len(), 3, height as usize, width as usize));
        for (n, frame) in frames.iter().enumerate() {
            if frame.dimensions() != (width, height) {
                return Err(EvalError::ShapeMismatch(format!(
                    "frame {} is {}x{}, expected {}x{}",
                    n, frame.width(), frame.height(), width, height
                )));
            }
            for (x, y, px) in frame.enumerate_pixels() {
                for c in 0..3 {
                    data[[n, c, y as usize, x as usize]] = px[c] as f32 / 255.0;
                }
            }
        }
        Ok(Self { data })
    }

    pub fn len(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn height(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    pub fn width(&self) -> usize {
        self.data.len_of(Axis(3))
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn data(&self) -> &Array4<f32> {
        &self.data
    }

    /// Keeps the given frames, in the given order.
    pub fn select(&self, rows: &[usize]) -> Self {
        Self { data: self.data.select(Axis(0), rows) }
    }

    /// One frame as (C, H, W).
    pub fn frame(&self, n: usize) -> ArrayView3<'_, f32> {
        self.data.slice(s![n, .., .., ..])
    }

    /// Per-frame luminance (N, H, W) using 0.299 R + 0.587 G + 0.114 B.
    pub fn luminance(&self) -> Array3<f32> {
        let r = self.data.index_axis(Axis(1), 0);
        let g = self.data.index_axis(Axis(1), 1);
        let b = self.data.index_axis(Axis(1), 2);
        &r * 0.299 + &g * 0.587 + &b * 0.114
    }

    /// 8-bit HWC frames, truncating `v * 255` the way an integer cast does.
    pub fn to_u8_frames(&self) -> Vec<RgbImage> {
        (0..self.len())
            .map(|n| {
                let frame = self.frame(n);
                RgbImage::from_fn(self.width() as u32, self.height() as u32, |x, y| {
                    let px = |c: usize| (frame[[c, y as usize, x as usize]] * 255.0) as u8;
                    image::Rgb([px(0), px(1), px(2)])
                })
            })
            .collect()
    }
}

/// Loads frame images in order, skipping any that cannot be read.
/// Returns the batch with the positions in `paths` of the frames it holds.
pub fn load_batch(paths: &[PathBuf]) -> Result<(TensorBatch, Vec<usize>)> {
    let mut frames: Vec<RgbImage> = Vec::with_capacity(paths.len());
    let mut kept = Vec::with_capacity(paths.len());
    for (i, path) in paths.iter().enumerate() {
        let img = match image::open(path) {
            Ok(img) => img.to_rgb8(),
            Err(e) => {
                warn!("Skipping unreadable frame {}: {}", path.display(), e);
                continue;
            }
        };
        if let Some(first) = frames.first() {
            if first.dimensions() != img.dimensions() {
                warn!("Skipping frame {}: size {:?} differs from {:?}",
                      path.display(), img.dimensions(), first.dimensions());
                continue;
            }
        }
        frames.push(img);
        kept.push(i);
    }
    if frames.is_empty() {
        return Err(EvalError::EmptyBatch);
    }
    debug!("Loaded {} of {} frames into a batch", frames.len(), paths.len());
    Ok((TensorBatch::from_frames(&frames)?, kept))
}
