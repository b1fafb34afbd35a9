// src/sampler.rs

use crate::error::{EvalError, Result};
use crate::ffmpeg::{self, RawFrameReader};
use image::{Rgb, RgbImage};
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

/// A sequential stream of decoded frames in original decode order.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleOptions {
    pub max_frames: usize,
    pub stride: usize,
    /// Fixed (width, height) target; `None` keeps the decoded size.
    pub resize: Option<(u32, u32)>,
}

/// Frames persisted for one video within one evaluation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameSet {
    pub frames: Vec<PathBuf>,
}

impl FrameSet {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Probes `video` and starts decoding it through FFmpeg.
pub fn open_video(video: &Path) -> Result<RawFrameReader> {
    let info = ffmpeg::get_video_info(video)?;
    RawFrameReader::open(&info)
}

/// Probes `video`, decodes it through FFmpeg and samples frames into `dest`.
pub fn extract_frames(video: &Path, dest: &Path, opts: &SampleOptions) -> Result<FrameSet> {
    let mut reader = open_video(video)?;
    sample_video(video, &mut reader, opts, dest)
}

/// Samples the decoded frames of `video` from `source`; an empty result names the video.
pub fn sample_video<S: FrameSource + ?Sized>(
    video: &Path,
    source: &mut S,
    opts: &SampleOptions,
    dest: &Path,
) -> Result<FrameSet> {
    let set = sample_frames(source, opts, dest).map_err(|e| match e {
        EvalError::EmptyResult(_) => EvalError::EmptyResult(video.to_path_buf()),
        other => other,
    })?;
    info!("Extracted {} frames from {} (stride {}, max {})",
          set.len(), video.display(), opts.stride, opts.max_frames);
    Ok(set)
}

/// Keeps every `stride`-th decoded frame until `max_frames` are kept or the source ends.
pub fn sample_frames<S: FrameSource + ?Sized>(
    source: &mut S,
    opts: &SampleOptions,
    dest: &Path,
) -> Result<FrameSet> {
    if opts.stride == 0 || opts.max_frames == 0 {
        return Err(EvalError::Input("stride and max_frames must be >= 1".to_string()));
    }
    fs::create_dir_all(dest)?;

    let mut frames = Vec::new();
    let mut index = 0usize;
    while frames.len() < opts.max_frames {
        let Some(frame) = source.next_frame()? else {
            break;
        };
        if index % opts.stride == 0 {
            let frame = match opts.resize {
                Some((w, h)) if (w, h) != frame.dimensions() => resize_area(&frame, w, h),
                _ => frame,
            };
            let path = dest.join(frame_file_name(frames.len()));
            frame.save(&path)?;
            debug!("Saved frame {} as {}", index, path.display());
            frames.push(path);
        }
        index += 1;
    }

    if frames.is_empty() {
        return Err(EvalError::EmptyResult(dest.to_path_buf()));
    }
    Ok(FrameSet { frames })
}

pub fn frame_file_name(kept: usize) -> String {
    format!("{:06}.png", kept)
}

/// Area-averaging resize: every output pixel is the mean of the source pixels it covers.
pub fn resize_area(src: &RgbImage, new_width: u32, new_height: u32) -> RgbImage {
    let (width, height) = src.dimensions();
    let mut out = RgbImage::new(new_width, new_height);
    if width == 0 || height == 0 || new_width == 0 || new_height == 0 {
        return out;
    }
    let scale_x = width as f64 / new_width as f64;
    let scale_y = height as f64 / new_height as f64;

    for ny in 0..new_height {
        let y0 = ny as f64 * scale_y;
        let y1 = (ny + 1) as f64 * scale_y;
        for nx in 0..new_width {
            let x0 = nx as f64 * scale_x;
            let x1 = (nx + 1) as f64 * scale_x;
            let mut acc = [0.0f64; 3];
            let mut total = 0.0f64;
            let mut sy = y0.floor() as u32;
            while (sy as f64) < y1 && sy < height {
                let wy = coverage(sy, y0, y1);
                let mut sx = x0.floor() as u32;
                while (sx as f64) < x1 && sx < width {
                    let w = wy * coverage(sx, x0, x1);
                    let px = src.get_pixel(sx, sy);
                    for c in 0..3 {
                        acc[c] += w * px[c] as f64;
                    }
                    total += w;
                    sx += 1;
                }
                sy += 1;
            }
            let value = |c: usize| -> u8 {
                if total > 0.0 {
                    (acc[c] / total).round().clamp(0.0, 255.0) as u8
                } else {
                    0
                }
            };
            out.put_pixel(nx, ny, Rgb([value(0), value(1), value(2)]));
        }
    }
    out
}

/// Fraction of source cell `i` (spanning [i, i+1)) inside [lo, hi).
fn coverage(i: u32, lo: f64, hi: f64) -> f64 {
    let start = (i as f64).max(lo);
    let end = ((i + 1) as f64).min(hi);
    (end - start).max(0.0)
}
