// src/cli.rs

use crate::eval::EvaluationRequest;
use crate::metrics::BackendSettings;
use crate::metrics::fid::DEFAULT_FID_COMMAND;
use clap::Parser;
use std::path::PathBuf;

/// Resize target for sampled frames; `None` keeps the decoded size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resize(pub Option<(u32, u32)>);

pub fn parse_resize(s: &str) -> Result<Resize, String> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("none") {
        return Ok(Resize(None));
    }
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT or 'none', got '{}'", s))?;
    let w: u32 = w.trim().parse().map_err(|_| format!("invalid width '{}'", w))?;
    let h: u32 = h.trim().parse().map_err(|_| format!("invalid height '{}'", h))?;
    if w == 0 || h == 0 {
        return Err(format!("resize dimensions must be non-zero, got {}x{}", w, h));
    }
    Ok(Resize(Some((w, h))))
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Talking-face video evaluation (NIQE/PSNR/SSIM/FID/LSE-C/LSE-D)", long_about = None)]
pub struct CliArgs {
    /// Ground-truth video file
    #[arg(long = "gt_video", value_name = "PATH")]
    pub gt_video: PathBuf,

    /// Generated video file to evaluate
    #[arg(long = "pred_video", value_name = "PATH")]
    pub pred_video: PathBuf,

    /// Also write the JSON report to this path
    #[arg(long = "out_json", value_name = "PATH")]
    pub out_json: Option<PathBuf>,

    /// Keep one decoded frame out of every STRIDE frames
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u64).range(1..))]
    pub stride: u64,

    /// Maximum number of frames sampled per video
    #[arg(long = "max_frames", default_value_t = 300, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_frames: u64,

    /// Resize sampled frames to WIDTHxHEIGHT, or 'none' to keep the decoded size
    #[arg(long, default_value = "256x256", value_parser = parse_resize)]
    pub resize: Resize,

    /// Pristine NIQE model (JSON, see tfeval-niqe-fit); the bundled model is used when unset
    #[arg(long = "niqe_model", env = "TFEVAL_NIQE_MODEL", value_name = "PATH")]
    pub niqe_model: Option<PathBuf>,

    /// External FID calculator; the two frame directories are appended as arguments
    #[arg(long = "fid_command", env = "TFEVAL_FID_COMMAND", default_value = DEFAULT_FID_COMMAND)]
    pub fid_command: String,

    /// Write per-frame PSNR and SSIM plots into this directory
    #[arg(long = "plot_dir", value_name = "DIR")]
    pub plot_dir: Option<PathBuf>,

    /// Enable logging to file (e.g., tfeval_YYYYMMDD_HHMMSS.log)
    #[arg(long)]
    pub log: bool,

    /// Directory for the log file (default: current directory)
    #[arg(long = "log_dir", value_name = "DIR")]
    pub log_dir: Option<PathBuf>,
}

impl CliArgs {
    pub fn to_request(&self) -> EvaluationRequest {
        EvaluationRequest {
            gt_path: self.gt_video.clone(),
            pred_path: self.pred_video.clone(),
            stride: self.stride as usize,
            max_frames: self.max_frames as usize,
            resize: self.resize.0,
        }
    }

    pub fn backend_settings(&self) -> BackendSettings {
        BackendSettings {
            niqe_model: self.niqe_model.clone(),
            fid_command: self.fid_command.clone(),
        }
    }
}

pub fn parse_args() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let args = CliArgs::try_parse_from(["tfeval", "--gt_video", "gt.mp4", "--pred_video", "pred.mp4"]).unwrap();
        let request = args.to_request();
        assert_eq!(request.stride, 2);
        assert_eq!(request.max_frames, 300);
        assert_eq!(request.resize, Some((256, 256)));
        assert!(args.out_json.is_none());
    }

    #[test]
    fn test_zero_stride_rejected() {
        let res = CliArgs::try_parse_from(["tfeval", "--gt_video", "a", "--pred_video", "b", "--stride", "0"]);
        assert!(res.is_err());
    }

    #[test]
    fn test_required_videos() {
        assert!(CliArgs::try_parse_from(["tfeval", "--gt_video", "a"]).is_err());
    }

    #[test]
    fn test_parse_resize() {
        assert_eq!(parse_resize("128x96").unwrap(), Resize(Some((128, 96))));
        assert_eq!(parse_resize("None").unwrap(), Resize(None));
        assert!(parse_resize("128").is_err());
        assert!(parse_resize("0x10").is_err());
    }
}
