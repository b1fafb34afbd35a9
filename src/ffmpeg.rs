// src/ffmpeg.rs

use crate::error::{EvalError, Result};
use crate::sampler::FrameSource;
use image::RgbImage;
use log::{debug, info, error, warn};
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

#[derive(Debug, Clone)]
pub struct VideoInfo {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    /// Container-reported frame count; not every container carries one.
    pub frame_count: Option<u64>,
    pub fps: f64,
}

/// Runs ffprobe to get video metadata.
pub fn get_video_info(video_path: &Path) -> Result<VideoInfo> {
    info!("Probing video file: {}", video_path.display());
    if !video_path.exists() {
        return Err(EvalError::NotFound(video_path.to_path_buf()));
    }

    let output = Command::new("ffprobe")
        .args([
            "-v", "error",
            "-select_streams", "v:0",
            "-show_entries", "stream=width,height,nb_frames,r_frame_rate",
            "-of", "json",
        ])
        .arg(video_path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| spawn_error("ffprobe", e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!("ffprobe failed for {}: {}", video_path.display(), stderr.trim());
        return Err(EvalError::Decode(format!(
            "cannot open {}: {}",
            video_path.display(), stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    debug!("ffprobe output for {}: {}", video_path.display(), stdout);
    parse_probe_output(video_path, &stdout)
}

fn parse_probe_output(video_path: &Path, stdout: &str) -> Result<VideoInfo> {
    let json: serde_json::Value = serde_json::from_str(stdout)
        .map_err(|e| EvalError::Parse(format!("Failed to parse ffprobe JSON: {}", e)))?;

    let stream = json["streams"].get(0).ok_or_else(|| {
        EvalError::Decode(format!("no video stream in {}", video_path.display()))
    })?;

    let width = stream["width"].as_u64().ok_or_else(|| EvalError::Parse("Missing width".to_string()))? as u32;
    let height = stream["height"].as_u64().ok_or_else(|| EvalError::Parse("Missing height".to_string()))? as u32;
    if width == 0 || height == 0 {
        return Err(EvalError::Decode(format!(
            "invalid frame size {}x{} in {}",
            width, height, video_path.display()
        )));
    }
    let frame_count = stream["nb_frames"].as_str().and_then(|s| s.parse::<u64>().ok());
    let fps = match stream["r_frame_rate"].as_str() {
        Some(s) => parse_frame_rate(s)?,
        None => 0.0,
    };

    info!("Detected Info for {}: {}x{} @ {:.3} fps, {} frames",
          video_path.display(), width, height, fps,
          frame_count.map_or_else(|| "unknown".to_string(), |n| n.to_string()));

    Ok(VideoInfo {
        path: video_path.to_path_buf(),
        width,
        height,
        frame_count,
        fps,
    })
}

/// Parses frame rate string (e.g., "24000/1001") into f64.
fn parse_frame_rate(fps_str: &str) -> Result<f64> {
    if let Some((num, den)) = fps_str.split_once('/') {
        let num = num.parse::<f64>().map_err(|_| EvalError::Parse(format!("Invalid FPS numerator: {}", num)))?;
        let den = den.parse::<f64>().map_err(|_| EvalError::Parse(format!("Invalid FPS denominator: {}", den)))?;
        if den == 0.0 {
            // ffprobe reports "0/0" for streams without a fixed rate.
            Ok(0.0)
        } else {
            Ok(num / den)
        }
    } else {
        fps_str.parse::<f64>().map_err(|_| EvalError::Parse(format!("Invalid FPS format: {}", fps_str)))
    }
}

fn spawn_error(program: &str, e: std::io::Error) -> EvalError {
    if e.kind() == ErrorKind::NotFound {
        EvalError::Decode(format!("{} not found on PATH", program))
    } else {
        EvalError::Io(e)
    }
}

/// Streams decoded frames of the first video stream as packed RGB24 over a pipe.
pub struct RawFrameReader {
    child: Child,
    stdout: ChildStdout,
    width: u32,
    height: u32,
    decoded: u64,
    finished: bool,
}

impl RawFrameReader {
    pub fn open(info: &VideoInfo) -> Result<Self> {
        let threads = num_cpus::get().to_string();
        let args: Vec<String> = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(), "error".to_string(),
            "-nostdin".to_string(),
            "-noautorotate".to_string(),
            "-threads".to_string(), threads,
            "-i".to_string(), info.path.to_string_lossy().to_string(),
            "-map".to_string(), "0:v:0".to_string(),
            // Passthrough keeps one output frame per decoded frame, so stride indices are decode indices.
            "-vsync".to_string(), "0".to_string(),
            "-f".to_string(), "rawvideo".to_string(),
            "-pix_fmt".to_string(), "rgb24".to_string(),
            "-".to_string(),
        ];
        info!("Running FFmpeg for frame decode: ffmpeg {}", args.join(" "));

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| spawn_error("ffmpeg", e))?;
        let stdout = child.stdout.take().ok_or_else(|| {
            EvalError::Command("ffmpeg stdout was not captured".to_string())
        })?;

        Ok(Self {
            child,
            stdout,
            width: info.width,
            height: info.height,
            decoded: 0,
            finished: false,
        })
    }

    fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    /// Reads until `buf` is full or the pipe closes; returns the bytes read.
    fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.stdout.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(EvalError::Io(e)),
            }
        }
        Ok(filled)
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        match self.child.wait() {
            Ok(status) if status.success() => {
                debug!("FFmpeg decode finished after {} frames", self.decoded);
            }
            Ok(status) => {
                warn!("FFmpeg decode exited with {} after {} frames", status, self.decoded);
            }
            Err(e) => warn!("Failed to wait for FFmpeg decode process: {}", e),
        }
    }
}

impl FrameSource for RawFrameReader {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if self.finished {
            return Ok(None);
        }
        let mut buf = vec![0u8; self.frame_len()];
        let filled = self.fill(&mut buf)?;
        if filled < buf.len() {
            if filled > 0 {
                warn!("Discarding truncated frame {} ({} of {} bytes)", self.decoded, filled, buf.len());
            }
            self.finish();
            return Ok(None);
        }
        self.decoded += 1;
        RgbImage::from_raw(self.width, self.height, buf)
            .map(Some)
            .ok_or_else(|| EvalError::Decode("raw frame buffer has the wrong size".to_string()))
    }
}

impl Drop for RawFrameReader {
    fn drop(&mut self) {
        if !self.finished {
            // Stopped early (max_frames reached); the rest of the stream is not needed.
            let _ = self.child.kill();
            let _ = self.child.wait();
            self.finished = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert!((parse_frame_rate("24000/1001").unwrap() - 23.976).abs() < 1e-3);
        assert_eq!(parse_frame_rate("25").unwrap(), 25.0);
        assert_eq!(parse_frame_rate("0/0").unwrap(), 0.0);
        assert!(parse_frame_rate("abc/1").is_err());
    }

    #[test]
    fn test_parse_probe_output() {
        let json = r#"{"streams":[{"width":640,"height":360,"r_frame_rate":"25/1","nb_frames":"10"}]}"#;
        let info = parse_probe_output(Path::new("a.mp4"), json).unwrap();
        assert_eq!((info.width, info.height), (640, 360));
        assert_eq!(info.frame_count, Some(10));
        assert_eq!(info.fps, 25.0);
    }

    #[test]
    fn test_parse_probe_output_without_video_stream() {
        let err = parse_probe_output(Path::new("a.wav"), r#"{"streams":[]}"#).unwrap_err();
        assert!(matches!(err, EvalError::Decode(_)));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = get_video_info(Path::new("/definitely/not/here.mp4")).unwrap_err();
        assert!(matches!(err, EvalError::NotFound(_)));
    }
}
