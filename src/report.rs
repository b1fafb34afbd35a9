// src/report.rs

use crate::error::Result;
use crate::metrics::MetricResult;
use log::{info, warn};
use std::fs;
use std::io::Write;
use std::path::Path;

/// PSNR below this usually means the clips are not frame-aligned.
const SUSPICIOUS_PSNR_DB: f64 = 10.0;

/// Canonical report text: pretty JSON with a trailing newline.
pub fn render(result: &MetricResult) -> Result<String> {
    let mut text = serde_json::to_string_pretty(result)?;
    text.push('\n');
    Ok(text)
}

/// Writes the report to `out_json` when requested, then prints the identical bytes to stdout.
pub fn emit(result: &MetricResult, out_json: Option<&Path>) -> Result<String> {
    emit_to(result, out_json, &mut std::io::stdout().lock())
}

/// Same as [`emit`] with an explicit destination for the printed copy.
/// Nothing is printed when the file cannot be written.
pub fn emit_to<W: Write>(result: &MetricResult, out_json: Option<&Path>, out: &mut W) -> Result<String> {
    let text = render(result)?;
    if let Some(path) = out_json {
        persist(&text, path)?;
        info!("Saved metrics report to {}", path.display());
    }
    out.write_all(text.as_bytes())?;
    out.flush()?;
    Ok(text)
}

fn persist(text: &str, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            info!("Creating output directory: {}", dir.display());
            fs::create_dir_all(dir)?;
        }
    }
    fs::write(path, text)?;
    Ok(())
}

/// Logs warnings for results that look implausible. Never fails the run.
pub fn sanity_check(result: &MetricResult) {
    if let Some(psnr) = result.psnr {
        if psnr < SUSPICIOUS_PSNR_DB {
            warn!("PSNR ({:.2} dB) is suspiciously low (< {}). Possible frame misalignment between videos.",
                  psnr, SUSPICIOUS_PSNR_DB);
        }
    }
    if let Some(ssim) = result.ssim {
        if !(-1.0..=1.0).contains(&ssim) {
            warn!("SSIM ({:.4}) is outside [-1, 1].", ssim);
        }
    }
    if result.fid.is_none() {
        warn!("FID is absent from this report; see earlier warnings for the cause.");
    }
}
