// src/metrics/fid.rs

use super::DistributionMetric;
use crate::error::{EvalError, Result};
use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Instant;

const METRIC: &str = "fid";

pub const DEFAULT_FID_COMMAND: &str = "python3 -m pytorch_fid --device cpu";

static FID_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"FID:\s*(?P<value>[-+]?(?:[0-9]+(?:\.[0-9]*)?|\.[0-9]+)(?:[eE][-+]?[0-9]+)?|nan|inf)")
        .expect("Invalid FID Regex")
});

/// Fréchet Inception Distance computed by an external calculator over two frame directories.
///
/// The command receives both directories as its last two arguments and must print
/// `FID: <value>`. Its first run may download the pretrained Inception weights.
pub struct ExternalFid {
    program: Option<String>,
    args: Vec<String>,
}

impl ExternalFid {
    /// An empty command line is accepted here and reported when scoring.
    pub fn new(command_line: &str) -> Self {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next();
        Self { program, args: parts.collect() }
    }
}

impl DistributionMetric for ExternalFid {
    fn name(&self) -> &'static str {
        METRIC
    }

    fn score(&self, dir_a: &Path, dir_b: &Path) -> Result<f64> {
        let program = self
            .program
            .as_deref()
            .ok_or_else(|| EvalError::backend(METRIC, "FID command is empty"))?;
        info!("Running FID calculator: {} {} {} {}",
              program, self.args.join(" "), dir_a.display(), dir_b.display());
        let start_time = Instant::now();
        let output = Command::new(program)
            .args(&self.args)
            .arg(dir_a)
            .arg(dir_b)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| EvalError::backend(METRIC, format!("cannot run {}: {}", program, e)))?;
        let duration = start_time.elapsed();

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!("FID calculator stderr ({}ms): {}", duration.as_millis(), stderr.trim());
        if !output.status.success() {
            return Err(EvalError::backend(
                METRIC,
                format!("{} exited with {}: {}", program, output.status, stderr.trim()),
            ));
        }
        parse_fid_output(&stdout)
    }
}

fn parse_fid_output(stdout: &str) -> Result<f64> {
    let caps = FID_REGEX
        .captures(stdout)
        .ok_or_else(|| EvalError::backend(METRIC, format!("no FID value in output: {}", stdout.trim())))?;
    let raw = &caps["value"];
    let value = raw
        .parse::<f64>()
        .map_err(|_| EvalError::backend(METRIC, format!("invalid FID value: {}", raw)))?;
    if !value.is_finite() {
        return Err(EvalError::backend(METRIC, format!("FID is not finite: {}", raw)));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fid_output() {
        assert_eq!(parse_fid_output("FID:  12.5\n").unwrap(), 12.5);
        assert_eq!(parse_fid_output("progress...\nFID: 3e-2").unwrap(), 0.03);
        assert!(parse_fid_output("FID: nan").is_err());
        assert!(parse_fid_output("no score here").is_err());
    }

    #[test]
    fn test_empty_command_fails_at_scoring() {
        let fid = ExternalFid::new("   ");
        let dir = tempfile::tempdir().unwrap();
        let err = fid.score(dir.path(), dir.path()).unwrap_err();
        assert!(matches!(err, EvalError::Backend { metric: "fid", .. }));
    }

    #[test]
    fn test_missing_calculator_is_backend_error() {
        let fid = ExternalFid::new("tfeval-no-such-fid-binary");
        let dir = tempfile::tempdir().unwrap();
        let err = fid.score(dir.path(), dir.path()).unwrap_err();
        assert!(matches!(err, EvalError::Backend { metric: "fid", .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_calculator_output_is_parsed() {
        // `echo` prints its arguments, directories included, after the score.
        let fid = ExternalFid::new("echo FID: 7.25");
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(fid.score(dir.path(), dir.path()).unwrap(), 7.25);
    }
}
