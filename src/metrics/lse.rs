// src/metrics/lse.rs

use super::LipSyncMetric;
use std::path::Path;

/// LSE-C / LSE-D pair; `None` means not computed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LipSyncScores {
    pub confidence: Option<f64>,
    pub distance: Option<f64>,
}

/// Placeholder until an audio-visual sync model is plugged in; always absent.
pub struct UnavailableLipSync;

impl LipSyncMetric for UnavailableLipSync {
    fn name(&self) -> &'static str {
        "lse"
    }

    fn score(&self, _gt_video: &Path, _pred_video: &Path) -> LipSyncScores {
        LipSyncScores::default()
    }
}
