// src/align.rs

use crate::sampler::FrameSet;
use log::info;

/// Truncates both sets to their common length, keeping the start of each clip.
pub fn align(gt: FrameSet, pred: FrameSet) -> (FrameSet, FrameSet) {
    let n = gt.len().min(pred.len());
    if gt.len() != pred.len() {
        info!("Aligning frame counts: gt={}, pred={} -> {}", gt.len(), pred.len(), n);
    }
    (truncate(gt, n), truncate(pred, n))
}

fn truncate(mut set: FrameSet, n: usize) -> FrameSet {
    set.frames.truncate(n);
    set
}

/// Frames of `full` that `aligned` dropped from its tail.
pub fn dropped<'a>(full: &'a FrameSet, aligned: &FrameSet) -> &'a [std::path::PathBuf] {
    &full.frames[aligned.len().min(full.len())..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn set(prefix: &str, n: usize) -> FrameSet {
        FrameSet {
            frames: (0..n).map(|i| PathBuf::from(format!("{}/{:06}.png", prefix, i))).collect(),
        }
    }

    #[test]
    fn test_align_keeps_common_prefix() {
        for (n1, n2) in [(5, 3), (3, 5), (4, 4), (1, 7)] {
            let (gt, pred) = align(set("gt", n1), set("pred", n2));
            let n = n1.min(n2);
            assert_eq!(gt.len(), n);
            assert_eq!(pred.len(), n);
            assert_eq!(gt.frames, set("gt", n).frames);
            assert_eq!(pred.frames, set("pred", n).frames);
        }
    }

    #[test]
    fn test_dropped_tail() {
        let full = set("gt", 5);
        let (aligned, _) = align(full.clone(), set("pred", 2));
        let tail = dropped(&full, &aligned);
        assert_eq!(tail, &full.frames[2..]);
    }
}
