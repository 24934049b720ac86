//! Greedy pairwise suppression of overlapping raw detections.
//!
//! Overlap is measured against the smaller box, so a small detection nested in
//! a larger one counts as fully overlapping.
use crate::detection::Detection;
use serde::{Deserialize, Serialize};

#[cfg(feature = "rayon")]
use rayon::prelude::*;
#[cfg(feature = "tracing")]
use tracing::instrument;

pub const DEFAULT_OVERLAP_THRESHOLD: f32 = 0.65;
pub const MAX_SUPPRESSION_CANDIDATES: usize = 5000;
pub const MAX_SUPPRESSED_OUTPUT: usize = 50;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SuppressionParams {
    /// Pairs whose overlap ratio reaches this value compete.
    pub overlap_threshold: f32,
    /// Candidates beyond this count are ignored.
    pub max_candidates: usize,
    /// Survivors beyond this count are dropped.
    pub max_output: usize,
}

impl Default for SuppressionParams {
    fn default() -> Self {
        Self {
            overlap_threshold: DEFAULT_OVERLAP_THRESHOLD,
            max_candidates: MAX_SUPPRESSION_CANDIDATES,
            max_output: MAX_SUPPRESSED_OUTPUT,
        }
    }
}

impl SuppressionParams {
    pub fn with_overlap_threshold(mut self, overlap_threshold: f32) -> Self {
        self.overlap_threshold = overlap_threshold;
        self
    }
}

/// Intersection area divided by the smaller of the two areas. Zero when
/// either box is empty.
#[inline]
pub fn overlap_ratio(a: &Detection, b: &Detection) -> f32 {
    let min_area = a.area().min(b.area());
    if min_area == 0 {
        return 0.0;
    }
    a.intersection_area(b) as f32 / min_area as f32
}

/// Whether candidate `i` loses to some other candidate.
///
/// For each overlapping pair the lower-confidence box is suppressed; on a tie
/// the earlier one is.
fn is_suppressed(candidates: &[Detection], i: usize, threshold: f32) -> bool {
    let a = &candidates[i];
    candidates.iter().enumerate().any(|(j, b)| {
        if j == i || overlap_ratio(a, b) < threshold {
            return false;
        }
        if j < i {
            b.confidence > a.confidence
        } else {
            a.confidence <= b.confidence
        }
    })
}

/// Per-candidate suppression flags.
pub fn suppression_flags(candidates: &[Detection], threshold: f32) -> Vec<bool> {
    #[cfg(feature = "rayon")]
    let flags = (0..candidates.len())
        .into_par_iter()
        .map(|i| is_suppressed(candidates, i, threshold))
        .collect();
    #[cfg(not(feature = "rayon"))]
    let flags = (0..candidates.len())
        .map(|i| is_suppressed(candidates, i, threshold))
        .collect();
    flags
}

/// Collapse overlapping detections, keeping candidate order.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip_all, fields(candidates = candidates.len()))
)]
pub fn suppress(candidates: &[Detection], params: &SuppressionParams) -> Vec<Detection> {
    let candidates = &candidates[..candidates.len().min(params.max_candidates)];
    let flags = suppression_flags(candidates, params.overlap_threshold);
    candidates
        .iter()
        .zip(flags)
        .filter(|(_, suppressed)| !suppressed)
        .map(|(d, _)| *d)
        .take(params.max_output)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: u32, y: u32, size: u32, confidence: f32) -> Detection {
        Detection::new(x, y, size, size, confidence)
    }

    #[test]
    fn identical_boxes_keep_the_stronger() {
        let cands = [det(10, 10, 20, 0.9), det(10, 10, 20, 0.5)];
        for thr in [0.01, 0.3, 0.65, 1.0] {
            let params = SuppressionParams::default().with_overlap_threshold(thr);
            assert_eq!(suppress(&cands, &params), vec![cands[0]], "threshold {thr}");
        }
        let reversed = [cands[1], cands[0]];
        assert_eq!(
            suppress(&reversed, &SuppressionParams::default()),
            vec![cands[0]]
        );
    }

    #[test]
    fn disjoint_boxes_all_survive() {
        let cands = [det(0, 0, 10, 0.2), det(20, 0, 10, 0.9), det(0, 20, 10, 0.5)];
        assert_eq!(suppress(&cands, &SuppressionParams::default()), cands.to_vec());
    }

    #[test]
    fn nested_box_counts_as_full_overlap() {
        let outer = det(0, 0, 40, 0.3);
        let inner = det(10, 10, 10, 0.8);
        assert_eq!(overlap_ratio(&outer, &inner), 1.0);
        assert_eq!(
            suppress(&[outer, inner], &SuppressionParams::default()),
            vec![inner]
        );
    }

    #[test]
    fn ties_suppress_the_earlier_candidate() {
        let a = det(0, 0, 10, 0.5);
        let b = det(1, 1, 10, 0.5);
        assert_eq!(suppress(&[a, b], &SuppressionParams::default()), vec![b]);
    }

    #[test]
    fn suppression_is_idempotent() {
        let cands: Vec<Detection> = (0..30)
            .map(|i| det((i % 6) * 4, (i / 6) * 7, 12, ((i * 37) % 11) as f32 / 10.0))
            .collect();
        let params = SuppressionParams::default();
        let once = suppress(&cands, &params);
        let twice = suppress(&once, &params);
        assert_eq!(once, twice);
        for kept in &once {
            for other in &cands {
                if overlap_ratio(kept, other) >= params.overlap_threshold {
                    assert!(kept.confidence >= other.confidence);
                }
            }
        }
    }

    #[test]
    fn capacities_truncate() {
        let cands: Vec<Detection> = (0..10).map(|i| det(i * 50, 0, 10, 1.0)).collect();
        let params = SuppressionParams {
            overlap_threshold: 0.65,
            max_candidates: 6,
            max_output: 4,
        };
        assert_eq!(suppress(&cands, &params), cands[..4].to_vec());
        let params = SuppressionParams {
            max_output: 50,
            ..params
        };
        assert_eq!(suppress(&cands, &params).len(), 6);
    }

    #[test]
    fn empty_boxes_never_overlap() {
        let a = det(0, 0, 0, 1.0);
        let b = det(0, 0, 10, 0.5);
        assert_eq!(overlap_ratio(&a, &b), 0.0);
    }
}
