//! Soft-cascade evaluation over an integral channel map.
//!
//! Every level scans its window positions in parallel. At each position the
//! octave's stages run in training order; each stage is a depth-2 stump whose
//! leaf value is added to the running confidence, and the window is dropped
//! as soon as the confidence falls to or below the stage threshold.
use crate::channels::FIRST_COLOR_CHANNEL;
use crate::detection::{Detection, DetectionBuffer};
use crate::error::InputError;
use crate::integral::IntegralMap;
use crate::model::{CascadeModel, Node, LEAVES_PER_STAGE, NODES_PER_STAGE};
use crate::pyramid::Level;
use std::ops::Range;

#[cfg(feature = "rayon")]
use rayon::prelude::*;
#[cfg(feature = "tracing")]
use tracing::{debug_span, instrument};

/// Region-of-interest mask in shrunk pixels; non-zero entries are scanned.
#[derive(Clone, Copy, Debug)]
pub struct RoiMask<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8],
}

impl<'a> RoiMask<'a> {
    pub fn new(width: usize, height: usize, data: &'a [u8]) -> Result<Self, InputError> {
        let expected = width * height;
        if data.len() != expected {
            return Err(InputError::MaskBuffer {
                width,
                height,
                len: data.len(),
                expected,
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Whether window position `(x, y)` should be evaluated.
    #[inline]
    pub fn enabled(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.height && self.data[y * self.width + x] != 0
    }

    pub fn expect_size(&self, width: usize, height: usize) -> Result<(), InputError> {
        if self.width == width && self.height == height {
            Ok(())
        } else {
            Err(InputError::MaskSize {
                expected_w: width,
                expected_h: height,
                got_w: self.width,
                got_h: self.height,
            })
        }
    }

    /// Reduce a full-resolution mask to shrunk pixels. A block is enabled when
    /// any of its pixels is.
    pub fn shrink(&self, shrinkage: usize) -> Vec<u8> {
        let s = shrinkage.max(1);
        let (sw, sh) = (self.width / s, self.height / s);
        let mut out = vec![0u8; sw * sh];
        for y in 0..sh {
            for x in 0..sw {
                let hit = (y * s..(y + 1) * s).any(|yy| {
                    self.data[yy * self.width + x * s..][..s]
                        .iter()
                        .any(|&v| v != 0)
                });
                out[y * sw + x] = u8::from(hit);
            }
        }
        out
    }
}

/// A node rescaled to one level: window-relative corners and the adjusted
/// threshold.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScaledNode {
    /// `[x0, y0, x1, y1]` relative to the window origin, in shrunk pixels.
    pub rect: [usize; 4],
    pub channel: usize,
    pub threshold: f32,
}

impl ScaledNode {
    pub fn new(node: &Node, level: &Level) -> Self {
        let rel = level.rel_scale;
        let r = node.rect.map(|v| v as f32);
        let s = r.map(|v| (rel * v).round_ties_even());

        let (farea, sarea, corners) = if level.is_up {
            (r[2] * r[3], s[2] * s[3], [s[0], s[1], s[0] + s[2], s[1] + s[3]])
        } else {
            ((r[2] - r[0]) * (r[3] - r[1]), (s[2] - s[0]) * (s[3] - s[1]), s)
        };
        let approx = if sarea == 0.0 {
            1.0
        } else {
            sarea / (farea * rel * rel)
        };
        let channel = node.channel as usize;
        let scaling = level.scaling[usize::from(channel >= FIRST_COLOR_CHANNEL)];

        Self {
            rect: corners.map(|v| v.max(0.0) as usize),
            channel,
            threshold: node.threshold as f32 * approx * scaling,
        }
    }

    /// Channel sum under this node for the window at `(x, y)`. Corners are
    /// clamped to the channel band.
    #[inline]
    fn sum(&self, integral: &IntegralMap, x: usize, y: usize) -> u32 {
        let max_x = integral.source_width();
        let band_h = integral.band_height();
        let x0 = (x + self.rect[0]).min(max_x);
        let x1 = (x + self.rect[2]).min(max_x);
        let y0 = (y + self.rect[1]).min(band_h);
        let y1 = (y + self.rect[3]).min(band_h);
        integral.channel_rect_sum(self.channel, x0, y0, x1, y1)
    }

    #[inline]
    fn passes(&self, integral: &IntegralMap, x: usize, y: usize) -> bool {
        self.sum(integral, x, y) as f32 >= self.threshold
    }
}

/// Outcome of evaluating one window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum WindowVerdict {
    Accept { confidence: f32 },
    /// Rejected at octave-local stage `stage`.
    Reject { stage: usize, confidence: f32 },
}

/// The octave's nodes rescaled for one level.
#[derive(Clone, Debug)]
pub struct LevelPlan {
    pub level: Level,
    stages: Range<usize>,
    nodes: Vec<ScaledNode>,
}

impl LevelPlan {
    pub fn new(model: &CascadeModel, level: &Level) -> Self {
        let stages = model.octaves[level.octave].stage_range();
        let nodes = model.nodes
            [stages.start * NODES_PER_STAGE..stages.end * NODES_PER_STAGE]
            .iter()
            .map(|n| ScaledNode::new(n, level))
            .collect();
        Self {
            level: *level,
            stages,
            nodes,
        }
    }

    pub fn nodes(&self) -> &[ScaledNode] {
        &self.nodes
    }

    /// Run the stages for the window whose origin is `(x, y)` in shrunk pixels.
    pub fn evaluate_window(
        &self,
        model: &CascadeModel,
        integral: &IntegralMap,
        x: usize,
        y: usize,
    ) -> WindowVerdict {
        let mut confidence = 0.0f32;
        for (local, stage) in self.stages.clone().enumerate() {
            let nodes = &self.nodes[local * NODES_PER_STAGE..][..NODES_PER_STAGE];
            let next = 1 + usize::from(nodes[0].passes(integral, x, y));
            let leaf = (next - 1) * 2 + usize::from(nodes[next].passes(integral, x, y));
            confidence += model.leaves[stage * LEAVES_PER_STAGE + leaf];
            if confidence <= model.stage_thresholds[stage] {
                return WindowVerdict::Reject {
                    stage: local,
                    confidence,
                };
            }
        }
        WindowVerdict::Accept { confidence }
    }
}

/// Evaluate every level and push accepted windows into `out`.
///
/// Positions where `mask` is zero are skipped. Windows accepted after the
/// buffer is full are dropped.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip_all, fields(levels = levels.len()))
)]
pub fn evaluate(
    model: &CascadeModel,
    levels: &[Level],
    integral: &IntegralMap,
    mask: Option<&RoiMask<'_>>,
    out: &DetectionBuffer,
) {
    let shrinkage = model.shrinkage as u32;
    for level in levels {
        let [wx, wy] = level.work_rect;
        if wx == 0 || wy == 0 {
            continue;
        }
        #[cfg(feature = "tracing")]
        let _span = debug_span!("level", scale = level.scale, octave = level.octave).entered();

        let plan = LevelPlan::new(model, level);
        let [ow, oh] = level.obj_size.map(u32::from);
        let scan_row = |y: usize| {
            for x in 0..wx {
                if mask.is_some_and(|m| !m.enabled(x, y)) {
                    continue;
                }
                if let WindowVerdict::Accept { confidence } =
                    plan.evaluate_window(model, integral, x, y)
                {
                    out.push(Detection::new(
                        x as u32 * shrinkage,
                        y as u32 * shrinkage,
                        ow,
                        oh,
                        confidence,
                    ));
                }
            }
        };

        #[cfg(feature = "rayon")]
        (0..wy).into_par_iter().for_each(scan_row);
        #[cfg(not(feature = "rayon"))]
        (0..wy).for_each(scan_row);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{ChannelMap, HOG_LUV_CHANNELS};
    use crate::integral::{integrate, IntegralConfig};
    use crate::model::tests::{descriptor, octave, tree};
    use crate::pyramid::{build_levels, ScaleRange};

    /// 32x32 shrunk map, all channels zero except a mass of 20 at (10, 10)
    /// in channel 0.
    fn single_mass_integral() -> IntegralMap {
        let mut map = ChannelMap::<u32>::new(32, 32, HOG_LUV_CHANNELS);
        map.data[10 * 32 + 10] = 20;
        let mut integral = IntegralMap::default();
        integrate(&map, &IntegralConfig::default(), &mut integral).unwrap();
        integral
    }

    fn single_stage_model() -> CascadeModel {
        let desc = descriptor(vec![octave(
            0,
            [0, 0, 4, 4],
            vec![tree(0.0, 0, 10.0, [-1.0, -1.0, -1.0, 1.0])],
        )]);
        CascadeModel::load(&desc).unwrap()
    }

    #[test]
    fn masked_scan_reports_single_window() {
        let model = single_stage_model();
        let integral = single_mass_integral();
        let pyr = build_levels(&model, 32, 32, &ScaleRange::new(1.0, 1.0, 1));

        let mut mask_data = vec![0u8; 32 * 32];
        for y in 10..32 {
            for x in 10..32 {
                mask_data[y * 32 + x] = 1;
            }
        }
        let mask = RoiMask::new(32, 32, &mask_data).unwrap();
        let out = DetectionBuffer::default();
        evaluate(&model, &pyr.levels, &integral, Some(&mask), &out);
        assert_eq!(out.to_vec(), vec![Detection::new(10, 10, 4, 4, 1.0)]);

        let out = DetectionBuffer::default();
        evaluate(&model, &pyr.levels, &integral, None, &out);
        let mut hits: Vec<(u32, u32)> = out.to_vec().iter().map(|d| (d.x, d.y)).collect();
        hits.sort_unstable();
        let expected: Vec<(u32, u32)> = (7..=10)
            .flat_map(|x| (7..=10).map(move |y| (x, y)))
            .collect();
        assert_eq!(hits, expected);
    }

    #[test]
    fn rejection_stops_at_first_failing_stage() {
        let desc = descriptor(vec![octave(
            0,
            [0, 0, 4, 4],
            vec![
                tree(0.5, 0, 10.0, [-1.0, -1.0, -1.0, 1.0]),
                tree(0.0, 0, 10.0, [5.0, 5.0, 5.0, 5.0]),
            ],
        )]);
        let model = CascadeModel::load(&desc).unwrap();
        let integral = single_mass_integral();
        let pyr = build_levels(&model, 32, 32, &ScaleRange::new(1.0, 1.0, 1));
        let plan = LevelPlan::new(&model, &pyr.levels[0]);

        // empty window: stage 0 rejects even though stage 1 would pass
        assert_eq!(
            plan.evaluate_window(&model, &integral, 0, 0),
            WindowVerdict::Reject {
                stage: 0,
                confidence: -1.0
            }
        );
        // covering window: 1.0 > 0.5, then 6.0 > 0.0
        assert_eq!(
            plan.evaluate_window(&model, &integral, 8, 8),
            WindowVerdict::Accept { confidence: 6.0 }
        );
    }

    #[test]
    fn threshold_equal_to_confidence_rejects() {
        let desc = descriptor(vec![octave(
            0,
            [0, 0, 4, 4],
            vec![tree(1.0, 0, 10.0, [-1.0, -1.0, -1.0, 1.0])],
        )]);
        let model = CascadeModel::load(&desc).unwrap();
        let integral = single_mass_integral();
        let pyr = build_levels(&model, 32, 32, &ScaleRange::new(1.0, 1.0, 1));
        let plan = LevelPlan::new(&model, &pyr.levels[0]);
        assert!(matches!(
            plan.evaluate_window(&model, &integral, 10, 10),
            WindowVerdict::Reject { stage: 0, .. }
        ));
    }

    #[test]
    fn full_buffer_drops_extra_windows() {
        let model = single_stage_model();
        let integral = single_mass_integral();
        let pyr = build_levels(&model, 32, 32, &ScaleRange::new(1.0, 1.0, 1));
        let out = DetectionBuffer::with_capacity(3);
        evaluate(&model, &pyr.levels, &integral, None, &out);
        assert_eq!(out.len(), 3);
        assert_eq!(out.dropped(), 13);
    }

    #[test]
    fn downscaled_corner_nodes_rescale_area() {
        let desc = descriptor(vec![octave(
            -1,
            [0, 0, 3, 3],
            vec![tree(0.0, 0, 10.0, [0.0; 4])],
        )]);
        let model = CascadeModel::load(&desc).unwrap();
        let oct = model.octaves[0];
        assert!(!oct.is_up());
        let level = Level::new(&oct, 0.25, [16, 16]);
        let node = ScaledNode::new(&model.nodes[0], &level);
        // 1.5 rounds to even: 2
        assert_eq!(node.rect, [0, 0, 2, 2]);
        let approx = 4.0 / (9.0 * 0.25);
        let expected = 10.0 * approx * level.scaling[0];
        assert!((node.threshold - expected).abs() < 1e-5);
    }

    #[test]
    fn upscaled_extent_nodes_become_corners() {
        let desc = descriptor(vec![octave(
            0,
            [1, 2, 3, 2],
            vec![tree(0.0, 0, 8.0, [0.0; 4])],
        )]);
        let model = CascadeModel::load(&desc).unwrap();
        let level = Level::new(&model.octaves[0], 2.0, [16, 16]);
        let node = ScaledNode::new(&model.nodes[0], &level);
        assert_eq!(node.rect, [2, 4, 8, 8]);
        // exact doubling keeps the area ratio at one
        assert!((node.threshold - 8.0).abs() < 1e-6);
    }

    #[test]
    fn mask_shrink_enables_any_hit_block() {
        let mut full = vec![0u8; 8 * 4];
        full[8 + 5] = 255;
        let mask = RoiMask::new(8, 4, &full).unwrap();
        assert_eq!(mask.shrink(2), vec![0, 0, 1, 0, 0, 0, 0, 0]);
        assert!(mask.expect_size(8, 4).is_ok());
        assert!(mask.expect_size(4, 4).is_err());
        assert!(RoiMask::new(8, 4, &full[..7]).is_err());
    }
}
