//! Scale levels: the log-spaced set of detection scales, each bound to the
//! trained octave closest to it in log space.
use crate::error::InputError;
use crate::model::{CascadeModel, Octave};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Scale search range for a frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScaleRange {
    /// Smallest object scale relative to the canonical model size.
    pub min_scale: f32,
    /// Largest object scale.
    pub max_scale: f32,
    /// Maximum number of levels between `min_scale` and `max_scale`.
    pub levels: usize,
}

impl Default for ScaleRange {
    fn default() -> Self {
        Self {
            min_scale: 0.4,
            max_scale: 5.0,
            levels: 55,
        }
    }
}

impl ScaleRange {
    pub fn new(min_scale: f32, max_scale: f32, levels: usize) -> Self {
        Self {
            min_scale,
            max_scale,
            levels,
        }
    }

    pub fn validate(&self) -> Result<(), InputError> {
        let ok = self.min_scale.is_finite()
            && self.max_scale.is_finite()
            && self.min_scale > 0.0
            && self.max_scale >= self.min_scale
            && self.levels > 0;
        if ok {
            Ok(())
        } else {
            Err(InputError::InvalidScaleRange {
                min: self.min_scale,
                max: self.max_scale,
                levels: self.levels,
            })
        }
    }
}

/// One detection scale.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Level {
    /// Index of the octave this level evaluates.
    pub octave: usize,
    /// Stage count of that octave.
    pub stages: usize,
    /// Absolute object scale.
    pub scale: f32,
    /// `scale / octave.scale`.
    pub rel_scale: f32,
    /// Number of window positions `[x, y]` in shrunk pixels.
    pub work_rect: [usize; 2],
    /// Object size at this level in frame pixels.
    pub obj_size: [u16; 2],
    /// Threshold scaling for `[gradient channels, colour channels]`.
    pub scaling: [f32; 2],
    /// Rectangle layout flag inherited from the octave.
    pub is_up: bool,
}

const GRADIENT_SCALE_FACTOR: f32 = 0.89;
const GRADIENT_SCALE_EXPONENT: f32 = 1.099;

impl Level {
    /// `free` is the frame extent left after placing one object, in pixels.
    pub fn new(octave: &Octave, scale: f32, free: [usize; 2]) -> Self {
        let rel = scale / octave.scale;
        let shrinkage = octave.shrinkage.max(1) as f32;

        let scaling = if (rel - 1.0).abs() < f32::EPSILON {
            [1.0, 1.0]
        } else {
            let gradient = if rel < 1.0 {
                GRADIENT_SCALE_FACTOR * rel.powf(GRADIENT_SCALE_EXPONENT / std::f32::consts::LN_2)
            } else {
                1.0
            };
            [gradient, rel * rel]
        };

        let obj = |v: u16| (v as f32 * rel).round().clamp(0.0, u16::MAX as f32) as u16;

        Self {
            octave: octave.index as usize,
            stages: octave.stages as usize,
            scale,
            rel_scale: rel,
            work_rect: [
                (free[0] as f32 / shrinkage).round_ties_even() as usize,
                (free[1] as f32 / shrinkage).round_ties_even() as usize,
            ],
            obj_size: [obj(octave.size[0]), obj(octave.size[1])],
            scaling,
            is_up: octave.is_up(),
        }
    }

    #[inline]
    pub fn positions(&self) -> usize {
        self.work_rect[0] * self.work_rect[1]
    }
}

/// Inputs the level set was computed from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LevelKey {
    pub frame_w: usize,
    pub frame_h: usize,
    pub range: ScaleRange,
}

/// Level set for one frame size.
#[derive(Clone, Debug, PartialEq)]
pub struct LevelPyramid {
    pub levels: Vec<Level>,
    /// Number of levels bound to octaves with scale < 1.
    pub downscales: usize,
    pub key: LevelKey,
}

impl LevelPyramid {
    /// Whether this level set was built for the given inputs.
    pub fn matches(&self, frame_w: usize, frame_h: usize, range: &ScaleRange) -> bool {
        self.key
            == LevelKey {
                frame_w,
                frame_h,
                range: *range,
            }
    }
}

/// Index of the octave whose log scale is closest to `ln_scale`. Ties go to
/// the earlier octave.
pub fn fit_octave(octaves: &[Octave], ln_scale: f32) -> usize {
    let mut best = 0;
    let mut best_dist = f32::INFINITY;
    for (i, oct) in octaves.iter().enumerate() {
        let dist = (ln_scale - oct.scale.ln()).abs();
        if dist < best_dist {
            best = i;
            best_dist = dist;
        }
    }
    best
}

/// Build the level set for a `frame_w x frame_h` frame.
///
/// Scales are geometrically spaced from `min_scale` to `max_scale`.
/// Generation stops early once the object no longer fits the frame.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(model, range), fields(levels = range.levels))
)]
pub fn build_levels(
    model: &CascadeModel,
    frame_h: usize,
    frame_w: usize,
    range: &ScaleRange,
) -> LevelPyramid {
    let key = LevelKey {
        frame_w,
        frame_h,
        range: *range,
    };
    let mut levels = Vec::with_capacity(range.levels);
    let mut downscales = 0;
    if model.octaves.is_empty() || range.levels == 0 {
        return LevelPyramid {
            levels,
            downscales,
            key,
        };
    }

    let (min, max) = (range.min_scale, range.max_scale);
    let log_step = if range.levels > 1 {
        (max.ln() - min.ln()) / (range.levels - 1) as f32
    } else {
        0.0
    };

    let [obj_w, obj_h] = model.object_size;
    let mut scale = min;
    for _ in 0..range.levels {
        let free_w = (frame_w as f32 - obj_w as f32 * scale).max(0.0) as usize;
        let free_h = (frame_h as f32 - obj_h as f32 * scale).max(0.0) as usize;
        if free_w == 0 || free_h == 0 {
            break;
        }

        let octave = &model.octaves[fit_octave(&model.octaves, scale.ln())];
        levels.push(Level::new(octave, scale, [free_w, free_h]));
        if octave.scale < 1.0 {
            downscales += 1;
        }

        if (scale - max).abs() < f32::EPSILON {
            break;
        }
        scale = max.min((scale.ln() + log_step).exp());
    }

    LevelPyramid {
        levels,
        downscales,
        key,
    }
}
