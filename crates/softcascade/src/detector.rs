//! Stateful soft-cascade detector.
//!
//! [`SoftCascade`] owns the loaded model, the level set for the current
//! frame size and every per-frame buffer (shrunk channels, integral map,
//! detection slots), so repeated calls on same-sized frames allocate nothing.
//! A detector is driven through `&mut self`; run one instance per thread or
//! serialize access.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use softcascade_core::error::Result;
use softcascade_core::{
    build_levels, evaluate, integrate, suppress, CascadeDescriptor, CascadeModel,
    ChannelFeatureExtractor, ChannelMap, ColorFrame, Detection, DetectionBuffer, HogLuvExtractor,
    InputError, IntegralConfig, IntegralMap, Level, LevelPyramid, ParseError, RoiMask,
    ScaleRange, StateError, SuppressionParams, HOG_LUV_CHANNELS, MAX_DETECTIONS,
};
use std::path::Path;
use std::sync::Arc;

#[cfg(feature = "tracing")]
use tracing::{debug_span, instrument};

/// Detection flag bits. The low nibble selects the rejection mode:
/// suppression runs unless it equals [`DetectFlags::NO_REJECT`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DetectFlags(pub u32);

impl DetectFlags {
    /// Return raw detections.
    pub const NO_REJECT: u32 = 1;
    /// Pairwise overlap suppression.
    pub const DOLLAR: u32 = 2;
    pub const NMS_MASK: u32 = 0xF;

    pub fn raw() -> Self {
        Self(Self::NO_REJECT)
    }

    pub fn suppressed() -> Self {
        Self(Self::DOLLAR)
    }

    #[inline]
    pub fn suppression_enabled(self) -> bool {
        self.0 & Self::NMS_MASK != Self::NO_REJECT
    }
}

impl Default for DetectFlags {
    fn default() -> Self {
        Self::raw()
    }
}

/// Runtime parameters of a [`SoftCascade`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectorParams {
    /// Scale search range.
    pub scales: ScaleRange,
    pub flags: DetectFlags,
    pub suppression: SuppressionParams,
    pub integral: IntegralConfig,
    /// Raw detection capacity per frame.
    pub max_detections: usize,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            scales: ScaleRange::default(),
            flags: DetectFlags::default(),
            suppression: SuppressionParams::default(),
            integral: IntegralConfig::default(),
            max_detections: MAX_DETECTIONS,
        }
    }
}

impl DetectorParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scales(mut self, scales: ScaleRange) -> Self {
        self.scales = scales;
        self
    }

    pub fn with_flags(mut self, flags: DetectFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_suppression(mut self, suppression: SuppressionParams) -> Self {
        self.suppression = suppression;
        self
    }

    pub fn with_integral(mut self, integral: IntegralConfig) -> Self {
        self.integral = integral;
        self
    }

    pub fn with_max_detections(mut self, max_detections: usize) -> Self {
        self.max_detections = max_detections;
        self
    }
}

/// Frame handed to [`SoftCascade::detect`].
#[derive(Clone, Copy, Debug)]
pub enum FrameInput<'a> {
    /// Interleaved 8-bit RGB frame; channels and integral are computed.
    Color(ColorFrame<'a>),
    /// Precomputed integral of the shrunk channel stack. The frame size is
    /// the band size times the cascade shrinkage.
    Integral(&'a IntegralMap),
}

pub struct SoftCascade {
    params: DetectorParams,
    model: Option<Arc<CascadeModel>>,
    extractor: Option<Box<dyn ChannelFeatureExtractor>>,
    levels: Option<LevelPyramid>,
    channels: ChannelMap<u32>,
    integral: IntegralMap,
    objects: DetectionBuffer,
}

impl Default for SoftCascade {
    fn default() -> Self {
        Self::new(DetectorParams::default())
    }
}

impl SoftCascade {
    pub fn new(params: DetectorParams) -> Self {
        let objects = DetectionBuffer::with_capacity(params.max_detections);
        Self {
            params,
            model: None,
            extractor: None,
            levels: None,
            channels: ChannelMap::default(),
            integral: IntegralMap::default(),
            objects,
        }
    }

    pub fn params(&self) -> &DetectorParams {
        &self.params
    }

    /// Replace the runtime parameters. Levels are rebuilt lazily when the
    /// scale range changed.
    pub fn set_params(&mut self, params: DetectorParams) {
        self.params = params;
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Snapshot of the loaded model.
    pub fn model(&self) -> Option<Arc<CascadeModel>> {
        self.model.clone()
    }

    /// Level set used by the last detection, if any.
    pub fn levels(&self) -> Option<&LevelPyramid> {
        self.levels.as_ref()
    }

    /// Build a model from `desc` and make it current.
    ///
    /// On error the previously loaded model, levels and buffers are kept.
    pub fn load(&mut self, desc: &CascadeDescriptor) -> Result<(), ParseError> {
        let model = CascadeModel::load(desc)?;
        info!(
            "loaded cascade: {} octaves, {} stages, object {}x{}, shrinkage {}",
            model.octaves.len(),
            model.stage_count(),
            model.object_size[0],
            model.object_size[1],
            model.shrinkage
        );

        let shrinkage = model.shrinkage as usize;
        let extractor: Box<dyn ChannelFeatureExtractor> = match self.extractor.take() {
            Some(ex) if ex.shrinkage() == shrinkage => ex,
            _ => Box::new(HogLuvExtractor::new(shrinkage)),
        };
        self.extractor = Some(extractor);
        self.model = Some(Arc::new(model));
        self.levels = None;
        Ok(())
    }

    /// Load a JSON cascade descriptor from disk.
    pub fn load_path(&mut self, path: &Path) -> Result<(), ParseError> {
        let desc = CascadeDescriptor::from_path(path)?;
        self.load(&desc)
    }

    /// Swap in a custom channel extractor. Its shrinkage must match the
    /// loaded cascade.
    pub fn set_extractor(&mut self, extractor: Box<dyn ChannelFeatureExtractor>) -> Result<()> {
        let model = self.model.as_ref().ok_or(StateError::NotLoaded)?;
        let expected = model.shrinkage as usize;
        if extractor.shrinkage() != expected {
            return Err(InputError::ShrinkageMismatch {
                expected,
                got: extractor.shrinkage(),
            }
            .into());
        }
        self.extractor = Some(extractor);
        Ok(())
    }

    /// Run the full pipeline on one frame.
    ///
    /// `mask`, when given, is in shrunk pixels and must match the shrunk
    /// frame size. Returns raw detections, or suppressed ones when
    /// `params.flags` enables suppression.
    #[cfg_attr(feature = "tracing", instrument(level = "info", skip_all))]
    pub fn detect(
        &mut self,
        input: FrameInput<'_>,
        mask: Option<&RoiMask<'_>>,
    ) -> Result<Vec<Detection>> {
        let model = self.model.clone().ok_or(StateError::NotLoaded)?;
        self.params.scales.validate()?;
        let shrinkage = model.shrinkage as usize;

        let (frame_w, frame_h, shrunk_w, shrunk_h) = match &input {
            FrameInput::Color(frame) => (
                frame.width,
                frame.height,
                frame.width / shrinkage,
                frame.height / shrinkage,
            ),
            FrameInput::Integral(map) => {
                if map.channels != HOG_LUV_CHANNELS {
                    return Err(InputError::IntegralShape {
                        width: map.width,
                        height: map.height,
                        channels: map.channels,
                        len: map.data.len(),
                    }
                    .into());
                }
                let (w, h) = (map.source_width(), map.band_height());
                (w * shrinkage, h * shrinkage, w, h)
            }
        };
        if let Some(mask) = mask {
            mask.expect_size(shrunk_w, shrunk_h)?;
        }

        self.prepare_levels(&model, frame_w, frame_h);
        if self.objects.capacity() != self.params.max_detections {
            self.objects.reset(self.params.max_detections);
        } else {
            self.objects.clear();
        }

        let integral = match input {
            FrameInput::Color(frame) => {
                let extractor = self.extractor.as_mut().ok_or(StateError::NotLoaded)?;
                {
                    #[cfg(feature = "tracing")]
                    let _span = debug_span!("channels", w = frame.width, h = frame.height).entered();
                    extractor.apply(&frame, &mut self.channels)?;
                }
                let path = integrate(&self.channels, &self.params.integral, &mut self.integral)?;
                debug!("integral {}x{} via {:?}", self.integral.width, self.integral.height, path);
                &self.integral
            }
            FrameInput::Integral(map) => map,
        };

        let levels: &[Level] = match &self.levels {
            Some(pyr) => &pyr.levels,
            None => &[],
        };
        evaluate(&model, levels, integral, mask, &self.objects);

        let dropped = self.objects.dropped();
        if dropped > 0 {
            warn!(
                "detection buffer full: kept {}, dropped {dropped}",
                self.objects.capacity()
            );
        }
        let raw = self.objects.to_vec();
        if self.params.flags.suppression_enabled() {
            let kept = suppress(&raw, &self.params.suppression);
            debug!("suppression kept {} of {} detections", kept.len(), raw.len());
            Ok(kept)
        } else {
            Ok(raw)
        }
    }

    /// Run [`Self::detect`] on the given pool. Every pipeline stage uses the
    /// pool's workers; the call returns when all stages have finished.
    #[cfg(feature = "rayon")]
    pub fn detect_in(
        &mut self,
        pool: &rayon::ThreadPool,
        input: FrameInput<'_>,
        mask: Option<&RoiMask<'_>>,
    ) -> Result<Vec<Detection>> {
        pool.install(|| self.detect(input, mask))
    }

    fn prepare_levels(&mut self, model: &CascadeModel, frame_w: usize, frame_h: usize) {
        let scales = self.params.scales;
        let fresh = self
            .levels
            .as_ref()
            .is_some_and(|pyr| pyr.matches(frame_w, frame_h, &scales));
        if fresh {
            return;
        }
        let pyr = build_levels(model, frame_h, frame_w, &scales);
        debug!(
            "built {} levels ({} downscaled) for {}x{} frame",
            pyr.levels.len(),
            pyr.downscales,
            frame_w,
            frame_h
        );
        self.levels = Some(pyr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use softcascade_core::CascadeError;

    #[test]
    fn flags_use_bitwise_sentinel() {
        assert!(!DetectFlags::raw().suppression_enabled());
        assert!(DetectFlags::suppressed().suppression_enabled());
        assert!(DetectFlags(0).suppression_enabled());
        // higher bits do not affect the rejection nibble
        assert!(!DetectFlags(DetectFlags::NO_REJECT | 0x20).suppression_enabled());
        assert!(DetectFlags(DetectFlags::NO_REJECT | DetectFlags::DOLLAR).suppression_enabled());
    }

    #[test]
    fn detect_before_load_is_a_state_error() {
        let mut det = SoftCascade::default();
        let data = vec![0u8; 12 * 12 * 3];
        let frame = ColorFrame::new(12, 12, &data).unwrap();
        let err = det.detect(FrameInput::Color(frame), None).unwrap_err();
        assert!(matches!(err, CascadeError::State(StateError::NotLoaded)));
    }
}
