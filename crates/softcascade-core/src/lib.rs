//! Core primitives for soft-cascade object detection over integral channel
//! features.
//!
//! # Overview
//!
//! A soft cascade is a long chain of depth-2 boosted stumps trained at a
//! handful of canonical scales ("octaves"). Detection runs the chain at every
//! window position of every scale level and rejects a window as soon as its
//! running score drops to a stage threshold. The building blocks are:
//!
//! - [`model`] – descriptor parsing and the flat [`CascadeModel`].
//! - [`pyramid`] – log-spaced scale [`Level`]s bound to the closest octave.
//! - [`channels`] – gradient histogram + magnitude + L*u*v* channels and the
//!   block-sum shrink, behind the [`ChannelFeatureExtractor`] trait.
//! - [`integral`] – summed-area table over the stacked shrunk channels.
//! - [`cascade`] – per-level window evaluation producing raw detections.
//! - [`suppress`] – pairwise overlap suppression of raw detections.
//!
//! The crate works on raw slices; the `softcascade` crate adds `image`
//! integration and a stateful detector.
//!
//! # Features
//!
//! - `rayon` *(default)* – row-parallel channel computation and integral
//!   scan, position-parallel cascade evaluation and parallel suppression.
//!   Numerical results are identical with and without it.
//! - `tracing` – emits spans for each pipeline stage and scale level.

// Row iterator over a mutable slice: parallel with `rayon`, sequential
// otherwise. Both support `enumerate`, `zip` and `for_each`; callers import
// `rayon::prelude::*` under the feature.
#[cfg(feature = "rayon")]
macro_rules! rows_mut {
    ($slice:expr, $width:expr) => {
        $slice.par_chunks_mut($width)
    };
}

#[cfg(not(feature = "rayon"))]
macro_rules! rows_mut {
    ($slice:expr, $width:expr) => {
        $slice.chunks_mut($width)
    };
}

pub mod cascade;
pub mod channels;
pub mod detection;
pub mod error;
pub mod integral;
pub mod model;
pub mod pyramid;
pub mod suppress;

pub use crate::cascade::{evaluate, LevelPlan, RoiMask, ScaledNode, WindowVerdict};
pub use crate::channels::{
    ChannelFeatureExtractor, ChannelMap, ColorFrame, HogLuvExtractor, HOG_BINS, HOG_LUV_CHANNELS,
};
pub use crate::detection::{Detection, DetectionBuffer, KIND_OBJECT, MAX_DETECTIONS};
pub use crate::error::{CapabilityError, CascadeError, InputError, ParseError, StateError};
pub use crate::integral::{integrate, IntegralConfig, IntegralMap, IntegralPath};
pub use crate::model::{CascadeDescriptor, CascadeModel, Node, Octave, RectLayout};
pub use crate::pyramid::{build_levels, fit_octave, Level, LevelPyramid, ScaleRange};
pub use crate::suppress::{suppress, SuppressionParams};
