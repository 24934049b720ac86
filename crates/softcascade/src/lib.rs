//! Multi-scale soft-cascade object detection on `image` buffers.
//!
//! This crate wraps `softcascade-core` with a stateful detector and I/O:
//! - [`detector`] – [`SoftCascade`]: model lifecycle, cached scale levels and
//!   reusable per-frame buffers.
//! - [`image`] – `RgbImage`/`DynamicImage` entry points and ROI masks.
//! - [`app`] – JSON-configured detection run used by the CLI.
//! - [`logger`] – a simple `log` implementation used by the CLI.
//!
//! # Features
//!
//! - `rayon` *(default)* – parallel pipeline stages and
//!   [`SoftCascade::detect_in`] for running on a dedicated pool.
//! - `tracing` – spans around model loading, each pipeline stage and every
//!   scale level.

pub mod app;
pub mod detector;
pub mod image;
pub mod logger;

// Re-export the types needed to drive the detector. Lower-level stages
// (channels, integral, evaluation) stay in `softcascade-core`.
pub use softcascade_core::{
    CascadeDescriptor, CascadeError, CascadeModel, Detection, IntegralConfig, RoiMask,
    ScaleRange, SuppressionParams,
};

pub use crate::detector::{DetectFlags, DetectorParams, FrameInput, SoftCascade};
pub use crate::image::{color_frame, roi_mask};
