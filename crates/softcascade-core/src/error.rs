//! Error taxonomy shared by the core pipeline and the detector front end.

use thiserror::Error;

/// Problems found while turning a cascade descriptor into a [`crate::CascadeModel`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("unsupported stage type '{0}', expected 'BOOST'")]
    UnsupportedStageType(String),
    #[error("unsupported feature type '{0}', expected 'ICF'")]
    UnsupportedFeatureType(String),
    #[error("invalid object size {width}x{height}")]
    InvalidObjectSize { width: i32, height: i32 },
    #[error("invalid shrinkage {0}")]
    InvalidShrinkage(i32),
    #[error("cascade has no octaves")]
    NoOctaves,
    #[error("octave {octave} has no stages")]
    EmptyOctave { octave: usize },
    #[error("octave {octave} has an empty feature list")]
    NoFeatures { octave: usize },
    #[error("octave {octave} declares {declared} stages but lists {found} trees")]
    StageCountMismatch {
        octave: usize,
        declared: i32,
        found: usize,
    },
    #[error("octave {octave}, stage {stage}: expected {expected} internal node values, found {found}")]
    MalformedNodes {
        octave: usize,
        stage: usize,
        expected: usize,
        found: usize,
    },
    #[error("octave {octave}, stage {stage}: expected {expected} leaf values, found {found}")]
    MalformedLeaves {
        octave: usize,
        stage: usize,
        expected: usize,
        found: usize,
    },
    #[error("octave {octave}, stage {stage}: feature index {index} out of range ({len} features)")]
    FeatureIndexOutOfRange {
        octave: usize,
        stage: usize,
        index: i64,
        len: usize,
    },
    #[error("octave {octave}, feature {feature}: channel {channel} out of range (< {max})")]
    ChannelOutOfRange {
        octave: usize,
        feature: usize,
        channel: i32,
        max: usize,
    },
    #[error("malformed cascade descriptor: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for ParseError {
    fn from(err: serde_json::Error) -> Self {
        ParseError::Malformed(err.to_string())
    }
}

/// The requested execution path is not available for this input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("integral fast path supports widths up to {max}, got {width} and the row fallback is disabled")]
    IntegralWidth { width: usize, max: usize },
}

/// Operation invoked in the wrong lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("no cascade loaded")]
    NotLoaded,
}

/// Caller supplied data the pipeline cannot consume.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputError {
    #[error("unsupported pixel format {0}, expected 8-bit RGB")]
    UnsupportedPixelFormat(String),
    #[error("frame {width}x{height} needs {expected} bytes, got {len}")]
    FrameBuffer {
        width: usize,
        height: usize,
        len: usize,
        expected: usize,
    },
    #[error("frame {width}x{height} is smaller than one {shrinkage}x{shrinkage} block")]
    FrameTooSmall {
        width: usize,
        height: usize,
        shrinkage: usize,
    },
    #[error("roi mask {width}x{height} needs {expected} bytes, got {len}")]
    MaskBuffer {
        width: usize,
        height: usize,
        len: usize,
        expected: usize,
    },
    #[error("roi mask is {got_w}x{got_h}, expected {expected_w}x{expected_h}")]
    MaskSize {
        expected_w: usize,
        expected_h: usize,
        got_w: usize,
        got_h: usize,
    },
    #[error("integral map {width}x{height} with {channels} channels and {len} values is malformed")]
    IntegralShape {
        width: usize,
        height: usize,
        channels: usize,
        len: usize,
    },
    #[error("invalid scale range [{min}, {max}] with {levels} levels")]
    InvalidScaleRange { min: f32, max: f32, levels: usize },
    #[error("extractor shrinkage {got} does not match cascade shrinkage {expected}")]
    ShrinkageMismatch { expected: usize, got: usize },
}

/// Umbrella error returned by the detection pipeline.
#[derive(Debug, Error)]
pub enum CascadeError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Input(#[from] InputError),
}

pub type Result<T, E = CascadeError> = core::result::Result<T, E>;
