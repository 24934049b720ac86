//! `image` crate front end for [`SoftCascade`].

use crate::detector::{FrameInput, SoftCascade};
use image::{DynamicImage, GrayImage, RgbImage};
use softcascade_core::error::Result;
use softcascade_core::{ColorFrame, Detection, InputError, RoiMask};

/// Borrow an `RgbImage` as a pipeline frame.
pub fn color_frame(img: &RgbImage) -> ColorFrame<'_> {
    ColorFrame {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.as_raw(),
    }
}

/// Borrow a `GrayImage` as a mask; non-zero pixels are enabled.
pub fn roi_mask(mask: &GrayImage) -> RoiMask<'_> {
    RoiMask {
        width: mask.width() as usize,
        height: mask.height() as usize,
        data: mask.as_raw(),
    }
}

/// The RGB8 buffer of `img`, or an error for any other pixel format.
pub fn rgb8(img: &DynamicImage) -> Result<&RgbImage, InputError> {
    img.as_rgb8()
        .ok_or_else(|| InputError::UnsupportedPixelFormat(format!("{:?}", img.color())))
}

impl SoftCascade {
    /// Detect objects in an RGB image.
    ///
    /// `roi` is a full-resolution mask of the same size as `img`; it is shrunk
    /// to the cascade's channel resolution before scanning.
    pub fn detect_rgb(&mut self, img: &RgbImage, roi: Option<&GrayImage>) -> Result<Vec<Detection>> {
        let frame = color_frame(img);
        let Some(roi) = roi else {
            return self.detect(FrameInput::Color(frame), None);
        };

        let full = roi_mask(roi);
        full.expect_size(frame.width, frame.height)?;
        let shrinkage = self
            .model()
            .map(|m| m.shrinkage as usize)
            .unwrap_or(1)
            .max(1);
        let shrunk = full.shrink(shrinkage);
        let mask = RoiMask::new(frame.width / shrinkage, frame.height / shrinkage, &shrunk)?;
        self.detect(FrameInput::Color(frame), Some(&mask))
    }

    /// Detect objects in a decoded image. Only 8-bit RGB is accepted.
    pub fn detect_image(
        &mut self,
        img: &DynamicImage,
        roi: Option<&GrayImage>,
    ) -> Result<Vec<Detection>> {
        let rgb = rgb8(img)?;
        self.detect_rgb(rgb, roi)
    }
}
