//! Integral channel features: oriented gradient histogram, gradient magnitude
//! and L*u*v* colour, shrunk by block summation.
//!
//! All channels of a frame live in one stacked buffer: channel `c` occupies
//! rows `c * h .. (c + 1) * h`. The default layout is
//!
//! | channels | content |
//! |----------|---------|
//! | 0..6     | gradient magnitude routed to its orientation bin |
//! | 6        | gradient magnitude |
//! | 7..10    | L, u, v |
use crate::error::InputError;
use std::f32::consts::{FRAC_1_SQRT_2, PI};
use std::sync::OnceLock;

#[cfg(feature = "rayon")]
use rayon::prelude::*;
#[cfg(feature = "tracing")]
use tracing::instrument;

/// Orientation bins of the gradient histogram.
pub const HOG_BINS: usize = 6;
/// Gradient bins, magnitude and three colour channels.
pub const HOG_LUV_CHANNELS: usize = HOG_BINS + 1 + 3;
/// Channels below this index are gradient based; the rest are colour.
pub const FIRST_COLOR_CHANNEL: usize = HOG_BINS + 1;

/// Borrowed interleaved 8-bit RGB frame.
#[derive(Clone, Copy, Debug)]
pub struct ColorFrame<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8],
}

impl<'a> ColorFrame<'a> {
    pub fn new(width: usize, height: usize, data: &'a [u8]) -> Result<Self, InputError> {
        let expected = width * height * 3;
        if data.len() != expected {
            return Err(InputError::FrameBuffer {
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
}

/// Stack of equally sized single-channel planes in row-major layout.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChannelMap<T> {
    pub width: usize,
    /// Height of one channel band.
    pub height: usize,
    pub channels: usize,
    pub data: Vec<T>,
}

impl<T: Copy + Default> ChannelMap<T> {
    pub fn new(width: usize, height: usize, channels: usize) -> Self {
        Self {
            width,
            height,
            channels,
            data: vec![T::default(); width * height * channels],
        }
    }

    /// Reshape in place, reusing the allocation. Contents are reset.
    pub fn resize(&mut self, width: usize, height: usize, channels: usize) {
        self.width = width;
        self.height = height;
        self.channels = channels;
        self.data.clear();
        self.data.resize(width * height * channels, T::default());
    }

    #[inline]
    pub fn band_len(&self) -> usize {
        self.width * self.height
    }

    #[inline]
    pub fn band(&self, channel: usize) -> &[T] {
        let n = self.band_len();
        &self.data[channel * n..(channel + 1) * n]
    }

    #[inline]
    pub fn band_mut(&mut self, channel: usize) -> &mut [T] {
        let n = self.band_len();
        &mut self.data[channel * n..(channel + 1) * n]
    }

    #[inline]
    pub fn at(&self, channel: usize, x: usize, y: usize) -> T {
        self.data[(channel * self.height + y) * self.width + x]
    }

    /// Rows of the stacked buffer.
    #[inline]
    pub fn stacked_height(&self) -> usize {
        self.height * self.channels
    }
}

/// Produces the shrunk channel stack consumed by the integral accumulator.
pub trait ChannelFeatureExtractor: Send {
    /// Number of channels written by [`Self::apply`].
    fn channels(&self) -> usize;
    /// Block size of the shrinking step.
    fn shrinkage(&self) -> usize;
    /// Compute channels for `frame` and write the shrunk stack into `out`.
    fn apply(&mut self, frame: &ColorFrame<'_>, out: &mut ChannelMap<u32>)
        -> Result<(), InputError>;
}

/// Gradient histogram + magnitude + L*u*v* extractor.
#[derive(Clone, Debug)]
pub struct HogLuvExtractor {
    shrinkage: usize,
    gray: Vec<u8>,
    magnitude: Vec<u8>,
    orientation: Vec<u8>,
    full: ChannelMap<u8>,
}

impl HogLuvExtractor {
    pub fn new(shrinkage: usize) -> Self {
        Self {
            shrinkage: shrinkage.max(1),
            gray: Vec::new(),
            magnitude: Vec::new(),
            orientation: Vec::new(),
            full: ChannelMap::default(),
        }
    }

    /// Full-resolution channel stack of the last frame.
    pub fn full_channels(&self) -> &ChannelMap<u8> {
        &self.full
    }
}

impl ChannelFeatureExtractor for HogLuvExtractor {
    fn channels(&self) -> usize {
        HOG_LUV_CHANNELS
    }

    fn shrinkage(&self) -> usize {
        self.shrinkage
    }

    #[cfg_attr(
        feature = "tracing",
        instrument(
            level = "debug",
            skip(self, frame, out),
            fields(w = frame.width, h = frame.height, shrinkage = self.shrinkage)
        )
    )]
    fn apply(
        &mut self,
        frame: &ColorFrame<'_>,
        out: &mut ChannelMap<u32>,
    ) -> Result<(), InputError> {
        let (w, h) = (frame.width, frame.height);
        if w < self.shrinkage || h < self.shrinkage {
            return Err(InputError::FrameTooSmall {
                width: w,
                height: h,
                shrinkage: self.shrinkage,
            });
        }
        let n = w * h;

        self.gray.resize(n, 0);
        rgb_to_gray(frame.data, w, &mut self.gray);

        self.magnitude.resize(n, 0);
        self.orientation.resize(n, 0);
        gradient_polar(
            &self.gray,
            w,
            h,
            HOG_BINS,
            &mut self.magnitude,
            &mut self.orientation,
        );

        self.full.resize(w, h, HOG_LUV_CHANNELS);
        let (grad, luv) = self.full.data.split_at_mut(n * FIRST_COLOR_CHANNEL);
        histogram_bands(&self.magnitude, &self.orientation, w, h, HOG_BINS, grad);
        luv_channels(frame.data, w, h, luv);

        shrink_sum(&self.full, self.shrinkage, out);
        Ok(())
    }
}

/// Integer luma, `(77 R + 150 G + 29 B + 128) >> 8`.
pub fn rgb_to_gray(rgb: &[u8], width: usize, out: &mut [u8]) {
    if width == 0 {
        return;
    }
    rows_mut!(out, width).enumerate().for_each(|(y, row)| {
        let src = &rgb[y * width * 3..(y + 1) * width * 3];
        for (dst, px) in row.iter_mut().zip(src.chunks_exact(3)) {
            let v = 77 * px[0] as u32 + 150 * px[1] as u32 + 29 * px[2] as u32 + 128;
            *dst = (v >> 8) as u8;
        }
    });
}

/// Centred-difference gradient magnitude (scaled into `u8`) and unsigned
/// orientation bin per pixel. Borders replicate the edge pixel.
pub fn gradient_polar(
    gray: &[u8],
    width: usize,
    height: usize,
    bins: usize,
    magnitude: &mut [u8],
    orientation: &mut [u8],
) {
    if width == 0 || height == 0 {
        return;
    }
    let bins_f = bins as f32;
    rows_mut!(magnitude, width)
        .zip(rows_mut!(orientation, width))
        .enumerate()
        .for_each(|(y, (mag_row, ori_row))| {
            let up = &gray[y.saturating_sub(1) * width..][..width];
            let down = &gray[(y + 1).min(height - 1) * width..][..width];
            let mid = &gray[y * width..][..width];
            for x in 0..width {
                let left = mid[x.saturating_sub(1)] as f32;
                let right = mid[(x + 1).min(width - 1)] as f32;
                let dx = right - left;
                let dy = down[x] as f32 - up[x] as f32;

                let mag = (dx * dx + dy * dy).sqrt() * FRAC_1_SQRT_2;
                mag_row[x] = mag.round().min(255.0) as u8;

                let mut angle = dy.atan2(dx);
                if angle < 0.0 {
                    angle += PI;
                }
                if angle >= PI {
                    angle -= PI;
                }
                ori_row[x] = ((angle * bins_f / PI) as usize).min(bins - 1) as u8;
            }
        });
}

/// Route each magnitude into its orientation band and append the magnitude
/// band. `out` holds `bins + 1` bands of `width * height`.
fn histogram_bands(
    magnitude: &[u8],
    orientation: &[u8],
    width: usize,
    height: usize,
    bins: usize,
    out: &mut [u8],
) {
    if width == 0 || height == 0 {
        return;
    }
    rows_mut!(out, width).enumerate().for_each(|(r, row)| {
        let band = r / height;
        let y = r % height;
        let mag = &magnitude[y * width..][..width];
        if band == bins {
            row.copy_from_slice(mag);
            return;
        }
        let ori = &orientation[y * width..][..width];
        for ((dst, &m), &o) in row.iter_mut().zip(mag).zip(ori) {
            *dst = if o as usize == band { m } else { 0 };
        }
    });
}

fn srgb_linear_lut() -> &'static [f32; 256] {
    static LUT: OnceLock<[f32; 256]> = OnceLock::new();
    LUT.get_or_init(|| {
        let mut lut = [0f32; 256];
        for (i, v) in lut.iter_mut().enumerate() {
            let c = i as f32 / 255.0;
            *v = if c <= 0.04045 {
                c / 12.92
            } else {
                ((c + 0.055) / 1.055).powf(2.4)
            };
        }
        lut
    })
}

const WHITE_U: f32 = 0.197_939_43;
const WHITE_V: f32 = 0.468_310_96;

/// 8-bit encoded CIE L*u*v* (D65) of one sRGB pixel.
pub fn rgb_to_luv(r: u8, g: u8, b: u8) -> [u8; 3] {
    let lut = srgb_linear_lut();
    let (r, g, b) = (lut[r as usize], lut[g as usize], lut[b as usize]);
    let x = 0.412_453 * r + 0.357_580 * g + 0.180_423 * b;
    let y = 0.212_671 * r + 0.715_160 * g + 0.072_169 * b;
    let z = 0.019_334 * r + 0.119_193 * g + 0.950_227 * b;

    let l = if y > 0.008_856 {
        116.0 * y.cbrt() - 16.0
    } else {
        903.3 * y
    };
    let d = x + 15.0 * y + 3.0 * z;
    let (u, v) = if d > 0.0 {
        (
            13.0 * l * (4.0 * x / d - WHITE_U),
            13.0 * l * (9.0 * y / d - WHITE_V),
        )
    } else {
        (0.0, 0.0)
    };

    let enc = |v: f32| v.round().clamp(0.0, 255.0) as u8;
    [
        enc(l * 255.0 / 100.0),
        enc((u + 134.0) * 255.0 / 354.0),
        enc((v + 140.0) * 255.0 / 262.0),
    ]
}

/// Write L, u, v bands for an interleaved RGB frame into `out`
/// (three bands of `width * height`).
pub fn luv_channels(rgb: &[u8], width: usize, height: usize, out: &mut [u8]) {
    if width == 0 || height == 0 {
        return;
    }
    let n = width * height;
    let (l_band, rest) = out.split_at_mut(n);
    let (u_band, v_band) = rest.split_at_mut(n);
    rows_mut!(l_band, width)
        .zip(rows_mut!(u_band, width))
        .zip(rows_mut!(v_band, width))
        .enumerate()
        .for_each(|(y, ((l_row, u_row), v_row))| {
            let src = &rgb[y * width * 3..(y + 1) * width * 3];
            for (x, px) in src.chunks_exact(3).enumerate() {
                let [l, u, v] = rgb_to_luv(px[0], px[1], px[2]);
                l_row[x] = l;
                u_row[x] = u;
                v_row[x] = v;
            }
        });
}

/// Sum `shrinkage x shrinkage` blocks of every channel independently.
/// Partial blocks at the right and bottom edges are dropped.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(src, out), fields(w = src.width, h = src.height))
)]
pub fn shrink_sum(src: &ChannelMap<u8>, shrinkage: usize, out: &mut ChannelMap<u32>) {
    let s = shrinkage.max(1);
    let sw = src.width / s;
    let sh = src.height / s;
    out.resize(sw, sh, src.channels);
    if sw == 0 || sh == 0 {
        return;
    }
    rows_mut!(out.data, sw).enumerate().for_each(|(r, row)| {
        let band = src.band(r / sh);
        let y0 = (r % sh) * s;
        for (x, dst) in row.iter_mut().enumerate() {
            let x0 = x * s;
            let mut acc = 0u32;
            for yy in y0..y0 + s {
                let line = &band[yy * src.width + x0..][..s];
                acc = line
                    .iter()
                    .fold(acc, |a, &v| a.wrapping_add(v as u32));
            }
            *dst = acc;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform_frame(w: usize, h: usize, rgb: [u8; 3]) -> Vec<u8> {
        rgb.iter().copied().cycle().take(w * h * 3).collect()
    }

    #[test]
    fn frame_length_is_checked() {
        let data = vec![0u8; 12];
        assert!(matches!(
            ColorFrame::new(2, 2, &data[..10]),
            Err(InputError::FrameBuffer { expected: 12, .. })
        ));
        assert!(ColorFrame::new(2, 2, &data).is_ok());
    }

    #[test]
    fn uniform_frame_has_no_gradient() {
        let data = uniform_frame(16, 8, [90, 120, 30]);
        let frame = ColorFrame::new(16, 8, &data).unwrap();
        let mut ex = HogLuvExtractor::new(4);
        let mut out = ChannelMap::default();
        ex.apply(&frame, &mut out).unwrap();

        assert_eq!((out.width, out.height, out.channels), (4, 2, HOG_LUV_CHANNELS));
        assert_eq!(ex.full_channels().stacked_height(), 8 * HOG_LUV_CHANNELS);
        for c in 0..FIRST_COLOR_CHANNEL {
            assert!(out.band(c).iter().all(|&v| v == 0), "channel {c}");
        }
        let l = rgb_to_luv(90, 120, 30)[0] as u32;
        assert!(out.band(FIRST_COLOR_CHANNEL).iter().all(|&v| v == l * 16));
    }

    #[test]
    fn horizontal_ramp_lands_in_first_bin() {
        let (w, h) = (8, 4);
        let mut gray = vec![0u8; w * h];
        for y in 0..h {
            for x in 0..w {
                gray[y * w + x] = (x * 20) as u8;
            }
        }
        let mut mag = vec![0u8; w * h];
        let mut ori = vec![0u8; w * h];
        gradient_polar(&gray, w, h, HOG_BINS, &mut mag, &mut ori);
        // interior: dx = 40, dy = 0
        let expected = (40.0 * FRAC_1_SQRT_2).round() as u8;
        assert_eq!(mag[w + 3], expected);
        assert_eq!(ori[w + 3], 0);

        let mut bands = vec![0u8; w * h * (HOG_BINS + 1)];
        histogram_bands(&mag, &ori, w, h, HOG_BINS, &mut bands);
        assert_eq!(bands[w + 3], expected);
        assert_eq!(bands[w * h + w + 3], 0);
        assert_eq!(bands[HOG_BINS * w * h + w + 3], expected);
    }

    #[test]
    fn vertical_edge_maps_to_middle_bin() {
        let (w, h) = (4, 6);
        let mut gray = vec![0u8; w * h];
        for y in 0..h {
            for x in 0..w {
                gray[y * w + x] = (y * 30) as u8;
            }
        }
        let mut mag = vec![0u8; w * h];
        let mut ori = vec![0u8; w * h];
        gradient_polar(&gray, w, h, HOG_BINS, &mut mag, &mut ori);
        // angle pi/2 -> bin 3 of 6
        assert_eq!(ori[2 * w + 1], 3);
    }

    #[test]
    fn luv_extremes() {
        assert_eq!(rgb_to_luv(0, 0, 0)[0], 0);
        let white = rgb_to_luv(255, 255, 255);
        let black = rgb_to_luv(0, 0, 0);
        assert_eq!(white[0], 255);
        assert!((white[1] as i32 - black[1] as i32).abs() <= 1);
        assert!((white[2] as i32 - black[2] as i32).abs() <= 1);
        let red = rgb_to_luv(255, 0, 0);
        assert!(red[1] > white[1]);
    }

    #[test]
    fn oversized_block_sum_wraps() {
        let s = 4200;
        let mut src = ChannelMap::<u8>::new(s, s, 1);
        src.data.fill(u8::MAX);
        let mut out = ChannelMap::default();
        shrink_sum(&src, s, &mut out);
        assert_eq!((out.width, out.height), (1, 1));
        let expected = ((s * s) as u32).wrapping_mul(u8::MAX as u32);
        assert_eq!(out.at(0, 0, 0), expected);
    }

    #[test]
    fn shrink_sums_blocks_per_channel() {
        let mut src = ChannelMap::<u8>::new(5, 4, 2);
        for (i, v) in src.data.iter_mut().enumerate() {
            *v = (i % 7) as u8;
        }
        let mut out = ChannelMap::default();
        shrink_sum(&src, 2, &mut out);
        assert_eq!((out.width, out.height, out.channels), (2, 2, 2));
        for c in 0..2 {
            for y in 0..2 {
                for x in 0..2 {
                    let mut expected = 0u32;
                    for yy in 0..2 {
                        for xx in 0..2 {
                            expected += src.at(c, 2 * x + xx, 2 * y + yy) as u32;
                        }
                    }
                    assert_eq!(out.at(c, x, y), expected);
                }
            }
        }
    }

    #[test]
    fn too_small_frame_is_rejected() {
        let data = uniform_frame(3, 3, [0, 0, 0]);
        let frame = ColorFrame::new(3, 3, &data).unwrap();
        let mut ex = HogLuvExtractor::new(4);
        let mut out = ChannelMap::default();
        assert!(matches!(
            ex.apply(&frame, &mut out),
            Err(InputError::FrameTooSmall { shrinkage: 4, .. })
        ));
    }
}
