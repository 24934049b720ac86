//! Summed-area table over the stacked shrunk channels.
//!
//! `I[y][x]` is the sum of all source values above and left of `(x, y)`
//! (exclusive), with a leading zero row and column. Arithmetic wraps in
//! `u32`, so rectangle differences stay exact as long as the true rectangle
//! sum fits.
use crate::channels::ChannelMap;
use crate::error::{CapabilityError, InputError};
use serde::{Deserialize, Serialize};

#[cfg(feature = "rayon")]
use rayon::prelude::*;
#[cfg(feature = "tracing")]
use tracing::instrument;

/// Widest shrunk map the blocked scan accepts.
pub const FAST_PATH_MAX_WIDTH: usize = 2048;
const SCAN_BLOCK_ROWS: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegralConfig {
    /// Widest shrunk map handled by the blocked parallel scan.
    pub fast_path_max_width: usize,
    /// Use the sequential row recurrence for wider maps instead of failing.
    pub allow_row_fallback: bool,
}

impl Default for IntegralConfig {
    fn default() -> Self {
        Self {
            fast_path_max_width: FAST_PATH_MAX_WIDTH,
            allow_row_fallback: false,
        }
    }
}

/// Which accumulation path produced an [`IntegralMap`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntegralPath {
    Blocked,
    Rows,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct IntegralMap {
    /// Shrunk width + 1.
    pub width: usize,
    /// Stacked height + 1.
    pub height: usize,
    pub channels: usize,
    pub data: Vec<u32>,
}

impl IntegralMap {
    /// Wrap a precomputed integral of a stacked `channels`-band map.
    pub fn from_raw(
        width: usize,
        height: usize,
        channels: usize,
        data: Vec<u32>,
    ) -> Result<Self, InputError> {
        let ok = width > 0
            && height > 0
            && channels > 0
            && (height - 1) % channels == 0
            && data.len() == width * height;
        if !ok {
            return Err(InputError::IntegralShape {
                width,
                height,
                channels,
                len: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    /// Width of the source map.
    #[inline]
    pub fn source_width(&self) -> usize {
        self.width.saturating_sub(1)
    }

    /// Height of one source channel band.
    #[inline]
    pub fn band_height(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.height.saturating_sub(1) / self.channels
        }
    }

    #[inline]
    pub fn at(&self, x: usize, y: usize) -> u32 {
        self.data[y * self.width + x]
    }

    /// Sum over `[x0, x1) x [y0, y1)` of the stacked source map.
    #[inline]
    pub fn rect_sum(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> u32 {
        if x1 <= x0 || y1 <= y0 {
            return 0;
        }
        self.at(x1, y1)
            .wrapping_sub(self.at(x0, y1))
            .wrapping_sub(self.at(x1, y0))
            .wrapping_add(self.at(x0, y0))
    }

    /// Sum over a rectangle of one channel band.
    #[inline]
    pub fn channel_rect_sum(
        &self,
        channel: usize,
        x0: usize,
        y0: usize,
        x1: usize,
        y1: usize,
    ) -> u32 {
        let off = channel * self.band_height();
        self.rect_sum(x0, y0 + off, x1, y1 + off)
    }
}

/// Compute the integral of `src` into `out`.
///
/// The blocked parallel scan handles maps up to `cfg.fast_path_max_width`
/// wide. Wider maps use the row recurrence when `cfg.allow_row_fallback` is
/// set and fail otherwise. Both paths produce identical tables.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(src, cfg, out), fields(w = src.width, rows = src.stacked_height()))
)]
pub fn integrate(
    src: &ChannelMap<u32>,
    cfg: &IntegralConfig,
    out: &mut IntegralMap,
) -> Result<IntegralPath, CapabilityError> {
    let path = if src.width <= cfg.fast_path_max_width {
        IntegralPath::Blocked
    } else if cfg.allow_row_fallback {
        IntegralPath::Rows
    } else {
        return Err(CapabilityError::IntegralWidth {
            width: src.width,
            max: cfg.fast_path_max_width,
        });
    };

    let w = src.width;
    let rows = src.stacked_height();
    let iw = w + 1;
    out.width = iw;
    out.height = rows + 1;
    out.channels = src.channels;
    out.data.clear();
    out.data.resize(iw * (rows + 1), 0);
    if w == 0 || rows == 0 {
        return Ok(path);
    }

    match path {
        IntegralPath::Blocked => integrate_blocked(&src.data, w, rows, &mut out.data),
        IntegralPath::Rows => integrate_rows(&src.data, w, rows, &mut out.data),
    }
    Ok(path)
}

fn integrate_blocked(src: &[u32], w: usize, rows: usize, out: &mut [u32]) {
    let iw = w + 1;
    let body = &mut out[iw..];

    rows_mut!(body, iw).enumerate().for_each(|(y, row)| {
        let line = &src[y * w..][..w];
        let mut acc = 0u32;
        for (dst, &v) in row[1..].iter_mut().zip(line) {
            acc = acc.wrapping_add(v);
            *dst = acc;
        }
    });

    // Column scan within each block of rows.
    let block = iw * SCAN_BLOCK_ROWS;
    rows_mut!(body, block).for_each(|blk| {
        for r in 1..blk.len() / iw {
            let (prev, cur) = blk.split_at_mut(r * iw);
            let prev = &prev[(r - 1) * iw..];
            for (c, &p) in cur[..iw].iter_mut().zip(prev) {
                *c = c.wrapping_add(p);
            }
        }
    });

    // Carry of block b is the column total of all rows before it.
    let blocks = rows.div_ceil(SCAN_BLOCK_ROWS);
    let mut carries = vec![0u32; blocks * iw];
    for b in 1..blocks {
        let last = &body[(b * SCAN_BLOCK_ROWS - 1) * iw..][..iw];
        let (done, next) = carries.split_at_mut(b * iw);
        let prev = &done[(b - 1) * iw..];
        for ((dst, &p), &l) in next[..iw].iter_mut().zip(prev).zip(last) {
            *dst = p.wrapping_add(l);
        }
    }

    rows_mut!(body, block).enumerate().for_each(|(b, blk)| {
        if b == 0 {
            return;
        }
        let carry = &carries[b * iw..][..iw];
        for row in blk.chunks_mut(iw) {
            for (v, &c) in row.iter_mut().zip(carry) {
                *v = v.wrapping_add(c);
            }
        }
    });
}

fn integrate_rows(src: &[u32], w: usize, rows: usize, out: &mut [u32]) {
    let iw = w + 1;
    for y in 0..rows {
        let (above, below) = out.split_at_mut((y + 1) * iw);
        let above = &above[y * iw..];
        let row = &mut below[..iw];
        let mut acc = 0u32;
        for x in 0..w {
            acc = acc.wrapping_add(src[y * w + x]);
            row[x + 1] = above[x + 1].wrapping_add(acc);
        }
    }
}
