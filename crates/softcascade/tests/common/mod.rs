#![allow(dead_code)]

use image::{Rgb, RgbImage};
use softcascade::CascadeDescriptor;
use softcascade_core::model::{FeatureDescriptor, OctaveDescriptor, TreeDescriptor};
use softcascade_core::{integrate, ChannelMap, IntegralConfig, IntegralMap, HOG_LUV_CHANNELS};

/// One stump: the root compares `channel` over `rect` against `threshold`,
/// both children always pass. Windows passing the root score +1, others -1.
pub fn single_stump(
    size: i32,
    shrinkage: i32,
    rect: [i32; 4],
    channel: i32,
    threshold: f32,
) -> CascadeDescriptor {
    CascadeDescriptor {
        stage_type: "BOOST".into(),
        feature_type: "ICF".into(),
        width: size,
        height: size,
        feature_format: "RECT".into(),
        shrinkage,
        octaves: vec![OctaveDescriptor {
            scale: 0,
            weaks: 1,
            features: vec![FeatureDescriptor { channel, rect }],
            trees: vec![TreeDescriptor {
                tree_threshold: 0.0,
                internal_nodes: vec![
                    0.0, 0.0, 0.0, threshold, //
                    0.0, 0.0, 0.0, 0.0, //
                    0.0, 0.0, 0.0, 0.0,
                ],
                leaf_values: vec![-1.0, -1.0, -1.0, 1.0],
            }],
        }],
    }
}

/// 4x4 object at shrinkage 1 keyed on a channel-0 mass of at least 10.
pub fn mass_model() -> CascadeDescriptor {
    single_stump(4, 1, [0, 0, 4, 4], 0, 10.0)
}

/// Integral of a 32x32 shrunk stack with a single mass of 20 at (10, 10) in
/// channel 0.
pub fn mass_integral() -> IntegralMap {
    let mut map = ChannelMap::<u32>::new(32, 32, HOG_LUV_CHANNELS);
    map.data[10 * 32 + 10] = 20;
    let mut integral = IntegralMap::default();
    integrate(&map, &IntegralConfig::default(), &mut integral).expect("integral");
    integral
}

/// 16x16 object at shrinkage 4 that fires only when its window is fully
/// covered by white (L channel).
pub fn white_square_model() -> CascadeDescriptor {
    single_stump(16, 4, [0, 0, 4, 4], 7, 60000.0)
}

/// Black frame with a white square of `side` pixels at `(x, y)`.
pub fn frame_with_square(w: u32, h: u32, x: u32, y: u32, side: u32) -> RgbImage {
    let mut img = RgbImage::new(w, h);
    for yy in y..(y + side).min(h) {
        for xx in x..(x + side).min(w) {
            img.put_pixel(xx, yy, Rgb([255, 255, 255]));
        }
    }
    img
}
