//! Shared application-level helpers for the CLI.
//!
//! These functions wire up I/O (load image, model and optional ROI mask,
//! JSON/PNG output) around [`SoftCascade`] so the binary stays a thin shell.

use crate::detector::{DetectFlags, DetectorParams, SoftCascade};
use anyhow::{bail, Context, Result};
use image::{ImageReader, Rgb, RgbImage};
use log::info;
use serde::{Deserialize, Serialize};
use softcascade_core::{CascadeDescriptor, Detection};
use std::{fs::File, io::Write, path::Path, path::PathBuf};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DetectionConfig {
    pub image: PathBuf,
    /// JSON cascade descriptor.
    pub model: PathBuf,
    /// Optional grayscale ROI mask, same size as the image.
    pub roi: Option<PathBuf>,
    pub min_scale: Option<f32>,
    pub max_scale: Option<f32>,
    pub scales: Option<usize>,
    /// Run overlap suppression (default true).
    pub suppress: Option<bool>,
    pub overlap_threshold: Option<f32>,
    pub max_detections: Option<usize>,
    pub allow_row_fallback: Option<bool>,
    /// Worker threads; the global pool is used when unset.
    pub threads: Option<usize>,
    pub output_json: Option<PathBuf>,
    pub output_png: Option<PathBuf>,
    pub log_level: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DetectionDump {
    pub image: String,
    pub model: String,
    pub width: u32,
    pub height: u32,
    pub levels: usize,
    pub suppressed: bool,
    pub detections: Vec<Detection>,
}

/// Run detection as described by `cfg` and write the JSON dump and the
/// annotated PNG.
pub fn run_detection(cfg: DetectionConfig) -> Result<DetectionDump> {
    let mut params = DetectorParams::default();
    apply_params_overrides(&mut params, &cfg)?;

    let desc = CascadeDescriptor::from_path(&cfg.model)
        .with_context(|| format!("reading cascade {}", cfg.model.display()))?;
    let mut detector = SoftCascade::new(params);
    detector
        .load(&desc)
        .with_context(|| format!("loading cascade {}", cfg.model.display()))?;

    let img = ImageReader::open(&cfg.image)
        .with_context(|| format!("opening image {}", cfg.image.display()))?
        .decode()?
        .to_rgb8();
    let roi = match &cfg.roi {
        Some(path) => Some(ImageReader::open(path)?.decode()?.to_luma8()),
        None => None,
    };

    let detections = detect_with_pool(&mut detector, &img, roi.as_ref(), cfg.threads)?;
    info!(
        "{}: {} detections",
        cfg.image.display(),
        detections.len()
    );

    let dump = DetectionDump {
        image: cfg.image.to_string_lossy().into_owned(),
        model: cfg.model.to_string_lossy().into_owned(),
        width: img.width(),
        height: img.height(),
        levels: detector.levels().map_or(0, |l| l.levels.len()),
        suppressed: detector.params().flags.suppression_enabled(),
        detections,
    };

    let json_out = cfg
        .output_json
        .unwrap_or_else(|| cfg.image.with_extension("detections.json"));
    write_json(&json_out, &dump)?;

    let png_out = cfg
        .output_png
        .unwrap_or_else(|| cfg.image.with_extension("detections.png"));
    let mut vis = img;
    draw_boxes(&mut vis, &dump.detections);
    vis.save(&png_out)
        .with_context(|| format!("writing {}", png_out.display()))?;

    Ok(dump)
}

#[cfg(feature = "rayon")]
fn detect_with_pool(
    detector: &mut SoftCascade,
    img: &RgbImage,
    roi: Option<&image::GrayImage>,
    threads: Option<usize>,
) -> Result<Vec<Detection>> {
    match threads {
        Some(n) => {
            let pool = rayon::ThreadPoolBuilder::new().num_threads(n).build()?;
            Ok(pool.install(|| detector.detect_rgb(img, roi))?)
        }
        None => Ok(detector.detect_rgb(img, roi)?),
    }
}

#[cfg(not(feature = "rayon"))]
fn detect_with_pool(
    detector: &mut SoftCascade,
    img: &RgbImage,
    roi: Option<&image::GrayImage>,
    threads: Option<usize>,
) -> Result<Vec<Detection>> {
    if threads.is_some() {
        log::warn!("built without rayon; ignoring thread count");
    }
    Ok(detector.detect_rgb(img, roi)?)
}

fn apply_params_overrides(params: &mut DetectorParams, cfg: &DetectionConfig) -> Result<()> {
    if let Some(v) = cfg.min_scale {
        params.scales.min_scale = v;
    }
    if let Some(v) = cfg.max_scale {
        params.scales.max_scale = v;
    }
    if let Some(v) = cfg.scales {
        params.scales.levels = v;
    }
    params.scales.validate()?;

    params.flags = if cfg.suppress.unwrap_or(true) {
        DetectFlags::suppressed()
    } else {
        DetectFlags::raw()
    };
    if let Some(v) = cfg.overlap_threshold {
        if !(v > 0.0 && v <= 1.0) {
            bail!("overlap threshold must be in (0, 1]");
        }
        params.suppression.overlap_threshold = v;
    }
    if let Some(v) = cfg.max_detections {
        if v == 0 {
            bail!("max detections must be >= 1");
        }
        params.max_detections = v;
    }
    if let Some(v) = cfg.allow_row_fallback {
        params.integral.allow_row_fallback = v;
    }
    if cfg.threads == Some(0) {
        bail!("threads must be >= 1");
    }
    Ok(())
}

/// Outline each detection in red.
pub fn draw_boxes(vis: &mut RgbImage, detections: &[Detection]) {
    let (w, h) = (vis.width(), vis.height());
    if w == 0 || h == 0 {
        return;
    }
    let color = Rgb([255u8, 0, 0]);
    for d in detections {
        if d.x >= w || d.y >= h {
            continue;
        }
        let (x0, y0) = (d.x, d.y);
        let x1 = (d.x + d.width.max(1) - 1).min(w - 1);
        let y1 = (d.y + d.height.max(1) - 1).min(h - 1);
        for x in x0..=x1 {
            vis.put_pixel(x, y0, color);
            vis.put_pixel(x, y1, color);
        }
        for y in y0..=y1 {
            vis.put_pixel(x0, y, color);
            vis.put_pixel(x1, y, color);
        }
    }
}

fn write_json(path: &Path, value: &impl Serialize) -> Result<()> {
    let mut json_file =
        File::create(path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(&mut json_file, value)?;
    json_file.write_all(b"\n")?;
    Ok(())
}

pub fn load_config(path: &Path) -> Result<DetectionConfig> {
    let file = File::open(path).with_context(|| format!("opening config {}", path.display()))?;
    let cfg: DetectionConfig = serde_json::from_reader(file)
        .with_context(|| format!("parsing config {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_validate_values() {
        let mut params = DetectorParams::default();
        let cfg = DetectionConfig {
            min_scale: Some(1.0),
            max_scale: Some(2.0),
            scales: Some(3),
            overlap_threshold: Some(0.5),
            ..Default::default()
        };
        apply_params_overrides(&mut params, &cfg).unwrap();
        assert_eq!(params.scales.levels, 3);
        assert!(params.flags.suppression_enabled());
        assert_eq!(params.suppression.overlap_threshold, 0.5);

        let bad = DetectionConfig {
            overlap_threshold: Some(1.5),
            ..Default::default()
        };
        assert!(apply_params_overrides(&mut DetectorParams::default(), &bad).is_err());

        let bad = DetectionConfig {
            min_scale: Some(3.0),
            max_scale: Some(2.0),
            ..Default::default()
        };
        assert!(apply_params_overrides(&mut DetectorParams::default(), &bad).is_err());
    }

    #[test]
    fn boxes_are_clipped_to_the_image() {
        let mut vis = RgbImage::new(10, 10);
        draw_boxes(&mut vis, &[Detection::new(6, 6, 8, 8, 1.0)]);
        assert_eq!(vis.get_pixel(6, 6), &Rgb([255, 0, 0]));
        assert_eq!(vis.get_pixel(9, 9), &Rgb([255, 0, 0]));
        assert_eq!(vis.get_pixel(7, 7), &Rgb([0, 0, 0]));
    }
}
