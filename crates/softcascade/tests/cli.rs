mod common;

use common::{frame_with_square, white_square_model};
use softcascade::app::{load_config, run_detection, DetectionConfig};
use std::fs;

#[test]
fn config_run_writes_json_and_png() {
    let dir = tempfile::tempdir().unwrap();
    let image_path = dir.path().join("frame.png");
    let model_path = dir.path().join("cascade.json");
    let json_path = dir.path().join("out.json");
    let png_path = dir.path().join("out.png");

    frame_with_square(64, 64, 24, 24, 16)
        .save(&image_path)
        .unwrap();
    fs::write(
        &model_path,
        serde_json::to_string(&white_square_model()).unwrap(),
    )
    .unwrap();

    let cfg = DetectionConfig {
        image: image_path.clone(),
        model: model_path.clone(),
        min_scale: Some(1.0),
        max_scale: Some(1.0),
        scales: Some(1),
        output_json: Some(json_path.clone()),
        output_png: Some(png_path.clone()),
        ..Default::default()
    };
    let cfg_path = dir.path().join("config.json");
    fs::write(&cfg_path, serde_json::to_string_pretty(&cfg).unwrap()).unwrap();

    let dump = run_detection(load_config(&cfg_path).unwrap()).unwrap();
    assert_eq!(dump.levels, 1);
    assert!(dump.suppressed);
    assert_eq!(dump.detections.len(), 1);
    assert_eq!((dump.detections[0].x, dump.detections[0].y), (24, 24));

    let written: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(written["detections"][0]["width"], 16);
    assert_eq!(written["width"], 64);

    let vis = image::open(&png_path).unwrap().to_rgb8();
    assert_eq!(vis.get_pixel(24, 24).0, [255, 0, 0]);
}

#[test]
fn bad_model_reports_context() {
    let dir = tempfile::tempdir().unwrap();
    let image_path = dir.path().join("frame.png");
    let model_path = dir.path().join("cascade.json");
    frame_with_square(32, 32, 0, 0, 8).save(&image_path).unwrap();

    let mut desc = white_square_model();
    desc.feature_type = "HAAR".into();
    fs::write(&model_path, serde_json::to_string(&desc).unwrap()).unwrap();

    let cfg = DetectionConfig {
        image: image_path,
        model: model_path,
        ..Default::default()
    };
    let err = run_detection(cfg).unwrap_err();
    let msg = format!("{err:#}");
    assert!(msg.contains("loading cascade"), "{msg}");
    assert!(msg.contains("HAAR"), "{msg}");
}
