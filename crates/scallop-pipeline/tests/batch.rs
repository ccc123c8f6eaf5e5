//! End-to-end batch runs over synthetic imagery.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::{Rgb, RgbImage};

use scallop_pipeline::{run_batch, SystemConfig};

fn disk_image(cx: f32, cy: f32, r: f32, size: u32) -> RgbImage {
    let mut img = RgbImage::from_pixel(size, size, Rgb([60, 70, 80]));
    for y in 0..size {
        for x in 0..size {
            if (x as f32 - cx).hypot(y as f32 - cy) < r {
                img.put_pixel(x, y, Rgb([220, 215, 200]));
            }
        }
    }
    img
}

fn write_model(dir: &Path) -> PathBuf {
    // Fires on the boundary-support feature of the shape descriptor.
    let model = format!(
        "category brown_scallop\nstump {} 0.6 1 1.0\n",
        scallop_core::features::SHAPE_OFFSET + 4
    );
    let path = dir.join("model.adb");
    std::fs::write(&path, model).unwrap();
    path
}

fn config(dir: &Path, threads: usize, min_r: f32, max_r: f32, out_name: &str) -> SystemConfig {
    let text = format!(
        r#"
[input]
dir = "{input}"

[output]
list_path = "{list}"

[search]
min_radius_px = {min_r}
max_radius_px = {max_r}

[classifier]
key = "survey"
kind = "boosted"
model_path = "{model}"
threshold = 0.5

[runtime]
threads = {threads}
min_class_score = 0.3
"#,
        input = dir.join("imgs").display(),
        list = dir.join(out_name).display(),
        model = dir.join("model.adb").display(),
    );
    toml::from_str(&text).unwrap()
}

fn setup(dir: &Path, images: &[(String, RgbImage)]) {
    let imgs = dir.join("imgs");
    std::fs::create_dir_all(&imgs).unwrap();
    write_model(dir);
    for (name, img) in images {
        img.save(imgs.join(name)).unwrap();
    }
}

#[test]
fn parallel_run_matches_single_slot_output() {
    let dir = std::env::temp_dir().join("scallop-batch-determinism");
    let _ = std::fs::remove_dir_all(&dir);
    let images: Vec<(String, RgbImage)> = (0..6)
        .map(|i| {
            let cx = 40.0 + 20.0 * i as f32;
            (format!("img_{i}.png"), disk_image(cx, 100.0, 16.0, 200))
        })
        .collect();
    setup(&dir, &images);

    let sequential = config(&dir, 1, 8.0, 32.0, "seq.txt");
    run_batch(&sequential, Arc::new(AtomicBool::new(false))).unwrap();

    let parallel = config(&dir, 4, 8.0, 32.0, "par.txt");
    run_batch(&parallel, Arc::new(AtomicBool::new(false))).unwrap();

    let seq = std::fs::read_to_string(dir.join("seq.txt")).unwrap();
    let par = std::fs::read_to_string(dir.join("par.txt")).unwrap();
    assert_eq!(seq, par, "slot count must not change the output list");
    assert!(!seq.is_empty());
}

#[test]
fn list_order_follows_input_order() {
    let dir = std::env::temp_dir().join("scallop-batch-order");
    let _ = std::fs::remove_dir_all(&dir);
    let images: Vec<(String, RgbImage)> = (0..5)
        .map(|i| (format!("img_{i}.png"), disk_image(100.0, 100.0, 16.0, 200)))
        .collect();
    setup(&dir, &images);

    let cfg = config(&dir, 4, 8.0, 32.0, "out.txt");
    run_batch(&cfg, Arc::new(AtomicBool::new(false))).unwrap();

    let out = std::fs::read_to_string(dir.join("out.txt")).unwrap();
    let names: Vec<&str> = out
        .lines()
        .map(|l| l.split_whitespace().next().unwrap())
        .collect();
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted, "lines must follow submission order");
}

#[test]
fn detections_come_back_in_original_coordinates() {
    let dir = std::env::temp_dir().join("scallop-batch-roundtrip");
    let _ = std::fs::remove_dir_all(&dir);
    // Large minimum radius forces a working-resolution downscale.
    setup(
        &dir,
        &[("big.png".to_string(), disk_image(200.0, 150.0, 40.0, 400))],
    );

    let cfg = config(&dir, 1, 30.0, 60.0, "out.txt");
    let summary = run_batch(&cfg, Arc::new(AtomicBool::new(false))).unwrap();
    assert_eq!(summary.detections, 1);

    let out = std::fs::read_to_string(dir.join("out.txt")).unwrap();
    let fields: Vec<&str> = out.lines().next().unwrap().split_whitespace().collect();
    let row: f32 = fields[2].parse().unwrap();
    let col: f32 = fields[3].parse().unwrap();
    let major: f32 = fields[5].parse().unwrap();
    assert!((row - 150.0).abs() < 10.0, "row = {row}");
    assert!((col - 200.0).abs() < 10.0, "col = {col}");
    assert!((major - 40.0).abs() < 10.0, "major = {major}");
}

#[test]
fn preset_cancel_flag_processes_nothing() {
    let dir = std::env::temp_dir().join("scallop-batch-cancel-preset");
    let _ = std::fs::remove_dir_all(&dir);
    setup(
        &dir,
        &[("img.png".to_string(), disk_image(100.0, 100.0, 16.0, 200))],
    );

    let cfg = config(&dir, 2, 8.0, 32.0, "out.txt");
    let summary = run_batch(&cfg, Arc::new(AtomicBool::new(true))).unwrap();
    assert_eq!(summary.images, 0);
    assert!(std::fs::read_to_string(dir.join("out.txt")).unwrap().is_empty());
}

#[test]
fn cancel_mid_run_drops_queued_images() {
    let dir = std::env::temp_dir().join("scallop-batch-cancel-midrun");
    let _ = std::fs::remove_dir_all(&dir);
    // Full-resolution frames keep each image slow enough that the flag
    // lands while the queue is still deep.
    let images: Vec<(String, RgbImage)> = (0..6)
        .map(|i| (format!("img_{i}.png"), disk_image(200.0, 200.0, 40.0, 400)))
        .collect();
    setup(&dir, &images);

    let cfg = config(&dir, 1, 8.0, 64.0, "out.txt");
    let cancel = Arc::new(AtomicBool::new(false));
    let setter = {
        let cancel = Arc::clone(&cancel);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(150));
            cancel.store(true, Ordering::Relaxed);
        })
    };
    let summary = run_batch(&cfg, cancel).unwrap();
    setter.join().unwrap();
    assert!(
        summary.images < 6,
        "cancelled run still processed all {} images",
        summary.images
    );
}

#[test]
fn empty_input_set_is_fatal() {
    let dir = std::env::temp_dir().join("scallop-batch-empty");
    let _ = std::fs::remove_dir_all(&dir);
    setup(&dir, &[]);

    let cfg = config(&dir, 1, 8.0, 32.0, "out.txt");
    let err = run_batch(&cfg, Arc::new(AtomicBool::new(false))).unwrap_err();
    assert!(err.to_string().contains("input set is empty"));
}

#[test]
fn undecodable_file_is_skipped_not_fatal() {
    let dir = std::env::temp_dir().join("scallop-batch-skip");
    let _ = std::fs::remove_dir_all(&dir);
    setup(
        &dir,
        &[("good.png".to_string(), disk_image(100.0, 100.0, 16.0, 200))],
    );
    std::fs::write(dir.join("imgs/broken.jpg"), b"not an image").unwrap();

    let cfg = config(&dir, 2, 8.0, 32.0, "out.txt");
    let summary = run_batch(&cfg, Arc::new(AtomicBool::new(false))).unwrap();
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.detections, 1);
}
