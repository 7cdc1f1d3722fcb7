use cellseg::{
    run, CancelToken, ExternalClassifier, ForegroundSource, Input, PipelineConfig, PipelineEvent,
    RunOptions, Stage,
};
use image::{GrayImage, Luma};
use std::path::Path;

fn write_discs(path: &Path) {
    let image = GrayImage::from_fn(160, 80, |x, y| {
        let inside = [(40.0f32, 40.0f32), (120.0, 40.0)].iter().any(|&(cx, cy)| {
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            dx * dx + dy * dy <= 20.0 * 20.0
        });
        Luma([if inside { 35 } else { 215 }])
    });
    image.save(path).unwrap();
}

fn options(input: &Path, output: &Path) -> RunOptions {
    let mut options = RunOptions::new(Input::detect(input), output);
    options.extension = "png".to_string();
    options.config = PipelineConfig {
        workers: 2,
        queue_depth: 2,
    };
    options
}

#[test]
fn corrupt_image_is_skipped_and_batch_completes() {
    let root = tempfile::tempdir().unwrap();
    let input = root.path().join("input");
    let output = root.path().join("output");
    std::fs::create_dir_all(&input).unwrap();
    write_discs(&input.join("culture.png"));
    std::fs::write(input.join("corrupt.jpg"), b"not really a jpeg").unwrap();

    let mut events = Vec::new();
    let summary = run(
        &options(&input, &output),
        &mut |e: PipelineEvent| events.push(e),
        &CancelToken::new(),
    )
    .unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.skipped.len(), 1);
    assert!(summary.skipped[0].id.ends_with("corrupt.jpg"));
    assert!(events.iter().any(|e| matches!(
        e,
        PipelineEvent::FrameSkipped {
            stage: Stage::Segment,
            ..
        }
    )));

    let mask = image::open(output.join("culture.png")).unwrap().to_luma8();
    assert_eq!(mask.dimensions(), (160, 80));
    assert_eq!(mask.get_pixel(40, 40)[0], 255);
    assert_eq!(mask.get_pixel(80, 40)[0], 0);
    assert!(mask.pixels().all(|p| p[0] == 0 || p[0] == 255));
}

#[test]
fn output_directory_is_recreated() {
    let root = tempfile::tempdir().unwrap();
    let input = root.path().join("input");
    let output = root.path().join("output");
    std::fs::create_dir_all(&input).unwrap();
    std::fs::create_dir_all(&output).unwrap();
    std::fs::write(output.join("leftover.txt"), b"from a previous run").unwrap();
    write_discs(&input.join("a.png"));

    run(&options(&input, &output), &mut |_: PipelineEvent| {}, &CancelToken::new()).unwrap();

    assert!(!output.join("leftover.txt").exists());
    assert!(output.join("a.png").exists());
}

#[test]
fn missing_input_is_fatal() {
    let root = tempfile::tempdir().unwrap();
    let mut options = options(&root.path().join("nothing"), &root.path().join("output"));
    options.input = Input::Images(root.path().join("nothing"));

    let result = run(&options, &mut |_: PipelineEvent| {}, &CancelToken::new());
    assert!(result.is_err());
    assert!(!root.path().join("output").exists());
}

#[test]
fn unlaunchable_classifier_falls_back_to_threshold() {
    let root = tempfile::tempdir().unwrap();
    let input = root.path().join("input");
    let output = root.path().join("output");
    std::fs::create_dir_all(&input).unwrap();
    write_discs(&input.join("culture.png"));

    let mut options = options(&input, &output);
    options.classifier = Some(ExternalClassifier::new("/nonexistent/pixel-classifier"));
    options.foreground = ForegroundSource::External(root.path().join("no-masks"));

    let mut unavailable = false;
    let summary = run(
        &options,
        &mut |e: PipelineEvent| {
            if let PipelineEvent::HandoffUnavailable { .. } = e {
                unavailable = true;
            }
        },
        &CancelToken::new(),
    )
    .unwrap();

    assert!(unavailable);
    assert_eq!(summary.processed, 1);
    assert!(summary.skipped.is_empty());
}

#[test]
fn label_maps_are_exported_on_request() {
    let root = tempfile::tempdir().unwrap();
    let input = root.path().join("input");
    let output = root.path().join("output");
    std::fs::create_dir_all(&input).unwrap();
    write_discs(&input.join("culture.png"));

    let mut options = options(&input, &output);
    options.write_labels = true;
    run(&options, &mut |_: PipelineEvent| {}, &CancelToken::new()).unwrap();

    let labels = image::open(output.join("culture_labels.png")).unwrap().to_luma16();
    let left = labels.get_pixel(40, 40)[0];
    let right = labels.get_pixel(120, 40)[0];
    assert!(left >= 2 && right >= 2);
    assert_ne!(left, right);
    assert_eq!(labels.get_pixel(0, 0)[0], 0);
}

#[cfg(unix)]
#[test]
fn classifier_starts_in_the_frame_directory() {
    let root = tempfile::tempdir().unwrap();
    let input = root.path().join("input");
    let output = root.path().join("output");
    std::fs::create_dir_all(&input).unwrap();
    write_discs(&input.join("culture.png"));

    let mut options = options(&input, &output);
    options.classifier = Some(ExternalClassifier::new("sh").args(["-c", "test -f culture.png"]));

    let mut unavailable = Vec::new();
    let summary = run(
        &options,
        &mut |e: PipelineEvent| {
            if let PipelineEvent::HandoffUnavailable { reason } = e {
                unavailable.push(reason);
            }
        },
        &CancelToken::new(),
    )
    .unwrap();

    assert!(unavailable.is_empty(), "{unavailable:?}");
    assert_eq!(summary.processed, 1);
}
