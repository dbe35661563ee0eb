use diffbench::backend::{self, MockBackend};
use diffbench::checkpoints::{CONTROLNET_CANNY_SDXL, SDXL_BASE, SD_V1_5};
use diffbench::reporting::{collate_dir, result_filepath, BenchmarkRecord, COLLATED_FILENAME};
use diffbench::settings::{AssetSettings, Settings};
use diffbench::{BenchAssets, BenchmarkRunner, PipelineVariant, RunConfig};
use image::{DynamicImage, ImageBuffer, Rgb};
use std::path::Path;
use std::time::Duration;

fn settings(base_path: &Path) -> Settings {
    Settings {
        base_path: base_path.to_path_buf(),
        prompt: "ghibli style, a fantasy landscape with castles".to_string(),
        backend: "mock".to_string(),
        device_ordinal: 0,
        guidance_scale: 7.5,
        github_sha: None,
        total_device_memory_gb: None,
        hf_token: None,
        assets: AssetSettings {
            image_url: String::new(),
            mask_url: String::new(),
            control_image_url: String::new(),
            cache_dir: None,
        },
    }
}

fn read_rows(path: &Path) -> Vec<BenchmarkRecord> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    reader.deserialize().map(|row| row.unwrap()).collect()
}

#[test]
fn text_to_image_writes_one_row() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(dir.path());
    let backend = MockBackend::new();
    let assets = BenchAssets::new(settings.prompt.clone());
    let config = RunConfig::new(SD_V1_5).with_num_inference_steps(1);

    let result = BenchmarkRunner::new(
        PipelineVariant::TextToImage,
        config.clone(),
        &settings,
        &backend,
        &assets,
    )
    .run()
    .unwrap();
    assert_eq!(result.pipeline_class, "StableDiffusionPipeline");
    assert!(result.time_secs > 0.0);
    assert!(result.memory_gb > 0.0);

    let path = result_filepath(dir.path(), SD_V1_5, "StableDiffusionPipeline", &config);
    assert_eq!(
        path.file_name().unwrap().to_str().unwrap(),
        "runwayml_stable-diffusion-v1-5_StableDiffusionPipeline-bs@1-steps@1-mco@false-compile@false.csv"
    );

    let rows = read_rows(&path);
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.pipeline_cls, "StableDiffusionPipeline");
    assert_eq!(row.ckpt_id, SD_V1_5);
    assert_eq!(row.batch_size, 1);
    assert_eq!(row.num_inference_steps, 1);
    assert!(!row.model_cpu_offload);
    assert!(!row.run_compile);
    assert!(row.time_secs.parse::<f64>().unwrap() > 0.0);
    assert!(row.memory_gbs.parse::<f64>().unwrap() > 0.0);
    assert_eq!(row.actual_gpu_memory_gbs, "24.000");
}

#[test]
fn rerun_appends_to_the_same_file() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(dir.path());
    let backend = MockBackend::new().with_step_latency(Duration::from_millis(1));
    let assets = BenchAssets::new(settings.prompt.clone());
    let config = RunConfig::new(SD_V1_5).with_num_inference_steps(1);

    for _ in 0..2 {
        BenchmarkRunner::new(
            PipelineVariant::TextToImage,
            config.clone(),
            &settings,
            &backend,
            &assets,
        )
        .run()
        .unwrap();
    }

    let path = result_filepath(dir.path(), SD_V1_5, "StableDiffusionPipeline", &config);
    assert_eq!(read_rows(&path).len(), 2);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn sdxl_controlnet_routes_to_sdxl_base() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(dir.path());
    let backend = MockBackend::new().with_step_latency(Duration::from_millis(1));
    let assets = BenchAssets::new(settings.prompt.clone()).with_control_image(
        DynamicImage::ImageRgb8(ImageBuffer::from_pixel(768, 768, Rgb([255, 255, 255]))),
    );
    let config = RunConfig::new(CONTROLNET_CANNY_SDXL).with_num_inference_steps(1);

    let result = BenchmarkRunner::new(
        PipelineVariant::ControlNetSdxl,
        config,
        &settings,
        &backend,
        &assets,
    )
    .run()
    .unwrap();
    assert_eq!(result.pipeline_class, "StableDiffusionXLControlNetPipeline");

    match &backend.calls()[0] {
        backend::mock::MockCall::Load(request) => {
            assert_eq!(request.checkpoint, SDXL_BASE);
            assert_eq!(request.auxiliary_checkpoint.as_deref(), Some(CONTROLNET_CANNY_SDXL));
        }
        other => panic!("expected a load call, got {:?}", other),
    }
}

#[test]
fn results_from_several_runs_collate() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(dir.path());
    let backend = MockBackend::new().with_step_latency(Duration::from_millis(1));
    let assets = BenchAssets::new(settings.prompt.clone()).with_image(DynamicImage::ImageRgb8(
        ImageBuffer::from_pixel(800, 1172, Rgb([10, 20, 30])),
    ));

    for (variant, batch_size) in [
        (PipelineVariant::TextToImage, 1),
        (PipelineVariant::TextToImage, 4),
        (PipelineVariant::ImageToImage, 1),
    ] {
        let config = RunConfig::new(SD_V1_5)
            .with_batch_size(batch_size)
            .with_num_inference_steps(2);
        BenchmarkRunner::new(variant, config, &settings, &backend, &assets)
            .run()
            .unwrap();
    }

    let output = dir.path().join(COLLATED_FILENAME);
    assert_eq!(collate_dir(dir.path(), &output).unwrap(), 3);

    let rows = read_rows(&output);
    assert_eq!(rows.len(), 3);
    assert!(rows
        .iter()
        .any(|r| r.pipeline_cls == "StableDiffusionImg2ImgPipeline"));
    assert!(rows.iter().any(|r| r.batch_size == 4));
}

#[test]
fn unknown_backend_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings {
        backend: "onnx".to_string(),
        ..settings(dir.path())
    };
    assert!(backend::create(&settings.backend, &settings).is_err());
    assert!(backend::backends().iter().any(|b| b.name == "mock"));
}
