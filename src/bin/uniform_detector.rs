// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 制服检测服务 (Uniform Detector)
//!
//! 子命令:
//! - serve:   HTTP 服务
//! - detect:  单张图片检测
//! - batch:   目录批量检测
//! - analyze: 画质分析
//! - resize:  批量 letterbox
//! - video:   视频逐帧检测

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use uniform_detector::api::{self, AppState};
use uniform_detector::batch;
use uniform_detector::codec::ImageCodec;
use uniform_detector::detection::Detector;
use uniform_detector::pipeline::{CancelToken, ResourceTracker, VideoFrameSequencer};
use uniform_detector::quality::QualityAnalyzer;
use uniform_detector::renderer::Annotator;
use uniform_detector::{Cli, Command, DetectionEngine, ModelArgs, ServeArgs, YOLOv8};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("uniform_detector=info,tower_http=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }
}

/// 加载模型, 失败直接返回错误
fn load_detector(args: &ModelArgs) -> anyhow::Result<Detector> {
    let threshold = args.threshold()?;
    let model = YOLOv8::new(args.yolov8())
        .with_context(|| format!("failed to load model {}", args.model.display()))?;
    info!(
        model = %args.model.display(),
        ep = %args.ep(),
        classes = ?model.names(),
        "model loaded"
    );
    Ok(Detector::new(Arc::new(model), threshold))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let threshold = args.model.threshold()?;
    // 模型加载失败时服务照常启动, 检测接口返回 503
    let detector = match load_detector(&args.model) {
        Ok(d) => d,
        Err(e) => {
            warn!(error = %format!("{e:#}"), "model unavailable, serving without detection");
            Detector::unavailable(format!("{e:#}"), threshold)
        }
    };
    let annotator = Annotator::load(args.model.font.as_deref(), true);
    let state = AppState::new(detector, annotator, args.model.model.clone())
        .with_video_limits(args.video_timeout(), args.max_video_frames)
        .with_temp_dir(args.temp_dir.clone());
    let app = api::router(state, &args.cors_origins, args.max_body_size);
    let addr = args.addr().context("invalid bind address")?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        info!(%addr, "listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        info!("server stopped");
        anyhow::Ok(())
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to install ctrl-c handler");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

fn detect(model: ModelArgs, image: &Path, save: Option<&Path>) -> anyhow::Result<()> {
    let detector = load_detector(&model)?;
    let (summary, frame) = batch::summarize(&detector, image, detector.threshold(), &ResourceTracker::new())?;
    if let Some(out) = save {
        let annotator = Annotator::load(model.font.as_deref(), true);
        batch::save_annotated(&annotator, frame, &summary.detections, out)?;
        info!(path = %out.display(), "annotated image saved");
    }
    print_json(&summary)
}

fn analyze(image: &Path) -> anyhow::Result<()> {
    let bytes = std::fs::read(image).with_context(|| format!("failed to read {}", image.display()))?;
    let info = ImageCodec::image_info(&bytes)?;
    let report = QualityAnalyzer::analyze(&ImageCodec::decode(&bytes)?);
    print_json(&serde_json::json!({
        "image": image.display().to_string(),
        "image_info": info,
        "quality_metrics": report,
        "recommendation": report.recommendation(),
    }))
}

fn video(model: ModelArgs, path: &Path, max_frames: Option<u64>) -> anyhow::Result<()> {
    let detector = load_detector(&model)?;
    let summary = VideoFrameSequencer::new(&detector, detector.threshold(), ResourceTracker::new())
        .max_frames(max_frames)
        .process_file(path, &CancelToken::new())?;
    print_json(&summary)
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => serve(args),
        Command::Detect { model, image, save } => detect(model, &image, save.as_deref()),
        Command::Batch { model, dir, output } => {
            let detector = load_detector(&model)?;
            let annotator = Annotator::load(model.font.as_deref(), output.is_some());
            let results = batch::detect_batch(
                &detector,
                &dir,
                output.as_deref(),
                detector.threshold(),
                &annotator,
            )?;
            let total: usize = results.iter().map(|r| r.detections_count).sum();
            info!(images = results.len(), detections = total, "batch finished");
            Ok(())
        }
        Command::Analyze { image } => analyze(&image),
        Command::Resize {
            input,
            output,
            size,
        } => {
            let n = batch::batch_resize(&input, &output, size)?;
            info!(images = n, size, output = %output.display(), "resize finished");
            Ok(())
        }
        Command::Video {
            model,
            video: path,
            max_frames,
        } => video(model, &path, max_frames),
    }
}
