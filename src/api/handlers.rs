// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! HTTP 接口
//!
//! 上传统一使用 multipart 字段 `file`. 推理都在阻塞线程池执行,
//! 每个请求在开始时取一次阈值快照.

use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Multipart, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::codec::{ImageCodec, ImageInfo};
use crate::detection::{spawn_inference, Detection, DetectionThreshold};
use crate::error::DetectError;
use crate::pipeline::{
    detect_image, extension_for, CancelToken, TransientResource, VideoFrameSequencer,
    VideoSummary,
};
use crate::quality::{ImageQualityReport, QualityAnalyzer};

const SERVICE_NAME: &str = "Uniform Detector API";
const UPLOAD_FIELD: &str = "file";

#[derive(Debug, Deserialize)]
pub struct DetectQuery {
    pub confidence: Option<f32>,
}

#[derive(Debug, Deserialize)]
pub struct ThresholdQuery {
    pub threshold: f32,
}

#[derive(Debug, Serialize)]
pub struct DetectResponse {
    pub filename: String,
    pub confidence_threshold: f32,
    pub detections_count: usize,
    pub detections: Vec<Detection>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_loaded: bool,
    pub model_path: String,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub version: &'static str,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub model_name: String,
    pub model_path: String,
    pub execution_provider: String,
    pub classes: Vec<String>,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub input_size: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub training_info: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct ThresholdResponse {
    pub message: &'static str,
    pub new_threshold: f32,
}

#[derive(Debug, Serialize)]
pub struct LiveFrameResponse {
    pub detections_count: usize,
    pub detections: Vec<Detection>,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub filename: String,
    pub image_info: ImageInfo,
    pub quality_metrics: ImageQualityReport,
    pub recommendation: &'static str,
}

struct Upload {
    filename: String,
    content_type: String,
    bytes: Vec<u8>,
}

/// 读取 `file` 字段, `accept` 为 content-type 前缀 (如 `image/`)
async fn read_upload(
    multipart: Result<Multipart, MultipartRejection>,
    accept: Option<&str>,
) -> ApiResult<Upload> {
    let mut multipart = multipart.map_err(|e| ApiError::bad_request(e.body_text()))?;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or("upload").to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        if let Some(prefix) = accept {
            if !content_type.starts_with(prefix) {
                return Err(DetectError::UnsupportedMediaType(content_type).into());
            }
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(e.to_string()))?
            .to_vec();
        debug!(filename = %filename, content_type = %content_type, size = bytes.len(), "upload received");
        return Ok(Upload {
            filename,
            content_type,
            bytes,
        });
    }
    Err(ApiError::bad_request(format!("missing multipart field `{UPLOAD_FIELD}`")))
}

fn request_threshold(
    state: &AppState,
    query: Result<Query<DetectQuery>, QueryRejection>,
) -> ApiResult<DetectionThreshold> {
    let Query(query) = query.map_err(|e| ApiError::bad_request(e.body_text()))?;
    Ok(state.detector.resolve_threshold(query.confidence)?)
}

/// 文件名只保留安全字符, 用于响应头
fn header_filename(name: &str) -> String {
    let base = name.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();
    if cleaned.is_empty() {
        "image.jpg".to_string()
    } else {
        cleaned
    }
}

pub async fn root() -> Json<Value> {
    Json(json!({
        "name": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "endpoints": {
            "health": "/api/health",
            "stats": "/api/stats",
            "detect": "/api/detect",
            "visualize": "/api/detect/visualize",
            "video": "/api/detect/video",
            "live_frame": "/api/detect/live-frame",
            "analyze": "/api/analyze",
            "confidence": "/api/confidence/set"
        }
    }))
}

pub async fn health(State(state): State<AppState>) -> Response {
    let Ok(summary) = state.detector.summary() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unhealthy",
                "model_loaded": false,
                "message": DetectError::ModelUnavailable.to_string(),
            })),
        )
            .into_response();
    };
    let threshold = state.detector.threshold();
    Json(HealthResponse {
        status: "healthy",
        model_loaded: true,
        model_path: summary.model_path,
        confidence_threshold: threshold.confidence(),
        iou_threshold: threshold.iou(),
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now().to_rfc3339(),
    })
    .into_response()
}

pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<StatsResponse>> {
    let summary = state.detector.summary()?;
    let threshold = state.detector.threshold();
    let mut body = StatsResponse {
        model_name: summary.model_name,
        model_path: summary.model_path,
        execution_provider: summary.execution_provider,
        classes: summary.classes,
        confidence_threshold: threshold.confidence(),
        iou_threshold: threshold.iou(),
        input_size: format!("{0}x{0}", summary.input_size),
        training_info: None,
    };

    if let Some(path) = state.metadata_path() {
        match tokio::fs::read(&path).await {
            Ok(raw) => match serde_json::from_slice::<Value>(&raw) {
                Ok(meta) => body.training_info = Some(meta),
                Err(e) => warn!(path = %path.display(), error = %e, "invalid training metadata"),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to read training metadata"),
        }
    }
    Ok(Json(body))
}

pub async fn detect(
    State(state): State<AppState>,
    query: Result<Query<DetectQuery>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<DetectResponse>> {
    state.detector.engine()?;
    let threshold = request_threshold(&state, query)?;
    let upload = read_upload(multipart, Some("image/")).await?;

    let detector = state.detector.clone();
    let tracker = state.tracker.clone();
    let result =
        spawn_inference(move || detect_image(&detector, upload.bytes, threshold, &tracker)).await?;

    info!(
        filename = %upload.filename,
        detections = result.detections.len(),
        "image detected"
    );
    Ok(Json(DetectResponse {
        filename: upload.filename,
        confidence_threshold: threshold.confidence(),
        detections_count: result.detections.len(),
        detections: result.detections,
    }))
}

pub async fn detect_visualize(
    State(state): State<AppState>,
    query: Result<Query<DetectQuery>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Response> {
    state.detector.engine()?;
    let threshold = request_threshold(&state, query)?;
    let Upload {
        filename, bytes, ..
    } = read_upload(multipart, Some("image/")).await?;

    let detector = state.detector.clone();
    let annotator = state.annotator.clone();
    let tracker = state.tracker.clone();
    let jpeg = spawn_inference(move || {
        let mut result = detect_image(&detector, bytes, threshold, &tracker)?;
        annotator.annotate(&mut result.frame, &result.detections);
        ImageCodec::encode(&result.frame, ImageFormat::Jpeg)
    })
    .await?;

    let disposition = HeaderValue::from_str(&format!(
        "inline; filename=detected_{}",
        header_filename(&filename)
    ))
    .map_err(|e| DetectError::internal(format!("content-disposition: {e}")))?;
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("image/jpeg")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        jpeg,
    )
        .into_response())
}

/// 视频逐帧检测
///
/// 上传内容写入以 uuid 命名的临时文件, 处理结束即删除.
/// 超时或客户端断开时中止, 返回已处理部分.
pub async fn detect_video(
    State(state): State<AppState>,
    query: Result<Query<DetectQuery>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<VideoSummary>> {
    state.detector.engine()?;
    let threshold = request_threshold(&state, query)?;
    let Upload {
        filename,
        content_type,
        bytes,
    } = read_upload(multipart, Some("video/")).await?;
    let extension = extension_for(&content_type);

    let token = CancelToken::with_timeout(state.video_timeout);
    // 请求 future 被丢弃时取消
    let _cancel_on_drop = scopeguard::guard(token.clone(), |token| token.cancel());

    let detector = state.detector.clone();
    let tracker = state.tracker.clone();
    let temp_dir = state.temp_dir.clone();
    let max_frames = state.max_video_frames;
    let summary = spawn_inference(move || {
        let video = TransientResource::file(&bytes, extension, temp_dir.as_deref(), &tracker)?;
        drop(bytes);
        let path = video
            .path()
            .ok_or_else(|| DetectError::internal("file resource without path"))?;
        VideoFrameSequencer::new(&detector, threshold, tracker.clone())
            .max_frames(max_frames)
            .process_file(path, &token)
    })
    .await?;

    info!(
        filename = %filename,
        frames = summary.frames_processed,
        detections = summary.total_detections,
        status = ?summary.status,
        "video detected"
    );
    Ok(Json(summary))
}

pub async fn detect_live_frame(
    State(state): State<AppState>,
    query: Result<Query<DetectQuery>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<LiveFrameResponse>> {
    state.detector.engine()?;
    let threshold = request_threshold(&state, query)?;
    let upload = read_upload(multipart, Some("image/")).await?;

    let detector = state.detector.clone();
    let tracker = state.tracker.clone();
    let result =
        spawn_inference(move || detect_image(&detector, upload.bytes, threshold, &tracker)).await?;
    Ok(Json(LiveFrameResponse {
        detections_count: result.detections.len(),
        detections: result.detections,
    }))
}

/// 画质分析, 不需要模型
pub async fn analyze(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<AnalyzeResponse>> {
    let Upload {
        filename, bytes, ..
    } = read_upload(multipart, None).await?;
    if !ImageCodec::validate(&bytes) {
        return Err(DetectError::InvalidImage("structural validation failed".to_string()).into());
    }

    let tracker = state.tracker.clone();
    let (image_info, quality_metrics) = spawn_inference(move || {
        let resource = TransientResource::buffer(bytes, &tracker);
        let data = resource
            .bytes()
            .ok_or_else(|| DetectError::internal("buffer resource without bytes"))?;
        let info = ImageCodec::image_info(data)?;
        let frame = ImageCodec::decode(data)?;
        Ok((info, QualityAnalyzer::analyze(&frame)))
    })
    .await?;

    Ok(Json(AnalyzeResponse {
        filename,
        recommendation: quality_metrics.recommendation(),
        image_info,
        quality_metrics,
    }))
}

pub async fn set_confidence(
    State(state): State<AppState>,
    query: Result<Query<ThresholdQuery>, QueryRejection>,
) -> ApiResult<Json<ThresholdResponse>> {
    state.detector.engine()?;
    let Query(query) = query.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let next = state.detector.set_confidence(query.threshold)?;
    Ok(Json(ThresholdResponse {
        message: "Threshold updated",
        new_threshold: next.confidence(),
    }))
}
