// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! FFmpeg 子进程解码器
//!
//! 解码线程: ffmpeg stdout (rawvideo rgb24) → 按帧切分 → 有界通道 → 检测循环

use std::ffi::OsString;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use image::RgbImage;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{FramePoll, VideoSource};
use crate::error::{DetectError, Result};

/// 解码线程与检测循环之间的缓冲帧数
const FRAME_QUEUE: usize = 4;
/// 保留的 ffmpeg stderr 字节数, 超出部分读取后丢弃
const STDERR_LIMIT: u64 = 16 * 1024;

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
}

/// 查找 ffmpeg / ffprobe, 缺失属于服务端配置问题
pub(crate) fn locate(tool: &str) -> Result<PathBuf> {
    which::which(tool).map_err(|e| DetectError::internal(format!("{tool} not found in PATH: {e}")))
}

/// ffmpeg 解码参数
///
/// `-noautorotate`: 输出保持编码尺寸, 与 ffprobe 报告的宽高一致
fn ffmpeg_args(path: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-v", "error", "-nostdin", "-noautorotate", "-i"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push(path.as_os_str().to_os_string());
    args.extend(["-f", "rawvideo", "-pix_fmt", "rgb24", "-"].map(OsString::from));
    args
}

/// 读完整个流, 只保留前 `limit` 字节
fn drain_capped<R: Read>(mut reader: R, limit: u64) -> String {
    let mut kept = Vec::new();
    let _ = reader.by_ref().take(limit).read_to_end(&mut kept);
    let _ = io::copy(&mut reader, &mut io::sink());
    String::from_utf8_lossy(&kept).into_owned()
}

/// ffprobe 读取首个视频流的宽高
pub fn probe_dimensions(path: &Path) -> Result<(u32, u32)> {
    let ffprobe = locate("ffprobe")?;
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height",
            "-of",
            "json",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| DetectError::internal(format!("failed to run ffprobe: {e}")))?;

    if !output.status.success() {
        return Err(DetectError::VideoOpenFailure(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    let probe: ProbeOutput = serde_json::from_slice(&output.stdout)
        .map_err(|e| DetectError::VideoOpenFailure(format!("unreadable ffprobe output: {e}")))?;
    match probe.streams.first() {
        Some(ProbeStream {
            width: Some(w),
            height: Some(h),
        }) if *w > 0 && *h > 0 => Ok((*w, *h)),
        _ => Err(DetectError::VideoOpenFailure("no video stream found".to_string())),
    }
}

/// FFmpeg 解码源
pub struct FfmpegSource {
    child: Arc<Mutex<Child>>,
    frames: Receiver<std::result::Result<RgbImage, String>>,
}

impl FfmpegSource {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DetectError::VideoOpenFailure(format!(
                "{} does not exist",
                path.display()
            )));
        }
        let (width, height) = probe_dimensions(path)?;
        let ffmpeg = locate("ffmpeg")?;

        let mut child = Command::new(ffmpeg)
            .args(ffmpeg_args(path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DetectError::internal(format!("failed to start ffmpeg: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DetectError::internal("ffmpeg stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DetectError::internal("ffmpeg stderr not captured"))?;
        // stderr 单独读取, 避免管道写满后 ffmpeg 阻塞
        let stderr_reader = thread::Builder::new()
            .name("ffmpeg-stderr".to_string())
            .spawn(move || drain_capped(stderr, STDERR_LIMIT))?;
        let child = Arc::new(Mutex::new(child));
        let (tx, rx) = bounded(FRAME_QUEUE);

        let reader_child = child.clone();
        thread::Builder::new()
            .name("ffmpeg-reader".to_string())
            .spawn(move || {
                let frame_len = width as usize * height as usize * 3;
                let mut stdout = stdout;
                let mut count = 0u64;
                loop {
                    let mut buf = vec![0u8; frame_len];
                    if stdout.read_exact(&mut buf).is_err() {
                        break;
                    }
                    let Some(frame) = RgbImage::from_raw(width, height, buf) else {
                        break;
                    };
                    count += 1;
                    // 接收端已释放
                    if tx.send(Ok(frame)).is_err() {
                        return;
                    }
                }

                let failure = match reader_child.lock() {
                    Ok(mut child) => match child.wait() {
                        Ok(status) if status.success() => None,
                        Ok(status) => {
                            let stderr = stderr_reader.join().unwrap_or_default();
                            Some(format!("ffmpeg exited with {status}: {}", stderr.trim()))
                        }
                        Err(e) => Some(e.to_string()),
                    },
                    Err(_) => Some("ffmpeg process lock poisoned".to_string()),
                };
                debug!(frames = count, "ffmpeg reader finished");
                if let Some(msg) = failure {
                    let _ = tx.send(Err(msg));
                }
            })?;

        debug!(path = %path.display(), width, height, "video opened");
        Ok(Self { child, frames: rx })
    }
}

impl VideoSource for FfmpegSource {
    fn poll_frame(&mut self, timeout: Duration) -> Result<FramePoll> {
        match self.frames.recv_timeout(timeout) {
            Ok(Ok(frame)) => Ok(FramePoll::Frame(frame)),
            Ok(Err(msg)) => Err(DetectError::decode(msg)),
            Err(RecvTimeoutError::Timeout) => Ok(FramePoll::Pending),
            Err(RecvTimeoutError::Disconnected) => Ok(FramePoll::End),
        }
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        if let Ok(mut child) = self.child.try_lock() {
            if let Ok(None) = child.try_wait() {
                if let Err(e) = child.kill() {
                    warn!(error = %e, "failed to stop ffmpeg");
                }
                let _ = child.wait();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_file() {
        let err = FfmpegSource::open(Path::new("/nonexistent/clip.mp4")).err().unwrap();
        assert!(matches!(err, DetectError::VideoOpenFailure(_)));
    }

    #[test]
    fn test_missing_tool_is_internal() {
        let err = locate("uniform-detector-no-such-tool").unwrap_err();
        assert!(matches!(err, DetectError::Internal(_)));
        assert_eq!(err.client_message(), "Internal server error");
    }

    #[test]
    fn test_ffmpeg_args_disable_autorotate() {
        let args = ffmpeg_args(Path::new("/tmp/clip.mp4"));
        let pos = |flag: &str| args.iter().position(|a| a == flag).unwrap();
        assert!(pos("-noautorotate") < pos("-i"));
        assert_eq!(args[pos("-i") + 1], "/tmp/clip.mp4");
        assert_eq!(args.last().unwrap(), "-");
    }

    #[test]
    fn test_drain_capped_consumes_everything() {
        let noisy = vec![b'e'; 200 * 1024];
        let mut cursor = io::Cursor::new(noisy);
        let kept = drain_capped(&mut cursor, STDERR_LIMIT);
        assert_eq!(kept.len() as u64, STDERR_LIMIT);
        assert_eq!(cursor.position(), 200 * 1024);

        assert_eq!(drain_capped(&b"bad frame\n"[..], STDERR_LIMIT), "bad frame\n");
    }

    #[test]
    fn test_probe_output_parsing() {
        let probe: ProbeOutput =
            serde_json::from_str(r#"{"programs": [], "streams": [{"width": 1280, "height": 720}]}"#)
                .unwrap();
        assert_eq!(probe.streams[0].width, Some(1280));

        let empty: ProbeOutput = serde_json::from_str("{}").unwrap();
        assert!(empty.streams.is_empty());
    }
}
