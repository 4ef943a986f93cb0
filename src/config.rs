// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 命令行 / 环境变量配置

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::detection::{DetectionThreshold, DEFAULT_CONF, DEFAULT_IOU};
use crate::error::Result;
use crate::models::YOLOv8Config;
use crate::OrtEP;

/// YOLOv8 制服检测服务
#[derive(Parser, Debug)]
#[command(author, version, about = "YOLOv8 ONNX Runtime 目标检测服务", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// 启动 HTTP 服务
    Serve(ServeArgs),
    /// 检测单张图片, 输出 JSON
    Detect {
        #[command(flatten)]
        model: ModelArgs,
        /// 图片路径
        image: PathBuf,
        /// 保存可视化结果
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// 批量检测目录中的图片
    Batch {
        #[command(flatten)]
        model: ModelArgs,
        /// 图片目录
        dir: PathBuf,
        /// 输出目录 (可视化图片 + detection_summary.json)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// 画质分析
    Analyze {
        /// 图片路径
        image: PathBuf,
    },
    /// 批量 letterbox 缩放
    Resize {
        /// 输入目录
        input: PathBuf,
        /// 输出目录
        output: PathBuf,
        /// 目标尺寸
        #[arg(long, default_value_t = 640)]
        size: u32,
    },
    /// 逐帧检测视频
    Video {
        #[command(flatten)]
        model: ModelArgs,
        /// 视频路径
        video: PathBuf,
        /// 最多处理帧数
        #[arg(long)]
        max_frames: Option<u64>,
    },
}

/// 模型参数
#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    /// ONNX 模型路径
    #[arg(
        short,
        long,
        env = "DETECTOR_MODEL",
        default_value = "models/trained/senati_v1/weights/best.onnx"
    )]
    pub model: PathBuf,

    /// 置信度阈值
    #[arg(long, default_value_t = DEFAULT_CONF)]
    pub conf: f32,

    /// NMS IoU 阈值
    #[arg(long, default_value_t = DEFAULT_IOU)]
    pub iou: f32,

    /// 使用 CUDA
    #[arg(long)]
    pub cuda: bool,

    /// 使用 TensorRT
    #[arg(long)]
    pub trt: bool,

    /// GPU 设备号
    #[arg(long, default_value_t = 0)]
    pub device_id: i32,

    /// ONNX Runtime 线程数
    #[arg(long, default_value_t = 4)]
    pub threads: usize,

    /// 类别名 (逗号分隔), 覆盖模型元数据
    #[arg(long, value_delimiter = ',')]
    pub names: Option<Vec<String>>,

    /// 标签字体 (ttf)
    #[arg(long, env = "DETECTOR_FONT")]
    pub font: Option<PathBuf>,
}

impl ModelArgs {
    pub fn threshold(&self) -> Result<DetectionThreshold> {
        DetectionThreshold::new(self.conf, self.iou)
    }

    pub fn ep(&self) -> OrtEP {
        if self.trt {
            OrtEP::Trt(self.device_id)
        } else if self.cuda {
            OrtEP::CUDA(self.device_id)
        } else {
            OrtEP::CPU
        }
    }

    pub fn yolov8(&self) -> YOLOv8Config {
        YOLOv8Config {
            model: self.model.clone(),
            ep: self.ep(),
            intra_threads: self.threads,
            names: self.names.clone(),
        }
    }
}

/// HTTP 服务参数
#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    #[arg(long, env = "API_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "API_PORT", default_value_t = 8000)]
    pub port: u16,

    /// 允许的跨域来源 (逗号分隔, `*` 表示任意)
    #[arg(long, env = "CORS_ORIGINS", value_delimiter = ',', default_value = "*")]
    pub cors_origins: Vec<String>,

    /// 请求体上限 (字节)
    #[arg(long, env = "MAX_BODY_SIZE", default_value_t = 100 * 1024 * 1024)]
    pub max_body_size: usize,

    /// 视频处理超时 (秒)
    #[arg(long, env = "VIDEO_TIMEOUT", default_value_t = 300)]
    pub video_timeout: u64,

    /// 视频最多处理帧数
    #[arg(long, env = "MAX_VIDEO_FRAMES")]
    pub max_video_frames: Option<u64>,

    /// 临时文件目录
    #[arg(long, env = "DETECTOR_TEMP_DIR")]
    pub temp_dir: Option<PathBuf>,
}

impl ServeArgs {
    pub fn addr(&self) -> std::result::Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }

    pub fn video_timeout(&self) -> Duration {
        Duration::from_secs(self.video_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_defaults() {
        let cli = Cli::try_parse_from(["uniform-detector", "serve"]).unwrap();
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.port, 8000);
        assert_eq!(args.cors_origins, vec!["*"]);
        assert_eq!(args.max_body_size, 100 * 1024 * 1024);
        assert_eq!(args.model.ep(), OrtEP::CPU);
        assert_eq!(args.model.threshold().unwrap(), DetectionThreshold::default());
        assert_eq!(args.video_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_model_args_parsing() {
        let cli = Cli::try_parse_from([
            "uniform-detector",
            "detect",
            "--conf",
            "0.5",
            "--trt",
            "--device-id",
            "1",
            "--names",
            "uniforme,persona",
            "img.jpg",
        ])
        .unwrap();
        let Command::Detect { model, image, save } = cli.command else {
            panic!("expected detect");
        };
        assert_eq!(image, PathBuf::from("img.jpg"));
        assert!(save.is_none());
        assert_eq!(model.ep(), OrtEP::Trt(1));
        assert_eq!(model.names.as_deref(), Some(&["uniforme".to_string(), "persona".to_string()][..]));
        assert_eq!(model.threshold().unwrap().confidence(), 0.5);
    }

    #[test]
    fn test_out_of_range_threshold_rejected() {
        let cli = Cli::try_parse_from(["uniform-detector", "video", "--conf", "1.2", "v.mp4"]).unwrap();
        let Command::Video { model, .. } = cli.command else {
            panic!("expected video");
        };
        assert!(model.threshold().is_err());
    }
}
