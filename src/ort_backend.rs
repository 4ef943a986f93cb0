// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! ONNX Runtime 推理后端
//!
//! 负责 Session 创建 (CPU / CUDA / TensorRT), 单输入前向推理, 以及模型元数据读取.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use ndarray::{Array, IxDyn};
use once_cell::sync::Lazy;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};
use regex::Regex;
use tracing::{debug, info, warn};

/// Ultralytics 导出的 `names` 元数据: `{0: 'person', 1: 'bicycle'}`
static NAMES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(\d+)\s*:\s*['"]([^'"]*)['"]"#).expect("names regex"));

/// 执行后端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrtEP {
    CPU,
    CUDA(i32),
    Trt(i32),
}

impl std::fmt::Display for OrtEP {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrtEP::CPU => write!(f, "CPU"),
            OrtEP::CUDA(id) => write!(f, "CUDA:{id}"),
            OrtEP::Trt(id) => write!(f, "TensorRT:{id}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrtConfig {
    pub f: PathBuf,
    pub ep: OrtEP,
    pub intra_threads: usize,
}

/// 推理输出: (形状, 扁平化数据)
pub type OrtOutput = (Vec<usize>, Vec<f32>);

pub struct OrtBackend {
    // Session::run 需要 &mut self
    session: Mutex<Session>,
    ep: OrtEP,
    path: PathBuf,
    names: Option<Vec<String>>,
}

impl OrtBackend {
    pub fn build(config: OrtConfig) -> Result<Self> {
        if !config.f.exists() {
            return Err(anyhow!("model file not found: {}", config.f.display()));
        }

        let builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(config.intra_threads.max(1))?;

        let (session, ep) = Self::commit(builder, &config)?;
        let names = Self::read_names(&session);

        info!(
            model = %config.f.display(),
            ep = %ep,
            classes = names.as_ref().map(|n| n.len()).unwrap_or(0),
            "ONNX Runtime session ready"
        );

        Ok(Self {
            session: Mutex::new(session),
            ep,
            path: config.f,
            names,
        })
    }

    /// 按配置注册执行后端, 不可用时回退到 CPU
    fn commit(
        builder: ort::session::builder::SessionBuilder,
        config: &OrtConfig,
    ) -> Result<(Session, OrtEP)> {
        match config.ep {
            #[cfg(feature = "tensorrt")]
            OrtEP::Trt(device_id) => {
                use ort::execution_providers::TensorRTExecutionProvider;
                if let Ok(trt) = builder.clone().with_execution_providers([
                    TensorRTExecutionProvider::default()
                        .with_device_id(device_id)
                        .build(),
                ]) {
                    if let Ok(session) = trt.commit_from_file(&config.f) {
                        return Ok((session, config.ep));
                    }
                }
                warn!("TensorRT execution provider unavailable, falling back to CPU");
            }
            #[cfg(feature = "cuda")]
            OrtEP::CUDA(device_id) => {
                use ort::execution_providers::CUDAExecutionProvider;
                if let Ok(cuda) = builder.clone().with_execution_providers([
                    CUDAExecutionProvider::default()
                        .with_device_id(device_id)
                        .build(),
                ]) {
                    if let Ok(session) = cuda.commit_from_file(&config.f) {
                        return Ok((session, config.ep));
                    }
                }
                warn!("CUDA execution provider unavailable, falling back to CPU");
            }
            OrtEP::CPU => {}
            #[allow(unreachable_patterns)]
            other => warn!(ep = %other, "execution provider not compiled in, using CPU"),
        }

        let session = builder
            .commit_from_file(&config.f)
            .with_context(|| format!("failed to load ONNX model {}", config.f.display()))?;
        Ok((session, OrtEP::CPU))
    }

    fn read_names(session: &Session) -> Option<Vec<String>> {
        let raw = session.metadata().ok()?.custom("names").ok()??;
        let names = parse_names(&raw);
        if names.is_empty() {
            debug!(raw = %raw, "model metadata `names` could not be parsed");
            None
        } else {
            Some(names)
        }
    }

    /// 单输入前向推理, 返回第一个输出
    pub fn run(&self, xs: Array<f32, IxDyn>) -> Result<OrtOutput> {
        let shape = xs.shape().to_vec();
        let data = xs.into_raw_vec_and_offset().0;
        let input: Value = Tensor::from_array((shape, data.into_boxed_slice())).map(Value::from)?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow!("ONNX session lock poisoned"))?;
        let outputs = session.run(ort::inputs![input])?;
        let output = &outputs[0];

        if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
            return Ok((shape.iter().map(|&d| d as usize).collect(), data.to_vec()));
        }

        // fp16 导出的模型
        let (shape, data) = output
            .try_extract_tensor::<half::f16>()
            .context("model output is neither f32 nor f16")?;
        Ok((
            shape.iter().map(|&d| d as usize).collect(),
            data.iter().map(|v| v.to_f32()).collect(),
        ))
    }

    pub fn ep(&self) -> OrtEP {
        self.ep
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn names(&self) -> Option<&[String]> {
        self.names.as_deref()
    }
}

/// 解析 `{0: 'a', 1: 'b'}` 格式的类别表, 按 id 排序
pub fn parse_names(raw: &str) -> Vec<String> {
    let mut pairs: Vec<(usize, String)> = NAMES_RE
        .captures_iter(raw)
        .filter_map(|c| Some((c[1].parse().ok()?, c[2].to_string())))
        .collect();
    pairs.sort_by_key(|(id, _)| *id);

    let len = pairs.last().map(|(id, _)| id + 1).unwrap_or(0);
    let mut names: Vec<String> = (0..len).map(|i| format!("class_{i}")).collect();
    for (id, name) in pairs {
        names[id] = name;
    }
    names
}
