use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use ndarray::{Array1, Array4, Axis, CowArray};
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider, ExecutionProvider};
use ort::session::Session;
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};

/// Supported model configurations, each mapping to a pretrained ONNX
/// artifact. Unknown identifiers fall back to the default instead of
/// failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelKind {
    #[default]
    Resnet18,
    Resnet50,
    Resnet101,
}

impl ModelKind {
    pub fn from_name(name: &str) -> ModelKind {
        match name {
            "resnet18" => ModelKind::Resnet18,
            "resnet50" => ModelKind::Resnet50,
            "resnet101" => ModelKind::Resnet101,
            other => {
                tracing::warn!(model = other, "unknown model name, falling back to resnet18");
                ModelKind::default()
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::Resnet18 => "resnet18",
            ModelKind::Resnet50 => "resnet50",
            ModelKind::Resnet101 => "resnet101",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ModelKind::Resnet18 => "Fast and lightweight",
            ModelKind::Resnet50 => "Better accuracy, moderate speed",
            ModelKind::Resnet101 => "Best accuracy, slower",
        }
    }

    fn weights_file(&self) -> &'static str {
        match self {
            ModelKind::Resnet18 => "resnet18-v1-7.onnx",
            ModelKind::Resnet50 => "resnet50-v1-7.onnx",
            ModelKind::Resnet101 => "resnet101-v1-7.onnx",
        }
    }

    fn weights_url(&self) -> String {
        format!(
            "https://github.com/onnx/models/raw/main/validated/vision/classification/resnet/model/{}",
            self.weights_file()
        )
    }
}

/// Compute device for the scorer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Cuda,
}

impl Device {
    /// Explicit override when configured, otherwise CUDA when available,
    /// otherwise CPU.
    pub fn resolve(requested: Option<&str>) -> Result<Device> {
        match requested {
            Some("cpu") => Ok(Device::Cpu),
            Some("cuda") => Ok(Device::Cuda),
            Some(other) => bail!("unsupported device '{other}', expected 'cpu' or 'cuda'"),
            None => {
                let cuda = CUDAExecutionProvider::default()
                    .is_available()
                    .unwrap_or(false);
                Ok(if cuda { Device::Cuda } else { Device::Cpu })
            }
        }
    }
}

/// Opaque numeric scorer: normalized image tensor in, raw logit vector out.
pub trait Scorer: Send + Sync {
    fn score(&self, input: &Array4<f32>) -> Result<Array1<f32>>;
}

/// ONNX Runtime scorer bound to a resolved device. Sessions are
/// inference-only, so there is no training mode to disable.
pub struct OnnxScorer {
    session: Session,
    device: Device,
}

impl OnnxScorer {
    /// Resolves the device and weight artifact, then builds the session.
    pub fn load(
        kind: ModelKind,
        requested_device: Option<&str>,
        weights: Option<&Path>,
    ) -> Result<Self> {
        let device = Device::resolve(requested_device)?;
        let weights = resolve_weights(kind, weights)?;

        let provider = match device {
            Device::Cuda => [CUDAExecutionProvider::default().build().error_on_failure()],
            Device::Cpu => [CPUExecutionProvider::default().build()],
        };

        let session = SessionBuilder::new()?
            .with_execution_providers(provider)?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(&weights)
            .with_context(|| format!("failed to load ONNX model from {}", weights.display()))?;

        tracing::info!(model = kind.name(), device = ?device, "scorer loaded");
        Ok(Self { session, device })
    }

    pub fn device(&self) -> Device {
        self.device
    }
}

impl Scorer for OnnxScorer {
    fn score(&self, input: &Array4<f32>) -> Result<Array1<f32>> {
        let xs = CowArray::from(input.clone().into_dyn());
        let input_data = ort::inputs![xs.view()]?;
        let outputs = self.session.run(input_data)?;

        let (_, value) = outputs
            .iter()
            .next()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let scores = value.try_extract_tensor::<f32>()?.into_owned();

        // Classification heads come back as (1, num_classes); tolerate a
        // flat vector too.
        let logits = match scores.ndim() {
            2 if scores.shape()[0] == 1 => scores
                .index_axis(Axis(0), 0)
                .to_owned()
                .into_dimensionality::<ndarray::Ix1>()?,
            1 => scores.into_dimensionality::<ndarray::Ix1>()?,
            _ => bail!("unexpected output shape {:?}", scores.shape()),
        };

        Ok(logits)
    }
}

/// Resolves the weight artifact: an explicit local path when configured,
/// otherwise the user cache directory with a one-time download.
fn resolve_weights(kind: ModelKind, override_path: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = override_path {
        if !path.exists() {
            bail!("weights file not found: {}", path.display());
        }
        return Ok(path.to_path_buf());
    }

    let cache_dir = dirs::cache_dir()
        .context("no cache directory available for model weights")?
        .join("classifier-rs");
    let target = cache_dir.join(kind.weights_file());
    if target.exists() {
        return Ok(target);
    }

    fs::create_dir_all(&cache_dir)
        .with_context(|| format!("failed to create cache dir {}", cache_dir.display()))?;

    let url = kind.weights_url();
    tracing::info!(model = kind.name(), %url, "downloading pretrained weights");
    let response = ureq::get(&url)
        .call()
        .with_context(|| format!("failed to download {url}"))?;

    // Write to a sidecar first so a partial download never shadows the
    // final artifact.
    let partial = target.with_extension("part");
    let mut file = fs::File::create(&partial)?;
    io::copy(&mut response.into_reader(), &mut file)?;
    fs::rename(&partial, &target)?;

    Ok(target)
}
