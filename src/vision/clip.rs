use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::clip::{ClipConfig, ClipModel};
use hf_hub::api::sync::Api;
use hf_hub::{Repo, RepoType};
use image::imageops::FilterType;
use image::DynamicImage;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use super::embedding::{Embedding, ImageEmbedder};
use crate::domain::errors::EmbeddingError;

pub const DEFAULT_MODEL: &str = "openai/clip-vit-base-patch32";

// The upstream repo only ships safetensors weights on this ref.
const DEFAULT_MODEL_REVISION: &str = "refs/pr/15";
const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(900);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePreference {
    /// CUDA, then Metal, then CPU.
    Auto,
    Cpu,
}

/// Everything needed to build an embedder. Nothing is read from ambient state.
#[derive(Debug, Clone)]
pub struct EmbedderConfig {
    pub model_name: String,
    pub revision: Option<String>,
    pub device: DevicePreference,
    /// Upper bound on fetching weights from the hub, cache hits included.
    pub download_timeout: Duration,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL.to_string(),
            revision: None,
            device: DevicePreference::Auto,
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
        }
    }
}

/// CLIP image tower. Expects a ViT-B/32 compatible checkpoint.
pub struct ClipEmbedder {
    model: ClipModel,
    device: Device,
    image_size: usize,
    dimension: usize,
}

impl ClipEmbedder {
    pub fn load(config: &EmbedderConfig) -> Result<Self, EmbeddingError> {
        let device = select_device(config.device)?;
        let revision = config.revision.clone().unwrap_or_else(|| {
            if config.model_name == DEFAULT_MODEL {
                DEFAULT_MODEL_REVISION.to_string()
            } else {
                "main".to_string()
            }
        });

        tracing::info!(model = %config.model_name, %revision, device = ?device, "loading CLIP model");
        let repo = Repo::with_revision(config.model_name.clone(), RepoType::Model, revision);
        let weights: PathBuf = with_deadline(config.download_timeout, "fetching weights", move || {
            let api = Api::new().map_err(|e| format!("model hub: {e}"))?;
            api.repo(repo)
                .get("model.safetensors")
                .map_err(|e| format!("fetching weights: {e}"))
        })?;

        let clip_config = ClipConfig::vit_base_patch32();
        // SAFETY: the weights file is owned by the hub cache and not modified while mapped.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, &device)? };
        let model = ClipModel::new(vb, &clip_config)?;

        Ok(Self {
            model,
            device,
            image_size: clip_config.image_size,
            dimension: clip_config.vision_config.projection_dim,
        })
    }

    fn preprocess(&self, image: &DynamicImage) -> Result<Tensor, EmbeddingError> {
        let size = self.image_size as u32;
        let pixels = image
            .resize_to_fill(size, size, FilterType::Triangle)
            .to_rgb8()
            .into_raw();
        let tensor = Tensor::from_vec(pixels, (self.image_size, self.image_size, 3), &Device::Cpu)?
            .permute((2, 0, 1))?
            .to_dtype(DType::F32)?
            .affine(2.0 / 255.0, -1.0)?;
        Ok(tensor)
    }
}

impl ImageEmbedder for ClipEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, image: &DynamicImage) -> Result<Embedding, EmbeddingError> {
        self.embed_batch(std::slice::from_ref(image))?
            .pop()
            .ok_or_else(|| EmbeddingError::Model("model returned no features".to_string()))
    }

    fn embed_batch(&self, images: &[DynamicImage]) -> Result<Vec<Embedding>, EmbeddingError> {
        if images.is_empty() {
            return Ok(Vec::new());
        }
        let pixels = images
            .iter()
            .map(|img| self.preprocess(img))
            .collect::<Result<Vec<_>, _>>()?;
        let batch = Tensor::stack(&pixels, 0)?.to_device(&self.device)?;
        let features = self.model.get_image_features(&batch)?;
        let rows = features.to_dtype(DType::F32)?.to_vec2::<f32>()?;
        Ok(rows.into_iter().map(Embedding::new).collect())
    }
}

fn select_device(preference: DevicePreference) -> Result<Device, EmbeddingError> {
    if preference == DevicePreference::Cpu {
        return Ok(Device::Cpu);
    }
    if candle_core::utils::cuda_is_available() {
        return Ok(Device::new_cuda(0)?);
    }
    if candle_core::utils::metal_is_available() {
        return Ok(Device::new_metal(0)?);
    }
    Ok(Device::Cpu)
}

/// Runs `work` on its own thread and gives up after `timeout`. The hub client
/// has no timeout of its own; an abandoned download dies with the process.
fn with_deadline<T, F>(timeout: Duration, what: &str, work: F) -> Result<T, EmbeddingError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, String> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(work());
    });
    match rx.recv_timeout(timeout) {
        Ok(result) => result.map_err(EmbeddingError::Model),
        Err(RecvTimeoutError::Timeout) => Err(EmbeddingError::Model(format!(
            "{what} timed out after {}s",
            timeout.as_secs()
        ))),
        Err(RecvTimeoutError::Disconnected) => {
            Err(EmbeddingError::Model(format!("{what} aborted")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_passes_result_through() {
        let value = with_deadline(Duration::from_secs(5), "work", || Ok(7)).unwrap();
        assert_eq!(value, 7);

        let err = with_deadline::<(), _>(Duration::from_secs(5), "work", || {
            Err("hub unreachable".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("hub unreachable"));
    }

    #[test]
    fn test_deadline_gives_up_on_slow_work() {
        let err = with_deadline(Duration::from_millis(50), "fetching weights", || {
            thread::sleep(Duration::from_secs(2));
            Ok(())
        })
        .unwrap_err();
        assert!(err.to_string().contains("fetching weights timed out"));
    }

    #[test]
    fn test_default_config_bounds_download() {
        let config = EmbedderConfig::default();
        assert_eq!(config.model_name, DEFAULT_MODEL);
        assert_eq!(config.download_timeout, DEFAULT_DOWNLOAD_TIMEOUT);
    }
}
