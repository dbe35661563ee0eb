use super::{BackendMetadata, DiffusionBackend, DiffusionPipeline, GenerationRequest, LoadRequest};
use crate::checkpoints::ModelFamily;
use crate::errors::util::to_backend_error;
use crate::errors::{BenchError, BenchResult};
use crate::memory::{device_memory_probe, MemoryProbe, MemoryTracker, NvmlProbe, ProcessMemoryProbe};
use crate::settings::Settings;
use crate::variants::PipelineVariant;
use candle_core::{DType, Device, Module, Tensor};
use candle_transformers::models::stable_diffusion::{
    self, clip::ClipTextTransformer, schedulers::Scheduler, unet_2d::UNet2DConditionModel,
    vae::AutoEncoderKL, StableDiffusionConfig,
};
use hf_hub::api::sync::{Api, ApiBuilder};
use image::imageops::{self, FilterType};
use image::RgbImage;
use sysinfo::System;
use tokenizers::Tokenizer;

const TOKENIZER_REPO: &str = "openai/clip-vit-base-patch32";
const VAE_SCALE: f64 = 0.18215;
const IMG2IMG_STRENGTH: f64 = 0.8;

/// Runs Stable Diffusion 1.x/2.x pipelines through candle
pub struct CandleBackend {
    device: Device,
    ordinal: usize,
    api: Api,
    guidance_scale: f64,
}

impl CandleBackend {
    pub fn from_settings(settings: &Settings) -> BenchResult<Self> {
        let device = Device::cuda_if_available(settings.device_ordinal)
            .map_err(|e| to_backend_error(e, "selecting device"))?;
        if !device.is_cuda() {
            tracing::warn!("No CUDA device available, pipelines will run on the CPU");
        }

        let api = ApiBuilder::new()
            .with_token(settings.hf_token.clone())
            .build()
            .map_err(|e| to_backend_error(e, "initializing model hub client"))?;

        Ok(Self {
            device,
            ordinal: settings.device_ordinal,
            api,
            guidance_scale: settings.guidance_scale,
        })
    }

    pub fn metadata() -> BackendMetadata {
        BackendMetadata {
            name: "candle",
            description: "Stable Diffusion 1.5 and 2.1 on candle (CUDA when available)",
            variants: vec![
                PipelineVariant::TextToImage,
                PipelineVariant::ImageToImage,
                PipelineVariant::Inpainting,
            ],
        }
    }

    fn unsupported(variant: PipelineVariant) -> BenchError {
        BenchError::UnsupportedVariant {
            variant: variant.to_string(),
            backend: "candle".to_string(),
        }
    }

    fn fetch(&self, repo: &str, file: &str) -> BenchResult<std::path::PathBuf> {
        self.api
            .model(repo.to_string())
            .get(file)
            .map_err(|e| to_backend_error(e, &format!("fetching {}/{}", repo, file)))
    }
}

impl DiffusionBackend for CandleBackend {
    fn name(&self) -> &str {
        "candle"
    }

    fn load(&self, request: &LoadRequest) -> BenchResult<Box<dyn DiffusionPipeline>> {
        if request.variant.is_controlnet() {
            return Err(Self::unsupported(request.variant));
        }
        let height = request.resolution.height as usize;
        let width = request.resolution.width as usize;
        let config = match request.family {
            ModelFamily::StableDiffusion15 => {
                StableDiffusionConfig::v1_5(None, Some(height), Some(width))
            }
            ModelFamily::StableDiffusion21 => {
                StableDiffusionConfig::v2_1(None, Some(height), Some(width))
            }
            ModelFamily::StableDiffusionXl | ModelFamily::StableDiffusionXlRefiner => {
                return Err(Self::unsupported(request.variant));
            }
        };

        let use_f16 = self.device.is_cuda();
        let dtype = if use_f16 { DType::F16 } else { DType::F32 };
        let suffix = if use_f16 { ".fp16" } else { "" };

        let repo = request.checkpoint.as_str();
        let unet_path = self.fetch(repo, &format!("unet/diffusion_pytorch_model{}.safetensors", suffix))?;
        let vae_path = self.fetch(repo, &format!("vae/diffusion_pytorch_model{}.safetensors", suffix))?;
        let clip_path = self.fetch(repo, &format!("text_encoder/model{}.safetensors", suffix))?;
        let tokenizer_path = self.fetch(TOKENIZER_REPO, "tokenizer.json")?;

        // Offloading keeps everything but the UNet on the host
        let (aux_device, aux_dtype) = if request.model_cpu_offload {
            (Device::Cpu, DType::F32)
        } else {
            (self.device.clone(), dtype)
        };

        tracing::info!(
            "Loading {} from {} ({:?}, offload: {})",
            request.pipeline_class_name(),
            repo,
            dtype,
            request.model_cpu_offload
        );
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| to_backend_error(e, "loading tokenizer"))?;
        let pad_token = config.clip.pad_with.as_deref().unwrap_or("<|endoftext|>");
        let pad_id = *tokenizer.get_vocab(true).get(pad_token).ok_or_else(|| {
            BenchError::BackendError(format!("tokenizer has no {} token", pad_token))
        })?;

        let text_model =
            stable_diffusion::build_clip_transformer(&config.clip, clip_path, &aux_device, DType::F32)
                .map_err(|e| to_backend_error(e, "loading text encoder"))?;
        let vae = config
            .build_vae(vae_path, &aux_device, aux_dtype)
            .map_err(|e| to_backend_error(e, "loading vae"))?;
        let unet = config
            .build_unet(unet_path, &self.device, 4, false, dtype)
            .map_err(|e| to_backend_error(e, "loading unet"))?;

        Ok(Box::new(CandlePipeline {
            class_name: request.pipeline_class_name(),
            variant: request.variant,
            config,
            device: self.device.clone(),
            dtype,
            aux_device,
            aux_dtype,
            tokenizer,
            pad_id,
            text_model,
            unet,
            vae,
            guidance_scale: self.guidance_scale,
        }))
    }

    fn memory_probe(&self) -> BenchResult<Box<dyn MemoryProbe>> {
        if self.device.is_cuda() {
            device_memory_probe(self.ordinal as u32)
        } else {
            Ok(Box::new(ProcessMemoryProbe::new()?))
        }
    }

    fn total_memory_bytes(&self) -> Option<u64> {
        if self.device.is_cuda() {
            NvmlProbe::new(self.ordinal as u32)
                .ok()
                .and_then(|probe| probe.total_bytes())
        } else {
            let mut system = System::new();
            system.refresh_memory();
            Some(system.total_memory())
        }
    }

    fn flush(&self) {
        // Buffers are freed when the pipeline's tensors drop; nothing is pooled
        tracing::debug!("candle: released pipeline on {:?}", self.device);
    }
}

struct CandlePipeline {
    class_name: &'static str,
    variant: PipelineVariant,
    config: StableDiffusionConfig,
    device: Device,
    dtype: DType,
    /// Where the text encoder and VAE live
    aux_device: Device,
    aux_dtype: DType,
    tokenizer: Tokenizer,
    pad_id: u32,
    text_model: ClipTextTransformer,
    unet: UNet2DConditionModel,
    vae: AutoEncoderKL,
    guidance_scale: f64,
}

impl CandlePipeline {
    fn embed(&self, text: &str) -> candle_core::Result<Tensor> {
        let max_len = self.config.clip.max_position_embeddings;
        let mut tokens = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| candle_core::Error::Msg(e.to_string()))?
            .get_ids()
            .to_vec();
        tokens.truncate(max_len);
        tokens.resize(max_len, self.pad_id);
        let tokens = Tensor::new(tokens.as_slice(), &self.aux_device)?.unsqueeze(0)?;
        self.text_model.forward(&tokens)
    }

    /// Unconditional then conditional embeddings, each repeated per image
    fn encode_prompt(&self, prompt: &str, batch_size: usize) -> candle_core::Result<Tensor> {
        let cond = self.embed(prompt)?.repeat((batch_size, 1, 1))?;
        let uncond = self.embed("")?.repeat((batch_size, 1, 1))?;
        Tensor::cat(&[uncond, cond], 0)?
            .to_device(&self.device)?
            .to_dtype(self.dtype)
    }

    fn encode_image(&self, image: &RgbImage, batch_size: usize) -> candle_core::Result<Tensor> {
        let (width, height) = image.dimensions();
        let pixels = Tensor::from_vec(
            image.as_raw().clone(),
            (height as usize, width as usize, 3),
            &Device::Cpu,
        )?
        .permute((2, 0, 1))?
        .to_dtype(DType::F32)?
        .affine(2.0 / 255.0, -1.0)?
        .unsqueeze(0)?
        .to_device(&self.aux_device)?
        .to_dtype(self.aux_dtype)?;

        self.vae
            .encode(&pixels)?
            .sample()?
            .affine(VAE_SCALE, 0.0)?
            .to_device(&self.device)?
            .to_dtype(self.dtype)?
            .repeat((batch_size, 1, 1, 1))
    }

    /// Luma of the mask at latent resolution, 1.0 where the image is repainted
    fn encode_mask(&self, mask: &RgbImage) -> candle_core::Result<Tensor> {
        let width = self.config.width as u32 / 8;
        let height = self.config.height as u32 / 8;
        let luma = imageops::grayscale(mask);
        let luma = imageops::resize(&luma, width, height, FilterType::Triangle);
        Tensor::from_vec(
            luma.into_raw(),
            (1, 1, height as usize, width as usize),
            &Device::Cpu,
        )?
        .to_dtype(DType::F32)?
        .affine(1.0 / 255.0, 0.0)?
        .to_device(&self.device)?
        .to_dtype(self.dtype)
    }

    fn noise(&self, batch_size: usize) -> candle_core::Result<Tensor> {
        let shape = (
            batch_size,
            4,
            self.config.height / 8,
            self.config.width / 8,
        );
        Tensor::randn(0f32, 1f32, shape, &self.device)?.to_dtype(self.dtype)
    }

    fn run(
        &self,
        request: &GenerationRequest<'_>,
        tracker: &mut MemoryTracker,
    ) -> candle_core::Result<()> {
        let cond = request.conditioning;
        let batch_size = request.batch_size;
        let text_embeddings = self.encode_prompt(&cond.prompt, batch_size)?;
        let mut scheduler = self.config.build_scheduler(request.num_inference_steps)?;
        let timesteps = scheduler.timesteps().to_vec();

        let mut start = 0;
        let mut inpaint: Option<(Tensor, Tensor)> = None;
        let mut latents = match (self.variant, &cond.image, &cond.mask_image) {
            (PipelineVariant::ImageToImage, Some(image), _) => {
                let init = self.encode_image(image, batch_size)?;
                start = img2img_start(timesteps.len(), IMG2IMG_STRENGTH);
                scheduler.add_noise(&init, self.noise(batch_size)?, timesteps[start])?
            }
            (PipelineVariant::Inpainting, Some(image), Some(mask)) => {
                inpaint = Some((self.encode_image(image, batch_size)?, self.encode_mask(mask)?));
                self.noise(batch_size)?
                    .affine(scheduler.init_noise_sigma(), 0.0)?
            }
            (PipelineVariant::TextToImage, _, _) => self
                .noise(batch_size)?
                .affine(scheduler.init_noise_sigma(), 0.0)?,
            (variant, _, _) => {
                candle_core::bail!("missing conditioning images for {}", variant)
            }
        };
        tracker.sample();

        for (i, &timestep) in timesteps.iter().enumerate().skip(start) {
            let input = Tensor::cat(&[&latents, &latents], 0)?;
            let input = scheduler.scale_model_input(input, timestep)?;
            let noise_pred = self.unet.forward(&input, timestep as f64, &text_embeddings)?;

            let chunks = noise_pred.chunk(2, 0)?;
            let (uncond, text) = (&chunks[0], &chunks[1]);
            let guided = uncond.add(&text.sub(uncond)?.affine(self.guidance_scale, 0.0)?)?;
            latents = scheduler.step(&guided, timestep, &latents)?;

            if let Some((init, mask)) = &inpaint {
                // Latents now sit at the next timestep, or are clean after the last one
                let known = known_latents(
                    scheduler.as_ref(),
                    init,
                    self.noise(batch_size)?,
                    timesteps.get(i + 1).copied(),
                )?;
                latents = blend_masked(&known, &latents, mask)?;
            }
            tracker.sample();
        }

        let latents = latents
            .to_device(&self.aux_device)?
            .to_dtype(self.aux_dtype)?
            .affine(1.0 / VAE_SCALE, 0.0)?;
        let images = self.vae.decode(&latents)?;
        tracker.sample();

        // Copying back to the host waits for the device to finish
        images.to_device(&Device::Cpu)?;
        Ok(())
    }
}

/// First denoising step for image-to-image: `strength` of the schedule is
/// re-run, and always at least one step
fn img2img_start(steps: usize, strength: f64) -> usize {
    let kept = (steps as f64 * strength) as usize;
    steps.saturating_sub(kept.clamp(1, steps.max(1)))
}

/// The unmasked region as it should look at `timestep`, or `init` itself
/// once denoising is finished
fn known_latents(
    scheduler: &dyn Scheduler,
    init: &Tensor,
    noise: Tensor,
    timestep: Option<usize>,
) -> candle_core::Result<Tensor> {
    match timestep {
        Some(timestep) => scheduler.add_noise(init, noise, timestep),
        None => Ok(init.clone()),
    }
}

/// `generated` where the mask is 1, `known` where it is 0
fn blend_masked(known: &Tensor, generated: &Tensor, mask: &Tensor) -> candle_core::Result<Tensor> {
    known
        .broadcast_mul(&mask.affine(-1.0, 1.0)?)?
        .add(&generated.broadcast_mul(mask)?)
}

impl DiffusionPipeline for CandlePipeline {
    fn class_name(&self) -> &str {
        self.class_name
    }

    fn compile(&mut self) -> BenchResult<()> {
        // No graph compiler; one UNet pass warms kernels and allocations
        let prime = || -> candle_core::Result<()> {
            let embeddings = self.encode_prompt("", 1)?;
            let latents = self.noise(2)?;
            self.unet.forward(&latents, 1.0, &embeddings)?;
            Ok(())
        };
        prime().map_err(|e| to_backend_error(e, "priming unet"))
    }

    fn generate(
        &mut self,
        request: &GenerationRequest<'_>,
        tracker: &mut MemoryTracker,
    ) -> BenchResult<()> {
        if self.variant.is_controlnet() {
            return Err(CandleBackend::unsupported(self.variant));
        }
        self.run(request, tracker)
            .map_err(|e| to_backend_error(e, self.class_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bench_config::RunConfig;
    use crate::checkpoints::{CONTROLNET_CANNY, CONTROLNET_CANNY_SDXL, SDXL_BASE, SD_V1_5};
    use crate::test_support;
    use test_case::test_case;

    fn values(tensor: &Tensor) -> Vec<f32> {
        tensor.flatten_all().unwrap().to_vec1::<f32>().unwrap()
    }

    #[test_case(PipelineVariant::TextToImage, SDXL_BASE ; "sdxl text to image")]
    #[test_case(PipelineVariant::ControlNet, CONTROLNET_CANNY ; "controlnet")]
    #[test_case(PipelineVariant::ControlNetSdxl, CONTROLNET_CANNY_SDXL ; "controlnet sdxl")]
    fn test_unsupported_pipelines_are_rejected_before_download(
        variant: PipelineVariant,
        ckpt: &str,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let backend = CandleBackend::from_settings(&test_support::settings(dir.path())).unwrap();
        let request = LoadRequest::for_run(variant, &RunConfig::new(ckpt)).unwrap();

        let result = backend.load(&request);
        assert!(matches!(result, Err(BenchError::UnsupportedVariant { .. })));
    }

    #[test]
    fn test_metadata_lists_sd_variants_only() {
        let metadata = CandleBackend::metadata();
        assert_eq!(metadata.name, "candle");
        assert!(!metadata.variants.iter().any(|v| v.is_controlnet()));
        assert!(metadata.variants.contains(&PipelineVariant::Inpainting));
    }

    #[test_case(1, 0 ; "single step still denoises once")]
    #[test_case(50, 10 ; "default schedule")]
    #[test_case(4, 1 ; "rounds kept steps down")]
    fn test_img2img_start(steps: usize, expected: usize) {
        assert_eq!(img2img_start(steps, IMG2IMG_STRENGTH), expected);
    }

    #[test]
    fn test_known_region_is_clean_after_last_step() {
        let config = StableDiffusionConfig::v1_5(None, Some(64), Some(64));
        let scheduler = config.build_scheduler(4).unwrap();
        let init = Tensor::ones((1, 4, 8, 8), DType::F32, &Device::Cpu).unwrap();
        let noise = Tensor::randn(0f32, 1f32, (1, 4, 8, 8), &Device::Cpu).unwrap();

        let clean = known_latents(scheduler.as_ref(), &init, noise.clone(), None).unwrap();
        assert_eq!(values(&clean), values(&init));

        let timestep = scheduler.timesteps()[1];
        let noisy = known_latents(scheduler.as_ref(), &init, noise, Some(timestep)).unwrap();
        assert_ne!(values(&noisy), values(&init));
    }

    #[test]
    fn test_blend_keeps_known_region_outside_mask() {
        let known = Tensor::zeros((1, 4, 2, 2), DType::F32, &Device::Cpu).unwrap();
        let generated = Tensor::ones((1, 4, 2, 2), DType::F32, &Device::Cpu).unwrap();
        let mask = Tensor::new(&[[[[1f32, 0.], [0., 1.]]]], &Device::Cpu).unwrap();

        let blended = blend_masked(&known, &generated, &mask).unwrap();
        let expected: Vec<f32> = [1., 0., 0., 1.].repeat(4);
        assert_eq!(values(&blended), expected);
    }
}
