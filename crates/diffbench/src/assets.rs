use crate::errors::{BenchError, BenchResult};
use crate::settings::AssetSettings;
use crate::variants::PipelineVariant;
use image::DynamicImage;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Fixed prompt and images a benchmark conditions on. Fetched once per process.
#[derive(Debug, Clone, Default)]
pub struct BenchAssets {
    pub prompt: String,
    pub image: Option<DynamicImage>,
    pub mask_image: Option<DynamicImage>,
    pub control_image: Option<DynamicImage>,
}

impl BenchAssets {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_image(mut self, image: DynamicImage) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_mask_image(mut self, mask_image: DynamicImage) -> Self {
        self.mask_image = Some(mask_image);
        self
    }

    pub fn with_control_image(mut self, control_image: DynamicImage) -> Self {
        self.control_image = Some(control_image);
        self
    }

    /// Fetch only the images the variant conditions on
    pub fn fetch(
        variant: PipelineVariant,
        prompt: &str,
        settings: &AssetSettings,
        cache_dir: Option<PathBuf>,
    ) -> BenchResult<Self> {
        let needs = variant.required_assets();
        let fetcher = AssetFetcher::new(cache_dir)?;
        let mut assets = BenchAssets::new(prompt);

        if needs.image {
            assets.image = Some(fetcher.fetch_image(&settings.image_url)?);
        }
        if needs.mask_image {
            assets.mask_image = Some(fetcher.fetch_image(&settings.mask_url)?);
        }
        if needs.control_image {
            assets.control_image = Some(fetcher.fetch_image(&settings.control_image_url)?);
        }
        Ok(assets)
    }
}

/// Loads images from URLs or local paths, caching downloads on disk
pub struct AssetFetcher {
    client: reqwest::blocking::Client,
    cache_dir: Option<PathBuf>,
}

impl AssetFetcher {
    pub fn new(cache_dir: Option<PathBuf>) -> BenchResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self { client, cache_dir })
    }

    /// Fetch an image and convert it to RGB
    pub fn fetch_image(&self, source: &str) -> BenchResult<DynamicImage> {
        let bytes = self.fetch_bytes(source)?;
        let image = image::load_from_memory(&bytes)?;
        Ok(DynamicImage::ImageRgb8(image.to_rgb8()))
    }

    fn fetch_bytes(&self, source: &str) -> BenchResult<Vec<u8>> {
        if let Some(path) = local_path(source) {
            tracing::debug!("Reading asset from {}", path.display());
            return fs::read(&path).map_err(|e| {
                BenchError::AssetError(format!("failed to read {}: {}", path.display(), e))
            });
        }

        let cached = self.cache_path(source);
        if let Some(path) = &cached {
            if path.is_file() {
                tracing::debug!("Using cached asset {} for {}", path.display(), source);
                return Ok(fs::read(path)?);
            }
        }

        tracing::info!("Downloading asset {}", source);
        let response = self.client.get(source).send()?.error_for_status()?;
        let bytes = response.bytes()?.to_vec();

        if let Some(path) = &cached {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, &bytes)?;
        }
        Ok(bytes)
    }

    fn cache_path(&self, url: &str) -> Option<PathBuf> {
        self.cache_dir
            .as_ref()
            .map(|dir| dir.join(format!("{:x}", Sha256::digest(url.as_bytes()))))
    }
}

fn local_path(source: &str) -> Option<PathBuf> {
    if let Some(stripped) = source.strip_prefix("file://") {
        return Some(PathBuf::from(stripped));
    }
    if source.contains("://") {
        return None;
    }
    Some(PathBuf::from(source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, ImageBuffer, Rgb, Rgba};
    use std::path::Path;

    fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
        let path = dir.join(name);
        let img: ImageBuffer<Rgba<u8>, Vec<u8>> =
            ImageBuffer::from_pixel(width, height, Rgba([10, 20, 30, 255]));
        img.save(&path).unwrap();
        path
    }

    fn settings_for(image: &Path, mask: &Path, control: &Path) -> AssetSettings {
        AssetSettings {
            image_url: image.display().to_string(),
            mask_url: format!("file://{}", mask.display()),
            control_image_url: control.display().to_string(),
            cache_dir: None,
        }
    }

    #[test]
    fn test_local_image_is_converted_to_rgb() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "rgba.png", 8, 6);

        let fetcher = AssetFetcher::new(None).unwrap();
        let image = fetcher.fetch_image(path.to_str().unwrap()).unwrap();
        assert_eq!(image.dimensions(), (8, 6));
        assert_eq!(image.as_rgb8().unwrap().get_pixel(0, 0), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_only_required_assets_are_fetched() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_png(dir.path(), "image.png", 4, 4);
        let mask = write_png(dir.path(), "mask.png", 4, 4);
        let control = write_png(dir.path(), "control.png", 4, 4);
        let settings = settings_for(&image, &mask, &control);

        let assets = BenchAssets::fetch(PipelineVariant::TextToImage, "p", &settings, None).unwrap();
        assert!(assets.image.is_none() && assets.mask_image.is_none());

        let assets = BenchAssets::fetch(PipelineVariant::Inpainting, "p", &settings, None).unwrap();
        assert!(assets.image.is_some() && assets.mask_image.is_some());
        assert!(assets.control_image.is_none());

        let assets = BenchAssets::fetch(PipelineVariant::ControlNet, "p", &settings, None).unwrap();
        assert!(assets.control_image.is_some() && assets.image.is_none());
    }

    #[test]
    fn test_missing_local_file_is_an_asset_error() {
        let fetcher = AssetFetcher::new(None).unwrap();
        let err = fetcher.fetch_image("file:///no/such/image.png").unwrap_err();
        assert!(matches!(err, BenchError::AssetError(_)));
    }

    #[test]
    fn test_missing_relative_path_names_the_file() {
        let fetcher = AssetFetcher::new(None).unwrap();
        let err = fetcher.fetch_image("assets/no-such-mask.png").unwrap_err();
        assert!(matches!(err, BenchError::AssetError(_)));
        assert!(err.to_string().contains("no-such-mask.png"));
    }

    #[test]
    fn test_cache_path_is_stable_per_url() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = AssetFetcher::new(Some(dir.path().to_path_buf())).unwrap();
        let a = fetcher.cache_path("https://example.com/a.png").unwrap();
        let b = fetcher.cache_path("https://example.com/a.png").unwrap();
        let c = fetcher.cache_path("https://example.com/c.png").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.file_name().unwrap().len(), 64);
    }
}
