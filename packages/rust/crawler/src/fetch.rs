//! Image download and normalization.
//!
//! Images are decoded, converted to 8-bit RGB and re-encoded as JPEG under
//! `<images_dir>/<sha256(url)>.jpg`. A failed fetch drops the image from the
//! dataset, so every failure here is logged and reported as `None`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};
use reqwest::Client;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};
use url::Url;
use uuid::Uuid;

use imageset_shared::{DatasetError, HttpSettings, Result};

use crate::MAX_IMAGE_BYTES;
use crate::guard::is_blocked_target;

/// Downloads an image and stores a normalized copy.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Local path of the stored image, or `None` if anything went wrong.
    async fn fetch_and_store(&self, image_url: &Url) -> Option<PathBuf>;
}

/// [`ImageFetcher`] writing JPEG files to a local directory.
pub struct DiskImageFetcher {
    client: Client,
    images_dir: PathBuf,
    jpeg_quality: u8,
    allow_private_hosts: bool,
    max_body_bytes: usize,
}

impl DiskImageFetcher {
    /// Create the fetcher and its `images_dir`.
    pub fn new(images_dir: impl Into<PathBuf>, settings: &HttpSettings) -> Result<Self> {
        let images_dir = images_dir.into();
        std::fs::create_dir_all(&images_dir).map_err(|e| DatasetError::io(&images_dir, e))?;

        Ok(Self {
            client: crate::build_client(settings)?,
            images_dir,
            jpeg_quality: settings.jpeg_quality,
            allow_private_hosts: settings.allow_private_hosts,
            max_body_bytes: MAX_IMAGE_BYTES,
        })
    }

    /// Override the largest accepted image body (default [`MAX_IMAGE_BYTES`]).
    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    /// Where the image for `url` is (or will be) stored.
    pub fn path_for(&self, url: &Url) -> PathBuf {
        self.images_dir.join(file_name_for(url))
    }

    async fn try_fetch(&self, url: &Url) -> Result<PathBuf> {
        if is_blocked_target(url, self.allow_private_hosts) {
            return Err(DatasetError::Fetch(format!("{url}: blocked target")));
        }

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| DatasetError::Fetch(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DatasetError::Fetch(format!("{url}: HTTP {status}")));
        }

        let bytes = crate::read_body_capped(response, self.max_body_bytes)
            .await
            .map_err(|e| DatasetError::Fetch(format!("{url}: {e}")))?;

        let path = self.path_for(url);
        let target = path.clone();
        let quality = self.jpeg_quality;

        tokio::task::spawn_blocking(move || normalize_and_write(&bytes, &target, quality))
            .await
            .map_err(|e| DatasetError::Fetch(format!("{url}: encoder task failed: {e}")))??;

        Ok(path)
    }
}

#[async_trait]
impl ImageFetcher for DiskImageFetcher {
    #[instrument(skip_all, fields(url = %image_url))]
    async fn fetch_and_store(&self, image_url: &Url) -> Option<PathBuf> {
        match self.try_fetch(image_url).await {
            Ok(path) => {
                debug!(path = %path.display(), "image stored");
                Some(path)
            }
            Err(e) => {
                warn!(error = %e, "image fetch failed, dropping record");
                None
            }
        }
    }
}

/// Stable file name for an image URL: hex SHA-256 of the URL plus `.jpg`.
pub fn file_name_for(url: &Url) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_str().as_bytes());
    format!("{:x}.jpg", hasher.finalize())
}

/// Decode `bytes`, flatten to RGB and write a JPEG to `path`.
///
/// Every write goes through its own `<name>.<uuid>.part` file that is renamed
/// over `path` on success. A failure never leaves a truncated image behind,
/// and concurrent writes of the same URL each complete.
fn normalize_and_write(bytes: &[u8], path: &Path, quality: u8) -> Result<()> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| DatasetError::Fetch(format!("decode failed: {e}")))?;
    let rgb = decoded.to_rgb8();

    let partial = path.with_extension(format!("{}.part", Uuid::now_v7()));
    let written = write_jpeg(&rgb, &partial, quality).and_then(|()| {
        std::fs::rename(&partial, path).map_err(|e| DatasetError::io(path, e))
    });

    if written.is_err() {
        let _ = std::fs::remove_file(&partial);
    }
    written
}

fn write_jpeg(rgb: &image::RgbImage, path: &Path, quality: u8) -> Result<()> {
    let file = File::create(path).map_err(|e| DatasetError::io(path, e))?;
    let mut writer = BufWriter::new(file);

    JpegEncoder::new_with_quality(&mut writer, quality)
        .write_image(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
        .map_err(|e| DatasetError::Fetch(format!("encode failed: {e}")))?;

    writer.flush().map_err(|e| DatasetError::io(path, e))
}
