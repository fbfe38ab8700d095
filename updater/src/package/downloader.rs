use crate::catalog::Package;
use crate::oci;
use crate::package::image::{PackageImage, PackageLayer};
use crate::utils::retry::retry;
use oci_client::Reference;
use ring::digest::{digest, SHA256};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Runtime;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("unsupported package url `{0}`")]
    UnsupportedUrl(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("downloaded {actual} bytes, catalog entry expects {expected}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("image digest `{actual}` does not match catalog entry `{expected}`")]
    DigestMismatch { expected: String, actual: String },
}

/// Resolves a catalog entry to a fully fetched package image. Implementations
/// verify the catalog's size and digest before returning; the caller never
/// sees unverified bytes.
pub trait ImageDownloader {
    fn fetch(&self, package: &Package) -> Result<PackageImage, DownloadError>;
}

struct FetchedImage {
    image: PackageImage,
    /// Hex SHA-256 of the raw image manifest, the image's content address.
    manifest_digest: String,
    /// Total layer-blob bytes downloaded.
    layer_bytes: u64,
}

const DEFAULT_ATTEMPTS: usize = 1;

/// Fetches package images from an OCI registry (`oci://`) or from a local
/// OCI image layout (`file://`). Images are held in memory; nothing is
/// cached across calls; the repository is the only persistent store.
pub struct OciPackageDownloader {
    client: oci::Client,
    runtime: Arc<Runtime>,
    max_attempts: usize,
    retry_interval: Duration,
}

impl OciPackageDownloader {
    pub fn new(client: oci::Client, runtime: Arc<Runtime>) -> Self {
        Self {
            client,
            runtime,
            max_attempts: DEFAULT_ATTEMPTS,
            retry_interval: Duration::default(),
        }
    }

    /// Returns a downloader retrying failed transfers.
    pub fn with_retries(self, max_attempts: usize, retry_interval: Duration) -> Self {
        Self {
            max_attempts,
            retry_interval,
            ..self
        }
    }

    fn fetch_registry(&self, url: &Url) -> Result<FetchedImage, DownloadError> {
        let reference = registry_reference(url)?;
        self.runtime.block_on(async {
            let (manifest, manifest_digest) = self
                .client
                .pull_image_manifest(&reference)
                .await
                .map_err(|e| DownloadError::Transport(e.to_string()))?;

            let mut layers = Vec::with_capacity(manifest.layers.len());
            let mut layer_bytes = 0u64;
            for descriptor in &manifest.layers {
                let mut data = Vec::new();
                self.client
                    .pull_blob(&reference, descriptor, &mut data)
                    .await
                    .map_err(|e| DownloadError::Transport(e.to_string()))?;
                layer_bytes += data.len() as u64;
                layers.push(PackageLayer::new(&descriptor.media_type, data));
            }
            Ok(FetchedImage {
                image: PackageImage::new(layers),
                manifest_digest: manifest_digest
                    .strip_prefix("sha256:")
                    .unwrap_or(&manifest_digest)
                    .to_string(),
                layer_bytes,
            })
        })
    }

    fn fetch_layout(&self, dir: &Path) -> Result<FetchedImage, DownloadError> {
        use oci_client::manifest::{OciImageIndex, OciImageManifest};

        let transport = |e: std::io::Error| DownloadError::Transport(e.to_string());

        let index_bytes = std::fs::read(dir.join("index.json")).map_err(transport)?;
        let index: OciImageIndex = serde_json::from_slice(&index_bytes)
            .map_err(|e| DownloadError::Transport(format!("decoding image index: {e}")))?;
        let entry = index.manifests.first().ok_or_else(|| {
            DownloadError::Transport("image layout contains no manifests".to_string())
        })?;

        let manifest_bytes = std::fs::read(blob_path(dir, &entry.digest)?).map_err(transport)?;
        let manifest_digest = hex_string(digest(&SHA256, &manifest_bytes).as_ref());
        let manifest: OciImageManifest = serde_json::from_slice(&manifest_bytes)
            .map_err(|e| DownloadError::Transport(format!("decoding image manifest: {e}")))?;

        let mut layers = Vec::with_capacity(manifest.layers.len());
        let mut layer_bytes = 0u64;
        for descriptor in &manifest.layers {
            let data = std::fs::read(blob_path(dir, &descriptor.digest)?).map_err(transport)?;
            layer_bytes += data.len() as u64;
            layers.push(PackageLayer::new(&descriptor.media_type, data));
        }
        Ok(FetchedImage {
            image: PackageImage::new(layers),
            manifest_digest,
            layer_bytes,
        })
    }
}

impl ImageDownloader for OciPackageDownloader {
    fn fetch(&self, package: &Package) -> Result<PackageImage, DownloadError> {
        debug!(
            name = %package.name,
            version = %package.version,
            url = %package.url,
            "fetching package image"
        );
        let url = Url::parse(&package.url)
            .map_err(|_| DownloadError::UnsupportedUrl(package.url.clone()))?;
        let fetched = match url.scheme() {
            "oci" => retry(self.max_attempts, self.retry_interval, || {
                self.fetch_registry(&url)
                    .inspect_err(|e| debug!(url = %package.url, "fetch attempt failed: {e}"))
            }),
            "file" => {
                let dir = url
                    .to_file_path()
                    .map_err(|_| DownloadError::UnsupportedUrl(package.url.clone()))?;
                self.fetch_layout(&dir)
            }
            _ => Err(DownloadError::UnsupportedUrl(package.url.clone())),
        }?;

        if fetched.layer_bytes != package.size {
            return Err(DownloadError::SizeMismatch {
                expected: package.size,
                actual: fetched.layer_bytes,
            });
        }
        if !fetched.manifest_digest.eq_ignore_ascii_case(&package.sha256) {
            return Err(DownloadError::DigestMismatch {
                expected: package.sha256.clone(),
                actual: fetched.manifest_digest,
            });
        }
        Ok(fetched.image)
    }
}

fn registry_reference(url: &Url) -> Result<Reference, DownloadError> {
    let host = url
        .host_str()
        .ok_or_else(|| DownloadError::UnsupportedUrl(url.to_string()))?;
    let mut raw = String::from(host);
    if let Some(port) = url.port() {
        let _ = write!(raw, ":{port}");
    }
    raw.push_str(url.path());
    Reference::try_from(raw).map_err(|_| DownloadError::UnsupportedUrl(url.to_string()))
}

fn blob_path(dir: &Path, digest: &str) -> Result<PathBuf, DownloadError> {
    let (algorithm, hex) = digest
        .split_once(':')
        .ok_or_else(|| DownloadError::Transport(format!("malformed blob digest `{digest}`")))?;
    Ok(dir.join("blobs").join(algorithm).join(hex))
}

pub(crate) fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().fold(String::new(), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}
