//! Thin [oci_client] wrapper. It centralizes client construction and the
//! auth handling for the calls the downloader needs, and keeps a potential
//! upstream refactor behind one seam.

use oci_client::{
    client::{AsLayerDescriptor, ClientConfig},
    manifest::OciImageManifest,
    secrets::RegistryAuth,
    Reference,
};
use thiserror::Error;
use tokio::io::AsyncWrite;

#[derive(Error, Debug)]
pub enum OciClientError {
    #[error("pulling image manifest: {0}")]
    PullManifest(String),

    #[error("pulling blob: {0}")]
    PullBlob(String),
}

/// [oci_client::Client] with the registry auth the updater uses. Package
/// registries are public; everything is pulled anonymously.
pub struct Client {
    client: oci_client::Client,
    auth: RegistryAuth,
}

impl Client {
    pub fn new(client_config: ClientConfig) -> Self {
        Self {
            client: oci_client::Client::new(client_config),
            auth: RegistryAuth::Anonymous,
        }
    }

    /// Calls [oci_client::Client::pull_image_manifest] using the configured
    /// auth. Returns the manifest and its digest as reported by the registry.
    pub async fn pull_image_manifest(
        &self,
        reference: &Reference,
    ) -> Result<(OciImageManifest, String), OciClientError> {
        self.client
            .pull_image_manifest(reference, &self.auth)
            .await
            .map_err(|err| OciClientError::PullManifest(err.to_string()))
    }

    /// Calls [oci_client::Client::pull_blob].
    pub async fn pull_blob<T: AsyncWrite + Unpin>(
        &self,
        reference: &Reference,
        layer: impl AsLayerDescriptor,
        out: T,
    ) -> Result<(), OciClientError> {
        self.client
            .pull_blob(reference, layer, out)
            .await
            .map_err(|err| OciClientError::PullBlob(err.to_string()))
    }
}
