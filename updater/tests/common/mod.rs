//! Shared fixtures: an in-process remote-config client, payload tar layers
//! and local OCI image layouts for the downloader's `file://` transport.

use datadog_updater::catalog::{Catalog, CatalogClient, Package};
use datadog_updater::defaults::PACKAGE_LAYER_MEDIA_TYPE;
use datadog_updater::installer::Installer;
use datadog_updater::oci;
use datadog_updater::package::downloader::OciPackageDownloader;
use datadog_updater::remote_config::{
    ApplyStatus, ApplyStatusSink, ConfigUpdateHandler, RawConfig, RemoteConfigClient,
};
use datadog_updater::repository::Repositories;
use oci_client::client::ClientConfig;
use oci_client::manifest::{OciDescriptor, OciImageManifest};
use ring::digest::{digest, SHA256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct NullSink;

impl ApplyStatusSink for NullSink {
    fn ack(&self, _config_id: &str, _status: ApplyStatus) {}
}

/// In-process remote-config client: records subscribers and replays pushed
/// config batches to them.
#[derive(Default)]
pub struct FakeRemoteConfig {
    handlers: Mutex<Vec<Arc<dyn ConfigUpdateHandler>>>,
}

impl RemoteConfigClient for FakeRemoteConfig {
    fn subscribe(&self, _product: &str, handler: Arc<dyn ConfigUpdateHandler>) {
        self.handlers.lock().unwrap().push(handler);
    }
}

impl FakeRemoteConfig {
    pub fn push_catalog(&self, catalog: &Catalog) {
        let configs = HashMap::from([(
            "datadog/2/UPDATER_CATALOG_DD/catalog/config".to_string(),
            RawConfig::new(serde_json::to_vec(catalog).unwrap()),
        )]);
        for handler in self.handlers.lock().unwrap().iter() {
            handler.on_update(&configs, &NullSink);
        }
    }
}

/// Builds a zstd-compressed tar payload from `(path, contents)` pairs,
/// directories denoted by a trailing `/`.
pub fn payload(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, contents) in entries {
        let mut header = tar::Header::new_gnu();
        if let Some(dir_path) = path.strip_suffix('/') {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            builder
                .append_data(&mut header, dir_path, std::io::empty())
                .unwrap();
        } else {
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(contents.len() as u64);
            header.set_mode(0o755);
            builder.append_data(&mut header, *path, *contents).unwrap();
        }
    }
    let tar_bytes = builder.into_inner().unwrap();
    zstd::stream::encode_all(tar_bytes.as_slice(), 0).unwrap()
}

/// Writes an OCI image layout with a single payload layer under `dir` and
/// returns a catalog entry pointing at it.
pub fn image_layout_entry(dir: &Path, name: &str, version: &str, payload: &[u8]) -> Package {
    let blobs = dir.join("blobs").join("sha256");
    std::fs::create_dir_all(&blobs).unwrap();

    let layer_hex = hex(digest(&SHA256, payload).as_ref());
    std::fs::write(blobs.join(&layer_hex), payload).unwrap();

    let manifest = OciImageManifest {
        layers: vec![OciDescriptor {
            media_type: PACKAGE_LAYER_MEDIA_TYPE.to_string(),
            digest: format!("sha256:{layer_hex}"),
            size: payload.len() as i64,
            ..Default::default()
        }],
        ..Default::default()
    };
    let manifest_bytes = serde_json::to_vec(&manifest).unwrap();
    let manifest_hex = hex(digest(&SHA256, &manifest_bytes).as_ref());
    std::fs::write(blobs.join(&manifest_hex), &manifest_bytes).unwrap();

    let index = serde_json::json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.index.v1+json",
        "manifests": [{
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "digest": format!("sha256:{manifest_hex}"),
            "size": manifest_bytes.len(),
        }],
    });
    std::fs::write(dir.join("index.json"), serde_json::to_vec(&index).unwrap()).unwrap();

    Package {
        name: name.to_string(),
        version: version.to_string(),
        sha256: manifest_hex,
        url: url::Url::from_file_path(dir).unwrap().to_string(),
        size: payload.len() as u64,
        platform: "linux".to_string(),
        arch: "amd64".to_string(),
    }
}

pub fn new_installer(
    root: &Path,
    rc: &FakeRemoteConfig,
) -> Installer<OciPackageDownloader> {
    let repositories = Repositories::new(root).unwrap();
    let catalog = CatalogClient::new(rc).unwrap();
    let runtime = Arc::new(tokio::runtime::Runtime::new().unwrap());
    let downloader = OciPackageDownloader::new(oci::Client::new(ClientConfig::default()), runtime)
        .with_retries(2, Duration::from_millis(100));
    Installer::new(repositories, catalog, downloader)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
