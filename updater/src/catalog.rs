//! The organization-scoped view of what can be installed: the catalog of
//! downloadable packages and the default version of each package. Both are
//! kept behind separate accessors so their sources can change independently;
//! today the defaults are embedded and the catalog is baseline plus
//! remote config.

use crate::defaults::{PRODUCT_UPDATER_CATALOG, RAW_CATALOG, RAW_DEFAULTS};
use crate::remote_config::{
    ApplyStatus, ApplyStatusSink, ConfigUpdateHandler, RawConfig, RemoteConfigClient,
};
use crate::utils::cancellation::CancellationToken;
use crate::utils::latch::{Latch, LatchError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("package `{name}` version `{version}` not found in catalog")]
    NotFound { name: String, version: String },

    #[error("no default version for package `{0}`")]
    NoDefaultVersion(String),

    #[error("waiting for catalog: {0}")]
    Cancelled(#[from] LatchError),

    #[error("could not decode catalog: {0}")]
    Decode(#[from] serde_json::Error),
}

/// A downloadable package version and its transport metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    #[serde(rename = "package")]
    pub name: String,
    pub version: String,
    pub sha256: String,
    pub url: String,
    pub size: u64,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub arch: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    pub packages: Vec<Package>,
}

/// Merges the embedded baseline catalog with remote-config documents and
/// serves blocking lookups. Lookups block until the first catalog has been
/// received from remote config.
pub struct CatalogClient {
    baseline: Catalog,
    defaults: HashMap<String, String>,
    catalog: Mutex<Catalog>,
    catalog_received: Latch,
}

impl CatalogClient {
    /// Builds the client and subscribes it to the updater-catalog product.
    pub fn new(rc: &impl RemoteConfigClient) -> Result<Arc<Self>, CatalogError> {
        let client = Arc::new(Self::with_embedded_data()?);
        rc.subscribe(PRODUCT_UPDATER_CATALOG, client.clone());
        Ok(client)
    }

    fn with_embedded_data() -> Result<Self, CatalogError> {
        let baseline: Catalog = serde_json::from_str(RAW_CATALOG)?;
        let defaults: HashMap<String, String> = serde_json::from_str(RAW_DEFAULTS)?;
        Ok(Self {
            catalog: Mutex::new(baseline.clone()),
            baseline,
            defaults,
            catalog_received: Latch::new(),
        })
    }

    /// Returns the catalog entry for `(name, version)`. Blocks until a
    /// catalog has been received, or until `cancellation` fires.
    pub fn get_package(
        &self,
        cancellation: &CancellationToken,
        name: &str,
        version: &str,
    ) -> Result<Package, CatalogError> {
        self.catalog_received.wait(cancellation)?;
        self.lock_catalog()
            .packages
            .iter()
            .find(|p| p.name == name && p.version == version)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound {
                name: name.to_string(),
                version: version.to_string(),
            })
    }

    /// Returns the catalog entry for the default version of `name`.
    pub fn get_default_package(
        &self,
        cancellation: &CancellationToken,
        name: &str,
    ) -> Result<Package, CatalogError> {
        let version = self
            .defaults
            .get(name)
            .ok_or_else(|| CatalogError::NoDefaultVersion(name.to_string()))?;
        self.get_package(cancellation, name, version)
    }

    /// The embedded `name -> default version` mapping.
    pub fn default_versions(&self) -> &HashMap<String, String> {
        &self.defaults
    }

    fn lock_catalog(&self) -> MutexGuard<'_, Catalog> {
        self.catalog
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ConfigUpdateHandler for CatalogClient {
    /// Rebuilds the merged catalog from the baseline plus every received
    /// document. The transport delivers an unordered map, so documents are
    /// folded in ascending config-ID order to keep the merge deterministic.
    /// A single decode failure rejects the whole batch.
    fn on_update(&self, configs: &HashMap<String, RawConfig>, sink: &dyn ApplyStatusSink) {
        let mut config_ids: Vec<&String> = configs.keys().collect();
        config_ids.sort();

        let mut merged = self.baseline.clone();
        for config_id in &config_ids {
            match serde_json::from_slice::<Catalog>(&configs[*config_id].config) {
                Ok(catalog) => merged.packages.extend(catalog.packages),
                Err(err) => {
                    warn!(config_id = %config_id, %err, "could not decode updater catalog config");
                    sink.ack(config_id, ApplyStatus::error(err.to_string()));
                    return;
                }
            }
        }
        for config_id in config_ids {
            sink.ack(config_id, ApplyStatus::acknowledged());
        }

        *self.lock_catalog() = merged;
        info!("datadog package catalog was updated");
        self.catalog_received.open();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote_config::ApplyState;
    use crate::utils::cancellation::cancellation_pair;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingSink {
        acks: StdMutex<Vec<(String, ApplyStatus)>>,
    }

    impl ApplyStatusSink for RecordingSink {
        fn ack(&self, config_id: &str, status: ApplyStatus) {
            self.acks
                .lock()
                .unwrap()
                .push((config_id.to_string(), status));
        }
    }

    fn catalog_config(packages: &[(&str, &str)]) -> RawConfig {
        let catalog = Catalog {
            packages: packages
                .iter()
                .map(|(name, version)| test_package(name, version))
                .collect(),
        };
        RawConfig::new(serde_json::to_vec(&catalog).unwrap())
    }

    fn test_package(name: &str, version: &str) -> Package {
        Package {
            name: name.to_string(),
            version: version.to_string(),
            sha256: "a".repeat(64),
            url: format!("oci://registry.example.com/{name}:{version}"),
            size: 1024,
            platform: "linux".to_string(),
            arch: "amd64".to_string(),
        }
    }

    #[test]
    fn test_lookup_blocks_until_cancelled() {
        let client = CatalogClient::with_embedded_data().unwrap();
        let (source, token) = cancellation_pair();
        source.cancel();

        let err = client
            .get_package(&token, "datadog-agent", "7.50.0")
            .unwrap_err();

        assert_matches::assert_matches!(err, CatalogError::Cancelled(_));
    }

    #[test]
    fn test_lookup_after_update_merges_baseline_and_remote() {
        let client = CatalogClient::with_embedded_data().unwrap();
        let sink = RecordingSink::default();
        let configs = HashMap::from([(
            "datadog/2/UPDATER_CATALOG_DD/catalog/config".to_string(),
            catalog_config(&[("datadog-agent", "7.51.0")]),
        )]);

        client.on_update(&configs, &sink);

        let token = CancellationToken::never();
        // Remote entry.
        let package = client
            .get_package(&token, "datadog-agent", "7.51.0")
            .unwrap();
        assert_eq!(package.version, "7.51.0");
        // Baseline entry survives the merge.
        client
            .get_package(&token, "datadog-agent", "7.50.0")
            .unwrap();
        // Absent entry.
        let err = client
            .get_package(&token, "datadog-agent", "7.49.0")
            .unwrap_err();
        assert_matches::assert_matches!(err, CatalogError::NotFound { .. });
    }

    #[test]
    fn test_first_match_wins_on_duplicates() {
        let client = CatalogClient::with_embedded_data().unwrap();
        let sink = RecordingSink::default();
        let mut duplicate = test_package("datadog-agent", "7.51.0");
        duplicate.url = "oci://registry.example.com/duplicate".to_string();
        let first = catalog_config(&[("datadog-agent", "7.51.0")]);
        let second = RawConfig::new(
            serde_json::to_vec(&Catalog {
                packages: vec![duplicate],
            })
            .unwrap(),
        );
        // Config IDs are folded in ascending order; "a" comes first.
        let configs = HashMap::from([("a".to_string(), first), ("b".to_string(), second)]);

        client.on_update(&configs, &sink);

        let package = client
            .get_package(&CancellationToken::never(), "datadog-agent", "7.51.0")
            .unwrap();
        assert_eq!(package.url, "oci://registry.example.com/datadog-agent:7.51.0");
    }

    #[test]
    fn test_decode_failure_rejects_the_batch() {
        let client = CatalogClient::with_embedded_data().unwrap();
        let sink = RecordingSink::default();
        let configs = HashMap::from([(
            "broken".to_string(),
            RawConfig::new(b"not json".to_vec()),
        )]);

        client.on_update(&configs, &sink);

        let acks = sink.acks.lock().unwrap();
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].0, "broken");
        assert_eq!(acks[0].1.state, ApplyState::Error);
        assert!(!acks[0].1.error.is_empty());
        // The latch stays closed: lookups still block.
        assert!(!client.catalog_received.is_open());
    }

    #[test]
    fn test_every_config_is_acknowledged_once() {
        let client = CatalogClient::with_embedded_data().unwrap();
        let sink = RecordingSink::default();
        let configs = HashMap::from([
            ("a".to_string(), catalog_config(&[("pkg-a", "1.0.0")])),
            ("b".to_string(), catalog_config(&[("pkg-b", "2.0.0")])),
        ]);

        client.on_update(&configs, &sink);

        let mut acks = sink.acks.lock().unwrap().clone();
        acks.sort_by(|l, r| l.0.cmp(&r.0));
        assert_eq!(acks.len(), 2);
        assert!(acks
            .iter()
            .all(|(_, status)| status.state == ApplyState::Acknowledged));
    }

    #[test]
    fn test_default_package_uses_the_embedded_defaults() {
        let client = CatalogClient::with_embedded_data().unwrap();
        let sink = RecordingSink::default();
        client.on_update(&HashMap::new(), &sink);

        let package = client
            .get_default_package(&CancellationToken::never(), "datadog-agent")
            .unwrap();
        assert_eq!(package.version, "7.50.0");

        let err = client
            .get_default_package(&CancellationToken::never(), "unknown-package")
            .unwrap_err();
        assert_matches::assert_matches!(err, CatalogError::NoDefaultVersion(_));
    }

    #[test]
    fn test_later_update_replaces_the_snapshot() {
        let client = CatalogClient::with_embedded_data().unwrap();
        let sink = RecordingSink::default();
        client.on_update(
            &HashMap::from([("a".to_string(), catalog_config(&[("pkg-a", "1.0.0")]))]),
            &sink,
        );
        client.on_update(
            &HashMap::from([("a".to_string(), catalog_config(&[("pkg-a", "2.0.0")]))]),
            &sink,
        );

        let token = CancellationToken::never();
        client.get_package(&token, "pkg-a", "2.0.0").unwrap();
        let err = client.get_package(&token, "pkg-a", "1.0.0").unwrap_err();
        assert_matches::assert_matches!(err, CatalogError::NotFound { .. });
    }
}
