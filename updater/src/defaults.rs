//! Process-wide constants and data embedded at compile time.

/// Default root of the package repositories on a host.
pub const PACKAGES_DIR: &str = "/opt/datadog-packages";

/// Media type of the OCI layer carrying a package payload. Layers with any
/// other media type are ignored during extraction.
pub const PACKAGE_LAYER_MEDIA_TYPE: &str = "application/vnd.datadog.package.layer.v1.tar+zstd";

/// Upper bound on the uncompressed size of a package payload.
pub const PACKAGE_MAX_SIZE: u64 = 3 << 30; // 3GiB

/// Remote-config product carrying the updater catalog.
pub const PRODUCT_UPDATER_CATALOG: &str = "UPDATER_CATALOG_DD";

/// Prefix of staging directories created under the repository root. Package
/// names may not start with a dot, so staged trees can never shadow one.
pub const STAGING_DIR_PREFIX: &str = ".staging-";

/// Baseline catalog shipped with the binary. Remote-config documents are
/// appended to it, never replace it.
pub(crate) const RAW_CATALOG: &str = include_str!("data/catalog.json");

/// Versions installed when a package is first provisioned on a host.
pub(crate) const RAW_DEFAULTS: &str = include_str!("data/defaults.json");
