//! In-memory package image: the capability surface the extractor depends
//! on. Whether the layers came from a registry, a local OCI layout or a test
//! fixture is a downloader concern.

use std::io::Read;

/// One layer of a package image, held compressed.
#[derive(Debug, Clone)]
pub struct PackageLayer {
    media_type: String,
    data: Vec<u8>,
}

impl PackageLayer {
    pub fn new(media_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            media_type: media_type.into(),
            data,
        }
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    /// Streaming zstd decompression of the layer contents. Package payload
    /// layers carry a tar stream inside.
    pub fn uncompressed(&self) -> std::io::Result<impl Read + '_> {
        zstd::stream::read::Decoder::new(self.data.as_slice())
    }
}

/// A fully fetched package image.
#[derive(Debug, Clone, Default)]
pub struct PackageImage {
    layers: Vec<PackageLayer>,
}

impl PackageImage {
    pub fn new(layers: Vec<PackageLayer>) -> Self {
        Self { layers }
    }

    pub fn layers(&self) -> &[PackageLayer] {
        &self.layers
    }
}
