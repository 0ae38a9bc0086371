//! Flash algorithm decoding
//!
//! Packs ship flash algorithms as binary images. Decoding them is left to a
//! [`FlashAlgoDecoder`]; this crate only needs their geometry (page size,
//! erased value, sector table) and an opaque image to attach to each flash
//! region.
//!
//! [`FlashAlgoIndex`] is a decoder backed by a TOML table describing the
//! geometry of known algorithm files, optionally pinned by SHA256.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AlgoError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse algorithm index: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("No geometry known for flash algorithm '{0}'")]
    UnknownAlgorithm(String),
    #[error("SHA mismatch for '{file}': expected {expected}, got {actual}")]
    ShaMismatch {
        file: String,
        expected: String,
        actual: String,
    },
    #[error("Invalid flash algorithm '{file}': {reason}")]
    Invalid { file: String, reason: String },
}

/// RAM window a flash algorithm is loaded into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RamRange {
    pub start: u64,
    pub size: u64,
}

/// Executable algorithm image for a chosen page size and RAM window
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlgorithmImage {
    /// Algorithm file name within the pack
    pub file: String,
    pub page_size: u64,
    pub ram: RamRange,
    #[serde(skip)]
    pub payload: Arc<[u8]>,
}

/// A decoded flash algorithm
pub trait FlashAlgorithm: fmt::Debug {
    /// Programming page size as declared by the algorithm
    fn page_size(&self) -> u64;

    /// Value of an erased byte
    fn erased_byte_value(&self) -> u8;

    /// `(offset, sector size)` pairs ordered by offset
    fn sector_sizes(&self) -> &[(u64, u64)];

    /// Produce the image to run for `page_size` with `ram` as work area
    fn build_image(&self, page_size: u64, ram: RamRange) -> AlgorithmImage;
}

/// Turns raw algorithm bytes into a [`FlashAlgorithm`]
pub trait FlashAlgoDecoder: fmt::Debug + Send + Sync {
    fn decode(&self, file: &str, data: &[u8]) -> Result<Box<dyn FlashAlgorithm>, AlgoError>;
}

/// Geometry of one algorithm file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmEntry {
    /// Pack-relative algorithm path (e.g., "Flash/STM32F4xx_1024.FLM")
    pub file: String,
    pub page_size: u64,
    #[serde(default = "default_erased_byte_value")]
    pub erased_byte_value: u8,
    /// `[offset, sector size]` pairs
    pub sectors: Vec<(u64, u64)>,
    /// Expected SHA256 of the algorithm file
    #[serde(default)]
    pub sha256: Option<String>,
}

fn default_erased_byte_value() -> u8 {
    0xFF
}

fn default_version() -> String {
    "1.0".to_string()
}

/// Table of known algorithm geometries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashAlgoIndex {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub algorithm: Vec<AlgorithmEntry>,
}

impl Default for FlashAlgoIndex {
    fn default() -> Self {
        Self {
            version: default_version(),
            algorithm: Vec::new(),
        }
    }
}

impl FlashAlgoIndex {
    /// Load an algorithm index from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, AlgoError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load an algorithm index from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, AlgoError> {
        let mut index: FlashAlgoIndex = toml::from_str(content)?;
        for entry in &mut index.algorithm {
            entry.sectors.sort_by_key(|&(offset, _)| offset);
        }
        Ok(index)
    }

    /// Find the entry for an algorithm file.
    ///
    /// Path separators and case are ignored, as pack authors mix both.
    pub fn find(&self, file: &str) -> Option<&AlgorithmEntry> {
        let wanted = normalize(file);
        self.algorithm.iter().find(|a| normalize(&a.file) == wanted)
    }

    pub fn add(&mut self, entry: AlgorithmEntry) {
        self.algorithm.push(entry);
    }
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/").to_ascii_lowercase()
}

impl FlashAlgoDecoder for FlashAlgoIndex {
    fn decode(&self, file: &str, data: &[u8]) -> Result<Box<dyn FlashAlgorithm>, AlgoError> {
        let entry = self
            .find(file)
            .ok_or_else(|| AlgoError::UnknownAlgorithm(file.to_string()))?;

        if let Some(expected) = &entry.sha256 {
            let actual = sha256_hex(data);
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(AlgoError::ShaMismatch {
                    file: file.to_string(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        if entry.sectors.is_empty() {
            return Err(AlgoError::Invalid {
                file: file.to_string(),
                reason: "empty sector table".to_string(),
            });
        }

        Ok(Box::new(IndexedAlgorithm {
            entry: entry.clone(),
            data: Arc::from(data),
        }))
    }
}

/// Algorithm whose geometry comes from a [`FlashAlgoIndex`] entry
#[derive(Debug, Clone)]
struct IndexedAlgorithm {
    entry: AlgorithmEntry,
    data: Arc<[u8]>,
}

impl FlashAlgorithm for IndexedAlgorithm {
    fn page_size(&self) -> u64 {
        self.entry.page_size
    }

    fn erased_byte_value(&self) -> u8 {
        self.entry.erased_byte_value
    }

    fn sector_sizes(&self) -> &[(u64, u64)] {
        &self.entry.sectors
    }

    fn build_image(&self, page_size: u64, ram: RamRange) -> AlgorithmImage {
        AlgorithmImage {
            file: self.entry.file.clone(),
            page_size,
            ram,
            payload: self.data.clone(),
        }
    }
}

/// Compute SHA256 hash of data and return as hex string
pub fn sha256_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX: &str = r#"
version = "1.0"

[[algorithm]]
file = "Flash/ACME_512.FLM"
page_size = 0x400
sectors = [[0x10000, 0x2000], [0x0, 0x1000]]

[[algorithm]]
file = "Flash/ACME_OTP.FLM"
page_size = 8
erased_byte_value = 0x00
sectors = [[0x0, 0x40]]
sha256 = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
"#;

    #[test]
    fn test_index_lookup() {
        let index = FlashAlgoIndex::from_toml(INDEX).unwrap();
        assert_eq!(index.algorithm.len(), 2);

        let entry = index.find("flash\\acme_512.flm").unwrap();
        assert_eq!(entry.page_size, 0x400);
        assert_eq!(entry.erased_byte_value, 0xFF);
        // Sector table is ordered by offset after loading
        assert_eq!(entry.sectors, vec![(0x0, 0x1000), (0x10000, 0x2000)]);

        assert!(index.find("Flash/OTHER.FLM").is_none());
    }

    #[test]
    fn test_decode_builds_image() {
        let index = FlashAlgoIndex::from_toml(INDEX).unwrap();
        let algo = index.decode("Flash/ACME_512.FLM", b"\x7fELF").unwrap();
        assert_eq!(algo.page_size(), 0x400);
        assert_eq!(algo.sector_sizes().len(), 2);

        let ram = RamRange {
            start: 0x2000_0000,
            size: 0x8000,
        };
        let image = algo.build_image(0x200, ram);
        assert_eq!(image.page_size, 0x200);
        assert_eq!(image.ram, ram);
        assert_eq!(&image.payload[..], b"\x7fELF");
    }

    #[test]
    fn test_decode_checks_sha() {
        let index = FlashAlgoIndex::from_toml(INDEX).unwrap();

        let algo = index.decode("Flash/ACME_OTP.FLM", b"hello world").unwrap();
        assert_eq!(algo.erased_byte_value(), 0x00);

        assert!(matches!(
            index.decode("Flash/ACME_OTP.FLM", b"tampered"),
            Err(AlgoError::ShaMismatch { .. })
        ));
        assert!(matches!(
            index.decode("Flash/NOPE.FLM", b""),
            Err(AlgoError::UnknownAlgorithm(_))
        ));
    }

    #[test]
    fn test_sha256() {
        let hash = sha256_hex(b"hello world");
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }
}
