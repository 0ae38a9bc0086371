//! Resolved per-device description
//!
//! A [`DeviceDescriptor`] is produced for every `<device>` and `<variant>`
//! of a pack. Its element collections are resolved when the pack is
//! walked; the memory map and debug topology are built from them on first
//! use and cached.

use std::cell::OnceCell;
use std::sync::Arc;
use tracing::debug;

use crate::debug::{DebugResolver, DebugTopology, ResetType};
use crate::element::Element;
use crate::flash::RegionSynthesizer;
use crate::flash_algo::FlashAlgoDecoder;
use crate::memory_map::MemoryMap;
use crate::storage::{PackFiles, StorageError};

/// Element collections of one device after the identity merge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedElements {
    pub processors: Vec<Element>,
    pub memories: Vec<Element>,
    pub algorithms: Vec<Element>,
    pub debugs: Vec<Element>,
    pub debug_ports: Vec<Element>,
    pub access_ports: Vec<Element>,
}

/// Pack-wide collaborators shared by all devices of one pack
#[derive(Debug, Clone, Default)]
pub struct PackResources {
    /// Pack name used in log messages
    pub name: String,
    pub files: Option<PackFiles>,
    pub decoder: Option<Arc<dyn FlashAlgoDecoder>>,
}

impl PackResources {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            files: None,
            decoder: None,
        }
    }
}

/// One device or variant of a pack
#[derive(Debug)]
pub struct DeviceDescriptor {
    part_number: String,
    family_chain: Vec<String>,
    elements: ResolvedElements,
    resources: Arc<PackResources>,
    memory_map: OnceCell<MemoryMap>,
    debug_topology: OnceCell<DebugTopology>,
}

impl DeviceDescriptor {
    pub fn new(
        part_number: impl Into<String>,
        family_chain: Vec<String>,
        elements: ResolvedElements,
        resources: Arc<PackResources>,
    ) -> Self {
        Self {
            part_number: part_number.into(),
            family_chain,
            elements,
            resources,
            memory_map: OnceCell::new(),
            debug_topology: OnceCell::new(),
        }
    }

    pub fn part_number(&self) -> &str {
        &self.part_number
    }

    /// Vendor, family and sub-family names, outermost first
    pub fn family_chain(&self) -> &[String] {
        &self.family_chain
    }

    /// Vendor name without its numeric id (e.g. "STMicroelectronics:13")
    pub fn vendor(&self) -> Option<&str> {
        self.family_chain
            .first()
            .map(|v| v.split_once(':').map_or(v.as_str(), |(name, _)| name))
    }

    /// Family chain without the vendor
    pub fn families(&self) -> &[String] {
        self.family_chain.get(1..).unwrap_or_default()
    }

    pub fn elements(&self) -> &ResolvedElements {
        &self.elements
    }

    pub fn pack_name(&self) -> &str {
        &self.resources.name
    }

    /// Memory map with ROM converted to flash where an algorithm exists
    pub fn memory_map(&self) -> &MemoryMap {
        self.memory_map.get_or_init(|| {
            debug!(part = %self.part_number, "building memory map");
            let mut synthesizer = RegionSynthesizer::new(&self.resources.name, &self.part_number);
            if let Some(files) = &self.resources.files {
                synthesizer = synthesizer.with_files(files);
            }
            if let Some(decoder) = &self.resources.decoder {
                synthesizer = synthesizer.with_decoder(decoder.as_ref());
            }
            synthesizer.build(&self.elements.memories, &self.elements.algorithms)
        })
    }

    pub fn debug_topology(&self) -> &DebugTopology {
        self.debug_topology.get_or_init(|| {
            debug!(part = %self.part_number, "building debug topology");
            DebugResolver::new(&self.resources.name, &self.part_number).resolve(
                &self.elements.processors,
                &self.elements.debug_ports,
                &self.elements.access_ports,
                &self.elements.debugs,
            )
        })
    }

    /// Reset type named by the first `<debug>` element
    pub fn default_reset_type(&self) -> ResetType {
        self.elements
            .debugs
            .first()
            .and_then(|d| d.attr("defaultResetSequence"))
            .map_or(ResetType::Software, ResetType::from_sequence)
    }

    /// Path of the SVD named by the first `<debug>` element
    pub fn svd_path(&self) -> Option<&str> {
        self.elements.debugs.first().and_then(|d| d.attr("svd"))
    }

    /// Contents of the device's SVD file, if it names one
    pub fn svd(&self) -> Result<Option<Vec<u8>>, StorageError> {
        self.svd_path().map(|path| self.read_file(path)).transpose()
    }

    /// Read a description-relative file from the pack
    pub fn read_file(&self, filename: &str) -> Result<Vec<u8>, StorageError> {
        match &self.resources.files {
            Some(files) => files.read(filename),
            None => Err(StorageError::NotFound(filename.to_string())),
        }
    }
}
