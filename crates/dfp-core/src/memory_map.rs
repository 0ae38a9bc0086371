//! Device memory map types

use serde::Serialize;
use std::sync::Arc;

use crate::flash_algo::AlgorithmImage;

/// Kind of memory a region holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    Rom,
    Ram,
    Device,
    Flash,
}

/// Programming parameters of a flash region
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlashInfo {
    /// Erase granularity
    pub sector_size: u64,
    /// Programming granularity
    pub page_size: u64,
    pub erased_byte_value: u8,
    /// Algorithm file within the pack
    pub algorithm: String,
    /// Shared by every region split from the same ROM region
    #[serde(skip)]
    pub image: Arc<AlgorithmImage>,
}

/// One contiguous region of the device address space
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryRegion {
    pub name: String,
    /// Start address (inclusive)
    pub start: u64,
    /// End address (inclusive)
    pub end: u64,
    /// Access rights, e.g. "rwx"
    pub access: String,
    pub kind: MemoryKind,
    pub is_default: bool,
    pub is_boot_memory: bool,
    pub is_testable: bool,
    pub alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flash: Option<FlashInfo>,
}

impl MemoryRegion {
    /// Size of this region in bytes
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Check if an address is within this region
    pub fn contains_address(&self, addr: u64) -> bool {
        addr >= self.start && addr <= self.end
    }

    /// Check if `[start, end]` lies entirely within this region
    pub fn contains_range(&self, start: u64, end: u64) -> bool {
        self.contains_address(start) && self.contains_address(end)
    }

    pub fn is_flash(&self) -> bool {
        self.flash.is_some()
    }
}

/// Resolved memory map of one device, ordered by start address
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MemoryMap {
    regions: Vec<MemoryRegion>,
}

impl MemoryMap {
    pub fn new(mut regions: Vec<MemoryRegion>) -> Self {
        regions.sort_by_key(|r| r.start);
        Self { regions }
    }

    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// First region containing `addr`
    pub fn region_for_address(&self, addr: u64) -> Option<&MemoryRegion> {
        self.regions.iter().find(|r| r.contains_address(addr))
    }

    pub fn region_by_name(&self, name: &str) -> Option<&MemoryRegion> {
        self.regions.iter().find(|r| r.name == name)
    }

    pub fn boot_memory(&self) -> Option<&MemoryRegion> {
        self.regions.iter().find(|r| r.is_boot_memory)
    }

    pub fn default_ram(&self) -> Option<&MemoryRegion> {
        self.regions
            .iter()
            .find(|r| r.kind == MemoryKind::Ram && r.is_default)
    }

    pub fn flash_regions(&self) -> impl Iterator<Item = &MemoryRegion> {
        self.regions.iter().filter(|r| r.kind == MemoryKind::Flash)
    }

    pub fn ram_regions(&self) -> impl Iterator<Item = &MemoryRegion> {
        self.regions.iter().filter(|r| r.kind == MemoryKind::Ram)
    }

    pub fn rom_regions(&self) -> impl Iterator<Item = &MemoryRegion> {
        self.regions.iter().filter(|r| r.kind == MemoryKind::Rom)
    }
}
