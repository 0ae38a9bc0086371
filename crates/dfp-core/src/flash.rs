//! Memory map synthesis
//!
//! Builds a device's memory map from its resolved `<memory>` and
//! `<algorithm>` elements. ROM regions covered by a flash algorithm become
//! flash regions, one per contiguous range of equal sector size.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::element::{AttributeError, Element};
use crate::flash_algo::{AlgorithmImage, FlashAlgoDecoder, FlashAlgorithm, RamRange};
use crate::memory_map::{FlashInfo, MemoryKind, MemoryMap, MemoryRegion};
use crate::storage::PackFiles;

/// RAM size assumed for an algorithm whose `RAMstart` lies outside every
/// known region and that has no `RAMsize`
pub const FALLBACK_ALGO_RAM_SIZE: u64 = 128 * 1024;

/// Page sizes at or below this are taken to be a phrase size, not a page
const MIN_PLAUSIBLE_PAGE_SIZE: u64 = 32;

/// Builds the memory map of one device
pub struct RegionSynthesizer<'a> {
    pack: &'a str,
    part_number: &'a str,
    files: Option<&'a PackFiles>,
    decoder: Option<&'a dyn FlashAlgoDecoder>,
}

#[derive(Default)]
struct Synthesis {
    regions: Vec<MemoryRegion>,
    saw_startup: bool,
    default_ram: Option<MemoryRegion>,
}

impl<'a> RegionSynthesizer<'a> {
    pub fn new(pack: &'a str, part_number: &'a str) -> Self {
        Self {
            pack,
            part_number,
            files: None,
            decoder: None,
        }
    }

    /// Pack files used to load flash algorithms
    pub fn with_files(mut self, files: &'a PackFiles) -> Self {
        self.files = Some(files);
        self
    }

    pub fn with_decoder(mut self, decoder: &'a dyn FlashAlgoDecoder) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Build the memory map from resolved memory and algorithm elements
    pub fn build(&self, memories: &[Element], algorithms: &[Element]) -> MemoryMap {
        let mut state = self.build_memory_regions(memories);
        self.build_flash_regions(&mut state, algorithms);

        if !state.saw_startup {
            warn!(
                pack = %self.pack,
                part = %self.part_number,
                "device has no identifiable boot memory"
            );
        }

        MemoryMap::new(state.regions)
    }

    fn build_memory_regions(&self, memories: &[Element]) -> Synthesis {
        let mut state = Synthesis::default();
        for element in memories {
            match memory_region(element) {
                Ok(Some(region)) => {
                    if region.is_boot_memory {
                        state.saw_startup = true;
                    }
                    // The first default RAM hosts flash algorithms
                    if state.default_ram.is_none()
                        && region.kind == MemoryKind::Ram
                        && region.is_default
                    {
                        state.default_ram = Some(region.clone());
                    }
                    state.regions.push(region);
                }
                Ok(None) => {}
                Err(err) => {
                    debug!(
                        pack = %self.pack,
                        part = %self.part_number,
                        "ignoring error parsing memories: {}",
                        err
                    );
                }
            }
        }
        state
    }

    fn build_flash_regions(&self, state: &mut Synthesis, algorithms: &[Element]) {
        let Some(default_ram) = state.default_ram.clone() else {
            warn!(
                pack = %self.pack,
                part = %self.part_number,
                "device has no default RAM defined, cannot program flash"
            );
            return;
        };

        let initial = std::mem::take(&mut state.regions);
        let mut regions = Vec::with_capacity(initial.len());
        for region in &initial {
            if region.kind != MemoryKind::Rom {
                regions.push(region.clone());
                continue;
            }
            match self.convert_rom_region(region, algorithms, &initial, &default_ram, state) {
                Some(split) => regions.extend(split),
                None => regions.push(region.clone()),
            }
        }
        state.regions = regions;
    }

    /// Flash regions replacing `region`, or `None` to keep it as ROM
    fn convert_rom_region(
        &self,
        region: &MemoryRegion,
        algorithms: &[Element],
        initial: &[MemoryRegion],
        default_ram: &MemoryRegion,
        state: &mut Synthesis,
    ) -> Option<Vec<MemoryRegion>> {
        // No algorithm means mask ROM or non-programmable flash
        let algo_element = find_matching_algo(region, algorithms)?;
        let file = match algo_element.required("name") {
            Ok(file) => file,
            Err(err) => {
                warn!(pack = %self.pack, part = %self.part_number, "{}", err);
                return None;
            }
        };

        let algo = self.load_flash_algo(file)?;
        let sectors = algo.sector_sizes();
        let Some(min_sector) = sectors.iter().map(|&(_, size)| size).min() else {
            warn!(
                pack = %self.pack,
                part = %self.part_number,
                algorithm = file,
                "flash algorithm has an empty sector table"
            );
            return None;
        };

        let mut page_size = algo.page_size();
        if page_size <= MIN_PLAUSIBLE_PAGE_SIZE {
            page_size = min_sector;
        }

        let ram = self.algo_ram(algo_element, initial, default_ram);
        let image = Arc::new(algo.build_image(page_size, ram));

        Some(self.split_by_sector_size(region, page_size, algo.as_ref(), file, image, state))
    }

    fn load_flash_algo(&self, file: &str) -> Option<Box<dyn FlashAlgorithm>> {
        let loaded = match (self.files, self.decoder) {
            (Some(files), Some(decoder)) => files
                .read(file)
                .map_err(|e| e.to_string())
                .and_then(|data| decoder.decode(file, &data).map_err(|e| e.to_string())),
            (None, _) => Err("pack files are not available".to_string()),
            (_, None) => Err("no flash algorithm decoder configured".to_string()),
        };
        match loaded {
            Ok(algo) => Some(algo),
            Err(reason) => {
                warn!(
                    pack = %self.pack,
                    part = %self.part_number,
                    algorithm = file,
                    "Failed to convert ROM region to flash region because flash algorithm \
                     could not be loaded: {}",
                    reason
                );
                None
            }
        }
    }

    /// Select the RAM window the algorithm runs in
    fn algo_ram(
        &self,
        algo: &Element,
        regions: &[MemoryRegion],
        default_ram: &MemoryRegion,
    ) -> RamRange {
        let default = RamRange {
            start: default_ram.start,
            size: default_ram.length(),
        };
        let start = match algo.int::<u64>("RAMstart") {
            Ok(Some(start)) => start,
            Ok(None) => return default,
            Err(err) => {
                warn!(pack = %self.pack, part = %self.part_number, "{}; using default RAM", err);
                return default;
            }
        };

        let explicit_size = algo.int::<u64>("RAMsize").unwrap_or_else(|err| {
            warn!(pack = %self.pack, part = %self.part_number, "{}", err);
            None
        });
        let size = explicit_size
            .or_else(|| {
                regions
                    .iter()
                    .find(|r| r.contains_address(start))
                    .map(|r| r.length() - (start - r.start))
            })
            .unwrap_or(FALLBACK_ALGO_RAM_SIZE);

        RamRange { start, size }
    }

    fn split_by_sector_size(
        &self,
        region: &MemoryRegion,
        page_size: u64,
        algo: &dyn FlashAlgorithm,
        file: &str,
        image: Arc<AlgorithmImage>,
        state: &mut Synthesis,
    ) -> Vec<MemoryRegion> {
        let mut sectors = algo.sector_sizes().to_vec();
        sectors.sort_by_key(|&(offset, _)| offset);
        let mut split = Vec::with_capacity(sectors.len());

        for (j, &(offset, sector_size)) in sectors.iter().enumerate() {
            let start = region.start.saturating_add(offset);
            // The last range runs to the end of the region
            let end = match sectors.get(j + 1) {
                Some(&(next, _)) => match region.start.saturating_add(next).checked_sub(1) {
                    Some(end) => end,
                    None => continue,
                },
                None => region.end,
            };
            if end < start {
                continue;
            }

            let region_page_size = if page_size > sector_size {
                warn!(
                    pack = %self.pack,
                    part = %self.part_number,
                    "Page size ({}) is larger than sector size ({}) for flash region {}; \
                     reducing page size to {}",
                    page_size,
                    sector_size,
                    region.name,
                    sector_size
                );
                sector_size
            } else {
                page_size
            };

            // Without an explicit startup memory the first flash boots
            let is_boot_memory = if !state.saw_startup {
                state.saw_startup = true;
                true
            } else {
                region.is_boot_memory
            };

            let name = if sectors.len() > 1 {
                format!("{}_{:#x}", region.name, sector_size)
            } else {
                region.name.clone()
            };

            split.push(MemoryRegion {
                name,
                start,
                end,
                access: region.access.clone(),
                kind: MemoryKind::Flash,
                is_default: region.is_default,
                is_boot_memory,
                is_testable: region.is_testable,
                alias: region.alias.clone(),
                flash: Some(FlashInfo {
                    sector_size,
                    page_size: region_page_size,
                    erased_byte_value: algo.erased_byte_value(),
                    algorithm: file.to_string(),
                    image: image.clone(),
                }),
            });
        }
        split
    }
}

/// Turn one `<memory>` element into a region.
///
/// Returns `Ok(None)` for elements with neither `name` nor `id`.
fn memory_region(element: &Element) -> Result<Option<MemoryRegion>, AttributeError> {
    let Some(name) = element.attr("name").or_else(|| element.attr("id")) else {
        return Ok(None);
    };

    // Legacy id-only elements ignore access and are classified by name
    let (access, kind) = if element.has_attr("name") {
        let access = element.required("access")?;
        (access.to_string(), kind_for_access(access))
    } else if name.contains("RAM") {
        ("rwx".to_string(), MemoryKind::Ram)
    } else {
        ("rx".to_string(), MemoryKind::Rom)
    };

    let start: u64 = element.required_int("start")?;
    let size: u64 = element.required_int("size")?;
    if size == 0 {
        return Err(AttributeError::Invalid {
            tag: element.tag().to_string(),
            name: "size".to_string(),
            value: element.attr("size").unwrap_or_default().to_string(),
        });
    }

    let is_default = element.bool_or("default", false);
    Ok(Some(MemoryRegion {
        name: name.to_string(),
        start,
        end: start.saturating_add(size - 1),
        access,
        kind,
        is_default,
        is_boot_memory: element.bool_or("startup", false),
        is_testable: is_default,
        alias: element.attr("alias").map(str::to_string),
        flash: None,
    }))
}

fn kind_for_access(access: &str) -> MemoryKind {
    if access.contains('p') {
        MemoryKind::Device
    } else if access.contains('w') {
        MemoryKind::Ram
    } else {
        MemoryKind::Rom
    }
}

/// First algorithm, in resolved order, whose range fully contains `region`
pub fn find_matching_algo<'e>(
    region: &MemoryRegion,
    algorithms: &'e [Element],
) -> Option<&'e Element> {
    algorithms.iter().find(|algo| {
        let (Ok(start), Ok(size)) = (
            algo.required_int::<u64>("start"),
            algo.required_int::<u64>("size"),
        ) else {
            return false;
        };
        if size == 0 {
            return false;
        }
        let end = start.saturating_add(size - 1);
        start <= region.start && region.end <= end
    })
}
