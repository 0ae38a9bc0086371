//! Opening packs
//!
//! A [`Pack`] is a `.pack` archive, an expanded pack directory or a bare
//! `.pdsc` file whose description has been parsed and walked into device
//! descriptors.

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::descriptor::{DeviceDescriptor, PackResources};
use crate::flash_algo::FlashAlgoDecoder;
use crate::merge::ParseContext;
use crate::storage::{DirectoryPack, PackFiles, PackStorage, StorageError, ZipPack};
use crate::tree::{DescriptionTree, TreeError};
use crate::walker::walk;

#[derive(Error, Debug)]
pub enum PackError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("No .pdsc description found in {0}")]
    MissingDescription(String),
    #[error("Unsupported pack format: {0}")]
    UnsupportedFormat(String),
    #[error(transparent)]
    Xml(#[from] TreeError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

fn is_description(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdsc"))
}

/// Shallowest description among `names`, by name within one depth
fn find_description(names: Vec<String>) -> Option<String> {
    names
        .into_iter()
        .filter(|name| is_description(Path::new(name)))
        .min_by(|a, b| {
            let depth = |name: &str| name.matches('/').count();
            depth(a).cmp(&depth(b)).then_with(|| a.cmp(b))
        })
}

/// A parsed Device Family Pack
#[derive(Debug)]
pub struct Pack {
    source: String,
    name: Option<String>,
    resources: Arc<PackResources>,
    devices: Vec<DeviceDescriptor>,
}

impl Pack {
    /// Open a pack without a flash algorithm decoder
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PackError> {
        Self::open_with(path, None)
    }

    /// Open a pack directory, `.pdsc` file or `.pack` archive.
    ///
    /// Any other file is tried as a zip archive; files that are not one are
    /// [`PackError::UnsupportedFormat`].
    pub fn open_with(
        path: impl AsRef<Path>,
        decoder: Option<Arc<dyn FlashAlgoDecoder>>,
    ) -> Result<Self, PackError> {
        let path = path.as_ref();

        let (storage, description): (Arc<dyn PackStorage>, String) = if path.is_dir() {
            let storage = DirectoryPack::new(path);
            let description = find_description(storage.list()?)
                .ok_or_else(|| PackError::MissingDescription(path.display().to_string()))?;
            (Arc::new(storage), description)
        } else if is_description(path) {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| PackError::MissingDescription(path.display().to_string()))?;
            let root = path.parent().unwrap_or_else(|| Path::new(""));
            (Arc::new(DirectoryPack::new(root)), file_name)
        } else {
            let storage = match ZipPack::open(path) {
                Ok(storage) => storage,
                Err(StorageError::Archive(_)) => {
                    return Err(PackError::UnsupportedFormat(path.display().to_string()))
                }
                Err(e) => return Err(e.into()),
            };
            let description = find_description(storage.list()?)
                .ok_or_else(|| PackError::MissingDescription(path.display().to_string()))?;
            (Arc::new(storage), description)
        };

        info!(path = %path.display(), description = %description, "opening pack");
        Self::from_storage(storage, &description, decoder)
    }

    /// Load a pack from caller-supplied storage
    pub fn from_storage(
        storage: Arc<dyn PackStorage>,
        description: &str,
        decoder: Option<Arc<dyn FlashAlgoDecoder>>,
    ) -> Result<Self, PackError> {
        let bytes = storage.read(description).map_err(|e| match e {
            StorageError::NotFound(path) => PackError::MissingDescription(path),
            other => PackError::Storage(other),
        })?;
        let tree = DescriptionTree::from_bytes(&bytes)?;
        let files = PackFiles::new(storage, description);
        Ok(Self::from_tree(&tree, description, Some(files), decoder))
    }

    /// Parse a description with no pack files behind it.
    ///
    /// Flash algorithms cannot be loaded, so ROM stays ROM.
    pub fn from_description(xml: &str) -> Result<Self, PackError> {
        let tree = DescriptionTree::from_xml(xml)?;
        Ok(Self::from_tree(&tree, "<memory>", None, None))
    }

    fn from_tree(
        tree: &DescriptionTree,
        source: &str,
        files: Option<PackFiles>,
        decoder: Option<Arc<dyn FlashAlgoDecoder>>,
    ) -> Self {
        let name = tree
            .child_text(tree.root(), "name")
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        let resources = Arc::new(PackResources {
            name: name.clone().unwrap_or_else(|| source.to_string()),
            files,
            decoder,
        });

        let mut ctx = ParseContext::new(resources.name.clone());
        let devices = walk(tree, &resources, &mut ctx);
        info!(pack = %resources.name, devices = devices.len(), "loaded pack");

        Self {
            source: source.to_string(),
            name,
            resources,
            devices,
        }
    }

    /// Contents of the description's `<name>` element
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Description file the pack was loaded from
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    pub fn device(&self, part_number: &str) -> Option<&DeviceDescriptor> {
        self.devices.iter().find(|d| d.part_number() == part_number)
    }

    /// Read a description-relative file from the pack
    pub fn read_file(&self, filename: &str) -> Result<Vec<u8>, StorageError> {
        match &self.resources.files {
            Some(files) => files.read(filename),
            None => Err(StorageError::NotFound(filename.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::{ApAddress, ResetType};
    use crate::flash_algo::FlashAlgoIndex;
    use crate::memory_map::MemoryKind;
    use crate::storage::MemoryPack;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    const DESCRIPTION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<package schemaVersion="1.7.7">
  <vendor>Acme</vendor>
  <name>ACME_DFP</name>
  <devices>
    <family Dfamily="ACME7" Dvendor="Acme:99">
      <processor Pname="cm7" Dcore="Cortex-M7" Dfpu="DP_FPU"/>
      <processor Pname="cm4" Dcore="Cortex-M4" Dfpu="SP_FPU"/>
      <debugport __dp="0"/>
      <accessportV1 __apid="0" index="0"/>
      <accessportV1 __apid="1" index="3"/>
      <memory name="FLASH" access="rx" start="0x08000000" size="0x100000" startup="1" default="1"/>
      <memory name="SRAM" access="rwx" start="0x20000000" size="0x20000" default="1"/>
      <memory name="PERIPH" access="rwp" start="0x40000000" size="0x10000000"/>
      <algorithm name="Flash\ACME7_1M.FLM" start="0x08000000" size="0x100000" default="1"/>
      <algorithm name="Flash/ACME7.elf" start="0x08000000" size="0x100000" style="IAR"/>
      <debug Pname="cm7" __apid="0" svd="SVD/ACME7.svd" defaultResetSequence="ResetSystem"/>
      <debug Pname="cm4" __apid="1" svd="SVD/ACME7.svd"/>
      <device Dname="ACME7H">
        <memory name="SRAM" access="rwx" start="0x20000000" size="0x40000" default="1"/>
      </device>
    </family>
  </devices>
</package>
"#;

    const INDEX: &str = r#"
[[algorithm]]
file = "Flash/ACME7_1M.FLM"
page_size = 0x400
sectors = [[0x0, 0x8000], [0x80000, 0x20000]]
"#;

    fn write_pack(dir: &Path) {
        std::fs::write(dir.join("Acme.ACME_DFP.pdsc"), DESCRIPTION).unwrap();
        std::fs::create_dir(dir.join("Flash")).unwrap();
        std::fs::write(dir.join("Flash/ACME7_1M.FLM"), b"\x7fELF").unwrap();
        std::fs::create_dir(dir.join("SVD")).unwrap();
        std::fs::write(dir.join("SVD/ACME7.svd"), b"<device/>").unwrap();
    }

    fn decoder() -> Option<Arc<dyn FlashAlgoDecoder>> {
        Some(Arc::new(FlashAlgoIndex::from_toml(INDEX).unwrap()))
    }

    #[test]
    fn test_open_directory() {
        let temp_dir = TempDir::new().unwrap();
        write_pack(temp_dir.path());

        let pack = Pack::open_with(temp_dir.path(), decoder()).unwrap();
        assert_eq!(pack.name(), Some("ACME_DFP"));
        assert_eq!(pack.source(), "Acme.ACME_DFP.pdsc");
        assert_eq!(pack.devices().len(), 1);

        let device = pack.device("ACME7H").unwrap();
        assert_eq!(device.vendor(), Some("Acme"));
        assert_eq!(device.families(), &["ACME7".to_string()]);
        assert_eq!(device.default_reset_type(), ResetType::SystemReset);
        assert_eq!(device.svd().unwrap().as_deref(), Some(&b"<device/>"[..]));

        let map = device.memory_map();
        let flash: Vec<_> = map.flash_regions().collect();
        assert_eq!(flash.len(), 2);
        assert_eq!(flash[0].name, "FLASH_0x8000");
        assert_eq!((flash[0].start, flash[0].end), (0x0800_0000, 0x0807_FFFF));
        assert_eq!(flash[1].name, "FLASH_0x20000");
        assert_eq!((flash[1].start, flash[1].end), (0x0808_0000, 0x080F_FFFF));
        assert!(flash[0].is_boot_memory);
        assert!(flash[1].is_boot_memory);
        assert_eq!(map.default_ram().unwrap().length(), 0x40000);
        assert_eq!(
            map.region_for_address(0x4000_1000).unwrap().kind,
            MemoryKind::Device
        );
        let image = &flash[0].flash.as_ref().unwrap().image;
        assert_eq!(image.ram.start, 0x2000_0000);
        assert_eq!(&image.payload[..], b"\x7fELF");

        let topology = device.debug_topology();
        assert!(topology.uses_apid());
        assert_eq!(
            topology.processor("cm4").unwrap().ap_address,
            ApAddress::V1 { index: 3, dp: 0 }
        );
        assert_eq!(
            topology
                .processor_for_ap(&ApAddress::V1 { index: 0, dp: 0 })
                .unwrap()
                .name,
            "cm7"
        );
    }

    #[test]
    fn test_open_description_file() {
        let temp_dir = TempDir::new().unwrap();
        write_pack(temp_dir.path());

        let pack = Pack::open(temp_dir.path().join("Acme.ACME_DFP.pdsc")).unwrap();
        let device = pack.device("ACME7H").unwrap();
        // No decoder: flash stays ROM
        assert_eq!(device.memory_map().flash_regions().count(), 0);
        assert_eq!(device.memory_map().rom_regions().count(), 1);
        assert_eq!(pack.read_file("SVD\\ACME7.svd").unwrap(), b"<device/>");
    }

    #[test]
    fn test_open_errors() {
        let temp_dir = TempDir::new().unwrap();
        assert!(matches!(
            Pack::open(temp_dir.path()),
            Err(PackError::MissingDescription(_))
        ));

        let archive = temp_dir.path().join("Acme.ACME_DFP.1.0.0.pack");
        std::fs::write(&archive, b"PK").unwrap();
        assert!(matches!(
            Pack::open(&archive),
            Err(PackError::UnsupportedFormat(_))
        ));

        std::fs::write(temp_dir.path().join("broken.pdsc"), "<package></devices>").unwrap();
        assert!(matches!(
            Pack::open(temp_dir.path().join("broken.pdsc")),
            Err(PackError::Xml(_))
        ));
    }

    #[test]
    fn test_open_archive() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("Acme.ACME_DFP.1.0.0.pack");

        let mut writer = ZipWriter::new(std::fs::File::create(&path).unwrap());
        let options = SimpleFileOptions::default();
        for (name, content) in [
            ("Acme/Flash/ACME7_1M.FLM", &b"\x7fELF"[..]),
            ("Acme/SVD/ACME7.svd", &b"<device/>"[..]),
            ("Acme/Acme.ACME_DFP.pdsc", DESCRIPTION.as_bytes()),
        ] {
            writer.start_file(name, options).unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap();

        let pack = Pack::open_with(&path, decoder()).unwrap();
        assert_eq!(pack.name(), Some("ACME_DFP"));
        assert_eq!(pack.source(), "Acme/Acme.ACME_DFP.pdsc");

        let device = pack.device("ACME7H").unwrap();
        assert_eq!(device.svd().unwrap().as_deref(), Some(&b"<device/>"[..]));
        let flash: Vec<_> = device.memory_map().flash_regions().collect();
        assert_eq!(flash.len(), 2);
        assert_eq!(flash[0].name, "FLASH_0x8000");
        assert_eq!(&flash[0].flash.as_ref().unwrap().image.payload[..], b"\x7fELF");
    }

    #[test]
    fn test_archive_without_description() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("empty.pack");

        let mut writer = ZipWriter::new(std::fs::File::create(&path).unwrap());
        writer.start_file("README.md", SimpleFileOptions::default()).unwrap();
        writer.write_all(b"no devices").unwrap();
        writer.finish().unwrap();

        assert!(matches!(
            Pack::open(&path),
            Err(PackError::MissingDescription(_))
        ));
    }

    #[test]
    fn test_description_in_subdirectory() {
        let storage = MemoryPack::new()
            .with_file("Acme/Acme.ACME_DFP.pdsc", DESCRIPTION)
            .with_file("Acme/Flash/ACME7_1M.FLM", "algo");

        let pack = Pack::from_storage(Arc::new(storage), "Acme/Acme.ACME_DFP.pdsc", decoder()).unwrap();
        let device = pack.device("ACME7H").unwrap();
        assert_eq!(device.memory_map().flash_regions().count(), 2);
        assert!(device.svd().is_err());

        let missing = Pack::from_storage(Arc::new(MemoryPack::new()), "Acme.pdsc", None);
        assert!(matches!(missing, Err(PackError::MissingDescription(_))));
    }

    #[test]
    fn test_from_description() {
        let pack = Pack::from_description(DESCRIPTION).unwrap();
        assert_eq!(pack.devices()[0].part_number(), "ACME7H");
        assert!(pack.device("ACME7X").is_none());
        assert!(pack.read_file("SVD/ACME7.svd").is_err());
    }
}
