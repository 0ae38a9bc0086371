//! DFP Core - Device Family Pack description resolution
//!
//! This crate turns the family hierarchy of a CMSIS Device Family Pack
//! description into resolved per-device models:
//! - Description parsing into an immutable node arena
//! - Identity merge of processors, memories, algorithms and debug elements
//!   across family, sub-family, device and variant levels
//! - Memory maps with ROM regions converted to flash via flash algorithms
//! - Debug topology binding processors to access ports

pub mod debug;
pub mod descriptor;
pub mod element;
pub mod flash;
pub mod flash_algo;
pub mod memory_map;
pub mod merge;
pub mod pack;
pub mod policy;
pub mod storage;
pub mod tree;
pub mod walker;

pub use debug::{ApAddress, DebugResolver, DebugTopology, ProcessorInfo, ResetType};
pub use descriptor::{DeviceDescriptor, PackResources, ResolvedElements};
pub use element::{AttributeError, Element};
pub use flash::RegionSynthesizer;
pub use flash_algo::{
    AlgoError, AlgorithmEntry, AlgorithmImage, FlashAlgoDecoder, FlashAlgoIndex, FlashAlgorithm,
    RamRange,
};
pub use memory_map::{FlashInfo, MemoryKind, MemoryMap, MemoryRegion};
pub use merge::{KeyedElements, MergePolicy, ParseContext};
pub use pack::{Pack, PackError};
pub use storage::{DirectoryPack, MemoryPack, PackFiles, PackStorage, StorageError, ZipPack};
pub use tree::{DescriptionTree, DeviceNode, TreeError};
