//! Debug topology
//!
//! Binds each processor of a device to the access port it is debugged
//! through, using the resolved `<processor>`, `<debugport>`,
//! `<accessportV1>`/`<accessportV2>` and `<debug>` elements.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;
use tracing::warn;

use crate::element::{AttributeError, Element};

/// Default reset sequence when a `<debug>` element names none
pub const DEFAULT_RESET_SEQUENCE: &str = "ResetSystem";

/// Name given to the placeholder processor of devices that define none
pub const UNKNOWN_PROCESSOR: &str = "unknown";

/// Address of an access port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "version")]
pub enum ApAddress {
    /// ADIv5 access port selected by index
    V1 { index: u32, dp: u32 },
    /// ADIv6 access port at an absolute address
    V2 {
        address: u64,
        dp: u32,
        parent: Option<u32>,
    },
}

impl ApAddress {
    /// Index of the debug port the access port sits behind
    pub fn dp(&self) -> u32 {
        match self {
            ApAddress::V1 { dp, .. } | ApAddress::V2 { dp, .. } => *dp,
        }
    }
}

impl Default for ApAddress {
    fn default() -> Self {
        ApAddress::V1 { index: 0, dp: 0 }
    }
}

impl fmt::Display for ApAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApAddress::V1 { index, dp } => write!(f, "APv1 #{} (DP{})", index, dp),
            ApAddress::V2 { address, dp, .. } => write!(f, "APv2 @{:#x} (DP{})", address, dp),
        }
    }
}

/// A processor of a device and how to reach it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessorInfo {
    /// `Pname`, or `Dcore` for single-core devices
    pub name: String,
    /// Unit index within a multi-core cluster
    pub unit: u32,
    pub total_units: u32,
    pub ap_address: ApAddress,
    /// Base of memory mapped debug registers, 0 on M-profile cores
    pub address: u64,
    /// SVD file, relative to the pack description
    pub svd_path: Option<String>,
    pub default_reset_sequence: String,
}

impl ProcessorInfo {
    pub fn new(name: impl Into<String>, total_units: u32) -> Self {
        Self {
            name: name.into(),
            unit: 0,
            total_units,
            ap_address: ApAddress::default(),
            address: 0,
            svd_path: None,
            default_reset_sequence: DEFAULT_RESET_SEQUENCE.to_string(),
        }
    }
}

/// Reset flavour named by a `defaultResetSequence`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResetType {
    Hardware,
    SystemReset,
    CoreReset,
    Software,
}

impl ResetType {
    /// Map a standard reset sequence name. Custom sequences give `Software`.
    pub fn from_sequence(sequence: &str) -> Self {
        match sequence {
            "ResetHardware" => ResetType::Hardware,
            "ResetSystem" => ResetType::SystemReset,
            "ResetProcessor" => ResetType::CoreReset,
            _ => ResetType::Software,
        }
    }
}

/// Processor to access port bindings of one device
#[derive(Debug, Clone, Default, Serialize)]
pub struct DebugTopology {
    processors: Vec<ProcessorInfo>,
    #[serde(skip)]
    by_name: HashMap<String, usize>,
    #[serde(skip)]
    by_ap: HashMap<ApAddress, usize>,
    valid_dps: Vec<u32>,
    apids: BTreeMap<u32, ApAddress>,
}

impl PartialEq for DebugTopology {
    fn eq(&self, other: &Self) -> bool {
        self.processors == other.processors
            && self.valid_dps == other.valid_dps
            && self.apids == other.apids
    }
}

impl Eq for DebugTopology {}

impl DebugTopology {
    fn new(
        processors: Vec<ProcessorInfo>,
        valid_dps: Vec<u32>,
        apids: BTreeMap<u32, ApAddress>,
    ) -> Self {
        let by_name = processors
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.clone(), i))
            .collect();
        // Later processors win when several share an access port
        let by_ap = processors
            .iter()
            .enumerate()
            .map(|(i, p)| (p.ap_address, i))
            .collect();
        Self {
            processors,
            by_name,
            by_ap,
            valid_dps,
            apids,
        }
    }

    /// Processors in definition order
    pub fn processors(&self) -> &[ProcessorInfo] {
        &self.processors
    }

    pub fn processor(&self, name: &str) -> Option<&ProcessorInfo> {
        self.by_name.get(name).map(|&i| &self.processors[i])
    }

    pub fn processor_for_ap(&self, address: &ApAddress) -> Option<&ProcessorInfo> {
        self.by_ap.get(address).map(|&i| &self.processors[i])
    }

    /// Debug port indices declared by the device
    pub fn valid_dps(&self) -> &[u32] {
        &self.valid_dps
    }

    /// Access ports by their pack-local `__apid`
    pub fn apids(&self) -> &BTreeMap<u32, ApAddress> {
        &self.apids
    }

    /// Whether the device refers to access ports by `__apid`
    pub fn uses_apid(&self) -> bool {
        !self.apids.is_empty()
    }
}

#[derive(Error, Debug)]
enum ResolveError {
    #[error(transparent)]
    Attribute(#[from] AttributeError),
    #[error("<processor> is missing 'Dcore' attribute")]
    MissingCore,
    #[error("<processor> element has duplicate name '{0}'")]
    DuplicateProcessor(String),
    #[error("<{tag}> references undefined processor name ('{name}')")]
    UndefinedProcessor { tag: String, name: String },
    #[error("<{tag}> references undefined '__apid' ({apid})")]
    UndefinedApid { tag: String, apid: u32 },
    #[error("<{tag}> '__dp' attribute is invalid ({dp})")]
    InvalidDp { tag: String, dp: u32 },
    #[error("unexpected element <{0}> in access ports list")]
    UnexpectedAccessPort(String),
}

/// Everything a `<debug>` element assigns to its processor
struct DebugAssignment {
    unit: u32,
    ap_address: ApAddress,
    address: u64,
    svd_path: Option<String>,
    default_reset_sequence: Option<String>,
}

/// Builds the [`DebugTopology`] of one device
pub struct DebugResolver<'a> {
    pack: &'a str,
    part_number: &'a str,
}

impl<'a> DebugResolver<'a> {
    pub fn new(pack: &'a str, part_number: &'a str) -> Self {
        Self { pack, part_number }
    }

    pub fn resolve(
        &self,
        processors: &[Element],
        debug_ports: &[Element],
        access_ports: &[Element],
        debugs: &[Element],
    ) -> DebugTopology {
        let valid_dps = self.valid_dps(debug_ports);
        let apids = self.access_ports(access_ports, &valid_dps);
        let mut procs = self.processors(processors);

        for debug in debugs {
            let result = self
                .target_processor(debug, &procs)
                .and_then(|index| Ok((index, self.assignment(debug, &apids, &valid_dps)?)));
            match result {
                Ok((index, assignment)) => {
                    let proc = &mut procs[index];
                    proc.unit = assignment.unit;
                    proc.ap_address = assignment.ap_address;
                    proc.address = assignment.address;
                    proc.svd_path = assignment.svd_path;
                    if let Some(sequence) = assignment.default_reset_sequence {
                        proc.default_reset_sequence = sequence;
                    }
                }
                Err(err) => self.log(&err),
            }
        }

        DebugTopology::new(procs, valid_dps, apids)
    }

    fn log(&self, err: &ResolveError) {
        warn!(pack = %self.pack, part = %self.part_number, "{}", err);
    }

    fn valid_dps(&self, debug_ports: &[Element]) -> Vec<u32> {
        let mut dps = Vec::new();
        for port in debug_ports {
            match port.required_int::<u32>("__dp") {
                Ok(dp) => dps.push(dp),
                Err(err) => self.log(&ResolveError::from(err)),
            }
        }
        if dps.is_empty() {
            dps.push(0);
        }
        dps
    }

    fn access_ports(&self, access_ports: &[Element], valid_dps: &[u32]) -> BTreeMap<u32, ApAddress> {
        let mut apids = BTreeMap::new();
        for port in access_ports {
            match self.access_port(port, valid_dps) {
                Ok((apid, address)) => {
                    apids.insert(apid, address);
                }
                Err(err) => self.log(&err),
            }
        }
        apids
    }

    fn access_port(
        &self,
        port: &Element,
        valid_dps: &[u32],
    ) -> Result<(u32, ApAddress), ResolveError> {
        let dp = port.int_or::<u32>("__dp", 0)?;
        // Unknown debug ports are tolerated here
        if !valid_dps.contains(&dp) {
            self.log(&ResolveError::InvalidDp {
                tag: port.tag().to_string(),
                dp,
            });
        }

        let address = match port.tag() {
            "accessportV1" => ApAddress::V1 {
                index: port.required_int("index")?,
                dp,
            },
            "accessportV2" => ApAddress::V2 {
                address: port.required_int("address")?,
                dp,
                parent: port.int("parent")?,
            },
            other => return Err(ResolveError::UnexpectedAccessPort(other.to_string())),
        };
        Ok((port.required_int("__apid")?, address))
    }

    fn processors(&self, processors: &[Element]) -> Vec<ProcessorInfo> {
        let mut procs: Vec<ProcessorInfo> = Vec::new();
        for element in processors {
            let result = self.processor(element).and_then(|info| {
                if procs.iter().any(|p| p.name == info.name) {
                    Err(ResolveError::DuplicateProcessor(info.name))
                } else {
                    Ok(info)
                }
            });
            match result {
                Ok(info) => procs.push(info),
                Err(err) => self.log(&err),
            }
        }

        if procs.is_empty() {
            warn!(
                pack = %self.pack,
                part = %self.part_number,
                "no <processor> elements were found"
            );
            procs.push(ProcessorInfo::new(UNKNOWN_PROCESSOR, 1));
        }
        procs
    }

    fn processor(&self, element: &Element) -> Result<ProcessorInfo, ResolveError> {
        let name = element
            .attr("Pname")
            .or_else(|| element.attr("Dcore"))
            .ok_or(ResolveError::MissingCore)?;
        Ok(ProcessorInfo::new(name, element.int_or("Punits", 1)?))
    }

    fn target_processor(
        &self,
        debug: &Element,
        procs: &[ProcessorInfo],
    ) -> Result<usize, ResolveError> {
        let Some(name) = debug.attr("Pname") else {
            // Without Pname the device is expected to have a single processor
            return Ok(0);
        };
        procs
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| ResolveError::UndefinedProcessor {
                tag: debug.tag().to_string(),
                name: name.to_string(),
            })
    }

    fn assignment(
        &self,
        debug: &Element,
        apids: &BTreeMap<u32, ApAddress>,
        valid_dps: &[u32],
    ) -> Result<DebugAssignment, ResolveError> {
        let ap_address = if debug.has_attr("__apid") {
            let apid = debug.required_int::<u32>("__apid")?;
            *apids.get(&apid).ok_or_else(|| ResolveError::UndefinedApid {
                tag: debug.tag().to_string(),
                apid,
            })?
        } else if debug.has_attr("__ap") {
            let dp = debug.int_or::<u32>("__dp", 0)?;
            if !valid_dps.contains(&dp) {
                return Err(ResolveError::InvalidDp {
                    tag: debug.tag().to_string(),
                    dp,
                });
            }
            ApAddress::V1 {
                index: debug.required_int("__ap")?,
                dp,
            }
        } else {
            ApAddress::default()
        };

        Ok(DebugAssignment {
            unit: debug.int_or("Punit", 0)?,
            ap_address,
            address: debug.int_or("address", 0)?,
            svd_path: debug.attr("svd").map(str::to_string),
            default_reset_sequence: debug.attr("defaultResetSequence").map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(
        processors: &[Element],
        debug_ports: &[Element],
        access_ports: &[Element],
        debugs: &[Element],
    ) -> DebugTopology {
        DebugResolver::new("ACME_DFP", "ACME401").resolve(processors, debug_ports, access_ports, debugs)
    }

    fn processor(name: &str) -> Element {
        Element::new("processor").with_attr("Pname", name)
    }

    #[test]
    fn test_single_core_defaults() {
        let processors = vec![Element::new("processor").with_attr("Dcore", "Cortex-M4")];
        let debugs = vec![Element::new("debug").with_attr("svd", "SVD/ACME401.svd")];

        let topology = resolve(&processors, &[], &[], &debugs);

        assert_eq!(topology.valid_dps(), &[0]);
        assert!(!topology.uses_apid());
        let cpu = topology.processor("Cortex-M4").unwrap();
        assert_eq!(cpu.ap_address, ApAddress::V1 { index: 0, dp: 0 });
        assert_eq!(cpu.svd_path.as_deref(), Some("SVD/ACME401.svd"));
        assert_eq!(cpu.default_reset_sequence, DEFAULT_RESET_SEQUENCE);
        assert_eq!(cpu.total_units, 1);
    }

    #[test]
    fn test_no_processors_gives_placeholder() {
        let processors = vec![Element::new("processor").with_attr("Dclock", "1000")];
        let topology = resolve(&processors, &[], &[], &[]);

        assert_eq!(topology.processors().len(), 1);
        assert_eq!(topology.processors()[0].name, UNKNOWN_PROCESSOR);
    }

    #[test]
    fn test_duplicate_processor_first_wins() {
        let processors = vec![
            processor("cm7").with_attr("Punits", "2"),
            processor("cm7").with_attr("Punits", "4"),
            processor("cm4").with_attr("Punits", "many"),
        ];
        let topology = resolve(&processors, &[], &[], &[]);

        assert_eq!(topology.processors().len(), 1);
        assert_eq!(topology.processor("cm7").unwrap().total_units, 2);
        assert!(topology.processor("cm4").is_none());
    }

    #[test]
    fn test_apid_map() {
        let debug_ports = vec![
            Element::new("debugport").with_attr("__dp", "0"),
            Element::new("debugport").with_attr("__dp", "1"),
            Element::new("debugport"),
        ];
        let access_ports = vec![
            Element::new("accessportV1")
                .with_attr("__apid", "0")
                .with_attr("index", "0"),
            Element::new("accessportV2")
                .with_attr("__apid", "1")
                .with_attr("__dp", "1")
                .with_attr("address", "0x80002000")
                .with_attr("parent", "0"),
            // Unknown debug port is only a warning
            Element::new("accessportV1")
                .with_attr("__apid", "2")
                .with_attr("__dp", "5")
                .with_attr("index", "3"),
            // Missing index
            Element::new("accessportV1").with_attr("__apid", "3"),
        ];

        let topology = resolve(&[processor("cm33")], &debug_ports, &access_ports, &[]);

        assert_eq!(topology.valid_dps(), &[0, 1]);
        assert!(topology.uses_apid());
        assert_eq!(topology.apids().len(), 3);
        assert_eq!(
            topology.apids()[&1],
            ApAddress::V2 {
                address: 0x8000_2000,
                dp: 1,
                parent: Some(0)
            }
        );
        assert_eq!(topology.apids()[&2], ApAddress::V1 { index: 3, dp: 5 });
    }

    #[test]
    fn test_debug_entries_bind_processors() {
        let processors = vec![processor("cm7"), processor("cm4")];
        let debug_ports = vec![Element::new("debugport").with_attr("__dp", "0")];
        let access_ports = vec![
            Element::new("accessportV2")
                .with_attr("__apid", "10")
                .with_attr("address", "0x100000"),
            Element::new("accessportV2")
                .with_attr("__apid", "11")
                .with_attr("address", "0x200000"),
        ];
        let debugs = vec![
            Element::new("debug")
                .with_attr("Pname", "cm7")
                .with_attr("__apid", "10")
                .with_attr("defaultResetSequence", "ResetProcessor"),
            Element::new("debug")
                .with_attr("Pname", "cm4")
                .with_attr("__apid", "11")
                .with_attr("Punit", "1")
                .with_attr("address", "0xE0040000"),
        ];

        let topology = resolve(&processors, &debug_ports, &access_ports, &debugs);

        let cm7 = topology.processor("cm7").unwrap();
        assert_eq!(cm7.default_reset_sequence, "ResetProcessor");
        let cm4 = topology.processor("cm4").unwrap();
        assert_eq!(cm4.unit, 1);
        assert_eq!(cm4.address, 0xE004_0000);

        let by_ap = topology.processor_for_ap(&cm4.ap_address).unwrap();
        assert_eq!(by_ap.name, "cm4");
        assert_eq!(topology.processors()[0].name, "cm7");
    }

    #[test]
    fn test_failed_debug_entries_are_skipped() {
        let processors = vec![processor("cm7"), processor("cm4")];
        let debugs = vec![
            Element::new("debug")
                .with_attr("Pname", "cm7")
                .with_attr("__ap", "2"),
            // Invalid DP: no update, earlier assignment kept
            Element::new("debug")
                .with_attr("Pname", "cm7")
                .with_attr("__ap", "3")
                .with_attr("__dp", "1"),
            Element::new("debug")
                .with_attr("Pname", "cm4")
                .with_attr("__apid", "9"),
            Element::new("debug")
                .with_attr("Pname", "m0")
                .with_attr("__ap", "1"),
        ];

        let topology = resolve(&processors, &[], &[], &debugs);

        assert_eq!(
            topology.processor("cm7").unwrap().ap_address,
            ApAddress::V1 { index: 2, dp: 0 }
        );
        assert_eq!(
            topology.processor("cm4").unwrap().ap_address,
            ApAddress::default()
        );
        assert!(topology.processor("m0").is_none());
    }

    #[test]
    fn test_reset_type_from_sequence() {
        assert_eq!(ResetType::from_sequence("ResetHardware"), ResetType::Hardware);
        assert_eq!(ResetType::from_sequence("ResetSystem"), ResetType::SystemReset);
        assert_eq!(ResetType::from_sequence("ResetProcessor"), ResetType::CoreReset);
        assert_eq!(ResetType::from_sequence("ResetCustom"), ResetType::Software);
    }

    #[test]
    fn test_ap_address_display() {
        assert_eq!(ApAddress::V1 { index: 1, dp: 0 }.to_string(), "APv1 #1 (DP0)");
        let v2 = ApAddress::V2 {
            address: 0x2000,
            dp: 1,
            parent: None,
        };
        assert_eq!(v2.to_string(), "APv2 @0x2000 (DP1)");
        assert_eq!(v2.dp(), 1);
    }
}
