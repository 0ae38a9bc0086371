//! Text and JSON rendering of packs and devices

use anyhow::Result;
use dfp_core::{DebugTopology, DeviceDescriptor, MemoryMap, Pack, ResetType};
use serde::Serialize;

/// Everything `show` prints about one device
#[derive(Debug, Serialize)]
pub struct DeviceReport<'a> {
    pub part_number: &'a str,
    pub vendor: Option<&'a str>,
    pub families: &'a [String],
    pub default_reset_type: ResetType,
    pub svd: Option<&'a str>,
    pub memory_map: &'a MemoryMap,
    pub debug: &'a DebugTopology,
}

impl<'a> DeviceReport<'a> {
    pub fn new(device: &'a DeviceDescriptor) -> Self {
        Self {
            part_number: device.part_number(),
            vendor: device.vendor(),
            families: device.families(),
            default_reset_type: device.default_reset_type(),
            svd: device.svd_path(),
            memory_map: device.memory_map(),
            debug: device.debug_topology(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_text(&self) -> String {
        let mut out = format!(
            "{} ({} / {})\n",
            self.part_number,
            self.vendor.unwrap_or("unknown vendor"),
            self.families.join(" / ")
        );

        out.push_str("Memory map:\n");
        for region in self.memory_map.regions() {
            let mut line = format!(
                "  {:<20} {:<6} {:#010x}-{:#010x} {:<4}",
                region.name,
                format!("{:?}", region.kind).to_lowercase(),
                region.start,
                region.end,
                region.access
            );
            if let Some(flash) = &region.flash {
                line.push_str(&format!(
                    " sector={:#x} page={:#x} algo={}",
                    flash.sector_size, flash.page_size, flash.algorithm
                ));
            }
            if region.is_boot_memory {
                line.push_str(" [boot]");
            }
            if region.is_default {
                line.push_str(" [default]");
            }
            out.push_str(line.trim_end());
            out.push('\n');
        }

        out.push_str("Debug topology:\n");
        for proc in self.debug.processors() {
            out.push_str(&format!(
                "  {:<12} unit {}/{} {} reset={}",
                proc.name, proc.unit, proc.total_units, proc.ap_address, proc.default_reset_sequence
            ));
            if let Some(svd) = &proc.svd_path {
                out.push_str(&format!(" svd={}", svd));
            }
            out.push('\n');
        }
        out.push_str(&format!("Default reset: {:?}\n", self.default_reset_type));
        out
    }
}

/// One line per device: part number, vendor and families
pub fn list_devices(pack: &Pack) -> String {
    let mut out = String::new();
    for device in pack.devices() {
        out.push_str(&format!(
            "{:<24} {:<20} {}\n",
            device.part_number(),
            device.vendor().unwrap_or("-"),
            device.families().join(" / ")
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTION: &str = r#"<package>
  <name>ACME_DFP</name>
  <devices>
    <family Dfamily="ACME4" Dvendor="Acme:99">
      <processor Dcore="Cortex-M4"/>
      <memory name="IROM1" access="rx" start="0x0" size="0x20000" startup="1"/>
      <memory name="IRAM1" access="rwx" start="0x20000000" size="0x8000" default="1"/>
      <debug svd="SVD/ACME4.svd" defaultResetSequence="ResetProcessor"/>
      <device Dname="ACME401"/>
      <device Dname="ACME402"/>
    </family>
  </devices>
</package>"#;

    #[test]
    fn test_list_devices() {
        let pack = Pack::from_description(DESCRIPTION).unwrap();
        let listing = list_devices(&pack);

        let lines: Vec<_> = listing.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("ACME401"));
        assert!(lines[0].contains("Acme"));
        assert!(lines[1].ends_with("ACME4"));
    }

    #[test]
    fn test_text_report() {
        let pack = Pack::from_description(DESCRIPTION).unwrap();
        let report = DeviceReport::new(pack.device("ACME401").unwrap());
        let text = report.to_text();

        assert!(text.starts_with("ACME401 (Acme / ACME4)"));
        assert!(text.contains("IROM1"));
        assert!(text.contains("[boot]"));
        assert!(text.contains("APv1 #0 (DP0)"));
        assert!(text.contains("Default reset: CoreReset"));
    }

    #[test]
    fn test_json_report() {
        let pack = Pack::from_description(DESCRIPTION).unwrap();
        let report = DeviceReport::new(pack.device("ACME402").unwrap());
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();

        assert_eq!(json["part_number"], "ACME402");
        assert_eq!(json["vendor"], "Acme");
        assert_eq!(json["memory_map"]["regions"][0]["kind"], "rom");
        assert_eq!(json["debug"]["processors"][0]["name"], "Cortex-M4");
        assert_eq!(json["debug"]["processors"][0]["ap_address"]["version"], "V1");
        assert_eq!(json["default_reset_type"], "CoreReset");
    }
}
