//! Merge policies for each element category
//!
//! Inner (more specific) levels of the family hierarchy override outer
//! ones. How an override is detected and what it does differs per category.

use tracing::{debug, warn};

use crate::element::{AttributeError, Element};
use crate::merge::{KeyedElements, MergePolicy, ParseContext};

/// `<processor>`: keyed by `Pname`, inner elements inherit missing
/// attributes from the outer element they replace.
pub struct ProcessorPolicy;

impl MergePolicy for ProcessorPolicy {
    type Key = Option<String>;

    fn category(&self) -> &'static str {
        "processor"
    }

    fn key(&self, _ctx: &ParseContext, element: &Element) -> Result<Self::Key, AttributeError> {
        // Pname is optional for single-core devices
        Ok(element.attr("Pname").map(str::to_string))
    }

    fn apply(
        &self,
        _ctx: &mut ParseContext,
        merged: &mut KeyedElements<Self::Key>,
        key: Self::Key,
        mut element: Element,
    ) -> Result<(), AttributeError> {
        if let Some(outer) = merged.get(&key) {
            element.inherit_from(outer);
        }
        merged.insert(key, element);
        Ok(())
    }
}

/// Identity of a memory element: its name and owning processor
pub type MemoryKey = (String, Option<String>);

/// `<memory>`: keyed by name (or id, or address range) plus `Pname`.
/// Overlapping ranges evict the outer region.
pub struct MemoryPolicy;

/// Start and size of a memory element, both required
pub fn memory_range(element: &Element) -> Result<(u64, u64), AttributeError> {
    let range = element
        .required_int::<u64>("start")
        .and_then(|start| Ok((start, element.required_int::<u64>("size")?)));
    if range.is_err() {
        warn!("memory region missing address");
    }
    range
}

fn inclusive_end(start: u64, size: u64) -> u64 {
    start.saturating_add(size.saturating_sub(1))
}

impl MergePolicy for MemoryPolicy {
    type Key = MemoryKey;

    fn category(&self) -> &'static str {
        "memory"
    }

    fn key(&self, _ctx: &ParseContext, element: &Element) -> Result<Self::Key, AttributeError> {
        let (start, size) = memory_range(element)?;
        let name = match element.attr("name").or_else(|| element.attr("id")) {
            Some(name) => name.to_string(),
            None => format!("{:08x}:{:08x}", start, size),
        };
        Ok((name, element.attr("Pname").map(str::to_string)))
    }

    fn apply(
        &self,
        ctx: &mut ParseContext,
        merged: &mut KeyedElements<Self::Key>,
        key: Self::Key,
        element: Element,
    ) -> Result<(), AttributeError> {
        let (start, size) = memory_range(&element)?;
        let end = inclusive_end(start, size);

        merged.remove(&key);

        let mut evicted = Vec::new();
        for (prev_key, prev) in merged.iter() {
            let (prev_start, prev_size) = memory_range(prev)?;
            let prev_end = inclusive_end(prev_start, prev_size);
            let overlaps = (prev_start <= start && start < prev_end)
                || (prev_start <= end && end < prev_end);
            if !overlaps {
                continue;
            }
            // Regions of different processors share one device memory map, so
            // they may override each other without complaint.
            if prev_key.1 == key.1 && ctx.overlap_warnings == 0 {
                warn!(
                    pack = %ctx.pack,
                    part = %ctx.part_number,
                    "Overlapping memory regions; deleting outer region. \
                     Further warnings will be suppressed for this pack."
                );
                ctx.overlap_warnings += 1;
            }
            evicted.push(prev_key.clone());
        }
        for prev_key in &evicted {
            merged.remove(prev_key);
        }

        merged.insert(key, element);
        Ok(())
    }
}

/// `<algorithm>`: keyed by address range. Only Keil-style algorithms are
/// supported.
pub struct AlgorithmPolicy;

impl MergePolicy for AlgorithmPolicy {
    type Key = (u64, u64);

    fn category(&self) -> &'static str {
        "algorithm"
    }

    fn accepts(&self, ctx: &ParseContext, element: &Element) -> bool {
        match element.attr("style") {
            Some(style) if !style.eq_ignore_ascii_case("keil") => {
                debug!(pack = %ctx.pack, "skipping non-Keil flash algorithm");
                false
            }
            _ => true,
        }
    }

    fn key(&self, _ctx: &ParseContext, element: &Element) -> Result<Self::Key, AttributeError> {
        Ok((
            element.required_int("start")?,
            element.required_int("size")?,
        ))
    }
}

/// `<debugport>`: keyed by `__dp`
pub struct DebugPortPolicy;

impl MergePolicy for DebugPortPolicy {
    type Key = u32;

    fn category(&self) -> &'static str {
        "debugport"
    }

    fn key(&self, _ctx: &ParseContext, element: &Element) -> Result<Self::Key, AttributeError> {
        element.required_int("__dp")
    }
}

/// `<accessportV1>` and `<accessportV2>`: keyed by `__apid`
pub struct AccessPortPolicy;

impl MergePolicy for AccessPortPolicy {
    type Key = u32;

    fn category(&self) -> &'static str {
        "accessport"
    }

    fn key(&self, _ctx: &ParseContext, element: &Element) -> Result<Self::Key, AttributeError> {
        element.required_int("__apid")
    }
}

/// Scope a `<debug>` element applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugScope {
    /// No `Pname`: the element applies to every processor
    AllProcessors,
    Processor { name: String, unit: u32 },
}

/// `<debug>`: global and per-processor entries never coexist; the most
/// recent entry decides which kind the collection holds.
pub struct DebugPolicy;

impl MergePolicy for DebugPolicy {
    type Key = DebugScope;

    fn category(&self) -> &'static str {
        "debug"
    }

    fn key(&self, _ctx: &ParseContext, element: &Element) -> Result<Self::Key, AttributeError> {
        Ok(match element.attr("Pname") {
            Some(name) => DebugScope::Processor {
                name: name.to_string(),
                unit: element.int_or("Punit", 0)?,
            },
            None => DebugScope::AllProcessors,
        })
    }

    fn apply(
        &self,
        _ctx: &mut ParseContext,
        merged: &mut KeyedElements<Self::Key>,
        key: Self::Key,
        element: Element,
    ) -> Result<(), AttributeError> {
        if key == DebugScope::AllProcessors || merged.contains_key(&DebugScope::AllProcessors) {
            merged.clear();
        }
        merged.insert(key, element);
        Ok(())
    }
}
