//! Family hierarchy walker
//!
//! Walks `family > subFamily > device > variant` depth first. Each node's
//! elements form one level of a stack; at every device and variant the
//! stack is merged, outermost level first, into a [`DeviceDescriptor`].

use std::sync::Arc;
use tracing::{debug, warn};

use crate::descriptor::{DeviceDescriptor, PackResources, ResolvedElements};
use crate::element::Element;
use crate::merge::{merge, ParseContext};
use crate::policy::{
    AccessPortPolicy, AlgorithmPolicy, DebugPolicy, DebugPortPolicy, MemoryPolicy,
    ProcessorPolicy,
};
use crate::tree::{DescriptionTree, NodeId};

/// Elements defined directly on one hierarchy node
#[derive(Debug, Default)]
struct Level {
    families: Vec<String>,
    processors: Vec<Element>,
    memories: Vec<Element>,
    algorithms: Vec<Element>,
    debugs: Vec<Element>,
    debug_ports: Vec<Element>,
    access_ports: Vec<Element>,
}

enum Step {
    Enter(NodeId),
    Leave,
}

fn is_hierarchy(tag: &str) -> bool {
    matches!(tag, "subFamily" | "device" | "variant")
}

/// Resolve every device and variant of a description
pub fn walk(
    tree: &DescriptionTree,
    resources: &Arc<PackResources>,
    ctx: &mut ParseContext,
) -> Vec<DeviceDescriptor> {
    let mut devices = Vec::new();
    let mut levels: Vec<Level> = Vec::new();
    let mut work: Vec<Step> = tree
        .descendants_named("family")
        .into_iter()
        .rev()
        .map(Step::Enter)
        .collect();

    while let Some(step) = work.pop() {
        let id = match step {
            Step::Leave => {
                levels.pop();
                continue;
            }
            Step::Enter(id) => id,
        };

        let node = tree.node(id);
        levels.push(collect_level(tree, id, ctx));

        if matches!(node.tag(), "device" | "variant") {
            if let Some(device) = resolve_device(&node.element, &levels, resources, ctx) {
                devices.push(device);
            }
        }

        // Children are entered in document order, then the level is popped
        work.push(Step::Leave);
        for &child in node.children.iter().rev() {
            if is_hierarchy(tree.node(child).tag()) {
                work.push(Step::Enter(child));
            }
        }
    }

    debug!(pack = %ctx.pack, count = devices.len(), "resolved devices");
    devices
}

fn collect_level(tree: &DescriptionTree, id: NodeId, ctx: &ParseContext) -> Level {
    let node = tree.node(id);
    let mut level = Level::default();

    let family_attrs: &[&str] = match node.tag() {
        "family" => &["Dvendor", "Dfamily"],
        "subFamily" => &["DsubFamily"],
        _ => &[],
    };
    for &attr in family_attrs {
        match node.element.attr(attr) {
            Some(name) => level.families.push(name.to_string()),
            None => warn!(
                pack = %ctx.pack,
                "<{}> missing '{}' attribute",
                node.tag(),
                attr
            ),
        }
    }

    for child in tree.children(id) {
        let element = child.element.clone();
        match child.tag() {
            "processor" => level.processors.push(element),
            "memory" => level.memories.push(element),
            "algorithm" => level.algorithms.push(element),
            "debug" => level.debugs.push(element),
            "debugport" => level.debug_ports.push(element),
            "accessportV1" | "accessportV2" => level.access_ports.push(element),
            _ => {}
        }
    }
    level
}

fn part_number(element: &Element) -> Option<&str> {
    element.attr("Dname").or_else(|| match element.tag() {
        "variant" => element.attr("Dvariant"),
        _ => None,
    })
}

fn resolve_device(
    element: &Element,
    levels: &[Level],
    resources: &Arc<PackResources>,
    ctx: &mut ParseContext,
) -> Option<DeviceDescriptor> {
    let Some(part) = part_number(element) else {
        warn!(
            pack = %ctx.pack,
            "<{}> has no part number; skipping",
            element.tag()
        );
        return None;
    };
    ctx.part_number = part.to_string();

    let families = levels
        .iter()
        .flat_map(|level| level.families.iter().cloned())
        .collect();

    let elements = ResolvedElements {
        processors: merge(
            &ProcessorPolicy,
            ctx,
            levels.iter().map(|l| l.processors.as_slice()),
        ),
        memories: merge(
            &MemoryPolicy,
            ctx,
            levels.iter().map(|l| l.memories.as_slice()),
        ),
        algorithms: merge(
            &AlgorithmPolicy,
            ctx,
            levels.iter().map(|l| l.algorithms.as_slice()),
        ),
        debugs: merge(&DebugPolicy, ctx, levels.iter().map(|l| l.debugs.as_slice())),
        debug_ports: merge(
            &DebugPortPolicy,
            ctx,
            levels.iter().map(|l| l.debug_ports.as_slice()),
        ),
        access_ports: merge(
            &AccessPortPolicy,
            ctx,
            levels.iter().map(|l| l.access_ports.as_slice()),
        ),
    };

    Some(DeviceDescriptor::new(
        part,
        families,
        elements,
        Arc::clone(resources),
    ))
}
