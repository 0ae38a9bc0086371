//! Description file parsing
//!
//! The `.pdsc` description is an XML document. It is parsed once into an
//! owned arena of nodes with index-based child references and is read-only
//! afterwards.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use crate::element::Element;

#[derive(Error, Debug)]
pub enum TreeError {
    #[error("Failed to parse description: {0}")]
    ParseError(String),
    #[error("Description has no root element")]
    Empty,
}

/// Index of a node inside a [`DescriptionTree`]
pub type NodeId = usize;

/// One element of the description tree
#[derive(Debug, Clone)]
pub struct DeviceNode {
    pub element: Element,
    pub children: Vec<NodeId>,
    /// Concatenated character data directly inside this element
    pub text: String,
}

impl DeviceNode {
    pub fn tag(&self) -> &str {
        self.element.tag()
    }
}

/// Immutable arena holding a parsed description
#[derive(Debug, Clone)]
pub struct DescriptionTree {
    nodes: Vec<DeviceNode>,
    root: NodeId,
}

impl DescriptionTree {
    /// Parse a description from an XML string
    pub fn from_xml(xml: &str) -> Result<Self, TreeError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut nodes: Vec<DeviceNode> = Vec::new();
        let mut open: Vec<NodeId> = Vec::new();
        let mut root: Option<NodeId> = None;

        loop {
            let event = reader.read_event().map_err(|e| {
                TreeError::ParseError(format!("at byte {}: {}", reader.buffer_position(), e))
            })?;
            match event {
                Event::Start(start) => {
                    let id = push_node(&mut nodes, &open, &mut root, &start)?;
                    open.push(id);
                }
                Event::Empty(start) => {
                    push_node(&mut nodes, &open, &mut root, &start)?;
                }
                Event::End(_) => {
                    open.pop();
                }
                Event::Text(text) => {
                    if let Some(&current) = open.last() {
                        let text = text
                            .unescape()
                            .map_err(|e| TreeError::ParseError(e.to_string()))?;
                        nodes[current].text.push_str(&text);
                    }
                }
                Event::CData(data) => {
                    if let Some(&current) = open.last() {
                        nodes[current]
                            .text
                            .push_str(&String::from_utf8_lossy(&data.into_inner()));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        let root = root.ok_or(TreeError::Empty)?;
        Ok(Self { nodes, root })
    }

    /// Parse a description from raw file bytes (UTF-8, optional BOM)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TreeError> {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        let xml = std::str::from_utf8(bytes)
            .map_err(|e| TreeError::ParseError(format!("description is not UTF-8: {}", e)))?;
        Self::from_xml(xml)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &DeviceNode {
        &self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Children of a node, in document order
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = &DeviceNode> + '_ {
        self.nodes[id].children.iter().map(move |&c| &self.nodes[c])
    }

    /// Text of the first direct child of `id` with the given tag
    pub fn child_text(&self, id: NodeId, tag: &str) -> Option<&str> {
        self.children(id)
            .find(|n| n.tag() == tag)
            .map(|n| n.text.as_str())
    }

    /// All nodes below the root with the given tag, in document order
    pub fn descendants_named(&self, tag: &str) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut pending = vec![self.root];
        while let Some(id) = pending.pop() {
            if self.nodes[id].tag() == tag {
                found.push(id);
            }
            pending.extend(self.nodes[id].children.iter().rev().copied());
        }
        found
    }
}

fn push_node(
    nodes: &mut Vec<DeviceNode>,
    open: &[NodeId],
    root: &mut Option<NodeId>,
    start: &BytesStart<'_>,
) -> Result<NodeId, TreeError> {
    let mut element = Element::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
    for attr in start.attributes() {
        let attr = attr.map_err(|e| TreeError::ParseError(e.to_string()))?;
        let value = attr
            .unescape_value()
            .map_err(|e| TreeError::ParseError(e.to_string()))?;
        element.set_attr(
            String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
            value.into_owned(),
        );
    }

    let id = nodes.len();
    nodes.push(DeviceNode {
        element,
        children: Vec::new(),
        text: String::new(),
    });

    match open.last() {
        Some(&parent) => nodes[parent].children.push(id),
        None if root.is_none() => *root = Some(id),
        None => {
            return Err(TreeError::ParseError(
                "multiple root elements".to_string(),
            ))
        }
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PDSC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<package schemaVersion="1.7.7">
  <vendor>Acme</vendor>
  <name>ACME_DFP</name>
  <devices>
    <family Dfamily="ACME M4" Dvendor="Acme:99">
      <processor Dcore="Cortex-M4"/>
      <device Dname="ACME401">
        <memory name="IROM1" access="rx" start="0x08000000" size="0x40000"/>
      </device>
    </family>
    <family Dfamily="ACME M0" Dvendor="Acme:99">
      <device Dname="ACME001"/>
    </family>
  </devices>
</package>
"#;

    #[test]
    fn test_parse_description() {
        let tree = DescriptionTree::from_xml(PDSC).unwrap();
        let root = tree.node(tree.root());
        assert_eq!(root.tag(), "package");
        assert_eq!(root.element.attr("schemaVersion"), Some("1.7.7"));
        assert_eq!(tree.child_text(tree.root(), "name"), Some("ACME_DFP"));

        let families = tree.descendants_named("family");
        assert_eq!(families.len(), 2);
        assert_eq!(
            tree.node(families[0]).element.attr("Dfamily"),
            Some("ACME M4")
        );

        let tags: Vec<_> = tree.children(families[0]).map(|n| n.tag()).collect();
        assert_eq!(tags, vec!["processor", "device"]);
    }

    #[test]
    fn test_from_bytes_strips_bom() {
        let mut bytes = b"\xEF\xBB\xBF".to_vec();
        bytes.extend_from_slice(b"<package><name>X</name></package>");
        let tree = DescriptionTree::from_bytes(&bytes).unwrap();
        assert_eq!(tree.child_text(tree.root(), "name"), Some("X"));
    }

    #[test]
    fn test_malformed_xml() {
        assert!(DescriptionTree::from_xml("<package><name>X</package>").is_err());
        assert!(matches!(
            DescriptionTree::from_xml("   "),
            Err(TreeError::Empty)
        ));
    }

    #[test]
    fn test_entities_are_unescaped() {
        let tree =
            DescriptionTree::from_xml(r#"<package><memory name="A&amp;B"/></package>"#).unwrap();
        let memory = tree.children(tree.root()).next().unwrap();
        assert_eq!(memory.element.attr("name"), Some("A&B"));
    }
}
