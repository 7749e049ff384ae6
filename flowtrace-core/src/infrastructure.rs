//! Deployed flow definitions loaded next to a session's logs.
//!
//! Two documents describe what ran: the BlockAgent definition (an array of
//! blocks, each with turns whose edges connect to other turns) and the
//! SmartFlow chain XML (plugins plus `<chain left=.. right=..>` links).
//! Neither is needed to build a timeline; they back block lookups and the
//! flow diagram.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::OnceLock;

use crate::error::{Error, Result};
use crate::ingest::kind_of;

/// Chain target that ends the call rather than leading to another plugin
const END_CALL: &str = "END_CALL";

fn xml_document_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<\?xml.*</chain>").expect("valid regex"))
}

fn chain_document_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<chain\b.*</chain>").expect("valid regex"))
}

fn element_re(name: &str) -> Regex {
    // Only ever called with the two literal names below
    Regex::new(&format!(r"<{name}\b([^>]*)>")).expect("valid regex")
}

fn plugin_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| element_re("plugin"))
}

fn chain_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| element_re("chain"))
}

fn attribute_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"([A-Za-z_][\w.-]*)\s*=\s*"([^"]*)""#).expect("valid regex"))
}

/// Flow definitions for one session.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Infrastructure {
    /// BlockAgent blocks, as loaded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blockagent: Option<Vec<Value>>,
    /// The SmartFlow chain XML document
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smartflow_xml: Option<String>,
}

impl Infrastructure {
    pub fn new(blockagent: Option<Vec<Value>>, smartflow_xml: Option<String>) -> Self {
        Self {
            blockagent,
            smartflow_xml,
        }
    }

    /// Read whichever definition files are given.
    ///
    /// A SmartFlow export with no chain document in it loads as absent
    /// rather than failing.
    pub fn from_files(blockagent: Option<&Path>, smartflow_xml: Option<&Path>) -> Result<Self> {
        let blockagent = match blockagent {
            Some(path) => {
                let document: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
                Some(blockagent_blocks(&document)?)
            }
            None => None,
        };
        let smartflow_xml = match smartflow_xml {
            Some(path) => {
                let found = extract_smartflow_xml(&std::fs::read_to_string(path)?);
                if found.is_none() {
                    tracing::warn!(path = %path.display(), "No SmartFlow chain XML found");
                }
                found
            }
            None => None,
        };

        let infrastructure = Self::new(blockagent, smartflow_xml);
        tracing::debug!(
            blocks = infrastructure.blockagent.as_ref().map_or(0, Vec::len),
            has_smartflow_xml = infrastructure.smartflow_xml.is_some(),
            "Loaded infrastructure"
        );
        Ok(infrastructure)
    }

    pub fn is_empty(&self) -> bool {
        self.blockagent.is_none() && self.smartflow_xml.is_none()
    }

    /// The BlockAgent block whose `block_id` matches, as loaded.
    pub fn block_info(&self, block_id: &str) -> Option<&Value> {
        self.blockagent
            .as_ref()?
            .iter()
            .find(|block| block.get("block_id").and_then(Value::as_str) == Some(block_id))
    }

    /// Nodes and edges of both definitions.
    ///
    /// BlockAgent blocks become nodes listing their turns, and each turn
    /// edge whose `connect_to` names a turn becomes a turn-to-turn edge.
    /// SmartFlow plugins become nodes, and chain links become edges except
    /// those leading to `END_CALL`.
    pub fn flow_diagram(&self) -> FlowDiagram {
        let mut diagram = FlowDiagram::default();
        if let Some(blocks) = &self.blockagent {
            add_blockagent(&mut diagram, blocks);
        }
        if let Some(xml) = &self.smartflow_xml {
            add_smartflow(&mut diagram, xml);
        }
        diagram
    }
}

/// Which definition a node or edge came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowLayer {
    BlockAgent,
    SmartFlow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowTurn {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub layer: FlowLayer,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub turns: Vec<FlowTurn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowEdge {
    pub from: String,
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "type")]
    pub layer: FlowLayer,
}

/// Graph view of the loaded definitions
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct FlowDiagram {
    pub nodes: Vec<FlowNode>,
    pub edges: Vec<FlowEdge>,
}

impl FlowDiagram {
    pub fn nodes_in(&self, layer: FlowLayer) -> impl Iterator<Item = &FlowNode> {
        self.nodes.iter().filter(move |n| n.layer == layer)
    }

    pub fn edges_in(&self, layer: FlowLayer) -> impl Iterator<Item = &FlowEdge> {
        self.edges.iter().filter(move |e| e.layer == layer)
    }
}

#[derive(Deserialize)]
struct BlockDef {
    block_id: Option<String>,
    name: Option<String>,
    #[serde(default)]
    turns: Vec<TurnDef>,
}

#[derive(Deserialize)]
struct TurnDef {
    #[serde(default)]
    turn_id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    edges: Vec<EdgeDef>,
}

#[derive(Deserialize)]
struct EdgeDef {
    name: Option<String>,
    connect_to: Option<Value>,
}

/// Blocks of a BlockAgent definition: a bare array, or an object with a
/// `blocks` array.
pub fn blockagent_blocks(document: &Value) -> Result<Vec<Value>> {
    match document {
        Value::Array(blocks) => Ok(blocks.clone()),
        Value::Object(map) => match map.get("blocks") {
            Some(Value::Array(blocks)) => Ok(blocks.clone()),
            _ => Err(Error::Parse {
                source_name: "BlockAgent infrastructure".to_string(),
                message: "expected an array of blocks or an object with a blocks array"
                    .to_string(),
            }),
        },
        other => Err(Error::Parse {
            source_name: "BlockAgent infrastructure".to_string(),
            message: format!("expected an array of blocks, got {}", kind_of(other)),
        }),
    }
}

/// Find the chain XML in a SmartFlow export.
///
/// The export is either the XML itself (possibly with surrounding text) or a
/// JSON document holding it in a string field. Spans from the XML prolog, or
/// the first `<chain` when there is none, to the last `</chain>`.
pub fn extract_smartflow_xml(content: &str) -> Option<String> {
    if let Ok(document) = serde_json::from_str::<Value>(content) {
        if let Some(xml) = find_xml_string(&document) {
            return find_chain_document(xml);
        }
    }
    find_chain_document(content)
}

fn find_chain_document(text: &str) -> Option<String> {
    xml_document_re()
        .find(text)
        .or_else(|| chain_document_re().find(text))
        .map(|m| m.as_str().to_string())
}

fn find_xml_string(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) if s.contains("</chain>") => Some(s),
        Value::Array(items) => items.iter().find_map(find_xml_string),
        Value::Object(map) => map.values().find_map(find_xml_string),
        _ => None,
    }
}

fn add_blockagent(diagram: &mut FlowDiagram, blocks: &[Value]) {
    for (idx, raw) in blocks.iter().enumerate() {
        let block: BlockDef = match serde_json::from_value(raw.clone()) {
            Ok(block) => block,
            Err(e) => {
                tracing::warn!(index = idx, error = %e, "Skipping unreadable BlockAgent block");
                continue;
            }
        };

        let mut turns = Vec::with_capacity(block.turns.len());
        for turn in &block.turns {
            turns.push(FlowTurn {
                id: turn.turn_id.clone(),
                name: turn.name.clone(),
            });
            for edge in &turn.edges {
                let target = edge
                    .connect_to
                    .as_ref()
                    .and_then(|c| c.get("turn_id"))
                    .and_then(Value::as_str)
                    .filter(|t| !t.is_empty());
                if let Some(target) = target {
                    diagram.edges.push(FlowEdge {
                        from: turn.turn_id.clone(),
                        to: target.to_string(),
                        label: edge.name.clone().filter(|n| !n.is_empty()),
                        layer: FlowLayer::BlockAgent,
                    });
                }
            }
        }

        diagram.nodes.push(FlowNode {
            id: block.block_id.unwrap_or_else(|| format!("block_{idx}")),
            label: block.name.unwrap_or_else(|| "Unknown Block".to_string()),
            layer: FlowLayer::BlockAgent,
            turns,
            plugin_type: None,
        });
    }
}

fn add_smartflow(diagram: &mut FlowDiagram, xml: &str) {
    for caps in plugin_re().captures_iter(xml) {
        let attrs = attributes(&caps[1]);
        let Some(name) = attr(&attrs, "name").filter(|n| !n.is_empty()) else {
            continue;
        };
        let label = attr(&attrs, "label")
            .filter(|l| !l.is_empty())
            .unwrap_or(name);
        diagram.nodes.push(FlowNode {
            id: name.to_string(),
            label: label.to_string(),
            layer: FlowLayer::SmartFlow,
            turns: Vec::new(),
            plugin_type: attr(&attrs, "type").map(str::to_string),
        });
    }

    for caps in chain_re().captures_iter(xml) {
        let attrs = attributes(&caps[1]);
        let left = attr(&attrs, "left").filter(|l| !l.is_empty());
        let right = attr(&attrs, "right").filter(|r| !r.is_empty() && *r != END_CALL);
        if let (Some(left), Some(right)) = (left, right) {
            diagram.edges.push(FlowEdge {
                from: left.to_string(),
                to: right.to_string(),
                label: None,
                layer: FlowLayer::SmartFlow,
            });
        }
    }
}

fn attributes(tag_body: &str) -> Vec<(&str, &str)> {
    attribute_re()
        .captures_iter(tag_body)
        .filter_map(|c| Some((c.get(1)?.as_str(), c.get(2)?.as_str())))
        .collect()
}

fn attr<'a>(attrs: &[(&str, &'a str)], name: &str) -> Option<&'a str> {
    attrs.iter().find(|(k, _)| *k == name).map(|(_, v)| *v)
}
