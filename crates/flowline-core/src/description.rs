//! Serde structures for flow graph descriptions, and file loading.
//!
//! The format matches the one persisted by the graph editor: camelCase keys,
//! nodes with a `type` tag, a `runtime` block for basic nodes, edges in
//! declaration order, and an optional router condition list. Presentation
//! keys the editor also writes (positions, labels, ports, monitor points,
//! groups) are ignored here.
//!
//! Files can be JSON, RON or TOML; the format is picked from the extension.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The only description version this engine understands.
pub const DESCRIPTION_VERSION: u32 = 1;

// ===========================================================================
// Errors
// ===========================================================================

/// Errors that can occur while reading a description file.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The file has an extension we don't support.
    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    /// A deserialization error occurred.
    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Description types
// ===========================================================================

/// A complete flow graph, as handed to `Init`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDescription {
    #[serde(default = "default_version")]
    pub version: u32,
    pub nodes: Vec<NodeDescription>,
    #[serde(default)]
    pub edges: Vec<EdgeDescription>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routers: Vec<RouterDescription>,
}

fn default_version() -> u32 {
    DESCRIPTION_VERSION
}

/// Node topology tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Basic,
    Router,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescription {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Required for basic nodes, ignored for routers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<NodeRuntime>,
}

/// Processing parameters of a basic node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRuntime {
    pub in_capacity: f64,
    pub out_capacity: f64,
    pub process_rate_per_sec: f64,
    pub start_threshold: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessDescription>,
}

/// Conversion performed while processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessDescription {
    /// `yield[input][output]` = fraction of `input` turned into `output`.
    /// Keys are component names (`solid`, `liquid`, `gas`, `data`).
    #[serde(rename = "yield")]
    pub yields: BTreeMap<String, BTreeMap<String, f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeDescription {
    pub id: String,
    pub from: String,
    pub to: String,
    pub capacity_per_sec: f64,
    pub delay_sec: f64,
}

/// Initial condition of a router node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterDescription {
    pub id: String,
    pub condition: bool,
}

impl GraphDescription {
    /// An empty version-1 description.
    pub fn new() -> Self {
        Self {
            version: DESCRIPTION_VERSION,
            nodes: Vec::new(),
            edges: Vec::new(),
            routers: Vec::new(),
        }
    }

    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl Default for GraphDescription {
    fn default() -> Self {
        Self::new()
    }
}

// ===========================================================================
// Format detection and loading
// ===========================================================================

/// Supported description file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

/// Detect the format of a file based on its extension.
pub fn detect_format(path: &Path) -> Result<Format, LoadError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => Ok(Format::Ron),
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        _ => Err(LoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        }),
    }
}

/// Deserialize `content` in the given format. `file` is only used for error
/// reporting.
pub fn deserialize_str<T: DeserializeOwned>(
    content: &str,
    format: Format,
    file: &Path,
) -> Result<T, LoadError> {
    let parse_err = |detail: String| LoadError::Parse {
        file: file.to_path_buf(),
        detail,
    };
    match format {
        Format::Ron => ron::from_str(content).map_err(|e| parse_err(e.to_string())),
        Format::Json => serde_json::from_str(content).map_err(|e| parse_err(e.to_string())),
        Format::Toml => toml::from_str(content).map_err(|e| parse_err(e.to_string())),
    }
}

/// Read a graph description from disk, picking the format from the extension.
pub fn load_description(path: &Path) -> Result<GraphDescription, LoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    deserialize_str(&content, format, path)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const EDITOR_JSON: &str = r#"{
        "version": 1,
        "nodes": [
            {
                "id": "A",
                "label": "Feed A",
                "type": "basic",
                "position": { "x": -8, "y": 0.6, "z": 0 },
                "runtime": {
                    "inCapacity": 100,
                    "outCapacity": 50,
                    "processRatePerSec": 20,
                    "startThreshold": 1,
                    "process": { "yield": { "liquid": { "gas": 0.8 } } }
                }
            },
            { "id": "R", "type": "router" }
        ],
        "edges": [
            { "id": "AR", "from": "A", "to": "R", "capacityPerSec": 18, "delaySec": 0.35,
              "points": [{ "x": -4, "y": 0.6, "z": 2.5 }] }
        ],
        "routers": [{ "id": "R", "condition": false }],
        "groups": [{ "id": "grp-feed", "name": "Feed Section" }]
    }"#;

    #[test]
    fn parses_editor_json_and_ignores_presentation_keys() {
        let desc = GraphDescription::from_json_str(EDITOR_JSON).unwrap();
        assert_eq!(desc.version, 1);
        assert_eq!(desc.nodes.len(), 2);
        assert_eq!(desc.nodes[1].node_type, NodeType::Router);

        let rt = desc.nodes[0].runtime.as_ref().unwrap();
        assert_eq!(rt.in_capacity, 100.0);
        assert_eq!(rt.process_rate_per_sec, 20.0);
        let process = rt.process.as_ref().unwrap();
        assert_eq!(process.yields["liquid"]["gas"], 0.8);

        assert_eq!(desc.edges[0].capacity_per_sec, 18.0);
        assert_eq!(desc.edges[0].delay_sec, 0.35);
        assert!(!desc.routers[0].condition);
    }

    #[test]
    fn version_defaults_to_one() {
        let desc = GraphDescription::from_json_str(r#"{ "nodes": [] }"#).unwrap();
        assert_eq!(desc.version, DESCRIPTION_VERSION);
        assert!(desc.edges.is_empty());
    }

    #[test]
    fn json_round_trip_preserves_description() {
        let desc = GraphDescription::from_json_str(EDITOR_JSON).unwrap();
        let json = desc.to_json_string().unwrap();
        let back = GraphDescription::from_json_str(&json).unwrap();
        assert_eq!(desc, back);
    }

    #[test]
    fn ron_description_parses() {
        let ron_src = r#"(
            nodes: [
                (id: "src", type: basic, runtime: Some((
                    inCapacity: 10.0, outCapacity: 10.0,
                    processRatePerSec: 5.0, startThreshold: 0.0,
                ))),
            ],
            edges: [],
        )"#;
        let desc: GraphDescription =
            deserialize_str(ron_src, Format::Ron, Path::new("graph.ron")).unwrap();
        assert_eq!(desc.nodes[0].id, "src");
        assert_eq!(desc.nodes[0].runtime.as_ref().unwrap().out_capacity, 10.0);
    }

    #[test]
    fn toml_description_parses() {
        let toml_src = r#"
            [[nodes]]
            id = "src"
            type = "basic"
            [nodes.runtime]
            inCapacity = 10.0
            outCapacity = 10.0
            processRatePerSec = 5.0
            startThreshold = 0.0

            [[nodes]]
            id = "dst"
            type = "router"

            [[edges]]
            id = "e"
            from = "src"
            to = "dst"
            capacityPerSec = 2.0
            delaySec = 0.1
        "#;
        let desc: GraphDescription =
            deserialize_str(toml_src, Format::Toml, Path::new("graph.toml")).unwrap();
        assert_eq!(desc.nodes.len(), 2);
        assert_eq!(desc.edges[0].to, "dst");
    }

    #[test]
    fn detect_format_by_extension() {
        assert_eq!(detect_format(Path::new("a.json")).unwrap(), Format::Json);
        assert_eq!(detect_format(Path::new("a.ron")).unwrap(), Format::Ron);
        assert_eq!(detect_format(Path::new("a.toml")).unwrap(), Format::Toml);
        assert!(matches!(
            detect_format(Path::new("a.yaml")),
            Err(LoadError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn parse_error_names_the_file() {
        let err = deserialize_str::<GraphDescription>("{", Format::Json, Path::new("bad.json"))
            .unwrap_err();
        assert!(err.to_string().contains("bad.json"));
    }

    #[test]
    fn load_description_reads_file() {
        let path = std::env::temp_dir().join(format!(
            "flowline-load-{}.json",
            std::process::id()
        ));
        std::fs::write(&path, EDITOR_JSON).unwrap();
        let desc = load_description(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(desc.edges.len(), 1);
    }
}
