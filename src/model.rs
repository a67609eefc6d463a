use crate::error::ExplorerError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub base_url: String,
    pub run_id: String,
    #[serde(default)]
    pub algorithm: Option<AlgorithmKind>,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    pub interval_ms: u64,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub user_agent: String,
    pub major_roads_only: bool,
}

/// A selectable point of the working dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

fn default_weight() -> f64 {
    1.0
}

/// A connection between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub source: String,
    pub target: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

/// Entities and relations as exchanged with the algorithm service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(rename = "nodes")]
    pub entities: Vec<Entity>,
    #[serde(rename = "edges")]
    pub relations: Vec<Relation>,
    #[serde(default)]
    pub directed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// A graph stored by the algorithm service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedGraph {
    pub filename: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub node_count: usize,
    #[serde(default)]
    pub edge_count: usize,
    #[serde(default)]
    pub saved_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmKind {
    Bfs,
    Dfs,
    ShortestPath,
    Bipartite,
}

impl AlgorithmKind {
    pub const ALL: [AlgorithmKind; 4] = [
        AlgorithmKind::Bfs,
        AlgorithmKind::Dfs,
        AlgorithmKind::ShortestPath,
        AlgorithmKind::Bipartite,
    ];

    /// Path segment of the service endpoint for this algorithm.
    pub fn endpoint(self) -> &'static str {
        match self {
            AlgorithmKind::Bfs => "bfs",
            AlgorithmKind::Dfs => "dfs",
            AlgorithmKind::ShortestPath => "shortest-path",
            AlgorithmKind::Bipartite => "check-bipartite",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AlgorithmKind::Bfs => "BFS",
            AlgorithmKind::Dfs => "DFS",
            AlgorithmKind::ShortestPath => "Shortest path",
            AlgorithmKind::Bipartite => "Bipartite check",
        }
    }

    pub fn requires_start(self) -> bool {
        !matches!(self, AlgorithmKind::Bipartite)
    }

    pub fn requires_end(self) -> bool {
        matches!(self, AlgorithmKind::ShortestPath)
    }
}

impl std::str::FromStr for AlgorithmKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "bfs" => Ok(AlgorithmKind::Bfs),
            "dfs" => Ok(AlgorithmKind::Dfs),
            "shortest_path" | "dijkstra" => Ok(AlgorithmKind::ShortestPath),
            "bipartite" | "check_bipartite" => Ok(AlgorithmKind::Bipartite),
            other => Err(format!(
                "unknown algorithm '{other}' (expected bfs, dfs, shortest-path or bipartite)"
            )),
        }
    }
}

impl std::fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Target layout for a graph representation conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepresentationFormat {
    AdjacencyMatrix,
    AdjacencyList,
    EdgeList,
}

impl RepresentationFormat {
    /// Name used on the wire (`to_format`).
    pub fn wire_name(self) -> &'static str {
        match self {
            RepresentationFormat::AdjacencyMatrix => "adjacency_matrix",
            RepresentationFormat::AdjacencyList => "adjacency_list",
            RepresentationFormat::EdgeList => "edge_list",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RepresentationFormat::AdjacencyMatrix => "Adjacency matrix",
            RepresentationFormat::AdjacencyList => "Adjacency list",
            RepresentationFormat::EdgeList => "Edge list",
        }
    }
}

impl std::str::FromStr for RepresentationFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "adjacency_matrix" | "matrix" => Ok(RepresentationFormat::AdjacencyMatrix),
            "adjacency_list" | "list" => Ok(RepresentationFormat::AdjacencyList),
            "edge_list" | "edges" => Ok(RepresentationFormat::EdgeList),
            other => Err(format!(
                "unknown format '{other}' (expected adjacency-matrix, adjacency-list or edge-list)"
            )),
        }
    }
}

impl std::fmt::Display for RepresentationFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A neighbor entry of an adjacency list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub node: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

/// The working dataset converted by the service into another layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum Representation {
    AdjacencyMatrix {
        /// Row/column order, when the service reports it.
        #[serde(default)]
        nodes: Vec<String>,
        matrix: Vec<Vec<f64>>,
    },
    AdjacencyList {
        adjacency_list: std::collections::BTreeMap<String, Vec<Neighbor>>,
    },
    EdgeList {
        edges: Vec<Relation>,
    },
}

impl Representation {
    pub fn format(&self) -> RepresentationFormat {
        match self {
            Representation::AdjacencyMatrix { .. } => RepresentationFormat::AdjacencyMatrix,
            Representation::AdjacencyList { .. } => RepresentationFormat::AdjacencyList,
            Representation::EdgeList { .. } => RepresentationFormat::EdgeList,
        }
    }
}

/// Request body for an algorithm run.
#[derive(Debug, Clone, Serialize)]
pub struct AlgorithmRequest {
    pub graph: Dataset,
    pub algorithm: AlgorithmKind,
    pub start_node: Option<String>,
    pub end_node: Option<String>,
}

/// Wire form of a relation reference inside a step; both ends may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRelationRef {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
}

/// A step as received from the service. Validated lazily during playback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawStep {
    #[serde(default)]
    pub step: Option<usize>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub edge: Option<RawRelationRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationRef {
    pub source: String,
    pub target: String,
}

/// One validated unit of algorithm visualization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// 1-based position in the sequence.
    pub index: usize,
    pub description: String,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub entity: Option<String>,
    #[serde(default)]
    pub relation: Option<RelationRef>,
}

impl RawStep {
    /// Validate this step as the `position`-th (1-based) element of its sequence.
    pub fn validate(&self, position: usize) -> Result<Step, ExplorerError> {
        let malformed = |reason: &str| ExplorerError::MalformedStep {
            position,
            reason: reason.to_string(),
        };

        let index = self.step.ok_or_else(|| malformed("missing step index"))?;
        if index != position {
            return Err(malformed(&format!(
                "step index {index} does not match its position"
            )));
        }

        let description = self
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .ok_or_else(|| malformed("missing description"))?
            .to_string();

        let relation = match &self.edge {
            None => None,
            Some(RawRelationRef {
                source: Some(source),
                target: Some(target),
            }) => Some(RelationRef {
                source: source.clone(),
                target: target.clone(),
            }),
            Some(_) => return Err(malformed("relation is missing an endpoint")),
        };

        Ok(Step {
            index,
            description,
            action: self.action.clone(),
            entity: self.node.clone(),
            relation,
        })
    }
}

/// Final payload of an algorithm run, one variant per algorithm family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlgorithmOutcome {
    Traversal {
        order: Vec<String>,
        visited_count: usize,
    },
    ShortestPath {
        path: Vec<String>,
        /// Total distance in meters.
        distance: f64,
    },
    Bipartite {
        is_bipartite: bool,
        set_a: Vec<String>,
        set_b: Vec<String>,
    },
}

/// Raw response of the algorithm service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlgorithmResponse {
    pub success: bool,
    #[serde(default)]
    pub algorithm: String,
    #[serde(default)]
    pub steps: Vec<RawStep>,
    #[serde(default)]
    pub result: serde_json::Value,
    #[serde(default)]
    pub error: Option<String>,
}

/// A decoded algorithm run, ready for playback.
#[derive(Debug, Clone, PartialEq)]
pub struct AlgorithmRun {
    pub kind: AlgorithmKind,
    pub steps: Vec<RawStep>,
    pub outcome: AlgorithmOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    Idle,
    Running,
    Paused,
    Finished,
}

impl PlaybackState {
    pub fn is_active(self) -> bool {
        matches!(self, PlaybackState::Running | PlaybackState::Paused)
    }

    pub fn label(self) -> &'static str {
        match self {
            PlaybackState::Idle => "Idle",
            PlaybackState::Running => "Running",
            PlaybackState::Paused => "Paused",
            PlaybackState::Finished => "Finished",
        }
    }
}

/// What a finished playback session delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSummary {
    pub kind: AlgorithmKind,
    pub total_steps: usize,
    pub steps_played: usize,
    pub malformed_steps: usize,
    pub outcome: AlgorithmOutcome,
    /// Observed wall-clock gaps between consecutive step deliveries.
    #[serde(default)]
    pub step_gaps_ms: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionSlot {
    Start,
    End,
}

#[derive(Debug, Clone)]
pub enum AppEvent {
    DatasetLoaded {
        // Boxed so large datasets do not bloat every event.
        dataset: Box<Dataset>,
        source: String,
    },
    DatasetCleared,
    EntityAdded {
        entity: Entity,
    },
    SelectionChanged {
        start: Option<String>,
        end: Option<String>,
    },
    RunStarted {
        kind: AlgorithmKind,
        total_steps: usize,
    },
    Step {
        step: Step,
    },
    MalformedStep {
        position: usize,
        reason: String,
    },
    Playback {
        state: PlaybackState,
        interval_ms: u64,
    },
    RunCompleted {
        record: Box<RunRecord>,
    },
    SavedGraphs {
        graphs: Vec<SavedGraph>,
    },
    Converted {
        representation: Box<Representation>,
    },
    Info(InfoEvent),
}

/// Structured info events emitted by the controller and consumed by UI/CLI layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InfoEvent {
    Message(String),
    Error(String),
    RequestingService { kind: AlgorithmKind },
    GraphSaved { filename: String },
}

impl InfoEvent {
    /// Render a human-readable message for UI/CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::Error(msg) => format!("Error: {msg}"),
            InfoEvent::RequestingService { kind } => {
                format!("Running {} on the algorithm service…", kind.label())
            }
            InfoEvent::GraphSaved { filename } => format!("Graph saved as: {filename}"),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, InfoEvent::Error(_))
    }
}

/// A completed run, as stored in history and exported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    #[serde(default)]
    pub timestamp_utc: String,
    pub run_id: String,
    pub base_url: String,
    pub algorithm: AlgorithmKind,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    pub entity_count: usize,
    pub relation_count: usize,
    pub interval_ms: u64,
    pub total_steps: usize,
    pub malformed_steps: usize,
    pub steps: Vec<Step>,
    pub outcome: AlgorithmOutcome,
    #[serde(default)]
    pub step_gaps_ms: Vec<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(step: Option<usize>, description: Option<&str>) -> RawStep {
        RawStep {
            step,
            description: description.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_well_formed_step() {
        let mut r = raw(Some(2), Some("Visit node B"));
        r.node = Some("B".into());
        r.edge = Some(RawRelationRef {
            source: Some("A".into()),
            target: Some("B".into()),
        });

        let step = r.validate(2).expect("step should validate");
        assert_eq!(step.index, 2);
        assert_eq!(step.entity.as_deref(), Some("B"));
        assert_eq!(
            step.relation,
            Some(RelationRef {
                source: "A".into(),
                target: "B".into()
            })
        );
    }

    #[test]
    fn test_validate_reports_missing_fields() {
        assert!(matches!(
            raw(None, Some("x")).validate(1),
            Err(ExplorerError::MalformedStep { position: 1, .. })
        ));
        assert!(matches!(
            raw(Some(1), Some("   ")).validate(1),
            Err(ExplorerError::MalformedStep { .. })
        ));
        assert!(raw(Some(3), Some("x")).validate(1).is_err());

        let mut half_edge = raw(Some(1), Some("x"));
        half_edge.edge = Some(RawRelationRef {
            source: Some("A".into()),
            target: None,
        });
        assert!(half_edge.validate(1).is_err());
    }

    #[test]
    fn test_dataset_wire_names() {
        let json = r#"{"nodes":[{"id":"a","lat":1.0,"lon":2.0}],"edges":[{"source":"a","target":"a"}]}"#;
        let ds: Dataset = serde_json::from_str(json).expect("dataset should parse");
        assert_eq!(ds.entities.len(), 1);
        assert_eq!(ds.relations[0].weight, 1.0);
        assert!(!ds.directed);
    }

    #[test]
    fn test_algorithm_kind_parsing() {
        assert_eq!("shortest-path".parse::<AlgorithmKind>(), Ok(AlgorithmKind::ShortestPath));
        assert_eq!("BFS".parse::<AlgorithmKind>(), Ok(AlgorithmKind::Bfs));
        assert!("prim".parse::<AlgorithmKind>().is_err());
        assert_eq!(AlgorithmKind::Bipartite.endpoint(), "check-bipartite");
        assert!(!AlgorithmKind::Bipartite.requires_start());
        assert!(AlgorithmKind::ShortestPath.requires_end());
    }

    #[test]
    fn test_representation_format_parsing() {
        assert_eq!(
            "edge-list".parse::<RepresentationFormat>(),
            Ok(RepresentationFormat::EdgeList)
        );
        assert_eq!(
            "Adjacency_Matrix".parse::<RepresentationFormat>(),
            Ok(RepresentationFormat::AdjacencyMatrix)
        );
        assert!("incidence".parse::<RepresentationFormat>().is_err());
        assert_eq!(RepresentationFormat::AdjacencyList.wire_name(), "adjacency_list");
    }
}
