//! Algorithm service client.
//!
//! The service owns the graph algorithms, map data, and saved graphs. This module only
//! moves requests and responses and decodes the per-algorithm result payload.

use crate::model::{
    AlgorithmKind, AlgorithmOutcome, AlgorithmRequest, AlgorithmResponse, AlgorithmRun, Dataset,
    Neighbor, Relation, Representation, RepresentationFormat, RunConfig, SavedGraph,
};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;

/// Anything that can execute an algorithm run request.
pub trait AlgorithmService: Send + Sync + 'static {
    fn run_algorithm(
        &self,
        request: AlgorithmRequest,
    ) -> impl Future<Output = Result<AlgorithmRun>> + Send;
}

#[derive(Debug, Default, Deserialize)]
struct TraversalPayload {
    #[serde(default)]
    traversal_order: Vec<String>,
    #[serde(default)]
    visited_count: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct PathPayload {
    #[serde(default)]
    path: Vec<String>,
    #[serde(default)]
    distance: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct BipartitePayload {
    is_bipartite: bool,
    #[serde(default)]
    set_a: Vec<String>,
    #[serde(default)]
    set_b: Vec<String>,
}

/// Turn a raw service response into a playable run.
pub fn decode_response(kind: AlgorithmKind, response: AlgorithmResponse) -> Result<AlgorithmRun> {
    if !response.success {
        let msg = response
            .error
            .unwrap_or_else(|| "algorithm execution failed".to_string());
        anyhow::bail!("{} failed: {msg}", kind.label());
    }

    let result = response.result;
    let outcome = match kind {
        AlgorithmKind::Bfs | AlgorithmKind::Dfs => {
            let p: TraversalPayload =
                serde_json::from_value(result).context("decode traversal result")?;
            let visited_count = p.visited_count.unwrap_or(p.traversal_order.len());
            AlgorithmOutcome::Traversal {
                order: p.traversal_order,
                visited_count,
            }
        }
        AlgorithmKind::ShortestPath => {
            let p: PathPayload =
                serde_json::from_value(result).context("decode shortest path result")?;
            AlgorithmOutcome::ShortestPath {
                path: p.path,
                distance: p.distance.unwrap_or(0.0),
            }
        }
        AlgorithmKind::Bipartite => {
            let p: BipartitePayload =
                serde_json::from_value(result).context("decode bipartite result")?;
            AlgorithmOutcome::Bipartite {
                is_bipartite: p.is_bipartite,
                set_a: p.set_a,
                set_b: p.set_b,
            }
        }
    };

    Ok(AlgorithmRun {
        kind,
        steps: response.steps,
        outcome,
    })
}

#[derive(Debug, Deserialize)]
struct MatrixPayload {
    #[serde(default)]
    nodes: Vec<String>,
    matrix: Vec<Vec<f64>>,
}

#[derive(Debug, Deserialize)]
struct ListPayload {
    adjacency_list: BTreeMap<String, Vec<Neighbor>>,
}

#[derive(Debug, Deserialize)]
struct EdgesPayload {
    edges: Vec<Relation>,
}

#[derive(Debug, Deserialize)]
struct ConversionEnvelope {
    success: bool,
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
}

/// Decode a conversion response into the requested layout.
fn decode_conversion(
    format: RepresentationFormat,
    envelope: ConversionEnvelope,
) -> Result<Representation> {
    if !envelope.success {
        anyhow::bail!(
            "converting to {} failed: {}",
            format.wire_name(),
            envelope.error.unwrap_or_else(|| "unknown error".into())
        );
    }
    let data = envelope.data;
    let representation = match format {
        RepresentationFormat::AdjacencyMatrix => {
            let p: MatrixPayload =
                serde_json::from_value(data).context("decode adjacency matrix")?;
            Representation::AdjacencyMatrix {
                nodes: p.nodes,
                matrix: p.matrix,
            }
        }
        RepresentationFormat::AdjacencyList => {
            let p: ListPayload = serde_json::from_value(data).context("decode adjacency list")?;
            Representation::AdjacencyList {
                adjacency_list: p.adjacency_list,
            }
        }
        RepresentationFormat::EdgeList => {
            let p: EdgesPayload = serde_json::from_value(data).context("decode edge list")?;
            Representation::EdgeList { edges: p.edges }
        }
    };
    Ok(representation)
}

#[derive(Debug, Deserialize)]
struct GraphEnvelope {
    success: bool,
    #[serde(default)]
    graph: Option<Dataset>,
    #[serde(default)]
    error: Option<String>,
}

impl GraphEnvelope {
    fn into_dataset(self, what: &str) -> Result<Dataset> {
        match (self.success, self.graph) {
            (true, Some(graph)) => Ok(graph),
            _ => Err(anyhow::anyhow!(
                "{what} failed: {}",
                self.error.unwrap_or_else(|| "no graph returned".into())
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SaveEnvelope {
    success: bool,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SavedListEnvelope {
    success: bool,
    #[serde(default)]
    graphs: Vec<SavedGraph>,
}

/// HTTP client for the algorithm service.
#[derive(Clone)]
pub struct ServiceClient {
    pub(crate) http: reqwest::Client,
    base_url: String,
}

impl ServiceClient {
    pub fn new(cfg: &RunConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(cfg.request_timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn fetch_map_data(&self, major_roads_only: bool) -> Result<Dataset> {
        let url = self.url("map-data");
        log::info!("fetching map data from {url}");
        let envelope: GraphEnvelope = self
            .http
            .get(&url)
            .query(&[("major_roads_only", major_roads_only)])
            .send()
            .await
            .context("request map data")?
            .error_for_status()
            .context("map data request rejected")?
            .json()
            .await
            .context("decode map data")?;
        envelope.into_dataset("loading map data")
    }

    pub async fn save_graph(&self, name: &str, dataset: &Dataset) -> Result<String> {
        let body = serde_json::json!({ "name": name, "graph": dataset });
        let envelope: SaveEnvelope = self
            .http
            .post(self.url("save-graph"))
            .json(&body)
            .send()
            .await
            .context("request save graph")?
            .error_for_status()
            .context("save graph request rejected")?
            .json()
            .await
            .context("decode save graph response")?;
        if !envelope.success {
            anyhow::bail!(
                "saving graph failed: {}",
                envelope.error.unwrap_or_else(|| "unknown error".into())
            );
        }
        Ok(envelope.filename)
    }

    pub async fn list_saved_graphs(&self) -> Result<Vec<SavedGraph>> {
        let envelope: SavedListEnvelope = self
            .http
            .get(self.url("saved-graphs"))
            .send()
            .await
            .context("request saved graphs")?
            .error_for_status()
            .context("saved graphs request rejected")?
            .json()
            .await
            .context("decode saved graphs")?;
        if !envelope.success {
            anyhow::bail!("listing saved graphs failed");
        }
        Ok(envelope.graphs)
    }

    pub async fn load_graph(&self, filename: &str) -> Result<Dataset> {
        let envelope: GraphEnvelope = self
            .http
            .get(self.url(&format!("load-graph/{filename}")))
            .send()
            .await
            .context("request saved graph")?
            .error_for_status()
            .context("saved graph request rejected")?
            .json()
            .await
            .context("decode saved graph")?;
        envelope.into_dataset(&format!("loading graph {filename}"))
    }

    /// Ask the service to lay `dataset` out as `format`.
    pub async fn convert_representation(
        &self,
        dataset: &Dataset,
        format: RepresentationFormat,
    ) -> Result<Representation> {
        let body = serde_json::json!({
            "graph": dataset,
            "from_format": "graph",
            "to_format": format.wire_name(),
        });
        log::info!(
            "converting {} entities to {}",
            dataset.entities.len(),
            format.wire_name()
        );
        let envelope: ConversionEnvelope = self
            .http
            .post(self.url("convert-representation"))
            .json(&body)
            .send()
            .await
            .context("request representation conversion")?
            .error_for_status()
            .context("conversion request rejected")?
            .json()
            .await
            .context("decode conversion response")?;
        decode_conversion(format, envelope)
    }
}

impl AlgorithmService for ServiceClient {
    async fn run_algorithm(&self, request: AlgorithmRequest) -> Result<AlgorithmRun> {
        let kind = request.algorithm;
        let url = self.url(kind.endpoint());
        log::info!(
            "POST {url} ({} entities, start={:?}, end={:?})",
            request.graph.entities.len(),
            request.start_node,
            request.end_node
        );
        let response: AlgorithmResponse = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("request {}", kind.label()))?
            .error_for_status()
            .with_context(|| format!("{} request rejected", kind.label()))?
            .json()
            .await
            .with_context(|| format!("decode {} response", kind.label()))?;
        decode_response(kind, response)
    }
}

/// Replays a saved service response instead of calling the service.
#[derive(Debug, Clone)]
pub struct ReplayService {
    path: PathBuf,
}

impl ReplayService {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl AlgorithmService for ReplayService {
    async fn run_algorithm(&self, request: AlgorithmRequest) -> Result<AlgorithmRun> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("read response file {}", self.path.display()))?;
        let response: AlgorithmResponse = serde_json::from_str(&raw)
            .with_context(|| format!("parse response file {}", self.path.display()))?;
        decode_response(request.algorithm, response)
    }
}

/// Either the live service or a replayed response file.
#[derive(Clone)]
pub enum Backend {
    Live(ServiceClient),
    Replay(ReplayService),
}

impl Backend {
    pub fn client(&self) -> Option<&ServiceClient> {
        match self {
            Backend::Live(c) => Some(c),
            Backend::Replay(_) => None,
        }
    }
}

impl AlgorithmService for Backend {
    async fn run_algorithm(&self, request: AlgorithmRequest) -> Result<AlgorithmRun> {
        match self {
            Backend::Live(c) => c.run_algorithm(request).await,
            Backend::Replay(r) => r.run_algorithm(request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RawStep;
    use serde_json::json;

    fn response(result: serde_json::Value) -> AlgorithmResponse {
        AlgorithmResponse {
            success: true,
            algorithm: "x".into(),
            steps: vec![RawStep {
                step: Some(1),
                description: Some("start".into()),
                ..Default::default()
            }],
            result,
            error: None,
        }
    }

    #[test]
    fn test_decode_traversal() {
        let run = decode_response(
            AlgorithmKind::Bfs,
            response(json!({"traversal_order": ["a", "b"], "visited_count": 2})),
        )
        .expect("decode");
        assert_eq!(run.steps.len(), 1);
        assert_eq!(
            run.outcome,
            AlgorithmOutcome::Traversal {
                order: vec!["a".into(), "b".into()],
                visited_count: 2
            }
        );
    }

    #[test]
    fn test_decode_shortest_path_and_bipartite() {
        let run = decode_response(
            AlgorithmKind::ShortestPath,
            response(json!({"path": ["a", "c"], "distance": 812.5})),
        )
        .expect("decode path");
        assert_eq!(
            run.outcome,
            AlgorithmOutcome::ShortestPath {
                path: vec!["a".into(), "c".into()],
                distance: 812.5
            }
        );

        let run = decode_response(
            AlgorithmKind::Bipartite,
            response(json!({"is_bipartite": false})),
        )
        .expect("decode bipartite");
        assert!(matches!(
            run.outcome,
            AlgorithmOutcome::Bipartite {
                is_bipartite: false,
                ..
            }
        ));
    }

    #[test]
    fn test_decode_failure_carries_service_message() {
        let mut r = response(json!(null));
        r.success = false;
        r.error = Some("start node not in graph".into());
        let err = decode_response(AlgorithmKind::Dfs, r).expect_err("should fail");
        assert!(err.to_string().contains("start node not in graph"));

        assert!(decode_response(AlgorithmKind::Bipartite, response(json!({}))).is_err());
    }

    /// Serve exactly one HTTP response on a local port; returns the base URL.
    async fn serve_once(status: &'static str, body: String) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.expect("accept");
            // Read the whole request so closing the socket does not reset the connection.
            let mut req = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = sock.read(&mut buf).await.expect("read request");
                if n == 0 {
                    break;
                }
                req.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&req);
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let content_length = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            let (k, v) = l.split_once(':')?;
                            k.eq_ignore_ascii_case("content-length")
                                .then(|| v.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if req.len() >= head_end + 4 + content_length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            sock.write_all(response.as_bytes()).await.expect("write response");
            let _ = sock.shutdown().await;
        });
        format!("http://{addr}/api")
    }

    fn client_for(base_url: &str) -> ServiceClient {
        use clap::Parser;
        let args = crate::cli::Cli::try_parse_from(["mapgraph", "--base-url", base_url])
            .expect("parse");
        ServiceClient::new(&crate::cli::build_config(&args)).expect("client")
    }

    fn bfs_request() -> AlgorithmRequest {
        AlgorithmRequest {
            graph: Dataset::empty(),
            algorithm: AlgorithmKind::Bfs,
            start_node: Some("a".into()),
            end_node: None,
        }
    }

    #[tokio::test]
    async fn test_http_error_status_is_reported_as_rejection() {
        let base = serve_once(
            "500 Internal Server Error",
            json!({"detail": "boom"}).to_string(),
        )
        .await;
        let err = client_for(&base)
            .run_algorithm(bfs_request())
            .await
            .expect_err("500 should fail");
        let msg = format!("{err:#}");
        assert!(msg.contains("BFS request rejected"), "{msg}");
        assert!(msg.contains("500"), "{msg}");
        assert!(!msg.contains("decode"), "{msg}");
    }

    #[tokio::test]
    async fn test_convert_representation_over_http() {
        let body = json!({
            "success": true,
            "from_format": "graph",
            "to_format": "edge_list",
            "data": {"edges": [{"source": "a", "target": "b", "weight": 12.5}]}
        });
        let base = serve_once("200 OK", body.to_string()).await;
        let repr = client_for(&base)
            .convert_representation(&Dataset::empty(), RepresentationFormat::EdgeList)
            .await
            .expect("convert");
        assert_eq!(
            repr,
            Representation::EdgeList {
                edges: vec![Relation {
                    source: "a".into(),
                    target: "b".into(),
                    weight: 12.5
                }]
            }
        );
    }

    #[test]
    fn test_decode_conversion_layouts() {
        let matrix = decode_conversion(
            RepresentationFormat::AdjacencyMatrix,
            ConversionEnvelope {
                success: true,
                data: json!({"nodes": ["a", "b"], "matrix": [[0.0, 1.0], [1.0, 0.0]]}),
                error: None,
            },
        )
        .expect("matrix");
        assert_eq!(matrix.format(), RepresentationFormat::AdjacencyMatrix);

        let list = decode_conversion(
            RepresentationFormat::AdjacencyList,
            ConversionEnvelope {
                success: true,
                data: json!({"adjacency_list": {"a": [{"node": "b"}]}}),
                error: None,
            },
        )
        .expect("list");
        let Representation::AdjacencyList { adjacency_list } = list else {
            panic!("expected adjacency list");
        };
        assert_eq!(adjacency_list["a"][0].node, "b");
        assert_eq!(adjacency_list["a"][0].weight, 1.0);

        let err = decode_conversion(
            RepresentationFormat::EdgeList,
            ConversionEnvelope {
                success: false,
                data: serde_json::Value::Null,
                error: Some("not implemented".into()),
            },
        )
        .expect_err("failure");
        assert!(err.to_string().contains("not implemented"));
    }

    #[tokio::test]
    async fn test_replay_service_reads_response_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bfs.json");
        let body = json!({
            "success": true,
            "algorithm": "bfs",
            "steps": [{"step": 1, "action": "visit", "node": "a", "description": "Visit a"}],
            "result": {"traversal_order": ["a"], "visited_count": 1}
        });
        std::fs::write(&path, body.to_string()).expect("write response");

        let svc = ReplayService::new(path);
        let run = svc
            .run_algorithm(AlgorithmRequest {
                graph: Dataset::empty(),
                algorithm: AlgorithmKind::Bfs,
                start_node: Some("a".into()),
                end_node: None,
            })
            .await
            .expect("replay");
        assert_eq!(run.steps[0].node.as_deref(), Some("a"));
    }
}
