//! Node client for communication from the panel to inference nodes
//!
//! Every node exposes `GET /status`, `POST /start` and `POST /stop`; the
//! leader additionally answers `POST /query`.

use crate::node::{Node, NodeStatus};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use trired_common::error::{Result, TriRedError};

/// Payload of `GET /status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: String,

    #[serde(default)]
    pub is_leader: bool,
}

impl StatusReport {
    pub fn new(status: NodeStatus, is_leader: bool) -> Self {
        Self {
            status: status.as_str().to_string(),
            is_leader,
        }
    }

    /// Interpret the reported status string
    pub fn node_status(&self) -> Result<NodeStatus> {
        NodeStatus::parse(&self.status)
            .ok_or_else(|| TriRedError::malformed(format!("unrecognized status {:?}", self.status)))
    }
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    query: &'a str,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    response: String,
}

/// Control command sent to a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeCommand {
    Start,
    Stop,
}

impl NodeCommand {
    /// Command that flips a node out of `status`
    ///
    /// Only a running node is stopped; anything else gets a start.
    pub fn toggling(status: NodeStatus) -> Self {
        if status == NodeStatus::Running {
            NodeCommand::Stop
        } else {
            NodeCommand::Start
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeCommand::Start => "start",
            NodeCommand::Stop => "stop",
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            NodeCommand::Start => "/start",
            NodeCommand::Stop => "/stop",
        }
    }
}

/// Outbound calls the panel makes against a node
#[async_trait]
pub trait NodeTransport: Send + Sync {
    /// Fetch current liveness and role
    async fn status(&self, node: &Node) -> Result<StatusReport>;

    /// Ask the node to start or stop
    async fn command(&self, node: &Node, command: NodeCommand) -> Result<()>;

    /// Submit a query and return the answer text
    async fn query(&self, node: &Node, query: &str) -> Result<String>;
}

/// HTTP implementation of [`NodeTransport`]
#[derive(Clone)]
pub struct HttpNodeClient {
    client: Client,
}

impl HttpNodeClient {
    /// Build a client whose every request is bounded by `request_timeout`
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout)
            .build()?;

        Ok(Self { client })
    }

    fn check_status(response: Response, endpoint: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(TriRedError::NodeStatus {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            })
        }
    }

    async fn decode<T: DeserializeOwned>(response: Response, endpoint: &str) -> Result<T> {
        let body = response.bytes().await?;
        serde_json::from_slice(&body)
            .map_err(|e| TriRedError::malformed(format!("{}: {}", endpoint, e)))
    }
}

#[async_trait]
impl NodeTransport for HttpNodeClient {
    async fn status(&self, node: &Node) -> Result<StatusReport> {
        let endpoint = node.endpoint("/status");
        let response = self.client.get(&endpoint).send().await?;
        let response = Self::check_status(response, &endpoint)?;
        let report: StatusReport = Self::decode(response, &endpoint).await?;

        debug!(node = node.id(), status = %report.status, is_leader = report.is_leader, "Status polled");
        Ok(report)
    }

    async fn command(&self, node: &Node, command: NodeCommand) -> Result<()> {
        let endpoint = node.endpoint(command.path());
        let response = self.client.post(&endpoint).send().await?;
        Self::check_status(response, &endpoint)?;
        Ok(())
    }

    async fn query(&self, node: &Node, query: &str) -> Result<String> {
        let endpoint = node.endpoint("/query");
        let response = self
            .client
            .post(&endpoint)
            .json(&QueryRequest { query })
            .send()
            .await?;
        let response = Self::check_status(response, &endpoint)?;
        let answer: QueryResponse = Self::decode(response, &endpoint).await?;
        Ok(answer.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Serve one canned HTTP response and hand back the raw request
    async fn serve_once(status_line: &str, body: &str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status_line,
            body.len(),
            body
        );

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            request
        });

        (address, handle)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);

            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    fn client() -> HttpNodeClient {
        HttpNodeClient::new(Duration::from_millis(500)).unwrap()
    }

    #[tokio::test]
    async fn test_status_parsed() {
        let (address, server) = serve_once("200 OK", r#"{"status":"running","is_leader":true}"#).await;
        let node = Node::placeholder(1, address);

        let report = client().status(&node).await.unwrap();
        let request = server.await.unwrap();

        assert_eq!(report, StatusReport::new(NodeStatus::Running, true));
        assert!(request.starts_with("GET /status HTTP/1.1"));
    }

    #[tokio::test]
    async fn test_status_missing_leader_flag() {
        let (address, _server) = serve_once("200 OK", r#"{"status":"stopped"}"#).await;
        let node = Node::placeholder(1, address);

        let report = client().status(&node).await.unwrap();

        assert_eq!(report.node_status().unwrap(), NodeStatus::Stopped);
        assert!(!report.is_leader);
    }

    #[tokio::test]
    async fn test_status_non_success() {
        let (address, _server) = serve_once("503 Service Unavailable", "{}").await;
        let node = Node::placeholder(1, address);

        let err = client().status(&node).await.unwrap_err();

        assert!(matches!(err, TriRedError::NodeStatus { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_status_malformed_body() {
        let (address, _server) = serve_once("200 OK", "not json").await;
        let node = Node::placeholder(1, address);

        let err = client().status(&node).await.unwrap_err();

        assert!(matches!(err, TriRedError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_query_posts_json() {
        let (address, server) = serve_once("200 OK", r#"{"response":"42"}"#).await;
        let node = Node::placeholder(2, address);

        let answer = client().query(&node, "what is six times seven").await.unwrap();
        let request = server.await.unwrap();

        assert_eq!(answer, "42");
        assert!(request.starts_with("POST /query HTTP/1.1"));
        assert!(request.contains(r#"{"query":"what is six times seven"}"#));
    }

    #[tokio::test]
    async fn test_command_posts_to_path() {
        let (address, server) = serve_once("200 OK", r#"{"ok":true}"#).await;
        let node = Node::placeholder(3, address);

        client().command(&node, NodeCommand::Stop).await.unwrap();
        let request = server.await.unwrap();

        assert!(request.starts_with("POST /stop HTTP/1.1"));
    }

    #[tokio::test]
    async fn test_unresponsive_node_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let node = Node::placeholder(1, listener.local_addr().unwrap().to_string());
        let _hold = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let client = HttpNodeClient::new(Duration::from_millis(200)).unwrap();
        let err = client.status(&node).await.unwrap_err();

        assert_eq!(err.label(), "timeout");
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = client()
            .command(&Node::placeholder(1, address), NodeCommand::Start)
            .await
            .unwrap_err();

        assert!(matches!(err, TriRedError::Http(_)));
    }

    #[test]
    fn test_toggling_command() {
        assert_eq!(NodeCommand::toggling(NodeStatus::Running), NodeCommand::Stop);
        assert_eq!(NodeCommand::toggling(NodeStatus::Stopped), NodeCommand::Start);
        assert_eq!(NodeCommand::toggling(NodeStatus::Error), NodeCommand::Start);
        assert_eq!(NodeCommand::toggling(NodeStatus::Unknown), NodeCommand::Start);
    }
}
