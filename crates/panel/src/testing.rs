//! In-memory node transport for tests

use crate::node::{Node, NodeId, NodeStatus};
use crate::node_client::{NodeCommand, NodeTransport, StatusReport};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use trired_common::error::{Result, TriRedError};

/// How a fake node answers a request
#[derive(Debug, Clone)]
pub enum Reply<T> {
    Ok(T),
    Fail(String),
    /// Never answers
    Hang,
    /// Answers after a delay
    Delay(Duration, T),
}

/// A request the fake received
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Status(NodeId),
    Command(NodeId, NodeCommand),
    Query(NodeId, String),
}

#[derive(Default)]
struct State {
    status: HashMap<NodeId, Reply<StatusReport>>,
    command: HashMap<NodeId, Reply<()>>,
    query: HashMap<NodeId, Reply<String>>,
    calls: Vec<Call>,
}

/// Scriptable [`NodeTransport`] that records every call
#[derive(Default)]
pub struct FakeTransport {
    state: Mutex<State>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, id: NodeId, status: NodeStatus, is_leader: bool) {
        self.state
            .lock()
            .status
            .insert(id, Reply::Ok(StatusReport::new(status, is_leader)));
    }

    pub fn status_reply(&self, id: NodeId, reply: Reply<StatusReport>) {
        self.state.lock().status.insert(id, reply);
    }

    pub fn command_reply(&self, id: NodeId, reply: Reply<()>) {
        self.state.lock().command.insert(id, reply);
    }

    pub fn query_reply(&self, id: NodeId, reply: Reply<String>) {
        self.state.lock().query.insert(id, reply);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn status_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Status(_)))
            .count()
    }

    pub fn network_calls_except_status(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| !matches!(call, Call::Status(_)))
            .collect()
    }

    async fn answer<T>(reply: Option<Reply<T>>, what: &str) -> Result<T> {
        match reply {
            Some(Reply::Ok(value)) => Ok(value),
            Some(Reply::Fail(msg)) => Err(TriRedError::internal(msg)),
            Some(Reply::Hang) => std::future::pending().await,
            Some(Reply::Delay(delay, value)) => {
                tokio::time::sleep(delay).await;
                Ok(value)
            }
            None => Err(TriRedError::internal(format!("no {} scripted", what))),
        }
    }
}

#[async_trait]
impl NodeTransport for FakeTransport {
    async fn status(&self, node: &Node) -> Result<StatusReport> {
        let reply = {
            let mut state = self.state.lock();
            state.calls.push(Call::Status(node.id()));
            state.status.get(&node.id()).cloned()
        };
        Self::answer(reply, "status").await
    }

    async fn command(&self, node: &Node, command: NodeCommand) -> Result<()> {
        let reply = {
            let mut state = self.state.lock();
            state.calls.push(Call::Command(node.id(), command));
            state.command.get(&node.id()).cloned().or(Some(Reply::Ok(())))
        };
        Self::answer(reply, "command").await
    }

    async fn query(&self, node: &Node, query: &str) -> Result<String> {
        let reply = {
            let mut state = self.state.lock();
            state.calls.push(Call::Query(node.id(), query.to_string()));
            state.query.get(&node.id()).cloned()
        };
        Self::answer(reply, "query").await
    }
}
