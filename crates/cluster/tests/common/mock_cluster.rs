//! In-memory cluster implementing `Transport` and `TopologySource`

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use resp::{Command, RespValue};
use rr_cluster::{ClusterError, ClusterResult, NodeConnection, TopologySource, Transport};
use rr_core::{Endpoint, NodeDescriptor};

#[derive(Default)]
struct State {
    /// address -> view reported by that address
    views: HashMap<String, Vec<NodeDescriptor>>,
    unreachable: HashSet<String>,
    /// address -> required password
    passwords: HashMap<String, String>,
    connect_delay: Duration,
    connects: HashMap<String, usize>,
    closes: HashMap<String, usize>,
    view_queries: HashMap<String, usize>,
    /// (address, command) in dispatch order
    commands: Vec<(String, Command)>,
}

#[derive(Clone, Default)]
pub struct MockCluster {
    state: Arc<Mutex<State>>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `addr` report `view`
    pub fn set_view(&self, addr: &str, view: Vec<NodeDescriptor>) {
        self.state.lock().views.insert(addr.to_string(), view);
    }

    /// Make every node of `view` report `view`, dropping all other views
    pub fn serve_everywhere(&self, view: Vec<NodeDescriptor>) {
        let mut state = self.state.lock();
        state.views.clear();
        for node in &view {
            state.views.insert(node.endpoint.addr(), view.clone());
        }
    }

    pub fn set_unreachable(&self, addr: &str, unreachable: bool) {
        let mut state = self.state.lock();
        if unreachable {
            state.unreachable.insert(addr.to_string());
        } else {
            state.unreachable.remove(addr);
        }
    }

    pub fn require_password(&self, addr: &str, password: &str) {
        self.state
            .lock()
            .passwords
            .insert(addr.to_string(), password.to_string());
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.state.lock().connect_delay = delay;
    }

    pub fn connects(&self, addr: &str) -> usize {
        self.state.lock().connects.get(addr).copied().unwrap_or(0)
    }

    pub fn total_connects(&self) -> usize {
        self.state.lock().connects.values().sum()
    }

    pub fn closes(&self, addr: &str) -> usize {
        self.state.lock().closes.get(addr).copied().unwrap_or(0)
    }

    pub fn total_closes(&self) -> usize {
        self.state.lock().closes.values().sum()
    }

    pub fn view_queries(&self, addr: &str) -> usize {
        self.state.lock().view_queries.get(addr).copied().unwrap_or(0)
    }

    /// Commands received by `addr`, in order
    pub fn commands_at(&self, addr: &str) -> Vec<Command> {
        self.state
            .lock()
            .commands
            .iter()
            .filter(|(a, _)| a == addr)
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn clear_commands(&self) {
        self.state.lock().commands.clear();
    }

    fn check_reachable(&self, endpoint: &Endpoint) -> ClusterResult<()> {
        if self.state.lock().unreachable.contains(&endpoint.addr()) {
            Err(ClusterError::Connection {
                endpoint: endpoint.addr(),
                reason: "connection refused".into(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Transport for MockCluster {
    async fn connect(&self, endpoint: &Endpoint) -> ClusterResult<Arc<dyn NodeConnection>> {
        let addr = endpoint.addr();
        let delay = {
            let mut state = self.state.lock();
            *state.connects.entry(addr.clone()).or_default() += 1;
            state.connect_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.check_reachable(endpoint)?;

        Ok(Arc::new(MockConnection {
            addr,
            cluster: self.clone(),
            open: AtomicBool::new(true),
            authenticated: AtomicBool::new(false),
        }))
    }
}

#[async_trait]
impl TopologySource for MockCluster {
    async fn load_view(&self, endpoint: &Endpoint) -> ClusterResult<Vec<NodeDescriptor>> {
        let addr = endpoint.addr();
        *self
            .state
            .lock()
            .view_queries
            .entry(addr.clone())
            .or_default() += 1;
        self.check_reachable(endpoint)?;
        self.state
            .lock()
            .views
            .get(&addr)
            .cloned()
            .ok_or_else(|| ClusterError::Command(format!("{} has no cluster view", addr)))
    }
}

pub struct MockConnection {
    addr: String,
    cluster: MockCluster,
    open: AtomicBool,
    authenticated: AtomicBool,
}

impl MockConnection {
    fn reply(&self, command: &Command) -> RespValue {
        let keys = command.keys();
        match command.name() {
            "PING" => RespValue::SimpleString(Bytes::from_static(b"PONG")),
            "MGET" => RespValue::Array(
                keys.iter()
                    .map(|k| RespValue::bulk(format!("{}/{}", self.addr, String::from_utf8_lossy(k))))
                    .collect(),
            ),
            "DEL" | "UNLINK" | "EXISTS" | "TOUCH" => RespValue::Integer(keys.len() as i64),
            "SET" | "MSET" => RespValue::ok(),
            "MSETNX" => RespValue::Integer(1),
            _ => RespValue::bulk(self.addr.clone()),
        }
    }
}

#[async_trait]
impl NodeConnection for MockConnection {
    async fn dispatch(&self, command: Command) -> ClusterResult<RespValue> {
        if !self.is_open() {
            return Err(ClusterError::Connection {
                endpoint: self.addr.clone(),
                reason: "closed".into(),
            });
        }
        let needs_auth = self.cluster.state.lock().passwords.contains_key(&self.addr);
        if needs_auth && !self.authenticated.load(Ordering::SeqCst) {
            return Ok(RespValue::error("NOAUTH Authentication required."));
        }
        let reply = self.reply(&command);
        self.cluster
            .state
            .lock()
            .commands
            .push((self.addr.clone(), command));
        Ok(reply)
    }

    async fn auth(&self, password: &str) -> ClusterResult<()> {
        let expected = self.cluster.state.lock().passwords.get(&self.addr).cloned();
        match expected {
            Some(expected) if expected != password => Err(ClusterError::Auth {
                endpoint: self.addr.clone(),
                reason: "WRONGPASS invalid username-password pair".into(),
            }),
            _ => {
                self.authenticated.store(true, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    async fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            *self
                .cluster
                .state
                .lock()
                .closes
                .entry(self.addr.clone())
                .or_default() += 1;
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
