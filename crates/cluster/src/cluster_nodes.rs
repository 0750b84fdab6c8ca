//! `CLUSTER NODES` topology source
//!
//! Reply format, one node per line:
//!
//! ```text
//! <id> <ip:port@cport[,hostname]> <flags> <master> <ping> <pong> <epoch> <link> <slot> ...
//! ```

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use resp::{Command, RespValue};
use rr_core::{Endpoint, NodeDescriptor, NodeFlag, PartitionError, SlotRange};

use crate::error::{ClusterError, ClusterResult};
use crate::transport::{TopologySource, Transport};

/// Reads topology views with `CLUSTER NODES`
pub struct ClusterNodesSource {
    transport: Arc<dyn Transport>,
}

impl ClusterNodesSource {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl TopologySource for ClusterNodesSource {
    async fn load_view(&self, endpoint: &Endpoint) -> ClusterResult<Vec<NodeDescriptor>> {
        let connection = self.transport.connect(endpoint).await?;
        let result = async {
            if let Some(password) = endpoint.credential() {
                connection.auth(password).await?;
            }
            connection
                .dispatch(Command::new("CLUSTER").arg("NODES"))
                .await
        }
        .await;
        connection.close().await;

        let text = match result? {
            RespValue::Error(msg) => {
                return Err(ClusterError::Command(String::from_utf8_lossy(&msg).into_owned()))
            }
            reply => reply
                .as_text()
                .ok_or_else(|| ClusterError::UnexpectedReply(format!("{:?}", reply)))?,
        };
        let nodes = parse_cluster_nodes(&text, endpoint)?;
        debug!("{} reports {} nodes", endpoint, nodes.len());
        Ok(nodes)
    }
}

/// Parse a `CLUSTER NODES` reply obtained from `queried`
pub fn parse_cluster_nodes(text: &str, queried: &Endpoint) -> Result<Vec<NodeDescriptor>, PartitionError> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| parse_line(line, queried))
        .collect()
}

fn parse_line(line: &str, queried: &Endpoint) -> Result<NodeDescriptor, PartitionError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 8 {
        return Err(PartitionError::InvalidEndpoint(format!(
            "malformed node line: {}",
            line
        )));
    }

    let endpoint = parse_address(fields[1], queried)?;
    let flags: BTreeSet<NodeFlag> = fields[2]
        .split(',')
        .filter_map(|flag| flag.parse().ok())
        .collect();
    let master_id = match fields[3] {
        "-" | "" => None,
        id => Some(id.to_string()),
    };
    let slots = fields[8..]
        .iter()
        .filter(|token| !token.starts_with('['))
        .map(|token| parse_slots(token))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(NodeDescriptor {
        node_id: fields[0].to_string(),
        endpoint,
        flags,
        master_id,
        slots,
    })
}

/// `ip:port@cport[,hostname]`; an empty ip means the queried host
fn parse_address(field: &str, queried: &Endpoint) -> Result<Endpoint, PartitionError> {
    let addr = field.split(',').next().unwrap_or(field);
    let addr = addr.split('@').next().unwrap_or(addr);
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| PartitionError::InvalidEndpoint(field.to_string()))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| PartitionError::InvalidEndpoint(field.to_string()))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let host = if host.is_empty() { queried.host.as_str() } else { host };
    Ok(Endpoint::new(host, port).with_timeout(queried.timeout))
}

/// `a-b` (inclusive) or a single slot
fn parse_slots(token: &str) -> Result<SlotRange, PartitionError> {
    let invalid = || PartitionError::InvalidEndpoint(format!("invalid slot token: {}", token));
    match token.split_once('-') {
        Some((start, end)) => {
            let start = start.parse::<u32>().map_err(|_| invalid())?;
            let end = end.parse::<u32>().map_err(|_| invalid())?;
            SlotRange::inclusive(start, end)
        }
        None => SlotRange::single(token.parse::<u32>().map_err(|_| invalid())?),
    }
}
