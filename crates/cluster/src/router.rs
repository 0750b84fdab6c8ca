//! Command routing
//!
//! Maps a command to the node owning its key's slot. Multi-key commands are
//! split per node, sent in parallel and their replies merged back.

use futures::future::join_all;
use std::sync::Arc;
use tracing::debug;

use bytes::Bytes;
use resp::{Command, KeyLayout, RespValue};
use rr_core::{slot_for_key, Endpoint, PartitionTable};

use crate::error::{ClusterError, ClusterResult};
use crate::provider::{ConnectionProvider, NodeTarget};

/// Routes keyed commands through a [`ConnectionProvider`]
#[derive(Clone)]
pub struct CommandRouter {
    provider: Arc<ConnectionProvider>,
    /// Target for keys whose slot has no owner
    fallback: Endpoint,
}

impl CommandRouter {
    pub fn new(provider: Arc<ConnectionProvider>, fallback: Endpoint) -> Self {
        Self { provider, fallback }
    }

    pub fn provider(&self) -> &Arc<ConnectionProvider> {
        &self.provider
    }

    /// Node that should receive a command for `key`
    pub fn target_for_key(&self, table: &PartitionTable, key: &[u8]) -> NodeTarget {
        match table.owner_for_key(key) {
            Some(node) => NodeTarget::Id(node.node_id.clone()),
            None => {
                debug!(
                    "Slot {} has no owner, routing to {}",
                    slot_for_key(key),
                    self.fallback
                );
                NodeTarget::address(self.fallback.host.clone(), self.fallback.port)
            }
        }
    }

    /// Send a keyed command to the node(s) owning its keys
    ///
    /// Keyless commands are rejected with [`ClusterError::NoKey`]; they have
    /// to be sent to an explicitly chosen node. A key/value command missing a
    /// value is rejected before anything is sent.
    pub async fn route(&self, command: Command) -> ClusterResult<RespValue> {
        command.check_arity()?;
        match command.key_layout() {
            KeyLayout::Keyless => Err(ClusterError::NoKey(command.name().to_string())),
            KeyLayout::Single => {
                let table = self.provider.partitions();
                let key = command
                    .first_key()
                    .ok_or_else(|| ClusterError::NoKey(command.name().to_string()))?;
                let target = self.target_for_key(&table, key);
                self.dispatch(target, command).await
            }
            KeyLayout::Multi { .. } => self.fan_out(command).await,
        }
    }

    async fn dispatch(&self, target: NodeTarget, command: Command) -> ClusterResult<RespValue> {
        let handle = self.provider.connection(target).await?;
        handle.dispatch(command).await
    }

    async fn fan_out(&self, command: Command) -> ClusterResult<RespValue> {
        let table = self.provider.partitions();
        let keys: Vec<Bytes> = command.keys().into_iter().cloned().collect();
        let groups = self.group_keys(&table, &keys);

        if groups.len() == 1 {
            let (target, _) = groups.into_iter().next().ok_or_else(|| {
                ClusterError::NoKey(command.name().to_string())
            })?;
            return self.dispatch(target, command).await;
        }

        debug!("Splitting {} over {} nodes", command.name(), groups.len());
        let requests = groups.iter().map(|(target, positions)| {
            let sub = command.select_key_groups(positions);
            self.dispatch(target.clone(), sub)
        });
        let replies = join_all(requests).await;

        let positions: Vec<Vec<usize>> = groups.into_iter().map(|(_, p)| p).collect();
        merge_replies(command.name(), keys.len(), &positions, replies)
    }

    /// Group key positions by target node, in first-seen order
    fn group_keys(&self, table: &PartitionTable, keys: &[Bytes]) -> Vec<(NodeTarget, Vec<usize>)> {
        let mut groups: Vec<(NodeTarget, Vec<usize>)> = Vec::new();
        for (pos, key) in keys.iter().enumerate() {
            let target = self.target_for_key(table, key);
            match groups.iter_mut().find(|(t, _)| *t == target) {
                Some((_, positions)) => positions.push(pos),
                None => groups.push((target, vec![pos])),
            }
        }
        groups
    }
}

/// Merge per-node replies of a split multi-key command
fn merge_replies(
    name: &str,
    key_count: usize,
    positions: &[Vec<usize>],
    replies: Vec<ClusterResult<RespValue>>,
) -> ClusterResult<RespValue> {
    let mut values = Vec::with_capacity(replies.len());
    for reply in replies {
        match reply? {
            RespValue::Error(msg) => {
                return Err(ClusterError::Command(String::from_utf8_lossy(&msg).into_owned()))
            }
            value => values.push(value),
        }
    }

    match name {
        "MGET" => {
            let mut merged = vec![RespValue::Null; key_count];
            for (value, positions) in values.into_iter().zip(positions) {
                let items = match value {
                    RespValue::Array(items) => items,
                    other => return Err(unexpected(name, &other)),
                };
                if items.len() != positions.len() {
                    return Err(ClusterError::UnexpectedReply(format!(
                        "{} returned {} values for {} keys",
                        name,
                        items.len(),
                        positions.len()
                    )));
                }
                for (item, &pos) in items.into_iter().zip(positions.iter()) {
                    merged[pos] = item;
                }
            }
            Ok(RespValue::Array(merged))
        }
        "MSET" => match values.iter().find(|v| !v.is_ok()) {
            Some(value) => Err(unexpected(name, value)),
            None => Ok(RespValue::ok()),
        },
        "MSETNX" => {
            let mut all_set = true;
            for value in &values {
                let n = value.as_integer().ok_or_else(|| unexpected(name, value))?;
                all_set &= n == 1;
            }
            Ok(RespValue::Integer(all_set as i64))
        }
        // DEL, UNLINK, EXISTS, TOUCH
        _ => {
            let mut total = 0i64;
            for value in &values {
                total += value.as_integer().ok_or_else(|| unexpected(name, value))?;
            }
            Ok(RespValue::Integer(total))
        }
    }
}

fn unexpected(name: &str, value: &RespValue) -> ClusterError {
    ClusterError::UnexpectedReply(format!("{}: {:?}", name, value))
}
