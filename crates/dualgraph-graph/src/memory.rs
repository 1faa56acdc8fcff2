//! In-process graph store with the same MERGE semantics as the Cypher
//! statements, plus failure injection for exercising the sync worker.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use dualgraph_core::error::StoreError;

use crate::client::GraphCounts;
use crate::mutation::{Mutation, MutationOp, NODE_LABEL};
use crate::store::{Direction, GraphStore};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredNode {
    pub labels: BTreeSet<String>,
    pub properties: Map<String, Value>,
}

type EdgeKey = (String, String, String);

#[derive(Default)]
struct GraphState {
    nodes: BTreeMap<String, StoredNode>,
    /// (source, rel_type, target) to properties.
    edges: BTreeMap<EdgeKey, Map<String, Value>>,
    applied: u64,
}

#[derive(Default)]
pub struct InMemoryGraphStore {
    state: Mutex<GraphState>,
    scheduled_failures: Mutex<VecDeque<StoreError>>,
    /// Node id to the error every mutation touching it fails with.
    poisoned: Mutex<HashMap<String, StoreError>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` applies with `error`.
    pub fn fail_next(&self, times: usize, error: StoreError) {
        let mut failures = self.scheduled_failures.lock();
        failures.extend(std::iter::repeat(error).take(times));
    }

    /// Fail every mutation that touches `node_id` until cleared.
    pub fn poison(&self, node_id: &str, error: StoreError) {
        self.poisoned.lock().insert(node_id.to_string(), error);
    }

    pub fn clear_poison(&self) {
        self.poisoned.lock().clear();
    }

    pub fn node(&self, id: &str) -> Option<StoredNode> {
        self.state.lock().nodes.get(id).cloned()
    }

    pub fn has_edge(&self, source: &str, rel_type: &str, target: &str) -> bool {
        let key = (source.to_string(), rel_type.to_string(), target.to_string());
        self.state.lock().edges.contains_key(&key)
    }

    pub fn counts(&self) -> GraphCounts {
        let state = self.state.lock();
        GraphCounts {
            nodes: state.nodes.len(),
            relationships: state.edges.len(),
        }
    }

    /// Successful applies so far, duplicates included.
    pub fn applied_count(&self) -> u64 {
        self.state.lock().applied
    }

    fn injected_failure(&self, mutation: &Mutation) -> Option<StoreError> {
        if let Some(err) = self.scheduled_failures.lock().pop_front() {
            return Some(err);
        }
        let poisoned = self.poisoned.lock();
        touched_ids(&mutation.op)
            .iter()
            .find_map(|id| poisoned.get(*id).cloned())
    }
}

fn touched_ids(op: &MutationOp) -> Vec<&str> {
    match op {
        MutationOp::UpsertNode { id, .. } | MutationOp::MergeNode { id, .. } => vec![id.as_str()],
        MutationOp::MergeEdge { source, target, .. } | MutationOp::DeleteEdge { source, target, .. } => {
            vec![source.as_str(), target.as_str()]
        }
    }
}

/// `SET x += $props`: null removes the key.
fn merge_properties(into: &mut Map<String, Value>, props: &Map<String, Value>) {
    for (key, value) in props {
        if value.is_null() {
            into.remove(key);
        } else {
            into.insert(key.clone(), value.clone());
        }
    }
}

fn merge_node<'a>(nodes: &'a mut BTreeMap<String, StoredNode>, id: &str) -> &'a mut StoredNode {
    let node = nodes.entry(id.to_string()).or_default();
    node.labels.insert(NODE_LABEL.to_string());
    node
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn apply(&self, mutation: &Mutation) -> Result<(), StoreError> {
        if let Some(err) = self.injected_failure(mutation) {
            return Err(err);
        }

        let mut state = self.state.lock();
        match &mutation.op {
            MutationOp::UpsertNode { id, labels, properties } => {
                let node = merge_node(&mut state.nodes, id);
                node.labels.extend(labels.iter().cloned());
                merge_properties(&mut node.properties, properties);
            }
            MutationOp::MergeNode { id, properties } => {
                let node = merge_node(&mut state.nodes, id);
                merge_properties(&mut node.properties, properties);
            }
            MutationOp::MergeEdge {
                source,
                target,
                rel_type,
                properties,
            } => {
                merge_node(&mut state.nodes, source);
                merge_node(&mut state.nodes, target);
                let edge = state
                    .edges
                    .entry((source.clone(), rel_type.clone(), target.clone()))
                    .or_default();
                merge_properties(edge, properties);
            }
            MutationOp::DeleteEdge { source, target, rel_type } => {
                state.edges.remove(&(source.clone(), rel_type.clone(), target.clone()));
            }
        }
        state.applied += 1;
        Ok(())
    }

    async fn related(&self, node_id: &str, rel_type: &str, direction: Direction) -> Result<Vec<String>, StoreError> {
        let state = self.state.lock();
        let ids: BTreeSet<String> = state
            .edges
            .keys()
            .filter(|(_, rel, _)| rel == rel_type)
            .filter_map(|(source, _, target)| match direction {
                Direction::Outgoing if source == node_id => Some(target.clone()),
                Direction::Incoming if target == node_id => Some(source.clone()),
                _ => None,
            })
            .collect();
        Ok(ids.into_iter().collect())
    }
}
