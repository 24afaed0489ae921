//! The bundled property-graph backend: an in-memory graph with
//! serializable transactions and JSON snapshot persistence.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::info;

use super::{
    EdgeHandle, EdgePattern, EdgeRecord, Error, LinkDirection, NodeHandle, NodePattern,
    NodeRecord, PropValue,
};

const SNAPSHOT_FILE: &str = "graph.json";

/// Seconds-since-epoch creation stamp, set when `_expiration` is used.
pub const CREATION_PROP: &str = "_creation";
/// Relative lifetime in seconds after which an entity may be swept.
pub const EXPIRATION_PROP: &str = "_expiration";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Node {
    class: String,
    props: HashMap<String, PropValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Edge {
    class: String,
    src: NodeHandle,
    dst: NodeHandle,
    props: HashMap<String, PropValue>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GraphState {
    next_node: u64,
    next_edge: u64,
    nodes: HashMap<NodeHandle, Node>,
    edges: HashMap<EdgeHandle, Edge>,
}

/// Handle to the graph database. Cheap to clone; all clones share the
/// same state.
#[derive(Clone)]
pub struct GraphDb {
    state: Arc<RwLock<GraphState>>,
    root: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// A fresh node was created.
    Created(NodeHandle),
    /// Constraints matched an existing node, which was updated instead.
    Matched(NodeHandle),
}

impl AddOutcome {
    pub fn handle(self) -> NodeHandle {
        match self {
            AddOutcome::Created(h) | AddOutcome::Matched(h) => h,
        }
    }
}

impl GraphDb {
    /// A fresh graph with no persistence root.
    pub fn in_memory() -> Self {
        GraphDb {
            state: Arc::new(RwLock::new(GraphState::default())),
            root: None,
        }
    }

    /// Open the graph rooted at `root`, loading an existing snapshot if
    /// one is present.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, Error> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)
            .map_err(|e| Error::Backend(format!("could not create {:?}: {}", root, e)))?;

        let snapshot = root.join(SNAPSHOT_FILE);
        let state = if snapshot.exists() {
            let bytes = std::fs::read(&snapshot)
                .map_err(|e| Error::Backend(format!("could not read snapshot: {}", e)))?;
            serde_json::from_slice(&bytes)
                .map_err(|e| Error::Backend(format!("corrupt snapshot: {}", e)))?
        } else {
            GraphState::default()
        };

        Ok(GraphDb {
            state: Arc::new(RwLock::new(state)),
            root: Some(root),
        })
    }

    /// Open a transaction, waiting at most `timeout_ms` for the lock.
    pub async fn open_tx(&self, timeout_ms: u64, mode: TxMode) -> Result<GraphTx, Error> {
        let timeout = Duration::from_millis(timeout_ms);
        let guard = match mode {
            TxMode::Read => {
                let guard = tokio::time::timeout(timeout, self.state.clone().read_owned())
                    .await
                    .map_err(|_| Error::Timeout)?;
                TxGuard::Read(guard)
            }
            TxMode::Write => {
                let guard = tokio::time::timeout(timeout, self.state.clone().write_owned())
                    .await
                    .map_err(|_| Error::Timeout)?;
                TxGuard::Write(guard)
            }
        };
        Ok(GraphTx::new(guard))
    }

    /// Write the current state to the persistence root, if any.
    pub async fn persist(&self) -> Result<(), Error> {
        if let Some(root) = &self.root {
            let path = root.join(SNAPSHOT_FILE);
            self.snapshot_to(&path).await?;
        }
        Ok(())
    }

    /// Replicate the current state under `path` (the backup directory).
    pub async fn backup(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let dir = path.as_ref();
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| Error::Backend(format!("could not create {:?}: {}", dir, e)))?;
        let path = dir.join(SNAPSHOT_FILE);
        self.snapshot_to(&path).await?;
        info!("replicated graph to {:?}", path);
        Ok(())
    }

    async fn snapshot_to(&self, path: &Path) -> Result<(), Error> {
        let bytes = {
            let state = self.state.read().await;
            serde_json::to_vec(&*state)
                .map_err(|e| Error::Backend(format!("could not serialize snapshot: {}", e)))?
        };
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| Error::Backend(format!("could not write snapshot: {}", e)))
    }
}

enum TxGuard {
    Read(OwnedRwLockReadGuard<GraphState>),
    Write(OwnedRwLockWriteGuard<GraphState>),
}

impl TxGuard {
    fn state(&self) -> &GraphState {
        match self {
            TxGuard::Read(guard) => guard,
            TxGuard::Write(guard) => guard,
        }
    }
}

/// Mutations staged by an open transaction, applied on commit.
#[derive(Default)]
struct Delta {
    nodes: HashMap<NodeHandle, Node>,
    edges: HashMap<EdgeHandle, Edge>,
    removed_nodes: HashSet<NodeHandle>,
    removed_edges: HashSet<EdgeHandle>,
    next_node: Option<u64>,
    next_edge: Option<u64>,
}

/// One open transaction. Holding it excludes writers (and, for a write
/// transaction, everyone), so transactions are serializable. Dropping
/// without [`commit`](GraphTx::commit) rolls back.
pub struct GraphTx {
    guard: TxGuard,
    delta: Delta,
}

impl GraphTx {
    fn new(guard: TxGuard) -> Self {
        GraphTx {
            guard,
            delta: Delta::default(),
        }
    }

    fn writable(&mut self) -> Result<(), Error> {
        match self.guard {
            TxGuard::Write(_) => Ok(()),
            TxGuard::Read(_) => Err(Error::ReadOnly),
        }
    }

    fn next_node_handle(&mut self) -> NodeHandle {
        let next = self
            .delta
            .next_node
            .get_or_insert(self.guard.state().next_node);
        let handle = *next;
        *next += 1;
        handle
    }

    fn next_edge_handle(&mut self) -> EdgeHandle {
        let next = self
            .delta
            .next_edge
            .get_or_insert(self.guard.state().next_edge);
        let handle = *next;
        *next += 1;
        handle
    }

    fn node(&self, handle: NodeHandle) -> Option<&Node> {
        if self.delta.removed_nodes.contains(&handle) {
            return None;
        }
        self.delta
            .nodes
            .get(&handle)
            .or_else(|| self.guard.state().nodes.get(&handle))
    }

    fn visible_nodes(&self) -> Vec<(NodeHandle, &Node)> {
        let mut nodes: Vec<(NodeHandle, &Node)> = self
            .guard
            .state()
            .nodes
            .iter()
            .filter(|(h, _)| {
                !self.delta.removed_nodes.contains(*h) && !self.delta.nodes.contains_key(*h)
            })
            .map(|(h, n)| (*h, n))
            .chain(self.delta.nodes.iter().map(|(h, n)| (*h, n)))
            .collect();
        // Handles are assigned in insertion order; make results follow it.
        nodes.sort_by_key(|(h, _)| *h);
        nodes
    }

    fn visible_edges(&self) -> Vec<(EdgeHandle, &Edge)> {
        let mut edges: Vec<(EdgeHandle, &Edge)> = self
            .guard
            .state()
            .edges
            .iter()
            .filter(|(h, _)| {
                !self.delta.removed_edges.contains(*h) && !self.delta.edges.contains_key(*h)
            })
            .map(|(h, e)| (*h, e))
            .chain(self.delta.edges.iter().map(|(h, e)| (*h, e)))
            .collect();
        edges.sort_by_key(|(h, _)| *h);
        edges
    }

    fn linked(&self, candidate: NodeHandle, link: &super::LinkAnchor) -> bool {
        self.visible_edges().iter().any(|(_, edge)| {
            if let Some(class) = &link.class {
                if &edge.class != class {
                    return false;
                }
            }
            link.nodes.iter().any(|anchor| match link.direction {
                LinkDirection::Out => edge.src == *anchor && edge.dst == candidate,
                LinkDirection::In => edge.src == candidate && edge.dst == *anchor,
                LinkDirection::Any => {
                    (edge.src == *anchor && edge.dst == candidate)
                        || (edge.src == candidate && edge.dst == *anchor)
                }
            })
        })
    }

    /// Create a node, or update an existing one when `constraints`
    /// match. With `unique`, more than one constraint match is an error.
    pub fn add_node(
        &mut self,
        class: &str,
        props: Vec<(String, PropValue)>,
        constraints: Option<&NodePattern>,
        unique: bool,
    ) -> Result<AddOutcome, Error> {
        if let Some(pattern) = constraints {
            let matches = self.query_nodes(pattern)?;
            if unique && matches.len() > 1 {
                return Err(Error::Backend(format!(
                    "constraints matched {} existing nodes",
                    matches.len()
                )));
            }
            if let Some(existing) = matches.first() {
                let handle = existing.handle;
                self.stage_update(handle, &props, &[])?;
                return Ok(AddOutcome::Matched(handle));
            }
        }

        self.writable()?;
        let handle = self.next_node_handle();
        self.delta.nodes.insert(
            handle,
            Node {
                class: class.to_string(),
                props: props.into_iter().collect(),
            },
        );
        Ok(AddOutcome::Created(handle))
    }

    /// Create an edge between two visible nodes.
    pub fn add_edge(
        &mut self,
        class: &str,
        src: NodeHandle,
        dst: NodeHandle,
        props: Vec<(String, PropValue)>,
    ) -> Result<EdgeHandle, Error> {
        if self.node(src).is_none() {
            return Err(Error::UnknownHandle(src));
        }
        if self.node(dst).is_none() {
            return Err(Error::UnknownHandle(dst));
        }
        self.writable()?;
        let handle = self.next_edge_handle();
        self.delta.edges.insert(
            handle,
            Edge {
                class: class.to_string(),
                src,
                dst,
                props: props.into_iter().collect(),
            },
        );
        Ok(handle)
    }

    pub fn get_node(&self, handle: NodeHandle) -> Option<NodeRecord> {
        self.node(handle).map(|node| NodeRecord {
            handle,
            class: node.class.clone(),
            props: node.props.clone(),
        })
    }

    /// All nodes matching `pattern`, in handle (insertion) order.
    pub fn query_nodes(&self, pattern: &NodePattern) -> Result<Vec<NodeRecord>, Error> {
        let mut records = Vec::new();
        for (handle, node) in self.visible_nodes() {
            if let Some(class) = &pattern.class {
                if &node.class != class {
                    continue;
                }
            }
            if let Some(handles) = &pattern.handles {
                if !handles.contains(&handle) {
                    continue;
                }
            }
            if !pattern.predicates.iter().all(|p| p.matches(&node.props)) {
                continue;
            }
            if let Some(link) = &pattern.link {
                if !self.linked(handle, link) {
                    continue;
                }
            }
            records.push(NodeRecord {
                handle,
                class: node.class.clone(),
                props: node.props.clone(),
            });
        }
        if let Some(link) = &pattern.link {
            if link.unique && records.len() > 1 {
                return Err(Error::Backend(format!(
                    "unique link matched {} nodes",
                    records.len()
                )));
            }
        }
        Ok(records)
    }

    /// All edges matching `pattern`, in handle (insertion) order.
    pub fn query_edges(&self, pattern: &EdgePattern) -> Result<Vec<EdgeRecord>, Error> {
        let mut records = Vec::new();
        for (handle, edge) in self.visible_edges() {
            if let Some(class) = &pattern.class {
                if &edge.class != class {
                    continue;
                }
            }
            if let Some(src) = &pattern.src {
                if !src.contains(&edge.src) {
                    continue;
                }
            }
            if let Some(dst) = &pattern.dst {
                if !dst.contains(&edge.dst) {
                    continue;
                }
            }
            if !pattern.predicates.iter().all(|p| p.matches(&edge.props)) {
                continue;
            }
            records.push(EdgeRecord {
                handle,
                class: edge.class.clone(),
                src: edge.src,
                dst: edge.dst,
                props: edge.props.clone(),
            });
        }
        Ok(records)
    }

    fn stage_update(
        &mut self,
        handle: NodeHandle,
        set: &[(String, PropValue)],
        remove: &[String],
    ) -> Result<(), Error> {
        self.writable()?;
        let mut node = match self.node(handle) {
            Some(node) => node.clone(),
            None => return Err(Error::UnknownHandle(handle)),
        };
        for (key, value) in set {
            node.props.insert(key.clone(), value.clone());
        }
        for key in remove {
            node.props.remove(key);
        }
        self.delta.nodes.insert(handle, node);
        Ok(())
    }

    /// Apply property changes to every node matching `pattern`,
    /// returning how many were touched.
    pub fn update_nodes(
        &mut self,
        pattern: &NodePattern,
        set: &[(String, PropValue)],
        remove: &[String],
    ) -> Result<u64, Error> {
        let matches = self.query_nodes(pattern)?;
        for record in &matches {
            self.stage_update(record.handle, set, remove)?;
        }
        Ok(matches.len() as u64)
    }

    /// Delete every node matching `pattern`, along with incident edges.
    pub fn delete_nodes(&mut self, pattern: &NodePattern) -> Result<u64, Error> {
        let matches = self.query_nodes(pattern)?;
        let handles: Vec<NodeHandle> = matches.iter().map(|r| r.handle).collect();
        for handle in &handles {
            self.remove_node(*handle)?;
        }
        Ok(handles.len() as u64)
    }

    fn remove_node(&mut self, handle: NodeHandle) -> Result<(), Error> {
        self.writable()?;
        let incident: Vec<EdgeHandle> = self
            .visible_edges()
            .iter()
            .filter(|(_, e)| e.src == handle || e.dst == handle)
            .map(|(h, _)| *h)
            .collect();
        for edge in incident {
            self.delta.edges.remove(&edge);
            self.delta.removed_edges.insert(edge);
        }
        self.delta.nodes.remove(&handle);
        self.delta.removed_nodes.insert(handle);
        Ok(())
    }

    /// Sweep entities whose `_creation + _expiration` lies in the past.
    pub fn delete_expired(&mut self, now_epoch: i64) -> Result<u64, Error> {
        let expired: Vec<NodeHandle> = self
            .visible_nodes()
            .iter()
            .filter(|(_, node)| {
                match (node.props.get(CREATION_PROP), node.props.get(EXPIRATION_PROP)) {
                    (Some(PropValue::Int(created)), Some(PropValue::Int(ttl))) => {
                        created + ttl <= now_epoch
                    }
                    _ => false,
                }
            })
            .map(|(h, _)| *h)
            .collect();
        for handle in &expired {
            self.remove_node(*handle)?;
        }
        Ok(expired.len() as u64)
    }

    /// Apply the staged delta. No-op for read transactions.
    pub fn commit(self) -> Result<(), Error> {
        let GraphTx { guard, delta } = self;
        match guard {
            TxGuard::Read(_) => Ok(()),
            TxGuard::Write(mut state) => {
                for handle in &delta.removed_edges {
                    state.edges.remove(handle);
                }
                for handle in &delta.removed_nodes {
                    state.nodes.remove(handle);
                }
                state.nodes.extend(delta.nodes);
                state.edges.extend(delta.edges);
                if let Some(next) = delta.next_node {
                    state.next_node = next;
                }
                if let Some(next) = delta.next_edge {
                    state.next_edge = next;
                }
                Ok(())
            }
        }
    }

    /// Discard the staged delta.
    pub fn rollback(self) {
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Predicate, PredicateOp};

    fn string_prop(key: &str, value: &str) -> (String, PropValue) {
        (key.to_string(), PropValue::String(value.to_string()))
    }

    fn by_name(name: &str) -> NodePattern {
        NodePattern {
            predicates: vec![Predicate {
                key: "name".into(),
                op: PredicateOp::Eq,
                value: PropValue::String(name.into()),
            }],
            ..NodePattern::default()
        }
    }

    #[tokio::test]
    async fn committed_nodes_are_visible_to_later_transactions() {
        let db = GraphDb::in_memory();
        let mut tx = db.open_tx(1000, TxMode::Write).await.unwrap();
        tx.add_node("Person", vec![string_prop("name", "ada")], None, false)
            .unwrap();
        tx.commit().unwrap();

        let tx = db.open_tx(1000, TxMode::Read).await.unwrap();
        assert_eq!(tx.query_nodes(&by_name("ada")).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rolled_back_changes_vanish() {
        let db = GraphDb::in_memory();
        let mut tx = db.open_tx(1000, TxMode::Write).await.unwrap();
        tx.add_node("Person", vec![string_prop("name", "ada")], None, false)
            .unwrap();
        tx.rollback();

        let tx = db.open_tx(1000, TxMode::Read).await.unwrap();
        assert!(tx.query_nodes(&by_name("ada")).unwrap().is_empty());
    }

    #[tokio::test]
    async fn staged_nodes_are_visible_within_the_transaction() {
        let db = GraphDb::in_memory();
        let mut tx = db.open_tx(1000, TxMode::Write).await.unwrap();
        let a = tx
            .add_node("Person", vec![string_prop("name", "ada")], None, false)
            .unwrap()
            .handle();
        let b = tx
            .add_node("Person", vec![string_prop("name", "bob")], None, false)
            .unwrap()
            .handle();
        tx.add_edge("knows", a, b, Vec::new()).unwrap();
        assert_eq!(
            tx.query_nodes(&NodePattern {
                class: Some("Person".into()),
                ..NodePattern::default()
            })
            .unwrap()
            .len(),
            2
        );
        assert_eq!(tx.query_edges(&EdgePattern::default()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deleting_a_node_removes_incident_edges() {
        let db = GraphDb::in_memory();
        let mut tx = db.open_tx(1000, TxMode::Write).await.unwrap();
        let a = tx
            .add_node("Person", vec![string_prop("name", "ada")], None, false)
            .unwrap()
            .handle();
        let b = tx
            .add_node("Person", vec![string_prop("name", "bob")], None, false)
            .unwrap()
            .handle();
        tx.add_edge("knows", a, b, Vec::new()).unwrap();
        tx.commit().unwrap();

        let mut tx = db.open_tx(1000, TxMode::Write).await.unwrap();
        assert_eq!(tx.delete_nodes(&by_name("ada")).unwrap(), 1);
        assert!(tx.query_edges(&EdgePattern::default()).unwrap().is_empty());
        tx.commit().unwrap();
    }

    #[tokio::test]
    async fn write_lock_contention_times_out() {
        let db = GraphDb::in_memory();
        let _held = db.open_tx(1000, TxMode::Write).await.unwrap();
        match db.open_tx(50, TxMode::Write).await {
            Err(Error::Timeout) => {}
            other => panic!("expected timeout, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn read_transactions_reject_writes() {
        let db = GraphDb::in_memory();
        let mut tx = db.open_tx(1000, TxMode::Read).await.unwrap();
        match tx.add_node("Person", Vec::new(), None, false) {
            Err(Error::ReadOnly) => {}
            other => panic!("expected read-only error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn expiration_sweep_removes_elapsed_entities() {
        let db = GraphDb::in_memory();
        let mut tx = db.open_tx(1000, TxMode::Write).await.unwrap();
        tx.add_node(
            "Ephemeral",
            vec![
                (CREATION_PROP.to_string(), PropValue::Int(100)),
                (EXPIRATION_PROP.to_string(), PropValue::Int(10)),
            ],
            None,
            false,
        )
        .unwrap();
        tx.add_node(
            "Durable",
            vec![
                (CREATION_PROP.to_string(), PropValue::Int(100)),
                (EXPIRATION_PROP.to_string(), PropValue::Int(10_000)),
            ],
            None,
            false,
        )
        .unwrap();
        assert_eq!(tx.delete_expired(200).unwrap(), 1);
        assert_eq!(
            tx.query_nodes(&NodePattern::default()).unwrap()[0].class,
            "Durable"
        );
        tx.commit().unwrap();
    }
}
