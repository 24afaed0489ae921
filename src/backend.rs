//! The property-graph backend interface and its in-process
//! implementation.
//!
//! The query engine only depends on the types here plus the transaction
//! surface in [`graph`]: open, run typed operations, commit or roll
//! back. The bundled backend keeps the graph in memory with snapshot
//! persistence; a different backend can replace it behind the same
//! seam.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod graph;
pub mod pool;

pub use graph::{AddOutcome, GraphDb, GraphTx, TxMode};
pub use pool::BackendPool;

pub type NodeHandle = u64;
pub type EdgeHandle = u64;

#[derive(Debug, Error)]
pub enum Error {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("timed out opening transaction")]
    Timeout,
    #[error("write operation in a read-only transaction")]
    ReadOnly,
    #[error("unknown node handle {0}")]
    UnknownHandle(u64),
}

/// A typed property value as stored on nodes and edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// An instant with its original UTC offset preserved, so values
    /// round-trip exactly as they arrived.
    Date(DateTime<FixedOffset>),
}

impl PropValue {
    /// Order two values of compatible types; integers and floats compare
    /// numerically across the two representations.
    pub fn compare(&self, other: &PropValue) -> Option<Ordering> {
        use PropValue::*;
        match (self, other) {
            (Bool(a), Bool(b)) => Some(a.cmp(b)),
            (Int(a), Int(b)) => Some(a.cmp(b)),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Int(a), Float(b)) => (*a as f64).partial_cmp(b),
            (Float(a), Int(b)) => a.partial_cmp(&(*b as f64)),
            (String(a), String(b)) => Some(a.cmp(b)),
            (Date(a), Date(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            PropValue::Int(i) => Some(*i as f64),
            PropValue::Float(f) => Some(*f),
            _ => None,
        }
    }
}

/// A comparison against one property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl PredicateOp {
    pub fn parse(op: &str) -> Option<PredicateOp> {
        Some(match op {
            "==" => PredicateOp::Eq,
            "!=" => PredicateOp::Ne,
            "<" => PredicateOp::Lt,
            "<=" => PredicateOp::Le,
            ">" => PredicateOp::Gt,
            ">=" => PredicateOp::Ge,
            _ => return None,
        })
    }

    fn admits(self, ordering: Ordering) -> bool {
        match self {
            PredicateOp::Eq => ordering == Ordering::Equal,
            PredicateOp::Ne => ordering != Ordering::Equal,
            PredicateOp::Lt => ordering == Ordering::Less,
            PredicateOp::Le => ordering != Ordering::Greater,
            PredicateOp::Gt => ordering == Ordering::Greater,
            PredicateOp::Ge => ordering != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Predicate {
    pub key: String,
    pub op: PredicateOp,
    pub value: PropValue,
}

impl Predicate {
    /// A predicate over a missing or type-incompatible property never
    /// matches.
    pub fn matches(&self, props: &HashMap<String, PropValue>) -> bool {
        props
            .get(&self.key)
            .and_then(|actual| actual.compare(&self.value))
            .map(|ordering| self.op.admits(ordering))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDirection {
    Out,
    In,
    Any,
}

impl LinkDirection {
    pub fn parse(direction: &str) -> Option<LinkDirection> {
        Some(match direction {
            "out" => LinkDirection::Out,
            "in" => LinkDirection::In,
            "any" => LinkDirection::Any,
            _ => return None,
        })
    }
}

/// A traversal constraint: candidates must be connected to one of the
/// anchor nodes, optionally through edges of a given class. Directions
/// are relative to the anchors.
#[derive(Debug, Clone)]
pub struct LinkAnchor {
    pub nodes: Vec<NodeHandle>,
    pub direction: LinkDirection,
    pub class: Option<String>,
    pub unique: bool,
}

/// What to match when querying nodes. All parts AND together.
#[derive(Debug, Clone, Default)]
pub struct NodePattern {
    pub class: Option<String>,
    pub predicates: Vec<Predicate>,
    /// Restrict to an explicit handle set (from a bound `_ref`).
    pub handles: Option<Vec<NodeHandle>>,
    pub link: Option<LinkAnchor>,
}

/// What to match when querying edges.
#[derive(Debug, Clone, Default)]
pub struct EdgePattern {
    pub class: Option<String>,
    pub predicates: Vec<Predicate>,
    pub src: Option<Vec<NodeHandle>>,
    pub dst: Option<Vec<NodeHandle>>,
}

#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub handle: NodeHandle,
    pub class: String,
    pub props: HashMap<String, PropValue>,
}

#[derive(Debug, Clone)]
pub struct EdgeRecord {
    pub handle: EdgeHandle,
    pub class: String,
    pub src: NodeHandle,
    pub dst: NodeHandle,
    pub props: HashMap<String, PropValue>,
}
