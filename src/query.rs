//! The command dispatcher: parses a request's JSON array, routes each
//! command to its handler inside one backend transaction, and
//! aggregates the response array.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::backend::{self, BackendPool, EdgeHandle, GraphDb, NodeHandle, TxMode};
use crate::config::Config;
use crate::store::{ObjectStore, StoreError};
use crate::wire::Envelope;

pub mod engine;
pub mod handlers;

use engine::QueryTx;

/// The status code reported for every failure.
pub const GENERIC_ERROR: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadEnvelope,
    UnknownCommand,
    MalformedCommand,
    BadReference,
    BlobCountMismatch,
    InvalidEnum,
    BackendError,
    TransactionAborted,
    Timeout,
}

/// A handler-reported failure; the dispatcher maps it into the
/// command's response slot and aborts the transaction.
#[derive(Debug, Clone, Error)]
#[error("{info}")]
pub struct QueryError {
    pub kind: ErrorKind,
    pub info: String,
}

impl QueryError {
    pub fn new(kind: ErrorKind, info: impl Into<String>) -> Self {
        QueryError {
            kind,
            info: info.into(),
        }
    }

    pub fn malformed(info: impl Into<String>) -> Self {
        QueryError::new(ErrorKind::MalformedCommand, info)
    }

    pub fn invalid_enum(info: impl Into<String>) -> Self {
        QueryError::new(ErrorKind::InvalidEnum, info)
    }

    pub fn bad_reference(reference: i64) -> Self {
        QueryError::new(
            ErrorKind::BadReference,
            format!("Reference {} does not resolve", reference),
        )
    }
}

impl From<backend::Error> for QueryError {
    fn from(error: backend::Error) -> Self {
        match error {
            backend::Error::Timeout => QueryError::new(ErrorKind::Timeout, error.to_string()),
            other => QueryError::new(ErrorKind::BackendError, other.to_string()),
        }
    }
}

impl From<StoreError> for QueryError {
    fn from(error: StoreError) -> Self {
        match &error {
            StoreError::UnknownFormat(_) | StoreError::UnknownOperation(_) => {
                QueryError::invalid_enum(error.to_string())
            }
            StoreError::MalformedOperation(_) => QueryError::malformed(error.to_string()),
            _ => QueryError::new(ErrorKind::BackendError, error.to_string()),
        }
    }
}

/// What a `_ref` resolves to.
#[derive(Debug, Clone)]
pub enum RefBinding {
    Node(NodeHandle),
    Nodes(Vec<NodeHandle>),
    Edges(Vec<EdgeHandle>),
}

/// Per-request state: the `_ref` map, the blob cursor, and blobs staged
/// for the response. Never outlives its request.
pub struct RequestContext<'a> {
    blobs: &'a [Vec<u8>],
    cursor: usize,
    refs: HashMap<i64, RefBinding>,
    out_blobs: Vec<Vec<u8>>,
}

impl<'a> RequestContext<'a> {
    pub fn new(blobs: &'a [Vec<u8>]) -> Self {
        RequestContext {
            blobs,
            cursor: 0,
            refs: HashMap::new(),
            out_blobs: Vec::new(),
        }
    }

    /// The next positional blob; advancing past the end means the query
    /// names more blob-consuming commands than blobs were sent.
    pub fn next_blob(&mut self) -> Result<&'a [u8], QueryError> {
        match self.blobs.get(self.cursor) {
            Some(blob) => {
                self.cursor += 1;
                Ok(blob)
            }
            None => Err(QueryError::new(
                ErrorKind::BlobCountMismatch,
                "Not enough blobs for the query",
            )),
        }
    }

    pub fn blobs_consumed(&self) -> bool {
        self.cursor == self.blobs.len()
    }

    pub fn bind_ref(&mut self, reference: i64, binding: RefBinding) -> Result<(), QueryError> {
        if self.refs.insert(reference, binding).is_some() {
            return Err(QueryError::malformed(format!(
                "Duplicate _ref value {}",
                reference
            )));
        }
        Ok(())
    }

    pub fn resolve(&self, reference: i64) -> Result<&RefBinding, QueryError> {
        self.refs
            .get(&reference)
            .ok_or_else(|| QueryError::bad_reference(reference))
    }

    /// Resolve a reference that must name exactly one node.
    pub fn resolve_single_node(&self, reference: i64) -> Result<NodeHandle, QueryError> {
        match self.resolve(reference)? {
            RefBinding::Node(handle) => Ok(*handle),
            RefBinding::Nodes(handles) if handles.len() == 1 => Ok(handles[0]),
            _ => Err(QueryError::bad_reference(reference)),
        }
    }

    /// Resolve a reference to the set of nodes it names.
    pub fn resolve_node_set(&self, reference: i64) -> Result<Vec<NodeHandle>, QueryError> {
        match self.resolve(reference)? {
            RefBinding::Node(handle) => Ok(vec![*handle]),
            RefBinding::Nodes(handles) => Ok(handles.clone()),
            RefBinding::Edges(_) => Err(QueryError::bad_reference(reference)),
        }
    }

    pub fn push_blob(&mut self, bytes: Vec<u8>) {
        self.out_blobs.push(bytes);
    }

    pub fn into_blobs(self) -> Vec<Vec<u8>> {
        self.out_blobs
    }
}

/// Executes whole requests against the backend pool and object store.
pub struct QueryHandler {
    pool: BackendPool,
    db: GraphDb,
    store: Arc<ObjectStore>,
    tx_timeout_ms: u64,
}

impl QueryHandler {
    pub fn new(db: GraphDb, store: ObjectStore, config: &Config) -> Self {
        QueryHandler {
            pool: BackendPool::new(db.clone(), config.backend_pool_size),
            db,
            store: Arc::new(store),
            tx_timeout_ms: config.transaction_timeout_ms,
        }
    }

    pub fn db(&self) -> &GraphDb {
        &self.db
    }

    pub fn pool(&self) -> &BackendPool {
        &self.pool
    }

    /// Execute one request envelope and produce its response envelope.
    ///
    /// The response array always has the request's length; command `i`
    /// answers under the same top-level key as request `i` (or as the
    /// generic error object for unrecognized commands).
    pub async fn process(&self, request: Envelope) -> Envelope {
        let parsed: Value = match serde_json::from_str(&request.json) {
            Ok(value) => value,
            Err(e) => return error_envelope(format!("Error parsing the query: {}", e)),
        };
        let commands = match parsed {
            Value::Array(commands) => commands,
            _ => return error_envelope("Query must be a JSON array of commands"),
        };
        if commands.is_empty() {
            return Envelope::new("[]", Vec::new());
        }

        let tags: Vec<Option<(&str, &Value)>> =
            commands.iter().map(single_command_key).collect();
        let read_only = tags
            .iter()
            .all(|tag| matches!(tag, Some((name, _)) if name.starts_with("Find")));
        let mode = if read_only { TxMode::Read } else { TxMode::Write };

        let conn = match self.pool.get_conn().await {
            Ok(conn) => conn,
            Err(e) => return failure_envelope(&tags, &QueryError::from(e)),
        };
        let tx = match conn.open_tx(self.tx_timeout_ms, mode).await {
            Ok(tx) => tx,
            Err(e) => return failure_envelope(&tags, &QueryError::from(e)),
        };

        let mut qtx = QueryTx::new(tx);
        let mut ctx = RequestContext::new(&request.blobs);
        let mut responses = vec![Value::Null; commands.len()];
        let mut failed = false;

        for (i, _) in commands.iter().enumerate() {
            let (tag, body) = match tags[i] {
                Some((tag, body)) if handlers::is_supported(tag) => (tag, body),
                _ => {
                    responses[i] = unknown_command();
                    continue;
                }
            };

            match handlers::dispatch(tag, &mut qtx, &mut ctx, body, &self.store) {
                Ok(fragment) => responses[i] = wrap(tag, fragment),
                Err(error) => {
                    warn!("{} failed: {}", tag, error);
                    responses[i] = wrap(tag, error_object(&error.info));
                    for slot in responses.iter_mut().skip(i + 1) {
                        *slot = error_object("Transaction aborted");
                    }
                    failed = true;
                    break;
                }
            }
        }

        // Trailing blobs nobody consumed fail the whole request.
        if !failed && !ctx.blobs_consumed() {
            warn!(
                "request left {} of {} blobs unconsumed",
                request.blobs.len() - ctx.cursor,
                request.blobs.len()
            );
            for (i, slot) in responses.iter_mut().enumerate() {
                *slot = match tags[i] {
                    Some((tag, _)) if handlers::is_supported(tag) => {
                        wrap(tag, error_object("Blob count mismatch"))
                    }
                    _ => unknown_command(),
                };
            }
            failed = true;
        }

        let mut out_blobs = Vec::new();
        if failed {
            qtx.rollback();
        } else {
            match qtx.commit() {
                Ok(()) => out_blobs = ctx.into_blobs(),
                Err(error) => {
                    for slot in responses.iter_mut() {
                        *slot = error_object(&format!("Commit failed: {}", error.info));
                    }
                }
            }
        }

        let json = serde_json::to_string(&responses)
            .unwrap_or_else(|_| r#"[{"status":-1,"info":"Response serialization failed"}]"#.into());
        Envelope::new(json, out_blobs)
    }

    /// Delete every entity whose `_expiration` has elapsed, returning
    /// how many were removed. Connections to deleted entities go with
    /// them.
    pub async fn sweep_expired(&self) -> Result<u64, QueryError> {
        let conn = self.pool.get_conn().await?;
        let mut tx = conn.open_tx(self.tx_timeout_ms, TxMode::Write).await?;
        let removed = tx.delete_expired(chrono::Utc::now().timestamp())?;
        tx.commit()?;
        Ok(removed)
    }
}

/// A command must be an object with exactly one top-level key.
fn single_command_key(value: &Value) -> Option<(&str, &Value)> {
    let object = value.as_object()?;
    if object.len() != 1 {
        return None;
    }
    object.iter().next().map(|(k, v)| (k.as_str(), v))
}

fn wrap(tag: &str, fragment: Value) -> Value {
    let mut object = Map::new();
    object.insert(tag.to_string(), fragment);
    Value::Object(object)
}

fn error_object(info: &str) -> Value {
    json!({ "status": GENERIC_ERROR, "info": info })
}

fn unknown_command() -> Value {
    error_object("Command does not exist")
}

/// A failure before any handler ran (envelope-level).
fn error_envelope(info: impl AsRef<str>) -> Envelope {
    let json = serde_json::to_string(&vec![error_object(info.as_ref())])
        .expect("error responses must serialize");
    Envelope::new(json, Vec::new())
}

/// A failure after parsing but before dispatch (pool or transaction
/// open): every slot reports it, named where the command was known.
fn failure_envelope(tags: &[Option<(&str, &Value)>], error: &QueryError) -> Envelope {
    let responses: Vec<Value> = tags
        .iter()
        .map(|tag| match tag {
            Some((tag, _)) if handlers::is_supported(tag) => {
                wrap(tag, error_object(&error.info))
            }
            _ => unknown_command(),
        })
        .collect();
    let json =
        serde_json::to_string(&responses).expect("error responses must serialize");
    Envelope::new(json, Vec::new())
}
