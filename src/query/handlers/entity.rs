//! `AddEntity`, `UpdateEntity` and the shared find path every typed
//! find command builds on.

use serde_json::{json, Value};

use crate::backend::{NodePattern, PropValue};
use crate::query::engine::{
    parse_constraints, parse_link, parse_properties, project_nodes, QueryTx, ResultSpec,
};
use crate::query::{QueryError, RefBinding, RequestContext};
use crate::store::{ObjectStore, Operation};

use super::{command_ref, expiration_props, required_class, success, BLOB_PROP};

pub fn add(
    qtx: &mut QueryTx,
    ctx: &mut RequestContext<'_>,
    body: &Value,
) -> Result<Value, QueryError> {
    let class = required_class(body)?;

    let mut props = match body.get("properties") {
        Some(properties) => parse_properties(properties)?,
        None => Vec::new(),
    };
    props.extend(expiration_props(body)?);

    let constraints = match body.get("constraints") {
        Some(constraints) => Some(NodePattern {
            class: Some(class.to_string()),
            predicates: parse_constraints(constraints)?,
            ..NodePattern::default()
        }),
        None => None,
    };
    let unique = body.get("unique").and_then(Value::as_bool).unwrap_or(false);

    let outcome = qtx.add_node(class, props, constraints.as_ref(), unique)?;
    if let Some(reference) = command_ref(body)? {
        ctx.bind_ref(reference, RefBinding::Node(outcome.handle()))?;
    }

    Ok(match outcome {
        crate::backend::AddOutcome::Created(_) => success(),
        crate::backend::AddOutcome::Matched(_) => {
            json!({ "status": 0, "info": "Existing entity matched" })
        }
    })
}

/// Shared by `UpdateEntity` (any class) and `UpdateBlob` (class pinned
/// by the dispatcher).
pub fn update(
    qtx: &mut QueryTx,
    ctx: &mut RequestContext<'_>,
    body: &Value,
    forced_class: Option<&str>,
) -> Result<Value, QueryError> {
    let pattern = match_pattern(body, ctx, forced_class)?;

    let set = match body.get("properties") {
        Some(properties) => parse_properties(properties)?,
        None => Vec::new(),
    };
    let remove = match body.get("remove_props") {
        None => Vec::new(),
        Some(list) => list
            .as_array()
            .ok_or_else(|| QueryError::malformed("remove_props must be an array"))?
            .iter()
            .map(|name| {
                name.as_str()
                    .map(String::from)
                    .ok_or_else(|| QueryError::malformed("remove_props entries must be strings"))
            })
            .collect::<Result<Vec<String>, QueryError>>()?,
    };

    let count = qtx.update_nodes(&pattern, &set, &remove)?;
    Ok(json!({ "status": 0, "count": count }))
}

/// Shared find path: match, optionally bind `_ref`, project, and emit
/// blobs for visual matches. `ops` is the query-time pipeline of the
/// visual find commands.
pub fn find(
    qtx: &mut QueryTx,
    ctx: &mut RequestContext<'_>,
    body: &Value,
    store: &ObjectStore,
    forced_class: Option<&str>,
    array_name: &str,
    ops: Option<&[Operation]>,
) -> Result<Value, QueryError> {
    let mut pattern = match_pattern(body, ctx, forced_class)?;
    pattern.link = parse_link(body, ctx)?;

    let records = qtx.query_nodes(&pattern)?;
    if body.get("unique").and_then(Value::as_bool).unwrap_or(false) && records.len() > 1 {
        return Err(QueryError::new(
            crate::query::ErrorKind::BackendError,
            format!("unique condition matched {} entities", records.len()),
        ));
    }

    let spec = ResultSpec::parse(body)?;
    let projection = project_nodes(records, &spec, array_name);

    if let Some(reference) = command_ref(body)? {
        ctx.bind_ref(reference, RefBinding::Nodes(projection.all_handles.clone()))?;
    }

    if spec.blob {
        // Matches that are visual objects append their bytes in match
        // order; plain entities are skipped.
        for record in &projection.selected {
            if let Some(PropValue::String(handle)) = record.props.get(BLOB_PROP) {
                let handle = match ops {
                    Some(ops) => store.apply_ops(handle, ops)?,
                    None => handle.clone(),
                };
                ctx.push_blob(store.get(&handle)?);
            }
        }
    }

    Ok(projection.fragment)
}

/// The node pattern a find/update command matches: class, constraints,
/// and an optional `_ref` restriction to a previously bound set.
fn match_pattern(
    body: &Value,
    ctx: &RequestContext<'_>,
    forced_class: Option<&str>,
) -> Result<NodePattern, QueryError> {
    let class = match forced_class {
        Some(class) => Some(class.to_string()),
        None => body
            .get("class")
            .and_then(Value::as_str)
            .map(String::from),
    };
    let predicates = match body.get("constraints") {
        Some(constraints) => parse_constraints(constraints)?,
        None => Vec::new(),
    };
    // A `_ref` on an update restricts it to a set bound earlier. On a
    // find it declares a binding instead, handled by the caller, so only
    // consult it here for updates via `ref` field.
    let handles = match body.get("ref") {
        None => None,
        Some(reference) => {
            let reference = reference
                .as_i64()
                .ok_or_else(|| QueryError::malformed("ref must be an integer"))?;
            Some(ctx.resolve_node_set(reference)?)
        }
    };

    Ok(NodePattern {
        class,
        predicates,
        handles,
        link: None,
    })
}
