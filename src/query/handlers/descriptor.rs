//! Descriptor sets and descriptors. Similarity search lives in the
//! external index engines; here a set is metadata plus membership
//! edges, and descriptors are fixed-size float vectors in the store.

use serde_json::Value;

use crate::backend::{NodePattern, Predicate, PredicateOp, PropValue};
use crate::query::engine::{parse_properties, QueryTx};
use crate::query::{ErrorKind, QueryError, RefBinding, RequestContext};
use crate::store::{ObjectFormat, ObjectStore};

use super::{
    command_ref, expiration_props, success, BLOB_PROP, DESCRIPTOR_CLASS, DESCRIPTOR_EDGE,
    DESCRIPTOR_SET_CLASS,
};

const METRICS: &[&str] = &["L2", "IP"];
const ENGINES: &[&str] = &[
    "TileDBDense",
    "TileDBSparse",
    "FaissFlat",
    "FaissIVFFlat",
    "Flinng",
];

pub fn add_set(
    qtx: &mut QueryTx,
    ctx: &mut RequestContext<'_>,
    body: &Value,
) -> Result<Value, QueryError> {
    let name = body
        .get("name")
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| QueryError::malformed("AddDescriptorSet requires a name"))?;
    let dimensions = body
        .get("dimensions")
        .and_then(Value::as_i64)
        .filter(|d| *d > 0)
        .ok_or_else(|| {
            QueryError::malformed("AddDescriptorSet requires dimensions > 0")
        })?;

    let metric = body.get("metric").and_then(Value::as_str).unwrap_or("L2");
    if !METRICS.contains(&metric) {
        return Err(QueryError::invalid_enum(format!(
            "unknown metric {:?}",
            metric
        )));
    }
    let engine = body
        .get("engine")
        .and_then(Value::as_str)
        .unwrap_or("FaissFlat");
    if !ENGINES.contains(&engine) {
        return Err(QueryError::invalid_enum(format!(
            "unknown engine {:?}",
            engine
        )));
    }

    let mut props = match body.get("properties") {
        Some(properties) => parse_properties(properties)?,
        None => Vec::new(),
    };
    props.extend(expiration_props(body)?);
    props.push(("name".to_string(), PropValue::String(name.to_string())));
    props.push(("dimensions".to_string(), PropValue::Int(dimensions)));
    props.push(("metric".to_string(), PropValue::String(metric.to_string())));
    props.push(("engine".to_string(), PropValue::String(engine.to_string())));

    if engine == "Flinng" {
        for key in ["flinng_num_rows", "flinng_cells_per_row"] {
            let value = body
                .get(key)
                .and_then(Value::as_i64)
                .filter(|v| *v > 0)
                .ok_or_else(|| {
                    QueryError::malformed(format!("Flinng requires a positive {}", key))
                })?;
            props.push((key.to_string(), PropValue::Int(value)));
        }
    }

    // Set names are unique.
    if !qtx.query_nodes(&set_by_name(name))?.is_empty() {
        return Err(QueryError::new(
            ErrorKind::BackendError,
            format!("Descriptor set {:?} already exists", name),
        ));
    }

    let outcome = qtx.add_node(DESCRIPTOR_SET_CLASS, props, None, false)?;
    if let Some(reference) = command_ref(body)? {
        ctx.bind_ref(reference, RefBinding::Node(outcome.handle()))?;
    }
    Ok(success())
}

pub fn add(
    qtx: &mut QueryTx,
    ctx: &mut RequestContext<'_>,
    body: &Value,
    store: &ObjectStore,
) -> Result<Value, QueryError> {
    let set = body
        .get("set")
        .and_then(Value::as_str)
        .filter(|set| !set.is_empty())
        .ok_or_else(|| QueryError::malformed("AddDescriptor requires a set"))?;

    let sets = qtx.query_nodes(&set_by_name(set))?;
    let set_node = sets.first().ok_or_else(|| {
        QueryError::new(
            ErrorKind::BackendError,
            format!("Descriptor set {:?} does not exist", set),
        )
    })?;
    let dimensions = match set_node.props.get("dimensions") {
        Some(PropValue::Int(d)) => *d as usize,
        _ => {
            return Err(QueryError::new(
                ErrorKind::BackendError,
                format!("Descriptor set {:?} has no dimensions", set),
            ))
        }
    };

    // One little-endian f32 per dimension.
    let blob = ctx.next_blob()?;
    if blob.len() != dimensions * 4 {
        return Err(QueryError::malformed(format!(
            "Descriptor blob is {} bytes; set {:?} requires {}",
            blob.len(),
            set,
            dimensions * 4
        )));
    }
    let handle = store.put(blob, ObjectFormat::Desc)?;

    let mut props = match body.get("properties") {
        Some(properties) => parse_properties(properties)?,
        None => Vec::new(),
    };
    props.extend(expiration_props(body)?);
    if let Some(label) = body.get("label") {
        let label = label
            .as_str()
            .ok_or_else(|| QueryError::malformed("label must be a string"))?;
        props.push(("label".to_string(), PropValue::String(label.to_string())));
    }
    props.push(("set".to_string(), PropValue::String(set.to_string())));
    props.push((BLOB_PROP.to_string(), PropValue::String(handle)));

    let set_handle = set_node.handle;
    let outcome = qtx.add_node(DESCRIPTOR_CLASS, props, None, false)?;
    qtx.add_edge(DESCRIPTOR_EDGE, set_handle, outcome.handle(), Vec::new())?;

    if let Some(reference) = command_ref(body)? {
        ctx.bind_ref(reference, RefBinding::Node(outcome.handle()))?;
    }
    Ok(success())
}

pub fn find(
    qtx: &mut QueryTx,
    ctx: &mut RequestContext<'_>,
    body: &Value,
    store: &ObjectStore,
) -> Result<Value, QueryError> {
    // A `set` member narrows the search without needing a constraint.
    if let Some(set) = body.get("set") {
        let set = set
            .as_str()
            .ok_or_else(|| QueryError::malformed("set must be a string"))?;
        let fragment = super::entity::find(
            qtx,
            ctx,
            &with_set_constraint(body, set)?,
            store,
            Some(DESCRIPTOR_CLASS),
            "entities",
            None,
        )?;
        return Ok(fragment);
    }
    super::entity::find(qtx, ctx, body, store, Some(DESCRIPTOR_CLASS), "entities", None)
}

pub fn find_set(
    qtx: &mut QueryTx,
    ctx: &mut RequestContext<'_>,
    body: &Value,
) -> Result<Value, QueryError> {
    let mut pattern = NodePattern {
        class: Some(DESCRIPTOR_SET_CLASS.to_string()),
        ..NodePattern::default()
    };
    if let Some(constraints) = body.get("constraints") {
        pattern.predicates = crate::query::engine::parse_constraints(constraints)?;
    }
    if let Some(set) = body.get("set") {
        let set = set
            .as_str()
            .ok_or_else(|| QueryError::malformed("set must be a string"))?;
        pattern.predicates.push(Predicate {
            key: "name".to_string(),
            op: PredicateOp::Eq,
            value: PropValue::String(set.to_string()),
        });
    }

    let records = qtx.query_nodes(&pattern)?;
    let spec = crate::query::engine::ResultSpec::parse(body)?;
    let projection = crate::query::engine::project_nodes(records, &spec, "entities");

    if let Some(reference) = command_ref(body)? {
        ctx.bind_ref(reference, RefBinding::Nodes(projection.all_handles.clone()))?;
    }
    Ok(projection.fragment)
}

fn set_by_name(name: &str) -> NodePattern {
    NodePattern {
        class: Some(DESCRIPTOR_SET_CLASS.to_string()),
        predicates: vec![Predicate {
            key: "name".to_string(),
            op: PredicateOp::Eq,
            value: PropValue::String(name.to_string()),
        }],
        ..NodePattern::default()
    }
}

/// Fold a top-level `set` member into the body's constraints so the
/// shared find path sees it.
fn with_set_constraint(body: &Value, set: &str) -> Result<Value, QueryError> {
    let mut body = body.clone();
    let object = body
        .as_object_mut()
        .ok_or_else(|| QueryError::malformed("Command body must be an object"))?;
    let constraints = object
        .entry("constraints")
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    let constraints = constraints
        .as_object_mut()
        .ok_or_else(|| QueryError::malformed("constraints must be an object"))?;
    constraints.insert(
        "set".to_string(),
        serde_json::json!(["==", set]),
    );
    Ok(body)
}
