//! `AddConnection` and `FindConnection`.

use serde_json::Value;

use crate::backend::EdgePattern;
use crate::query::engine::{
    parse_constraints, parse_properties, project_edges, QueryTx, ResultSpec,
};
use crate::query::{QueryError, RefBinding, RequestContext};

use super::{command_ref, required_class, required_ref, success};

pub fn add(
    qtx: &mut QueryTx,
    ctx: &mut RequestContext<'_>,
    body: &Value,
) -> Result<Value, QueryError> {
    let class = required_class(body)?;
    let src = ctx.resolve_single_node(required_ref(body, "ref1")?)?;
    let dst = ctx.resolve_single_node(required_ref(body, "ref2")?)?;

    let props = match body.get("properties") {
        Some(properties) => parse_properties(properties)?,
        None => Vec::new(),
    };

    let edge = qtx.add_edge(class, src, dst, props)?;
    if let Some(reference) = command_ref(body)? {
        ctx.bind_ref(reference, RefBinding::Edges(vec![edge]))?;
    }
    Ok(success())
}

pub fn find(
    qtx: &mut QueryTx,
    ctx: &mut RequestContext<'_>,
    body: &Value,
) -> Result<Value, QueryError> {
    let mut pattern = EdgePattern {
        class: body
            .get("class")
            .and_then(Value::as_str)
            .map(String::from),
        ..EdgePattern::default()
    };
    if let Some(constraints) = body.get("constraints") {
        pattern.predicates = parse_constraints(constraints)?;
    }
    // `ref1`/`ref2` anchor the endpoints to previously bound node sets.
    if let Some(reference) = body.get("ref1").and_then(Value::as_i64) {
        pattern.src = Some(ctx.resolve_node_set(reference)?);
    }
    if let Some(reference) = body.get("ref2").and_then(Value::as_i64) {
        pattern.dst = Some(ctx.resolve_node_set(reference)?);
    }

    let records = qtx.query_edges(&pattern)?;
    let spec = ResultSpec::parse(body)?;

    if let Some(reference) = command_ref(body)? {
        let handles = records.iter().map(|r| r.handle).collect();
        ctx.bind_ref(reference, RefBinding::Edges(handles))?;
    }

    Ok(project_edges(records, &spec))
}
