//! `AddBlob` and `FindBlob`: untyped binary objects.

use serde_json::Value;

use crate::backend::PropValue;
use crate::query::engine::{parse_properties, QueryTx};
use crate::query::{QueryError, RefBinding, RequestContext};
use crate::store::{ObjectFormat, ObjectStore};

use super::{command_ref, expiration_props, success, BLOB_CLASS, BLOB_PROP};

pub fn add(
    qtx: &mut QueryTx,
    ctx: &mut RequestContext<'_>,
    body: &Value,
    store: &ObjectStore,
) -> Result<Value, QueryError> {
    let handle = store.put(ctx.next_blob()?, ObjectFormat::Bin)?;

    let mut props = match body.get("properties") {
        Some(properties) => parse_properties(properties)?,
        None => Vec::new(),
    };
    props.extend(expiration_props(body)?);
    props.push((BLOB_PROP.to_string(), PropValue::String(handle)));

    let outcome = qtx.add_node(BLOB_CLASS, props, None, false)?;
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
    super::entity::find(qtx, ctx, body, store, Some(BLOB_CLASS), "entities", None)
}
