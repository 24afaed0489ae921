//! `AddImage` and `FindImage`.

use serde_json::Value;

use crate::backend::PropValue;
use crate::query::engine::{parse_properties, QueryTx};
use crate::query::{QueryError, RefBinding, RequestContext};
use crate::store::{ObjectFormat, ObjectStore, Operation};

use super::{command_ref, expiration_props, success, BLOB_PROP, FORMAT_PROP, IMAGE_CLASS};

pub fn add(
    qtx: &mut QueryTx,
    ctx: &mut RequestContext<'_>,
    body: &Value,
    store: &ObjectStore,
) -> Result<Value, QueryError> {
    let format = match body.get("format") {
        None => ObjectFormat::Png,
        Some(format) => {
            let name = format
                .as_str()
                .ok_or_else(|| QueryError::malformed("format must be a string"))?;
            ObjectFormat::parse_image(name)?
        }
    };
    let ops = parse_ops(body)?;

    // `from_server_file` ingests a path already on the server instead of
    // consuming a blob.
    let handle = match body.get("from_server_file").and_then(Value::as_str) {
        Some(path) => store.put_file(std::path::Path::new(path), format)?,
        None => store.put(ctx.next_blob()?, format)?,
    };
    let handle = match &ops {
        Some(ops) => store.apply_ops(&handle, ops)?,
        None => handle,
    };

    let mut props = match body.get("properties") {
        Some(properties) => parse_properties(properties)?,
        None => Vec::new(),
    };
    props.extend(expiration_props(body)?);
    props.push((BLOB_PROP.to_string(), PropValue::String(handle)));
    props.push((
        FORMAT_PROP.to_string(),
        PropValue::String(format.as_str().to_string()),
    ));

    let outcome = qtx.add_node(IMAGE_CLASS, props, None, false)?;
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
    let ops = parse_ops(body)?;
    super::entity::find(
        qtx,
        ctx,
        body,
        store,
        Some(IMAGE_CLASS),
        "entities",
        ops.as_deref(),
    )
}

pub(crate) fn parse_ops(body: &Value) -> Result<Option<Vec<Operation>>, QueryError> {
    match body.get("operations") {
        None => Ok(None),
        Some(operations) => Ok(Some(Operation::parse_list(operations)?)),
    }
}
