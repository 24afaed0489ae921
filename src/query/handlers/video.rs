//! `AddVideo` and `FindVideo`.

use serde_json::Value;

use crate::backend::PropValue;
use crate::query::engine::{parse_properties, QueryTx};
use crate::query::{QueryError, RefBinding, RequestContext};
use crate::store::{ObjectFormat, ObjectStore};

use super::image::parse_ops;
use super::{
    command_ref, expiration_props, success, BLOB_PROP, CODEC_PROP, CONTAINER_PROP, VIDEO_CLASS,
};

const CODECS: &[&str] = &["xvid", "h264", "h263"];

pub fn add(
    qtx: &mut QueryTx,
    ctx: &mut RequestContext<'_>,
    body: &Value,
    store: &ObjectStore,
) -> Result<Value, QueryError> {
    let container = match body.get("container") {
        None => ObjectFormat::Mp4,
        Some(container) => {
            let name = container
                .as_str()
                .ok_or_else(|| QueryError::malformed("container must be a string"))?;
            ObjectFormat::parse_container(name)?
        }
    };
    let codec = match body.get("codec") {
        None => None,
        Some(codec) => {
            let name = codec
                .as_str()
                .ok_or_else(|| QueryError::malformed("codec must be a string"))?;
            if !CODECS.contains(&name) {
                return Err(QueryError::invalid_enum(format!(
                    "unknown codec {:?}",
                    name
                )));
            }
            Some(name.to_string())
        }
    };
    let ops = parse_ops(body)?;

    let handle = match body.get("from_server_file").and_then(Value::as_str) {
        Some(path) => store.put_file(std::path::Path::new(path), container)?,
        None => store.put(ctx.next_blob()?, container)?,
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
        CONTAINER_PROP.to_string(),
        PropValue::String(container.as_str().to_string()),
    ));
    if let Some(codec) = codec {
        props.push((CODEC_PROP.to_string(), PropValue::String(codec)));
    }
    if let Some(index_frames) = body.get("index_frames") {
        let flag = index_frames
            .as_bool()
            .ok_or_else(|| QueryError::malformed("index_frames must be a boolean"))?;
        props.push(("index_frames".to_string(), PropValue::Bool(flag)));
    }

    let outcome = qtx.add_node(VIDEO_CLASS, props, None, false)?;
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
        Some(VIDEO_CLASS),
        "entities",
        ops.as_deref(),
    )
}
