//! Per-command handlers, dispatched on the single top-level key of each
//! command object.

use chrono::Utc;
use serde_json::{json, Value};

use crate::backend::graph::{CREATION_PROP, EXPIRATION_PROP};
use crate::backend::PropValue;
use crate::store::ObjectStore;

use super::engine::QueryTx;
use super::{QueryError, RequestContext};

pub mod blob;
pub mod bounding_box;
pub mod connection;
pub mod descriptor;
pub mod entity;
pub mod image;
pub mod video;

/// Entity classes the typed handlers create.
pub const IMAGE_CLASS: &str = "VD:IMG";
pub const VIDEO_CLASS: &str = "VD:VID";
pub const BLOB_CLASS: &str = "VD:BLOB";
pub const DESCRIPTOR_SET_CLASS: &str = "VD:DESCSET";
pub const DESCRIPTOR_CLASS: &str = "VD:DESC";
pub const BOUNDING_BOX_CLASS: &str = "VD:RECT";

/// Connection classes linking typed entities.
pub const DESCRIPTOR_EDGE: &str = "VD:DESCLINK";
pub const BOUNDING_BOX_EDGE: &str = "VD:RECTLINK";

/// Reserved properties on visual entities.
pub const BLOB_PROP: &str = "_blob";
pub const FORMAT_PROP: &str = "_format";
pub const CODEC_PROP: &str = "_codec";
pub const CONTAINER_PROP: &str = "_container";

const COMMANDS: &[&str] = &[
    "AddEntity",
    "AddConnection",
    "AddImage",
    "AddVideo",
    "AddDescriptorSet",
    "AddDescriptor",
    "AddBoundingBox",
    "AddBlob",
    "UpdateEntity",
    "UpdateConnection",
    "UpdateImage",
    "UpdateBlob",
    "FindEntity",
    "FindConnection",
    "FindImage",
    "FindVideo",
    "FindDescriptor",
    "FindDescriptorSet",
    "FindBlob",
];

pub fn is_supported(tag: &str) -> bool {
    COMMANDS.contains(&tag)
}

/// Route one command to its handler.
pub fn dispatch(
    tag: &str,
    qtx: &mut QueryTx,
    ctx: &mut RequestContext<'_>,
    body: &Value,
    store: &ObjectStore,
) -> Result<Value, QueryError> {
    if !body.is_object() {
        return Err(QueryError::malformed("Command body must be an object"));
    }
    match tag {
        "AddEntity" => entity::add(qtx, ctx, body),
        "UpdateEntity" => entity::update(qtx, ctx, body, None),
        "FindEntity" => entity::find(qtx, ctx, body, store, None, "entities", None),
        "AddConnection" => connection::add(qtx, ctx, body),
        "UpdateConnection" => not_supported(tag),
        "FindConnection" => connection::find(qtx, ctx, body),
        "AddImage" => image::add(qtx, ctx, body, store),
        "UpdateImage" => not_supported(tag),
        "FindImage" => image::find(qtx, ctx, body, store),
        "AddVideo" => video::add(qtx, ctx, body, store),
        "FindVideo" => video::find(qtx, ctx, body, store),
        "AddBlob" => blob::add(qtx, ctx, body, store),
        "UpdateBlob" => entity::update(qtx, ctx, body, Some(BLOB_CLASS)),
        "FindBlob" => blob::find(qtx, ctx, body, store),
        "AddDescriptorSet" => descriptor::add_set(qtx, ctx, body),
        "AddDescriptor" => descriptor::add(qtx, ctx, body, store),
        "FindDescriptor" => descriptor::find(qtx, ctx, body, store),
        "FindDescriptorSet" => descriptor::find_set(qtx, ctx, body),
        "AddBoundingBox" => bounding_box::add(qtx, ctx, body),
        _ => Err(QueryError::new(
            super::ErrorKind::UnknownCommand,
            "Command does not exist",
        )),
    }
}

/// Recognized commands whose contracts are not yet pinned down report a
/// clean failure instead of guessed semantics.
fn not_supported(tag: &str) -> Result<Value, QueryError> {
    Err(QueryError::malformed(format!("{} is not supported", tag)))
}

pub(crate) fn success() -> Value {
    json!({ "status": 0 })
}

/// The command's `class`, which must be a non-empty string.
pub(crate) fn required_class<'b>(body: &'b Value) -> Result<&'b str, QueryError> {
    body.get("class")
        .and_then(Value::as_str)
        .filter(|class| !class.is_empty())
        .ok_or_else(|| QueryError::malformed("Command requires a non-empty class"))
}

/// The command's `_ref`, if present; it must be an integer.
pub(crate) fn command_ref(body: &Value) -> Result<Option<i64>, QueryError> {
    match body.get("_ref") {
        None => Ok(None),
        Some(reference) => reference
            .as_i64()
            .map(Some)
            .ok_or_else(|| QueryError::malformed("_ref must be an integer")),
    }
}

/// A required integer reference field (`ref1`, `ref2`).
pub(crate) fn required_ref(body: &Value, key: &str) -> Result<i64, QueryError> {
    body.get(key)
        .and_then(Value::as_i64)
        .ok_or_else(|| QueryError::malformed(format!("Command requires an integer {}", key)))
}

/// Expiration stamps: `_expiration` in the body turns into the
/// `_expiration` lifetime plus a `_creation` timestamp, both seconds.
pub(crate) fn expiration_props(body: &Value) -> Result<Vec<(String, PropValue)>, QueryError> {
    match body.get("_expiration") {
        None => Ok(Vec::new()),
        Some(expiration) => {
            let seconds = expiration
                .as_i64()
                .filter(|s| *s >= 0)
                .ok_or_else(|| {
                    QueryError::malformed("_expiration must be a non-negative integer")
                })?;
            Ok(vec![
                (EXPIRATION_PROP.to_string(), PropValue::Int(seconds)),
                (
                    CREATION_PROP.to_string(),
                    PropValue::Int(Utc::now().timestamp()),
                ),
            ])
        }
    }
}
