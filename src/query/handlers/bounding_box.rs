//! `AddBoundingBox`: a rectangle attached to an image entity.

use serde_json::Value;

use crate::backend::PropValue;
use crate::query::engine::{parse_properties, QueryTx};
use crate::query::{QueryError, RefBinding, RequestContext};

use super::{
    command_ref, expiration_props, success, BOUNDING_BOX_CLASS, BOUNDING_BOX_EDGE, IMAGE_CLASS,
};

pub fn add(
    qtx: &mut QueryTx,
    ctx: &mut RequestContext<'_>,
    body: &Value,
) -> Result<Value, QueryError> {
    let rectangle = body
        .get("rectangle")
        .and_then(Value::as_object)
        .ok_or_else(|| QueryError::malformed("AddBoundingBox requires a rectangle"))?;

    let mut corners = Vec::with_capacity(4);
    for key in ["x", "y", "w", "h"] {
        let value = rectangle.get(key).and_then(Value::as_f64).ok_or_else(|| {
            QueryError::malformed(format!("rectangle requires a numeric {}", key))
        })?;
        corners.push((key.to_string(), PropValue::Float(value)));
    }

    // An `image` reference attaches the box to an image added earlier in
    // this request.
    let image = match body.get("image") {
        None => None,
        Some(reference) => {
            let reference = reference
                .as_i64()
                .ok_or_else(|| QueryError::malformed("image must be an integer _ref"))?;
            let handle = ctx.resolve_single_node(reference)?;
            match qtx.get_node(handle) {
                Some(node) if node.class == IMAGE_CLASS => Some(handle),
                _ => return Err(QueryError::bad_reference(reference)),
            }
        }
    };

    let mut props = match body.get("properties") {
        Some(properties) => parse_properties(properties)?,
        None => Vec::new(),
    };
    props.extend(expiration_props(body)?);
    // The rectangle wins over user properties with the same names.
    props.extend(corners);

    let outcome = qtx.add_node(BOUNDING_BOX_CLASS, props, None, false)?;
    if let Some(image) = image {
        qtx.add_edge(BOUNDING_BOX_EDGE, image, outcome.handle(), Vec::new())?;
    }
    if let Some(reference) = command_ref(body)? {
        ctx.bind_ref(reference, RefBinding::Node(outcome.handle()))?;
    }
    Ok(success())
}
