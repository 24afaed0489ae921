//! The query-transaction engine: wraps one backend transaction, records
//! per-command backend responses in groups, and owns the translation
//! between protocol JSON and backend types.

use std::cmp::Ordering;

use chrono::DateTime;
use serde_json::{json, Map, Value};

use crate::backend::{
    AddOutcome, EdgeHandle, EdgePattern, EdgeRecord, GraphTx, LinkAnchor, LinkDirection,
    NodeHandle, NodePattern, NodeRecord, Predicate, PredicateOp, PropValue,
};

use super::{QueryError, RequestContext};

/// Summary of one backend operation, kept per command group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendResponse {
    NodeAdded(NodeHandle),
    NodeMatched(NodeHandle),
    EdgeAdded(EdgeHandle),
    NodesFound(u64),
    EdgesFound(u64),
    Updated(u64),
    Deleted(u64),
}

/// One request's transaction. Commands run in a single group by
/// default; handlers that stage separate sub-transactions may open new
/// groups with [`add_group`](QueryTx::add_group).
pub struct QueryTx {
    tx: GraphTx,
    groups: Vec<Vec<BackendResponse>>,
    current_group: usize,
}

impl QueryTx {
    pub fn new(tx: GraphTx) -> Self {
        QueryTx {
            tx,
            groups: vec![Vec::new()],
            current_group: 0,
        }
    }

    pub fn add_group(&mut self) -> usize {
        self.groups.push(Vec::new());
        self.current_group = self.groups.len() - 1;
        self.current_group
    }

    pub fn current_group(&self) -> usize {
        self.current_group
    }

    pub fn responses(&self) -> &[Vec<BackendResponse>] {
        &self.groups
    }

    fn record(&mut self, response: BackendResponse) {
        self.groups[self.current_group].push(response);
    }

    pub fn add_node(
        &mut self,
        class: &str,
        props: Vec<(String, PropValue)>,
        constraints: Option<&NodePattern>,
        unique: bool,
    ) -> Result<AddOutcome, QueryError> {
        let outcome = self.tx.add_node(class, props, constraints, unique)?;
        self.record(match outcome {
            AddOutcome::Created(h) => BackendResponse::NodeAdded(h),
            AddOutcome::Matched(h) => BackendResponse::NodeMatched(h),
        });
        Ok(outcome)
    }

    pub fn add_edge(
        &mut self,
        class: &str,
        src: NodeHandle,
        dst: NodeHandle,
        props: Vec<(String, PropValue)>,
    ) -> Result<EdgeHandle, QueryError> {
        let handle = self.tx.add_edge(class, src, dst, props)?;
        self.record(BackendResponse::EdgeAdded(handle));
        Ok(handle)
    }

    pub fn get_node(&self, handle: NodeHandle) -> Option<NodeRecord> {
        self.tx.get_node(handle)
    }

    pub fn query_nodes(&mut self, pattern: &NodePattern) -> Result<Vec<NodeRecord>, QueryError> {
        let records = self.tx.query_nodes(pattern)?;
        self.record(BackendResponse::NodesFound(records.len() as u64));
        Ok(records)
    }

    pub fn query_edges(&mut self, pattern: &EdgePattern) -> Result<Vec<EdgeRecord>, QueryError> {
        let records = self.tx.query_edges(pattern)?;
        self.record(BackendResponse::EdgesFound(records.len() as u64));
        Ok(records)
    }

    pub fn update_nodes(
        &mut self,
        pattern: &NodePattern,
        set: &[(String, PropValue)],
        remove: &[String],
    ) -> Result<u64, QueryError> {
        let count = self.tx.update_nodes(pattern, set, remove)?;
        self.record(BackendResponse::Updated(count));
        Ok(count)
    }

    pub fn commit(self) -> Result<(), QueryError> {
        Ok(self.tx.commit()?)
    }

    pub fn rollback(self) {
        self.tx.rollback();
    }
}

/// Translate a JSON property value into a typed one.
///
/// Strings are coerced: a `date:` prefix routes to the date type,
/// `true`/`false` (case-insensitive) become booleans, integer-parseable
/// text becomes an integer, float-parseable text a float, and anything
/// else stays a string. `{"_date": "<RFC 3339>"}` is the explicit date
/// form.
pub fn prop_value(value: &Value) -> Result<PropValue, QueryError> {
    match value {
        Value::Bool(b) => Ok(PropValue::Bool(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(PropValue::Int(i))
            } else {
                n.as_f64()
                    .map(PropValue::Float)
                    .ok_or_else(|| QueryError::malformed(format!("Unrepresentable number {}", n)))
            }
        }
        Value::String(s) => Ok(coerce_string(s)?),
        Value::Object(object) => match object.get("_date").and_then(Value::as_str) {
            Some(date) if object.len() == 1 => parse_date(date),
            _ => Err(QueryError::malformed(
                "Objects are not valid property values (except {\"_date\": ...})",
            )),
        },
        _ => Err(QueryError::malformed(format!(
            "Unsupported property value {}",
            value
        ))),
    }
}

fn coerce_string(s: &str) -> Result<PropValue, QueryError> {
    if let Some(date) = s.strip_prefix("date:") {
        return parse_date(date);
    }
    if s.eq_ignore_ascii_case("true") {
        return Ok(PropValue::Bool(true));
    }
    if s.eq_ignore_ascii_case("false") {
        return Ok(PropValue::Bool(false));
    }
    if let Ok(i) = s.parse::<i64>() {
        return Ok(PropValue::Int(i));
    }
    if let Ok(f) = s.parse::<f64>() {
        return Ok(PropValue::Float(f));
    }
    Ok(PropValue::String(s.to_string()))
}

fn parse_date(date: &str) -> Result<PropValue, QueryError> {
    DateTime::parse_from_rfc3339(date)
        .map(PropValue::Date)
        .map_err(|e| QueryError::malformed(format!("Bad date {:?}: {}", date, e)))
}

/// Emit a typed value back as protocol JSON. Dates keep their original
/// offset.
pub fn prop_to_json(value: &PropValue) -> Value {
    match value {
        PropValue::Bool(b) => json!(b),
        PropValue::Int(i) => json!(i),
        PropValue::Float(f) => json!(f),
        PropValue::String(s) => json!(s),
        PropValue::Date(d) => json!(d.to_rfc3339()),
    }
}

/// Parse a command's `properties` object.
pub fn parse_properties(value: &Value) -> Result<Vec<(String, PropValue)>, QueryError> {
    let object = value
        .as_object()
        .ok_or_else(|| QueryError::malformed("properties must be an object"))?;
    object
        .iter()
        .map(|(key, value)| Ok((key.clone(), prop_value(value)?)))
        .collect()
}

/// Parse a command's `constraints` object into a predicate conjunction.
///
/// Each property maps to `[op, value, op, value, ...]`; repeated pairs
/// on the same property AND together.
pub fn parse_constraints(value: &Value) -> Result<Vec<Predicate>, QueryError> {
    let object = value
        .as_object()
        .ok_or_else(|| QueryError::malformed("constraints must be an object"))?;

    let mut predicates = Vec::new();
    for (key, spec) in object {
        let parts = spec.as_array().ok_or_else(|| {
            QueryError::malformed(format!("constraint on {:?} must be an array", key))
        })?;
        if parts.is_empty() || parts.len() % 2 != 0 {
            return Err(QueryError::malformed(format!(
                "constraint on {:?} must be [op, value] pairs",
                key
            )));
        }
        for pair in parts.chunks(2) {
            let op = pair[0]
                .as_str()
                .and_then(PredicateOp::parse)
                .ok_or_else(|| {
                    QueryError::malformed(format!("bad constraint operator {}", pair[0]))
                })?;
            predicates.push(Predicate {
                key: key.clone(),
                op,
                value: prop_value(&pair[1])?,
            });
        }
    }
    Ok(predicates)
}

/// Parse a find command's `link`, resolving the anchored reference.
pub fn parse_link(
    body: &Value,
    ctx: &RequestContext<'_>,
) -> Result<Option<LinkAnchor>, QueryError> {
    let link = match body.get("link") {
        None => return Ok(None),
        Some(link) => link
            .as_object()
            .ok_or_else(|| QueryError::malformed("link must be an object"))?,
    };

    let reference = link
        .get("ref")
        .and_then(Value::as_i64)
        .ok_or_else(|| QueryError::malformed("link requires an integer ref"))?;
    let nodes = ctx.resolve_node_set(reference)?;

    let direction = match link.get("direction") {
        None => LinkDirection::Any,
        Some(direction) => direction
            .as_str()
            .and_then(LinkDirection::parse)
            .ok_or_else(|| {
                QueryError::invalid_enum(format!("bad link direction {}", direction))
            })?,
    };

    Ok(Some(LinkAnchor {
        nodes,
        direction,
        class: link.get("class").and_then(Value::as_str).map(String::from),
        unique: link.get("unique").and_then(Value::as_bool).unwrap_or(false),
    }))
}

/// A find command's `results` projection.
#[derive(Debug, Clone, Default)]
pub struct ResultSpec {
    pub list: Vec<String>,
    pub blob: bool,
    pub count: bool,
    pub sum: Option<String>,
    pub average: Option<String>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub sort: Option<String>,
}

impl ResultSpec {
    /// Parse the `results` member of a find command body.
    pub fn parse(body: &Value) -> Result<ResultSpec, QueryError> {
        let results = match body.get("results") {
            None => return Ok(ResultSpec::default()),
            Some(results) => results
                .as_object()
                .ok_or_else(|| QueryError::malformed("results must be an object"))?,
        };

        let mut spec = ResultSpec::default();
        if let Some(list) = results.get("list") {
            let names = list
                .as_array()
                .ok_or_else(|| QueryError::malformed("results.list must be an array"))?;
            for name in names {
                spec.list.push(
                    name.as_str()
                        .ok_or_else(|| {
                            QueryError::malformed("results.list entries must be strings")
                        })?
                        .to_string(),
                );
            }
        }
        spec.blob = results.get("blob").and_then(Value::as_bool).unwrap_or(false);
        // Presence alone requests the aggregation; the original protocol
        // sends "count": "".
        spec.count = results.contains_key("count");
        spec.sum = results.get("sum").and_then(Value::as_str).map(String::from);
        spec.average = results
            .get("average")
            .and_then(Value::as_str)
            .map(String::from);
        spec.limit = results
            .get("limit")
            .and_then(Value::as_u64)
            .map(|l| l as usize);
        spec.offset = results
            .get("offset")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;
        spec.sort = results.get("sort").and_then(Value::as_str).map(String::from);
        Ok(spec)
    }
}

/// A projected find result: the JSON fragment plus the records that
/// made it into the listing (post sort/offset/limit, in match order).
pub struct Projection {
    pub fragment: Value,
    pub selected: Vec<NodeRecord>,
    pub all_handles: Vec<NodeHandle>,
}

/// Project matched nodes under `array_name` (`entities` or a per-type
/// analog). Requested properties that are absent project as the string
/// `"Missing property"`.
pub fn project_nodes(
    mut records: Vec<NodeRecord>,
    spec: &ResultSpec,
    array_name: &str,
) -> Projection {
    if let Some(key) = &spec.sort {
        records.sort_by(|a, b| compare_props(a.props.get(key), b.props.get(key)));
    }
    let all_handles: Vec<NodeHandle> = records.iter().map(|r| r.handle).collect();
    let total = records.len();

    let mut fragment = aggregate(
        records.iter().map(|r| &r.props),
        total,
        spec,
    );

    let selected = select(records, spec);
    fragment.insert("returned".to_string(), json!(selected.len()));
    if !spec.list.is_empty() {
        let listed: Vec<Value> = selected.iter().map(|r| list_props(&r.props, spec)).collect();
        fragment.insert(array_name.to_string(), Value::Array(listed));
    }

    Projection {
        fragment: Value::Object(fragment),
        selected,
        all_handles,
    }
}

/// Project matched edges under `connections`.
pub fn project_edges(mut records: Vec<EdgeRecord>, spec: &ResultSpec) -> Value {
    if let Some(key) = &spec.sort {
        records.sort_by(|a, b| compare_props(a.props.get(key), b.props.get(key)));
    }
    let total = records.len();

    let mut fragment = aggregate(
        records.iter().map(|r| &r.props),
        total,
        spec,
    );

    let selected = select(records, spec);
    fragment.insert("returned".to_string(), json!(selected.len()));
    if !spec.list.is_empty() {
        let listed: Vec<Value> = selected.iter().map(|r| list_props(&r.props, spec)).collect();
        fragment.insert("connections".to_string(), Value::Array(listed));
    }
    Value::Object(fragment)
}

fn select<T>(records: Vec<T>, spec: &ResultSpec) -> Vec<T> {
    let total = records.len();
    let offset = spec.offset.min(total);
    let end = spec
        .limit
        .map(|limit| (offset + limit).min(total))
        .unwrap_or(total);
    records
        .into_iter()
        .skip(offset)
        .take(end - offset)
        .collect()
}

fn aggregate<'a>(
    props: impl Iterator<Item = &'a std::collections::HashMap<String, PropValue>> + Clone,
    total: usize,
    spec: &ResultSpec,
) -> Map<String, Value> {
    let mut fragment = Map::new();
    fragment.insert("status".to_string(), json!(0));
    if spec.count {
        fragment.insert("count".to_string(), json!(total));
    }
    if let Some(key) = &spec.sum {
        fragment.insert("sum".to_string(), numeric_fold(props.clone(), key).0);
    }
    if let Some(key) = &spec.average {
        let (_, sum, n) = numeric_fold_parts(props, key);
        let average = if n == 0 { 0.0 } else { sum / n as f64 };
        fragment.insert("average".to_string(), json!(average));
    }
    fragment
}

fn numeric_fold<'a>(
    props: impl Iterator<Item = &'a std::collections::HashMap<String, PropValue>>,
    key: &str,
) -> (Value, usize) {
    let (value, _, n) = numeric_fold_parts(props, key);
    (value, n)
}

fn numeric_fold_parts<'a>(
    props: impl Iterator<Item = &'a std::collections::HashMap<String, PropValue>>,
    key: &str,
) -> (Value, f64, usize) {
    let mut sum = 0.0;
    let mut all_int = true;
    let mut int_sum: i64 = 0;
    let mut n = 0;
    for map in props {
        match map.get(key) {
            Some(PropValue::Int(i)) => {
                int_sum = int_sum.wrapping_add(*i);
                sum += *i as f64;
                n += 1;
            }
            Some(PropValue::Float(f)) => {
                all_int = false;
                sum += f;
                n += 1;
            }
            _ => {}
        }
    }
    let value = if all_int { json!(int_sum) } else { json!(sum) };
    (value, sum, n)
}

fn list_props(
    props: &std::collections::HashMap<String, PropValue>,
    spec: &ResultSpec,
) -> Value {
    let mut object = Map::new();
    for name in &spec.list {
        let value = props
            .get(name)
            .map(prop_to_json)
            .unwrap_or_else(|| json!("Missing property"));
        object.insert(name.clone(), value);
    }
    Value::Object(object)
}

fn compare_props(a: Option<&PropValue>, b: Option<&PropValue>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.compare(b).unwrap_or(Ordering::Equal),
        // Missing sorts last.
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
