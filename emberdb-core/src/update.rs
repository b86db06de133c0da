//! Update operator evaluation
//!
//! An update expression is a mapping whose every key is a mutation operator and whose value
//! is a `field -> operand` mapping, e.g. `{"$set": {"status": "done"}, "$inc": {"runs": 1}}`.
//! Operators address top-level fields. The expression is parsed in full before a document is
//! touched and applied to a working copy, so a failing expression leaves the document as it was.
//! Entries addressing `_id` are dropped.

use crate::document::{compare_values, contains_value, type_name, values_equal, Document, Numeric, ID_FIELD};
use crate::error::{Result, StoreError};
use crate::query::parser::QueryParser;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use tracing::warn;

/// Which end `$pop` removes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopEnd {
    /// `-1`
    First,
    /// `1`
    Last,
}

/// Representation written by `$currentDate`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateKind {
    /// RFC 3339 string (`true` or `{"$type": "date"}`)
    Date,
    /// Milliseconds since the unix epoch (`{"$type": "timestamp"}`)
    Timestamp,
}

/// One mutation operator with its field operands
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOperator {
    Set(Vec<(String, Value)>),
    Unset(Vec<String>),
    Push(Vec<(String, Value)>),
    PushEach(Vec<(String, Vec<Value>)>),
    Pull(Vec<(String, Value)>),
    PullAll(Vec<(String, Vec<Value>)>),
    PullEach(Vec<(String, Vec<Value>)>),
    Rename(Vec<(String, String)>),
    Inc(Vec<(String, Numeric)>),
    Mul(Vec<(String, Numeric)>),
    Min(Vec<(String, Value)>),
    Max(Vec<(String, Value)>),
    CurrentDate(Vec<(String, DateKind)>),
    AddToSet(Vec<(String, Value)>),
    AddToSetEach(Vec<(String, Vec<Value>)>),
    Pop(Vec<(String, PopEnd)>),
    Bit(Vec<(String, i64)>),
    UnsetMany(Vec<String>),
}

impl UpdateOperator {
    /// Every operator name accepted in an update expression
    pub const NAMES: [&'static str; 18] = [
        "$set",
        "$unset",
        "$push",
        "$pushEach",
        "$pull",
        "$pullAll",
        "$pullEach",
        "$rename",
        "$inc",
        "$mul",
        "$min",
        "$max",
        "$currentDate",
        "$addToSet",
        "$addToSetEach",
        "$pop",
        "$bit",
        "$unsetMany",
    ];

    /// Parse one `"$op": {field: operand}` entry
    pub fn parse(name: &str, operand: &Value) -> Result<Self> {
        let op = match name {
            "$set" => Self::Set(fields(name, operand)?),
            "$unset" => Self::Unset(names(name, operand)?),
            "$unsetMany" => Self::UnsetMany(names(name, operand)?),
            "$push" => Self::Push(fields(name, operand)?),
            "$pull" => Self::Pull(fields(name, operand)?),
            "$addToSet" => Self::AddToSet(fields(name, operand)?),
            "$pushEach" => Self::PushEach(map_fields(name, operand, |v| sequence(name, v))?),
            "$pullAll" => Self::PullAll(map_fields(name, operand, |v| sequence(name, v))?),
            "$pullEach" => Self::PullEach(map_fields(name, operand, |v| sequence(name, v))?),
            "$addToSetEach" => {
                Self::AddToSetEach(map_fields(name, operand, |v| sequence(name, v))?)
            }
            "$min" => Self::Min(fields(name, operand)?),
            "$max" => Self::Max(fields(name, operand)?),
            "$inc" => Self::Inc(map_fields(name, operand, |v| number(name, v))?),
            "$mul" => Self::Mul(map_fields(name, operand, |v| number(name, v))?),
            "$rename" => Self::Rename(map_fields(name, operand, |v| {
                v.as_str()
                    .map(String::from)
                    .ok_or_else(|| StoreError::malformed("$rename targets must be strings"))
            })?),
            "$currentDate" => Self::CurrentDate(map_fields(name, operand, date_kind)?),
            "$pop" => Self::Pop(map_fields(name, operand, |v| match v.as_i64() {
                Some(1) => Ok(PopEnd::Last),
                Some(-1) => Ok(PopEnd::First),
                _ => Err(StoreError::malformed("$pop expects 1 or -1")),
            })?),
            "$bit" => Self::Bit(map_fields(name, operand, |v| {
                v.as_i64()
                    .ok_or_else(|| StoreError::malformed("$bit expects an integer operand"))
            })?),
            other => return Err(StoreError::UnknownOperator(other.to_string())),
        };
        Ok(op.without_id())
    }

    fn without_id(self) -> Self {
        fn keep<T>(name: &str, entries: Vec<(String, T)>) -> Vec<(String, T)> {
            entries
                .into_iter()
                .filter(|(field, _)| {
                    let is_id = field == ID_FIELD;
                    if is_id {
                        warn!(operator = name, "ignoring update of '_id'");
                    }
                    !is_id
                })
                .collect()
        }
        fn keep_names(name: &str, entries: Vec<String>) -> Vec<String> {
            entries
                .into_iter()
                .filter(|field| {
                    let is_id = field == ID_FIELD;
                    if is_id {
                        warn!(operator = name, "ignoring update of '_id'");
                    }
                    !is_id
                })
                .collect()
        }

        match self {
            Self::Set(v) => Self::Set(keep("$set", v)),
            Self::Unset(v) => Self::Unset(keep_names("$unset", v)),
            Self::UnsetMany(v) => Self::UnsetMany(keep_names("$unsetMany", v)),
            Self::Push(v) => Self::Push(keep("$push", v)),
            Self::PushEach(v) => Self::PushEach(keep("$pushEach", v)),
            Self::Pull(v) => Self::Pull(keep("$pull", v)),
            Self::PullAll(v) => Self::PullAll(keep("$pullAll", v)),
            Self::PullEach(v) => Self::PullEach(keep("$pullEach", v)),
            Self::Rename(v) => Self::Rename(
                keep("$rename", v)
                    .into_iter()
                    .filter(|(_, to)| {
                        if to == ID_FIELD {
                            warn!(operator = "$rename", "ignoring rename onto '_id'");
                        }
                        to != ID_FIELD
                    })
                    .collect(),
            ),
            Self::Inc(v) => Self::Inc(keep("$inc", v)),
            Self::Mul(v) => Self::Mul(keep("$mul", v)),
            Self::Min(v) => Self::Min(keep("$min", v)),
            Self::Max(v) => Self::Max(keep("$max", v)),
            Self::CurrentDate(v) => Self::CurrentDate(keep("$currentDate", v)),
            Self::AddToSet(v) => Self::AddToSet(keep("$addToSet", v)),
            Self::AddToSetEach(v) => Self::AddToSetEach(keep("$addToSetEach", v)),
            Self::Pop(v) => Self::Pop(keep("$pop", v)),
            Self::Bit(v) => Self::Bit(keep("$bit", v)),
        }
    }

    /// Apply this operator to `doc`
    fn apply(&self, doc: &mut Document) -> Result<()> {
        match self {
            Self::Set(entries) => {
                for (field, value) in entries {
                    match (doc.get_mut(field), value) {
                        (Some(Value::Object(existing)), Value::Object(patch)) => {
                            for (k, v) in patch {
                                existing.insert(k.clone(), v.clone());
                            }
                        }
                        _ => {
                            doc.insert(field.clone(), value.clone());
                        }
                    }
                }
            }
            Self::Unset(names) | Self::UnsetMany(names) => {
                for field in names {
                    doc.shift_remove(field);
                }
            }
            Self::Push(entries) => {
                for (field, value) in entries {
                    array_field(doc, field, "$push")?.push(value.clone());
                }
            }
            Self::PushEach(entries) => {
                for (field, values) in entries {
                    array_field(doc, field, "$pushEach")?.extend(values.iter().cloned());
                }
            }
            Self::Pull(entries) => {
                for (field, value) in entries {
                    array_field(doc, field, "$pull")?.retain(|v| !values_equal(v, value));
                }
            }
            Self::PullAll(entries) | Self::PullEach(entries) => {
                for (field, values) in entries {
                    array_field(doc, field, self.name())?.retain(|v| !contains_value(values, v));
                }
            }
            Self::AddToSet(entries) => {
                for (field, value) in entries {
                    let items = array_field(doc, field, "$addToSet")?;
                    if !contains_value(items, value) {
                        items.push(value.clone());
                    }
                }
            }
            Self::AddToSetEach(entries) => {
                for (field, values) in entries {
                    let items = array_field(doc, field, "$addToSetEach")?;
                    for value in values {
                        if !contains_value(items, value) {
                            items.push(value.clone());
                        }
                    }
                }
            }
            Self::Pop(entries) => {
                for (field, end) in entries {
                    let items = array_field(doc, field, "$pop")?;
                    if items.is_empty() {
                        continue;
                    }
                    match end {
                        PopEnd::Last => {
                            items.pop();
                        }
                        PopEnd::First => {
                            items.remove(0);
                        }
                    }
                }
            }
            Self::Rename(entries) => {
                for (from, to) in entries {
                    if let Some(value) = doc.shift_remove(from) {
                        doc.insert(to.clone(), value);
                    }
                }
            }
            Self::Inc(entries) => {
                for (field, delta) in entries {
                    let next = match doc.get(field) {
                        None => *delta,
                        Some(current) => numeric_field(current, field, "$inc")?.add(*delta),
                    };
                    doc.insert(field.clone(), next.to_value());
                }
            }
            Self::Mul(entries) => {
                for (field, factor) in entries {
                    if let Some(current) = doc.get(field) {
                        let next = numeric_field(current, field, "$mul")?.mul(*factor);
                        doc.insert(field.clone(), next.to_value());
                    }
                }
            }
            Self::Min(entries) | Self::Max(entries) => {
                let wanted = if matches!(self, Self::Min(_)) {
                    Ordering::Less
                } else {
                    Ordering::Greater
                };
                for (field, value) in entries {
                    if let Some(current) = doc.get(field) {
                        numeric_field(current, field, self.name())?;
                        numeric_field(value, field, self.name())?;
                        if compare_values(value, current)? == wanted {
                            doc.insert(field.clone(), value.clone());
                        }
                    }
                }
            }
            Self::CurrentDate(entries) => {
                let now = Utc::now();
                for (field, kind) in entries {
                    let stamp = match kind {
                        DateKind::Date => Value::String(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
                        DateKind::Timestamp => Value::from(now.timestamp_millis()),
                    };
                    doc.insert(field.clone(), stamp);
                }
            }
            Self::Bit(entries) => {
                for (field, mask) in entries {
                    if let Some(current) = doc.get(field) {
                        let bits = current.as_i64().ok_or_else(|| {
                            StoreError::type_mismatch(format!(
                                "$bit on '{}' needs an integer field, found {}",
                                field,
                                type_name(current)
                            ))
                        })?;
                        doc.insert(field.clone(), Value::from(bits | mask));
                    }
                }
            }
        }
        Ok(())
    }

    /// Operator name as written in an update expression
    pub fn name(&self) -> &'static str {
        match self {
            Self::Set(_) => "$set",
            Self::Unset(_) => "$unset",
            Self::Push(_) => "$push",
            Self::PushEach(_) => "$pushEach",
            Self::Pull(_) => "$pull",
            Self::PullAll(_) => "$pullAll",
            Self::PullEach(_) => "$pullEach",
            Self::Rename(_) => "$rename",
            Self::Inc(_) => "$inc",
            Self::Mul(_) => "$mul",
            Self::Min(_) => "$min",
            Self::Max(_) => "$max",
            Self::CurrentDate(_) => "$currentDate",
            Self::AddToSet(_) => "$addToSet",
            Self::AddToSetEach(_) => "$addToSetEach",
            Self::Pop(_) => "$pop",
            Self::Bit(_) => "$bit",
            Self::UnsetMany(_) => "$unsetMany",
        }
    }
}

/// Parsed update expression
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateExpression {
    pub operators: Vec<UpdateOperator>,
}

impl UpdateExpression {
    /// Parse an update expression; at least one operator is required
    pub fn parse(update: &Value) -> Result<Self> {
        let obj = update
            .as_object()
            .ok_or_else(|| StoreError::malformed("update must be an object of operators"))?;
        if obj.is_empty() {
            return Err(StoreError::malformed(
                "update must contain at least one operator",
            ));
        }

        let mut operators = Vec::with_capacity(obj.len());
        for (name, operand) in obj {
            if !name.starts_with('$') {
                return Err(StoreError::malformed(format!(
                    "update key '{}' is not an operator",
                    name
                )));
            }
            operators.push(UpdateOperator::parse(name, operand)?);
        }
        Ok(Self { operators })
    }

    /// Apply every operator in order; on error `doc` is left untouched
    pub fn apply(&self, doc: &mut Document) -> Result<()> {
        let mut working = doc.clone();
        for op in &self.operators {
            op.apply(&mut working)?;
        }
        *doc = working;
        Ok(())
    }
}

/// Parse and apply a JSON update expression to one document
pub fn apply<'a>(doc: &'a mut Document, update: &Value) -> Result<&'a mut Document> {
    UpdateExpression::parse(update)?.apply(doc)?;
    Ok(doc)
}

fn operand_map<'a>(name: &str, operand: &'a Value) -> Result<&'a Map<String, Value>> {
    operand
        .as_object()
        .ok_or_else(|| StoreError::malformed(format!("{} expects an object of fields", name)))
}

fn fields(name: &str, operand: &Value) -> Result<Vec<(String, Value)>> {
    Ok(operand_map(name, operand)?
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect())
}

fn map_fields<T>(
    name: &str,
    operand: &Value,
    convert: impl Fn(&Value) -> Result<T>,
) -> Result<Vec<(String, T)>> {
    operand_map(name, operand)?
        .iter()
        .map(|(k, v)| Ok((k.clone(), convert(v)?)))
        .collect()
}

fn names(name: &str, operand: &Value) -> Result<Vec<String>> {
    QueryParser::key_list(name, operand)
}

fn sequence(name: &str, value: &Value) -> Result<Vec<Value>> {
    value
        .as_array()
        .cloned()
        .ok_or_else(|| StoreError::malformed(format!("{} expects an array per field", name)))
}

fn number(name: &str, value: &Value) -> Result<Numeric> {
    Numeric::from_value(value)
        .ok_or_else(|| StoreError::malformed(format!("{} expects a numeric operand", name)))
}

fn date_kind(value: &Value) -> Result<DateKind> {
    match value {
        Value::Bool(true) => Ok(DateKind::Date),
        Value::Object(spec) => match spec.get("$type").and_then(Value::as_str) {
            Some("date") => Ok(DateKind::Date),
            Some("timestamp") => Ok(DateKind::Timestamp),
            _ => Err(StoreError::malformed(
                "$currentDate expects {\"$type\": \"date\"|\"timestamp\"}",
            )),
        },
        _ => Err(StoreError::malformed(
            "$currentDate expects true or a $type specification",
        )),
    }
}

/// The array stored under `field`, created empty when absent
fn array_field<'a>(doc: &'a mut Document, field: &str, op: &str) -> Result<&'a mut Vec<Value>> {
    let slot = doc
        .entry(field.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    let found = type_name(slot);
    slot.as_array_mut().ok_or_else(|| {
        StoreError::type_mismatch(format!(
            "{} on '{}' needs an array field, found {}",
            op, field, found
        ))
    })
}

fn numeric_field(value: &Value, field: &str, op: &str) -> Result<Numeric> {
    Numeric::from_value(value).ok_or_else(|| {
        StoreError::type_mismatch(format!(
            "{} on '{}' needs a number, found {}",
            op,
            field,
            type_name(value)
        ))
    })
}
