//! Query parser for converting JSON to the filter AST
//!
//! Parses filter expressions, projections and sort specifications given as JSON values

use super::ast::{
    Condition, FieldCondition, Filter, FilterOperator, FindOptions, Projection, Sort, SortOrder,
};
use crate::error::{Result, StoreError};
use serde_json::Value;

/// Query parser for JSON filter expressions
pub struct QueryParser;

impl QueryParser {
    /// Parse a filter from a JSON string
    pub fn parse(json: &str) -> Result<Filter> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| StoreError::malformed(format!("invalid JSON: {}", e)))?;
        Self::parse_filter(&value)
    }

    /// Parse a filter from a JSON value
    ///
    /// `null` and `{}` both mean "match everything".
    pub fn parse_filter(value: &Value) -> Result<Filter> {
        let obj = match value {
            Value::Null => return Ok(Filter::new()),
            Value::Object(obj) => obj,
            _ => return Err(StoreError::malformed("filter must be an object")),
        };

        let mut filter = Filter::new();
        for (field, val) in obj {
            if field.starts_with('$') {
                // Only implicit AND across top-level fields
                return Err(StoreError::UnknownOperator(field.clone()));
            }
            filter.conditions.push(FieldCondition {
                field: field.clone(),
                condition: Self::parse_condition(field, val)?,
            });
        }
        Ok(filter)
    }

    /// Parse the right-hand side of one field
    fn parse_condition(field: &str, value: &Value) -> Result<Condition> {
        let obj = match value {
            Value::Object(obj) if !obj.is_empty() => obj,
            _ => return Ok(Condition::Equals(value.clone())),
        };

        let operator_keys = obj.keys().filter(|k| k.starts_with('$')).count();
        if operator_keys == 0 {
            return Ok(Condition::Equals(value.clone()));
        }
        if operator_keys != obj.len() {
            return Err(StoreError::malformed(format!(
                "field '{}' mixes operators and plain keys",
                field
            )));
        }

        let mut ops = Vec::with_capacity(obj.len());
        for (op, val) in obj {
            ops.push(Self::parse_operator(op, val)?);
        }
        Ok(Condition::Operators(ops))
    }

    fn parse_operator(op: &str, val: &Value) -> Result<FilterOperator> {
        let parsed = match op {
            "$eq" => FilterOperator::Eq(val.clone()),
            "$ne" => FilterOperator::Ne(val.clone()),
            "$lt" => FilterOperator::Lt(val.clone()),
            "$gt" => FilterOperator::Gt(val.clone()),
            "$lte" => FilterOperator::Lte(val.clone()),
            "$gte" => FilterOperator::Gte(val.clone()),
            "$in" => FilterOperator::In(Self::array_operand(op, val)?),
            "$nin" => FilterOperator::Nin(Self::array_operand(op, val)?),
            "$exists" => FilterOperator::Exists(
                val.as_bool()
                    .ok_or_else(|| StoreError::malformed("$exists must be a boolean"))?,
            ),
            "$unset" => FilterOperator::Unset(Self::key_list(op, val)?),
            "$push" => FilterOperator::Push(Self::pairs(op, val)?),
            "$pull" => FilterOperator::Pull(Self::pairs(op, val)?),
            "$rename" => {
                let mut renames = Vec::new();
                for (from, to) in Self::pairs(op, val)? {
                    let to = to.as_str().ok_or_else(|| {
                        StoreError::malformed(format!("$rename target for '{}' must be a string", from))
                    })?;
                    renames.push((from, to.to_string()));
                }
                FilterOperator::Rename(renames)
            }
            _ => return Err(StoreError::UnknownOperator(op.to_string())),
        };
        Ok(parsed)
    }

    fn array_operand(op: &str, val: &Value) -> Result<Vec<Value>> {
        val.as_array()
            .cloned()
            .ok_or_else(|| StoreError::malformed(format!("{} must be an array", op)))
    }

    /// Field names given as a string, an array of strings or the keys of an object
    pub(crate) fn key_list(op: &str, val: &Value) -> Result<Vec<String>> {
        match val {
            Value::String(s) => Ok(vec![s.clone()]),
            Value::Object(obj) => Ok(obj.keys().cloned().collect()),
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_str().map(String::from).ok_or_else(|| {
                        StoreError::malformed(format!("{} expects field names", op))
                    })
                })
                .collect(),
            _ => Err(StoreError::malformed(format!(
                "{} expects a field name, a list of names or an object",
                op
            ))),
        }
    }

    fn pairs(op: &str, val: &Value) -> Result<Vec<(String, Value)>> {
        val.as_object()
            .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .ok_or_else(|| StoreError::malformed(format!("{} must be an object", op)))
    }

    /// Parse projection from JSON
    ///
    /// Accepts a list of field names (inclusion) or an object of `field: 0|1|bool`.
    pub fn parse_projection(value: &Value) -> Result<Projection> {
        match value {
            Value::Array(items) => {
                let mut projection = Projection::new();
                for item in items {
                    let field = item.as_str().ok_or_else(|| {
                        StoreError::malformed("projection list must contain field names")
                    })?;
                    projection = projection.include(field);
                }
                Ok(projection)
            }
            Value::Object(obj) => {
                let mut projection = Projection::new();
                for (field, val) in obj {
                    let include = match val {
                        Value::Bool(b) => *b,
                        Value::Number(n) => match n.as_i64() {
                            Some(0) => false,
                            Some(1) => true,
                            _ => {
                                return Err(StoreError::malformed(
                                    "Projection value must be 0 or 1",
                                ))
                            }
                        },
                        _ => {
                            return Err(StoreError::malformed(
                                "Projection value must be 0, 1, true, or false",
                            ))
                        }
                    };
                    projection = if include {
                        projection.include(field)
                    } else {
                        projection.exclude(field)
                    };
                }
                Ok(projection)
            }
            _ => Err(StoreError::malformed(
                "projection must be a list of fields or an object",
            )),
        }
    }

    /// Parse sort from JSON
    ///
    /// Accepts a single field name (ascending) or an object of `field: 1|-1|"asc"|"desc"`.
    pub fn parse_sort(value: &Value) -> Result<Sort> {
        match value {
            Value::String(field) => Ok(Sort::by(field.as_str())),
            Value::Object(obj) => {
                let mut sort = Sort::new();
                for (field, val) in obj {
                    sort = sort.add(field, Self::parse_sort_order(val)?);
                }
                Ok(sort)
            }
            _ => Err(StoreError::malformed(
                "sort must be a field name or an object",
            )),
        }
    }

    pub(crate) fn parse_sort_order(value: &Value) -> Result<SortOrder> {
        match value {
            Value::Number(n) => match n.as_i64() {
                Some(1) => Ok(SortOrder::Ascending),
                Some(-1) => Ok(SortOrder::Descending),
                _ => Err(StoreError::malformed("Sort value must be 1 or -1")),
            },
            Value::String(s) => match s.as_str() {
                "asc" | "ascending" => Ok(SortOrder::Ascending),
                "desc" | "descending" => Ok(SortOrder::Descending),
                _ => Err(StoreError::malformed("Sort value must be 'asc' or 'desc'")),
            },
            _ => Err(StoreError::malformed(
                "Sort value must be 1, -1, 'asc', or 'desc'",
            )),
        }
    }

    /// Parse `{"projection", "sort", "skip", "limit"}` find options
    pub fn parse_find_options(value: &Value) -> Result<FindOptions> {
        let obj = match value {
            Value::Null => return Ok(FindOptions::new()),
            Value::Object(obj) => obj,
            _ => return Err(StoreError::malformed("find options must be an object")),
        };

        let mut options = FindOptions::new();
        if let Some(proj) = obj.get("projection") {
            options.projection = Some(Self::parse_projection(proj)?);
        }
        if let Some(sort) = obj.get("sort") {
            options.sort = Some(Self::parse_sort(sort)?);
        }
        if let Some(skip) = obj.get("skip") {
            options.skip = skip
                .as_u64()
                .ok_or_else(|| StoreError::malformed("skip must be a non-negative number"))?
                as usize;
        }
        if let Some(limit) = obj.get("limit") {
            options.limit = Some(
                limit
                    .as_u64()
                    .ok_or_else(|| StoreError::malformed("limit must be a non-negative number"))?
                    as usize,
            );
        }
        Ok(options)
    }
}
