//! Aggregation pipeline for EmberDB
//!
//! A pipeline is an ordered list of single-key stage mappings. Each stage consumes the output
//! of the previous one, and the shape of that output changes with the stage:
//! - document sequence: `$match`, `$project`, `$sort`, `$limit`, `$skip`, `$addFields`,
//!   `$sample`, `$unwind`, `$lookup`
//! - mapping: `$group`, `$bucket`, `$facet`
//! - scalar: `$count`, `$sum`, `$avg`, `$max`, `$min`
//!
//! Sequence stages reject mapping or scalar input with [`StoreError::ShapeMismatch`].

use crate::document::{compare_values, get_field, values_equal, Document, Numeric};
use crate::error::{Result, StoreError};
use crate::query::ast::{Filter, Projection, Sort, SortOrder};
use crate::query::executor::QueryExecutor;
use crate::query::parser::QueryParser;
use rand::seq::SliceRandom;
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Every stage name accepted in a pipeline
pub const STAGE_NAMES: [&str; 17] = [
    "$match",
    "$project",
    "$sort",
    "$limit",
    "$skip",
    "$addFields",
    "$sample",
    "$unwind",
    "$lookup",
    "$group",
    "$bucket",
    "$facet",
    "$count",
    "$sum",
    "$avg",
    "$max",
    "$min",
];

/// Where `$lookup` takes its foreign documents from
#[derive(Debug, Clone, PartialEq)]
pub enum LookupSource {
    /// Collection of the same database, loaded before execution
    Collection(String),
    /// Documents given inline in the stage
    Inline(Vec<Document>),
}

/// `$lookup` arguments
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup {
    pub from: LookupSource,
    pub local_field: String,
    pub foreign_field: String,
    pub as_field: String,
}

/// Pipeline stage in aggregation
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineStage {
    Match(Filter),
    Project(Projection),
    Sort(Sort),
    Limit(usize),
    Skip(usize),
    AddFields(Vec<(String, Value)>),
    Sample(usize),
    Unwind(String),
    Lookup(Lookup),
    Group { key: String },
    Bucket { group_by: String, boundaries: Vec<Number> },
    Facet(Vec<(String, Pipeline)>),
    Count,
    Sum(String),
    Avg(String),
    Max(String),
    Min(String),
}

impl PipelineStage {
    /// Parse one `{"$stage": spec}` mapping
    pub fn parse(stage: &Value) -> Result<Self> {
        let obj = stage
            .as_object()
            .ok_or_else(|| StoreError::InvalidPipeline("stage must be an object".into()))?;
        if obj.len() != 1 {
            return Err(StoreError::InvalidPipeline(format!(
                "stage must have exactly one key, found {}",
                obj.len()
            )));
        }
        let (name, spec) = obj
            .iter()
            .next()
            .ok_or_else(|| StoreError::InvalidPipeline("empty stage".into()))?;

        let parsed = match name.as_str() {
            "$match" => Self::Match(QueryParser::parse_filter(spec)?),
            "$project" => Self::Project(QueryParser::parse_projection(spec)?),
            "$sort" => Self::Sort(parse_sort_stage(spec)?),
            "$limit" => Self::Limit(count_arg(name, spec)?),
            "$skip" => Self::Skip(count_arg(name, spec)?),
            "$sample" => Self::Sample(sample_size(spec)?),
            "$addFields" => Self::AddFields(
                spec.as_object()
                    .ok_or_else(|| invalid(name, "expects an object of fields"))?
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
            "$unwind" => Self::Unwind(match spec {
                Value::Object(o) => field_arg(name, o.get("path").unwrap_or(&Value::Null))?,
                other => field_arg(name, other)?,
            }),
            "$lookup" => Self::Lookup(parse_lookup(spec)?),
            "$group" => {
                let key = spec
                    .as_object()
                    .and_then(|o| o.get("_id"))
                    .ok_or_else(|| invalid(name, "expects {\"_id\": field}"))?;
                Self::Group {
                    key: field_arg(name, key)?,
                }
            }
            "$bucket" => parse_bucket(spec)?,
            "$facet" => Self::Facet(parse_facet(spec)?),
            "$count" => Self::Count,
            "$sum" => Self::Sum(field_arg(name, spec)?),
            "$avg" => Self::Avg(field_arg(name, spec)?),
            "$max" => Self::Max(field_arg(name, spec)?),
            "$min" => Self::Min(field_arg(name, spec)?),
            other => {
                return Err(StoreError::InvalidPipeline(format!(
                    "unsupported stage '{}'",
                    other
                )))
            }
        };
        Ok(parsed)
    }

    /// Stage name as written in a pipeline
    pub fn name(&self) -> &'static str {
        match self {
            Self::Match(_) => "$match",
            Self::Project(_) => "$project",
            Self::Sort(_) => "$sort",
            Self::Limit(_) => "$limit",
            Self::Skip(_) => "$skip",
            Self::AddFields(_) => "$addFields",
            Self::Sample(_) => "$sample",
            Self::Unwind(_) => "$unwind",
            Self::Lookup(_) => "$lookup",
            Self::Group { .. } => "$group",
            Self::Bucket { .. } => "$bucket",
            Self::Facet(_) => "$facet",
            Self::Count => "$count",
            Self::Sum(_) => "$sum",
            Self::Avg(_) => "$avg",
            Self::Max(_) => "$max",
            Self::Min(_) => "$min",
        }
    }
}

/// Aggregation pipeline
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    pub stages: Vec<PipelineStage>,
}

impl Pipeline {
    pub fn new(stages: Vec<PipelineStage>) -> Self {
        Self { stages }
    }

    /// Parse a JSON array of stages
    pub fn parse(pipeline: &Value) -> Result<Self> {
        let stages = pipeline
            .as_array()
            .ok_or_else(|| StoreError::InvalidPipeline("pipeline must be an array".into()))?;
        Ok(Self {
            stages: stages
                .iter()
                .map(PipelineStage::parse)
                .collect::<Result<_>>()?,
        })
    }

    /// Collections that `$lookup` stages (including those inside `$facet`) read from
    pub fn lookup_collections(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_lookups(&mut names);
        names.sort();
        names.dedup();
        names
    }

    fn collect_lookups(&self, names: &mut Vec<String>) {
        for stage in &self.stages {
            match stage {
                PipelineStage::Lookup(Lookup {
                    from: LookupSource::Collection(name),
                    ..
                }) => names.push(name.clone()),
                PipelineStage::Facet(branches) => {
                    for (_, pipeline) in branches {
                        pipeline.collect_lookups(names);
                    }
                }
                _ => {}
            }
        }
    }

    /// Run the pipeline over `input`
    ///
    /// `collections` holds the documents of every collection named by
    /// [`Pipeline::lookup_collections`].
    pub fn execute(
        &self,
        input: Vec<Document>,
        collections: &HashMap<String, Vec<Document>>,
    ) -> Result<AggregationResult> {
        let original = input.clone();
        let mut current = AggregationResult::Documents(input);
        for stage in &self.stages {
            current = run_stage(stage, current, &original, collections)?;
        }
        Ok(current)
    }
}

/// Output of a pipeline: its shape depends on the last stage
#[derive(Debug, Clone, PartialEq)]
pub enum AggregationResult {
    Documents(Vec<Document>),
    Mapping(Map<String, Value>),
    Scalar(Value),
}

impl AggregationResult {
    /// Shape name used in error messages
    pub fn shape(&self) -> &'static str {
        match self {
            Self::Documents(_) => "document sequence",
            Self::Mapping(_) => "mapping",
            Self::Scalar(_) => "scalar",
        }
    }

    pub fn as_documents(&self) -> Option<&[Document]> {
        match self {
            Self::Documents(docs) => Some(docs),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Mapping(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            Self::Scalar(value) => Some(value),
            _ => None,
        }
    }

    /// Render as plain JSON
    pub fn into_value(self) -> Value {
        match self {
            Self::Documents(docs) => Value::Array(docs.into_iter().map(Value::Object).collect()),
            Self::Mapping(map) => Value::Object(map),
            Self::Scalar(value) => value,
        }
    }
}

fn run_stage(
    stage: &PipelineStage,
    input: AggregationResult,
    original: &[Document],
    collections: &HashMap<String, Vec<Document>>,
) -> Result<AggregationResult> {
    use AggregationResult::{Documents, Mapping, Scalar};

    // $facet ignores its input and restarts from the pipeline's input
    let mut docs = match input {
        Documents(docs) => docs,
        _ if matches!(stage, PipelineStage::Facet(_)) => Vec::new(),
        other => {
            return Err(StoreError::ShapeMismatch {
                stage: stage.name().to_string(),
                expected: "document sequence",
                actual: other.shape(),
            })
        }
    };

    let result = match stage {
        PipelineStage::Match(filter) => Documents(QueryExecutor::filter_documents(docs, filter)?),
        PipelineStage::Project(projection) => Documents(
            docs.iter()
                .map(|doc| QueryExecutor::apply_projection(doc, projection))
                .collect(),
        ),
        PipelineStage::Sort(sort) => {
            QueryExecutor::apply_sort(&mut docs, sort);
            Documents(docs)
        }
        PipelineStage::Limit(n) => {
            docs.truncate(*n);
            Documents(docs)
        }
        PipelineStage::Skip(n) => Documents(docs.into_iter().skip(*n).collect()),
        PipelineStage::AddFields(fields) => {
            for doc in &mut docs {
                for (k, v) in fields {
                    doc.insert(k.clone(), v.clone());
                }
            }
            Documents(docs)
        }
        PipelineStage::Sample(n) => {
            if *n >= docs.len() {
                Documents(docs)
            } else {
                let mut rng = rand::thread_rng();
                Documents(docs.choose_multiple(&mut rng, *n).cloned().collect())
            }
        }
        PipelineStage::Unwind(field) => Documents(unwind(docs, field)),
        PipelineStage::Lookup(lookup) => {
            let foreign: &[Document] = match &lookup.from {
                LookupSource::Inline(inline) => inline,
                LookupSource::Collection(name) => {
                    collections.get(name).map(Vec::as_slice).unwrap_or(&[])
                }
            };
            Documents(left_join(docs, foreign, lookup))
        }
        PipelineStage::Group { key } => Mapping(group(docs, key)),
        PipelineStage::Bucket {
            group_by,
            boundaries,
        } => Mapping(bucket(docs, group_by, boundaries)?),
        PipelineStage::Count => Scalar(Value::from(docs.len())),
        PipelineStage::Sum(field) => Scalar(sum(&docs, field)),
        PipelineStage::Avg(field) => Scalar(average(&docs, field)),
        PipelineStage::Max(field) => Scalar(extreme(&docs, field, Ordering::Greater)?),
        PipelineStage::Min(field) => Scalar(extreme(&docs, field, Ordering::Less)?),
        PipelineStage::Facet(branches) => facet(branches, original, collections)?,
    };
    Ok(result)
}

fn facet(
    branches: &[(String, Pipeline)],
    original: &[Document],
    collections: &HashMap<String, Vec<Document>>,
) -> Result<AggregationResult> {
    let mut results = Map::new();
    for (name, pipeline) in branches {
        let result = pipeline.execute(original.to_vec(), collections)?;
        results.insert(name.clone(), result.into_value());
    }
    Ok(AggregationResult::Mapping(results))
}

fn unwind(docs: Vec<Document>, field: &str) -> Vec<Document> {
    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        match doc.get(field) {
            Some(Value::Array(items)) => {
                for item in items {
                    let mut copy = doc.clone();
                    copy.insert(field.to_string(), item.clone());
                    out.push(copy);
                }
            }
            _ => out.push(doc),
        }
    }
    out
}

/// One output row per match; `null` under `as` when nothing matches
fn left_join(docs: Vec<Document>, foreign: &[Document], lookup: &Lookup) -> Vec<Document> {
    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        let local = get_field(&doc, &lookup.local_field);
        let matches: Vec<&Document> = foreign
            .iter()
            .filter(|f| match (local, get_field(f, &lookup.foreign_field)) {
                (Some(l), Some(r)) => values_equal(l, r),
                (None, None) => true,
                _ => false,
            })
            .collect();

        if matches.is_empty() {
            let mut row = doc;
            row.insert(lookup.as_field.clone(), Value::Null);
            out.push(row);
        } else {
            for m in matches {
                let mut row = doc.clone();
                row.insert(lookup.as_field.clone(), Value::Object(m.clone()));
                out.push(row);
            }
        }
    }
    out
}

/// Mapping key for a group value: strings as-is, everything else as JSON text
fn group_key(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "null".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn group(docs: Vec<Document>, key: &str) -> Map<String, Value> {
    let mut groups: Map<String, Value> = Map::new();
    for doc in docs {
        let k = group_key(get_field(&doc, key));
        if let Value::Array(members) = groups
            .entry(k)
            .or_insert_with(|| Value::Array(Vec::new()))
        {
            members.push(Value::Object(doc));
        }
    }
    groups
}

/// Ranges are `[b_i, b_i+1)`; the last boundary collects everything above it
fn bucket(docs: Vec<Document>, group_by: &str, boundaries: &[Number]) -> Result<Map<String, Value>> {
    let mut buckets: Map<String, Value> = boundaries
        .iter()
        .map(|b| (b.to_string(), Value::Array(Vec::new())))
        .collect();
    let bounds: Vec<Value> = boundaries.iter().cloned().map(Value::Number).collect();

    for doc in docs {
        let value = match get_field(&doc, group_by) {
            None | Some(Value::Null) => continue,
            Some(v) => v.clone(),
        };

        let mut slot = None;
        for (i, bound) in bounds.iter().enumerate() {
            if compare_values(&value, bound)? == Ordering::Less {
                break;
            }
            let below_next = match bounds.get(i + 1) {
                Some(next) => compare_values(&value, next)? == Ordering::Less,
                None => true,
            };
            if below_next {
                slot = Some(i);
                break;
            }
        }

        if let Some(i) = slot {
            if let Some(Value::Array(members)) = buckets.get_mut(&boundaries[i].to_string()) {
                members.push(Value::Object(doc));
            }
        }
    }
    Ok(buckets)
}

fn sum(docs: &[Document], field: &str) -> Value {
    docs.iter()
        .filter_map(|d| get_field(d, field).and_then(Numeric::from_value))
        .reduce(Numeric::add)
        .map(Numeric::to_value)
        .unwrap_or(Value::Null)
}

fn average(docs: &[Document], field: &str) -> Value {
    let values: Vec<f64> = docs
        .iter()
        .filter_map(|d| get_field(d, field).and_then(Numeric::from_value))
        .map(Numeric::as_f64)
        .collect();
    if values.is_empty() {
        return Value::Null;
    }
    Numeric::Float(values.iter().sum::<f64>() / values.len() as f64).to_value()
}

/// Largest (`Greater`) or smallest (`Less`) non-null value of `field`
fn extreme(docs: &[Document], field: &str, wanted: Ordering) -> Result<Value> {
    let mut best: Option<&Value> = None;
    for doc in docs {
        let value = match get_field(doc, field) {
            None | Some(Value::Null) => continue,
            Some(v) => v,
        };
        best = match best {
            None => Some(value),
            Some(current) if compare_values(value, current)? == wanted => Some(value),
            keep => keep,
        };
    }
    Ok(best.cloned().unwrap_or(Value::Null))
}

fn invalid(stage: &str, msg: &str) -> StoreError {
    StoreError::InvalidPipeline(format!("{} {}", stage, msg))
}

/// Field name argument; a leading `$` is accepted and stripped
fn field_arg(stage: &str, value: &Value) -> Result<String> {
    let name = value
        .as_str()
        .ok_or_else(|| invalid(stage, "expects a field name"))?;
    let name = name.strip_prefix('$').unwrap_or(name);
    if name.is_empty() {
        return Err(invalid(stage, "expects a non-empty field name"));
    }
    Ok(name.to_string())
}

fn count_arg(stage: &str, value: &Value) -> Result<usize> {
    value
        .as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| invalid(stage, "expects a non-negative integer"))
}

fn sample_size(spec: &Value) -> Result<usize> {
    match spec {
        Value::Object(o) => count_arg("$sample", o.get("size").unwrap_or(&Value::Null)),
        other => count_arg("$sample", other),
    }
}

/// `{"field": f, "reverse": bool}` or `{f: 1|-1, ...}`
fn parse_sort_stage(spec: &Value) -> Result<Sort> {
    if let Value::Object(obj) = spec {
        if let Some(Value::String(field)) = obj.get("field") {
            if obj.keys().all(|k| k == "field" || k == "reverse") {
                let reverse = match obj.get("reverse") {
                    None => false,
                    Some(Value::Bool(b)) => *b,
                    Some(_) => return Err(invalid("$sort", "reverse must be a boolean")),
                };
                let order = if reverse {
                    SortOrder::Descending
                } else {
                    SortOrder::Ascending
                };
                return Ok(Sort::new().add(field.as_str(), order));
            }
        }
    }
    QueryParser::parse_sort(spec)
        .map_err(|e| StoreError::InvalidPipeline(format!("$sort: {}", e)))
}

fn parse_lookup(spec: &Value) -> Result<Lookup> {
    let obj = spec
        .as_object()
        .ok_or_else(|| invalid("$lookup", "expects an object"))?;
    let field = |key: &str| -> Result<String> {
        obj.get(key)
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| invalid("$lookup", &format!("requires string '{}'", key)))
    };

    let from = match obj.get("from") {
        Some(Value::String(name)) => LookupSource::Collection(name.clone()),
        Some(Value::Array(items)) => LookupSource::Inline(
            items
                .iter()
                .map(|item| {
                    item.as_object()
                        .cloned()
                        .ok_or_else(|| invalid("$lookup", "inline 'from' must hold documents"))
                })
                .collect::<Result<_>>()?,
        ),
        _ => return Err(invalid("$lookup", "'from' must be a collection name or an array")),
    };

    Ok(Lookup {
        from,
        local_field: field("localField")?,
        foreign_field: field("foreignField")?,
        as_field: field("as")?,
    })
}

fn parse_bucket(spec: &Value) -> Result<PipelineStage> {
    let obj = spec
        .as_object()
        .ok_or_else(|| invalid("$bucket", "expects an object"))?;
    let group_by = field_arg("$bucket", obj.get("groupBy").unwrap_or(&Value::Null))?;
    let boundaries: Vec<Number> = obj
        .get("boundaries")
        .and_then(Value::as_array)
        .ok_or_else(|| invalid("$bucket", "requires a 'boundaries' array"))?
        .iter()
        .map(|b| match b {
            Value::Number(n) => Ok(n.clone()),
            _ => Err(invalid("$bucket", "boundaries must be numbers")),
        })
        .collect::<Result<_>>()?;
    if boundaries.is_empty() {
        return Err(invalid("$bucket", "requires at least one boundary"));
    }
    let ascending = boundaries.windows(2).all(|w| {
        Numeric::from_value(&Value::Number(w[0].clone()))
            .zip(Numeric::from_value(&Value::Number(w[1].clone())))
            .map(|(a, b)| a.cmp_numeric(&b) == Ordering::Less)
            .unwrap_or(false)
    });
    if !ascending {
        return Err(invalid("$bucket", "boundaries must be strictly ascending"));
    }
    Ok(PipelineStage::Bucket {
        group_by,
        boundaries,
    })
}

/// `{name: pipeline}` or `[pipeline, ...]` (keys "0", "1", ...)
fn parse_facet(spec: &Value) -> Result<Vec<(String, Pipeline)>> {
    match spec {
        Value::Object(obj) => obj
            .iter()
            .map(|(name, p)| Ok((name.clone(), Pipeline::parse(p)?)))
            .collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, p)| Ok((i.to_string(), Pipeline::parse(p)?)))
            .collect(),
        _ => Err(invalid("$facet", "expects an object or an array of pipelines")),
    }
}
