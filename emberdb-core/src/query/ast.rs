//! Filter expression and find-option definitions
//!
//! A filter is a mapping of field names to either a literal (exact equality) or an
//! operator mapping such as `{"$gte": 18}`. Conditions on different fields are ANDed.
//!
//! The filter vocabulary shares `$unset`, `$push`, `$pull` and `$rename` with the update
//! vocabulary. Here they are read-only structural predicates with their own variants;
//! see [`crate::update::UpdateOperator`] for the mutating counterparts.

use serde_json::Value;

/// A single operator inside a field's operator mapping
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOperator {
    /// `$eq`: field equals value
    Eq(Value),
    /// `$ne`: field missing or different
    Ne(Value),
    /// `$lt`: field < value
    Lt(Value),
    /// `$gt`: field > value
    Gt(Value),
    /// `$lte`: field <= value
    Lte(Value),
    /// `$gte`: field >= value
    Gte(Value),
    /// `$in`: field equals one of the values
    In(Vec<Value>),
    /// `$nin`: field missing or equal to none of the values
    Nin(Vec<Value>),
    /// `$exists`: field presence
    Exists(bool),
    /// `$unset`: when the field is a mapping, none of the named keys may be present
    Unset(Vec<String>),
    /// `$push`: when the field is a mapping, each named sub-field must be a sequence
    /// already holding the value
    Push(Vec<(String, Value)>),
    /// `$pull`: when the field is a mapping, each named sub-field must be a sequence
    /// not holding the value
    Pull(Vec<(String, Value)>),
    /// `$rename`: when the field is a mapping, none of the source keys may be present
    Rename(Vec<(String, String)>),
}

impl FilterOperator {
    /// Every operator name accepted in a filter
    pub const NAMES: [&'static str; 13] = [
        "$eq", "$ne", "$lt", "$gt", "$lte", "$gte", "$in", "$nin", "$exists", "$unset", "$push",
        "$pull", "$rename",
    ];

    /// Operator name as written in a filter expression
    pub fn name(&self) -> &'static str {
        match self {
            Self::Eq(_) => "$eq",
            Self::Ne(_) => "$ne",
            Self::Lt(_) => "$lt",
            Self::Gt(_) => "$gt",
            Self::Lte(_) => "$lte",
            Self::Gte(_) => "$gte",
            Self::In(_) => "$in",
            Self::Nin(_) => "$nin",
            Self::Exists(_) => "$exists",
            Self::Unset(_) => "$unset",
            Self::Push(_) => "$push",
            Self::Pull(_) => "$pull",
            Self::Rename(_) => "$rename",
        }
    }
}

/// What a single field has to satisfy
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Literal value: the field must be present and equal
    Equals(Value),
    /// Operator mapping: every operator must hold
    Operators(Vec<FilterOperator>),
}

/// Condition on one field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldCondition {
    pub field: String,
    pub condition: Condition,
}

/// Parsed filter expression
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub conditions: Vec<FieldCondition>,
}

impl Filter {
    /// Create an empty filter (matches all documents)
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a literal equality condition
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(FieldCondition {
            field: field.into(),
            condition: Condition::Equals(value.into()),
        });
        self
    }

    /// Add an operator condition
    pub fn with(mut self, field: impl Into<String>, op: FilterOperator) -> Self {
        let field = field.into();
        let existing = self
            .conditions
            .iter_mut()
            .find(|c| c.field == field && matches!(c.condition, Condition::Operators(_)));
        match existing {
            Some(FieldCondition {
                condition: Condition::Operators(ops),
                ..
            }) => ops.push(op),
            _ => self.conditions.push(FieldCondition {
                field,
                condition: Condition::Operators(vec![op]),
            }),
        }
        self
    }

    /// Check if this filter is empty (matches all)
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Get all fields referenced in this filter
    pub fn get_fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = self.conditions.iter().map(|c| c.field.as_str()).collect();
        fields.sort();
        fields.dedup();
        fields
    }
}

/// Projection specification (fields to include/exclude)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    pub fields: Vec<(String, ProjectionType)>,
}

impl Projection {
    /// Create a new empty projection
    pub fn new() -> Self {
        Self::default()
    }

    /// Inclusion projection over the given field names
    pub fn fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        fields
            .into_iter()
            .fold(Self::new(), |projection, field| projection.include(field))
    }

    /// Include a field
    pub fn include(mut self, field: impl Into<String>) -> Self {
        self.fields.push((field.into(), ProjectionType::Include));
        self
    }

    /// Exclude a field
    pub fn exclude(mut self, field: impl Into<String>) -> Self {
        self.fields.push((field.into(), ProjectionType::Exclude));
        self
    }

    /// Check if this is an inclusion projection
    pub fn is_inclusion(&self) -> bool {
        self.fields.iter().any(|(_, t)| *t == ProjectionType::Include)
    }

    /// Check if this is an exclusion projection
    pub fn is_exclusion(&self) -> bool {
        self.fields.iter().any(|(_, t)| *t == ProjectionType::Exclude)
    }

    fn lookup(&self, field: &str) -> Option<ProjectionType> {
        self.fields
            .iter()
            .rev()
            .find(|(f, _)| f == field)
            .map(|(_, t)| *t)
    }

    /// Check if a field should be included
    ///
    /// Inclusion mode keeps only the listed fields (`_id` included only when listed);
    /// exclusion mode keeps everything not listed.
    pub fn should_include(&self, field: &str) -> bool {
        if self.is_inclusion() {
            self.lookup(field) == Some(ProjectionType::Include)
        } else {
            self.lookup(field) != Some(ProjectionType::Exclude)
        }
    }
}

/// Projection type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionType {
    /// Include the field
    Include,
    /// Exclude the field
    Exclude,
}

/// Sort specification
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sort {
    /// Fields to sort by with their order
    pub fields: Vec<(String, SortOrder)>,
}

impl Sort {
    /// Create a new empty sort
    pub fn new() -> Self {
        Self::default()
    }

    /// Ascending sort on a single field
    pub fn by(field: impl Into<String>) -> Self {
        Self::new().asc(field)
    }

    /// Add a field to sort by
    pub fn add(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.fields.push((field.into(), order));
        self
    }

    /// Sort by field in ascending order
    pub fn asc(self, field: impl Into<String>) -> Self {
        self.add(field, SortOrder::Ascending)
    }

    /// Sort by field in descending order
    pub fn desc(self, field: impl Into<String>) -> Self {
        self.add(field, SortOrder::Descending)
    }

    /// Get the first sort field
    pub fn first_field(&self) -> Option<&str> {
        self.fields.first().map(|(f, _)| f.as_str())
    }
}

/// Sort order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Ascending order (1)
    #[default]
    Ascending,
    /// Descending order (-1)
    Descending,
}

/// Post-filter processing for find operations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Projection applied last
    pub projection: Option<Projection>,
    /// Sort specification
    pub sort: Option<Sort>,
    /// Number of documents to skip
    pub skip: usize,
    /// Maximum number of documents to return
    pub limit: Option<usize>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set projection
    pub fn projection(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    /// Set sort
    pub fn sort(mut self, sort: Sort) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Ascending sort on one field
    pub fn sort_by(self, field: impl Into<String>) -> Self {
        self.sort(Sort::by(field))
    }

    /// Set skip
    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    /// Set limit
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_builder() {
        let filter = Filter::new()
            .eq("status", "active")
            .with("age", FilterOperator::Gte(json!(18)))
            .with("age", FilterOperator::Lt(json!(65)));

        assert_eq!(filter.conditions.len(), 2);
        match &filter.conditions[1].condition {
            Condition::Operators(ops) => assert_eq!(ops.len(), 2),
            _ => panic!("Expected operator condition"),
        }
        assert_eq!(filter.get_fields(), vec!["age", "status"]);
    }

    #[test]
    fn test_empty_filter() {
        assert!(Filter::new().is_empty());
        assert!(!Filter::new().eq("a", 1).is_empty());
    }

    #[test]
    fn test_operator_names() {
        assert_eq!(FilterOperator::Gte(json!(1)).name(), "$gte");
        assert_eq!(FilterOperator::Rename(vec![]).name(), "$rename");
        assert!(FilterOperator::NAMES.contains(&"$exists"));
    }

    #[test]
    fn test_projection_include() {
        let proj = Projection::fields(["name", "age"]);
        assert!(proj.is_inclusion());
        assert!(!proj.is_exclusion());
        assert!(proj.should_include("name"));
        assert!(proj.should_include("age"));
        assert!(!proj.should_include("_id"));
        assert!(!proj.should_include("email"));
    }

    #[test]
    fn test_projection_exclude() {
        let proj = Projection::new().exclude("password").exclude("secret");
        assert!(!proj.is_inclusion());
        assert!(proj.is_exclusion());
        assert!(proj.should_include("name"));
        assert!(!proj.should_include("password"));
        assert!(!proj.should_include("secret"));
    }

    #[test]
    fn test_sort_creation() {
        let sort = Sort::new().asc("name").desc("age");
        assert_eq!(sort.fields.len(), 2);
        assert_eq!(sort.fields[0], ("name".to_string(), SortOrder::Ascending));
        assert_eq!(sort.fields[1], ("age".to_string(), SortOrder::Descending));
        assert_eq!(sort.first_field(), Some("name"));
        assert_eq!(Sort::new().first_field(), None);
    }

    #[test]
    fn test_find_options_builder() {
        let options = FindOptions::new()
            .sort_by("age")
            .skip(10)
            .limit(20)
            .projection(Projection::fields(["name"]));

        assert_eq!(options.skip, 10);
        assert_eq!(options.limit, Some(20));
        assert_eq!(options.sort.unwrap().first_field(), Some("age"));
        assert!(options.projection.is_some());
    }
}
