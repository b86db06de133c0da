//! Document and value helpers for EmberDB
//!
//! This module provides the core data structures for document storage:
//! - Document: an insertion-ordered JSON mapping
//! - ObjectId: the 24-hex-character identifier assigned to every inserted document
//! - Field path navigation and value comparison shared by filters, sorting and aggregation

use chrono::Utc;
use rand::{Rng, RngCore};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, StoreError};

/// A stored document: field names mapped to JSON values, in insertion order
pub type Document = Map<String, Value>;

/// Name of the system identifier field
pub const ID_FIELD: &str = "_id";

/// Insert-time sentinel resolved into the next integer of a per-field sequence
pub const AUTO_INC: &str = "auto_inc";

/// Insert-time sentinel resolved into a short random token
pub const UNIQUE_ID: &str = "unique_id";

/// Length of the token generated for [`UNIQUE_ID`]
pub const UNIQUE_ID_LEN: usize = 10;

/// Machine segment used when no host entropy can be obtained
const PLACEHOLDER_MACHINE_ID: [u8; 3] = [0; 3];

/// Document identifier: 4 bytes unix seconds, 3 bytes host entropy hash,
/// 2 bytes process id, 3 bytes random counter. Rendered as 24 lowercase hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    /// Generate a new identifier
    pub fn new() -> Self {
        let mut bytes = [0u8; 12];

        // Timestamp (4 bytes)
        let timestamp = Utc::now().timestamp() as u32;
        bytes[0..4].copy_from_slice(&timestamp.to_be_bytes());

        // Host entropy hash (3 bytes)
        bytes[4..7].copy_from_slice(&machine_id());

        // Process id (2 bytes)
        let pid = (std::process::id() & 0xFFFF) as u16;
        bytes[7..9].copy_from_slice(&pid.to_be_bytes());

        // Counter (3 bytes)
        let counter = rand::random::<u32>() & 0x00FF_FFFF;
        bytes[9..12].copy_from_slice(&counter.to_be_bytes()[1..4]);

        Self(bytes)
    }

    /// Create from bytes
    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    /// Get bytes
    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }

    /// Seconds since the unix epoch at generation time
    pub fn timestamp(&self) -> i64 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.0[0..4]);
        u32::from_be_bytes(bytes) as i64
    }

    /// Whether `s` has the shape of an identifier
    pub fn is_valid(s: &str) -> bool {
        s.len() == 24 && s.bytes().all(|b| b.is_ascii_hexdigit())
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for ObjectId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        if !Self::is_valid(s) {
            return Err(StoreError::malformed(format!("'{}' is not an identifier", s)));
        }
        let decoded =
            hex::decode(s).map_err(|e| StoreError::malformed(format!("'{}': {}", s, e)))?;
        let mut bytes = [0u8; 12];
        bytes.copy_from_slice(&decoded);
        Ok(Self(bytes))
    }
}

/// Generate a fresh identifier string
pub fn generate_id() -> String {
    ObjectId::new().to_string()
}

fn machine_id() -> [u8; 3] {
    let mut seed = [0u8; 6];
    if rand::rngs::OsRng.try_fill_bytes(&mut seed).is_err() {
        return PLACEHOLDER_MACHINE_ID;
    }
    let digest = Sha256::digest(seed);
    [digest[0], digest[1], digest[2]]
}

/// Random alphanumeric token used to resolve [`UNIQUE_ID`]
pub fn unique_token() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(UNIQUE_ID_LEN)
        .map(char::from)
        .collect()
}

/// Convert a JSON value into a document, rejecting non-objects
pub fn into_document(value: Value) -> Result<Document> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::malformed(format!(
            "document must be a JSON object, got {}",
            type_name(&other)
        ))),
    }
}

/// Get a field by name, falling back to a dotted path (e.g. "user.address.city")
pub fn get_field<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    if let Some(value) = doc.get(path) {
        return Some(value);
    }
    if !path.contains('.') {
        return None;
    }

    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Object(obj) => obj.get(part)?,
            // Support array indexing
            Value::Array(arr) => arr.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// JSON type name used in error messages
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Structural equality; numbers compare by value so `1` equals `1.0`
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => {
            match (Numeric::from_value(a), Numeric::from_value(b)) {
                (Some(x), Some(y)) => x.cmp_numeric(&y) == Ordering::Equal,
                _ => false,
            }
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| values_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).map(|w| values_equal(v, w)).unwrap_or(false))
        }
        _ => a == b,
    }
}

/// True if `value` equals any element of `values`
pub fn contains_value(values: &[Value], value: &Value) -> bool {
    values.iter().any(|v| values_equal(v, value))
}

/// Order two values of compatible types
///
/// Numbers compare with numbers, strings with strings and booleans with booleans.
/// Any other pairing is a [`StoreError::TypeMismatch`].
pub fn compare_values(a: &Value, b: &Value) -> Result<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => {
            match (Numeric::from_value(a), Numeric::from_value(b)) {
                (Some(x), Some(y)) => Ok(x.cmp_numeric(&y)),
                _ => Err(StoreError::type_mismatch("non-finite number")),
            }
        }
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Ok(x.cmp(y)),
        _ => Err(StoreError::type_mismatch(format!(
            "cannot compare {} with {}",
            type_name(a),
            type_name(b)
        ))),
    }
}

/// Total order over all values, used for sorting
///
/// Values of different types order by type rank: null, numbers, strings, objects,
/// arrays, booleans. Missing fields are passed as `None` and sort lowest.
pub fn canonical_cmp(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => {
            let rank = type_rank(x).cmp(&type_rank(y));
            if rank != Ordering::Equal {
                return rank;
            }
            match (x, y) {
                (Value::Array(l), Value::Array(r)) => {
                    for (lv, rv) in l.iter().zip(r) {
                        let ord = canonical_cmp(Some(lv), Some(rv));
                        if ord != Ordering::Equal {
                            return ord;
                        }
                    }
                    l.len().cmp(&r.len())
                }
                (Value::Object(l), Value::Object(r)) => {
                    for ((lk, lv), (rk, rv)) in l.iter().zip(r) {
                        let ord = lk.cmp(rk).then_with(|| canonical_cmp(Some(lv), Some(rv)));
                        if ord != Ordering::Equal {
                            return ord;
                        }
                    }
                    l.len().cmp(&r.len())
                }
                _ => compare_values(x, y).unwrap_or(Ordering::Equal),
            }
        }
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Numeric view of a JSON number keeping integers exact
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Numeric {
    Int(i64),
    Float(f64),
}

impl Numeric {
    pub fn from_value(value: &Value) -> Option<Self> {
        let n = match value {
            Value::Number(n) => n,
            _ => return None,
        };
        if let Some(i) = n.as_i64() {
            Some(Self::Int(i))
        } else {
            n.as_f64().map(Self::Float)
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }

    pub fn to_value(self) -> Value {
        match self {
            Self::Int(i) => Value::from(i),
            Self::Float(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        }
    }

    pub fn cmp_numeric(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            _ => self
                .as_f64()
                .partial_cmp(&other.as_f64())
                .unwrap_or(Ordering::Equal),
        }
    }

    pub fn add(self, other: Self) -> Self {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a
                .checked_add(b)
                .map(Self::Int)
                .unwrap_or(Self::Float(a as f64 + b as f64)),
            _ => Self::Float(self.as_f64() + other.as_f64()),
        }
    }

    pub fn mul(self, other: Self) -> Self {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a
                .checked_mul(b)
                .map(Self::Int)
                .unwrap_or(Self::Float(a as f64 * b as f64)),
            _ => Self::Float(self.as_f64() * other.as_f64()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn doc(value: Value) -> Document {
        into_document(value).unwrap()
    }

    #[test]
    fn test_object_id_format() {
        let id = ObjectId::new().to_string();
        assert_eq!(id.len(), 24);
        assert!(ObjectId::is_valid(&id));
    }

    #[test]
    fn test_object_id_uniqueness() {
        let ids: HashSet<String> = (0..1000).map(|_| generate_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_object_id_segments() {
        let oid = ObjectId::new();
        let now = Utc::now().timestamp();
        assert!((now - oid.timestamp()).abs() <= 1);

        let pid = (std::process::id() & 0xFFFF) as u16;
        assert_eq!(&oid.to_string()[14..18], format!("{:04x}", pid));
    }

    #[test]
    fn test_object_id_parse() {
        let oid = ObjectId::new();
        let parsed: ObjectId = oid.to_string().parse().unwrap();
        assert_eq!(parsed, oid);
        assert!("not-an-id".parse::<ObjectId>().is_err());
    }

    #[test]
    fn test_unique_token() {
        let token = unique_token();
        assert_eq!(token.len(), UNIQUE_ID_LEN);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_into_document_rejects_non_object() {
        assert!(into_document(json!([1, 2])).is_err());
        assert!(into_document(json!({"a": 1})).is_ok());
    }

    #[test]
    fn test_get_field_path_navigation() {
        let d = doc(json!({
            "user": {"name": "John", "address": {"city": "New York"}},
            "tags": ["a", "b"],
            "dotted.key": 1
        }));

        assert_eq!(get_field(&d, "user.name"), Some(&json!("John")));
        assert_eq!(get_field(&d, "user.address.city"), Some(&json!("New York")));
        assert_eq!(get_field(&d, "tags.1"), Some(&json!("b")));
        assert_eq!(get_field(&d, "dotted.key"), Some(&json!(1)));
        assert!(get_field(&d, "user.email").is_none());
    }

    #[test]
    fn test_values_equal_numbers() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(!values_equal(&json!(1), &json!("1")));
        assert!(values_equal(&json!({"a": 1, "b": 2}), &json!({"b": 2, "a": 1.0})));
        assert!(!values_equal(&json!([1, 2]), &json!([2, 1])));
    }

    #[test]
    fn test_compare_values() {
        assert_eq!(compare_values(&json!(30), &json!(18)).unwrap(), Ordering::Greater);
        assert_eq!(compare_values(&json!(1.5), &json!(2)).unwrap(), Ordering::Less);
        assert_eq!(compare_values(&json!("a"), &json!("b")).unwrap(), Ordering::Less);
        let err = compare_values(&json!("30"), &json!(18)).unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch(_)));
        assert!(compare_values(&json!(null), &json!(1)).is_err());
    }

    #[test]
    fn test_canonical_cmp_missing_lowest() {
        assert_eq!(canonical_cmp(None, Some(&json!(null))), Ordering::Less);
        assert_eq!(canonical_cmp(Some(&json!(1)), Some(&json!("a"))), Ordering::Less);
        assert_eq!(canonical_cmp(Some(&json!(3)), Some(&json!(2.5))), Ordering::Greater);
    }

    #[test]
    fn test_numeric_arithmetic() {
        assert_eq!(Numeric::Int(2).add(Numeric::Int(3)), Numeric::Int(5));
        assert_eq!(Numeric::Int(2).mul(Numeric::Float(1.5)), Numeric::Float(3.0));
        assert_eq!(Numeric::Int(i64::MAX).add(Numeric::Int(1)).as_f64(), i64::MAX as f64 + 1.0);
    }
}
