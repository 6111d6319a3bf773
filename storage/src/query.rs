//! Generic query vocabulary: filters, sort, pagination.
//!
//! Each backend translates this vocabulary into its native query form;
//! backends without native support for a part of it (and the fallback scan
//! paths) evaluate it in-process with the helpers at the bottom.

use std::cmp::Ordering;

use serde_json::Value;

use crate::record::Record;

/// Default `limit` applied when a caller does not set one. Kept finite so an
/// unbounded `find` cannot be expressed by accident.
pub const DEFAULT_LIMIT: u64 = 1000;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// A single predicate applied to a field.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Field equals the value (`null` also matches an absent field).
    Eq(Value),
    /// Field is greater than or equal to the value.
    Gte(Value),
    /// Field is less than or equal to the value.
    Lte(Value),
    /// Field lies in the inclusive range.
    Between { gte: Value, lte: Value },
    /// Field equals one of the values.
    In(Vec<Value>),
    /// String field contains the substring, case-insensitively.
    Contains(String),
}

/// A filter clause binding a dot-separated field path to a condition.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterClause {
    pub field: String,
    pub condition: Condition,
}

/// A conjunction of filter clauses.
///
/// An empty filter matches every record in the collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<FilterClause>,
}

impl Filter {
    /// Create an empty filter (matches everything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality clause.
    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(field, Condition::Eq(value.into()))
    }

    /// Add a greater-than-or-equal clause.
    pub fn gte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(field, Condition::Gte(value.into()))
    }

    /// Add a less-than-or-equal clause.
    pub fn lte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(field, Condition::Lte(value.into()))
    }

    /// Add an inclusive range clause.
    pub fn between(
        self,
        field: impl Into<String>,
        gte: impl Into<Value>,
        lte: impl Into<Value>,
    ) -> Self {
        self.push(
            field,
            Condition::Between {
                gte: gte.into(),
                lte: lte.into(),
            },
        )
    }

    /// Add a set-membership clause.
    pub fn is_in(self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.push(field, Condition::In(values))
    }

    /// Add a case-insensitive substring clause.
    pub fn contains(self, field: impl Into<String>, needle: impl Into<String>) -> Self {
        self.push(field, Condition::Contains(needle.into()))
    }

    fn push(mut self, field: impl Into<String>, condition: Condition) -> Self {
        self.clauses.push(FilterClause {
            field: field.into(),
            condition,
        });
        self
    }

    /// Whether the filter has no clauses.
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// The clauses, in insertion order.
    pub fn clauses(&self) -> &[FilterClause] {
        &self.clauses
    }

    /// Evaluate the filter against a record in-process.
    pub fn matches(&self, record: &Record) -> bool {
        self.clauses.iter().all(|clause| clause.matches(record))
    }
}

impl FilterClause {
    fn matches(&self, record: &Record) -> bool {
        let value = field_value(record, &self.field);
        match &self.condition {
            Condition::Eq(expected) => value.unwrap_or(Value::Null) == *expected,
            Condition::Gte(bound) => value.is_some_and(|v| {
                compare_values(&v, bound).is_some_and(|ord| ord != Ordering::Less)
            }),
            Condition::Lte(bound) => value.is_some_and(|v| {
                compare_values(&v, bound).is_some_and(|ord| ord != Ordering::Greater)
            }),
            Condition::Between { gte, lte } => value.is_some_and(|v| {
                compare_values(&v, gte).is_some_and(|ord| ord != Ordering::Less)
                    && compare_values(&v, lte).is_some_and(|ord| ord != Ordering::Greater)
            }),
            Condition::In(values) => value.is_some_and(|v| values.contains(&v)),
            Condition::Contains(needle) => value
                .and_then(|v| {
                    v.as_str()
                        .map(|s| s.to_lowercase().contains(&needle.to_lowercase()))
                })
                .unwrap_or(false),
        }
    }
}

/// Options for a `find`: pagination and an ordered list of sort keys.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Number of records to skip.
    pub skip: u64,

    /// Maximum number of records to return; `DEFAULT_LIMIT` when unset.
    pub limit: Option<u64>,

    /// Sort keys, applied in order.
    pub sort: Vec<(String, SortOrder)>,
}

impl FindOptions {
    /// Create options with no skip, default limit, and no sort.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of records to skip.
    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    /// Set the maximum number of records to return.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Append a sort key.
    pub fn sort_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push((field.into(), order));
        self
    }

    /// The limit to apply, defaulting to `DEFAULT_LIMIT`.
    pub fn effective_limit(&self) -> u64 {
        self.limit.unwrap_or(DEFAULT_LIMIT)
    }
}

/// Resolve a field path against a record, treating `id` as a field.
pub(crate) fn field_value(record: &Record, path: &str) -> Option<Value> {
    if path == "id" {
        return Some(Value::String(record.id.clone()));
    }
    record.get(path).cloned()
}

/// Compare two JSON values of like type; `None` for incomparable types.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Sort records in place by the given keys. The sort is stable, so records
/// equal under every key keep their encounter order.
pub(crate) fn apply_sort(records: &mut [Record], sort: &[(String, SortOrder)]) {
    records.sort_by(|a, b| {
        for (field, order) in sort {
            let ord = match (field_value(a, field), field_value(b, field)) {
                (Some(x), Some(y)) => compare_values(&x, &y).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Greater,
                (None, Some(_)) => Ordering::Less,
                (None, None) => Ordering::Equal,
            };
            let ord = match order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

/// Apply sort, skip, and limit in-process, for backends (and fallback paths)
/// without native support.
pub(crate) fn apply_in_process(mut records: Vec<Record>, options: &FindOptions) -> Vec<Record> {
    if !options.sort.is_empty() {
        apply_sort(&mut records, &options.sort);
    }
    records
        .into_iter()
        .skip(options.skip as usize)
        .take(options.effective_limit() as usize)
        .collect()
}
