//! The subset of the ORM query language the adapter evaluates.
//!
//! The database cannot run these queries itself, so `find` and friends read the
//! whole collection and apply the criteria in process: filter, then sort, then
//! skip, then limit.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use crate::adapter::error::{AdapterError, AdapterResult};
use crate::adapter::value::{parse_date, FieldValue, Record};

const CRITERIA_KEYS: [&str; 5] = ["where", "limit", "skip", "sort", "select"];

#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    Equal(Value),
    NotEqual(Value),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    LessThan(Value),
    LessThanOrEqual(Value),
    GreaterThan(Value),
    GreaterThanOrEqual(Value),
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    /// SQL-style pattern where `%` matches any run of characters.
    Like(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    All,
    Field { field: String, condition: Condition },
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Criteria {
    filter: Filter,
    sort: Vec<SortKey>,
    skip: usize,
    limit: Option<usize>,
}

impl Default for Criteria {
    fn default() -> Self {
        Self::all()
    }
}

impl Criteria {
    /// Matches every record.
    pub fn all() -> Self {
        Self {
            filter: Filter::All,
            sort: Vec::new(),
            skip: 0,
            limit: None,
        }
    }

    /// Parses ORM criteria: either `{ "where": .., "sort": .., "skip": .., "limit": .. }`
    /// or a bare where-object. `null` matches everything.
    pub fn from_value(value: Value) -> AdapterResult<Self> {
        match value {
            Value::Null => Ok(Self::all()),
            Value::Object(map)
                if map
                    .keys()
                    .any(|key| CRITERIA_KEYS.contains(&key.as_str())) =>
            {
                Self::from_structured(map)
            }
            Value::Object(map) => Ok(Self {
                filter: parse_where(&map)?,
                ..Self::all()
            }),
            other => Err(AdapterError::invalid_criteria(format!(
                "expected an object, got {other}"
            ))),
        }
    }

    fn from_structured(map: Map<String, Value>) -> AdapterResult<Self> {
        let filter = match map.get("where") {
            None | Some(Value::Null) => Filter::All,
            Some(Value::Object(clauses)) => parse_where(clauses)?,
            Some(other) => {
                return Err(AdapterError::invalid_criteria(format!(
                    "`where` must be an object, got {other}"
                )))
            }
        };
        Ok(Self {
            filter,
            sort: map.get("sort").map(parse_sort).transpose()?.unwrap_or_default(),
            skip: parse_count(map.get("skip"), "skip")?.unwrap_or(0),
            limit: parse_count(map.get("limit"), "limit")?,
        })
    }

    pub fn where_field(mut self, field: impl Into<String>, condition: Condition) -> Self {
        let clause = Filter::Field {
            field: field.into(),
            condition,
        };
        self.filter = match self.filter {
            Filter::All => clause,
            Filter::And(mut filters) => {
                filters.push(clause);
                Filter::And(filters)
            }
            other => Filter::And(vec![other, clause]),
        };
        self
    }

    pub fn where_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.where_field(field, Condition::Equal(value.into()))
    }

    pub fn sort_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push(SortKey {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.filter.matches(record)
    }

    /// Filters, orders and pages `records`.
    pub fn apply(&self, records: Vec<Record>) -> Vec<Record> {
        self.apply_by(records, |record| record)
    }

    pub(crate) fn apply_by<T, F>(&self, items: Vec<T>, record_of: F) -> Vec<T>
    where
        F: Fn(&T) -> &Record,
    {
        let mut selected: Vec<T> = items
            .into_iter()
            .filter(|item| self.filter.matches(record_of(item)))
            .collect();

        if !self.sort.is_empty() {
            selected.sort_by(|left, right| self.compare(record_of(left), record_of(right)));
        }

        let paged = selected.into_iter().skip(self.skip);
        match self.limit {
            Some(limit) => paged.take(limit).collect(),
            None => paged.collect(),
        }
    }

    fn compare(&self, left: &Record, right: &Record) -> Ordering {
        for key in &self.sort {
            let ordering = compare_field_values(
                left.get(&key.field).unwrap_or(&FieldValue::Null),
                right.get(&key.field).unwrap_or(&FieldValue::Null),
            );
            let ordering = match key.direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

impl Filter {
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Filter::All => true,
            Filter::And(filters) => filters.iter().all(|filter| filter.matches(record)),
            Filter::Or(filters) => filters.iter().any(|filter| filter.matches(record)),
            Filter::Field { field, condition } => {
                condition.matches(record.get(field).unwrap_or(&FieldValue::Null))
            }
        }
    }
}

impl Condition {
    pub fn matches(&self, value: &FieldValue) -> bool {
        match self {
            Condition::Equal(expected) => values_equal(value, expected),
            Condition::NotEqual(expected) => !values_equal(value, expected),
            Condition::In(options) => options.iter().any(|option| values_equal(value, option)),
            Condition::NotIn(options) => !options.iter().any(|option| values_equal(value, option)),
            Condition::LessThan(bound) => compare_to(value, bound) == Some(Ordering::Less),
            Condition::LessThanOrEqual(bound) => matches!(
                compare_to(value, bound),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Condition::GreaterThan(bound) => compare_to(value, bound) == Some(Ordering::Greater),
            Condition::GreaterThanOrEqual(bound) => matches!(
                compare_to(value, bound),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Condition::Contains(needle) => {
                let needle = needle.to_lowercase();
                match value {
                    FieldValue::String(text) => text.to_lowercase().contains(&needle),
                    FieldValue::Array(items) => items
                        .iter()
                        .filter_map(FieldValue::as_str)
                        .any(|item| item.to_lowercase() == needle),
                    _ => false,
                }
            }
            Condition::StartsWith(prefix) => value
                .as_str()
                .is_some_and(|text| text.to_lowercase().starts_with(&prefix.to_lowercase())),
            Condition::EndsWith(suffix) => value
                .as_str()
                .is_some_and(|text| text.to_lowercase().ends_with(&suffix.to_lowercase())),
            Condition::Like(pattern) => value
                .as_str()
                .is_some_and(|text| like_matches(&text.to_lowercase(), &pattern.to_lowercase())),
        }
    }
}

fn parse_where(clauses: &Map<String, Value>) -> AdapterResult<Filter> {
    let mut filters = Vec::with_capacity(clauses.len());
    for (key, value) in clauses {
        match key.as_str() {
            "or" => filters.push(Filter::Or(parse_where_list(value, "or")?)),
            "and" => filters.push(Filter::And(parse_where_list(value, "and")?)),
            field => filters.push(parse_field(field, value)?),
        }
    }
    Ok(match filters.len() {
        0 => Filter::All,
        1 => filters.remove(0),
        _ => Filter::And(filters),
    })
}

fn parse_where_list(value: &Value, operator: &str) -> AdapterResult<Vec<Filter>> {
    let Value::Array(items) = value else {
        return Err(AdapterError::invalid_criteria(format!(
            "`{operator}` expects an array of clauses"
        )));
    };
    items
        .iter()
        .map(|item| match item {
            Value::Object(clauses) => parse_where(clauses),
            other => Err(AdapterError::invalid_criteria(format!(
                "`{operator}` clause must be an object, got {other}"
            ))),
        })
        .collect()
}

fn parse_field(field: &str, value: &Value) -> AdapterResult<Filter> {
    let clause = |condition: Condition| Filter::Field {
        field: field.to_owned(),
        condition,
    };
    match value {
        Value::Array(options) => Ok(clause(Condition::In(options.clone()))),
        Value::Object(modifiers) if modifiers.is_empty() => Err(AdapterError::invalid_criteria(
            format!("empty modifier object for `{field}`"),
        )),
        Value::Object(modifiers) => {
            let mut filters = modifiers
                .iter()
                .map(|(modifier, operand)| parse_condition(field, modifier, operand).map(&clause))
                .collect::<AdapterResult<Vec<_>>>()?;
            Ok(if filters.len() == 1 {
                filters.remove(0)
            } else {
                Filter::And(filters)
            })
        }
        scalar => Ok(clause(Condition::Equal(scalar.clone()))),
    }
}

fn parse_condition(field: &str, modifier: &str, operand: &Value) -> AdapterResult<Condition> {
    let text = || match operand {
        Value::String(text) => Ok(text.clone()),
        other => Err(AdapterError::invalid_criteria(format!(
            "`{modifier}` on `{field}` expects a string, got {other}"
        ))),
    };
    let list = || match operand {
        Value::Array(items) => Ok(items.clone()),
        other => Err(AdapterError::invalid_criteria(format!(
            "`{modifier}` on `{field}` expects an array, got {other}"
        ))),
    };

    Ok(match modifier {
        "!" | "not" | "!=" => match operand {
            Value::Array(items) => Condition::NotIn(items.clone()),
            other => Condition::NotEqual(other.clone()),
        },
        "<" | "lessThan" => Condition::LessThan(operand.clone()),
        "<=" | "lessThanOrEqual" => Condition::LessThanOrEqual(operand.clone()),
        ">" | "greaterThan" => Condition::GreaterThan(operand.clone()),
        ">=" | "greaterThanOrEqual" => Condition::GreaterThanOrEqual(operand.clone()),
        "in" => Condition::In(list()?),
        "nin" => Condition::NotIn(list()?),
        "contains" => Condition::Contains(text()?),
        "startsWith" => Condition::StartsWith(text()?),
        "endsWith" => Condition::EndsWith(text()?),
        "like" => Condition::Like(text()?),
        unknown => {
            return Err(AdapterError::invalid_criteria(format!(
                "unknown modifier `{unknown}` on `{field}`"
            )))
        }
    })
}

fn parse_sort(value: &Value) -> AdapterResult<Vec<SortKey>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::String(clause) => clause
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| -> AdapterResult<SortKey> {
                let mut words = part.split_whitespace();
                let field = words.next().unwrap_or_default().to_owned();
                let direction = match words.next() {
                    Some(direction) => parse_direction(&Value::String(direction.to_owned()))?,
                    None => SortDirection::Ascending,
                };
                if let Some(extra) = words.next() {
                    return Err(AdapterError::invalid_criteria(format!(
                        "unexpected `{extra}` in sort clause `{part}`"
                    )));
                }
                Ok(SortKey { field, direction })
            })
            .collect(),
        Value::Object(fields) => fields
            .iter()
            .map(|(field, direction)| -> AdapterResult<SortKey> {
                Ok(SortKey {
                    field: field.clone(),
                    direction: parse_direction(direction)?,
                })
            })
            .collect(),
        Value::Array(items) => items.iter().try_fold(Vec::new(), |mut keys, item| -> AdapterResult<Vec<SortKey>> {
            keys.extend(parse_sort(item)?);
            Ok(keys)
        }),
        other => Err(AdapterError::invalid_criteria(format!(
            "unsupported sort clause {other}"
        ))),
    }
}

fn parse_direction(value: &Value) -> AdapterResult<SortDirection> {
    match value {
        Value::Number(number) if number.as_i64() == Some(1) => Ok(SortDirection::Ascending),
        Value::Number(number) if number.as_i64() == Some(-1) => Ok(SortDirection::Descending),
        Value::String(text) if text.eq_ignore_ascii_case("asc") => Ok(SortDirection::Ascending),
        Value::String(text) if text.eq_ignore_ascii_case("desc") => Ok(SortDirection::Descending),
        other => Err(AdapterError::invalid_criteria(format!(
            "unsupported sort direction {other}"
        ))),
    }
}

fn parse_count(value: Option<&Value>, name: &str) -> AdapterResult<Option<usize>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => number
            .as_u64()
            .map(|count| Some(count as usize))
            .ok_or_else(|| {
                AdapterError::invalid_criteria(format!(
                    "`{name}` must be a non-negative integer, got {number}"
                ))
            }),
        Some(other) => Err(AdapterError::invalid_criteria(format!(
            "`{name}` must be a non-negative integer, got {other}"
        ))),
    }
}

fn values_equal(value: &FieldValue, expected: &Value) -> bool {
    match (value, expected) {
        (FieldValue::Null, Value::Null) => true,
        (FieldValue::Date(date), other) => {
            parse_date(&FieldValue::from(other.clone())) == Some(*date)
        }
        (FieldValue::String(left), Value::String(right)) => {
            left.to_lowercase() == right.to_lowercase()
        }
        (FieldValue::Number(left), Value::Number(right)) => left.as_f64() == right.as_f64(),
        (other, expected) => other.to_json() == *expected,
    }
}

fn compare_to(value: &FieldValue, bound: &Value) -> Option<Ordering> {
    match (value, bound) {
        (FieldValue::Date(date), other) => {
            parse_date(&FieldValue::from(other.clone())).map(|bound| date.cmp(&bound))
        }
        (FieldValue::Number(left), Value::Number(right)) => {
            left.as_f64()?.partial_cmp(&right.as_f64()?)
        }
        (FieldValue::String(left), Value::String(right)) => Some(left.as_str().cmp(right)),
        _ => None,
    }
}

fn type_rank(value: &FieldValue) -> u8 {
    match value {
        FieldValue::Null => 0,
        FieldValue::Bool(_) => 1,
        FieldValue::Number(_) => 2,
        FieldValue::String(_) => 3,
        FieldValue::Date(_) => 4,
        FieldValue::Array(_) => 5,
        FieldValue::Map(_) => 6,
    }
}

fn compare_field_values(left: &FieldValue, right: &FieldValue) -> Ordering {
    match (left, right) {
        (FieldValue::Bool(a), FieldValue::Bool(b)) => a.cmp(b),
        (FieldValue::Number(a), FieldValue::Number(b)) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (FieldValue::String(a), FieldValue::String(b)) => a.cmp(b),
        (FieldValue::Date(a), FieldValue::Date(b)) => a.cmp(b),
        (FieldValue::Array(a), FieldValue::Array(b)) => a
            .iter()
            .zip(b.iter())
            .map(|(x, y)| compare_field_values(x, y))
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or_else(|| a.len().cmp(&b.len())),
        _ => type_rank(left).cmp(&type_rank(right)),
    }
}

fn like_matches(text: &str, pattern: &str) -> bool {
    let parts: Vec<&str> = pattern.split('%').collect();
    let Some((first, rest)) = parts.split_first() else {
        return text.is_empty();
    };
    let Some(mut remaining) = text.strip_prefix(first) else {
        return false;
    };
    let Some((last, middle)) = rest.split_last() else {
        return remaining.is_empty();
    };
    for part in middle {
        match remaining.find(part) {
            Some(index) => remaining = &remaining[index + part.len()..],
            None => return false,
        }
    }
    remaining.len() >= last.len() && remaining.ends_with(last)
}
