//! Search DSL parsing.
//!
//! ```text
//! { "from": 0, "size": 10,
//!   "query": { "must":   { "fields": [...], "terms": [...], "ranges": [...] },
//!              "should": { ... } } }
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{ErrorKind, LedgerError, LedgerResult};

static KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_.]+$").expect("Failed to compile key pattern"));

/// Comparison operators understood by `fields` and `ranges`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
    Like,
    NotLike,
    Is,
    IsNot,
    In,
    NotIn,
}

impl Operator {
    pub fn parse(op: &str) -> LedgerResult<Self> {
        match op {
            "eq" => Ok(Self::Eq),
            "ne" => Ok(Self::Ne),
            "gt" => Ok(Self::Gt),
            "lt" => Ok(Self::Lt),
            "gte" => Ok(Self::Gte),
            "lte" => Ok(Self::Lte),
            "like" => Ok(Self::Like),
            "notlike" => Ok(Self::NotLike),
            "is" => Ok(Self::Is),
            "isnot" => Ok(Self::IsNot),
            "in" => Ok(Self::In),
            "notin" => Ok(Self::NotIn),
            other => Err(LedgerError::new(ErrorKind::SearchQueryHasInvalidFormat)
                .extend(format!("unknown operator '{}'", other))),
        }
    }

    /// SQL comparison token for scalar operators.
    pub fn sql(self) -> &'static str {
        match self {
            Self::Eq | Self::In => "=",
            Self::Ne | Self::NotIn => "<>",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::Like => "LIKE",
            Self::NotLike => "NOT LIKE",
            Self::Is => "IS",
            Self::IsNot => "IS NOT",
        }
    }

    pub fn is_list(self) -> bool {
        matches!(self, Self::In | Self::NotIn)
    }

    /// Element operator used when a list operator is expanded.
    pub fn element(self) -> Self {
        match self {
            Self::In => Self::Eq,
            Self::NotIn => Self::Ne,
            other => other,
        }
    }
}

/// `{column: {op: value}}` against a native column.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldCondition {
    pub column: String,
    pub op: Operator,
    pub value: Value,
}

/// `{path: value}`: JSON containment on `data`.
#[derive(Debug, Clone, PartialEq)]
pub struct TermCondition {
    pub path: String,
    pub value: Value,
}

/// `{path: {op: value}}`: scalar comparison on a `data` path.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeCondition {
    pub path: String,
    pub op: Operator,
    pub value: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Group {
    pub fields: Vec<FieldCondition>,
    pub terms: Vec<TermCondition>,
    pub ranges: Vec<RangeCondition>,
}

impl Group {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.terms.is_empty() && self.ranges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len() + self.terms.len() + self.ranges.len()
    }
}

/// Parsed and key-validated search document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchQuery {
    pub from: i64,
    pub size: i64,
    pub must: Group,
    pub should: Group,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRoot {
    from: Option<i64>,
    size: Option<i64>,
    query: Option<RawClause>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawClause {
    must: Option<RawGroup>,
    should: Option<RawGroup>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawGroup {
    #[serde(default)]
    fields: Vec<Map<String, Value>>,
    #[serde(default)]
    terms: Vec<Map<String, Value>>,
    #[serde(default)]
    ranges: Vec<Map<String, Value>>,
}

impl SearchQuery {
    /// Parse a DSL document. Blank input selects everything.
    pub fn parse(raw: &str) -> LedgerResult<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        let root: RawRoot = serde_json::from_str(raw).map_err(|e| {
            LedgerError::new(ErrorKind::SearchQueryHasInvalidFormat).with_source(e)
        })?;
        let clause = root.query.unwrap_or_default();

        Ok(Self {
            from: root.from.unwrap_or(0),
            size: root.size.unwrap_or(0),
            must: parse_group(clause.must.unwrap_or_default())?,
            should: parse_group(clause.should.unwrap_or_default())?,
        })
    }
}

fn parse_group(raw: RawGroup) -> LedgerResult<Group> {
    let mut group = Group::default();

    for cond in raw.fields {
        for (column, ops) in cond {
            check_key(&column)?;
            for (op, value) in operator_map(&column, ops)? {
                group.fields.push(FieldCondition {
                    column: column.clone(),
                    op,
                    value: check_value(&column, op, value)?,
                });
            }
        }
    }

    for cond in raw.terms {
        for (path, value) in cond {
            check_key(&path)?;
            group.terms.push(TermCondition { path, value });
        }
    }

    for cond in raw.ranges {
        for (path, ops) in cond {
            check_key(&path)?;
            for (op, value) in operator_map(&path, ops)? {
                group.ranges.push(RangeCondition {
                    path: path.clone(),
                    op,
                    value: check_value(&path, op, value)?,
                });
            }
        }
    }

    Ok(group)
}

fn check_key(key: &str) -> LedgerResult<()> {
    if KEY_PATTERN.is_match(key) && !key.starts_with('.') && !key.ends_with('.') {
        Ok(())
    } else {
        Err(LedgerError::new(ErrorKind::SearchQueryHasInvalidKeys).extend(format!("'{}'", key)))
    }
}

fn operator_map(key: &str, ops: Value) -> LedgerResult<Vec<(Operator, Value)>> {
    let Value::Object(ops) = ops else {
        return Err(LedgerError::new(ErrorKind::SearchQueryHasInvalidFormat)
            .extend(format!("'{}' expects an operator object", key)));
    };
    if ops.is_empty() {
        return Err(LedgerError::new(ErrorKind::SearchQueryHasInvalidFormat)
            .extend(format!("'{}' has no operator", key)));
    }
    ops.into_iter()
        .map(|(op, value)| Ok((Operator::parse(&op)?, value)))
        .collect()
}

fn check_value(key: &str, op: Operator, value: Value) -> LedgerResult<Value> {
    let is_list = op.is_list();
    match value {
        Value::Object(_) => Err(LedgerError::new(ErrorKind::SearchQueryHasInvalidFormat)
            .extend(format!("'{}' compares against an object", key))),
        Value::Array(items) if is_list => {
            if items.iter().any(|v| v.is_object() || v.is_array()) {
                return Err(LedgerError::new(ErrorKind::SearchQueryHasInvalidFormat)
                    .extend(format!("'{}' list holds a non-scalar", key)));
            }
            Ok(Value::Array(items))
        }
        Value::Array(_) => Err(LedgerError::new(ErrorKind::SearchQueryHasInvalidFormat)
            .extend(format!("'{}' list needs in/notin", key))),
        // A scalar under in/notin is a one-element list.
        scalar if is_list => Ok(Value::Array(vec![scalar])),
        scalar => Ok(scalar),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_blank_query_selects_everything() {
        let q = SearchQuery::parse("  ").unwrap();
        assert!(q.must.is_empty() && q.should.is_empty());
        assert_eq!((q.from, q.size), (0, 0));

        let q = SearchQuery::parse(r#"{"size": 5}"#).unwrap();
        assert_eq!(q.size, 5);
        assert!(q.must.is_empty());
    }

    #[test]
    fn test_parse_groups() {
        let q = SearchQuery::parse(
            r#"{"query":{
                "must":{"fields":[{"id":{"eq":"acc1"}}],"terms":[{"status":"active"}]},
                "should":{"ranges":[{"created":{"gte":"2018-01-01"}}]}}}"#,
        )
        .unwrap();

        assert_eq!(
            q.must.fields,
            vec![FieldCondition {
                column: "id".into(),
                op: Operator::Eq,
                value: json!("acc1")
            }]
        );
        assert_eq!(q.must.terms[0].path, "status");
        assert_eq!(q.should.ranges[0].op, Operator::Gte);
        assert_eq!(q.should.len(), 1);
    }

    #[test]
    fn test_invalid_keys() {
        for raw in [
            r#"{"query":{"must":{"fields":[{"id;drop":{"eq":1}}]}}}"#,
            r#"{"query":{"must":{"terms":[{"a b":"x"}]}}}"#,
            r#"{"query":{"should":{"ranges":[{"x1":{"gt":1}}]}}}"#,
            r#"{"query":{"should":{"ranges":[{".x":{"gt":1}}]}}}"#,
        ] {
            let err = SearchQuery::parse(raw).unwrap_err();
            assert!(err.is(ErrorKind::SearchQueryHasInvalidKeys), "{}", raw);
        }
    }

    #[test]
    fn test_invalid_format() {
        for raw in [
            "{not json",
            r#"{"query":{"must":{"fields":[{"id":"acc1"}]}}}"#,
            r#"{"query":{"must":{"fields":[{"id":{"between":[1,2]}}]}}}"#,
            r#"{"query":{"must":{"fields":[{"id":{"eq":[1,2]}}]}}}"#,
            r#"{"query":{"must":{"fields":[{"id":{"eq":{"a":1}}}]}}}"#,
            r#"{"query":{"always":{}}}"#,
        ] {
            let err = SearchQuery::parse(raw).unwrap_err();
            assert!(err.is(ErrorKind::SearchQueryHasInvalidFormat), "{}", raw);
        }
    }

    #[test]
    fn test_scalar_in_becomes_list() {
        let q = SearchQuery::parse(r#"{"query":{"must":{"fields":[{"id":{"in":"a"}}]}}}"#)
            .unwrap();
        assert_eq!(q.must.fields[0].value, json!(["a"]));
    }
}
