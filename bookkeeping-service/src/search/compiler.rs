//! Compiles a parsed search document into parameterised SQL.
//!
//! Column names and `data` paths only reach the SQL text after key
//! validation; every user value is bound through `args`.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::QueryAs;
use sqlx::{FromRow, Postgres};

use crate::error::{ErrorKind, LedgerError, LedgerResult};
use crate::models::parse_amount;
use crate::search::namespace::{ColumnType, SearchNamespace};
use crate::search::paging::Paging;
use crate::search::query::{Group, Operator, SearchQuery};

/// A value bound to a `$n` placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlArg {
    Text(String),
    Float(f64),
    Bool(bool),
    Decimal(Decimal),
    Timestamp(DateTime<Utc>),
    Json(Value),
}

impl SqlArg {
    pub fn bind_to<'q, O>(
        &self,
        query: QueryAs<'q, Postgres, O, PgArguments>,
    ) -> QueryAs<'q, Postgres, O, PgArguments> {
        match self {
            SqlArg::Text(v) => query.bind(v.clone()),
            SqlArg::Float(v) => query.bind(*v),
            SqlArg::Bool(v) => query.bind(*v),
            SqlArg::Decimal(v) => query.bind(*v),
            SqlArg::Timestamp(v) => query.bind(*v),
            SqlArg::Json(v) => query.bind(v.clone()),
        }
    }
}

/// Output of the compiler.
#[derive(Debug, Clone)]
pub struct SearchSqlQuery {
    pub namespace: SearchNamespace,
    /// Full statement without paging.
    pub sql: String,
    pub args: Vec<SqlArg>,
    pub offset: i64,
    pub limit: i64,
    pub batch_size: i64,
    page_sql: String,
}

impl SearchSqlQuery {
    /// Fresh paging cursor for this query.
    pub fn paging(&self) -> Paging {
        Paging::new(self.offset, self.limit, self.batch_size)
    }

    /// `sql` followed by `LIMIT`/`OFFSET` placeholders.
    pub fn page_sql(&self) -> &str {
        &self.page_sql
    }

    /// Build the statement for one batch.
    pub fn page_query<'q, O>(&'q self, paging: &Paging) -> QueryAs<'q, Postgres, O, PgArguments>
    where
        O: for<'r> FromRow<'r, PgRow>,
    {
        let mut query = sqlx::query_as::<_, O>(&self.page_sql);
        for arg in &self.args {
            query = arg.bind_to(query);
        }
        query.bind(paging.batch_size).bind(paging.offset)
    }

    /// Log the compiled statement, at INFO when query tracing is on.
    pub fn trace(&self, trace_queries: bool) {
        if trace_queries {
            tracing::info!(
                namespace = %self.namespace,
                sql = %self.sql,
                arg_count = self.args.len(),
                "Compiled search query"
            );
        } else {
            tracing::debug!(
                namespace = %self.namespace,
                sql = %self.sql,
                arg_count = self.args.len(),
                "Compiled search query"
            );
        }
    }
}

/// Parse and compile a raw DSL document for `namespace`.
pub fn compile(
    namespace: SearchNamespace,
    raw: &str,
    system_batch_size: i64,
) -> LedgerResult<SearchSqlQuery> {
    let query = SearchQuery::parse(raw)?;
    compile_query(namespace, &query, system_batch_size)
}

/// Compile an already parsed document.
pub fn compile_query(
    namespace: SearchNamespace,
    query: &SearchQuery,
    system_batch_size: i64,
) -> LedgerResult<SearchSqlQuery> {
    let mut builder = SqlBuilder {
        namespace,
        args: Vec::new(),
    };

    let mut clauses = Vec::new();
    if !query.must.is_empty() {
        clauses.push(builder.group(&query.must, " AND ")?);
    }
    if !query.should.is_empty() {
        clauses.push(builder.group(&query.should, " OR ")?);
    }

    let mut sql = namespace.select();
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push(' ');
    sql.push_str(namespace.order_by());

    let paging = Paging::new(query.from, query.size, system_batch_size);
    let n = builder.args.len();
    let page_sql = format!("{} LIMIT ${} OFFSET ${}", sql, n + 1, n + 2);

    Ok(SearchSqlQuery {
        namespace,
        sql,
        args: builder.args,
        offset: paging.offset,
        limit: paging.limit,
        batch_size: paging.batch_size,
        page_sql,
    })
}

struct SqlBuilder {
    namespace: SearchNamespace,
    args: Vec<SqlArg>,
}

impl SqlBuilder {
    /// Bind a value and return its placeholder.
    fn push(&mut self, arg: SqlArg) -> String {
        self.args.push(arg);
        format!("${}", self.args.len())
    }

    fn group(&mut self, group: &Group, join: &str) -> LedgerResult<String> {
        let mut parts = Vec::with_capacity(group.len());

        for cond in &group.fields {
            parts.push(self.field(&cond.column, cond.op, &cond.value)?);
        }

        if (!group.terms.is_empty() || !group.ranges.is_empty()) && !self.namespace.has_data() {
            return Err(LedgerError::new(ErrorKind::SearchQueryHasInvalidKeys)
                .extend(format!("{} has no data to match", self.namespace)));
        }
        for cond in &group.terms {
            let placeholder = self.push(SqlArg::Json(cond.value.clone()));
            parts.push(format!("{} @> {}::jsonb", json_path(&cond.path), placeholder));
        }
        for cond in &group.ranges {
            parts.push(self.range(&cond.path, cond.op, &cond.value)?);
        }

        Ok(format!("({})", parts.join(join)))
    }

    fn field(&mut self, column: &str, op: Operator, value: &Value) -> LedgerResult<String> {
        let ty = self.namespace.column_type(column).ok_or_else(|| {
            LedgerError::new(ErrorKind::SearchQueryHasInvalidKeys)
                .extend(format!("{} has no column '{}'", self.namespace, column))
        })?;
        let column = format!("\"{}\"", column);

        if op.is_list() {
            let items = value.as_array().cloned().unwrap_or_default();
            return self.expand(op, &items, |b, v| b.field_scalar(&column, ty, op.element(), v));
        }
        self.field_scalar(&column, ty, op, value)
    }

    fn field_scalar(
        &mut self,
        column: &str,
        ty: ColumnType,
        op: Operator,
        value: &Value,
    ) -> LedgerResult<String> {
        match (op, value) {
            (Operator::Is | Operator::IsNot, _) => is_predicate(column, op, value),
            (Operator::Eq, Value::Null) => Ok(format!("{} IS NULL", column)),
            (Operator::Ne, Value::Null) => Ok(format!("{} IS NOT NULL", column)),
            (_, Value::Null) => Err(invalid_format(format!(
                "{} cannot compare {} against null",
                column,
                op.sql()
            ))),
            (Operator::Like | Operator::NotLike, Value::String(pattern)) => {
                let lhs = if ty.is_text() {
                    column.to_string()
                } else {
                    format!("CAST({} AS TEXT)", column)
                };
                let placeholder = self.push(SqlArg::Text(pattern.clone()));
                Ok(format!("{} {} {}", lhs, op.sql(), placeholder))
            }
            (Operator::Like | Operator::NotLike, _) => Err(invalid_format(format!(
                "{} {} needs a string pattern",
                column,
                op.sql()
            ))),
            _ => {
                let placeholder = self.push(column_arg(column, ty, value)?);
                Ok(format!("{} {} {}", column, op.sql(), placeholder))
            }
        }
    }

    fn range(&mut self, path: &str, op: Operator, value: &Value) -> LedgerResult<String> {
        if op.is_list() {
            let items = value.as_array().cloned().unwrap_or_default();
            return self.expand(op, &items, |b, v| b.range_scalar(path, op.element(), v));
        }
        self.range_scalar(path, op, value)
    }

    fn range_scalar(&mut self, path: &str, op: Operator, value: &Value) -> LedgerResult<String> {
        let text = text_path(path);
        let op = match (op, value) {
            (Operator::Is, Value::Null) | (Operator::Eq, Value::Null) => {
                return Ok(format!("{} IS NULL", text))
            }
            (Operator::IsNot, Value::Null) | (Operator::Ne, Value::Null) => {
                return Ok(format!("{} IS NOT NULL", text))
            }
            (_, Value::Null) => {
                return Err(invalid_format(format!(
                    "{} cannot compare {} against null",
                    path,
                    op.sql()
                )))
            }
            (Operator::Is, _) => Operator::Eq,
            (Operator::IsNot, _) => Operator::Ne,
            (other, _) => other,
        };

        match value {
            Value::Number(n) if !matches!(op, Operator::Like | Operator::NotLike) => {
                let n = n
                    .as_f64()
                    .ok_or_else(|| invalid_format(format!("{} is not a finite number", path)))?;
                let placeholder = self.push(SqlArg::Float(n));
                Ok(format!("({})::float {} {}", text, op.sql(), placeholder))
            }
            Value::String(s) => {
                let placeholder = self.push(SqlArg::Text(s.clone()));
                Ok(format!("{} {} {}", text, op.sql(), placeholder))
            }
            Value::Number(n) => {
                let placeholder = self.push(SqlArg::Text(n.to_string()));
                Ok(format!("{} {} {}", text, op.sql(), placeholder))
            }
            Value::Bool(b) => {
                let placeholder = self.push(SqlArg::Text(b.to_string()));
                Ok(format!("{} {} {}", text, op.sql(), placeholder))
            }
            _ => Err(invalid_format(format!("{} compares against a non-scalar", path))),
        }
    }

    /// `in` becomes an OR of equalities, `notin` an AND of inequalities.
    fn expand<F>(&mut self, op: Operator, items: &[Value], mut each: F) -> LedgerResult<String>
    where
        F: FnMut(&mut Self, &Value) -> LedgerResult<String>,
    {
        let (join, empty) = match op {
            Operator::In => (" OR ", "FALSE"),
            _ => (" AND ", "TRUE"),
        };
        if items.is_empty() {
            return Ok(empty.to_string());
        }
        let parts = items
            .iter()
            .map(|v| each(self, v))
            .collect::<LedgerResult<Vec<_>>>()?;
        Ok(format!("({})", parts.join(join)))
    }
}

fn is_predicate(column: &str, op: Operator, value: &Value) -> LedgerResult<String> {
    let target = match value {
        Value::Null => "NULL",
        Value::Bool(true) => "TRUE",
        Value::Bool(false) => "FALSE",
        _ => {
            return Err(invalid_format(format!(
                "{} {} expects null or a boolean",
                column,
                op.sql()
            )))
        }
    };
    Ok(format!("{} {} {}", column, op.sql(), target))
}

/// Convert a DSL value to the bound type of a native column.
fn column_arg(column: &str, ty: ColumnType, value: &Value) -> LedgerResult<SqlArg> {
    let mismatch = || invalid_format(format!("{} cannot hold {}", column, value));

    match ty {
        ColumnType::Text => match value {
            Value::String(s) => Ok(SqlArg::Text(s.clone())),
            Value::Number(n) => Ok(SqlArg::Text(n.to_string())),
            Value::Bool(b) => Ok(SqlArg::Text(b.to_string())),
            _ => Err(mismatch()),
        },
        ColumnType::Decimal => match value {
            Value::Number(n) => parse_amount(&n.to_string())
                .map(SqlArg::Decimal)
                .map_err(|_| mismatch()),
            Value::String(s) => parse_amount(s).map(SqlArg::Decimal).map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        ColumnType::Bool => match value {
            Value::Bool(b) => Ok(SqlArg::Bool(*b)),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(SqlArg::Bool(true)),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(SqlArg::Bool(false)),
            _ => Err(mismatch()),
        },
        ColumnType::Timestamp => match value {
            Value::String(s) => parse_timestamp(s).map(SqlArg::Timestamp).ok_or_else(mismatch),
            Value::Number(n) => n
                .as_i64()
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
                .map(SqlArg::Timestamp)
                .ok_or_else(mismatch),
            _ => Err(mismatch()),
        },
    }
}

/// RFC 3339, or a bare `YYYY-MM-DD` taken as midnight UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt))
}

/// `a.b.c` → `data->'a'->'b'->'c'`.
fn json_path(path: &str) -> String {
    let mut out = String::from("data");
    for part in path.split('.') {
        out.push_str(&format!("->'{}'", part));
    }
    out
}

/// `a.b.c` → `data->'a'->'b'->>'c'`.
fn text_path(path: &str) -> String {
    let mut parts: Vec<&str> = path.split('.').collect();
    let last = parts.pop().unwrap_or_default();
    let mut out = String::from("data");
    for part in parts {
        out.push_str(&format!("->'{}'", part));
    }
    out.push_str(&format!("->>'{}'", last));
    out
}

fn invalid_format(detail: String) -> LedgerError {
    LedgerError::new(ErrorKind::SearchQueryHasInvalidFormat).extend(detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ledgers(raw: &str) -> SearchSqlQuery {
        compile(SearchNamespace::Ledgers, raw, 50).unwrap()
    }

    const LEDGER_SELECT: &str =
        "SELECT id, type, parent_id, data, created_at, updated_at FROM ledgers";

    #[test]
    fn test_empty_query_has_no_where() {
        let q = ledgers("");
        assert_eq!(q.sql, format!("{} ORDER BY created_at, id", LEDGER_SELECT));
        assert!(q.args.is_empty());
        assert_eq!((q.offset, q.limit, q.batch_size), (0, 100, 50));
        assert!(q.page_sql().ends_with("LIMIT $1 OFFSET $2"));
    }

    #[test]
    fn test_must_and_should_groups() {
        let q = compile(
            SearchNamespace::Accounts,
            r#"{"query":{
                "must":{"fields":[{"id":{"eq":"acc1"}}],"terms":[{"status":"active"}]},
                "should":{"ranges":[{"created":{"gte":"2018-01-01"}},{"created":{"lte":"2018-01-30"}}]}}}"#,
            50,
        )
        .unwrap();

        assert!(q.sql.ends_with(
            " WHERE (\"id\" = $1 AND data->'status' @> $2::jsonb) \
             AND (data->>'created' >= $3 OR data->>'created' <= $4) \
             ORDER BY created_at, id"
        ));
        assert_eq!(
            q.args,
            vec![
                SqlArg::Text("acc1".into()),
                SqlArg::Json(json!("active")),
                SqlArg::Text("2018-01-01".into()),
                SqlArg::Text("2018-01-30".into()),
            ]
        );
        assert!(q.page_sql().ends_with("LIMIT $5 OFFSET $6"));
    }

    #[test]
    fn test_numeric_and_null_ranges() {
        let q = ledgers(
            r#"{"query":{"must":{"ranges":[
                {"limits.max":{"gt":10}},
                {"closed":{"eq":null}},
                {"owner":{"isnot":null}}]}}}"#,
        );
        assert!(q.sql.contains(
            "((data->'limits'->>'max')::float > $1 AND data->>'closed' IS NULL \
             AND data->>'owner' IS NOT NULL)"
        ));
        assert_eq!(q.args, vec![SqlArg::Float(10.0)]);

        let err = compile(
            SearchNamespace::Ledgers,
            r#"{"query":{"must":{"ranges":[{"closed":{"gt":null}}]}}}"#,
            50,
        )
        .unwrap_err();
        assert!(err.is(ErrorKind::SearchQueryHasInvalidFormat));
    }

    #[test]
    fn test_in_and_notin_expand() {
        let q = ledgers(r#"{"query":{"must":{"fields":[{"id":{"in":["a","b"]}}]}}}"#);
        assert!(q.sql.contains("((\"id\" = $1 OR \"id\" = $2))"));

        let q = ledgers(r#"{"query":{"must":{"fields":[{"id":{"notin":["a","b"]}}]}}}"#);
        assert!(q.sql.contains("((\"id\" <> $1 AND \"id\" <> $2))"));

        let q = ledgers(r#"{"query":{"must":{"fields":[{"id":{"in":[]}}]}}}"#);
        assert!(q.sql.contains("WHERE (FALSE)"));
        assert!(q.args.is_empty());
    }

    #[test]
    fn test_field_values_take_column_type() {
        let q = compile(
            SearchNamespace::TransactionEntries,
            r#"{"query":{"must":{"fields":[
                {"amount":{"gte":"10.5"}},
                {"credit":{"eq":true}},
                {"created_at":{"lt":"2020-01-01"}}]}}}"#,
            50,
        )
        .unwrap();
        assert_eq!(
            q.args,
            vec![
                SqlArg::Decimal(Decimal::new(105, 1)),
                SqlArg::Bool(true),
                SqlArg::Timestamp(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()),
            ]
        );
        assert!(q.sql.ends_with("ORDER BY created_at, transaction_id, position"));
    }

    #[test]
    fn test_like_and_is() {
        let q = compile(
            SearchNamespace::Accounts,
            r#"{"query":{"must":{"fields":[
                {"id":{"like":"acc%"}},
                {"cleared_balance":{"notlike":"1%"}}]},
              "should":{"fields":[{"ledger_id":{"is":null}}]}}}"#,
            50,
        )
        .unwrap();
        assert!(q.sql.contains(
            "(\"id\" LIKE $1 AND CAST(\"cleared_balance\" AS TEXT) NOT LIKE $2) \
             AND (\"ledger_id\" IS NULL)"
        ));
    }

    #[test]
    fn test_unknown_column_is_invalid_key() {
        let err = compile(
            SearchNamespace::Ledgers,
            r#"{"query":{"must":{"fields":[{"balance":{"eq":1}}]}}}"#,
            50,
        )
        .unwrap_err();
        assert!(err.is(ErrorKind::SearchQueryHasInvalidKeys));

        let err = compile(
            SearchNamespace::TransactionEntries,
            r#"{"query":{"must":{"terms":[{"memo":"x"}]}}}"#,
            50,
        )
        .unwrap_err();
        assert!(err.is(ErrorKind::SearchQueryHasInvalidKeys));
    }

    #[test]
    fn test_type_mismatch_is_invalid_format() {
        let err = compile(
            SearchNamespace::TransactionEntries,
            r#"{"query":{"must":{"fields":[{"amount":{"eq":"lots"}}]}}}"#,
            50,
        )
        .unwrap_err();
        assert!(err.is(ErrorKind::SearchQueryHasInvalidFormat));
    }

    #[test]
    fn test_user_values_never_reach_sql() {
        let q = ledgers(
            r#"{"query":{"must":{"fields":[{"id":{"eq":"x'; DROP TABLE ledgers; --"}}]}}}"#,
        );
        assert!(!q.sql.contains("DROP"));
        assert_eq!(q.args.len(), 1);
    }

    #[test]
    fn test_paging_from_query() {
        let q = ledgers(r#"{"from": 20, "size": 120}"#);
        let mut paging = q.paging();
        assert_eq!((paging.offset, paging.limit, paging.batch_size), (20, 120, 50));
        assert!(!paging.stop(50));
        assert_eq!(paging.offset, 70);
    }
}
