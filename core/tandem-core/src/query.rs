//! Query builder: structured filters to store-native queries.
//!
//! A built [`Query`] carries the SQL text and positional bound values for
//! the wire, plus the structured [`Plan`] the in-memory driver interprets
//! directly. Both are produced from the same filter, so the text a test
//! inspects always corresponds to what the driver executed.

use crate::value::{Row, Value, encode_wire};
use crate::error::TandemResult;
use std::cmp::Ordering;

/// Per-field comparison operator.
#[derive(Debug, Clone)]
pub enum Condition {
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    Eq(Value),
    Ne(Value),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    Like(String),
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// Structured filter for static operations.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub conditions: Vec<(String, Condition)>,
    /// Raw backend-native predicate ANDed into the WHERE clause, passed
    /// through verbatim. Only SQL-capable drivers can execute it.
    pub where_raw: Option<String>,
    pub select: Option<Vec<String>>,
    pub order: Vec<(String, Order)>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub update: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: &str, condition: Condition) -> Self {
        self.conditions.push((name.to_string(), condition));
        self
    }

    pub fn eq(self, name: &str, value: impl Into<Value>) -> Self {
        self.field(name, Condition::Eq(value.into()))
    }

    /// Array-valued shorthand: the field must match any of `values`.
    pub fn any_of(self, name: &str, values: Vec<Value>) -> Self {
        self.field(name, Condition::In(values))
    }

    /// Adds a raw `$where`-style predicate, rendered verbatim.
    pub fn where_raw(mut self, predicate: &str) -> Self {
        self.where_raw = Some(predicate.to_string());
        self
    }

    pub fn select(mut self, fields: &[&str]) -> Self {
        self.select = Some(fields.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn order(mut self, field: &str, order: Order) -> Self {
        self.order.push((field.to_string(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Adds an `$update`-style assignment.
    pub fn assign(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.update.push((field.to_string(), value.into()));
        self
    }
}

/// Structured form of a query, interpreted by the in-memory driver.
#[derive(Debug, Clone)]
pub enum Plan {
    Insert {
        table: String,
        row: Row,
        /// Auto-increment primary column the store fills when absent.
        auto_key: Option<String>,
    },
    Update {
        table: String,
        assign: Vec<(String, Value)>,
        conditions: Vec<(String, Condition)>,
    },
    Delete {
        table: String,
        conditions: Vec<(String, Condition)>,
    },
    Select {
        table: String,
        filter: Filter,
    },
    Count {
        table: String,
        conditions: Vec<(String, Condition)>,
    },
    /// Document-store put keyed by colon-joined primary values.
    KvPut { key: String, payload: String },
    KvGet { key: String },
    KvDelete { key: String },
}

/// One executable query: wire text + bound values + structured plan.
#[derive(Debug, Clone)]
pub struct Query {
    pub sql: String,
    pub params: Vec<Value>,
    pub plan: Plan,
}

// ════════════════════════════════════════════
// Builders
// ════════════════════════════════════════════

/// `INSERT INTO t (a, b) VALUES (?, ?)` from a wire-encoded row.
///
/// Null fields are omitted; `auto_key` names the auto-increment primary
/// column the store generates when it is absent.
pub fn build_insert(table: &str, row: &Row, auto_key: Option<&str>) -> TandemResult<Query> {
    let mut encoded = Row::new();
    for (name, value) in row {
        if value.is_null() {
            continue;
        }
        encoded.insert(name.clone(), encode_wire(value)?);
    }
    let columns: Vec<&str> = encoded.keys().map(|k| k.as_str()).collect();
    let placeholders = vec!["?"; columns.len()].join(", ");
    let sql = format!(
        "INSERT INTO {table} ({}) VALUES ({placeholders})",
        columns.join(", ")
    );
    let params: Vec<Value> = encoded.values().cloned().collect();
    Ok(Query {
        sql,
        params,
        plan: Plan::Insert {
            table: table.to_string(),
            row: encoded,
            auto_key: auto_key.map(|s| s.to_string()),
        },
    })
}

/// `UPDATE t SET a = ? WHERE ...` from wire-encoded assignments.
pub fn build_update(
    table: &str,
    assign: &[(String, Value)],
    conditions: &[(String, Condition)],
) -> TandemResult<Query> {
    let mut encoded_assign = Vec::with_capacity(assign.len());
    let mut params = Vec::new();
    let mut sets = Vec::with_capacity(assign.len());
    for (name, value) in assign {
        let wire = encode_wire(value)?;
        sets.push(format!("{name} = ?"));
        params.push(wire.clone());
        encoded_assign.push((name.clone(), wire));
    }
    let (where_sql, where_params) = render_conditions(conditions);
    params.extend(where_params);
    let sql = format!("UPDATE {table} SET {}{where_sql}", sets.join(", "));
    Ok(Query {
        sql,
        params,
        plan: Plan::Update {
            table: table.to_string(),
            assign: encoded_assign,
            conditions: conditions.to_vec(),
        },
    })
}

/// `DELETE FROM t WHERE ...`.
pub fn build_delete(table: &str, conditions: &[(String, Condition)]) -> Query {
    let (where_sql, params) = render_conditions(conditions);
    Query {
        sql: format!("DELETE FROM {table}{where_sql}"),
        params,
        plan: Plan::Delete {
            table: table.to_string(),
            conditions: conditions.to_vec(),
        },
    }
}

/// `SELECT ... FROM t WHERE ... ORDER BY ... LIMIT ... OFFSET ...`.
pub fn build_select(table: &str, filter: &Filter) -> Query {
    let columns = match &filter.select {
        Some(cols) => cols.join(", "),
        None => "*".to_string(),
    };
    let (mut where_sql, params) = render_conditions(&filter.conditions);
    if let Some(raw) = &filter.where_raw {
        if where_sql.is_empty() {
            where_sql = format!(" WHERE ({raw})");
        } else {
            where_sql.push_str(&format!(" AND ({raw})"));
        }
    }
    let mut sql = format!("SELECT {columns} FROM {table}{where_sql}");
    if !filter.order.is_empty() {
        let order: Vec<String> = filter
            .order
            .iter()
            .map(|(f, o)| {
                format!("{f} {}", if *o == Order::Asc { "ASC" } else { "DESC" })
            })
            .collect();
        sql.push_str(&format!(" ORDER BY {}", order.join(", ")));
    }
    if let Some(limit) = filter.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    if let Some(offset) = filter.offset {
        sql.push_str(&format!(" OFFSET {offset}"));
    }
    Query {
        sql,
        params,
        plan: Plan::Select {
            table: table.to_string(),
            filter: filter.clone(),
        },
    }
}

/// `SELECT COUNT(*) FROM t WHERE ...`.
pub fn build_count(table: &str, conditions: &[(String, Condition)]) -> Query {
    let (where_sql, params) = render_conditions(conditions);
    Query {
        sql: format!("SELECT COUNT(*) FROM {table}{where_sql}"),
        params,
        plan: Plan::Count {
            table: table.to_string(),
            conditions: conditions.to_vec(),
        },
    }
}

fn render_conditions(conditions: &[(String, Condition)]) -> (String, Vec<Value>) {
    if conditions.is_empty() {
        return (String::new(), Vec::new());
    }
    let mut clauses = Vec::with_capacity(conditions.len());
    let mut params = Vec::new();
    for (field, condition) in conditions {
        match condition {
            Condition::Gt(v) => {
                clauses.push(format!("{field} > ?"));
                params.push(v.clone());
            }
            Condition::Gte(v) => {
                clauses.push(format!("{field} >= ?"));
                params.push(v.clone());
            }
            Condition::Lt(v) => {
                clauses.push(format!("{field} < ?"));
                params.push(v.clone());
            }
            Condition::Lte(v) => {
                clauses.push(format!("{field} <= ?"));
                params.push(v.clone());
            }
            Condition::Eq(v) => {
                clauses.push(format!("{field} = ?"));
                params.push(v.clone());
            }
            Condition::Ne(v) => {
                clauses.push(format!("{field} != ?"));
                params.push(v.clone());
            }
            Condition::In(values) => {
                let marks = vec!["?"; values.len()].join(", ");
                clauses.push(format!("{field} IN ({marks})"));
                params.extend(values.iter().cloned());
            }
            Condition::NotIn(values) => {
                let marks = vec!["?"; values.len()].join(", ");
                clauses.push(format!("{field} NOT IN ({marks})"));
                params.extend(values.iter().cloned());
            }
            Condition::Like(pattern) => {
                clauses.push(format!("{field} LIKE ?"));
                params.push(Value::Str(pattern.clone()));
            }
        }
    }
    (format!(" WHERE {}", clauses.join(" AND ")), params)
}

// ════════════════════════════════════════════
// Evaluation helpers (used by the memory driver)
// ════════════════════════════════════════════

/// Total-ish ordering over comparable values; None when incomparable.
pub fn value_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Int(x), Value::Float(y)) => (*x as f64).partial_cmp(y),
        (Value::Float(x), Value::Int(y)) => x.partial_cmp(&(*y as f64)),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Date(x), Value::Date(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

impl Condition {
    /// Evaluates this condition against a row's field value. A missing
    /// field behaves like null and only matches `Ne`/`NotIn`.
    pub fn matches(&self, actual: Option<&Value>) -> bool {
        let actual = match actual {
            Some(Value::Null) | None => {
                return matches!(self, Condition::Ne(_) | Condition::NotIn(_));
            }
            Some(v) => v,
        };
        match self {
            Condition::Gt(v) => value_cmp(actual, v) == Some(Ordering::Greater),
            Condition::Gte(v) => {
                matches!(value_cmp(actual, v), Some(Ordering::Greater | Ordering::Equal))
            }
            Condition::Lt(v) => value_cmp(actual, v) == Some(Ordering::Less),
            Condition::Lte(v) => {
                matches!(value_cmp(actual, v), Some(Ordering::Less | Ordering::Equal))
            }
            Condition::Eq(v) => value_cmp(actual, v) == Some(Ordering::Equal),
            Condition::Ne(v) => value_cmp(actual, v) != Some(Ordering::Equal),
            Condition::In(values) => values
                .iter()
                .any(|v| value_cmp(actual, v) == Some(Ordering::Equal)),
            Condition::NotIn(values) => !values
                .iter()
                .any(|v| value_cmp(actual, v) == Some(Ordering::Equal)),
            Condition::Like(pattern) => match actual {
                Value::Str(s) => like_match(pattern, s),
                _ => false,
            },
        }
    }
}

/// SQL `LIKE` with `%` wildcards (no `_` support).
pub fn like_match(pattern: &str, text: &str) -> bool {
    let segments: Vec<&str> = pattern.split('%').collect();
    if segments.len() == 1 {
        return pattern == text;
    }
    let mut rest = text;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(segment) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == segments.len() - 1 {
            return rest.ends_with(segment);
        } else {
            match rest.find(segment) {
                Some(pos) => rest = &rest[pos + segment.len()..],
                None => return false,
            }
        }
    }
    true
}
