//! In-memory store driver.
//!
//! The only driver that ships with the core: DashMap-backed tables with
//! auto-increment counters, a key-value namespace for document payloads,
//! and an executed-statement log tests inspect to assert batching
//! behavior. Non-finite floats are rejected as malformed values, which
//! doubles as the fault-injection hook for batch-failure tests.

use crate::error::{TandemError, TandemResult};
use crate::query::{Condition, Filter, Order, Plan, Query, value_cmp};
use crate::store::{ExecResult, StoreDriver};
use crate::value::{Row, Value};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::debug;

/// In-memory [`StoreDriver`].
pub struct MemoryDriver {
    name: String,
    tables: DashMap<String, RwLock<Vec<Row>>>,
    counters: DashMap<String, AtomicI64>,
    kv: DashMap<String, String>,
    /// Every executed statement, in execution order.
    statement_log: Mutex<Vec<String>>,
    /// SQL texts of each executed batch, one entry per round trip.
    batch_log: Mutex<Vec<Vec<String>>>,
}

impl MemoryDriver {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tables: DashMap::new(),
            counters: DashMap::new(),
            kv: DashMap::new(),
            statement_log: Mutex::new(Vec::new()),
            batch_log: Mutex::new(Vec::new()),
        }
    }

    /// All executed statement texts, for test assertions.
    pub fn statement_log(&self) -> Vec<String> {
        self.statement_log.lock().clone()
    }

    /// Executed batches (statement texts per round trip).
    pub fn batch_log(&self) -> Vec<Vec<String>> {
        self.batch_log.lock().clone()
    }

    /// Number of rows currently stored in `table`.
    pub fn table_len(&self, table: &str) -> usize {
        self.tables
            .get(table)
            .map(|rows| rows.read().len())
            .unwrap_or(0)
    }

    fn check_finite(value: &Value) -> TandemResult<()> {
        if let Value::Float(f) = value {
            if !f.is_finite() {
                return Err(TandemError::Serialization(
                    "non-finite float is not storable".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Rejects malformed values before anything is applied.
    fn validate(&self, query: &Query) -> TandemResult<()> {
        for param in &query.params {
            Self::check_finite(param)?;
        }
        if let Plan::Insert { row, .. } = &query.plan {
            for value in row.values() {
                Self::check_finite(value)?;
            }
        }
        if let Plan::Update { assign, .. } = &query.plan {
            for (_, value) in assign {
                Self::check_finite(value)?;
            }
        }
        // Raw predicates are backend-native SQL text; this driver only
        // interprets the structured plan.
        if let Plan::Select { table, filter } = &query.plan {
            if filter.where_raw.is_some() {
                return Err(TandemError::store(
                    "select",
                    table,
                    "raw WHERE predicates require a SQL-capable driver",
                ));
            }
        }
        Ok(())
    }

    fn apply(&self, query: &Query) -> TandemResult<ExecResult> {
        self.statement_log.lock().push(query.sql.clone());
        match &query.plan {
            Plan::Insert {
                table,
                row,
                auto_key,
            } => {
                let mut row = row.clone();
                let mut last_insert_id = None;
                if let Some(key) = auto_key {
                    let missing = row.get(key).map(Value::is_null).unwrap_or(true);
                    if missing {
                        let counter = self
                            .counters
                            .entry(table.clone())
                            .or_insert_with(|| AtomicI64::new(0));
                        let id = counter.fetch_add(1, Ordering::SeqCst) + 1;
                        row.insert(key.clone(), Value::Int(id));
                        last_insert_id = Some(id);
                    }
                }
                self.tables
                    .entry(table.clone())
                    .or_insert_with(|| RwLock::new(Vec::new()))
                    .write()
                    .push(row);
                Ok(ExecResult {
                    affected: 1,
                    last_insert_id,
                    ..ExecResult::default()
                })
            }
            Plan::Update {
                table,
                assign,
                conditions,
            } => {
                let mut affected = 0;
                if let Some(rows) = self.tables.get(table) {
                    for row in rows.write().iter_mut() {
                        if row_matches(row, conditions) {
                            for (field, value) in assign {
                                row.insert(field.clone(), value.clone());
                            }
                            affected += 1;
                        }
                    }
                }
                Ok(ExecResult {
                    affected,
                    ..ExecResult::default()
                })
            }
            Plan::Delete { table, conditions } => {
                let mut affected = 0;
                if let Some(rows) = self.tables.get(table) {
                    let mut rows = rows.write();
                    let before = rows.len();
                    rows.retain(|row| !row_matches(row, conditions));
                    affected = (before - rows.len()) as u64;
                }
                Ok(ExecResult {
                    affected,
                    ..ExecResult::default()
                })
            }
            Plan::Select { table, filter } => {
                let rows = self
                    .tables
                    .get(table)
                    .map(|rows| select_rows(&rows.read(), filter))
                    .unwrap_or_default();
                let affected = rows.len() as u64;
                Ok(ExecResult {
                    rows,
                    affected,
                    ..ExecResult::default()
                })
            }
            Plan::Count { table, conditions } => {
                let count = self
                    .tables
                    .get(table)
                    .map(|rows| {
                        rows.read()
                            .iter()
                            .filter(|row| row_matches(row, conditions))
                            .count()
                    })
                    .unwrap_or(0);
                Ok(ExecResult {
                    affected: count as u64,
                    ..ExecResult::default()
                })
            }
            Plan::KvPut { key, payload } => {
                self.kv.insert(key.clone(), payload.clone());
                Ok(ExecResult {
                    affected: 1,
                    ..ExecResult::default()
                })
            }
            Plan::KvGet { key } => {
                let rows = match self.kv.get(key) {
                    Some(payload) => {
                        let mut row = Row::new();
                        row.insert("payload".to_string(), Value::Str(payload.clone()));
                        vec![row]
                    }
                    None => Vec::new(),
                };
                let affected = rows.len() as u64;
                Ok(ExecResult {
                    rows,
                    affected,
                    ..ExecResult::default()
                })
            }
            Plan::KvDelete { key } => {
                let removed = self.kv.remove(key).is_some();
                Ok(ExecResult {
                    affected: removed as u64,
                    ..ExecResult::default()
                })
            }
        }
    }
}

impl StoreDriver for MemoryDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, query: &Query) -> TandemResult<ExecResult> {
        self.validate(query)?;
        self.apply(query)
    }

    fn execute_batch(&self, queries: &[Query]) -> TandemResult<Vec<ExecResult>> {
        // Validate everything first so the batch fails atomically.
        for query in queries {
            self.validate(query)?;
        }
        debug!(driver = %self.name, statements = queries.len(), "executing batch");
        self.batch_log
            .lock()
            .push(queries.iter().map(|q| q.sql.clone()).collect());
        queries.iter().map(|q| self.apply(q)).collect()
    }
}

fn row_matches(row: &Row, conditions: &[(String, Condition)]) -> bool {
    conditions
        .iter()
        .all(|(field, condition)| condition.matches(row.get(field)))
}

fn select_rows(rows: &[Row], filter: &Filter) -> Vec<Row> {
    let mut matched: Vec<Row> = rows
        .iter()
        .filter(|row| row_matches(row, &filter.conditions))
        .cloned()
        .collect();

    if !filter.order.is_empty() {
        matched.sort_by(|a, b| {
            for (field, order) in &filter.order {
                let cmp = match (a.get(field), b.get(field)) {
                    (Some(x), Some(y)) => value_cmp(x, y).unwrap_or(std::cmp::Ordering::Equal),
                    (Some(_), None) => std::cmp::Ordering::Greater,
                    (None, Some(_)) => std::cmp::Ordering::Less,
                    (None, None) => std::cmp::Ordering::Equal,
                };
                let cmp = if *order == Order::Desc { cmp.reverse() } else { cmp };
                if cmp != std::cmp::Ordering::Equal {
                    return cmp;
                }
            }
            std::cmp::Ordering::Equal
        });
    }

    let offset = filter.offset.unwrap_or(0).min(matched.len());
    let mut matched: Vec<Row> = matched.split_off(offset);
    if let Some(limit) = filter.limit {
        matched.truncate(limit);
    }

    if let Some(select) = &filter.select {
        matched
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .filter(|(field, _)| select.contains(field))
                    .collect()
            })
            .collect()
    } else {
        matched
    }
}
