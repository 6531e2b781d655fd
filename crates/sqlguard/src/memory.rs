//! Scripted in-memory execution collaborator.
//!
//! [`MemoryClient`] records every statement it receives and answers from a queue
//! of scripted responses. It is useful for dry runs and for testing code that
//! builds and executes queries without a database.

use crate::client::{ExecResult, GenericClient, RowCursor};
use crate::error::{OrmError, OrmResult};
use crate::value::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A statement received by [`MemoryClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedStatement {
    pub sql: String,
    pub args: Vec<Value>,
}

#[derive(Debug)]
enum Scripted {
    Rows {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
    Exec(ExecResult),
    Error(String),
}

#[derive(Debug, Default)]
struct State {
    responses: VecDeque<Scripted>,
    executed: Vec<ExecutedStatement>,
}

/// Scripted client. Clones share the same script and statement log.
#[derive(Debug, Clone)]
pub struct MemoryClient {
    state: Arc<Mutex<State>>,
    driver: &'static str,
    latency: Option<Duration>,
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            driver: std::any::type_name::<MemoryClient>(),
            latency: None,
        }
    }
}

impl MemoryClient {
    /// Generic (`?`) dialect client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Client whose driver name selects the numbered (`$n`) dialect.
    pub fn postgres() -> Self {
        Self::new().with_driver_name("memory::postgres")
    }

    pub fn with_driver_name(mut self, name: &'static str) -> Self {
        self.driver = name;
        self
    }

    /// Delay every response, to exercise timeouts and cancellation.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a result set for the next query.
    pub fn push_rows<C: Into<String>>(&self, columns: impl IntoIterator<Item = C>, rows: Vec<Vec<Value>>) {
        self.state().responses.push_back(Scripted::Rows {
            columns: columns.into_iter().map(Into::into).collect(),
            rows,
        });
    }

    /// Queue an execution result for the next statement.
    pub fn push_exec(&self, rows_affected: u64, last_insert_id: Option<i64>) {
        self.state().responses.push_back(Scripted::Exec(ExecResult {
            rows_affected,
            last_insert_id,
        }));
    }

    /// Queue a failure for the next call.
    pub fn push_error(&self, message: impl Into<String>) {
        self.state()
            .responses
            .push_back(Scripted::Error(message.into()));
    }

    /// Every statement received so far, oldest first.
    pub fn executed(&self) -> Vec<ExecutedStatement> {
        self.state().executed.clone()
    }

    pub fn last_statement(&self) -> Option<ExecutedStatement> {
        self.state().executed.last().cloned()
    }

    fn record(&self, sql: &str, args: &[Value]) -> Option<Scripted> {
        let mut state = self.state();
        state.executed.push(ExecutedStatement {
            sql: sql.to_string(),
            args: args.to_vec(),
        });
        state.responses.pop_front()
    }

    async fn respond(&self, sql: &str, args: &[Value]) -> Option<Scripted> {
        let scripted = self.record(sql, args);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        scripted
    }
}

impl GenericClient for MemoryClient {
    fn driver_name(&self) -> &'static str {
        self.driver
    }

    async fn query_cursor(&self, sql: &str, args: &[Value]) -> OrmResult<RowCursor> {
        match self.respond(sql, args).await {
            Some(Scripted::Rows { columns, rows }) => Ok(RowCursor::from_rows(columns, rows)),
            Some(Scripted::Exec(_)) | None => Ok(RowCursor::from_rows(Vec::new(), Vec::new())),
            Some(Scripted::Error(message)) => Err(OrmError::Other(message)),
        }
    }

    async fn execute(&self, sql: &str, args: &[Value]) -> OrmResult<ExecResult> {
        match self.respond(sql, args).await {
            Some(Scripted::Exec(result)) => Ok(result),
            Some(Scripted::Rows { rows, .. }) => Ok(ExecResult {
                rows_affected: rows.len() as u64,
                last_insert_id: None,
            }),
            None => Ok(ExecResult::default()),
            Some(Scripted::Error(message)) => Err(OrmError::Other(message)),
        }
    }
}
