//! Per-execution configuration: timeout, cancellation and SQL debug logging.

use crate::client::GenericClient;
use crate::dialect::{Dialect, interpolate};
use crate::error::{OrmError, OrmResult};
use crate::value::Value;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::Level;

/// Dispatch a tracing event at a runtime-determined level.
macro_rules! emit_at_level {
    ($level:expr, $($field:tt)*) => {
        if $level == Level::ERROR {
            tracing::error!($($field)*)
        } else if $level == Level::WARN {
            tracing::warn!($($field)*)
        } else if $level == Level::INFO {
            tracing::info!($($field)*)
        } else if $level == Level::DEBUG {
            tracing::debug!($($field)*)
        } else {
            tracing::trace!($($field)*)
        }
    };
}

/// Environment variable enabling SQL debug logging (`1`/`true`).
pub const ENV_DEBUG: &str = "SQLGUARD_DEBUG";
/// Environment variable holding a query timeout in milliseconds.
pub const ENV_QUERY_TIMEOUT_MS: &str = "SQLGUARD_QUERY_TIMEOUT_MS";

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cloneable cancellation handle shared between a caller and in-flight queries.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    state: Arc<CancelState>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort every call bound to this signal. Idempotent.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        self.state.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`CancelSignal::cancel`] has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.state.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Execution context bound to a builder or writer.
///
/// Replaces any ambient/global switch: two builders with different contexts
/// never influence each other.
#[derive(Debug, Clone)]
pub struct ExecContext {
    /// Abort the call (and ask the server to cancel it) after this long.
    pub timeout: Option<Duration>,
    /// External cancellation.
    pub cancel: Option<CancelSignal>,
    /// Log every executed statement with interpolated arguments and elapsed time.
    pub debug: bool,
    /// Tracing event level for debug logs.
    pub debug_level: Level,
    /// Truncate logged SQL (in bytes). `None` means no truncation.
    pub max_sql_length: Option<usize>,
}

impl Default for ExecContext {
    fn default() -> Self {
        Self {
            timeout: None,
            cancel: None,
            debug: false,
            debug_level: Level::DEBUG,
            max_sql_length: None,
        }
    }
}

impl ExecContext {
    /// Create a new context with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `SQLGUARD_DEBUG` and `SQLGUARD_QUERY_TIMEOUT_MS`.
    ///
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut ctx = Self::default();
        if let Ok(v) = std::env::var(ENV_DEBUG) {
            ctx.debug = matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "on");
        }
        if let Some(ms) = std::env::var(ENV_QUERY_TIMEOUT_MS)
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            ctx.timeout = Some(Duration::from_millis(ms));
        }
        ctx
    }

    /// Set query timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Bind a cancel signal.
    pub fn cancel_signal(mut self, signal: CancelSignal) -> Self {
        self.cancel = Some(signal);
        self
    }

    /// Enable or disable SQL debug logging.
    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    /// Override the tracing event level.
    pub fn debug_level(mut self, level: Level) -> Self {
        self.debug_level = level;
        self
    }

    /// Set maximum SQL length to display.
    pub fn max_sql_length(mut self, len: usize) -> Self {
        self.max_sql_length = Some(len);
        self
    }

    /// Disable SQL truncation.
    pub fn no_truncate(mut self) -> Self {
        self.max_sql_length = None;
        self
    }

    /// Run `future` under this context's timeout and cancel signal.
    ///
    /// On abort, `client` is asked to cancel the in-flight server query.
    pub async fn run<C, T, F>(&self, client: &C, future: F) -> OrmResult<T>
    where
        C: GenericClient + ?Sized,
        F: Future<Output = OrmResult<T>>,
    {
        run_bounded(self, client, future).await
    }

    /// Log how a [`transaction!`](crate::transaction) block ended.
    #[doc(hidden)]
    pub fn log_transaction(&self, committed: bool, elapsed: Duration, error: Option<&OrmError>) {
        let outcome = if committed { "commit" } else { "rollback" };
        if let Some(err) = error {
            tracing::warn!(
                target: "sqlguard::tx",
                outcome,
                elapsed_ms = elapsed.as_millis() as u64,
                error = %err,
                "transaction rolled back"
            );
        }
        if self.debug {
            emit_at_level!(
                self.debug_level,
                target: "sqlguard::tx",
                outcome,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            );
        }
    }

    fn truncate_sql(&self, sql: String) -> String {
        match self.max_sql_length {
            Some(max) if sql.len() > max => {
                let mut end = max;
                while !sql.is_char_boundary(end) {
                    end -= 1;
                }
                format!("{}...", &sql[..end])
            }
            _ => sql,
        }
    }

    /// Emit the debug log line for one executed statement.
    pub(crate) fn log_statement(
        &self,
        dialect: Dialect,
        sql: &str,
        args: &[Value],
        elapsed: Duration,
        error: Option<&OrmError>,
    ) {
        if let Some(err) = error {
            if !err.is_not_found() {
                tracing::warn!(
                    target: "sqlguard::sql",
                    dialect = dialect.name(),
                    sql = %self.truncate_sql(sql.to_string()),
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %err,
                    "statement failed"
                );
            }
        }
        if !self.debug {
            return;
        }

        let rendered = self.truncate_sql(interpolate(sql, args, dialect));
        emit_at_level!(
            self.debug_level,
            target: "sqlguard::sql",
            dialect = dialect.name(),
            param_count = args.len(),
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            sql = %rendered,
        );
    }
}

fn request_server_cancel<C: GenericClient + ?Sized>(client: &C) {
    if let Some(cancel_token) = client.cancel_token() {
        tokio::spawn(async move {
            let _ = cancel_token.cancel_query(tokio_postgres::NoTls).await;
        });
    }
}

/// Race `future` against the context's cancel signal and timeout.
///
/// An already cancelled context fails before `future` is polled. On abort the
/// future (and any cursor it owns) is dropped and a best-effort server-side
/// cancel is sent.
pub(crate) async fn run_bounded<C, T, F>(ctx: &ExecContext, client: &C, future: F) -> OrmResult<T>
where
    C: GenericClient + ?Sized,
    F: Future<Output = OrmResult<T>>,
{
    if ctx.cancel.as_ref().is_some_and(CancelSignal::is_cancelled) {
        return Err(OrmError::Cancelled);
    }

    let cancelled = async {
        match &ctx.cancel {
            Some(signal) => signal.cancelled().await,
            None => std::future::pending().await,
        }
    };
    let deadline = async {
        match ctx.timeout {
            Some(timeout) => {
                tokio::time::sleep(timeout).await;
                timeout
            }
            None => std::future::pending().await,
        }
    };

    tokio::pin!(future);
    tokio::select! {
        biased;
        result = &mut future => result,
        _ = cancelled => {
            request_server_cancel(client);
            Err(OrmError::Cancelled)
        }
        timeout = deadline => {
            request_server_cancel(client);
            Err(OrmError::Timeout(timeout))
        }
    }
}

/// [`run_bounded`] plus statement logging.
pub(crate) async fn run_logged<C, T, F>(
    ctx: &ExecContext,
    client: &C,
    dialect: Dialect,
    sql: &str,
    args: &[Value],
    future: F,
) -> OrmResult<T>
where
    C: GenericClient + ?Sized,
    F: Future<Output = OrmResult<T>>,
{
    let start = Instant::now();
    let result = run_bounded(ctx, client, future).await;
    ctx.log_statement(dialect, sql, args, start.elapsed(), result.as_ref().err());
    result
}
