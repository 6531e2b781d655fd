//! Transaction helper macro.
//!
//! Both `tokio_postgres::Transaction` and `deadpool_postgres::Transaction`
//! implement [`GenericClient`](crate::GenericClient), so builders and writers run
//! inside a transaction unchanged.
//!
//! # Example
//!
//! ```ignore
//! use sqlguard::{ExecContext, OrmResult, QueryBuilder, Writer};
//!
//! # async fn demo(client: &mut tokio_postgres::Client, user: &mut User) -> OrmResult<()> {
//! let ctx = ExecContext::new().timeout(std::time::Duration::from_secs(5));
//! sqlguard::transaction!(client, tx, &ctx, {
//!     Writer::new(&tx).create(user).await?;
//!     let n = QueryBuilder::for_client(&tx).model::<User>().count(&tx).await?;
//!     Ok(n)
//! })?;
//! # Ok(()) }
//! ```

/// Runs the given block inside a database transaction.
///
/// - Begins a transaction via `$client.transaction().await`.
/// - Runs the block under the [`ExecContext`](crate::ExecContext)'s timeout and
///   cancel signal, when one is given. A timed out or cancelled block rolls back.
/// - Commits on `Ok(_)`.
/// - Rolls back on `Err(_)`; a failed rollback is reported together with the
///   original error.
///
/// The block must evaluate to `sqlguard::OrmResult<T>`.
#[macro_export]
macro_rules! transaction {
    ($client:expr, $tx:ident, $ctx:expr, $body:block) => {{
        let __sqlguard_ctx: &$crate::ExecContext = $ctx;
        let __sqlguard_started = ::std::time::Instant::now();
        let $tx = ($client)
            .transaction()
            .await
            .map_err($crate::OrmError::from_db_error)?;

        let __sqlguard_tx_result: $crate::OrmResult<_> =
            __sqlguard_ctx.run(&$tx, async { $body }).await;
        match __sqlguard_tx_result {
            Ok(value) => {
                $tx.commit()
                    .await
                    .map_err($crate::OrmError::from_db_error)?;
                __sqlguard_ctx.log_transaction(true, __sqlguard_started.elapsed(), None);
                Ok(value)
            }
            Err(error) => {
                let error = match $tx.rollback().await {
                    Ok(()) => error,
                    Err(rollback_err) => $crate::OrmError::Other(format!(
                        "{error} (rollback failed: {rollback_err})"
                    )),
                };
                __sqlguard_ctx.log_transaction(false, __sqlguard_started.elapsed(), Some(&error));
                Err(error)
            }
        }
    }};
    ($client:expr, $tx:ident, $body:block) => {{
        let __sqlguard_default_ctx = $crate::ExecContext::default();
        $crate::transaction!($client, $tx, &__sqlguard_default_ctx, $body)
    }};
}
