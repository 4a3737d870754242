//! Driver seam.
//!
//! A [`Driver`] hands out [`QueryRunner`]s; a runner is one connection with
//! its transaction state. Concrete network drivers live outside this crate.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use ormsql_core::{Dialect, RawRow, ReplicationMode, Value};

use crate::error::Result;

/// Rows produced by a streaming query.
pub type RowStream = BoxStream<'static, Result<RawRow>>;

/// One checked-out connection.
#[async_trait]
pub trait QueryRunner: Send + Sync {
    /// Run positional SQL and return every row.
    async fn query(&self, sql: &str, parameters: &[Value]) -> Result<Vec<RawRow>>;

    /// Run positional SQL and return rows as they arrive.
    async fn stream(&self, sql: &str, parameters: &[Value]) -> Result<RowStream>;

    /// Whether a transaction is open on this connection.
    fn is_transaction_active(&self) -> bool;

    /// Begin a transaction.
    async fn start_transaction(&self) -> Result<()>;

    /// Commit the open transaction.
    async fn commit_transaction(&self) -> Result<()>;

    /// Roll back the open transaction.
    async fn rollback_transaction(&self) -> Result<()>;

    /// Return the connection to its pool.
    async fn release(&self) -> Result<()>;
}

/// Connection source.
#[async_trait]
pub trait Driver: Send + Sync {
    /// SQL dialect spoken by the database.
    fn dialect(&self) -> Dialect;

    /// Check out a runner. `Slave` prefers a read replica.
    async fn create_query_runner(&self, mode: ReplicationMode) -> Result<Arc<dyn QueryRunner>>;
}
