//! Query execution.
//!
//! [`QueryExecutor`] runs a compiled [`SelectQueryBuilder`] through a driver:
//! it checks out a runner, opens a transaction when asked to, consults the
//! result cache, applies two-phase pagination, hydrates rows, and finally
//! commits or rolls back and releases whatever it acquired itself.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use ormsql_core::query::{alias_column, COUNT_COLUMN};
use ormsql_core::{Catalog, EntityDef, LockMode, LockVersion, RawRow, SelectQueryBuilder, Value};
use tracing::{debug, warn};

use crate::cache::ResultCache;
use crate::config::ExecutorConfig;
use crate::driver::{Driver, QueryRunner, RowStream};
use crate::error::{Error, Result};
use crate::hydrate::{HydrationContext, Hydrator, LoadedRelations, RawHydrator};

type QueryError = ormsql_core::Error;

/// Suffix appended to the cache id of the count half of `get_many_and_count`.
pub const COUNT_CACHE_SUFFIX: &str = "-count";

/// Raw rows together with the entities built from them.
#[derive(Debug, Clone, PartialEq)]
pub struct RawAndEntities<E> {
    /// Rows as returned by the driver.
    pub raw: Vec<RawRow>,
    /// Hydrated entities.
    pub entities: Vec<E>,
}

/// A runner checked out for one call, with what this call owns of it.
struct Session {
    runner: Arc<dyn QueryRunner>,
    owns_runner: bool,
    owns_transaction: bool,
}

/// Executes select queries.
pub struct QueryExecutor<H = RawHydrator> {
    driver: Arc<dyn Driver>,
    cache: Option<Arc<dyn ResultCache>>,
    hydrator: H,
    config: ExecutorConfig,
    runner: Option<Arc<dyn QueryRunner>>,
}

impl QueryExecutor<RawHydrator> {
    /// Create an executor that returns raw rows as entities.
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            cache: None,
            hydrator: RawHydrator,
            config: ExecutorConfig::default(),
            runner: None,
        }
    }
}

impl<H: Hydrator> QueryExecutor<H> {
    /// Replace the hydrator.
    pub fn with_hydrator<H2: Hydrator>(self, hydrator: H2) -> QueryExecutor<H2> {
        QueryExecutor {
            driver: self.driver,
            cache: self.cache,
            hydrator,
            config: self.config,
            runner: self.runner,
        }
    }

    /// Attach a result cache.
    pub fn with_cache(mut self, cache: Arc<dyn ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Run every query on a caller-owned runner.
    ///
    /// The executor never releases this runner and never commits or rolls
    /// back a transaction it did not start.
    pub fn with_query_runner(mut self, runner: Arc<dyn QueryRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Get the configuration.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Start a query in the driver's dialect.
    pub fn query_builder<'c>(&self, catalog: &'c Catalog) -> SelectQueryBuilder<'c> {
        SelectQueryBuilder::new(catalog, self.driver.dialect())
    }

    // ---- result shapes -----------------------------------------------------

    /// Fetch rows without hydration.
    pub async fn get_raw_many(&self, qb: &SelectQueryBuilder<'_>) -> Result<Vec<RawRow>> {
        reject_optimistic(qb)?;
        let mut qb = qb.clone();
        qb.expression_map_mut().query_entity = false;

        let session = self.open_session(&qb).await?;
        let result = self.load_raw_results(session.runner.as_ref(), &qb).await;
        self.close_session(session, result).await
    }

    /// Fetch rows and the entities built from them.
    pub async fn get_raw_and_entities(
        &self,
        qb: &SelectQueryBuilder<'_>,
    ) -> Result<RawAndEntities<H::Entity>> {
        let mut qb = qb.clone();
        qb.expression_map_mut().query_entity = true;

        let session = self.open_session(&qb).await?;
        let result = self.execute_entities_and_raw(&session, &qb).await;
        self.close_session(session, result).await
    }

    /// Fetch the first entity, checking its version under an optimistic lock.
    pub async fn get_one(&self, qb: &SelectQueryBuilder<'_>) -> Result<Option<H::Entity>> {
        let results = self.get_raw_and_entities(qb).await?;
        let first = results.entities.into_iter().next();

        let map = qb.expression_map();
        if let (Some(entity), LockMode::Optimistic, Some(version)) =
            (&first, map.lock_mode, map.lock_version)
        {
            self.check_version(qb, entity, version)?;
        }
        Ok(first)
    }

    /// Fetch the first entity, failing with `EntityNotFound` when there is none.
    pub async fn get_one_or_fail(&self, qb: &SelectQueryBuilder<'_>) -> Result<H::Entity> {
        match self.get_one(qb).await? {
            Some(entity) => Ok(entity),
            None => Err(QueryError::EntityNotFound(target_name(qb)).into()),
        }
    }

    /// Fetch every entity.
    pub async fn get_many(&self, qb: &SelectQueryBuilder<'_>) -> Result<Vec<H::Entity>> {
        reject_optimistic(qb)?;
        Ok(self.get_raw_and_entities(qb).await?.entities)
    }

    /// Count distinct main entities, ignoring paging.
    pub async fn get_count(&self, qb: &SelectQueryBuilder<'_>) -> Result<u64> {
        reject_optimistic(qb)?;
        let mut qb = qb.clone();
        qb.expression_map_mut().query_entity = false;

        let session = self.open_session(&qb).await?;
        let result = self.execute_count(session.runner.as_ref(), &qb).await;
        self.close_session(session, result).await
    }

    /// Fetch one page of entities and the total count in one session.
    pub async fn get_many_and_count(
        &self,
        qb: &SelectQueryBuilder<'_>,
    ) -> Result<(Vec<H::Entity>, u64)> {
        reject_optimistic(qb)?;
        let mut entities_qb = qb.clone();
        entities_qb.expression_map_mut().query_entity = true;
        let mut count_qb = qb.clone();
        {
            let map = count_qb.expression_map_mut();
            map.query_entity = false;
            if let Some(id) = &map.cache.id {
                map.cache.id = Some(format!("{}{}", id, COUNT_CACHE_SUFFIX));
            }
        }

        let session = self.open_session(qb).await?;
        let result = async {
            let loaded = self.execute_entities_and_raw(&session, &entities_qb).await?;
            let count = self.execute_count(session.runner.as_ref(), &count_qb).await?;
            Ok::<_, Error>((loaded.entities, count))
        }
        .await;
        self.close_session(session, result).await
    }

    /// Check whether the query matches at least one row.
    pub async fn get_exists(&self, qb: &SelectQueryBuilder<'_>) -> Result<bool> {
        reject_optimistic(qb)?;
        let probe = qb.exists_query()?;

        let session = self.open_session(qb).await?;
        let result = self
            .load_raw_results(session.runner.as_ref(), &probe)
            .await
            .map(|rows| !rows.is_empty());
        self.close_session(session, result).await
    }

    /// Stream raw rows.
    ///
    /// An owned transaction is committed once the stream is open. An owned
    /// runner is released when the stream ends, fails, or is dropped.
    pub async fn stream(&self, qb: &SelectQueryBuilder<'_>) -> Result<QueryStream> {
        let mut qb = qb.clone();
        qb.expression_map_mut().query_entity = false;
        let (sql, parameters) = qb.get_query_and_parameters()?;

        let session = self.open_session(&qb).await?;
        debug!(sql = %sql, params = parameters.len(), "Opening query stream");
        let opened = session.runner.stream(&sql, &parameters).await;
        match self.finish_transaction(&session, opened).await {
            Ok(rows) => {
                let release = session
                    .owns_runner
                    .then(|| release_hook(Arc::clone(&session.runner)));
                Ok(QueryStream::new(rows, release))
            }
            Err(e) => {
                self.release_runner(&session).await;
                Err(e)
            }
        }
    }

    // ---- session lifecycle -------------------------------------------------

    async fn open_session(&self, qb: &SelectQueryBuilder<'_>) -> Result<Session> {
        let map = qb.expression_map();
        let mut session = match &self.runner {
            Some(runner) => Session {
                runner: Arc::clone(runner),
                owns_runner: false,
                owns_transaction: false,
            },
            None => {
                let mode = map.replication.unwrap_or(self.config.replication);
                Session {
                    runner: self.driver.create_query_runner(mode).await?,
                    owns_runner: true,
                    owns_transaction: false,
                }
            }
        };

        let wants_transaction = map.use_transaction.unwrap_or(self.config.transactional);
        if wants_transaction && !session.runner.is_transaction_active() {
            if let Err(e) = session.runner.start_transaction().await {
                self.release_runner(&session).await;
                return Err(e);
            }
            session.owns_transaction = true;
            debug!("Started owned transaction");
        }

        if map.lock_mode.is_pessimistic() && !session.runner.is_transaction_active() {
            return self
                .close_session(session, Err(QueryError::PessimisticLockTransactionRequired.into()))
                .await;
        }
        Ok(session)
    }

    /// Commit an owned transaction on success; roll it back on failure.
    ///
    /// A failed commit is rolled back too. Rollback failures are logged and
    /// the original error is returned.
    async fn finish_transaction<T>(&self, session: &Session, result: Result<T>) -> Result<T> {
        if !session.owns_transaction {
            return result;
        }
        let result = match result {
            Ok(value) => {
                let committed = session.runner.commit_transaction().await;
                if committed.is_ok() {
                    debug!("Committed owned transaction");
                }
                committed.map(|()| value)
            }
            failed => failed,
        };
        if let Err(original) = &result {
            match session.runner.rollback_transaction().await {
                Ok(()) => debug!(error = %original, "Rolled back owned transaction"),
                Err(e) => warn!(
                    error = %e,
                    original = %original,
                    "Rollback of owned transaction failed"
                ),
            }
        }
        result
    }

    async fn release_runner(&self, session: &Session) {
        if !session.owns_runner {
            return;
        }
        if let Err(e) = session.runner.release().await {
            warn!(error = %e, "Failed to release query runner");
        }
    }

    async fn close_session<T>(&self, session: Session, result: Result<T>) -> Result<T> {
        let result = self.finish_transaction(&session, result).await;
        self.release_runner(&session).await;
        result
    }

    // ---- execution ---------------------------------------------------------

    fn cache_enabled(&self, qb: &SelectQueryBuilder<'_>) -> bool {
        let enabled = qb.expression_map().cache.enabled;
        (self.config.always_cache && enabled != Some(false)) || enabled == Some(true)
    }

    /// Run one compiled query, going through the result cache when enabled.
    async fn load_raw_results(
        &self,
        runner: &dyn QueryRunner,
        qb: &SelectQueryBuilder<'_>,
    ) -> Result<Vec<RawRow>> {
        let (sql, parameters) = qb.get_query_and_parameters()?;
        let cache = match &self.cache {
            Some(cache) if self.cache_enabled(qb) => cache,
            _ => {
                debug!(sql = %sql, params = parameters.len(), "Executing query");
                return runner.query(&sql, &parameters).await;
            }
        };

        let setting = &qb.expression_map().cache;
        let identifier = setting.id.as_deref();
        let duration = setting.duration.unwrap_or(self.config.default_cache_duration);
        let query_id = format!("{} -- PARAMETERS: {}", sql, serde_json::to_string(&parameters)?);

        let mut previous = None;
        let mut lookup_failed = false;
        match cache.get(identifier, &query_id, duration).await {
            Ok(Some(entry)) if !cache.is_expired(&entry) => {
                debug!(identifier = ?identifier, "Result cache hit");
                return Ok(serde_json::from_str(&entry.result)?);
            }
            Ok(entry) => {
                debug!(identifier = ?identifier, "Result cache miss");
                previous = entry;
            }
            Err(e) if self.config.strict_cache_errors => return Err(e),
            Err(e) => {
                warn!(error = %e, "Result cache lookup failed");
                lookup_failed = true;
            }
        }

        debug!(sql = %sql, params = parameters.len(), "Executing query");
        let rows = runner.query(&sql, &parameters).await?;

        if !lookup_failed {
            let stored = cache
                .store(
                    identifier,
                    &query_id,
                    serde_json::to_string(&rows)?,
                    duration,
                    previous.as_ref(),
                )
                .await;
            if let Err(e) = stored {
                if self.config.strict_cache_errors {
                    return Err(e);
                }
                warn!(error = %e, "Result cache store failed");
            }
        }
        Ok(rows)
    }

    async fn execute_entities_and_raw(
        &self,
        session: &Session,
        qb: &SelectQueryBuilder<'_>,
    ) -> Result<RawAndEntities<H::Entity>> {
        let map = qb.expression_map();
        let entity = qb.main_entity()?;
        if map.lock_mode == LockMode::Optimistic {
            require_version_columns(qb, entity)?;
        }
        let runner = session.runner.as_ref();

        let raw = match qb.window_query()? {
            Some(window) => {
                let ids = self.load_raw_results(runner, &window).await?;
                debug!(ids = ids.len(), "Loaded pagination window");
                if ids.is_empty() {
                    Vec::new()
                } else {
                    self.load_raw_results(runner, &qb.restrict_to_ids(&ids)?).await?
                }
            }
            None => self.load_raw_results(runner, qb).await?,
        };
        if raw.is_empty() {
            return Ok(RawAndEntities {
                raw,
                entities: Vec::new(),
            });
        }

        let ctx = HydrationContext {
            map,
            catalog: qb.catalog(),
            dialect: qb.dialect(),
        };
        let relations = LoadedRelations {
            relation_ids: self.hydrator.load_relation_ids(runner, &ctx, &raw).await?,
            relation_counts: self.hydrator.load_relation_counts(runner, &ctx, &raw).await?,
        };
        let entities = self.hydrator.transform(&ctx, &raw, &relations)?;
        if entity.is_some() {
            self.hydrator.after_load(&entities).await?;
        }
        Ok(RawAndEntities { raw, entities })
    }

    async fn execute_count(
        &self,
        runner: &dyn QueryRunner,
        qb: &SelectQueryBuilder<'_>,
    ) -> Result<u64> {
        let counted = qb.count_query()?;
        let rows = self.load_raw_results(runner, &counted).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get(COUNT_COLUMN))
            .and_then(parse_count)
            .unwrap_or(0))
    }

    fn check_version(
        &self,
        qb: &SelectQueryBuilder<'_>,
        entity: &H::Entity,
        expected: LockVersion,
    ) -> Result<()> {
        let main = qb.expression_map().main_alias_name()?;
        let def = qb
            .main_entity()?
            .ok_or_else(|| QueryError::NoVersionOrUpdateDateColumn(main.to_string()))?;
        let column = match expected {
            LockVersion::Number(_) => def.version_column(),
            LockVersion::Timestamp(_) => def.update_date_column(),
        }
        .ok_or_else(|| QueryError::NoVersionOrUpdateDateColumn(def.name.clone()))?;

        let key = alias_column(qb.dialect(), main, &column.database_name);
        let actual = self.hydrator.column_value(entity, column, &key);
        let wanted = match expected {
            LockVersion::Number(n) | LockVersion::Timestamp(n) => n,
        };
        if actual.as_ref().and_then(Value::as_i64) != Some(wanted) {
            return Err(QueryError::OptimisticLockVersionMismatch {
                entity: def.name.clone(),
                expected: expected.to_string(),
                actual: actual.map_or_else(|| "null".to_string(), |v| v.to_string()),
            }
            .into());
        }
        Ok(())
    }
}

fn reject_optimistic(qb: &SelectQueryBuilder<'_>) -> Result<()> {
    if qb.expression_map().lock_mode == LockMode::Optimistic {
        return Err(QueryError::OptimisticLockCanNotBeUsed.into());
    }
    Ok(())
}

fn require_version_columns(qb: &SelectQueryBuilder<'_>, entity: Option<&EntityDef>) -> Result<()> {
    match entity {
        Some(def) if def.version_column().is_some() || def.update_date_column().is_some() => Ok(()),
        Some(def) => Err(QueryError::NoVersionOrUpdateDateColumn(def.name.clone()).into()),
        None => Err(QueryError::NoVersionOrUpdateDateColumn(target_name(qb)).into()),
    }
}

/// Entity name of the main alias, or the alias itself for raw targets.
fn target_name(qb: &SelectQueryBuilder<'_>) -> String {
    match qb.main_entity() {
        Ok(Some(def)) => def.name.clone(),
        _ => qb
            .expression_map()
            .main_alias
            .clone()
            .unwrap_or_default(),
    }
}

/// Drivers return counts as integers, floats or text.
fn parse_count(value: &Value) -> Option<u64> {
    match value {
        Value::Float(f) if *f >= 0.0 => Some(f.trunc() as u64),
        other => other.as_i64().and_then(|n| u64::try_from(n).ok()),
    }
}

type ReleaseHook = Box<dyn FnOnce() + Send>;

fn release_hook(runner: Arc<dyn QueryRunner>) -> ReleaseHook {
    Box::new(move || match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(e) = runner.release().await {
                    warn!(error = %e, "Failed to release query runner after stream");
                }
            });
        }
        Err(_) => warn!("No runtime to release query runner after stream"),
    })
}

/// Rows from [`QueryExecutor::stream`].
///
/// Releases an executor-owned runner once, at end of stream, on the first
/// error, or on drop.
pub struct QueryStream {
    rows: RowStream,
    release: Option<ReleaseHook>,
}

impl QueryStream {
    fn new(rows: RowStream, release: Option<ReleaseHook>) -> Self {
        Self { rows, release }
    }

    fn release(&mut self) {
        if let Some(hook) = self.release.take() {
            hook();
        }
    }
}

impl Stream for QueryStream {
    type Item = Result<RawRow>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.rows.poll_next_unpin(cx);
        if matches!(polled, Poll::Ready(None) | Poll::Ready(Some(Err(_)))) {
            self.release();
        }
        polled
    }
}

impl Drop for QueryStream {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for QueryStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryStream")
            .field("owns_runner", &self.release.is_some())
            .finish()
    }
}
