//! Integration tests for query execution against an in-memory driver.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;

use ormsql_client::{
    CacheEntry, Driver, Error, ExecutorConfig, MemoryResultCache, QueryExecutor, QueryRunner,
    ResultCache, Result, RowStream,
};
use ormsql_core::catalog::{
    Catalog, ColumnDef, ColumnRole, EntityDef, OrderDirection, RelationDef, ScalarType,
};
use ormsql_core::query::{Dialect, DialectKind, LockMode, ReplicationMode};
use ormsql_core::{LockVersion, RawRow, Value};

type Responder = Arc<dyn Fn(&str) -> Vec<RawRow> + Send + Sync>;

#[derive(Default)]
struct MockState {
    queries: Vec<String>,
    events: Vec<&'static str>,
    modes: Vec<ReplicationMode>,
    in_transaction: bool,
    fail_queries: bool,
    fail_rollback: bool,
}

struct MockRunner {
    state: Arc<Mutex<MockState>>,
    respond: Responder,
}

impl MockRunner {
    fn run(&self, sql: &str) -> Result<Vec<RawRow>> {
        {
            let mut state = self.state.lock();
            state.queries.push(sql.to_string());
            if state.fail_queries {
                return Err(Error::Driver("connection reset".into()));
            }
        }
        Ok((self.respond)(sql))
    }
}

#[async_trait]
impl QueryRunner for MockRunner {
    async fn query(&self, sql: &str, _parameters: &[Value]) -> Result<Vec<RawRow>> {
        self.run(sql)
    }

    async fn stream(&self, sql: &str, _parameters: &[Value]) -> Result<RowStream> {
        let rows = self.run(sql)?;
        Ok(stream::iter(rows.into_iter().map(Ok)).boxed())
    }

    fn is_transaction_active(&self) -> bool {
        self.state.lock().in_transaction
    }

    async fn start_transaction(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.events.push("start");
        state.in_transaction = true;
        Ok(())
    }

    async fn commit_transaction(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.events.push("commit");
        state.in_transaction = false;
        Ok(())
    }

    async fn rollback_transaction(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.events.push("rollback");
        state.in_transaction = false;
        if state.fail_rollback {
            return Err(Error::Driver("rollback failed".into()));
        }
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        self.state.lock().events.push("release");
        Ok(())
    }
}

struct MockDriver {
    state: Arc<Mutex<MockState>>,
    respond: Responder,
}

#[async_trait]
impl Driver for MockDriver {
    fn dialect(&self) -> Dialect {
        Dialect::new(DialectKind::Postgres)
    }

    async fn create_query_runner(&self, mode: ReplicationMode) -> Result<Arc<dyn QueryRunner>> {
        self.state.lock().modes.push(mode);
        Ok(Arc::new(MockRunner {
            state: Arc::clone(&self.state),
            respond: Arc::clone(&self.respond),
        }))
    }
}

fn mock<F>(respond: F) -> (Arc<Mutex<MockState>>, Arc<MockDriver>)
where
    F: Fn(&str) -> Vec<RawRow> + Send + Sync + 'static,
{
    let state = Arc::new(Mutex::new(MockState::default()));
    let driver = Arc::new(MockDriver {
        state: Arc::clone(&state),
        respond: Arc::new(respond),
    });
    (state, driver)
}

fn row(pairs: &[(&str, Value)]) -> RawRow {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn post_row(id: i64, version: i64) -> RawRow {
    row(&[
        ("post_id", Value::Int(id)),
        ("post_title", Value::from("hello")),
        ("post_version", Value::Int(version)),
    ])
}

fn catalog() -> Catalog {
    let user = EntityDef::new("User", "users")
        .with_column(ColumnDef::primary("id", ScalarType::Int64))
        .with_column(ColumnDef::new("name", ScalarType::String))
        .with_relation(RelationDef::one_to_many("posts", "User", "Post", "author"));
    let post = EntityDef::new("Post", "posts")
        .with_column(ColumnDef::primary("id", ScalarType::Int64))
        .with_column(ColumnDef::new("title", ScalarType::String))
        .with_column(ColumnDef::new("version", ScalarType::Int64).with_role(ColumnRole::Version))
        .with_relation(
            RelationDef::many_to_one("author", "Post", "User").with_join_column("author_id", "id"),
        );
    Catalog::new(1).with_entity(user).with_entity(post)
}

fn manual_clock(start: u64) -> (Arc<AtomicU64>, Arc<dyn Fn() -> u64 + Send + Sync>) {
    let now = Arc::new(AtomicU64::new(start));
    let handle = Arc::clone(&now);
    (now, Arc::new(move || handle.load(Ordering::SeqCst)))
}

#[tokio::test]
async fn test_raw_many_releases_owned_runner() {
    let catalog = catalog();
    let (state, driver) = mock(|_| vec![post_row(1, 1)]);
    let executor = QueryExecutor::new(driver);

    let qb = executor.query_builder(&catalog).select("post").from("Post", "post");
    let rows = executor.get_raw_many(&qb).await.unwrap();

    assert_eq!(rows, vec![post_row(1, 1)]);
    let state = state.lock();
    assert_eq!(state.queries.len(), 1);
    assert_eq!(state.events, vec!["release"]);
    assert_eq!(state.modes, vec![ReplicationMode::Master]);
}

#[tokio::test]
async fn test_owned_transaction_commits() {
    let catalog = catalog();
    let (state, driver) = mock(|_| Vec::new());
    let executor = QueryExecutor::new(driver);

    let qb = executor
        .query_builder(&catalog)
        .from("Post", "post")
        .use_transaction(true);
    executor.get_many(&qb).await.unwrap();

    assert_eq!(state.lock().events, vec!["start", "commit", "release"]);
}

#[tokio::test]
async fn test_config_transactional_default() {
    let catalog = catalog();
    let (state, driver) = mock(|_| Vec::new());
    let executor =
        QueryExecutor::new(driver).with_config(ExecutorConfig::new().with_transactional(true));

    let qb = executor.query_builder(&catalog).from("Post", "post");
    executor.get_raw_many(&qb).await.unwrap();
    assert_eq!(state.lock().events, vec!["start", "commit", "release"]);

    state.lock().events.clear();
    let opted_out = qb.clone().use_transaction(false);
    executor.get_raw_many(&opted_out).await.unwrap();
    assert_eq!(state.lock().events, vec!["release"]);
}

#[tokio::test]
async fn test_driver_error_rolls_back_owned_transaction() {
    let catalog = catalog();
    let (state, driver) = mock(|_| Vec::new());
    state.lock().fail_queries = true;
    let executor = QueryExecutor::new(driver);

    let qb = executor
        .query_builder(&catalog)
        .from("Post", "post")
        .use_transaction(true);
    let err = executor.get_raw_many(&qb).await.unwrap_err();

    assert!(matches!(err, Error::Driver(_)));
    assert_eq!(state.lock().events, vec!["start", "rollback", "release"]);
}

#[tokio::test]
async fn test_rollback_failure_keeps_original_error() {
    let catalog = catalog();
    let (state, driver) = mock(|_| Vec::new());
    {
        let mut state = state.lock();
        state.fail_queries = true;
        state.fail_rollback = true;
    }
    let executor = QueryExecutor::new(driver);

    let qb = executor
        .query_builder(&catalog)
        .from("Post", "post")
        .use_transaction(true);
    let err = executor.get_raw_many(&qb).await.unwrap_err();

    assert!(matches!(err, Error::Driver(msg) if msg == "connection reset"));
    assert_eq!(state.lock().events, vec!["start", "rollback", "release"]);
}

#[tokio::test]
async fn test_caller_runner_is_left_alone() {
    let catalog = catalog();
    let (state, driver) = mock(|_| Vec::new());
    let runner = driver.create_query_runner(ReplicationMode::Master).await.unwrap();
    runner.start_transaction().await.unwrap();

    let executor = QueryExecutor::new(driver).with_query_runner(Arc::clone(&runner));
    let qb = executor
        .query_builder(&catalog)
        .from("Post", "post")
        .use_transaction(true);
    executor.get_many(&qb).await.unwrap();

    // the transaction was already open, so nothing is started, committed or released
    assert_eq!(state.lock().events, vec!["start"]);
    assert!(runner.is_transaction_active());
}

#[tokio::test]
async fn test_pessimistic_lock_requires_transaction() {
    let catalog = catalog();
    let (state, driver) = mock(|_| Vec::new());
    let executor = QueryExecutor::new(driver);

    let qb = executor
        .query_builder(&catalog)
        .from("Post", "post")
        .set_lock(LockMode::PessimisticWrite);
    let err = executor.get_many(&qb).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Query(ormsql_core::Error::PessimisticLockTransactionRequired)
    ));
    assert!(state.lock().queries.is_empty());
    assert_eq!(state.lock().events, vec!["release"]);

    state.lock().events.clear();
    executor.get_many(&qb.clone().use_transaction(true)).await.unwrap();
    let state = state.lock();
    assert!(state.queries[0].ends_with(" FOR UPDATE"));
    assert_eq!(state.events, vec!["start", "commit", "release"]);
}

#[tokio::test]
async fn test_optimistic_lock_rejected_for_bulk_fetches() {
    let catalog = catalog();
    let (state, driver) = mock(|_| Vec::new());
    let executor = QueryExecutor::new(driver);

    let qb = executor
        .query_builder(&catalog)
        .from("Post", "post")
        .set_optimistic_lock(LockVersion::Number(1));

    for err in [
        executor.get_many(&qb).await.unwrap_err(),
        executor.get_raw_many(&qb).await.unwrap_err(),
        executor.get_count(&qb).await.unwrap_err(),
        executor.get_many_and_count(&qb).await.unwrap_err(),
    ] {
        assert!(matches!(
            err,
            Error::Query(ormsql_core::Error::OptimisticLockCanNotBeUsed)
        ));
    }
    assert!(state.lock().modes.is_empty());
}

#[tokio::test]
async fn test_optimistic_lock_requires_version_column() {
    let catalog = catalog();
    let (_state, driver) = mock(|_| vec![row(&[("user_id", Value::Int(1))])]);
    let executor = QueryExecutor::new(driver);

    let qb = executor
        .query_builder(&catalog)
        .from("User", "user")
        .set_optimistic_lock(LockVersion::Number(1));
    let err = executor.get_one(&qb).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Query(ormsql_core::Error::NoVersionOrUpdateDateColumn(name)) if name == "User"
    ));
}

#[tokio::test]
async fn test_get_one_checks_version() {
    let catalog = catalog();
    let (_state, driver) = mock(|_| vec![post_row(1, 3)]);
    let executor = QueryExecutor::new(driver);
    let qb = executor.query_builder(&catalog).select("post").from("Post", "post");

    let found = executor
        .get_one(&qb.clone().set_optimistic_lock(LockVersion::Number(3)))
        .await
        .unwrap();
    assert_eq!(found, Some(post_row(1, 3)));

    let err = executor
        .get_one(&qb.set_optimistic_lock(LockVersion::Number(4)))
        .await
        .unwrap_err();
    match err {
        Error::Query(ormsql_core::Error::OptimisticLockVersionMismatch {
            entity,
            expected,
            actual,
        }) => {
            assert_eq!(entity, "Post");
            assert_eq!(expected, "4");
            assert_eq!(actual, "3");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_get_one_or_fail_on_empty_result() {
    let catalog = catalog();
    let (_state, driver) = mock(|_| Vec::new());
    let executor = QueryExecutor::new(driver);
    let qb = executor.query_builder(&catalog).from("Post", "post");

    assert_eq!(executor.get_one(&qb).await.unwrap(), None);
    let err = executor.get_one_or_fail(&qb).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Query(ormsql_core::Error::EntityNotFound(name)) if name == "Post"
    ));
}

#[tokio::test]
async fn test_two_phase_pagination() {
    let catalog = catalog();
    let (state, driver) = mock(|sql| {
        if sql.contains("distinctAlias") {
            vec![
                row(&[("ids_user_id", Value::Int(1))]),
                row(&[("ids_user_id", Value::Int(2))]),
            ]
        } else {
            // one user with two posts fans out into two rows
            vec![
                row(&[("user_id", Value::Int(1)), ("post_id", Value::Int(10))]),
                row(&[("user_id", Value::Int(1)), ("post_id", Value::Int(11))]),
                row(&[("user_id", Value::Int(2)), ("post_id", Value::Int(20))]),
            ]
        }
    });
    let executor = QueryExecutor::new(driver);

    let qb = executor
        .query_builder(&catalog)
        .select("user")
        .from("User", "user")
        .left_join_and_select("user.posts", "post", None)
        .order_by("user.name", OrderDirection::Desc)
        .skip(4)
        .take(2);
    let loaded = executor.get_raw_and_entities(&qb).await.unwrap();

    assert_eq!(loaded.raw.len(), 3);
    let state = state.lock();
    assert_eq!(state.queries.len(), 2);
    assert!(state.queries[0].ends_with(
        "ORDER BY \"distinctAlias\".\"user_name\" DESC, \"user_id\" ASC LIMIT 2 OFFSET 4"
    ));
    assert!(state.queries[1].contains("WHERE \"user\".\"id\" IN (1, 2)"));
    // the page is already cut, only the requested order survives
    assert!(state.queries[1].ends_with("ORDER BY \"user\".\"name\" DESC"));
    assert!(!state.queries[1].contains("LIMIT"));
    assert!(!state.queries[1].contains("OFFSET"));
}

#[tokio::test]
async fn test_empty_window_skips_main_query() {
    let catalog = catalog();
    let (state, driver) = mock(|_| Vec::new());
    let executor = QueryExecutor::new(driver);

    let qb = executor
        .query_builder(&catalog)
        .select("user")
        .from("User", "user")
        .left_join_and_select("user.posts", "post", None)
        .take(5);
    let users = executor.get_many(&qb).await.unwrap();

    assert!(users.is_empty());
    assert_eq!(state.lock().queries.len(), 1);
}

#[tokio::test]
async fn test_cache_hit_then_expiry() {
    let catalog = catalog();
    let (state, driver) = mock(|_| vec![post_row(1, 1)]);
    let (now, clock) = manual_clock(50_000);
    let cache = Arc::new(MemoryResultCache::new().with_clock(clock));
    let executor = QueryExecutor::new(driver).with_cache(cache.clone());

    let qb = executor
        .query_builder(&catalog)
        .select("post")
        .from("Post", "post")
        .cache(true);

    let first = executor.get_raw_many(&qb).await.unwrap();
    let second = executor.get_raw_many(&qb).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(state.lock().queries.len(), 1);
    assert_eq!(cache.stats().hits(), 1);

    // default lifetime is one second
    now.store(51_001, Ordering::SeqCst);
    executor.get_raw_many(&qb).await.unwrap();
    assert_eq!(state.lock().queries.len(), 2);
}

#[tokio::test]
async fn test_always_cache_respects_opt_out() {
    let catalog = catalog();
    let (state, driver) = mock(|_| Vec::new());
    let executor = QueryExecutor::new(driver)
        .with_cache(Arc::new(MemoryResultCache::new()))
        .with_config(ExecutorConfig::new().with_always_cache(true));

    let cached = executor.query_builder(&catalog).from("Post", "post");
    executor.get_raw_many(&cached).await.unwrap();
    executor.get_raw_many(&cached).await.unwrap();
    assert_eq!(state.lock().queries.len(), 1);

    let uncached = cached.clone().cache(false);
    executor.get_raw_many(&uncached).await.unwrap();
    executor.get_raw_many(&uncached).await.unwrap();
    assert_eq!(state.lock().queries.len(), 3);
}

struct BrokenCache;

#[async_trait]
impl ResultCache for BrokenCache {
    async fn get(
        &self,
        _identifier: Option<&str>,
        _query: &str,
        _duration: Duration,
    ) -> Result<Option<CacheEntry>> {
        Ok(None)
    }

    fn is_expired(&self, _entry: &CacheEntry) -> bool {
        true
    }

    async fn store(
        &self,
        _identifier: Option<&str>,
        _query: &str,
        _result: String,
        _duration: Duration,
        _previous: Option<&CacheEntry>,
    ) -> Result<()> {
        Err(Error::Cache("disk full".into()))
    }

    async fn remove(&self, _identifiers: &[String]) -> Result<()> {
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_cache_store_failure_strictness() {
    let catalog = catalog();
    let (_state, driver) = mock(|_| vec![post_row(1, 1)]);
    let lenient = QueryExecutor::new(driver.clone()).with_cache(Arc::new(BrokenCache));
    let qb = executor_query(&lenient, &catalog);
    assert_eq!(lenient.get_raw_many(&qb).await.unwrap().len(), 1);

    let strict = QueryExecutor::new(driver)
        .with_cache(Arc::new(BrokenCache))
        .with_config(ExecutorConfig::new().with_strict_cache_errors(true));
    let err = strict.get_raw_many(&qb).await.unwrap_err();
    assert!(matches!(err, Error::Cache(msg) if msg == "disk full"));
}

fn executor_query<'c>(
    executor: &QueryExecutor,
    catalog: &'c Catalog,
) -> ormsql_core::SelectQueryBuilder<'c> {
    executor
        .query_builder(catalog)
        .select("post")
        .from("Post", "post")
        .cache(true)
}

#[tokio::test]
async fn test_many_and_count_uses_separate_cache_ids() {
    let catalog = catalog();
    let (state, driver) = mock(|sql| {
        if sql.contains("COUNT(") {
            vec![row(&[("cnt", Value::from("2"))])]
        } else {
            vec![post_row(1, 1), post_row(2, 1)]
        }
    });
    let cache = Arc::new(MemoryResultCache::new());
    let executor = QueryExecutor::new(driver).with_cache(cache.clone());

    let qb = executor
        .query_builder(&catalog)
        .select("post")
        .from("Post", "post")
        .cache_with_id("posts", Some(Duration::from_secs(60)));
    let (posts, total) = executor.get_many_and_count(&qb).await.unwrap();

    assert_eq!(posts.len(), 2);
    assert_eq!(total, 2);
    assert_eq!(state.lock().queries.len(), 2);
    assert_eq!(state.lock().events, vec!["release"]);

    let ttl = Duration::from_secs(60);
    assert!(cache.get(Some("posts"), "", ttl).await.unwrap().is_some());
    assert!(cache.get(Some("posts-count"), "", ttl).await.unwrap().is_some());
}

#[tokio::test]
async fn test_count_defaults_to_zero() {
    let catalog = catalog();
    let (state, driver) = mock(|_| Vec::new());
    let executor = QueryExecutor::new(driver);

    let qb = executor.query_builder(&catalog).from("Post", "post");
    assert_eq!(executor.get_count(&qb).await.unwrap(), 0);
    assert!(state.lock().queries[0].starts_with("SELECT COUNT(1) AS \"cnt\""));
}

#[tokio::test]
async fn test_exists() {
    let catalog = catalog();
    let (state, driver) = mock(|sql| {
        if sql.contains("$1") {
            vec![row(&[("row_exists", Value::Int(1))])]
        } else {
            Vec::new()
        }
    });
    let executor = QueryExecutor::new(driver);

    let qb = executor.query_builder(&catalog).from("Post", "post");
    assert!(!executor.get_exists(&qb).await.unwrap());

    let filtered = qb.where_("post.id = :id").set_parameter("id", 1);
    assert!(executor.get_exists(&filtered).await.unwrap());
    assert!(state.lock().queries[1].contains("WHERE EXISTS ("));
}

#[tokio::test]
async fn test_stream_commits_then_releases_at_end() {
    let catalog = catalog();
    let (state, driver) = mock(|_| vec![post_row(1, 1), post_row(2, 1)]);
    let executor = QueryExecutor::new(driver);

    let qb = executor
        .query_builder(&catalog)
        .select("post")
        .from("Post", "post")
        .use_transaction(true);
    let rows = executor.stream(&qb).await.unwrap();
    assert_eq!(state.lock().events, vec!["start", "commit"]);

    let collected: Vec<_> = rows.collect().await;
    assert_eq!(collected.len(), 2);
    for _ in 0..10 {
        if state.lock().events.contains(&"release") {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(state.lock().events, vec!["start", "commit", "release"]);
}

#[tokio::test]
async fn test_replication_mode_routes_checkout() {
    let catalog = catalog();
    let (state, driver) = mock(|_| Vec::new());
    let executor = QueryExecutor::new(driver)
        .with_config(ExecutorConfig::new().with_replication(ReplicationMode::Slave));

    let qb = executor.query_builder(&catalog).from("Post", "post");
    executor.get_raw_many(&qb).await.unwrap();
    executor
        .get_raw_many(&qb.set_replication_mode(ReplicationMode::Master))
        .await
        .unwrap();

    assert_eq!(
        state.lock().modes,
        vec![ReplicationMode::Slave, ReplicationMode::Master]
    );
}
