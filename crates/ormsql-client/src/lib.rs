//! ORMSQL Client - async execution of select queries.
//!
//! The executor drives a [`SelectQueryBuilder`](ormsql_core::SelectQueryBuilder)
//! through pluggable collaborators: a [`Driver`] for connections, an optional
//! [`ResultCache`], and a [`Hydrator`] that turns rows into entities.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use ormsql_client::{ExecutorConfig, MemoryResultCache, QueryExecutor};
//!
//! let executor = QueryExecutor::new(driver)
//!     .with_cache(Arc::new(MemoryResultCache::new()))
//!     .with_config(ExecutorConfig::new().with_transactional(true));
//!
//! let qb = executor
//!     .query_builder(&catalog)
//!     .select("user")
//!     .from("User", "user")
//!     .left_join_and_select("user.posts", "post", None)
//!     .take(10);
//! let (users, total) = executor.get_many_and_count(&qb).await?;
//! ```

pub mod cache;
pub mod config;
pub mod driver;
pub mod error;
pub mod executor;
pub mod hydrate;

pub use cache::{CacheEntry, CacheStats, MemoryResultCache, ResultCache};
pub use config::ExecutorConfig;
pub use driver::{Driver, QueryRunner, RowStream};
pub use error::{Error, Result};
pub use executor::{QueryExecutor, QueryStream, RawAndEntities};
pub use hydrate::{HydrationContext, Hydrator, LoadedRelations, RawHydrator};

/// Re-export the query model.
pub use ormsql_core as core;
