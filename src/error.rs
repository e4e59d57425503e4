use sea_orm::{DbErr, RuntimeErr, SqlErr};
use thiserror::Error;

use crate::config::OrderedTreeConfig;

/// Errors returned by the ordered-tree APIs.
#[derive(Debug, Error)]
pub enum OrderedTreeError {
    #[error("tree node {id} not found")]
    NotFound { id: i64 },

    #[error("a node named `{name}` already exists in this scope")]
    NameConflict { name: String },

    #[error("moving node {node_id} under {dest_parent_id} would create a cycle")]
    Cycle { node_id: i64, dest_parent_id: i64 },

    #[error("depth {depth} exceeds the maximum of {max_layer} layers")]
    DepthExceeded { max_layer: u32, depth: u64 },

    #[error("node {sibling_id} is not a sibling in the destination scope")]
    InvalidSibling { sibling_id: i64 },

    #[error("cannot space {siblings} siblings within the sort key range")]
    CapacityExceeded { siblings: usize },

    /// Another writer claimed the same sort key first. Retried internally.
    #[error("sort key conflict with a concurrent writer")]
    KeyConflict,

    #[error("gave up after {attempts} attempts due to concurrent writers; retry later")]
    RetriesExhausted { attempts: u32 },

    #[error("database error: {0}")]
    Database(#[from] DbErr),

    #[error("ordered-tree invariant violation: {0}")]
    Invariant(String),
}

impl OrderedTreeError {
    pub fn invariant(detail: impl Into<String>) -> Self {
        Self::Invariant(detail.into())
    }

    pub fn not_found(id: i64) -> Self {
        Self::NotFound { id }
    }

    pub fn name_conflict(name: impl Into<String>) -> Self {
        Self::NameConflict { name: name.into() }
    }

    /// Sort-key races and store-level write contention are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::KeyConflict => true,
            Self::Database(err) => is_write_contention(err),
            _ => false,
        }
    }

    /// Cycle and depth violations.
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::Cycle { .. } | Self::DepthExceeded { .. })
    }

    /// The caller can fix the request (pick another name, parent or position).
    pub fn is_user_correctable(&self) -> bool {
        self.is_structural()
            || matches!(
                self,
                Self::NameConflict { .. } | Self::InvalidSibling { .. } | Self::NotFound { .. }
            )
    }

    /// Map a write failure onto the domain taxonomy using the configured index names.
    pub(crate) fn from_write(err: DbErr, config: &OrderedTreeConfig, name: &str) -> Self {
        if let Some(SqlErr::UniqueConstraintViolation(message)) = err.sql_err() {
            if config.names_sort_key_index(&message) {
                return Self::KeyConflict;
            }
            if config.names_name_index(&message) {
                return Self::name_conflict(name);
            }
        }
        Self::Database(err)
    }
}

/// SQLite busy or locked (extended codes included).
const SQLITE_CONTENTION: [i64; 2] = [5, 6];
/// PostgreSQL serialization failure and deadlock detected.
const POSTGRES_CONTENTION: [&str; 2] = ["40001", "40P01"];

/// Whether the store aborted a statement because another transaction held
/// the rows or the database it needed.
pub(crate) fn is_write_contention(err: &DbErr) -> bool {
    let runtime = match err {
        DbErr::Conn(runtime) | DbErr::Exec(runtime) | DbErr::Query(runtime) => runtime,
        _ => return false,
    };
    let RuntimeErr::SqlxError(sqlx_err) = runtime else {
        return false;
    };
    let Some(db_err) = sqlx_err.as_database_error() else {
        return false;
    };
    let Some(code) = db_err.code() else {
        return false;
    };
    if db_err.try_downcast_ref::<sqlx::sqlite::SqliteError>().is_some() {
        is_sqlite_contention(&code)
    } else {
        is_postgres_contention(&code)
    }
}

fn is_sqlite_contention(code: &str) -> bool {
    code.parse::<i64>()
        .is_ok_and(|extended| SQLITE_CONTENTION.contains(&(extended & 0xff)))
}

fn is_postgres_contention(code: &str) -> bool {
    POSTGRES_CONTENTION.contains(&code)
}
