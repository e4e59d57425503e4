use sea_orm::{
    sea_query::{Expr, SimpleExpr}, ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend,
    EntityTrait, QueryFilter, Statement, TransactionTrait, Value,
};

use crate::config::{ScopeLockKey, ScopeLockStrategy};
use crate::error::OrderedTreeError;
use crate::query::Scope;
use crate::traits::OrderedTreeModel;

/// One attempt of a tree mutation: a transaction plus the scopes it has locked.
pub struct LockedTransaction {
    txn: DatabaseTransaction,
    strategy: ScopeLockStrategy,
}

impl LockedTransaction {
    /// Open a transaction for writing rows of `M`.
    ///
    /// SQLite transactions claim the database write lock up front, the same as
    /// `BEGIN IMMEDIATE`, so writers queue on the busy timeout instead of
    /// failing when a read lock cannot be upgraded.
    pub async fn begin<M: OrderedTreeModel>(
        strategy: ScopeLockStrategy,
        db: &DatabaseConnection,
    ) -> Result<Self, OrderedTreeError> {
        let locked = Self {
            txn: db.begin().await?,
            strategy,
        };
        if locked.txn.get_database_backend() == DbBackend::Sqlite {
            if let Err(err) = claim_sqlite_writer::<M>(&locked.txn).await {
                return locked.finish(Err(err)).await;
            }
        }
        Ok(locked)
    }

    pub fn connection(&self) -> &DatabaseTransaction {
        &self.txn
    }

    /// Serialise structural writers of `scope` until this transaction ends.
    ///
    /// Only meaningful on PostgreSQL with [`ScopeLockStrategy::Advisory`]; on
    /// every other combination the sort-key index arbitrates.
    pub async fn lock_scope<M: OrderedTreeModel>(
        &self,
        scope: Scope,
    ) -> Result<(), OrderedTreeError> {
        if self.strategy != ScopeLockStrategy::Advisory
            || self.txn.get_database_backend() != DbBackend::Postgres
        {
            return Ok(());
        }

        let config = M::ordered_tree_config();
        let key = ScopeLockKey::derived_from(
            config.entity_name(),
            config.table_name(),
            scope.tree_id,
            scope.parent_id,
        );
        acquire_xact_lock(&self.txn, &key).await
    }

    /// Commit on success, roll back on failure, passing the outcome through.
    pub async fn finish<T>(
        self,
        result: Result<T, OrderedTreeError>,
    ) -> Result<T, OrderedTreeError> {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = self.rollback().await {
                    tracing::warn!(error = %rollback, "rollback failed");
                }
                Err(err)
            }
        }
    }

    pub async fn commit(self) -> Result<(), OrderedTreeError> {
        self.txn.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), OrderedTreeError> {
        self.txn.rollback().await?;
        Ok(())
    }
}

/// A write that matches no rows still takes the write lock.
async fn claim_sqlite_writer<M: OrderedTreeModel>(
    txn: &DatabaseTransaction,
) -> Result<(), OrderedTreeError> {
    M::Entity::update_many()
        .col_expr(M::id_column(), SimpleExpr::from(Expr::col(M::id_column())))
        .filter(Expr::val(1).eq(0))
        .exec(txn)
        .await?;
    Ok(())
}

async fn acquire_xact_lock(
    txn: &DatabaseTransaction,
    key: &ScopeLockKey,
) -> Result<(), OrderedTreeError> {
    txn.execute(Statement::from_sql_and_values(
        DbBackend::Postgres,
        "SELECT pg_advisory_xact_lock(hashtext($1))",
        vec![Value::from(key.as_str())],
    ))
    .await?;
    Ok(())
}
