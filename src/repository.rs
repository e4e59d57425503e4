use std::marker::PhantomData;

use chrono::Utc;
use sea_orm::{
    sea_query::{Expr, SimpleExpr}, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};

use crate::allocator;
use crate::config::OrderedTreeConfig;
use crate::error::OrderedTreeError;
use crate::guard;
use crate::lock::LockedTransaction;
use crate::query::{self, NameScope, Scope};
use crate::renumber;
use crate::retry::with_retry;
use crate::traits::{OrderedTreeModel, ROOT_PARENT};
use crate::traversal::{self, ChildNode, SearchNode};

/// Rows per soft-delete statement.
const DELETE_BATCH: usize = 500;

/// A node to be created.
///
/// `attrs` carries the descriptive columns; the repository fills in every
/// structural column itself.
#[derive(Clone, Debug)]
pub struct NewNode<A> {
    pub tree_id: i64,
    pub parent_id: i64,
    pub name: String,
    pub before: Option<i64>,
    pub attrs: A,
}

impl<A> NewNode<A> {
    /// Append `name` as the last child of `parent_id` (`0` for a root).
    pub fn new(tree_id: i64, parent_id: i64, name: impl Into<String>, attrs: A) -> Self {
        Self {
            tree_id,
            parent_id,
            name: name.into(),
            before: None,
            attrs,
        }
    }

    /// Place the node immediately before the given sibling instead of last.
    pub fn before(mut self, sibling_id: i64) -> Self {
        self.before = Some(sibling_id);
        self
    }

    fn scope(&self) -> Scope {
        Scope::new(self.tree_id, self.parent_id)
    }
}

/// Repository exposing the ordered-tree operations for a given model.
#[derive(Debug, Default)]
pub struct OrderedTreeRepository<M>
where
    M: OrderedTreeModel,
{
    _marker: PhantomData<M>,
}

impl<M> OrderedTreeRepository<M>
where
    M: OrderedTreeModel,
{
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    fn config(&self) -> &'static OrderedTreeConfig {
        M::ordered_tree_config()
    }

    async fn begin(&self, db: &DatabaseConnection) -> Result<LockedTransaction, OrderedTreeError> {
        LockedTransaction::begin::<M>(self.config().scope_lock_strategy(), db).await
    }

    // ---- mutations -------------------------------------------------------

    /// Create a node and return its id.
    #[tracing::instrument(
        skip_all,
        fields(tree_id = node.tree_id, parent_id = node.parent_id, name = %node.name)
    )]
    pub async fn insert(
        &self,
        db: &DatabaseConnection,
        node: NewNode<M::ActiveModel>,
        max_layer: u32,
    ) -> Result<i64, OrderedTreeError> {
        let node = &node;
        let created = with_retry(self.config().retry_policy(), "insert", |_| async move {
            let txn = self.begin(db).await?;
            let result = self.insert_on(&txn, node, max_layer).await;
            txn.finish(result).await
        })
        .await?;
        Ok(created.id())
    }

    /// Move `node_id` with its whole subtree under `dest_parent_id`, before
    /// `before_sibling_id` or last among the new siblings.
    #[tracing::instrument(skip(self, db))]
    pub async fn move_node(
        &self,
        db: &DatabaseConnection,
        node_id: i64,
        dest_parent_id: i64,
        before_sibling_id: Option<i64>,
        tree_id: i64,
        max_layer: u32,
    ) -> Result<(), OrderedTreeError> {
        with_retry(self.config().retry_policy(), "move", |_| async move {
            let txn = self.begin(db).await?;
            let result = self
                .move_on(&txn, node_id, dest_parent_id, before_sibling_id, tree_id, max_layer)
                .await;
            txn.finish(result).await
        })
        .await
    }

    /// Change the name of a node. Structure is never touched.
    #[tracing::instrument(skip(self, db))]
    pub async fn rename(
        &self,
        db: &DatabaseConnection,
        node_id: i64,
        new_name: &str,
    ) -> Result<(), OrderedTreeError> {
        with_retry(self.config().retry_policy(), "rename", |_| async move {
            let txn = self.begin(db).await?;
            let result = self.rename_on(txn.connection(), node_id, new_name).await;
            txn.finish(result).await
        })
        .await
    }

    /// Soft-delete a node and every descendant, returning how many rows went away.
    ///
    /// Deleting an unknown or already deleted node removes nothing.
    #[tracing::instrument(skip(self, db))]
    pub async fn delete(
        &self,
        db: &DatabaseConnection,
        node_id: i64,
        tree_id: i64,
    ) -> Result<u64, OrderedTreeError> {
        with_retry(self.config().retry_policy(), "delete", |_| async move {
            let txn = self.begin(db).await?;
            let result = self.delete_on(txn.connection(), node_id, tree_id).await;
            txn.finish(result).await
        })
        .await
    }

    /// Respace the keys of one scope and return the next free tail key.
    #[tracing::instrument(skip(self, db))]
    pub async fn renumber(
        &self,
        db: &DatabaseConnection,
        tree_id: i64,
        parent_id: i64,
    ) -> Result<i64, OrderedTreeError> {
        let scope = Scope::new(tree_id, parent_id);
        with_retry(self.config().retry_policy(), "renumber", |_| async move {
            let txn = self.begin(db).await?;
            let result = match txn.lock_scope::<M>(scope).await {
                Ok(()) => renumber::renumber::<M, _>(txn.connection(), scope, None).await,
                Err(err) => Err(err),
            };
            txn.finish(result).await
        })
        .await
    }

    /// Find the node at a name path from the roots, creating missing segments.
    pub async fn find_or_create_by_path<S: AsRef<str>>(
        &self,
        db: &DatabaseConnection,
        tree_id: i64,
        segments: &[S],
        max_layer: u32,
    ) -> Result<M, OrderedTreeError> {
        if segments.is_empty() {
            return Err(OrderedTreeError::invariant("path cannot be empty"));
        }

        with_retry(self.config().retry_policy(), "find_or_create_by_path", |_| async move {
            let txn = self.begin(db).await?;
            let result = self
                .find_or_create_by_path_on(&txn, tree_id, segments, max_layer)
                .await;
            txn.finish(result).await
        })
        .await
    }

    async fn insert_on(
        &self,
        txn: &LockedTransaction,
        node: &NewNode<M::ActiveModel>,
        max_layer: u32,
    ) -> Result<M, OrderedTreeError> {
        let conn = txn.connection();
        let scope = node.scope();

        guard::check_placement::<M, _>(conn, scope.tree_id, None, scope.parent_id, max_layer)
            .await?;

        let name_scope = NameScope::for_policy(self.config().name_uniqueness(), scope);
        if self.exists_by_name(conn, &node.name, name_scope, &[]).await? {
            return Err(OrderedTreeError::name_conflict(&node.name));
        }

        txn.lock_scope::<M>(scope).await?;
        let before = match node.before {
            Some(sibling_id) => Some(self.sibling_in(conn, scope, sibling_id).await?),
            None => None,
        };
        let sort_key = allocator::allocate::<M, _>(conn, scope, before.as_ref(), None).await?;

        let now = Utc::now();
        let mut active = node.attrs.clone();
        M::set_tree(&mut active, scope.tree_id);
        M::set_parent(&mut active, scope.parent_id);
        M::set_name(&mut active, &node.name);
        M::set_sort_key(&mut active, sort_key);
        M::set_live(&mut active);
        M::set_created_at(&mut active, now);
        M::set_updated_at(&mut active, now);

        let created = active
            .insert(conn)
            .await
            .map_err(|err| OrderedTreeError::from_write(err, self.config(), &node.name))?;
        tracing::debug!(id = created.id(), sort_key, "node inserted");
        Ok(created)
    }

    async fn move_on(
        &self,
        txn: &LockedTransaction,
        node_id: i64,
        dest_parent_id: i64,
        before_sibling_id: Option<i64>,
        tree_id: i64,
        max_layer: u32,
    ) -> Result<(), OrderedTreeError> {
        let conn = txn.connection();
        // Lock the moving row before the guard reads any parent chain.
        let node = M::Entity::find()
            .filter(query::by_id::<M>(tree_id, node_id))
            .lock_exclusive()
            .one(conn)
            .await?
            .ok_or_else(|| OrderedTreeError::not_found(node_id))?;
        let dest = Scope::new(tree_id, dest_parent_id);

        if before_sibling_id == Some(node_id) {
            return if node.parent_id() == dest_parent_id {
                Ok(())
            } else {
                Err(OrderedTreeError::InvalidSibling {
                    sibling_id: node_id,
                })
            };
        }

        guard::check_placement::<M, _>(conn, tree_id, Some(node_id), dest_parent_id, max_layer)
            .await?;

        // Re-validate the name against the destination scope.
        let name_scope = NameScope::for_policy(self.config().name_uniqueness(), dest);
        if self
            .exists_by_name(conn, node.name(), name_scope, &[node_id])
            .await?
        {
            return Err(OrderedTreeError::name_conflict(node.name()));
        }

        txn.lock_scope::<M>(dest).await?;
        let before = match before_sibling_id {
            Some(sibling_id) => Some(self.sibling_in(conn, dest, sibling_id).await?),
            None => None,
        };
        let sort_key = allocator::allocate::<M, _>(conn, dest, before.as_ref(), Some(node_id))
            .await?;

        M::Entity::update_many()
            .col_expr(M::parent_column(), Expr::value(dest_parent_id))
            .col_expr(M::sort_key_column(), Expr::value(sort_key))
            .col_expr(M::updated_at_column(), Expr::value(Utc::now()))
            .filter(M::id_column().eq(node_id))
            .exec(conn)
            .await
            .map_err(|err| OrderedTreeError::from_write(err, self.config(), node.name()))?;
        tracing::debug!(sort_key, "node moved");
        Ok(())
    }

    async fn rename_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        node_id: i64,
        new_name: &str,
    ) -> Result<(), OrderedTreeError> {
        let node = M::Entity::find()
            .filter(query::live::<M>().add(M::id_column().eq(node_id)))
            .one(conn)
            .await?
            .ok_or_else(|| OrderedTreeError::not_found(node_id))?;
        if node.name() == new_name {
            return Ok(());
        }

        let name_scope = NameScope::for_policy(self.config().name_uniqueness(), Scope::of(&node));
        if self
            .exists_by_name(conn, new_name, name_scope, &[node_id])
            .await?
        {
            return Err(OrderedTreeError::name_conflict(new_name));
        }

        M::Entity::update_many()
            .col_expr(M::name_column(), Expr::value(new_name))
            .col_expr(M::updated_at_column(), Expr::value(Utc::now()))
            .filter(M::id_column().eq(node_id))
            .exec(conn)
            .await
            .map_err(|err| OrderedTreeError::from_write(err, self.config(), new_name))?;
        Ok(())
    }

    async fn delete_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        node_id: i64,
        tree_id: i64,
    ) -> Result<u64, OrderedTreeError> {
        if self.get(conn, node_id, tree_id).await?.is_none() {
            return Ok(0);
        }

        let ids = traversal::subtree_ids::<M, C>(conn, tree_id, node_id).await?;
        let now = Utc::now();
        let mut deleted = 0;
        for batch in ids.chunks(DELETE_BATCH) {
            let result = M::Entity::update_many()
                .col_expr(M::deleted_column(), SimpleExpr::from(Expr::col(M::id_column())))
                .col_expr(M::updated_at_column(), Expr::value(now))
                .filter(query::ids_in::<M>(tree_id, batch))
                .exec(conn)
                .await?;
            deleted += result.rows_affected;
        }

        tracing::debug!(deleted, "subtree soft-deleted");
        Ok(deleted)
    }

    async fn find_or_create_by_path_on<S: AsRef<str>>(
        &self,
        txn: &LockedTransaction,
        tree_id: i64,
        segments: &[S],
        max_layer: u32,
    ) -> Result<M, OrderedTreeError> {
        let mut parent_id = ROOT_PARENT;
        let mut current: Option<M> = None;

        for segment in segments {
            let name = segment.as_ref();
            let scope = Scope::new(tree_id, parent_id);
            let node = match self.child_by_name(txn.connection(), scope, name).await? {
                Some(model) => model,
                None => {
                    let new_node = NewNode::new(tree_id, parent_id, name, M::ActiveModel::default());
                    self.insert_on(txn, &new_node, max_layer).await?
                }
            };
            parent_id = node.id();
            current = Some(node);
        }

        current.ok_or_else(|| OrderedTreeError::invariant("path segments produced no node"))
    }

    // ---- reads -----------------------------------------------------------

    /// A live node of `tree_id`.
    pub async fn get<C: ConnectionTrait>(
        &self,
        conn: &C,
        node_id: i64,
        tree_id: i64,
    ) -> Result<Option<M>, OrderedTreeError> {
        let node = M::Entity::find()
            .filter(query::by_id::<M>(tree_id, node_id))
            .one(conn)
            .await?;
        Ok(node)
    }

    /// Whether a live node named `name` exists in `scope`, ignoring `exclude`.
    pub async fn exists_by_name<C: ConnectionTrait>(
        &self,
        conn: &C,
        name: &str,
        scope: NameScope,
        exclude: &[i64],
    ) -> Result<bool, OrderedTreeError> {
        let found = M::Entity::find()
            .filter(query::named::<M>(scope, name, exclude))
            .one(conn)
            .await?;
        Ok(found.is_some())
    }

    pub async fn parent<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: &M,
    ) -> Result<Option<M>, OrderedTreeError> {
        if model.is_root() {
            return Ok(None);
        }
        self.get(conn, model.parent_id(), model.tree_id()).await
    }

    pub async fn roots<C: ConnectionTrait>(
        &self,
        conn: &C,
        tree_id: i64,
    ) -> Result<Vec<M>, OrderedTreeError> {
        let rows = M::Entity::find()
            .filter(query::in_scope::<M>(Scope::new(tree_id, ROOT_PARENT)))
            .order_by_asc(M::sort_key_column())
            .all(conn)
            .await?;
        Ok(rows)
    }

    /// Path from the root down to and including `node_id`.
    pub async fn ancestors<C: ConnectionTrait>(
        &self,
        conn: &C,
        node_id: i64,
        tree_id: i64,
    ) -> Result<Vec<M>, OrderedTreeError> {
        let mut path = Vec::new();
        let mut current = node_id;

        while current != ROOT_PARENT {
            let node = self.require(conn, tree_id, current).await?;
            if path.iter().any(|seen: &M| seen.id() == node.id()) {
                return Err(OrderedTreeError::invariant(format!(
                    "stored parent chain of node {node_id} loops at {current}"
                )));
            }
            current = node.parent_id();
            path.push(node);
        }

        path.reverse();
        Ok(path)
    }

    /// Direct children in sibling order, flagged when they have children themselves.
    pub async fn list_children<C: ConnectionTrait>(
        &self,
        conn: &C,
        parent_id: i64,
        tree_id: i64,
        keyword: Option<&str>,
    ) -> Result<Vec<ChildNode<M>>, OrderedTreeError> {
        traversal::list_children::<M, C>(conn, Scope::new(tree_id, parent_id), keyword).await
    }

    /// All descendants of `parent_id` (`0` for the whole tree), level by level.
    pub async fn list_subtree<C: ConnectionTrait>(
        &self,
        conn: &C,
        parent_id: i64,
        tree_id: i64,
    ) -> Result<Vec<M>, OrderedTreeError> {
        traversal::list_subtree::<M, C>(conn, tree_id, parent_id).await
    }

    /// Keyword matches with their ancestors, as a forest rooted at tree roots.
    pub async fn search_with_ancestors<C: ConnectionTrait>(
        &self,
        conn: &C,
        tree_id: i64,
        keyword: &str,
    ) -> Result<Vec<SearchNode<M>>, OrderedTreeError> {
        traversal::search_with_ancestors::<M, C>(conn, tree_id, keyword).await
    }

    pub async fn find_by_path<S: AsRef<str>, C: ConnectionTrait>(
        &self,
        conn: &C,
        tree_id: i64,
        segments: &[S],
    ) -> Result<Option<M>, OrderedTreeError> {
        let mut parent_id = ROOT_PARENT;
        let mut current = None;

        for segment in segments {
            let scope = Scope::new(tree_id, parent_id);
            match self.child_by_name(conn, scope, segment.as_ref()).await? {
                Some(model) => {
                    parent_id = model.id();
                    current = Some(model);
                }
                None => return Ok(None),
            }
        }

        Ok(current)
    }

    async fn child_by_name<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: Scope,
        name: &str,
    ) -> Result<Option<M>, OrderedTreeError> {
        let model = M::Entity::find()
            .filter(query::named::<M>(NameScope::Siblings(scope), name, &[]))
            .one(conn)
            .await?;
        Ok(model)
    }

    async fn require<C: ConnectionTrait>(
        &self,
        conn: &C,
        tree_id: i64,
        node_id: i64,
    ) -> Result<M, OrderedTreeError> {
        self.get(conn, node_id, tree_id)
            .await?
            .ok_or_else(|| OrderedTreeError::not_found(node_id))
    }

    async fn sibling_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: Scope,
        sibling_id: i64,
    ) -> Result<M, OrderedTreeError> {
        M::Entity::find()
            .filter(query::in_scope::<M>(scope).add(M::id_column().eq(sibling_id)))
            .one(conn)
            .await?
            .ok_or(OrderedTreeError::InvalidSibling { sibling_id })
    }
}
