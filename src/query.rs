//! Parameterized filters shared by every tree query.
//!
//! All scope and key predicates are built here through SeaORM's condition
//! builder so no caller ever splices ids or keys into SQL text.

use sea_orm::{sea_query::LikeExpr, ColumnTrait, Condition};

use crate::config::NameUniqueness;
use crate::traits::OrderedTreeModel;

/// The siblings sharing one `(tree_id, parent_id)`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Scope {
    pub tree_id: i64,
    pub parent_id: i64,
}

impl Scope {
    pub fn new(tree_id: i64, parent_id: i64) -> Self {
        Self { tree_id, parent_id }
    }

    pub fn of<M: OrderedTreeModel>(model: &M) -> Self {
        Self::new(model.tree_id(), model.parent_id())
    }
}

/// Where a name uniqueness lookup searches.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NameScope {
    Siblings(Scope),
    Tree(i64),
}

impl NameScope {
    /// Name scope for a node placed in `scope` under the given policy.
    pub fn for_policy(policy: NameUniqueness, scope: Scope) -> Self {
        match policy {
            NameUniqueness::Siblings => Self::Siblings(scope),
            NameUniqueness::Tree => Self::Tree(scope.tree_id),
        }
    }
}

pub(crate) fn live<M: OrderedTreeModel>() -> Condition {
    Condition::all().add(M::deleted_column().eq(0i64))
}

pub(crate) fn in_tree<M: OrderedTreeModel>(tree_id: i64) -> Condition {
    live::<M>().add(M::tree_column().eq(tree_id))
}

pub(crate) fn in_scope<M: OrderedTreeModel>(scope: Scope) -> Condition {
    in_tree::<M>(scope.tree_id).add(M::parent_column().eq(scope.parent_id))
}

pub(crate) fn by_id<M: OrderedTreeModel>(tree_id: i64, id: i64) -> Condition {
    in_tree::<M>(tree_id).add(M::id_column().eq(id))
}

pub(crate) fn children_of<M: OrderedTreeModel>(tree_id: i64, parent_ids: &[i64]) -> Condition {
    in_tree::<M>(tree_id).add(M::parent_column().is_in(parent_ids.iter().copied()))
}

pub(crate) fn ids_in<M: OrderedTreeModel>(tree_id: i64, ids: &[i64]) -> Condition {
    in_tree::<M>(tree_id).add(M::id_column().is_in(ids.iter().copied()))
}

/// Names containing `keyword` literally; `%` and `_` carry no wildcard meaning.
pub(crate) fn name_contains<M: OrderedTreeModel>(keyword: &str) -> Condition {
    Condition::all().add(
        M::name_column().like(LikeExpr::new(format!("%{}%", escape_like(keyword))).escape('\\')),
    )
}

fn escape_like(keyword: &str) -> String {
    let mut escaped = String::with_capacity(keyword.len());
    for ch in keyword.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

pub(crate) fn named<M: OrderedTreeModel>(scope: NameScope, name: &str, exclude: &[i64]) -> Condition {
    let mut condition = match scope {
        NameScope::Siblings(scope) => in_scope::<M>(scope),
        NameScope::Tree(tree_id) => in_tree::<M>(tree_id),
    }
    .add(M::name_column().eq(name));

    if !exclude.is_empty() {
        condition = condition.add(M::id_column().is_not_in(exclude.iter().copied()));
    }
    condition
}
