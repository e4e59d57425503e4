//! Sibling sort-key allocation.
//!
//! Keys are sparse: appends step by a fixed increment and inserts take the
//! integer midpoint between two neighbours. When no room is left the scope is
//! renumbered and allocation is attempted once more.

use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder};

use crate::config::SortKeySpacing;
use crate::error::OrderedTreeError;
use crate::query::{self, Scope};
use crate::renumber;
use crate::traits::OrderedTreeModel;

/// Outcome of a single allocation attempt.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Allocation {
    Key(i64),
    NeedsRenumber,
}

/// Key for appending after the current maximum of a scope.
pub fn plan_tail(spacing: &SortKeySpacing, max_key: Option<i64>) -> Allocation {
    match max_key {
        None => Allocation::Key(spacing.start),
        Some(max) if max > spacing.max => Allocation::NeedsRenumber,
        Some(max) => Allocation::Key(max + spacing.increment),
    }
}

/// Key for inserting immediately before a sibling holding `target_key`.
///
/// `pre_key` is the key of the preceding sibling, if any.
pub fn plan_before(spacing: &SortKeySpacing, pre_key: Option<i64>, target_key: i64) -> Allocation {
    let pre = pre_key.unwrap_or(spacing.begin);
    if target_key - pre <= 1 {
        return Allocation::NeedsRenumber;
    }
    let key = (pre + target_key) / 2;
    if pre < key && key < target_key {
        Allocation::Key(key)
    } else {
        Allocation::NeedsRenumber
    }
}

/// Allocate a key in `scope`, renumbering the scope once if it is exhausted.
///
/// `before` is the sibling the key must sort before; `moving` is excluded from
/// neighbour lookups so a node can be repositioned inside its own scope.
pub(crate) async fn allocate<M, C>(
    conn: &C,
    scope: Scope,
    before: Option<&M>,
    moving: Option<i64>,
) -> Result<i64, OrderedTreeError>
where
    M: OrderedTreeModel,
    C: ConnectionTrait,
{
    if let Allocation::Key(key) = plan::<M, C>(conn, scope, before, moving).await? {
        return Ok(key);
    }

    let reserve_before = before.map(|sibling| sibling.id());
    let next = renumber::renumber::<M, C>(conn, scope, reserve_before).await?;
    tracing::debug!(
        tree_id = scope.tree_id,
        parent_id = scope.parent_id,
        next,
        "scope renumbered before allocation"
    );

    // Reload the sibling: renumbering moved it.
    let before = match before {
        Some(sibling) => Some(
            M::Entity::find()
                .filter(query::by_id::<M>(scope.tree_id, sibling.id()))
                .one(conn)
                .await?
                .ok_or_else(|| OrderedTreeError::not_found(sibling.id()))?,
        ),
        None => None,
    };

    match plan::<M, C>(conn, scope, before.as_ref(), moving).await? {
        Allocation::Key(key) => Ok(key),
        Allocation::NeedsRenumber => Err(OrderedTreeError::invariant(format!(
            "no sort key available in scope {}:{} after renumbering",
            scope.tree_id, scope.parent_id
        ))),
    }
}

async fn plan<M, C>(
    conn: &C,
    scope: Scope,
    before: Option<&M>,
    moving: Option<i64>,
) -> Result<Allocation, OrderedTreeError>
where
    M: OrderedTreeModel,
    C: ConnectionTrait,
{
    let spacing = M::ordered_tree_config().spacing();

    match before {
        None => {
            let last = M::Entity::find()
                .filter(query::in_scope::<M>(scope))
                .order_by_desc(M::sort_key_column())
                .one(conn)
                .await?;
            let allocation = plan_tail(spacing, last.as_ref().map(|node| node.sort_key()));
            tracing::debug!(?allocation, "tail append");
            Ok(allocation)
        }
        Some(sibling) => {
            let mut condition = query::in_scope::<M>(scope)
                .add(M::sort_key_column().lt(sibling.sort_key()));
            if let Some(moving) = moving {
                condition = condition.add(M::id_column().ne(moving));
            }
            let previous = M::Entity::find()
                .filter(condition)
                .order_by_desc(M::sort_key_column())
                .one(conn)
                .await?;
            let allocation = plan_before(
                spacing,
                previous.as_ref().map(|node| node.sort_key()),
                sibling.sort_key(),
            );
            tracing::debug!(?allocation, before = sibling.id(), "midpoint insert");
            Ok(allocation)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spacing() -> SortKeySpacing {
        SortKeySpacing::default()
    }

    #[test]
    fn empty_scope_starts_at_start() {
        assert_eq!(plan_tail(&spacing(), None), Allocation::Key(512));
    }

    #[test]
    fn tail_appends_one_increment_past_max() {
        assert_eq!(plan_tail(&spacing(), Some(1536)), Allocation::Key(2048));
    }

    #[test]
    fn tail_past_ceiling_needs_renumber() {
        let spacing = spacing();
        assert_eq!(
            plan_tail(&spacing, Some(spacing.max + 1)),
            Allocation::NeedsRenumber
        );
        assert_eq!(
            plan_tail(&spacing, Some(spacing.max)),
            Allocation::Key(spacing.max + spacing.increment)
        );
    }

    #[test]
    fn midpoint_between_neighbours() {
        assert_eq!(plan_before(&spacing(), Some(512), 1024), Allocation::Key(768));
    }

    #[test]
    fn midpoint_before_first_uses_begin() {
        assert_eq!(plan_before(&spacing(), None, 512), Allocation::Key(256));
        assert_eq!(plan_before(&spacing(), None, 1), Allocation::NeedsRenumber);
    }

    #[test]
    fn adjacent_keys_need_renumber() {
        assert_eq!(plan_before(&spacing(), Some(512), 513), Allocation::NeedsRenumber);
        assert_eq!(plan_before(&spacing(), Some(512), 512), Allocation::NeedsRenumber);
    }

    #[test]
    fn repeated_bisection_eventually_exhausts() {
        let spacing = spacing();
        let mut target = spacing.start;
        let mut splits = 0;
        while let Allocation::Key(key) = plan_before(&spacing, None, target) {
            assert!(key < target);
            target = key;
            splits += 1;
        }
        assert_eq!(splits, 9);
    }
}
