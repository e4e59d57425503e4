//! Scope renumbering.
//!
//! Rewrites every live sibling of a scope to evenly spaced keys while the
//! sort-key unique index stays enforced. Rows are visited in key order; a row
//! whose new key is still held by a not-yet-moved sibling is set aside and the
//! set-aside rows are written afterwards in reverse order. Because old and new
//! keys are both strictly increasing, a set-aside row only ever waits on a later
//! sibling, which the reverse flush has already moved.

use std::collections::HashMap;

use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect,
};

use crate::config::SortKeySpacing;
use crate::error::OrderedTreeError;
use crate::query::{self, Scope};
use crate::traits::OrderedTreeModel;

/// Ordered list of key rewrites for one scope.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RenumberPlan {
    /// `(id, new_key)` in the order they must be applied.
    pub writes: Vec<(i64, i64)>,
    /// Key left free before the reserved sibling, if one was requested and found.
    pub reserved: Option<i64>,
    /// One increment past the last assigned key.
    pub next: i64,
}

impl RenumberPlan {
    /// Key handed back to the caller that triggered the renumber.
    pub fn handoff(&self) -> i64 {
        self.reserved.unwrap_or(self.next)
    }
}

/// Plan a renumber of `siblings`, given as `(id, current_key)` in ascending key order.
///
/// When `reserve_before` names one of the siblings, a gap of one increment is
/// left in front of it.
pub fn plan(
    spacing: &SortKeySpacing,
    siblings: &[(i64, i64)],
    reserve_before: Option<i64>,
) -> Result<RenumberPlan, OrderedTreeError> {
    let capacity_exceeded = || OrderedTreeError::CapacityExceeded {
        siblings: siblings.len(),
    };

    let mut targets = Vec::with_capacity(siblings.len());
    let mut reserved = None;
    let mut offset = spacing.start;
    for &(id, _) in siblings {
        if reserve_before == Some(id) {
            reserved = Some(offset);
            offset = offset
                .checked_add(spacing.increment)
                .ok_or_else(capacity_exceeded)?;
        }
        targets.push(offset);
        offset = offset
            .checked_add(spacing.increment)
            .ok_or_else(capacity_exceeded)?;
    }
    if offset > spacing.max {
        return Err(capacity_exceeded());
    }

    let mut holders: HashMap<i64, i64> = siblings.iter().map(|&(id, key)| (key, id)).collect();
    let mut writes = Vec::with_capacity(siblings.len());
    let mut deferred = Vec::new();

    for (&(id, current), &target) in siblings.iter().zip(&targets) {
        if current == target {
            continue;
        }
        match holders.get(&target) {
            Some(&holder) if holder != id => deferred.push((id, current, target)),
            _ => {
                holders.remove(&current);
                holders.insert(target, id);
                writes.push((id, target));
            }
        }
    }

    for &(id, current, target) in deferred.iter().rev() {
        if holders.get(&target).is_some_and(|&holder| holder != id) {
            return Err(OrderedTreeError::invariant(format!(
                "renumber of node {id} still collides at key {target}"
            )));
        }
        holders.remove(&current);
        holders.insert(target, id);
        writes.push((id, target));
    }

    Ok(RenumberPlan {
        writes,
        reserved,
        next: offset,
    })
}

/// Renumber the live siblings of `scope`, locking them for the rest of the transaction.
///
/// Returns the key the triggering write should use: the reserved slot in front
/// of `reserve_before`, or one increment past the last sibling.
pub(crate) async fn renumber<M, C>(
    conn: &C,
    scope: Scope,
    reserve_before: Option<i64>,
) -> Result<i64, OrderedTreeError>
where
    M: OrderedTreeModel,
    C: ConnectionTrait,
{
    let siblings = M::Entity::find()
        .filter(query::in_scope::<M>(scope))
        .order_by_asc(M::sort_key_column())
        .lock_exclusive()
        .all(conn)
        .await?
        .iter()
        .map(|node| (node.id(), node.sort_key()))
        .collect::<Vec<_>>();

    let plan = match plan(M::ordered_tree_config().spacing(), &siblings, reserve_before) {
        Ok(plan) => plan,
        Err(err) => {
            tracing::warn!(
                tree_id = scope.tree_id,
                parent_id = scope.parent_id,
                siblings = siblings.len(),
                error = %err,
                "renumber failed"
            );
            return Err(err);
        }
    };

    for &(id, key) in &plan.writes {
        M::Entity::update_many()
            .col_expr(M::sort_key_column(), Expr::value(key))
            .filter(M::id_column().eq(id))
            .exec(conn)
            .await?;
    }

    tracing::debug!(
        tree_id = scope.tree_id,
        parent_id = scope.parent_id,
        siblings = siblings.len(),
        rewritten = plan.writes.len(),
        "scope renumbered"
    );
    Ok(plan.handoff())
}
