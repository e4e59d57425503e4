//! Structural checks run before any row of a move or insert is written.
//!
//! Depth counts real nodes, roots being layer 1. Stored trees hang off a
//! synthetic root (`parent_id = 0`), so a limit of `max_layer` real layers is the
//! same as `max_layer + 1` layers counted from that synthetic root.

use std::collections::HashSet;

use sea_orm::{ConnectionTrait, EntityTrait, QueryFilter, QuerySelect};

use crate::config::UNBOUNDED_LAYERS;
use crate::error::OrderedTreeError;
use crate::query;
use crate::traits::{OrderedTreeModel, ROOT_PARENT};

/// Verify that placing `node_id` (or a new node when `None`) under
/// `dest_parent_id` keeps the tree acyclic and within `max_layer`.
pub(crate) async fn check_placement<M, C>(
    conn: &C,
    tree_id: i64,
    node_id: Option<i64>,
    dest_parent_id: i64,
    max_layer: u32,
) -> Result<(), OrderedTreeError>
where
    M: OrderedTreeModel,
    C: ConnectionTrait,
{
    let parent_depth = walk_to_root::<M, C>(conn, tree_id, node_id, dest_parent_id).await?;
    let node_depth = parent_depth + 1;
    if exceeds(node_depth, max_layer) {
        return Err(OrderedTreeError::DepthExceeded {
            max_layer,
            depth: node_depth,
        });
    }

    if let Some(node_id) = node_id {
        if max_layer != UNBOUNDED_LAYERS {
            let deepest = deepest_descendant::<M, C>(conn, tree_id, node_id, node_depth, max_layer)
                .await?;
            if exceeds(deepest, max_layer) {
                return Err(OrderedTreeError::DepthExceeded {
                    max_layer,
                    depth: deepest,
                });
            }
        }
    }

    Ok(())
}

fn exceeds(depth: u64, max_layer: u32) -> bool {
    max_layer != UNBOUNDED_LAYERS && depth > u64::from(max_layer)
}

/// Walk parent pointers from `start` to the root, returning how many real
/// nodes the chain holds. Meeting `moving` on the way is a cycle.
async fn walk_to_root<M, C>(
    conn: &C,
    tree_id: i64,
    moving: Option<i64>,
    start: i64,
) -> Result<u64, OrderedTreeError>
where
    M: OrderedTreeModel,
    C: ConnectionTrait,
{
    let mut depth = 0u64;
    let mut seen = HashSet::new();
    let mut current = start;

    while current != ROOT_PARENT {
        if let Some(node_id) = moving {
            if current == node_id {
                return Err(OrderedTreeError::Cycle {
                    node_id,
                    dest_parent_id: start,
                });
            }
        }
        if !seen.insert(current) {
            return Err(OrderedTreeError::invariant(format!(
                "stored parent chain of node {start} loops at {current}"
            )));
        }

        // Shared row locks keep a concurrent move from re-parenting the chain
        // until this transaction ends.
        let node = M::Entity::find()
            .filter(query::by_id::<M>(tree_id, current))
            .lock_shared()
            .one(conn)
            .await?
            .ok_or_else(|| OrderedTreeError::not_found(current))?;
        depth += 1;
        current = node.parent_id();
    }

    Ok(depth)
}

/// Depth of the deepest live descendant of `node_id` once it sits at `node_depth`.
///
/// Expands one level per query and stops as soon as the limit is passed.
async fn deepest_descendant<M, C>(
    conn: &C,
    tree_id: i64,
    node_id: i64,
    node_depth: u64,
    max_layer: u32,
) -> Result<u64, OrderedTreeError>
where
    M: OrderedTreeModel,
    C: ConnectionTrait,
{
    let mut depth = node_depth;
    let mut frontier = vec![node_id];

    while !frontier.is_empty() && !exceeds(depth, max_layer) {
        let children: Vec<i64> = M::Entity::find()
            .select_only()
            .column(M::id_column())
            .filter(query::children_of::<M>(tree_id, &frontier))
            .into_tuple()
            .all(conn)
            .await?;
        if children.is_empty() {
            break;
        }
        depth += 1;
        frontier = children;
    }

    Ok(depth)
}
