//! Read-side tree walks.
//!
//! Everything here runs outside mutation transactions and expands the tree
//! one level per query (`parent_id IN (...)`), never by recursion.

use std::collections::{HashMap, HashSet};

use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};
use serde::Serialize;

use crate::error::OrderedTreeError;
use crate::query::{self, Scope};
use crate::traits::{OrderedTreeModel, ROOT_PARENT};

/// A listed child and whether it has children of its own.
#[derive(Clone, Debug, Serialize)]
pub struct ChildNode<M> {
    #[serde(flatten)]
    pub node: M,
    pub expansion: bool,
}

/// A node of a keyword search forest.
#[derive(Clone, Debug, Serialize)]
pub struct SearchNode<M> {
    #[serde(flatten)]
    pub node: M,
    /// The node's name matched the keyword.
    pub hit: bool,
    /// Children are included below and the UI should show them open.
    pub expanded: bool,
    /// A hit with stored children that were not loaded.
    pub needs_lazy_load: bool,
    pub children: Vec<SearchNode<M>>,
}

/// Number of live children per parent, for the given parents only.
pub(crate) async fn child_counts<M, C>(
    conn: &C,
    tree_id: i64,
    parent_ids: &[i64],
) -> Result<HashMap<i64, i64>, OrderedTreeError>
where
    M: OrderedTreeModel,
    C: ConnectionTrait,
{
    if parent_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows: Vec<(i64, i64)> = M::Entity::find()
        .select_only()
        .column(M::parent_column())
        .column_as(M::id_column().count(), "child_count")
        .filter(query::children_of::<M>(tree_id, parent_ids))
        .group_by(M::parent_column())
        .into_tuple()
        .all(conn)
        .await?;

    Ok(rows.into_iter().collect())
}

pub(crate) async fn list_children<M, C>(
    conn: &C,
    scope: Scope,
    keyword: Option<&str>,
) -> Result<Vec<ChildNode<M>>, OrderedTreeError>
where
    M: OrderedTreeModel,
    C: ConnectionTrait,
{
    let mut condition = query::in_scope::<M>(scope);
    if let Some(keyword) = keyword.filter(|keyword| !keyword.is_empty()) {
        condition = condition.add(query::name_contains::<M>(keyword));
    }

    let children = M::Entity::find()
        .filter(condition)
        .order_by_asc(M::sort_key_column())
        .all(conn)
        .await?;

    let ids: Vec<i64> = children.iter().map(|node| node.id()).collect();
    let counts = child_counts::<M, C>(conn, scope.tree_id, &ids).await?;

    Ok(children
        .into_iter()
        .map(|node| {
            let expansion = counts.get(&node.id()).is_some_and(|&count| count > 0);
            ChildNode { node, expansion }
        })
        .collect())
}

/// Every live descendant of `parent_id`, level by level, siblings in key order.
pub(crate) async fn list_subtree<M, C>(
    conn: &C,
    tree_id: i64,
    parent_id: i64,
) -> Result<Vec<M>, OrderedTreeError>
where
    M: OrderedTreeModel,
    C: ConnectionTrait,
{
    let mut nodes = Vec::new();
    let mut frontier = vec![parent_id];

    while !frontier.is_empty() {
        let level = M::Entity::find()
            .filter(query::children_of::<M>(tree_id, &frontier))
            .order_by_asc(M::parent_column())
            .order_by_asc(M::sort_key_column())
            .all(conn)
            .await?;

        frontier = level.iter().map(|node| node.id()).collect();
        nodes.extend(level);
    }

    Ok(nodes)
}

/// Ids of `node_id` and all of its live descendants.
pub(crate) async fn subtree_ids<M, C>(
    conn: &C,
    tree_id: i64,
    node_id: i64,
) -> Result<Vec<i64>, OrderedTreeError>
where
    M: OrderedTreeModel,
    C: ConnectionTrait,
{
    let mut ids = vec![node_id];
    let mut frontier = vec![node_id];

    while !frontier.is_empty() {
        frontier = M::Entity::find()
            .select_only()
            .column(M::id_column())
            .filter(query::children_of::<M>(tree_id, &frontier))
            .into_tuple()
            .all(conn)
            .await?;
        ids.extend_from_slice(&frontier);
    }

    Ok(ids)
}

/// Nodes whose name contains `keyword`, plus every ancestor needed to reach them
/// from a root, assembled into a forest ordered by sort key.
pub(crate) async fn search_with_ancestors<M, C>(
    conn: &C,
    tree_id: i64,
    keyword: &str,
) -> Result<Vec<SearchNode<M>>, OrderedTreeError>
where
    M: OrderedTreeModel,
    C: ConnectionTrait,
{
    if keyword.is_empty() {
        return Ok(Vec::new());
    }

    let hits = M::Entity::find()
        .filter(query::in_tree::<M>(tree_id).add(query::name_contains::<M>(keyword)))
        .all(conn)
        .await?;
    let hit_ids: HashSet<i64> = hits.iter().map(|node| node.id()).collect();

    let mut loaded: HashMap<i64, M> = hits.into_iter().map(|node| (node.id(), node)).collect();
    let mut frontier: Vec<M> = loaded.values().cloned().collect();

    loop {
        let missing: Vec<i64> = frontier
            .iter()
            .map(|node| node.parent_id())
            .filter(|parent| *parent != ROOT_PARENT && !loaded.contains_key(parent))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        if missing.is_empty() {
            break;
        }

        frontier = M::Entity::find()
            .filter(query::ids_in::<M>(tree_id, &missing))
            .all(conn)
            .await?;
        if frontier.len() < missing.len() {
            tracing::warn!(
                tree_id,
                missing = missing.len() - frontier.len(),
                "search back-fill found dangling parent ids"
            );
        }
        for node in &frontier {
            loaded.insert(node.id(), node.clone());
        }
    }

    let mut hit_list: Vec<i64> = hit_ids.iter().copied().collect();
    hit_list.sort_unstable();
    let counts = child_counts::<M, C>(conn, tree_id, &hit_list).await?;

    Ok(assemble(loaded, &hit_ids, &counts))
}

/// Build the nested forest bottom-up so no recursion is needed.
fn assemble<M: OrderedTreeModel>(
    mut loaded: HashMap<i64, M>,
    hit_ids: &HashSet<i64>,
    stored_child_counts: &HashMap<i64, i64>,
) -> Vec<SearchNode<M>> {
    let mut child_ids: HashMap<i64, Vec<i64>> = HashMap::new();
    let mut root_ids = Vec::new();
    for node in loaded.values() {
        if node.is_root() || !loaded.contains_key(&node.parent_id()) {
            root_ids.push(node.id());
        } else {
            child_ids.entry(node.parent_id()).or_default().push(node.id());
        }
    }

    // Breadth-first from the roots gives a parents-before-children order.
    let mut order = root_ids.clone();
    let mut cursor = 0;
    while cursor < order.len() {
        let id = order[cursor];
        if let Some(children) = child_ids.get(&id) {
            order.extend_from_slice(children);
        }
        cursor += 1;
    }

    let mut built: HashMap<i64, SearchNode<M>> = HashMap::new();
    for id in order.into_iter().rev() {
        let Some(node) = loaded.remove(&id) else {
            continue;
        };
        let mut children: Vec<SearchNode<M>> = child_ids
            .get(&id)
            .map(|ids| ids.iter().filter_map(|child| built.remove(child)).collect())
            .unwrap_or_default();
        children.sort_by_key(|child| child.node.sort_key());

        let hit = hit_ids.contains(&id);
        let expanded = !children.is_empty();
        // Some stored children of a hit may be missing from the result.
        let needs_lazy_load = hit
            && stored_child_counts
                .get(&id)
                .is_some_and(|&count| count > children.len() as i64);

        built.insert(
            id,
            SearchNode {
                node,
                hit,
                expanded,
                needs_lazy_load,
                children,
            },
        );
    }

    let mut forest: Vec<SearchNode<M>> = root_ids
        .iter()
        .filter_map(|id| built.remove(id))
        .collect();
    forest.sort_by_key(|root| root.node.sort_key());
    forest
}
