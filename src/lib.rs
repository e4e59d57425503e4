//! SeaORM-centric ordered trees.
//!
//! Nodes live in an adjacency list (`tree_id`, `parent_id`) and keep their
//! sibling order in a sparse integer `sort_key`. Inserts and moves pick a key
//! by appending past the largest sibling or bisecting two neighbours; a scope is
//! only renumbered when its keys run out. Every mutation runs in one
//! transaction, is checked for cycles and depth first, and is retried when a
//! concurrent writer claims the same key. Reads expand the tree one level per
//! query and work on PostgreSQL and SQLite alike.

pub mod allocator;
pub mod config;
pub mod error;
pub mod guard;
pub mod lock;
pub mod query;
pub mod renumber;
pub mod repository;
pub mod retry;
pub mod traits;
pub mod traversal;

pub mod prelude {
    //! Convenient re-exports for consumers.
    pub use crate::config::{
        NameUniqueness, OrderedTreeConfig, OrderedTreeOptions, RetryPolicy, ScopeLockStrategy,
        SortKeySpacing, UNBOUNDED_LAYERS,
    };
    pub use crate::query::{NameScope, Scope};
    pub use crate::repository::{NewNode, OrderedTreeRepository};
    pub use crate::traits::{OrderedTreeModel, ROOT_PARENT};
}

#[doc(hidden)]
pub mod __private {
    pub use once_cell;
}

pub use config::{
    NameUniqueness, OrderedTreeConfig, OrderedTreeOptions, RetryPolicy, ScopeLockKey,
    ScopeLockStrategy, SortKeySpacing, UNBOUNDED_LAYERS,
};
pub use error::OrderedTreeError;
pub use ordered_tree_macros::OrderedTreeModel as OrderedTreeModelDerive;
#[doc(hidden)]
pub use ordered_tree_macros::OrderedTreeModel;
pub use query::{NameScope, Scope};
pub use repository::{NewNode, OrderedTreeRepository};
pub use traits::{OrderedTreeModel, ROOT_PARENT};
pub use traversal::{ChildNode, SearchNode};
