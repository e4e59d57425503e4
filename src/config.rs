use std::time::Duration;

use crc32fast::Hasher;

/// Depth limit that disables depth enforcement.
pub const UNBOUNDED_LAYERS: u32 = u32::MAX;

/// Static configuration describing how a SeaORM model is stored as an ordered tree.
#[derive(Clone, Debug)]
pub struct OrderedTreeConfig {
    entity_name: String,
    table_name: String,
    parent_column: String,
    name_column: String,
    sort_key_column: String,
    sort_key_index: String,
    name_index: String,
    name_uniqueness: NameUniqueness,
    spacing: SortKeySpacing,
    retry_policy: RetryPolicy,
    scope_lock_strategy: ScopeLockStrategy,
}

impl OrderedTreeConfig {
    /// Create a new configuration for the given entity and backing table.
    pub fn new(entity_name: impl Into<String>, table_name: impl Into<String>) -> Self {
        let entity_name = entity_name.into();
        let table_name = table_name.into();

        Self {
            sort_key_index: format!("uk_{table_name}_scope_sort"),
            name_index: format!("uk_{table_name}_scope_name"),
            entity_name,
            table_name,
            parent_column: "parent_id".to_string(),
            name_column: "name".to_string(),
            sort_key_column: "sort_key".to_string(),
            name_uniqueness: NameUniqueness::default(),
            spacing: SortKeySpacing::default(),
            retry_policy: RetryPolicy::default(),
            scope_lock_strategy: ScopeLockStrategy::default(),
        }
    }

    /// Merge options produced by [`OrderedTreeOptions`].
    pub(crate) fn apply_options(mut self, options: OrderedTreeOptions) -> Self {
        if let Some(parent_column) = options.parent_column {
            self.parent_column = parent_column;
        }
        if let Some(name_column) = options.name_column {
            self.name_column = name_column;
        }
        if let Some(sort_key_column) = options.sort_key_column {
            self.sort_key_column = sort_key_column;
        }
        if let Some(index) = options.sort_key_index {
            self.sort_key_index = index;
        }
        if let Some(index) = options.name_index {
            self.name_index = index;
        }
        if let Some(uniqueness) = options.name_uniqueness {
            self.name_uniqueness = uniqueness;
        }
        if let Some(spacing) = options.spacing {
            self.spacing = spacing;
        }
        if let Some(policy) = options.retry_policy {
            self.retry_policy = policy;
        }
        if let Some(strategy) = options.scope_lock_strategy {
            self.scope_lock_strategy = strategy;
        }
        self
    }

    /// Rust struct name of the node entity.
    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    /// Table backing the node entity.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Column name storing the parent id.
    pub fn parent_column(&self) -> &str {
        &self.parent_column
    }

    /// Column name storing the display name.
    pub fn name_column(&self) -> &str {
        &self.name_column
    }

    /// Column name storing the sibling sort key.
    pub fn sort_key_column(&self) -> &str {
        &self.sort_key_column
    }

    /// Unique index over `(tree_id, parent_id, sort_key, deleted)`.
    pub fn sort_key_index(&self) -> &str {
        &self.sort_key_index
    }

    /// Unique index over `(tree_id, parent_id, name, deleted)`.
    pub fn name_index(&self) -> &str {
        &self.name_index
    }

    pub fn name_uniqueness(&self) -> NameUniqueness {
        self.name_uniqueness
    }

    pub fn spacing(&self) -> &SortKeySpacing {
        &self.spacing
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn scope_lock_strategy(&self) -> ScopeLockStrategy {
        self.scope_lock_strategy
    }

    /// Returns true when a unique-violation message names the sort-key index.
    pub(crate) fn names_sort_key_index(&self, message: &str) -> bool {
        message.contains(&self.sort_key_index)
            || message.contains(&format!("{}.{}", self.table_name, self.sort_key_column))
    }

    /// Returns true when a unique-violation message names the sibling name index.
    pub(crate) fn names_name_index(&self, message: &str) -> bool {
        message.contains(&self.name_index)
            || message.contains(&format!("{}.{}", self.table_name, self.name_column))
    }
}

/// Builder-style options consumed by the derive macro.
#[derive(Clone, Debug, Default)]
pub struct OrderedTreeOptions {
    parent_column: Option<String>,
    name_column: Option<String>,
    sort_key_column: Option<String>,
    sort_key_index: Option<String>,
    name_index: Option<String>,
    name_uniqueness: Option<NameUniqueness>,
    spacing: Option<SortKeySpacing>,
    retry_policy: Option<RetryPolicy>,
    scope_lock_strategy: Option<ScopeLockStrategy>,
}

impl OrderedTreeOptions {
    pub fn parent_column(mut self, value: impl Into<String>) -> Self {
        self.parent_column = Some(value.into());
        self
    }

    pub fn name_column(mut self, value: impl Into<String>) -> Self {
        self.name_column = Some(value.into());
        self
    }

    pub fn sort_key_column(mut self, value: impl Into<String>) -> Self {
        self.sort_key_column = Some(value.into());
        self
    }

    pub fn sort_key_index(mut self, value: impl Into<String>) -> Self {
        self.sort_key_index = Some(value.into());
        self
    }

    pub fn name_index(mut self, value: impl Into<String>) -> Self {
        self.name_index = Some(value.into());
        self
    }

    pub fn name_uniqueness(mut self, uniqueness: NameUniqueness) -> Self {
        self.name_uniqueness = Some(uniqueness);
        self
    }

    pub fn spacing(mut self, spacing: SortKeySpacing) -> Self {
        self.spacing = Some(spacing);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn scope_lock_strategy(mut self, strategy: ScopeLockStrategy) -> Self {
        self.scope_lock_strategy = Some(strategy);
        self
    }

    pub fn apply(self, base: OrderedTreeConfig) -> OrderedTreeConfig {
        base.apply_options(self)
    }
}

/// Where a node name has to be unique.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum NameUniqueness {
    /// Unique among the live children of one parent.
    #[default]
    Siblings,
    /// Unique among all live nodes of one tree.
    Tree,
}

/// Numeric layout of sibling sort keys.
///
/// The defaults leave nine successive midpoint splits between two freshly
/// spaced keys before a scope has to be renumbered.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SortKeySpacing {
    /// Virtual key preceding the first sibling.
    pub begin: i64,
    /// Key of the first sibling in an empty or renumbered scope.
    pub start: i64,
    /// Gap between consecutive keys on append and after renumbering.
    pub increment: i64,
    /// Largest key a tail append may build on.
    pub max: i64,
}

impl Default for SortKeySpacing {
    fn default() -> Self {
        Self {
            begin: 0,
            start: 1 << 9,
            increment: 1 << 9,
            max: 1 << 62,
        }
    }
}

/// Bounded retry applied to transient sort-key conflicts.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_jitter: Duration,
}

impl RetryPolicy {
    /// Backoff to wait after the given (1-based) failed attempt, before jitter.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.base_backoff.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(50),
            max_jitter: Duration::from_millis(250),
        }
    }
}

/// How concurrent structural writers to the same scope are serialised.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum ScopeLockStrategy {
    /// The sort-key unique index picks the winner; losers retry.
    #[default]
    Optimistic,
    /// Take a transaction-scoped PostgreSQL advisory lock per scope.
    Advisory,
}

/// Key used for per-scope PostgreSQL advisory locks.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ScopeLockKey(String);

impl ScopeLockKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub(crate) fn derived_from(entity: &str, table: &str, tree_id: i64, parent_id: i64) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(entity.as_bytes());
        hasher.update(b"/");
        hasher.update(table.as_bytes());
        let crc = hasher.finalize();
        Self(format!("ordered-tree::{entity}::{crc:x}::{tree_id}:{parent_id}"))
    }
}
