#![allow(dead_code)]

use std::error::Error;

use ordered_tree::{NewNode, OrderedTreeRepository};
use sea_orm::{ActiveValue, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr};
use tempfile::TempDir;

pub mod entity {
    pub mod subject {
        use ordered_tree::OrderedTreeModelDerive as OrderedTreeModel;
        use sea_orm::entity::prelude::*;
        use serde::Serialize;

        #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, OrderedTreeModel, Serialize)]
        #[sea_orm(table_name = "subjects")]
        pub struct Model {
            #[sea_orm(primary_key)]
            pub id: i64,
            pub tree_id: i64,
            pub parent_id: i64,
            pub name: String,
            pub sort_key: i64,
            pub description: Option<String>,
            pub deleted: i64,
            pub created_at: DateTimeUtc,
            pub updated_at: DateTimeUtc,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }

    pub mod category {
        use ordered_tree::OrderedTreeModelDerive as OrderedTreeModel;
        use sea_orm::entity::prelude::*;

        #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, OrderedTreeModel)]
        #[sea_orm(table_name = "categories")]
        #[ordered_tree(name_unique = "tree", sort_key_field = "position")]
        pub struct Model {
            #[sea_orm(primary_key)]
            pub id: i64,
            pub tree_id: i64,
            pub parent_id: i64,
            pub name: String,
            pub position: i64,
            pub deleted: i64,
            pub created_at: DateTimeUtc,
            pub updated_at: DateTimeUtc,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }

    pub mod shelf {
        use ordered_tree::OrderedTreeModelDerive as OrderedTreeModel;
        use sea_orm::entity::prelude::*;

        #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, OrderedTreeModel)]
        #[sea_orm(table_name = "shelves")]
        #[ordered_tree(sort_key_max = 2048)]
        pub struct Model {
            #[sea_orm(primary_key)]
            pub id: i64,
            pub tree_id: i64,
            pub parent_id: i64,
            pub name: String,
            pub sort_key: i64,
            pub deleted: i64,
            pub created_at: DateTimeUtc,
            pub updated_at: DateTimeUtc,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }
}

pub use entity::subject;

pub const TREE: i64 = 1;
pub const OTHER_TREE: i64 = 2;

fn init_tracing() {
    if std::env::var("ORDERED_TREE_TEST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

pub async fn setup_database() -> Result<DatabaseConnection, DbErr> {
    init_tracing();
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).min_connections(1).sqlx_logging(false);
    let db = Database::connect(options).await?;
    create_tables(&db).await?;
    Ok(db)
}

/// A file-backed database behind a pool of several connections, so
/// transactions from different tasks really overlap.
///
/// Keep the returned directory alive for as long as the connection is used.
pub async fn setup_shared_database() -> Result<(TempDir, DatabaseConnection), Box<dyn Error>> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("tree.db").display());

    let mut options = ConnectOptions::new(url);
    options.max_connections(4).sqlx_logging(false);
    let db = Database::connect(options).await?;
    create_tables(&db).await?;
    Ok((dir, db))
}

async fn create_tables(db: &DatabaseConnection) -> Result<(), DbErr> {
    for statement in [
        r#"
        CREATE TABLE subjects (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tree_id INTEGER NOT NULL,
            parent_id INTEGER NOT NULL DEFAULT 0,
            name TEXT NOT NULL,
            sort_key INTEGER NOT NULL,
            description TEXT,
            deleted INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        "CREATE UNIQUE INDEX uk_subjects_scope_sort ON subjects (tree_id, parent_id, sort_key, deleted)",
        "CREATE UNIQUE INDEX uk_subjects_scope_name ON subjects (tree_id, parent_id, name, deleted)",
        r#"
        CREATE TABLE categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tree_id INTEGER NOT NULL,
            parent_id INTEGER NOT NULL DEFAULT 0,
            name TEXT NOT NULL,
            position INTEGER NOT NULL,
            deleted INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        "CREATE UNIQUE INDEX uk_categories_scope_sort ON categories (tree_id, parent_id, position, deleted)",
        r#"
        CREATE TABLE shelves (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tree_id INTEGER NOT NULL,
            parent_id INTEGER NOT NULL DEFAULT 0,
            name TEXT NOT NULL,
            sort_key INTEGER NOT NULL,
            deleted INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        "CREATE UNIQUE INDEX uk_shelves_scope_sort ON shelves (tree_id, parent_id, sort_key, deleted)",
    ] {
        db.execute_unprepared(statement).await?;
    }
    Ok(())
}

pub fn subjects() -> OrderedTreeRepository<subject::Model> {
    OrderedTreeRepository::new()
}

pub fn attrs(description: &str) -> subject::ActiveModel {
    subject::ActiveModel {
        description: ActiveValue::Set(Some(description.to_owned())),
        ..Default::default()
    }
}

/// Append `name` under `parent_id` in the default tree.
pub async fn add(
    db: &DatabaseConnection,
    parent_id: i64,
    name: &str,
) -> Result<i64, ordered_tree::OrderedTreeError> {
    subjects()
        .insert(
            db,
            NewNode::new(TREE, parent_id, name, subject::ActiveModel::default()),
            ordered_tree::UNBOUNDED_LAYERS,
        )
        .await
}

/// Directly store a row with a chosen key, bypassing the allocator.
pub async fn raw_subject(
    db: &DatabaseConnection,
    parent_id: i64,
    name: &str,
    sort_key: i64,
) -> Result<i64, DbErr> {
    use sea_orm::ActiveModelTrait;

    let now = chrono::Utc::now();
    let model = subject::ActiveModel {
        tree_id: ActiveValue::Set(TREE),
        parent_id: ActiveValue::Set(parent_id),
        name: ActiveValue::Set(name.to_owned()),
        sort_key: ActiveValue::Set(sort_key),
        deleted: ActiveValue::Set(0),
        created_at: ActiveValue::Set(now),
        updated_at: ActiveValue::Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(model.id)
}

/// `(name, sort_key)` of the live children of `parent_id`, in sibling order.
pub async fn child_keys(db: &DatabaseConnection, parent_id: i64) -> Vec<(String, i64)> {
    subjects()
        .list_children(db, parent_id, TREE, None)
        .await
        .expect("list children")
        .into_iter()
        .map(|child| (child.node.name, child.node.sort_key))
        .collect()
}

pub async fn child_names(db: &DatabaseConnection, parent_id: i64) -> Vec<String> {
    child_keys(db, parent_id)
        .await
        .into_iter()
        .map(|(name, _)| name)
        .collect()
}
