use sea_orm::{
    prelude::DateTimeUtc, ActiveModelBehavior, ActiveModelTrait, EntityTrait, FromQueryResult,
    IntoActiveModel,
};

use crate::config::OrderedTreeConfig;

/// Parent id carried by root-level nodes.
pub const ROOT_PARENT: i64 = 0;

/// Trait implemented by SeaORM `Model` types stored as an ordered tree.
///
/// Implementations are normally provided by the `#[derive(OrderedTreeModel)]` macro.
/// The repository owns the structural columns (`tree_id`, `parent_id`, `name`,
/// `sort_key`, `deleted` and the timestamps); every other column is descriptive
/// metadata supplied by the caller.
pub trait OrderedTreeModel:
    Clone + Send + Sync + 'static + IntoActiveModel<Self::ActiveModel> + FromQueryResult
{
    type Entity: EntityTrait<Model = Self>;
    type ActiveModel: ActiveModelTrait<Entity = Self::Entity> + ActiveModelBehavior + Send;

    fn ordered_tree_config() -> &'static OrderedTreeConfig;

    fn id(&self) -> i64;
    fn tree_id(&self) -> i64;
    fn parent_id(&self) -> i64;
    fn name(&self) -> &str;
    fn sort_key(&self) -> i64;

    fn set_tree(active: &mut Self::ActiveModel, tree_id: i64);
    fn set_parent(active: &mut Self::ActiveModel, parent_id: i64);
    fn set_name(active: &mut Self::ActiveModel, name: &str);
    fn set_sort_key(active: &mut Self::ActiveModel, sort_key: i64);
    fn set_live(active: &mut Self::ActiveModel);
    fn set_created_at(active: &mut Self::ActiveModel, at: DateTimeUtc);
    fn set_updated_at(active: &mut Self::ActiveModel, at: DateTimeUtc);

    fn id_column() -> <Self::Entity as EntityTrait>::Column;
    fn tree_column() -> <Self::Entity as EntityTrait>::Column;
    fn parent_column() -> <Self::Entity as EntityTrait>::Column;
    fn name_column() -> <Self::Entity as EntityTrait>::Column;
    fn sort_key_column() -> <Self::Entity as EntityTrait>::Column;
    fn deleted_column() -> <Self::Entity as EntityTrait>::Column;
    fn updated_at_column() -> <Self::Entity as EntityTrait>::Column;

    fn is_root(&self) -> bool {
        self.parent_id() == ROOT_PARENT
    }
}
