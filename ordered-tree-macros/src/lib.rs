use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::ext::IdentExt;
use syn::{parse_macro_input, spanned::Spanned, Attribute, Data, DeriveInput, Fields, Ident};

#[proc_macro_derive(OrderedTreeModel, attributes(ordered_tree))]
pub fn derive_ordered_tree_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match impl_ordered_tree_model(&input) {
        Ok(tokens) => tokens,
        Err(err) => err.to_compile_error().into(),
    }
}

#[derive(Default)]
struct Options {
    id_field: Option<String>,
    tree_field: Option<String>,
    parent_field: Option<String>,
    name_field: Option<String>,
    sort_key_field: Option<String>,
    deleted_field: Option<String>,
    created_at_field: Option<String>,
    updated_at_field: Option<String>,
    entity_name: Option<String>,
    sort_key_index: Option<String>,
    name_index: Option<String>,
    name_unique: Option<NameUnique>,
    scope_lock: Option<ScopeLock>,
    sort_key_max: Option<syn::LitInt>,
}

enum NameUnique {
    Siblings,
    Tree,
}

enum ScopeLock {
    Optimistic,
    Advisory,
}

/// Column names resolved from the options, with their struct idents and `Column` variants.
struct StructuralField {
    ident: Ident,
    column: Ident,
}

impl StructuralField {
    fn new(name: &str, span: proc_macro2::Span) -> Self {
        Self {
            ident: Ident::new(name, span),
            column: format_ident!("{}", to_pascal_case(name)),
        }
    }
}

fn impl_ordered_tree_model(input: &DeriveInput) -> syn::Result<TokenStream> {
    let struct_ident = &input.ident;
    let span = struct_ident.span();

    let data_struct = match &input.data {
        Data::Struct(data) => data,
        _ => {
            return Err(syn::Error::new(
                input.span(),
                "OrderedTreeModel can only be derived for structs",
            ))
        }
    };

    let mut options = Options::default();
    let mut table_name: Option<String> = None;

    for attr in &input.attrs {
        if attr.path().is_ident("ordered_tree") {
            parse_ordered_tree_attr(attr, &mut options)?;
        }

        if attr.path().is_ident("sea_orm") {
            if let Some(name) = parse_sea_orm_table_name(attr)? {
                table_name = Some(name);
            }
        }
    }

    let field_name = |value: Option<String>, default: &str| value.unwrap_or_else(|| default.to_string());
    let id_name = field_name(options.id_field, "id");
    let tree_name = field_name(options.tree_field, "tree_id");
    let parent_name = field_name(options.parent_field, "parent_id");
    let name_name = field_name(options.name_field, "name");
    let sort_key_name = field_name(options.sort_key_field, "sort_key");
    let deleted_name = field_name(options.deleted_field, "deleted");
    let created_at_name = field_name(options.created_at_field, "created_at");
    let updated_at_name = field_name(options.updated_at_field, "updated_at");

    let Fields::Named(ref fields) = data_struct.fields else {
        return Err(syn::Error::new(
            data_struct.fields.span(),
            "OrderedTreeModel requires named fields",
        ));
    };
    for required in [
        &id_name,
        &tree_name,
        &parent_name,
        &name_name,
        &sort_key_name,
        &deleted_name,
        &created_at_name,
        &updated_at_name,
    ] {
        let present = fields
            .named
            .iter()
            .any(|field| field.ident.as_ref().is_some_and(|ident| ident == required.as_str()));
        if !present {
            return Err(syn::Error::new(
                span,
                format!("OrderedTreeModel requires a `{required}` field"),
            ));
        }
    }

    let id = StructuralField::new(&id_name, span);
    let tree = StructuralField::new(&tree_name, span);
    let parent = StructuralField::new(&parent_name, span);
    let name = StructuralField::new(&name_name, span);
    let sort_key = StructuralField::new(&sort_key_name, span);
    let deleted = StructuralField::new(&deleted_name, span);
    let created_at = StructuralField::new(&created_at_name, span);
    let updated_at = StructuralField::new(&updated_at_name, span);

    let entity_name = options
        .entity_name
        .unwrap_or_else(|| struct_ident.unraw().to_string());
    let table_name = table_name.unwrap_or_else(|| struct_ident.unraw().to_string());

    let entity_name_literal = syn::LitStr::new(&entity_name, span);
    let table_name_literal = syn::LitStr::new(&table_name, span);
    let parent_column_literal = syn::LitStr::new(&parent_name, span);
    let name_column_literal = syn::LitStr::new(&name_name, span);
    let sort_key_column_literal = syn::LitStr::new(&sort_key_name, span);

    let sort_key_index = options.sort_key_index.map(|index| {
        let literal = syn::LitStr::new(&index, span);
        quote! { .sort_key_index(#literal) }
    });
    let name_index = options.name_index.map(|index| {
        let literal = syn::LitStr::new(&index, span);
        quote! { .name_index(#literal) }
    });
    let name_uniqueness = options.name_unique.map(|unique| match unique {
        NameUnique::Siblings => {
            quote! { .name_uniqueness(::ordered_tree::NameUniqueness::Siblings) }
        }
        NameUnique::Tree => quote! { .name_uniqueness(::ordered_tree::NameUniqueness::Tree) },
    });
    let scope_lock = options.scope_lock.map(|lock| match lock {
        ScopeLock::Optimistic => {
            quote! { .scope_lock_strategy(::ordered_tree::ScopeLockStrategy::Optimistic) }
        }
        ScopeLock::Advisory => {
            quote! { .scope_lock_strategy(::ordered_tree::ScopeLockStrategy::Advisory) }
        }
    });

    let spacing = options.sort_key_max.map(|max| {
        quote! {
            .spacing(::ordered_tree::SortKeySpacing {
                max: #max,
                ..::core::default::Default::default()
            })
        }
    });

    let id_ident = &id.ident;
    let tree_ident = &tree.ident;
    let parent_ident = &parent.ident;
    let name_ident = &name.ident;
    let sort_key_ident = &sort_key.ident;
    let deleted_ident = &deleted.ident;
    let created_at_ident = &created_at.ident;
    let updated_at_ident = &updated_at.ident;

    let id_column = &id.column;
    let tree_column = &tree.column;
    let parent_column = &parent.column;
    let name_column = &name.column;
    let sort_key_column = &sort_key.column;
    let deleted_column = &deleted.column;
    let updated_at_column = &updated_at.column;

    let generated = quote! {
        impl ::ordered_tree::OrderedTreeModel for #struct_ident {
            type Entity = Entity;
            type ActiveModel = ActiveModel;

            fn ordered_tree_config() -> &'static ::ordered_tree::OrderedTreeConfig {
                static CONFIG: ::ordered_tree::__private::once_cell::sync::Lazy<
                    ::ordered_tree::OrderedTreeConfig,
                > = ::ordered_tree::__private::once_cell::sync::Lazy::new(|| {
                    let base = ::ordered_tree::OrderedTreeConfig::new(
                        #entity_name_literal,
                        #table_name_literal,
                    );
                    ::ordered_tree::OrderedTreeOptions::default()
                        .parent_column(#parent_column_literal)
                        .name_column(#name_column_literal)
                        .sort_key_column(#sort_key_column_literal)
                        #sort_key_index
                        #name_index
                        #name_uniqueness
                        #scope_lock
                        #spacing
                        .apply(base)
                });
                &CONFIG
            }

            fn id(&self) -> i64 {
                self.#id_ident
            }

            fn tree_id(&self) -> i64 {
                self.#tree_ident
            }

            fn parent_id(&self) -> i64 {
                self.#parent_ident
            }

            fn name(&self) -> &str {
                self.#name_ident.as_str()
            }

            fn sort_key(&self) -> i64 {
                self.#sort_key_ident
            }

            fn set_tree(active: &mut Self::ActiveModel, tree_id: i64) {
                active.#tree_ident = ::sea_orm::ActiveValue::Set(tree_id);
            }

            fn set_parent(active: &mut Self::ActiveModel, parent_id: i64) {
                active.#parent_ident = ::sea_orm::ActiveValue::Set(parent_id);
            }

            fn set_name(active: &mut Self::ActiveModel, name: &str) {
                active.#name_ident = ::sea_orm::ActiveValue::Set(name.to_owned());
            }

            fn set_sort_key(active: &mut Self::ActiveModel, sort_key: i64) {
                active.#sort_key_ident = ::sea_orm::ActiveValue::Set(sort_key);
            }

            fn set_live(active: &mut Self::ActiveModel) {
                active.#deleted_ident = ::sea_orm::ActiveValue::Set(0);
            }

            fn set_created_at(
                active: &mut Self::ActiveModel,
                at: ::sea_orm::prelude::DateTimeUtc,
            ) {
                active.#created_at_ident = ::sea_orm::ActiveValue::Set(at.into());
            }

            fn set_updated_at(
                active: &mut Self::ActiveModel,
                at: ::sea_orm::prelude::DateTimeUtc,
            ) {
                active.#updated_at_ident = ::sea_orm::ActiveValue::Set(at.into());
            }

            fn id_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#id_column
            }

            fn tree_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#tree_column
            }

            fn parent_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#parent_column
            }

            fn name_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#name_column
            }

            fn sort_key_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#sort_key_column
            }

            fn deleted_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#deleted_column
            }

            fn updated_at_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#updated_at_column
            }
        }
    };

    Ok(generated.into())
}

fn parse_ordered_tree_attr(attr: &Attribute, options: &mut Options) -> syn::Result<()> {
    attr.parse_nested_meta(|meta| {
        let ident = meta
            .path
            .get_ident()
            .ok_or_else(|| syn::Error::new(meta.path.span(), "Invalid option key"))?
            .to_string();

        if ident == "sort_key_max" {
            let value: syn::LitInt = meta.value()?.parse()?;
            value.base10_parse::<i64>()?;
            options.sort_key_max = Some(value);
            return Ok(());
        }
        let value: syn::LitStr = meta.value()?.parse()?;

        match ident.as_str() {
            "id_field" => options.id_field = Some(value.value()),
            "tree_field" => options.tree_field = Some(value.value()),
            "parent_field" => options.parent_field = Some(value.value()),
            "name_field" => options.name_field = Some(value.value()),
            "sort_key_field" => options.sort_key_field = Some(value.value()),
            "deleted_field" => options.deleted_field = Some(value.value()),
            "created_at_field" => options.created_at_field = Some(value.value()),
            "updated_at_field" => options.updated_at_field = Some(value.value()),
            "entity_name" => options.entity_name = Some(value.value()),
            "sort_key_index" => options.sort_key_index = Some(value.value()),
            "name_index" => options.name_index = Some(value.value()),
            "name_unique" => {
                options.name_unique = Some(match value.value().as_str() {
                    "siblings" => NameUnique::Siblings,
                    "tree" => NameUnique::Tree,
                    _ => {
                        return Err(syn::Error::new(
                            value.span(),
                            "`name_unique` must be \"siblings\" or \"tree\"",
                        ))
                    }
                });
            }
            "scope_lock" => {
                options.scope_lock = Some(match value.value().as_str() {
                    "optimistic" => ScopeLock::Optimistic,
                    "advisory" => ScopeLock::Advisory,
                    _ => {
                        return Err(syn::Error::new(
                            value.span(),
                            "`scope_lock` must be \"optimistic\" or \"advisory\"",
                        ))
                    }
                });
            }
            other => {
                return Err(syn::Error::new(
                    meta.path.span(),
                    format!("Unsupported ordered_tree option `{other}`"),
                ));
            }
        }

        Ok(())
    })
}

fn parse_sea_orm_table_name(attr: &Attribute) -> syn::Result<Option<String>> {
    let mut table_name: Option<String> = None;
    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("table_name") {
            let value: syn::LitStr = meta.value()?.parse()?;
            table_name = Some(value.value());
        }
        Ok(())
    })?;
    Ok(table_name)
}

fn to_pascal_case(value: &str) -> String {
    value
        .split('_')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}
