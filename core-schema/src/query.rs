//! Pagination query rendering.

use inflector::string::pluralize::to_plural;

use crate::descriptor::{CollectionDescriptor, FieldDescriptor};

/// Renders the page query for a collection.
///
/// For `Widget { id: ID, name: String }` the output is:
///
/// ```text
/// query widgets($after: String, $limit: Int) {
///   widgets(after: $after, limit: $limit) {
///     cursor
///     deletedIds
///     hasMore
///     items {
///       id
///       name
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryBuilder;

impl QueryBuilder {
    /// Remote field holding the collection: the lower-camel plural of the
    /// element type (`Widget` → `widgets`, `SalesListing` → `salesListings`).
    pub fn field_name(element_type_name: &str) -> String {
        let singular = lower_first(element_type_name);
        let plural = to_plural(&singular);
        plural_or_suffixed(&singular, plural)
    }

    pub fn build(descriptor: &CollectionDescriptor) -> String {
        Self::build_for(&descriptor.element_type_name, &descriptor.fields)
    }

    /// Deterministic for a given element type and field list.
    pub fn build_for(element_type_name: &str, fields: &[FieldDescriptor]) -> String {
        let field_name = Self::field_name(element_type_name);

        let mut query = String::new();
        query.push_str(&format!("query {}($after: String, $limit: Int) {{\n", field_name));
        query.push_str(&format!("  {}(after: $after, limit: $limit) {{\n", field_name));
        query.push_str("    cursor\n");
        query.push_str("    deletedIds\n");
        query.push_str("    hasMore\n");
        query.push_str("    items {\n");
        for field in fields.iter().filter(|f| f.is_queried()) {
            query.push_str(&format!("      {}\n", field.name));
        }
        query.push_str("    }\n");
        query.push_str("  }\n");
        query.push_str("}\n");
        query
    }
}

fn lower_first(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn plural_or_suffixed(singular: &str, plural: String) -> String {
    if plural == singular || plural.is_empty() {
        format!("{}s", singular)
    } else {
        plural
    }
}
