//! Collection discovery.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::descriptor::{CollectionDescriptor, FieldDescriptor};
use crate::introspector::{unwrap_type, SchemaDocument};

/// Name of the field on a collection type that holds the page items.
pub const ITEMS_FIELD: &str = "items";

/// Derives [`CollectionDescriptor`]s from a parsed schema.
///
/// A type qualifies when its name ends with the configured suffix and it
/// declares an `items` field. Qualifying types whose element type is missing
/// from the schema, or whose element type lacks an `id` field, are skipped
/// with a warning.
#[derive(Debug, Clone)]
pub struct CollectionRegistry {
    suffix: String,
}

impl Default for CollectionRegistry {
    fn default() -> Self {
        Self::new("Collection")
    }
}

impl CollectionRegistry {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }

    /// Descriptors in schema declaration order.
    pub fn discover(&self, schema: &SchemaDocument) -> Vec<CollectionDescriptor> {
        schema
            .object_types()
            .filter(|object| object.name.ends_with(&self.suffix) && object.name != self.suffix)
            .filter_map(|collection| {
                let items = collection.field(ITEMS_FIELD)?;
                let element_type_name = unwrap_type(&items.ty);

                let Some(element) = schema.object_type(element_type_name) else {
                    warn!(
                        collection = %collection.name,
                        element_type = %element_type_name,
                        "Element type not defined in schema, skipping collection"
                    );
                    return None;
                };

                let mut seen = HashSet::new();
                let fields: Vec<FieldDescriptor> = element
                    .fields
                    .iter()
                    .filter(|field| seen.insert(field.name.as_str()))
                    .map(|field| FieldDescriptor::new(field.name.clone(), unwrap_type(&field.ty)))
                    .collect();

                let descriptor = CollectionDescriptor::new(
                    collection.name.clone(),
                    element_type_name,
                    fields,
                );

                if !descriptor.has_id() {
                    warn!(
                        collection = %collection.name,
                        element_type = %element_type_name,
                        "Element type has no id field, skipping collection"
                    );
                    return None;
                }

                debug!(
                    collection = %descriptor.collection_name,
                    element_type = %descriptor.element_type_name,
                    fields = descriptor.fields.len(),
                    "Discovered collection"
                );
                Some(descriptor)
            })
            .collect()
    }
}
