use serde::{Deserialize, Serialize};

/// Scalars that map to a local column.
pub const BUILT_IN_SCALARS: &[&str] = &["String", "ID", "Boolean", "Int", "Float", "ISO8601DateTime"];

pub fn is_built_in_scalar(type_name: &str) -> bool {
    BUILT_IN_SCALARS.contains(&type_name)
}

/// One field of a collection's element type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    /// Unwrapped base type name.
    pub declared_type: String,
    pub is_scalar: bool,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        let declared_type = declared_type.into();
        Self {
            name: name.into(),
            is_scalar: is_built_in_scalar(&declared_type),
            declared_type,
        }
    }

    /// Whether the field is selected under `items` in the page query.
    pub fn is_queried(&self) -> bool {
        self.is_scalar || self.declared_type == "ID"
    }
}

/// A mirrored collection: the `…Collection` type and its element type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionDescriptor {
    /// Name of the collection type, e.g. `WidgetCollection`. Keys sync state.
    pub collection_name: String,
    /// Name of the element type, e.g. `Widget`. Names the local table.
    pub element_type_name: String,
    /// Element fields in declaration order, unique by name.
    pub fields: Vec<FieldDescriptor>,
}

impl CollectionDescriptor {
    pub fn new(
        collection_name: impl Into<String>,
        element_type_name: impl Into<String>,
        fields: Vec<FieldDescriptor>,
    ) -> Self {
        Self {
            collection_name: collection_name.into(),
            element_type_name: element_type_name.into(),
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fields that become table columns.
    pub fn column_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.is_scalar)
    }

    /// Fields selected by the page query.
    pub fn queried_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.is_queried())
    }

    pub fn has_id(&self) -> bool {
        self.fields.iter().filter(|f| f.name == "id").count() == 1
    }
}
