//! Schema fetching and parsing.

use std::collections::HashMap;
use std::sync::Arc;

use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest};
use graphql_parser::schema::{Definition, Type, TypeDefinition};
use tracing::{debug, info, instrument};

use crate::error::{Result, SchemaError};

/// A field type reference with its list/non-null wrappers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRef {
    Named(String),
    List(Box<TypeRef>),
    NonNull(Box<TypeRef>),
}

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        TypeRef::Named(name.into())
    }

    pub fn list(inner: TypeRef) -> Self {
        TypeRef::List(Box::new(inner))
    }

    pub fn non_null(inner: TypeRef) -> Self {
        TypeRef::NonNull(Box::new(inner))
    }
}

impl<'a> From<&Type<'a, String>> for TypeRef {
    fn from(ty: &Type<'a, String>) -> Self {
        match ty {
            Type::NamedType(name) => TypeRef::Named(name.clone()),
            Type::ListType(inner) => TypeRef::List(Box::new(TypeRef::from(inner.as_ref()))),
            Type::NonNullType(inner) => TypeRef::NonNull(Box::new(TypeRef::from(inner.as_ref()))),
        }
    }
}

/// Strips list and non-null wrappers down to the named base type.
///
/// `[Widget!]!` → `Widget`
pub fn unwrap_type(ty: &TypeRef) -> &str {
    match ty {
        TypeRef::Named(name) => name,
        TypeRef::List(inner) | TypeRef::NonNull(inner) => unwrap_type(inner),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub ty: TypeRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectTypeDef {
    pub name: String,
    pub fields: Vec<FieldDef>,
}

impl ObjectTypeDef {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Object types of a parsed schema, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct SchemaDocument {
    types: Vec<ObjectTypeDef>,
    index: HashMap<String, usize>,
}

impl SchemaDocument {
    /// Parses SDL text. Only object type definitions are kept.
    pub fn parse(sdl: &str) -> Result<Self> {
        let document = graphql_parser::parse_schema::<String>(sdl)
            .map_err(|e| SchemaError::Parse(e.to_string()))?;

        let mut schema = SchemaDocument::default();
        for definition in &document.definitions {
            if let Definition::TypeDefinition(TypeDefinition::Object(object)) = definition {
                schema.insert(ObjectTypeDef {
                    name: object.name.clone(),
                    fields: object
                        .fields
                        .iter()
                        .map(|field| FieldDef {
                            name: field.name.clone(),
                            ty: TypeRef::from(&field.field_type),
                        })
                        .collect(),
                });
            }
        }

        debug!(object_types = schema.types.len(), "Parsed schema document");
        Ok(schema)
    }

    fn insert(&mut self, object: ObjectTypeDef) {
        // A later definition with the same name replaces the earlier one
        if let Some(&pos) = self.index.get(&object.name) {
            self.types[pos] = object;
        } else {
            self.index.insert(object.name.clone(), self.types.len());
            self.types.push(object);
        }
    }

    pub fn object_type(&self, name: &str) -> Option<&ObjectTypeDef> {
        self.index.get(name).map(|&pos| &self.types[pos])
    }

    pub fn object_types(&self) -> impl Iterator<Item = &ObjectTypeDef> {
        self.types.iter()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// Fetches the SDL document over HTTP and parses it.
pub struct SchemaIntrospector {
    http_client: Arc<dyn HttpClient>,
}

impl SchemaIntrospector {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self { http_client }
    }

    /// # Errors
    ///
    /// - [`SchemaError::Http`] or [`SchemaError::Fetch`] when the document
    ///   cannot be retrieved
    /// - [`SchemaError::Parse`] when it is not valid SDL
    #[instrument(skip(self))]
    pub async fn introspect(&self, schema_url: &str) -> Result<SchemaDocument> {
        let request = HttpRequest::new(HttpMethod::Get, schema_url);
        let response = self.http_client.execute(request).await?;

        if !response.is_success() {
            return Err(SchemaError::Fetch(format!(
                "{} returned status {}",
                schema_url, response.status
            )));
        }

        let sdl = response
            .text()
            .map_err(|e| SchemaError::Fetch(e.to_string()))?;
        let document = SchemaDocument::parse(&sdl)?;

        info!(object_types = document.len(), "Schema introspected");
        Ok(document)
    }
}
