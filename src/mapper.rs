use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::type_name;
use std::marker::PhantomData;

use crate::error::ValidationError;
use crate::record::Record;
use crate::schema::Schema;

/// Field-name to value mapping handed to the document store. Keys keep the
/// declaration order of the schema that produced them.
pub type Document = serde_json::Map<String, Value>;

/// Turns a raw record into a validated [`Document`].
///
/// Implementations must be pure: identical records always produce identical
/// documents, and the keys of every document are exactly the declared field
/// names.
pub trait DocumentMapper: Send + Sync {
    fn to_document(&self, record: &dyn Record) -> Result<Document, ValidationError>;
}

/// Map `record` through `schema`.
///
/// Absent attributes become null; present ones are coerced to the declared
/// field type, failing with [`ValidationError`] when that is impossible.
pub fn to_document(schema: &Schema, record: &dyn Record) -> Result<Document, ValidationError> {
    let mut document = Document::new();
    for field in schema.fields() {
        let raw = record.attribute(field.name()).unwrap_or(Value::Null);
        document.insert(field.name().to_string(), field.coerce(raw)?);
    }
    Ok(document)
}

impl DocumentMapper for Schema {
    fn to_document(&self, record: &dyn Record) -> Result<Document, ValidationError> {
        to_document(self, record)
    }
}

/// A typed log entity: a serde struct whose field names select the record
/// attributes to persist.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct AuditEntry {
///     message: Option<String>,
///     levelname: Option<String>,
///     user_id: Option<u64>,
/// }
///
/// impl Entity for AuditEntry {
///     const FIELDS: &'static [&'static str] = &["message", "levelname", "user_id"];
/// }
/// ```
///
/// Deserialization is the validation step, so a non-`Option` field rejects
/// records that lack the attribute.
pub trait Entity: Serialize + DeserializeOwned {
    const FIELDS: &'static [&'static str];
}

/// [`DocumentMapper`] for an [`Entity`] type.
pub struct EntityMapper<T> {
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> EntityMapper<T> {
    pub fn new() -> Self {
        EntityMapper { _entity: PhantomData }
    }
}

impl<T: Entity> Default for EntityMapper<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> DocumentMapper for EntityMapper<T> {
    fn to_document(&self, record: &dyn Record) -> Result<Document, ValidationError> {
        let values: Document = T::FIELDS
            .iter()
            .map(|name| (name.to_string(), record.attribute(name).unwrap_or(Value::Null)))
            .collect();

        let entity: T = serde_json::from_value(Value::Object(values)).map_err(|source| {
            ValidationError::Entity {
                entity: type_name::<T>(),
                source,
            }
        })?;

        let mut serialized = match serde_json::to_value(&entity) {
            Ok(Value::Object(map)) => map,
            _ => return Err(ValidationError::NotAnObject(type_name::<T>())),
        };

        Ok(T::FIELDS
            .iter()
            .map(|name| (name.to_string(), serialized.remove(*name).unwrap_or(Value::Null)))
            .collect())
    }
}
