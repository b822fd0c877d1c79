//! Mapping between view models and plain data records.
//!
//! A [`DataRecord`] is a named bag of fields: JSON values, nested records or
//! lists of records. A [`DtoMapper`] knows the declared fields of every
//! record type ([`RecordSchema`]) and, per view model type, which record
//! types it links to and which property maps to which field
//! ([`ViewModelMapping`]).
//!
//! Conversion is recursive in both directions. Child properties map to
//! nested records and collections map to record lists. A record or view model
//! that is reached again while it is still being converted is a cycle and
//! fails with [`DtoError::CyclicReference`]; the same node reached through two
//! separate branches is converted twice.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use presentation_core::dto::{DataRecord, DtoMapper, RecordSchema};
//! use presentation_core::{create, Property, ViewModel, ViewModelBase};
//! use serde_json::json;
//!
//! struct Person {
//!     base: ViewModelBase,
//!     name: Property<Option<String>>,
//! }
//!
//! impl ViewModel for Person {
//!     fn base(&self) -> &ViewModelBase { &self.base }
//! }
//!
//! fn person() -> Arc<Person> {
//!     create(|base| Person { base, name: Property::default() })
//! }
//!
//! let mapper = DtoMapper::builder()
//!     .record(RecordSchema::new("PersonRecord").field("person_name"))
//!     .view_model::<Person, _>(person, |m| m.link("PersonRecord").value("name", "person_name", |p| &p.name))
//!     .build()
//!     .unwrap();
//!
//! let record = DataRecord::new("PersonRecord");
//! record.set_value("person_name", json!("Ariel"));
//!
//! let vm = mapper.to_view_model::<Person>(&record).unwrap();
//! assert_eq!(vm.name.get().as_deref(), Some("Ariel"));
//!
//! let back = mapper.to_record(vm.as_ref()).unwrap();
//! assert_eq!(back.get("person_name").as_value(), Some(&json!("Ariel")));
//! ```

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::collection::ViewModelCollection;
use crate::logging::targets;
use crate::property::{Property, PropertyKind};
use crate::view_model::ViewModel;

/// Errors raised by DTO conversion.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DtoError {
    /// A record or view model refers back to itself.
    #[error("cyclic reference through a `{record_type}` record")]
    CyclicReference { record_type: String },

    /// The view model type has no mapping.
    #[error("view model `{view_model}` has no DTO mapping")]
    NotLinked { view_model: &'static str },

    /// The view model type is not linked to this record type.
    #[error("view model `{view_model}` is not linked to record type `{record_type}`")]
    RecordTypeMismatch {
        view_model: &'static str,
        record_type: String,
    },

    /// A mapping names a field the record type does not declare.
    #[error("record type `{record_type}` has no field `{field}`")]
    UnknownField { record_type: String, field: String },

    /// No schema is registered for the record type.
    #[error("unknown record type `{0}`")]
    UnknownRecordType(String),

    /// The field holds the wrong kind of value.
    #[error("field `{field}` must hold {expected}")]
    FieldKind { field: String, expected: &'static str },

    /// A value could not be converted.
    #[error("field `{field}` could not be converted: {message}")]
    Serde { field: String, message: String },
}

/// Result type for DTO operations.
pub type DtoResult<T> = std::result::Result<T, DtoError>;

// =============================================================================
// Records
// =============================================================================

/// Shared handle to a record. Records are compared by identity.
pub type RecordRef = Arc<DataRecord>;

/// The content of one record field.
#[derive(Clone)]
pub enum FieldValue {
    /// A plain value; `Null` means absent.
    Value(Value),
    /// A nested record.
    Record(RecordRef),
    /// A list of nested records.
    Records(Vec<RecordRef>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Value(Value::Null))
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&RecordRef> {
        match self {
            Self::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_records(&self) -> Option<&[RecordRef]> {
        match self {
            Self::Records(records) => Some(records),
            _ => None,
        }
    }
}

impl Default for FieldValue {
    fn default() -> Self {
        Self::Value(Value::Null)
    }
}

impl fmt::Debug for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => write!(f, "Value({value})"),
            Self::Record(record) => write!(f, "Record({})", record.record_type()),
            Self::Records(records) => write!(f, "Records(len = {})", records.len()),
        }
    }
}

/// A plain data record.
pub struct DataRecord {
    record_type: String,
    fields: RwLock<BTreeMap<String, FieldValue>>,
}

impl DataRecord {
    /// Create an empty record.
    pub fn new(record_type: impl Into<String>) -> RecordRef {
        Arc::new(Self {
            record_type: record_type.into(),
            fields: RwLock::new(BTreeMap::new()),
        })
    }

    pub fn record_type(&self) -> &str {
        &self.record_type
    }

    /// The field content; missing fields read as `Value(Null)`.
    pub fn get(&self, field: &str) -> FieldValue {
        self.fields.read().get(field).cloned().unwrap_or_default()
    }

    pub fn set(&self, field: impl Into<String>, value: FieldValue) {
        self.fields.write().insert(field.into(), value);
    }

    pub fn set_value(&self, field: impl Into<String>, value: Value) {
        self.set(field, FieldValue::Value(value));
    }

    /// Set a nested record; `None` stores `Null`.
    pub fn set_record(&self, field: impl Into<String>, record: Option<RecordRef>) {
        let value = match record {
            Some(record) => FieldValue::Record(record),
            None => FieldValue::Value(Value::Null),
        };
        self.set(field, value);
    }

    pub fn set_records(&self, field: impl Into<String>, records: Vec<RecordRef>) {
        self.set(field, FieldValue::Records(records));
    }

    /// Names of the fields that have been set, in sorted order.
    pub fn field_names(&self) -> Vec<String> {
        self.fields.read().keys().cloned().collect()
    }

    /// Export the record tree as JSON.
    pub fn to_json(self: &Arc<Self>) -> DtoResult<Value> {
        let mut path = Vec::new();
        record_to_json(self, &mut path)
    }
}

fn record_to_json(record: &RecordRef, path: &mut Vec<usize>) -> DtoResult<Value> {
    let key = Arc::as_ptr(record) as usize;
    if path.contains(&key) {
        return Err(DtoError::CyclicReference {
            record_type: record.record_type().to_string(),
        });
    }
    path.push(key);

    let fields: Vec<(String, FieldValue)> = record
        .fields
        .read()
        .iter()
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    let mut object = serde_json::Map::new();
    for (name, value) in fields {
        let json = match value {
            FieldValue::Value(value) => value,
            FieldValue::Record(nested) => record_to_json(&nested, path)?,
            FieldValue::Records(list) => Value::Array(
                list.iter()
                    .map(|nested| record_to_json(nested, path))
                    .collect::<DtoResult<Vec<_>>>()?,
            ),
        };
        object.insert(name, json);
    }

    path.pop();
    Ok(Value::Object(object))
}

impl fmt::Debug for DataRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataRecord")
            .field("record_type", &self.record_type)
            .field("fields", &*self.fields.read())
            .finish()
    }
}

/// The declared fields of a record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSchema {
    name: String,
    fields: Vec<String>,
}

impl RecordSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.fields.push(field.into());
        self
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_names(&self) -> &[String] {
        &self.fields
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }
}

// =============================================================================
// Mappings
// =============================================================================

type ReadField<T> = Box<dyn Fn(&DtoMapper, &T, &FieldValue, &mut Vec<usize>) -> DtoResult<()> + Send + Sync>;
type WriteField<T> = Box<dyn Fn(&DtoMapper, &T, &mut Vec<usize>) -> DtoResult<FieldValue> + Send + Sync>;

struct PropertyMapping<T> {
    property: &'static str,
    field: String,
    record_type: Option<String>,
    kind: PropertyKind,
    read: ReadField<T>,
    write: WriteField<T>,
}

impl<T> PropertyMapping<T> {
    fn applies_to(&self, record_type: &str) -> bool {
        self.record_type.as_deref().is_none_or(|rt| rt == record_type)
    }
}

/// How one view model type maps to its record types.
pub struct ViewModelMapping<T> {
    factory: fn() -> Arc<T>,
    links: Vec<String>,
    properties: Vec<PropertyMapping<T>>,
    scope: Option<String>,
}

impl<T: ViewModel> ViewModelMapping<T> {
    fn new(factory: fn() -> Arc<T>) -> Self {
        Self {
            factory,
            links: Vec::new(),
            properties: Vec::new(),
            scope: None,
        }
    }

    /// Link the view model type to a record type. The first link is the
    /// default target of [`DtoMapper::to_record`].
    pub fn link(mut self, record_type: impl Into<String>) -> Self {
        self.links.push(record_type.into());
        self
    }

    /// Restrict the properties declared inside `declare` to one record type.
    pub fn for_record<F>(mut self, record_type: impl Into<String>, declare: F) -> Self
    where
        F: FnOnce(Self) -> Self,
    {
        let outer = self.scope.replace(record_type.into());
        let mut mapping = declare(self);
        mapping.scope = outer;
        mapping
    }

    /// Map a plain value property to a field, converting through serde.
    ///
    /// A `null` field that `V` cannot represent leaves the property as is.
    pub fn value<V>(self, property: &'static str, field: impl Into<String>, accessor: fn(&T) -> &Property<V>) -> Self
    where
        V: Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static,
    {
        let field = field.into();
        let read_field = field.clone();
        let write_field = field.clone();
        self.push(
            property,
            field,
            PropertyKind::Value,
            Box::new(move |_: &DtoMapper, vm: &T, value: &FieldValue, _: &mut Vec<usize>| -> DtoResult<()> {
                let FieldValue::Value(json) = value else {
                    return Err(DtoError::FieldKind {
                        field: read_field.clone(),
                        expected: "a plain value",
                    });
                };
                match serde_json::from_value::<V>(json.clone()) {
                    Ok(v) => {
                        vm.base().set_property(accessor(vm), property, v);
                        Ok(())
                    }
                    Err(_) if json.is_null() => Ok(()),
                    Err(e) => Err(DtoError::Serde {
                        field: read_field.clone(),
                        message: e.to_string(),
                    }),
                }
            }),
            Box::new(move |_: &DtoMapper, vm: &T, _: &mut Vec<usize>| -> DtoResult<FieldValue> {
                accessor(vm)
                    .with(|value| serde_json::to_value(value))
                    .map(FieldValue::Value)
                    .map_err(|e| DtoError::Serde {
                        field: write_field.clone(),
                        message: e.to_string(),
                    })
            }),
        )
    }

    /// Map a child view model property to a nested record field.
    pub fn child<C: ViewModel>(
        self,
        property: &'static str,
        field: impl Into<String>,
        accessor: fn(&T) -> &Property<Option<Arc<C>>>,
    ) -> Self {
        let field = field.into();
        let read_field = field.clone();
        self.push(
            property,
            field,
            PropertyKind::Child,
            Box::new(move |mapper: &DtoMapper, vm: &T, value: &FieldValue, path: &mut Vec<usize>| -> DtoResult<()> {
                let child = match value {
                    FieldValue::Record(record) => Some(mapper.view_model_from::<C>(record, path)?),
                    FieldValue::Value(Value::Null) => None,
                    _ => {
                        return Err(DtoError::FieldKind {
                            field: read_field.clone(),
                            expected: "a record",
                        });
                    }
                };
                vm.base().set_child(accessor(vm), property, child);
                Ok(())
            }),
            Box::new(move |mapper: &DtoMapper, vm: &T, path: &mut Vec<usize>| -> DtoResult<FieldValue> {
                match accessor(vm).get() {
                    Some(child) => Ok(FieldValue::Record(mapper.record_from_default(child.as_ref(), path)?)),
                    None => Ok(FieldValue::Value(Value::Null)),
                }
            }),
        )
    }

    /// Map a child collection to a record list field.
    pub fn collection<C: ViewModel>(
        self,
        property: &'static str,
        field: impl Into<String>,
        accessor: fn(&T) -> &ViewModelCollection<C>,
    ) -> Self {
        let field = field.into();
        let read_field = field.clone();
        self.push(
            property,
            field,
            PropertyKind::Collection,
            Box::new(move |mapper: &DtoMapper, vm: &T, value: &FieldValue, path: &mut Vec<usize>| -> DtoResult<()> {
                let items = match value {
                    FieldValue::Records(records) => records
                        .iter()
                        .map(|record| mapper.view_model_from::<C>(record, path))
                        .collect::<DtoResult<Vec<_>>>()?,
                    FieldValue::Value(Value::Null) => Vec::new(),
                    _ => {
                        return Err(DtoError::FieldKind {
                            field: read_field.clone(),
                            expected: "a list of records",
                        });
                    }
                };
                let collection = accessor(vm);
                if !(items.is_empty() && collection.is_empty()) {
                    collection.replace_all(items);
                }
                Ok(())
            }),
            Box::new(move |mapper: &DtoMapper, vm: &T, path: &mut Vec<usize>| -> DtoResult<FieldValue> {
                accessor(vm)
                    .iter()
                    .map(|item| mapper.record_from_default(item.as_ref(), path))
                    .collect::<DtoResult<Vec<_>>>()
                    .map(FieldValue::Records)
            }),
        )
    }

    fn push(
        mut self,
        property: &'static str,
        field: String,
        kind: PropertyKind,
        read: ReadField<T>,
        write: WriteField<T>,
    ) -> Self {
        self.properties.push(PropertyMapping {
            property,
            field,
            record_type: self.scope.clone(),
            kind,
            read,
            write,
        });
        self
    }

    /// The linked record types, default first.
    pub fn links(&self) -> &[String] {
        &self.links
    }

    pub fn property_count(&self) -> usize {
        self.properties.len()
    }
}

impl<T> fmt::Debug for ViewModelMapping<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewModelMapping")
            .field("view_model", &std::any::type_name::<T>())
            .field("links", &self.links)
            .field(
                "properties",
                &self
                    .properties
                    .iter()
                    .map(|p| (p.property, p.field.as_str(), p.kind))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// What the builder validates for one registered mapping.
struct MappingSummary {
    view_model: &'static str,
    links: Vec<String>,
    fields: Vec<(String, Option<String>)>,
}

// =============================================================================
// Mapper
// =============================================================================

/// Converts between view models and data records.
pub struct DtoMapper {
    schemas: HashMap<String, RecordSchema>,
    mappings: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

/// Builder for [`DtoMapper`].
#[derive(Default)]
pub struct DtoMapperBuilder {
    schemas: Vec<RecordSchema>,
    mappings: Vec<(TypeId, MappingSummary, Box<dyn Any + Send + Sync>)>,
}

impl DtoMapperBuilder {
    /// Declare a record type.
    pub fn record(mut self, schema: RecordSchema) -> Self {
        self.schemas.push(schema);
        self
    }

    /// Declare the mapping of view model type `T`, created with `factory`.
    pub fn view_model<T, F>(mut self, factory: fn() -> Arc<T>, declare: F) -> Self
    where
        T: ViewModel,
        F: FnOnce(ViewModelMapping<T>) -> ViewModelMapping<T>,
    {
        let mapping = declare(ViewModelMapping::new(factory));
        let summary = MappingSummary {
            view_model: std::any::type_name::<T>(),
            links: mapping.links.clone(),
            fields: mapping
                .properties
                .iter()
                .map(|p| (p.field.clone(), p.record_type.clone()))
                .collect(),
        };
        self.mappings.push((TypeId::of::<T>(), summary, Box::new(mapping)));
        self
    }

    /// Validate the mappings against the schemas.
    pub fn build(self) -> DtoResult<DtoMapper> {
        let schemas: HashMap<String, RecordSchema> = self
            .schemas
            .into_iter()
            .map(|schema| (schema.name.clone(), schema))
            .collect();

        let mut mappings = HashMap::new();
        for (type_id, summary, mapping) in self.mappings {
            validate(&schemas, &summary)?;
            mappings.insert(type_id, mapping);
        }

        tracing::debug!(
            target: targets::DTO,
            schemas = schemas.len(),
            mappings = mappings.len(),
            "dto mapper built"
        );
        Ok(DtoMapper { schemas, mappings })
    }
}

fn validate(schemas: &HashMap<String, RecordSchema>, summary: &MappingSummary) -> DtoResult<()> {
    if summary.links.is_empty() {
        return Err(DtoError::NotLinked {
            view_model: summary.view_model,
        });
    }
    for link in &summary.links {
        if !schemas.contains_key(link) {
            return Err(DtoError::UnknownRecordType(link.clone()));
        }
    }
    for (field, record_type) in &summary.fields {
        let targets: Vec<&String> = match record_type {
            Some(record_type) if summary.links.contains(record_type) => vec![record_type],
            Some(record_type) => {
                return Err(DtoError::RecordTypeMismatch {
                    view_model: summary.view_model,
                    record_type: record_type.clone(),
                });
            }
            None => summary.links.iter().collect(),
        };
        for target in targets {
            let known = schemas.get(target).is_some_and(|schema| schema.has_field(field));
            if !known {
                return Err(DtoError::UnknownField {
                    record_type: target.clone(),
                    field: field.clone(),
                });
            }
        }
    }
    Ok(())
}

impl DtoMapper {
    pub fn builder() -> DtoMapperBuilder {
        DtoMapperBuilder::default()
    }

    /// The schema of a record type.
    pub fn schema(&self, record_type: &str) -> Option<&RecordSchema> {
        self.schemas.get(record_type)
    }

    /// Create a record with every declared field set to `null`.
    pub fn new_record(&self, record_type: &str) -> DtoResult<RecordRef> {
        let schema = self
            .schema(record_type)
            .ok_or_else(|| DtoError::UnknownRecordType(record_type.to_string()))?;
        let record = DataRecord::new(record_type);
        for field in &schema.fields {
            record.set(field.clone(), FieldValue::default());
        }
        Ok(record)
    }

    /// Convert a record tree into a new view model tree.
    #[tracing::instrument(skip_all, target = "presentation_core::dto", level = "debug", fields(record_type = record.record_type()))]
    pub fn to_view_model<T: ViewModel>(&self, record: &RecordRef) -> DtoResult<Arc<T>> {
        let mut path = Vec::new();
        self.view_model_from::<T>(record, &mut path)
    }

    /// Convert a view model tree into a record of its default linked type.
    #[tracing::instrument(skip_all, target = "presentation_core::dto", level = "debug", fields(view_model = view_model.base().type_name()))]
    pub fn to_record<T: ViewModel>(&self, view_model: &T) -> DtoResult<RecordRef> {
        let mut path = Vec::new();
        self.record_from_default(view_model, &mut path)
    }

    /// Convert a view model tree into a record of a specific linked type.
    #[tracing::instrument(skip_all, target = "presentation_core::dto", level = "debug", fields(view_model = view_model.base().type_name()))]
    pub fn to_record_as<T: ViewModel>(&self, view_model: &T, record_type: &str) -> DtoResult<RecordRef> {
        let mapping = self.mapping::<T>()?;
        if !mapping.links.iter().any(|link| link == record_type) {
            return Err(DtoError::RecordTypeMismatch {
                view_model: std::any::type_name::<T>(),
                record_type: record_type.to_string(),
            });
        }
        let mut path = Vec::new();
        self.record_from(mapping, view_model, record_type, &mut path)
    }

    fn mapping<T: ViewModel>(&self) -> DtoResult<&ViewModelMapping<T>> {
        self.mappings
            .get(&TypeId::of::<T>())
            .and_then(|mapping| mapping.downcast_ref::<ViewModelMapping<T>>())
            .ok_or(DtoError::NotLinked {
                view_model: std::any::type_name::<T>(),
            })
    }

    fn view_model_from<T: ViewModel>(&self, record: &RecordRef, path: &mut Vec<usize>) -> DtoResult<Arc<T>> {
        let mapping = self.mapping::<T>()?;
        let record_type = record.record_type();
        if !mapping.links.iter().any(|link| link == record_type) {
            return Err(DtoError::RecordTypeMismatch {
                view_model: std::any::type_name::<T>(),
                record_type: record_type.to_string(),
            });
        }

        let key = Arc::as_ptr(record) as usize;
        if path.contains(&key) {
            tracing::warn!(target: targets::DTO, record_type, "cyclic record graph");
            return Err(DtoError::CyclicReference {
                record_type: record_type.to_string(),
            });
        }
        path.push(key);

        let view_model = (mapping.factory)();
        for property in mapping.properties.iter().filter(|p| p.applies_to(record_type)) {
            let value = record.get(&property.field);
            (property.read)(self, view_model.as_ref(), &value, path)?;
        }

        path.pop();
        Ok(view_model)
    }

    fn record_from_default<T: ViewModel>(&self, view_model: &T, path: &mut Vec<usize>) -> DtoResult<RecordRef> {
        let mapping = self.mapping::<T>()?;
        let record_type = mapping.links.first().ok_or(DtoError::NotLinked {
            view_model: std::any::type_name::<T>(),
        })?;
        self.record_from(mapping, view_model, record_type, path)
    }

    fn record_from<T: ViewModel>(
        &self,
        mapping: &ViewModelMapping<T>,
        view_model: &T,
        record_type: &str,
        path: &mut Vec<usize>,
    ) -> DtoResult<RecordRef> {
        let key = view_model as *const T as usize;
        if path.contains(&key) {
            tracing::warn!(target: targets::DTO, record_type, "cyclic view model graph");
            return Err(DtoError::CyclicReference {
                record_type: record_type.to_string(),
            });
        }
        path.push(key);

        let record = self.new_record(record_type)?;
        for property in mapping.properties.iter().filter(|p| p.applies_to(record_type)) {
            let value = (property.write)(self, view_model, path)?;
            record.set(property.field.clone(), value);
        }

        path.pop();
        Ok(record)
    }
}

impl fmt::Debug for DtoMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DtoMapper")
            .field("schemas", &self.schemas.keys().collect::<Vec<_>>())
            .field("mappings", &self.mappings.len())
            .finish()
    }
}
