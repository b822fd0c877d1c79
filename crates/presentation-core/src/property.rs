//! Property storage and property descriptor tables.
//!
//! A view model stores each of its bindable values in a [`Property<T>`] field
//! and routes writes through [`ViewModelBase::set_property`], which applies
//! equality short-circuiting, validation, dirty tracking and notifications.
//!
//! Transactional view models additionally declare a [`PropertyTable`]: an
//! ordered list of descriptors naming every externally settable property and
//! whether it holds a plain value, a child view model, or a child collection.
//! Snapshot capture and rollback are a loop over this table.
//!
//! # Example
//!
//! ```ignore
//! let table = PropertyTable::<Person>::builder()
//!     .value("name", |p| &p.name)
//!     .child("spouse", |p| &p.spouse)
//!     .collection("children", |p| &p.children)
//!     .build();
//! ```
//!
//! [`ViewModelBase::set_property`]: crate::ViewModelBase::set_property

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::collection::ViewModelCollection;
use crate::logging::targets;
use crate::view_model::ViewModel;

/// Names of the properties every view model carries.
pub mod names {
    /// The dirty flag.
    pub const IS_DIRTY: &str = "is_dirty";
    /// The caller-managed refreshing flag.
    pub const IS_REFRESHING: &str = "is_refreshing";
    /// The opaque tag value.
    pub const TAG: &str = "tag";
    /// The logical parent.
    pub const PARENT: &str = "parent";
    /// Raised whenever the error map changes.
    pub const HAS_ERRORS: &str = "has_errors";
    /// Raised whenever the error map changes.
    pub const IS_VALID: &str = "is_valid";
    /// Transactional: differs from the last accepted snapshot.
    pub const IS_CHANGED: &str = "is_changed";
    /// Transactional: a short-term edit is open.
    pub const IS_EDITING: &str = "is_editing";
}

/// Payload of a property-changed notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PropertyChange {
    /// A single named property changed.
    Named(&'static str),
    /// Every property should be considered changed (raised after a rollback).
    All,
}

impl PropertyChange {
    /// The property name, or `None` for [`PropertyChange::All`].
    pub fn name(&self) -> Option<&'static str> {
        match self {
            Self::Named(name) => Some(name),
            Self::All => None,
        }
    }

    /// Whether a binding on `property` should refresh for this change.
    pub fn affects(&self, property: &str) -> bool {
        match self {
            Self::Named(name) => *name == property,
            Self::All => true,
        }
    }
}

/// A value cell with change detection.
///
/// `Property<T>` wraps a value behind a `RwLock`. It performs no
/// notification itself; view models pass it to
/// [`ViewModelBase::set_property`](crate::ViewModelBase::set_property).
pub struct Property<T> {
    value: RwLock<T>,
}

impl<T: Clone> Property<T> {
    /// Create a new property with an initial value.
    pub fn new(value: T) -> Self {
        Self {
            value: RwLock::new(value),
        }
    }

    /// Get the current value.
    ///
    /// This clones the value. For large types, consider using `with()` instead.
    pub fn get(&self) -> T {
        self.value.read().clone()
    }

    /// Access the value through a closure without cloning.
    pub fn with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&T) -> R,
    {
        f(&self.value.read())
    }

    /// Set the value without any comparison or notification.
    pub fn set_silent(&self, value: T) {
        *self.value.write() = value;
    }
}

impl<T: Clone + Default> Default for Property<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone + fmt::Debug> fmt::Debug for Property<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("value", &*self.value.read())
            .finish()
    }
}

/// What a described property holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropertyKind {
    /// A plain value, compared by `PartialEq`.
    Value,
    /// An optional child view model, compared by identity.
    Child,
    /// A [`ViewModelCollection`] of child view models.
    Collection,
}

/// A captured property value inside a snapshot.
pub type SnapshotValue = Box<dyn Any + Send + Sync>;

type Capture<T> = Box<dyn Fn(&T) -> SnapshotValue + Send + Sync>;
type Restore<T> = Box<dyn Fn(&T, &SnapshotValue) + Send + Sync>;
type Children<T> = Box<dyn Fn(&T) -> Vec<Arc<dyn ViewModel>> + Send + Sync>;

/// Describes one property of a view model type `T`.
pub struct PropertyDescriptor<T> {
    name: &'static str,
    kind: PropertyKind,
    type_name: &'static str,
    capture: Capture<T>,
    restore: Restore<T>,
    children: Children<T>,
}

impl<T> PropertyDescriptor<T> {
    /// The property name used in notifications.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// What the property holds.
    pub fn kind(&self) -> PropertyKind {
        self.kind
    }

    /// The Rust type name of the stored value.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Copy the current value out of `view_model`.
    pub(crate) fn capture(&self, view_model: &T) -> SnapshotValue {
        (self.capture)(view_model)
    }

    /// Write a captured value back through the regular setter path.
    pub(crate) fn restore(&self, view_model: &T, value: &SnapshotValue) {
        (self.restore)(view_model, value)
    }

    /// The child view models currently referenced by this property.
    pub(crate) fn children(&self, view_model: &T) -> Vec<Arc<dyn ViewModel>> {
        (self.children)(view_model)
    }
}

impl<T> fmt::Debug for PropertyDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// The ordered property descriptors of a view model type.
pub struct PropertyTable<T> {
    descriptors: Vec<PropertyDescriptor<T>>,
}

impl<T: ViewModel> PropertyTable<T> {
    /// Start building a table.
    pub fn builder() -> PropertyTableBuilder<T> {
        PropertyTableBuilder {
            descriptors: Vec::new(),
        }
    }

    /// All descriptors in declaration order.
    pub fn descriptors(&self) -> &[PropertyDescriptor<T>] {
        &self.descriptors
    }

    /// Look up a descriptor by property name.
    pub fn get(&self, name: &str) -> Option<&PropertyDescriptor<T>> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    /// Property names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.descriptors.iter().map(|d| d.name)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Every child view model referenced by child and collection properties.
    pub fn child_nodes(&self, view_model: &T) -> Vec<Arc<dyn ViewModel>> {
        self.descriptors
            .iter()
            .filter(|d| d.kind != PropertyKind::Value)
            .flat_map(|d| d.children(view_model))
            .collect()
    }
}

impl<T> fmt::Debug for PropertyTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.descriptors.iter()).finish()
    }
}

/// Builder for [`PropertyTable`].
pub struct PropertyTableBuilder<T> {
    descriptors: Vec<PropertyDescriptor<T>>,
}

impl<T: ViewModel> PropertyTableBuilder<T> {
    /// Declare a plain value property restored with
    /// [`ViewModelBase::set_property`](crate::ViewModelBase::set_property).
    pub fn value<V>(self, name: &'static str, field: fn(&T) -> &Property<V>) -> Self
    where
        V: Clone + PartialEq + Send + Sync + 'static,
    {
        self.value_inner(name, field, None)
    }

    /// Declare a plain value property restored through a custom setter, for
    /// properties whose setter validates.
    pub fn value_with_setter<V>(
        self,
        name: &'static str,
        field: fn(&T) -> &Property<V>,
        setter: fn(&T, V),
    ) -> Self
    where
        V: Clone + PartialEq + Send + Sync + 'static,
    {
        self.value_inner(name, field, Some(setter))
    }

    fn value_inner<V>(
        self,
        name: &'static str,
        field: fn(&T) -> &Property<V>,
        setter: Option<fn(&T, V)>,
    ) -> Self
    where
        V: Clone + PartialEq + Send + Sync + 'static,
    {
        self.push(PropertyDescriptor {
            name,
            kind: PropertyKind::Value,
            type_name: std::any::type_name::<V>(),
            capture: Box::new(move |vm: &T| -> SnapshotValue { Box::new(field(vm).get()) }),
            restore: Box::new(move |vm: &T, value: &SnapshotValue| match value.downcast_ref::<V>() {
                Some(v) => match setter {
                    Some(set) => set(vm, v.clone()),
                    None => {
                        vm.base().set_property(field(vm), name, v.clone());
                    }
                },
                None => mismatched(name),
            }),
            children: Box::new(|_: &T| Vec::new()),
        })
    }

    /// Declare an optional child view model property.
    pub fn child<C: ViewModel>(
        self,
        name: &'static str,
        field: fn(&T) -> &Property<Option<Arc<C>>>,
    ) -> Self {
        self.push(PropertyDescriptor {
            name,
            kind: PropertyKind::Child,
            type_name: std::any::type_name::<C>(),
            capture: Box::new(move |vm: &T| -> SnapshotValue { Box::new(field(vm).get()) }),
            restore: Box::new(move |vm: &T, value: &SnapshotValue| match value.downcast_ref::<Option<Arc<C>>>() {
                Some(child) => {
                    vm.base().set_child(field(vm), name, child.clone());
                }
                None => mismatched(name),
            }),
            children: Box::new(move |vm: &T| -> Vec<Arc<dyn ViewModel>> {
                field(vm)
                    .get()
                    .into_iter()
                    .map(|c| c as Arc<dyn ViewModel>)
                    .collect()
            }),
        })
    }

    /// Declare a child collection property.
    pub fn collection<C: ViewModel>(
        self,
        name: &'static str,
        field: fn(&T) -> &ViewModelCollection<C>,
    ) -> Self {
        self.push(PropertyDescriptor {
            name,
            kind: PropertyKind::Collection,
            type_name: std::any::type_name::<C>(),
            capture: Box::new(move |vm: &T| -> SnapshotValue { Box::new(field(vm).to_vec()) }),
            restore: Box::new(move |vm: &T, value: &SnapshotValue| match value.downcast_ref::<Vec<Arc<C>>>() {
                Some(items) => field(vm).restore(items.clone()),
                None => mismatched(name),
            }),
            children: Box::new(move |vm: &T| -> Vec<Arc<dyn ViewModel>> {
                field(vm)
                    .to_vec()
                    .into_iter()
                    .map(|c| c as Arc<dyn ViewModel>)
                    .collect()
            }),
        })
    }

    /// Finish the table.
    pub fn build(self) -> PropertyTable<T> {
        PropertyTable {
            descriptors: self.descriptors,
        }
    }

    fn push(mut self, descriptor: PropertyDescriptor<T>) -> Self {
        debug_assert!(
            self.descriptors.iter().all(|d| d.name != descriptor.name),
            "property `{}` declared twice",
            descriptor.name
        );
        self.descriptors.push(descriptor);
        self
    }
}

fn mismatched(name: &'static str) {
    tracing::warn!(target: targets::PROPERTY, property = name, "snapshot value has unexpected type");
}
