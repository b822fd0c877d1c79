//! Property setting, change notification and validation errors.
//!
//! These are the [`ViewModelBase`] operations a binding layer relies on:
//! every property write goes through [`ViewModelBase::set_property`] (or one
//! of its variants), which
//!
//! 1. skips the write entirely when the value is unchanged,
//! 2. emits `property_changing`,
//! 3. writes the value and replaces the property's validation errors,
//! 4. tracks dirty state,
//! 5. emits `property_changed`.
//!
//! Validation errors are kept per key, where `None` is the node-level key.
//! Every change to the error map emits `errors_changed` followed by
//! `property_changed` for `has_errors` and `is_valid`.

use std::sync::Arc;

use crate::logging::targets;
use crate::property::{Property, PropertyChange, names};
use crate::view_model::{ViewModel, ViewModelBase};

impl ViewModelBase {
    // =========================================================================
    // Setters
    // =========================================================================

    /// Set a plain value property.
    ///
    /// Returns `true` if the value changed. A write without a validator
    /// clears any errors previously recorded for `name`.
    pub fn set_property<V>(&self, field: &Property<V>, name: &'static str, value: V) -> bool
    where
        V: Clone + PartialEq,
    {
        self.write_property(field, name, value, |a, b| a == b, |_| Vec::new(), || {})
    }

    /// Set a plain value property and validate the new value.
    ///
    /// The validator's messages replace the errors recorded for `name`. An
    /// unchanged value is not validated.
    pub fn set_property_validated<V, F>(
        &self,
        field: &Property<V>,
        name: &'static str,
        value: V,
        validator: F,
    ) -> bool
    where
        V: Clone + PartialEq,
        F: FnOnce(&V) -> Vec<String>,
    {
        self.write_property(field, name, value, |a, b| a == b, validator, || {})
    }

    /// Set a child view model property.
    ///
    /// Children are compared by identity. The new child is re-parented to
    /// this node and a replaced child loses its parent.
    pub fn set_child<C: ViewModel>(
        &self,
        field: &Property<Option<Arc<C>>>,
        name: &'static str,
        child: Option<Arc<C>>,
    ) -> bool {
        let same = |a: &Option<Arc<C>>, b: &Option<Arc<C>>| match (a, b) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if field.with(|current| same(current, &child)) {
            return false;
        }

        if let Some(previous) = field.get() {
            previous.base().set_parent(None);
        }

        let adopted = child.clone();
        self.write_property(field, name, child, same, |_| Vec::new(), || {
            if let Some(adopted) = adopted {
                adopted.base().set_parent(self.view_model());
            }
        })
    }

    /// The shared setter path.
    ///
    /// `post` runs after the value and its errors are written and before
    /// dirty tracking and the changed notification.
    pub(crate) fn write_property<V, S, F, P>(
        &self,
        field: &Property<V>,
        name: &'static str,
        value: V,
        same: S,
        validator: F,
        post: P,
    ) -> bool
    where
        V: Clone,
        S: FnOnce(&V, &V) -> bool,
        F: FnOnce(&V) -> Vec<String>,
        P: FnOnce(),
    {
        if field.with(|current| same(current, &value)) {
            return false;
        }

        self.property_changing.emit(name);

        let errors = validator(&value);
        field.set_silent(value);
        self.replace_errors(Some(name), errors);

        post();

        self.track_dirty(name);
        self.notify_changed(PropertyChange::Named(name));
        true
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    /// Emit `property_changed` for a computed property.
    pub fn raise_property_changed(&self, name: &'static str) {
        self.notify_changed(PropertyChange::Named(name));
    }

    /// Emit `property_changed` with [`PropertyChange::All`].
    pub fn raise_all_properties_changed(&self) {
        self.notify_changed(PropertyChange::All);
    }

    pub(crate) fn notify_changed(&self, change: PropertyChange) {
        self.property_changed.emit(change);
        self.mark_changed_after(change);
        self.update_commands();
    }

    // =========================================================================
    // Errors
    // =========================================================================

    /// The messages recorded under `key`; `None` is the node-level key.
    pub fn errors(&self, key: Option<&str>) -> Vec<String> {
        self.errors
            .read()
            .iter()
            .find(|(k, _)| **k == key)
            .map(|(_, messages)| messages.clone())
            .unwrap_or_default()
    }

    /// Every recorded message, node-level first, then by property name.
    pub fn all_errors(&self) -> Vec<String> {
        self.errors.read().values().flatten().cloned().collect()
    }

    /// The keys that currently have errors.
    pub fn error_keys(&self) -> Vec<Option<&'static str>> {
        self.errors.read().keys().copied().collect()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.read().is_empty()
    }

    pub fn is_valid(&self) -> bool {
        !self.has_errors()
    }

    /// Append one message under `key`, ignoring duplicates.
    pub fn add_error(&self, key: Option<&'static str>, message: impl Into<String>) {
        let message = message.into();
        let added = {
            let mut errors = self.errors.write();
            let list = errors.entry(key).or_default();
            if list.contains(&message) {
                false
            } else {
                list.push(message);
                true
            }
        };
        if added {
            self.raise_errors_changed(key);
        }
    }

    /// Append several messages under `key`, optionally replacing the
    /// existing ones.
    pub fn add_errors<I, S>(&self, key: Option<&'static str>, messages: I, clear_previous: bool)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list = if clear_previous { Vec::new() } else { self.errors(key) };
        for message in messages {
            let message = message.into();
            if !list.contains(&message) {
                list.push(message);
            }
        }
        self.replace_errors(key, list);
    }

    /// Replace the messages recorded for property `name`.
    pub fn set_property_errors<I, S>(&self, name: &'static str, messages: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_errors(Some(name), messages, true);
    }

    /// Remove the messages under `key`.
    pub fn clear_errors(&self, key: Option<&'static str>) {
        let removed = self.errors.write().remove(&key).is_some();
        if removed {
            self.raise_errors_changed(key);
        }
    }

    /// Remove every recorded message.
    pub fn clear_all_errors(&self) {
        for key in self.error_keys() {
            self.clear_errors(key);
        }
    }

    /// Replace the list under `key`, notifying only if it differs.
    fn replace_errors(&self, key: Option<&'static str>, messages: Vec<String>) {
        let changed = {
            let mut errors = self.errors.write();
            let current = errors.get(&key).map(Vec::as_slice).unwrap_or_default();
            if current == messages.as_slice() {
                false
            } else {
                if messages.is_empty() {
                    errors.remove(&key);
                } else {
                    errors.insert(key, messages);
                }
                true
            }
        };
        if changed {
            self.raise_errors_changed(key);
        }
    }

    fn raise_errors_changed(&self, key: Option<&'static str>) {
        tracing::trace!(target: targets::PROPERTY, view_model = self.type_name(), key = ?key, "errors changed");
        self.errors_changed.emit(key);
        self.notify_changed(PropertyChange::Named(names::HAS_ERRORS));
        self.notify_changed(PropertyChange::Named(names::IS_VALID));
    }
}
