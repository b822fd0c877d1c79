//! Captured property state of a transactional view model.

use std::fmt;

use crate::logging::targets;
use crate::property::SnapshotValue;
use crate::trx::TrxViewModel;
use crate::view_model::Tag;

/// The state a rollback restores.
///
/// Holds `is_refreshing`, the tag and a copy of every property in the view
/// model's [`PropertyTable`](crate::PropertyTable). Child view models and
/// collection elements are captured by reference, not cloned. The dirty flag
/// and the parent link are not part of a snapshot.
pub struct Snapshot {
    view_model: &'static str,
    refreshing: bool,
    tag: Option<Tag>,
    values: Vec<(&'static str, SnapshotValue)>,
}

impl Snapshot {
    pub(crate) fn capture<T: TrxViewModel>(view_model: &T) -> Self {
        let base = view_model.base();
        let values = T::property_table()
            .descriptors()
            .iter()
            .map(|descriptor| (descriptor.name(), descriptor.capture(view_model)))
            .collect();
        Self {
            view_model: base.type_name(),
            refreshing: base.is_refreshing(),
            tag: base.tag(),
            values,
        }
    }

    /// Write every captured value back through the regular setters.
    pub(crate) fn apply<T: TrxViewModel>(&self, view_model: &T) {
        let base = view_model.base();
        base.set_refreshing(self.refreshing);
        base.set_tag(self.tag.clone());

        let table = T::property_table();
        for (name, value) in &self.values {
            match table.get(name) {
                Some(descriptor) => descriptor.restore(view_model, value),
                None => {
                    tracing::warn!(target: targets::TRX, view_model = self.view_model, property = name, "snapshot property missing from table");
                }
            }
        }
    }

    /// Type name of the view model this snapshot was taken from.
    pub fn view_model_type(&self) -> &'static str {
        self.view_model
    }

    /// Names of the captured properties.
    pub fn property_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.values.iter().map(|(name, _)| *name)
    }

    /// The captured value of `name`, if it has type `V`.
    pub fn value<V: 'static>(&self, name: &str) -> Option<&V> {
        self.values
            .iter()
            .find(|(n, _)| *n == name)
            .and_then(|(_, value)| value.downcast_ref::<V>())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("view_model", &self.view_model)
            .field("refreshing", &self.refreshing)
            .field("has_tag", &self.tag.is_some())
            .field("properties", &self.property_names().collect::<Vec<_>>())
            .finish()
    }
}
