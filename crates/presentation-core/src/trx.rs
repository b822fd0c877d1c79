//! Transactional view models.
//!
//! A transactional view model keeps a [`Snapshot`] of its declared
//! properties and can roll back to it. There are two layers:
//!
//! - long-term: [`accept_changes`](Transactional::accept_changes) takes a new
//!   baseline, [`reject_changes`](Transactional::reject_changes) restores it;
//! - short-term: [`begin_edit`](Transactional::begin_edit) opens an edit,
//!   [`end_edit`](Transactional::end_edit) commits it and
//!   [`cancel_edit`](Transactional::cancel_edit) reverts it.
//!
//! Both operations recurse through transactional child nodes and the
//! elements of child collections. Accepting runs top-down; rejecting runs
//! bottom-up, so a child is restored to its own baseline before its owner
//! restores the child references.
//!
//! `is_changed` turns on after any property-changed notification, except for
//! `is_changed` and `is_dirty` themselves and while the node (or its
//! transactional parent) is rejecting. Opening an edit therefore marks the
//! node changed. A node dropped by a rejecting parent stays unchanged even
//! though the parent link is already gone when `parent` is notified.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::logging::targets;
use crate::property::{Property, PropertyChange, PropertyTable, names};
use crate::snapshot::Snapshot;
use crate::view_model::{ViewModel, ViewModelBase};

/// Errors raised by out-of-order transaction calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransactionError {
    /// `begin_edit` was called while an edit is already open.
    #[error("cannot begin an edit while another is open; end or cancel it first")]
    AlreadyEditing,

    /// `end_edit` or `cancel_edit` was called with no open edit.
    #[error("no edit is open; call begin_edit first")]
    NotEditing,

    /// There is no snapshot to roll back to.
    #[error("there is no snapshot to roll back to")]
    NoSnapshot,
}

/// Result type for transaction operations.
pub type TransactionResult<T> = std::result::Result<T, TransactionError>;

/// Transaction bookkeeping stored in every [`ViewModelBase`].
///
/// Inert unless the owning view model is transactional.
pub(crate) struct TrxState {
    enabled: AtomicBool,
    editing: Property<bool>,
    changed: Property<bool>,
    rejecting: AtomicBool,
    /// Set while a rejecting parent releases this node.
    released: AtomicBool,
    snapshot: Mutex<Option<Arc<Snapshot>>>,
}

impl TrxState {
    pub(crate) fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            editing: Property::new(false),
            changed: Property::new(false),
            rejecting: AtomicBool::new(false),
            released: AtomicBool::new(false),
            snapshot: Mutex::new(None),
        }
    }

    pub(crate) fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

/// Raises a flag and restores its previous value on every exit path.
struct FlagGuard<'a> {
    flag: &'a AtomicBool,
    previous: bool,
}

impl<'a> FlagGuard<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        let previous = flag.swap(true, Ordering::SeqCst);
        Self { flag, previous }
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(self.previous, Ordering::SeqCst);
    }
}

impl ViewModelBase {
    pub(crate) fn trx_editing(&self) -> bool {
        self.trx.editing.get()
    }

    pub(crate) fn trx_changed(&self) -> bool {
        self.trx.changed.get()
    }

    pub(crate) fn trx_rejecting(&self) -> bool {
        self.trx.rejecting.load(Ordering::SeqCst)
    }

    fn set_editing(&self, editing: bool) -> bool {
        self.write_property(&self.trx.editing, names::IS_EDITING, editing, |a, b| a == b, |_| Vec::new(), || {})
    }

    fn set_changed(&self, changed: bool) -> bool {
        self.write_property(&self.trx.changed, names::IS_CHANGED, changed, |a, b| a == b, |_| Vec::new(), || {})
    }

    /// Flip `is_changed` after a property-changed notification.
    pub(crate) fn mark_changed_after(&self, change: PropertyChange) {
        if !self.trx.is_enabled() {
            return;
        }
        if let PropertyChange::Named(name) = change {
            if name == names::IS_CHANGED || name == names::IS_DIRTY {
                return;
            }
        }
        if self.trx_rejecting() || self.trx.released.load(Ordering::SeqCst) || self.parent_rejecting() {
            return;
        }
        self.set_changed(true);
    }

    fn parent_rejecting(&self) -> bool {
        self.parent()
            .is_some_and(|parent| parent.as_transactional().is_some_and(|trx| trx.is_rejecting_changes()))
    }

    /// Run `rewire` with change tracking held off if the current parent is
    /// rejecting. `rewire` replaces the parent link, so the check cannot wait
    /// for the `parent` notification.
    pub(crate) fn rewire_parent<R>(&self, rewire: impl FnOnce() -> R) -> R {
        let _released = self.parent_rejecting().then(|| FlagGuard::raise(&self.trx.released));
        rewire()
    }

    /// The snapshot the next rollback restores.
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.trx.snapshot.lock().clone()
    }
}

/// Object-safe transaction operations.
///
/// Implemented for every [`TrxViewModel`]; reach it from a `dyn ViewModel`
/// through [`ViewModel::as_transactional`].
pub trait Transactional {
    /// Take a new baseline and open a short-term edit.
    fn begin_edit(&self) -> TransactionResult<()>;

    /// Commit the open edit.
    fn end_edit(&self) -> TransactionResult<()>;

    /// Revert to the state at `begin_edit`.
    fn cancel_edit(&self) -> TransactionResult<()>;

    /// Take a new baseline for this node and its transactional children.
    fn accept_changes(&self);

    /// Restore the last baseline for this node and its transactional
    /// children.
    fn reject_changes(&self) -> TransactionResult<()>;

    fn is_editing(&self) -> bool;

    fn is_changed(&self) -> bool;

    /// Whether a rollback of this node is in progress.
    fn is_rejecting_changes(&self) -> bool;
}

/// A view model with a declared property table.
///
/// `#[derive(ViewModel)]` with `#[view_model(transactional)]` implements this
/// trait and [`ViewModel::as_transactional`].
pub trait TrxViewModel: ViewModel + Sized {
    /// The properties captured by snapshots, in restore order.
    fn property_table() -> &'static PropertyTable<Self>;
}

impl<T: TrxViewModel> Transactional for T {
    #[tracing::instrument(skip_all, target = "presentation_core::trx", level = "debug", fields(view_model = self.base().type_name()))]
    fn begin_edit(&self) -> TransactionResult<()> {
        if self.base().trx_editing() {
            tracing::warn!(target: targets::TRX, view_model = self.base().type_name(), "begin_edit while already editing");
            return Err(TransactionError::AlreadyEditing);
        }
        self.accept_changes();
        self.base().set_editing(true);
        Ok(())
    }

    #[tracing::instrument(skip_all, target = "presentation_core::trx", level = "debug", fields(view_model = self.base().type_name()))]
    fn end_edit(&self) -> TransactionResult<()> {
        if !self.base().trx_editing() {
            tracing::warn!(target: targets::TRX, view_model = self.base().type_name(), "end_edit without begin_edit");
            return Err(TransactionError::NotEditing);
        }
        self.accept_changes();
        Ok(())
    }

    #[tracing::instrument(skip_all, target = "presentation_core::trx", level = "debug", fields(view_model = self.base().type_name()))]
    fn cancel_edit(&self) -> TransactionResult<()> {
        if !self.base().trx_editing() {
            tracing::warn!(target: targets::TRX, view_model = self.base().type_name(), "cancel_edit without begin_edit");
            return Err(TransactionError::NotEditing);
        }
        self.reject_changes()
    }

    #[tracing::instrument(skip_all, target = "presentation_core::trx", level = "debug", fields(view_model = self.base().type_name()))]
    fn accept_changes(&self) {
        let base = self.base();
        base.trx.enable();

        let snapshot = Snapshot::capture(self);
        tracing::trace!(target: targets::TRX, properties = snapshot.len(), "snapshot captured");
        *base.trx.snapshot.lock() = Some(Arc::new(snapshot));

        for child in T::property_table().child_nodes(self) {
            if let Some(trx) = child.as_transactional() {
                trx.accept_changes();
            }
        }

        base.set_editing(false);
        base.set_changed(false);
    }

    #[tracing::instrument(skip_all, target = "presentation_core::trx", level = "debug", fields(view_model = self.base().type_name()))]
    fn reject_changes(&self) -> TransactionResult<()> {
        let base = self.base();
        let Some(snapshot) = base.snapshot() else {
            tracing::warn!(target: targets::TRX, view_model = base.type_name(), "reject_changes without a snapshot");
            return Err(TransactionError::NoSnapshot);
        };

        let _guard = FlagGuard::raise(&base.trx.rejecting);

        for child in T::property_table().child_nodes(self) {
            if let Some(trx) = child.as_transactional() {
                trx.reject_changes()?;
            }
        }

        snapshot.apply(self);
        base.raise_all_properties_changed();

        base.set_editing(false);
        base.set_changed(false);
        Ok(())
    }

    fn is_editing(&self) -> bool {
        self.base().trx_editing()
    }

    fn is_changed(&self) -> bool {
        self.base().trx_changed()
    }

    fn is_rejecting_changes(&self) -> bool {
        self.base().trx_rejecting()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view_model::create;
    use std::sync::OnceLock;

    struct Account {
        base: ViewModelBase,
        owner: Property<Option<String>>,
        balance: Property<i64>,
    }

    impl ViewModel for Account {
        fn base(&self) -> &ViewModelBase {
            &self.base
        }

        fn as_transactional(&self) -> Option<&dyn Transactional> {
            Some(self)
        }
    }

    impl TrxViewModel for Account {
        fn property_table() -> &'static PropertyTable<Self> {
            static TABLE: OnceLock<PropertyTable<Account>> = OnceLock::new();
            TABLE.get_or_init(|| {
                PropertyTable::builder()
                    .value("owner", |a: &Account| &a.owner)
                    .value("balance", |a: &Account| &a.balance)
                    .build()
            })
        }
    }

    fn setup() -> Arc<Account> {
        create(|base| Account {
            base,
            owner: Property::default(),
            balance: Property::default(),
        })
    }

    impl Account {
        fn set_owner(&self, owner: &str) {
            self.base.set_property(&self.owner, "owner", Some(owner.to_string()));
        }

        fn set_balance(&self, balance: i64) {
            self.base.set_property(&self.balance, "balance", balance);
        }
    }

    #[test]
    fn test_new_node_is_clean_and_not_editing() {
        let account = setup();
        assert!(!account.is_changed());
        assert!(!account.is_editing());
        assert!(account.base().snapshot().is_some());
        assert!(account.reject_changes().is_ok());
        assert!(!account.is_changed());
    }

    #[test]
    fn test_reject_restores_values() {
        let account = setup();
        account.set_owner("Vorador");
        account.set_balance(120);
        assert!(account.is_changed());

        account.reject_changes().unwrap();
        assert_eq!(account.owner.get(), None);
        assert_eq!(account.balance.get(), 0);
        assert!(!account.is_changed());
        assert!(account.base().is_dirty());
    }

    #[test]
    fn test_reject_is_repeatable() {
        let account = setup();
        account.set_balance(7);
        account.accept_changes();

        account.set_balance(8);
        account.reject_changes().unwrap();
        account.set_balance(9);
        account.reject_changes().unwrap();
        assert_eq!(account.balance.get(), 7);
    }

    #[test]
    fn test_edit_ordering_errors() {
        let account = setup();
        assert_eq!(account.end_edit(), Err(TransactionError::NotEditing));
        assert_eq!(account.cancel_edit(), Err(TransactionError::NotEditing));

        account.begin_edit().unwrap();
        assert!(account.is_editing());
        assert!(account.is_changed());
        assert_eq!(account.begin_edit(), Err(TransactionError::AlreadyEditing));

        account.end_edit().unwrap();
        assert!(!account.is_editing());
        assert!(!account.is_changed());
    }

    #[test]
    fn test_cancel_edit_reverts_to_begin() {
        let account = setup();
        account.set_owner("Janos");
        account.begin_edit().unwrap();
        account.set_owner("Moebius");

        account.cancel_edit().unwrap();
        assert_eq!(account.owner.get().as_deref(), Some("Janos"));
        assert!(!account.is_editing());
        assert!(!account.is_changed());
    }

    #[test]
    fn test_rejecting_flag_cleared_after_reject() {
        let account = setup();
        account.set_balance(1);
        account.reject_changes().unwrap();
        assert!(!account.is_rejecting_changes());
    }

    #[test]
    fn test_reject_without_snapshot() {
        struct Detached {
            base: ViewModelBase,
        }

        impl ViewModel for Detached {
            fn base(&self) -> &ViewModelBase {
                &self.base
            }
        }

        impl TrxViewModel for Detached {
            fn property_table() -> &'static PropertyTable<Self> {
                static TABLE: OnceLock<PropertyTable<Detached>> = OnceLock::new();
                TABLE.get_or_init(|| PropertyTable::builder().build())
            }
        }

        let detached = create(|base| Detached { base });
        assert_eq!(detached.reject_changes(), Err(TransactionError::NoSnapshot));
    }
}
