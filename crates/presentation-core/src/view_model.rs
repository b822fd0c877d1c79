//! View model nodes and the parent/child tree.
//!
//! Every view model embeds a [`ViewModelBase`] and implements the
//! [`ViewModel`] trait. View models are always shared through `Arc` and are
//! created with [`create`], which wires the base to its owning node, binds
//! the registered commands and, for transactional types, takes the initial
//! snapshot.
//!
//! # Tree
//!
//! A node has at most one logical parent. The parent link is a `Weak`
//! reference, so children never keep their parent alive; a dropped parent
//! reads as "no parent". Parent links are maintained by ownership operations:
//! [`ViewModelBase::set_child`] and the mutators of
//! [`ViewModelCollection`](crate::ViewModelCollection).
//!
//! # Dirty tracking
//!
//! Setting any tracked property marks the node dirty and marks its parent
//! dirty. A node that turns dirty propagates the flag to its own parent, so
//! the whole ancestor chain becomes dirty. The flag is only cleared by
//! [`ViewModelBase::set_dirty`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use presentation_core::{create, Property, ViewModel, ViewModelBase};
//!
//! struct Person {
//!     base: ViewModelBase,
//!     name: Property<Option<String>>,
//! }
//!
//! impl ViewModel for Person {
//!     fn base(&self) -> &ViewModelBase {
//!         &self.base
//!     }
//! }
//!
//! impl Person {
//!     fn new() -> Arc<Self> {
//!         create(|base| Self { base, name: Property::default() })
//!     }
//!
//!     fn set_name(&self, name: Option<String>) -> bool {
//!         self.base.set_property(&self.name, "name", name)
//!     }
//! }
//!
//! let person = Person::new();
//! assert!(!person.base().is_dirty());
//! person.set_name(Some("Raziel".into()));
//! assert!(person.base().is_dirty());
//! ```

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::RwLock;

use crate::command::Command;
use crate::logging::targets;
use crate::property::{PropertyChange, Property, names};
use crate::setup;
use crate::signal::Signal;
use crate::trx::{TrxState, Transactional};

/// An opaque value attached to a view model, compared by identity.
pub type Tag = Arc<dyn Any + Send + Sync>;

/// Properties never tracked for dirty state.
const ALWAYS_IGNORED: &[&str] = &[
    names::IS_DIRTY,
    names::IS_REFRESHING,
    names::TAG,
    names::IS_CHANGED,
    names::IS_EDITING,
];

/// Upcasting helpers so that `dyn ViewModel` can be downcast.
pub trait AsAny: Any + Send + Sync {
    /// Borrow as `dyn Any`.
    fn as_any(&self) -> &dyn Any;
    /// Convert a shared handle into `Arc<dyn Any>`.
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// The base trait for all view models.
///
/// Implementors embed a [`ViewModelBase`] and return it from [`base`].
/// `#[derive(ViewModel)]` from `presentation-macros` generates this impl.
///
/// [`base`]: ViewModel::base
pub trait ViewModel: AsAny {
    /// The embedded base holding properties, errors and signals.
    fn base(&self) -> &ViewModelBase;

    /// Additional property names that do not mark the node dirty.
    fn ignored_dirty_properties(&self) -> &'static [&'static str] {
        &[]
    }

    /// Child view models referenced by this node, for tree inspection.
    fn child_nodes(&self) -> Vec<Arc<dyn ViewModel>> {
        Vec::new()
    }

    /// Transactional view models return `Some(self)`.
    fn as_transactional(&self) -> Option<&dyn Transactional> {
        None
    }
}

impl fmt::Debug for dyn ViewModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewModel")
            .field("type", &self.base().type_name())
            .field("dirty", &self.base().is_dirty())
            .finish()
    }
}

/// Downcast a shared view model to its concrete type.
pub fn downcast_arc<T: ViewModel>(view_model: Arc<dyn ViewModel>) -> Option<Arc<T>> {
    AsAny::into_any_arc(view_model).downcast::<T>().ok()
}

/// Whether two view models are the same node.
pub fn same_node(a: &dyn ViewModel, b: &dyn ViewModel) -> bool {
    std::ptr::addr_eq(a as *const dyn ViewModel, b as *const dyn ViewModel)
}

/// Create a view model.
///
/// `build` receives the freshly created base and returns the node. After
/// construction the registered commands are bound and transactional nodes
/// take their initial snapshot.
pub fn create<T, F>(build: F) -> Arc<T>
where
    T: ViewModel,
    F: FnOnce(ViewModelBase) -> T,
{
    let view_model = Arc::new_cyclic(|me: &Weak<T>| {
        let me: Weak<dyn ViewModel> = me.clone();
        build(ViewModelBase::new(me, std::any::type_name::<T>()))
    });
    view_model.base().initialize(&view_model);
    view_model
}

/// Cached enablement of one command for one node.
pub(crate) struct CommandBinding {
    pub(crate) command: Arc<dyn Command>,
    last: AtomicBool,
}

/// State shared by every view model.
///
/// Owns the dirty, refreshing and tag properties, the parent link, the
/// validation error map, the bound commands and the notification signals.
pub struct ViewModelBase {
    me: Weak<dyn ViewModel>,
    type_name: &'static str,
    ignored: OnceLock<&'static [&'static str]>,
    parent: Property<Option<Weak<dyn ViewModel>>>,
    dirty: Property<bool>,
    refreshing: Property<bool>,
    tag: Property<Option<Tag>>,
    pub(crate) errors: RwLock<BTreeMap<Option<&'static str>, Vec<String>>>,
    pub(crate) trx: TrxState,
    commands: RwLock<Vec<Arc<CommandBinding>>>,
    pub(crate) property_changing: Signal<&'static str>,
    pub(crate) property_changed: Signal<PropertyChange>,
    pub(crate) errors_changed: Signal<Option<&'static str>>,
}

impl ViewModelBase {
    fn new(me: Weak<dyn ViewModel>, type_name: &'static str) -> Self {
        Self {
            me,
            type_name,
            ignored: OnceLock::new(),
            parent: Property::new(None),
            dirty: Property::new(false),
            refreshing: Property::new(false),
            tag: Property::new(None),
            errors: RwLock::new(BTreeMap::new()),
            trx: TrxState::new(),
            commands: RwLock::new(Vec::new()),
            property_changing: Signal::new(),
            property_changed: Signal::new(),
            errors_changed: Signal::new(),
        }
    }

    fn initialize<T: ViewModel>(&self, view_model: &Arc<T>) {
        let _ = self.ignored.set(view_model.ignored_dirty_properties());

        let commands = setup::commands_for(TypeId::of::<T>());
        let node: &dyn ViewModel = view_model.as_ref();
        let bindings = commands
            .into_iter()
            .map(|command| {
                let enabled = command.can_execute(node);
                Arc::new(CommandBinding {
                    command,
                    last: AtomicBool::new(enabled),
                })
            })
            .collect();
        *self.commands.write() = bindings;

        if let Some(transactional) = view_model.as_transactional() {
            self.trx.enable();
            transactional.accept_changes();
        }

        tracing::trace!(
            target: targets::VIEW_MODEL,
            view_model = self.type_name,
            commands = self.command_count(),
            transactional = self.trx.is_enabled(),
            "view model created"
        );
    }

    /// The concrete type name of the owning view model.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// The owning view model, if it is still alive.
    pub fn view_model(&self) -> Option<Arc<dyn ViewModel>> {
        self.me.upgrade()
    }

    pub(crate) fn weak_view_model(&self) -> Weak<dyn ViewModel> {
        self.me.clone()
    }

    // =========================================================================
    // Tree
    // =========================================================================

    /// The logical parent, or `None` if absent or already dropped.
    pub fn parent(&self) -> Option<Arc<dyn ViewModel>> {
        self.parent.with(|parent| parent.as_ref().and_then(Weak::upgrade))
    }

    /// The parent downcast to a concrete type.
    pub fn parent_as<P: ViewModel>(&self) -> Option<Arc<P>> {
        self.parent().and_then(downcast_arc::<P>)
    }

    /// Set the logical parent through the regular property path.
    ///
    /// Returns `false` if the node already had this parent.
    pub fn set_parent(&self, parent: Option<Arc<dyn ViewModel>>) -> bool {
        let parent = parent.as_ref().map(Arc::downgrade);
        self.rewire_parent(|| {
            self.write_property(
                &self.parent,
                names::PARENT,
                parent,
                |current, new| match (current.as_ref().and_then(Weak::upgrade), new.as_ref().and_then(Weak::upgrade)) {
                    (Some(a), Some(b)) => same_node(a.as_ref(), b.as_ref()),
                    (None, None) => true,
                    _ => false,
                },
                |_| Vec::new(),
                || {},
            )
        })
    }

    /// The top-most ancestor, or `None` if this node has no parent.
    ///
    /// Parent cycles are not prevented on assignment; if one is found the
    /// walk stops and `None` is returned.
    pub fn root(&self) -> Option<Arc<dyn ViewModel>> {
        let mut current = self.parent()?;
        let mut visited = HashSet::new();
        visited.insert(self as *const Self as usize);
        loop {
            if !visited.insert(current.base() as *const Self as usize) {
                tracing::warn!(target: targets::VIEW_MODEL, view_model = self.type_name, "parent cycle detected while resolving root");
                return None;
            }
            match current.base().parent() {
                Some(parent) => current = parent,
                None => return Some(current),
            }
        }
    }

    /// The root downcast to a concrete type.
    pub fn root_as<R: ViewModel>(&self) -> Option<Arc<R>> {
        self.root().and_then(downcast_arc::<R>)
    }

    // =========================================================================
    // Flags
    // =========================================================================

    /// Whether any tracked property changed since the flag was last cleared.
    pub fn is_dirty(&self) -> bool {
        self.dirty.get()
    }

    /// Set the dirty flag. Turning a node dirty also dirties its parent.
    pub fn set_dirty(&self, dirty: bool) -> bool {
        let changed = self.write_property(&self.dirty, names::IS_DIRTY, dirty, |a, b| a == b, |_| Vec::new(), || {});
        if changed && dirty {
            if let Some(parent) = self.parent() {
                parent.base().set_dirty(true);
            }
        }
        changed
    }

    /// Caller-managed refresh flag.
    pub fn is_refreshing(&self) -> bool {
        self.refreshing.get()
    }

    pub fn set_refreshing(&self, refreshing: bool) -> bool {
        self.set_property(&self.refreshing, names::IS_REFRESHING, refreshing)
    }

    /// The opaque tag.
    pub fn tag(&self) -> Option<Tag> {
        self.tag.get()
    }

    pub fn set_tag(&self, tag: Option<Tag>) -> bool {
        self.write_property(
            &self.tag,
            names::TAG,
            tag,
            |a, b| match (a, b) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            },
            |_| Vec::new(),
            || {},
        )
    }

    pub(crate) fn track_dirty(&self, name: &'static str) {
        if ALWAYS_IGNORED.contains(&name) {
            return;
        }
        if self.ignored.get().is_some_and(|ignored| ignored.contains(&name)) {
            return;
        }
        self.set_dirty(true);
        if let Some(parent) = self.parent() {
            parent.base().set_dirty(true);
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// The command of type `C` bound to this node.
    pub fn command<C: 'static>(&self) -> Option<Arc<dyn Command>> {
        let kind = TypeId::of::<C>();
        self.commands
            .read()
            .iter()
            .find(|binding| binding.command.command_type() == kind)
            .map(|binding| binding.command.clone())
    }

    /// Every command bound to this node, in registration order.
    pub fn commands(&self) -> Vec<Arc<dyn Command>> {
        self.commands.read().iter().map(|binding| binding.command.clone()).collect()
    }

    pub fn command_count(&self) -> usize {
        self.commands.read().len()
    }

    /// Re-evaluate every bound command, raising enablement changes for the
    /// ones whose result differs from the last observed value.
    pub(crate) fn update_commands(&self) {
        let bindings: Vec<Arc<CommandBinding>> = self.commands.read().clone();
        if bindings.is_empty() {
            return;
        }
        let Some(node) = self.view_model() else {
            return;
        };
        for binding in bindings {
            let enabled = binding.command.can_execute(node.as_ref());
            if binding.last.swap(enabled, Ordering::SeqCst) != enabled {
                binding.command.raise_can_execute_changed();
            }
        }
    }

    /// Record the current enablement of `command_type` without raising.
    pub(crate) fn refresh_command_state(&self, command_type: TypeId) {
        let Some(node) = self.view_model() else {
            return;
        };
        let binding = self
            .commands
            .read()
            .iter()
            .find(|binding| binding.command.command_type() == command_type)
            .cloned();
        if let Some(binding) = binding {
            let enabled = binding.command.can_execute(node.as_ref());
            binding.last.store(enabled, Ordering::SeqCst);
        }
    }

    // =========================================================================
    // Signals
    // =========================================================================

    /// Emitted with the property name before a property is written.
    pub fn property_changing(&self) -> &Signal<&'static str> {
        &self.property_changing
    }

    /// Emitted after a property changed.
    pub fn property_changed(&self) -> &Signal<PropertyChange> {
        &self.property_changed
    }

    /// Emitted with the error key after the error map changed.
    pub fn errors_changed(&self) -> &Signal<Option<&'static str>> {
        &self.errors_changed
    }
}

impl fmt::Debug for ViewModelBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewModelBase")
            .field("type_name", &self.type_name)
            .field("dirty", &self.is_dirty())
            .field("refreshing", &self.is_refreshing())
            .field("has_parent", &self.parent().is_some())
            .field("errors", &*self.errors.read())
            .finish()
    }
}

static_assertions::assert_impl_all!(ViewModelBase: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Node {
        base: ViewModelBase,
        name: Property<Option<String>>,
        fun_level: Property<i32>,
        child: Property<Option<Arc<Node>>>,
    }

    impl ViewModel for Node {
        fn base(&self) -> &ViewModelBase {
            &self.base
        }

        fn ignored_dirty_properties(&self) -> &'static [&'static str] {
            &["fun_level"]
        }
    }

    impl Node {
        fn new() -> Arc<Self> {
            create(|base| Self {
                base,
                name: Property::default(),
                fun_level: Property::default(),
                child: Property::default(),
            })
        }

        fn set_name(&self, name: &str) -> bool {
            self.base.set_property(&self.name, "name", Some(name.to_string()))
        }

        fn set_fun_level(&self, level: i32) -> bool {
            self.base.set_property(&self.fun_level, "fun_level", level)
        }

        fn set_child(&self, child: Option<Arc<Node>>) -> bool {
            self.base.set_child(&self.child, "child", child)
        }
    }

    #[test]
    fn test_new_node_is_clean() {
        let node = Node::new();
        assert!(!node.base().is_dirty());
        assert!(!node.base().is_refreshing());
        assert!(node.base().parent().is_none());
        assert!(node.base().root().is_none());
        assert!(node.base().tag().is_none());
        assert!(node.base().type_name().ends_with("Node"));
    }

    #[test]
    fn test_tracked_property_marks_dirty() {
        let node = Node::new();
        assert!(node.set_name("Kain"));
        assert!(node.base().is_dirty());
        assert!(!node.set_name("Kain"));
    }

    #[test]
    fn test_ignored_property_keeps_clean() {
        let node = Node::new();
        assert!(node.set_fun_level(3));
        assert!(!node.base().is_dirty());

        node.base().set_refreshing(true);
        node.base().set_tag(Some(Arc::new(5_u8)));
        assert!(!node.base().is_dirty());
    }

    #[test]
    fn test_child_reparenting() {
        let parent = Node::new();
        let first = Node::new();
        let second = Node::new();

        parent.set_child(Some(first.clone()));
        let first_parent = first.base().parent_as::<Node>().unwrap();
        assert!(Arc::ptr_eq(&first_parent, &parent));

        parent.set_child(Some(second.clone()));
        assert!(first.base().parent().is_none());
        assert!(second.base().parent().is_some());

        parent.set_child(None);
        assert!(second.base().parent().is_none());
    }

    #[test]
    fn test_dirty_bubbles_to_root() {
        let root = Node::new();
        let middle = Node::new();
        let leaf = Node::new();
        root.set_child(Some(middle.clone()));
        middle.set_child(Some(leaf.clone()));

        root.base().set_dirty(false);
        middle.base().set_dirty(false);
        leaf.base().set_dirty(false);

        leaf.set_name("Dumah");
        assert!(leaf.base().is_dirty());
        assert!(middle.base().is_dirty());
        assert!(root.base().is_dirty());

        let resolved = leaf.base().root_as::<Node>().unwrap();
        assert!(Arc::ptr_eq(&resolved, &root));
    }

    #[test]
    fn test_dropped_parent_reads_as_absent() {
        let child = Node::new();
        {
            let parent = Node::new();
            parent.set_child(Some(child.clone()));
            assert!(child.base().parent().is_some());
        }
        assert!(child.base().parent().is_none());
    }

    #[test]
    fn test_root_stops_on_cycle() {
        let a = Node::new();
        let b = Node::new();
        a.base().set_parent(Some(b.clone() as Arc<dyn ViewModel>));
        b.base().set_parent(Some(a.clone() as Arc<dyn ViewModel>));
        assert!(a.base().root().is_none());
    }

    #[test]
    fn test_changing_and_changed_order() {
        let node = Node::new();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let changing_log = log.clone();
        node.base().property_changing().connect(move |name| {
            changing_log.lock().push(format!("changing:{name}"));
        });
        let changed_log = log.clone();
        node.base().property_changed().connect(move |change| {
            changed_log.lock().push(format!("changed:{}", change.name().unwrap_or("*")));
        });

        node.set_name("Rahab");

        let log = log.lock();
        assert_eq!(log[0], "changing:name");
        assert!(log.contains(&"changed:is_dirty".to_string()));
        assert_eq!(log.last().map(String::as_str), Some("changed:name"));
    }

    #[test]
    fn test_equal_value_raises_nothing() {
        let node = Node::new();
        node.set_name("Zephon");

        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        node.base().property_changed().connect(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!node.set_name("Zephon"));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_tag_compared_by_identity() {
        let node = Node::new();
        let tag: Tag = Arc::new(String::from("marker"));
        assert!(node.base().set_tag(Some(tag.clone())));
        assert!(!node.base().set_tag(Some(tag.clone())));
        assert!(node.base().set_tag(Some(Arc::new(String::from("marker")))));
    }
}
