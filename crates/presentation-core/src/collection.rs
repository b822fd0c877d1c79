//! Observable collections of child view models.
//!
//! A [`ViewModelCollection`] is owned by exactly one view model and keeps the
//! parent link of its elements pointing at that owner. Every structural
//! mutation runs through the [dispatcher](crate::dispatcher), marks the owner
//! dirty and emits [`CollectionChanged`] on
//! [`collection_changed`](ViewModelCollection::collection_changed).
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use presentation_core::{create, ViewModel, ViewModelBase, ViewModelCollection};
//!
//! struct Clan {
//!     base: ViewModelBase,
//!     members: ViewModelCollection<Member>,
//! }
//!
//! struct Member {
//!     base: ViewModelBase,
//! }
//!
//! impl ViewModel for Clan {
//!     fn base(&self) -> &ViewModelBase { &self.base }
//! }
//!
//! impl ViewModel for Member {
//!     fn base(&self) -> &ViewModelBase { &self.base }
//! }
//!
//! let clan = create(|base| {
//!     let members = ViewModelCollection::new(&base);
//!     Clan { base, members }
//! });
//! let member = create(|base| Member { base });
//!
//! clan.members.add(member.clone());
//! assert!(member.base().parent().is_some());
//! assert!(clan.base().is_dirty());
//! ```

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::dispatcher;
use crate::logging::targets;
use crate::property::PropertyChange;
use crate::signal::{ConnectionId, Signal};
use crate::view_model::{ViewModel, ViewModelBase};

/// Errors raised by collection mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CollectionError {
    /// The index is not within the collection.
    #[error("index {index} is out of range for a collection of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// The installed dispatcher returned without running the mutation.
    #[error("the dispatcher did not run the collection mutation")]
    NotDispatched,
}

/// Result type for collection operations.
pub type CollectionResult<T> = std::result::Result<T, CollectionError>;

/// The kind of structural change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionChangeAction {
    /// Items were inserted at `new_start`.
    Add,
    /// Items were removed from `old_start`.
    Remove,
    /// The contents changed drastically.
    Reset,
}

/// Payload of a collection-changed notification.
pub struct CollectionChanged<C> {
    pub action: CollectionChangeAction,
    pub old_start: Option<usize>,
    pub new_start: Option<usize>,
    pub old_items: Option<Vec<Arc<C>>>,
    pub new_items: Option<Vec<Arc<C>>>,
}

impl<C> CollectionChanged<C> {
    fn added(start: usize, items: Vec<Arc<C>>) -> Self {
        Self {
            action: CollectionChangeAction::Add,
            old_start: None,
            new_start: Some(start),
            old_items: None,
            new_items: Some(items),
        }
    }

    fn removed(start: usize, items: Vec<Arc<C>>) -> Self {
        Self {
            action: CollectionChangeAction::Remove,
            old_start: Some(start),
            new_start: None,
            old_items: Some(items),
            new_items: None,
        }
    }

    fn reset() -> Self {
        Self {
            action: CollectionChangeAction::Reset,
            old_start: None,
            new_start: None,
            old_items: None,
            new_items: None,
        }
    }
}

impl<C> Clone for CollectionChanged<C> {
    fn clone(&self) -> Self {
        Self {
            action: self.action,
            old_start: self.old_start,
            new_start: self.new_start,
            old_items: self.old_items.clone(),
            new_items: self.new_items.clone(),
        }
    }
}

impl<C> fmt::Debug for CollectionChanged<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionChanged")
            .field("action", &self.action)
            .field("old_start", &self.old_start)
            .field("new_start", &self.new_start)
            .field("old_items", &self.old_items.as_ref().map(Vec::len))
            .field("new_items", &self.new_items.as_ref().map(Vec::len))
            .finish()
    }
}

type ObserverCallback = Arc<dyn Fn(&'static str) + Send + Sync>;

#[derive(Clone)]
struct Observer {
    names: Vec<&'static str>,
    callback: ObserverCallback,
}

/// An element property subscription.
struct Subscription<C> {
    key: usize,
    element: Weak<C>,
    id: ConnectionId,
}

/// The outcome of one structural step.
struct Mutation<C> {
    removed: Vec<Arc<C>>,
    added: Vec<Arc<C>>,
    events: Vec<CollectionChanged<C>>,
}

impl<C> Mutation<C> {
    fn none() -> Self {
        Self {
            removed: Vec::new(),
            added: Vec::new(),
            events: Vec::new(),
        }
    }
}

fn key_of<C>(item: &Arc<C>) -> usize {
    Arc::as_ptr(item) as *const () as usize
}

/// An ordered collection of child view models owned by one view model.
pub struct ViewModelCollection<C: ViewModel> {
    owner: Weak<dyn ViewModel>,
    items: RwLock<Vec<Arc<C>>>,
    collection_changed: Signal<CollectionChanged<C>>,
    observers: Arc<RwLock<Vec<Observer>>>,
    subscriptions: Mutex<Vec<Subscription<C>>>,
}

impl<C: ViewModel> ViewModelCollection<C> {
    /// Create an empty collection owned by the view model of `owner`.
    ///
    /// Call this inside the [`create`](crate::create) closure, before the
    /// base is moved into the view model.
    pub fn new(owner: &ViewModelBase) -> Self {
        Self {
            owner: owner.weak_view_model(),
            items: RwLock::new(Vec::new()),
            collection_changed: Signal::new(),
            observers: Arc::new(RwLock::new(Vec::new())),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// The owning view model, if it is still alive.
    pub fn owner(&self) -> Option<Arc<dyn ViewModel>> {
        self.owner.upgrade()
    }

    /// Emitted after every structural change.
    pub fn collection_changed(&self) -> &Signal<CollectionChanged<C>> {
        &self.collection_changed
    }

    // =========================================================================
    // Reading
    // =========================================================================

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Arc<C>> {
        self.items.read().get(index).cloned()
    }

    pub fn first(&self) -> Option<Arc<C>> {
        self.items.read().first().cloned()
    }

    pub fn last(&self) -> Option<Arc<C>> {
        self.items.read().last().cloned()
    }

    /// A copy of the current elements.
    pub fn to_vec(&self) -> Vec<Arc<C>> {
        self.items.read().clone()
    }

    /// Whether `item` is an element, by identity.
    pub fn contains(&self, item: &Arc<C>) -> bool {
        self.items.read().iter().any(|i| Arc::ptr_eq(i, item))
    }

    /// The first index of `item`, by identity.
    pub fn index_of(&self, item: &Arc<C>) -> Option<usize> {
        self.items.read().iter().position(|i| Arc::ptr_eq(i, item))
    }

    /// Iterate over a snapshot of the elements.
    pub fn iter(&self) -> std::vec::IntoIter<Arc<C>> {
        self.to_vec().into_iter()
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Append one element.
    pub fn add(&self, item: Arc<C>) {
        self.mutate("add", |items| {
            let start = items.len();
            items.push(item.clone());
            ((), Mutation {
                removed: Vec::new(),
                added: vec![item.clone()],
                events: vec![CollectionChanged::added(start, vec![item])],
            })
        });
    }

    /// Append several elements with a single notification.
    pub fn add_range<I>(&self, items: I)
    where
        I: IntoIterator<Item = Arc<C>>,
    {
        let new_items: Vec<Arc<C>> = items.into_iter().collect();
        if new_items.is_empty() {
            return;
        }
        self.mutate("add_range", |items| {
            let start = items.len();
            items.extend(new_items.iter().cloned());
            ((), Mutation {
                removed: Vec::new(),
                added: new_items.clone(),
                events: vec![CollectionChanged::added(start, new_items)],
            })
        });
    }

    /// Insert an element at `index`.
    pub fn insert(&self, index: usize, item: Arc<C>) -> CollectionResult<()> {
        self.mutate("insert", |items| {
            if index > items.len() {
                return (
                    Err(CollectionError::IndexOutOfRange { index, len: items.len() }),
                    Mutation::none(),
                );
            }
            items.insert(index, item.clone());
            (Ok(()), Mutation {
                removed: Vec::new(),
                added: vec![item.clone()],
                events: vec![CollectionChanged::added(index, vec![item])],
            })
        })
        .unwrap_or(Err(CollectionError::NotDispatched))
    }

    /// Remove and return the element at `index`.
    pub fn remove_at(&self, index: usize) -> CollectionResult<Arc<C>> {
        self.mutate("remove_at", |items| {
            if index >= items.len() {
                return (
                    Err(CollectionError::IndexOutOfRange { index, len: items.len() }),
                    Mutation::none(),
                );
            }
            let item = items.remove(index);
            (Ok(item.clone()), Mutation {
                removed: vec![item.clone()],
                added: Vec::new(),
                events: vec![CollectionChanged::removed(index, vec![item])],
            })
        })
        .unwrap_or(Err(CollectionError::NotDispatched))
    }

    /// Remove the first occurrence of `item`. Returns `false` if absent.
    pub fn remove(&self, item: &Arc<C>) -> bool {
        self.mutate("remove", |items| match items.iter().position(|i| Arc::ptr_eq(i, item)) {
            Some(index) => {
                let item = items.remove(index);
                (true, Mutation {
                    removed: vec![item.clone()],
                    added: Vec::new(),
                    events: vec![CollectionChanged::removed(index, vec![item])],
                })
            }
            None => (false, Mutation::none()),
        })
        .unwrap_or(false)
    }

    /// Replace every element.
    ///
    /// Emits a `Remove` for the old elements (if any) followed by an `Add`
    /// for the new ones.
    pub fn replace_all<I>(&self, items: I)
    where
        I: IntoIterator<Item = Arc<C>>,
    {
        let new_items: Vec<Arc<C>> = items.into_iter().collect();
        self.mutate("replace_all", |items| {
            let old_items = std::mem::replace(items, new_items.clone());
            let mut events = Vec::with_capacity(2);
            if !old_items.is_empty() {
                events.push(CollectionChanged::removed(0, old_items.clone()));
            }
            if !new_items.is_empty() {
                events.push(CollectionChanged::added(0, new_items.clone()));
            }
            ((), Mutation {
                removed: old_items,
                added: new_items,
                events,
            })
        });
    }

    /// Remove every element with a single `Reset` notification.
    pub fn clear(&self) {
        self.mutate("clear", |items| {
            let removed = std::mem::take(items);
            ((), Mutation {
                removed,
                added: Vec::new(),
                events: vec![CollectionChanged::reset()],
            })
        });
    }

    /// Restore snapshotted contents in place and re-parent every element to
    /// the owner.
    ///
    /// `Reset` is emitted only if the contents differ by identity.
    pub(crate) fn restore(&self, snapshot: Vec<Arc<C>>) {
        let unchanged = {
            let items = self.items.read();
            items.len() == snapshot.len() && items.iter().zip(&snapshot).all(|(a, b)| Arc::ptr_eq(a, b))
        };
        if unchanged {
            let owner = self.owner.upgrade();
            let reparented = dispatcher::dispatch(|| {
                for item in &snapshot {
                    item.base().set_parent(owner.clone());
                }
            });
            if reparented.is_none() {
                tracing::warn!(target: targets::COLLECTION, operation = "restore", "collection mutation was not dispatched");
            }
            return;
        }
        self.mutate("restore", |items| {
            let removed = std::mem::replace(items, snapshot.clone());
            ((), Mutation {
                removed,
                added: snapshot,
                events: vec![CollectionChanged::reset()],
            })
        });
    }

    /// Apply `step` to the elements through the dispatcher, then update
    /// parents, subscriptions and the owner's dirty flag and emit the events.
    fn mutate<R, F>(&self, operation: &'static str, step: F) -> Option<R>
    where
        F: FnOnce(&mut Vec<Arc<C>>) -> (R, Mutation<C>) + Send,
        R: Send,
    {
        let result = dispatcher::dispatch(|| {
            let (result, mutation) = {
                let mut items = self.items.write();
                step(&mut items)
            };
            if !mutation.events.is_empty() {
                self.finish(mutation);
            }
            result
        });
        if result.is_none() {
            tracing::warn!(target: targets::COLLECTION, operation, "collection mutation was not dispatched");
        }
        result
    }

    fn finish(&self, mutation: Mutation<C>) {
        let Mutation { removed, added, events } = mutation;
        tracing::trace!(
            target: targets::COLLECTION,
            removed = removed.len(),
            added = added.len(),
            events = events.len(),
            "collection changed"
        );

        for item in &removed {
            if !self.contains(item) {
                self.unsubscribe(item);
                item.base().set_parent(None);
            }
        }

        let owner = self.owner.upgrade();
        for item in &added {
            self.subscribe(item);
            item.base().set_parent(owner.clone());
        }

        if let Some(owner) = &owner {
            owner.base().set_dirty(true);
        }

        for event in events {
            self.collection_changed.emit(event);
        }
    }

    // =========================================================================
    // Element observation
    // =========================================================================

    /// Call `callback` whenever one of `names` changes on any element.
    ///
    /// Once any observer is registered, every element property change also
    /// marks the owner dirty.
    pub fn observe<F>(&self, names: &[&'static str], callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.observe_named(names, move |_| callback());
    }

    /// Like [`observe`](Self::observe), passing the changed property name.
    pub fn observe_named<F>(&self, names: &[&'static str], callback: F)
    where
        F: Fn(&'static str) + Send + Sync + 'static,
    {
        self.observers.write().push(Observer {
            names: names.to_vec(),
            callback: Arc::new(callback),
        });
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    fn subscribe(&self, item: &Arc<C>) {
        let key = key_of(item);
        let mut subscriptions = self.subscriptions.lock();
        if subscriptions.iter().any(|s| s.key == key) {
            return;
        }

        let observers = Arc::clone(&self.observers);
        let owner = self.owner.clone();
        let id = item.base().property_changed().connect(move |change: &PropertyChange| {
            let observers: Vec<Observer> = observers.read().clone();
            if observers.is_empty() {
                return;
            }
            if let Some(owner) = owner.upgrade() {
                owner.base().set_dirty(true);
            }
            if let PropertyChange::Named(name) = *change {
                for observer in observers.iter().filter(|o| o.names.contains(&name)) {
                    (observer.callback)(name);
                }
            }
        });

        subscriptions.push(Subscription {
            key,
            element: Arc::downgrade(item),
            id,
        });
    }

    fn unsubscribe(&self, item: &Arc<C>) {
        let key = key_of(item);
        let removed = {
            let mut subscriptions = self.subscriptions.lock();
            subscriptions
                .iter()
                .position(|s| s.key == key)
                .map(|index| subscriptions.swap_remove(index))
        };
        if let Some(subscription) = removed {
            item.base().property_changed().disconnect(subscription.id);
        }
    }
}

impl<C: ViewModel> Drop for ViewModelCollection<C> {
    fn drop(&mut self) {
        for subscription in self.subscriptions.get_mut().drain(..) {
            if let Some(element) = subscription.element.upgrade() {
                element.base().property_changed().disconnect(subscription.id);
            }
        }
    }
}

impl<C: ViewModel> fmt::Debug for ViewModelCollection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewModelCollection")
            .field("element_type", &std::any::type_name::<C>())
            .field("len", &self.len())
            .field("observers", &self.observer_count())
            .finish()
    }
}
