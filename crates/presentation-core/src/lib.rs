//! Base object model for MVVM view models.
//!
//! This crate provides the building blocks a presentation layer binds to:
//!
//! - **View models**: nodes with change notification, validation errors,
//!   dirty tracking, a logical parent and an opaque tag
//! - **Transactions**: snapshot, accept and reject over whole subtrees, plus
//!   short-term `begin_edit`/`end_edit`/`cancel_edit` scopes
//! - **Child collections**: ordered lists of child view models that keep
//!   parent links and dirty flags consistent and report every mutation
//! - **Commands**: sync and async actions bound to view model types, with
//!   cached can-execute state and a busy flag for async work
//! - **Dispatcher**: a process-wide hook that marshals structural changes
//!   to the thread owning the tree
//! - **DTO mapping**: conversion between view model trees and plain records
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use presentation_core::{create, Property, PropertyChange, ViewModel, ViewModelBase};
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
//! let person = create(|base| Person { base, name: Property::default() });
//!
//! person.base().property_changed().connect(|change| {
//!     if change.affects("name") {
//!         println!("name changed");
//!     }
//! });
//!
//! let validate = |name: &Option<String>| match name {
//!     Some(n) if n.is_empty() => vec!["Name must not be empty".to_string()],
//!     _ => Vec::new(),
//! };
//! person.base().set_property_validated(&person.name, "name", Some(String::new()), validate);
//! assert!(person.base().has_errors());
//! assert!(person.base().is_dirty());
//! # let _ = PropertyChange::All;
//! ```
//!
//! # Tracing
//!
//! All diagnostics go through `tracing`. See [`logging::targets`] for the
//! per-subsystem targets.

// Lets generated code name this crate by its external path in unit tests.
extern crate self as presentation_core;

mod bindable;
mod collection;
mod command;
pub mod dispatcher;
pub mod dto;
mod error;
pub mod logging;
pub mod property;
pub mod runtime;
mod setup;
pub mod signal;
mod snapshot;
mod trx;
mod view_model;

pub use collection::{
    CollectionChangeAction, CollectionChanged, CollectionError, CollectionResult, ViewModelCollection,
};
pub use command::{
    AsyncCommand, AsyncViewModelCommand, Command, CommandError, CommandResult, SyncCommand, ViewModelCommand,
};
pub use dispatcher::{Dispatcher, InlineDispatcher};
pub use dto::{DataRecord, DtoError, DtoMapper, FieldValue, RecordRef, RecordSchema};
pub use error::{PresentationError, Result};
pub use logging::{TreeFormatOptions, TreeStyle, ViewModelTreeDebug};
pub use property::{Property, PropertyChange, PropertyKind, PropertyTable, names};
pub use runtime::{CommandRuntime, RuntimeConfig, RuntimeError, RuntimeType};
pub use setup::{Setup, register_command};
pub use signal::{ConnectionGuard, ConnectionId, Signal};
pub use snapshot::Snapshot;
pub use trx::{TransactionError, TransactionResult, Transactional, TrxViewModel};
pub use view_model::{AsAny, Tag, ViewModel, ViewModelBase, create, downcast_arc, same_node};

/// Re-exported for implementing [`AsyncViewModelCommand`].
pub use async_trait::async_trait;

static_assertions::assert_impl_all!(PresentationError: Send, Sync);
static_assertions::assert_impl_all!(DtoMapper: Send, Sync);
static_assertions::assert_impl_all!(Signal<PropertyChange>: Send, Sync);
