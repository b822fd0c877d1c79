//! The process-wide marshaling hook.
//!
//! Structural collection mutations and command enablement notifications are
//! routed through [`dispatch`]. With no [`Dispatcher`] installed the action
//! runs inline on the calling thread. A UI integration installs a dispatcher
//! that runs the action on its owner thread and waits for it.
//!
//! # Contract
//!
//! [`Dispatcher::dispatch`] must have run the action exactly once by the time
//! it returns.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::logging::targets;

/// Runs actions on the thread that owns the view-model tree.
pub trait Dispatcher: Send + Sync {
    /// Run `action` to completion before returning.
    fn dispatch(&self, action: &mut (dyn FnMut() + Send));
}

/// A dispatcher that runs every action on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn dispatch(&self, action: &mut (dyn FnMut() + Send)) {
        action();
    }
}

static DISPATCHER: RwLock<Option<Arc<dyn Dispatcher>>> = RwLock::new(None);

/// Install the process-wide dispatcher, replacing any previous one.
pub fn set_dispatcher(dispatcher: Arc<dyn Dispatcher>) {
    tracing::debug!(target: targets::DISPATCHER, "dispatcher installed");
    *DISPATCHER.write() = Some(dispatcher);
}

/// Remove the process-wide dispatcher; actions run inline afterwards.
pub fn clear_dispatcher() {
    tracing::debug!(target: targets::DISPATCHER, "dispatcher cleared");
    *DISPATCHER.write() = None;
}

pub fn has_dispatcher() -> bool {
    DISPATCHER.read().is_some()
}

/// Run `f` through the installed dispatcher, or inline if there is none.
///
/// Returns `None` if the dispatcher returned without running the action.
pub fn dispatch<F, R>(f: F) -> Option<R>
where
    F: FnOnce() -> R + Send,
    R: Send,
{
    // Clone out so the lock is not held while the action runs.
    let dispatcher = DISPATCHER.read().clone();
    let Some(dispatcher) = dispatcher else {
        return Some(f());
    };

    let mut f = Some(f);
    let mut result = None;
    dispatcher.dispatch(&mut || {
        if let Some(f) = f.take() {
            result = Some(f());
        }
    });

    if result.is_none() {
        tracing::warn!(target: targets::DISPATCHER, "dispatcher returned without running the action");
    }
    result
}

impl fmt::Debug for dyn Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Dispatcher")
    }
}
