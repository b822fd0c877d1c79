//! Commands bound to view model types.
//!
//! Application code implements [`ViewModelCommand`] or
//! [`AsyncViewModelCommand`] for a concrete view model type and registers the
//! command with [`Setup`](crate::Setup). Every view model of that type binds
//! the command at creation and re-evaluates its enablement after each
//! property change, raising [`Command::can_execute_changed`] when the result
//! flips.
//!
//! Binding layers work with the object-safe [`Command`] trait, which accepts
//! any `dyn ViewModel`:
//!
//! - `can_execute` on a view model of another type returns `true`;
//! - `execute` on a view model of another type does nothing;
//! - `execute_async` on a view model of another type fails with
//!   [`CommandError::ViewModelMismatch`].
//!
//! # Async commands
//!
//! An async command is busy from the moment it is started until its future
//! completes, fails or panics; while busy it cannot execute. The
//! fire-and-forget [`Command::execute`] spawns the future on the ambient tokio
//! runtime, or on the global [`CommandRuntime`](crate::runtime::CommandRuntime)
//! outside of one, and routes failures to
//! [`AsyncViewModelCommand::handle_uncaught_error`].

use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::future::{self, BoxFuture};

use crate::dispatcher;
use crate::logging::targets;
use crate::runtime::{self, RuntimeError};
use crate::signal::Signal;
use crate::view_model::{AsAny, ViewModel, downcast_arc};

/// Errors raised when executing a command.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The command was executed on a view model of another type.
    #[error("command `{command}` cannot execute on a `{actual}`")]
    ViewModelMismatch {
        command: &'static str,
        actual: &'static str,
    },

    /// The command body returned an error.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),

    /// No tokio runtime was available to run the command.
    #[error("no runtime for async command: {0}")]
    Runtime(#[from] RuntimeError),
}

/// Result type for command execution.
pub type CommandResult<T> = std::result::Result<T, CommandError>;

/// A synchronous command for view models of type `VM`.
pub trait ViewModelCommand<VM: ViewModel>: Send + Sync + 'static {
    /// Whether the command can run for `view_model`.
    fn can_execute(&self, view_model: &VM) -> bool {
        let _ = view_model;
        true
    }

    /// Run the command.
    fn execute(&self, view_model: &Arc<VM>);
}

/// An asynchronous command for view models of type `VM`.
#[async_trait]
pub trait AsyncViewModelCommand<VM: ViewModel>: Send + Sync + 'static {
    /// Whether the command can run for `view_model`, ignoring the busy state.
    fn can_execute(&self, view_model: &VM) -> bool {
        let _ = view_model;
        true
    }

    /// Run the command body.
    async fn execute(&self, view_model: Arc<VM>) -> anyhow::Result<()>;

    /// Called with the error of a fire-and-forget execution.
    fn handle_uncaught_error(&self, view_model: &Arc<VM>, error: anyhow::Error) {
        tracing::error!(
            target: targets::COMMAND,
            command = std::any::type_name::<Self>(),
            view_model = view_model.base().type_name(),
            error = %error,
            "uncaught async command error"
        );
    }
}

/// The object-safe command interface used by binding layers.
pub trait Command: Send + Sync {
    /// `TypeId` of the implementing command type.
    fn command_type(&self) -> TypeId;

    /// `TypeId` of the view model type the command is bound to.
    fn view_model_type(&self) -> TypeId;

    /// Type name of the implementing command.
    fn name(&self) -> &'static str;

    /// Whether the command can run for `view_model`.
    fn can_execute(&self, view_model: &dyn ViewModel) -> bool;

    /// Run the command. Async commands run detached.
    fn execute(self: Arc<Self>, view_model: Arc<dyn ViewModel>);

    /// Run the command and wait for it to finish.
    fn execute_async(self: Arc<Self>, view_model: Arc<dyn ViewModel>) -> BoxFuture<'static, CommandResult<()>>;

    /// Whether an async execution is in flight.
    fn is_working(&self) -> bool {
        false
    }

    /// Emit [`can_execute_changed`](Command::can_execute_changed) through
    /// the dispatcher.
    fn raise_can_execute_changed(&self);

    /// Emitted when the enablement may have changed.
    fn can_execute_changed(&self) -> &Signal<()>;
}

impl fmt::Debug for dyn Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name())
            .field("working", &self.is_working())
            .finish()
    }
}

fn emit_through_dispatcher(signal: &Signal<()>) {
    if dispatcher::dispatch(|| signal.emit(())).is_none() {
        tracing::warn!(target: targets::COMMAND, "can_execute_changed was not dispatched");
    }
}

fn mismatch<C>(view_model: &dyn ViewModel) -> CommandError {
    CommandError::ViewModelMismatch {
        command: std::any::type_name::<C>(),
        actual: view_model.base().type_name(),
    }
}

// =============================================================================
// Synchronous wrapper
// =============================================================================

/// Adapts a [`ViewModelCommand`] to [`Command`].
pub struct SyncCommand<VM, C> {
    inner: C,
    can_execute_changed: Signal<()>,
    _view_model: PhantomData<fn(VM)>,
}

impl<VM: ViewModel, C: ViewModelCommand<VM>> SyncCommand<VM, C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            can_execute_changed: Signal::new(),
            _view_model: PhantomData,
        }
    }

    /// The wrapped command.
    pub fn inner(&self) -> &C {
        &self.inner
    }
}

impl<VM: ViewModel, C: ViewModelCommand<VM>> Command for SyncCommand<VM, C> {
    fn command_type(&self) -> TypeId {
        TypeId::of::<C>()
    }

    fn view_model_type(&self) -> TypeId {
        TypeId::of::<VM>()
    }

    fn name(&self) -> &'static str {
        std::any::type_name::<C>()
    }

    fn can_execute(&self, view_model: &dyn ViewModel) -> bool {
        match AsAny::as_any(view_model).downcast_ref::<VM>() {
            Some(view_model) => self.inner.can_execute(view_model),
            None => true,
        }
    }

    fn execute(self: Arc<Self>, view_model: Arc<dyn ViewModel>) {
        match downcast_arc::<VM>(view_model) {
            Some(view_model) => {
                tracing::debug!(target: targets::COMMAND, command = self.name(), "executing command");
                self.inner.execute(&view_model);
            }
            None => {
                tracing::trace!(target: targets::COMMAND, command = self.name(), "ignoring execute on foreign view model");
            }
        }
    }

    fn execute_async(self: Arc<Self>, view_model: Arc<dyn ViewModel>) -> BoxFuture<'static, CommandResult<()>> {
        let error = mismatch::<C>(view_model.as_ref());
        let result = match downcast_arc::<VM>(view_model) {
            Some(view_model) => {
                self.inner.execute(&view_model);
                Ok(())
            }
            None => Err(error),
        };
        Box::pin(future::ready(result))
    }

    fn raise_can_execute_changed(&self) {
        emit_through_dispatcher(&self.can_execute_changed);
    }

    fn can_execute_changed(&self) -> &Signal<()> {
        &self.can_execute_changed
    }
}

// =============================================================================
// Asynchronous wrapper
// =============================================================================

/// Adapts an [`AsyncViewModelCommand`] to [`Command`].
pub struct AsyncCommand<VM, C> {
    inner: C,
    working: AtomicBool,
    can_execute_changed: Signal<()>,
    _view_model: PhantomData<fn(VM)>,
}

/// Clears the busy flag when an execution ends, however it ends.
struct WorkingGuard<VM: ViewModel, C: AsyncViewModelCommand<VM>> {
    command: Arc<AsyncCommand<VM, C>>,
    view_model: Arc<VM>,
}

impl<VM: ViewModel, C: AsyncViewModelCommand<VM>> Drop for WorkingGuard<VM, C> {
    fn drop(&mut self) {
        self.command.set_working(&self.view_model, false);
    }
}

impl<VM: ViewModel, C: AsyncViewModelCommand<VM>> AsyncCommand<VM, C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            working: AtomicBool::new(false),
            can_execute_changed: Signal::new(),
            _view_model: PhantomData,
        }
    }

    /// The wrapped command.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    fn set_working(&self, view_model: &VM, working: bool) {
        self.working.store(working, Ordering::SeqCst);
        view_model.base().refresh_command_state(TypeId::of::<C>());
        self.raise_can_execute_changed();
    }

    fn begin(self: &Arc<Self>, view_model: &Arc<VM>) -> WorkingGuard<VM, C> {
        self.set_working(view_model, true);
        WorkingGuard {
            command: Arc::clone(self),
            view_model: Arc::clone(view_model),
        }
    }
}

impl<VM: ViewModel, C: AsyncViewModelCommand<VM>> Command for AsyncCommand<VM, C> {
    fn command_type(&self) -> TypeId {
        TypeId::of::<C>()
    }

    fn view_model_type(&self) -> TypeId {
        TypeId::of::<VM>()
    }

    fn name(&self) -> &'static str {
        std::any::type_name::<C>()
    }

    fn can_execute(&self, view_model: &dyn ViewModel) -> bool {
        match AsAny::as_any(view_model).downcast_ref::<VM>() {
            Some(view_model) => self.inner.can_execute(view_model) && !self.is_working(),
            None => true,
        }
    }

    fn execute(self: Arc<Self>, view_model: Arc<dyn ViewModel>) {
        let Some(view_model) = downcast_arc::<VM>(view_model) else {
            tracing::trace!(target: targets::COMMAND, command = self.name(), "ignoring execute on foreign view model");
            return;
        };

        tracing::debug!(target: targets::COMMAND, command = self.name(), "starting async command");
        let guard = self.begin(&view_model);
        let command = Arc::clone(&self);
        let target = Arc::clone(&view_model);
        let spawned = runtime::spawn_detached(async move {
            let _guard = guard;
            if let Err(error) = command.inner.execute(Arc::clone(&target)).await {
                command.inner.handle_uncaught_error(&target, error);
            }
        });

        if let Err(error) = spawned {
            self.inner.handle_uncaught_error(&view_model, anyhow::Error::new(CommandError::Runtime(error)));
        }
    }

    fn execute_async(self: Arc<Self>, view_model: Arc<dyn ViewModel>) -> BoxFuture<'static, CommandResult<()>> {
        let error = mismatch::<C>(view_model.as_ref());
        let Some(view_model) = downcast_arc::<VM>(view_model) else {
            return Box::pin(future::ready(Err(error)));
        };

        let guard = self.begin(&view_model);
        Box::pin(async move {
            let _guard = guard;
            self.inner.execute(view_model).await.map_err(CommandError::Failed)
        })
    }

    fn is_working(&self) -> bool {
        self.working.load(Ordering::SeqCst)
    }

    fn raise_can_execute_changed(&self) {
        emit_through_dispatcher(&self.can_execute_changed);
    }

    fn can_execute_changed(&self) -> &Signal<()> {
        &self.can_execute_changed
    }
}
