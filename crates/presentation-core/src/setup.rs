//! Explicit registration of commands, the dispatcher and the runtime.
//!
//! Commands are bound to view models by type. They are registered once at
//! startup, before the view models that use them are created:
//!
//! ```no_run
//! use std::sync::Arc;
//! use presentation_core::{InlineDispatcher, Setup, ViewModel, ViewModelBase, ViewModelCommand};
//!
//! struct Editor {
//!     base: ViewModelBase,
//! }
//!
//! impl ViewModel for Editor {
//!     fn base(&self) -> &ViewModelBase { &self.base }
//! }
//!
//! struct Save;
//!
//! impl ViewModelCommand<Editor> for Save {
//!     fn execute(&self, _editor: &Arc<Editor>) {}
//! }
//!
//! Setup::new()
//!     .command::<Editor, _>(Save)
//!     .dispatcher(Arc::new(InlineDispatcher))
//!     .install()
//!     .expect("setup");
//! ```

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::command::{AsyncCommand, AsyncViewModelCommand, Command, SyncCommand, ViewModelCommand};
use crate::dispatcher::{self, Dispatcher};
use crate::error::Result;
use crate::logging::targets;
use crate::runtime::{CommandRuntime, RuntimeConfig};
use crate::view_model::ViewModel;

type Registry = RwLock<HashMap<TypeId, Vec<Arc<dyn Command>>>>;

/// Commands registered per view model type.
static COMMANDS: OnceLock<Registry> = OnceLock::new();

fn registry() -> &'static Registry {
    COMMANDS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// The commands registered for the view model type `view_model`.
pub(crate) fn commands_for(view_model: TypeId) -> Vec<Arc<dyn Command>> {
    registry().read().get(&view_model).cloned().unwrap_or_default()
}

/// Register one command, replacing a previous registration of the same
/// command type for the same view model type.
pub fn register_command(command: Arc<dyn Command>) {
    let mut registry = registry().write();
    let commands = registry.entry(command.view_model_type()).or_default();
    match commands.iter_mut().find(|c| c.command_type() == command.command_type()) {
        Some(existing) => *existing = command,
        None => commands.push(command),
    }
}

/// Builder applied once at startup.
#[derive(Default)]
pub struct Setup {
    commands: Vec<Arc<dyn Command>>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    runtime: Option<RuntimeConfig>,
}

impl Setup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a synchronous command to view models of type `VM`.
    pub fn command<VM, C>(mut self, command: C) -> Self
    where
        VM: ViewModel,
        C: ViewModelCommand<VM>,
    {
        self.commands.push(Arc::new(SyncCommand::<VM, C>::new(command)));
        self
    }

    /// Bind an asynchronous command to view models of type `VM`.
    pub fn async_command<VM, C>(mut self, command: C) -> Self
    where
        VM: ViewModel,
        C: AsyncViewModelCommand<VM>,
    {
        self.commands.push(Arc::new(AsyncCommand::<VM, C>::new(command)));
        self
    }

    /// Install a process-wide dispatcher.
    pub fn dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Configure the runtime used for detached async commands.
    pub fn runtime(mut self, config: RuntimeConfig) -> Self {
        self.runtime = Some(config);
        self
    }

    /// Apply the configuration.
    ///
    /// Fails if a runtime configuration is given after the command runtime
    /// was already created. Commands and the dispatcher are applied first.
    pub fn install(self) -> Result<()> {
        let count = self.commands.len();
        for command in self.commands {
            register_command(command);
        }
        if let Some(dispatcher) = self.dispatcher {
            dispatcher::set_dispatcher(dispatcher);
        }
        if let Some(config) = self.runtime {
            CommandRuntime::configure(config)?;
        }
        tracing::debug!(target: targets::CORE, commands = count, "presentation setup installed");
        Ok(())
    }
}

impl fmt::Debug for Setup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Setup")
            .field("commands", &self.commands.iter().map(|c| c.name()).collect::<Vec<_>>())
            .field("dispatcher", &self.dispatcher.is_some())
            .field("runtime", &self.runtime)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view_model::{ViewModelBase, create};

    struct Lever {
        base: ViewModelBase,
    }

    impl ViewModel for Lever {
        fn base(&self) -> &ViewModelBase {
            &self.base
        }
    }

    struct Pull(u8);

    impl ViewModelCommand<Lever> for Pull {
        fn execute(&self, _lever: &Arc<Lever>) {}
    }

    struct Push;

    impl ViewModelCommand<Lever> for Push {
        fn can_execute(&self, _lever: &Lever) -> bool {
            false
        }

        fn execute(&self, _lever: &Arc<Lever>) {}
    }

    #[test]
    fn test_registration_binds_and_replaces() {
        Setup::new()
            .command::<Lever, _>(Pull(1))
            .command::<Lever, _>(Push)
            .install()
            .unwrap();
        Setup::new().command::<Lever, _>(Pull(2)).install().unwrap();

        let lever = create(|base| Lever { base });
        assert_eq!(lever.base().command_count(), 2);

        let push = lever.base().command::<Push>().unwrap();
        assert!(!push.can_execute(lever.as_ref()));
        assert!(lever.base().command::<Pull>().is_some());
        assert!(lever.base().command::<String>().is_none());
        assert_eq!(lever.base().commands()[0].command_type(), TypeId::of::<Pull>());
    }
}
