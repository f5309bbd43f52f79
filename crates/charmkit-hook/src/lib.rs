//! Hook registry, execution context and dispatch for charms.
//!
//! A charm is one executable run once per lifecycle event. Modules register
//! their handlers, commands, declarations and state on a [`Registry`]; the
//! entry point rebuilds a [`Context`] from the environment and runs the
//! handlers registered for the event.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use charmkit_hook::{Environment, Registry, register_main_hooks, run_from_environment};
//!
//! let r = Registry::new();
//! let runs = Rc::new(RefCell::new(0u64));
//! r.register_state(Rc::clone(&runs));
//! r.register("config-changed", move |ctxt| {
//!     *runs.borrow_mut() += 1;
//!     ctxt.log("config changed")?;
//!     Ok(())
//! });
//! register_main_hooks(&r);
//!
//! let args: Vec<String> = std::env::args().collect();
//! if let Err(e) = run_from_environment(&r, &args, &Environment::from_process()) {
//!     eprintln!("{}", e.report());
//!     std::process::exit(e.exit_code());
//! }
//! ```

pub mod command;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod env;
pub mod error;
pub mod meta;
pub mod registry;
pub mod runner;
pub mod state;

pub use command::CommandHandle;
pub use config::{HookConfig, ToolMode};
pub use context::{
    Context, Protocol, RelationId, Settings, Status, UnitId, new_context_from_environment,
};
pub use dispatch::{Invocation, run_command, run_from_environment, run_hook, usage_error};
pub use env::Environment;
pub use error::{HookError, StateError, ToolError};
pub use meta::{CharmInfo, ConfigOption, OptionType, Relation, Resource, ResourceType, Role, Scope};
pub use registry::{Registry, WILDCARD_HOOK, register_main_hooks};
pub use runner::{ExecToolRunner, MemoryToolRunner, SocketToolRunner, ToolRunner};
pub use state::{DiskState, MemoryState, PersistentState};
pub use tokio_util::sync::CancellationToken;
