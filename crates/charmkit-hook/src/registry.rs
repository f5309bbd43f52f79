//! The hook registry.
//!
//! Every module of a charm registers its hooks, commands, declarations and
//! state into one shared store. A [`Registry`] is a handle onto that store
//! plus a namespace prefix: [`Registry::new_registry`] derives a handle with
//! a longer prefix, so independently written modules never collide on
//! command names or state keys.
//!
//! ```text
//! Registry("")          ─┐
//! Registry("peer")      ─┼─► Store { hooks, commands, relations, state, ... }
//! Registry("peer/log")  ─┘
//! ```
//!
//! Registration happens once at process start. The dispatcher seals the
//! store when it begins; registering anything afterwards panics.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::rc::Rc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::command::CommandHandle;
use crate::context::Context;
use crate::meta::{CharmInfo, ConfigOption, Relation, Resource};
use crate::state::StateSlot;

/// Handlers registered under this name run after the event's own handlers,
/// for every event.
pub const WILDCARD_HOOK: &str = "*";

const RESERVED_PREFIX: &str = "_";

pub type HookFn = Rc<dyn Fn(&Context) -> anyhow::Result<()>>;
pub type CommandFn = Rc<dyn Fn(Vec<String>) -> anyhow::Result<Option<CommandHandle>>>;
pub type ContextSetter = Rc<dyn Fn(&Rc<Context>) -> anyhow::Result<()>>;

#[derive(Clone)]
pub(crate) struct HookEntry {
    pub namespace: String,
    pub run: HookFn,
}

#[derive(Clone)]
pub(crate) struct StateEntry {
    pub namespace: String,
    pub slot: Rc<dyn StateSlot>,
}

#[derive(Clone)]
pub(crate) struct ContextEntry {
    pub namespace: String,
    pub set: ContextSetter,
}

#[derive(Default)]
struct Store {
    hooks: BTreeMap<String, Vec<HookEntry>>,
    commands: BTreeMap<String, CommandFn>,
    relations: BTreeMap<String, Relation>,
    resources: BTreeMap<String, Resource>,
    config: BTreeMap<String, ConfigOption>,
    state: Vec<StateEntry>,
    contexts: Vec<ContextEntry>,
    charm_info: CharmInfo,
    sealed: bool,
}

/// A namespaced view onto the shared hook registry.
#[derive(Clone, Default)]
pub struct Registry {
    namespace: String,
    store: Rc<RefCell<Store>>,
}

impl Registry {
    /// Creates an empty root registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The slash-joined path of this registry; empty at the root.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns a sub-registry whose namespace is this one's joined with
    /// `name`. The sub-registry shares everything registered so far and
    /// everything registered later.
    ///
    /// # Panics
    ///
    /// If `name` is empty, `.`/`..`, contains a slash, or starts with `_`
    /// (reserved for the root registry's state).
    pub fn new_registry(&self, name: &str) -> Registry {
        check_name("registry", name);
        if name.starts_with(RESERVED_PREFIX) {
            panic!(
                "invalid registry name {name:?}: names starting with {RESERVED_PREFIX:?} are reserved"
            );
        }
        Registry {
            namespace: self.qualify(name),
            store: Rc::clone(&self.store),
        }
    }

    /// Registers `f` to run when the event `name` is invoked.
    ///
    /// Handlers for one event run in registration order; handlers
    /// registered under [`WILDCARD_HOOK`] run after all of them.
    pub fn register<F>(&self, name: &str, f: F)
    where
        F: Fn(&Context) -> anyhow::Result<()> + 'static,
    {
        let mut store = self.open_store();
        store
            .hooks
            .entry(name.to_string())
            .or_default()
            .push(HookEntry {
                namespace: self.namespace.clone(),
                run: Rc::new(f),
            });
    }

    /// Registers a command run with `runhook cmd-<path>`, where `path` is
    /// `name` relative to this registry's namespace.
    ///
    /// The command receives the process arguments with the command selector
    /// removed, as if it were the program's `main`. It may return a handle
    /// to work that continues after it returns.
    ///
    /// # Panics
    ///
    /// If the fully qualified name is already registered, or `name` is not
    /// a single path element.
    pub fn register_command<F>(&self, name: &str, f: F)
    where
        F: Fn(Vec<String>) -> anyhow::Result<Option<CommandHandle>> + 'static,
    {
        check_name("command", name);
        let path = self.qualify(name);
        let mut store = self.open_store();
        match store.commands.entry(path) {
            Entry::Occupied(e) => panic!("command {:?} is already registered", e.key()),
            Entry::Vacant(e) => {
                e.insert(Rc::new(f));
            }
        }
    }

    /// Declares a relation. Relation names are global to the charm.
    ///
    /// # Panics
    ///
    /// If `name` was already declared differently.
    pub fn register_relation(&self, name: &str, relation: Relation) {
        let mut store = self.open_store();
        declare(&mut store.relations, "relation", name, relation);
    }

    /// Declares a configuration option. Option names are global to the charm.
    ///
    /// # Panics
    ///
    /// If `name` was already declared differently.
    pub fn register_config(&self, name: &str, option: ConfigOption) {
        let mut store = self.open_store();
        declare(&mut store.config, "config option", name, option);
    }

    /// Declares a resource.
    ///
    /// # Panics
    ///
    /// If `name` was already declared differently.
    pub fn register_resource(&self, name: &str, resource: Resource) {
        let mut store = self.open_store();
        declare(&mut store.resources, "resource", name, resource);
    }

    /// Registers a value to be loaded before and saved after every hook
    /// invocation, keyed by this registry's namespace.
    ///
    /// The value keeps its current contents when nothing was saved yet.
    ///
    /// # Panics
    ///
    /// If state is already registered for this namespace.
    pub fn register_state<T>(&self, value: Rc<RefCell<T>>)
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        let mut store = self.open_store();
        if store.state.iter().any(|e| e.namespace == self.namespace) {
            panic!("state for {:?} is already registered", self.namespace);
        }
        store.state.push(StateEntry {
            namespace: self.namespace.clone(),
            slot: Rc::new(value),
        });
    }

    /// Registers `value` as persistent state (see [`register_state`]) and
    /// `setter` to be called with the fresh context at the start of every
    /// hook invocation, before any handler runs.
    ///
    /// [`register_state`]: Registry::register_state
    pub fn register_context<F, T>(&self, setter: F, value: Rc<RefCell<T>>)
    where
        F: Fn(&Rc<Context>) -> anyhow::Result<()> + 'static,
        T: Serialize + DeserializeOwned + 'static,
    {
        self.register_state(value);
        self.open_store().contexts.push(ContextEntry {
            namespace: self.namespace.clone(),
            set: Rc::new(setter),
        });
    }

    pub fn set_charm_info(&self, info: CharmInfo) {
        self.open_store().charm_info = info;
    }

    pub fn charm_info(&self) -> CharmInfo {
        self.store.borrow().charm_info.clone()
    }

    /// Names of all events with at least one handler, sorted. The wildcard
    /// is not an event and is left out.
    pub fn registered_hooks(&self) -> Vec<String> {
        self.store
            .borrow()
            .hooks
            .keys()
            .filter(|name| name.as_str() != WILDCARD_HOOK)
            .cloned()
            .collect()
    }

    /// Fully qualified names of all commands, sorted.
    pub fn registered_commands(&self) -> Vec<String> {
        self.store.borrow().commands.keys().cloned().collect()
    }

    pub fn registered_relations(&self) -> BTreeMap<String, Relation> {
        self.store.borrow().relations.clone()
    }

    pub fn registered_resources(&self) -> BTreeMap<String, Resource> {
        self.store.borrow().resources.clone()
    }

    pub fn registered_config(&self) -> BTreeMap<String, ConfigOption> {
        self.store.borrow().config.clone()
    }

    /// The handlers to run for `event`: its own handlers in registration
    /// order, then the wildcard handlers. Empty if the event itself has no
    /// handlers.
    pub(crate) fn hooks_for(&self, event: &str) -> Vec<HookEntry> {
        if event == WILDCARD_HOOK {
            return Vec::new();
        }
        let store = self.store.borrow();
        let Some(own) = store.hooks.get(event).filter(|h| !h.is_empty()) else {
            return Vec::new();
        };
        let mut hooks = own.clone();
        if let Some(wildcard) = store.hooks.get(WILDCARD_HOOK) {
            hooks.extend(wildcard.iter().cloned());
        }
        hooks
    }

    pub(crate) fn command(&self, path: &str) -> Option<CommandFn> {
        self.store.borrow().commands.get(path).cloned()
    }

    pub(crate) fn state_entries(&self) -> Vec<StateEntry> {
        self.store.borrow().state.clone()
    }

    pub(crate) fn context_setters(&self) -> Vec<ContextEntry> {
        self.store.borrow().contexts.clone()
    }

    pub(crate) fn is_empty(&self) -> bool {
        let store = self.store.borrow();
        store.hooks.is_empty() && store.commands.is_empty()
    }

    /// Freezes registration.
    pub(crate) fn seal(&self) {
        self.store.borrow_mut().sealed = true;
    }

    fn qualify(&self, name: &str) -> String {
        if self.namespace.is_empty() {
            name.to_string()
        } else {
            format!("{}/{name}", self.namespace)
        }
    }

    fn open_store(&self) -> std::cell::RefMut<'_, Store> {
        let store = self.store.borrow_mut();
        if store.sealed {
            panic!("registry is sealed: cannot register after dispatch has started");
        }
        store
    }
}

/// Registers the handlers every charm needs. Call it after all other
/// registration.
pub fn register_main_hooks(r: &Registry) {
    r.register("install", |_| Ok(()));
    r.register("start", |_| Ok(()));
}

fn check_name(what: &str, name: &str) {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        panic!("invalid {what} name {name:?}");
    }
}

fn declare<T: PartialEq + std::fmt::Debug>(
    map: &mut BTreeMap<String, T>,
    what: &str,
    name: &str,
    value: T,
) {
    match map.entry(name.to_string()) {
        Entry::Occupied(e) if *e.get() == value => {}
        Entry::Occupied(e) => panic!(
            "{what} {name:?} is already registered as {:?}, not {value:?}",
            e.get()
        ),
        Entry::Vacant(e) => {
            e.insert(value);
        }
    }
}
