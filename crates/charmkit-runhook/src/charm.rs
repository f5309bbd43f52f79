//! The charm built into `runhook`: a peer address book, an invocation
//! counter with `status` and `watch` commands, and a greeting shown as the
//! unit's status.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use anyhow::Context as _;
use charmkit_hook::env::ENV_CHARM_DIR;
use charmkit_hook::{
    CharmInfo, CommandHandle, ConfigOption, Context, DiskState, Environment, HookConfig,
    OptionType, PersistentState, Registry, Relation, Role, Status, WILDCARD_HOOK,
};
use clap::Parser;
use serde::{Deserialize, Serialize};

pub const PEER_RELATION: &str = "peer";
const ADDRESS_KEY: &str = "address";
const GREETING_OPTION: &str = "greeting";
const DEFAULT_GREETING: &str = "hello";

pub fn register(r: &Registry) {
    r.set_charm_info(CharmInfo {
        summary: "charmkit example charm".into(),
        description: "Tracks peer addresses and counts the hooks it has run.".into(),
    });
    register_peer(&r.new_registry("peer"));
    register_counter(&r.new_registry("counter"));
    register_greeting(r);
}

/// Addresses published by the other units of the application.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerState {
    pub addresses: BTreeMap<String, String>,
    #[serde(default)]
    pub departed: Vec<String>,
}

fn register_peer(r: &Registry) {
    r.register_relation(PEER_RELATION, Relation::new("charmkit-peer", Role::Peer));

    let state = Rc::new(RefCell::new(PeerState::default()));
    let s = Rc::clone(&state);
    r.register_context(
        move |ctxt: &Rc<Context>| {
            s.borrow_mut().addresses = peer_addresses(ctxt);
            Ok(())
        },
        Rc::clone(&state),
    );

    r.register("peer-relation-joined", |ctxt| {
        let address = ctxt.private_address()?;
        ctxt.set_relation(&[(ADDRESS_KEY, &address)])?;
        Ok(())
    });

    let s = Rc::clone(&state);
    r.register("peer-relation-changed", move |ctxt| {
        let known = s.borrow().addresses.len();
        ctxt.log(&format!("{known} peer addresses known"))?;
        Ok(())
    });

    r.register("peer-relation-departed", move |ctxt| {
        if let Some(unit) = ctxt.remote_unit() {
            let mut st = state.borrow_mut();
            st.addresses.remove(unit.as_str());
            st.departed.push(unit.to_string());
        }
        Ok(())
    });
}

fn peer_addresses(ctxt: &Context) -> BTreeMap<String, String> {
    let mut addresses = BTreeMap::new();
    for id in ctxt.relation_ids(PEER_RELATION) {
        for unit in ctxt.relation_units(id) {
            let address = ctxt
                .relation_unit_settings(id, unit)
                .and_then(|settings| settings.get(ADDRESS_KEY));
            if let Some(address) = address {
                addresses.insert(unit.to_string(), address.clone());
            }
        }
    }
    addresses
}

/// How many hooks this unit has run.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Counter {
    pub hooks: u64,
    pub last_hook: Option<String>,
    #[serde(default)]
    pub by_hook: BTreeMap<String, u64>,
}

#[derive(Debug, Parser)]
#[command(name = "status", about = "Show how many hooks this unit has run")]
struct StatusArgs {
    /// Print the counter as JSON
    #[arg(long)]
    json: bool,

    /// Read state from this directory instead of the configured one
    #[arg(long)]
    state_dir: Option<PathBuf>,
}

#[derive(Debug, Parser)]
#[command(name = "watch", about = "Print the hook count periodically")]
struct WatchArgs {
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    /// Stop after this many reports; runs until cancelled when unset
    #[arg(long)]
    iterations: Option<u64>,

    #[arg(long)]
    state_dir: Option<PathBuf>,
}

fn register_counter(r: &Registry) {
    let counter = Rc::new(RefCell::new(Counter::default()));
    r.register_state(Rc::clone(&counter));
    r.register(WILDCARD_HOOK, move |ctxt| {
        let mut c = counter.borrow_mut();
        c.hooks += 1;
        c.last_hook = Some(ctxt.hook_name().to_string());
        *c.by_hook.entry(ctxt.hook_name().to_string()).or_default() += 1;
        Ok(())
    });

    let namespace = r.namespace().to_string();
    r.register_command("status", move |args| {
        let Some(args) = parse_args::<StatusArgs>(&args)? else {
            return Ok(None);
        };
        let counter = load_counter(&state_store(args.state_dir)?, &namespace)?;
        if args.json {
            println!("{}", serde_json::to_string(&counter)?);
        } else {
            println!("{}", describe(&counter));
        }
        Ok(None)
    });

    let namespace = r.namespace().to_string();
    r.register_command("watch", move |args| {
        let Some(args) = parse_args::<WatchArgs>(&args)? else {
            return Ok(None);
        };
        let store = state_store(args.state_dir)?;
        let namespace = namespace.clone();
        let interval = Duration::from_millis(args.interval_ms);
        let handle = CommandHandle::spawn("counter/watch", move |token| {
            let mut reports = 0;
            while !token.is_cancelled() && args.iterations.is_none_or(|n| reports < n) {
                println!("{}", describe(&load_counter(&store, &namespace)?));
                reports += 1;
                std::thread::sleep(interval);
            }
            Ok(())
        })?;
        Ok(Some(handle))
    });
}

/// Parses command arguments; `None` when clap already printed help or
/// version text.
fn parse_args<T: Parser>(args: &[String]) -> anyhow::Result<Option<T>> {
    match T::try_parse_from(args) {
        Ok(parsed) => Ok(Some(parsed)),
        Err(e) if !e.use_stderr() => {
            print!("{e}");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

fn state_store(explicit: Option<PathBuf>) -> anyhow::Result<DiskState> {
    if let Some(dir) = explicit {
        return Ok(DiskState::new(dir));
    }
    let env = Environment::from_process();
    let charm_dir = env.require(ENV_CHARM_DIR)?;
    let config = HookConfig::from_environment(&env)?;
    Ok(DiskState::new(config.state_dir_for(Path::new(charm_dir))))
}

fn load_counter(store: &DiskState, namespace: &str) -> anyhow::Result<Counter> {
    let Some(data) = store.load(namespace)? else {
        return Ok(Counter::default());
    };
    serde_json::from_slice(&data).with_context(|| format!("cannot decode {namespace} state"))
}

fn describe(counter: &Counter) -> String {
    match &counter.last_hook {
        Some(last) => format!("{} hooks run, last {last}", counter.hooks),
        None => "no hooks run yet".to_string(),
    }
}

fn register_greeting(r: &Registry) {
    r.register_config(
        GREETING_OPTION,
        ConfigOption::new(OptionType::String, "Message shown as the unit status")
            .with_default(DEFAULT_GREETING),
    );
    r.register("config-changed", |ctxt| {
        let greeting = ctxt
            .get_config_string(GREETING_OPTION)?
            .unwrap_or_else(|| DEFAULT_GREETING.to_string());
        match ctxt.set_status(Status::Active, &greeting) {
            Err(e) if e.is_unimplemented() => {
                tracing::warn!(error = %e.report(), "status not supported, greeting not shown");
            }
            other => other?,
        }
        Ok(())
    });
}

#[cfg(test)]
mod tests {
    use charmkit_hook::env::{
        ENV_CONTEXT_ID, ENV_RELATION_ID, ENV_REMOTE_UNIT, ENV_SOCKET_PATH, ENV_UNIT_NAME, ENV_UUID,
        ENV_RELATION_NAME,
    };
    use charmkit_hook::{MemoryState, MemoryToolRunner, register_main_hooks, run_hook};
    use serde_json::json;

    use super::*;

    fn charm() -> Registry {
        let r = Registry::new();
        register(&r);
        register_main_hooks(&r);
        r
    }

    fn peer_env(hook_vars: &[(&'static str, &'static str)]) -> Environment {
        let mut vars = vec![
            (ENV_UUID, "model"),
            (ENV_UNIT_NAME, "kit/0"),
            (ENV_CHARM_DIR, "/charm"),
            (ENV_CONTEXT_ID, "ctx"),
            (ENV_SOCKET_PATH, "/agent.socket"),
        ];
        vars.extend_from_slice(hook_vars);
        Environment::from_vars(vars)
    }

    fn peer_runner() -> MemoryToolRunner {
        MemoryToolRunner::new()
            .respond_json("relation-ids", &["--format", "json", "peer"], json!(["peer:1"]))
            .respond_json(
                "relation-list",
                &["--format", "json", "-r", "peer:1"],
                json!(["kit/1"]),
            )
            .respond_json(
                "relation-get",
                &["--format", "json", "-r", "peer:1", "-", "kit/1"],
                json!({"address": "10.1.1.1"}),
            )
    }

    fn run(r: &Registry, env: &Environment, hook: &str, runner: MemoryToolRunner, state: &MemoryState) {
        let ctxt = Context::with_runner(r, env, hook, Box::new(runner), "/state".into()).unwrap();
        run_hook(r, Rc::new(ctxt), state).unwrap();
    }

    #[test]
    fn declares_relations_and_config() {
        let r = charm();
        assert!(r.registered_relations().contains_key(PEER_RELATION));
        assert!(r.registered_config().contains_key(GREETING_OPTION));
        assert_eq!(
            r.registered_commands(),
            vec!["counter/status".to_string(), "counter/watch".to_string()]
        );
        assert!(r.registered_hooks().contains(&"install".to_string()));
    }

    #[test]
    fn install_counts_and_records_peers() {
        let r = charm();
        let state = MemoryState::new();
        run(&r, &peer_env(&[]), "install", peer_runner(), &state);

        let counter: Counter = state.get_json("counter").unwrap();
        assert_eq!(counter.hooks, 1);
        assert_eq!(counter.by_hook["install"], 1);
        let peers: PeerState = state.get_json("peer").unwrap();
        assert_eq!(peers.addresses["kit/1"], "10.1.1.1");
    }

    #[test]
    fn departed_peer_is_forgotten() {
        let r = charm();
        let state = MemoryState::new();
        let env = peer_env(&[
            (ENV_RELATION_NAME, "peer"),
            (ENV_RELATION_ID, "peer:1"),
            (ENV_REMOTE_UNIT, "kit/1"),
        ]);
        run(&r, &env, "peer-relation-departed", peer_runner(), &state);

        let peers: PeerState = state.get_json("peer").unwrap();
        assert!(peers.addresses.is_empty());
        assert_eq!(peers.departed, vec!["kit/1"]);
    }

    #[test]
    fn missing_status_tool_is_tolerated() {
        let r = charm();
        let state = MemoryState::new();
        let runner = peer_runner().respond_json(
            "config-get",
            &["--format", "json", GREETING_OPTION],
            json!("hi there"),
        );
        run(&r, &peer_env(&[]), "config-changed", runner, &state);
        let counter: Counter = state.get_json("counter").unwrap();
        assert_eq!(counter.last_hook.as_deref(), Some("config-changed"));
    }

    #[test]
    fn describes_counter() {
        assert_eq!(describe(&Counter::default()), "no hooks run yet");
        let c = Counter {
            hooks: 3,
            last_hook: Some("start".into()),
            by_hook: BTreeMap::new(),
        };
        assert_eq!(describe(&c), "3 hooks run, last start");
    }
}
