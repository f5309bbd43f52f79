use std::process::ExitCode;

use charmkit_hook::{Environment, HookError, Registry, register_main_hooks, run_from_environment};
use tracing_subscriber::{EnvFilter, fmt};

mod charm;

const LOG_ENV: &str = "CHARMKIT_LOG";
const LOG_FORMAT_ENV: &str = "CHARMKIT_LOG_FORMAT";

fn main() -> ExitCode {
    // Hook stdout belongs to the orchestrator, so logs go to stderr
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if std::env::var(LOG_FORMAT_ENV).is_ok_and(|f| f == "json") {
        builder.json().init();
    } else {
        builder.init();
    }

    let registry = Registry::new();
    charm::register(&registry);
    register_main_hooks(&registry);

    let args: Vec<String> = std::env::args().collect();
    match run(&registry, &args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("runhook: {}", e.report());
            ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1))
        }
    }
}

fn run(registry: &Registry, args: &[String]) -> Result<(), HookError> {
    let env = Environment::from_process();
    if let Some(handle) = run_from_environment(registry, args, &env)? {
        tracing::info!(command = handle.name(), "waiting for command");
        handle.wait()?;
    }
    Ok(())
}
