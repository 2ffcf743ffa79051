#![warn(clippy::all, clippy::nursery, clippy::pedantic)]

mod shell;

use std::env;

use anyhow::{Context, Result};
use foldertip::{
	attributes::NativeAttributes,
	config::AppConfig,
	ipc::{InstanceCoordinator, Role, normalize_path_arg},
	remarks::RemarkService,
	session::RemarkSession,
};
use log::{LevelFilter, error, info};

// Config warnings need a logger, and the configured level is only known afterwards.
// Returns whether RUST_LOG decides the level instead.
fn init_logging() -> bool {
	let env_filter = env::var_os(env_logger::DEFAULT_FILTER_ENV).is_some();
	let _ = env_logger::Builder::new().filter_level(LevelFilter::Trace).parse_default_env().try_init();
	if !env_filter {
		log::set_max_level(AppConfig::default().log_level);
	}
	env_filter
}

fn main() -> Result<()> {
	let env_filter = init_logging();
	let config = AppConfig::load();
	if !env_filter {
		log::set_max_level(config.log_level);
	}

	let initial = env::args().nth(1).and_then(|arg| normalize_path_arg(&arg));
	let role = InstanceCoordinator::from_config(&config)
		.claim()
		.with_context(|| format!("Failed to bind {}", config.endpoint()))?;
	match role {
		Role::Secondary(secondary) => {
			let payload = initial.map(|path| path.display().to_string()).unwrap_or_default();
			if secondary.send_payload(&payload) {
				info!("Handed the path to the running instance, exiting");
			} else {
				error!("An instance is already running and could not be reached, exiting");
			}
			Ok(())
		}
		Role::Primary(primary) => {
			let service = RemarkService::with_store(NativeAttributes, &config.skip_names);
			shell::run(primary, RemarkSession::new(service), initial)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn logger_is_ready_before_config_and_takes_its_level() {
		if init_logging() {
			return;
		}
		assert!(log::log_enabled!(log::Level::Warn));
		assert_eq!(log::max_level(), LevelFilter::Info);
		log::set_max_level(LevelFilter::Debug);
		assert!(log::log_enabled!(log::Level::Debug));
	}
}
