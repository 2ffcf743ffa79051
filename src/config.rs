use std::{
	env,
	fs::{self, OpenOptions},
	net::{Ipv4Addr, SocketAddr},
	path::{Path, PathBuf},
	str::FromStr,
	time::Duration,
};

use configparser::ini::Ini;
use log::{LevelFilter, warn};

use crate::remarks::DEFAULT_SKIP_NAMES;

pub const DEFAULT_HOST: Ipv4Addr = Ipv4Addr::LOCALHOST;
pub const DEFAULT_PORT: u16 = 53333;
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;
const CONFIG_DIRECTORY: &str = "foldertip";
const CONFIG_FILENAME: &str = "foldertip.ini";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
	pub host: Ipv4Addr,
	pub port: u16,
	pub timeout: Duration,
	pub skip_names: Vec<String>,
	pub log_level: LevelFilter,
}

impl Default for AppConfig {
	fn default() -> Self {
		Self {
			host: DEFAULT_HOST,
			port: DEFAULT_PORT,
			timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
			skip_names: DEFAULT_SKIP_NAMES.iter().map(ToString::to_string).collect(),
			log_level: LevelFilter::Info,
		}
	}
}

impl AppConfig {
	#[must_use]
	pub fn load() -> Self {
		Self::load_from(&get_config_path())
	}

	/// Reads `path`, keeping defaults for anything missing or malformed.
	#[must_use]
	pub fn load_from(path: &Path) -> Self {
		if !path.exists() {
			return Self::default();
		}
		let mut ini = Ini::new();
		if let Err(err) = ini.load(path) {
			warn!("Ignoring unreadable config {}: {err}", path.display());
			return Self::default();
		}
		Self::from_ini(&ini)
	}

	#[must_use]
	pub fn from_ini(ini: &Ini) -> Self {
		let defaults = Self::default();
		let host = match parse_value::<Ipv4Addr>(ini, "instance", "host") {
			Some(host) if host.is_loopback() => host,
			Some(host) => {
				warn!("Rendezvous host {host} is not a loopback address, using {DEFAULT_HOST}");
				defaults.host
			}
			None => defaults.host,
		};
		let skip_names = ini.get("listing", "skip").map_or(defaults.skip_names, |raw| {
			raw.split(',').map(str::trim).filter(|name| !name.is_empty()).map(ToString::to_string).collect()
		});
		Self {
			host,
			port: parse_value(ini, "instance", "port").unwrap_or(defaults.port),
			timeout: parse_value(ini, "instance", "timeout_ms").map_or(defaults.timeout, Duration::from_millis),
			skip_names,
			log_level: parse_value(ini, "log", "level").unwrap_or(defaults.log_level),
		}
	}

	#[must_use]
	pub fn endpoint(&self) -> SocketAddr {
		SocketAddr::from((self.host, self.port))
	}
}

fn parse_value<T: FromStr>(ini: &Ini, section: &str, key: &str) -> Option<T> {
	let raw = ini.get(section, key)?;
	let parsed = raw.trim().parse().ok();
	if parsed.is_none() {
		warn!("Ignoring invalid value for {section}.{key}: {raw}");
	}
	parsed
}

fn get_config_path() -> PathBuf {
	let exe_path = env::current_exe().unwrap_or_else(|_| PathBuf::from("."));
	let exe_dir = exe_path.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf);
	#[cfg(windows)]
	let force_appdata = ["ProgramFiles", "ProgramFiles(x86)"]
		.iter()
		.filter_map(|var| env::var(var).ok())
		.any(|program_files| exe_path.starts_with(program_files));
	#[cfg(not(windows))]
	let force_appdata = false;
	let local = exe_dir.join(CONFIG_FILENAME);
	if local.exists() || (!force_appdata && is_directory_writable(&exe_dir)) {
		return local;
	}
	config_root_dir().unwrap_or(exe_dir).join(CONFIG_DIRECTORY).join(CONFIG_FILENAME)
}

fn is_directory_writable(path: &Path) -> bool {
	if !path.is_dir() {
		return false;
	}
	let file = path.join(".write_test_tmp");
	OpenOptions::new().write(true).create_new(true).open(&file).and_then(|_| fs::remove_file(&file)).is_ok()
}

fn config_root_dir() -> Option<PathBuf> {
	#[cfg(windows)]
	{
		env::var("APPDATA").or_else(|_| env::var("LOCALAPPDATA")).ok().map(PathBuf::from)
	}
	#[cfg(not(windows))]
	{
		env::var("XDG_CONFIG_HOME")
			.map(PathBuf::from)
			.or_else(|_| env::var("HOME").map(|home| PathBuf::from(home).join(".config")))
			.ok()
	}
}
