use std::{
	env,
	error::Error,
	fmt::{Display, Formatter, Result as FmtResult},
	io::{self, Read, Write},
	net::{Shutdown, SocketAddr, TcpListener, TcpStream},
	ops::ControlFlow,
	path::{Path, PathBuf},
	str::{self, Utf8Error},
	sync::mpsc::{self, Receiver},
	thread::{self, JoinHandle},
	time::Duration,
};

use log::{debug, error, info, warn};
use socket2::{Domain, Protocol, Socket, Type};

use crate::config::AppConfig;

/// Upper bound on one forwarded payload; anything longer is cut off.
pub const PAYLOAD_LIMIT: usize = 4096;
const ACCEPT_THREAD_NAME: &str = "foldertip-accept";
const LISTEN_BACKLOG: i32 = 5;

#[derive(Debug)]
pub enum ForwardError {
	Connect(io::Error),
	Write(io::Error),
}

impl Display for ForwardError {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		match self {
			Self::Connect(err) => write!(f, "Cannot reach running instance: {err}"),
			Self::Write(err) => write!(f, "Cannot send to running instance: {err}"),
		}
	}
}

impl Error for ForwardError {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		match self {
			Self::Connect(err) | Self::Write(err) => Some(err),
		}
	}
}

/// Decides, once per process, whether this process owns the rendezvous endpoint.
#[derive(Debug, Clone, Copy)]
pub struct InstanceCoordinator {
	endpoint: SocketAddr,
	timeout: Duration,
}

pub enum Role {
	Primary(PrimaryInstance),
	Secondary(SecondaryInstance),
}

impl InstanceCoordinator {
	#[must_use]
	pub const fn new(endpoint: SocketAddr, timeout: Duration) -> Self {
		Self { endpoint, timeout }
	}

	#[must_use]
	pub fn from_config(config: &AppConfig) -> Self {
		Self::new(config.endpoint(), config.timeout)
	}

	/// Binds the endpoint; an address already in use means another instance is primary.
	///
	/// # Errors
	///
	/// Returns any bind failure other than the address being taken.
	pub fn claim(self) -> io::Result<Role> {
		match bind_exclusive(self.endpoint) {
			Ok(listener) => {
				info!("Listening for forwarded paths on {}", listener.local_addr()?);
				Ok(Role::Primary(PrimaryInstance { listener, read_timeout: self.timeout }))
			}
			Err(err) if is_taken(&err) => {
				info!("Another instance owns {}", self.endpoint);
				Ok(Role::Secondary(SecondaryInstance { endpoint: self.endpoint, timeout: self.timeout }))
			}
			Err(err) => Err(err),
		}
	}
}

// Windows lets a SO_REUSEADDR socket share a port unless the owner asks for exclusive use.
fn bind_exclusive(endpoint: SocketAddr) -> io::Result<TcpListener> {
	let socket = Socket::new(Domain::for_address(endpoint), Type::STREAM, Some(Protocol::TCP))?;
	#[cfg(windows)]
	socket.set_exclusive_address_use(true)?;
	#[cfg(not(windows))]
	socket.set_reuse_address(true)?;
	socket.bind(&endpoint.into())?;
	socket.listen(LISTEN_BACKLOG)?;
	Ok(socket.into())
}

fn is_taken(err: &io::Error) -> bool {
	match err.kind() {
		io::ErrorKind::AddrInUse => true,
		// WSAEACCES when the port is held exclusively.
		io::ErrorKind::PermissionDenied => cfg!(windows),
		_ => false,
	}
}

pub struct PrimaryInstance {
	listener: TcpListener,
	read_timeout: Duration,
}

impl PrimaryInstance {
	/// # Errors
	///
	/// Returns an error if the socket address cannot be queried.
	pub fn local_addr(&self) -> io::Result<SocketAddr> {
		self.listener.local_addr()
	}

	/// Runs the accept loop on a background thread, one connection at a time.
	///
	/// The loop ends when `handler` breaks or the listener fails.
	///
	/// # Errors
	///
	/// Returns an error if the thread cannot be spawned.
	pub fn start_accepting<F>(self, mut handler: F) -> io::Result<JoinHandle<()>>
	where
		F: FnMut(String) -> ControlFlow<()> + Send + 'static,
	{
		thread::Builder::new().name(ACCEPT_THREAD_NAME.to_string()).spawn(move || {
			for stream in self.listener.incoming() {
				let mut stream = match stream {
					Ok(stream) => stream,
					Err(err) if is_transient(&err) => {
						debug!("Dropped inbound connection: {err}");
						continue;
					}
					Err(err) => {
						error!("Accept loop stopped: {err}");
						break;
					}
				};
				match receive_payload(&mut stream, self.read_timeout) {
					Ok(Some(payload)) => {
						debug!("Received forwarded path {payload}");
						if handler(payload).is_break() {
							break;
						}
					}
					Ok(None) => debug!("Ignored empty forwarded payload"),
					Err(err) => warn!("Discarded forwarded payload: {err}"),
				}
			}
		})
	}

	/// Starts the accept loop and hands every payload to the returned channel.
	///
	/// # Errors
	///
	/// Returns an error if the thread cannot be spawned.
	pub fn into_channel(self) -> io::Result<(Receiver<String>, JoinHandle<()>)> {
		let (tx, rx) = mpsc::channel();
		let handle = self.start_accepting(move |payload| match tx.send(payload) {
			Ok(()) => ControlFlow::Continue(()),
			Err(_) => ControlFlow::Break(()),
		})?;
		Ok((rx, handle))
	}
}

pub struct SecondaryInstance {
	endpoint: SocketAddr,
	timeout: Duration,
}

impl SecondaryInstance {
	/// # Errors
	///
	/// Returns [`ForwardError`] if the primary cannot be reached within the timeout.
	pub fn try_send_payload(&self, text: &str) -> Result<(), ForwardError> {
		let mut stream = TcpStream::connect_timeout(&self.endpoint, self.timeout).map_err(ForwardError::Connect)?;
		stream.set_write_timeout(Some(self.timeout)).map_err(ForwardError::Write)?;
		stream.write_all(text.as_bytes()).map_err(ForwardError::Write)?;
		stream.flush().map_err(ForwardError::Write)?;
		let _ = stream.shutdown(Shutdown::Write);
		Ok(())
	}

	pub fn send_payload(&self, text: &str) -> bool {
		match self.try_send_payload(text) {
			Ok(()) => true,
			Err(err) => {
				warn!("{err}");
				false
			}
		}
	}
}

#[derive(Debug)]
enum ReceiveError {
	Io(io::Error),
	Utf8(Utf8Error),
}

impl Display for ReceiveError {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		match self {
			Self::Io(err) => write!(f, "read failed: {err}"),
			Self::Utf8(err) => write!(f, "not UTF-8: {err}"),
		}
	}
}

fn receive_payload(stream: &mut TcpStream, read_timeout: Duration) -> Result<Option<String>, ReceiveError> {
	stream.set_read_timeout(Some(read_timeout)).map_err(ReceiveError::Io)?;
	let mut data = Vec::with_capacity(256);
	Read::by_ref(stream).take(PAYLOAD_LIMIT as u64).read_to_end(&mut data).map_err(ReceiveError::Io)?;
	decode_payload(&data).map_err(ReceiveError::Utf8)
}

/// Strict UTF-8 decode with surrounding whitespace removed; an empty payload is `None`.
///
/// # Errors
///
/// Returns the UTF-8 error for invalid byte sequences.
pub fn decode_payload(data: &[u8]) -> Result<Option<String>, Utf8Error> {
	let payload = str::from_utf8(data)?.trim_end_matches('\0').trim();
	if payload.is_empty() {
		return Ok(None);
	}
	Ok(Some(payload.to_string()))
}

fn is_transient(err: &io::Error) -> bool {
	matches!(
		err.kind(),
		io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset | io::ErrorKind::Interrupted
	)
}

/// Cleans a path handed over on the command line: quotes stripped, bare drives like `C:` completed.
#[must_use]
pub fn normalize_path_arg(raw: &str) -> Option<PathBuf> {
	let text = raw.trim().trim_matches('"');
	if text.is_empty() {
		return None;
	}
	Some(normalize_cli_path(Path::new(&expand_bare_drive(text))))
}

fn expand_bare_drive(text: &str) -> String {
	let mut chars = text.chars();
	match (chars.next(), chars.next(), chars.next()) {
		(Some(letter), Some(':'), None) if letter.is_ascii_alphabetic() => format!("{text}\\"),
		_ => text.to_string(),
	}
}

/// Resolves `path` to its canonical form when it exists, otherwise to an absolute path.
#[must_use]
pub fn normalize_cli_path(path: &Path) -> PathBuf {
	if let Ok(normalized) = path.canonicalize() {
		return strip_verbatim_prefix(normalized);
	}
	if path.is_absolute() {
		return path.to_path_buf();
	}
	std::path::absolute(path)
		.unwrap_or_else(|_| env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path)))
}

// canonicalize() on Windows yields \\?\C:\... and \\?\UNC\server\share\...
fn strip_verbatim_prefix(path: PathBuf) -> PathBuf {
	let stripped = {
		let text = path.to_string_lossy();
		if let Some(unc) = text.strip_prefix(r"\\?\UNC\") {
			Some(format!(r"\\{unc}"))
		} else {
			text.strip_prefix(r"\\?\").filter(|rest| has_drive_prefix(rest)).map(ToString::to_string)
		}
	};
	stripped.map_or(path, PathBuf::from)
}

/// True for text starting with a drive letter and colon, such as `C:` or `d:\data`.
#[must_use]
pub fn has_drive_prefix(text: &str) -> bool {
	let bytes = text.as_bytes();
	bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

#[cfg(test)]
mod tests {
	use std::{fs, net::Ipv4Addr, sync::mpsc::RecvTimeoutError};

	use rstest::rstest;

	use super::*;

	const WAIT: Duration = Duration::from_secs(5);

	fn primary() -> (PrimaryInstance, SocketAddr) {
		let coordinator = InstanceCoordinator::new(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)), Duration::from_secs(1));
		let Role::Primary(primary) = coordinator.claim().unwrap() else {
			panic!("expected to own an ephemeral port");
		};
		let addr = primary.local_addr().unwrap();
		(primary, addr)
	}

	fn secondary(addr: SocketAddr) -> SecondaryInstance {
		match InstanceCoordinator::new(addr, Duration::from_secs(1)).claim().unwrap() {
			Role::Secondary(secondary) => secondary,
			Role::Primary(_) => panic!("second claim must not become primary"),
		}
	}

	#[test]
	fn second_claim_forwards_to_primary() {
		let (primary, addr) = primary();
		let secondary = secondary(addr);
		let (rx, _handle) = primary.into_channel().unwrap();
		assert!(secondary.send_payload("  /data/Projects/Quarter 3 \r\n"));
		assert_eq!(rx.recv_timeout(WAIT).unwrap(), "/data/Projects/Quarter 3");
	}

	#[test]
	fn bad_connections_do_not_stop_the_loop() {
		let (primary, addr) = primary();
		let (rx, _handle) = primary.into_channel().unwrap();
		{
			let mut raw = TcpStream::connect(addr).unwrap();
			raw.write_all(b"\xFF\xFE\xFD").unwrap();
		}
		{
			let _silent = TcpStream::connect(addr).unwrap();
		}
		let forwarder = SecondaryInstance { endpoint: addr, timeout: Duration::from_secs(1) };
		assert!(forwarder.send_payload("   "));
		assert!(forwarder.send_payload("C:\\Users"));
		assert!(forwarder.send_payload("D:\\Work"));
		assert_eq!(rx.recv_timeout(WAIT).unwrap(), "C:\\Users");
		assert_eq!(rx.recv_timeout(WAIT).unwrap(), "D:\\Work");
		assert_eq!(rx.recv_timeout(Duration::from_millis(200)), Err(RecvTimeoutError::Timeout));
	}

	#[test]
	fn oversized_payload_is_cut_at_the_limit() {
		let (primary, addr) = primary();
		let (rx, _handle) = primary.into_channel().unwrap();
		{
			let mut raw = TcpStream::connect(addr).unwrap();
			raw.write_all(&[b'a'; PAYLOAD_LIMIT + 100]).unwrap();
		}
		assert_eq!(rx.recv_timeout(WAIT).unwrap(), "a".repeat(PAYLOAD_LIMIT));
		{
			let mut raw = TcpStream::connect(addr).unwrap();
			let split_char = format!("{}é", "a".repeat(PAYLOAD_LIMIT - 1));
			raw.write_all(split_char.as_bytes()).unwrap();
		}
		let forwarder = SecondaryInstance { endpoint: addr, timeout: Duration::from_secs(1) };
		assert!(forwarder.send_payload("after"));
		assert_eq!(rx.recv_timeout(WAIT).unwrap(), "after");
	}

	#[test]
	fn idle_peer_is_dropped_after_read_timeout() {
		let (primary, addr) = primary();
		let (rx, _handle) = primary.into_channel().unwrap();
		let _idle = TcpStream::connect(addr).unwrap();
		let forwarder = SecondaryInstance { endpoint: addr, timeout: Duration::from_secs(1) };
		assert!(forwarder.send_payload("/srv/share"));
		assert_eq!(rx.recv_timeout(WAIT).unwrap(), "/srv/share");
	}

	#[test]
	fn handler_break_ends_the_loop() {
		let (primary, addr) = primary();
		let handle = primary.start_accepting(|_| ControlFlow::Break(())).unwrap();
		let forwarder = SecondaryInstance { endpoint: addr, timeout: Duration::from_secs(1) };
		assert!(forwarder.send_payload("stop"));
		handle.join().unwrap();
	}

	#[test]
	fn forwarding_without_primary_fails_quietly() {
		let addr = {
			let (primary, addr) = primary();
			drop(primary);
			addr
		};
		let forwarder = SecondaryInstance { endpoint: addr, timeout: Duration::from_millis(300) };
		assert!(matches!(forwarder.try_send_payload("x"), Err(ForwardError::Connect(_))));
		assert!(!forwarder.send_payload("x"));
	}

	#[rstest]
	#[case(b"", None)]
	#[case(b" \0", None)]
	#[case(b"C:\\test\\folder\0", Some("C:\\test\\folder"))]
	#[case(b"\t/home/a b/\n", Some("/home/a b/"))]
	fn decode_payload_trims(#[case] data: &[u8], #[case] expected: Option<&str>) {
		assert_eq!(decode_payload(data).unwrap().as_deref(), expected);
	}

	#[test]
	fn decode_payload_rejects_invalid_utf8() {
		assert!(decode_payload(b"\xC3\x28").is_err());
	}

	#[rstest]
	#[case("C:", "C:\\")]
	#[case("d:", "d:\\")]
	#[case("C:\\Data", "C:\\Data")]
	#[case("1:", "1:")]
	fn bare_drives_are_completed(#[case] input: &str, #[case] expected: &str) {
		assert_eq!(expand_bare_drive(input), expected);
	}

	#[test]
	fn normalize_path_arg_strips_quotes_and_resolves() {
		assert_eq!(normalize_path_arg("  \"\" "), None);
		assert_eq!(normalize_path_arg(""), None);
		#[cfg(windows)]
		let abs = "C:\\nonexistent_abs_path";
		#[cfg(not(windows))]
		let abs = "/nonexistent_abs_path";
		assert_eq!(normalize_path_arg(&format!("\"{abs}\"")), Some(PathBuf::from(abs)));
		let expected = env::current_dir().unwrap().join("nonexistent_rel_path");
		assert_eq!(normalize_path_arg("nonexistent_rel_path"), Some(expected));
	}

	#[test]
	fn existing_paths_lose_parent_segments() {
		let dir = tempfile::TempDir::new().unwrap();
		fs::create_dir(dir.path().join("inner")).unwrap();
		let dotted = dir.path().join("inner").join("..");
		let resolved = normalize_path_arg(&dotted.display().to_string()).unwrap();
		assert_eq!(resolved, normalize_cli_path(dir.path()));
		assert!(resolved.components().all(|part| part != std::path::Component::ParentDir));
	}

	#[rstest]
	#[case(r"\\?\C:\Data", r"C:\Data")]
	#[case(r"\\?\UNC\server\share", r"\\server\share")]
	#[case(r"\\?\Volume{1234}\", r"\\?\Volume{1234}\")]
	#[case("/home/user", "/home/user")]
	fn verbatim_prefixes_are_stripped(#[case] input: &str, #[case] expected: &str) {
		assert_eq!(strip_verbatim_prefix(PathBuf::from(input)), PathBuf::from(expected));
	}
}
