use std::{
	io::{self, BufRead, Write},
	ops::ControlFlow,
	path::{Path, PathBuf},
	sync::mpsc::{self, Sender},
	thread,
};

use anyhow::{Context, Result};
use foldertip::{
	attributes::AttributeStore,
	ipc::{PrimaryInstance, has_drive_prefix, normalize_cli_path, normalize_path_arg},
	mapping::{apply_mapping, parse_mapping, render_mapping},
	session::{RemarkSession, resolve_forwarded_path},
};
use log::{debug, info};

const MAPPING_END: &str = ".";
const HELP: &str = "\
Commands:
  cd <path>             open a folder (.. for the parent)
  ls                    list subfolders and remarks (* marks unsaved edits)
  set <name> <remark>   edit the remark of a subfolder
  clear <name>          remove the remark of a subfolder
  map [name ...]        edit remarks as name->remark lines, end with a single '.'
  save                  write all edited remarks
  refresh               reload the current folder
  help                  show this text
  quit                  exit";

/// Everything the main loop reacts to, whichever thread produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEvent {
	Input(String),
	InputClosed,
	Forwarded(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
	Cd(String),
	List,
	Set { name: String, remark: String },
	Clear(String),
	Map(Vec<String>),
	Save,
	Refresh,
	Help,
	Quit,
	Empty,
	Unknown(String),
}

impl Command {
	fn parse(line: &str) -> Self {
		let line = line.trim();
		let (word, rest) = line.split_once(char::is_whitespace).map_or((line, ""), |(w, r)| (w, r.trim()));
		match word.to_ascii_lowercase().as_str() {
			"" => Self::Empty,
			"cd" if !rest.is_empty() => Self::Cd(rest.to_string()),
			"ls" | "list" => Self::List,
			"set" => match split_name(rest) {
				Some((name, remark)) => Self::Set { name, remark: remark.to_string() },
				None => Self::Unknown(line.to_string()),
			},
			"clear" if !rest.is_empty() => Self::Clear(unquote(rest).to_string()),
			"map" => Self::Map(rest.split_whitespace().map(|name| unquote(name).to_string()).collect()),
			"save" => Self::Save,
			"refresh" => Self::Refresh,
			"help" | "?" => Self::Help,
			"quit" | "exit" => Self::Quit,
			_ => Self::Unknown(line.to_string()),
		}
	}
}

// Folder names may contain spaces when quoted: set "My Docs" some remark
fn split_name(rest: &str) -> Option<(String, &str)> {
	if let Some(quoted) = rest.strip_prefix('"') {
		let (name, remark) = quoted.split_once('"')?;
		return (!name.is_empty()).then(|| (name.to_string(), remark.trim()));
	}
	let (name, remark) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
	(!name.is_empty()).then(|| (name.to_string(), remark.trim()))
}

fn unquote(text: &str) -> &str {
	text.trim().trim_matches('"')
}

pub struct Shell<A, W> {
	session: RemarkSession<A>,
	out: W,
	mapping: Option<(Vec<PathBuf>, Vec<String>)>,
	quit_warned: bool,
}

impl<A: AttributeStore, W: Write> Shell<A, W> {
	pub const fn new(session: RemarkSession<A>, out: W) -> Self {
		Self { session, out, mapping: None, quit_warned: false }
	}

	#[cfg(test)]
	pub const fn session(&self) -> &RemarkSession<A> {
		&self.session
	}

	pub fn open(&mut self, dir: &Path) -> Result<()> {
		if !dir.is_dir() {
			writeln!(self.out, "Not a folder: {}", dir.display())?;
			return Ok(());
		}
		let discarded = self.session.dirty().count();
		if discarded > 0 {
			writeln!(self.out, "Discarding {discarded} unsaved edit(s)")?;
		}
		self.session.load(dir);
		writeln!(self.out, "{} ({} folders)", dir.display(), self.session.entries().len())?;
		Ok(())
	}

	pub fn handle(&mut self, event: ShellEvent) -> Result<ControlFlow<()>> {
		match event {
			ShellEvent::Input(line) => {
				if self.mapping.is_some() {
					return self.collect_mapping_line(line);
				}
				self.execute(Command::parse(&line))
			}
			ShellEvent::Forwarded(payload) => {
				info!("Opening forwarded path {payload}");
				match resolve_forwarded_path(&payload) {
					Ok(dir) => self.open(&dir)?,
					Err(err) => writeln!(self.out, "{err}")?,
				}
				Ok(ControlFlow::Continue(()))
			}
			ShellEvent::InputClosed => Ok(ControlFlow::Break(())),
		}
	}

	fn execute(&mut self, command: Command) -> Result<ControlFlow<()>> {
		debug!("Executing {command:?}");
		if command != Command::Quit {
			self.quit_warned = false;
		}
		match command {
			Command::Empty => {}
			Command::Cd(arg) => self.change_dir(&arg)?,
			Command::List => self.list()?,
			Command::Set { name, remark } => self.edit(&name, &remark)?,
			Command::Clear(name) => self.edit(&name, "")?,
			Command::Map(names) => self.begin_mapping(&names)?,
			Command::Save => self.save()?,
			Command::Refresh => self.session.refresh(),
			Command::Help => writeln!(self.out, "{HELP}")?,
			Command::Quit => {
				let pending = self.session.dirty().count();
				if pending > 0 && !self.quit_warned {
					self.quit_warned = true;
					writeln!(self.out, "{pending} unsaved edit(s); quit again to discard them")?;
				} else {
					return Ok(ControlFlow::Break(()));
				}
			}
			Command::Unknown(line) => writeln!(self.out, "Unknown command: {line} (try help)")?,
		}
		Ok(ControlFlow::Continue(()))
	}

	fn change_dir(&mut self, arg: &str) -> Result<()> {
		let current = self.session.current_dir().map(Path::to_path_buf);
		let target = match (unquote(arg), current) {
			("..", Some(current)) => current.parent().map_or(current.clone(), Path::to_path_buf),
			(relative, Some(current)) if Path::new(relative).is_relative() && !has_drive_prefix(relative) => {
				normalize_cli_path(&current.join(relative))
			}
			_ => match normalize_path_arg(arg) {
				Some(path) => path,
				None => return Ok(()),
			},
		};
		self.open(&target)
	}

	fn list(&mut self) -> Result<()> {
		let Some(dir) = self.session.current_dir() else {
			writeln!(self.out, "No folder open (use cd)")?;
			return Ok(());
		};
		writeln!(self.out, "{}", dir.display())?;
		for entry in self.session.entries() {
			let marker = if entry.is_dirty() { '*' } else { ' ' };
			writeln!(self.out, "{marker} {:<32} {}", entry.name, entry.current_remark.replace('\n', " / "))?;
		}
		Ok(())
	}

	fn edit(&mut self, name: &str, remark: &str) -> Result<()> {
		let Some(path) = self.session.find_by_name(name).map(|entry| entry.path.clone()) else {
			writeln!(self.out, "No folder named {name}")?;
			return Ok(());
		};
		self.session.set_remark(&[path], remark);
		Ok(())
	}

	fn begin_mapping(&mut self, names: &[String]) -> Result<()> {
		let selected: Vec<PathBuf> = self
			.session
			.entries()
			.iter()
			.filter(|entry| names.is_empty() || names.contains(&entry.name))
			.map(|entry| entry.path.clone())
			.collect();
		if selected.is_empty() {
			writeln!(self.out, "Select at least one folder")?;
			return Ok(());
		}
		let current = render_mapping(self.session.entries().iter().filter(|entry| selected.contains(&entry.path)));
		writeln!(self.out, "{current}")?;
		writeln!(self.out, "Enter name->remark lines (name-> clears), finish with '{MAPPING_END}':")?;
		self.mapping = Some((selected, Vec::new()));
		Ok(())
	}

	fn collect_mapping_line(&mut self, line: String) -> Result<ControlFlow<()>> {
		if line.trim() != MAPPING_END {
			if let Some((_, lines)) = self.mapping.as_mut() {
				lines.push(line);
			}
			return Ok(ControlFlow::Continue(()));
		}
		let Some((selected, lines)) = self.mapping.take() else {
			return Ok(ControlFlow::Continue(()));
		};
		match parse_mapping(&lines.join("\n")) {
			Ok(pairs) => {
				let outcome = apply_mapping(&mut self.session, &selected, &pairs);
				for message in outcome.messages() {
					writeln!(self.out, "{message}")?;
				}
			}
			Err(err) => writeln!(self.out, "{err}")?,
		}
		Ok(ControlFlow::Continue(()))
	}

	fn save(&mut self) -> Result<()> {
		if !self.session.has_unsaved_changes() {
			writeln!(self.out, "Nothing to save")?;
			return Ok(());
		}
		let report = self.session.save();
		writeln!(self.out, "{}", report.summary())?;
		self.session.refresh();
		Ok(())
	}
}

/// Drives the shell until input ends or the user quits, feeding forwarded paths in between commands.
pub fn run<A: AttributeStore>(primary: PrimaryInstance, session: RemarkSession<A>, initial: Option<PathBuf>) -> Result<()> {
	let (tx, rx) = mpsc::channel();
	spawn_input_reader(tx.clone()).context("Failed to start input reader")?;
	let forward = tx;
	primary
		.start_accepting(move |payload| match forward.send(ShellEvent::Forwarded(payload)) {
			Ok(()) => ControlFlow::Continue(()),
			Err(_) => ControlFlow::Break(()),
		})
		.context("Failed to start accept loop")?;

	let stdout = io::stdout();
	let mut shell = Shell::new(session, stdout.lock());
	writeln!(shell.out, "Type help for commands")?;
	if let Some(dir) = initial {
		shell.open(&dir)?;
	}
	for event in rx {
		if shell.handle(event)?.is_break() {
			break;
		}
	}
	Ok(())
}

fn spawn_input_reader(tx: Sender<ShellEvent>) -> io::Result<()> {
	thread::Builder::new().name("foldertip-input".to_string()).spawn(move || {
		for line in io::stdin().lock().lines() {
			let Ok(line) = line else { break };
			if tx.send(ShellEvent::Input(line)).is_err() {
				return;
			}
		}
		let _ = tx.send(ShellEvent::InputClosed);
	})?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use std::fs;

	use foldertip::{
		attributes::NativeAttributes,
		remarks::{DEFAULT_SKIP_NAMES, RemarkService},
	};
	use rstest::rstest;
	use tempfile::TempDir;

	use super::*;

	fn shell() -> Shell<NativeAttributes, Vec<u8>> {
		Shell::new(RemarkSession::new(RemarkService::with_store(NativeAttributes, DEFAULT_SKIP_NAMES)), Vec::new())
	}

	fn input(shell: &mut Shell<NativeAttributes, Vec<u8>>, line: &str) -> ControlFlow<()> {
		shell.handle(ShellEvent::Input(line.to_string())).unwrap()
	}

	fn output(shell: &Shell<NativeAttributes, Vec<u8>>) -> String {
		String::from_utf8_lossy(&shell.out).into_owned()
	}

	#[rstest]
	#[case("ls", Command::List)]
	#[case("  SAVE ", Command::Save)]
	#[case("set Docs quarterly reports", Command::Set { name: "Docs".into(), remark: "quarterly reports".into() })]
	#[case("set \"My Docs\" notes", Command::Set { name: "My Docs".into(), remark: "notes".into() })]
	#[case("set Docs", Command::Set { name: "Docs".into(), remark: String::new() })]
	#[case("clear \"My Docs\"", Command::Clear("My Docs".into()))]
	#[case("map a b", Command::Map(vec!["a".into(), "b".into()]))]
	#[case("cd C:", Command::Cd("C:".into()))]
	#[case("", Command::Empty)]
	#[case("cd", Command::Unknown("cd".into()))]
	#[case("frobnicate", Command::Unknown("frobnicate".into()))]
	fn parses_commands(#[case] line: &str, #[case] expected: Command) {
		assert_eq!(Command::parse(line), expected);
	}

	#[test]
	fn edit_and_save_round_trip() {
		let root = TempDir::new().unwrap();
		fs::create_dir(root.path().join("Docs")).unwrap();
		let mut shell = shell();
		input(&mut shell, &format!("cd {}", root.path().display()));
		input(&mut shell, "set Docs quarterly reports");
		input(&mut shell, "save");
		assert!(output(&shell).contains("Processed: 1 | Succeeded: 1 | Failed: 0"));
		assert_eq!(shell.session().service().read_remark(&root.path().join("Docs")), "quarterly reports");
		assert!(!shell.session().has_unsaved_changes());
	}

	#[test]
	fn mapping_mode_collects_until_terminator() {
		let root = TempDir::new().unwrap();
		for name in ["a", "b"] {
			fs::create_dir(root.path().join(name)).unwrap();
		}
		let mut shell = shell();
		shell.open(root.path()).unwrap();
		input(&mut shell, "map");
		input(&mut shell, "a->first");
		input(&mut shell, "b->second");
		assert_eq!(shell.session().dirty().count(), 0);
		input(&mut shell, ".");
		assert_eq!(shell.session().dirty().count(), 2);
		assert!(output(&shell).contains("Applied: a, b"));
	}

	#[test]
	fn quit_warns_once_about_unsaved_edits() {
		let root = TempDir::new().unwrap();
		fs::create_dir(root.path().join("a")).unwrap();
		let mut shell = shell();
		shell.open(root.path()).unwrap();
		input(&mut shell, "set a pending");
		assert!(input(&mut shell, "quit").is_continue());
		assert!(input(&mut shell, "quit").is_break());
	}

	#[test]
	fn forwarded_path_opens_folder() {
		let root = TempDir::new().unwrap();
		fs::create_dir(root.path().join("inner")).unwrap();
		let mut shell = shell();
		let flow = shell.handle(ShellEvent::Forwarded(root.path().display().to_string())).unwrap();
		assert!(flow.is_continue());
		assert_eq!(shell.session().current_dir(), Some(root.path()));
		assert_eq!(shell.session().entries().len(), 1);
		shell.handle(ShellEvent::Forwarded(root.path().join("missing").display().to_string())).unwrap();
		assert!(output(&shell).contains("Folder does not exist"));
		assert_eq!(shell.session().current_dir(), Some(root.path()));
	}

	#[test]
	fn relative_cd_and_parent() {
		let root = TempDir::new().unwrap();
		let root_path = normalize_cli_path(root.path());
		fs::create_dir_all(root_path.join("outer").join("inner")).unwrap();
		let mut shell = shell();
		shell.open(&root_path).unwrap();
		input(&mut shell, "cd outer");
		assert_eq!(shell.session().current_dir(), Some(root_path.join("outer").as_path()));
		input(&mut shell, "cd ..");
		assert_eq!(shell.session().current_dir(), Some(root_path.as_path()));
	}

	#[test]
	fn dotted_relative_cd_resolves_before_parent() {
		let root = TempDir::new().unwrap();
		let root_path = normalize_cli_path(root.path());
		fs::create_dir_all(root_path.join("outer").join("inner")).unwrap();
		let mut shell = shell();
		shell.open(&root_path.join("outer")).unwrap();
		input(&mut shell, "cd inner/..");
		assert_eq!(shell.session().current_dir(), Some(root_path.join("outer").as_path()));
		input(&mut shell, "cd ..");
		assert_eq!(shell.session().current_dir(), Some(root_path.as_path()));
	}

	#[test]
	fn closed_input_stops_the_loop() {
		assert!(shell().handle(ShellEvent::InputClosed).unwrap().is_break());
	}
}
