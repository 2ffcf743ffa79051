use std::{
	error::Error,
	fmt::{Display, Formatter, Result as FmtResult},
	fs, io,
	path::Path,
};

use log::{debug, warn};

use crate::encoding::{DECODE_ORDER, encode_utf16_with_bom};

pub const SIDECAR_FILE_NAME: &str = "desktop.ini";
pub const SHELL_CLASS_INFO: &str = ".ShellClassInfo";
pub const INFO_TIP_KEY: &str = "InfoTip";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
	name: String,
	entries: Vec<(String, String)>,
}

impl Section {
	fn new(name: &str) -> Self {
		Self { name: name.to_string(), entries: Vec::new() }
	}

	#[must_use]
	pub fn name(&self) -> &str {
		&self.name
	}

	#[must_use]
	pub fn entries(&self) -> &[(String, String)] {
		&self.entries
	}
}

/// Ordered sections, each an ordered list of case-preserving key/value pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
	sections: Vec<Section>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
	MissingSectionHeader,
	EmptySectionName,
	DuplicateSection(String),
	EmptyKey,
	DuplicateKey(String),
	Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
	pub line: usize,
	pub kind: ParseErrorKind,
}

impl Display for ParseError {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		match &self.kind {
			ParseErrorKind::MissingSectionHeader => write!(f, "line {}: entry before any section", self.line),
			ParseErrorKind::EmptySectionName => write!(f, "line {}: empty section name", self.line),
			ParseErrorKind::DuplicateSection(name) => write!(f, "line {}: duplicate section [{name}]", self.line),
			ParseErrorKind::EmptyKey => write!(f, "line {}: empty key", self.line),
			ParseErrorKind::DuplicateKey(key) => write!(f, "line {}: duplicate key {key}", self.line),
			ParseErrorKind::Unrecognized => write!(f, "line {}: not a section, entry or comment", self.line),
		}
	}
}

impl Error for ParseError {}

impl Document {
	#[must_use]
	pub const fn new() -> Self {
		Self { sections: Vec::new() }
	}

	/// # Errors
	///
	/// Returns a [`ParseError`] naming the first line that is not valid INI content.
	pub fn parse(text: &str) -> Result<Self, ParseError> {
		let mut doc = Self::new();
		let mut open_entry = false;
		let mut pending_blank_lines = 0;
		for (idx, raw_line) in text.lines().enumerate() {
			let line = idx + 1;
			let trimmed = raw_line.trim();
			if trimmed.is_empty() {
				if open_entry {
					pending_blank_lines += 1;
				}
				continue;
			}
			let indented = raw_line.starts_with(char::is_whitespace);
			if indented && open_entry {
				if let Some((_, value)) = doc.sections.last_mut().and_then(|s| s.entries.last_mut()) {
					for _ in 0..=pending_blank_lines {
						value.push('\n');
					}
					value.push_str(trimmed);
				}
				pending_blank_lines = 0;
				continue;
			}
			open_entry = false;
			pending_blank_lines = 0;
			if trimmed.starts_with('#') || trimmed.starts_with(';') {
				continue;
			}
			if let Some(name) = trimmed.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
				if name.is_empty() {
					return Err(ParseError { line, kind: ParseErrorKind::EmptySectionName });
				}
				if doc.section(name).is_some() {
					return Err(ParseError { line, kind: ParseErrorKind::DuplicateSection(name.to_string()) });
				}
				doc.sections.push(Section::new(name));
				continue;
			}
			let Some(section) = doc.sections.last_mut() else {
				return Err(ParseError { line, kind: ParseErrorKind::MissingSectionHeader });
			};
			let Some(split) = trimmed.find(['=', ':']) else {
				return Err(ParseError { line, kind: ParseErrorKind::Unrecognized });
			};
			let key = trimmed[..split].trim();
			let value = trimmed[split + 1..].trim();
			if key.is_empty() {
				return Err(ParseError { line, kind: ParseErrorKind::EmptyKey });
			}
			if section.entries.iter().any(|(existing, _)| existing == key) {
				return Err(ParseError { line, kind: ParseErrorKind::DuplicateKey(key.to_string()) });
			}
			section.entries.push((key.to_string(), value.to_string()));
			open_entry = true;
		}
		Ok(doc)
	}

	/// Decodes raw sidecar bytes, falling back to an empty document when nothing parses.
	#[must_use]
	pub fn decode(raw: Option<&[u8]>) -> Self {
		let Some(raw) = raw else {
			return Self::new();
		};
		for encoding in DECODE_ORDER {
			let Some(text) = encoding.decode(raw) else {
				continue;
			};
			match Self::parse(&text) {
				Ok(doc) => return doc,
				Err(err) => debug!("Sidecar rejected as {encoding:?}: {err}"),
			}
		}
		debug!("No candidate encoding produced a valid sidecar, treating it as empty");
		Self::new()
	}

	#[must_use]
	pub fn encode(&self) -> Vec<u8> {
		encode_utf16_with_bom(&self.to_text())
	}

	#[must_use]
	pub fn to_text(&self) -> String {
		let mut out = String::new();
		for section in &self.sections {
			out.push('[');
			out.push_str(&section.name);
			out.push_str("]\r\n");
			for (key, value) in &section.entries {
				let mut lines = value.split('\n');
				out.push_str(key);
				out.push_str(" = ");
				out.push_str(lines.next().unwrap_or_default());
				out.push_str("\r\n");
				for continuation in lines {
					out.push('\t');
					out.push_str(continuation);
					out.push_str("\r\n");
				}
			}
			out.push_str("\r\n");
		}
		out
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.sections.is_empty()
	}

	#[must_use]
	pub fn sections(&self) -> &[Section] {
		&self.sections
	}

	#[must_use]
	pub fn section(&self, name: &str) -> Option<&Section> {
		self.sections.iter().find(|s| s.name == name)
	}

	#[must_use]
	pub fn get_value(&self, section: &str, key: &str) -> Option<&str> {
		self.section(section)?.entries.iter().find(|(k, _)| keys_match(k, key)).map(|(_, v)| v.as_str())
	}

	/// Collapses every case variant of `key` into a single entry spelled as given.
	pub fn set_value(&mut self, section: &str, key: &str, value: &str) {
		let value = normalize_value(value);
		let idx = match self.sections.iter().position(|s| s.name == section) {
			Some(idx) => idx,
			None => {
				self.sections.push(Section::new(section));
				self.sections.len() - 1
			}
		};
		let entries = &mut self.sections[idx].entries;
		let slot = entries.iter().position(|(k, _)| keys_match(k, key)).unwrap_or(entries.len());
		entries.retain(|(k, _)| !keys_match(k, key));
		entries.insert(slot.min(entries.len()), (key.to_string(), value));
	}

	/// Removes every case variant of `key`; an emptied section goes with it.
	pub fn remove_key(&mut self, section: &str, key: &str) {
		let Some(idx) = self.sections.iter().position(|s| s.name == section) else {
			return;
		};
		self.sections[idx].entries.retain(|(k, _)| !keys_match(k, key));
		if self.sections[idx].entries.is_empty() {
			self.sections.remove(idx);
		}
	}
}

/// Reads the sidecar at `path`; absent or unreadable files yield an empty document.
#[must_use]
pub fn read_document(path: &Path) -> Document {
	match fs::read(path) {
		Ok(bytes) => Document::decode(Some(&bytes)),
		Err(err) if err.kind() == io::ErrorKind::NotFound => Document::new(),
		Err(err) => {
			warn!("Failed to read {}: {err}", path.display());
			Document::new()
		}
	}
}

fn keys_match(a: &str, b: &str) -> bool {
	a.eq_ignore_ascii_case(b) || a.to_lowercase() == b.to_lowercase()
}

// Stored lines are trimmed on read, so trim them on write too.
fn normalize_value(value: &str) -> String {
	let unified = value.replace("\r\n", "\n").replace('\r', "\n");
	unified.trim().lines().map(str::trim).collect::<Vec<_>>().join("\n")
}
