//! The `name->remark` text format for editing many remarks at once.

use std::{
	collections::HashMap,
	error::Error,
	fmt::{Display, Formatter, Result as FmtResult},
	path::PathBuf,
};

use crate::{attributes::AttributeStore, remarks::FolderRemark, session::RemarkSession};

pub const MAPPING_SEPARATOR: &str = "->";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
	MissingSeparator { line: usize, text: String },
	EmptyName { line: usize, text: String },
	NoEntries,
}

impl Display for MappingError {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		match self {
			Self::MissingSeparator { line, text } => write!(f, "Line {line} is missing '{MAPPING_SEPARATOR}': {text}"),
			Self::EmptyName { line, text } => write!(f, "Line {line} has an empty folder name: {text}"),
			Self::NoEntries => write!(f, "No usable mappings, check the input"),
		}
	}
}

impl Error for MappingError {}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct MappingOutcome {
	pub applied: Vec<String>,
	pub unchanged: Vec<String>,
	pub missing: Vec<String>,
	pub extra: Vec<String>,
}

impl MappingOutcome {
	/// Whether every selected folder got a line and every line matched a selected folder.
	#[must_use]
	pub fn is_complete(&self) -> bool {
		self.missing.is_empty() && self.extra.is_empty()
	}

	#[must_use]
	pub fn messages(&self) -> Vec<String> {
		[
			("Applied", &self.applied),
			("Unchanged", &self.unchanged),
			("No remark given", &self.missing),
			("Unmatched names", &self.extra),
		]
		.into_iter()
		.filter(|(_, names)| !names.is_empty())
		.map(|(label, names)| format!("{label}: {}", names.join(", ")))
		.collect()
	}
}

#[must_use]
pub fn render_mapping<'a>(entries: impl IntoIterator<Item = &'a FolderRemark>) -> String {
	entries
		.into_iter()
		.map(|entry| format!("{}{MAPPING_SEPARATOR}{}", entry.name, entry.current_remark))
		.collect::<Vec<_>>()
		.join("\n")
}

/// Parses mapping lines into name/remark pairs in input order; a repeated name keeps its last remark.
///
/// # Errors
///
/// Returns the first malformed line, or [`MappingError::NoEntries`] when nothing usable was given.
pub fn parse_mapping(text: &str) -> Result<Vec<(String, String)>, MappingError> {
	let mut pairs: Vec<(String, String)> = Vec::new();
	for (idx, raw) in text.lines().enumerate() {
		let line = idx + 1;
		let stripped = raw.trim();
		if stripped.is_empty() {
			continue;
		}
		let Some((name, remark)) = stripped.split_once(MAPPING_SEPARATOR) else {
			return Err(MappingError::MissingSeparator { line, text: raw.to_string() });
		};
		let name = name.trim();
		if name.is_empty() {
			return Err(MappingError::EmptyName { line, text: raw.to_string() });
		}
		match pairs.iter_mut().find(|(existing, _)| existing == name) {
			Some(pair) => pair.1 = remark.to_string(),
			None => pairs.push((name.to_string(), remark.to_string())),
		}
	}
	if pairs.is_empty() {
		return Err(MappingError::NoEntries);
	}
	Ok(pairs)
}

/// Applies parsed mappings to the selected entries of `session`.
pub fn apply_mapping<A: AttributeStore>(
	session: &mut RemarkSession<A>,
	selected: &[PathBuf],
	mapping: &[(String, String)],
) -> MappingOutcome {
	let by_name: HashMap<String, (PathBuf, String)> = session
		.entries()
		.iter()
		.filter(|entry| selected.contains(&entry.path))
		.map(|entry| (entry.name.clone(), (entry.path.clone(), entry.current_remark.clone())))
		.collect();
	let mut outcome = MappingOutcome::default();
	for (name, remark) in mapping {
		match by_name.get(name) {
			Some((_, current)) if current == remark => outcome.unchanged.push(name.clone()),
			Some((path, _)) => {
				session.set_remark(std::slice::from_ref(path), remark);
				outcome.applied.push(name.clone());
			}
			None => outcome.extra.push(name.clone()),
		}
	}
	for entry in session.entries().iter().filter(|entry| selected.contains(&entry.path)) {
		if !mapping.iter().any(|(name, _)| *name == entry.name) {
			outcome.missing.push(entry.name.clone());
		}
	}
	outcome
}
