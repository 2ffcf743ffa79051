use std::{
	fmt::Write,
	path::{Path, PathBuf},
};

use log::{info, warn};

use crate::{
	attributes::{AttributeStore, NativeAttributes},
	remarks::{FolderRemark, RemarkError, RemarkService},
};

#[derive(Debug)]
pub struct SaveFailure {
	pub name: String,
	pub path: PathBuf,
	pub error: RemarkError,
}

#[derive(Debug, Default)]
pub struct SaveReport {
	pub succeeded: Vec<String>,
	pub failed: Vec<SaveFailure>,
}

impl SaveReport {
	#[must_use]
	pub fn total(&self) -> usize {
		self.succeeded.len() + self.failed.len()
	}

	#[must_use]
	pub fn summary(&self) -> String {
		let mut out = format!(
			"Processed: {} | Succeeded: {} | Failed: {}",
			self.total(),
			self.succeeded.len(),
			self.failed.len()
		);
		if !self.succeeded.is_empty() {
			let _ = write!(out, "\nSucceeded ({}): {}", self.succeeded.len(), self.succeeded.join(", "));
		}
		if !self.failed.is_empty() {
			out.push_str("\nFailed:");
			for failure in &self.failed {
				let _ = write!(out, "\n- {}: {}", failure.name, failure.error);
			}
		}
		out
	}
}

/// The folders of one directory and their pending remark edits.
pub struct RemarkSession<A = NativeAttributes> {
	service: RemarkService<A>,
	current_dir: Option<PathBuf>,
	entries: Vec<FolderRemark>,
}

impl<A: AttributeStore> RemarkSession<A> {
	pub const fn new(service: RemarkService<A>) -> Self {
		Self { service, current_dir: None, entries: Vec::new() }
	}

	pub const fn service(&self) -> &RemarkService<A> {
		&self.service
	}

	pub fn current_dir(&self) -> Option<&Path> {
		self.current_dir.as_deref()
	}

	pub fn entries(&self) -> &[FolderRemark] {
		&self.entries
	}

	/// Replaces the entries with the subfolders of `dir`, discarding unsaved edits.
	pub fn load(&mut self, dir: &Path) {
		self.entries = self
			.service
			.list_subfolders(dir)
			.into_iter()
			.map(|path| {
				let remark = self.service.read_remark(&path);
				FolderRemark::new(path, remark)
			})
			.collect();
		self.current_dir = Some(dir.to_path_buf());
		info!("Loaded {} folders from {}", self.entries.len(), dir.display());
	}

	pub fn refresh(&mut self) {
		if let Some(dir) = self.current_dir.clone() {
			self.load(&dir);
		}
	}

	pub fn find_by_name(&self, name: &str) -> Option<&FolderRemark> {
		self.entries.iter().find(|entry| entry.name == name)
	}

	/// Sets the edited remark on the entries at `paths`, returning how many matched.
	pub fn set_remark(&mut self, paths: &[PathBuf], remark: &str) -> usize {
		let mut updated = 0;
		for entry in self.entries.iter_mut().filter(|entry| paths.contains(&entry.path)) {
			entry.current_remark = remark.to_string();
			updated += 1;
		}
		updated
	}

	pub fn dirty(&self) -> impl Iterator<Item = &FolderRemark> {
		self.entries.iter().filter(|entry| entry.is_dirty())
	}

	pub fn has_unsaved_changes(&self) -> bool {
		self.dirty().next().is_some()
	}

	/// Writes every edited remark independently; one failure never stops the rest.
	pub fn save(&mut self) -> SaveReport {
		let mut report = SaveReport::default();
		for entry in self.entries.iter_mut().filter(|entry| entry.is_dirty()) {
			match self.service.write_remark(&entry.path, &entry.current_remark) {
				Ok(()) => {
					entry.original_remark.clone_from(&entry.current_remark);
					report.succeeded.push(entry.name.clone());
				}
				Err(error) => {
					warn!("Failed to save remark for {}: {error}", entry.path.display());
					report.failed.push(SaveFailure { name: entry.name.clone(), path: entry.path.clone(), error });
				}
			}
		}
		info!("Saved {} remarks, {} failed", report.succeeded.len(), report.failed.len());
		report
	}
}

/// Turns a forwarded payload into the folder to open; a file opens its parent folder.
///
/// # Errors
///
/// Returns [`RemarkError::NotFound`] if nothing exists at the path.
pub fn resolve_forwarded_path(text: &str) -> Result<PathBuf, RemarkError> {
	let target = PathBuf::from(text.trim());
	if text.trim().is_empty() || !target.exists() {
		return Err(RemarkError::NotFound(target));
	}
	if target.is_dir() {
		return Ok(target);
	}
	Ok(target.parent().map_or(target.clone(), Path::to_path_buf))
}
