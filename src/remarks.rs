use std::{
	collections::HashSet,
	error::Error,
	fmt::{Display, Formatter, Result as FmtResult},
	fs::{self, OpenOptions},
	io::{self, Write},
	path::{Path, PathBuf},
};

use log::{debug, info, warn};

use crate::{
	attributes::{AttributeError, AttributeStore, NativeAttributes},
	sidecar::{INFO_TIP_KEY, SHELL_CLASS_INFO, SIDECAR_FILE_NAME, read_document},
};

pub const DEFAULT_SKIP_NAMES: [&str; 2] = ["$RECYCLE.BIN", "System Volume Information"];

/// One listed folder and its remark, as read and as edited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderRemark {
	pub name: String,
	pub path: PathBuf,
	pub original_remark: String,
	pub current_remark: String,
}

impl FolderRemark {
	#[must_use]
	pub fn new(path: PathBuf, remark: String) -> Self {
		let name = path.file_name().map_or_else(|| path.to_string_lossy().into_owned(), |n| n.to_string_lossy().into_owned());
		Self { name, path, original_remark: remark.clone(), current_remark: remark }
	}

	#[must_use]
	pub fn is_dirty(&self) -> bool {
		self.current_remark != self.original_remark
	}
}

#[derive(Debug)]
pub enum RemarkError {
	NotFound(PathBuf),
	Attribute(AttributeError),
	Io { path: PathBuf, source: io::Error },
}

impl RemarkError {
	#[must_use]
	pub const fn is_not_found(&self) -> bool {
		matches!(self, Self::NotFound(_))
	}
}

impl Display for RemarkError {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		match self {
			Self::NotFound(path) => write!(f, "Folder does not exist: {}", path.display()),
			Self::Attribute(err) => write!(f, "{err}"),
			Self::Io { path, source } => write!(f, "Failed to update {}: {source}", path.display()),
		}
	}
}

impl Error for RemarkError {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		match self {
			Self::NotFound(_) => None,
			Self::Attribute(err) => Some(err),
			Self::Io { source, .. } => Some(source),
		}
	}
}

impl From<AttributeError> for RemarkError {
	fn from(err: AttributeError) -> Self {
		match err {
			AttributeError::NotFound(path) => Self::NotFound(path),
			other @ AttributeError::OperationFailed { .. } => Self::Attribute(other),
		}
	}
}

pub struct RemarkService<A = NativeAttributes> {
	attributes: A,
	skip_names: HashSet<String>,
}

impl Default for RemarkService<NativeAttributes> {
	fn default() -> Self {
		Self::new()
	}
}

impl RemarkService<NativeAttributes> {
	#[must_use]
	pub fn new() -> Self {
		Self::with_store(NativeAttributes, DEFAULT_SKIP_NAMES)
	}
}

impl<A: AttributeStore> RemarkService<A> {
	pub fn with_store<I, S>(attributes: A, skip_names: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let skip_names = skip_names.into_iter().map(|name| name.as_ref().to_lowercase()).collect();
		Self { attributes, skip_names }
	}

	pub const fn attributes(&self) -> &A {
		&self.attributes
	}

	#[must_use]
	pub fn is_skipped(&self, name: &str) -> bool {
		self.skip_names.contains(&name.to_lowercase())
	}

	/// Immediate child folders of `parent`, sorted by path.
	///
	/// A missing or unreadable parent gives an empty list, and children that cannot be inspected are left out.
	#[must_use]
	pub fn list_subfolders(&self, parent: &Path) -> Vec<PathBuf> {
		let entries = match fs::read_dir(parent) {
			Ok(entries) => entries,
			Err(err) => {
				if err.kind() != io::ErrorKind::NotFound {
					warn!("Cannot list {}: {err}", parent.display());
				}
				return Vec::new();
			}
		};
		let mut folders: Vec<PathBuf> = entries
			.filter_map(Result::ok)
			.filter(|entry| entry.file_type().is_ok_and(|kind| kind.is_dir()))
			.filter(|entry| !self.is_skipped(&entry.file_name().to_string_lossy()))
			.map(|entry| entry.path())
			.collect();
		folders.sort();
		folders
	}

	/// The folder's info tip, or an empty string when there is none or it cannot be read.
	#[must_use]
	pub fn read_remark(&self, folder: &Path) -> String {
		read_document(&folder.join(SIDECAR_FILE_NAME))
			.get_value(SHELL_CLASS_INFO, INFO_TIP_KEY)
			.map(ToString::to_string)
			.unwrap_or_default()
	}

	/// Stores `remark` as the folder's info tip; a blank remark removes it.
	///
	/// The folder keeps its system attribute afterwards even when the remark is cleared. Each line is stored
	/// trimmed and `\r\n` becomes `\n`, so only remarks already in that form read back unchanged.
	///
	/// # Errors
	///
	/// Returns [`RemarkError::NotFound`] if the folder is missing, or the attribute or I/O failure that stopped the
	/// write.
	pub fn write_remark(&self, folder: &Path, remark: &str) -> Result<(), RemarkError> {
		if !folder.is_dir() {
			return Err(RemarkError::NotFound(folder.to_path_buf()));
		}
		self.attributes.ensure_system_flag(folder)?;
		let sidecar = folder.join(SIDECAR_FILE_NAME);
		let mut doc = read_document(&sidecar);
		if remark.trim().is_empty() {
			doc.remove_key(SHELL_CLASS_INFO, INFO_TIP_KEY);
		} else {
			doc.set_value(SHELL_CLASS_INFO, INFO_TIP_KEY, remark);
		}
		if doc.is_empty() {
			if sidecar.exists() {
				fs::remove_file(&sidecar).map_err(|source| RemarkError::Io { path: sidecar.clone(), source })?;
				info!("Removed empty sidecar in {}", folder.display());
			}
			return Ok(());
		}
		write_sidecar(&sidecar, &doc.encode()).map_err(|source| RemarkError::Io { path: sidecar.clone(), source })?;
		self.attributes.ensure_hidden_and_system(&sidecar)?;
		debug!("Wrote remark for {}", folder.display());
		Ok(())
	}
}

// Windows refuses CREATE_ALWAYS on hidden files, so an existing sidecar is truncated in place.
fn write_sidecar(path: &Path, bytes: &[u8]) -> io::Result<()> {
	let mut options = OpenOptions::new();
	options.write(true);
	if path.exists() {
		options.truncate(true);
	} else {
		options.create_new(true);
	}
	let mut file = options.open(path)?;
	file.write_all(bytes)?;
	file.flush()
}
