use std::{
	error::Error,
	fmt::{Display, Formatter, Result as FmtResult},
	path::{Path, PathBuf},
};

use bitflags::bitflags;
use log::debug;

bitflags! {
	/// File system visibility bits, using the Win32 values.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
	pub struct AttributeFlags: u32 {
		const READONLY = 0x0001;
		const HIDDEN = 0x0002;
		const SYSTEM = 0x0004;
		const DIRECTORY = 0x0010;
		const ARCHIVE = 0x0020;
	}
}

#[derive(Debug)]
pub enum AttributeError {
	NotFound(PathBuf),
	OperationFailed { path: PathBuf, reason: String },
}

impl Display for AttributeError {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		match self {
			Self::NotFound(path) => write!(f, "Cannot read attributes: {}", path.display()),
			Self::OperationFailed { path, reason } => {
				write!(f, "Failed to set attributes on {}: {reason}", path.display())
			}
		}
	}
}

impl Error for AttributeError {}

/// Raw access to the attribute bits the shell consults before it honours a folder info tip.
pub trait AttributeStore {
	/// # Errors
	///
	/// Returns [`AttributeError::NotFound`] if the path does not resolve to a file system entry.
	fn get_attributes(&self, path: &Path) -> Result<AttributeFlags, AttributeError>;

	/// Applies the full flag set in one call.
	///
	/// # Errors
	///
	/// Returns [`AttributeError::OperationFailed`] if the platform rejects the change.
	fn set_attributes(&self, path: &Path, flags: AttributeFlags) -> Result<(), AttributeError>;

	/// # Errors
	///
	/// Propagates read or write failures.
	fn ensure_system_flag(&self, folder: &Path) -> Result<(), AttributeError> {
		let current = self.get_attributes(folder)?;
		if current.contains(AttributeFlags::SYSTEM) {
			return Ok(());
		}
		debug!("Marking {} as system", folder.display());
		self.set_attributes(folder, current | AttributeFlags::SYSTEM)
	}

	/// # Errors
	///
	/// Propagates read or write failures.
	fn ensure_hidden_and_system(&self, file: &Path) -> Result<(), AttributeError> {
		let current = self.get_attributes(file)?;
		let target = current | AttributeFlags::HIDDEN | AttributeFlags::SYSTEM;
		if target == current {
			return Ok(());
		}
		debug!("Marking {} as hidden and system", file.display());
		self.set_attributes(file, target)
	}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NativeAttributes;

#[cfg(windows)]
impl AttributeStore for NativeAttributes {
	fn get_attributes(&self, path: &Path) -> Result<AttributeFlags, AttributeError> {
		use windows::{
			Win32::Storage::FileSystem::{GetFileAttributesW, INVALID_FILE_ATTRIBUTES},
			core::PCWSTR,
		};

		let wide = to_wide(path);
		let raw = unsafe { GetFileAttributesW(PCWSTR(wide.as_ptr())) };
		if raw == INVALID_FILE_ATTRIBUTES {
			return Err(AttributeError::NotFound(path.to_path_buf()));
		}
		Ok(AttributeFlags::from_bits_retain(raw))
	}

	fn set_attributes(&self, path: &Path, flags: AttributeFlags) -> Result<(), AttributeError> {
		use windows::{
			Win32::Storage::FileSystem::{FILE_FLAGS_AND_ATTRIBUTES, SetFileAttributesW},
			core::PCWSTR,
		};

		let wide = to_wide(path);
		unsafe { SetFileAttributesW(PCWSTR(wide.as_ptr()), FILE_FLAGS_AND_ATTRIBUTES(flags.bits())) }
			.map_err(|err| AttributeError::OperationFailed { path: path.to_path_buf(), reason: err.to_string() })
	}
}

#[cfg(windows)]
fn to_wide(path: &Path) -> Vec<u16> {
	use std::os::windows::ffi::OsStrExt;

	path.as_os_str().encode_wide().chain(std::iter::once(0)).collect()
}

// Hidden and system bits have no storage outside Windows; only what metadata can express is reported.
#[cfg(not(windows))]
impl AttributeStore for NativeAttributes {
	fn get_attributes(&self, path: &Path) -> Result<AttributeFlags, AttributeError> {
		let metadata = std::fs::metadata(path).map_err(|_| AttributeError::NotFound(path.to_path_buf()))?;
		let mut flags = AttributeFlags::empty();
		if metadata.is_dir() {
			flags |= AttributeFlags::DIRECTORY;
		}
		if metadata.permissions().readonly() {
			flags |= AttributeFlags::READONLY;
		}
		if path.file_name().is_some_and(|name| name.to_string_lossy().starts_with('.')) {
			flags |= AttributeFlags::HIDDEN;
		}
		Ok(flags)
	}

	fn set_attributes(&self, path: &Path, flags: AttributeFlags) -> Result<(), AttributeError> {
		let failed = |reason: String| AttributeError::OperationFailed { path: path.to_path_buf(), reason };
		let metadata = std::fs::metadata(path).map_err(|err| failed(err.to_string()))?;
		let mut permissions = metadata.permissions();
		let readonly = flags.contains(AttributeFlags::READONLY);
		if permissions.readonly() != readonly {
			#[allow(clippy::permissions_set_readonly_false)]
			permissions.set_readonly(readonly);
			std::fs::set_permissions(path, permissions).map_err(|err| failed(err.to_string()))?;
		}
		Ok(())
	}
}
