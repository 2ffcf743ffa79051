use std::{
	env,
	error::Error,
	fs::File,
	io::{self, Write},
	path::{Path, PathBuf},
	process::Command,
};

use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

const BINARY: &str = "foldertip";
const SAMPLE_CONFIG: &str = "\
[instance]
host = 127.0.0.1
port = 53333
timeout_ms = 1000

[listing]
skip = $RECYCLE.BIN, System Volume Information

[log]
level = info
";

fn main() -> Result<(), Box<dyn Error>> {
	if env::args().nth(1).as_deref() == Some("release") {
		return release();
	}
	println!("Usage: cargo xtask release");
	Ok(())
}

/// Builds the release binary and zips it next to a sample `foldertip.ini`.
fn release() -> Result<(), Box<dyn Error>> {
	let root = workspace_root();
	let cargo = env::var("CARGO").unwrap_or_else(|_| "cargo".to_string());
	if !Command::new(cargo).current_dir(&root).args(["build", "--release", "--bin", BINARY]).status()?.success() {
		return Err("cargo build failed".into());
	}
	let target_dir = root.join("target").join("release");
	let exe_name = format!("{BINARY}{}", env::consts::EXE_SUFFIX);
	let archive = target_dir.join(format!("{BINARY}_{}.zip", env::consts::OS));
	let mut zip = ZipWriter::new(File::create(&archive)?);
	let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
	zip.start_file(exe_name.as_str(), options)?;
	io::copy(&mut File::open(target_dir.join(&exe_name))?, &mut zip)?;
	zip.start_file("foldertip.ini.sample", options)?;
	zip.write_all(SAMPLE_CONFIG.as_bytes())?;
	zip.finish()?;
	println!("Created {}", archive.display());
	Ok(())
}

fn workspace_root() -> PathBuf {
	Path::new(env!("CARGO_MANIFEST_DIR")).parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}
