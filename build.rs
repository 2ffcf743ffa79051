use std::env;

use embed_manifest::{
	embed_manifest,
	manifest::{Setting, SupportedOS::*},
	new_manifest,
};

fn main() {
	let target = env::var("TARGET").unwrap_or_default();
	if target.contains("windows") {
		let manifest = new_manifest("Foldertip")
			.supported_os(Windows7..=Windows10)
			.long_path_aware(Setting::Enabled);
		if let Err(e) = embed_manifest(manifest) {
			println!("cargo:warning=Failed to embed manifest: {}", e);
			println!("cargo:warning=Long paths may not be available without the manifest");
		}
		println!("cargo:rerun-if-changed=build.rs");
	}
}
