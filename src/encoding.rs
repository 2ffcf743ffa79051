use std::{str, sync::OnceLock};

use encoding_rs::{
	BIG5, EUC_KR, Encoding, GBK, SHIFT_JIS, UTF_8, UTF_16BE, UTF_16LE, WINDOWS_874, WINDOWS_1250, WINDOWS_1251,
	WINDOWS_1252, WINDOWS_1253, WINDOWS_1254, WINDOWS_1255, WINDOWS_1256, WINDOWS_1257, WINDOWS_1258,
};

const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];
const UTF16LE_BOM: [u8; 2] = [0xFF, 0xFE];
const UTF16BE_BOM: [u8; 2] = [0xFE, 0xFF];

/// Text encodings a sidecar may have been written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
	Utf16Bom,
	Utf8,
	AnsiCodePage,
}

/// Order in which stored text is tried; the first that decodes and parses wins.
pub const DECODE_ORDER: [TextEncoding; 3] = [TextEncoding::Utf16Bom, TextEncoding::Utf8, TextEncoding::AnsiCodePage];

impl TextEncoding {
	/// Strict decode: any malformed sequence rejects the whole input.
	#[must_use]
	pub fn decode(self, input: &[u8]) -> Option<String> {
		match self {
			Self::Utf16Bom => {
				if let Some(rest) = input.strip_prefix(&UTF16LE_BOM) {
					return UTF_16LE.decode_without_bom_handling_and_without_replacement(rest).map(Into::into);
				}
				if let Some(rest) = input.strip_prefix(&UTF16BE_BOM) {
					return UTF_16BE.decode_without_bom_handling_and_without_replacement(rest).map(Into::into);
				}
				None
			}
			Self::Utf8 => {
				let body = input.strip_prefix(&UTF8_BOM).unwrap_or(input);
				str::from_utf8(body).ok().map(ToString::to_string)
			}
			Self::AnsiCodePage => {
				ansi_code_page().decode_without_bom_handling_and_without_replacement(input).map(Into::into)
			}
		}
	}
}

/// UTF-16LE with a byte order mark, the form Explorer itself writes.
#[must_use]
pub fn encode_utf16_with_bom(text: &str) -> Vec<u8> {
	let mut out = Vec::with_capacity(2 + text.len() * 2);
	out.extend_from_slice(&UTF16LE_BOM);
	for unit in text.encode_utf16() {
		out.extend_from_slice(&unit.to_le_bytes());
	}
	out
}

pub fn ansi_code_page() -> &'static Encoding {
	static ANSI: OnceLock<&'static Encoding> = OnceLock::new();
	ANSI.get_or_init(|| encoding_for_code_page(system_code_page()))
}

#[cfg(windows)]
fn system_code_page() -> u32 {
	unsafe { windows::Win32::Globalization::GetACP() }
}

#[cfg(not(windows))]
const fn system_code_page() -> u32 {
	1252
}

#[must_use]
pub fn encoding_for_code_page(code_page: u32) -> &'static Encoding {
	match code_page {
		874 => WINDOWS_874,
		932 => SHIFT_JIS,
		936 => GBK,
		949 => EUC_KR,
		950 => BIG5,
		1250 => WINDOWS_1250,
		1251 => WINDOWS_1251,
		1253 => WINDOWS_1253,
		1254 => WINDOWS_1254,
		1255 => WINDOWS_1255,
		1256 => WINDOWS_1256,
		1257 => WINDOWS_1257,
		1258 => WINDOWS_1258,
		65001 => UTF_8,
		_ => WINDOWS_1252,
	}
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;

	#[rstest]
	#[case(b"\xFF\xFEH\x00i\x00", Some("Hi"))]
	#[case(b"\xFE\xFF\x00H\x00i", Some("Hi"))]
	#[case(b"Hi", None)]
	#[case(b"\xFF\xFEH\x00i", None)]
	#[case(b"\xFF\xFE\x00\xD8", None)]
	fn utf16_requires_bom_and_well_formed_units(#[case] input: &[u8], #[case] expected: Option<&str>) {
		assert_eq!(TextEncoding::Utf16Bom.decode(input).as_deref(), expected);
	}

	#[rstest]
	#[case(b"\xEF\xBB\xBFHello", Some("Hello"))]
	#[case(b"Hello", Some("Hello"))]
	#[case(b"caf\xE9", None)]
	fn utf8_accepts_optional_bom(#[case] input: &[u8], #[case] expected: Option<&str>) {
		assert_eq!(TextEncoding::Utf8.decode(input).as_deref(), expected);
	}

	#[test]
	fn encode_writes_little_endian_with_bom() {
		assert_eq!(encode_utf16_with_bom("Hi"), b"\xFF\xFEH\x00i\x00");
		assert_eq!(encode_utf16_with_bom(""), b"\xFF\xFE");
	}

	#[test]
	fn encoded_text_decodes_as_first_candidate() {
		let bytes = encode_utf16_with_bom("备注 ✓");
		assert_eq!(DECODE_ORDER[0].decode(&bytes).as_deref(), Some("备注 ✓"));
	}

	#[rstest]
	#[case(936, "GBK")]
	#[case(950, "Big5")]
	#[case(1251, "windows-1251")]
	#[case(65001, "UTF-8")]
	#[case(437, "windows-1252")]
	fn code_pages_map_to_encodings(#[case] code_page: u32, #[case] name: &str) {
		assert_eq!(encoding_for_code_page(code_page).name(), name);
	}

	#[cfg(not(windows))]
	#[test]
	fn ansi_fallback_reads_legacy_bytes() {
		assert_eq!(TextEncoding::AnsiCodePage.decode(b"caf\xE9").as_deref(), Some("café"));
	}
}
