//! Encoding detection for source files.
//!
//! Transferegov exports are produced by several upstream systems and arrive
//! in a mix of UTF-8 and Windows-1252. Detection is statistical (chardetng)
//! and the result is normalized to the two labels the rest of the pipeline
//! understands. Detection never fails: anything unknown falls back to UTF-8.

use chardetng::EncodingDetector;
use encoding_rs::{UTF_8, WINDOWS_1252};

/// Canonical encoding labels used by the tabular reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEncoding {
    Utf8,
    Windows1252,
}

impl SourceEncoding {
    pub fn label(&self) -> &'static str {
        match self {
            SourceEncoding::Utf8 => "utf8",
            SourceEncoding::Windows1252 => "windows-1252",
        }
    }

    /// Decode raw bytes with this encoding. Malformed sequences become
    /// replacement characters rather than errors.
    pub fn decode(&self, bytes: &[u8]) -> String {
        let encoding = match self {
            SourceEncoding::Utf8 => UTF_8,
            SourceEncoding::Windows1252 => WINDOWS_1252,
        };
        let (text, _, _) = encoding.decode(bytes);
        text.into_owned()
    }
}

/// Detect the encoding of raw file content.
///
/// chardetng may guess any of the single-byte Western European family
/// (windows-1252, windows-1250, the ISO-8859 variants); all of those decode
/// the characters that actually occur in this data identically, so they
/// collapse to one label. Everything else is treated as UTF-8.
pub fn detect_encoding(bytes: &[u8]) -> SourceEncoding {
    // Pure ASCII decodes identically under both labels; chardetng would
    // report the single-byte family here, so short-circuit to UTF-8.
    if bytes.is_ascii() {
        return SourceEncoding::Utf8;
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let guessed = detector.guess(None, true);

    match guessed.name() {
        "UTF-8" => SourceEncoding::Utf8,
        "windows-1252" | "windows-1250" | "ISO-8859-1" | "ISO-8859-15" | "ISO-8859-2" => {
            SourceEncoding::Windows1252
        }
        _ => SourceEncoding::Utf8,
    }
}
