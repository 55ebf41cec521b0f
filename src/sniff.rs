//! Content type detection from a bounded prefix of the data.

use serde::de::IgnoredAny;

/// Detection never looks at more than this many leading bytes.
pub const MAX_SNIFF_BYTES: usize = 512 * 1024;

const TEXT_UTF_16LE: &str = "text/plain; charset=utf-16le";
const TEXT_UTF_16BE: &str = "text/plain; charset=utf-16be";
const TEXT_XML_UTF_8: &str = "text/xml; charset=utf-8";
const JSON: &str = "application/json";

/// Append-only buffer holding at most [`MAX_SNIFF_BYTES`].
///
/// Once full, further pushes are dropped silently.
#[derive(Debug, Default)]
pub struct SniffBuffer {
    buf: Vec<u8>,
}

impl SniffBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        let room = MAX_SNIFF_BYTES - self.buf.len();
        let take = room.min(chunk.len());
        self.buf.extend_from_slice(&chunk[..take]);
    }

    pub fn is_full(&self) -> bool {
        self.buf.len() >= MAX_SNIFF_BYTES
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Detect the content type of what was captured.
    ///
    /// A full buffer is treated as a prefix of something longer, so any two
    /// inputs sharing their first [`MAX_SNIFF_BYTES`] get the same answer.
    pub fn detect(&self) -> String {
        detect_content_type(&self.buf, self.is_full())
    }
}

/// Detect a MIME type from the leading bytes of some data.
///
/// `truncated` says `data` is only a prefix, which relaxes the checks that
/// need the whole input (JSON syntax, a multi-byte character cut at the end).
pub fn detect_content_type(data: &[u8], truncated: bool) -> String {
    if let Some(kind) = infer::get(data) {
        if kind.matcher_type() != infer::MatcherType::Text {
            return kind.mime_type().to_string();
        }
    }
    if data.is_empty() {
        return mime::TEXT_PLAIN_UTF_8.to_string();
    }
    if data.starts_with(&[0xFF, 0xFE]) {
        return TEXT_UTF_16LE.to_string();
    }
    if data.starts_with(&[0xFE, 0xFF]) {
        return TEXT_UTF_16BE.to_string();
    }

    let text = match std::str::from_utf8(data) {
        Ok(text) => text,
        // cut mid-character at the sniff limit
        Err(e) if truncated && e.error_len().is_none() => {
            std::str::from_utf8(&data[..e.valid_up_to()]).unwrap_or_default()
        }
        Err(_) => return mime::APPLICATION_OCTET_STREAM.to_string(),
    };
    if text.chars().any(is_binary_control) {
        return mime::APPLICATION_OCTET_STREAM.to_string();
    }

    let body = text.trim_start_matches(['\u{feff}', ' ', '\t', '\r', '\n']);
    if (body.starts_with('{') || body.starts_with('[')) && is_json(body, truncated) {
        return JSON.to_string();
    }

    let head: Vec<u8> = body.bytes().take(32).map(|b| b.to_ascii_lowercase()).collect();
    if head.starts_with(b"<?xml") {
        return TEXT_XML_UTF_8.to_string();
    }
    if head.starts_with(b"<!doctype html") || head.starts_with(b"<html") {
        return mime::TEXT_HTML_UTF_8.to_string();
    }
    mime::TEXT_PLAIN_UTF_8.to_string()
}

fn is_binary_control(c: char) -> bool {
    matches!(c, '\u{0}'..='\u{8}' | '\u{b}' | '\u{e}'..='\u{1a}' | '\u{1c}'..='\u{1f}')
}

fn is_json(text: &str, truncated: bool) -> bool {
    match serde_json::from_str::<IgnoredAny>(text) {
        Ok(_) => true,
        Err(e) => truncated && e.is_eof(),
    }
}
