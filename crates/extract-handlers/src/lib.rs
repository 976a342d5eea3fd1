//! Sample format handlers (spec §4.1 "Handler / Extractor Module") and a
//! default registry builder, following the teacher's `SampleExtractor`
//! pattern: a small, self-contained struct implementing the handler
//! trait, grounded enough to run against real files in tests rather than
//! synthesizing fixture data in memory.
//!
//! None of these handlers aim for format-spec completeness — a real
//! deployment would swap in dedicated crates per mime type. They exist to
//! give the scheduler real I/O to dispatch against.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use extract_core::error::ExtractError;
use extract_core::registry::{ExtractorHandler, ExtractorRegistry, RegistryEntry};
use extract_core::types::Resource;

fn url_to_path(url: &str) -> Result<&Path, ExtractError> {
    url.strip_prefix("file://")
        .map(Path::new)
        .ok_or_else(|| ExtractError::InvalidFile(url.to_string()))
}

fn versioned_hash(handler_name: &str, version: u32) -> String {
    blake3::hash(format!("{handler_name}:{version}").as_bytes()).to_hex().to_string()
}

/// Reads a file as UTF-8 text, truncated to `max_text_bytes`, and attaches
/// it as `nie:plainTextContent` (spec §4.2's "max-bytes hint").
pub struct PlainTextHandler;

#[async_trait]
impl ExtractorHandler for PlainTextHandler {
    fn name(&self) -> &'static str {
        "plain-text"
    }

    async fn extract(
        &self,
        url: &str,
        content_id: &str,
        max_text_bytes: usize,
        cancel: CancellationToken,
    ) -> Result<Resource, ExtractError> {
        let path = url_to_path(url)?;
        if cancel.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ExtractError::Handler(format!("read failed: {e}")))?;
        if cancel.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }
        let truncated = &bytes[..bytes.len().min(max_text_bytes)];
        let text = String::from_utf8_lossy(truncated).into_owned();

        Ok(Resource::new(format!("urn:content:{content_id}"))
            .with_type("nfo:PlainTextDocument")
            .with_literal("nie:plainTextContent", text)
            .with_literal("nie:byteSize", bytes.len().to_string()))
    }
}

/// Reads the leading bytes of a JPEG file and reports its SOF0 dimensions
/// when present, falling back to a content-free resource otherwise. Real
/// JPEG metadata (EXIF, IPTC) is out of scope; this exists to exercise a
/// binary-format handler shape distinct from the text handler.
pub struct JpegHandler;

#[async_trait]
impl ExtractorHandler for JpegHandler {
    fn name(&self) -> &'static str {
        "jpeg-dimensions"
    }

    async fn extract(
        &self,
        url: &str,
        content_id: &str,
        _max_text_bytes: usize,
        cancel: CancellationToken,
    ) -> Result<Resource, ExtractError> {
        let path = url_to_path(url)?;
        if cancel.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ExtractError::Handler(format!("read failed: {e}")))?;

        let mut resource = Resource::new(format!("urn:content:{content_id}")).with_type("nfo:Image");
        if let Some((width, height)) = sof0_dimensions(&bytes) {
            resource = resource
                .with_literal("nfo:width", width.to_string())
                .with_literal("nfo:height", height.to_string());
        }
        Ok(resource)
    }
}

/// Scans JPEG markers for the first SOF0/SOF2 segment and reads its
/// width/height fields. Returns `None` for malformed or non-JPEG input
/// rather than erroring: a handler that can't read metadata still
/// succeeds with an empty-of-content resource (spec §4.2's "structurally
/// empty" case).
fn sof0_dimensions(bytes: &[u8]) -> Option<(u16, u16)> {
    if bytes.len() < 4 || bytes[0] != 0xFF || bytes[1] != 0xD8 {
        return None;
    }
    let mut pos = 2;
    while pos + 4 <= bytes.len() {
        if bytes[pos] != 0xFF {
            pos += 1;
            continue;
        }
        let marker = bytes[pos + 1];
        if marker == 0xC0 || marker == 0xC2 {
            let height = u16::from_be_bytes([bytes[pos + 5], bytes[pos + 6]]);
            let width = u16::from_be_bytes([bytes[pos + 7], bytes[pos + 8]]);
            return Some((width, height));
        }
        if marker == 0xD8 || marker == 0xD9 {
            pos += 2;
            continue;
        }
        let segment_len = u16::from_be_bytes([bytes[pos + 2], bytes[pos + 3]]) as usize;
        pos += 2 + segment_len;
    }
    None
}

/// Reports only the byte size of the file. Used as the fallback handler
/// for mime types that have no dedicated extraction logic but still need
/// a `nfo:FileDataObject` written (spec §4.2: every dispatched item
/// produces *some* `ExtractResult`, even a structurally empty one).
pub struct SizeOnlyHandler;

#[async_trait]
impl ExtractorHandler for SizeOnlyHandler {
    fn name(&self) -> &'static str {
        "size-only"
    }

    async fn extract(
        &self,
        url: &str,
        content_id: &str,
        _max_text_bytes: usize,
        cancel: CancellationToken,
    ) -> Result<Resource, ExtractError> {
        let path = url_to_path(url)?;
        if cancel.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| ExtractError::Handler(format!("stat failed: {e}")))?;
        Ok(Resource::new(format!("urn:content:{content_id}"))
            .with_literal("nie:byteSize", metadata.len().to_string()))
    }
}

/// Builds the registry the bundled daemon and tests use by default:
/// `text/plain` → [`PlainTextHandler`], `image/jpeg` → [`JpegHandler`],
/// everything else unregistered (spec §4.1: "resolution is the caller's
/// problem" — an unrecognized mime type produces `NoExtractor`, not a
/// silent fallback).
pub fn build_default_registry(_max_text_bytes: usize) -> ExtractorRegistry {
    // handlers here are call-time configured, not construction-time
    let mut registry = ExtractorRegistry::new();

    registry.register(
        "text/plain".to_string(),
        RegistryEntry {
            handler: Arc::new(PlainTextHandler),
            graph: "documents".to_string(),
            extractor_hash: versioned_hash("plain-text", 1),
            advertised_types: vec!["nfo:PlainTextDocument".to_string()],
            deadline: None,
        },
    );

    registry.register(
        "image/jpeg".to_string(),
        RegistryEntry {
            handler: Arc::new(JpegHandler),
            graph: "pictures".to_string(),
            extractor_hash: versioned_hash("jpeg-dimensions", 1),
            advertised_types: vec!["nfo:Image".to_string()],
            deadline: Some(Duration::from_secs(3)),
        },
    );

    registry
}

/// Registers [`SizeOnlyHandler`] for any mime type in `mime_types` not
/// already present, so a deployment can opt a whole graph into "at least
/// report file size" coverage without writing per-format handlers.
pub fn register_size_only_fallback(registry: &mut ExtractorRegistry, mime_types: &[&str], graph: &str) {
    for mime in mime_types {
        if registry.lookup(mime).is_some() {
            continue;
        }
        registry.register(
            (*mime).to_string(),
            RegistryEntry {
                handler: Arc::new(SizeOnlyHandler),
                graph: graph.to_string(),
                extractor_hash: versioned_hash("size-only", 1),
                advertised_types: Vec::new(),
                deadline: None,
            },
        );
    }
}
