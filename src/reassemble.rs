//! Turns engine output into content events wrapped in `<div class="ocr">`.
//!
//! Plain text is streamed through an incremental UTF-8 decoder so output of
//! any size is never held in memory at once. hOCR is re-emitted element by
//! element with the XHTML wrapper elements dropped. The markup reader never
//! processes a DTD or resolves external entities, so nothing is fetched.
use crate::config::OutputFormat;
use crate::error::{OcrError, Result};
use crate::sink::{Attribute, ContentHandler, XHTML_NS};
use quick_xml::NsReader;
use quick_xml::escape::{resolve_predefined_entity, unescape};
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use std::io::{BufRead, Read};

pub const OCR_CONTAINER: &str = "div";
pub const OCR_CONTAINER_CLASS: &str = "ocr";

/// Elements that only exist to make hOCR a valid XHTML document.
pub const ELIDED_ELEMENTS: [&str; 5] = ["html", "head", "title", "meta", "body"];

pub const TEXT_CHUNK_SIZE: usize = 1024;

const REPLACEMENT: &str = "\u{FFFD}";

pub fn reassemble<R: BufRead>(
    reader: R,
    format: OutputFormat,
    handler: &mut dyn ContentHandler,
) -> Result<()> {
    start_container(handler)?;
    match format {
        OutputFormat::Txt => stream_text(reader, TEXT_CHUNK_SIZE, handler)?,
        OutputFormat::Hocr => pass_through_hocr(reader, handler)?,
    }
    end_container(handler)
}

/// The container with nothing in it, for runs that produced no output file.
pub fn reassemble_empty(handler: &mut dyn ContentHandler) -> Result<()> {
    start_container(handler)?;
    end_container(handler)
}

fn start_container(handler: &mut dyn ContentHandler) -> Result<()> {
    handler.start_element(
        XHTML_NS,
        OCR_CONTAINER,
        OCR_CONTAINER,
        &[Attribute::plain("class", OCR_CONTAINER_CLASS)],
    )
}

fn end_container(handler: &mut dyn ContentHandler) -> Result<()> {
    handler.end_element(XHTML_NS, OCR_CONTAINER, OCR_CONTAINER)
}

/// Emits `reader`'s bytes as characters, `chunk_size` bytes per read.
///
/// A multi-byte sequence split across reads is carried into the next one,
/// so the concatenated output does not depend on `chunk_size`. Invalid bytes
/// decode to U+FFFD exactly as `String::from_utf8_lossy` would.
pub fn stream_text<R: Read>(
    mut reader: R,
    chunk_size: usize,
    handler: &mut dyn ContentHandler,
) -> Result<()> {
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut pending: Vec<u8> = Vec::new();
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        pending.extend_from_slice(&buf[..n]);
        drain_utf8(&mut pending, handler)?;
    }
    if !pending.is_empty() {
        // Truncated sequence at end of input.
        handler.characters(REPLACEMENT)?;
    }
    Ok(())
}

fn drain_utf8(pending: &mut Vec<u8>, handler: &mut dyn ContentHandler) -> Result<()> {
    loop {
        match std::str::from_utf8(pending) {
            Ok(text) => {
                if !text.is_empty() {
                    handler.characters(text)?;
                }
                pending.clear();
                return Ok(());
            }
            Err(err) => {
                let valid = err.valid_up_to();
                if valid > 0 {
                    let text = std::str::from_utf8(&pending[..valid])
                        .map_err(|e| OcrError::malformed(e.to_string()))?;
                    handler.characters(text)?;
                }
                match err.error_len() {
                    Some(bad) => {
                        handler.characters(REPLACEMENT)?;
                        pending.drain(..valid + bad);
                    }
                    None => {
                        // Incomplete tail; wait for more bytes.
                        pending.drain(..valid);
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn pass_through_hocr<R: BufRead>(reader: R, handler: &mut dyn ContentHandler) -> Result<()> {
    let mut reader = NsReader::from_reader(reader);
    reader.config_mut().expand_empty_elements = true;
    reader.config_mut().check_end_names = true;

    let mut buf = Vec::new();
    let mut depth = 0usize;
    let mut seen_root = false;

    loop {
        let (ns, event) = reader
            .read_resolved_event_into(&mut buf)
            .map_err(|e| OcrError::malformed(format!("hOCR parse error: {e}")))?;
        let uri = namespace_uri(&ns)?;

        match event {
            Event::Start(e) => {
                if depth == 0 && seen_root {
                    return Err(OcrError::malformed("hOCR has more than one root element"));
                }
                depth += 1;
                seen_root = true;

                let qname = utf8(e.name().into_inner())?;
                if !is_elided(qname) {
                    let local = utf8(e.local_name().into_inner())?;
                    let attributes = collect_attributes(&reader, &e)?;
                    handler.start_element(&uri, local, qname, &attributes)?;
                }
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                let qname = utf8(e.name().into_inner())?;
                if !is_elided(qname) {
                    let local = utf8(e.local_name().into_inner())?;
                    handler.end_element(&uri, local, qname)?;
                }
            }
            Event::Text(t) => {
                let text = utf8(&t)?;
                if depth == 0 {
                    if !text.trim().is_empty() {
                        return Err(OcrError::malformed("text outside the root element"));
                    }
                } else if !text.is_empty() {
                    handler.characters(text)?;
                }
            }
            Event::CData(c) => {
                if depth > 0 {
                    handler.characters(utf8(&c)?)?;
                }
            }
            Event::GeneralRef(r) => {
                let name = utf8(&r)?;
                let resolved = resolve_reference(name)?;
                if depth > 0 {
                    handler.characters(&resolved)?;
                }
            }
            Event::Eof => break,
            // Declarations, DOCTYPE, comments and processing instructions.
            _ => {}
        }
        buf.clear();
    }

    if !seen_root {
        return Err(OcrError::malformed("hOCR output has no root element"));
    }
    if depth != 0 {
        return Err(OcrError::malformed("hOCR output ended with unclosed elements"));
    }
    Ok(())
}

/// Attributes as namespace-aware SAX reports them: `xmlns` declarations
/// are not attributes.
fn collect_attributes<R>(reader: &NsReader<R>, start: &BytesStart<'_>) -> Result<Vec<Attribute>> {
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| OcrError::malformed(format!("bad attribute: {e}")))?;
        let qname = utf8(attr.key.into_inner())?;
        if qname == "xmlns" || qname.starts_with("xmlns:") {
            continue;
        }
        let (ns, local) = reader.resolve_attribute(attr.key);
        let raw = utf8(&attr.value)?;
        let value = unescape(raw)
            .map_err(|e| OcrError::malformed(format!("bad attribute value: {e}")))?;
        attributes.push(Attribute {
            uri: namespace_uri(&ns)?,
            local_name: utf8(local.into_inner())?.to_string(),
            qname: qname.to_string(),
            value: value.into_owned(),
        });
    }
    Ok(attributes)
}

fn is_elided(qname: &str) -> bool {
    ELIDED_ELEMENTS.contains(&qname)
}

fn namespace_uri(ns: &ResolveResult<'_>) -> Result<String> {
    match ns {
        ResolveResult::Bound(ns) => Ok(utf8(ns.as_ref())?.to_string()),
        ResolveResult::Unbound => Ok(String::new()),
        ResolveResult::Unknown(prefix) => Err(OcrError::malformed(format!(
            "unbound namespace prefix: {}",
            String::from_utf8_lossy(prefix)
        ))),
    }
}

/// Resolves `&name;` to its text. Only the five predefined entities and
/// numeric character references are known; there is no DTD to define others.
fn resolve_reference(name: &str) -> Result<String> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
            Some(hex) => u32::from_str_radix(hex, 16),
            None => num.parse::<u32>(),
        }
        .map_err(|_| OcrError::malformed(format!("bad character reference: &{name};")))?;
        return char::from_u32(code)
            .map(String::from)
            .ok_or_else(|| OcrError::malformed(format!("invalid character reference: &{name};")));
    }
    resolve_predefined_entity(name)
        .map(str::to_string)
        .ok_or_else(|| OcrError::malformed(format!("undefined entity: &{name};")))
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|e| OcrError::malformed(format!("invalid UTF-8: {e}")))
}
