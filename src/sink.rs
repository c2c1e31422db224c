//! Consumer side of the pipeline: a SAX-style structured event sink.
use crate::error::Result;
use quick_xml::escape::escape;

pub const XHTML_NS: &str = "http://www.w3.org/1999/xhtml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub uri: String,
    pub local_name: String,
    pub qname: String,
    pub value: String,
}

impl Attribute {
    /// Unprefixed attribute in no namespace.
    pub fn plain(name: &str, value: &str) -> Self {
        Self {
            uri: String::new(),
            local_name: name.to_string(),
            qname: name.to_string(),
            value: value.to_string(),
        }
    }
}

/// Receives the OCR event stream.
///
/// OCR output arrives as a self-contained element nested inside whatever
/// document the caller is building; the document callbacks are only driven
/// by the whole-document entry points.
pub trait ContentHandler {
    fn start_document(&mut self) -> Result<()> {
        Ok(())
    }

    fn end_document(&mut self) -> Result<()> {
        Ok(())
    }

    fn start_element(
        &mut self,
        uri: &str,
        local_name: &str,
        qname: &str,
        attributes: &[Attribute],
    ) -> Result<()>;

    fn end_element(&mut self, uri: &str, local_name: &str, qname: &str) -> Result<()>;

    fn characters(&mut self, text: &str) -> Result<()>;
}

/// Serializes events as XHTML. Text and attribute values are escaped, and
/// every namespace prefix in use is declared where it first comes into scope.
#[derive(Debug, Default)]
pub struct XhtmlWriter {
    out: String,
    // Prefix bindings declared on each open element; "" is the default namespace.
    scopes: Vec<Vec<(String, String)>>,
}

impl XhtmlWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.out
    }

    pub fn into_string(self) -> String {
        self.out
    }

    fn in_scope(&self, prefix: &str) -> Option<&str> {
        self.scopes
            .iter()
            .rev()
            .flatten()
            .find(|(p, _)| p == prefix)
            .map(|(_, uri)| uri.as_str())
    }
}

fn prefix_of(qname: &str) -> &str {
    qname.split_once(':').map(|(prefix, _)| prefix).unwrap_or("")
}

impl ContentHandler for XhtmlWriter {
    fn start_document(&mut self) -> Result<()> {
        self.out
            .push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        Ok(())
    }

    fn end_document(&mut self) -> Result<()> {
        self.out.push('\n');
        Ok(())
    }

    fn start_element(
        &mut self,
        uri: &str,
        _local_name: &str,
        qname: &str,
        attributes: &[Attribute],
    ) -> Result<()> {
        let mut declared: Vec<(String, String)> = Vec::new();
        let mut bind = |writer: &Self, prefix: &str, uri: &str| {
            // `xml` is bound implicitly and may not be redeclared.
            if prefix == "xml" || declared.iter().any(|(p, _)| p == prefix) {
                return;
            }
            if writer.in_scope(prefix).unwrap_or("") != uri {
                declared.push((prefix.to_string(), uri.to_string()));
            }
        };
        bind(self, prefix_of(qname), uri);
        for attr in attributes {
            let prefix = prefix_of(&attr.qname);
            if !prefix.is_empty() {
                bind(self, prefix, &attr.uri);
            }
        }

        self.out.push('<');
        self.out.push_str(qname);
        for (prefix, ns) in &declared {
            if prefix.is_empty() {
                self.out.push_str(" xmlns=\"");
            } else {
                self.out.push_str(" xmlns:");
                self.out.push_str(prefix);
                self.out.push_str("=\"");
            }
            self.out.push_str(&escape(ns.as_str()));
            self.out.push('"');
        }
        for attr in attributes {
            self.out.push(' ');
            self.out.push_str(&attr.qname);
            self.out.push_str("=\"");
            self.out.push_str(&escape(attr.value.as_str()));
            self.out.push('"');
        }
        self.out.push('>');
        self.scopes.push(declared);
        Ok(())
    }

    fn end_element(&mut self, _uri: &str, _local_name: &str, qname: &str) -> Result<()> {
        self.scopes.pop();
        self.out.push_str("</");
        self.out.push_str(qname);
        self.out.push('>');
        Ok(())
    }

    fn characters(&mut self, text: &str) -> Result<()> {
        self.out.push_str(&escape(text));
        Ok(())
    }
}

/// Keeps only character content.
#[derive(Debug, Default)]
pub struct TextCollector {
    text: String,
}

impl TextCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

impl ContentHandler for TextCollector {
    fn start_element(&mut self, _: &str, _: &str, _: &str, _: &[Attribute]) -> Result<()> {
        Ok(())
    }

    fn end_element(&mut self, _: &str, _: &str, _: &str) -> Result<()> {
        Ok(())
    }

    fn characters(&mut self, text: &str) -> Result<()> {
        self.text.push_str(text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_escapes_text_and_attributes() {
        let mut w = XhtmlWriter::new();
        w.start_element(XHTML_NS, "div", "div", &[Attribute::plain("title", "a\"<b>")])
            .unwrap();
        w.characters("1 < 2 & 3").unwrap();
        w.end_element(XHTML_NS, "div", "div").unwrap();
        assert_eq!(
            w.as_str(),
            "<div xmlns=\"http://www.w3.org/1999/xhtml\" title=\"a&quot;&lt;b&gt;\">\
             1 &lt; 2 &amp; 3</div>"
        );
    }

    #[test]
    fn writer_declares_namespace_once() {
        let mut w = XhtmlWriter::new();
        w.start_element(XHTML_NS, "div", "div", &[]).unwrap();
        w.start_element(XHTML_NS, "p", "p", &[]).unwrap();
        w.end_element(XHTML_NS, "p", "p").unwrap();
        w.end_element(XHTML_NS, "div", "div").unwrap();
        assert_eq!(
            w.into_string(),
            "<div xmlns=\"http://www.w3.org/1999/xhtml\"><p></p></div>"
        );
    }

    #[test]
    fn writer_declares_prefixes_in_scope() {
        let ocr = "http://example.com/ocr";
        let mut w = XhtmlWriter::new();
        w.start_element(XHTML_NS, "div", "div", &[]).unwrap();
        let attr = Attribute {
            uri: ocr.to_string(),
            local_name: "conf".to_string(),
            qname: "o:conf".to_string(),
            value: "96".to_string(),
        };
        w.start_element(ocr, "word", "o:word", &[attr]).unwrap();
        w.start_element(ocr, "char", "o:char", &[]).unwrap();
        w.end_element(ocr, "char", "o:char").unwrap();
        w.end_element(ocr, "word", "o:word").unwrap();
        w.start_element(ocr, "word", "o:word", &[]).unwrap();
        w.end_element(ocr, "word", "o:word").unwrap();
        w.end_element(XHTML_NS, "div", "div").unwrap();
        assert_eq!(
            w.into_string(),
            "<div xmlns=\"http://www.w3.org/1999/xhtml\">\
             <o:word xmlns:o=\"http://example.com/ocr\" o:conf=\"96\"><o:char></o:char></o:word>\
             <o:word xmlns:o=\"http://example.com/ocr\"></o:word></div>"
        );
    }

    #[test]
    fn writer_ignores_xml_prefix() {
        let mut w = XhtmlWriter::new();
        let lang = Attribute {
            uri: "http://www.w3.org/XML/1998/namespace".to_string(),
            local_name: "lang".to_string(),
            qname: "xml:lang".to_string(),
            value: "en".to_string(),
        };
        w.start_element(XHTML_NS, "p", "p", &[lang]).unwrap();
        w.end_element(XHTML_NS, "p", "p").unwrap();
        assert_eq!(
            w.into_string(),
            "<p xmlns=\"http://www.w3.org/1999/xhtml\" xml:lang=\"en\"></p>"
        );
    }
}
