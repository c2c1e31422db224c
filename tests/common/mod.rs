#![allow(dead_code)]

use ocrpipe::Result;
use ocrpipe::sink::{Attribute, ContentHandler};

#[derive(Debug, Clone, PartialEq)]
pub enum Ev {
    StartDocument,
    EndDocument,
    Start {
        uri: String,
        local: String,
        qname: String,
        attrs: Vec<(String, String)>,
    },
    End {
        qname: String,
    },
    Chars(String),
}

/// Records every event it receives.
#[derive(Debug, Default)]
pub struct Recorder {
    pub events: Vec<Ev>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> String {
        self.events
            .iter()
            .filter_map(|e| match e {
                Ev::Chars(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn started(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Ev::Start { qname, .. } => Some(qname.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn ended(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Ev::End { qname } => Some(qname.clone()),
                _ => None,
            })
            .collect()
    }

    /// Events with adjacent character runs merged.
    pub fn coalesced(&self) -> Vec<Ev> {
        let mut out: Vec<Ev> = Vec::new();
        for ev in &self.events {
            if let (Some(Ev::Chars(prev)), Ev::Chars(next)) = (out.last_mut(), ev) {
                prev.push_str(next);
                continue;
            }
            out.push(ev.clone());
        }
        out
    }
}

impl ContentHandler for Recorder {
    fn start_document(&mut self) -> Result<()> {
        self.events.push(Ev::StartDocument);
        Ok(())
    }

    fn end_document(&mut self) -> Result<()> {
        self.events.push(Ev::EndDocument);
        Ok(())
    }

    fn start_element(
        &mut self,
        uri: &str,
        local_name: &str,
        qname: &str,
        attributes: &[Attribute],
    ) -> Result<()> {
        self.events.push(Ev::Start {
            uri: uri.to_string(),
            local: local_name.to_string(),
            qname: qname.to_string(),
            attrs: attributes
                .iter()
                .map(|a| (a.qname.clone(), a.value.clone()))
                .collect(),
        });
        Ok(())
    }

    fn end_element(&mut self, _uri: &str, _local_name: &str, qname: &str) -> Result<()> {
        self.events.push(Ev::End {
            qname: qname.to_string(),
        });
        Ok(())
    }

    fn characters(&mut self, text: &str) -> Result<()> {
        self.events.push(Ev::Chars(text.to_string()));
        Ok(())
    }
}

pub fn ocr_div_start() -> Ev {
    Ev::Start {
        uri: ocrpipe::sink::XHTML_NS.to_string(),
        local: "div".to_string(),
        qname: "div".to_string(),
        attrs: vec![("class".to_string(), "ocr".to_string())],
    }
}

pub fn ocr_div_end() -> Ev {
    Ev::End {
        qname: "div".to_string(),
    }
}
