mod common;

use common::{Ev, Recorder, ocr_div_end, ocr_div_start};
use ocrpipe::OcrError;
use ocrpipe::config::OutputFormat;
use ocrpipe::reassemble::{ELIDED_ELEMENTS, reassemble, reassemble_empty, stream_text};
use ocrpipe::sink::{TextCollector, XHTML_NS, XhtmlWriter};

const TESSERACT_HOCR: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Transitional//EN"
    "http://www.w3.org/TR/xhtml1/DTD/xhtml1-transitional.dtd">
<html xmlns="http://www.w3.org/1999/xhtml" xml:lang="en" lang="en">
 <head>
  <title></title>
  <meta http-equiv="Content-Type" content="text/html;charset=utf-8"/>
  <meta name='ocr-system' content='tesseract 5.3.0' />
 </head>
 <body>
  <div class='ocr_page' id='page_1' title='image "in.png"; bbox 0 0 640 480; ppageno 0'>
   <div class='ocr_carea' id='block_1_1' title="bbox 36 92 580 122">
    <p class='ocr_par' id='par_1_1' lang='eng'>
     <span class='ocr_line' id='line_1_1' title="bbox 36 92 580 122; baseline 0 -6">
      <span class='ocrx_word' id='word_1_1' title='bbox 36 92 96 116; x_wconf 90'>Fish</span>
      <span class='ocrx_word' id='word_1_2' title='bbox 109 92 202 116; x_wconf 91'>&amp;</span>
      <span class='ocrx_word' id='word_1_3' title='bbox 215 92 303 116; x_wconf 89'>Chips</span>
     </span>
    </p>
   </div>
  </div>
 </body>
</html>
"#;

fn run(format: OutputFormat, bytes: &[u8]) -> ocrpipe::Result<Recorder> {
    let mut rec = Recorder::new();
    reassemble(bytes, format, &mut rec)?;
    Ok(rec)
}

#[test]
fn plain_text_is_wrapped_in_ocr_container() {
    let rec = run(OutputFormat::Txt, b"Hello World").unwrap();
    assert_eq!(
        rec.coalesced(),
        vec![ocr_div_start(), Ev::Chars("Hello World".into()), ocr_div_end()]
    );
}

#[test]
fn plain_text_is_invariant_under_rechunking() {
    let mut bytes = Vec::new();
    for i in 0..500 {
        bytes.extend_from_slice(format!("line {i}: caf\u{e9} \u{4e2d}\u{6587} \u{1F4C4}\n").as_bytes());
    }
    bytes.extend_from_slice(b"\xff\xfe tail");

    let expected = String::from_utf8_lossy(&bytes).into_owned();
    for size in [1, 2, 3, 7, 64, 1024, 4096, bytes.len() + 1] {
        let mut sink = TextCollector::new();
        stream_text(&bytes[..], size, &mut sink).unwrap();
        assert_eq!(sink.text(), expected, "chunk size {size}");
    }
}

#[test]
fn empty_output_still_emits_container() {
    let mut rec = Recorder::new();
    reassemble_empty(&mut rec).unwrap();
    assert_eq!(rec.events, vec![ocr_div_start(), ocr_div_end()]);

    let rec = run(OutputFormat::Txt, b"").unwrap();
    assert_eq!(rec.events, vec![ocr_div_start(), ocr_div_end()]);
}

#[test]
fn hocr_wrapper_elements_are_elided() {
    let rec = run(OutputFormat::Hocr, b"<html><body><p>Hi</p></body></html>").unwrap();
    assert_eq!(
        rec.coalesced(),
        vec![
            ocr_div_start(),
            Ev::Start {
                uri: String::new(),
                local: "p".into(),
                qname: "p".into(),
                attrs: vec![],
            },
            Ev::Chars("Hi".into()),
            Ev::End { qname: "p".into() },
            ocr_div_end(),
        ]
    );
}

#[test]
fn hocr_passes_through_everything_else() {
    let rec = run(OutputFormat::Hocr, TESSERACT_HOCR.as_bytes()).unwrap();

    let started = rec.started();
    let ended = rec.ended();
    for name in ELIDED_ELEMENTS {
        assert!(!started.iter().any(|n| n == name), "{name} was started");
        assert!(!ended.iter().any(|n| n == name), "{name} was ended");
    }
    assert_eq!(started, ["div", "div", "div", "p", "span", "span", "span", "span"]);
    assert_eq!(ended.len(), started.len());

    let text = rec.text();
    let words: Vec<&str> = text.split_whitespace().collect();
    assert_eq!(words, ["Fish", "&", "Chips"]);

    let word = rec
        .events
        .iter()
        .find_map(|e| match e {
            Ev::Start { uri, qname, attrs, .. }
                if qname == "span" && attrs.iter().any(|(_, v)| v == "ocrx_word") =>
            {
                Some((uri.clone(), attrs.clone()))
            }
            _ => None,
        })
        .unwrap();
    assert_eq!(word.0, XHTML_NS);
    assert_eq!(
        word.1,
        vec![
            ("class".to_string(), "ocrx_word".to_string()),
            ("id".to_string(), "word_1_1".to_string()),
            ("title".to_string(), "bbox 36 92 96 116; x_wconf 90".to_string()),
        ]
    );

    let page_title = rec
        .events
        .iter()
        .find_map(|e| match e {
            Ev::Start { attrs, .. } => attrs
                .iter()
                .find(|(k, v)| k == "title" && v.starts_with("image"))
                .map(|(_, v)| v.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(page_title, "image \"in.png\"; bbox 0 0 640 480; ppageno 0");
}

#[test]
fn hocr_keeps_text_inside_elided_elements() {
    let rec = run(
        OutputFormat::Hocr,
        b"<html><head><title>scan</title></head><body>loose <b>bold</b></body></html>",
    )
    .unwrap();
    assert_eq!(rec.text(), "scanloose bold");
    assert_eq!(rec.started(), ["div", "b"]);
}

#[test]
fn hocr_round_trips_through_writer_with_escaping() {
    let mut writer = XhtmlWriter::new();
    reassemble(
        &b"<html><body><p title='a &lt; b'>x &amp; y &#x3C;z&#62;</p></body></html>"[..],
        OutputFormat::Hocr,
        &mut writer,
    )
    .unwrap();
    assert_eq!(
        writer.as_str(),
        "<div xmlns=\"http://www.w3.org/1999/xhtml\" class=\"ocr\">\
         <p xmlns=\"\" title=\"a &lt; b\">x &amp; y &lt;z&gt;</p></div>"
    );
}

#[test]
fn malformed_hocr_is_an_error() {
    let cases: [&[u8]; 6] = [
        b"<html><body><p>Hi</body></html>",
        b"<html><body><p>Hi</p>",
        b"",
        b"just text",
        b"<p>&ext;</p>",
        b"<p a='1' a='2'>x</p>",
    ];
    for bad in cases {
        let err = run(OutputFormat::Hocr, bad).unwrap_err();
        assert!(
            matches!(err, OcrError::MalformedOutput { .. }),
            "{:?} gave {err:?}",
            String::from_utf8_lossy(bad)
        );
    }
}

#[test]
fn external_entities_are_never_resolved() {
    let xxe = br#"<?xml version="1.0"?>
<!DOCTYPE html [<!ENTITY xxe SYSTEM "file:///etc/passwd">]>
<html><body><p>&xxe;</p></body></html>"#;
    let err = run(OutputFormat::Hocr, xxe).unwrap_err();
    assert!(matches!(err, OcrError::MalformedOutput { .. }));
}
