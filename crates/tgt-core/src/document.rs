//! Document export: ordered paragraphs in, one `.docx` file out.

use std::{fs, io::Write, path::Path};

use zip::{write::FileOptions, CompressionMethod, ZipWriter};

use crate::{errors::Error, Result};

/// Sink that turns an ordered list of paragraphs into a file at `path`.
pub trait DocumentSink: Send + Sync {
    fn write(&self, paragraphs: &[String], path: &Path) -> Result<()>;
}

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

const DOCUMENT_HEAD: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>"#;

const DOCUMENT_TAIL: &str = "<w:sectPr/></w:body></w:document>";

/// Minimal WordprocessingML writer: one paragraph per input line.
#[derive(Clone, Copy, Debug, Default)]
pub struct DocxWriter;

impl DocxWriter {
    pub fn document_xml(paragraphs: &[String]) -> String {
        let mut out = String::from(DOCUMENT_HEAD);
        for p in paragraphs {
            if p.is_empty() {
                out.push_str("<w:p/>");
            } else {
                out.push_str(r#"<w:p><w:r><w:t xml:space="preserve">"#);
                out.push_str(&escape_xml(p));
                out.push_str("</w:t></w:r></w:p>");
            }
        }
        out.push_str(DOCUMENT_TAIL);
        out
    }
}

impl DocumentSink for DocxWriter {
    fn write(&self, paragraphs: &[String], path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let f = fs::File::create(path)?;
        let mut zw = ZipWriter::new(f);
        let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

        let parts = [
            ("[Content_Types].xml", CONTENT_TYPES.to_string()),
            ("_rels/.rels", ROOT_RELS.to_string()),
            ("word/document.xml", Self::document_xml(paragraphs)),
        ];
        for (name, body) in parts {
            zw.start_file(name, opts).map_err(zip_err)?;
            zw.write_all(body.as_bytes())?;
        }
        zw.finish().map_err(zip_err)?;
        Ok(())
    }
}

fn zip_err(e: zip::result::ZipError) -> Error {
    Error::Document(format!("zip error: {e}"))
}

/// Escape text for XML element content, dropping characters XML 1.0 forbids.
pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\t' | '\n' | '\r' => out.push(c),
            c if (c as u32) < 0x20 || c == '\u{FFFE}' || c == '\u{FFFF}' => {}
            c => out.push(c),
        }
    }
    out
}
