//! Zip containers of XML parts (docx, xlsx, pptx, vsdx).
//!
//! Only entries under the flavor's content directory are read. Each entry is
//! decompressed into memory (bounded by a per-entry cap) and walked with a
//! pull parser; every text or CDATA node becomes one fragment. When a search
//! term is known up front, nodes whose raw bytes cannot contain it are skipped
//! without being unescaped.

use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::Path;

use memchr::memmem;
use quick_xml::events::Event;
use quick_xml::Reader;
use zip::ZipArchive;

use crate::error::{FinderError, Result};

use super::source::ChunkedTextSource;

/// Characters that XML may escape; a term containing any of them cannot be
/// pre-checked against raw node bytes.
const XML_SPECIAL: &[u8] = b"&<>\"'";

/// Which Office-style package a container is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFlavor {
    Word,
    Spreadsheet,
    Presentation,
    Diagram,
}

impl ContainerFlavor {
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.trim_start_matches('.') {
            "docx" => Some(Self::Word),
            "xlsx" => Some(Self::Spreadsheet),
            "pptx" => Some(Self::Presentation),
            "vsdx" => Some(Self::Diagram),
            _ => None,
        }
    }

    fn content_prefix(self) -> &'static str {
        match self {
            Self::Word => "word/",
            Self::Spreadsheet => "xl/",
            Self::Presentation => "ppt/",
            Self::Diagram => "visio/pages/",
        }
    }

    /// Returns true if the zip entry named `name` holds searchable text.
    pub fn wants_entry(self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        name.starts_with(self.content_prefix()) && name.ends_with(".xml")
    }
}

/// Text-node source over the XML parts of a container.
pub struct ContainerXmlSource {
    archive: ZipArchive<BufReader<File>>,
    entries: Vec<usize>,
    next_entry: usize,
    reader: Option<Reader<Cursor<Vec<u8>>>>,
    buf: Vec<u8>,
    needle: Option<Vec<u8>>,
    entry_max_bytes: u64,
}

enum Step {
    Fragment(String),
    Skip,
    EntryDone,
}

impl ContainerXmlSource {
    /// Opens the container at `path`.
    ///
    /// `term_hint` enables the raw-byte pre-check for that term. Pass `None`
    /// to decode every node.
    pub fn open(
        path: &Path,
        flavor: ContainerFlavor,
        entry_max_bytes: u64,
        term_hint: Option<&str>,
    ) -> Result<Self> {
        let mut archive = ZipArchive::new(BufReader::new(File::open(path)?))?;
        let mut entries = Vec::new();
        for index in 0..archive.len() {
            let entry = archive.by_index_raw(index)?;
            if !entry.is_dir() && flavor.wants_entry(entry.name()) {
                entries.push(index);
            }
        }

        let needle = term_hint
            .filter(|term| !term.is_empty())
            .filter(|term| !term.bytes().any(|b| XML_SPECIAL.contains(&b)))
            .map(|term| term.as_bytes().to_vec());

        Ok(Self {
            archive,
            entries,
            next_entry: 0,
            reader: None,
            buf: Vec::new(),
            needle,
            entry_max_bytes,
        })
    }

    /// Number of XML entries that will be read.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Loads the next wanted entry. Returns false when none remain.
    fn open_next_entry(&mut self) -> bool {
        while self.next_entry < self.entries.len() {
            let index = self.entries[self.next_entry];
            self.next_entry += 1;
            match self.read_entry(index) {
                Ok(bytes) => {
                    let mut reader = Reader::from_reader(Cursor::new(bytes));
                    reader.check_end_names(false);
                    self.reader = Some(reader);
                    return true;
                }
                Err(error) => {
                    log::debug!("container entry skipped index={} error={}", index, error);
                }
            }
        }
        false
    }

    fn read_entry(&mut self, index: usize) -> Result<Vec<u8>> {
        let entry = self.archive.by_index(index)?;
        let mut bytes = Vec::with_capacity(entry.size().min(self.entry_max_bytes) as usize);
        entry.take(self.entry_max_bytes).read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

impl ChunkedTextSource for ContainerXmlSource {
    fn next_chunk(&mut self) -> Result<Option<String>> {
        loop {
            if self.reader.is_none() && !self.open_next_entry() {
                return Ok(None);
            }
            let Some(reader) = self.reader.as_mut() else {
                continue;
            };

            let needle = self.needle.as_deref();
            let step = match reader.read_event_into(&mut self.buf) {
                Ok(Event::Text(text)) => {
                    if has_char_reference(&text) || may_contain(&text, needle) {
                        let decoded = text
                            .unescape()
                            .map(|value| value.into_owned())
                            .unwrap_or_else(|_| String::from_utf8_lossy(&text).into_owned());
                        Step::Fragment(decoded)
                    } else {
                        Step::Skip
                    }
                }
                Ok(Event::CData(data)) => {
                    if may_contain(&data, needle) {
                        Step::Fragment(String::from_utf8_lossy(&data).into_owned())
                    } else {
                        Step::Skip
                    }
                }
                Ok(Event::Eof) => Step::EntryDone,
                Ok(_) => Step::Skip,
                Err(error) => {
                    log::debug!("container entry truncated error={}", FinderError::Xml(error.to_string()));
                    Step::EntryDone
                }
            };
            self.buf.clear();

            match step {
                Step::Fragment(text) if !text.trim().is_empty() => return Ok(Some(text)),
                Step::Fragment(_) | Step::Skip => {}
                Step::EntryDone => self.reader = None,
            }
        }
    }
}

/// Numeric references such as `&#20013;` hide their character from the raw
/// bytes.
fn has_char_reference(raw: &[u8]) -> bool {
    memmem::find(raw, b"&#").is_some()
}

fn may_contain(raw: &[u8], needle: Option<&[u8]>) -> bool {
    match needle {
        Some(needle) => memmem::find(raw, needle).is_some(),
        None => true,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::extract::source::collect_text;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    /// Writes a zip at `path` with the given `(name, contents)` entries.
    pub(crate) fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, contents) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    fn docx(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("report.docx");
        write_zip(
            &path,
            &[
                ("[Content_Types].xml", "<Types><Default>invoice</Default></Types>"),
                (
                    "word/document.xml",
                    "<w:document><w:body><w:p><w:r><w:t>Quarterly invoice</w:t></w:r></w:p>\
                     <w:p><w:r><w:t>Fish &amp; Chips</w:t></w:r></w:p>\
                     <w:p><w:r><w:t><![CDATA[raw <data>]]></w:t></w:r></w:p></w:body></w:document>",
                ),
                ("docProps/core.xml", "<cp>author invoice</cp>"),
            ],
        );
        path
    }

    fn collect(source: &mut ContainerXmlSource) -> Vec<String> {
        let mut fragments = Vec::new();
        while let Some(fragment) = source.next_chunk().unwrap() {
            fragments.push(fragment);
        }
        fragments
    }

    #[test]
    fn entry_filter_follows_flavor() {
        assert!(ContainerFlavor::Word.wants_entry("word/document.xml"));
        assert!(ContainerFlavor::Word.wants_entry("Word/Header1.XML"));
        assert!(!ContainerFlavor::Word.wants_entry("word/media/image1.png"));
        assert!(!ContainerFlavor::Word.wants_entry("docProps/core.xml"));
        assert!(ContainerFlavor::Diagram.wants_entry("visio/pages/page1.xml"));
        assert!(!ContainerFlavor::Diagram.wants_entry("visio/masters/master1.xml"));
        assert_eq!(ContainerFlavor::from_extension(".xlsx"), Some(ContainerFlavor::Spreadsheet));
        assert_eq!(ContainerFlavor::from_extension(".zip"), None);
    }

    #[test]
    fn yields_unescaped_text_nodes_from_content_entries_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = docx(dir.path());
        let mut source = ContainerXmlSource::open(&path, ContainerFlavor::Word, 1 << 20, None).unwrap();
        assert_eq!(source.entry_count(), 1);
        assert_eq!(
            collect(&mut source),
            vec!["Quarterly invoice", "Fish & Chips", "raw <data>"]
        );
    }

    #[test]
    fn term_hint_skips_nodes_without_the_term() {
        let dir = tempfile::tempdir().unwrap();
        let path = docx(dir.path());
        let mut source =
            ContainerXmlSource::open(&path, ContainerFlavor::Word, 1 << 20, Some("invoice")).unwrap();
        assert_eq!(collect(&mut source), vec!["Quarterly invoice"]);
    }

    #[test]
    fn escaped_terms_disable_the_pre_check() {
        let dir = tempfile::tempdir().unwrap();
        let path = docx(dir.path());
        let mut source =
            ContainerXmlSource::open(&path, ContainerFlavor::Word, 1 << 20, Some("Fish & Chips")).unwrap();
        assert!(collect(&mut source).contains(&"Fish & Chips".to_string()));
    }

    #[test]
    fn character_references_bypass_the_pre_check() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("refs.docx");
        write_zip(
            &path,
            &[(
                "word/document.xml",
                "<w:body><w:t>&#20013;&#25991; text</w:t><w:t>unrelated</w:t></w:body>",
            )],
        );
        let mut source =
            ContainerXmlSource::open(&path, ContainerFlavor::Word, 1 << 20, Some("中文")).unwrap();
        assert_eq!(collect(&mut source), vec!["中文 text"]);
    }

    #[test]
    fn malformed_entry_does_not_fail_the_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pptx");
        write_zip(
            &path,
            &[
                ("ppt/slides/slide1.xml", "<p:sld><a:t>first</a:t><a:t attr=\"unterminated>"),
                ("ppt/slides/slide2.xml", "<p:sld><a:t>second slide</a:t></p:sld>"),
            ],
        );
        let mut source =
            ContainerXmlSource::open(&path, ContainerFlavor::Presentation, 1 << 20, None).unwrap();
        let text = collect_text(&mut source, 0, " ", &CancellationToken::noop()).unwrap();
        assert!(text.contains("first"));
        assert!(text.contains("second slide"));
    }

    #[test]
    fn not_a_zip_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.docx");
        std::fs::write(&path, b"plain text, not a zip").unwrap();
        assert!(ContainerXmlSource::open(&path, ContainerFlavor::Word, 1 << 20, None).is_err());
    }
}
