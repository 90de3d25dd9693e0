//! Streaming record extraction from the bibliography XML dump.
//!
//! Entries are the direct children of the document root. Only `article` and
//! `inproceedings` entries are surfaced; everything else is walked over.
//! One event buffer is reused for the whole document and the per-entry scratch
//! state is handed off or dropped as soon as the entry closes, so memory stays
//! proportional to a single entry whatever the size of the dump.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use flate2::read::GzDecoder;
use log::{debug, trace};
use quick_xml::escape::{partial_escape, unescape_with};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::entities::EntityTable;
use crate::error::{Result, SurveyError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Article,
    InProceedings,
}

impl RecordKind {
    fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"article" => Some(RecordKind::Article),
            b"inproceedings" => Some(RecordKind::InProceedings),
            _ => None,
        }
    }

    /// Sub-element naming the venue for this kind of entry.
    fn venue_tag(self) -> &'static [u8] {
        match self {
            RecordKind::Article => b"journal",
            RecordKind::InProceedings => b"booktitle",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Article => f.write_str("article"),
            RecordKind::InProceedings => f.write_str("inproceedings"),
        }
    }
}

/// One bibliographic entry carrying every field the filter needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub kind: RecordKind,
    pub venue: String,
    pub year: i32,
    pub title: String,
    pub link: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MissingVenue,
    MissingYear,
    InvalidYear(String),
    MissingTitle,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingVenue => f.write_str("no venue"),
            SkipReason::MissingYear => f.write_str("no year"),
            SkipReason::InvalidYear(raw) => write!(f, "unparsable year '{}'", raw),
            SkipReason::MissingTitle => f.write_str("no title"),
        }
    }
}

/// What the extractor yields for each examined entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Record(Record),
    Skipped {
        kind: RecordKind,
        key: Option<String>,
        reason: SkipReason,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Venue,
    Year,
    Title,
    Link,
}

#[derive(Debug)]
struct FieldCapture {
    field: Field,
    text: String,
    markup: String,
    has_children: bool,
}

impl FieldCapture {
    fn new(field: Field, open_tag: &BytesStart<'_>) -> Self {
        let mut markup = String::new();
        if field == Field::Title {
            push_tag(&mut markup, open_tag, false);
        }
        Self {
            field,
            text: String::new(),
            markup,
            has_children: false,
        }
    }

    fn push_text(&mut self, text: &str) {
        self.text.push_str(text);
        if self.field == Field::Title {
            self.markup.push_str(&partial_escape(text));
        }
    }

    fn into_value(self) -> String {
        if self.field != Field::Title {
            return self.text;
        }
        let mut markup = self.markup;
        if self.has_children {
            markup.push_str("</title>");
            markup
        } else if self.text.is_empty() {
            // Only the opening tag was captured; close it in place.
            markup.pop();
            markup.push_str("/>");
            markup
        } else {
            self.text
        }
    }
}

#[derive(Debug)]
struct EntryScratch {
    kind: RecordKind,
    key: Option<String>,
    venue: Option<String>,
    year: Option<String>,
    title: Option<String>,
    link: Option<String>,
    field: Option<FieldCapture>,
}

impl EntryScratch {
    fn new(kind: RecordKind, start: &BytesStart<'_>) -> Self {
        let key = start
            .attributes()
            .filter_map(|a| a.ok())
            .find(|a| a.key.as_ref() == b"key")
            .map(|a| String::from_utf8_lossy(&a.value).into_owned());
        Self {
            kind,
            key,
            venue: None,
            year: None,
            title: None,
            link: None,
            field: None,
        }
    }

    fn field_for(&self, tag: &[u8]) -> Option<Field> {
        if tag == self.kind.venue_tag() {
            return Some(Field::Venue);
        }
        match tag {
            b"year" => Some(Field::Year),
            b"title" => Some(Field::Title),
            b"ee" => Some(Field::Link),
            _ => None,
        }
    }

    fn close_field(&mut self) {
        let Some(capture) = self.field.take() else {
            return;
        };
        let slot = match capture.field {
            Field::Venue => &mut self.venue,
            Field::Year => &mut self.year,
            Field::Title => &mut self.title,
            Field::Link => &mut self.link,
        };
        if slot.is_none() {
            *slot = Some(capture.into_value());
        }
    }

    fn finish(self) -> Entry {
        let skipped = |reason| Entry::Skipped {
            kind: self.kind,
            key: self.key.clone(),
            reason,
        };
        let Some(venue) = self.venue.clone() else {
            return skipped(SkipReason::MissingVenue);
        };
        let Some(year_text) = self.year.as_deref() else {
            return skipped(SkipReason::MissingYear);
        };
        let Ok(year) = year_text.trim().parse::<i32>() else {
            return skipped(SkipReason::InvalidYear(year_text.to_string()));
        };
        let Some(title) = self.title.clone() else {
            return skipped(SkipReason::MissingTitle);
        };

        Entry::Record(Record {
            kind: self.kind,
            venue,
            year,
            title,
            link: self.link.unwrap_or_default(),
        })
    }
}

fn decode_text(raw: &[u8], entities: &EntityTable, position: u64) -> Result<String> {
    let raw = std::str::from_utf8(raw).map_err(|e| SurveyError::Structure {
        position,
        details: format!("invalid UTF-8 in text: {}", e),
    })?;
    unescape_with(raw, |name| entities.resolve(name))
        .map(|text| text.into_owned())
        .map_err(|source| SurveyError::Escape { position, source })
}

fn push_tag(markup: &mut String, tag: &BytesStart<'_>, empty: bool) {
    markup.push('<');
    markup.push_str(&String::from_utf8_lossy(tag));
    markup.push_str(if empty { "/>" } else { ">" });
}

/// Opens a dump for reading, decompressing `*.gz` files on the fly.
pub fn open_dump<P: AsRef<Path>>(path: P) -> Result<Box<dyn BufRead>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let is_gzip = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"));

    if is_gzip {
        debug!("Reading gzip-compressed dump: {}", path.display());
        Ok(Box::new(BufReader::new(GzDecoder::new(BufReader::new(file)))))
    } else {
        debug!("Reading plain XML dump: {}", path.display());
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Lazy, non-restartable sequence of entries pulled from an XML stream.
///
/// After the first structural error the stream yields nothing more.
pub struct RecordStream<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    entities: EntityTable,
    depth: usize,
    entry: Option<EntryScratch>,
    finished: bool,
}

impl RecordStream<Box<dyn BufRead>> {
    pub fn from_path<P: AsRef<Path>>(path: P, entities: EntityTable) -> Result<Self> {
        Ok(Self::new(open_dump(path)?, entities))
    }
}

impl<R: BufRead> RecordStream<R> {
    pub fn new(source: R, entities: EntityTable) -> Self {
        Self {
            reader: Reader::from_reader(source),
            buf: Vec::with_capacity(8 * 1024),
            entities,
            depth: 0,
            entry: None,
            finished: false,
        }
    }

    /// Reads events until the next relevant entry closes or the document ends.
    fn next_entry(&mut self) -> Result<Option<Entry>> {
        loop {
            self.buf.clear();
            let event = match self.reader.read_event_into(&mut self.buf) {
                Ok(event) => event,
                Err(source) => {
                    return Err(SurveyError::Xml {
                        position: self.reader.buffer_position() as u64,
                        source,
                    })
                }
            };

            match event {
                Event::Start(start) => {
                    let depth = self.depth;
                    self.depth += 1;
                    let tag = start.name();
                    match depth {
                        1 => {
                            if let Some(kind) = RecordKind::from_tag(tag.as_ref()) {
                                self.entry = Some(EntryScratch::new(kind, &start));
                            }
                        }
                        2 => {
                            if let Some(entry) = self.entry.as_mut() {
                                entry.field = entry
                                    .field_for(tag.as_ref())
                                    .map(|field| FieldCapture::new(field, &start));
                            }
                        }
                        _ => {
                            if let Some(capture) = self.entry.as_mut().and_then(|e| e.field.as_mut()) {
                                capture.has_children = true;
                                if capture.field == Field::Title {
                                    push_tag(&mut capture.markup, &start, false);
                                }
                            }
                        }
                    }
                }
                Event::Empty(start) => {
                    let tag = start.name();
                    match self.depth {
                        1 => {
                            if let Some(kind) = RecordKind::from_tag(tag.as_ref()) {
                                let entry = EntryScratch::new(kind, &start).finish();
                                return Ok(Some(entry));
                            }
                        }
                        2 => {
                            if let Some(entry) = self.entry.as_mut() {
                                if let Some(field) = entry.field_for(tag.as_ref()) {
                                    entry.field = Some(FieldCapture::new(field, &start));
                                    entry.close_field();
                                }
                            }
                        }
                        _ => {
                            if let Some(capture) = self.entry.as_mut().and_then(|e| e.field.as_mut()) {
                                capture.has_children = true;
                                if capture.field == Field::Title {
                                    push_tag(&mut capture.markup, &start, true);
                                }
                            }
                        }
                    }
                }
                Event::End(end) => {
                    self.depth = self.depth.saturating_sub(1);
                    match self.depth {
                        1 => {
                            if let Some(entry) = self.entry.take() {
                                return Ok(Some(entry.finish()));
                            }
                        }
                        2 => {
                            if let Some(entry) = self.entry.as_mut() {
                                entry.close_field();
                            }
                        }
                        d if d > 2 => {
                            if let Some(capture) = self.entry.as_mut().and_then(|e| e.field.as_mut()) {
                                if capture.field == Field::Title {
                                    capture.markup.push_str("</");
                                    capture.markup.push_str(&String::from_utf8_lossy(end.name().as_ref()));
                                    capture.markup.push('>');
                                }
                            }
                        }
                        _ => {}
                    }
                }
                Event::Text(text) => {
                    if self.entry.as_ref().is_some_and(|e| e.field.is_some()) {
                        let position = self.reader.buffer_position() as u64;
                        let decoded = decode_text(&text, &self.entities, position)?;
                        if let Some(capture) = self.entry.as_mut().and_then(|e| e.field.as_mut()) {
                            capture.push_text(&decoded);
                        }
                    }
                }
                Event::CData(cdata) => {
                    if let Some(capture) = self.entry.as_mut().and_then(|e| e.field.as_mut()) {
                        capture.push_text(&String::from_utf8_lossy(&cdata));
                    }
                }
                Event::Eof => {
                    if self.depth != 0 {
                        return Err(SurveyError::Structure {
                            position: self.reader.buffer_position() as u64,
                            details: format!("document ended inside {} open element(s)", self.depth),
                        });
                    }
                    trace!("Reached end of dump at byte {}", self.reader.buffer_position() as u64);
                    return Ok(None);
                }
                _ => {}
            }
        }
    }
}

impl<R: BufRead> Iterator for RecordStream<R> {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                self.entry = None;
                Some(Err(e))
            }
        }
    }
}
