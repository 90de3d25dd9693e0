//! Named character entities referenced by the bibliography dump.
//!
//! The dump declares its entities in a companion DTD. A built-in ISO Latin-1
//! table covers the usual set; a DTD file can add or override declarations.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use log::{debug, warn};
use quick_xml::escape::unescape;

use crate::error::Result;

const LATIN1_NAMES: [&str; 96] = [
    "nbsp", "iexcl", "cent", "pound", "curren", "yen", "brvbar", "sect", "uml", "copy", "ordf",
    "laquo", "not", "shy", "reg", "macr", "deg", "plusmn", "sup2", "sup3", "acute", "micro", "para",
    "middot", "cedil", "sup1", "ordm", "raquo", "frac14", "frac12", "frac34", "iquest", "Agrave",
    "Aacute", "Acirc", "Atilde", "Auml", "Aring", "AElig", "Ccedil", "Egrave", "Eacute", "Ecirc",
    "Euml", "Igrave", "Iacute", "Icirc", "Iuml", "ETH", "Ntilde", "Ograve", "Oacute", "Ocirc",
    "Otilde", "Ouml", "times", "Oslash", "Ugrave", "Uacute", "Ucirc", "Uuml", "Yacute", "THORN",
    "szlig", "agrave", "aacute", "acirc", "atilde", "auml", "aring", "aelig", "ccedil", "egrave",
    "eacute", "ecirc", "euml", "igrave", "iacute", "icirc", "iuml", "eth", "ntilde", "ograve",
    "oacute", "ocirc", "otilde", "ouml", "divide", "oslash", "ugrave", "uacute", "ucirc", "uuml",
    "yacute", "thorn", "yuml",
];

/// Resolves entity names to their replacement text.
#[derive(Debug, Clone)]
pub struct EntityTable {
    entries: HashMap<String, String>,
}

impl Default for EntityTable {
    fn default() -> Self {
        Self::latin1()
    }
}

impl EntityTable {
    /// Table holding the ISO Latin-1 entities (U+00A0..=U+00FF).
    pub fn latin1() -> Self {
        let entries = LATIN1_NAMES
            .iter()
            .zip(0xA0u32..)
            .filter_map(|(name, code)| char::from_u32(code).map(|c| (name.to_string(), c.to_string())))
            .collect();
        Self { entries }
    }

    /// Latin-1 table extended with the general entity declarations of a DTD.
    pub fn from_dtd_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let mut table = Self::latin1();
        let added = table.extend_from_dtd(&content);
        debug!(
            "Loaded {} entity declarations from {}",
            added,
            path.as_ref().display()
        );
        Ok(table)
    }

    /// Adds every `<!ENTITY name "value">` declaration found in `dtd`.
    /// Parameter entities (`<!ENTITY % ...>`) are ignored. Returns how many
    /// declarations were taken.
    pub fn extend_from_dtd(&mut self, dtd: &str) -> usize {
        let mut added = 0;
        let mut rest = dtd;
        while let Some(start) = rest.find("<!ENTITY") {
            rest = &rest[start + "<!ENTITY".len()..];
            let Some((name, value, tail)) = parse_entity_decl(rest) else {
                continue;
            };
            rest = tail;
            match unescape(value) {
                Ok(text) => {
                    self.entries.insert(name.to_string(), text.into_owned());
                    added += 1;
                }
                Err(e) => warn!("Ignoring entity '{}' with undecodable value: {}", name, e),
            }
        }
        added
    }

    pub fn resolve(&self, name: &str) -> Option<&str> {
        match name {
            "amp" => Some("&"),
            "lt" => Some("<"),
            "gt" => Some(">"),
            "apos" => Some("'"),
            "quot" => Some("\""),
            _ => self.entries.get(name).map(String::as_str),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_entity_decl(decl: &str) -> Option<(&str, &str, &str)> {
    let decl = decl.trim_start();
    if decl.starts_with('%') {
        return None;
    }
    let name_end = decl.find(char::is_whitespace)?;
    let name = &decl[..name_end];
    let after_name = decl[name_end..].trim_start();
    let quote = after_name.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let body = &after_name[1..];
    let value_end = body.find(quote)?;
    Some((name, &body[..value_end], &body[value_end + 1..]))
}
