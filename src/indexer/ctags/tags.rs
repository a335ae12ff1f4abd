//! Reader for the extended ctags tag file format
//!
//! ```text
//! name<TAB>file<TAB>address;"<TAB>field<TAB>field...
//! ```
//!
//! The kind field comes as a bare letter, a bare long name, or `kind:<name>`.
//! Lines come from `line:<n>` or a numeric address.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::trace;

use crate::fragment::{IndexedSymbol, SymbolKind, SymbolLocation, SymbolOrigin};

const EXTENSION_SEPARATOR: &str = ";\"\t";

/// Scope fields ctags emits for C and C++
const SCOPE_FIELDS: &[&str] = &["class", "struct", "namespace", "union", "enum", "function"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagEntry {
    pub name: String,
    pub file: PathBuf,
    pub line: u32,
    pub kind: SymbolKind,
    pub scope: Option<String>,
}

impl TagEntry {
    pub fn into_symbol(self) -> IndexedSymbol {
        IndexedSymbol {
            name: self.name,
            kind: self.kind,
            file: self.file,
            location: SymbolLocation::LineNumber(self.line),
            scope: self.scope,
            origin: SymbolOrigin::Ctags,
        }
    }
}

/// Parse tag file text; relative file names resolve against `base`
pub fn parse_tags(text: &str, base: &Path) -> Vec<TagEntry> {
    text.lines()
        .filter(|line| !line.starts_with("!_TAG_") && !line.trim().is_empty())
        .filter_map(|line| {
            let entry = parse_line(line, base);
            if entry.is_none() {
                trace!("Skipping tag line: {}", line);
            }
            entry
        })
        .collect()
}

/// Group entries into per-file symbol lists
pub fn group_by_file(entries: Vec<TagEntry>) -> BTreeMap<PathBuf, Vec<IndexedSymbol>> {
    let mut files: BTreeMap<PathBuf, Vec<IndexedSymbol>> = BTreeMap::new();
    for entry in entries {
        files
            .entry(entry.file.clone())
            .or_default()
            .push(entry.into_symbol());
    }
    files
}

fn parse_line(line: &str, base: &Path) -> Option<TagEntry> {
    let (head, extensions) = match line.split_once(EXTENSION_SEPARATOR) {
        Some((head, extensions)) => (head, extensions),
        None => (line, ""),
    };
    let mut columns = head.splitn(3, '\t');
    let name = columns.next()?;
    let file = columns.next()?;
    let address = columns.next().unwrap_or_default();
    if name.is_empty() || file.is_empty() {
        return None;
    }

    let mut kind = None;
    let mut line_number = address
        .trim_end_matches(";\"")
        .parse::<u32>()
        .ok();
    let mut scope = None;

    for field in extensions.split('\t') {
        match field.split_once(':') {
            None => {
                // Bare kind: a letter without `K`, a long name with it
                let mut chars = field.chars();
                kind = match (chars.next(), chars.next()) {
                    (Some(letter), None) => SymbolKind::from_ctags_letter(letter),
                    _ => SymbolKind::from_ctags_name(field),
                };
            }
            Some(("kind", value)) => {
                kind = SymbolKind::from_ctags_name(value)
                    .or_else(|| value.chars().next().and_then(SymbolKind::from_ctags_letter));
            }
            Some(("line", value)) => line_number = value.parse().ok().or(line_number),
            Some(("scope", value)) => {
                // `scope:class:ns::Foo` with extended scope fields
                scope = value.split_once(':').map(|(_, name)| name.to_string());
            }
            Some((key, value)) if SCOPE_FIELDS.contains(&key) => {
                scope = Some(value.to_string());
            }
            Some(_) => {}
        }
    }

    let file = PathBuf::from(file);
    Some(TagEntry {
        name: name.to_string(),
        file: if file.is_absolute() {
            file
        } else {
            base.join(file)
        },
        line: line_number?,
        kind: kind?,
        scope,
    })
}
