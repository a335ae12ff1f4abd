//! Symbol records stored in a fragment

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Kinds of indexed names
///
/// The set matches what tag generators report for C and C++, so AST-derived
/// and ctags-derived symbols share one vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Class,
    Macro,
    Enumerator,
    Function,
    Enum,
    Member,
    Namespace,
    Prototype,
    Struct,
    Typedef,
    Union,
    Variable,
    ExternalVariable,
}

impl SymbolKind {
    /// Map a ctags single-letter kind for C/C++ to a symbol kind
    pub fn from_ctags_letter(letter: char) -> Option<Self> {
        let kind = match letter {
            'c' => Self::Class,
            'd' => Self::Macro,
            'e' => Self::Enumerator,
            'f' => Self::Function,
            'g' => Self::Enum,
            'm' => Self::Member,
            'n' => Self::Namespace,
            'p' => Self::Prototype,
            's' => Self::Struct,
            't' => Self::Typedef,
            'u' => Self::Union,
            'v' => Self::Variable,
            'x' => Self::ExternalVariable,
            _ => return None,
        };
        Some(kind)
    }

    /// Map a ctags long kind name (`kind:function`) to a symbol kind
    pub fn from_ctags_name(name: &str) -> Option<Self> {
        let kind = match name {
            "class" => Self::Class,
            "macro" => Self::Macro,
            "enumerator" => Self::Enumerator,
            "function" => Self::Function,
            "enum" => Self::Enum,
            "member" => Self::Member,
            "namespace" => Self::Namespace,
            "prototype" => Self::Prototype,
            "struct" => Self::Struct,
            "typedef" => Self::Typedef,
            "union" => Self::Union,
            "variable" => Self::Variable,
            "externvar" => Self::ExternalVariable,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Macro => "macro",
            Self::Enumerator => "enumerator",
            Self::Function => "function",
            Self::Enum => "enum",
            Self::Member => "member",
            Self::Namespace => "namespace",
            Self::Prototype => "prototype",
            Self::Struct => "struct",
            Self::Typedef => "typedef",
            Self::Union => "union",
            Self::Variable => "variable",
            Self::ExternalVariable => "externvar",
        }
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a symbol sits inside its file
///
/// Tag generators only report lines, so ctags-derived symbols carry a line
/// number instead of a byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolLocation {
    ByteOffset { offset: u32, length: u32 },
    LineNumber(u32),
}

impl SymbolLocation {
    /// Offset in the legacy node encoding: a byte offset, or the line number
    /// when [`node_length`](Self::node_length) is `-1`
    pub fn node_offset(&self) -> u32 {
        match self {
            Self::ByteOffset { offset, .. } => *offset,
            Self::LineNumber(line) => *line,
        }
    }

    /// Byte lengths beyond `i32::MAX` saturate; `-1` stays reserved for lines
    pub fn node_length(&self) -> i32 {
        match self {
            Self::ByteOffset { length, .. } => i32::try_from(*length).unwrap_or(i32::MAX),
            Self::LineNumber(_) => -1,
        }
    }
}

/// Which back-end produced a symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolOrigin {
    Ast,
    Ctags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedSymbol {
    pub name: String,
    pub kind: SymbolKind,
    /// File the symbol is declared in
    pub file: PathBuf,
    pub location: SymbolLocation,
    /// Enclosing scope (`ns::Class`), when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub origin: SymbolOrigin,
}

impl IndexedSymbol {
    pub fn qualified_name(&self) -> String {
        match &self.scope {
            Some(scope) if !scope.is_empty() => format!("{}::{}", scope, self.name),
            _ => self.name.clone(),
        }
    }

    /// Resolve the symbol to a binding.
    ///
    /// Tag-derived names carry no semantic information, so they never resolve.
    pub fn binding(&self) -> Option<Binding> {
        match self.origin {
            SymbolOrigin::Ast => Some(Binding {
                qualified_name: self.qualified_name(),
                kind: self.kind,
                file: self.file.clone(),
                location: self.location,
            }),
            SymbolOrigin::Ctags => None,
        }
    }
}

/// A resolved declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub qualified_name: String,
    pub kind: SymbolKind,
    pub file: PathBuf,
    pub location: SymbolLocation,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol(origin: SymbolOrigin, location: SymbolLocation) -> IndexedSymbol {
        IndexedSymbol {
            name: "draw".to_string(),
            kind: SymbolKind::Member,
            file: PathBuf::from("/p/shape.h"),
            location,
            scope: Some("gfx::Shape".to_string()),
            origin,
        }
    }

    #[test]
    fn test_line_locations_use_negative_length() {
        let line = SymbolLocation::LineNumber(42);
        assert_eq!(line.node_offset(), 42);
        assert_eq!(line.node_length(), -1);

        let bytes = SymbolLocation::ByteOffset {
            offset: 128,
            length: 4,
        };
        assert_eq!(bytes.node_offset(), 128);
        assert_eq!(bytes.node_length(), 4);

        let huge = SymbolLocation::ByteOffset {
            offset: 0,
            length: u32::MAX,
        };
        assert_eq!(huge.node_length(), i32::MAX);
    }

    #[test]
    fn test_ctags_symbols_do_not_resolve() {
        let ctags = symbol(SymbolOrigin::Ctags, SymbolLocation::LineNumber(3));
        assert!(ctags.binding().is_none());

        let ast = symbol(
            SymbolOrigin::Ast,
            SymbolLocation::ByteOffset {
                offset: 10,
                length: 4,
            },
        );
        let binding = ast.binding().expect("AST symbols resolve");
        assert_eq!(binding.qualified_name, "gfx::Shape::draw");
        assert_eq!(binding.kind, SymbolKind::Member);
    }

    #[test]
    fn test_ctags_kind_letters() {
        let letters = "cdefgmnpstuvx";
        let kinds: Vec<SymbolKind> = letters
            .chars()
            .filter_map(SymbolKind::from_ctags_letter)
            .collect();
        assert_eq!(kinds.len(), letters.len());
        assert_eq!(SymbolKind::from_ctags_letter('z'), None);
        for kind in kinds {
            assert_eq!(SymbolKind::from_ctags_name(kind.as_str()), Some(kind));
        }
    }
}
