//! Heuristic declaration scanner
//!
//! The built-in [`TranslationUnitParser`]. It blanks out comments, literals and
//! preprocessor lines, tracks brace scopes and records the declarations a
//! symbol search needs. Macros are not expanded and both branches of
//! conditional compilation are scanned.

use regex::Regex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;
use tracing::{debug, trace};

use super::parser::{Ast, AstFile, ParseError, ParseOptions, TranslationUnitParser};
use crate::fragment::{IndexedSymbol, SymbolKind, SymbolLocation, SymbolOrigin};
use crate::workspace::{CompilationDatabase, ContentTypeClassifier, Project};

const MAX_INCLUDE_DEPTH: usize = 16;

const HEADER_EXTENSIONS: &[&str] = &["h", "hh", "hpp", "hxx", "h++", "inl", "ipp", "tcc", "H"];

/// Leading words of statements that never declare anything
const STATEMENT_KEYWORDS: &[&str] = &[
    "return", "if", "else", "for", "while", "do", "switch", "case", "default", "goto", "break",
    "continue", "throw", "delete", "new", "sizeof", "alignof", "decltype", "static_assert",
    "friend", "co_return", "co_await", "co_yield", "try", "catch",
];

/// Words that can end a declarator list but are never a declared name
const RESERVED_NAMES: &[&str] = &[
    "void", "int", "char", "short", "long", "float", "double", "bool", "unsigned", "signed",
    "auto", "const", "volatile", "static", "extern", "inline", "struct", "class", "union", "enum",
    "typedef", "typename", "mutable", "register", "constexpr", "override", "final",
];

fn is_header(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| HEADER_EXTENSIONS.contains(&ext))
}

/// Compiled patterns shared by every scan
#[derive(Debug, Clone)]
struct DeclarationPatterns {
    define: Regex,
    include: Regex,
    namespace: Regex,
    extern_block: Regex,
    type_head: Regex,
    using_alias: Regex,
    function_name: Regex,
    operator_word: Regex,
    qualifier_tail: Regex,
    identifier: Regex,
}

impl DeclarationPatterns {
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            // #define NAME ...
            define: Regex::new(r"^#\s*define\s+([A-Za-z_]\w*)")?,
            // #include "local.h"
            include: Regex::new(r#"^#\s*include\s*"([^"]+)""#)?,
            namespace: Regex::new(
                r"^(?:inline\s+)?namespace(?:\s+([A-Za-z_]\w*(?:\s*::\s*(?:inline\s+)?[A-Za-z_]\w*)*))?\s*(?:\[\[[^\]]*\]\]\s*)?$",
            )?,
            // Literal contents are blanked, so `extern "C"` arrives as `extern " "`
            extern_block: Regex::new(r#"^extern\s*(?:"[^"]*")?$"#)?,
            type_head: Regex::new(
                r"^(typedef\s+)?(?:(?:const|volatile)\s+)?(class|struct|union|enum(?:\s+(?:class|struct))?)\s*(?:\[\[[^\]]*\]\]\s*)?(?:alignas\s*\([^)]*\)\s*)?(?:[A-Z][A-Z0-9_]+\s+)?([A-Za-z_]\w*(?:\s*::\s*[A-Za-z_]\w*)*)?(?:\s*<[^{;]*>)?\s*(?:final\s*)?(?::[^:{;][^{;]*)?$",
            )?,
            using_alias: Regex::new(r"^\s*using\s+([A-Za-z_]\w*)\s*(?:\[\[[^\]]*\]\]\s*)?=")?,
            function_name: Regex::new(r"((?:[A-Za-z_]\w*\s*::\s*)*)(~?\s*[A-Za-z_]\w*)\s*$")?,
            operator_word: Regex::new(r"\boperator\b")?,
            qualifier_tail: Regex::new(r"((?:[A-Za-z_]\w*\s*::\s*)*)$")?,
            identifier: Regex::new(r"[A-Za-z_]\w*")?,
        })
    }
}

/// Declarations and quoted includes found in one file
#[derive(Debug, Clone, Default)]
pub struct ScannedFile {
    pub symbols: Vec<IndexedSymbol>,
    pub includes: Vec<String>,
}

#[derive(Debug, Clone)]
struct CachedBuildInfo {
    database: Arc<CompilationDatabase>,
    modified: Option<SystemTime>,
}

impl CachedBuildInfo {
    fn is_current(&self) -> bool {
        let modified = std::fs::metadata(&self.database.path)
            .and_then(|meta| meta.modified())
            .ok();
        modified.is_some() && modified == self.modified
    }
}

pub struct DeclarationScanner {
    patterns: DeclarationPatterns,
    classifier: Arc<dyn ContentTypeClassifier>,
    /// Compilation databases by project location
    build_info: Mutex<HashMap<PathBuf, CachedBuildInfo>>,
}

impl DeclarationScanner {
    pub fn new(classifier: Arc<dyn ContentTypeClassifier>) -> Result<Self, regex::Error> {
        Ok(Self {
            patterns: DeclarationPatterns::new()?,
            classifier,
            build_info: Mutex::new(HashMap::new()),
        })
    }

    /// Scan source text that belongs to `file`
    pub fn scan_text(&self, file: &Path, source: &str, skip_function_bodies: bool) -> ScannedFile {
        let sanitized = sanitize(source);
        let mut scanned = ScannedFile::default();
        let mut scan = FileScan::new(&self.patterns, &sanitized.code, file, skip_function_bodies);

        for directive in &sanitized.directives {
            if let Some(name) = self
                .patterns
                .define
                .captures(&directive.text)
                .and_then(|c| c.get(1))
            {
                scan.record(name.as_str(), SymbolKind::Macro, directive.offset + name.start(), None);
            } else if let Some(include) = self
                .patterns
                .include
                .captures(&directive.text)
                .and_then(|c| c.get(1))
            {
                scanned.includes.push(include.as_str().to_string());
            }
        }

        scanned.symbols = scan.run();
        scanned
    }

    fn build_info(&self, project: &Project) -> Option<Arc<CompilationDatabase>> {
        let mut cache = self
            .build_info
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = cache.get(project.location()) {
            if cached.is_current() {
                return Some(Arc::clone(&cached.database));
            }
        }
        let Some(database) = CompilationDatabase::discover(project.location()) else {
            cache.remove(project.location());
            return None;
        };
        let modified = std::fs::metadata(&database.path)
            .and_then(|meta| meta.modified())
            .ok();
        let database = Arc::new(database);
        cache.insert(
            project.location().to_path_buf(),
            CachedBuildInfo {
                database: Arc::clone(&database),
                modified,
            },
        );
        Some(database)
    }

    fn resolve_include(&self, project: &Project, including: &Path, include: &str) -> Option<PathBuf> {
        let mut candidates = Vec::with_capacity(3);
        if let Some(dir) = including.parent() {
            candidates.push(dir.join(include));
        }
        candidates.push(project.location().join(include));
        candidates.push(project.location().join("include").join(include));
        candidates.into_iter().find(|candidate| candidate.is_file())
    }

    fn scan_file(&self, path: &Path, options: &ParseOptions) -> Result<ScannedFile, ParseError> {
        let bytes = std::fs::read(path).map_err(|source| ParseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let source = decode_source(&bytes);
        Ok(self.scan_text(path, &source, options.skip_function_bodies))
    }
}

impl TranslationUnitParser for DeclarationScanner {
    fn parse(
        &self,
        project: &Project,
        path: &Path,
        options: &ParseOptions,
    ) -> Result<Option<Ast>, ParseError> {
        let language = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| self.classifier.classify(name));
        let Some(language) = language else {
            trace!("No applicable language for {}", path.display());
            return Ok(None);
        };

        // Headers never carry compile commands of their own
        if options.skip_if_no_build_info && !is_header(path) {
            if let Some(database) = self.build_info(project) {
                if !database.contains_file(path) {
                    debug!("Skipping {}: no build information", path.display());
                    return Ok(None);
                }
            }
        }

        let unit = self.scan_file(path, options)?;
        let mut visited = HashSet::from([path.to_path_buf()]);
        let mut pending: VecDeque<(PathBuf, String, usize)> = unit
            .includes
            .iter()
            .map(|include| (path.to_path_buf(), include.clone(), 1))
            .collect();
        let mut files = vec![AstFile {
            path: path.to_path_buf(),
            symbols: unit.symbols,
        }];

        while let Some((including, include, depth)) = pending.pop_front() {
            if depth > MAX_INCLUDE_DEPTH {
                continue;
            }
            let Some(header) = self.resolve_include(project, &including, &include) else {
                trace!("Unresolved include \"{}\" in {}", include, including.display());
                continue;
            };
            if !visited.insert(header.clone()) {
                continue;
            }
            match self.scan_file(&header, options) {
                Ok(scanned) => {
                    pending.extend(
                        scanned
                            .includes
                            .into_iter()
                            .map(|nested| (header.clone(), nested, depth + 1)),
                    );
                    files.push(AstFile {
                        path: header,
                        symbols: scanned.symbols,
                    });
                }
                Err(e) => debug!("Skipping header: {}", e),
            }
        }

        Ok(Some(Ast {
            translation_unit: path.to_path_buf(),
            language,
            files,
        }))
    }
}

struct Directive {
    offset: usize,
    text: String,
}

struct Sanitized {
    /// Source with comments, literal contents and directives replaced by spaces
    code: String,
    directives: Vec<Directive>,
}

/// Decode file bytes, turning each invalid byte into one space so offsets
/// into the text are offsets into the file
fn decode_source(bytes: &[u8]) -> String {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return text.to_owned();
    }
    let mut text = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        text.push_str(chunk.valid());
        text.extend(std::iter::repeat_n(' ', chunk.invalid().len()));
    }
    text
}

fn blank(code: &mut [u8], start: usize, end: usize) {
    let end = end.min(code.len());
    for byte in &mut code[start..end] {
        if *byte != b'\n' {
            *byte = b' ';
        }
    }
}

/// Blank out everything that is not declaration structure, keeping byte offsets
fn sanitize(source: &str) -> Sanitized {
    let bytes = source.as_bytes();
    let len = bytes.len();
    let mut code = bytes.to_vec();
    let mut directives = Vec::new();
    let mut line_start = true;
    let mut i = 0;

    while i < len {
        match bytes[i] {
            b'\n' => {
                line_start = true;
                i += 1;
            }
            b' ' | b'\t' | b'\r' => i += 1,
            b'#' if line_start => {
                let start = i;
                while i < len && !(bytes[i] == b'\n' && bytes[i - 1] != b'\\') {
                    i += 1;
                }
                directives.push(Directive {
                    offset: start,
                    text: source[start..i].to_string(),
                });
                blank(&mut code, start, i);
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                let start = i;
                while i < len && bytes[i] != b'\n' {
                    i += 1;
                }
                blank(&mut code, start, i);
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let start = i;
                i += 2;
                while i < len && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    i += 1;
                }
                i = (i + 2).min(len);
                blank(&mut code, start, i);
            }
            quote @ (b'"' | b'\'') => {
                line_start = false;
                i += 1;
                let start = i;
                while i < len && bytes[i] != quote && bytes[i] != b'\n' {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
                let end = i.min(len);
                blank(&mut code, start, end);
                i = end + 1;
            }
            _ => {
                line_start = false;
                i += 1;
            }
        }
    }

    let code = String::from_utf8(code).unwrap_or_else(|e| decode_source(e.as_bytes()));
    Sanitized { code, directives }
}

/// Skip access labels and template headers in front of a declaration
fn strip_prefixes(text: &str) -> usize {
    let mut pos = 0;
    loop {
        let rest = &text[pos..];
        let trimmed = rest.trim_start();
        pos += rest.len() - trimmed.len();
        if let Some(after) = strip_access_label(trimmed).or_else(|| strip_template_header(trimmed)) {
            pos += trimmed.len() - after.len();
            continue;
        }
        return pos;
    }
}

fn strip_access_label(text: &str) -> Option<&str> {
    for label in ["public", "protected", "private"] {
        if let Some(rest) = text.strip_prefix(label) {
            let rest = rest.trim_start();
            if rest.starts_with(':') && !rest.starts_with("::") {
                return Some(&rest[1..]);
            }
        }
    }
    None
}

fn strip_template_header(text: &str) -> Option<&str> {
    let rest = text.strip_prefix("template")?;
    let rest = rest.trim_start();
    if !rest.starts_with('<') {
        return None;
    }
    let mut depth = 0usize;
    for (i, c) in rest.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&rest[i + 1..]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split at commas outside any bracket pair, returning (offset, segment)
fn split_top_level(text: &str, separator: u8) -> Vec<(usize, &str)> {
    let mut segments = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, byte) in text.bytes().enumerate() {
        match byte {
            b'(' | b'[' | b'{' | b'<' => depth += 1,
            b')' | b']' | b'}' | b'>' => depth -= 1,
            b if b == separator && depth <= 0 => {
                segments.push((start, &text[start..i]));
                start = i + 1;
            }
            _ => {}
        }
    }
    segments.push((start, &text[start..]));
    segments
}

/// Cut a declarator before its initializer, array bounds or bit-field width
fn declarator_end(segment: &str) -> usize {
    let bytes = segment.as_bytes();
    let mut depth = 0i32;
    for (i, &byte) in bytes.iter().enumerate() {
        match byte {
            b'<' => depth += 1,
            b'>' => depth -= 1,
            b'=' | b'{' | b'[' | b'(' if depth <= 0 => return i,
            b':' if depth <= 0 => {
                let prev = i.checked_sub(1).map(|p| bytes[p]);
                let next = bytes.get(i + 1).copied();
                if prev != Some(b':') && next != Some(b':') {
                    return i;
                }
            }
            _ => {}
        }
    }
    segment.len()
}

#[derive(Debug, Clone)]
enum Scope {
    Namespace(Option<String>),
    Type {
        name: Option<String>,
        typedef: bool,
    },
    Enum {
        name: Option<String>,
        scoped: bool,
        typedef: bool,
        body_start: usize,
    },
    Function(String),
    Extern,
    Block,
    /// Braces inside an initializer or argument list; the statement goes on
    Initializer,
}

impl Scope {
    fn is_named(&self) -> bool {
        !matches!(self, Self::Extern | Self::Block | Self::Initializer)
    }
}

#[derive(Debug, Clone, Copy)]
enum Tail {
    Typedef,
    Variable,
}

struct FunctionName {
    name: String,
    /// Offset of `name` within the scanned text
    offset: usize,
    qualifier: Option<String>,
    /// Whether anything (a return type) precedes the name
    has_type: bool,
}

struct FileScan<'a> {
    patterns: &'a DeclarationPatterns,
    code: &'a str,
    file: &'a Path,
    skip_bodies: bool,
    scopes: Vec<Scope>,
    symbols: Vec<IndexedSymbol>,
    namespaces_seen: HashSet<String>,
    /// Declarators after a closing type brace: `} a, *b;`
    pending_tail: Option<Tail>,
}

impl<'a> FileScan<'a> {
    fn new(
        patterns: &'a DeclarationPatterns,
        code: &'a str,
        file: &'a Path,
        skip_bodies: bool,
    ) -> Self {
        Self {
            patterns,
            code,
            file,
            skip_bodies,
            scopes: Vec::new(),
            symbols: Vec::new(),
            namespaces_seen: HashSet::new(),
            pending_tail: None,
        }
    }

    fn run(mut self) -> Vec<IndexedSymbol> {
        let code = self.code;
        let bytes = code.as_bytes();
        let mut statement_start = 0;
        let mut paren_depth = 0usize;

        for i in 0..bytes.len() {
            match bytes[i] {
                b'(' => paren_depth += 1,
                b')' => paren_depth = paren_depth.saturating_sub(1),
                b'{' => {
                    let scope = self.open_scope(statement_start, i, paren_depth);
                    let continues = matches!(scope, Scope::Initializer);
                    self.scopes.push(scope);
                    if !continues {
                        statement_start = i + 1;
                        paren_depth = 0;
                    }
                }
                b'}' => match self.scopes.pop() {
                    Some(Scope::Initializer) => {}
                    Some(scope) => {
                        self.close_scope(scope, i);
                        statement_start = i + 1;
                        paren_depth = 0;
                    }
                    None => statement_start = i + 1,
                },
                b';' if paren_depth == 0 => {
                    if matches!(self.scopes.last(), Some(Scope::Initializer)) {
                        continue;
                    }
                    self.statement(statement_start, i);
                    statement_start = i + 1;
                }
                _ => {}
            }
        }
        self.symbols
    }

    fn inside_function(&self) -> bool {
        self.scopes
            .iter()
            .any(|scope| matches!(scope, Scope::Function(_)))
    }

    fn innermost_named(&self) -> Option<&Scope> {
        self.scopes.iter().rev().find(|scope| scope.is_named())
    }

    fn in_type(&self) -> bool {
        matches!(self.innermost_named(), Some(Scope::Type { .. }))
    }

    fn scope_name(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .scopes
            .iter()
            .filter_map(|scope| match scope {
                Scope::Namespace(name) | Scope::Type { name, .. } => name.as_deref(),
                Scope::Function(name) => Some(name.as_str()),
                _ => None,
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("::"))
        }
    }

    fn join_scope(&self, inner: Option<&str>) -> Option<String> {
        match (self.scope_name(), inner) {
            (Some(outer), Some(inner)) => Some(format!("{}::{}", outer, inner)),
            (outer, None) => outer,
            (None, Some(inner)) => Some(inner.to_string()),
        }
    }

    fn record(&mut self, name: &str, kind: SymbolKind, offset: usize, scope: Option<String>) {
        trace!("Scanned {} {} at {}", kind, name, offset);
        self.symbols.push(IndexedSymbol {
            name: name.to_string(),
            kind,
            file: self.file.to_path_buf(),
            location: SymbolLocation::ByteOffset {
                offset: u32::try_from(offset).unwrap_or(u32::MAX),
                length: u32::try_from(name.len()).unwrap_or(u32::MAX),
            },
            scope,
            origin: SymbolOrigin::Ast,
        });
    }

    fn record_here(&mut self, name: &str, kind: SymbolKind, offset: usize) {
        let scope = self.scope_name();
        self.record(name, kind, offset, scope);
    }

    fn variable_kind(&self, external: bool) -> SymbolKind {
        if external {
            SymbolKind::ExternalVariable
        } else if self.in_type() {
            SymbolKind::Member
        } else {
            SymbolKind::Variable
        }
    }

    fn open_scope(&mut self, start: usize, at: usize, paren_depth: usize) -> Scope {
        if paren_depth > 0
            || matches!(
                self.scopes.last(),
                Some(Scope::Initializer | Scope::Enum { .. })
            )
        {
            return Scope::Initializer;
        }
        self.pending_tail = None;
        let inside_function = self.inside_function();
        if inside_function && self.skip_bodies {
            return Scope::Block;
        }

        let code = self.code;
        let head_start = start + strip_prefixes(&code[start..at]);
        let head = code[head_start..at].trim_end();
        if head.is_empty() {
            return Scope::Block;
        }

        if !inside_function {
            if let Some(scope) = self.namespace_head(head, head_start) {
                return scope;
            }
            if self.patterns.extern_block.is_match(head) {
                return Scope::Extern;
            }
        }
        if let Some(scope) = self.type_head(head, head_start, at) {
            return scope;
        }
        if inside_function {
            // Only local types are of interest inside bodies
            return Scope::Block;
        }
        if split_top_level(head, b'=').len() > 1 {
            return Scope::Initializer;
        }
        if let Some(function) = self.function_name(head, head_start) {
            if function.has_type || function.qualifier.is_some() || self.in_type() {
                let kind = if function.qualifier.is_some() || self.in_type() {
                    SymbolKind::Member
                } else {
                    SymbolKind::Function
                };
                let scope = self.join_scope(function.qualifier.as_deref());
                self.record(&function.name, kind, function.offset, scope);
                let local = match function.qualifier {
                    Some(qualifier) => format!("{}::{}", qualifier, function.name),
                    None => function.name,
                };
                return Scope::Function(local);
            }
        }
        // `Type name{...}` brace initialization
        if !head.contains('(') && self.patterns.identifier.find_iter(head).count() >= 2 {
            return Scope::Initializer;
        }
        Scope::Block
    }

    fn namespace_head(&mut self, head: &str, head_start: usize) -> Option<Scope> {
        let captures = self.patterns.namespace.captures(head)?;
        let Some(path) = captures.get(1) else {
            return Some(Scope::Namespace(None));
        };
        let components: Vec<&str> = path
            .as_str()
            .split("::")
            .map(|part| part.trim().trim_start_matches("inline").trim())
            .collect();
        let qualified = components.join("::");
        let name = components.last().copied().unwrap_or_default();
        let full = self.join_scope(Some(&qualified)).unwrap_or_default();
        if self.namespaces_seen.insert(full) {
            let outer = &components[..components.len().saturating_sub(1)];
            let scope = if outer.is_empty() {
                self.scope_name()
            } else {
                self.join_scope(Some(&outer.join("::")))
            };
            let offset = head_start + path.start() + path.as_str().rfind(name).unwrap_or(0);
            self.record(name, SymbolKind::Namespace, offset, scope);
        }
        Some(Scope::Namespace(Some(qualified)))
    }

    fn type_head(&mut self, head: &str, head_start: usize, at: usize) -> Option<Scope> {
        let captures = self.patterns.type_head.captures(head)?;
        let typedef = captures.get(1).is_some();
        let keyword = captures.get(2).map(|m| m.as_str()).unwrap_or_default();
        let kind = match keyword {
            "class" => SymbolKind::Class,
            "struct" => SymbolKind::Struct,
            "union" => SymbolKind::Union,
            _ => SymbolKind::Enum,
        };

        let qualified = captures.get(3).map(|name| {
            let parts: Vec<&str> = name.as_str().split("::").map(str::trim).collect();
            let simple = parts.last().copied().unwrap_or_default();
            let offset = head_start + name.start() + name.as_str().rfind(simple).unwrap_or(0);
            let qualifier = (parts.len() > 1).then(|| parts[..parts.len() - 1].join("::"));
            (simple.to_string(), offset, qualifier, parts.join("::"))
        });
        if let Some((simple, offset, qualifier, _)) = &qualified {
            let scope = self.join_scope(qualifier.as_deref());
            self.record(simple, kind, *offset, scope);
        }
        let name = qualified.map(|(_, _, _, full)| full);

        Some(if kind == SymbolKind::Enum {
            Scope::Enum {
                name,
                scoped: keyword.contains("class") || keyword.contains("struct"),
                typedef,
                body_start: at + 1,
            }
        } else {
            Scope::Type { name, typedef }
        })
    }

    fn close_scope(&mut self, scope: Scope, at: usize) {
        self.pending_tail = None;
        match scope {
            Scope::Enum {
                name,
                scoped,
                typedef,
                body_start,
            } => {
                if !self.inside_function() || !self.skip_bodies {
                    self.enumerators(body_start, at, scoped.then_some(name).flatten());
                }
                self.pending_tail = Some(if typedef { Tail::Typedef } else { Tail::Variable });
            }
            Scope::Type { typedef, .. } => {
                self.pending_tail = Some(if typedef { Tail::Typedef } else { Tail::Variable });
            }
            _ => {}
        }
    }

    fn enumerators(&mut self, body_start: usize, body_end: usize, enum_scope: Option<String>) {
        let code = self.code;
        let body = &code[body_start..body_end];
        let scope = self.join_scope(enum_scope.as_deref());
        for (segment_start, segment) in split_top_level(body, b',') {
            if let Some(name) = self.patterns.identifier.find(segment) {
                self.record(
                    name.as_str(),
                    SymbolKind::Enumerator,
                    body_start + segment_start + name.start(),
                    scope.clone(),
                );
            }
        }
    }

    fn declarations_visible(&self) -> bool {
        if matches!(self.scopes.last(), Some(Scope::Enum { .. })) {
            return false;
        }
        if !self.inside_function() {
            return true;
        }
        !self.skip_bodies && self.in_type()
    }

    fn statement(&mut self, start: usize, end: usize) {
        let tail = self.pending_tail.take();
        if !self.declarations_visible() {
            return;
        }
        let code = self.code;
        let decl_start = start + strip_prefixes(&code[start..end]);
        let decl = &code[decl_start..end];
        if decl.trim().is_empty() {
            return;
        }
        match tail {
            Some(Tail::Typedef) => self.declarators(decl, decl_start, SymbolKind::Typedef, false),
            Some(Tail::Variable) => {
                let kind = self.variable_kind(false);
                self.declarators(decl, decl_start, kind, false);
            }
            None => self.declaration(decl, decl_start),
        }
    }

    fn declaration(&mut self, decl: &str, decl_start: usize) {
        let Some(first) = self.patterns.identifier.find(decl) else {
            return;
        };
        let first_word = first.as_str();
        if STATEMENT_KEYWORDS.contains(&first_word) {
            return;
        }
        if let Some(alias) = self.patterns.using_alias.captures(decl).and_then(|c| c.get(1)) {
            self.record_here(alias.as_str(), SymbolKind::Typedef, decl_start + alias.start());
            return;
        }
        if first_word == "using" {
            return;
        }
        // Forward declaration
        if self.patterns.type_head.is_match(decl.trim_end()) {
            return;
        }

        let typedef = first_word == "typedef";
        let external = first_word == "extern";

        if let Some(paren) = decl.find('(') {
            let after = decl[paren + 1..].trim_start();
            if after.starts_with(['*', '&', '^']) && !decl[..paren].contains('=') {
                // Function pointer: `void (*name)(int)`
                if let Some(name) = self.patterns.identifier.find(after) {
                    let offset = decl_start + (decl.len() - after.len()) + name.start();
                    let kind = if typedef {
                        SymbolKind::Typedef
                    } else {
                        self.variable_kind(external)
                    };
                    self.record_here(name.as_str(), kind, offset);
                }
                return;
            }
        }

        if let Some(function) = self.function_name(decl, decl_start) {
            if function.has_type || self.in_type() {
                let kind = if typedef {
                    SymbolKind::Typedef
                } else if self.in_type() {
                    SymbolKind::Member
                } else {
                    SymbolKind::Prototype
                };
                let scope = self.join_scope(function.qualifier.as_deref());
                self.record(&function.name, kind, function.offset, scope);
                return;
            }
        }

        let kind = if typedef {
            SymbolKind::Typedef
        } else {
            self.variable_kind(external)
        };
        self.declarators(decl, decl_start, kind, true);
    }

    /// Record each declarator of `type a, *b = 1, c[4]`
    fn declarators(&mut self, decl: &str, decl_start: usize, kind: SymbolKind, needs_type: bool) {
        for (index, (segment_start, segment)) in split_top_level(decl, b',').into_iter().enumerate() {
            let declarator = &segment[..declarator_end(segment)];
            let identifiers: Vec<_> = self.patterns.identifier.find_iter(declarator).collect();
            if index == 0 && needs_type && identifiers.len() < 2 {
                return;
            }
            let Some(name) = identifiers.last() else {
                continue;
            };
            if RESERVED_NAMES.contains(&name.as_str()) {
                continue;
            }
            self.record_here(name.as_str(), kind, decl_start + segment_start + name.start());
        }
    }

    /// Name of the function declared or defined by `text`, if it looks like one
    fn function_name(&self, text: &str, text_start: usize) -> Option<FunctionName> {
        let paren = text.find('(')?;
        let mut name_part = &text[..paren];
        if name_part.contains('=') || name_part.contains('.') || name_part.contains("->") {
            return None;
        }

        if let Some(operator) = self.patterns.operator_word.find(name_part) {
            let mut symbol: String = name_part[operator.end()..].split_whitespace().collect();
            if symbol.is_empty() && text[paren..].starts_with("()") {
                symbol = "()".to_string();
            }
            let name = if symbol.starts_with(|c: char| c.is_alphanumeric() || c == '_') {
                format!("operator {}", symbol)
            } else {
                format!("operator{}", symbol)
            };
            let before = &name_part[..operator.start()];
            let qualifier = self
                .patterns
                .qualifier_tail
                .captures(before)
                .and_then(|c| c.get(1))
                .map(|q| q.as_str().split_whitespace().collect::<String>())
                .map(|q| q.trim_end_matches("::").to_string())
                .filter(|q| !q.is_empty());
            return Some(FunctionName {
                name,
                offset: text_start + operator.start(),
                qualifier,
                has_type: !before.trim().is_empty(),
            });
        }

        name_part = name_part.trim_end();
        let captures = self.patterns.function_name.captures(name_part)?;
        let name_match = captures.get(2)?;
        let name: String = name_match.as_str().split_whitespace().collect();
        let bare = name.trim_start_matches('~');
        if STATEMENT_KEYWORDS.contains(&bare) || RESERVED_NAMES.contains(&bare) {
            return None;
        }
        let qualifier = captures
            .get(1)
            .map(|q| q.as_str().split_whitespace().collect::<String>())
            .map(|q| q.trim_end_matches("::").to_string())
            .filter(|q| !q.is_empty());
        let whole = captures.get(0)?;
        let leading = name_part[..whole.start()].trim();
        Some(FunctionName {
            name,
            offset: text_start + name_match.start(),
            qualifier,
            has_type: !leading.is_empty(),
        })
    }
}
