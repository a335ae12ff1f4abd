use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::thread::{self, ThreadId};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, trace};

use super::error::FragmentError;
use super::symbol::IndexedSymbol;

/// Format family written by the built-in indexers
pub const FRAGMENT_FORMAT_ID: &str = "cindex.fragment";

/// Current version within [`FRAGMENT_FORMAT_ID`]
pub const FRAGMENT_FORMAT_VERSION: u32 = 3;

/// Identity and format of a fragment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FragmentProperties {
    /// Logical identity, stable across versions
    pub fragment_id: String,
    /// Layout family
    pub format_id: String,
    /// Monotonic version within `format_id`
    pub format_version: u32,
}

impl FragmentProperties {
    pub fn new(
        fragment_id: impl Into<String>,
        format_id: impl Into<String>,
        format_version: u32,
    ) -> Self {
        Self {
            fragment_id: fragment_id.into(),
            format_id: format_id.into(),
            format_version,
        }
    }

    /// Properties for a fragment in the current built-in format
    pub fn current(fragment_id: impl Into<String>) -> Self {
        Self::new(fragment_id, FRAGMENT_FORMAT_ID, FRAGMENT_FORMAT_VERSION)
    }
}

/// Data guarded by a fragment's lock
///
/// Symbol lists are shared between committed versions of the content, so
/// starting a write transaction copies only the file map.
#[derive(Debug, Clone)]
pub struct FragmentContent {
    properties: FragmentProperties,
    /// Symbols grouped by the file that declares them
    files: BTreeMap<PathBuf, Arc<Vec<IndexedSymbol>>>,
}

impl FragmentContent {
    pub fn new(properties: FragmentProperties) -> Self {
        Self {
            properties,
            files: BTreeMap::new(),
        }
    }

    pub(crate) fn from_parts(
        properties: FragmentProperties,
        files: BTreeMap<PathBuf, Vec<IndexedSymbol>>,
    ) -> Self {
        Self {
            properties,
            files: files
                .into_iter()
                .map(|(file, symbols)| (file, Arc::new(symbols)))
                .collect(),
        }
    }

    pub fn properties(&self) -> &FragmentProperties {
        &self.properties
    }

    pub fn files(&self) -> &BTreeMap<PathBuf, Arc<Vec<IndexedSymbol>>> {
        &self.files
    }

    /// Replace everything known about a file with a new symbol set
    pub fn replace_file(&mut self, file: PathBuf, symbols: Vec<IndexedSymbol>) {
        trace!("Fragment: {} symbols for {}", symbols.len(), file.display());
        self.files.insert(file, Arc::new(symbols));
    }

    pub fn remove_file(&mut self, file: &Path) -> bool {
        self.files.remove(file).is_some()
    }

    /// Drop every file at or below `root`; returns how many were dropped
    pub fn remove_under(&mut self, root: &Path) -> usize {
        let before = self.files.len();
        self.files.retain(|file, _| !file.starts_with(root));
        let removed = before - self.files.len();
        debug!(
            "Fragment {}: removed {} files under {}",
            self.properties.fragment_id,
            removed,
            root.display()
        );
        removed
    }

    pub fn clear(&mut self) {
        debug!(
            "Clearing fragment {} ({} files)",
            self.properties.fragment_id,
            self.files.len()
        );
        self.files.clear();
    }

    pub fn is_indexed(&self, file: &Path) -> bool {
        self.files.contains_key(file)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn symbol_count(&self) -> usize {
        self.files.values().map(|symbols| symbols.len()).sum()
    }

    /// Symbols whose simple or qualified name equals `name`
    pub fn find(&self, name: &str) -> Vec<&IndexedSymbol> {
        self.files
            .values()
            .flat_map(|symbols| symbols.iter())
            .filter(|symbol| symbol.name == name || symbol.qualified_name() == name)
            .collect()
    }
}

/// Task (or, outside a task, thread) holding a fragment's write side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockOwner {
    Task(tokio::task::Id),
    Thread(ThreadId),
}

impl LockOwner {
    fn current() -> Self {
        match tokio::task::try_id() {
            Some(id) => Self::Task(id),
            None => Self::Thread(thread::current().id()),
        }
    }
}

/// A lockable fragment shared between its writer and any number of readers
///
/// Readers get the last committed content and never wait, so a read may be
/// nested inside another read or inside a write held by the same task. A
/// write is exclusive and commits when its guard drops; a task that already
/// holds the write side gets [`FragmentError::WriteReentered`] instead of
/// waiting on itself.
///
/// Closing a fragment makes every later (or pending) lock acquisition fail
/// with [`FragmentError::LockInterrupted`].
#[derive(Debug)]
pub struct IndexFragment {
    committed: std::sync::RwLock<Arc<FragmentContent>>,
    writer: Mutex<()>,
    write_owner: std::sync::Mutex<Option<LockOwner>>,
    closed: AtomicBool,
}

impl IndexFragment {
    pub fn new(properties: FragmentProperties) -> Self {
        Self::from_content(FragmentContent::new(properties))
    }

    pub fn from_content(content: FragmentContent) -> Self {
        Self {
            committed: std::sync::RwLock::new(Arc::new(content)),
            writer: Mutex::new(()),
            write_owner: std::sync::Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    fn committed(&self) -> Arc<FragmentContent> {
        Arc::clone(&self.committed.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn owner(&self) -> std::sync::MutexGuard<'_, Option<LockOwner>> {
        self.write_owner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn acquire_read(&self) -> Result<FragmentReadGuard, FragmentError> {
        self.ensure_open()?;
        Ok(FragmentReadGuard {
            content: self.committed(),
        })
    }

    pub async fn acquire_write(&self) -> Result<FragmentWriteGuard<'_>, FragmentError> {
        self.ensure_open()?;
        let current = LockOwner::current();
        if *self.owner() == Some(current) {
            return Err(FragmentError::WriteReentered);
        }
        let exclusive = self.writer.lock().await;
        self.ensure_open()?;
        *self.owner() = Some(current);
        Ok(FragmentWriteGuard {
            fragment: self,
            working: self.committed(),
            _exclusive: exclusive,
        })
    }

    /// Read the fragment's identity under its read lock
    pub async fn properties(&self) -> Result<FragmentProperties, FragmentError> {
        let content = self.acquire_read().await?;
        Ok(content.properties().clone())
    }

    /// Look up symbols by name under the read lock
    pub async fn find_symbols(&self, name: &str) -> Result<Vec<IndexedSymbol>, FragmentError> {
        let content = self.acquire_read().await?;
        Ok(content.find(name).into_iter().cloned().collect())
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), FragmentError> {
        if self.is_closed() {
            Err(FragmentError::LockInterrupted)
        } else {
            Ok(())
        }
    }
}

/// Read access to one committed version of a fragment's content
#[derive(Debug)]
pub struct FragmentReadGuard {
    content: Arc<FragmentContent>,
}

impl Deref for FragmentReadGuard {
    type Target = FragmentContent;

    fn deref(&self) -> &FragmentContent {
        &self.content
    }
}

/// Exclusive write access; changes become visible to readers on drop
pub struct FragmentWriteGuard<'a> {
    fragment: &'a IndexFragment,
    working: Arc<FragmentContent>,
    _exclusive: MutexGuard<'a, ()>,
}

impl Deref for FragmentWriteGuard<'_> {
    type Target = FragmentContent;

    fn deref(&self) -> &FragmentContent {
        &self.working
    }
}

impl DerefMut for FragmentWriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut FragmentContent {
        Arc::make_mut(&mut self.working)
    }
}

impl Drop for FragmentWriteGuard<'_> {
    fn drop(&mut self) {
        *self
            .fragment
            .committed
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::clone(&self.working);
        *self.fragment.owner() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::symbol::{SymbolKind, SymbolLocation, SymbolOrigin};
    use std::sync::Arc;
    use std::time::Duration;

    fn function(name: &str, file: &str) -> IndexedSymbol {
        IndexedSymbol {
            name: name.to_string(),
            kind: SymbolKind::Function,
            file: PathBuf::from(file),
            location: SymbolLocation::LineNumber(1),
            scope: None,
            origin: SymbolOrigin::Ctags,
        }
    }

    #[tokio::test]
    async fn test_replace_and_remove_file() {
        let fragment = IndexFragment::new(FragmentProperties::current("demo"));
        {
            let mut content = fragment.acquire_write().await.unwrap();
            content.replace_file(PathBuf::from("/p/a.c"), vec![function("foo", "/p/a.c")]);
            content.replace_file(
                PathBuf::from("/p/b.c"),
                vec![function("bar", "/p/b.c"), function("baz", "/p/b.c")],
            );
        }

        let content = fragment.acquire_read().await.unwrap();
        assert_eq!(content.file_count(), 2);
        assert_eq!(content.symbol_count(), 3);
        assert!(content.is_indexed(Path::new("/p/a.c")));
        drop(content);

        {
            let mut content = fragment.acquire_write().await.unwrap();
            content.replace_file(PathBuf::from("/p/b.c"), vec![function("bar", "/p/b.c")]);
            assert!(content.remove_file(Path::new("/p/a.c")));
            assert!(!content.remove_file(Path::new("/p/a.c")));
        }

        assert!(fragment.find_symbols("foo").await.unwrap().is_empty());
        assert!(fragment.find_symbols("baz").await.unwrap().is_empty());
        assert_eq!(fragment.find_symbols("bar").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_find_by_qualified_name() {
        let fragment = IndexFragment::new(FragmentProperties::current("demo"));
        let mut symbol = function("run", "/p/a.cpp");
        symbol.scope = Some("app::Engine".to_string());
        fragment
            .acquire_write()
            .await
            .unwrap()
            .replace_file(PathBuf::from("/p/a.cpp"), vec![symbol]);

        assert_eq!(fragment.find_symbols("run").await.unwrap().len(), 1);
        assert_eq!(fragment.find_symbols("app::Engine::run").await.unwrap().len(), 1);
        assert!(fragment.find_symbols("Engine::run").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closed_fragment_interrupts_lock() {
        let fragment = IndexFragment::new(FragmentProperties::current("demo"));
        fragment.close();
        assert!(matches!(
            fragment.properties().await,
            Err(FragmentError::LockInterrupted)
        ));
        assert!(fragment.acquire_write().await.is_err());
    }

    #[tokio::test]
    async fn test_close_interrupts_pending_writer() {
        let fragment = Arc::new(IndexFragment::new(FragmentProperties::current("demo")));
        let writer = fragment.acquire_write().await.unwrap();

        let pending = {
            let fragment = Arc::clone(&fragment);
            tokio::spawn(async move { fragment.acquire_write().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        fragment.close();
        drop(writer);

        assert!(matches!(
            pending.await.unwrap(),
            Err(FragmentError::LockInterrupted)
        ));
    }

    #[tokio::test]
    async fn test_reads_nest_inside_a_write() {
        let fragment = IndexFragment::new(FragmentProperties::current("demo"));
        fragment
            .acquire_write()
            .await
            .unwrap()
            .replace_file(PathBuf::from("/p/a.c"), vec![function("old", "/p/a.c")]);

        let mut content = fragment.acquire_write().await.unwrap();
        content.clear();
        content.replace_file(PathBuf::from("/p/b.c"), vec![function("new", "/p/b.c")]);

        // Nested reads see the last committed content
        let outer = fragment.acquire_read().await.unwrap();
        let inner = fragment.acquire_read().await.unwrap();
        assert_eq!(outer.find("old").len(), 1);
        assert!(inner.find("new").is_empty());
        assert_eq!(fragment.find_symbols("old").await.unwrap().len(), 1);

        assert!(matches!(
            fragment.acquire_write().await,
            Err(FragmentError::WriteReentered)
        ));

        drop(content);
        assert!(fragment.find_symbols("old").await.unwrap().is_empty());
        assert_eq!(fragment.find_symbols("new").await.unwrap().len(), 1);
        // Snapshots taken earlier stay valid
        assert_eq!(outer.find("old").len(), 1);
    }

    #[tokio::test]
    async fn test_writers_of_other_tasks_wait() {
        let fragment = Arc::new(IndexFragment::new(FragmentProperties::current("demo")));
        let writer = fragment.acquire_write().await.unwrap();

        let other = {
            let fragment = Arc::clone(&fragment);
            tokio::spawn(async move {
                let mut content = fragment.acquire_write().await.unwrap();
                content.replace_file(PathBuf::from("/p/c.c"), vec![function("late", "/p/c.c")]);
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!other.is_finished());

        drop(writer);
        other.await.unwrap();
        assert_eq!(fragment.find_symbols("late").await.unwrap().len(), 1);
        // The write side is free again for this task
        assert!(fragment.acquire_write().await.is_ok());
    }

    #[test]
    fn test_remove_under_drops_a_folder() {
        let mut content = FragmentContent::new(FragmentProperties::current("demo"));
        content.replace_file(PathBuf::from("/p/lib/a.c"), vec![function("a", "/p/lib/a.c")]);
        content.replace_file(
            PathBuf::from("/p/lib/sub/b.c"),
            vec![function("b", "/p/lib/sub/b.c")],
        );
        content.replace_file(PathBuf::from("/p/library.c"), vec![function("c", "/p/library.c")]);

        assert_eq!(content.remove_under(Path::new("/p/lib")), 2);
        assert_eq!(content.file_count(), 1);
        assert!(content.is_indexed(Path::new("/p/library.c")));
    }
}
