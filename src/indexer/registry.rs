//! Indexer back-ends by id

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::{CtagsIndexer, FastIndexer, Indexer, IndexerContext, IndexerError, NullIndexer};

pub type IndexerFactory =
    Arc<dyn Fn(&IndexerContext) -> Result<Arc<dyn Indexer>, IndexerError> + Send + Sync>;

type BuiltinFactory = fn(&IndexerContext) -> Result<Arc<dyn Indexer>, IndexerError>;

/// Back-ends compiled into the crate
const BUILTIN: &[(&str, BuiltinFactory)] = &[
    (FastIndexer::ID, FastIndexer::create),
    (CtagsIndexer::ID, CtagsIndexer::create),
    (NullIndexer::ID, NullIndexer::create),
];

/// Maps indexer ids (and aliases) to factories
#[derive(Clone, Default)]
pub struct IndexerRegistry {
    factories: BTreeMap<String, IndexerFactory>,
    aliases: BTreeMap<String, String>,
}

impl IndexerRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for (id, factory) in BUILTIN {
            registry.register(*id, Arc::new(*factory));
        }
        registry
    }

    pub fn register(&mut self, id: impl Into<String>, factory: IndexerFactory) {
        let id = id.into();
        debug!("Registering indexer back-end {}", id);
        self.factories.insert(id, factory);
    }

    /// Make `alias` resolve to the back-end registered as `target`
    pub fn alias(&mut self, alias: impl Into<String>, target: impl Into<String>) {
        self.aliases.insert(alias.into(), target.into());
    }

    /// Resolve an alias chain to a registered id
    pub fn resolve<'a>(&'a self, id: &'a str) -> Option<&'a str> {
        let mut current = id;
        // Bounded so an alias cycle cannot loop forever
        for _ in 0..=self.aliases.len() {
            if let Some((key, _)) = self.factories.get_key_value(current) {
                return Some(key.as_str());
            }
            current = self.aliases.get(current)?.as_str();
        }
        None
    }

    pub fn contains(&self, id: &str) -> bool {
        self.resolve(id).is_some()
    }

    pub fn create(
        &self,
        id: &str,
        context: &IndexerContext,
    ) -> Result<Arc<dyn Indexer>, IndexerError> {
        let factory = self
            .resolve(id)
            .and_then(|resolved| self.factories.get(resolved))
            .ok_or_else(|| IndexerError::UnknownIndexer { id: id.to_string() })?;
        factory(context).map_err(|e| match e {
            IndexerError::CreationFailed { .. } => e,
            other => IndexerError::CreationFailed {
                id: id.to_string(),
                project: context.project.name().to_string(),
                reason: other.to_string(),
            },
        })
    }

    /// Registered ids followed by aliases
    pub fn ids(&self) -> Vec<String> {
        self.factories
            .keys()
            .chain(self.aliases.keys())
            .cloned()
            .collect()
    }
}
