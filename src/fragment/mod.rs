//! Index fragments
//!
//! A fragment is one versioned slice of the symbol index. Every indexer owns
//! one writable fragment; fragment providers contribute read-only ones. All
//! property access and mutation goes through the fragment's own read/write
//! lock, which is independent from the index manager's project map monitor.

pub mod content;
pub mod error;
pub mod snapshot;
pub mod symbol;

pub use content::{
    FRAGMENT_FORMAT_ID, FRAGMENT_FORMAT_VERSION, FragmentContent, FragmentProperties,
    IndexFragment,
};
pub use error::FragmentError;
pub use snapshot::FragmentSnapshot;
pub use symbol::{IndexedSymbol, SymbolKind, SymbolLocation, SymbolOrigin};
