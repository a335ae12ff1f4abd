//! Fragment version resolution
//!
//! Candidates are offered one at a time. Per `fragment_id` at most one
//! fragment is selected: within a format the highest supported version wins,
//! out-of-range candidates only ever mark an empty slot unusable, and a
//! candidate in a different format than the current selection is dropped.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::fragment::{FRAGMENT_FORMAT_ID, FRAGMENT_FORMAT_VERSION, FragmentProperties, IndexFragment};

/// Inclusive range of supported versions within one format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRange {
    pub min: u32,
    pub max: u32,
}

impl VersionRange {
    pub fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, version: u32) -> bool {
        (self.min..=self.max).contains(&version)
    }
}

/// Supported version ranges by format id; unknown formats are unsupported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormatCompatibility {
    ranges: BTreeMap<String, VersionRange>,
}

impl Default for FormatCompatibility {
    fn default() -> Self {
        Self::empty().with_range(
            FRAGMENT_FORMAT_ID,
            VersionRange::new(FRAGMENT_FORMAT_VERSION, FRAGMENT_FORMAT_VERSION),
        )
    }
}

impl FormatCompatibility {
    pub fn empty() -> Self {
        Self {
            ranges: BTreeMap::new(),
        }
    }

    pub fn with_range(mut self, format_id: impl Into<String>, range: VersionRange) -> Self {
        self.ranges.insert(format_id.into(), range);
        self
    }

    /// Add ranges, replacing existing entries for the same format
    pub fn extend(&mut self, ranges: impl IntoIterator<Item = (String, VersionRange)>) {
        self.ranges.extend(ranges);
    }

    pub fn range(&self, format_id: &str) -> Option<VersionRange> {
        self.ranges.get(format_id).copied()
    }

    pub fn supports(&self, properties: &FragmentProperties) -> bool {
        self.range(&properties.format_id)
            .is_some_and(|range| range.contains(properties.format_version))
    }
}

/// What happened to one offered candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// First usable fragment for its id
    Selected,
    /// Newer version of the selected format
    Replaced,
    /// Not newer than the current selection
    KeptExisting,
    /// Out of range; the slot is (or stays) unusable
    MarkedUnusable,
    /// Out of range next to a usable selection
    Rejected,
    /// Usable, but the selection is in another format
    CrossFormatDropped,
}

enum Slot {
    Selected {
        fragment: Arc<IndexFragment>,
        properties: FragmentProperties,
    },
    Unusable(FragmentProperties),
}

/// Per-query selection state, keyed by fragment id in first-seen order
#[derive(Default)]
pub struct FragmentSelection {
    order: Vec<String>,
    slots: HashMap<String, Slot>,
}

impl FragmentSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offer(
        &mut self,
        fragment: Arc<IndexFragment>,
        properties: FragmentProperties,
        compatibility: &FormatCompatibility,
    ) -> Resolution {
        let id = properties.fragment_id.clone();
        let supported = compatibility.supports(&properties);

        match self.slots.get(&id) {
            None => {
                self.order.push(id.clone());
                if supported {
                    self.slots.insert(id, Slot::Selected { fragment, properties });
                    Resolution::Selected
                } else {
                    self.slots.insert(id, Slot::Unusable(properties));
                    Resolution::MarkedUnusable
                }
            }
            Some(Slot::Unusable(_)) => {
                if supported {
                    self.slots.insert(id, Slot::Selected { fragment, properties });
                    Resolution::Selected
                } else {
                    Resolution::MarkedUnusable
                }
            }
            Some(Slot::Selected {
                properties: existing,
                ..
            }) => {
                if !supported {
                    Resolution::Rejected
                } else if existing.format_id != properties.format_id {
                    Resolution::CrossFormatDropped
                } else if properties.format_version > existing.format_version {
                    self.slots.insert(id, Slot::Selected { fragment, properties });
                    Resolution::Replaced
                } else {
                    Resolution::KeptExisting
                }
            }
        }
    }

    /// Selected fragments in first-seen id order
    pub fn selected(&self) -> Vec<Arc<IndexFragment>> {
        self.order
            .iter()
            .filter_map(|id| match self.slots.get(id) {
                Some(Slot::Selected { fragment, .. }) => Some(Arc::clone(fragment)),
                _ => None,
            })
            .collect()
    }

    /// Ids that ended up with no usable fragment, with the first rejected candidate
    pub fn unusable(&self) -> Vec<&FragmentProperties> {
        self.order
            .iter()
            .filter_map(|id| match self.slots.get(id) {
                Some(Slot::Unusable(properties)) => Some(properties),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compat() -> FormatCompatibility {
        FormatCompatibility::empty()
            .with_range("X", VersionRange::new(2, 6))
            .with_range("Y", VersionRange::new(1, 1))
    }

    fn candidate(id: &str, format: &str, version: u32) -> (Arc<IndexFragment>, FragmentProperties) {
        let properties = FragmentProperties::new(id, format, version);
        (Arc::new(IndexFragment::new(properties.clone())), properties)
    }

    fn offer(selection: &mut FragmentSelection, id: &str, format: &str, version: u32) -> Resolution {
        let (fragment, properties) = candidate(id, format, version);
        selection.offer(fragment, properties, &compat())
    }

    #[tokio::test]
    async fn test_highest_supported_version_wins() {
        let mut selection = FragmentSelection::new();
        assert_eq!(offer(&mut selection, "A", "X", 3), Resolution::Selected);
        assert_eq!(offer(&mut selection, "A", "X", 5), Resolution::Replaced);
        assert_eq!(offer(&mut selection, "A", "X", 1), Resolution::Rejected);
        assert_eq!(offer(&mut selection, "A", "X", 4), Resolution::KeptExisting);

        let selected = selection.selected();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].properties().await.unwrap().format_version, 5);
        assert!(selection.unusable().is_empty());
    }

    #[tokio::test]
    async fn test_cross_format_keeps_first_processed() {
        let mut selection = FragmentSelection::new();
        assert_eq!(offer(&mut selection, "A", "X", 2), Resolution::Selected);
        assert_eq!(
            offer(&mut selection, "A", "Y", 1),
            Resolution::CrossFormatDropped
        );

        let selected = selection.selected();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].properties().await.unwrap().format_id, "X");
    }

    #[test]
    fn test_out_of_range_marks_slot_unusable_until_usable_arrives() {
        let mut selection = FragmentSelection::new();
        assert_eq!(offer(&mut selection, "A", "X", 9), Resolution::MarkedUnusable);
        assert_eq!(offer(&mut selection, "B", "Z", 1), Resolution::MarkedUnusable);
        assert_eq!(selection.unusable().len(), 2);

        assert_eq!(offer(&mut selection, "A", "X", 2), Resolution::Selected);
        assert_eq!(selection.selected().len(), 1);
        let unusable: Vec<&str> = selection
            .unusable()
            .iter()
            .map(|p| p.fragment_id.as_str())
            .collect();
        assert_eq!(unusable, vec!["B"]);
    }

    #[test]
    fn test_selection_keeps_first_seen_order() {
        let mut selection = FragmentSelection::new();
        offer(&mut selection, "second", "X", 2);
        offer(&mut selection, "first", "X", 2);
        offer(&mut selection, "second", "X", 3);
        assert_eq!(selection.selected().len(), 2);
        assert_eq!(selection.order, vec!["second", "first"]);
    }

    #[test]
    fn test_default_compatibility_accepts_current_format() {
        let compat = FormatCompatibility::default();
        assert!(compat.supports(&FragmentProperties::current("p")));
        assert!(!compat.supports(&FragmentProperties::new("p", FRAGMENT_FORMAT_ID, 1)));
        assert!(!compat.supports(&FragmentProperties::new("p", "other", 3)));
    }
}
