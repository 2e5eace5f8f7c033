//! Filter registry for creating filters by tag.

use crate::core::node::{Category, Filter, NodeMetadata};
use crate::core::sync::SingletonCell;
use indexmap::IndexMap;
use log::debug;
use std::sync::Arc;

static GLOBAL_REGISTRY: SingletonCell<FilterRegistry> = SingletonCell::new();

/// Factory function for creating filter instances.
pub type FilterFactory = Arc<dyn Fn() -> Box<dyn Filter> + Send + Sync>;

/// Registry entry containing metadata and factory.
#[derive(Clone)]
pub struct RegistryEntry {
    /// Factory function to create instances.
    pub factory: FilterFactory,
    /// Cached metadata (avoids creating instance just to get metadata).
    pub metadata: NodeMetadata,
}

/// Registry of the filter types that can be created by tag.
///
/// Filters are kept in registration order. Registering a tag twice replaces
/// the earlier entry.
#[derive(Default)]
pub struct FilterRegistry {
    filters: IndexMap<String, RegistryEntry>,
}

impl FilterRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-populated with built-in filters.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::filters::builtin::register_all(&mut registry);
        registry
    }

    /// The process-wide registry of built-in filters.
    pub fn global() -> Arc<FilterRegistry> {
        GLOBAL_REGISTRY.get_or_init(Self::with_builtins)
    }

    /// Register a filter type.
    pub fn register<F>(&mut self, factory: F)
    where
        F: Fn() -> Box<dyn Filter> + Send + Sync + 'static,
    {
        // Create a temporary instance to get metadata
        let metadata = factory().metadata();
        let tag = metadata.tag.clone();
        debug!("Registered filter '{}'", tag);

        self.filters.insert(
            tag,
            RegistryEntry {
                factory: Arc::new(factory),
                metadata,
            },
        );
    }

    /// Create a new instance of a filter by tag.
    pub fn create(&self, tag: &str) -> Option<Box<dyn Filter>> {
        self.filters.get(tag).map(|entry| (entry.factory)())
    }

    /// Get metadata for a filter without creating an instance.
    pub fn get_metadata(&self, tag: &str) -> Option<&NodeMetadata> {
        self.filters.get(tag).map(|entry| &entry.metadata)
    }

    /// Check if a filter is registered.
    pub fn contains(&self, tag: &str) -> bool {
        self.filters.contains_key(tag)
    }

    /// Get all registered tags.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.filters.keys().map(|s| s.as_str())
    }

    /// Search filters by tag, name or description.
    pub fn search(&self, query: &str) -> Vec<&str> {
        let query = query.to_lowercase();

        self.filters
            .iter()
            .filter(|(tag, entry)| {
                tag.contains(&query)
                    || entry.metadata.name.to_lowercase().contains(&query)
                    || entry.metadata.description.to_lowercase().contains(&query)
            })
            .map(|(tag, _)| tag.as_str())
            .collect()
    }

    /// Unregister a filter.
    pub fn unregister(&mut self, tag: &str) -> bool {
        self.filters.shift_remove(tag).is_some()
    }

    /// Get the total number of registered filters.
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Metadata grouped by category, categories in display order and
    /// filters sorted by name.
    pub fn grouped_by_category(&self) -> IndexMap<Category, Vec<&NodeMetadata>> {
        let mut grouped: IndexMap<Category, Vec<&NodeMetadata>> = IndexMap::new();
        for category in Category::all() {
            let mut filters: Vec<&NodeMetadata> = self
                .filters
                .values()
                .map(|entry| &entry.metadata)
                .filter(|metadata| metadata.category == *category)
                .collect();
            if filters.is_empty() {
                continue;
            }
            filters.sort_by(|a, b| a.name.cmp(&b.name));
            grouped.insert(*category, filters);
        }
        grouped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::builtin::ShiftScale;

    const BUILTIN_TAGS: [&str; 7] = [
        "constant_source",
        "gradient_source",
        "shift_scale",
        "box_mean",
        "add",
        "additive_noise",
        "statistics",
    ];

    #[test]
    fn test_register_and_create() {
        let mut registry = FilterRegistry::new();
        assert!(registry.is_empty());
        registry.register(|| Box::new(ShiftScale::<u8>::default()));

        assert!(registry.contains("shift_scale"));
        let filter = registry.create("shift_scale").unwrap();
        assert_eq!(filter.metadata().name, "Shift Scale");
        assert!(registry.create("missing").is_none());
    }

    #[test]
    fn test_builtins() {
        let registry = FilterRegistry::with_builtins();
        assert_eq!(registry.tags().collect::<Vec<_>>(), BUILTIN_TAGS);
        for tag in BUILTIN_TAGS {
            assert_eq!(registry.create(tag).unwrap().metadata().tag, tag);
        }
        assert_eq!(registry.get_metadata("add").unwrap().required_inputs, 2);
    }

    #[test]
    fn test_global_registry() {
        let a = FilterRegistry::global();
        let b = FilterRegistry::global();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.contains("box_mean"));
    }

    #[test]
    fn test_category_grouping() {
        let registry = FilterRegistry::with_builtins();
        let grouped = registry.grouped_by_category();
        let categories: Vec<_> = grouped.keys().copied().collect();
        assert_eq!(categories.first(), Some(&Category::Source));
        let sources: Vec<_> = grouped[&Category::Source].iter().map(|m| m.tag.as_str()).collect();
        assert_eq!(sources, vec!["constant_source", "gradient_source"]);
    }

    #[test]
    fn test_search_and_unregister() {
        let mut registry = FilterRegistry::with_builtins();
        assert_eq!(registry.search("NOISE"), vec!["additive_noise"]);
        assert!(registry.search("nonexistent").is_empty());

        assert!(registry.unregister("add"));
        assert!(!registry.unregister("add"));
        assert_eq!(registry.len(), BUILTIN_TAGS.len() - 1);
    }
}
