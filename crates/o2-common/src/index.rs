//! Reverse-reference index between managed resources
//!
//! Every reconcile records the resource's outbound references (its Config,
//! the Destinations an Alert notifies, the Template an alert Destination
//! renders, the Functions and Destinations a Pipeline uses). The inbound
//! side answers "who still references this?" for deletion ordering and for
//! requeueing dependents when a dependency changes.

use dashmap::DashMap;

use crate::resource::{ManagedResource, ResourceKey, ResourceKind};

/// Thread-safe dependency index using DashMap
#[derive(Debug, Default)]
pub struct DependencyIndex {
    /// Outgoing edges: referrer -> referenced
    edges_out: DashMap<ResourceKey, Vec<ResourceKey>>,

    /// Incoming edges: referenced -> referrers
    edges_in: DashMap<ResourceKey, Vec<ResourceKey>>,
}

impl DependencyIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a resource's outbound references
    pub fn put(&self, resource: &ManagedResource) {
        self.put_edges(&resource.key, resource.references());
    }

    /// Replace the outbound references of `key`
    pub fn put_edges(&self, key: &ResourceKey, references: Vec<ResourceKey>) {
        self.remove_edges(key);
        if references.is_empty() {
            return;
        }

        for target in &references {
            self.edges_in
                .entry(target.clone())
                .and_modify(|edges| {
                    if !edges.contains(key) {
                        edges.push(key.clone());
                    }
                })
                .or_insert_with(|| vec![key.clone()]);
        }
        self.edges_out.insert(key.clone(), references);
    }

    /// Forget a resource's outbound references
    ///
    /// Inbound edges are kept: resources that still reference `key` keep
    /// blocking a future deletion of a resource recreated under the same key.
    pub fn delete(&self, key: &ResourceKey) {
        self.remove_edges(key);
    }

    fn remove_edges(&self, key: &ResourceKey) {
        if let Some((_, edges)) = self.edges_out.remove(key) {
            for target in edges.iter() {
                let now_empty = match self.edges_in.get_mut(target) {
                    Some(mut in_edges) => {
                        in_edges.retain(|k| k != key);
                        in_edges.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    self.edges_in.remove_if(target, |_, v| v.is_empty());
                }
            }
        }
    }

    /// Resources `key` references
    pub fn dependencies(&self, key: &ResourceKey) -> Vec<ResourceKey> {
        self.edges_out
            .get(key)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    /// Resources referencing `key`, sorted
    pub fn dependents(&self, key: &ResourceKey) -> Vec<ResourceKey> {
        let mut dependents = self
            .edges_in
            .get(key)
            .map(|v| v.clone())
            .unwrap_or_default();
        dependents.sort();
        dependents
    }

    /// Resources of one kind referencing `key`
    pub fn dependents_of_kind(&self, key: &ResourceKey, kind: ResourceKind) -> Vec<ResourceKey> {
        self.dependents(key)
            .into_iter()
            .filter(|k| k.kind == kind)
            .collect()
    }

    /// Number of resources with recorded references
    pub fn len(&self) -> usize {
        self.edges_out.len()
    }

    /// Whether no references are recorded
    pub fn is_empty(&self) -> bool {
        self.edges_out.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(kind: ResourceKind, name: &str) -> ResourceKey {
        ResourceKey::new(kind, "obs", name)
    }

    // ==========================================================================
    // Story Tests: Deletion ordering follows the reference graph
    // ==========================================================================

    /// Story: A Template cannot go while a Destination renders it
    #[test]
    fn story_leaf_removal_unblocks_its_dependency() {
        let index = DependencyIndex::new();
        let config = key(ResourceKind::Config, "main");
        let template = key(ResourceKind::Template, "slack");
        let dest = key(ResourceKind::Destination, "oncall");
        let alert = key(ResourceKind::Alert, "cpu");

        index.put_edges(&template, vec![config.clone()]);
        index.put_edges(&dest, vec![config.clone(), template.clone()]);
        index.put_edges(&alert, vec![config.clone(), dest.clone()]);

        assert_eq!(index.dependents(&template), vec![dest.clone()]);
        assert_eq!(index.dependents(&dest), vec![alert.clone()]);
        assert_eq!(index.dependents(&config).len(), 3);

        // Alert goes first, then the destination is free
        index.delete(&alert);
        assert!(index.dependents(&dest).is_empty());

        index.delete(&dest);
        assert!(index.dependents(&template).is_empty());
        assert_eq!(index.dependents(&config), vec![template]);
    }

    /// Story: Dropping a reference from the spec releases the old target
    #[test]
    fn story_spec_update_replaces_references() {
        let index = DependencyIndex::new();
        let alert = key(ResourceKind::Alert, "cpu");
        let old = key(ResourceKind::Destination, "old");
        let new = key(ResourceKind::Destination, "new");

        index.put_edges(&alert, vec![old.clone()]);
        index.put_edges(&alert, vec![new.clone()]);

        assert!(index.dependents(&old).is_empty());
        assert_eq!(index.dependents(&new), vec![alert.clone()]);
        assert_eq!(index.dependencies(&alert), vec![new]);
    }

    #[test]
    fn test_dependents_of_kind_filters() {
        let index = DependencyIndex::new();
        let config = key(ResourceKind::Config, "main");
        index.put_edges(&key(ResourceKind::Alert, "a"), vec![config.clone()]);
        index.put_edges(&key(ResourceKind::Function, "f"), vec![config.clone()]);

        assert_eq!(
            index.dependents_of_kind(&config, ResourceKind::Function),
            vec![key(ResourceKind::Function, "f")]
        );
    }

    #[test]
    fn test_put_is_idempotent() {
        let index = DependencyIndex::new();
        let config = key(ResourceKind::Config, "main");
        let alert = key(ResourceKind::Alert, "a");
        index.put_edges(&alert, vec![config.clone()]);
        index.put_edges(&alert, vec![config.clone()]);
        assert_eq!(index.dependents(&config), vec![alert]);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_empty_references_are_not_recorded() {
        let index = DependencyIndex::new();
        index.put_edges(&key(ResourceKind::Config, "main"), vec![]);
        assert!(index.is_empty());
    }
}
