//! Gene set definitions: named, ordered gene-identifier lists.

use serde::{Deserialize, Serialize};

/// A named, ordered set of gene identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneSet {
    /// Gene-set name, e.g. a pathway identifier.
    pub name: String,
    /// Member gene identifiers, in definition order.
    pub genes: Vec<String>,
}

impl GeneSet {
    /// Create a gene set from a name and gene identifiers.
    pub fn new(name: &str, genes: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            genes: genes.iter().map(|g| g.to_string()).collect(),
        }
    }

    /// Number of member genes, before any intersection with the data.
    pub fn len(&self) -> usize {
        self.genes.len()
    }

    /// Check if the set has no member genes.
    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }
}

/// An ordered collection of gene sets; the analysis emits one result row per
/// entry, in this order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneSetCollection {
    /// Gene sets in input order.
    pub sets: Vec<GeneSet>,
}

impl GeneSetCollection {
    /// Create a collection from gene sets.
    pub fn new(sets: Vec<GeneSet>) -> Self {
        Self { sets }
    }

    /// Number of gene sets.
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    /// Check if the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Gene-set names, in order.
    pub fn names(&self) -> Vec<&str> {
        self.sets.iter().map(|s| s.name.as_str()).collect()
    }

    /// Get a gene set by index.
    pub fn get(&self, index: usize) -> Option<&GeneSet> {
        self.sets.get(index)
    }

    /// Iterate over the gene sets in order.
    pub fn iter(&self) -> impl Iterator<Item = &GeneSet> {
        self.sets.iter()
    }
}
