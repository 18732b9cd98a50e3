//! Cookbook artifact types and download planning
//!
//! The dependency-solve endpoint answers with a mapping of cookbook name to
//! cookbook manifest; each manifest carries nine groups of file descriptors
//! whose URLs a converging node would fetch. Cookbooks are request-scoped:
//! fetched fresh for every solve, never cached.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One downloadable file within a cookbook segment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CookbookFile {
    /// Content checksum assigned by the server
    #[serde(default)]
    pub checksum: String,
    /// File name within the segment
    #[serde(default)]
    pub name: String,
    /// Path within the cookbook
    #[serde(default)]
    pub path: String,
    /// Platform specificity tag
    #[serde(default)]
    pub specificity: String,
    /// Fully-qualified retrieval URL
    #[serde(default)]
    pub url: String,
}

/// A solved cookbook version with its nine file segments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cookbook {
    /// Cookbook name as keyed by the solver
    #[serde(default)]
    pub cookbook_name: String,
    /// Versioned name, e.g. `apt-2.9.2`
    #[serde(default)]
    pub name: String,
    /// Solved version
    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub attributes: Vec<CookbookFile>,
    #[serde(default)]
    pub definitions: Vec<CookbookFile>,
    #[serde(default)]
    pub files: Vec<CookbookFile>,
    #[serde(default)]
    pub libraries: Vec<CookbookFile>,
    #[serde(default)]
    pub providers: Vec<CookbookFile>,
    #[serde(default)]
    pub recipes: Vec<CookbookFile>,
    #[serde(default)]
    pub resources: Vec<CookbookFile>,
    #[serde(default)]
    pub root_files: Vec<CookbookFile>,
    #[serde(default)]
    pub templates: Vec<CookbookFile>,
}

impl Cookbook {
    /// Every file descriptor across all nine segments.
    pub fn files(&self) -> impl Iterator<Item = &CookbookFile> {
        self.attributes
            .iter()
            .chain(&self.definitions)
            .chain(&self.files)
            .chain(&self.libraries)
            .chain(&self.providers)
            .chain(&self.recipes)
            .chain(&self.resources)
            .chain(&self.root_files)
            .chain(&self.templates)
    }
}

/// Solver response: cookbook name to solved cookbook.
pub type Cookbooks = HashMap<String, Cookbook>;

/// The file URLs a run should download, each file kept independently with
/// probability `probability` (approximating partial cache hits).
///
/// Iteration order across cookbooks is unspecified; downloads are
/// independent idempotent reads with no ordering requirement.
pub fn download_plan<R: Rng>(
    cookbooks: &Cookbooks,
    probability: f64,
    rng: &mut R,
) -> Vec<String> {
    cookbooks
        .values()
        .flat_map(Cookbook::files)
        .filter(|_| probability >= 1.0 || rng.gen::<f64>() < probability)
        .map(|file| file.url.clone())
        .collect()
}
