//! Route and island manifest
//!
//! A manifest is the ordered list of route and island modules discovered in
//! a project. Order comes from the collector and is significant: two
//! manifests are equal only when both lists match element for element.

use serde::{Deserialize, Serialize};

pub mod store;

/// Discovered routes and islands, as module paths relative to the project
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub routes: Vec<String>,
    pub islands: Vec<String>,
}

impl Manifest {
    pub fn new(routes: Vec<String>, islands: Vec<String>) -> Self {
        Self { routes, islands }
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty() && self.islands.is_empty()
    }

    /// Total number of entries
    pub fn len(&self) -> usize {
        self.routes.len() + self.islands.len()
    }
}

/// Whether `previous` and `current` describe the same project layout.
/// Both sequences are compared in order; no sorting or deduplication.
pub fn manifests_equal(previous: &Manifest, current: &Manifest) -> bool {
    sequences_equal(&previous.routes, &current.routes)
        && sequences_equal(&previous.islands, &current.islands)
}

fn sequences_equal(a: &[String], b: &[String]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).all(|(x, y)| x == y)
}
