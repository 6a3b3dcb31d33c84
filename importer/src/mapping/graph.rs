//! Import dependency graph.
//!
//! Edges come from each mapping's declared references: an entity depends on
//! every entity whose table it references. The import order is a stable
//! topological sort (ties broken by declaration order).

use std::collections::{BTreeSet, HashMap};

use super::EntityMapping;
use crate::error::{MappingError, MappingResult};

/// Dependency graph over a set of mappings.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    names: Vec<String>,
    /// entity -> entities it depends on
    upstream: HashMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn build(mappings: &[EntityMapping]) -> Self {
        let by_table: HashMap<&str, &str> = mappings
            .iter()
            .map(|m| (m.table.as_str(), m.name.as_str()))
            .collect();

        let mut upstream = HashMap::new();
        for mapping in mappings {
            let deps: BTreeSet<String> = mapping
                .upstream_tables()
                .iter()
                // Tables outside the set are external, not ordering constraints
                .filter_map(|t| by_table.get(t.as_str()))
                .map(|n| n.to_string())
                .collect();
            upstream.insert(mapping.name.clone(), deps);
        }

        Self {
            names: mappings.iter().map(|m| m.name.clone()).collect(),
            upstream,
        }
    }

    /// Entities `name` depends on directly.
    pub fn dependencies(&self, name: &str) -> Vec<String> {
        self.upstream
            .get(name)
            .map(|d| d.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Topological order, upstream first.
    pub fn order(&self) -> MappingResult<Vec<String>> {
        let mut remaining: HashMap<&str, usize> = self
            .names
            .iter()
            .map(|n| (n.as_str(), self.upstream.get(n).map_or(0, BTreeSet::len)))
            .collect();
        let mut order = Vec::with_capacity(self.names.len());

        while order.len() < self.names.len() {
            let next = self
                .names
                .iter()
                .find(|n| remaining.get(n.as_str()) == Some(&0))
                .cloned();

            let Some(next) = next else {
                return Err(MappingError::Cycle(self.find_cycle(&remaining)));
            };

            remaining.remove(next.as_str());
            for (name, count) in remaining.iter_mut() {
                if self.upstream.get(*name).is_some_and(|d| d.contains(&next)) {
                    *count -= 1;
                }
            }
            order.push(next);
        }

        Ok(order)
    }

    /// Walk upstream edges among unresolved nodes until a node repeats.
    fn find_cycle(&self, remaining: &HashMap<&str, usize>) -> Vec<String> {
        let Some(start) = self.names.iter().find(|n| remaining.contains_key(n.as_str())) else {
            return Vec::new();
        };

        let mut path = vec![start.clone()];
        let mut current = start.clone();
        loop {
            let next = self.upstream.get(&current).and_then(|deps| {
                deps.iter().find(|d| remaining.contains_key(d.as_str())).cloned()
            });
            let Some(next) = next else {
                return path;
            };
            if let Some(pos) = path.iter().position(|p| *p == next) {
                let mut cycle = path.split_off(pos);
                cycle.push(next);
                return cycle;
            }
            path.push(next.clone());
            current = next;
        }
    }
}

/// Import order for a set of mappings.
pub fn import_order(mappings: &[EntityMapping]) -> MappingResult<Vec<String>> {
    DependencyGraph::build(mappings).order()
}
