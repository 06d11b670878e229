use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use crate::error::{BenchError, Result};
use crate::manifest::Manifest;

/// Directed dependency graph over the manifest's services.
///
/// Ordering is deterministic: topological ties are broken by manifest
/// declaration order, so two runs over the same manifest always produce the
/// same start order.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    deps: IndexMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn build(manifest: &Manifest) -> Self {
        let deps = manifest
            .services
            .iter()
            .map(|(name, spec)| (name.clone(), spec.depends_on.clone()))
            .collect();
        Self { deps }
    }

    pub fn dependencies(&self, name: &str) -> &[String] {
        self.deps.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// All services in dependency order (dependencies strictly before
    /// dependents). Fails with `CyclicDependency` naming the cycle.
    pub fn topo_order(&self) -> Result<Vec<String>> {
        let mut indegree: IndexMap<&str, usize> = self
            .deps
            .iter()
            .map(|(name, deps)| (name.as_str(), deps.len()))
            .collect();

        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for (name, deps) in &self.deps {
            for dep in deps {
                dependents.entry(dep.as_str()).or_default().push(name);
            }
        }

        let mut order = Vec::with_capacity(self.deps.len());
        let mut emitted: HashSet<&str> = HashSet::new();

        while order.len() < self.deps.len() {
            // Declaration-order scan keeps ties deterministic.
            let next = self
                .deps
                .keys()
                .map(String::as_str)
                .find(|name| !emitted.contains(name) && indegree[name] == 0);

            let Some(name) = next else {
                return Err(BenchError::CyclicDependency {
                    cycle: self.find_cycle(&emitted),
                });
            };

            emitted.insert(name);
            order.push(name.to_string());
            if let Some(children) = dependents.get(name) {
                for child in children {
                    indegree[*child] -= 1;
                }
            }
        }

        Ok(order)
    }

    /// Requested services plus their transitive dependencies, in topological
    /// order.
    pub fn closure_order(&self, names: &[String]) -> Result<Vec<String>> {
        for name in names {
            if !self.deps.contains_key(name) {
                return Err(BenchError::UnknownService(name.clone()));
            }
        }

        let mut wanted: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = names.iter().map(String::as_str).collect();
        while let Some(name) = stack.pop() {
            if wanted.insert(name) {
                for dep in self.dependencies(name) {
                    stack.push(dep);
                }
            }
        }

        Ok(self
            .topo_order()?
            .into_iter()
            .filter(|name| wanted.contains(name.as_str()))
            .collect())
    }

    /// Walk `depends_on` edges among unemitted services until a node repeats.
    fn find_cycle(&self, emitted: &HashSet<&str>) -> Vec<String> {
        let remaining: Vec<&str> = self
            .deps
            .keys()
            .map(String::as_str)
            .filter(|name| !emitted.contains(name))
            .collect();
        let Some(start) = remaining.first().copied() else {
            return Vec::new();
        };

        let mut path = vec![start];
        let mut seen: HashSet<&str> = HashSet::from([start]);
        let mut current = start;
        loop {
            let Some(next) = self
                .dependencies(current)
                .iter()
                .map(String::as_str)
                .find(|dep| remaining.contains(dep))
            else {
                return path.into_iter().map(String::from).collect();
            };
            if !seen.insert(next) {
                // Trim the lead-in so only the cycle itself is reported.
                let pos = path.iter().position(|n| *n == next).unwrap_or(0);
                let mut cycle: Vec<String> =
                    path[pos..].iter().map(|n| n.to_string()).collect();
                cycle.push(next.to_string());
                return cycle;
            }
            path.push(next);
            current = next;
        }
    }
}
