//! Dependency graph over stage names
//!
//! A directed acyclic graph validated once at pipeline-definition load time.
//! Readiness computation is deterministic: stages come back in insertion
//! order, with ties broken by name, so test runs are reproducible.

use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Errors detected while loading a pipeline definition. All of these are
/// fatal: the run never starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("duplicate stage name '{0}'")]
    DuplicateStage(String),

    #[error("cycle in stage dependencies: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("stage '{stage}' depends on undeclared stage '{dependency}'")]
    UnknownDependency { stage: String, dependency: String },

    #[error("unknown environment '{0}'")]
    UnknownEnvironment(String),

    #[error("stage '{stage}' has a duplicate step name '{step}'")]
    DuplicateStep { stage: String, step: String },

    #[error("stage '{stage}': {detail}")]
    BadArtifact { stage: String, detail: String },
}

/// Directed acyclic graph of stage dependencies
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Stage names in insertion order
    order: Vec<String>,
    /// Stage name -> declared dependencies
    deps: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stage with its dependencies. Fails if the name already exists
    /// or if the new edges close a cycle among the stages declared so far.
    pub fn add_stage(&mut self, name: &str, dependencies: &[String]) -> Result<(), DefinitionError> {
        if self.deps.contains_key(name) {
            return Err(DefinitionError::DuplicateStage(name.to_string()));
        }

        self.order.push(name.to_string());
        self.deps.insert(name.to_string(), dependencies.to_vec());

        // Dangling dependencies are allowed until validate() (forward
        // references), but a closed cycle is rejected right away.
        if let Err(e) = self.check_cycles() {
            self.order.pop();
            self.deps.remove(name);
            return Err(e);
        }

        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.deps.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Declared dependencies of a stage
    pub fn dependencies(&self, name: &str) -> &[String] {
        self.deps.get(name).map(|d| d.as_slice()).unwrap_or(&[])
    }

    /// Stage names in insertion order
    pub fn stages(&self) -> &[String] {
        &self.order
    }

    /// All stages whose dependencies are a subset of `completed` and that are
    /// not themselves in `completed`. Deterministic: insertion order, ties
    /// broken by name.
    pub fn ready_stages(&self, completed: &HashSet<String>) -> Vec<&str> {
        let mut ready: Vec<(usize, &str)> = self
            .order
            .iter()
            .enumerate()
            .filter(|(_, name)| !completed.contains(*name))
            .filter(|(_, name)| {
                self.dependencies(name).iter().all(|d| completed.contains(d))
            })
            .map(|(i, name)| (i, name.as_str()))
            .collect();

        ready.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
        ready.into_iter().map(|(_, name)| name).collect()
    }

    /// Validate the whole graph: every dependency must reference a declared
    /// stage, and there must be no cycles. Performed once at load time.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        for name in &self.order {
            for dep in self.dependencies(name) {
                if !self.deps.contains_key(dep) {
                    return Err(DefinitionError::UnknownDependency {
                        stage: name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        self.check_cycles()
    }

    /// Stage names in dependency order (a stage always follows its
    /// dependencies). Deterministic for a given insertion order.
    pub fn topo_order(&self) -> Vec<String> {
        let mut result = Vec::new();
        let mut visited = HashSet::new();

        for name in &self.order {
            self.topo_visit(name, &mut visited, &mut result);
        }

        result
    }

    fn topo_visit(&self, name: &str, visited: &mut HashSet<String>, result: &mut Vec<String>) {
        if visited.contains(name) {
            return;
        }
        visited.insert(name.to_string());

        for dep in self.dependencies(name) {
            if self.deps.contains_key(dep) {
                self.topo_visit(dep, visited, result);
            }
        }

        result.push(name.to_string());
    }

    /// Depth-first cycle detection with a recursion stack. The error carries
    /// the full cycle path.
    fn check_cycles(&self) -> Result<(), DefinitionError> {
        let mut visited = HashSet::new();
        let mut stack = Vec::new();

        for name in &self.order {
            if !visited.contains(name) {
                self.dfs_check(name, &mut visited, &mut stack)?;
            }
        }

        Ok(())
    }

    fn dfs_check(
        &self,
        name: &str,
        visited: &mut HashSet<String>,
        stack: &mut Vec<String>,
    ) -> Result<(), DefinitionError> {
        visited.insert(name.to_string());
        stack.push(name.to_string());

        for dep in self.dependencies(name) {
            if let Some(pos) = stack.iter().position(|s| s == dep) {
                let mut path: Vec<String> = stack[pos..].to_vec();
                path.push(dep.clone());
                return Err(DefinitionError::Cycle { path });
            }
            if self.deps.contains_key(dep) && !visited.contains(dep) {
                self.dfs_check(dep, visited, stack)?;
            }
        }

        stack.pop();
        Ok(())
    }
}
