// src/recipe/graph.rs

//! Recipe dependency graph
//!
//! Nodes are recipe names; an edge `a -> b` means `a` needs `b` installed
//! first. Dependencies keep their declared order so that build plans match
//! the order the orchestrator installs them in.
//!
//! ```ignore
//! let mut graph = RecipeGraph::new();
//! graph.add_recipe("python27", &["lib_zlib", "lib_bz2"]);
//! graph.add_recipe("lib_zlib", &[]);
//! graph.add_recipe("lib_bz2", &[]);
//!
//! let order = graph.build_order("python27")?;
//! // ["lib_zlib", "lib_bz2", "python27"]
//! ```
//!
//! Cycles are a static defect in recipe data and are always fatal.

use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

#[derive(Debug, Default, Clone)]
pub struct RecipeGraph {
    /// Recipe name -> dependencies in declared order
    edges: BTreeMap<String, Vec<String>>,
    /// Recipe name -> recipes that depend on it
    reverse_edges: BTreeMap<String, BTreeSet<String>>,
}

impl RecipeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a recipe with its dependencies
    ///
    /// Adding an existing recipe appends any new dependencies.
    pub fn add_recipe(&mut self, name: &str, dependencies: &[&str]) {
        self.reverse_edges.entry(name.to_string()).or_default();
        let deps = self.edges.entry(name.to_string()).or_default();

        let mut added = Vec::new();
        for dep in dependencies {
            if !deps.iter().any(|d| d == dep) {
                deps.push(dep.to_string());
                added.push(dep.to_string());
            }
        }

        for dep in added {
            self.edges.entry(dep.clone()).or_default();
            self.reverse_edges
                .entry(dep)
                .or_default()
                .insert(name.to_string());
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.edges.contains_key(name)
    }

    /// Recipes that directly depend on `name`
    pub fn dependents(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.reverse_edges.get(name)
    }

    /// Kahn's algorithm over the whole graph, ties broken by name
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        let mut in_degrees: BTreeMap<&str, usize> = self
            .edges
            .iter()
            .map(|(name, deps)| (name.as_str(), deps.len()))
            .collect();

        let mut ready: BTreeSet<&str> = in_degrees
            .iter()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(name, _)| *name)
            .collect();

        let mut result = Vec::with_capacity(self.edges.len());
        while let Some(node) = ready.pop_first() {
            result.push(node.to_string());

            if let Some(dependents) = self.reverse_edges.get(node) {
                for dependent in dependents {
                    if let Some(deg) = in_degrees.get_mut(dependent.as_str()) {
                        *deg = deg.saturating_sub(1);
                        if *deg == 0 {
                            ready.insert(dependent.as_str());
                        }
                    }
                }
            }
        }

        if result.len() != self.edges.len() {
            let cycle = self
                .find_cycles()
                .into_iter()
                .next()
                .map(|c| format_cycle(&c))
                .unwrap_or_else(|| "unknown".to_string());
            return Err(Error::DependencyCycle(cycle));
        }

        Ok(result)
    }

    /// Every elementary cycle reachable by depth-first search
    pub fn find_cycles(&self) -> Vec<Vec<String>> {
        let mut cycles = Vec::new();
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for start in self.edges.keys() {
            if !visited.contains(start.as_str()) {
                self.find_cycles_dfs(start, &mut visited, &mut rec_stack, &mut path, &mut cycles);
            }
        }

        cycles
    }

    fn find_cycles_dfs<'a>(
        &'a self,
        node: &'a str,
        visited: &mut HashSet<&'a str>,
        rec_stack: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
        cycles: &mut Vec<Vec<String>>,
    ) {
        visited.insert(node);
        rec_stack.insert(node);
        path.push(node);

        if let Some(deps) = self.edges.get(node) {
            for dep in deps {
                if !visited.contains(dep.as_str()) {
                    self.find_cycles_dfs(dep, visited, rec_stack, path, cycles);
                } else if rec_stack.contains(dep.as_str())
                    && let Some(start) = path.iter().position(|x| *x == dep)
                {
                    cycles.push(path[start..].iter().map(|s| s.to_string()).collect());
                }
            }
        }

        path.pop();
        rec_stack.remove(node);
    }

    /// Dependency closure of `name` in install order, ending with `name`
    ///
    /// Follows declared order depth-first, the same way the orchestrator
    /// recurses, so the result is the order recipes would be built in.
    pub fn build_order(&self, name: &str) -> Result<Vec<String>> {
        let mut order = Vec::new();
        let mut done = HashSet::new();
        let mut stack = Vec::new();
        self.visit(name, &mut order, &mut done, &mut stack)?;
        Ok(order)
    }

    fn visit<'a>(
        &'a self,
        node: &'a str,
        order: &mut Vec<String>,
        done: &mut HashSet<&'a str>,
        stack: &mut Vec<&'a str>,
    ) -> Result<()> {
        if done.contains(node) {
            return Ok(());
        }
        if let Some(start) = stack.iter().position(|n| *n == node) {
            let mut cycle: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
            cycle.push(node.to_string());
            return Err(Error::DependencyCycle(cycle.join(" -> ")));
        }

        stack.push(node);
        if let Some(deps) = self.edges.get(node) {
            for dep in deps {
                if dep != node {
                    self.visit(dep, order, done, stack)?;
                }
            }
        }
        stack.pop();

        done.insert(node);
        order.push(node.to_string());
        Ok(())
    }

    /// All recipes `name` transitively depends on, excluding itself
    pub fn transitive_dependencies(&self, name: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&String> = self.edges.get(name).into_iter().flatten().collect();

        while let Some(next) = queue.pop_front() {
            if next != name
                && seen.insert(next.clone())
                && let Some(more) = self.edges.get(next)
            {
                queue.extend(more.iter().filter(|m| !seen.contains(*m)));
            }
        }

        seen
    }
}

fn format_cycle(cycle: &[String]) -> String {
    let mut names = cycle.to_vec();
    if let Some(first) = cycle.first() {
        names.push(first.clone());
    }
    names.join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn python_graph() -> RecipeGraph {
        let mut graph = RecipeGraph::new();
        graph.add_recipe("python27", &["lib_zlib", "lib_bz2", "lib_readline", "lib_sqlite3"]);
        graph.add_recipe("lib_readline", &["lib_ncurses"]);
        graph.add_recipe("lib_png", &["lib_zlib"]);
        graph.add_recipe("lib_zlib", &[]);
        graph
    }

    #[test]
    fn test_build_order_follows_declared_order() {
        let graph = python_graph();
        assert_eq!(
            graph.build_order("python27").unwrap(),
            vec!["lib_zlib", "lib_bz2", "lib_ncurses", "lib_readline", "lib_sqlite3", "python27"]
        );
        assert_eq!(graph.build_order("lib_zlib").unwrap(), vec!["lib_zlib"]);
    }

    #[test]
    fn test_topological_sort_puts_deps_first() {
        let graph = python_graph();
        let order = graph.topological_sort().unwrap();
        let pos = |n: &str| order.iter().position(|x| x == n).unwrap();

        assert_eq!(order.len(), 7);
        assert!(pos("lib_zlib") < pos("python27"));
        assert!(pos("lib_zlib") < pos("lib_png"));
        assert!(pos("lib_ncurses") < pos("lib_readline"));
        assert!(pos("lib_readline") < pos("python27"));
    }

    #[test]
    fn test_cycle_detected() {
        let mut graph = RecipeGraph::new();
        graph.add_recipe("a", &["b"]);
        graph.add_recipe("b", &["c"]);
        graph.add_recipe("c", &["a"]);

        assert_eq!(graph.find_cycles().len(), 1);
        assert!(matches!(graph.topological_sort(), Err(Error::DependencyCycle(_))));
        match graph.build_order("a") {
            Err(Error::DependencyCycle(msg)) => assert_eq!(msg, "a -> b -> c -> a"),
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_reference_ignored_in_build_order() {
        let mut graph = RecipeGraph::new();
        graph.add_recipe("cmake", &["cmake"]);
        assert_eq!(graph.build_order("cmake").unwrap(), vec!["cmake"]);
    }

    #[test]
    fn test_transitive_queries() {
        let graph = python_graph();
        let deps = graph.transitive_dependencies("python27");
        assert!(deps.contains("lib_ncurses"));
        assert_eq!(deps.len(), 5);

        assert!(graph.transitive_dependencies("lib_ncurses").is_empty());
        assert!(graph.contains("lib_ncurses"));
        assert!(!graph.contains("lib_png_extra"));
        assert_eq!(
            graph.dependents("lib_zlib").unwrap().iter().collect::<Vec<_>>(),
            vec!["lib_png", "python27"]
        );
    }

    #[test]
    fn test_add_recipe_merges() {
        let mut graph = RecipeGraph::new();
        graph.add_recipe("x", &["a"]);
        graph.add_recipe("x", &["a", "b"]);
        assert_eq!(graph.build_order("x").unwrap(), vec!["a", "b", "x"]);
        assert_eq!(
            graph.dependents("a").unwrap().iter().collect::<Vec<_>>(),
            vec!["x"]
        );
    }
}
