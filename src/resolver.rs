//! The dependency resolver and boot sequencer (spec §4.2).
//!
//! Given every registered component's metadata, this module validates the
//! dependency graph (failing fast on cycles), produces a deterministic
//! resource init order, and computes the transitive dependency set of each
//! global middleware so the wiring step can exclude it from its own
//! dependency subtree.

use std::collections::{HashMap, HashSet};

use crate::error::{ComponentKind, FrameworkError};
use crate::id::Id;
use crate::store::{DefMeta, Store};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// The outcome of resolving a store's dependency graph: a safe resource
/// init order plus, for every global middleware, the set of ids it must
/// not be applied to.
pub struct Resolution {
    /// Resource ids in the order they must be initialized.
    pub init_order: Vec<Id>,
    /// middleware id -> transitive dependency set (including itself is
    /// excluded by construction since a middleware never depends on
    /// itself without that being a cycle).
    pub middleware_exclusions: HashMap<Id, HashSet<Id>>,
}

/// Validates the registered dependency graph and computes a [`Resolution`].
pub struct DependencyResolver;

impl DependencyResolver {
    /// Builds the full id -> metadata map and adjacency list, then runs
    /// cycle detection and topological ordering.
    pub fn resolve(store: &Store, global_middleware_ids: &[Id]) -> Result<Resolution, FrameworkError> {
        let all = store.all_meta();
        let mut meta_by_id: HashMap<Id, DefMeta> = HashMap::new();
        for m in &all {
            meta_by_id.insert(m.id.clone(), m.clone());
        }

        // Validate every dependency edge points at something registered.
        for m in &all {
            for dep in &m.dependencies {
                if !meta_by_id.contains_key(dep.as_ref()) {
                    return Err(FrameworkError::UnknownDependency {
                        dependency: dep.clone(),
                        by: m.id.clone(),
                    });
                }
            }
        }

        Self::detect_cycles(&meta_by_id)?;

        let init_order = Self::topological_resource_order(&all, &meta_by_id);

        let mut middleware_exclusions = HashMap::new();
        for mw_id in global_middleware_ids {
            let reachable = Self::transitive_dependencies(mw_id, &meta_by_id);
            middleware_exclusions.insert(mw_id.clone(), reachable);
        }

        Ok(Resolution {
            init_order,
            middleware_exclusions,
        })
    }

    /// Iterative DFS with three-color marking (white/gray/black) across the
    /// full component graph. On finding a back-edge (an edge into a gray
    /// node), reconstructs the cycle path from the active DFS stack. Using
    /// an explicit stack rather than recursive calls keeps stack depth
    /// independent of graph depth, per the §9 design note about avoiding
    /// recursion proportional to chain/graph size.
    fn detect_cycles(meta_by_id: &HashMap<Id, DefMeta>) -> Result<(), FrameworkError> {
        let mut color: HashMap<Id, Color> = meta_by_id
            .keys()
            .map(|id| (id.clone(), Color::White))
            .collect();

        // Deterministic iteration order: registration order.
        let mut ids: Vec<&Id> = meta_by_id.keys().collect();
        ids.sort_by_key(|id| meta_by_id[*id].registration_index);

        for start in ids {
            if color[start] != Color::White {
                continue;
            }
            // Explicit frame stack: (node, next-child-index-to-visit).
            let mut stack: Vec<(Id, usize)> = vec![(start.clone(), 0)];
            color.insert(start.clone(), Color::Gray);

            while let Some((node, child_idx)) = stack.pop() {
                let deps = &meta_by_id[&node].dependencies;
                if child_idx >= deps.len() {
                    color.insert(node, Color::Black);
                    continue;
                }
                // Re-push this frame advanced to the next child.
                stack.push((node.clone(), child_idx + 1));
                let child = &deps[child_idx];
                match color.get(child).copied().unwrap_or(Color::White) {
                    Color::White => {
                        color.insert(child.clone(), Color::Gray);
                        stack.push((child.clone(), 0));
                    }
                    Color::Gray => {
                        let mut path: Vec<Id> =
                            stack.iter().map(|(id, _)| id.clone()).collect();
                        path.push(child.clone());
                        return Err(FrameworkError::CircularDependency { path });
                    }
                    Color::Black => {}
                }
            }
        }
        Ok(())
    }

    /// Kahn's algorithm restricted to resource nodes, with ties broken by
    /// registration order so init order is deterministic across runs with
    /// the same registration tree (spec §4.2, "Tie-breaks").
    fn topological_resource_order(all: &[DefMeta], meta_by_id: &HashMap<Id, DefMeta>) -> Vec<Id> {
        let resources: Vec<&DefMeta> = all.iter().filter(|m| m.kind == ComponentKind::Resource).collect();
        let resource_ids: HashSet<&Id> = resources.iter().map(|m| &m.id).collect();

        let mut in_degree: HashMap<Id, usize> = HashMap::new();
        let mut dependents: HashMap<Id, Vec<Id>> = HashMap::new();
        for r in &resources {
            in_degree.entry(r.id.clone()).or_insert(0);
        }
        for r in &resources {
            for dep in &r.dependencies {
                if resource_ids.contains(dep) {
                    *in_degree.entry(r.id.clone()).or_insert(0) += 1;
                    dependents.entry(dep.clone()).or_default().push(r.id.clone());
                }
            }
        }

        let mut ready: Vec<Id> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| id.clone())
            .collect();
        ready.sort_by_key(|id| meta_by_id[id].registration_index);

        let mut order = Vec::with_capacity(resources.len());
        let mut frontier = ready;
        while !frontier.is_empty() {
            frontier.sort_by_key(|id| meta_by_id[id].registration_index);
            let next = frontier.remove(0);
            order.push(next.clone());
            if let Some(deps) = dependents.get(&next) {
                for d in deps.clone() {
                    if let Some(deg) = in_degree.get_mut(&d) {
                        *deg -= 1;
                        if *deg == 0 {
                            frontier.push(d);
                        }
                    }
                }
            }
        }
        order
    }

    /// BFS over dependency edges starting at `root`, returning every id
    /// reachable — the transitive dependency set used to exclude a global
    /// middleware from its own subtree (spec §3, §4.2, §4.3).
    fn transitive_dependencies(root: &Id, meta_by_id: &HashMap<Id, DefMeta>) -> HashSet<Id> {
        let mut seen: HashSet<Id> = HashSet::new();
        let mut queue = vec![root.clone()];
        while let Some(node) = queue.pop() {
            let Some(meta) = meta_by_id.get(&node) else {
                continue;
            };
            for dep in &meta.dependencies {
                if seen.insert(dep.clone()) {
                    queue.push(dep.clone());
                }
            }
        }
        seen
    }
}
