//! System scheduling
//!
//! Turns per-system ordering constraints into tiers of systems that may run
//! concurrently. `before`/`after` are hard edges; `during` is a soft hint
//! that pulls a system into the tier of its peers when the hard edges allow.
//!
//! The scheduler only deals in names; the database instantiates and runs
//! the systems.

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Ordering constraints of one system
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SystemSchedule {
    /// Systems that must run after this one
    #[serde(default)]
    pub before: Vec<String>,
    /// Systems that must run before this one
    #[serde(default)]
    pub after: Vec<String>,
    /// Systems this one would like to share a tier with
    #[serde(default)]
    pub during: Vec<String>,
}

impl SystemSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// System must run before another
    pub fn before(mut self, system: impl Into<String>) -> Self {
        self.before.push(system.into());
        self
    }

    /// System must run after another
    pub fn after(mut self, system: impl Into<String>) -> Self {
        self.after.push(system.into());
        self
    }

    /// Prefer the same tier as another
    pub fn during(mut self, system: impl Into<String>) -> Self {
        self.during.push(system.into());
        self
    }
}

/// Declared systems, keyed by name
pub type SystemDeclarations = BTreeMap<String, SystemSchedule>;

/// Ordered tiers; systems within a tier are sorted by name
pub type SystemOrder = Vec<Vec<String>>;

/// Each system mapped to the systems that must run before it
fn build_dependency_graph(systems: &SystemDeclarations) -> BTreeMap<&str, BTreeSet<&str>> {
    let mut depends_on: BTreeMap<&str, BTreeSet<&str>> =
        systems.keys().map(|name| (name.as_str(), BTreeSet::new())).collect();

    for (name, schedule) in systems {
        for dep in &schedule.after {
            if systems.contains_key(dep) {
                depends_on.entry(name.as_str()).or_default().insert(dep.as_str());
            } else {
                log::warn!("System '{}' is scheduled after unknown system '{}'", name, dep);
            }
        }
        for dependent in &schedule.before {
            if systems.contains_key(dependent) {
                depends_on.entry(dependent.as_str()).or_default().insert(name.as_str());
            } else {
                log::warn!("System '{}' is scheduled before unknown system '{}'", name, dependent);
            }
        }
    }
    depends_on
}

/// Depth-first search; returns a node on the first cycle found
fn find_cycle<'a>(depends_on: &BTreeMap<&'a str, BTreeSet<&'a str>>) -> Option<&'a str> {
    fn visit<'a>(
        node: &'a str,
        depends_on: &BTreeMap<&'a str, BTreeSet<&'a str>>,
        visited: &mut BTreeSet<&'a str>,
        stack: &mut BTreeSet<&'a str>,
    ) -> Option<&'a str> {
        if stack.contains(node) {
            return Some(node);
        }
        if !visited.insert(node) {
            return None;
        }
        stack.insert(node);
        for dep in depends_on.get(node).into_iter().flatten() {
            if let Some(found) = visit(*dep, depends_on, visited, stack) {
                return Some(found);
            }
        }
        stack.remove(node);
        None
    }

    let mut visited = BTreeSet::new();
    let mut stack = BTreeSet::new();
    depends_on
        .keys()
        .find_map(|name| visit(*name, depends_on, &mut visited, &mut stack))
}

fn tier_of(tiers: &[Vec<&str>], system: &str) -> Option<usize> {
    tiers.iter().position(|tier| tier.contains(&system))
}

/// All dependencies strictly before the target tier, all dependents strictly after
fn can_move_to_tier(
    system: &str,
    target: usize,
    tiers: &[Vec<&str>],
    depends_on: &BTreeMap<&str, BTreeSet<&str>>,
) -> bool {
    let deps_ok = depends_on
        .get(system)
        .into_iter()
        .flatten()
        .all(|dep| tier_of(tiers, dep).map_or(true, |t| t < target));
    let dependents_ok = depends_on
        .iter()
        .filter(|(_, deps)| deps.contains(system))
        .all(|(dependent, _)| tier_of(tiers, dependent).map_or(true, |t| t > target));
    deps_ok && dependents_ok
}

/// Tier holding the most `during` targets; ties keep the first found
fn best_target_tier(targets: &[String], tiers: &[Vec<&str>]) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;
    for target in targets {
        let Some(tier) = tier_of(tiers, target) else {
            continue;
        };
        let count = targets
            .iter()
            .filter(|t| tier_of(tiers, t.as_str()) == Some(tier))
            .count();
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((tier, count));
        }
    }
    best.map(|(tier, _)| tier)
}

/// Compute the execution tiers for a set of systems.
///
/// Fails with [`StoreError::SystemCycle`] naming one node on a cycle of
/// hard constraints; no partial order is returned in that case.
pub fn calculate_system_order(systems: &SystemDeclarations) -> Result<SystemOrder> {
    let depends_on = build_dependency_graph(systems);
    if let Some(node) = find_cycle(&depends_on) {
        return Err(StoreError::SystemCycle(node.to_string()));
    }

    // Kahn-style layering
    let mut tiers: Vec<Vec<&str>> = Vec::new();
    let mut processed: BTreeSet<&str> = BTreeSet::new();
    while processed.len() < systems.len() {
        let tier: Vec<&str> = depends_on
            .iter()
            .filter(|(name, deps)| !processed.contains(*name) && deps.iter().all(|d| processed.contains(d)))
            .map(|(name, _)| *name)
            .collect();
        if tier.is_empty() {
            // Unreachable once cycles are rejected
            let stuck = depends_on
                .keys()
                .find(|name| !processed.contains(*name))
                .map_or_else(String::new, |name| name.to_string());
            return Err(StoreError::SystemCycle(stuck));
        }
        processed.extend(tier.iter().copied());
        tiers.push(tier);
    }

    for (name, schedule) in systems {
        if schedule.during.is_empty() {
            continue;
        }
        let (Some(current), Some(best)) = (tier_of(&tiers, name), best_target_tier(&schedule.during, &tiers)) else {
            continue;
        };
        if best != current && can_move_to_tier(name, best, &tiers, &depends_on) {
            tiers[current].retain(|s| *s != name.as_str());
            tiers[best].push(name.as_str());
            tiers[best].sort_unstable();
        }
    }

    Ok(tiers
        .into_iter()
        .filter(|tier| !tier.is_empty())
        .map(|tier| tier.into_iter().map(str::to_string).collect())
        .collect())
}

/// Caches the computed order against the exact declaration set
#[derive(Debug, Default)]
pub struct SystemOrderCache {
    cached: Option<(SystemDeclarations, SystemOrder)>,
}

impl SystemOrderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Order for `systems`, recomputed only when the declarations changed
    pub fn order(&mut self, systems: &SystemDeclarations) -> Result<&SystemOrder> {
        let stale = self
            .cached
            .as_ref()
            .map_or(true, |(declarations, _)| declarations != systems);
        if stale {
            log::debug!("Recomputing system order for {} systems", systems.len());
            let order = calculate_system_order(systems)?;
            self.cached = Some((systems.clone(), order));
        }
        match &self.cached {
            Some((_, order)) => Ok(order),
            None => Err(StoreError::SystemCycle(String::new())),
        }
    }

    pub fn invalidate(&mut self) {
        self.cached = None;
    }
}
