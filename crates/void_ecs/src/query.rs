//! Query - Component-set filters over archetypes
//!
//! Queries are simple: an archetype matches when it holds every included
//! component and none of the excluded ones. Selections can additionally
//! filter rows by component equality and order them by component values.

use crate::archetype::{Archetype, Archetypes};
use crate::entity::Entity;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Sort direction for an ordered selection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Order {
    Ascending,
    Descending,
}

/// Options refining a selection
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectOptions {
    /// Archetypes holding any of these components are skipped
    pub exclude: Vec<String>,
    /// Rows must hold exactly these values
    pub filter: BTreeMap<String, Value>,
    /// Sort keys, most significant first
    pub order: Vec<(String, Order)>,
}

impl SelectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exclude(mut self, component: impl Into<String>) -> Self {
        self.exclude.push(component.into());
        self
    }

    pub fn filter(mut self, component: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter.insert(component.into(), value.into());
        self
    }

    pub fn order_by(mut self, component: impl Into<String>, order: Order) -> Self {
        self.order.push((component.into(), order));
        self
    }

    /// Every component name the selection depends on
    pub fn referenced_components(&self) -> impl Iterator<Item = &str> {
        self.exclude
            .iter()
            .map(String::as_str)
            .chain(self.filter.keys().map(String::as_str))
            .chain(self.order.iter().map(|(c, _)| c.as_str()))
    }
}

/// Check an archetype against include/exclude sets
pub fn matches<S: AsRef<str>>(archetype: &Archetype, include: &[S], exclude: &[String]) -> bool {
    include.iter().all(|c| archetype.has_component(c.as_ref()))
        && !exclude.iter().any(|c| archetype.has_component(c))
}

/// Archetypes holding all of `include` and none of `exclude`, in id order
pub fn query_archetypes<'a, S: AsRef<str>>(
    archetypes: &'a Archetypes,
    include: &[S],
    exclude: &[String],
) -> Vec<&'a Archetype> {
    archetypes
        .iter()
        .filter(|a| matches(a, include, exclude))
        .collect()
}

/// Select matching entities.
///
/// Without filter or order this walks the `id` column of each matching
/// archetype in archetype order.
pub fn select<S: AsRef<str>>(archetypes: &Archetypes, include: &[S], options: &SelectOptions) -> Vec<Entity> {
    let matched = query_archetypes(archetypes, include, &options.exclude);

    if options.filter.is_empty() && options.order.is_empty() {
        return matched.into_iter().flat_map(|a| a.entities()).collect();
    }

    let row_matches = |archetype: &Archetype, row: usize| {
        options
            .filter
            .iter()
            .all(|(name, expected)| archetype.get(row, name) == Some(expected))
    };

    if options.order.is_empty() {
        let mut entities = Vec::new();
        for archetype in matched.iter().copied() {
            for row in 0..archetype.len() {
                if row_matches(archetype, row) {
                    entities.extend(archetype.entity_at(row));
                }
            }
        }
        return entities;
    }

    // Extract sort keys alongside the id, then sort
    let mut keyed: Vec<(Entity, Vec<Value>)> = Vec::new();
    for archetype in matched.iter().copied() {
        for row in 0..archetype.len() {
            if !row_matches(archetype, row) {
                continue;
            }
            let Some(entity) = archetype.entity_at(row) else {
                continue;
            };
            let keys = options
                .order
                .iter()
                .map(|(name, _)| archetype.get(row, name).cloned().unwrap_or_default())
                .collect();
            keyed.push((entity, keys));
        }
    }
    keyed.sort_by(|(_, a), (_, b)| {
        for ((x, y), (_, order)) in a.iter().zip(b.iter()).zip(options.order.iter()) {
            let ord = x.compare(y);
            if ord != Ordering::Equal {
                return match order {
                    Order::Ascending => ord,
                    Order::Descending => ord.reverse(),
                };
            }
        }
        Ordering::Equal
    });
    keyed.into_iter().map(|(entity, _)| entity).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_builder() {
        let options = SelectOptions::new()
            .exclude("hidden")
            .filter("team", "red")
            .order_by("score", Order::Descending);
        let referenced: Vec<_> = options.referenced_components().collect();
        assert_eq!(referenced, vec!["hidden", "team", "score"]);
    }
}
