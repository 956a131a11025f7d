//! Dependency ordering.
//!
//! Parents are written before children. Among tables that are ready at the
//! same time the alphabetically smallest goes first, so the order is fully
//! determined by the table set and the edges.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::errors::OrderingWarning;
use crate::models::DependencyEdge;

/// The processing order for one phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableOrder {
    pub tables: Vec<String>,
    /// Set when a cycle had to be broken.
    pub warning: Option<OrderingWarning>,
}

/// Topologically sort `tables` under `edges` (Kahn's algorithm).
///
/// Edges naming a table outside the set, and self references, are ignored.
/// When the sort stalls on a cycle that waits on nothing else, that cycle's
/// tables are released together in alphabetical order; tables depending on
/// the cycle still wait for it. Every table that sat on a cycle is named in
/// the returned warning.
pub fn order(tables: &[String], edges: &[DependencyEdge]) -> TableOrder {
    let set: BTreeSet<&str> = tables.iter().map(String::as_str).collect();

    // parent -> children, child -> parents.
    let mut children: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut parents: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut in_degree: BTreeMap<&str, usize> = set.iter().map(|t| (*t, 0)).collect();

    for edge in edges {
        let (child, parent) = (edge.child.as_str(), edge.parent.as_str());
        if child == parent || !set.contains(child) || !set.contains(parent) {
            continue;
        }
        if children.entry(parent).or_default().insert(child) {
            parents.entry(child).or_default().insert(parent);
            *in_degree.entry(child).or_default() += 1;
        }
    }

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(t, _)| *t)
        .collect();
    let mut placed: BTreeSet<&str> = BTreeSet::new();
    let mut sorted = Vec::with_capacity(set.len());
    let mut cyclic: BTreeSet<&str> = BTreeSet::new();

    loop {
        while let Some(next) = ready.pop_first() {
            placed.insert(next);
            sorted.push(next.to_string());
            release(&[next], &children, &placed, &mut in_degree, &mut ready);
        }
        if placed.len() == set.len() {
            break;
        }

        let remaining: BTreeSet<&str> = set.difference(&placed).copied().collect();
        let block = first_free_cycle(&remaining, &children, &parents)
            .unwrap_or_else(|| remaining.iter().copied().collect());
        for table in &block {
            placed.insert(*table);
            cyclic.insert(*table);
            sorted.push(table.to_string());
        }
        release(&block, &children, &placed, &mut in_degree, &mut ready);
    }

    let warning = if cyclic.is_empty() {
        None
    } else {
        let w = OrderingWarning {
            tables: cyclic.iter().map(|t| t.to_string()).collect(),
        };
        warn!(tables = ?w.tables, "{}", w);
        Some(w)
    };

    TableOrder {
        tables: sorted,
        warning,
    }
}

/// Decrement the in-degree of every unplaced child of `done`.
fn release<'a>(
    done: &[&'a str],
    children: &BTreeMap<&'a str, BTreeSet<&'a str>>,
    placed: &BTreeSet<&'a str>,
    in_degree: &mut BTreeMap<&'a str, usize>,
    ready: &mut BTreeSet<&'a str>,
) {
    for parent in done {
        let Some(kids) = children.get(parent) else {
            continue;
        };
        for child in kids {
            if placed.contains(child) {
                continue;
            }
            if let Some(d) = in_degree.get_mut(child) {
                *d = d.saturating_sub(1);
                if *d == 0 {
                    ready.insert(*child);
                }
            }
        }
    }
}

/// The cycle among `remaining` whose tables only wait on each other, sorted.
/// When several qualify, the one holding the alphabetically smallest table.
fn first_free_cycle<'a>(
    remaining: &BTreeSet<&'a str>,
    children: &BTreeMap<&'a str, BTreeSet<&'a str>>,
    parents: &BTreeMap<&'a str, BTreeSet<&'a str>>,
) -> Option<Vec<&'a str>> {
    let mut tarjan = Tarjan::new(remaining, children);
    for table in remaining {
        if !tarjan.index.contains_key(table) {
            tarjan.visit(*table);
        }
    }

    tarjan
        .components
        .into_iter()
        .filter(|c| c.len() > 1)
        .filter(|c| {
            c.iter().all(|t| {
                parents
                    .get(t)
                    .map(|ps| ps.iter().all(|p| !remaining.contains(p) || c.contains(p)))
                    .unwrap_or(true)
            })
        })
        .min_by_key(|c| c[0])
}

/// Strongly connected components of the subgraph induced by `nodes`.
struct Tarjan<'g, 'a> {
    nodes: &'g BTreeSet<&'a str>,
    children: &'g BTreeMap<&'a str, BTreeSet<&'a str>>,
    index: BTreeMap<&'a str, usize>,
    low: BTreeMap<&'a str, usize>,
    stack: Vec<&'a str>,
    on_stack: BTreeSet<&'a str>,
    next: usize,
    /// Each component sorted by name.
    components: Vec<Vec<&'a str>>,
}

impl<'g, 'a> Tarjan<'g, 'a> {
    fn new(
        nodes: &'g BTreeSet<&'a str>,
        children: &'g BTreeMap<&'a str, BTreeSet<&'a str>>,
    ) -> Self {
        Self {
            nodes,
            children,
            index: BTreeMap::new(),
            low: BTreeMap::new(),
            stack: Vec::new(),
            on_stack: BTreeSet::new(),
            next: 0,
            components: Vec::new(),
        }
    }

    fn visit(&mut self, v: &'a str) {
        self.index.insert(v, self.next);
        self.low.insert(v, self.next);
        self.next += 1;
        self.stack.push(v);
        self.on_stack.insert(v);

        let (nodes, children) = (self.nodes, self.children);
        if let Some(kids) = children.get(v) {
            for &w in kids {
                if !nodes.contains(w) {
                    continue;
                }
                let seen = self.index.get(w).copied();
                let candidate = match seen {
                    None => {
                        self.visit(w);
                        self.low.get(w).copied().unwrap_or(usize::MAX)
                    }
                    Some(i) if self.on_stack.contains(w) => i,
                    Some(_) => continue,
                };
                if let Some(low) = self.low.get_mut(v) {
                    *low = (*low).min(candidate);
                }
            }
        }

        if self.low.get(v) == self.index.get(v) {
            let mut component = Vec::new();
            while let Some(w) = self.stack.pop() {
                self.on_stack.remove(w);
                component.push(w);
                if w == v {
                    break;
                }
            }
            component.sort_unstable();
            self.components.push(component);
        }
    }
}
