use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Inputs of one graph rebuild, read from the store in a single step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphInput {
    /// Ids of open issues and pull requests.
    pub card_ids: Vec<String>,
    /// `(id, ids that reference it)` pairs.
    pub references: Vec<(String, Vec<String>)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
}

/// One connected group of open cards linked by cross-references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceGraph {
    pub nodes: Vec<String>,
    pub edges: Vec<GraphEdge>,
}

/// Turns a `GraphInput` into the published graph list. Always a full rebuild.
pub trait GraphBuilder: Send + Sync {
    fn build(&self, input: &GraphInput) -> Vec<ReferenceGraph>;
}

/// Groups open cards into connected components of the reference relation.
///
/// References touching a closed (or unknown) card are ignored, and cards with
/// no edges are left out of the result.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComponentGraphBuilder;

impl GraphBuilder for ComponentGraphBuilder {
    #[tracing::instrument(level = "debug", skip_all, fields(cards = input.card_ids.len()))]
    fn build(&self, input: &GraphInput) -> Vec<ReferenceGraph> {
        let index: HashMap<&str, usize> = input
            .card_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        let mut sets = DisjointSets::new(input.card_ids.len());
        let mut edges: Vec<(usize, usize)> = Vec::new();
        for (target, sources) in &input.references {
            let Some(&t) = index.get(target.as_str()) else {
                continue;
            };
            for source in sources {
                let Some(&s) = index.get(source.as_str()) else {
                    continue;
                };
                if s == t || edges.contains(&(s, t)) {
                    continue;
                }
                edges.push((s, t));
                sets.union(s, t);
            }
        }

        let mut components: HashMap<usize, ReferenceGraph> = HashMap::new();
        for &(s, t) in &edges {
            let root = sets.find(s);
            components
                .entry(root)
                .or_insert_with(|| ReferenceGraph {
                    nodes: Vec::new(),
                    edges: Vec::new(),
                })
                .edges
                .push(GraphEdge {
                    source: input.card_ids[s].clone(),
                    target: input.card_ids[t].clone(),
                });
        }
        for (i, id) in input.card_ids.iter().enumerate() {
            let root = sets.find(i);
            if let Some(g) = components.get_mut(&root) {
                g.nodes.push(id.clone());
            }
        }

        let mut graphs: Vec<ReferenceGraph> = components.into_values().collect();
        graphs.sort_by(|a, b| {
            b.nodes
                .len()
                .cmp(&a.nodes.len())
                .then_with(|| a.nodes.first().cmp(&b.nodes.first()))
        });
        graphs
    }
}

struct DisjointSets {
    parent: Vec<usize>,
}

impl DisjointSets {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[rb] = ra;
        }
    }
}

/// Debounce state for graph rebuilds.
///
/// Mutations only set the dirty flag; a rebuild happens on the next tick
/// boundary if the flag is set, so a burst of updates costs one rebuild.
#[derive(Debug)]
pub struct GraphRefreshScheduler {
    dirty: bool,
}

impl Default for GraphRefreshScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphRefreshScheduler {
    /// Starts dirty so the graph is built once after startup.
    pub fn new() -> Self {
        Self { dirty: true }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clear the flag, returning whether a rebuild is due.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }
}
