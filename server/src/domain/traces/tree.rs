//! Span hierarchy reconstruction
//!
//! Builds a forest from a flat list of spans with parent references. Nodes
//! live in an arena ordered by `(start_time, id)`, so every children list and
//! the root list come out in canonical order without a separate sort.
//! Malformed relationships never fail the build: dangling parents become
//! orphan roots and cycles are cut, both recorded as anomalies.

use std::collections::HashMap;

use serde::Serialize;
use utoipa::ToSchema;

use super::model::SpanRecord;

#[derive(Debug, Clone)]
pub struct SpanNode {
    pub span: SpanRecord,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub depth: usize,
    /// Declared parent does not exist in this trace
    pub orphaned: bool,
    /// Endpoint of a parent link that was cut to break a cycle
    pub cycle_detected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// `span_id` points at `related_span_id`, which is not in the trace
    MissingParent,
    /// The link `span_id -> related_span_id` closed a cycle and was removed
    CycleBroken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct TreeAnomaly {
    pub kind: AnomalyKind,
    pub span_id: String,
    pub related_span_id: String,
}

/// Reconstructed forest for one trace
#[derive(Debug, Clone, Default)]
pub struct SpanTree {
    nodes: Vec<SpanNode>,
    roots: Vec<usize>,
    index: HashMap<String, usize>,
    anomalies: Vec<TreeAnomaly>,
}

const UNVISITED: u8 = 0;
const ON_PATH: u8 = 1;
const DONE: u8 = 2;

impl SpanTree {
    /// Reconstruct the hierarchy. Span ids are expected to be unique; if
    /// they are not, the earliest span with a given id wins parent lookups.
    pub fn build(mut spans: Vec<SpanRecord>) -> Self {
        spans.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut index = HashMap::with_capacity(spans.len());
        for (i, span) in spans.iter().enumerate() {
            index.entry(span.id.clone()).or_insert(i);
        }

        let mut anomalies = Vec::new();
        let mut nodes: Vec<SpanNode> = spans
            .into_iter()
            .map(|span| SpanNode {
                span,
                parent: None,
                children: Vec::new(),
                depth: 0,
                orphaned: false,
                cycle_detected: false,
            })
            .collect();

        // Resolve parent links
        for i in 0..nodes.len() {
            let Some(parent_id) = nodes[i].span.parent_span_id.as_deref() else {
                continue;
            };
            match index.get(parent_id) {
                Some(&p) => nodes[i].parent = Some(p),
                None => {
                    tracing::warn!(
                        span_id = %nodes[i].span.id,
                        parent_span_id = %parent_id,
                        "Parent span not found, treating as orphan root"
                    );
                    anomalies.push(TreeAnomaly {
                        kind: AnomalyKind::MissingParent,
                        span_id: nodes[i].span.id.clone(),
                        related_span_id: parent_id.to_string(),
                    });
                    nodes[i].orphaned = true;
                }
            }
        }

        break_cycles(&mut nodes, &mut anomalies);

        // Attach in arena order so children and roots are already sorted
        let mut roots = Vec::new();
        for i in 0..nodes.len() {
            match nodes[i].parent {
                Some(p) => nodes[p].children.push(i),
                None => roots.push(i),
            }
        }

        // Breadth-first depth assignment
        let mut queue: std::collections::VecDeque<usize> = roots.iter().copied().collect();
        while let Some(i) = queue.pop_front() {
            let depth = nodes[i].depth + 1;
            for c in 0..nodes[i].children.len() {
                let child = nodes[i].children[c];
                nodes[child].depth = depth;
                queue.push_back(child);
            }
        }

        tracing::trace!(
            spans = nodes.len(),
            roots = roots.len(),
            anomalies = anomalies.len(),
            "Reconstructed span tree"
        );

        Self {
            nodes,
            roots,
            index,
            anomalies,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes in canonical `(start_time, id)` order
    pub fn nodes(&self) -> &[SpanNode] {
        &self.nodes
    }

    pub fn node(&self, idx: usize) -> &SpanNode {
        &self.nodes[idx]
    }

    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    pub fn anomalies(&self) -> &[TreeAnomaly] {
        &self.anomalies
    }

    pub fn find(&self, span_id: &str) -> Option<&SpanNode> {
        self.index.get(span_id).map(|&i| &self.nodes[i])
    }

    /// Earliest genuine root, falling back to the earliest root of any kind
    pub fn primary_root(&self) -> Option<&SpanNode> {
        self.roots
            .iter()
            .map(|&i| &self.nodes[i])
            .find(|n| !n.orphaned)
            .or_else(|| self.roots.first().map(|&i| &self.nodes[i]))
    }

    pub fn max_depth(&self) -> usize {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(0)
    }

    /// Pre-order walk over every tree in the forest, roots in order
    pub fn depth_first(&self) -> DepthFirst<'_> {
        DepthFirst {
            tree: self,
            stack: self.roots.iter().rev().copied().collect(),
        }
    }

    pub fn orphan_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.orphaned).count()
    }
}

/// Follow parent links from every node; a walk that reaches a node already on
/// the current path has found a cycle. Each node has at most one parent, so a
/// walk can close at most one cycle and every node is visited once.
fn break_cycles(nodes: &mut [SpanNode], anomalies: &mut Vec<TreeAnomaly>) {
    let mut state = vec![UNVISITED; nodes.len()];
    let mut path = Vec::new();

    for start in 0..nodes.len() {
        if state[start] != UNVISITED {
            continue;
        }
        path.clear();
        let mut cur = Some(start);
        while let Some(i) = cur {
            match state[i] {
                UNVISITED => {
                    state[i] = ON_PATH;
                    path.push(i);
                    cur = nodes[i].parent;
                }
                ON_PATH => {
                    let Some(pos) = path.iter().position(|&n| n == i) else {
                        break;
                    };
                    // Cut the link leaving the earliest span in the cycle
                    let Some(&child) = path[pos..].iter().min() else {
                        break;
                    };
                    let Some(parent) = nodes[child].parent.take() else {
                        break;
                    };
                    nodes[child].cycle_detected = true;
                    nodes[parent].cycle_detected = true;
                    tracing::warn!(
                        span_id = %nodes[child].span.id,
                        parent_span_id = %nodes[parent].span.id,
                        cycle_len = path.len() - pos,
                        "Cycle in span parent links, detaching back-edge"
                    );
                    anomalies.push(TreeAnomaly {
                        kind: AnomalyKind::CycleBroken,
                        span_id: nodes[child].span.id.clone(),
                        related_span_id: nodes[parent].span.id.clone(),
                    });
                    break;
                }
                _ => break,
            }
        }
        for &i in &path {
            state[i] = DONE;
        }
    }
}

pub struct DepthFirst<'a> {
    tree: &'a SpanTree,
    stack: Vec<usize>,
}

impl<'a> Iterator for DepthFirst<'a> {
    type Item = &'a SpanNode;

    fn next(&mut self) -> Option<Self::Item> {
        let i = self.stack.pop()?;
        let node = &self.tree.nodes[i];
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}
