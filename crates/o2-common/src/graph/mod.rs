//! Pipeline DAG validation
//!
//! A pipeline is checked over an arena: every node id is mapped to an index
//! (the virtual `source` node is always index 0) and edges become index
//! pairs. Checks run in a fixed order and stop at the first failure:
//!
//! 1. node ids are unique and a declared `source` node is a stream or query
//! 2. every edge endpoint names a declared node (or `source`)
//! 3. predicates appear on exactly the edges leaving condition nodes
//! 4. no cycles (iterative three-color DFS)
//! 5. every node is reachable from `source`
//! 6. every non-sink node has an outbound edge, condition nodes have a true
//!    branch, and a false branch when the fallthrough policy requires one

use std::collections::HashMap;

use thiserror::Error;

use crate::crd::{ConditionFallthrough, NodeKind, O2PipelineSpec};

/// Id of the virtual node representing the pipeline input
pub const SOURCE_NODE_ID: &str = "source";

/// Index of the source node in the arena
const SOURCE: usize = 0;

/// Structural problems in a pipeline graph
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// Pipeline declares no processing nodes
    #[error("pipeline has no nodes")]
    Empty,

    /// Two nodes share an id
    #[error("duplicate node id: {0}")]
    DuplicateNode(String),

    /// The explicitly declared source node has the wrong kind
    #[error("source node must be of kind stream or query, got {0}")]
    InvalidSourceKind(NodeKind),

    /// An edge names an undeclared node
    #[error("dangling edge {from} -> {to}: unknown node {missing}")]
    DanglingEdge {
        /// Edge start
        from: String,
        /// Edge end
        to: String,
        /// The endpoint that is not declared
        missing: String,
    },

    /// An edge points back into the source node
    #[error("edge {from} -> {to} targets the source node")]
    EdgeIntoSource {
        /// Edge start
        from: String,
        /// Edge end
        to: String,
    },

    /// An edge leaving a condition node has no predicate
    #[error("edge {from} -> {to} leaves condition node {from} without a conditionPredicate")]
    MissingPredicate {
        /// Edge start
        from: String,
        /// Edge end
        to: String,
    },

    /// A predicate is set on an edge leaving a non-condition node
    #[error("edge {from} -> {to} has a conditionPredicate but {from} is not a condition node")]
    UnexpectedPredicate {
        /// Edge start
        from: String,
        /// Edge end
        to: String,
    },

    /// The graph contains a cycle
    #[error("cycle detected: {}", path.join(" -> "))]
    Cycle {
        /// Node ids along the cycle, first node repeated at the end
        path: Vec<String>,
    },

    /// A node cannot be reached from `source`
    #[error("unreachable node: {0}")]
    Unreachable(String),

    /// A non-sink node has no outbound edge
    #[error("node {0} has no outbound edge")]
    MissingOutbound(String),

    /// A condition node has no true branch
    #[error("condition node {0} has no true branch")]
    MissingTrueBranch(String),

    /// A condition node has no false branch under `requireFalseBranch`
    #[error("condition node {0} has no false branch")]
    MissingFalseBranch(String),
}

struct Edge {
    from: usize,
    to: usize,
    predicate: Option<bool>,
}

/// Arena form of a pipeline: nodes by index, edges as index pairs
struct PipelineGraph<'a> {
    ids: Vec<&'a str>,
    /// `None` for an implicit source node
    kinds: Vec<Option<NodeKind>>,
    edges: Vec<Edge>,
    adjacency: Vec<Vec<usize>>,
}

impl<'a> PipelineGraph<'a> {
    fn build(spec: &'a O2PipelineSpec) -> Result<Self, GraphError> {
        if spec.nodes.iter().all(|n| n.id == SOURCE_NODE_ID) {
            return Err(GraphError::Empty);
        }

        let mut ids = vec![SOURCE_NODE_ID];
        let mut kinds = vec![None];
        let mut index: HashMap<&str, usize> = HashMap::new();
        index.insert(SOURCE_NODE_ID, SOURCE);
        let mut source_declared = false;

        for node in &spec.nodes {
            if node.id == SOURCE_NODE_ID {
                if source_declared {
                    return Err(GraphError::DuplicateNode(node.id.clone()));
                }
                if !matches!(node.kind, NodeKind::Stream | NodeKind::Query) {
                    return Err(GraphError::InvalidSourceKind(node.kind));
                }
                source_declared = true;
                kinds[SOURCE] = Some(node.kind);
                continue;
            }
            if index.insert(node.id.as_str(), ids.len()).is_some() {
                return Err(GraphError::DuplicateNode(node.id.clone()));
            }
            ids.push(node.id.as_str());
            kinds.push(Some(node.kind));
        }

        let mut edges = Vec::with_capacity(spec.edges.len());
        let mut adjacency = vec![Vec::new(); ids.len()];
        for edge in &spec.edges {
            let lookup = |id: &str| {
                index.get(id).copied().ok_or_else(|| GraphError::DanglingEdge {
                    from: edge.source_node_id.clone(),
                    to: edge.target_node_id.clone(),
                    missing: id.to_string(),
                })
            };
            let from = lookup(&edge.source_node_id)?;
            let to = lookup(&edge.target_node_id)?;
            if to == SOURCE {
                return Err(GraphError::EdgeIntoSource {
                    from: edge.source_node_id.clone(),
                    to: edge.target_node_id.clone(),
                });
            }
            adjacency[from].push(to);
            edges.push(Edge {
                from,
                to,
                predicate: edge.condition_predicate,
            });
        }

        Ok(Self {
            ids,
            kinds,
            edges,
            adjacency,
        })
    }

    fn is_condition(&self, node: usize) -> bool {
        self.kinds[node] == Some(NodeKind::Condition)
    }

    fn check_predicates(&self) -> Result<(), GraphError> {
        for edge in &self.edges {
            let from = self.ids[edge.from].to_string();
            let to = self.ids[edge.to].to_string();
            match (self.is_condition(edge.from), edge.predicate) {
                (true, None) => return Err(GraphError::MissingPredicate { from, to }),
                (false, Some(_)) => return Err(GraphError::UnexpectedPredicate { from, to }),
                _ => {}
            }
        }
        Ok(())
    }

    /// Iterative DFS with white/gray/black marks; a gray target is a back edge.
    fn check_acyclic(&self) -> Result<(), GraphError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Gray,
            Black,
        }

        let mut marks = vec![Mark::White; self.ids.len()];
        for root in 0..self.ids.len() {
            if marks[root] != Mark::White {
                continue;
            }
            // (node, next child position)
            let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
            marks[root] = Mark::Gray;

            while let Some(top) = stack.last_mut() {
                let (node, next) = *top;
                if let Some(&child) = self.adjacency[node].get(next) {
                    top.1 += 1;
                    match marks[child] {
                        Mark::White => {
                            marks[child] = Mark::Gray;
                            stack.push((child, 0));
                        }
                        Mark::Gray => {
                            let start = stack.iter().position(|(n, _)| *n == child).unwrap_or(0);
                            let mut path: Vec<String> = stack[start..]
                                .iter()
                                .map(|(n, _)| self.ids[*n].to_string())
                                .collect();
                            path.push(self.ids[child].to_string());
                            return Err(GraphError::Cycle { path });
                        }
                        Mark::Black => {}
                    }
                } else {
                    marks[node] = Mark::Black;
                    stack.pop();
                }
            }
        }
        Ok(())
    }

    fn check_reachable(&self) -> Result<(), GraphError> {
        let mut seen = vec![false; self.ids.len()];
        let mut queue = vec![SOURCE];
        seen[SOURCE] = true;
        while let Some(node) = queue.pop() {
            for &child in &self.adjacency[node] {
                if !seen[child] {
                    seen[child] = true;
                    queue.push(child);
                }
            }
        }
        match seen.iter().position(|s| !s) {
            Some(node) => Err(GraphError::Unreachable(self.ids[node].to_string())),
            None => Ok(()),
        }
    }

    fn check_outbound(&self, fallthrough: ConditionFallthrough) -> Result<(), GraphError> {
        for node in 0..self.ids.len() {
            let id = self.ids[node];
            let is_sink = node != SOURCE && self.kinds[node].is_some_and(|k| k.is_sink());
            if !is_sink && self.adjacency[node].is_empty() {
                return Err(GraphError::MissingOutbound(id.to_string()));
            }
            if !self.is_condition(node) {
                continue;
            }
            let branch = |want: bool| {
                self.edges
                    .iter()
                    .any(|e| e.from == node && e.predicate == Some(want))
            };
            if !branch(true) {
                return Err(GraphError::MissingTrueBranch(id.to_string()));
            }
            if fallthrough == ConditionFallthrough::RequireFalseBranch && !branch(false) {
                return Err(GraphError::MissingFalseBranch(id.to_string()));
            }
        }
        Ok(())
    }
}

/// Validate the node/edge structure of a pipeline
pub fn validate_pipeline(spec: &O2PipelineSpec) -> Result<(), GraphError> {
    let graph = PipelineGraph::build(spec)?;
    graph.check_predicates()?;
    graph.check_acyclic()?;
    graph.check_reachable()?;
    graph.check_outbound(spec.condition_fallthrough)
}
