// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Block-level control flow graph backed by petgraph.
//!
//! Node `i` of the graph is block `i` of the function's block arena, so block
//! handles and node indices convert without a lookup table.

use std::collections::HashSet;

use petgraph::{
    algo::dominators::{self, Dominators},
    graph::{DiGraph, NodeIndex},
    visit::Bfs,
};

use crate::{function::Function, types::BlockId};

pub type BlockIndex = NodeIndex;

pub(crate) type InnerBlockGraph = DiGraph<BlockId, ()>;

/// Successor graph of a function's blocks.
pub struct BlockGraph {
    graph: InnerBlockGraph,
    entry: Option<BlockIndex>,
}

impl BlockGraph {
    /// Build the graph from the current terminators of `func`.
    ///
    /// Blocks without a terminator have no successors.
    pub fn new(func: &Function) -> Self {
        let mut graph = InnerBlockGraph::with_capacity(func.block_count(), func.block_count());
        for index in 0..func.block_count() {
            graph.add_node(BlockId::new(index));
        }

        for block in func.blocks() {
            if let Some(terminator) = func.terminator(block) {
                for successor in terminator.successors() {
                    graph.add_edge(node(block), node(successor), ());
                }
            }
        }

        Self {
            graph,
            entry: func.entry().map(node),
        }
    }

    /// Iterate over CFG successors of a block.
    pub fn successors(&self, block: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        self.graph.neighbors(node(block)).map(|n| self.graph[n])
    }

    /// Iterate over CFG predecessors of a block.
    pub fn predecessors(&self, block: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        self.graph
            .neighbors_directed(node(block), petgraph::Direction::Incoming)
            .map(|n| self.graph[n])
    }

    /// All blocks reachable from the entry via BFS - O(V + E).
    pub fn reachable(&self) -> HashSet<BlockId> {
        let mut reachable = HashSet::new();
        let Some(entry) = self.entry else {
            return reachable;
        };

        let mut bfs = Bfs::new(&self.graph, entry);
        while let Some(n) = bfs.next(&self.graph) {
            reachable.insert(self.graph[n]);
        }
        reachable
    }

    /// Blocks not reachable from the entry, in arena order.
    pub fn unreachable_blocks(&self) -> Vec<BlockId> {
        let reachable = self.reachable();
        self.graph
            .node_indices()
            .map(|n| self.graph[n])
            .filter(|block| !reachable.contains(block))
            .collect()
    }

    /// Compute the dominator tree rooted at the entry block.
    pub fn dominance(&self) -> Option<Dominance> {
        self.entry.map(|entry| Dominance {
            dominators: dominators::simple_fast(&self.graph, entry),
        })
    }
}

/// Dominator relation for the blocks reachable from the entry.
pub struct Dominance {
    dominators: Dominators<BlockIndex>,
}

impl Dominance {
    /// Whether `a` dominates `b`. Every block dominates itself; unreachable
    /// blocks are dominated by nothing.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.dominators
            .dominators(node(b))
            .is_some_and(|mut iter| iter.any(|d| d == node(a)))
    }

    /// Immediate dominator of `block`, if it is reachable and not the entry.
    pub fn immediate_dominator(&self, block: BlockId) -> Option<BlockId> {
        self.dominators
            .immediate_dominator(node(block))
            .map(|n| BlockId::new(n.index()))
    }
}

fn node(block: BlockId) -> BlockIndex {
    NodeIndex::new(block.index())
}
