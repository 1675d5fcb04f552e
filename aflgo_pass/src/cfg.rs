//! Per-function control flow graphs, rendered as graphviz `dot` for the
//! offline distance computation.
//!
//! The layout follows the compiler's own `cfg.<function>.dot` dumps with short
//! names: one `record` node per block labelled with the block name, one edge
//! per distinct successor.

use core::fmt::{self, Write as _};
use std::io::Write;

use aflgo_bolts::Error;

use crate::ir::Function;

/// A node of the CFG, i.e. a basic block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CfgNode {
    /// Index of the block in its function
    pub index: usize,
    /// The block name, or `%<index>` for an unnamed block
    pub label: String,
}

/// The control flow graph of a single function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlFlowGraph {
    function: String,
    nodes: Vec<CfgNode>,
    edges: Vec<(usize, usize)>,
}

fn escape_record(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for c in label.chars() {
        if matches!(c, '"' | '{' | '}' | '<' | '>' | '|' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl ControlFlowGraph {
    /// Snapshots the graph of `func` with its current block names.
    #[must_use]
    pub fn from_function(func: &Function) -> Self {
        let nodes = func
            .blocks
            .iter()
            .enumerate()
            .map(|(index, bb)| CfgNode {
                index,
                label: bb.name.clone().unwrap_or_else(|| format!("%{index}")),
            })
            .collect();
        let edges = func
            .blocks
            .iter()
            .enumerate()
            .flat_map(|(from, bb)| bb.successors().into_iter().map(move |to| (from, to)))
            .filter(|&(_, to)| to < func.blocks.len())
            .collect();
        Self {
            function: func.name.clone(),
            nodes,
            edges,
        }
    }

    /// Name of the function this graph belongs to
    #[must_use]
    pub fn function(&self) -> &str {
        &self.function
    }

    /// The blocks
    #[must_use]
    pub fn nodes(&self) -> &[CfgNode] {
        &self.nodes
    }

    /// `(from, to)` block index pairs
    #[must_use]
    pub fn edges(&self) -> &[(usize, usize)] {
        &self.edges
    }

    /// The graph title, `CFG for '<function>' function`
    #[must_use]
    pub fn title(&self) -> String {
        format!("CFG for '{}' function", self.function)
    }

    fn render(&self, out: &mut String) -> fmt::Result {
        let title = self.title();
        writeln!(out, "digraph \"{title}\" {{")?;
        writeln!(out, "\tlabel=\"{title}\";")?;
        writeln!(out)?;
        for node in &self.nodes {
            writeln!(
                out,
                "\tNode{:#x} [shape=record,label=\"{{{}}}\"];",
                node.index,
                escape_record(&node.label)
            )?;
            for &(_, to) in self.edges.iter().filter(|(from, _)| *from == node.index) {
                writeln!(out, "\tNode{:#x} -> Node{to:#x};", node.index)?;
            }
        }
        writeln!(out, "}}")
    }

    /// Renders the graph in `dot` syntax.
    #[must_use]
    pub fn to_dot(&self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail
        let _ = self.render(&mut out);
        out
    }

    /// Writes the `dot` rendering to `writer`.
    pub fn write_dot<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        writer.write_all(self.to_dot().as_bytes())?;
        writer.flush()?;
        Ok(())
    }
}
