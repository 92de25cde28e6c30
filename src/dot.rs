// src/dot.rs
//
// Graphviz rendering of a module tree, for diagnostics.
//
// Composites become clusters holding their own ports as plain nodes, leaves
// become record nodes with one field per port.

use std::fmt::Write;

use crate::graph::{Graph, ModuleId, PortId};

/// Render the tree under the graph's root as a DOT document.
pub fn to_dot(graph: &Graph) -> String {
    let mut w = DotWriter {
        graph,
        out: String::new(),
    };
    w.line(0, "digraph {");
    w.line(1, "rankdir=LR;");
    w.line(1, "node [shape=record];");
    if let Some(root) = graph.root() {
        w.module(root, 1);
    }
    w.line(0, "}");
    w.out
}

/// DOT identifiers cannot carry `#` or `.`.
fn fixup(name: &str) -> String {
    name.replace(['#', '.'], "_")
}

struct DotWriter<'g> {
    graph: &'g Graph,
    out: String,
}

impl DotWriter<'_> {
    fn line(&mut self, indent: usize, text: &str) {
        // Writing into a String cannot fail
        let _ = writeln!(self.out, "{:indent$}{text}", "");
    }

    fn module(&mut self, id: ModuleId, level: usize) {
        let graph = self.graph;
        match graph.module(id) {
            Some(m) if m.is_leaf() => self.leaf(id, level),
            Some(_) => self.composite(id, level),
            None => {}
        }
    }

    /// A leaf with no connected input sits with the cluster's inputs.
    fn is_source(&self, id: ModuleId) -> bool {
        let Some(m) = self.graph.module(id) else {
            return false;
        };
        let parent = m.parent().and_then(|p| self.graph.module(p));
        m.is_leaf()
            && m.inputs()
                .iter()
                .all(|&input| !parent.is_some_and(|p| p.connections().any(|(dst, _)| dst == input)))
    }

    fn endpoint(&self, port: PortId) -> String {
        let Some(p) = self.graph.port(port) else {
            return String::new();
        };
        let owner = p.owner();
        let sep = if self.graph.module(owner).is_some_and(|m| m.is_leaf()) {
            ':'
        } else {
            '_'
        };
        format!("{}{sep}{}", fixup(&self.graph.full_name(owner)), fixup(p.name()))
    }

    fn free_port(&mut self, module: ModuleId, port: PortId, level: usize) {
        let graph = self.graph;
        let Some(p) = graph.port(port) else {
            return;
        };
        let spec = format!("{}_{}", fixup(&graph.full_name(module)), fixup(p.name()));
        let text = format!("{spec} [label=\"{}\"]", p.name());
        self.line(level, &text);
    }

    fn composite(&mut self, id: ModuleId, level: usize) {
        let graph = self.graph;
        let Some(m) = graph.module(id) else {
            return;
        };
        let (sources, others): (Vec<ModuleId>, Vec<ModuleId>) =
            m.children().iter().copied().partition(|&c| self.is_source(c));

        self.line(level, &format!("subgraph \"cluster_{}\" {{", m.name()));
        self.line(level + 1, &format!("label = \"{}: \\\"{}\\\"\"", m.type_name(), m.name()));

        self.line(level + 1, "subgraph {");
        self.line(level + 2, "rank=\"source\";");
        for &port in m.inputs() {
            self.free_port(id, port, level + 2);
        }
        for child in sources {
            self.module(child, level + 2);
        }
        self.line(level + 1, "}");

        self.line(level + 1, "subgraph {");
        self.line(level + 2, "rank=\"sink\";");
        for &port in m.outputs() {
            self.free_port(id, port, level + 2);
        }
        self.line(level + 1, "}");

        for child in others {
            self.module(child, level + 1);
        }

        for (dst, src) in m.connections() {
            let edge = format!("{} -> {}", self.endpoint(src), self.endpoint(dst));
            self.line(level + 1, &edge);
        }

        self.line(level, "}");
    }

    fn leaf(&mut self, id: ModuleId, level: usize) {
        let graph = self.graph;
        let Some(m) = graph.module(id) else {
            return;
        };
        let fields = |ports: &[PortId]| {
            ports
                .iter()
                .filter_map(|&p| graph.port(p))
                .map(|p| format!("<{}> {}", fixup(p.name()), p.name()))
                .collect::<Vec<_>>()
                .join("|")
        };
        let text = format!(
            "{} [label=\"{{{}}}|{{\\\"{}\\\"}}|{{{{{}}}|{{{}}}}}\"]",
            fixup(&graph.full_name(id)),
            m.type_name(),
            m.name(),
            fields(m.inputs()),
            fields(m.outputs()),
        );
        self.line(level, &text);
    }
}
