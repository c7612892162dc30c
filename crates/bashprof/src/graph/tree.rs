//! Per-invocation call tree in Graphviz DOT.
//!
//! Unlike the aggregated call graph, every call gets its own node and every
//! executed statement its own box. A frame's statements and calls are
//! chained in execution order, starting at the frame's node and returning
//! to it, and share one rank.

use super::generator::escape_dot;
use crate::aggregator::stack_builder::CallEvent;
use log::debug;
use std::io::{self, Write};

/// A call whose statements are still arriving
struct OpenFrame {
    id: usize,
    /// Last node of the frame's chain
    tail: usize,
    /// Node statements of the frame's rank group
    members: String,
}

/// Streams call events as a call tree graph into any writer
///
/// Edges are written as events arrive; the node group of a frame is
/// written when the frame exits.
pub struct TreeGraphWriter<W> {
    out: W,
    frames: Vec<OpenFrame>,
    next_id: usize,
}

impl<W: Write> TreeGraphWriter<W> {
    /// Start a graph and write its header
    pub fn new(mut out: W, title: &str) -> io::Result<Self> {
        writeln!(out, "digraph calltree {{")?;
        writeln!(out, "  label=\"{}\";", escape_dot(title))?;
        writeln!(out, "  labelloc=t;")?;
        writeln!(out, "  node [fontname=\"Helvetica\", fontsize=10];")?;
        Ok(Self {
            out,
            frames: Vec::new(),
            next_id: 0,
        })
    }

    /// Number of nodes written so far
    pub fn nodes(&self) -> usize {
        self.next_id
    }

    fn node_id(&mut self) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Add the node and edges of one event
    pub fn record(&mut self, event: &CallEvent) -> io::Result<()> {
        match event {
            CallEvent::Enter { key, .. } => {
                let id = self.node_id();
                let node = format!("n{} [label=\"{}\"];", id, escape_dot(&key.to_string()));
                match self.frames.last_mut() {
                    Some(parent) => {
                        writeln!(self.out, "  n{} -> n{};", parent.tail, id)?;
                        parent.tail = id;
                        parent.members.push_str(&format!("    {}\n", node));
                    }
                    None => writeln!(self.out, "  {}", node)?,
                }
                self.frames.push(OpenFrame {
                    id,
                    tail: id,
                    members: String::new(),
                });
            }
            CallEvent::Step(step) => {
                let id = self.node_id();
                let Some(frame) = self.frames.last_mut() else {
                    debug!("Statement at line {} outside any call", step.idx);
                    return Ok(());
                };
                writeln!(self.out, "  n{} -> n{};", frame.tail, id)?;
                frame.tail = id;
                frame.members.push_str(&format!(
                    "    n{} [label=\"{}\" shape=box];\n",
                    id,
                    escape_dot(&step.cmd)
                ));
            }
            CallEvent::Exit(_) => {
                let Some(frame) = self.frames.pop() else {
                    return Ok(());
                };
                if frame.tail != frame.id {
                    writeln!(self.out, "  n{} -> n{};", frame.tail, frame.id)?;
                }
                if !frame.members.is_empty() {
                    writeln!(self.out, "  subgraph rank_n{} {{", frame.id)?;
                    writeln!(self.out, "    rank=same;")?;
                    self.out.write_all(frame.members.as_bytes())?;
                    writeln!(self.out, "  }}")?;
                }
            }
        }
        Ok(())
    }

    /// Close the graph and hand back the writer
    pub fn finish(mut self) -> io::Result<W> {
        writeln!(self.out, "}}")?;
        debug!("Call tree written with {} nodes", self.next_id);
        Ok(self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::compile_records;
    use crate::aggregator::stack_builder::tests::record;
    use pretty_assertions::assert_eq;

    fn render(records: Vec<crate::parser::TraceRecord>) -> String {
        let mut writer = TreeGraphWriter::new(Vec::new(), "Call tree").unwrap();
        compile_records(records.into_iter().map(Ok), |event| Ok(writer.record(event)?)).unwrap();
        String::from_utf8(writer.finish().unwrap()).unwrap()
    }

    #[test]
    fn test_frames_chain_statements_and_calls() {
        let dot = render(vec![
            record(1, 0, "A", 0),
            record(2, 1, "B", 1),
            record(3, 0, "A", 3),
            record(4, 0, "A", 5),
        ]);
        assert_eq!(
            dot.lines().collect::<Vec<_>>(),
            vec![
                "digraph calltree {",
                "  label=\"Call tree\";",
                "  labelloc=t;",
                "  node [fontname=\"Helvetica\", fontsize=10];",
                "  n0 [label=\"t.sh:1(A)\"];",
                "  n0 -> n1;",
                "  n1 -> n2;",
                "  n2 -> n3;",
                "  n3 -> n2;",
                "  subgraph rank_n2 {",
                "    rank=same;",
                "    n3 [label=\"cmd2\" shape=box];",
                "  }",
                "  n2 -> n4;",
                "  n4 -> n0;",
                "  subgraph rank_n0 {",
                "    rank=same;",
                "    n1 [label=\"cmd1\" shape=box];",
                "    n2 [label=\"t.sh:1(B)\"];",
                "    n4 [label=\"cmd3\" shape=box];",
                "  }",
                "}",
            ]
        );
    }

    #[test]
    fn test_every_call_gets_its_own_node() {
        let dot = render(vec![
            record(1, 0, "A", 0),
            record(2, 1, "B", 1),
            record(3, 0, "A", 2),
            record(4, 1, "B", 3),
            record(5, 0, "A", 4),
        ]);
        assert_eq!(dot.matches("[label=\"t.sh:1(B)\"]").count(), 2);
        // the last record only bounds time, so its frame has no statement
        assert!(dot.ends_with("}\n"));
    }

    #[test]
    fn test_labels_are_escaped() {
        let mut writer = TreeGraphWriter::new(Vec::new(), "run \"x\"").unwrap();
        writer
            .record(&CallEvent::Enter {
                depth: 0,
                key: crate::parser::FunctionKey::new("a.sh", 1, "f"),
                stamp_us: 0,
                is_recursive_reentry: false,
            })
            .unwrap();
        writer
            .record(&CallEvent::Step(crate::aggregator::Step {
                idx: 1,
                depth: 0,
                function: crate::parser::FunctionKey::new("a.sh", 1, "f"),
                cmd: "echo \"hi\"".to_string(),
                spent_us: 1,
            }))
            .unwrap();
        assert_eq!(writer.nodes(), 2);
        let dot = String::from_utf8(writer.finish().unwrap()).unwrap();
        assert!(dot.contains("label=\"run \\\"x\\\"\";"));
        assert!(dot.contains("n0 -> n1;"));
    }
}
