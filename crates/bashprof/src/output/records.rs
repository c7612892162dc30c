//! Flat record dump, one row per call event.
//!
//! Rows keep the original record order, so dumps of two runs of the same
//! script (for instance under two trace modes) can be compared with `diff`.

use crate::aggregator::metrics::group_digits;
use crate::aggregator::stack_builder::CallEvent;
use crate::utils::config::DUMP_INDENT;
use std::io::{self, Write};

/// Streams call events as text rows into any writer
pub struct RecordDumper<W> {
    out: W,
    rows: usize,
}

impl<W: Write> RecordDumper<W> {
    pub fn new(out: W) -> Self {
        Self { out, rows: 0 }
    }

    /// Write the row for one event
    pub fn dump(&mut self, event: &CallEvent) -> io::Result<()> {
        match event {
            CallEvent::Step(step) => writeln!(
                self.out,
                "{} {}us {}",
                DUMP_INDENT.repeat(step.depth),
                group_digits(step.spent_us),
                step.cmd
            )?,
            CallEvent::Enter { depth, key, .. } => {
                writeln!(self.out, "{} call {}", DUMP_INDENT.repeat(*depth), key)?
            }
            CallEvent::Exit(exit) => writeln!(
                self.out,
                "{} return {} total={}us self={}us child={}us",
                DUMP_INDENT.repeat(exit.depth),
                exit.callee,
                group_digits(exit.total_us),
                group_digits(exit.self_us),
                group_digits(exit.child_us())
            )?,
        }
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::compile_records;
    use crate::aggregator::stack_builder::tests::record;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_dump_rows_follow_event_order() {
        let records = vec![
            Ok(record(1, 0, "A", 0)),
            Ok(record(2, 1, "B", 1)),
            Ok(record(3, 0, "A", 1_501)),
        ];
        let mut dumper = RecordDumper::new(Vec::new());
        compile_records(records, |event| Ok(dumper.dump(event)?)).unwrap();
        assert_eq!(dumper.rows(), 6);

        let text = String::from_utf8(dumper.into_inner()).unwrap();
        assert_eq!(
            text.lines().collect::<Vec<_>>(),
            vec![
                " call t.sh:1(A)",
                " 1us cmd1",
                " > call t.sh:1(B)",
                " > 1_500us cmd2",
                " > return t.sh:1(B) total=1_500us self=1_500us child=0us",
                " return t.sh:1(A) total=1_501us self=1us child=1_500us",
            ]
        );
    }
}
