//! Caller-supplied sinks for per-column simulation diagnostics.
//!
//! The simulator itself never performs I/O. For one designated amplifier
//! per run the orchestrator replays a compact per-column record into a sink
//! the caller provides; everything else gets the no-op sink.

use std::io::Write;

use log::warn;

/// Summary of one column's trip through the correction.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDiagnostic {
    /// Column index within the amp region.
    pub column: usize,
    /// Total charge before correction, electrons.
    pub input_total: f64,
    /// Total charge after correction, electrons.
    pub output_total: f64,
    /// Pixels clamped to zero at the end of the column's correction.
    pub clamped: usize,
    /// Largest absolute observed-minus-simulated residual after each
    /// refinement pass.
    pub residuals: Vec<f64>,
}

/// Receiver for per-column diagnostics.
pub trait DiagnosticSink {
    fn column(&mut self, diag: &ColumnDiagnostic);
}

/// Discards everything; the default for non-designated amps.
#[derive(Debug, Default)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn column(&mut self, _diag: &ColumnDiagnostic) {}
}

/// Collects records in memory, mostly useful for inspection and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub records: Vec<ColumnDiagnostic>,
}

impl DiagnosticSink for MemorySink {
    fn column(&mut self, diag: &ColumnDiagnostic) {
        self.records.push(diag.clone());
    }
}

/// Writes one tab-separated line per column to any `Write` target.
pub struct TextSink<W: Write> {
    writer: W,
    header_written: bool,
    failed: bool,
}

impl<W: Write> TextSink<W> {
    pub fn new(writer: W) -> Self {
        TextSink {
            writer,
            header_written: false,
            failed: false,
        }
    }

    /// Consume the sink and hand back the writer (e.g. to flush a file).
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> DiagnosticSink for TextSink<W> {
    fn column(&mut self, diag: &ColumnDiagnostic) {
        if self.failed {
            return;
        }
        let write = |w: &mut W, header_written: &mut bool| -> std::io::Result<()> {
            if !*header_written {
                writeln!(w, "# column\tinput_e\toutput_e\tclamped\tresiduals")?;
                *header_written = true;
            }
            let residuals = diag
                .residuals
                .iter()
                .map(|r| format!("{r:.4}"))
                .collect::<Vec<_>>()
                .join(",");
            writeln!(
                w,
                "{}\t{:.3}\t{:.3}\t{}\t{}",
                diag.column, diag.input_total, diag.output_total, diag.clamped, residuals
            )
        };
        if let Err(err) = write(&mut self.writer, &mut self.header_written) {
            warn!("diagnostic log write failed, disabling sink: {err}");
            self.failed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(column: usize) -> ColumnDiagnostic {
        ColumnDiagnostic {
            column,
            input_total: 1000.0,
            output_total: 999.5,
            clamped: 1,
            residuals: vec![0.5, 0.1],
        }
    }

    #[test]
    fn test_memory_sink_collects_in_order() {
        let mut sink = MemorySink::default();
        sink.column(&sample(0));
        sink.column(&sample(3));
        assert_eq!(sink.records.len(), 2);
        assert_eq!(sink.records[1].column, 3);
    }

    #[test]
    fn test_text_sink_writes_header_once() {
        let mut sink = TextSink::new(Vec::new());
        sink.column(&sample(0));
        sink.column(&sample(1));
        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(out.matches("# column").count(), 1);
        assert_eq!(out.lines().count(), 3);
        assert!(out.contains("0.5000,0.1000"));
    }
}
