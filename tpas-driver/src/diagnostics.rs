use tpas_frontend::{self, span};

/// Renders diagnostics as `file:line:col: kind: message` followed by the
/// offending source line with a caret underline.
pub struct SimpleEmitter<'input_file> {
    filename: &'input_file str,
    input: &'input_file str,
}

impl<'input_file> SimpleEmitter<'input_file> {
    pub fn new(filename: &'input_file str, input: &'input_file str) -> SimpleEmitter<'input_file> {
        SimpleEmitter { filename, input }
    }

    fn print_location(&self, linemap: &span::LineMap, location: span::SpanLoc) {
        let (line, col) = linemap.offset_to_line_and_col(location.begin());
        let start_offset = match linemap.start_of_line_offset(line) {
            Some(x) => x,
            None => return,
        };
        let end_offset = match linemap.end_of_line_offset(line) {
            Some(x) => x,
            None => return,
        };
        if end_offset < start_offset {
            return;
        }

        let source_line = &self.input[start_offset..=end_offset];
        let line_number = format!("{:5} ", line);
        eprintln!("{}| {}", line_number, source_line);

        let (end_line, end_col) = linemap.offset_to_line_and_col(location.end());
        let width = if end_line == line && end_col > col {
            end_col - col
        } else {
            1
        };
        let mut carets = String::new();
        for _ in 0..line_number.len() {
            carets.push(' ');
        }
        carets.push_str("| ");
        for _ in 1..col {
            carets.push(' ');
        }
        for _ in 0..width.min(source_line.len().saturating_sub(col - 1).max(1)) {
            carets.push('^');
        }
        eprintln!("{}", carets);
    }
}

impl<'input_file> tpas_frontend::diagnostics::DiagnosticEmitter for SimpleEmitter<'input_file> {
    fn emit(&self, diag: &tpas_frontend::diagnostics::Diagnostic) {
        let diag_kind = match diag.kind {
            tpas_frontend::diagnostics::DiagnosticKind::Error => "error",
            tpas_frontend::diagnostics::DiagnosticKind::Warning => "warning",
            tpas_frontend::diagnostics::DiagnosticKind::Info => "info",
        };

        let linemap = span::LineMap::new(self.input);
        let location = diag.locus;
        eprintln!(
            "{}:{}:{}: {}: {}",
            self.filename,
            linemap.offset_to_line(location.begin()),
            linemap.offset_to_column(location.begin()),
            diag_kind,
            diag.message
        );
        self.print_location(&linemap, location);

        for extra in &diag.extra_diagnostics {
            self.emit(extra);
        }
    }
}
