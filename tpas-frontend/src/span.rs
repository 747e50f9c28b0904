use crate::ids;

// Source locations and located AST nodes.

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct SpanLoc(pub usize, pub usize);

impl SpanLoc {
    pub fn new(begin: usize, end: usize) -> SpanLoc {
        SpanLoc(begin, end)
    }
    pub fn begin(&self) -> usize {
        self.0
    }
    pub fn end(&self) -> usize {
        self.1
    }
}

/// Identity of an AST node. The semantic analyser keys its side tables
/// (types, symbols, constant values) by this.
#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy)]
pub struct SpanId(ids::Identifier);

impl SpanId {
    pub fn get_number(&self) -> usize {
        self.0.get_number()
    }
}

#[derive(Debug)]
pub struct Spanned<T> {
    span_id: SpanId,
    loc: SpanLoc,
    child: T,
}

impl<T> Spanned<T> {
    pub fn new(loc: SpanLoc, child: T) -> Spanned<T> {
        Self {
            span_id: SpanId(ids::new_id()),
            loc,
            child,
        }
    }
    pub fn get(&self) -> &T {
        &self.child
    }
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.child
    }
    pub fn loc(&self) -> &SpanLoc {
        &self.loc
    }
    pub fn id(&self) -> SpanId {
        self.span_id
    }
}

#[derive(Debug)]
pub struct SpannedBox<T> {
    child: Box<Spanned<T>>,
}

impl<T> SpannedBox<T> {
    pub fn new(loc: SpanLoc, child: T) -> SpannedBox<T> {
        Self {
            child: Box::new(Spanned::new(loc, child)),
        }
    }
    pub fn get(&self) -> &T {
        self.child.get()
    }
    pub fn get_mut(&mut self) -> &mut T {
        self.child.get_mut()
    }
    pub fn loc(&self) -> &SpanLoc {
        self.child.loc()
    }
    pub fn id(&self) -> SpanId {
        self.child.id()
    }
}

impl<T> From<Spanned<T>> for SpannedBox<T> {
    fn from(v: Spanned<T>) -> SpannedBox<T> {
        Self { child: Box::new(v) }
    }
}

/// Maps byte offsets to 1-based line and column numbers.
#[derive(Debug)]
pub struct LineMap {
    line_start: Vec<usize>,
    line_end: Vec<usize>,
}

impl LineMap {
    pub fn new(input: &str) -> LineMap {
        let mut result = LineMap {
            line_start: vec![],
            line_end: vec![],
        };

        let mut prev_was_new_line = true;
        for (offset, c) in input.bytes().enumerate() {
            if prev_was_new_line {
                result.line_start.push(offset);
                prev_was_new_line = false;
            }
            if c == b'\n' {
                result.line_end.push(offset);
                prev_was_new_line = true;
            }
        }
        // Close the last line if the file does not end in a newline.
        if !prev_was_new_line {
            result.line_end.push(input.len());
        }

        result
    }

    pub fn start_of_line_offset(&self, line: usize) -> Option<usize> {
        assert!(line > 0);
        self.line_start.get(line - 1).copied()
    }

    pub fn end_of_line_offset(&self, line: usize) -> Option<usize> {
        assert!(line > 0);
        self.line_end.get(line - 1).map(|x| x.saturating_sub(1))
    }

    pub fn offset_to_line(&self, offset: usize) -> usize {
        self.offset_to_line_and_col(offset).0
    }

    pub fn offset_to_column(&self, offset: usize) -> usize {
        self.offset_to_line_and_col(offset).1
    }

    pub fn offset_to_line_and_col(&self, offset: usize) -> (usize, usize) {
        let line = self.line_start.partition_point(|x| *x <= offset);
        if line == 0 {
            return (1, 1);
        }
        (line, offset - self.line_start[line - 1] + 1)
    }
}
