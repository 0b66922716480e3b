//! Lexing and structural parsing of a single template file.
//!
//! The scanner walks the source once, pairing `{{` ... `}}` action delimiters
//! (trim markers tolerated) and `{{/* ... */}}` comments. Block actions
//! (`if`, `range`, `with`, `block`, `define`) are matched against their
//! `{{end}}` to produce fold groups; `define`/`block` contribute template
//! definitions and `template` actions contribute references.

/// Zero-based source position. `character` counts UTF-16 code units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// Half-open source span: `start` inclusive, `end` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, pos: Position) -> bool {
        pos >= self.start && pos < self.end
    }
}

/// A syntactic error found while scanning one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}: {}",
            self.span.start.line + 1,
            self.span.start.character + 1,
            self.message
        )
    }
}

/// A `{{define "name"}}` or `{{block "name"}}` definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateDef {
    pub name: String,
    /// Span of the quoted name, quotes included.
    pub name_span: Span,
    /// Span of the whole block, opening action through `{{end}}`.
    pub span: Span,
}

/// A `{{template "name"}}` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRef {
    pub name: String,
    pub name_span: Span,
    pub span: Span,
}

/// A foldable block construct, opening action through its `{{end}}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoldGroup {
    pub span: Span,
}

/// A `{{/* ... */}}` comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentBlock {
    pub span: Span,
    /// True when the comment body is a Go-style `import` declaration list.
    pub import_block: bool,
}

/// Structural parse result for one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedTemplate {
    pub defines: Vec<TemplateDef>,
    pub refs: Vec<TemplateRef>,
    pub groups: Vec<FoldGroup>,
    pub comments: Vec<CommentBlock>,
}

/// Parse one template source. Invalid UTF-8 is replaced, never rejected:
/// the editor keeps sending edits and deserves diagnostics for what we can
/// read.
pub fn parse_single_file(source: &[u8]) -> (ParsedTemplate, Vec<ParseError>) {
    let text = String::from_utf8_lossy(source);
    Scanner::new(&text).run()
}

struct OpenBlock {
    keyword: &'static str,
    start: Position,
    /// Quoted name, for `define`/`block` actions.
    name: Option<(String, Span)>,
}

struct Scanner {
    chars: Vec<char>,
    i: usize,
    pos: Position,
    parsed: ParsedTemplate,
    errors: Vec<ParseError>,
    stack: Vec<OpenBlock>,
}

impl Scanner {
    fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            i: 0,
            pos: Position::default(),
            parsed: ParsedTemplate::default(),
            errors: Vec::new(),
            stack: Vec::new(),
        }
    }

    fn run(mut self) -> (ParsedTemplate, Vec<ParseError>) {
        while !self.eof() {
            if self.starts_with("{{") {
                self.scan_action();
            } else {
                self.bump();
            }
        }

        while let Some(open) = self.stack.pop() {
            self.errors.push(ParseError {
                message: format!("unclosed {{{{{}}}}} action, missing {{{{end}}}}", open.keyword),
                span: Span::new(open.start, self.pos),
            });
        }

        (self.parsed, self.errors)
    }

    fn eof(&self) -> bool {
        self.i >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.i).copied()
    }

    fn starts_with(&self, needle: &str) -> bool {
        let mut j = self.i;
        for c in needle.chars() {
            if self.chars.get(j) != Some(&c) {
                return false;
            }
            j += 1;
        }
        true
    }

    fn bump(&mut self) -> char {
        let c = self.chars[self.i];
        self.i += 1;
        if c == '\n' {
            self.pos.line += 1;
            self.pos.character = 0;
        } else {
            self.pos.character += c.len_utf16() as u32;
        }
        c
    }

    fn skip_spaces(&mut self) {
        while matches!(self.peek(), Some(c) if c != '\n' && c.is_whitespace()) {
            self.bump();
        }
    }

    fn scan_action(&mut self) {
        let start = self.pos;
        self.bump();
        self.bump();

        // Left trim marker: `{{- `.
        if self.peek() == Some('-') && matches!(self.chars.get(self.i + 1), Some(c) if c.is_whitespace())
        {
            self.bump();
        }
        self.skip_spaces();

        if self.starts_with("/*") {
            self.scan_comment(start);
            return;
        }

        let mut body = String::new();
        let mut strings: Vec<(String, Span)> = Vec::new();

        loop {
            if self.eof() {
                self.errors.push(ParseError {
                    message: "unterminated action, missing closing }} delimiter".to_string(),
                    span: Span::new(start, self.pos),
                });
                return;
            }
            if self.starts_with("}}") {
                self.bump();
                self.bump();
                break;
            }
            match self.peek() {
                Some('"') => {
                    if let Some(lit) = self.scan_quoted_string(start) {
                        body.push('"');
                        body.push_str(&lit.0);
                        body.push('"');
                        strings.push(lit);
                    } else {
                        return;
                    }
                }
                Some('`') => {
                    if let Some(lit) = self.scan_raw_string(start) {
                        body.push('`');
                        body.push_str(&lit.0);
                        body.push('`');
                        strings.push(lit);
                    } else {
                        return;
                    }
                }
                _ => body.push(self.bump()),
            }
        }

        let span = Span::new(start, self.pos);
        let body = body.trim().trim_end_matches('-').trim_end();
        self.classify_action(body, &strings, span);
    }

    /// Scan past `/* ... */` and the closing delimiter, `self.i` sitting on
    /// the leading `/`.
    fn scan_comment(&mut self, start: Position) {
        self.bump();
        self.bump();

        let mut body = String::new();
        loop {
            if self.eof() {
                self.errors.push(ParseError {
                    message: "unterminated comment, missing */}} terminator".to_string(),
                    span: Span::new(start, self.pos),
                });
                return;
            }
            if self.starts_with("*/") {
                self.bump();
                self.bump();
                break;
            }
            body.push(self.bump());
        }

        self.skip_spaces();
        if self.peek() == Some('-') {
            self.bump();
        }
        self.skip_spaces();

        if self.starts_with("}}") {
            self.bump();
            self.bump();
        } else {
            let error_from = self.pos;
            // Resync at the next closing delimiter so one bad comment does
            // not swallow the rest of the file.
            while !self.eof() && !self.starts_with("}}") {
                self.bump();
            }
            if !self.eof() {
                self.bump();
                self.bump();
            }
            self.errors.push(ParseError {
                message: "unexpected text between */ and }} in comment".to_string(),
                span: Span::new(error_from, self.pos),
            });
        }

        let import_block = body.trim_start().starts_with("import");
        self.parsed.comments.push(CommentBlock {
            span: Span::new(start, self.pos),
            import_block,
        });
    }

    /// Scan a `"..."` literal, `self.i` sitting on the opening quote.
    /// Returns the unquoted value and the span including quotes, or `None`
    /// after reporting an unterminated literal.
    fn scan_quoted_string(&mut self, action_start: Position) -> Option<(String, Span)> {
        let start = self.pos;
        self.bump();
        let mut value = String::new();
        loop {
            match self.peek() {
                None | Some('\n') => {
                    self.errors.push(ParseError {
                        message: "unterminated string literal in action".to_string(),
                        span: Span::new(action_start, self.pos),
                    });
                    return None;
                }
                Some('\\') => {
                    value.push(self.bump());
                    if !self.eof() {
                        value.push(self.bump());
                    }
                }
                Some('"') => {
                    self.bump();
                    return Some((value, Span::new(start, self.pos)));
                }
                Some(_) => value.push(self.bump()),
            }
        }
    }

    /// Scan a backquoted raw string, which may span lines.
    fn scan_raw_string(&mut self, action_start: Position) -> Option<(String, Span)> {
        let start = self.pos;
        self.bump();
        let mut value = String::new();
        loop {
            match self.peek() {
                None => {
                    self.errors.push(ParseError {
                        message: "unterminated raw string literal in action".to_string(),
                        span: Span::new(action_start, self.pos),
                    });
                    return None;
                }
                Some('`') => {
                    self.bump();
                    return Some((value, Span::new(start, self.pos)));
                }
                Some(_) => value.push(self.bump()),
            }
        }
    }

    fn classify_action(&mut self, body: &str, strings: &[(String, Span)], span: Span) {
        let Some(keyword) = body.split_whitespace().next() else {
            self.errors.push(ParseError {
                message: "empty action".to_string(),
                span,
            });
            return;
        };

        match keyword {
            "if" | "range" | "with" => self.stack.push(OpenBlock {
                keyword: match keyword {
                    "if" => "if",
                    "range" => "range",
                    _ => "with",
                },
                start: span.start,
                name: None,
            }),
            "define" | "block" => {
                let keyword = if keyword == "define" { "define" } else { "block" };
                let name = strings.first().cloned();
                if name.is_none() {
                    self.errors.push(ParseError {
                        message: format!(
                            "missing quoted template name in {{{{{keyword}}}}} action"
                        ),
                        span,
                    });
                }
                self.stack.push(OpenBlock {
                    keyword,
                    start: span.start,
                    name,
                });
            }
            "end" => match self.stack.pop() {
                Some(open) => {
                    let group = Span::new(open.start, span.end);
                    self.parsed.groups.push(FoldGroup { span: group });
                    if let Some((name, name_span)) = open.name {
                        self.parsed.defines.push(TemplateDef {
                            name,
                            name_span,
                            span: group,
                        });
                    }
                }
                None => self.errors.push(ParseError {
                    message: "unexpected {{end}} action".to_string(),
                    span,
                }),
            },
            "else" => {
                if self.stack.is_empty() {
                    self.errors.push(ParseError {
                        message: "unexpected {{else}} action outside of a block".to_string(),
                        span,
                    });
                }
            }
            "template" => match strings.first() {
                Some((name, name_span)) => self.parsed.refs.push(TemplateRef {
                    name: name.clone(),
                    name_span: *name_span,
                    span,
                }),
                None => self.errors.push(ParseError {
                    message: "missing quoted template name in {{template}} action".to_string(),
                    span,
                }),
            },
            // Pipelines, field accesses, variable assignments: structurally
            // inert for our purposes.
            _ => {}
        }
    }
}
