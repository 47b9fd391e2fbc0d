//! Query tokenizer
//!
//! The lexer runs before the grammar. It owns every lexical error (so those
//! get precise positions instead of a generic parse failure) and produces the
//! canonical token rendering used as the plan-cache key and as the default
//! name of un-aliased projection columns. Two queries that differ only in
//! whitespace, comments, keyword case or quote style share one rendering.
//!
//! The lexer and `cypher.pest` must accept the same token set: a keyword or
//! symbol added to one has to be added to the other. Any text the lexer
//! accepts either parses or fails with a syntax error, and the canonical
//! rendering of a query compiles to the same plan as the query itself.

use super::error::{CompileError, CompileResult};

const KEYWORDS: &[&str] = &[
    "ALL", "AND", "AS", "ASC", "ASCENDING", "BY", "CASE", "CONTAINS", "CREATE", "DELETE", "DESC",
    "DESCENDING", "DETACH", "DISTINCT", "ELSE", "END", "ENDS", "FALSE", "IN", "IS", "LIMIT", "MATCH",
    "NOT", "NULL", "OPTIONAL", "OR", "ORDER", "REMOVE", "RETURN", "SET", "SKIP", "STARTS", "THEN",
    "TRUE", "UNION", "UNWIND", "WHEN", "WHERE", "WITH", "XOR",
];

/// Multi-character symbols, matched before single characters
const LONG_SYMBOLS: &[&str] = &["..", "<>", "<=", ">=", "!=", "=~", "+=", "->", "<-"];

const SHORT_SYMBOLS: &str = "()[]{},.:;|+-*/%^=<>";

pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(word))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Keyword,
    Identifier,
    /// Backtick-quoted name
    EscapedName,
    String,
    Integer,
    Float,
    Parameter,
    Symbol,
}

/// A positioned token
///
/// `text` is normalized: keywords upper-cased, strings unescaped, escaped
/// names without backticks, parameters without `$`.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    /// Byte range in the source
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

impl Token {
    fn is_symbol(&self, symbol: &str) -> bool {
        self.kind == TokenKind::Symbol && self.text == symbol
    }
}

struct Scanner<'a> {
    input: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Scanner<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().collect(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|(_, c)| *c)
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).map(|(_, c)| *c)
    }

    fn offset(&self) -> usize {
        self.chars.get(self.pos).map(|(i, _)| *i).unwrap_or(self.input.len())
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn starts_with(&self, s: &str) -> bool {
        self.input[self.offset()..].starts_with(s)
    }

    fn skip_trivia(&mut self) -> CompileResult<()> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    let (line, column) = (self.line, self.column);
                    self.bump();
                    self.bump();
                    loop {
                        if self.starts_with("*/") {
                            self.bump();
                            self.bump();
                            break;
                        }
                        if self.bump().is_none() {
                            return Err(CompileError::lex(line, column, "Unterminated block comment"));
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn next_token(&mut self) -> CompileResult<Option<Token>> {
        self.skip_trivia()?;
        let Some(c) = self.peek() else {
            return Ok(None);
        };
        let (start, line, column) = (self.offset(), self.line, self.column);

        let (kind, text) = if c.is_alphabetic() || c == '_' {
            let word = self.take_while(|c| c.is_alphanumeric() || c == '_');
            if is_keyword(&word) {
                (TokenKind::Keyword, word.to_ascii_uppercase())
            } else {
                (TokenKind::Identifier, word)
            }
        } else if c.is_ascii_digit() {
            self.number()
        } else if c == '\'' || c == '"' {
            (TokenKind::String, self.string(line, column)?)
        } else if c == '`' {
            (TokenKind::EscapedName, self.escaped_name(line, column)?)
        } else if c == '$' {
            self.bump();
            let name = self.take_while(|c| c.is_alphanumeric() || c == '_');
            if name.is_empty() {
                return Err(CompileError::lex(line, column, "Expected a parameter name after '$'"));
            }
            (TokenKind::Parameter, name)
        } else if let Some(symbol) = LONG_SYMBOLS.iter().find(|s| self.starts_with(s)) {
            self.bump();
            self.bump();
            (TokenKind::Symbol, symbol.to_string())
        } else if SHORT_SYMBOLS.contains(c) {
            self.bump();
            (TokenKind::Symbol, c.to_string())
        } else {
            return Err(CompileError::lex(line, column, format!("Unexpected character '{}'", c)));
        };

        Ok(Some(Token {
            kind,
            text,
            start,
            end: self.offset(),
            line,
            column,
        }))
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            out.push(c);
            self.bump();
        }
        out
    }

    fn number(&mut self) -> (TokenKind, String) {
        let mut text = self.take_while(|c| c.is_ascii_digit());
        let mut kind = TokenKind::Integer;
        // `1..3` is a range, not a float
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
            text.push('.');
            text.push_str(&self.take_while(|c| c.is_ascii_digit()));
            kind = TokenKind::Float;
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let sign = matches!(self.peek_at(1), Some('+') | Some('-'));
            let digit_at = if sign { 2 } else { 1 };
            if self.peek_at(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                text.push('e');
                self.bump();
                if sign {
                    if let Some(s) = self.bump() {
                        text.push(s);
                    }
                }
                text.push_str(&self.take_while(|c| c.is_ascii_digit()));
                kind = TokenKind::Float;
            }
        }
        (kind, text)
    }

    fn string(&mut self, line: usize, column: usize) -> CompileResult<String> {
        let quote = self.bump().unwrap_or('\'');
        let mut raw = String::new();
        loop {
            match self.bump() {
                None => return Err(CompileError::lex(line, column, "Unterminated string literal")),
                Some('\\') => {
                    raw.push('\\');
                    match self.bump() {
                        Some(c) => raw.push(c),
                        None => return Err(CompileError::lex(line, column, "Unterminated string literal")),
                    }
                }
                Some(c) if c == quote => break,
                Some(c) => raw.push(c),
            }
        }
        unescape(&raw).map_err(|message| CompileError::lex(line, column, message))
    }

    fn escaped_name(&mut self, line: usize, column: usize) -> CompileResult<String> {
        self.bump();
        let mut name = String::new();
        loop {
            match self.bump() {
                None => return Err(CompileError::lex(line, column, "Unterminated escaped name")),
                Some('`') if self.peek() == Some('`') => {
                    self.bump();
                    name.push('`');
                }
                Some('`') => break,
                Some(c) => name.push(c),
            }
        }
        if name.is_empty() {
            return Err(CompileError::lex(line, column, "Escaped name cannot be empty"));
        }
        Ok(name)
    }
}

/// Split a query into tokens, dropping whitespace and comments
pub fn tokenize(input: &str) -> CompileResult<Vec<Token>> {
    let mut scanner = Scanner::new(input);
    let mut tokens = Vec::new();
    while let Some(token) = scanner.next_token()? {
        tokens.push(token);
    }
    Ok(tokens)
}

/// Resolve backslash escapes of a string literal body
pub fn unescape(raw: &str) -> Result<String, String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('b') => out.push('\u{0008}'),
            Some('f') => out.push('\u{000C}'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                let code = u32::from_str_radix(&hex, 16)
                    .ok()
                    .filter(|_| hex.len() == 4)
                    .and_then(char::from_u32)
                    .ok_or_else(|| format!("Invalid unicode escape '\\u{}'", hex))?;
                out.push(code);
            }
            Some(other) => return Err(format!("Invalid escape sequence '\\{}'", other)),
            None => return Err("Dangling backslash in string literal".to_string()),
        }
    }
    Ok(out)
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

fn render(token: &Token) -> String {
    match token.kind {
        TokenKind::EscapedName => format!("`{}`", token.text.replace('`', "``")),
        TokenKind::String => quote(&token.text),
        TokenKind::Parameter => format!("${}", token.text),
        _ => token.text.clone(),
    }
}

/// Whether `token` is a prefix sign, judged by what came before it
fn is_unary(token: &Token, before: Option<&Token>) -> bool {
    if !(token.is_symbol("-") || token.is_symbol("+")) {
        return false;
    }
    match before {
        None => true,
        Some(b) => match b.kind {
            TokenKind::Symbol => !matches!(b.text.as_str(), ")" | "]" | "}"),
            TokenKind::Keyword => !matches!(b.text.as_str(), "NULL" | "TRUE" | "FALSE" | "END"),
            _ => false,
        },
    }
}

fn needs_space(prev: &Token, before_prev: Option<&Token>, token: &Token, open: Option<&str>) -> bool {
    let is_name = |t: &Token| matches!(t.kind, TokenKind::Identifier | TokenKind::EscapedName);

    if token.kind == TokenKind::Symbol && matches!(token.text.as_str(), ")" | "]" | "}" | "," | "." | ":" | ".." | "|" | ";") {
        return false;
    }
    if prev.kind == TokenKind::Symbol {
        match prev.text.as_str() {
            "(" | "[" | "{" | "." | ".." | "|" => return false,
            ":" => return open == Some("{"),
            "*" if open == Some("[") => return false,
            _ => {}
        }
    }
    if token.is_symbol("(") && is_name(prev) {
        return false;
    }
    if token.is_symbol("[") && (is_name(prev) || prev.is_symbol(")") || prev.is_symbol("]")) {
        return false;
    }
    if is_unary(prev, before_prev) {
        return false;
    }
    true
}

/// Canonical rendering of a token sequence
pub fn canonical(tokens: &[Token]) -> String {
    let mut out = String::new();
    let mut open: Vec<&str> = Vec::new();
    for (i, token) in tokens.iter().enumerate() {
        if i > 0 {
            let before_prev = if i > 1 { tokens.get(i - 2) } else { None };
            if needs_space(&tokens[i - 1], before_prev, token, open.last().copied()) {
                out.push(' ');
            }
        }
        out.push_str(&render(token));
        if token.kind == TokenKind::Symbol {
            match token.text.as_str() {
                "(" => open.push("("),
                "[" => open.push("["),
                "{" => open.push("{"),
                ")" | "]" | "}" => {
                    open.pop();
                }
                _ => {}
            }
        }
    }
    out
}

/// Canonical rendering of the tokens inside the byte range `[start, end)`
pub fn canonical_between(tokens: &[Token], start: usize, end: usize) -> String {
    let first = tokens.partition_point(|t| t.start < start);
    let last = tokens.partition_point(|t| t.end <= end);
    if first >= last {
        return String::new();
    }
    canonical(&tokens[first..last])
}
