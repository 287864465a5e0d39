//! Lexical scanning of PostgreSQL statement text.
//!
//! Only two things matter to the session: `$n` placeholders and the `;`
//! separating statements of a simple query. Both have to be found outside
//! string literals, quoted identifiers, dollar-quoted bodies and comments.

/// A token of interest, with its byte range in the scanned text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Token {
    /// `$n`, 1-based.
    Placeholder { start: usize, end: usize, index: usize },
    Semicolon { at: usize },
}

/// Iterator over the [`Token`]s of a SQL string.
pub(crate) struct Scanner<'a> {
    sql: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    pub(crate) fn new(sql: &'a str) -> Self {
        Self {
            sql,
            bytes: sql.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    /// Skip a quoted section opened at `self.pos`.
    fn skip_quoted(&mut self, quote: u8, backslash_escapes: bool) {
        self.pos += 1;
        while let Some(b) = self.peek(0) {
            self.pos += 1;
            if backslash_escapes && b == b'\\' {
                self.pos += 1;
            } else if b == quote {
                if self.peek(0) == Some(quote) {
                    self.pos += 1;
                } else {
                    return;
                }
            }
        }
    }

    fn skip_line_comment(&mut self) {
        while let Some(b) = self.peek(0) {
            self.pos += 1;
            if b == b'\n' {
                return;
            }
        }
    }

    /// Block comments nest in PostgreSQL.
    fn skip_block_comment(&mut self) {
        self.pos += 2;
        let mut depth = 1;
        while depth > 0 && self.pos < self.bytes.len() {
            match (self.peek(0), self.peek(1)) {
                (Some(b'/'), Some(b'*')) => {
                    depth += 1;
                    self.pos += 2;
                }
                (Some(b'*'), Some(b'/')) => {
                    depth -= 1;
                    self.pos += 2;
                }
                _ => self.pos += 1,
            }
        }
    }

    fn skip_word(&mut self) -> &'a [u8] {
        let start = self.pos;
        while self.peek(0).is_some_and(is_word_byte) {
            self.pos += 1;
        }
        &self.bytes[start..self.pos]
    }

    /// Handle a `$` at `self.pos`: a placeholder, a dollar-quoted body, or neither.
    fn dollar(&mut self) -> Option<Token> {
        let start = self.pos;
        let digits = self.bytes[start + 1..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count();
        if digits > 0 {
            self.pos = start + 1 + digits;
            return self.sql[start + 1..self.pos]
                .parse()
                .ok()
                .map(|index| Token::Placeholder {
                    start,
                    end: self.pos,
                    index,
                });
        }

        let tag_len = self.bytes[start + 1..]
            .iter()
            .take_while(|b| is_word_byte(**b) && **b != b'$')
            .count();
        let tag_end = start + 1 + tag_len;
        let opens = self.bytes.get(tag_end) == Some(&b'$')
            && self.bytes.get(start + 1).is_none_or(|b| !b.is_ascii_digit());
        if !opens {
            self.pos += 1;
            return None;
        }

        let tag = &self.sql[start..=tag_end];
        let body = tag_end + 1;
        self.pos = match self.sql[body..].find(tag) {
            Some(close) => body + close + tag.len(),
            None => self.bytes.len(),
        };
        None
    }
}

impl Iterator for Scanner<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        while let Some(b) = self.peek(0) {
            match b {
                b'\'' => self.skip_quoted(b'\'', false),
                b'"' => self.skip_quoted(b'"', false),
                b'-' if self.peek(1) == Some(b'-') => self.skip_line_comment(),
                b'/' if self.peek(1) == Some(b'*') => self.skip_block_comment(),
                b'$' => {
                    if let Some(token) = self.dollar() {
                        return Some(token);
                    }
                }
                b';' => {
                    self.pos += 1;
                    return Some(Token::Semicolon { at: self.pos - 1 });
                }
                b if is_word_byte(b) => {
                    // Words swallow `$` so `a$1` stays an identifier.
                    let word = self.skip_word();
                    if self.peek(0) == Some(b'\'') {
                        let escapes = word.eq_ignore_ascii_case(b"e");
                        self.skip_quoted(b'\'', escapes);
                    }
                }
                _ => self.pos += 1,
            }
        }
        None
    }
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

/// Split a simple query into its non-empty statements.
pub(crate) fn statements(sql: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    for token in Scanner::new(sql) {
        if let Token::Semicolon { at } = token {
            out.push(&sql[start..at]);
            start = at + 1;
        }
    }
    out.push(&sql[start..]);
    out.retain(|stmt| !stmt.trim().is_empty());
    out
}

/// Leading keywords of a statement, upper-cased, skipping comments.
pub(crate) fn keywords(stmt: &str, count: usize) -> Vec<String> {
    let mut words = Vec::with_capacity(count);
    let mut rest = stmt;
    while words.len() < count {
        rest = rest.trim_start();
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.split_once('\n').map_or("", |(_, tail)| tail);
            continue;
        }
        if rest.starts_with("/*") {
            let mut scanner = Scanner::new(rest);
            scanner.skip_block_comment();
            rest = &rest[scanner.pos.min(rest.len())..];
            continue;
        }
        let len = rest
            .bytes()
            .take_while(|b| b.is_ascii_alphabetic() || *b == b'_')
            .count();
        if len == 0 {
            break;
        }
        words.push(rest[..len].to_ascii_uppercase());
        rest = &rest[len..];
    }
    words
}
