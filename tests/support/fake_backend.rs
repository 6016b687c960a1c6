//! In process stand-in for a PostgreSQL backend. Understands just enough SQL to exercise named
//! cursors: the cursor commands, `COMMIT`/`ROLLBACK`, a lookup in `pg_cursors` and queries of the
//! form `select generate_series(<from>, <to>) [as <alias>]`, with `?` placeholders for parameters.

use std::collections::{HashMap, VecDeque};

use named_cursor::{Column, Connection, Error, QueryResult, Row, TransactionStatus, Value};

/// Type code of the result column, `int4` in PostgreSQL.
pub const INT4_OID: i64 = 23;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Scroll {
    Scroll,
    NoScroll,
    Default,
}

struct ServerCursor {
    columns: Vec<Column>,
    rows: Vec<Row>,
    /// `0` is before the first row, `rows.len() + 1` after the last. Otherwise the one based index
    /// of the current row.
    position: usize,
    scroll: Scroll,
    hold: bool,
}

pub struct FakeBackend {
    cursors: HashMap<String, ServerCursor>,
    status: TransactionStatus,
    commands: Vec<String>,
    injected_failures: VecDeque<Error>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            cursors: HashMap::new(),
            status: TransactionStatus::Idle,
            commands: Vec::new(),
            injected_failures: VecDeque::new(),
        }
    }

    /// Statements executed since the last call.
    pub fn pop_commands(&mut self) -> Vec<String> {
        std::mem::take(&mut self.commands)
    }

    pub fn has_cursor(&self, name: &str) -> bool {
        self.cursors.contains_key(name)
    }

    /// The next statement fails with `error` instead of being executed.
    pub fn fail_next(&mut self, error: Error) {
        self.injected_failures.push_back(error);
    }

    fn dispatch(&mut self, statement: &str, params: &[Value]) -> Result<QueryResult, Error> {
        let mut tokens = Tokens::new(statement);
        if tokens.keyword("declare") {
            self.declare(&mut tokens, params)
        } else if tokens.keyword("fetch") {
            self.fetch(&mut tokens)
        } else if tokens.keyword("move") {
            self.move_cursor(&mut tokens)
        } else if tokens.keyword("close") {
            let name = tokens.ident().ok_or_else(|| syntax_error(statement))?;
            self.cursors
                .remove(&name)
                .map(|_| QueryResult::default())
                .ok_or_else(|| cursor_not_found(&name))
        } else if tokens.keyword("commit") || tokens.keyword("rollback") {
            self.end_transaction();
            Ok(QueryResult::default())
        } else if tokens.keyword("select") && tokens.keyword("1") && tokens.keyword("from") {
            self.lookup_pg_cursors(&mut tokens)
                .ok_or_else(|| syntax_error(statement))
        } else {
            Err(syntax_error(statement))
        }
    }

    fn declare(&mut self, tokens: &mut Tokens<'_>, params: &[Value]) -> Result<QueryResult, Error> {
        let name = tokens.ident().ok_or_else(|| syntax_error(tokens.rest))?;
        let scroll = if tokens.keyword("no") && tokens.keyword("scroll") {
            Scroll::NoScroll
        } else if tokens.keyword("scroll") {
            Scroll::Scroll
        } else {
            Scroll::Default
        };
        if !tokens.keyword("cursor") {
            return Err(syntax_error(tokens.rest));
        }
        let hold = tokens.keyword("with") && tokens.keyword("hold");
        if !tokens.keyword("for") {
            return Err(syntax_error(tokens.rest));
        }
        let (columns, rows) = generate_series(tokens.rest, params)?;
        if self.cursors.contains_key(&name) {
            return Err(Error::Programming {
                message: format!("cursor \"{name}\" already exists"),
            });
        }
        let cursor = ServerCursor {
            columns,
            rows,
            position: 0,
            scroll,
            hold,
        };
        self.cursors.insert(name, cursor);
        Ok(QueryResult::default())
    }

    fn fetch(&mut self, tokens: &mut Tokens<'_>) -> Result<QueryResult, Error> {
        if !tokens.keyword("forward") {
            return Err(syntax_error(tokens.rest));
        }
        let count = tokens.integer().ok_or_else(|| syntax_error(tokens.rest))?;
        let count = usize::try_from(count).map_err(|_| syntax_error(tokens.rest))?;
        let name = from_cursor(tokens)?;
        let cursor = self
            .cursors
            .get_mut(&name)
            .ok_or_else(|| cursor_not_found(&name))?;
        let len = cursor.rows.len();
        let rows = if count == 0 {
            // Re-fetch the current row, if positioned on one
            if (1..=len).contains(&cursor.position) {
                vec![cursor.rows[cursor.position - 1].clone()]
            } else {
                Vec::new()
            }
        } else {
            let start = cursor.position.min(len);
            let end = (cursor.position + count).min(len);
            let rows = cursor.rows[start..end].to_vec();
            cursor.position = (cursor.position + count).min(len + 1);
            rows
        };
        Ok(QueryResult {
            columns: cursor.columns.clone(),
            row_count: Some(rows.len() as u64),
            rows,
        })
    }

    fn move_cursor(&mut self, tokens: &mut Tokens<'_>) -> Result<QueryResult, Error> {
        let relative = if tokens.keyword("relative") {
            true
        } else if tokens.keyword("absolute") {
            false
        } else {
            return Err(syntax_error(tokens.rest));
        };
        let count = tokens.integer().ok_or_else(|| syntax_error(tokens.rest))?;
        let name = from_cursor(tokens)?;
        let cursor = self
            .cursors
            .get_mut(&name)
            .ok_or_else(|| cursor_not_found(&name))?;
        let len = cursor.rows.len() as i64;
        let current = cursor.position as i64;
        let target = if relative {
            current + count
        } else if count >= 0 {
            count
        } else {
            len + 1 + count
        };
        let target = target.clamp(0, len + 1);
        if target < current && cursor.scroll == Scroll::NoScroll {
            return Err(Error::Operational {
                message: "cursor can only scan forward".to_owned(),
            });
        }
        cursor.position = target as usize;
        Ok(QueryResult::default())
    }

    /// `SELECT 1 FROM pg_catalog.pg_cursors WHERE name = '<name>'`
    fn lookup_pg_cursors(&self, tokens: &mut Tokens<'_>) -> Option<QueryResult> {
        if !(tokens.keyword("pg_catalog.pg_cursors")
            && tokens.keyword("where")
            && tokens.keyword("name")
            && tokens.punct('='))
        {
            return None;
        }
        let name = tokens.literal()?;
        let rows = if self.cursors.contains_key(&name) {
            vec![vec![Value::Int(1)]]
        } else {
            Vec::new()
        };
        Some(QueryResult {
            columns: vec![Column::new("?column?", INT4_OID)],
            row_count: Some(rows.len() as u64),
            rows,
        })
    }

    fn end_transaction(&mut self) {
        let aborted = self.status == TransactionStatus::InError;
        self.cursors.retain(|_, cursor| cursor.hold && !aborted);
        self.status = TransactionStatus::Idle;
    }
}

impl Connection for FakeBackend {
    fn execute(&mut self, statement: &str, params: &[Value]) -> Result<QueryResult, Error> {
        self.commands.push(statement.to_owned());
        let ends_transaction = {
            let mut tokens = Tokens::new(statement);
            tokens.keyword("commit") || tokens.keyword("rollback")
        };
        if !ends_transaction {
            if self.status == TransactionStatus::InError {
                return Err(Error::Operational {
                    message: "current transaction is aborted, commands ignored until end of \
                        transaction block"
                        .to_owned(),
                });
            }
            self.status = TransactionStatus::InTransaction;
        }
        let result = match self.injected_failures.pop_front() {
            Some(error) => Err(error),
            None => self.dispatch(statement, params),
        };
        if result.is_err() && self.status == TransactionStatus::InTransaction {
            self.status = TransactionStatus::InError;
        }
        result
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.status
    }
}

fn generate_series(query: &str, params: &[Value]) -> Result<(Vec<Column>, Vec<Row>), Error> {
    let (from, to, alias) =
        parse_generate_series(query, params).ok_or_else(|| syntax_error(query))?;
    let columns = vec![Column::new(alias, INT4_OID)];
    let rows = (from..=to).map(|value| vec![Value::Int(value)]).collect();
    Ok((columns, rows))
}

fn parse_generate_series(query: &str, params: &[Value]) -> Option<(i64, i64, String)> {
    let mut tokens = Tokens::new(query);
    let mut params = params.iter();
    if !(tokens.keyword("select") && tokens.keyword("generate_series") && tokens.punct('(')) {
        return None;
    }
    let from = bound_integer(&mut tokens, &mut params)?;
    if !tokens.punct(',') {
        return None;
    }
    let to = bound_integer(&mut tokens, &mut params)?;
    if !tokens.punct(')') {
        return None;
    }
    let alias = if tokens.keyword("as") {
        tokens.ident()?
    } else {
        "generate_series".to_owned()
    };
    tokens.rest.trim().is_empty().then_some((from, to, alias))
}

/// Either an integer literal or a `?` placeholder taking the next parameter.
fn bound_integer<'p>(
    tokens: &mut Tokens<'_>,
    params: &mut impl Iterator<Item = &'p Value>,
) -> Option<i64> {
    if tokens.punct('?') {
        match params.next()? {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    } else {
        tokens.integer()
    }
}

fn from_cursor(tokens: &mut Tokens<'_>) -> Result<String, Error> {
    if !tokens.keyword("from") {
        return Err(syntax_error(tokens.rest));
    }
    tokens.ident().ok_or_else(|| syntax_error(tokens.rest))
}

fn syntax_error(near: &str) -> Error {
    Error::Programming {
        message: format!("syntax error at or near \"{near}\""),
    }
}

fn cursor_not_found(name: &str) -> Error {
    Error::CursorNotFound {
        message: format!("cursor \"{name}\" does not exist"),
    }
}

/// Case insensitive scanner over a statement.
struct Tokens<'s> {
    rest: &'s str,
}

impl<'s> Tokens<'s> {
    fn new(statement: &'s str) -> Self {
        Self { rest: statement }
    }

    fn skip_whitespace(&mut self) {
        self.rest = self.rest.trim_start();
    }

    /// Consumes `word`, if it is the next token.
    fn keyword(&mut self, word: &str) -> bool {
        self.skip_whitespace();
        let Some(candidate) = self.rest.get(..word.len()) else {
            return false;
        };
        let at_boundary = self.rest[word.len()..]
            .chars()
            .next()
            .is_none_or(|c| !is_word_char(c));
        if candidate.eq_ignore_ascii_case(word) && at_boundary {
            self.rest = &self.rest[word.len()..];
            true
        } else {
            false
        }
    }

    fn punct(&mut self, c: char) -> bool {
        self.skip_whitespace();
        if let Some(rest) = self.rest.strip_prefix(c) {
            self.rest = rest;
            true
        } else {
            false
        }
    }

    fn integer(&mut self) -> Option<i64> {
        self.skip_whitespace();
        let sign_len = usize::from(self.rest.starts_with('-'));
        let digits = self.rest[sign_len..]
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(self.rest.len() - sign_len);
        if digits == 0 {
            return None;
        }
        let (number, rest) = self.rest.split_at(sign_len + digits);
        self.rest = rest;
        number.parse().ok()
    }

    /// Quoted identifiers keep their case, unquoted ones are folded to lower case.
    fn ident(&mut self) -> Option<String> {
        self.skip_whitespace();
        if self.rest.starts_with('"') {
            self.quoted('"')
        } else {
            let len = self
                .rest
                .find(|c: char| !is_word_char(c))
                .unwrap_or(self.rest.len());
            if len == 0 {
                return None;
            }
            let (word, rest) = self.rest.split_at(len);
            self.rest = rest;
            Some(word.to_lowercase())
        }
    }

    fn literal(&mut self) -> Option<String> {
        self.skip_whitespace();
        if self.rest.starts_with('\'') {
            self.quoted('\'')
        } else {
            None
        }
    }

    /// Text between `quote` characters, with doubled quotes standing for one.
    fn quoted(&mut self, quote: char) -> Option<String> {
        let mut chars = self.rest.char_indices().skip(1).peekable();
        let mut text = String::new();
        while let Some((index, c)) = chars.next() {
            if c == quote {
                if matches!(chars.peek(), Some((_, next)) if *next == quote) {
                    chars.next();
                    text.push(quote);
                } else {
                    self.rest = &self.rest[index + c.len_utf8()..];
                    return Some(text);
                }
            } else {
                text.push(c);
            }
        }
        None
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}
