//! # Statement Tokenizer
//!
//! Splits a statement into words, quoted literals and single-character
//! symbols, with one-token lookahead (`peek` / `pop`). Keywords are
//! recognized case-insensitively through a perfect-hash map; everything
//! else that looks like a word (identifiers, numbers) comes out as
//! [`Token::Word`].
//!
//! On an invalid byte the error message carries the statement with a
//! `<< ` marker spliced in at the offending position.

use eyre::{bail, Result};
use phf::phf_map;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Begin,
    Isolation,
    Level,
    Read,
    Committed,
    Repeatable,
    Commit,
    Abort,
    Show,
    Create,
    Table,
    Insert,
    Into,
    Values,
    Select,
    From,
    Where,
    Update,
    Set,
    Delete,
    And,
    Or,
}

static KEYWORDS: phf::Map<&'static str, Keyword> = phf_map! {
    "begin" => Keyword::Begin,
    "isolation" => Keyword::Isolation,
    "level" => Keyword::Level,
    "read" => Keyword::Read,
    "committed" => Keyword::Committed,
    "repeatable" => Keyword::Repeatable,
    "commit" => Keyword::Commit,
    "abort" => Keyword::Abort,
    "show" => Keyword::Show,
    "create" => Keyword::Create,
    "table" => Keyword::Table,
    "insert" => Keyword::Insert,
    "into" => Keyword::Into,
    "values" => Keyword::Values,
    "select" => Keyword::Select,
    "from" => Keyword::From,
    "where" => Keyword::Where,
    "update" => Keyword::Update,
    "set" => Keyword::Set,
    "delete" => Keyword::Delete,
    "and" => Keyword::And,
    "or" => Keyword::Or,
};

pub fn keyword(word: &str) -> Option<Keyword> {
    KEYWORDS.get(word.to_ascii_lowercase().as_str()).copied()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Bare word: identifier, number, or keyword (resolved by the parser).
    Word(String),
    /// Quoted string literal, quotes stripped.
    Literal(String),
    Symbol(char),
    Eof,
}

pub struct Tokenizer<'a> {
    input: &'a [u8],
    pos: usize,
    current: Option<Token>,
}

fn is_symbol(b: u8) -> bool {
    matches!(b, b'>' | b'<' | b'=' | b'*' | b',' | b'(' | b')')
}

fn is_blank(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r')
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

impl<'a> Tokenizer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
            current: None,
        }
    }

    /// The statement with a `<< ` marker at the current position, for error
    /// messages.
    pub fn annotated(&self) -> String {
        let (head, tail) = self.input.split_at(self.pos.min(self.input.len()));
        format!(
            "{}<< {}",
            String::from_utf8_lossy(head),
            String::from_utf8_lossy(tail)
        )
    }

    pub fn peek(&mut self) -> Result<Token> {
        if self.current.is_none() {
            self.current = Some(self.scan()?);
        }
        Ok(self.current.clone().unwrap())
    }

    pub fn pop(&mut self) {
        self.current = None;
    }

    pub fn next(&mut self) -> Result<Token> {
        let token = self.peek()?;
        self.pop();
        Ok(token)
    }

    fn scan(&mut self) -> Result<Token> {
        while self.pos < self.input.len() && is_blank(self.input[self.pos]) {
            self.pos += 1;
        }
        let Some(&b) = self.input.get(self.pos) else {
            return Ok(Token::Eof);
        };

        if is_symbol(b) {
            self.pos += 1;
            return Ok(Token::Symbol(b as char));
        }
        if b == b'"' || b == b'\'' {
            return self.scan_quoted(b);
        }
        if is_word_byte(b) {
            let start = self.pos;
            while self.pos < self.input.len() && is_word_byte(self.input[self.pos]) {
                self.pos += 1;
            }
            let word = std::str::from_utf8(&self.input[start..self.pos])
                .map_err(|_| EngineError::InvalidCommand)?;
            return Ok(Token::Word(word.to_owned()));
        }

        bail!(eyre::Report::new(EngineError::InvalidCommand)
            .wrap_err(format!("invalid statement: {}", self.annotated())))
    }

    fn scan_quoted(&mut self, quote: u8) -> Result<Token> {
        self.pos += 1;
        let start = self.pos;
        while self.pos < self.input.len() && self.input[self.pos] != quote {
            self.pos += 1;
        }
        if self.pos == self.input.len() {
            bail!(eyre::Report::new(EngineError::InvalidCommand)
                .wrap_err(format!("unterminated string: {}", self.annotated())));
        }
        let literal = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| EngineError::InvalidCommand)?
            .to_owned();
        self.pos += 1;
        Ok(Token::Literal(literal))
    }
}
