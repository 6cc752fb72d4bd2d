//! # Statement Parser
//!
//! Recursive descent over the tokenizer, one function per statement form:
//!
//! ```text
//! begin [isolation level (read committed | repeatable read)]
//! commit | abort | show
//! create table T (f1 type1, f2 type2, ...) (idx1, idx2, ...)
//! insert into T values v1 v2 ...
//! select *|f1,f2 from T [where ...]
//! update T set f = v [where ...]
//! delete from T [where ...]
//! where: f <op> v [and|or f <op> v]      op: < = >
//! ```
//!
//! Anything left over after a complete statement is an error.

use eyre::{bail, Result};

use super::ast::*;
use super::tokenizer::{keyword, Keyword, Token, Tokenizer};
use crate::error::EngineError;
use crate::vm::IsolationLevel;

pub fn parse(input: &str) -> Result<Statement> {
    let mut tk = Tokenizer::new(input);

    let statement = match expect_any_keyword(&mut tk)? {
        Keyword::Begin => parse_begin(&mut tk)?,
        Keyword::Commit => Statement::Commit,
        Keyword::Abort => Statement::Abort,
        Keyword::Show => Statement::Show,
        Keyword::Create => parse_create(&mut tk)?,
        Keyword::Insert => parse_insert(&mut tk)?,
        Keyword::Select => parse_select(&mut tk)?,
        Keyword::Update => parse_update(&mut tk)?,
        Keyword::Delete => parse_delete(&mut tk)?,
        _ => bail!(invalid(&tk)),
    };

    match tk.peek()? {
        Token::Eof => Ok(statement),
        _ => bail!(invalid(&tk)),
    }
}

fn invalid(tk: &Tokenizer) -> eyre::Report {
    eyre::Report::new(EngineError::InvalidCommand)
        .wrap_err(format!("invalid statement: {}", tk.annotated()))
}

fn expect_any_keyword(tk: &mut Tokenizer) -> Result<Keyword> {
    match tk.next()? {
        Token::Word(word) => keyword(&word).ok_or_else(|| invalid(tk)),
        _ => Err(invalid(tk)),
    }
}

fn eat_keyword(tk: &mut Tokenizer, expected: Keyword) -> Result<()> {
    match tk.next()? {
        Token::Word(word) if keyword(&word) == Some(expected) => Ok(()),
        _ => Err(invalid(tk)),
    }
}

fn peek_keyword(tk: &mut Tokenizer) -> Result<Option<Keyword>> {
    Ok(match tk.peek()? {
        Token::Word(word) => keyword(&word),
        _ => None,
    })
}

/// An identifier: a bare word starting with a letter that is not a keyword.
fn expect_name(tk: &mut Tokenizer) -> Result<String> {
    match tk.next()? {
        Token::Word(word)
            if keyword(&word).is_none()
                && word.starts_with(|c: char| c.is_ascii_alphabetic()) =>
        {
            Ok(word)
        }
        _ => Err(invalid(tk)),
    }
}

/// A value token: bare word or quoted literal.
fn expect_value(tk: &mut Tokenizer) -> Result<String> {
    match tk.next()? {
        Token::Word(word) => Ok(word),
        Token::Literal(literal) => Ok(literal),
        _ => Err(invalid(tk)),
    }
}

fn eat_symbol(tk: &mut Tokenizer, expected: char) -> Result<()> {
    match tk.next()? {
        Token::Symbol(symbol) if symbol == expected => Ok(()),
        _ => Err(invalid(tk)),
    }
}

fn skip_comma(tk: &mut Tokenizer) -> Result<()> {
    if tk.peek()? == Token::Symbol(',') {
        tk.pop();
    }
    Ok(())
}

fn parse_begin(tk: &mut Tokenizer) -> Result<Statement> {
    if tk.peek()? == Token::Eof {
        return Ok(Statement::Begin(Begin {
            level: IsolationLevel::ReadCommitted,
        }));
    }

    eat_keyword(tk, Keyword::Isolation)?;
    eat_keyword(tk, Keyword::Level)?;
    let level = match peek_keyword(tk)? {
        Some(Keyword::Read) => {
            tk.pop();
            eat_keyword(tk, Keyword::Committed)?;
            IsolationLevel::ReadCommitted
        }
        Some(Keyword::Repeatable) => {
            tk.pop();
            eat_keyword(tk, Keyword::Read)?;
            IsolationLevel::RepeatableRead
        }
        _ => bail!(invalid(tk)),
    };
    Ok(Statement::Begin(Begin { level }))
}

fn parse_create(tk: &mut Tokenizer) -> Result<Statement> {
    eat_keyword(tk, Keyword::Table)?;
    let table = expect_name(tk)?;

    eat_symbol(tk, '(')?;
    let mut fields = Vec::new();
    loop {
        if tk.peek()? == Token::Symbol(')') {
            tk.pop();
            break;
        }
        let name = expect_name(tk)?;
        let ftype = expect_name(tk)?;
        fields.push((name, ftype));
        skip_comma(tk)?;
    }
    if fields.is_empty() {
        bail!(invalid(tk));
    }

    // Index list: mandatory, may be empty.
    eat_symbol(tk, '(')?;
    let mut indexed = Vec::new();
    loop {
        if tk.peek()? == Token::Symbol(')') {
            tk.pop();
            break;
        }
        indexed.push(expect_name(tk)?);
        skip_comma(tk)?;
    }

    Ok(Statement::Create(Create {
        table,
        fields,
        indexed,
    }))
}

fn parse_insert(tk: &mut Tokenizer) -> Result<Statement> {
    eat_keyword(tk, Keyword::Into)?;
    let table = expect_name(tk)?;
    eat_keyword(tk, Keyword::Values)?;

    let mut values = Vec::new();
    loop {
        skip_comma(tk)?;
        if tk.peek()? == Token::Eof {
            break;
        }
        values.push(expect_value(tk)?);
    }
    if values.is_empty() {
        bail!(invalid(tk));
    }

    Ok(Statement::Insert(Insert { table, values }))
}

fn parse_select(tk: &mut Tokenizer) -> Result<Statement> {
    let mut fields = Vec::new();
    if tk.peek()? == Token::Symbol('*') {
        tk.pop();
        fields.push("*".to_owned());
    } else {
        loop {
            fields.push(expect_name(tk)?);
            if tk.peek()? == Token::Symbol(',') {
                tk.pop();
            } else {
                break;
            }
        }
    }

    eat_keyword(tk, Keyword::From)?;
    let table = expect_name(tk)?;
    let where_clause = parse_optional_where(tk)?;

    Ok(Statement::Select(Select {
        fields,
        table,
        where_clause,
    }))
}

fn parse_update(tk: &mut Tokenizer) -> Result<Statement> {
    let table = expect_name(tk)?;
    eat_keyword(tk, Keyword::Set)?;
    let field = expect_name(tk)?;
    eat_symbol(tk, '=')?;
    let value = expect_value(tk)?;
    let where_clause = parse_optional_where(tk)?;

    Ok(Statement::Update(Update {
        table,
        field,
        value,
        where_clause,
    }))
}

fn parse_delete(tk: &mut Tokenizer) -> Result<Statement> {
    eat_keyword(tk, Keyword::From)?;
    let table = expect_name(tk)?;
    let where_clause = parse_optional_where(tk)?;

    Ok(Statement::Delete(Delete {
        table,
        where_clause,
    }))
}

fn parse_optional_where(tk: &mut Tokenizer) -> Result<Option<Where>> {
    if tk.peek()? == Token::Eof {
        return Ok(None);
    }
    eat_keyword(tk, Keyword::Where)?;

    let first = parse_condition(tk)?;
    let rest = match peek_keyword(tk)? {
        Some(Keyword::And) => {
            tk.pop();
            Some((LogicOp::And, parse_condition(tk)?))
        }
        Some(Keyword::Or) => {
            tk.pop();
            Some((LogicOp::Or, parse_condition(tk)?))
        }
        _ => None,
    };

    Ok(Some(Where { first, rest }))
}

fn parse_condition(tk: &mut Tokenizer) -> Result<Condition> {
    let field = expect_name(tk)?;
    let op = match tk.next()? {
        Token::Symbol('<') => CompareOp::Lt,
        Token::Symbol('=') => CompareOp::Eq,
        Token::Symbol('>') => CompareOp::Gt,
        _ => bail!(invalid(tk)),
    };
    let value = expect_value(tk)?;
    Ok(Condition { field, op, value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_defaults_to_read_committed() {
        assert_eq!(
            parse("begin").unwrap(),
            Statement::Begin(Begin {
                level: IsolationLevel::ReadCommitted
            })
        );
    }

    #[test]
    fn begin_with_isolation_levels() {
        assert_eq!(
            parse("begin isolation level read committed").unwrap(),
            Statement::Begin(Begin {
                level: IsolationLevel::ReadCommitted
            })
        );
        assert_eq!(
            parse("begin isolation level repeatable read").unwrap(),
            Statement::Begin(Begin {
                level: IsolationLevel::RepeatableRead
            })
        );
    }

    #[test]
    fn commit_abort_show() {
        assert_eq!(parse("commit").unwrap(), Statement::Commit);
        assert_eq!(parse("abort").unwrap(), Statement::Abort);
        assert_eq!(parse("show").unwrap(), Statement::Show);
    }

    #[test]
    fn create_with_fields_and_index() {
        let parsed = parse("create table users (id int32, name string) (id)").unwrap();
        assert_eq!(
            parsed,
            Statement::Create(Create {
                table: "users".into(),
                fields: vec![
                    ("id".into(), "int32".into()),
                    ("name".into(), "string".into())
                ],
                indexed: vec!["id".into()],
            })
        );
    }

    #[test]
    fn create_allows_empty_index_list() {
        let parsed = parse("create table logs (line string) ()").unwrap();
        match parsed {
            Statement::Create(create) => assert!(create.indexed.is_empty()),
            other => panic!("expected create, got {:?}", other),
        }
    }

    #[test]
    fn create_requires_fields() {
        assert!(parse("create table empty () ()").is_err());
    }

    #[test]
    fn insert_collects_values() {
        let parsed = parse("insert into t values 1 \"alice\" 30").unwrap();
        assert_eq!(
            parsed,
            Statement::Insert(Insert {
                table: "t".into(),
                values: vec!["1".into(), "alice".into(), "30".into()],
            })
        );
    }

    #[test]
    fn insert_tolerates_commas() {
        let parsed = parse("insert into t values 1, 2, 3").unwrap();
        assert_eq!(
            parsed,
            Statement::Insert(Insert {
                table: "t".into(),
                values: vec!["1".into(), "2".into(), "3".into()],
            })
        );
    }

    #[test]
    fn select_star_and_projection() {
        let parsed = parse("select * from t").unwrap();
        assert_eq!(
            parsed,
            Statement::Select(Select {
                fields: vec!["*".into()],
                table: "t".into(),
                where_clause: None,
            })
        );

        let parsed = parse("select id, name from t").unwrap();
        match parsed {
            Statement::Select(select) => {
                assert_eq!(select.fields, vec!["id".to_owned(), "name".to_owned()])
            }
            other => panic!("expected select, got {:?}", other),
        }
    }

    #[test]
    fn where_with_two_conditions() {
        let parsed = parse("select * from t where id > 1 and id < 4").unwrap();
        match parsed {
            Statement::Select(select) => {
                let w = select.where_clause.unwrap();
                assert_eq!(
                    w.first,
                    Condition {
                        field: "id".into(),
                        op: CompareOp::Gt,
                        value: "1".into()
                    }
                );
                let (op, second) = w.rest.unwrap();
                assert_eq!(op, LogicOp::And);
                assert_eq!(second.op, CompareOp::Lt);
            }
            other => panic!("expected select, got {:?}", other),
        }
    }

    #[test]
    fn update_and_delete() {
        let parsed = parse("update t set name = \"bob\" where id = 1").unwrap();
        match parsed {
            Statement::Update(update) => {
                assert_eq!(update.field, "name");
                assert_eq!(update.value, "bob");
                assert!(update.where_clause.is_some());
            }
            other => panic!("expected update, got {:?}", other),
        }

        let parsed = parse("delete from t where id = 1").unwrap();
        match parsed {
            Statement::Delete(delete) => assert!(delete.where_clause.is_some()),
            other => panic!("expected delete, got {:?}", other),
        }
    }

    #[test]
    fn trailing_tokens_are_rejected() {
        assert!(parse("commit now").is_err());
        assert!(parse("show tables").is_err());
    }

    #[test]
    fn negative_values_parse() {
        let parsed = parse("insert into t values -5").unwrap();
        assert_eq!(
            parsed,
            Statement::Insert(Insert {
                table: "t".into(),
                values: vec!["-5".into()],
            })
        );
    }

    #[test]
    fn garbage_statements_error() {
        assert!(parse("frobnicate the database").is_err());
        assert!(parse("").is_err());
        assert!(parse("select from t").is_err());
    }
}
