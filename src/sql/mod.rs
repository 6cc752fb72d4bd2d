//! # SQL Subset
//!
//! Tokenizer, statement records and the recursive-descent parser for the
//! engine's small DDL/DML surface. The executor in the schema layer
//! consumes [`ast::Statement`] values; nothing here touches storage.

pub mod ast;
pub mod parser;
pub mod tokenizer;

pub use ast::Statement;
pub use parser::parse;
