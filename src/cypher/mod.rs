//! # Cypher Language
//!
//! A Cypher front end over the pattern language. Pure functions: no I/O,
//! no state, no storage dependency.

pub mod lexer;
pub mod parser;

use tracing::trace;

use crate::model::PropertyMap;
use crate::pattern::{QueryFrontend, Statement};
use crate::Result;

/// Parse one Cypher statement.
pub fn parse(query: &str) -> Result<Statement> {
    let tokens = lexer::tokenize(query)?;
    trace!(tokens = tokens.len(), "cypher tokenized");
    parser::parse_statement(&tokens)
}

/// Parse semicolon-separated Cypher statements.
pub fn parse_script(script: &str) -> Result<Vec<Statement>> {
    let tokens = lexer::tokenize(script)?;
    parser::parse_script(&tokens)
}

/// The Cypher [`QueryFrontend`]. Parameters stay as `$name` references
/// and are bound at execution.
#[derive(Debug, Clone, Copy, Default)]
pub struct CypherFrontend;

impl QueryFrontend for CypherFrontend {
    fn name(&self) -> &str {
        "cypher"
    }

    fn translate(&self, text: &str, _params: &PropertyMap) -> Result<Statement> {
        parse(text)
    }
}
