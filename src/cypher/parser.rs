//! Cypher recursive descent parser.
//!
//! Parses token streams into [`Statement`]s. Supports:
//! - MATCH with comma-joined patterns, variable-length hops and WHERE
//! - OPTIONAL MATCH [WHERE], UNWIND expr AS var
//! - WITH [DISTINCT] ... [ORDER BY] [SKIP] [LIMIT] [WHERE] between parts
//! - CREATE, MERGE with ON CREATE / ON MATCH SET, SET, REMOVE, [DETACH] DELETE
//! - RETURN [DISTINCT], ORDER BY, SKIP, LIMIT
//! - Full expression parsing with precedence
//!
//! Within a part, MATCH clauses come before OPTIONAL MATCH and UNWIND.
//! Write clauses belong to the last part and must appear in the order they
//! execute: CREATE, MERGE, SET, REMOVE, DELETE.

use crate::model::Value;
use crate::pattern::*;
use crate::{CompileError, Error, Result};

use super::lexer::{Token, TokenKind};

/// Parser state: a token slice with a cursor.
struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> Parser<'t> {
    fn new(tokens: &'t [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> &'t Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn advance(&mut self) -> &'t Token {
        let tok = self.peek();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, kind: TokenKind) -> Result<&'t Token> {
        let tok = self.peek();
        if tok.kind == kind {
            Ok(self.advance())
        } else {
            Err(self.error(format!("expected {kind:?}, got {:?} '{}'", tok.kind, tok.text)))
        }
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn at_statement_end(&self) -> bool {
        self.at(TokenKind::Eof) || self.at(TokenKind::Semicolon)
    }

    fn error(&self, message: String) -> Error {
        CompileError::Syntax { position: self.peek().span.start, message }.into()
    }

    /// A variable name.
    fn identifier(&mut self) -> Result<String> {
        Ok(self.expect(TokenKind::Identifier)?.text.clone())
    }

    /// A label, type, property key or map key; keywords are allowed.
    fn symbolic_name(&mut self) -> Result<String> {
        let tok = self.peek();
        if tok.kind == TokenKind::Identifier || tok.kind.is_keyword() {
            Ok(self.advance().text.clone())
        } else {
            Err(self.error(format!("expected a name, got '{}'", tok.text)))
        }
    }

    fn unsupported(&self, what: &str) -> Error {
        CompileError::Unsupported(format!("{what} (at position {})", self.peek().span.start)).into()
    }
}

/// Parse exactly one statement; a trailing semicolon is allowed.
pub fn parse_statement(tokens: &[Token]) -> Result<Statement> {
    let mut p = Parser::new(tokens);
    let stmt = parse_single(&mut p)?;
    p.eat(TokenKind::Semicolon);
    if !p.at(TokenKind::Eof) {
        return Err(p.error(format!("unexpected '{}' after statement", p.peek().text)));
    }
    Ok(stmt)
}

/// Parse semicolon-separated statements. Empty statements are skipped.
pub fn parse_script(tokens: &[Token]) -> Result<Vec<Statement>> {
    let mut p = Parser::new(tokens);
    let mut statements = Vec::new();
    loop {
        while p.eat(TokenKind::Semicolon) {}
        if p.at(TokenKind::Eof) {
            break;
        }
        statements.push(parse_single(&mut p)?);
        if !p.at(TokenKind::Eof) {
            p.expect(TokenKind::Semicolon)?;
        }
    }
    Ok(statements)
}

/// Write clauses by execution rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum WriteClause {
    Create,
    Merge,
    Set,
    Remove,
    Delete,
}

fn parse_single(p: &mut Parser) -> Result<Statement> {
    let mut stmt = Statement::new();

    loop {
        stmt = parse_reading(p, stmt)?;
        if !p.eat(TokenKind::With) {
            break;
        }
        let with = parse_with(p)?;
        stmt = stmt.with(with);
    }

    let mut last: Option<WriteClause> = None;
    loop {
        let clause = match p.peek_kind() {
            TokenKind::Create => WriteClause::Create,
            TokenKind::Merge => WriteClause::Merge,
            TokenKind::Set => WriteClause::Set,
            TokenKind::Remove => WriteClause::Remove,
            TokenKind::Delete | TokenKind::Detach => WriteClause::Delete,
            _ => break,
        };
        if let Some(prev) = last {
            let repeats_single = prev == clause && matches!(clause, WriteClause::Merge | WriteClause::Delete);
            if prev > clause || repeats_single {
                return Err(p.unsupported(&format!("{clause:?} after {prev:?}")));
            }
        }
        last = Some(clause);
        match clause {
            WriteClause::Create => {
                p.advance();
                stmt.create.extend(parse_pattern_list(p)?);
            }
            WriteClause::Merge => {
                p.advance();
                stmt.merge = Some(parse_merge(p)?);
            }
            WriteClause::Set => {
                p.advance();
                stmt.set.extend(parse_set_items(p)?);
            }
            WriteClause::Remove => {
                p.advance();
                stmt.remove.extend(parse_remove_items(p)?);
            }
            WriteClause::Delete => {
                let detach = p.eat(TokenKind::Detach);
                p.expect(TokenKind::Delete)?;
                let variables = parse_variable_list(p)?;
                stmt.delete = Some(DeleteClause { variables, detach });
            }
        }
    }

    if p.eat(TokenKind::Return) {
        stmt.return_clause = Some(parse_return_clause(p)?);
        if p.eat(TokenKind::Order) {
            p.expect(TokenKind::By)?;
            stmt.order_by = parse_order_by(p)?;
        }
        if p.eat(TokenKind::Skip) {
            stmt.skip = Some(parse_expr(p)?);
        }
        if p.eat(TokenKind::Limit) {
            stmt.limit = Some(parse_expr(p)?);
        }
    }

    if !p.at_statement_end() {
        return Err(match p.peek_kind() {
            TokenKind::With => p.unsupported("WITH after a write clause"),
            TokenKind::Unwind => p.unsupported("UNWIND after a write clause"),
            TokenKind::Call => p.unsupported("CALL"),
            TokenKind::Optional => p.unsupported("OPTIONAL MATCH after a write clause"),
            TokenKind::Match => p.unsupported("MATCH after a write clause"),
            _ => p.error(format!("unexpected '{}'", p.peek().text)),
        });
    }
    if stmt == Statement::new() {
        return Err(p.error("empty statement".into()));
    }
    if !stmt.parts.is_empty() && stmt.return_clause.is_none() && !stmt.has_mutations() {
        return Err(p.error("a statement cannot end with WITH or a reading clause".into()));
    }
    Ok(stmt)
}

/// MATCH [WHERE] clauses, then OPTIONAL MATCH and UNWIND in any order.
fn parse_reading(p: &mut Parser, mut stmt: Statement) -> Result<Statement> {
    loop {
        match p.peek_kind() {
            TokenKind::Match => {
                if !stmt.reading.is_empty() {
                    return Err(p.unsupported("MATCH after OPTIONAL MATCH or UNWIND without a WITH between"));
                }
                p.advance();
                stmt.matches.extend(parse_pattern_list(p)?);
                if p.eat(TokenKind::Where) {
                    let predicate = parse_expr(p)?;
                    stmt = stmt.filter(predicate);
                }
            }
            TokenKind::Optional => {
                p.advance();
                p.expect(TokenKind::Match)?;
                let patterns = parse_pattern_list(p)?;
                let predicate = if p.eat(TokenKind::Where) { Some(parse_expr(p)?) } else { None };
                stmt = stmt.optional_match(patterns, predicate);
            }
            TokenKind::Unwind => {
                p.advance();
                let expr = parse_expr(p)?;
                p.expect(TokenKind::As)?;
                let variable = p.identifier()?;
                stmt = stmt.unwind(expr, variable);
            }
            _ => return Ok(stmt),
        }
    }
}

/// After `WITH`.
fn parse_with(p: &mut Parser) -> Result<WithClause> {
    let mut with = WithClause { projection: parse_return_clause(p)?, ..WithClause::default() };
    if p.eat(TokenKind::Order) {
        p.expect(TokenKind::By)?;
        with.order_by = parse_order_by(p)?;
    }
    if p.eat(TokenKind::Skip) {
        with.skip = Some(parse_expr(p)?);
    }
    if p.eat(TokenKind::Limit) {
        with.limit = Some(parse_expr(p)?);
    }
    if p.eat(TokenKind::Where) {
        with.where_clause = Some(parse_expr(p)?);
    }
    Ok(with)
}

fn parse_merge(p: &mut Parser) -> Result<MergeClause> {
    let pattern = parse_pattern(p)?;
    let mut on_create = Vec::new();
    let mut on_match = Vec::new();
    while p.eat(TokenKind::On) {
        if p.eat(TokenKind::Create) {
            p.expect(TokenKind::Set)?;
            on_create.extend(parse_set_items(p)?);
        } else if p.eat(TokenKind::Match) {
            p.expect(TokenKind::Set)?;
            on_match.extend(parse_set_items(p)?);
        } else {
            return Err(p.error("expected CREATE or MATCH after ON".into()));
        }
    }
    Ok(MergeClause { pattern, on_create, on_match })
}

// ============================================================================
// Patterns
// ============================================================================

fn parse_pattern_list(p: &mut Parser) -> Result<Vec<Pattern>> {
    let mut patterns = vec![parse_pattern(p)?];
    while p.eat(TokenKind::Comma) {
        patterns.push(parse_pattern(p)?);
    }
    Ok(patterns)
}

fn parse_pattern(p: &mut Parser) -> Result<Pattern> {
    let mut pattern = Pattern::start(parse_node_pattern(p)?);
    while p.at(TokenKind::Dash) || p.at(TokenKind::LeftArrow) {
        let edge = parse_edge_pattern(p)?;
        let node = parse_node_pattern(p)?;
        pattern = pattern.then(edge, node);
    }
    Ok(pattern)
}

fn parse_node_pattern(p: &mut Parser) -> Result<NodePattern> {
    p.expect(TokenKind::LParen)?;
    let mut node = NodePattern::anonymous();
    if p.at(TokenKind::Identifier) {
        node.variable = Some(p.identifier()?);
    }
    while p.eat(TokenKind::Colon) {
        node.labels.push(p.symbolic_name()?);
    }
    if p.at(TokenKind::LBrace) {
        node.properties = parse_map_literal(p)?;
    }
    p.expect(TokenKind::RParen)?;
    Ok(node)
}

/// `-[...]->`, `<-[...]-` or `-[...]-`.
fn parse_edge_pattern(p: &mut Parser) -> Result<EdgePattern> {
    let left_arrow = p.eat(TokenKind::LeftArrow);
    if !left_arrow {
        p.expect(TokenKind::Dash)?;
    }

    let mut edge = EdgePattern::undirected();
    if p.eat(TokenKind::LBracket) {
        if p.at(TokenKind::Identifier) {
            edge.variable = Some(p.identifier()?);
        }
        if p.eat(TokenKind::Colon) {
            edge.types.push(p.symbolic_name()?);
            while p.eat(TokenKind::Pipe) {
                p.eat(TokenKind::Colon);
                edge.types.push(p.symbolic_name()?);
            }
        }
        if p.eat(TokenKind::Star) {
            edge.var_length = Some(parse_var_length(p)?);
        }
        if p.at(TokenKind::LBrace) {
            edge.properties = parse_map_literal(p)?;
        }
        p.expect(TokenKind::RBracket)?;
    }

    let right_arrow = if p.eat(TokenKind::Arrow) {
        true
    } else {
        p.expect(TokenKind::Dash)?;
        false
    };
    edge.direction = match (left_arrow, right_arrow) {
        (true, false) => PatternDirection::Left,
        (false, true) => PatternDirection::Right,
        (false, false) => PatternDirection::Both,
        (true, true) => return Err(p.error("edge cannot point both ways".into())),
    };
    Ok(edge)
}

/// After `*`: `n`, `min..max`, `min..`, `..max` or nothing.
fn parse_var_length(p: &mut Parser) -> Result<VarLength> {
    let min = if p.at(TokenKind::Integer) { Some(parse_bound(p)?) } else { None };
    if p.eat(TokenKind::DotDot) {
        let max = if p.at(TokenKind::Integer) { Some(parse_bound(p)?) } else { None };
        Ok(VarLength { min, max })
    } else {
        Ok(VarLength { min, max: min })
    }
}

fn parse_bound(p: &mut Parser) -> Result<usize> {
    let tok = p.advance();
    tok.text.parse::<usize>().map_err(|_| {
        CompileError::Syntax { position: tok.span.start, message: format!("invalid hop bound '{}'", tok.text) }.into()
    })
}

// ============================================================================
// RETURN / ORDER BY / SET / REMOVE
// ============================================================================

fn parse_return_clause(p: &mut Parser) -> Result<ReturnClause> {
    let distinct = p.eat(TokenKind::Distinct);
    let mut items = Vec::new();
    if p.eat(TokenKind::Star) {
        items.push(ReturnItem::new(Expr::Star));
    } else {
        items.push(parse_return_item(p)?);
    }
    while p.eat(TokenKind::Comma) {
        items.push(parse_return_item(p)?);
    }
    Ok(ReturnClause { distinct, items })
}

fn parse_return_item(p: &mut Parser) -> Result<ReturnItem> {
    let expr = parse_expr(p)?;
    let alias = if p.eat(TokenKind::As) { Some(p.symbolic_name()?) } else { None };
    Ok(ReturnItem { expr, alias })
}

fn parse_order_by(p: &mut Parser) -> Result<Vec<OrderExpr>> {
    let mut keys = vec![parse_order_expr(p)?];
    while p.eat(TokenKind::Comma) {
        keys.push(parse_order_expr(p)?);
    }
    Ok(keys)
}

fn parse_order_expr(p: &mut Parser) -> Result<OrderExpr> {
    let expr = parse_expr(p)?;
    let ascending = if p.eat(TokenKind::Desc) {
        false
    } else {
        p.eat(TokenKind::Asc);
        true
    };
    let nulls = if p.eat(TokenKind::Nulls) {
        if p.eat(TokenKind::First) {
            NullsOrder::First
        } else {
            p.expect(TokenKind::Last)?;
            NullsOrder::Last
        }
    } else {
        NullsOrder::Default
    };
    Ok(OrderExpr { expr, ascending, nulls })
}

fn parse_set_items(p: &mut Parser) -> Result<Vec<SetItem>> {
    let mut items = vec![parse_set_item(p)?];
    while p.eat(TokenKind::Comma) {
        items.push(parse_set_item(p)?);
    }
    Ok(items)
}

fn parse_set_item(p: &mut Parser) -> Result<SetItem> {
    let variable = p.identifier()?;
    if p.eat(TokenKind::Dot) {
        let key = p.symbolic_name()?;
        p.expect(TokenKind::Eq)?;
        let value = parse_expr(p)?;
        Ok(SetItem::Property { variable, key, value })
    } else if p.eat(TokenKind::PlusEq) {
        let properties = parse_map_literal(p)?;
        Ok(SetItem::MergeProperties { variable, properties })
    } else if p.at(TokenKind::Eq) {
        Err(p.unsupported("SET n = {map}, use SET n += {map}"))
    } else if p.eat(TokenKind::Colon) {
        let label = p.symbolic_name()?;
        Ok(SetItem::Label { variable, label })
    } else {
        Err(p.error("expected '.', '+=' or ':' after SET variable".into()))
    }
}

fn parse_remove_items(p: &mut Parser) -> Result<Vec<RemoveItem>> {
    let mut items = vec![parse_remove_item(p)?];
    while p.eat(TokenKind::Comma) {
        items.push(parse_remove_item(p)?);
    }
    Ok(items)
}

fn parse_remove_item(p: &mut Parser) -> Result<RemoveItem> {
    let variable = p.identifier()?;
    if p.eat(TokenKind::Dot) {
        let key = p.symbolic_name()?;
        Ok(RemoveItem::Property { variable, key })
    } else if p.eat(TokenKind::Colon) {
        let label = p.symbolic_name()?;
        Ok(RemoveItem::Label { variable, label })
    } else {
        Err(p.error("expected '.' or ':' after REMOVE variable".into()))
    }
}

fn parse_variable_list(p: &mut Parser) -> Result<Vec<String>> {
    let mut vars = vec![p.identifier()?];
    while p.eat(TokenKind::Comma) {
        vars.push(p.identifier()?);
    }
    Ok(vars)
}

// ============================================================================
// Expression parsing (precedence climbing)
// ============================================================================

fn parse_expr(p: &mut Parser) -> Result<Expr> {
    parse_or_expr(p)
}

fn parse_or_expr(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_xor_expr(p)?;
    while p.eat(TokenKind::Or) {
        left = left.or(parse_xor_expr(p)?);
    }
    Ok(left)
}

fn parse_xor_expr(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_and_expr(p)?;
    while p.eat(TokenKind::Xor) {
        left = left.binary(BinaryOp::Xor, parse_and_expr(p)?);
    }
    Ok(left)
}

fn parse_and_expr(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_not_expr(p)?;
    while p.eat(TokenKind::And) {
        left = left.and(parse_not_expr(p)?);
    }
    Ok(left)
}

fn parse_not_expr(p: &mut Parser) -> Result<Expr> {
    if p.eat(TokenKind::Not) {
        Ok(parse_not_expr(p)?.not())
    } else {
        parse_comparison(p)
    }
}

fn parse_comparison(p: &mut Parser) -> Result<Expr> {
    let left = parse_string_op(p)?;

    if p.eat(TokenKind::Is) {
        let negated = p.eat(TokenKind::Not);
        p.expect(TokenKind::Null)?;
        return Ok(Expr::IsNull { expr: Box::new(left), negated });
    }

    if p.eat(TokenKind::In) {
        let list = parse_addition(p)?;
        return Ok(Expr::In { expr: Box::new(left), list: Box::new(list) });
    }

    let op = match p.peek_kind() {
        TokenKind::Eq => BinaryOp::Eq,
        TokenKind::Neq => BinaryOp::Neq,
        TokenKind::Lt => BinaryOp::Lt,
        TokenKind::Lte => BinaryOp::Lte,
        TokenKind::Gt => BinaryOp::Gt,
        TokenKind::Gte => BinaryOp::Gte,
        _ => return Ok(left),
    };
    p.advance();
    let right = parse_string_op(p)?;
    Ok(left.binary(op, right))
}

fn parse_string_op(p: &mut Parser) -> Result<Expr> {
    let left = parse_addition(p)?;
    let op = match p.peek_kind() {
        TokenKind::Starts => {
            p.advance();
            p.expect(TokenKind::With)?;
            StringOp::StartsWith
        }
        TokenKind::Ends => {
            p.advance();
            p.expect(TokenKind::With)?;
            StringOp::EndsWith
        }
        TokenKind::Contains => {
            p.advance();
            StringOp::Contains
        }
        _ => return Ok(left),
    };
    let right = parse_addition(p)?;
    Ok(Expr::StringOp { left: Box::new(left), op, right: Box::new(right) })
}

fn parse_addition(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_multiplication(p)?;
    loop {
        let op = match p.peek_kind() {
            TokenKind::Plus => BinaryOp::Add,
            TokenKind::Dash => BinaryOp::Sub,
            _ => break,
        };
        p.advance();
        left = left.binary(op, parse_multiplication(p)?);
    }
    Ok(left)
}

fn parse_multiplication(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_power(p)?;
    loop {
        let op = match p.peek_kind() {
            TokenKind::Star => BinaryOp::Mul,
            TokenKind::Slash => BinaryOp::Div,
            TokenKind::Percent => BinaryOp::Mod,
            _ => break,
        };
        p.advance();
        left = left.binary(op, parse_power(p)?);
    }
    Ok(left)
}

fn parse_power(p: &mut Parser) -> Result<Expr> {
    let left = parse_unary(p)?;
    if p.eat(TokenKind::Caret) {
        // right-associative
        Ok(left.binary(BinaryOp::Pow, parse_power(p)?))
    } else {
        Ok(left)
    }
}

fn parse_unary(p: &mut Parser) -> Result<Expr> {
    if p.eat(TokenKind::Plus) {
        return parse_unary(p);
    }
    if !p.at(TokenKind::Dash) {
        return parse_postfix(p);
    }
    let position = p.advance().span.start;
    // Fold negative literals so SKIP/LIMIT and inline properties stay literal.
    Ok(match parse_unary(p)? {
        Expr::Literal(Value::Int(i)) => match i.checked_neg() {
            Some(n) => Expr::Literal(Value::Int(n)),
            None => {
                return Err(CompileError::Syntax { position, message: "integer literal out of range".into() }.into());
            }
        },
        Expr::Literal(Value::Float(f)) => Expr::Literal(Value::Float(-f)),
        expr => Expr::UnaryOp { op: UnaryOp::Negate, expr: Box::new(expr) },
    })
}

/// Property access, `!` and label checks after a primary.
fn parse_postfix(p: &mut Parser) -> Result<Expr> {
    let mut expr = parse_primary(p)?;

    while p.eat(TokenKind::Dot) {
        let key = p.symbolic_name()?;
        expr = if p.eat(TokenKind::Bang) {
            Expr::RequiredProperty { expr: Box::new(expr), key }
        } else {
            Expr::Property { expr: Box::new(expr), key }
        };
    }

    if matches!(expr, Expr::Variable(_)) && p.at(TokenKind::Colon) {
        let mut check: Option<Expr> = None;
        while p.eat(TokenKind::Colon) {
            let has = expr.clone().has_label(p.symbolic_name()?);
            check = Some(match check {
                Some(prev) => prev.and(has),
                None => has,
            });
        }
        if let Some(check) = check {
            expr = check;
        }
    }

    Ok(expr)
}

fn parse_primary(p: &mut Parser) -> Result<Expr> {
    match p.peek_kind() {
        TokenKind::Integer => {
            let tok = p.advance();
            let val = tok.text.parse::<i64>().map_err(|_| -> Error {
                CompileError::Syntax { position: tok.span.start, message: "integer literal out of range".into() }.into()
            })?;
            Ok(Expr::lit(val))
        }
        TokenKind::Float => {
            let tok = p.advance();
            let val = tok.text.parse::<f64>().map_err(|_| -> Error {
                CompileError::Syntax { position: tok.span.start, message: "invalid float literal".into() }.into()
            })?;
            Ok(Expr::lit(val))
        }
        TokenKind::StringLiteral => Ok(Expr::lit(p.advance().text.clone())),
        TokenKind::True => {
            p.advance();
            Ok(Expr::lit(true))
        }
        TokenKind::False => {
            p.advance();
            Ok(Expr::lit(false))
        }
        TokenKind::Null => {
            p.advance();
            Ok(Expr::Literal(Value::Null))
        }
        TokenKind::Parameter => Ok(Expr::param(p.advance().text.clone())),

        TokenKind::LParen => {
            p.advance();
            let expr = parse_expr(p)?;
            p.expect(TokenKind::RParen)?;
            Ok(expr)
        }

        TokenKind::LBracket => {
            p.advance();
            let mut items = Vec::new();
            if !p.at(TokenKind::RBracket) {
                items.push(parse_expr(p)?);
                while p.eat(TokenKind::Comma) {
                    items.push(parse_expr(p)?);
                }
            }
            p.expect(TokenKind::RBracket)?;
            Ok(Expr::List(items))
        }

        TokenKind::LBrace => Err(p.unsupported("map literal outside a pattern or SET +=")),

        TokenKind::Case => {
            p.advance();
            let operand = if p.at(TokenKind::When) { None } else { Some(Box::new(parse_expr(p)?)) };
            let mut whens = Vec::new();
            while p.eat(TokenKind::When) {
                let when = parse_expr(p)?;
                p.expect(TokenKind::Then)?;
                whens.push((when, parse_expr(p)?));
            }
            if whens.is_empty() {
                return Err(p.error("CASE needs at least one WHEN".into()));
            }
            let else_expr = if p.eat(TokenKind::Else) { Some(Box::new(parse_expr(p)?)) } else { None };
            p.expect(TokenKind::End)?;
            Ok(Expr::Case { operand, whens, else_expr })
        }

        TokenKind::Identifier => {
            let name = p.advance().text.clone();
            if !p.eat(TokenKind::LParen) {
                return Ok(Expr::Variable(name));
            }
            let distinct = p.eat(TokenKind::Distinct);
            let mut args = Vec::new();
            if p.eat(TokenKind::Star) {
                args.push(Expr::Star);
            } else if !p.at(TokenKind::RParen) {
                args.push(parse_expr(p)?);
                while p.eat(TokenKind::Comma) {
                    args.push(parse_expr(p)?);
                }
            }
            p.expect(TokenKind::RParen)?;
            Ok(Expr::FunctionCall { name, args, distinct })
        }

        _ => Err(p.error(format!("unexpected '{}' in expression", p.peek().text))),
    }
}

/// `{key: expr, ...}`, keys in source order.
fn parse_map_literal(p: &mut Parser) -> Result<Vec<(String, Expr)>> {
    p.expect(TokenKind::LBrace)?;
    let mut entries = Vec::new();
    if !p.at(TokenKind::RBrace) {
        loop {
            let key = p.symbolic_name()?;
            p.expect(TokenKind::Colon)?;
            entries.push((key, parse_expr(p)?));
            if !p.eat(TokenKind::Comma) {
                break;
            }
        }
    }
    p.expect(TokenKind::RBrace)?;
    Ok(entries)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cypher::lexer::tokenize;

    fn parse(query: &str) -> Result<Statement> {
        parse_statement(&tokenize(query)?)
    }

    #[test]
    fn test_simple_match_return() {
        let stmt = parse("MATCH (n:Person) RETURN n").unwrap();
        let expected = Statement::new()
            .match_pattern(Pattern::start(NodePattern::var("n").label("Person")))
            .returning([Expr::var("n")]);
        assert_eq!(stmt, expected);
    }

    #[test]
    fn test_match_with_where() {
        let stmt = parse("MATCH (n:Person) WHERE n.age > 30 RETURN n.name").unwrap();
        assert_eq!(stmt.where_clause, Some(Expr::prop("n", "age").greater_than(Expr::lit(30i64))));
        assert_eq!(stmt.return_clause.unwrap().items[0].expr, Expr::prop("n", "name"));
    }

    #[test]
    fn test_multiple_match_clauses_concatenate() {
        let stmt = parse("MATCH (a) WHERE a.x = 1 MATCH (a)-->(b) WHERE b.y = 2 RETURN b").unwrap();
        assert_eq!(stmt.matches.len(), 2);
        assert_eq!(
            stmt.where_clause,
            Some(Expr::prop("a", "x").equals(Expr::lit(1i64)).and(Expr::prop("b", "y").equals(Expr::lit(2i64))))
        );
    }

    #[test]
    fn test_relationship_pattern() {
        let stmt = parse("MATCH (a)-[r:KNOWS|LIKES]->(b)<-[:OWNS]-(c)-[*2..5]-(d) RETURN a").unwrap();
        let expected = Pattern::start(NodePattern::var("a"))
            .then(EdgePattern::out().var("r").edge_type("KNOWS").edge_type("LIKES"), NodePattern::var("b"))
            .then(EdgePattern::incoming().edge_type("OWNS"), NodePattern::var("c"))
            .then(EdgePattern::undirected().hops(2, 5), NodePattern::var("d"));
        assert_eq!(stmt.matches, vec![expected]);
    }

    #[test]
    fn test_var_length_forms() {
        let bounds = |q: &str| {
            let stmt = parse(q).unwrap();
            match &stmt.matches[0].elements[1] {
                PatternElement::Edge(e) => e.var_length,
                PatternElement::Node(_) => None,
            }
        };
        assert_eq!(bounds("MATCH (a)-[*]->(b) RETURN b"), Some(VarLength { min: None, max: None }));
        assert_eq!(bounds("MATCH (a)-[*3]->(b) RETURN b"), Some(VarLength { min: Some(3), max: Some(3) }));
        assert_eq!(bounds("MATCH (a)-[*..4]->(b) RETURN b"), Some(VarLength { min: None, max: Some(4) }));
        assert_eq!(bounds("MATCH (a)-[*0..]->(b) RETURN b"), Some(VarLength { min: Some(0), max: None }));
        assert_eq!(bounds("MATCH (a)-->(b) RETURN b"), None);
    }

    #[test]
    fn test_create_with_properties() {
        let stmt = parse("CREATE (n:Person:Employee {name: 'Ada', age: 36}) RETURN n").unwrap();
        let node = NodePattern::var("n").label("Person").label("Employee").prop("name", "Ada").prop("age", 36i64);
        assert_eq!(stmt.create, vec![Pattern::start(node)]);
    }

    #[test]
    fn test_match_create_edge() {
        let stmt = parse("MATCH (a:P {name: 'A'}), (b:P {name: 'B'}) CREATE (a)-[:KNOWS {since: 2020}]->(b)").unwrap();
        assert_eq!(stmt.matches.len(), 2);
        assert_eq!(stmt.create.len(), 1);
        assert!(stmt.has_mutations());
    }

    #[test]
    fn test_merge_on_create_on_match() {
        let stmt = parse("MERGE (n:City {name: 'Oslo'}) ON CREATE SET n.created = true ON MATCH SET n.seen = n.seen + 1").unwrap();
        let merge = stmt.merge.unwrap();
        assert_eq!(merge.on_create.len(), 1);
        assert_eq!(
            merge.on_match,
            vec![SetItem::Property {
                variable: "n".into(),
                key: "seen".into(),
                value: Expr::prop("n", "seen").plus(Expr::lit(1i64)),
            }]
        );
    }

    #[test]
    fn test_set_remove_delete() {
        let stmt =
            parse("MATCH (n) SET n.x = 1, n += {y: 2}, n:Tagged REMOVE n.z, n:Old DETACH DELETE n").unwrap();
        assert_eq!(stmt.set.len(), 3);
        assert!(matches!(&stmt.set[1], SetItem::MergeProperties { properties, .. } if properties[0].0 == "y"));
        assert_eq!(
            stmt.remove,
            vec![
                RemoveItem::Property { variable: "n".into(), key: "z".into() },
                RemoveItem::Label { variable: "n".into(), label: "Old".into() },
            ]
        );
        assert_eq!(stmt.delete, Some(DeleteClause { variables: vec!["n".into()], detach: true }));
    }

    #[test]
    fn test_write_clause_order_enforced() {
        let err = parse("MATCH (n) DELETE n SET n.x = 1").unwrap_err();
        assert!(matches!(err, Error::Compile(CompileError::Unsupported(_))));
        let err = parse("MERGE (a) MERGE (b)").unwrap_err();
        assert!(matches!(err, Error::Compile(CompileError::Unsupported(_))));
    }

    #[test]
    fn test_return_shaping() {
        let stmt = parse(
            "MATCH (n) RETURN DISTINCT n.name AS name, count(*) AS c ORDER BY c DESC NULLS FIRST, name SKIP 1 LIMIT $k",
        )
        .unwrap();
        let ret = stmt.return_clause.unwrap();
        assert!(ret.distinct);
        assert_eq!(ret.items[1], ReturnItem::new(Expr::count_star()).alias("c"));
        assert_eq!(stmt.order_by[0], OrderExpr::desc(Expr::var("c")).nulls(NullsOrder::First));
        assert_eq!(stmt.order_by[1], OrderExpr::asc(Expr::var("name")));
        assert_eq!(stmt.skip, Some(Expr::lit(1i64)));
        assert_eq!(stmt.limit, Some(Expr::param("k")));
    }

    #[test]
    fn test_return_star() {
        let stmt = parse("MATCH (n) RETURN *").unwrap();
        assert_eq!(stmt.return_clause.unwrap().items, vec![ReturnItem::new(Expr::Star)]);
    }

    #[test]
    fn test_expression_precedence() {
        let stmt = parse("RETURN 1 + 2 * 3 - -4 AS v").unwrap();
        let expected = Expr::lit(1i64)
            .plus(Expr::lit(2i64).binary(BinaryOp::Mul, Expr::lit(3i64)))
            .binary(BinaryOp::Sub, Expr::lit(-4i64));
        assert_eq!(stmt.return_clause.unwrap().items[0].expr, expected);
    }

    #[test]
    fn test_boolean_and_predicates() {
        let stmt = parse(
            "MATCH (n) WHERE NOT n.a IS NULL AND (n.b IN [1, 2] OR n.c STARTS WITH 'x') AND n:Admin RETURN n",
        )
        .unwrap();
        let expected = Expr::prop("n", "a")
            .is_null()
            .not()
            .and(
                Expr::In {
                    expr: Box::new(Expr::prop("n", "b")),
                    list: Box::new(Expr::List(vec![Expr::lit(1i64), Expr::lit(2i64)])),
                }
                .or(Expr::StringOp {
                    left: Box::new(Expr::prop("n", "c")),
                    op: StringOp::StartsWith,
                    right: Box::new(Expr::lit("x")),
                }),
            )
            .and(Expr::var("n").has_label("Admin"));
        assert_eq!(stmt.where_clause, Some(expected));
    }

    #[test]
    fn test_required_property_and_case() {
        let stmt = parse("MATCH (n) RETURN n.name!, CASE WHEN n.x > 1 THEN 'big' ELSE 'small' END").unwrap();
        let items = stmt.return_clause.unwrap().items;
        assert_eq!(items[0].expr, Expr::required_prop("n", "name"));
        assert!(matches!(&items[1].expr, Expr::Case { operand: None, whens, else_expr: Some(_) } if whens.len() == 1));
    }

    #[test]
    fn test_function_calls() {
        let stmt = parse("MATCH (n) RETURN count(DISTINCT n.x), toUpper(n.name), size([])").unwrap();
        let items = stmt.return_clause.unwrap().items;
        assert_eq!(items[0].expr, Expr::call_distinct("count", vec![Expr::prop("n", "x")]));
        assert_eq!(items[1].expr, Expr::call("toUpper", vec![Expr::prop("n", "name")]));
        assert_eq!(items[2].expr, Expr::call("size", vec![Expr::List(vec![])]));
    }

    #[test]
    fn test_keywords_as_names() {
        let stmt = parse("MATCH (n:End {order: 1}) RETURN n.end AS last").unwrap();
        assert_eq!(stmt.matches[0], Pattern::start(NodePattern::var("n").label("End").prop("order", 1i64)));
        assert_eq!(stmt.return_clause.unwrap().items[0], ReturnItem::new(Expr::prop("n", "end")).alias("last"));
    }

    #[test]
    fn test_optional_match_and_unwind() {
        let stmt = parse("MATCH (p:Person) OPTIONAL MATCH (p)-[:WORKS_AT]->(c) WHERE c.size > 10 UNWIND [1, 2] AS x RETURN p, c, x")
            .unwrap();
        let works_at = Pattern::start(NodePattern::var("p"))
            .then(EdgePattern::out().edge_type("WORKS_AT"), NodePattern::var("c"));
        let expected = Statement::new()
            .match_pattern(Pattern::start(NodePattern::var("p").label("Person")))
            .optional_match(vec![works_at], Some(Expr::prop("c", "size").greater_than(Expr::lit(10i64))))
            .unwind(Expr::List(vec![Expr::lit(1i64), Expr::lit(2i64)]), "x")
            .returning([Expr::var("p"), Expr::var("c"), Expr::var("x")]);
        assert_eq!(stmt, expected);
    }

    #[test]
    fn test_with_closes_a_part() {
        let stmt = parse(
            "MATCH (a)-[:KNOWS]->(b) WITH a, count(b) AS friends ORDER BY friends DESC LIMIT 5 WHERE friends > 1 \
             MATCH (a)-[:LIVES_IN]->(c) RETURN a.name, c.name",
        )
        .unwrap();
        assert_eq!(stmt.parts.len(), 1);
        let part = &stmt.parts[0];
        assert_eq!(part.matches.len(), 1);
        assert_eq!(part.with.projection.items[1], ReturnItem::new(Expr::call("count", vec![Expr::var("b")])).alias("friends"));
        assert_eq!(part.with.order_by, vec![OrderExpr::desc(Expr::var("friends"))]);
        assert_eq!(part.with.limit, Some(Expr::lit(5i64)));
        assert_eq!(part.with.where_clause, Some(Expr::var("friends").greater_than(Expr::lit(1i64))));
        assert_eq!(stmt.matches.len(), 1);
        assert_eq!(stmt.return_clause.unwrap().items.len(), 2);
    }

    #[test]
    fn test_reading_clause_placement() {
        for q in [
            "UNWIND [1] AS x MATCH (n) RETURN n",
            "MATCH (n) CREATE (m) WITH m RETURN m",
            "CREATE (m) UNWIND [1] AS x RETURN x",
            "MATCH (n) DELETE n OPTIONAL MATCH (m) RETURN m",
        ] {
            let err = parse(q).unwrap_err();
            assert!(matches!(err, Error::Compile(CompileError::Unsupported(_))), "{q}: {err}");
        }
        assert!(parse("MATCH (n) WITH n").is_err());
        assert!(parse("UNWIND [1] AS 2 RETURN 1").is_err());
        assert!(parse("UNWIND [1] AS x WITH x MATCH (n {v: x}) RETURN n").is_ok());
    }

    #[test]
    fn test_syntax_errors() {
        let err = parse("MATCH (n RETURN n").unwrap_err();
        assert!(matches!(err, Error::Compile(CompileError::Syntax { position: 9, .. })));
        assert!(parse("MATCH (n) RETURN").is_err());
        assert!(parse("").is_err());
        assert!(parse("MATCH (a)<-[]->(b) RETURN a").is_err());
    }

    #[test]
    fn test_script() {
        let statements = parse_script(&tokenize("CREATE (a); ; CREATE (b);\nMATCH (n) RETURN count(*)").unwrap()).unwrap();
        assert_eq!(statements.len(), 3);
        assert!(parse_script(&tokenize("CREATE (a) CREATE (b) RETURN a MATCH (x)").unwrap()).is_err());
    }
}
