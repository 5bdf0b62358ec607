//! Recursive descent parser for policy text.
//!
//! Expression precedence, loosest first: `if`, `||`, `&&`, relations
//! (`== != < <= > >= in has like is`, non-associative), `+ -`, `*`, unary
//! `! -`, member access, primary.

mod lexer;

use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;

use crate::ast::{
    BinaryOp, Clause, ClauseKind, Effect, Expr, Policy, ScopeConstraint, SourceLoc, UnaryOp, Var,
};
use crate::error::ParseError;
use crate::extensions::ExtensionFunction;
use crate::types::{EntityType, EntityUid, Value};

use lexer::{Token, TokenKind, tokenize, unescape, unescape_pattern};

/// Words that can never name a variable or a type segment.
const RESERVED: &[&str] = &[
    "true", "false", "if", "then", "else", "in", "has", "like", "is",
];

/// Deepest expression the parser accepts, counting both the height of the
/// built tree and the parser's own recursion. Evaluation, type checking and
/// formatting all recurse over the tree.
pub const MAX_NESTING: usize = 48;

/// Parse a whole policy source. Ids come from `@id("..")` annotations,
/// falling back to `policyN` for the N-th policy (0-based).
pub fn parse_policies(text: &str) -> Result<Vec<Policy>, ParseError> {
    let mut parser = Parser::new(text)?;
    let mut policies = Vec::new();
    let mut seen = HashSet::new();
    while !parser.at(&TokenKind::Eof) {
        let policy = parser.policy(policies.len())?;
        if !seen.insert(policy.id().to_string()) {
            let loc = policy.loc();
            return Err(ParseError::new(
                loc.line,
                loc.column,
                format!("duplicate policy id `{}`", policy.id()),
            )
            .in_policy(Some(policy.id())));
        }
        policies.push(policy);
    }
    Ok(policies)
}

/// Parse exactly one entity reference, `Type::"id"`.
pub fn parse_entity_uid(text: &str) -> Result<EntityUid, ParseError> {
    let mut parser = Parser::new(text)?;
    let uid = parser.entity_uid()?;
    parser.expect(&TokenKind::Eof)?;
    Ok(uid)
}

/// Parse exactly one entity type name, `Type` or `NS::Type`.
pub fn parse_entity_type(text: &str) -> Result<EntityType, ParseError> {
    let mut parser = Parser::new(text)?;
    let ty = parser.entity_type()?;
    parser.expect(&TokenKind::Eof)?;
    Ok(ty)
}

/// A `::`-separated name, optionally ending in an entity id string.
enum Path {
    Type(Vec<String>),
    Uid(Vec<String>, String),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    nesting: usize,
}

impl Parser {
    fn new(text: &str) -> Result<Self, ParseError> {
        Ok(Self {
            tokens: tokenize(text)?,
            pos: 0,
            nesting: 0,
        })
    }

    fn peek(&self) -> &Token {
        // `tokenize` always ends with Eof, and `advance` never moves past it.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind_at(&self, offset: usize) -> &TokenKind {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn at(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn at_keyword(&self, word: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Ident(name) if name == word)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if self.at_keyword(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error_here(&self, message: impl Into<String>) -> ParseError {
        let token = self.peek();
        ParseError::new(token.line, token.column, message)
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        self.error_here(format!("expected {expected}, found {}", self.peek().kind))
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<Token, ParseError> {
        if self.at(kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&kind.to_string()))
        }
    }

    fn expect_keyword(&mut self, word: &str) -> Result<(), ParseError> {
        if self.eat_keyword(word) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("`{word}`")))
        }
    }

    fn ident(&mut self) -> Result<String, ParseError> {
        match &self.peek().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected("an identifier")),
        }
    }

    fn string(&mut self) -> Result<String, ParseError> {
        let token = self.peek().clone();
        match &token.kind {
            TokenKind::Str(raw) => {
                self.advance();
                unescape(raw).map_err(|msg| ParseError::new(token.line, token.column, msg))
            }
            _ => Err(self.unexpected("a string literal")),
        }
    }

    // ---- policies ----

    fn policy(&mut self, index: usize) -> Result<Policy, ParseError> {
        let start = self.peek().clone();
        let loc = SourceLoc {
            line: start.line,
            column: start.column,
        };

        let annotations = self.annotations()?;
        let id = annotations
            .get("id")
            .cloned()
            .unwrap_or_else(|| format!("policy{index}"));

        self.policy_body(id.clone(), annotations, loc)
            .map_err(|err| err.in_policy(Some(&id)))
    }

    fn annotations(&mut self) -> Result<BTreeMap<String, String>, ParseError> {
        let mut annotations = BTreeMap::new();
        while self.at(&TokenKind::At) {
            let at = self.advance();
            let key = self.ident()?;
            self.expect(&TokenKind::LParen)?;
            let value = self.string()?;
            self.expect(&TokenKind::RParen)?;
            if annotations.insert(key.clone(), value).is_some() {
                return Err(ParseError::new(
                    at.line,
                    at.column,
                    format!("duplicate annotation `@{key}`"),
                ));
            }
        }
        Ok(annotations)
    }

    fn policy_body(
        &mut self,
        id: String,
        annotations: BTreeMap<String, String>,
        loc: SourceLoc,
    ) -> Result<Policy, ParseError> {
        let effect = match &self.peek().kind {
            TokenKind::Ident(word) => Effect::from_str(word)
                .map_err(|_| self.unexpected("`permit` or `forbid`"))?,
            _ => return Err(self.unexpected("`permit` or `forbid`")),
        };
        self.advance();

        self.expect(&TokenKind::LParen)?;
        let [principal, action, resource] = self.scope()?;
        self.expect(&TokenKind::RParen)?;

        let mut clauses = Vec::new();
        loop {
            let kind = if self.eat_keyword("when") {
                ClauseKind::When
            } else if self.eat_keyword("unless") {
                ClauseKind::Unless
            } else {
                break;
            };
            self.expect(&TokenKind::LBrace)?;
            let body = self.expr()?;
            self.expect(&TokenKind::RBrace)?;
            clauses.push(Clause { kind, body });
        }
        self.expect(&TokenKind::Semi)?;

        Ok(Policy::new(
            id,
            effect,
            principal,
            action,
            resource,
            clauses,
            annotations,
            loc,
        ))
    }

    /// The scope list: an ordered subset of `principal, action, resource`.
    fn scope(&mut self) -> Result<[ScopeConstraint; 3], ParseError> {
        const SLOTS: [&str; 3] = ["principal", "action", "resource"];
        let mut scope = [ScopeConstraint::Any, ScopeConstraint::Any, ScopeConstraint::Any];
        let mut next_slot = 0;

        while !self.at(&TokenKind::RParen) {
            if next_slot > 0 {
                self.expect(&TokenKind::Comma)?;
            }
            let slot = match &self.peek().kind {
                TokenKind::Ident(word) => SLOTS[next_slot..]
                    .iter()
                    .position(|s| *s == word.as_str())
                    .map(|offset| next_slot + offset),
                _ => None,
            }
            .ok_or_else(|| {
                let remaining: Vec<String> =
                    SLOTS[next_slot..].iter().map(|s| format!("`{s}`")).collect();
                self.unexpected(&remaining.join(" or "))
            })?;
            self.advance();
            scope[slot] = self.slot_constraint(SLOTS[slot])?;
            next_slot = slot + 1;
            if next_slot == SLOTS.len() {
                break;
            }
        }
        Ok(scope)
    }

    fn slot_constraint(&mut self, slot: &str) -> Result<ScopeConstraint, ParseError> {
        if self.eat(&TokenKind::EqEq) {
            return Ok(ScopeConstraint::Eq(self.entity_uid()?));
        }
        if self.eat_keyword("in") {
            if self.eat(&TokenKind::LBracket) {
                let mut uids = Vec::new();
                while !self.at(&TokenKind::RBracket) {
                    uids.push(self.entity_uid()?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RBracket)?;
                return Ok(ScopeConstraint::InSet(uids));
            }
            return Ok(ScopeConstraint::In(self.entity_uid()?));
        }
        if self.at_keyword("is") {
            if slot == "action" {
                return Err(self.error_here("`is` is not allowed in the action scope"));
            }
            self.advance();
            let ty = self.entity_type()?;
            if self.eat_keyword("in") {
                return Ok(ScopeConstraint::IsIn(ty, self.entity_uid()?));
            }
            return Ok(ScopeConstraint::Is(ty));
        }
        if self.at(&TokenKind::Question) {
            return Err(self.error_here("policy templates are not supported"));
        }
        Ok(ScopeConstraint::Any)
    }

    fn path(&mut self) -> Result<Path, ParseError> {
        let mut segments = vec![self.type_segment()?];
        while self.eat(&TokenKind::PathSep) {
            if let TokenKind::Str(_) = self.peek().kind {
                let id = self.string()?;
                return Ok(Path::Uid(segments, id));
            }
            segments.push(self.type_segment()?);
        }
        Ok(Path::Type(segments))
    }

    fn type_segment(&mut self) -> Result<String, ParseError> {
        if let TokenKind::Ident(name) = &self.peek().kind {
            if RESERVED.contains(&name.as_str()) {
                return Err(self.error_here(format!("`{name}` is a reserved word")));
            }
        }
        self.ident()
    }

    fn entity_uid(&mut self) -> Result<EntityUid, ParseError> {
        if self.at(&TokenKind::Question) {
            return Err(self.error_here("policy templates are not supported"));
        }
        match self.path()? {
            Path::Uid(segments, id) => Ok(EntityUid::new(EntityType::from_segments(&segments), id)),
            Path::Type(_) => Err(self.unexpected("`::` followed by an entity id string")),
        }
    }

    fn entity_type(&mut self) -> Result<EntityType, ParseError> {
        match self.path()? {
            Path::Type(segments) => Ok(EntityType::from_segments(&segments)),
            Path::Uid(..) => Err(self.error_here("expected an entity type, found an entity")),
        }
    }

    // ---- expressions ----

    fn enter(&mut self) -> Result<(), ParseError> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return Err(self.too_deep());
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.nesting -= 1;
    }

    fn too_deep(&self) -> ParseError {
        self.error_here(format!("expression nesting exceeds {MAX_NESTING} levels"))
    }

    fn bounded(&self, expr: Expr) -> Result<Expr, ParseError> {
        if expr.depth() > MAX_NESTING {
            return Err(self.too_deep());
        }
        Ok(expr)
    }

    fn expr(&mut self) -> Result<Expr, ParseError> {
        self.enter()?;
        let expr = self.conditional()?;
        self.leave();
        self.bounded(expr)
    }

    fn conditional(&mut self) -> Result<Expr, ParseError> {
        if self.eat_keyword("if") {
            let cond = self.expr()?;
            self.expect_keyword("then")?;
            let then_expr = self.expr()?;
            self.expect_keyword("else")?;
            let else_expr = self.expr()?;
            return Ok(Expr::If {
                cond: Box::new(cond),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
            });
        }
        self.or()
    }

    fn or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.and()?;
        while self.eat(&TokenKind::OrOr) {
            let right = self.and()?;
            left = Expr::or(left, right);
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.relation()?;
        while self.eat(&TokenKind::AndAnd) {
            let right = self.relation()?;
            left = Expr::and(left, right);
        }
        Ok(left)
    }

    fn relation(&mut self) -> Result<Expr, ParseError> {
        let left = self.additive()?;

        let op = match &self.peek().kind {
            TokenKind::EqEq => Some(BinaryOp::Eq),
            TokenKind::NotEq => Some(BinaryOp::NotEq),
            TokenKind::Less => Some(BinaryOp::Less),
            TokenKind::LessEq => Some(BinaryOp::LessEq),
            TokenKind::Greater => Some(BinaryOp::Greater),
            TokenKind::GreaterEq => Some(BinaryOp::GreaterEq),
            TokenKind::Ident(word) if word == "in" => Some(BinaryOp::In),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let right = self.additive()?;
            return Ok(Expr::binary(op, left, right));
        }

        if self.eat_keyword("has") {
            let attr = match &self.peek().kind {
                TokenKind::Str(_) => self.string()?,
                _ => self.ident()?,
            };
            return Ok(Expr::HasAttr {
                expr: Box::new(left),
                attr,
            });
        }

        if self.eat_keyword("like") {
            let token = self.peek().clone();
            let TokenKind::Str(raw) = &token.kind else {
                return Err(self.unexpected("a pattern string"));
            };
            self.advance();
            let pattern = unescape_pattern(raw)
                .map_err(|msg| ParseError::new(token.line, token.column, msg))?;
            return Ok(Expr::Like {
                expr: Box::new(left),
                pattern,
            });
        }

        if self.eat_keyword("is") {
            let entity_type = self.entity_type()?;
            if self.eat_keyword("in") {
                let target = self.additive()?;
                let is = Expr::Is {
                    expr: Box::new(left.clone()),
                    entity_type,
                };
                return Ok(Expr::and(is, Expr::binary(BinaryOp::In, left, target)));
            }
            return Ok(Expr::Is {
                expr: Box::new(left),
                entity_type,
            });
        }

        Ok(left)
    }

    fn additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.multiplicative()?;
            left = self.bounded(Expr::binary(op, left, right))?;
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.unary()?;
        while self.eat(&TokenKind::Star) {
            let right = self.unary()?;
            left = self.bounded(Expr::binary(BinaryOp::Mul, left, right))?;
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&TokenKind::Bang) {
            self.enter()?;
            let arg = self.unary()?;
            self.leave();
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                arg: Box::new(arg),
            });
        }
        if self.at(&TokenKind::Minus) {
            // `-<digits>` is a literal so that i64::MIN is expressible.
            if let TokenKind::Int(digits) = self.peek_kind_at(1).clone() {
                self.advance();
                let literal = self.int_literal(&format!("-{digits}"))?;
                return self.member_suffixes(literal);
            }
            self.advance();
            self.enter()?;
            let arg = self.unary()?;
            self.leave();
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                arg: Box::new(arg),
            });
        }
        self.member()
    }

    fn int_literal(&mut self, text: &str) -> Result<Expr, ParseError> {
        let value = text
            .parse::<i64>()
            .map_err(|_| self.error_here(format!("integer literal `{text}` is out of range")))?;
        self.advance();
        Ok(Expr::literal(value))
    }

    fn member(&mut self) -> Result<Expr, ParseError> {
        let primary = self.primary()?;
        self.member_suffixes(primary)
    }

    fn member_suffixes(&mut self, mut expr: Expr) -> Result<Expr, ParseError> {
        loop {
            if self.eat(&TokenKind::LBracket) {
                let attr = self.string()?;
                self.expect(&TokenKind::RBracket)?;
                expr = Expr::GetAttr {
                    expr: Box::new(expr),
                    attr,
                };
            } else if self.eat(&TokenKind::Dot) {
                let name_token = self.peek().clone();
                let name = self.ident()?;
                if self.eat(&TokenKind::LParen) {
                    let args = self.arguments()?;
                    expr = method_call(expr, &name, args)
                        .map_err(|msg| ParseError::new(name_token.line, name_token.column, msg))?;
                } else {
                    expr = Expr::GetAttr {
                        expr: Box::new(expr),
                        attr: name,
                    };
                }
            } else {
                return Ok(expr);
            }
            expr = self.bounded(expr)?;
        }
    }

    /// Comma-separated expressions up to the closing `)`; the `(` is
    /// already consumed.
    fn arguments(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        while !self.at(&TokenKind::RParen) {
            args.push(self.expr()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen)?;
        Ok(args)
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.peek().clone();
        match &token.kind {
            TokenKind::Int(digits) => self.int_literal(digits),
            TokenKind::Str(_) => Ok(Expr::literal(self.string()?)),
            TokenKind::LParen => {
                self.advance();
                let inner = self.expr()?;
                self.expect(&TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                while !self.at(&TokenKind::RBracket) {
                    items.push(self.expr()?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RBracket)?;
                Ok(Expr::Set(items))
            }
            TokenKind::LBrace => self.record(),
            TokenKind::Question => Err(self.error_here("policy templates are not supported")),
            TokenKind::Ident(word) => match word.as_str() {
                "true" => {
                    self.advance();
                    Ok(Expr::literal(true))
                }
                "false" => {
                    self.advance();
                    Ok(Expr::literal(false))
                }
                _ => {
                    if let Ok(var) = Var::from_str(word) {
                        self.advance();
                        return Ok(Expr::Var(var));
                    }
                    self.path_expr(&token)
                }
            },
            _ => Err(self.unexpected("an expression")),
        }
    }

    /// An entity literal, an extension constructor call, or an error for
    /// an unknown name.
    fn path_expr(&mut self, start: &Token) -> Result<Expr, ParseError> {
        let at_start = |msg: String| ParseError::new(start.line, start.column, msg);
        match self.path()? {
            Path::Uid(segments, id) => Ok(Expr::literal(EntityUid::new(
                EntityType::from_segments(&segments),
                id,
            ))),
            Path::Type(segments) => {
                let name = segments.join("::");
                if !self.eat(&TokenKind::LParen) {
                    return Err(at_start(format!("unknown variable `{name}`")));
                }
                let function = ExtensionFunction::from_str(&name)
                    .ok()
                    .filter(|f| f.is_constructor())
                    .ok_or_else(|| at_start(format!("unknown function `{name}`")))?;
                let args = self.arguments()?;
                constructor_call(function, args).map_err(at_start)
            }
        }
    }

    fn record(&mut self) -> Result<Expr, ParseError> {
        self.expect(&TokenKind::LBrace)?;
        let mut fields: Vec<(String, Expr)> = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            let key_token = self.peek().clone();
            let key = match &key_token.kind {
                TokenKind::Str(_) => self.string()?,
                _ => self.ident()?,
            };
            if fields.iter().any(|(k, _)| *k == key) {
                return Err(ParseError::new(
                    key_token.line,
                    key_token.column,
                    format!("duplicate record key `{key}`"),
                ));
            }
            self.expect(&TokenKind::Colon)?;
            fields.push((key, self.expr()?));
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(Expr::Record(fields))
    }
}

fn method_call(receiver: Expr, name: &str, mut args: Vec<Expr>) -> Result<Expr, String> {
    let set_op = match name {
        "contains" => Some(BinaryOp::Contains),
        "containsAll" => Some(BinaryOp::ContainsAll),
        "containsAny" => Some(BinaryOp::ContainsAny),
        _ => None,
    };
    if let Some(op) = set_op {
        return match args.pop() {
            Some(arg) if args.is_empty() => Ok(Expr::binary(op, receiver, arg)),
            _ => Err(format!("`{name}` takes exactly one argument")),
        };
    }
    if name == "isEmpty" {
        if !args.is_empty() {
            return Err("`isEmpty` takes no arguments".to_string());
        }
        return Ok(Expr::Unary {
            op: UnaryOp::IsEmpty,
            arg: Box::new(receiver),
        });
    }

    let function = ExtensionFunction::from_str(name)
        .ok()
        .filter(|f| !f.is_constructor())
        .ok_or_else(|| format!("unknown method `{name}`"))?;
    args.insert(0, receiver);
    if args.len() != function.arity() {
        return Err(format!(
            "`{name}` takes {} argument(s), got {}",
            function.arity() - 1,
            args.len() - 1
        ));
    }
    Ok(Expr::ExtensionCall { function, args })
}

fn constructor_call(function: ExtensionFunction, args: Vec<Expr>) -> Result<Expr, String> {
    if args.len() != 1 {
        return Err(format!(
            "`{function}` takes exactly one argument, got {}",
            args.len()
        ));
    }
    if let Expr::Literal(Value::String(text)) = &args[0] {
        function
            .construct(text)
            .map_err(|msg| format!("invalid `{function}` literal: {msg}"))?;
    }
    Ok(Expr::ExtensionCall { function, args })
}
