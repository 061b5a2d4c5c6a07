//! Pratt / precedence-climbing parser.
//!
//! The parser consumes the full token buffer produced by [`scan_all`] (it
//! always begins with `Sof` and ends with `Eof`) and folds it into an
//! [`Expr`] tree. Each token kind plays up to two roles: a `head` that
//! parses a prefix/primary expression starting with that token, and a
//! `tail` that extends a previously-built expression, bound to a
//! precedence level. `expression` drives both.
//!
//! Parse errors recover in panic mode: tokens are discarded until one with
//! a non-null head, or `Eof`. Diagnostics at the same source line are
//! suppressed by [`Diagnostics`] itself.

use hammer_base::{Diagnostics, SpannedError};

use crate::ast::{BinaryOp, BlockKind, Expr, ExprArena, ExprId, LiteralKind, Node, SliceMode, TernaryOp, UnaryOp};
use crate::lexer::scan_all;
use crate::token::{Token, TokenKind};

/// Binding power, low to high, exactly as laid out in the precedence
/// ladder: `NONE < ASSIGNMENT < GENERIC_LOW < CONSTRUCT < CONDITIONAL < OR
/// < AND < EQUALITY < COMPARISON < TERM < FACTOR < EXPO < UNARY <
/// GENERIC_HIGH < CALL < PRIMARY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    None,
    Assignment,
    GenericLow,
    Construct,
    Conditional,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Expo,
    Unary,
    GenericHigh,
    Call,
    Primary,
}

impl Precedence {
    /// One level higher; used to recurse for left-associative operators.
    /// Right-associative operators recurse at the same level instead.
    fn next(self) -> Precedence {
        use Precedence::*;
        match self {
            None => Assignment,
            Assignment => GenericLow,
            GenericLow => Construct,
            Construct => Conditional,
            Conditional => Or,
            Or => And,
            And => Equality,
            Equality => Comparison,
            Comparison => Term,
            Term => Factor,
            Factor => Expo,
            Expo => Unary,
            Unary => GenericHigh,
            GenericHigh => Call,
            Call => Primary,
            Primary => Primary,
        }
    }
}

/// The precedence at which `kind` binds as an infix/postfix (`tail`)
/// operator; `Precedence::None` if it has no tail role.
fn tail_precedence(kind: TokenKind) -> Precedence {
    use TokenKind::*;
    match kind {
        Equal | Colon | LShift => Precedence::Assignment,
        Custom => Precedence::GenericLow,
        Comma | Dot | DotDot => Precedence::Construct,
        Or => Precedence::Or,
        And => Precedence::And,
        EqualEqual | BangEqual => Precedence::Equality,
        Less | Greater | LessEqual | GreaterEqual | In => Precedence::Comparison,
        Plus | Minus => Precedence::Term,
        Star | Slash | Percent => Precedence::Factor,
        Caret => Precedence::Expo,
        Question => Precedence::Unary,
        PipeGreater => Precedence::GenericHigh,
        LParen | LBracket | Dollar => Precedence::Call,
        _ => Precedence::None,
    }
}

/// True if `kind` can begin a primary/prefix expression at all.
fn has_head(kind: TokenKind) -> bool {
    use TokenKind::*;
    matches!(
        kind,
        Integer
            | Float
            | Str
            | FormatStr
            | Char
            | True
            | False
            | Unit
            | Identifier
            | Wildcard
            | Glyph
            | LParen
            | LBracket
            | LBrace
            | Minus
            | Bang
            | If
            | Match
            | Cons
            | Car
            | Cdr
            | Return
    )
}

/// True if `kind`, appearing immediately after a complete expression, should
/// be read as the start of a juxtaposed call argument rather than as an
/// infix continuation. Tokens with a tail role (like `-`) are always read
/// as infix first.
fn is_argument_starter(kind: TokenKind) -> bool {
    has_head(kind) && tail_precedence(kind) == Precedence::None
}

/// Parsed program plus the bookkeeping the compiler needs alongside it.
pub struct ParseResult {
    pub arena: ExprArena,
    pub root: ExprId,
    /// Names generated for wildcard parameters desugared from partial
    /// application; indexed by `LiteralKind::SyntheticIdentifier`.
    pub synthetic_names: Vec<String>,
    pub diagnostics: Diagnostics,
}

/// Scans and parses a complete source buffer into a program.
pub fn parse(source: &str) -> ParseResult {
    let (tokens, diagnostics) = scan_all(source);
    let mut parser = Parser {
        tokens,
        pos: 0,
        arena: ExprArena::new(),
        synthetic_names: Vec::new(),
        diagnostics,
    };
    let root = parser.parse_program();
    ParseResult {
        arena: parser.arena,
        root,
        synthetic_names: parser.synthetic_names,
        diagnostics: parser.diagnostics,
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    arena: ExprArena,
    synthetic_names: Vec<String>,
    diagnostics: Diagnostics,
}

type PResult<T> = Result<T, ()>;

impl Parser {
    fn current(&self) -> Token {
        self.tokens[self.pos]
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current().kind == kind
    }

    fn advance(&mut self) -> Token {
        let token = self.current();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn match_tok(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, message: &str) -> PResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            self.error_here(message);
            Err(())
        }
    }

    fn error_here(&mut self, message: impl Into<String>) {
        let span = self.current().span();
        self.diagnostics.report(SpannedError::new(message, span));
    }

    /// Discards tokens until one with a non-null head, or `Eof`.
    fn synchronize(&mut self) {
        while !self.check(TokenKind::Eof) && !has_head(self.current().kind) {
            self.advance();
        }
    }

    fn alloc(&mut self, token: Token, node: Node) -> ExprId {
        self.arena.alloc(Expr::new(token, node))
    }

    fn is_wildcard_literal(&self, id: ExprId) -> bool {
        matches!(self.arena.get(id).node, Node::Literal(LiteralKind::Wildcard))
    }

    fn fresh_synthetic_name(&mut self) -> u32 {
        let idx = self.synthetic_names.len() as u32;
        self.synthetic_names.push(format!("0{:02X}", idx));
        idx
    }

    // ---- program / block structure ----------------------------------

    fn parse_program(&mut self) -> ExprId {
        let start = self.current();
        // the buffer always opens with a synthetic Sof
        if self.check(TokenKind::Sof) {
            self.advance();
        }
        let mut children = Vec::new();
        while !self.check(TokenKind::Eof) {
            match self.expression(Precedence::Assignment) {
                Ok(expr) => {
                    children.push(expr);
                    self.match_tok(TokenKind::Semicolon);
                }
                Err(()) => self.synchronize(),
            }
        }
        self.alloc(start, Node::Block { kind: BlockKind::Program, children })
    }

    fn parse_block(&mut self) -> PResult<ExprId> {
        let open = self.advance(); // consume '{'
        let mut children = Vec::new();
        if !self.check(TokenKind::RBrace) {
            loop {
                match self.expression(Precedence::Assignment) {
                    Ok(expr) => children.push(expr),
                    Err(()) => {
                        self.synchronize();
                        if self.check(TokenKind::RBrace) || self.check(TokenKind::Eof) {
                            break;
                        }
                    }
                }
                if self.match_tok(TokenKind::Semicolon) {
                    if self.check(TokenKind::RBrace) {
                        break;
                    }
                    continue;
                }
                break;
            }
        }
        self.expect(TokenKind::RBrace, "expected '}' to close block")?;
        Ok(self.alloc(open, Node::Block { kind: BlockKind::ExprBlock, children }))
    }

    // ---- core Pratt loop ---------------------------------------------

    fn expression(&mut self, min_prec: Precedence) -> PResult<ExprId> {
        let mut left = self.parse_prefix()?;

        loop {
            let kind = self.current().kind;

            if is_argument_starter(kind) && Precedence::Call >= min_prec {
                left = self.finish_juxtaposition(left)?;
                continue;
            }

            let mut prec = tail_precedence(kind);
            if kind == TokenKind::Colon && self.is_wildcard_literal(left) && prec < Precedence::Construct {
                prec = Precedence::Construct;
            }

            if prec == Precedence::None || prec < min_prec {
                break;
            }

            left = self.parse_infix(left, kind, prec)?;
        }

        Ok(left)
    }

    fn parse_prefix(&mut self) -> PResult<ExprId> {
        let token = self.current();
        match token.kind {
            TokenKind::Integer => {
                self.advance();
                Ok(self.alloc(token, Node::Literal(LiteralKind::Int)))
            }
            TokenKind::Float => {
                self.advance();
                Ok(self.alloc(token, Node::Literal(LiteralKind::Float)))
            }
            TokenKind::Str => {
                self.advance();
                Ok(self.alloc(token, Node::Literal(LiteralKind::Str)))
            }
            TokenKind::FormatStr => {
                self.advance();
                Ok(self.alloc(token, Node::Literal(LiteralKind::FormatStr)))
            }
            TokenKind::Char => {
                self.advance();
                Ok(self.alloc(token, Node::Literal(LiteralKind::Char)))
            }
            TokenKind::True => {
                self.advance();
                Ok(self.alloc(token, Node::Literal(LiteralKind::Bool(true))))
            }
            TokenKind::False => {
                self.advance();
                Ok(self.alloc(token, Node::Literal(LiteralKind::Bool(false))))
            }
            TokenKind::Unit => {
                self.advance();
                Ok(self.alloc(token, Node::Literal(LiteralKind::Unit)))
            }
            TokenKind::Identifier => {
                self.advance();
                Ok(self.alloc(token, Node::Literal(LiteralKind::Identifier)))
            }
            TokenKind::Wildcard => {
                self.advance();
                Ok(self.alloc(token, Node::Literal(LiteralKind::Wildcard)))
            }
            TokenKind::Glyph => {
                self.advance();
                Ok(self.alloc(token, Node::Literal(LiteralKind::Glyph)))
            }
            TokenKind::Minus => {
                self.advance();
                let operand = self.expression(Precedence::Unary)?;
                Ok(self.alloc(token, Node::Unary { op: UnaryOp::Negate, operand }))
            }
            TokenKind::Bang => {
                self.advance();
                let operand = self.expression(Precedence::Unary)?;
                Ok(self.alloc(token, Node::Unary { op: UnaryOp::Not, operand }))
            }
            TokenKind::Car => {
                self.advance();
                let operand = self.expression(Precedence::Call)?;
                Ok(self.alloc(token, Node::Unary { op: UnaryOp::Car, operand }))
            }
            TokenKind::Cdr => {
                self.advance();
                let operand = self.expression(Precedence::Call)?;
                Ok(self.alloc(token, Node::Unary { op: UnaryOp::Cdr, operand }))
            }
            TokenKind::Return => {
                self.advance();
                let operand = self.expression(Precedence::Assignment)?;
                Ok(self.alloc(token, Node::Unary { op: UnaryOp::Return, operand }))
            }
            TokenKind::Cons => {
                self.advance();
                let left = self.expression(Precedence::Call)?;
                let right = self.expression(Precedence::Call)?;
                Ok(self.alloc(token, Node::Binary { op: BinaryOp::Construct, left, right }))
            }
            TokenKind::LParen => self.grouping(),
            TokenKind::LBracket => self.list_or_map_literal(),
            TokenKind::LBrace => self.parse_block(),
            TokenKind::If => self.if_expr(),
            TokenKind::Match => self.match_expr(),
            _ => {
                self.error_here("expected expression");
                Err(())
            }
        }
    }

    fn parse_infix(&mut self, left: ExprId, kind: TokenKind, prec: Precedence) -> PResult<ExprId> {
        match kind {
            TokenKind::Plus => self.arith_binary(left, prec, BinaryOp::Add),
            TokenKind::Minus => self.arith_binary(left, prec, BinaryOp::Sub),
            TokenKind::Star => self.arith_binary(left, prec, BinaryOp::Mul),
            TokenKind::Slash => self.arith_binary(left, prec, BinaryOp::Div),
            TokenKind::Percent => self.arith_binary(left, prec, BinaryOp::Mod),
            TokenKind::Caret => self.arith_binary(left, prec, BinaryOp::Pow),
            TokenKind::EqualEqual => self.arith_binary(left, prec, BinaryOp::Eq),
            TokenKind::BangEqual => self.arith_binary(left, prec, BinaryOp::Ne),
            TokenKind::Less => self.arith_binary(left, prec, BinaryOp::Lt),
            TokenKind::Greater => self.arith_binary(left, prec, BinaryOp::Gt),
            TokenKind::LessEqual => self.arith_binary(left, prec, BinaryOp::Le),
            TokenKind::GreaterEqual => self.arith_binary(left, prec, BinaryOp::Ge),
            TokenKind::In => self.arith_binary(left, prec, BinaryOp::In),
            TokenKind::DotDot => self.arith_binary(left, prec, BinaryOp::Concat),

            TokenKind::Or => {
                let token = self.advance();
                let right = self.expression(prec.next())?;
                Ok(self.alloc(token, Node::Binary { op: BinaryOp::Or, left, right }))
            }
            TokenKind::And => {
                let token = self.advance();
                let right = self.expression(prec.next())?;
                Ok(self.alloc(token, Node::Binary { op: BinaryOp::And, left, right }))
            }
            TokenKind::Dot => {
                let token = self.advance();
                let right = self.expression(prec.next())?;
                Ok(self.alloc(token, Node::Binary { op: BinaryOp::Compose, left, right }))
            }
            TokenKind::Comma => {
                let token = self.advance();
                // right-associative: recurse at the same precedence
                let right = self.expression(prec)?;
                Ok(self.alloc(token, Node::Binary { op: BinaryOp::Construct, left, right }))
            }
            TokenKind::Equal => {
                let token = self.advance();
                let right = self.expression(prec)?;
                Ok(self.alloc(token, Node::Binary { op: BinaryOp::Assign, left, right }))
            }
            TokenKind::Colon => {
                let token = self.advance();
                self.finish_fn_literal(left, token)
            }
            TokenKind::Custom | TokenKind::LShift => {
                let token = self.advance();
                let right = self.expression(prec.next())?;
                let name = self.alloc(token, Node::Literal(LiteralKind::Identifier));
                self.finish_call(name, vec![left, right], token)
            }
            TokenKind::Question => {
                let token = self.advance();
                Ok(self.alloc(token, Node::Unary { op: UnaryOp::Test, operand: left }))
            }
            TokenKind::PipeGreater => {
                let token = self.advance();
                let callee = self.expression(prec.next())?;
                self.finish_call(callee, vec![left], token)
            }
            TokenKind::Dollar => {
                let token = self.advance();
                let right = self.expression(prec)?;
                self.finish_call(left, vec![right], token)
            }
            TokenKind::LParen => {
                let token = self.advance();
                let args = self.parse_paren_args()?;
                self.finish_call(left, args, token)
            }
            TokenKind::LBracket => self.bracket_tail(left),
            _ => unreachable!("tail_precedence admitted a kind with no infix rule"),
        }
    }

    fn arith_binary(&mut self, left: ExprId, prec: Precedence, op: BinaryOp) -> PResult<ExprId> {
        let token = self.advance();
        let right = self.expression(prec.next())?;
        let node = self.alloc(token, Node::Binary { op, left, right });
        Ok(self.desugar_wildcards(node, token))
    }

    // ---- calls and partial application --------------------------------

    fn finish_juxtaposition(&mut self, callee: ExprId) -> PResult<ExprId> {
        let token = self.arena.get(callee).token;
        let mut args = Vec::new();
        while is_argument_starter(self.current().kind) {
            args.push(self.expression(Precedence::Primary)?);
        }
        self.finish_call(callee, args, token)
    }

    fn parse_paren_args(&mut self) -> PResult<Vec<ExprId>> {
        let mut args = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                args.push(self.expression(Precedence::Conditional.next())?);
                if self.match_tok(TokenKind::Comma) {
                    continue;
                }
                break;
            }
        }
        self.expect(TokenKind::RParen, "expected ')' after arguments")?;
        Ok(args)
    }

    fn finish_call(&mut self, callee: ExprId, args: Vec<ExprId>, token: Token) -> PResult<ExprId> {
        let mut params = Vec::new();
        let resolved: Vec<ExprId> = args.into_iter().map(|a| self.replace_wildcard(a, &mut params)).collect();
        let arg_block = self.alloc(token, Node::Block { kind: BlockKind::ArgList, children: resolved });
        let call = self.alloc(token, Node::Binary { op: BinaryOp::Call, left: callee, right: arg_block });
        Ok(self.wrap_if_partial(call, params, token))
    }

    fn replace_wildcard(&mut self, id: ExprId, params: &mut Vec<ExprId>) -> ExprId {
        if self.is_wildcard_literal(id) {
            let token = self.arena.get(id).token;
            let idx = self.fresh_synthetic_name();
            let synthetic = self.alloc(token, Node::Literal(LiteralKind::SyntheticIdentifier(idx)));
            params.push(synthetic);
            synthetic
        } else {
            id
        }
    }

    fn desugar_wildcards(&mut self, node: ExprId, token: Token) -> ExprId {
        let (left, right) = match self.arena.get(node).node {
            Node::Binary { left, right, .. } => (left, right),
            _ => return node,
        };
        let mut params = Vec::new();
        let new_left = self.replace_wildcard(left, &mut params);
        let new_right = self.replace_wildcard(right, &mut params);
        if params.is_empty() {
            return node;
        }
        if let Node::Binary { op, .. } = self.arena.get(node).node {
            let rebuilt = self.alloc(token, Node::Binary { op, left: new_left, right: new_right });
            return self.wrap_if_partial(rebuilt, params, token);
        }
        node
    }

    fn wrap_if_partial(&mut self, body: ExprId, params: Vec<ExprId>, token: Token) -> ExprId {
        if params.is_empty() {
            return body;
        }
        let param_block = self.alloc(token, Node::Block { kind: BlockKind::ParamBlock, children: params });
        let name = self.alloc(token, Node::Literal(LiteralKind::Wildcard));
        self.alloc(
            token,
            Node::Ternary {
                op: TernaryOp::FnLiteral,
                pivot: param_block,
                left: name,
                right: body,
            },
        )
    }

    // ---- function literals --------------------------------------------

    fn finish_fn_literal(&mut self, name: ExprId, colon_token: Token) -> PResult<ExprId> {
        let valid_name = matches!(
            self.arena.get(name).node,
            Node::Literal(LiteralKind::Identifier) | Node::Literal(LiteralKind::Wildcard) | Node::Literal(LiteralKind::Glyph)
        );
        if !valid_name {
            self.error_here("expected a name before ':' in a function literal");
        }

        let mut params = Vec::new();
        while matches!(self.current().kind, TokenKind::Identifier | TokenKind::Wildcard) {
            let ptoken = self.advance();
            let kind = if ptoken.kind == TokenKind::Wildcard {
                LiteralKind::Wildcard
            } else {
                LiteralKind::Identifier
            };
            params.push(self.alloc(ptoken, Node::Literal(kind)));
        }
        let param_block = self.alloc(colon_token, Node::Block { kind: BlockKind::ParamBlock, children: params });

        self.expect(TokenKind::Equal, "expected '=' after function parameters")?;
        let body = self.expression(Precedence::Assignment)?;

        Ok(self.alloc(
            colon_token,
            Node::Ternary {
                op: TernaryOp::FnLiteral,
                pivot: param_block,
                left: name,
                right: body,
            },
        ))
    }

    // ---- grouping, if, match -------------------------------------------

    fn grouping(&mut self) -> PResult<ExprId> {
        self.advance(); // '('
        let inner = self.expression(Precedence::Assignment)?;
        self.expect(TokenKind::RParen, "expected ')'")?;
        Ok(inner)
    }

    fn if_expr(&mut self) -> PResult<ExprId> {
        let token = self.advance(); // 'if'
        let pivot = self.expression(Precedence::Assignment)?;
        self.expect(TokenKind::Then, "expected 'then'")?;
        let left = self.expression(Precedence::Assignment)?;
        self.expect(TokenKind::Else, "expected 'else'")?;
        let right = self.expression(Precedence::Assignment)?;
        Ok(self.alloc(token, Node::Ternary { op: TernaryOp::If, pivot, left, right }))
    }

    fn match_expr(&mut self) -> PResult<ExprId> {
        let token = self.advance(); // 'match'
        let subject = self.expression(Precedence::Conditional)?;
        let mut arms = Vec::new();
        while self.check(TokenKind::Pipe) {
            let arm_token = self.advance();
            let pattern = self.expression(Precedence::Conditional)?;
            self.expect(TokenKind::FatArrow, "expected '=>' in match arm")?;
            let body = self.expression(Precedence::Conditional)?;
            arms.push(self.alloc(arm_token, Node::Binary { op: BinaryOp::CaseArm, left: pattern, right: body }));
        }
        let arms_block = self.alloc(token, Node::Block { kind: BlockKind::CaseArms, children: arms });
        Ok(self.alloc(token, Node::Binary { op: BinaryOp::Match, left: subject, right: arms_block }))
    }

    // ---- list / map literals, subscript, slice --------------------------

    fn list_or_map_literal(&mut self) -> PResult<ExprId> {
        let token = self.advance(); // '['
        if self.check(TokenKind::RBracket) {
            self.advance();
            return Ok(self.alloc(token, Node::Block { kind: BlockKind::ListLiteral, children: Vec::new() }));
        }
        if self.check(TokenKind::FatArrow) {
            self.advance();
            self.expect(TokenKind::RBracket, "expected ']' after '=>' in empty map literal")?;
            return Ok(self.alloc(token, Node::Block { kind: BlockKind::MapLiteral, children: Vec::new() }));
        }

        let first = self.expression(Precedence::Conditional)?;
        if self.check(TokenKind::FatArrow) {
            let first_token = self.arena.get(first).token;
            self.advance();
            let value = self.expression(Precedence::Conditional)?;
            let mut entries = vec![self.alloc(first_token, Node::Binary { op: BinaryOp::MapEntry, left: first, right: value })];
            while self.match_tok(TokenKind::Semicolon) {
                if self.check(TokenKind::RBracket) {
                    break;
                }
                let key = self.expression(Precedence::Conditional)?;
                let key_token = self.arena.get(key).token;
                self.expect(TokenKind::FatArrow, "expected '=>' in map literal")?;
                let value = self.expression(Precedence::Conditional)?;
                entries.push(self.alloc(key_token, Node::Binary { op: BinaryOp::MapEntry, left: key, right: value }));
            }
            self.expect(TokenKind::RBracket, "expected ']' to close map literal")?;
            Ok(self.alloc(token, Node::Block { kind: BlockKind::MapLiteral, children: entries }))
        } else {
            let mut items = vec![first];
            while self.match_tok(TokenKind::Semicolon) {
                if self.check(TokenKind::RBracket) {
                    break;
                }
                items.push(self.expression(Precedence::Conditional)?);
            }
            self.expect(TokenKind::RBracket, "expected ']' to close list literal")?;
            Ok(self.alloc(token, Node::Block { kind: BlockKind::ListLiteral, children: items }))
        }
    }

    fn bracket_tail(&mut self, receiver: ExprId) -> PResult<ExprId> {
        let token = self.advance(); // '['
        if self.check(TokenKind::Colon) {
            self.advance();
            if self.match_tok(TokenKind::RBracket) {
                return Ok(self.make_slice(receiver, SliceMode::Open, None, None, token));
            }
            let upper = self.expression(Precedence::Assignment)?;
            self.expect(TokenKind::RBracket, "expected ']' to close slice")?;
            return Ok(self.make_slice(receiver, SliceMode::UpperOnly, None, Some(upper), token));
        }

        let index = self.expression(Precedence::Assignment)?;
        if self.check(TokenKind::Colon) {
            self.advance();
            if self.match_tok(TokenKind::RBracket) {
                return Ok(self.make_slice(receiver, SliceMode::LowerOnly, Some(index), None, token));
            }
            let upper = self.expression(Precedence::Assignment)?;
            self.expect(TokenKind::RBracket, "expected ']' to close slice")?;
            return Ok(self.make_slice(receiver, SliceMode::Both, Some(index), Some(upper), token));
        }

        self.expect(TokenKind::RBracket, "expected ']' after index")?;
        let node = self.alloc(token, Node::Binary { op: BinaryOp::Subscript, left: receiver, right: index });
        Ok(self.desugar_wildcards(node, token))
    }

    fn make_slice(
        &mut self,
        receiver: ExprId,
        mode: SliceMode,
        lower: Option<ExprId>,
        upper: Option<ExprId>,
        token: Token,
    ) -> ExprId {
        let open = self.alloc(token, Node::Literal(LiteralKind::Unit));
        let left = lower.unwrap_or(open);
        let right = upper.unwrap_or(open);
        // the receiver participates via a nested Subscript-shaped wrapper:
        // `Slice` describes only the bounds, so pair it with the receiver
        // through a Call-like binary whose callee is the receiver itself.
        let bounds = self.alloc(token, Node::Binary { op: BinaryOp::Slice(mode), left, right });
        self.alloc(token, Node::Binary { op: BinaryOp::Subscript, left: receiver, right: bounds })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> ParseResult {
        let result = parse(source);
        assert!(!result.diagnostics.has_errors(), "unexpected errors: {:?}", result.diagnostics.errors());
        result
    }

    fn program_children(result: &ParseResult) -> &[ExprId] {
        match &result.arena.get(result.root).node {
            Node::Block { children, .. } => children,
            _ => panic!("expected Program block"),
        }
    }

    #[test]
    fn parses_precedence_correctly() {
        let result = parse_ok("1 + 2 * 3");
        let children = program_children(&result);
        assert_eq!(children.len(), 1);
        match &result.arena.get(children[0]).node {
            Node::Binary { op: BinaryOp::Add, left, right } => {
                assert!(matches!(result.arena.get(*left).node, Node::Literal(LiteralKind::Int)));
                assert!(matches!(result.arena.get(*right).node, Node::Binary { op: BinaryOp::Mul, .. }));
            }
            other => panic!("expected top-level Add, got {:?}", other),
        }
    }

    #[test]
    fn parses_function_definition_and_call() {
        let result = parse_ok("add: a b = a + b; add 2 3");
        let children = program_children(&result);
        assert_eq!(children.len(), 2);
        assert!(matches!(result.arena.get(children[0]).node, Node::Ternary { op: TernaryOp::FnLiteral, .. }));
        assert!(matches!(result.arena.get(children[1]).node, Node::Binary { op: BinaryOp::Call, .. }));
    }

    #[test]
    fn juxtaposition_call_collects_all_arguments() {
        let result = parse_ok("f a b c");
        let children = program_children(&result);
        match &result.arena.get(children[0]).node {
            Node::Binary { op: BinaryOp::Call, right, .. } => match &result.arena.get(*right).node {
                Node::Block { kind: BlockKind::ArgList, children } => assert_eq!(children.len(), 3),
                _ => panic!("expected ArgList"),
            },
            other => panic!("expected Call, got {:?}", other),
        }
    }

    #[test]
    fn wildcard_argument_desugars_to_partial_application() {
        let result = parse_ok("map (_+1) [1;2;3]");
        // top-level call is `map(...)`; first arg is the wrapped lambda
        let children = program_children(&result);
        match &result.arena.get(children[0]).node {
            Node::Binary { op: BinaryOp::Call, right, .. } => match &result.arena.get(*right).node {
                Node::Block { children, .. } => {
                    assert!(matches!(
                        result.arena.get(children[0]).node,
                        Node::Ternary { op: TernaryOp::FnLiteral, .. }
                    ));
                }
                _ => panic!("expected ArgList"),
            },
            other => panic!("expected outer Call, got {:?}", other),
        }
        assert_eq!(result.synthetic_names.len(), 1);
        assert_eq!(result.synthetic_names[0], "000");
    }

    #[test]
    fn list_literal_parses_semicolon_separated_elements() {
        let result = parse_ok("[1;2;3]");
        let children = program_children(&result);
        match &result.arena.get(children[0]).node {
            Node::Block { kind: BlockKind::ListLiteral, children } => assert_eq!(children.len(), 3),
            other => panic!("expected ListLiteral, got {:?}", other),
        }
    }

    #[test]
    fn map_literal_detects_fat_arrow_after_first_element() {
        let result = parse_ok("[a => 1; b => 2]");
        let children = program_children(&result);
        match &result.arena.get(children[0]).node {
            Node::Block { kind: BlockKind::MapLiteral, children } => assert_eq!(children.len(), 2),
            other => panic!("expected MapLiteral, got {:?}", other),
        }
    }

    #[test]
    fn match_expression_collects_arms() {
        let result = parse_ok("match 2 | 1 => \"a\" | 2 => \"b\" | _ => \"c\"");
        let children = program_children(&result);
        match &result.arena.get(children[0]).node {
            Node::Binary { op: BinaryOp::Match, right, .. } => match &result.arena.get(*right).node {
                Node::Block { kind: BlockKind::CaseArms, children } => assert_eq!(children.len(), 3),
                _ => panic!("expected CaseArms"),
            },
            other => panic!("expected Match, got {:?}", other),
        }
    }

    #[test]
    fn comma_is_right_associative_cons() {
        let result = parse_ok("1, 2, 3");
        let children = program_children(&result);
        match &result.arena.get(children[0]).node {
            Node::Binary { op: BinaryOp::Construct, right, .. } => {
                assert!(matches!(result.arena.get(*right).node, Node::Binary { op: BinaryOp::Construct, .. }));
            }
            other => panic!("expected Construct, got {:?}", other),
        }
    }

    #[test]
    fn malformed_input_recovers_and_keeps_parsing() {
        let result = parse("1 + ; 2 + 3");
        assert!(result.diagnostics.has_errors());
        let children = program_children(&result);
        assert!(children.len() >= 1);
    }

    #[test]
    fn slice_with_both_bounds_parses() {
        let result = parse_ok("a[1:2]");
        let children = program_children(&result);
        assert!(matches!(result.arena.get(children[0]).node, Node::Binary { op: BinaryOp::Subscript, .. }));
    }
}
