//! Single-pass tree-to-bytecode compiler (§4.3).
//!
//! Walks the expression tree produced by [`hammer_lang::parser::parse`]
//! exactly once, emitting flat bytecode into a [`Chunk`] per function scope.
//! There is no separate resolver pass: name resolution, local slot
//! assignment, upvalue capture, and constant folding all happen inline as
//! each node is visited.
//!
//! Locals are purely positional - there is no `SET_LOCAL` instruction. A
//! local's one and only write is the value landing on the stack at its slot
//! when it is declared; every later appearance of its name is a `GET_LOCAL`
//! read of that same slot.

use hammer_base::{Diagnostics, SpannedError};
use hammer_lang::ast::{
    BinaryOp, BlockKind, Expr, ExprArena, ExprId, LiteralKind, Node, SliceMode as AstSliceMode, TernaryOp, UnaryOp,
};
use hammer_lang::parser::{parse, ParseResult};
use hammer_lang::token::Token;

use crate::chunk::Chunk;
use crate::gc::Heap;
use crate::object::ObjRef;
use crate::opcode::{OpCode, SliceMode};
use crate::value::Value;

/// One name bound in the function scope currently being compiled.
struct Local {
    /// `None` for the reserved slot-0 entry and for wildcard parameters -
    /// never resolved by name.
    name: Option<ObjRef>,
    /// `-1` while the initializer of this local is still being compiled;
    /// referencing the name at that point is a self-initializer error.
    depth: i32,
}

struct UpvalueDesc {
    is_local: bool,
    index: u8,
}

/// Compile-time state for one function body: the top-level script, a named
/// function, or an anonymous lambda.
struct FunctionScope {
    name: Option<ObjRef>,
    arity: u8,
    chunk: Chunk,
    locals: Vec<Local>,
    upvalues: Vec<UpvalueDesc>,
    scope_depth: i32,
}

impl FunctionScope {
    fn new(name: Option<ObjRef>) -> Self {
        FunctionScope {
            name,
            arity: 0,
            chunk: Chunk::new(),
            // Slot 0 is reserved for the callee itself, matching CALL's
            // calling convention; it is never looked up by name.
            locals: vec![Local { name: None, depth: 0 }],
            upvalues: Vec::new(),
            scope_depth: 0,
        }
    }
}

pub struct Compiler<'a> {
    heap: &'a mut Heap,
    arena: &'a ExprArena,
    source: &'a str,
    synthetic_names: &'a [String],
    diagnostics: Diagnostics,
    scopes: Vec<FunctionScope>,
}

/// Compiles `source` into a top-level function object and installs it on
/// `heap`. The heap is not collected against while compiling - callers are
/// expected to leave `heap.is_active` false until compilation finishes (I3).
pub fn compile(source: &str, heap: &mut Heap) -> Result<ObjRef, Diagnostics> {
    let ParseResult { arena, root, synthetic_names, diagnostics } = parse(source);
    let mut compiler = Compiler {
        heap: &mut *heap,
        arena: &arena,
        source,
        synthetic_names: &synthetic_names,
        diagnostics,
        scopes: vec![FunctionScope::new(None)],
    };
    compiler.compile_tail(root);
    let scope = compiler.scopes.pop().expect("the script scope is never popped before this point");
    let diagnostics = compiler.diagnostics;
    if diagnostics.has_errors() {
        return Err(diagnostics);
    }
    Ok(heap.new_function(scope.name, scope.arity, scope.chunk))
}

impl<'a> Compiler<'a> {
    fn node(&self, id: ExprId) -> &'a Expr {
        self.arena.get(id)
    }

    fn current_scope(&mut self) -> &mut FunctionScope {
        self.scopes.last_mut().expect("a compiler always has an active function scope")
    }

    fn error(&mut self, token: Token, message: impl Into<String>) {
        self.diagnostics.report(SpannedError::new(message.into(), token.span()));
    }

    // -- emission -----------------------------------------------------

    fn emit_byte(&mut self, byte: u8, token: Token) {
        self.current_scope().chunk.write_byte(byte, token.line);
    }

    fn emit_op(&mut self, op: OpCode, token: Token) {
        self.current_scope().chunk.write_op(op, token.line);
    }

    fn emit_short(&mut self, value: u16, token: Token) {
        self.current_scope().chunk.write_short(value, token.line);
    }

    fn emit_jump(&mut self, op: OpCode, token: Token) -> usize {
        self.current_scope().chunk.emit_jump(op, token.line)
    }

    fn patch_jump(&mut self, offset: usize, token: Token) {
        if self.current_scope().chunk.patch_jump(offset).is_err() {
            self.error(token, "jump target too far away to encode");
        }
    }

    fn emit_constant(&mut self, value: Value, token: Token) {
        match self.current_scope().chunk.add_constant(value) {
            Some(idx) => {
                self.emit_op(OpCode::Loadv, token);
                self.emit_byte(idx, token);
            }
            None => self.error(token, "function has too many constants"),
        }
    }

    /// Small whole-number literals use the dedicated immediate
    /// instructions instead of spending a constant-pool slot.
    fn emit_number(&mut self, value: Value, token: Token) {
        match value {
            Value::Int(n) if (0..=u16::MAX as i64).contains(&n) => {
                self.emit_op(OpCode::IntP, token);
                self.emit_short(n as u16, token);
            }
            Value::Int(n) if (-(u16::MAX as i64)..0).contains(&n) => {
                self.emit_op(OpCode::IntN, token);
                self.emit_short((-n) as u16, token);
            }
            Value::Float(f) if f >= 0.0 && f.fract() == 0.0 && f <= u16::MAX as f64 => {
                self.emit_op(OpCode::FloatP, token);
                self.emit_short(f as u16, token);
            }
            Value::Float(f) if f < 0.0 && (-f).fract() == 0.0 && -f <= u16::MAX as f64 => {
                self.emit_op(OpCode::FloatN, token);
                self.emit_short((-f) as u16, token);
            }
            other => self.emit_constant(other, token),
        }
    }

    fn emit_char(&mut self, c: char, token: Token) {
        if (c as u32) <= 0xFF {
            self.emit_op(OpCode::Char, token);
            self.emit_byte(c as u8, token);
        } else {
            self.emit_constant(Value::Char(c), token);
        }
    }

    // -- scope bookkeeping ---------------------------------------------

    fn begin_scope(&mut self) {
        self.current_scope().scope_depth += 1;
    }

    /// Pops every local declared at the scope being exited and returns how
    /// many there were, for the caller to encode in `RETURN_SCOPE`.
    fn end_scope(&mut self) -> u8 {
        let scope = self.current_scope();
        scope.scope_depth -= 1;
        let depth = scope.scope_depth;
        let mut discarded: u8 = 0;
        while let Some(local) = scope.locals.last() {
            if local.depth > depth {
                scope.locals.pop();
                discarded += 1;
            } else {
                break;
            }
        }
        discarded
    }

    fn declare_local(&mut self, target: ObjRef) -> u8 {
        let scope = self.current_scope();
        scope.locals.push(Local { name: Some(target), depth: -1 });
        (scope.locals.len() - 1) as u8
    }

    fn mark_initialized(&mut self, slot: u8) {
        let depth = self.current_scope().scope_depth;
        self.current_scope().locals[slot as usize].depth = depth;
    }

    // -- name resolution -------------------------------------------------

    /// The textual name a leaf name-node stands for - an identifier lexeme,
    /// a back-quoted glyph with its quote stripped, or a synthetic name
    /// manufactured for a partially-applied operator.
    fn name_of(&self, id: ExprId) -> &'a str {
        let expr = self.node(id);
        match &expr.node {
            Node::Literal(LiteralKind::Identifier) => expr.token.lexeme(self.source),
            Node::Literal(LiteralKind::Glyph) => &expr.token.lexeme(self.source)[1..],
            Node::Literal(LiteralKind::SyntheticIdentifier(idx)) => &self.synthetic_names[*idx as usize],
            _ => unreachable!("name_of called on a node that is not a name"),
        }
    }

    /// Resolves a reference to `name`: a local in the current scope, else
    /// an upvalue captured from an enclosing scope, else a global.
    fn compile_reference(&mut self, name: &str, token: Token) {
        let target = self.heap.intern(name);
        let scope_idx = self.scopes.len() - 1;
        if let Some(slot) = self.resolve_local(scope_idx, target, token) {
            self.emit_op(OpCode::GetLocal, token);
            self.emit_byte(slot, token);
            return;
        }
        if let Some(idx) = self.resolve_upvalue(scope_idx, target) {
            self.emit_op(OpCode::Upvalue, token);
            self.emit_byte(idx, token);
            return;
        }
        match self.current_scope().chunk.add_constant(Value::Obj(target)) {
            Some(idx) => {
                self.emit_op(OpCode::GetGlobal, token);
                self.emit_byte(idx, token);
            }
            None => self.error(token, "too many constants to reference this global"),
        }
    }

    fn resolve_local(&mut self, scope_idx: usize, target: ObjRef, token: Token) -> Option<u8> {
        let scope = &self.scopes[scope_idx];
        for (slot, local) in scope.locals.iter().enumerate().rev() {
            if local.name == Some(target) {
                if local.depth == -1 {
                    self.error(token, "cannot reference a local variable in its own initializer");
                }
                return Some(slot as u8);
            }
        }
        None
    }

    fn resolve_upvalue(&mut self, scope_idx: usize, target: ObjRef) -> Option<u8> {
        if scope_idx == 0 {
            return None;
        }
        let enclosing_idx = scope_idx - 1;
        let local_slot = self.scopes[enclosing_idx]
            .locals
            .iter()
            .enumerate()
            .rev()
            .find(|(_, l)| l.name == Some(target))
            .map(|(slot, _)| slot as u8);
        let desc = if let Some(slot) = local_slot {
            UpvalueDesc { is_local: true, index: slot }
        } else {
            let outer = self.resolve_upvalue(enclosing_idx, target)?;
            UpvalueDesc { is_local: false, index: outer }
        };
        Some(self.add_upvalue(scope_idx, desc))
    }

    fn add_upvalue(&mut self, scope_idx: usize, desc: UpvalueDesc) -> u8 {
        let scope = &mut self.scopes[scope_idx];
        if let Some(i) = scope.upvalues.iter().position(|u| u.is_local == desc.is_local && u.index == desc.index) {
            return i as u8;
        }
        scope.upvalues.push(desc);
        (scope.upvalues.len() - 1) as u8
    }

    // -- top-level expression dispatch -----------------------------------

    fn compile_expr(&mut self, id: ExprId) {
        let expr = self.node(id);
        let token = expr.token;
        match &expr.node {
            Node::Literal(_) => self.compile_literal(id),
            Node::Unary { op, operand } => {
                let (op, operand) = (*op, *operand);
                self.compile_unary(op, operand, token);
            }
            Node::Binary { op, left, right } => {
                let (op, left, right) = (*op, *left, *right);
                self.compile_binary(op, left, right, token);
            }
            Node::Ternary { op, pivot, left, right } => {
                let (op, pivot, left, right) = (*op, *pivot, *left, *right);
                self.compile_ternary(op, pivot, left, right, token);
            }
            Node::Block { kind, children } => {
                let kind = *kind;
                self.compile_block_expr(kind, children, token);
            }
        }
    }

    /// Compiles `id` in tail position: every path through it ends with a
    /// `RETURN` or `TAIL_CALL`, so the enclosing function never needs to
    /// resume after it.
    fn compile_tail(&mut self, id: ExprId) {
        let expr = self.node(id);
        let token = expr.token;
        match &expr.node {
            Node::Block { kind: BlockKind::Program, children } => {
                self.compile_statement_sequence(children, token, true);
            }
            Node::Block { kind: BlockKind::ExprBlock, children } => {
                self.begin_scope();
                self.compile_statement_sequence(children, token, true);
                self.end_scope();
            }
            Node::Binary { op: BinaryOp::Call, left, right } => {
                let (left, right) = (*left, *right);
                self.compile_call_tail(left, right, token);
            }
            Node::Ternary { op: TernaryOp::If, pivot, left, right } => {
                let (pivot, left, right) = (*pivot, *left, *right);
                self.compile_if(pivot, left, right, true, token);
            }
            Node::Binary { op: BinaryOp::Match, left, right } => {
                let (subject, arms) = (*left, *right);
                self.compile_match(subject, arms, true, token);
            }
            _ => {
                self.compile_expr(id);
                self.emit_op(OpCode::Return, token);
            }
        }
    }

    fn compile_statement_sequence(&mut self, children: &'a [ExprId], token: Token, tail: bool) {
        if children.is_empty() {
            self.emit_op(OpCode::Unit, token);
            if tail {
                self.emit_op(OpCode::Return, token);
            }
            return;
        }
        for &stmt in &children[..children.len() - 1] {
            self.compile_expr(stmt);
            let stmt_token = self.node(stmt).token;
            self.emit_op(OpCode::Pop, stmt_token);
        }
        let last = children[children.len() - 1];
        if tail {
            self.compile_tail(last);
        } else {
            self.compile_expr(last);
        }
    }

    fn compile_block_expr(&mut self, kind: BlockKind, children: &'a [ExprId], token: Token) {
        match kind {
            BlockKind::Program | BlockKind::ExprBlock => {
                let scoped = kind == BlockKind::ExprBlock;
                if scoped {
                    self.begin_scope();
                }
                self.compile_statement_sequence(children, token, false);
                if scoped {
                    let k = self.end_scope();
                    if k > 0 {
                        self.emit_op(OpCode::ReturnScope, token);
                        self.emit_byte(k, token);
                    }
                }
            }
            BlockKind::ListLiteral => self.compile_list_literal(children, token),
            BlockKind::MapLiteral => self.compile_map_literal(children, token),
            BlockKind::CaseArms | BlockKind::ParamBlock | BlockKind::ArgList => {
                unreachable!("this block kind is only ever reached through its owning node")
            }
        }
    }

    fn compile_list_literal(&mut self, children: &'a [ExprId], token: Token) {
        for &item in children {
            self.compile_expr(item);
        }
        self.emit_op(OpCode::List, token);
        self.emit_byte(children.len() as u8, token);
    }

    fn compile_map_literal(&mut self, entries: &'a [ExprId], token: Token) {
        for &entry in entries {
            let (key, value) = match &self.node(entry).node {
                Node::Binary { op: BinaryOp::MapEntry, left, right } => (*left, *right),
                _ => unreachable!("map literal children are always MapEntry nodes"),
            };
            self.compile_expr(key);
            self.compile_expr(value);
        }
        self.emit_op(OpCode::Map, token);
        self.emit_byte(entries.len() as u8, token);
    }

    // -- literals ---------------------------------------------------------

    fn compile_literal(&mut self, id: ExprId) {
        let expr = self.node(id);
        let token = expr.token;
        match &expr.node {
            Node::Literal(LiteralKind::Int) => match token.lexeme(self.source).parse::<i64>() {
                Ok(n) => self.emit_number(Value::Int(n), token),
                Err(_) => self.error(token, format!("invalid integer literal '{}'", token.lexeme(self.source))),
            },
            Node::Literal(LiteralKind::Float) => match token.lexeme(self.source).parse::<f64>() {
                Ok(f) => self.emit_number(Value::Float(f), token),
                Err(_) => self.error(token, format!("invalid float literal '{}'", token.lexeme(self.source))),
            },
            Node::Literal(LiteralKind::Str) => {
                let text = unescape_quoted(token.lexeme(self.source));
                let r = self.heap.intern(&text);
                self.emit_constant(Value::Obj(r), token);
            }
            Node::Literal(LiteralKind::FormatStr) => {
                // Drop the leading `f`; the `{n}` placeholder grammar is
                // parsed at runtime by the native that formats it, not here.
                let text = unescape_quoted(&token.lexeme(self.source)[1..]);
                let r = self.heap.intern(&text);
                self.emit_constant(Value::Obj(r), token);
            }
            Node::Literal(LiteralKind::Char) => {
                let lexeme = token.lexeme(self.source);
                let inner = &lexeme[1..lexeme.len() - 1];
                let c = unescape(inner).chars().next().unwrap_or('\0');
                self.emit_char(c, token);
            }
            Node::Literal(LiteralKind::Bool(b)) => {
                let op = if *b { OpCode::True } else { OpCode::False };
                self.emit_op(op, token);
            }
            Node::Literal(LiteralKind::Unit) => self.emit_op(OpCode::Unit, token),
            Node::Literal(LiteralKind::Identifier) => {
                let name = token.lexeme(self.source);
                self.compile_reference(name, token);
            }
            Node::Literal(LiteralKind::Glyph) => {
                let name = &token.lexeme(self.source)[1..];
                self.compile_reference(name, token);
            }
            Node::Literal(LiteralKind::SyntheticIdentifier(idx)) => {
                let name = self.synthetic_names[*idx as usize].clone();
                self.compile_reference(&name, token);
            }
            Node::Literal(LiteralKind::Wildcard) => {
                self.error(token, "'_' cannot be used as a value");
                self.emit_op(OpCode::Unit, token);
            }
            _ => unreachable!("compile_literal called on a non-literal node"),
        }
    }

    fn literal_number(&self, id: ExprId) -> Option<Value> {
        let expr = self.node(id);
        match &expr.node {
            Node::Literal(LiteralKind::Int) => expr.token.lexeme(self.source).parse::<i64>().ok().map(Value::Int),
            Node::Literal(LiteralKind::Float) => expr.token.lexeme(self.source).parse::<f64>().ok().map(Value::Float),
            _ => None,
        }
    }

    // -- unary --------------------------------------------------------------

    fn compile_unary(&mut self, op: UnaryOp, operand: ExprId, token: Token) {
        match op {
            UnaryOp::Negate => match self.literal_number(operand) {
                Some(Value::Int(n)) => self.emit_number(Value::Int(n.wrapping_neg()), token),
                Some(Value::Float(f)) => self.emit_number(Value::Float(-f), token),
                _ => {
                    self.compile_expr(operand);
                    self.emit_op(OpCode::Negate, token);
                }
            },
            UnaryOp::Not => {
                self.compile_expr(operand);
                self.emit_op(OpCode::Not, token);
            }
            UnaryOp::Test => {
                self.compile_expr(operand);
                self.emit_op(OpCode::Truthy, token);
            }
            UnaryOp::Car => {
                self.compile_expr(operand);
                self.emit_op(OpCode::Car, token);
            }
            UnaryOp::Cdr => {
                self.compile_expr(operand);
                self.emit_op(OpCode::Cdr, token);
            }
            UnaryOp::Return => {
                self.compile_expr(operand);
                self.emit_op(OpCode::Return, token);
            }
        }
    }

    // -- binary ---------------------------------------------------------

    fn compile_binary(&mut self, op: BinaryOp, left: ExprId, right: ExprId, token: Token) {
        match op {
            BinaryOp::Add => self.compile_arith(OpCode::Add, left, right, token),
            BinaryOp::Sub => self.compile_arith(OpCode::Subtract, left, right, token),
            BinaryOp::Mul => self.compile_arith(OpCode::Multiply, left, right, token),
            BinaryOp::Div => self.compile_arith(OpCode::Divide, left, right, token),
            BinaryOp::Mod => self.compile_arith(OpCode::Modulo, left, right, token),
            BinaryOp::Pow => self.compile_arith(OpCode::Exponent, left, right, token),
            BinaryOp::Eq => {
                self.compile_expr(left);
                self.compile_expr(right);
                self.emit_op(OpCode::Equals, token);
            }
            BinaryOp::Ne => {
                self.compile_expr(left);
                self.compile_expr(right);
                self.emit_op(OpCode::Equals, token);
                self.emit_op(OpCode::Not, token);
            }
            // DIFF/DIFF_EQ compute "a > b" / "a >= b" from whatever is
            // pushed first/second; `<` and `<=` swap operands onto that.
            BinaryOp::Lt => {
                self.compile_expr(right);
                self.compile_expr(left);
                self.emit_op(OpCode::Diff, token);
            }
            BinaryOp::Le => {
                self.compile_expr(right);
                self.compile_expr(left);
                self.emit_op(OpCode::DiffEq, token);
            }
            BinaryOp::Gt => {
                self.compile_expr(left);
                self.compile_expr(right);
                self.emit_op(OpCode::Diff, token);
            }
            BinaryOp::Ge => {
                self.compile_expr(left);
                self.compile_expr(right);
                self.emit_op(OpCode::DiffEq, token);
            }
            BinaryOp::Or => self.compile_or(left, right, token),
            BinaryOp::And => self.compile_and(left, right, token),
            BinaryOp::Concat => {
                if let Some(folded) = self.try_fold_concat(left, right) {
                    self.emit_constant(folded, token);
                } else {
                    self.compile_expr(left);
                    self.compile_expr(right);
                    self.emit_op(OpCode::Concat, token);
                }
            }
            BinaryOp::Construct => {
                self.compile_expr(left);
                self.compile_expr(right);
                self.emit_op(OpCode::Construct, token);
            }
            BinaryOp::Compose => {
                self.compile_expr(left);
                self.compile_expr(right);
                self.emit_op(OpCode::Compose, token);
            }
            BinaryOp::In => {
                self.compile_expr(left);
                self.compile_expr(right);
                self.emit_op(OpCode::In, token);
            }
            BinaryOp::Subscript => self.compile_subscript(left, right, token),
            BinaryOp::Slice(_) => unreachable!("slice nodes are only ever a subscript's right child"),
            BinaryOp::Assign => self.compile_assign(left, right, token),
            BinaryOp::Call => self.compile_call(left, right, token),
            BinaryOp::CaseArm => unreachable!("case arms are only compiled from inside compile_match"),
            BinaryOp::MapEntry => unreachable!("map entries are only compiled from inside compile_map_literal"),
            BinaryOp::Match => self.compile_match(left, right, false, token),
        }
    }

    fn compile_arith(&mut self, op: OpCode, left: ExprId, right: ExprId, token: Token) {
        if let Some(folded) = self.try_fold_arith(op, left, right) {
            self.emit_number(folded, token);
            return;
        }
        self.compile_expr(left);
        self.compile_expr(right);
        self.emit_op(op, token);
    }

    /// Folds a pair of bare integer or float literals used directly as the
    /// operands of an arithmetic operator. Division and modulo by a literal
    /// zero are deliberately left unfolded so they still raise at runtime.
    fn try_fold_arith(&self, op: OpCode, left: ExprId, right: ExprId) -> Option<Value> {
        let a = self.literal_number(left)?;
        let b = self.literal_number(right)?;
        match (a, b) {
            (Value::Int(x), Value::Int(y)) => match op {
                OpCode::Add => Some(Value::Int(x.wrapping_add(y))),
                OpCode::Subtract => Some(Value::Int(x.wrapping_sub(y))),
                OpCode::Multiply => Some(Value::Int(x.wrapping_mul(y))),
                OpCode::Divide if y != 0 => Some(Value::Int(x.wrapping_div(y))),
                OpCode::Modulo if y != 0 => Some(Value::Int(x.wrapping_rem(y))),
                OpCode::Exponent if y >= 0 => Some(Value::Int(x.wrapping_pow(y as u32))),
                OpCode::Exponent => Some(Value::Float((x as f64).powf(y as f64))),
                _ => None,
            },
            (x, y) => {
                let xf = as_f64(x)?;
                let yf = as_f64(y)?;
                match op {
                    OpCode::Add => Some(Value::Float(xf + yf)),
                    OpCode::Subtract => Some(Value::Float(xf - yf)),
                    OpCode::Multiply => Some(Value::Float(xf * yf)),
                    OpCode::Divide => Some(Value::Float(xf / yf)),
                    OpCode::Modulo => Some(Value::Float(xf % yf)),
                    OpCode::Exponent => Some(Value::Float(xf.powf(yf))),
                    _ => None,
                }
            }
        }
    }

    /// Folds string-string and int-int `..` pairs (§4.3's constant folding
    /// also names these alongside arithmetic). List concatenation and mixed
    /// operand pairs are left for `CONCAT` to resolve at runtime.
    fn try_fold_concat(&mut self, left: ExprId, right: ExprId) -> Option<Value> {
        let left_expr = self.node(left);
        let right_expr = self.node(right);
        match (&left_expr.node, &right_expr.node) {
            (Node::Literal(LiteralKind::Str), Node::Literal(LiteralKind::Str)) => {
                let a = unescape_quoted(left_expr.token.lexeme(self.source));
                let b = unescape_quoted(right_expr.token.lexeme(self.source));
                Some(Value::Obj(self.heap.intern(&format!("{a}{b}"))))
            }
            (Node::Literal(LiteralKind::Int), Node::Literal(LiteralKind::Int)) => {
                let x: i64 = left_expr.token.lexeme(self.source).parse().ok()?;
                let y: i64 = right_expr.token.lexeme(self.source).parse().ok()?;
                let items = int_range(x, y);
                Some(Value::Obj(self.heap.new_list(items)))
            }
            _ => None,
        }
    }

    fn compile_or(&mut self, left: ExprId, right: ExprId, token: Token) {
        self.compile_expr(left);
        let jump = self.emit_jump(OpCode::JumpIfTrue, token);
        self.emit_op(OpCode::Pop, token);
        self.compile_expr(right);
        self.patch_jump(jump, token);
    }

    fn compile_and(&mut self, left: ExprId, right: ExprId, token: Token) {
        self.compile_expr(left);
        let jump = self.emit_jump(OpCode::JumpIfFalse, token);
        self.emit_op(OpCode::Pop, token);
        self.compile_expr(right);
        self.patch_jump(jump, token);
    }

    fn compile_subscript(&mut self, target: ExprId, right: ExprId, token: Token) {
        let right_node = &self.node(right).node;
        if let Node::Binary { op: BinaryOp::Slice(mode), left: lower, right: upper } = right_node {
            let (mode, lower, upper) = (*mode, *lower, *upper);
            self.compile_expr(target);
            match mode {
                AstSliceMode::Open => {}
                AstSliceMode::LowerOnly => self.compile_expr(lower),
                AstSliceMode::UpperOnly => self.compile_expr(upper),
                AstSliceMode::Both => {
                    self.compile_expr(lower);
                    self.compile_expr(upper);
                }
            }
            self.emit_op(OpCode::Slice, token);
            self.emit_byte(slice_mode_byte(mode), token);
        } else {
            self.compile_expr(target);
            self.compile_expr(right);
            self.emit_op(OpCode::Subscript, token);
        }
    }

    fn compile_call(&mut self, callee: ExprId, args: ExprId, token: Token) {
        let arg_ids = self.arg_list(args);
        self.compile_expr(callee);
        for &a in arg_ids {
            self.compile_expr(a);
        }
        self.emit_op(OpCode::Call, token);
        self.emit_byte(arg_ids.len() as u8, token);
    }

    fn compile_call_tail(&mut self, callee: ExprId, args: ExprId, token: Token) {
        let arg_ids = self.arg_list(args);
        self.compile_expr(callee);
        for &a in arg_ids {
            self.compile_expr(a);
        }
        self.emit_op(OpCode::TailCall, token);
        self.emit_byte(arg_ids.len() as u8, token);
    }

    fn arg_list(&self, args: ExprId) -> &'a [ExprId] {
        match &self.node(args).node {
            Node::Block { kind: BlockKind::ArgList, children } => children,
            _ => unreachable!("a call's right child is always an ArgList block"),
        }
    }

    // -- if / match -------------------------------------------------------

    fn compile_if(&mut self, pivot: ExprId, left: ExprId, right: ExprId, tail: bool, token: Token) {
        self.compile_expr(pivot);
        let else_jump = self.emit_jump(OpCode::JumpIfFalse, token);
        self.emit_op(OpCode::Pop, token);
        if tail {
            self.compile_tail(left);
            self.patch_jump(else_jump, token);
            self.emit_op(OpCode::Pop, token);
            self.compile_tail(right);
        } else {
            self.compile_expr(left);
            let end_jump = self.emit_jump(OpCode::Jump, token);
            self.patch_jump(else_jump, token);
            self.emit_op(OpCode::Pop, token);
            self.compile_expr(right);
            self.patch_jump(end_jump, token);
        }
    }

    fn compile_match(&mut self, subject: ExprId, arms: ExprId, tail: bool, token: Token) {
        self.compile_expr(subject);
        let arm_ids = match &self.node(arms).node {
            Node::Block { kind: BlockKind::CaseArms, children } => children,
            _ => unreachable!("match's right child is always a CaseArms block"),
        };
        let mut pending_mismatch: Option<usize> = None;
        let mut end_jumps = Vec::new();
        for &arm in arm_ids {
            if let Some(offset) = pending_mismatch.take() {
                self.patch_jump(offset, token);
            }
            let arm_expr = self.node(arm);
            let arm_token = arm_expr.token;
            let (pattern, body) = match &arm_expr.node {
                Node::Binary { op: BinaryOp::CaseArm, left, right } => (*left, *right),
                _ => unreachable!("case arms are always CaseArm binary nodes"),
            };
            self.compile_pattern(pattern, arm_token);
            pending_mismatch = Some(self.emit_jump(OpCode::TestCase, arm_token));
            if tail {
                self.compile_tail(body);
            } else {
                self.compile_expr(body);
                end_jumps.push(self.emit_jump(OpCode::Jump, arm_token));
            }
        }
        // If the subject matches nothing - including when there are no arms
        // at all - it falls through and becomes the match expression's own
        // value.
        if let Some(offset) = pending_mismatch {
            self.patch_jump(offset, token);
        }
        if tail {
            self.emit_op(OpCode::Return, token);
        }
        for offset in end_jumps {
            self.patch_jump(offset, token);
        }
    }

    fn compile_pattern(&mut self, pattern: ExprId, token: Token) {
        if matches!(self.node(pattern).node, Node::Literal(LiteralKind::Wildcard)) {
            self.emit_op(OpCode::DupeTop, token);
        } else {
            self.compile_expr(pattern);
        }
    }

    // -- assignment and destructuring --------------------------------------

    fn compile_assign(&mut self, left: ExprId, right: ExprId, token: Token) {
        let left_node = &self.node(left).node;
        match left_node {
            Node::Literal(LiteralKind::Identifier | LiteralKind::Glyph | LiteralKind::SyntheticIdentifier(_)) => {
                let name = self.name_of(left);
                self.compile_simple_binding(name, right, token);
            }
            Node::Literal(LiteralKind::Wildcard) => {
                self.compile_expr(right);
            }
            Node::Binary { op: BinaryOp::Construct, .. } => {
                self.compile_destructure(left, right, token);
            }
            _ => {
                self.error(token, "left side of '=' must be a name or a destructuring pattern");
                self.compile_expr(right);
            }
        }
    }

    fn compile_simple_binding(&mut self, name: &str, right: ExprId, token: Token) {
        let target = self.heap.intern(name);
        if self.current_scope().scope_depth > 0 {
            let slot = self.declare_local(target);
            self.compile_expr(right);
            self.emit_op(OpCode::DupeTop, token);
            self.mark_initialized(slot);
        } else {
            self.compile_expr(right);
            self.emit_op(OpCode::DupeTop, token);
            self.emit_make_global(target, token);
        }
    }

    fn emit_make_global(&mut self, target: ObjRef, token: Token) {
        match self.current_scope().chunk.add_constant(Value::Obj(target)) {
            Some(idx) => {
                self.emit_op(OpCode::MakeGlobal, token);
                self.emit_byte(idx, token);
            }
            None => self.error(token, "too many constants to bind this global"),
        }
    }

    /// Destructuring binds via `a, b = expr`. At local scope the left side
    /// is compiled into a mask tree consumed by a single `TREE_COMP`; at
    /// global scope it is walked directly with `DECONS` and one
    /// `MAKE_GLOBAL` per leaf, since globals have no stack slot to land in.
    fn compile_destructure(&mut self, pattern: ExprId, right: ExprId, token: Token) {
        self.compile_expr(right);
        if self.current_scope().scope_depth > 0 {
            let mask = self.build_mask(pattern);
            match self.current_scope().chunk.add_constant(mask) {
                Some(idx) => {
                    self.emit_op(OpCode::TreeComp, token);
                    self.emit_byte(idx, token);
                }
                None => {
                    self.error(token, "too many constants for this destructuring pattern");
                    return;
                }
            }
            self.declare_pattern_locals(pattern);
        } else {
            self.compile_global_destructure(pattern, token);
        }
        self.emit_op(OpCode::Unit, token);
    }

    fn build_mask(&mut self, id: ExprId) -> Value {
        let node = &self.node(id).node;
        match node {
            Node::Binary { op: BinaryOp::Construct, left, right } => {
                let (left, right) = (*left, *right);
                let l = self.build_mask(left);
                let r = self.build_mask(right);
                Value::Obj(self.heap.new_cell(l, r))
            }
            Node::Literal(LiteralKind::Identifier | LiteralKind::Glyph | LiteralKind::SyntheticIdentifier(_)) => {
                Value::Bool(true)
            }
            Node::Literal(LiteralKind::Wildcard) => Value::Bool(false),
            _ => {
                let token = self.node(id).token;
                self.error(token, "invalid destructuring pattern leaf");
                Value::Bool(false)
            }
        }
    }

    /// Walks the pattern in the same car-then-cdr order `TREE_COMP`/`DECONS`
    /// push their leaves, declaring one local per bound name.
    fn declare_pattern_locals(&mut self, id: ExprId) {
        let node = &self.node(id).node;
        match node {
            Node::Binary { op: BinaryOp::Construct, left, right } => {
                let (left, right) = (*left, *right);
                self.declare_pattern_locals(left);
                self.declare_pattern_locals(right);
            }
            Node::Literal(LiteralKind::Identifier | LiteralKind::Glyph | LiteralKind::SyntheticIdentifier(_)) => {
                let name = self.name_of(id);
                let target = self.heap.intern(name);
                let slot = self.declare_local(target);
                self.mark_initialized(slot);
            }
            Node::Literal(LiteralKind::Wildcard) => {}
            _ => {
                let token = self.node(id).token;
                self.error(token, "invalid destructuring pattern leaf");
            }
        }
    }

    fn compile_global_destructure(&mut self, id: ExprId, token: Token) {
        let node = &self.node(id).node;
        match node {
            Node::Binary { op: BinaryOp::Construct, left, right } => {
                let (left, right) = (*left, *right);
                self.emit_op(OpCode::Decons, token);
                self.compile_global_destructure(right, token);
                self.compile_global_destructure(left, token);
            }
            Node::Literal(LiteralKind::Identifier | LiteralKind::Glyph | LiteralKind::SyntheticIdentifier(_)) => {
                let name = self.name_of(id);
                let target = self.heap.intern(name);
                self.emit_make_global(target, token);
            }
            Node::Literal(LiteralKind::Wildcard) => self.emit_op(OpCode::Pop, token),
            _ => self.error(token, "invalid destructuring pattern leaf"),
        }
    }

    // -- function literals --------------------------------------------------

    fn compile_fn_literal(&mut self, params_block: ExprId, name: ExprId, body: ExprId, token: Token) {
        let is_named = !matches!(self.node(name).node, Node::Literal(LiteralKind::Wildcard));
        let at_top_level = self.current_scope().scope_depth == 0;
        let name_text = if is_named { Some(self.name_of(name)) } else { None };

        // Pre-bind a recursive local function's own name before compiling
        // its body, so the body can refer to itself through an upvalue.
        if is_named && !at_top_level {
            let target = self.heap.intern(name_text.expect("is_named implies a name"));
            let slot = self.declare_local(target);
            self.mark_initialized(slot);
        }

        let fn_obj_name = name_text.map(|n| self.heap.intern(n));
        self.scopes.push(FunctionScope::new(fn_obj_name));
        // Mirrors entering a block: parameters (and any bindings at the
        // body's own top level) are locals of this function, never globals.
        self.begin_scope();
        self.declare_params(params_block);
        self.compile_tail(body);
        let scope = self.scopes.pop().expect("compile_fn_literal pushed this scope above");
        let function = self.heap.new_function(scope.name, scope.arity, scope.chunk);

        self.emit_constant(Value::Obj(function), token);
        if !scope.upvalues.is_empty() {
            self.emit_op(OpCode::Closure, token);
            self.emit_byte(scope.upvalues.len() as u8, token);
            for up in &scope.upvalues {
                self.emit_byte(up.is_local as u8, token);
                self.emit_byte(up.index, token);
            }
        }

        if is_named {
            self.emit_op(OpCode::DupeTop, token);
            if at_top_level {
                let target = self.heap.intern(name_text.expect("is_named implies a name"));
                self.emit_make_global(target, token);
            }
            // At local scope the reserved slot already holds this value -
            // nothing further to bind.
        }
    }

    fn declare_params(&mut self, params_block: ExprId) {
        let params = match &self.node(params_block).node {
            Node::Block { kind: BlockKind::ParamBlock, children } => children.as_slice(),
            _ => unreachable!("a function literal's pivot is always a ParamBlock"),
        };
        let depth = self.current_scope().scope_depth;
        for &p in params {
            let p_expr = self.node(p);
            let p_token = p_expr.token;
            match &p_expr.node {
                Node::Literal(LiteralKind::Wildcard) => {
                    self.current_scope().locals.push(Local { name: None, depth });
                }
                Node::Literal(LiteralKind::Identifier | LiteralKind::Glyph | LiteralKind::SyntheticIdentifier(_)) => {
                    let name = self.name_of(p);
                    let target = self.heap.intern(name);
                    self.current_scope().locals.push(Local { name: Some(target), depth });
                }
                _ => self.error(p_token, "invalid parameter"),
            }
        }
        self.current_scope().arity = params.len() as u8;
    }

    fn compile_ternary(&mut self, op: TernaryOp, pivot: ExprId, left: ExprId, right: ExprId, token: Token) {
        match op {
            TernaryOp::If => self.compile_if(pivot, left, right, false, token),
            TernaryOp::FnLiteral => self.compile_fn_literal(pivot, left, right, token),
        }
    }
}

fn slice_mode_byte(mode: AstSliceMode) -> u8 {
    (match mode {
        AstSliceMode::Open => SliceMode::Open,
        AstSliceMode::UpperOnly => SliceMode::UpperOnly,
        AstSliceMode::LowerOnly => SliceMode::LowerOnly,
        AstSliceMode::Both => SliceMode::Both,
    }) as u8
}

fn as_f64(v: Value) -> Option<f64> {
    match v {
        Value::Int(n) => Some(n as f64),
        Value::Float(f) => Some(f),
        _ => None,
    }
}

fn int_range(x: i64, y: i64) -> Vec<Value> {
    let mut items = Vec::new();
    if x <= y {
        let mut i = x;
        while i <= y {
            items.push(Value::Int(i));
            i += 1;
        }
    } else {
        let mut i = x;
        loop {
            items.push(Value::Int(i));
            if i == y {
                break;
            }
            i -= 1;
        }
    }
    items
}

/// Strips a literal's surrounding quotes and resolves its escapes.
fn unescape_quoted(lexeme: &str) -> String {
    unescape(&lexeme[1..lexeme.len() - 1])
}

fn unescape(inner: &str) -> String {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            // Line continuation: a backslash-newline vanishes entirely.
            Some('\n') => {}
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::Heap;
    use crate::object::Object;
    use crate::vm::Vm;

    fn run(source: &str) -> Value {
        let mut heap = Heap::new();
        let function = compile(source, &mut heap).unwrap();
        let mut vm = Vm::new();
        vm.heap = heap;
        vm.interpret(function).unwrap()
    }

    #[test]
    fn arithmetic_literal_pairs_are_folded_to_immediates() {
        let mut heap = Heap::new();
        let function = compile("2 + 3", &mut heap).unwrap();
        let chunk = match heap.get(function) {
            Object::Function(f) => &f.chunk,
            _ => panic!("expected a function"),
        };
        // No ADD byte should appear; the pair folds to a single IntP 5.
        assert!(!chunk.code.contains(&(OpCode::Add as u8)));
        assert!(chunk.code.contains(&(OpCode::IntP as u8)));
    }

    #[test]
    fn top_level_binding_emits_dupe_top_then_make_global() {
        let mut heap = Heap::new();
        let function = compile("x = 1", &mut heap).unwrap();
        let chunk = match heap.get(function) {
            Object::Function(f) => &f.chunk,
            _ => panic!("expected a function"),
        };
        let dupe_pos = chunk.code.iter().position(|&b| b == OpCode::DupeTop as u8);
        let global_pos = chunk.code.iter().position(|&b| b == OpCode::MakeGlobal as u8);
        assert!(dupe_pos.is_some() && global_pos.is_some());
        assert!(dupe_pos.unwrap() < global_pos.unwrap());
    }

    #[test]
    fn tail_recursive_call_compiles_to_tail_call() {
        let mut heap = Heap::new();
        let function = compile("loop: n = if n == 0 then 0 else loop (n - 1)", &mut heap).unwrap();
        let chunk = match heap.get(function) {
            Object::Function(f) => &f.chunk,
            _ => panic!("expected a function"),
        };
        assert!(!chunk.code.contains(&(OpCode::Call as u8)));
        assert!(chunk.code.contains(&(OpCode::TailCall as u8)));
    }

    #[test]
    fn non_tail_recursive_call_compiles_to_call_not_tail_call() {
        let mut heap = Heap::new();
        let function = compile("fact: n = if n < 2 then 1 else n * fact (n - 1)", &mut heap).unwrap();
        let chunk = match heap.get(function) {
            Object::Function(f) => &f.chunk,
            _ => panic!("expected a function"),
        };
        assert!(chunk.code.contains(&(OpCode::Call as u8)));
        assert!(!chunk.code.contains(&(OpCode::TailCall as u8)));
    }

    #[test]
    fn local_destructuring_binds_both_names() {
        let result = run("{ a, b = 1, 2; a + b }");
        assert_eq!(result, Value::Int(3));
    }

    #[test]
    fn simple_script_returns_its_final_expression() {
        let result = run("2 + 3 * 4");
        assert_eq!(result, Value::Int(14));
    }

    #[test]
    fn closure_over_a_parameter_captures_by_value() {
        let result = run("adder: n = (add: m = n + m); plus5 = adder 5; plus5 3");
        assert_eq!(result, Value::Int(8));
    }

    #[test]
    fn wildcard_match_arm_matches_unconditionally() {
        let result = run("match 7 | 1 => 10 | _ => 20");
        assert_eq!(result, Value::Int(20));
    }

    #[test]
    fn self_initializer_reference_is_a_compile_error() {
        let mut heap = Heap::new();
        let err = compile("{ x = x + 1 }", &mut heap).unwrap_err();
        assert!(err.has_errors());
    }
}
