//! The stack VM: fetch-decode loop, call frames, and the opcode
//! implementations (§4.5).

use crate::chunk::Chunk;
use crate::error::{FrameTrace, RuntimeError, RuntimeErrorKind};
use crate::gc::Heap;
use crate::object::{ClosureObj, NativeFn, Object, ObjRef};
use crate::opcode::{OpCode, SliceMode};
use crate::value::Value;

use RuntimeErrorKind::*;

/// Bound on simultaneous call frames (including host-callback reentry);
/// exceeding it is the only form of stack overflow the VM detects (§5).
const FRAMES_MAX: usize = 512;

#[derive(Clone, Copy)]
struct CallFrame {
    function: ObjRef,
    closure: Option<ObjRef>,
    ip: usize,
    slot_base: usize,
    is_host_callback: bool,
}

pub struct Vm {
    pub heap: Heap,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
}

impl Vm {
    pub fn new() -> Self {
        Vm { heap: Heap::new(), stack: Vec::new(), frames: Vec::new() }
    }

    pub fn define_native(&mut self, name: &'static str, arity: i32, function: NativeFn) {
        let name_ref = self.heap.intern(name);
        let native_ref = self.heap.new_native(name, arity, function);
        let hash = self.hash_of_string(name_ref);
        self.heap.globals.insert(name_ref, hash, Value::Obj(native_ref));
    }

    /// Runs `function` (the compiled top-level script) to completion.
    pub fn interpret(&mut self, function: ObjRef) -> Result<Value, RuntimeError> {
        self.heap.is_active = true;
        self.stack.push(Value::Obj(function));
        self.frames.push(CallFrame { function, closure: None, ip: 0, slot_base: 0, is_host_callback: false });
        self.run()
    }

    /// Invokes an arbitrary Hammer value (function, closure, native, or
    /// composed function) with `args` and runs it to completion. This is
    /// the host-callback path (§5): natives call back into Hammer through
    /// this, not through the bytecode dispatch loop.
    pub fn call_hammer_value(&mut self, callee: Value, args: &[Value]) -> Result<Value, RuntimeError> {
        self.push(callee);
        for &a in args {
            self.push(a);
        }
        self.call_and_run(args.len())
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("value stack underflow")
    }

    /// Roots `value` against collection by pushing it onto the value stack.
    /// For use by natives that build a result across a loop of
    /// [`Self::call_hammer_value`] calls, so the in-progress accumulator
    /// stays reachable for the tracer (§4.4) across each reentrant call.
    /// Must be paired with a later [`Self::pop_root`].
    pub(crate) fn push_root(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub(crate) fn pop_root(&mut self) -> Value {
        self.stack.pop().expect("root stack underflow")
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    fn chunk_of(&self, function: ObjRef) -> &Chunk {
        match self.heap.get(function) {
            Object::Function(f) => &f.chunk,
            _ => panic!("frame function ref does not name a Function object"),
        }
    }

    fn hash_of_string(&self, r: ObjRef) -> u32 {
        match self.heap.get(r) {
            Object::Str(s) => s.hash,
            _ => panic!("expected an interned string"),
        }
    }

    fn string_chars(&self, r: ObjRef) -> &str {
        match self.heap.get(r) {
            Object::Str(s) => &s.chars,
            _ => panic!("expected an interned string"),
        }
    }

    fn read_byte(&mut self) -> u8 {
        let (function, ip) = {
            let frame = self.frames.last_mut().expect("frame stack empty");
            let ip = frame.ip;
            frame.ip += 1;
            (frame.function, ip)
        };
        self.chunk_of(function).code[ip]
    }

    fn read_short(&mut self) -> u16 {
        let hi = self.read_byte();
        let lo = self.read_byte();
        ((hi as u16) << 8) | lo as u16
    }

    fn read_constant(&mut self) -> Value {
        let idx = self.read_byte();
        let function = self.frames.last().unwrap().function;
        self.chunk_of(function).constants.values[idx as usize]
    }

    fn jump(&mut self, offset: u16) {
        let frame = self.frames.last_mut().expect("frame stack empty");
        frame.ip += offset as usize;
    }

    fn current_line(&self) -> u32 {
        let frame = *self.frames.last().expect("frame stack empty");
        let chunk = self.chunk_of(frame.function);
        let at = frame.ip.saturating_sub(1).min(chunk.lines.len().saturating_sub(1));
        chunk.lines.get(at).copied().unwrap_or(0)
    }

    fn build_trace(&self) -> Vec<FrameTrace> {
        self.frames
            .iter()
            .rev()
            .map(|frame| {
                let name = match self.heap.get(frame.function) {
                    Object::Function(f) => f.name.map(|n| self.string_chars(n).to_string()),
                    _ => None,
                };
                let chunk = self.chunk_of(frame.function);
                let at = frame.ip.saturating_sub(1).min(chunk.lines.len().saturating_sub(1));
                let line = chunk.lines.get(at).copied().unwrap_or(0);
                FrameTrace { name, line }
            })
            .collect()
    }

    pub(crate) fn runtime_error(&self, kind: RuntimeErrorKind, message: impl Into<String>) -> RuntimeError {
        let message = message.into();
        tracing::debug!(?kind, %message, "runtime error raised");
        RuntimeError::new(kind, message, self.build_trace())
    }

    /// Runs the fetch-decode loop until the frame stack has unwound back to
    /// `target_depth`, returning the value the frame at that depth produced.
    fn run_until(&mut self, target_depth: usize) -> Result<Value, RuntimeError> {
        loop {
            if self.heap.should_collect() {
                self.collect_garbage();
            }
            let byte = self.read_byte();
            let op = OpCode::from_u8(byte).expect("corrupt bytecode: unknown opcode");
            match op {
                OpCode::Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().expect("RETURN with no active frame");
                    self.stack.truncate(frame.slot_base);
                    if self.frames.len() <= target_depth {
                        return Ok(result);
                    }
                    self.push(result);
                }
                OpCode::TailCall => {
                    let n = self.read_byte() as usize;
                    self.tail_call(n)?;
                }
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::ReturnScope => {
                    let k = self.read_byte() as usize;
                    let top = self.pop();
                    let new_len = self.stack.len() - k;
                    self.stack.truncate(new_len);
                    self.push(top);
                }
                OpCode::DupeTop => {
                    self.push(self.peek(0));
                }
                OpCode::SwapTop => {
                    let len = self.stack.len();
                    self.stack.swap(len - 1, len - 2);
                }
                OpCode::Loadv => {
                    let v = self.read_constant();
                    self.push(v);
                }
                OpCode::True => self.push(Value::Bool(true)),
                OpCode::False => self.push(Value::Bool(false)),
                OpCode::Unit => self.push(Value::Unit),
                OpCode::IntP => {
                    let n = self.read_short();
                    self.push(Value::Int(n as i64));
                }
                OpCode::IntN => {
                    let n = self.read_short();
                    self.push(Value::Int(-(n as i64)));
                }
                OpCode::FloatP => {
                    let n = self.read_short();
                    self.push(Value::Float(n as f64));
                }
                OpCode::FloatN => {
                    let n = self.read_short();
                    self.push(Value::Float(-(n as f64)));
                }
                OpCode::Char => {
                    let b = self.read_byte();
                    self.push(Value::Char(b as char));
                }
                OpCode::Not => {
                    let v = self.pop();
                    self.push(Value::Bool(!v.is_truthy()));
                }
                OpCode::Truthy => {
                    let v = self.pop();
                    self.push(Value::Bool(v.is_truthy()));
                }
                OpCode::Negate => self.negate()?,
                OpCode::Add => self.binary_arith(op)?,
                OpCode::Subtract => self.binary_arith(op)?,
                OpCode::Multiply => self.binary_arith(op)?,
                OpCode::Divide => self.binary_arith(op)?,
                OpCode::Modulo => self.binary_arith(op)?,
                OpCode::Exponent => self.binary_arith(op)?,
                OpCode::Diff => self.compare(false)?,
                OpCode::DiffEq => self.compare(true)?,
                OpCode::Equals => {
                    let b = self.pop();
                    let a = self.pop();
                    let eq = self.values_equal(a, b);
                    self.push(Value::Bool(eq));
                }
                OpCode::Construct => {
                    let b = self.pop();
                    let a = self.pop();
                    let r = self.heap.new_cell(a, b);
                    self.push(Value::Obj(r));
                }
                OpCode::Car => {
                    let v = self.pop();
                    let (car, _) = self.expect_cell(v, "CAR")?;
                    self.push(car);
                }
                OpCode::Cdr => {
                    let v = self.pop();
                    let (_, cdr) = self.expect_cell(v, "CDR")?;
                    self.push(cdr);
                }
                OpCode::Decons => {
                    let v = self.pop();
                    let (car, cdr) = self.expect_cell(v, "DECONS")?;
                    self.push(car);
                    self.push(cdr);
                }
                OpCode::Concat => self.concat()?,
                OpCode::MakeGlobal => self.make_global()?,
                OpCode::GetGlobal => self.get_global()?,
                OpCode::GetLocal => {
                    let s = self.read_byte() as usize;
                    let base = self.frames.last().unwrap().slot_base;
                    self.push(self.stack[base + s]);
                }
                OpCode::Upvalue => {
                    let d = self.read_byte() as usize;
                    let closure_ref = self.frames.last().unwrap().closure.expect("UPVALUE outside a closure frame");
                    let v = match self.heap.get(closure_ref) {
                        Object::Closure(c) => c.upvalues[d],
                        _ => unreachable!("closure frame does not hold a Closure object"),
                    };
                    self.push(v);
                }
                OpCode::Jump => {
                    let offset = self.read_short();
                    self.jump(offset);
                }
                OpCode::JumpIfTrue => {
                    let offset = self.read_short();
                    if self.peek(0).is_truthy() {
                        self.jump(offset);
                    }
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_short();
                    if !self.peek(0).is_truthy() {
                        self.jump(offset);
                    }
                }
                OpCode::Call => {
                    let n = self.read_byte() as usize;
                    self.call_value(n, false)?;
                }
                OpCode::Closure => self.closure()?,
                OpCode::TreeComp => self.tree_comp_op()?,
                OpCode::List => {
                    let n = self.read_byte() as usize;
                    let items = self.stack.split_off(self.stack.len() - n);
                    let r = self.heap.new_list(items);
                    self.push(Value::Obj(r));
                }
                OpCode::Map => self.build_map()?,
                OpCode::Subscript => self.subscript()?,
                OpCode::Slice => self.slice()?,
                OpCode::Receive => self.receive()?,
                OpCode::TestCase => self.test_case()?,
                OpCode::Compose => self.compose()?,
                OpCode::In => self.membership_op()?,
            }
        }
    }

    pub fn run(&mut self) -> Result<Value, RuntimeError> {
        self.run_until(0)
    }

    fn call_and_run(&mut self, arg_count: usize) -> Result<Value, RuntimeError> {
        let depth = self.frames.len();
        self.call_value(arg_count, true)?;
        if self.frames.len() > depth {
            self.run_until(depth)
        } else {
            Ok(self.pop())
        }
    }

    fn tail_call(&mut self, arg_count: usize) -> Result<(), RuntimeError> {
        let frame = *self.frames.last().expect("TAIL_CALL with no active frame");
        let total = arg_count + 1;
        let src_start = self.stack.len() - total;
        for i in 0..total {
            self.stack[frame.slot_base + i] = self.stack[src_start + i];
        }
        self.stack.truncate(frame.slot_base + total);
        self.frames.pop();
        self.call_value(arg_count, false)
    }

    fn arity_accepts(arity: i32, n: usize) -> bool {
        if arity >= 0 {
            arity as usize == n
        } else {
            n >= (-arity - 1) as usize
        }
    }

    fn call_value(&mut self, arg_count: usize, is_host_callback: bool) -> Result<(), RuntimeError> {
        let callee_index = self.stack.len() - arg_count - 1;
        let callee = self.stack[callee_index];
        let r = match callee.as_obj() {
            Some(r) if self.heap.get(r).is_callable() => r,
            _ => return Err(self.runtime_error(WrongOperandType, "value is not callable")),
        };
        match self.heap.get(r) {
            Object::Function(f) => {
                if f.arity as usize != arg_count {
                    return Err(self.runtime_error(ArityMismatch, format!("expected {} arguments, got {arg_count}", f.arity)));
                }
                self.push_frame(r, None, callee_index, is_host_callback)
            }
            Object::Closure(c) => {
                let ClosureObj { function, .. } = c;
                let arity = match self.heap.get(*function) {
                    Object::Function(f) => f.arity,
                    _ => unreachable!(),
                };
                if arity as usize != arg_count {
                    return Err(self.runtime_error(ArityMismatch, format!("expected {arity} arguments, got {arg_count}")));
                }
                self.push_frame(*function, Some(r), callee_index, is_host_callback)
            }
            Object::Native(n) => {
                if !Self::arity_accepts(n.arity, arg_count) {
                    return Err(self.runtime_error(ArityMismatch, format!("'{}' does not accept {arg_count} arguments", n.name)));
                }
                let function = n.function;
                let args: Vec<Value> = self.stack[callee_index + 1..].to_vec();
                let result = function(self, &args)?;
                self.stack.truncate(callee_index);
                self.push(result);
                Ok(())
            }
            Object::Composed(f, g) => {
                let (f, g) = (*f, *g);
                self.stack[callee_index] = g;
                let g_result = self.call_and_run(arg_count)?;
                self.push(f);
                self.push(g_result);
                let result = self.call_and_run(1)?;
                self.push(result);
                Ok(())
            }
            _ => unreachable!("is_callable guard above excludes this"),
        }
    }

    fn push_frame(&mut self, function: ObjRef, closure: Option<ObjRef>, slot_base: usize, is_host_callback: bool) -> Result<(), RuntimeError> {
        if self.frames.len() >= FRAMES_MAX {
            return Err(self.runtime_error(StackOverflow, "call frame stack exhausted"));
        }
        self.frames.push(CallFrame { function, closure, ip: 0, slot_base, is_host_callback });
        Ok(())
    }

    fn callable_arity(&self, v: Value) -> Result<i32, RuntimeError> {
        match v.as_obj().map(|r| self.heap.get(r)) {
            Some(Object::Function(f)) => Ok(f.arity as i32),
            Some(Object::Closure(c)) => match self.heap.get(c.function) {
                Object::Function(f) => Ok(f.arity as i32),
                _ => unreachable!(),
            },
            Some(Object::Native(n)) => Ok(n.arity),
            Some(Object::Composed(_, g)) => self.callable_arity(*g),
            _ => Err(self.runtime_error(WrongOperandType, "value is not callable")),
        }
    }

    fn closure(&mut self) -> Result<(), RuntimeError> {
        let n = self.read_byte() as usize;
        let function_ref = self.peek(0).as_obj().expect("CLOSURE operand must be a Function");
        let mut upvalues = Vec::with_capacity(n);
        for _ in 0..n {
            let is_local = self.read_byte();
            let index = self.read_byte() as usize;
            let value = if is_local != 0 {
                let base = self.frames.last().unwrap().slot_base;
                self.stack[base + index]
            } else {
                let closure_ref = self.frames.last().unwrap().closure.expect("enclosing upvalue without a closure frame");
                match self.heap.get(closure_ref) {
                    Object::Closure(c) => c.upvalues[index],
                    _ => unreachable!(),
                }
            };
            upvalues.push(value);
        }
        let closure_ref = self.heap.new_closure(function_ref, upvalues);
        *self.stack.last_mut().unwrap() = Value::Obj(closure_ref);
        Ok(())
    }

    fn negate(&mut self) -> Result<(), RuntimeError> {
        let v = self.pop();
        let result = match v {
            Value::Int(x) => Value::Int(x.wrapping_neg()),
            Value::Float(x) => Value::Float(-x),
            _ => return Err(self.runtime_error(WrongOperandType, "NEGATE expects a number")),
        };
        self.push(result);
        Ok(())
    }

    fn binary_arith(&mut self, op: OpCode) -> Result<(), RuntimeError> {
        let b = self.pop();
        let a = self.pop();
        let result = self.arith(op, a, b)?;
        self.push(result);
        Ok(())
    }

    /// The same numeric promotion rules `ADD`/`SUB`/... use, exposed for the
    /// arithmetic-operator-as-values natives (§6).
    pub(crate) fn arith(&self, op: OpCode, a: Value, b: Value) -> Result<Value, RuntimeError> {
        match (a, b) {
            (Value::Int(x), Value::Int(y)) => self.int_arith(op, x, y),
            (x, y) if x.is_arith() && y.is_arith() => {
                let xf = Self::as_f64(x);
                let yf = Self::as_f64(y);
                Ok(Value::Float(Self::float_arith(op, xf, yf)))
            }
            _ => Err(self.runtime_error(WrongOperandType, "arithmetic operator expects numbers")),
        }
    }

    fn as_f64(v: Value) -> f64 {
        match v {
            Value::Int(x) => x as f64,
            Value::Float(x) => x,
            _ => unreachable!(),
        }
    }

    fn float_arith(op: OpCode, x: f64, y: f64) -> f64 {
        match op {
            OpCode::Add => x + y,
            OpCode::Subtract => x - y,
            OpCode::Multiply => x * y,
            OpCode::Divide => x / y,
            OpCode::Modulo => x % y,
            OpCode::Exponent => x.powf(y),
            _ => unreachable!(),
        }
    }

    fn int_arith(&self, op: OpCode, x: i64, y: i64) -> Result<Value, RuntimeError> {
        Ok(match op {
            OpCode::Add => Value::Int(x.wrapping_add(y)),
            OpCode::Subtract => Value::Int(x.wrapping_sub(y)),
            OpCode::Multiply => Value::Int(x.wrapping_mul(y)),
            OpCode::Divide => {
                if y == 0 {
                    return Err(self.runtime_error(WrongOperandType, "division by zero"));
                }
                Value::Int(x.wrapping_div(y))
            }
            OpCode::Modulo => {
                if y == 0 {
                    return Err(self.runtime_error(WrongOperandType, "modulo by zero"));
                }
                Value::Int(x.wrapping_rem(y))
            }
            OpCode::Exponent => {
                if y >= 0 {
                    Value::Int(x.checked_pow(y as u32).unwrap_or_else(|| x.wrapping_pow(y as u32)))
                } else {
                    Value::Float((x as f64).powf(y as f64))
                }
            }
            _ => unreachable!(),
        })
    }

    fn compare(&mut self, or_equal: bool) -> Result<(), RuntimeError> {
        let b = self.pop();
        let a = self.pop();
        let ordering = match (a, b) {
            (Value::Char(x), Value::Char(y)) => x as i64 - y as i64,
            (x, y) if x.is_arith() && y.is_arith() => {
                let (xf, yf) = (Self::as_f64(x), Self::as_f64(y));
                if xf > yf {
                    1
                } else if xf < yf {
                    -1
                } else {
                    0
                }
            }
            _ => return Err(self.runtime_error(WrongOperandType, "comparison expects numbers or characters")),
        };
        let result = if or_equal { ordering >= 0 } else { ordering > 0 };
        self.push(Value::Bool(result));
        Ok(())
    }

    fn values_equal(&self, a: Value, b: Value) -> bool {
        match (a, b) {
            (Value::Unit, Value::Unit) => true,
            (Value::Bool(x), Value::Bool(y)) => x == y,
            (Value::Int(x), Value::Int(y)) => x == y,
            (Value::Float(x), Value::Float(y)) => x == y,
            (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => x as f64 == y,
            (Value::Char(x), Value::Char(y)) => x == y,
            (Value::Obj(x), Value::Obj(y)) => {
                if x == y {
                    return true;
                }
                match (self.heap.get(x), self.heap.get(y)) {
                    (Object::Cell(a1, b1), Object::Cell(a2, b2)) => self.values_equal(*a1, *a2) && self.values_equal(*b1, *b2),
                    _ => false,
                }
            }
            _ => false,
        }
    }

    fn expect_cell(&self, v: Value, who: &str) -> Result<(Value, Value), RuntimeError> {
        match v.as_obj().map(|r| self.heap.get(r)) {
            Some(Object::Cell(a, b)) => Ok((*a, *b)),
            _ => Err(self.runtime_error(WrongOperandType, format!("{who} expects a cell"))),
        }
    }

    fn concat(&mut self) -> Result<(), RuntimeError> {
        let b = self.pop();
        let a = self.pop();
        let result = match (a, b) {
            (Value::Obj(ra), Value::Obj(rb)) => match (self.heap.get(ra), self.heap.get(rb)) {
                (Object::Str(sa), Object::Str(sb)) => {
                    let joined = format!("{}{}", sa.chars, sb.chars);
                    Value::Obj(self.heap.intern(&joined))
                }
                (Object::List(la), Object::List(lb)) => {
                    let mut joined = la.clone();
                    joined.extend_from_slice(lb);
                    Value::Obj(self.heap.new_list(joined))
                }
                _ => return Err(self.runtime_error(WrongOperandType, "CONCAT expects strings, lists, or integers")),
            },
            (Value::Int(x), Value::Int(y)) => {
                let mut items = Vec::new();
                if x <= y {
                    let mut i = x;
                    while i <= y {
                        items.push(Value::Int(i));
                        i += 1;
                    }
                } else {
                    let mut i = x;
                    while i >= y {
                        items.push(Value::Int(i));
                        i -= 1;
                    }
                }
                Value::Obj(self.heap.new_list(items))
            }
            _ => return Err(self.runtime_error(WrongOperandType, "CONCAT expects strings, lists, or integers")),
        };
        self.push(result);
        Ok(())
    }

    fn make_global(&mut self) -> Result<(), RuntimeError> {
        let name_val = self.read_constant();
        let name_ref = name_val.as_obj().expect("MAKE_GLOBAL constant must be a string");
        let hash = self.hash_of_string(name_ref);
        if self.heap.globals.contains(name_ref, hash) {
            let text = self.string_chars(name_ref).to_string();
            return Err(self.runtime_error(DuplicateGlobal, format!("global '{text}' is already bound")));
        }
        let value = self.pop();
        self.heap.globals.insert(name_ref, hash, value);
        Ok(())
    }

    fn get_global(&mut self) -> Result<(), RuntimeError> {
        let name_val = self.read_constant();
        let name_ref = name_val.as_obj().expect("GET_GLOBAL constant must be a string");
        let hash = self.hash_of_string(name_ref);
        match self.heap.globals.get(name_ref, hash) {
            Some(v) => {
                self.push(v);
                Ok(())
            }
            None => {
                let text = self.string_chars(name_ref).to_string();
                Err(self.runtime_error(MissingGlobal, format!("no global named '{text}'")))
            }
        }
    }

    fn tree_comp_op(&mut self) -> Result<(), RuntimeError> {
        let mask = self.read_constant();
        let subject = self.pop();
        let mut out = Vec::new();
        self.tree_comp(mask, subject, &mut out)?;
        for v in out {
            self.push(v);
        }
        Ok(())
    }

    fn tree_comp(&self, mask: Value, subject: Value, out: &mut Vec<Value>) -> Result<(), RuntimeError> {
        match mask {
            Value::Bool(true) => {
                out.push(subject);
                Ok(())
            }
            Value::Bool(false) => Ok(()),
            Value::Obj(r) => {
                let (mask_car, mask_cdr) = match self.heap.get(r) {
                    Object::Cell(a, b) => (*a, *b),
                    _ => return Err(self.runtime_error(TreeMismatch, "mask tree leaf is not boolean or cell")),
                };
                let (subj_car, subj_cdr) = self.expect_cell(subject, "TREE_COMP")?;
                self.tree_comp(mask_car, subj_car, out)?;
                self.tree_comp(mask_cdr, subj_cdr, out)
            }
            _ => Err(self.runtime_error(TreeMismatch, "mask tree leaf must be boolean or cell")),
        }
    }

    fn build_map(&mut self) -> Result<(), RuntimeError> {
        let n = self.read_byte() as usize;
        let pairs = self.stack.split_off(self.stack.len() - 2 * n);
        let map_ref = self.heap.new_map();
        for pair in pairs.chunks(2) {
            let key_ref = pair[0].as_obj().filter(|r| matches!(self.heap.get(*r), Object::Str(_)));
            let key_ref = match key_ref {
                Some(r) => r,
                None => return Err(self.runtime_error(WrongOperandType, "map keys must be strings")),
            };
            let hash = self.hash_of_string(key_ref);
            let value = pair[1];
            match self.heap.get_mut(map_ref) {
                Object::Map(table) => {
                    table.insert(key_ref, hash, value);
                }
                _ => unreachable!(),
            }
        }
        self.push(Value::Obj(map_ref));
        Ok(())
    }

    fn resolve_index(idx: i64, len: usize) -> Option<usize> {
        if idx == 0 {
            return None;
        }
        if idx > 0 {
            let i = (idx - 1) as usize;
            if i < len { Some(i) } else { None }
        } else {
            let from_end = (-idx) as usize;
            if from_end <= len { Some(len - from_end) } else { None }
        }
    }

    fn subscript(&mut self) -> Result<(), RuntimeError> {
        let index_val = self.pop();
        let target = self.pop();
        let result = match target.as_obj().map(|r| self.heap.get(r)) {
            Some(Object::List(items)) => {
                let idx = self.require_int(index_val)?;
                match Self::resolve_index(idx, items.len()) {
                    Some(i) => items[i],
                    None => return Err(self.runtime_error(OutOfRangeIndex, "list index out of range")),
                }
            }
            Some(Object::Str(s)) => {
                let idx = self.require_int(index_val)?;
                let chars: Vec<char> = s.chars.chars().collect();
                match Self::resolve_index(idx, chars.len()) {
                    Some(i) => Value::Char(chars[i]),
                    None => return Err(self.runtime_error(OutOfRangeIndex, "string index out of range")),
                }
            }
            Some(Object::Map(table)) => {
                let key_ref = index_val.as_obj().filter(|r| matches!(self.heap.get(*r), Object::Str(_)));
                let key_ref = match key_ref {
                    Some(r) => r,
                    None => return Err(self.runtime_error(WrongOperandType, "map subscript expects a string key")),
                };
                let hash = self.hash_of_string(key_ref);
                match table.get(key_ref, hash) {
                    Some(v) => v,
                    None => return Err(self.runtime_error(MissingGlobal, "map has no entry for this key")),
                }
            }
            _ => return Err(self.runtime_error(WrongOperandType, "SUBSCRIPT expects a list, string, or map")),
        };
        self.push(result);
        Ok(())
    }

    fn require_int(&self, v: Value) -> Result<i64, RuntimeError> {
        match v {
            Value::Int(i) => Ok(i),
            _ => Err(self.runtime_error(WrongOperandType, "index must be an integer")),
        }
    }

    fn slice(&mut self) -> Result<(), RuntimeError> {
        let mode_byte = self.read_byte();
        let mode = SliceMode::from_u8(mode_byte).expect("corrupt bytecode: invalid slice mode");
        let (y, x) = match mode {
            SliceMode::Open => (None, None),
            SliceMode::UpperOnly => (Some(self.require_int(self.pop())?), None),
            SliceMode::LowerOnly => (None, Some(self.require_int(self.pop())?)),
            SliceMode::Both => {
                let y = self.require_int(self.pop())?;
                let x = self.require_int(self.pop())?;
                (Some(y), Some(x))
            }
        };
        let target = self.pop();
        let result = match target.as_obj().map(|r| self.heap.get(r)) {
            Some(Object::List(items)) => {
                let (start, end) = self.slice_bounds(x, y, items.len())?;
                let sliced = items[start..end].to_vec();
                Value::Obj(self.heap.new_list(sliced))
            }
            Some(Object::Str(s)) => {
                let chars: Vec<char> = s.chars.chars().collect();
                let (start, end) = self.slice_bounds(x, y, chars.len())?;
                let sliced: String = chars[start..end].iter().collect();
                Value::Obj(self.heap.intern(&sliced))
            }
            _ => return Err(self.runtime_error(WrongOperandType, "SLICE expects a list or string")),
        };
        self.push(result);
        Ok(())
    }

    fn slice_bounds(&self, x: Option<i64>, y: Option<i64>, len: usize) -> Result<(usize, usize), RuntimeError> {
        let start = match x {
            Some(idx) => Self::resolve_index(idx, len).ok_or_else(|| self.runtime_error(OutOfRangeIndex, "slice lower bound out of range"))?,
            None => 0,
        };
        let end = match y {
            Some(idx) => Self::resolve_index(idx, len).map(|i| i + 1).ok_or_else(|| self.runtime_error(OutOfRangeIndex, "slice upper bound out of range"))?,
            None => len,
        };
        if start >= end { Ok((start, start)) } else { Ok((start, end)) }
    }

    fn receive(&mut self) -> Result<(), RuntimeError> {
        let v = self.pop();
        let target_ref = self.peek(0).as_obj().ok_or_else(|| self.runtime_error(WrongOperandType, "RECEIVE expects a list or map"))?;
        let needs_key_check = matches!(self.heap.get(target_ref), Object::Map(_));
        if needs_key_check {
            let (key, value) = self.expect_cell(v, "RECEIVE")?;
            let key_ref = key.as_obj().filter(|r| matches!(self.heap.get(*r), Object::Str(_)));
            let key_ref = match key_ref {
                Some(r) => r,
                None => return Err(self.runtime_error(WrongOperandType, "map entries must have string keys")),
            };
            let hash = self.hash_of_string(key_ref);
            let duplicate = match self.heap.get(target_ref) {
                Object::Map(table) => table.contains(key_ref, hash),
                _ => unreachable!(),
            };
            if duplicate {
                let text = self.string_chars(key_ref).to_string();
                return Err(self.runtime_error(DuplicateGlobal, format!("map already has a key '{text}'")));
            }
            match self.heap.get_mut(target_ref) {
                Object::Map(table) => {
                    table.insert(key_ref, hash, value);
                }
                _ => unreachable!(),
            }
            Ok(())
        } else {
            match self.heap.get_mut(target_ref) {
                Object::List(items) => {
                    items.push(v);
                    Ok(())
                }
                _ => Err(self.runtime_error(WrongOperandType, "RECEIVE expects a list or map")),
            }
        }
    }

    fn test_case(&mut self) -> Result<(), RuntimeError> {
        let offset = self.read_short();
        let pattern = self.pop();
        let subject = self.peek(0);
        if self.values_equal(pattern, subject) {
            self.pop();
        } else {
            self.jump(offset);
        }
        Ok(())
    }

    fn compose(&mut self) -> Result<(), RuntimeError> {
        let g = self.pop();
        let f = self.pop();
        let f_arity = self.callable_arity(f)?;
        self.callable_arity(g)?;
        if !Self::arity_accepts(f_arity, 1) {
            return Err(self.runtime_error(ArityMismatch, "composed function does not accept the single result its right-hand side produces"));
        }
        let r = self.heap.new_composed(f, g);
        self.push(Value::Obj(r));
        Ok(())
    }

    fn membership_op(&mut self) -> Result<(), RuntimeError> {
        let container = self.pop();
        let needle = self.pop();
        let result = match container.as_obj().map(|r| self.heap.get(r)) {
            Some(Object::List(items)) => items.iter().any(|&item| self.values_equal(needle, item)),
            Some(Object::Str(s)) => match needle {
                Value::Char(c) => s.chars.contains(c),
                Value::Obj(r) => match self.heap.get(r) {
                    Object::Str(needle_str) => s.chars.contains(needle_str.chars.as_str()),
                    _ => return Err(self.runtime_error(WrongOperandType, "IN expects a char or string needle for a string haystack")),
                },
                _ => return Err(self.runtime_error(WrongOperandType, "IN expects a char or string needle for a string haystack")),
            },
            _ => return Err(self.runtime_error(WrongOperandType, "IN expects a list or string")),
        };
        self.push(Value::Bool(result));
        Ok(())
    }

    fn collect_garbage(&mut self) {
        for i in 0..self.stack.len() {
            self.heap.mark_value(self.stack[i]);
        }
        for frame in self.frames.clone() {
            self.heap.mark_object(frame.function);
            if let Some(c) = frame.closure {
                self.heap.mark_object(c);
            }
        }
        let globals = self.heap.globals.entries_snapshot();
        for (k, v) in globals {
            self.heap.mark_object(k);
            self.heap.mark_value(v);
        }
        self.heap.trace();
        self.heap.sweep_strings();
        self.heap.sweep();
        self.heap.update_threshold();
    }
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;

    fn script_returning_int(n: i64) -> Chunk {
        let mut chunk = Chunk::new();
        let idx = chunk.add_constant(Value::Int(n)).unwrap();
        chunk.write_op(OpCode::Loadv, 1);
        chunk.write_byte(idx, 1);
        chunk.write_op(OpCode::Return, 1);
        chunk
    }

    #[test]
    fn interpreting_a_trivial_script_returns_its_constant() {
        let mut vm = Vm::new();
        let chunk = script_returning_int(42);
        let function = vm.heap.new_function(None, 0, chunk);
        let result = vm.interpret(function).unwrap();
        assert_eq!(result, Value::Int(42));
    }

    #[test]
    fn arithmetic_promotes_mixed_int_float_operands() {
        let mut vm = Vm::new();
        let mut chunk = Chunk::new();
        let a = chunk.add_constant(Value::Int(3)).unwrap();
        let b = chunk.add_constant(Value::Float(0.5)).unwrap();
        chunk.write_op(OpCode::Loadv, 1);
        chunk.write_byte(a, 1);
        chunk.write_op(OpCode::Loadv, 1);
        chunk.write_byte(b, 1);
        chunk.write_op(OpCode::Add, 1);
        chunk.write_op(OpCode::Return, 1);
        let function = vm.heap.new_function(None, 0, chunk);
        let result = vm.interpret(function).unwrap();
        assert_eq!(result, Value::Float(3.5));
    }

    #[test]
    fn duplicate_global_binding_is_a_runtime_error() {
        let mut vm = Vm::new();
        let mut chunk = Chunk::new();
        let name = vm.heap.intern("x");
        let name_idx = chunk.add_constant(Value::Obj(name)).unwrap();
        chunk.write_op(OpCode::Unit, 1);
        chunk.write_op(OpCode::MakeGlobal, 1);
        chunk.write_byte(name_idx, 1);
        chunk.write_op(OpCode::Unit, 1);
        chunk.write_op(OpCode::MakeGlobal, 1);
        chunk.write_byte(name_idx, 1);
        chunk.write_op(OpCode::Unit, 1);
        chunk.write_op(OpCode::Return, 1);
        let function = vm.heap.new_function(None, 0, chunk);
        let err = vm.interpret(function).unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::DuplicateGlobal);
    }

    #[test]
    fn cell_equality_is_structural() {
        let mut vm = Vm::new();
        let a = vm.heap.new_cell(Value::Int(1), Value::Int(2));
        let b = vm.heap.new_cell(Value::Int(1), Value::Int(2));
        assert!(vm.values_equal(Value::Obj(a), Value::Obj(b)));
    }

    #[test]
    fn list_equality_is_by_identity_not_structure() {
        let mut vm = Vm::new();
        let a = vm.heap.new_list(vec![Value::Int(1)]);
        let b = vm.heap.new_list(vec![Value::Int(1)]);
        assert!(!vm.values_equal(Value::Obj(a), Value::Obj(b)));
    }

    #[test]
    fn one_based_subscript_resolves_negative_indices_from_the_tail() {
        assert_eq!(Vm::resolve_index(1, 3), Some(0));
        assert_eq!(Vm::resolve_index(-1, 3), Some(2));
        assert_eq!(Vm::resolve_index(0, 3), None);
        assert_eq!(Vm::resolve_index(4, 3), None);
    }
}
