//! The pre-registered native functions a fresh [`Vm`] starts with (§6):
//! the arithmetic operators as callable values, the `$` applicator, and the
//! list/string primitives (`len`, `rev`, `map`, `filter`, `foldl`, `foldr`,
//! `zip`, `typeOf`). Every higher-order native reenters the VM through
//! [`Vm::call_hammer_value`], the same host-callback path a user native
//! embedding hammer would use (§5).
//!
//! `map`/`filter`/`foldl`/`foldr` accumulate a result across repeated
//! reentrant calls, any of which may trigger a collection. The accumulator
//! is rooted with [`Vm::push_root`] for the duration of the loop rather than
//! held in a plain local, or it would be invisible to the tracer and swept
//! out from under the native.

use crate::error::{RuntimeError, RuntimeErrorKind};
use crate::object::Object;
use crate::opcode::OpCode;
use crate::value::Value;
use crate::vm::Vm;

pub fn install(vm: &mut Vm) {
    vm.define_native("+", 2, native_add);
    vm.define_native("-", 2, native_sub);
    vm.define_native("*", 2, native_mul);
    vm.define_native("/", 2, native_div);
    vm.define_native("%", 2, native_mod);
    vm.define_native("^", 2, native_exp);
    vm.define_native("$", 2, native_apply);
    vm.define_native("len", 1, native_len);
    vm.define_native("rev", 1, native_rev);
    vm.define_native("map", 2, native_map);
    vm.define_native("filter", 2, native_filter);
    vm.define_native("foldl", 3, native_foldl);
    vm.define_native("foldr", 3, native_foldr);
    vm.define_native("zip", 2, native_zip);
    vm.define_native("typeOf", 1, native_type_of);
}

fn arity_error(vm: &Vm, name: &str, expected: usize, got: usize) -> RuntimeError {
    vm.runtime_error(RuntimeErrorKind::ArityMismatch, format!("'{name}' expects {expected} arguments, got {got}"))
}

fn wrong_type(vm: &Vm, message: impl Into<String>) -> RuntimeError {
    vm.runtime_error(RuntimeErrorKind::WrongOperandType, message)
}

fn require_list(vm: &Vm, v: Value, who: &str) -> Result<Vec<Value>, RuntimeError> {
    match v.as_obj().map(|r| vm.heap.get(r)) {
        Some(Object::List(items)) => Ok(items.clone()),
        _ => Err(wrong_type(vm, format!("'{who}' expects a list"))),
    }
}

fn native_add(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 2 {
        return Err(arity_error(vm, "+", 2, args.len()));
    }
    vm.arith(OpCode::Add, args[0], args[1])
}

fn native_sub(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 2 {
        return Err(arity_error(vm, "-", 2, args.len()));
    }
    vm.arith(OpCode::Subtract, args[0], args[1])
}

fn native_mul(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 2 {
        return Err(arity_error(vm, "*", 2, args.len()));
    }
    vm.arith(OpCode::Multiply, args[0], args[1])
}

fn native_div(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 2 {
        return Err(arity_error(vm, "/", 2, args.len()));
    }
    vm.arith(OpCode::Divide, args[0], args[1])
}

fn native_mod(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 2 {
        return Err(arity_error(vm, "%", 2, args.len()));
    }
    vm.arith(OpCode::Modulo, args[0], args[1])
}

fn native_exp(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 2 {
        return Err(arity_error(vm, "^", 2, args.len()));
    }
    vm.arith(OpCode::Exponent, args[0], args[1])
}

fn native_apply(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 2 {
        return Err(arity_error(vm, "$", 2, args.len()));
    }
    vm.call_hammer_value(args[0], &[args[1]])
}

fn native_len(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error(vm, "len", 1, args.len()));
    }
    let n = match args[0].as_obj().map(|r| vm.heap.get(r)) {
        Some(Object::List(items)) => items.len(),
        Some(Object::Str(s)) => s.chars.chars().count(),
        Some(Object::Map(table)) => table.len(),
        _ => return Err(wrong_type(vm, "'len' expects a list, string, or map")),
    };
    Ok(Value::Int(n as i64))
}

fn native_rev(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error(vm, "rev", 1, args.len()));
    }
    match args[0].as_obj().map(|r| vm.heap.get(r)) {
        Some(Object::List(items)) => {
            let mut reversed = items.clone();
            reversed.reverse();
            Ok(Value::Obj(vm.heap.new_list(reversed)))
        }
        Some(Object::Str(s)) => {
            let reversed: String = s.chars.chars().rev().collect();
            Ok(Value::Obj(vm.heap.intern(&reversed)))
        }
        _ => Err(wrong_type(vm, "'rev' expects a list or string")),
    }
}

fn native_map(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 2 {
        return Err(arity_error(vm, "map", 2, args.len()));
    }
    let items = require_list(vm, args[1], "map")?;
    let list_ref = vm.heap.new_list(Vec::with_capacity(items.len()));
    vm.push_root(Value::Obj(list_ref));
    for item in items {
        let mapped_item = vm.call_hammer_value(args[0], &[item])?;
        match vm.heap.get_mut(list_ref) {
            Object::List(v) => v.push(mapped_item),
            _ => unreachable!(),
        }
    }
    vm.pop_root();
    Ok(Value::Obj(list_ref))
}

fn native_filter(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 2 {
        return Err(arity_error(vm, "filter", 2, args.len()));
    }
    let items = require_list(vm, args[1], "filter")?;
    let list_ref = vm.heap.new_list(Vec::new());
    vm.push_root(Value::Obj(list_ref));
    for item in items {
        if vm.call_hammer_value(args[0], &[item])?.is_truthy() {
            match vm.heap.get_mut(list_ref) {
                Object::List(v) => v.push(item),
                _ => unreachable!(),
            }
        }
    }
    vm.pop_root();
    Ok(Value::Obj(list_ref))
}

fn native_foldl(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 3 {
        return Err(arity_error(vm, "foldl", 3, args.len()));
    }
    let items = require_list(vm, args[2], "foldl")?;
    vm.push_root(args[1]);
    for item in items {
        let acc = vm.pop_root();
        let next = vm.call_hammer_value(args[0], &[acc, item])?;
        vm.push_root(next);
    }
    Ok(vm.pop_root())
}

fn native_foldr(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 3 {
        return Err(arity_error(vm, "foldr", 3, args.len()));
    }
    let items = require_list(vm, args[2], "foldr")?;
    vm.push_root(args[1]);
    for item in items.into_iter().rev() {
        let acc = vm.pop_root();
        let next = vm.call_hammer_value(args[0], &[item, acc])?;
        vm.push_root(next);
    }
    Ok(vm.pop_root())
}

fn native_zip(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 2 {
        return Err(arity_error(vm, "zip", 2, args.len()));
    }
    let a = require_list(vm, args[0], "zip")?;
    let b = require_list(vm, args[1], "zip")?;
    let mut zipped = Vec::with_capacity(a.len().min(b.len()));
    for (x, y) in a.into_iter().zip(b) {
        zipped.push(Value::Obj(vm.heap.new_cell(x, y)));
    }
    Ok(Value::Obj(vm.heap.new_list(zipped)))
}

fn native_type_of(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error(vm, "typeOf", 1, args.len()));
    }
    let name = match args[0] {
        Value::Unit => "unit",
        Value::Bool(_) => "bool",
        Value::Int(_) => "int",
        Value::Float(_) => "float",
        Value::Char(_) => "char",
        Value::Obj(r) => vm.heap.get(r).type_name(),
    };
    Ok(Value::Obj(vm.heap.intern(name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;

    fn vm_with_natives() -> Vm {
        let mut vm = Vm::new();
        install(&mut vm);
        vm
    }

    #[test]
    fn len_counts_list_elements() {
        let mut vm = vm_with_natives();
        let list = vm.heap.new_list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let result = native_len(&mut vm, &[Value::Obj(list)]).unwrap();
        assert_eq!(result, Value::Int(3));
    }

    #[test]
    fn rev_reverses_a_string() {
        let mut vm = vm_with_natives();
        let s = vm.heap.intern("abc");
        let result = native_rev(&mut vm, &[Value::Obj(s)]).unwrap();
        match result {
            Value::Obj(r) => match vm.heap.get(r) {
                Object::Str(s) => assert_eq!(s.chars, "cba"),
                _ => panic!("expected a string"),
            },
            _ => panic!("expected a string"),
        }
    }

    #[test]
    fn zip_pairs_up_to_the_shorter_list() {
        let mut vm = vm_with_natives();
        let a = vm.heap.new_list(vec![Value::Int(1), Value::Int(2)]);
        let b = vm.heap.new_list(vec![Value::Int(10)]);
        let result = native_zip(&mut vm, &[Value::Obj(a), Value::Obj(b)]).unwrap();
        match result {
            Value::Obj(r) => match vm.heap.get(r) {
                Object::List(items) => assert_eq!(items.len(), 1),
                _ => panic!("expected a list"),
            },
            _ => panic!("expected a list"),
        }
    }

    #[test]
    fn type_of_names_are_stable_and_interned() {
        let mut vm = vm_with_natives();
        let a = native_type_of(&mut vm, &[Value::Int(5)]).unwrap();
        let b = native_type_of(&mut vm, &[Value::Int(-1)]).unwrap();
        assert_eq!(a, b);
    }

    // fn(x) = (x, x) - allocates a fresh cell every call, with no root
    // besides whatever calls it.
    fn allocate_pair_chunk() -> Chunk {
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::GetLocal, 1);
        chunk.write_byte(1, 1);
        chunk.write_op(OpCode::GetLocal, 1);
        chunk.write_byte(1, 1);
        chunk.write_op(OpCode::Construct, 1);
        chunk.write_op(OpCode::Return, 1);
        chunk
    }

    // fn(acc, item) = (acc, item)
    fn fold_combine_chunk() -> Chunk {
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::GetLocal, 1);
        chunk.write_byte(1, 1);
        chunk.write_op(OpCode::GetLocal, 1);
        chunk.write_byte(2, 1);
        chunk.write_op(OpCode::Construct, 1);
        chunk.write_op(OpCode::Return, 1);
        chunk
    }

    #[test]
    fn map_accumulator_survives_a_collection_mid_loop() {
        let mut vm = vm_with_natives();
        vm.heap.is_active = true;
        vm.heap.stress = true;
        let mapper = vm.heap.new_function(None, 1, allocate_pair_chunk());
        let list = vm.heap.new_list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let result = native_map(&mut vm, &[Value::Obj(mapper), Value::Obj(list)]).unwrap();
        match result {
            Value::Obj(r) => match vm.heap.get(r) {
                Object::List(items) => {
                    assert_eq!(items.len(), 3);
                    for (i, item) in items.iter().enumerate() {
                        match item {
                            Value::Obj(cell_ref) => match vm.heap.get(*cell_ref) {
                                Object::Cell(a, b) => {
                                    assert_eq!(*a, Value::Int((i + 1) as i64));
                                    assert_eq!(*b, Value::Int((i + 1) as i64));
                                }
                                _ => panic!("expected a cell"),
                            },
                            _ => panic!("expected an object"),
                        }
                    }
                }
                _ => panic!("expected a list"),
            },
            _ => panic!("expected a list"),
        }
    }

    #[test]
    fn filter_accumulator_survives_a_collection_mid_loop() {
        let mut vm = vm_with_natives();
        vm.heap.is_active = true;
        vm.heap.stress = true;
        // fn(x) = x != 0, keeping every item but the first.
        let mut chunk = Chunk::new();
        let zero = chunk.add_constant(Value::Int(0)).unwrap();
        chunk.write_op(OpCode::GetLocal, 1);
        chunk.write_byte(1, 1);
        chunk.write_op(OpCode::Loadv, 1);
        chunk.write_byte(zero, 1);
        chunk.write_op(OpCode::Equals, 1);
        chunk.write_op(OpCode::Not, 1);
        chunk.write_op(OpCode::Return, 1);
        let predicate = vm.heap.new_function(None, 1, chunk);
        let items: Vec<Value> = (0..5).map(Value::Int).collect();
        let list = vm.heap.new_list(items);
        let result = native_filter(&mut vm, &[Value::Obj(predicate), Value::Obj(list)]).unwrap();
        match result {
            Value::Obj(r) => match vm.heap.get(r) {
                Object::List(items) => assert_eq!(items.len(), 4),
                _ => panic!("expected a list"),
            },
            _ => panic!("expected a list"),
        }
    }

    #[test]
    fn foldl_accumulator_survives_a_collection_mid_loop() {
        let mut vm = vm_with_natives();
        vm.heap.is_active = true;
        vm.heap.stress = true;
        let combiner = vm.heap.new_function(None, 2, fold_combine_chunk());
        let list = vm.heap.new_list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let result = native_foldl(&mut vm, &[Value::Obj(combiner), Value::Int(0), Value::Obj(list)]).unwrap();
        match result {
            Value::Obj(r) => match vm.heap.get(r) {
                Object::Cell(a, b) => {
                    assert_eq!(*b, Value::Int(3));
                    match a {
                        Value::Obj(inner) => match vm.heap.get(*inner) {
                            Object::Cell(a2, b2) => {
                                assert_eq!(*b2, Value::Int(2));
                                assert!(matches!(a2, Value::Obj(_)));
                            }
                            _ => panic!("expected a cell"),
                        },
                        _ => panic!("expected an object"),
                    }
                }
                _ => panic!("expected a cell"),
            },
            _ => panic!("expected a cell"),
        }
    }
}
