//! Bytecode disassembler. Turns a [`Chunk`] back into a readable listing of
//! mnemonics and operands - the debugging counterpart to the compiler, used
//! by the CLI's `--disassemble` flag and by tests that assert on emitted
//! shapes without hand-decoding bytes.

use std::fmt::Write;

use crate::chunk::Chunk;
use crate::opcode::{OpCode, SliceMode};

/// Renders every instruction in `chunk`, one per line, prefixed with its
/// byte offset and source line (`|` when the line repeats the previous
/// instruction's, matching clox's convention for dense line tables).
pub fn disassemble_chunk(chunk: &Chunk, name: &str) -> String {
    let mut out = String::new();
    writeln!(out, "== {name} ==").ok();
    let mut offset = 0;
    while offset < chunk.code.len() {
        offset = disassemble_instruction(chunk, offset, &mut out);
    }
    out
}

/// Disassembles the single instruction at `offset`, appending its rendering
/// to `out`, and returns the offset of the next instruction.
pub fn disassemble_instruction(chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    write!(out, "{offset:04} ").ok();
    if offset > 0 && chunk.lines[offset] == chunk.lines[offset - 1] {
        write!(out, "   | ").ok();
    } else {
        write!(out, "{:4} ", chunk.lines[offset]).ok();
    }

    let Some(op) = OpCode::from_u8(chunk.code[offset]) else {
        writeln!(out, "unknown opcode {:#04x}", chunk.code[offset]).ok();
        return offset + 1;
    };

    match op {
        OpCode::Loadv | OpCode::GetGlobal | OpCode::MakeGlobal => constant_instruction(op, chunk, offset, out),
        OpCode::GetLocal | OpCode::Upvalue | OpCode::Call | OpCode::List | OpCode::Map | OpCode::Char => {
            byte_instruction(op, chunk, offset, out)
        }
        OpCode::IntP | OpCode::IntN | OpCode::FloatP | OpCode::FloatN => short_instruction(op, chunk, offset, out),
        OpCode::Jump | OpCode::JumpIfTrue | OpCode::JumpIfFalse | OpCode::TestCase => jump_instruction(op, chunk, offset, out),
        OpCode::Slice => slice_instruction(chunk, offset, out),
        OpCode::Closure => closure_instruction(chunk, offset, out),
        _ => simple_instruction(op, offset, out),
    }
}

fn simple_instruction(op: OpCode, offset: usize, out: &mut String) -> usize {
    writeln!(out, "{}", op.mnemonic()).ok();
    offset + 1
}

fn byte_instruction(op: OpCode, chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    let slot = chunk.code[offset + 1];
    writeln!(out, "{:<16} {slot:4}", op.mnemonic()).ok();
    offset + 2
}

fn short_instruction(op: OpCode, chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    let value = chunk.read_short(offset + 1);
    writeln!(out, "{:<16} {value:6}", op.mnemonic()).ok();
    offset + 3
}

fn constant_instruction(op: OpCode, chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    let index = chunk.code[offset + 1] as usize;
    writeln!(out, "{:<16} {index:4} '{:?}'", op.mnemonic(), chunk.constants.values.get(index)).ok();
    offset + 2
}

fn jump_instruction(op: OpCode, chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    let distance = chunk.read_short(offset + 1);
    let target = offset + 3 + distance as usize;
    writeln!(out, "{:<16} {offset:4} -> {target}", op.mnemonic()).ok();
    offset + 3
}

fn closure_instruction(chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    let count = chunk.code[offset + 1] as usize;
    write!(out, "{:<16} {count:4}", OpCode::Closure.mnemonic()).ok();
    let mut cursor = offset + 2;
    for _ in 0..count {
        let is_local = chunk.code[cursor] != 0;
        let index = chunk.code[cursor + 1];
        write!(out, " {}{index}", if is_local { "local " } else { "upvalue " }).ok();
        cursor += 2;
    }
    writeln!(out).ok();
    cursor
}

fn slice_instruction(chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    let mode = SliceMode::from_u8(chunk.code[offset + 1]);
    writeln!(out, "{:<16} {mode:?}", OpCode::Slice.mnemonic()).ok();
    offset + 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn simple_instruction_renders_its_mnemonic() {
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Return, 1);
        let text = disassemble_chunk(&chunk, "test");
        assert!(text.contains("RETURN"));
    }

    #[test]
    fn constant_instruction_renders_the_constant_value() {
        let mut chunk = Chunk::new();
        let index = chunk.add_constant(Value::Int(42)).unwrap();
        chunk.write_op(OpCode::Loadv, 1);
        chunk.write_byte(index, 1);
        let text = disassemble_chunk(&chunk, "test");
        assert!(text.contains("LOADV"));
        assert!(text.contains("42"));
    }

    #[test]
    fn repeated_line_is_rendered_as_a_pipe() {
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Pop, 3);
        chunk.write_op(OpCode::Pop, 3);
        let text = disassemble_chunk(&chunk, "test");
        assert!(text.contains('|'));
    }
}
