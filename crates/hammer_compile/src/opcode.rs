//! The "Maul" bytecode instruction set emitted by the compiler and decoded
//! by the VM's fetch-decode loop. Opcodes are numbered densely from 0;
//! operand widths are fixed per opcode and read big-endian when multi-byte.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Return = 0x00,
    TailCall = 0x01,
    Pop = 0x02,
    ReturnScope = 0x03,
    DupeTop = 0x04,
    Loadv = 0x05,
    True = 0x06,
    False = 0x07,
    Unit = 0x08,
    Not = 0x09,
    Truthy = 0x0A,
    Negate = 0x0B,
    Add = 0x0C,
    Subtract = 0x0D,
    Multiply = 0x0E,
    Divide = 0x0F,
    Modulo = 0x10,
    Exponent = 0x11,
    Diff = 0x12,
    DiffEq = 0x13,
    Equals = 0x14,
    Construct = 0x15,
    Car = 0x16,
    Cdr = 0x17,
    Concat = 0x18,
    MakeGlobal = 0x19,
    GetGlobal = 0x1A,
    GetLocal = 0x1B,
    Upvalue = 0x1C,
    Jump = 0x1D,
    JumpIfTrue = 0x1E,
    JumpIfFalse = 0x1F,
    Call = 0x20,
    Closure = 0x21,
    Decons = 0x22,
    TreeComp = 0x23,
    List = 0x24,
    Map = 0x25,
    Subscript = 0x26,
    Slice = 0x27,
    Receive = 0x28,
    TestCase = 0x29,
    Compose = 0x2A,
    In = 0x2B,
    IntP = 0x2C,
    IntN = 0x2D,
    FloatP = 0x2E,
    FloatN = 0x2F,
    Char = 0x30,
    SwapTop = 0x31,
}

impl OpCode {
    pub fn from_u8(byte: u8) -> Option<OpCode> {
        use OpCode::*;
        Some(match byte {
            0x00 => Return,
            0x01 => TailCall,
            0x02 => Pop,
            0x03 => ReturnScope,
            0x04 => DupeTop,
            0x05 => Loadv,
            0x06 => True,
            0x07 => False,
            0x08 => Unit,
            0x09 => Not,
            0x0A => Truthy,
            0x0B => Negate,
            0x0C => Add,
            0x0D => Subtract,
            0x0E => Multiply,
            0x0F => Divide,
            0x10 => Modulo,
            0x11 => Exponent,
            0x12 => Diff,
            0x13 => DiffEq,
            0x14 => Equals,
            0x15 => Construct,
            0x16 => Car,
            0x17 => Cdr,
            0x18 => Concat,
            0x19 => MakeGlobal,
            0x1A => GetGlobal,
            0x1B => GetLocal,
            0x1C => Upvalue,
            0x1D => Jump,
            0x1E => JumpIfTrue,
            0x1F => JumpIfFalse,
            0x20 => Call,
            0x21 => Closure,
            0x22 => Decons,
            0x23 => TreeComp,
            0x24 => List,
            0x25 => Map,
            0x26 => Subscript,
            0x27 => Slice,
            0x28 => Receive,
            0x29 => TestCase,
            0x2A => Compose,
            0x2B => In,
            0x2C => IntP,
            0x2D => IntN,
            0x2E => FloatP,
            0x2F => FloatN,
            0x30 => Char,
            0x31 => SwapTop,
            _ => return None,
        })
    }

    /// Mnemonic used by the disassembler.
    pub fn mnemonic(self) -> &'static str {
        use OpCode::*;
        match self {
            Return => "RETURN",
            TailCall => "TAIL_CALL",
            Pop => "POP",
            ReturnScope => "RETURN_SCOPE",
            DupeTop => "DUPE_TOP",
            Loadv => "LOADV",
            True => "TRUE",
            False => "FALSE",
            Unit => "UNIT",
            Not => "NOT",
            Truthy => "TRUTHY",
            Negate => "NEGATE",
            Add => "ADD",
            Subtract => "SUBTRACT",
            Multiply => "MULTIPLY",
            Divide => "DIVIDE",
            Modulo => "MODULO",
            Exponent => "EXPONENT",
            Diff => "DIFF",
            DiffEq => "DIFFEQ",
            Equals => "EQUALS",
            Construct => "CONSTRUCT",
            Car => "CAR",
            Cdr => "CDR",
            Concat => "CONCAT",
            MakeGlobal => "MAKE_GLOBAL",
            GetGlobal => "GET_GLOBAL",
            GetLocal => "GET_LOCAL",
            Upvalue => "UPVALUE",
            Jump => "JUMP",
            JumpIfTrue => "JUMP_IF_TRUE",
            JumpIfFalse => "JUMP_IF_FALSE",
            Call => "CALL",
            Closure => "CLOSURE",
            Decons => "DECONS",
            TreeComp => "TREE_COMP",
            List => "LIST",
            Map => "MAP",
            Subscript => "SUBSCRIPT",
            Slice => "SLICE",
            Receive => "RECEIVE",
            TestCase => "TEST_CASE",
            Compose => "COMPOSE",
            In => "IN",
            IntP => "INT_P",
            IntN => "INT_N",
            FloatP => "FLOAT_P",
            FloatN => "FLOAT_N",
            Char => "CHAR",
            SwapTop => "SWAP_TOP",
        }
    }
}

/// The four ways a `SLICE` instruction's sides may be open, packed into the
/// single operand byte the compiler emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SliceMode {
    Open = 0,
    UpperOnly = 1,
    LowerOnly = 2,
    Both = 3,
}

impl SliceMode {
    pub fn from_u8(byte: u8) -> Option<SliceMode> {
        Some(match byte {
            0 => SliceMode::Open,
            1 => SliceMode::UpperOnly,
            2 => SliceMode::LowerOnly,
            3 => SliceMode::Both,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_opcode_round_trips_through_its_byte() {
        for byte in 0u8..=0x31 {
            let op = OpCode::from_u8(byte).unwrap_or_else(|| panic!("missing opcode for {byte:#x}"));
            assert_eq!(op as u8, byte);
        }
    }

    #[test]
    fn unknown_byte_yields_none() {
        assert!(OpCode::from_u8(0xFF).is_none());
    }

    #[test]
    fn slice_mode_round_trips() {
        for byte in 0u8..4 {
            assert!(SliceMode::from_u8(byte).is_some());
        }
        assert!(SliceMode::from_u8(4).is_none());
    }
}
