//! Register descriptors, operands and the virtual instruction set.
//!
//! Opcodes are static [`OpcodeDesc`] values; instruction identity is the
//! descriptor address, compared with [`Instruction::is`].

use std::fmt;
use std::ptr;

use bitflags::bitflags;
use smallvec::SmallVec;

use crate::bit_misc::fill;

bitflags! {
    /// Capability flags of a register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RegisterFlags: u16 {
        /// Architectural register of the host machine.
        const PHYSICAL = 1 << 0;
        /// Block-local temporary.
        const LOCAL = 1 << 1;
        /// Holds CPU flags; bits are addressed individually.
        const FLAGS = 1 << 2;
        const STACK_POINTER = 1 << 3;
        /// May change spontaneously; not symbolizable.
        const VOLATILE = 1 << 5;
        const READONLY = 1 << 6;
        /// The special "undefined value" register.
        const UNDEFINED = 1 << 7;
    }
}

/// Identity of a register without the accessed slice; map key for
/// coverage/state tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegWeakId {
    pub flags: RegisterFlags,
    pub id: u32,
}

/// A register operand: identity plus the accessed bit slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterDesc {
    pub flags: RegisterFlags,
    pub id: u32,
    pub bit_count: u8,
    pub bit_offset: u8,
}

pub const REG_SP: RegisterDesc = RegisterDesc {
    flags: RegisterFlags::PHYSICAL.union(RegisterFlags::STACK_POINTER),
    id: 0,
    bit_count: 64,
    bit_offset: 0,
};

pub const REG_FLAGS: RegisterDesc = RegisterDesc {
    flags: RegisterFlags::PHYSICAL.union(RegisterFlags::FLAGS),
    id: 1,
    bit_count: 64,
    bit_offset: 0,
};

pub const REG_UD: RegisterDesc = RegisterDesc {
    flags: RegisterFlags::VOLATILE.union(RegisterFlags::UNDEFINED),
    id: 2,
    bit_count: 64,
    bit_offset: 0,
};

impl RegisterDesc {
    /// Plain virtual register.
    pub fn virt(id: u32, bit_count: u8) -> RegisterDesc {
        RegisterDesc {
            flags: RegisterFlags::empty(),
            id,
            bit_count,
            bit_offset: 0,
        }
    }

    /// Block-local temporary; allocated through `BasicBlock::tmp`.
    pub fn temporary(id: u32, bit_count: u8) -> RegisterDesc {
        RegisterDesc {
            flags: RegisterFlags::LOCAL,
            id,
            bit_count,
            bit_offset: 0,
        }
    }

    pub fn weak(&self) -> RegWeakId {
        RegWeakId {
            flags: self.flags,
            id: self.id,
        }
    }

    /// Accessed bits in absolute register bit positions.
    pub fn mask(&self) -> u64 {
        fill(self.bit_count) << self.bit_offset
    }

    /// Same identity, different slice.
    pub fn slice(&self, bit_offset: u8, bit_count: u8) -> RegisterDesc {
        debug_assert!(bit_offset as u32 + bit_count as u32 <= 64);
        RegisterDesc {
            bit_offset,
            bit_count,
            ..*self
        }
    }

    pub fn is_stack_pointer(&self) -> bool {
        self.flags.contains(RegisterFlags::STACK_POINTER)
    }

    pub fn is_flags(&self) -> bool {
        self.flags.contains(RegisterFlags::FLAGS)
    }

    pub fn is_volatile(&self) -> bool {
        self.flags.contains(RegisterFlags::VOLATILE)
    }

    pub fn is_read_only(&self) -> bool {
        self.flags.contains(RegisterFlags::READONLY)
    }

    pub fn is_undefined(&self) -> bool {
        self.flags.contains(RegisterFlags::UNDEFINED)
    }

    pub fn is_local(&self) -> bool {
        self.flags.contains(RegisterFlags::LOCAL)
    }
}

impl From<RegisterDesc> for RegWeakId {
    fn from(desc: RegisterDesc) -> RegWeakId {
        desc.weak()
    }
}

impl RegWeakId {
    /// The full 64-bit slice of this register.
    pub fn full(&self) -> RegisterDesc {
        RegisterDesc {
            flags: self.flags,
            id: self.id,
            bit_count: 64,
            bit_offset: 0,
        }
    }

    pub fn is_stack_pointer(&self) -> bool {
        self.flags.contains(RegisterFlags::STACK_POINTER)
    }

    pub fn is_flags(&self) -> bool {
        self.flags.contains(RegisterFlags::FLAGS)
    }
}

impl fmt::Display for RegisterDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.flags.contains(RegisterFlags::VOLATILE) {
            write!(f, "?")?;
        }
        if self.flags.contains(RegisterFlags::READONLY) {
            write!(f, "&&")?;
        }
        if self.flags.contains(RegisterFlags::UNDEFINED) {
            write!(f, "UD")?;
        } else if self.flags.contains(RegisterFlags::STACK_POINTER) {
            write!(f, "$sp")?;
        } else if self.flags.contains(RegisterFlags::FLAGS) {
            write!(f, "$flags")?;
        } else if self.flags.contains(RegisterFlags::LOCAL) {
            write!(f, "t{}", self.id)?;
        } else {
            write!(f, "v{}", self.id)?;
        }
        if self.bit_offset != 0 {
            write!(f, "@{}", self.bit_offset)?;
        }
        if self.bit_count != 64 {
            write!(f, ":{}", self.bit_count)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Immediate {
    pub value: u64,
    pub bit_count: u8,
}

impl Immediate {
    pub fn new(value: i64, bit_count: u8) -> Immediate {
        Immediate {
            value: (value as u64) & fill(bit_count),
            bit_count,
        }
    }

    /// Value sign-extended to 64 bits.
    pub fn as_i64(&self) -> i64 {
        let shift = 64 - self.bit_count as u32;
        ((self.value << shift) as i64) >> shift
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    Reg(RegisterDesc),
    Imm(Immediate),
}

impl Operand {
    pub fn imm(value: i64, bit_count: u8) -> Operand {
        Operand::Imm(Immediate::new(value, bit_count))
    }

    pub fn is_register(&self) -> bool {
        matches!(self, Operand::Reg(..))
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self, Operand::Imm(..))
    }

    pub fn if_reg(&self) -> Option<RegisterDesc> {
        match *self {
            Operand::Reg(r) => Some(r),
            Operand::Imm(..) => None,
        }
    }

    pub fn if_imm(&self) -> Option<Immediate> {
        match *self {
            Operand::Reg(..) => None,
            Operand::Imm(i) => Some(i),
        }
    }

    pub fn bit_count(&self) -> u8 {
        match *self {
            Operand::Reg(r) => r.bit_count,
            Operand::Imm(i) => i.bit_count,
        }
    }
}

impl From<RegisterDesc> for Operand {
    fn from(reg: RegisterDesc) -> Operand {
        Operand::Reg(reg)
    }
}

impl From<Immediate> for Operand {
    fn from(imm: Immediate) -> Operand {
        Operand::Imm(imm)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Operand::Reg(r) => write!(f, "{}", r),
            Operand::Imm(i) => write!(f, "{:#x}", i.value),
        }
    }
}

/// How an instruction accesses one of its operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandRule {
    ReadReg,
    ReadImm,
    ReadAny,
    Write,
    ReadWrite,
}

impl OperandRule {
    pub fn is_write(&self) -> bool {
        matches!(self, OperandRule::Write | OperandRule::ReadWrite)
    }

    pub fn is_read(&self) -> bool {
        !matches!(self, OperandRule::Write)
    }
}

#[derive(Debug)]
pub struct OpcodeDesc {
    pub name: &'static str,
    pub operands: &'static [OperandRule],
    pub branching: bool,
    pub volatile: bool,
    pub reads_memory: bool,
    pub writes_memory: bool,
}

macro_rules! opcode {
    ($name:ident, $str:expr, [$($rule:ident),*]
        $(, branching: $br:expr)?
        $(, volatile: $vol:expr)?
        $(, reads_memory: $rm:expr)?
        $(, writes_memory: $wm:expr)?
    ) => {
        pub static $name: OpcodeDesc = OpcodeDesc {
            name: $str,
            operands: &[$(OperandRule::$rule),*],
            branching: false $(|| $br)?,
            volatile: false $(|| $vol)?,
            reads_memory: false $(|| $rm)?,
            writes_memory: false $(|| $wm)?,
        };
    };
}

/// The instruction set. Arithmetic is two-address: the first operand is
/// both destination and left-hand source.
pub mod ins {
    use super::{OpcodeDesc, OperandRule};

    opcode!(MOV, "mov", [Write, ReadAny]);
    opcode!(MOVSX, "movsx", [Write, ReadAny]);
    opcode!(STR, "str", [ReadReg, ReadImm, ReadAny], writes_memory: true);
    opcode!(LDD, "ldd", [Write, ReadReg, ReadImm], reads_memory: true);

    opcode!(NEG, "neg", [ReadWrite]);
    opcode!(ADD, "add", [ReadWrite, ReadAny]);
    opcode!(SUB, "sub", [ReadWrite, ReadAny]);
    opcode!(MUL, "mul", [ReadWrite, ReadAny]);
    opcode!(IMUL, "imul", [ReadWrite, ReadAny]);
    opcode!(MULHI, "mulhi", [ReadWrite, ReadAny]);
    opcode!(IMULHI, "imulhi", [ReadWrite, ReadAny]);
    opcode!(DIV, "div", [ReadWrite, ReadAny]);
    opcode!(IDIV, "idiv", [ReadWrite, ReadAny]);
    opcode!(REM, "rem", [ReadWrite, ReadAny]);
    opcode!(IREM, "irem", [ReadWrite, ReadAny]);

    opcode!(NOT, "not", [ReadWrite]);
    opcode!(AND, "and", [ReadWrite, ReadAny]);
    opcode!(OR, "or", [ReadWrite, ReadAny]);
    opcode!(XOR, "xor", [ReadWrite, ReadAny]);
    opcode!(SHL, "shl", [ReadWrite, ReadAny]);
    opcode!(SHR, "shr", [ReadWrite, ReadAny]);
    opcode!(ROL, "rol", [ReadWrite, ReadAny]);
    opcode!(ROR, "ror", [ReadWrite, ReadAny]);

    opcode!(TE, "te", [Write, ReadAny, ReadAny]);
    opcode!(TNE, "tne", [Write, ReadAny, ReadAny]);
    opcode!(TG, "tg", [Write, ReadAny, ReadAny]);
    opcode!(TGE, "tge", [Write, ReadAny, ReadAny]);
    opcode!(TL, "tl", [Write, ReadAny, ReadAny]);
    opcode!(TLE, "tle", [Write, ReadAny, ReadAny]);
    opcode!(TUG, "tug", [Write, ReadAny, ReadAny]);
    opcode!(TUGE, "tuge", [Write, ReadAny, ReadAny]);
    opcode!(TUL, "tul", [Write, ReadAny, ReadAny]);
    opcode!(TULE, "tule", [Write, ReadAny, ReadAny]);

    opcode!(JS, "js", [ReadAny, ReadAny, ReadAny], branching: true);
    opcode!(JMP, "jmp", [ReadAny], branching: true);
    opcode!(VEXIT, "vexit", [ReadAny], branching: true);
    opcode!(VXCALL, "vxcall", [ReadAny], branching: true);

    opcode!(NOP, "nop", []);
    opcode!(VEMIT, "vemit", [ReadImm], volatile: true);
    opcode!(VPINR, "vpinr", [ReadReg], volatile: true);
    opcode!(VPINW, "vpinw", [Write], volatile: true);
}

pub type OperandVec = SmallVec<[Operand; 4]>;

#[derive(Debug, Clone)]
pub struct Instruction {
    pub base: &'static OpcodeDesc,
    pub operands: OperandVec,
    /// Stack delta accumulated at this instruction but not yet materialized
    /// into `$sp`.
    pub sp_offset: i64,
    /// Which incarnation of `$sp` the offset is relative to.
    pub sp_index: u32,
    /// Explicit volatility, on top of the opcode's.
    pub volatile: bool,
}

impl Instruction {
    pub fn new<I>(base: &'static OpcodeDesc, operands: I) -> Instruction
    where
        I: IntoIterator<Item = Operand>,
    {
        let operands: OperandVec = operands.into_iter().collect();
        assert_eq!(
            operands.len(),
            base.operands.len(),
            "operand count mismatch for {}",
            base.name,
        );
        for (op, rule) in operands.iter().zip(base.operands.iter()) {
            match rule {
                OperandRule::ReadReg | OperandRule::Write | OperandRule::ReadWrite => {
                    assert!(op.is_register(), "{} requires a register operand", base.name);
                }
                OperandRule::ReadImm => {
                    assert!(op.is_immediate(), "{} requires an immediate operand", base.name);
                }
                OperandRule::ReadAny => (),
            }
        }
        Instruction {
            base,
            operands,
            sp_offset: 0,
            sp_index: 0,
            volatile: false,
        }
    }

    pub fn is(&self, opcode: &'static OpcodeDesc) -> bool {
        ptr::eq(self.base, opcode)
    }

    pub fn is_volatile(&self) -> bool {
        self.volatile || self.base.volatile
    }

    /// Base register and displacement of the memory access of `str`/`ldd`.
    pub fn memory_location(&self) -> Option<(RegisterDesc, i64)> {
        if !self.base.reads_memory && !self.base.writes_memory {
            return None;
        }
        let base = if self.is(&ins::LDD) {
            self.operands[1].if_reg()?
        } else {
            self.operands[0].if_reg()?
        };
        let offset = if self.is(&ins::LDD) {
            self.operands[2].if_imm()?.as_i64()
        } else {
            self.operands[1].if_imm()?.as_i64()
        };
        Some((base, offset))
    }

    /// Rewrites the displacement of the memory access; `memory_location`
    /// must have returned `Some`.
    pub fn set_memory_displacement(&mut self, offset: i64) {
        let idx = if self.is(&ins::LDD) { 2 } else { 1 };
        let bits = self.operands[idx].bit_count();
        self.operands[idx] = Operand::imm(offset, bits);
    }

    /// True if any written operand is the stack pointer.
    pub fn writes_stack_pointer(&self) -> bool {
        self.operands
            .iter()
            .zip(self.base.operands.iter())
            .any(|(op, rule)| {
                rule.is_write() && op.if_reg().map(|r| r.is_stack_pointer()).unwrap_or(false)
            })
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base.name)?;
        for (i, op) in self.operands.iter().enumerate() {
            if i == 0 {
                write!(f, " {}", op)?;
            } else {
                write!(f, ", {}", op)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn masks() {
        assert_eq!(REG_SP.mask(), !0u64);
        let al = RegisterDesc::virt(5, 8);
        assert_eq!(al.mask(), 0xff);
        let ah = al.slice(8, 8);
        assert_eq!(ah.mask(), 0xff00);
        assert_eq!(ah.weak(), al.weak());
    }

    #[test]
    fn immediate_sign() {
        let imm = Immediate::new(-8, 64);
        assert_eq!(imm.as_i64(), -8);
        let imm = Immediate::new(-1, 8);
        assert_eq!(imm.value, 0xff);
        assert_eq!(imm.as_i64(), -1);
    }

    #[test]
    fn opcode_identity() {
        let i = Instruction::new(
            &ins::MOV,
            [Operand::Reg(RegisterDesc::virt(0, 64)), Operand::imm(1, 64)],
        );
        assert!(i.is(&ins::MOV));
        assert!(!i.is(&ins::MOVSX));
        assert!(!i.is_volatile());
    }

    #[test]
    fn memory_location() {
        let rax = RegisterDesc::virt(0, 64);
        let i = Instruction::new(
            &ins::STR,
            [Operand::Reg(REG_SP), Operand::imm(-8, 64), Operand::Reg(rax)],
        );
        let (base, offset) = i.memory_location().unwrap();
        assert!(base.is_stack_pointer());
        assert_eq!(offset, -8);

        let i = Instruction::new(
            &ins::LDD,
            [Operand::Reg(rax), Operand::Reg(REG_SP), Operand::imm(0x10, 64)],
        );
        let (base, offset) = i.memory_location().unwrap();
        assert!(base.is_stack_pointer());
        assert_eq!(offset, 0x10);
    }

    #[test]
    #[should_panic]
    fn operand_rule_validation() {
        Instruction::new(&ins::STR, [Operand::imm(0, 64), Operand::imm(0, 64), Operand::imm(0, 64)]);
    }

    #[test]
    fn sp_write_detection() {
        let i = Instruction::new(&ins::ADD, [Operand::Reg(REG_SP), Operand::imm(8, 64)]);
        assert!(i.writes_stack_pointer());
        let i = Instruction::new(
            &ins::MOV,
            [Operand::Reg(RegisterDesc::virt(0, 64)), Operand::Reg(REG_SP)],
        );
        assert!(!i.writes_stack_pointer());
    }
}
