//! Basic blocks of the virtual instruction stream.
//!
//! A [`BasicBlock`] owns a linear instruction sequence and the stack-pointer
//! bookkeeping that goes with it: `sp_offset` is the stack delta accumulated
//! since block entry that has not been materialized into `$sp`, and
//! `sp_index` counts explicit `$sp` rewrites so offsets stay relative to the
//! right incarnation. Positions into a block are [`Pos`] cursors: block
//! handle (entry vip) plus index.

use std::fmt;

use smallvec::SmallVec;

use crate::isa::{ins, Instruction, Operand, RegisterDesc};
use crate::u64_hash::hash_u64_pair;

/// Virtual instruction pointer; identifies a block within its routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Vip(pub u64);

impl fmt::Display for Vip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Opaque cursor into a block's instruction stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pos {
    pub vip: Vip,
    pub index: u32,
}

impl Pos {
    pub fn hash64(&self) -> u64 {
        hash_u64_pair(self.vip.0, u64::from(self.index))
    }
}

#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    pub entry_vip: Vip,
    /// Stack delta accumulated since entry, not yet folded into `$sp`.
    pub sp_offset: i64,
    /// Incarnation counter of `$sp`; bumped by explicit `$sp` writes.
    pub sp_index: u32,
    pub last_temporary_index: u32,
    /// Successor blocks, if known.
    pub next: SmallVec<[Vip; 2]>,
    instructions: Vec<Instruction>,
}

impl Default for Vip {
    fn default() -> Vip {
        Vip(0)
    }
}

impl BasicBlock {
    pub fn new(entry_vip: Vip) -> BasicBlock {
        BasicBlock {
            entry_vip,
            ..BasicBlock::default()
        }
    }

    /// A fresh block sharing identity and temporary numbering with `self`;
    /// the re-emitter builds into one of these and commits via [`assign`].
    ///
    /// [`assign`]: BasicBlock::assign
    pub fn derive_temporary(&self) -> BasicBlock {
        BasicBlock {
            entry_vip: self.entry_vip,
            last_temporary_index: self.last_temporary_index,
            ..BasicBlock::default()
        }
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn ins(&self, index: u32) -> &Instruction {
        &self.instructions[index as usize]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Instruction> {
        self.instructions.iter()
    }

    pub fn pos(&self, index: u32) -> Pos {
        Pos {
            vip: self.entry_vip,
            index,
        }
    }

    /// Allocates a block-local temporary register.
    pub fn tmp(&mut self, bit_count: u8) -> RegisterDesc {
        let id = self.last_temporary_index;
        self.last_temporary_index += 1;
        RegisterDesc::temporary(id, bit_count)
    }

    /// Logically advances `$sp` without emitting an instruction.
    pub fn shift_sp(&mut self, delta: i64) {
        self.sp_offset += delta;
    }

    /// Appends an instruction, stamping it with the current stack
    /// bookkeeping; an explicit `$sp` write starts a new `sp_index`
    /// incarnation.
    pub fn emplace_back(&mut self, mut ins: Instruction) {
        ins.sp_offset = self.sp_offset;
        ins.sp_index = self.sp_index;
        let writes_sp = ins.writes_stack_pointer();
        self.instructions.push(ins);
        if writes_sp {
            self.sp_index += 1;
            self.sp_offset = 0;
        }
    }

    /// Appends with no post-processing: the instruction keeps whatever
    /// bookkeeping fields it carries.
    pub fn np_emplace_back(&mut self, ins: Instruction) {
        self.instructions.push(ins);
    }

    pub fn push(&mut self, base: &'static crate::isa::OpcodeDesc, operands: impl IntoIterator<Item = Operand>) {
        self.emplace_back(Instruction::new(base, operands));
    }

    pub fn jmp(&mut self, target: Operand) {
        if let Some(imm) = target.if_imm() {
            self.next.push(Vip(imm.value));
        }
        self.push(&ins::JMP, [target]);
    }

    pub fn js(&mut self, cc: Operand, if_true: Operand, if_false: Operand) {
        for target in [&if_true, &if_false] {
            if let Some(imm) = target.if_imm() {
                self.next.push(Vip(imm.value));
            }
        }
        self.push(&ins::JS, [cc, if_true, if_false]);
    }

    pub fn vexit(&mut self, target: Operand) {
        self.push(&ins::VEXIT, [target]);
    }

    pub fn vxcall(&mut self, target: Operand) {
        self.push(&ins::VXCALL, [target]);
    }

    /// Replaces this block's contents with another block's, keeping the
    /// identity and successor links.
    pub fn assign(&mut self, other: BasicBlock) {
        self.instructions = other.instructions;
        self.sp_offset = other.sp_offset;
        self.sp_index = other.sp_index;
        self.last_temporary_index = other.last_temporary_index;
    }
}

impl fmt::Display for BasicBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "block {}:", self.entry_vip)?;
        for (i, ins) in self.instructions.iter().enumerate() {
            writeln!(f, "  {:>3}: {}", i, ins)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::isa::{Operand, RegisterDesc, REG_SP};

    #[test]
    fn sp_bookkeeping() {
        let mut block = BasicBlock::new(Vip(0x1000));
        let rax = RegisterDesc::virt(0, 64);
        block.push(&ins::MOV, [Operand::Reg(rax), Operand::imm(1, 64)]);
        assert_eq!(block.ins(0).sp_offset, 0);
        block.shift_sp(-8);
        block.push(&ins::STR, [
            Operand::Reg(REG_SP),
            Operand::imm(-8, 64),
            Operand::Reg(rax),
        ]);
        assert_eq!(block.ins(1).sp_offset, -8);
        assert_eq!(block.ins(1).sp_index, 0);

        // Explicit $sp write starts a new incarnation.
        block.push(&ins::MOV, [Operand::Reg(REG_SP), Operand::Reg(rax)]);
        assert_eq!(block.ins(2).sp_offset, -8);
        assert_eq!(block.sp_index, 1);
        assert_eq!(block.sp_offset, 0);
    }

    #[test]
    fn temporaries() {
        let mut block = BasicBlock::new(Vip(0));
        let t0 = block.tmp(64);
        let t1 = block.tmp(1);
        assert!(t0.is_local() && t1.is_local());
        assert_ne!(t0.id, t1.id);
        assert_eq!(block.last_temporary_index, 2);
    }

    #[test]
    fn jmp_records_successor() {
        let mut block = BasicBlock::new(Vip(0));
        block.jmp(Operand::imm(0x2000, 64));
        assert_eq!(&block.next[..], &[Vip(0x2000)]);
    }

    #[test]
    fn assign_keeps_identity() {
        let mut block = BasicBlock::new(Vip(0x1000));
        block.push(&ins::NOP, []);
        let mut replacement = block.derive_temporary();
        replacement.push(&ins::NOP, []);
        replacement.push(&ins::NOP, []);
        replacement.sp_offset = 0x20;
        block.assign(replacement);
        assert_eq!(block.entry_vip, Vip(0x1000));
        assert_eq!(block.len(), 2);
        assert_eq!(block.sp_offset, 0x20);
    }
}
