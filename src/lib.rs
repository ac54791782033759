//! Symbolic basic-block analysis and re-emission for a VTIL-style virtual
//! instruction IR.
//!
//! The entry point is [`SymbolicAnalysis`]: derive it from a
//! [`BasicBlock`], [`prepare`](SymbolicAnalysis::prepare) the accumulated
//! expression state, and [`reemit`](SymbolicAnalysis::reemit) an equivalent,
//! typically shorter, instruction sequence back into the block.
//!
//! ```
//! use vtir::{ins, BasicBlock, Operand, RegisterDesc, SymbolicAnalysis, Vip};
//!
//! let mut block = BasicBlock::new(Vip(0x1000));
//! let rax = RegisterDesc::virt(0, 64);
//! block.push(&ins::MOV, [Operand::Reg(rax), Operand::imm(1, 64)]);
//! block.push(&ins::ADD, [Operand::Reg(rax), Operand::imm(2, 64)]);
//! block.vexit(Operand::Reg(rax));
//!
//! let mut analysis = SymbolicAnalysis::of(&block);
//! analysis.prepare(true);
//! analysis.reemit(&mut block);
//! // The block now moves the folded constant and exits.
//! assert!(block.iter().any(|i| i.is(&ins::VEXIT)));
//! ```

pub mod analysis;
mod bit_misc;
pub mod block;
pub mod expr;
pub mod isa;
pub mod pointer;
pub mod state;
pub mod translator;
mod u64_hash;
pub mod variable;
pub mod vm;

pub use crate::analysis::{SymbolicAnalysis, SymbolicSegment, SynchronizedContext};
pub use crate::block::{BasicBlock, Pos, Vip};
pub use crate::expr::Expr;
pub use crate::isa::{ins, Immediate, Instruction, Operand, RegisterDesc, REG_FLAGS, REG_SP, REG_UD};
pub use crate::pointer::SymPointer;
pub use crate::translator::BatchTranslator;
pub use crate::variable::Variable;
pub use crate::vm::{ExitReason, Vm};
