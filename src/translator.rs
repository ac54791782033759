//! Expression-to-operand translation for re-emission.
//!
//! [`BatchTranslator`] turns expressions back into instruction operands,
//! lifting anything that is not a constant or a plain register-at-origin
//! variable into freshly allocated temporaries. Translations are cached, so
//! sub-expressions shared between values lift once.

use fxhash::{FxHashMap, FxHashSet};

use crate::block::{BasicBlock, Pos};
use crate::expr::{BinaryOp, Expr, ExprKind, UnaryOp};
use crate::isa::{ins, Instruction, OpcodeDesc, Operand, RegWeakId, RegisterDesc};
use crate::variable::VarKind;

pub struct BatchTranslator {
    origin: Pos,
    /// Registers the segment overwrites: their initial values must be
    /// pinned into temporaries at lift time, before the writebacks that
    /// clobber them are flushed.
    clobbered: FxHashSet<RegWeakId>,
    cache: FxHashMap<Expr, Operand>,
}

fn compare_opcode(op: BinaryOp) -> &'static OpcodeDesc {
    use BinaryOp::*;
    match op {
        Eq => &ins::TE,
        Ne => &ins::TNE,
        Gt => &ins::TG,
        Ge => &ins::TGE,
        Lt => &ins::TL,
        Le => &ins::TLE,
        Ugt => &ins::TUG,
        Uge => &ins::TUGE,
        Ult => &ins::TUL,
        Ule => &ins::TULE,
        _ => unreachable!(),
    }
}

fn arith_opcode(op: BinaryOp) -> &'static OpcodeDesc {
    use BinaryOp::*;
    match op {
        Add => &ins::ADD,
        Sub => &ins::SUB,
        Mul => &ins::MUL,
        Imul => &ins::IMUL,
        Div => &ins::DIV,
        Idiv => &ins::IDIV,
        Rem => &ins::REM,
        Irem => &ins::IREM,
        And => &ins::AND,
        Or => &ins::OR,
        Xor => &ins::XOR,
        Shl => &ins::SHL,
        Shr => &ins::SHR,
        Rol => &ins::ROL,
        Ror => &ins::ROR,
        _ => unreachable!(),
    }
}

impl BatchTranslator {
    pub fn new(origin: Pos) -> BatchTranslator {
        BatchTranslator {
            origin,
            clobbered: FxHashSet::default(),
            cache: FxHashMap::default(),
        }
    }

    pub fn with_clobbered(origin: Pos, clobbered: FxHashSet<RegWeakId>) -> BatchTranslator {
        BatchTranslator {
            origin,
            clobbered,
            cache: FxHashMap::default(),
        }
    }

    /// Converts the expression to an operand, emitting lifting code into
    /// `block` as needed.
    pub fn translate(&mut self, block: &mut BasicBlock, expr: &Expr) -> Operand {
        if let Some(op) = self.cache.get(expr) {
            return *op;
        }
        let op = self.translate_uncached(block, expr);
        self.cache.insert(expr.clone(), op);
        op
    }

    /// Like [`translate`](Self::translate), but guarantees a register
    /// operand, hoisting immediates through a temporary.
    pub fn translate_to_register(&mut self, block: &mut BasicBlock, expr: &Expr) -> RegisterDesc {
        let op = self.translate(block, expr);
        self.to_register(block, op)
    }

    fn to_register(&mut self, block: &mut BasicBlock, op: Operand) -> RegisterDesc {
        match op {
            Operand::Reg(r) => r,
            Operand::Imm(imm) => {
                let tmp = block.tmp(imm.bit_count);
                block.emplace_back(Instruction::new(&ins::MOV, [Operand::Reg(tmp), op]));
                tmp
            }
        }
    }

    fn translate_uncached(&mut self, block: &mut BasicBlock, expr: &Expr) -> Operand {
        match expr.kind() {
            ExprKind::Const(..) => {
                let value = expr.if_constant_i64().unwrap_or(0);
                Operand::imm(value, expr.bit_count())
            }
            ExprKind::Var(var) => match var.kind() {
                VarKind::Register(desc) => {
                    // The emitted code runs at the segment origin, where the
                    // register still holds the value the variable names --
                    // unless a writeback is about to clobber it, in which
                    // case the initial value is pinned now.
                    debug_assert_eq!(var.at, self.origin);
                    if self.clobbered.contains(&desc.weak()) {
                        let tmp = block.tmp(desc.bit_count);
                        block.emplace_back(Instruction::new(
                            &ins::MOV,
                            [Operand::Reg(tmp), Operand::Reg(*desc)],
                        ));
                        Operand::Reg(tmp)
                    } else {
                        Operand::Reg(*desc)
                    }
                }
                VarKind::Memory { ptr, bit_count } => {
                    let (base, offset) = ptr
                        .if_base_offset()
                        .unwrap_or_else(|| (ptr.clone(), 0));
                    let base = self.translate_to_register(block, &base);
                    let tmp = block.tmp(*bit_count);
                    block.emplace_back(Instruction::new(
                        &ins::LDD,
                        [Operand::Reg(tmp), Operand::Reg(base), Operand::imm(offset, 64)],
                    ));
                    Operand::Reg(tmp)
                }
            },
            ExprKind::Unary { op, val } => {
                let src = self.translate(block, val);
                let tmp = block.tmp(expr.bit_count());
                block.emplace_back(Instruction::new(&ins::MOV, [Operand::Reg(tmp), src]));
                let opcode = match op {
                    UnaryOp::Not => &ins::NOT,
                    UnaryOp::Neg => &ins::NEG,
                };
                block.emplace_back(Instruction::new(opcode, [Operand::Reg(tmp)]));
                Operand::Reg(tmp)
            }
            ExprKind::Binary { op, left, right } => {
                let lhs = self.translate(block, left);
                let rhs = self.translate(block, right);
                let tmp = block.tmp(expr.bit_count());
                if op.is_comparison() {
                    block.emplace_back(Instruction::new(
                        compare_opcode(*op),
                        [Operand::Reg(tmp), lhs, rhs],
                    ));
                } else {
                    block.emplace_back(Instruction::new(&ins::MOV, [Operand::Reg(tmp), lhs]));
                    block.emplace_back(Instruction::new(arith_opcode(*op), [Operand::Reg(tmp), rhs]));
                }
                Operand::Reg(tmp)
            }
            ExprKind::Resize { val, signed } => {
                let src = self.translate(block, val);
                let tmp = block.tmp(expr.bit_count());
                let opcode = if *signed { &ins::MOVSX } else { &ins::MOV };
                block.emplace_back(Instruction::new(opcode, [Operand::Reg(tmp), src]));
                Operand::Reg(tmp)
            }
        }
    }
}
