//! Initial-state variables: the leaves the symbolic state bottoms out at.
//!
//! A [`Variable`] names "the value a register slice (or a memory location)
//! had at a given block position". Reads that cannot be resolved from writes
//! recorded earlier in the same segment synthesize these.

use std::fmt;
use std::hash::{Hash, Hasher};

use smallvec::SmallVec;

use crate::block::Pos;
use crate::expr::{BinaryOp, Expr, ExprKind};
use crate::isa::RegisterDesc;
use crate::u64_hash::{hash_u64, hash_u64_pair};

#[derive(Debug, Clone)]
pub enum VarKind {
    Register(RegisterDesc),
    Memory { ptr: Expr, bit_count: u8 },
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub at: Pos,
    kind: VarKind,
    hash: u64,
}

impl Variable {
    pub fn register(at: Pos, desc: RegisterDesc) -> Variable {
        let hash = hash_u64_pair(
            at.hash64(),
            hash_u64(
                (u64::from(desc.flags.bits()) << 48)
                    | (u64::from(desc.id) << 16)
                    | (u64::from(desc.bit_offset) << 8)
                    | u64::from(desc.bit_count),
            ),
        );
        Variable {
            at,
            kind: VarKind::Register(desc),
            hash,
        }
    }

    pub fn memory(at: Pos, ptr: Expr, bit_count: u8) -> Variable {
        let hash = hash_u64_pair(at.hash64(), hash_u64_pair(ptr.hash(), u64::from(bit_count)));
        Variable {
            at,
            kind: VarKind::Memory { ptr, bit_count },
            hash,
        }
    }

    pub fn kind(&self) -> &VarKind {
        &self.kind
    }

    pub fn is_memory(&self) -> bool {
        matches!(self.kind, VarKind::Memory { .. })
    }

    pub fn if_register(&self) -> Option<RegisterDesc> {
        match self.kind {
            VarKind::Register(desc) => Some(desc),
            VarKind::Memory { .. } => None,
        }
    }

    /// The backing pointer expression of a memory variable.
    pub fn if_memory(&self) -> Option<&Expr> {
        match &self.kind {
            VarKind::Register(..) => None,
            VarKind::Memory { ptr, .. } => Some(ptr),
        }
    }

    pub fn bit_count(&self) -> u8 {
        match &self.kind {
            VarKind::Register(desc) => desc.bit_count,
            VarKind::Memory { bit_count, .. } => *bit_count,
        }
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }
}

impl PartialEq for Variable {
    fn eq(&self, other: &Variable) -> bool {
        if self.hash != other.hash || self.at != other.at {
            return false;
        }
        match (&self.kind, &other.kind) {
            (VarKind::Register(a), VarKind::Register(b)) => a == b,
            (
                VarKind::Memory { ptr: a, bit_count: ab },
                VarKind::Memory { ptr: b, bit_count: bb },
            ) => ab == bb && a == b,
            _ => false,
        }
    }
}

impl Eq for Variable {}

impl Hash for Variable {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            VarKind::Register(desc) => write!(f, "{}#{}", desc, self.at.index),
            VarKind::Memory { ptr, bit_count } => {
                write!(f, "[{}]:{}#{}", ptr, bit_count, self.at.index)
            }
        }
    }
}

/// A shifted register-variable slice found inside an or-chain term.
struct SliceTerm {
    at: Pos,
    desc: RegisterDesc,
    /// Bit position of the slice within the packed value.
    position: u8,
}

fn if_slice_term(e: &Expr) -> Option<SliceTerm> {
    // var | zx(var) | (zx(var) << c)
    let (inner, position) = match e.kind() {
        ExprKind::Binary { op: BinaryOp::Shl, left, right } => {
            let c = right.if_constant()?;
            (left, u8::try_from(c).ok()?)
        }
        _ => (e, 0),
    };
    let inner = match inner.kind() {
        ExprKind::Resize { val, signed: false } => val,
        _ => inner,
    };
    let var = inner.if_variable()?;
    let desc = var.if_register()?;
    Some(SliceTerm {
        at: var.at,
        desc,
        position,
    })
}

/// Re-packs shifted/masked slices of the same register variable back into
/// wider slice variables, so downstream translation can emit plain register
/// operands instead of bit arithmetic. Applied to the whole tree.
pub fn pack_all(expr: &Expr) -> Expr {
    expr.transform(&mut |e| {
        // (var & low_mask) reads as a zero-extended narrow slice.
        if let ExprKind::Binary { op: BinaryOp::And, left, right } = e.kind() {
            let mask = right.if_constant()?;
            let low_bits = mask.trailing_ones() as u8;
            if mask.count_ones() != u32::from(low_bits) || low_bits == 0 {
                return None;
            }
            let var = left.if_variable()?;
            let desc = var.if_register()?;
            if low_bits >= desc.bit_count {
                return None;
            }
            let sliced = Expr::variable(Variable::register(
                var.at,
                desc.slice(desc.bit_offset, low_bits),
            ));
            return Some(sliced.zext(e.bit_count()));
        }

        // Or-chain of contiguous shifted slices of one register tiles back
        // into a single wider slice.
        if let ExprKind::Binary { op: BinaryOp::Or, .. } = e.kind() {
            let mut terms: SmallVec<[SliceTerm; 4]> = SmallVec::new();
            let mut head = e.clone();
            loop {
                let next = match head.kind() {
                    ExprKind::Binary { op: BinaryOp::Or, left, right } => {
                        terms.push(if_slice_term(right)?);
                        Some(left.clone())
                    }
                    _ => {
                        terms.push(if_slice_term(&head)?);
                        None
                    }
                };
                match next {
                    Some(n) => head = n,
                    None => break,
                }
            }
            terms.sort_by_key(|t| t.position);
            let first = &terms[0];
            if first.position != 0 {
                return None;
            }
            let (at, id, flags) = (first.at, first.desc.id, first.desc.flags);
            let base_offset = first.desc.bit_offset;
            let mut end = first.desc.bit_count;
            for term in &terms[1..] {
                if term.at != at || term.desc.id != id || term.desc.flags != flags {
                    return None;
                }
                if u32::from(end) + u32::from(term.desc.bit_count) > 64 {
                    return None;
                }
                if term.position != end || term.desc.bit_offset != base_offset + end {
                    return None;
                }
                end += term.desc.bit_count;
            }
            if u32::from(base_offset) + u32::from(end) > 64 {
                return None;
            }
            let packed = Expr::variable(Variable::register(
                at,
                first.desc.slice(base_offset, end),
            ));
            return Some(packed.zext(e.bit_count()));
        }
        None
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::block::Vip;

    fn pos(index: u32) -> Pos {
        Pos {
            vip: Vip(0x1000),
            index,
        }
    }

    #[test]
    fn identity() {
        let rax = RegisterDesc::virt(0, 64);
        let a = Variable::register(pos(0), rax);
        let b = Variable::register(pos(0), rax);
        assert_eq!(a, b);
        assert_eq!(a.hash(), b.hash());
        let c = Variable::register(pos(1), rax);
        assert_ne!(a, c);
    }

    #[test]
    fn memory_variable_identity_tracks_pointer() {
        let rax = Expr::variable(Variable::register(pos(0), RegisterDesc::virt(0, 64)));
        let a = Variable::memory(pos(2), rax.clone(), 64);
        let b = Variable::memory(pos(2), rax.clone(), 64);
        assert_eq!(a, b);
        let other = Expr::variable(Variable::register(pos(0), RegisterDesc::virt(1, 64)));
        let c = Variable::memory(pos(2), other, 64);
        assert_ne!(a, c);
    }

    #[test]
    fn pack_or_chain_of_slices() {
        let reg = RegisterDesc::virt(7, 64);
        let lo = Expr::variable(Variable::register(pos(0), reg.slice(0, 8)));
        let hi = Expr::variable(Variable::register(pos(0), reg.slice(8, 8)));
        let joined = &lo.zext(16) | &Expr::binary(BinaryOp::Shl, &hi.zext(16), &Expr::constant(8, 8));
        let packed = pack_all(&joined);
        let var = packed.if_variable().expect("should pack to one variable");
        let desc = var.if_register().unwrap();
        assert_eq!(desc.bit_offset, 0);
        assert_eq!(desc.bit_count, 16);
    }

    #[test]
    fn pack_and_mask() {
        let reg = RegisterDesc::virt(7, 64);
        let full = Expr::variable(Variable::register(pos(0), reg));
        let masked = &full & &Expr::constant(0xff, 64);
        let packed = pack_all(&masked);
        match packed.kind() {
            ExprKind::Resize { val, signed: false } => {
                let desc = val.if_variable().unwrap().if_register().unwrap();
                assert_eq!(desc.bit_count, 8);
            }
            _ => panic!("expected zero-extended slice, got {}", packed),
        }
    }

    #[test]
    fn pack_rejects_mixed_registers() {
        let r0 = RegisterDesc::virt(0, 64);
        let r1 = RegisterDesc::virt(1, 64);
        let lo = Expr::variable(Variable::register(pos(0), r0.slice(0, 8)));
        let hi = Expr::variable(Variable::register(pos(0), r1.slice(8, 8)));
        let joined = &lo.zext(16) | &Expr::binary(BinaryOp::Shl, &hi.zext(16), &Expr::constant(8, 8));
        let packed = pack_all(&joined);
        assert!(packed.if_variable().is_none());
    }
}
