//! Symbolic pointers and the displacement/aliasing decisions over them.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::ControlFlow;

use crate::expr::{Approximation, Expr, APPROX_SAMPLES};

/// Restricted base classes a pointer can be rooted in. Storage reached
/// through the stack pointer is assumed disjoint from storage reached
/// through arbitrary pointers.
const BASE_STACK: u64 = 1 << 0;

/// An expression in pointer position (byte-addressed, 64-bit) with cached
/// aliasing metadata: which restricted bases it depends on, and its
/// approximated values for probabilistic displacement checks.
#[derive(Debug, Clone)]
pub struct SymPointer {
    base: Expr,
    flags: u64,
    xpointer: Approximation,
}

impl SymPointer {
    pub fn new(base: Expr) -> SymPointer {
        let base = base.zext(64);
        let mut flags = 0;
        let _ = base.enumerate(&mut |e| {
            if let Some(var) = e.if_variable() {
                match var.if_register() {
                    Some(desc) if desc.is_stack_pointer() => flags |= BASE_STACK,
                    _ => {
                        if let Some(ptr) = var.if_memory() {
                            let _ = ptr.enumerate(&mut |inner| {
                                if let Some(v) = inner.if_variable() {
                                    if v.if_register().map(|d| d.is_stack_pointer()).unwrap_or(false) {
                                        flags |= BASE_STACK;
                                    }
                                }
                                ControlFlow::Continue(())
                            });
                        }
                    }
                }
            }
            ControlFlow::Continue(())
        });
        let xpointer = base.approximate();
        SymPointer {
            base,
            flags,
            xpointer,
        }
    }

    pub fn base(&self) -> &Expr {
        &self.base
    }

    /// Byte displacement `self - other`, when every approximation sample
    /// agrees on it. Agreement across all samples makes an accidental match
    /// vanishingly unlikely, so the consensus delta is taken as proven.
    pub fn sub(&self, other: &SymPointer) -> Option<i64> {
        if self.base == other.base {
            return Some(0);
        }
        let mut delta = None;
        for i in 0..APPROX_SAMPLES {
            let d = self.xpointer.values[i].wrapping_sub(other.xpointer.values[i]);
            match delta {
                None => delta = Some(d),
                Some(prev) if prev != d => return None,
                Some(_) => (),
            }
        }
        delta.map(|d| d as i64)
    }

    /// Whether the two pointers may refer to overlapping storage when their
    /// displacement is unknown. Pointers rooted in different restricted
    /// base sets cannot overlap.
    pub fn can_overlap(&self, other: &SymPointer) -> bool {
        self.flags == other.flags
    }

    pub fn offset_by(&self, bytes: i64) -> SymPointer {
        if bytes == 0 {
            return self.clone();
        }
        SymPointer::new(&self.base + &Expr::constant(bytes, 64))
    }
}

impl PartialEq for SymPointer {
    fn eq(&self, other: &SymPointer) -> bool {
        self.base == other.base
    }
}

impl Eq for SymPointer {}

impl Hash for SymPointer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.base.hash());
    }
}

impl fmt::Display for SymPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base)
    }
}
