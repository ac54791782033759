//! The deep rewrite passes behind [`Expr::simplify`].
//!
//! Construction already folds cheap local identities; this module does the
//! work that needs chain-level context: add/sub and bitwise chain
//! normalization with term cancellation, redundant-mask removal, shift
//! merging and 1-bit comparison collapses.

use smallvec::SmallVec;

use crate::bit_misc::fill;
use crate::variable::pack_all;

use super::{BinaryOp, Expr, ExprKind, UnaryOp};

// Fixpoint guard; real expressions settle in two or three rounds.
const MAX_ROUNDS: usize = 8;

pub(super) fn run(expr: &Expr, pack: bool) -> Expr {
    let mut current = simplify_rec(expr);
    if pack {
        let packed = pack_all(&current);
        if packed.hash() != current.hash() {
            current = simplify_rec(&packed);
        }
    }
    current
}

fn simplify_rec(expr: &Expr) -> Expr {
    let mut current = rebuild_children(expr);
    for _ in 0..MAX_ROUNDS {
        let next = apply_rules(&current);
        if next.hash() == current.hash() {
            break;
        }
        current = rebuild_children(&next);
    }
    current
}

fn rebuild_children(expr: &Expr) -> Expr {
    match expr.kind() {
        ExprKind::Const(..) | ExprKind::Var(..) => expr.clone(),
        ExprKind::Unary { op, val } => {
            let val2 = simplify_rec(val);
            if val2.hash() == val.hash() {
                expr.clone()
            } else {
                Expr::unary(*op, &val2)
            }
        }
        ExprKind::Binary { op, left, right } => {
            let left2 = simplify_rec(left);
            let right2 = simplify_rec(right);
            if left2.hash() == left.hash() && right2.hash() == right.hash() {
                expr.clone()
            } else {
                Expr::binary(*op, &left2, &right2)
            }
        }
        ExprKind::Resize { val, signed } => {
            let val2 = simplify_rec(val);
            if val2.hash() == val.hash() {
                expr.clone()
            } else {
                val2.resize(expr.bit_count(), *signed)
            }
        }
    }
}

fn apply_rules(expr: &Expr) -> Expr {
    // Fully determined values collapse to constants.
    let bits = expr.known_bits();
    if bits.unknown == 0 && expr.if_constant().is_none() {
        return Expr::constant_u64(bits.known_one, expr.bit_count());
    }

    if let ExprKind::Binary { op, left, right } = expr.kind() {
        match op {
            BinaryOp::Add | BinaryOp::Sub => {
                if let Some(out) = normalize_additive(expr) {
                    return out;
                }
            }
            BinaryOp::Xor | BinaryOp::Or | BinaryOp::And => {
                if let Some(out) = normalize_bitwise(expr, *op) {
                    return out;
                }
            }
            BinaryOp::Shl | BinaryOp::Shr => {
                // (x << a) << b merges; overshifts die.
                if let (Some(b), ExprKind::Binary { op: inner, left: x, right: a }) =
                    (right.if_constant(), left.kind())
                {
                    if inner == op {
                        if let Some(a) = a.if_constant() {
                            let total = a.saturating_add(b);
                            if total >= u64::from(expr.bit_count()) {
                                return Expr::constant_u64(0, expr.bit_count());
                            }
                            return Expr::binary(
                                *op,
                                x,
                                &Expr::constant_u64(total, right.bit_count()),
                            );
                        }
                    }
                }
            }
            BinaryOp::Eq => {
                if let Some(c) = right.if_constant() {
                    if left.value_mask() == 1 {
                        if c == 1 {
                            return left.resize(1, false);
                        }
                        if c == 0 {
                            // The canonical inverse of a condition.
                            return Expr::unary(UnaryOp::Not, &left.resize(1, false));
                        }
                    }
                }
            }
            BinaryOp::Ne => {
                if right.if_constant() == Some(0) && left.value_mask() == 1 {
                    return left.resize(1, false);
                }
            }
            _ => (),
        }

        // A constant mask that cannot clear any possibly-set bit is
        // redundant.
        if *op == BinaryOp::And {
            if let Some(m) = right.if_constant() {
                if left.value_mask() & !m == 0 {
                    return left.clone();
                }
            }
        }
    }
    expr.clone()
}

/// One signed term of an add/sub chain.
struct Term {
    value: Expr,
    negative: bool,
}

fn collect_additive(expr: &Expr, negative: bool, terms: &mut SmallVec<[Term; 8]>, constant: &mut u64) {
    match expr.kind() {
        ExprKind::Const(c) => {
            let c = if negative { c.wrapping_neg() } else { *c };
            *constant = constant.wrapping_add(c);
        }
        ExprKind::Binary { op: BinaryOp::Add, left, right } => {
            collect_additive(left, negative, terms, constant);
            collect_additive(right, negative, terms, constant);
        }
        ExprKind::Binary { op: BinaryOp::Sub, left, right } => {
            collect_additive(left, negative, terms, constant);
            collect_additive(right, !negative, terms, constant);
        }
        ExprKind::Unary { op: UnaryOp::Neg, val } => {
            collect_additive(val, !negative, terms, constant);
        }
        _ => terms.push(Term {
            value: expr.clone(),
            negative,
        }),
    }
}

/// Flattens an add/sub chain, cancels equal terms of opposite sign, folds
/// constants, and rebuilds left-leaning with the constant outermost.
fn normalize_additive(expr: &Expr) -> Option<Expr> {
    let width = expr.bit_count();
    let mask = fill(width);
    let mut terms: SmallVec<[Term; 8]> = SmallVec::new();
    let mut constant = 0u64;
    collect_additive(expr, false, &mut terms, &mut constant);

    // Cancel pairs. Quadratic, but chains are short.
    let mut i = 0;
    while i < terms.len() {
        let mut cancelled = false;
        for j in i + 1..terms.len() {
            if terms[j].negative != terms[i].negative && terms[j].value == terms[i].value {
                terms.remove(j);
                terms.remove(i);
                cancelled = true;
                break;
            }
        }
        if !cancelled {
            i += 1;
        }
    }
    constant &= mask;

    let mut acc: Option<Expr> = None;
    for term in &terms {
        acc = Some(match (acc, term.negative) {
            (None, false) => term.value.clone(),
            (None, true) => Expr::unary(UnaryOp::Neg, &term.value),
            (Some(prev), false) => &prev + &term.value,
            (Some(prev), true) => &prev - &term.value,
        });
    }
    let out = match acc {
        None => Expr::constant_u64(constant, width),
        Some(acc) if constant != 0 => &acc + &Expr::constant_u64(constant, width),
        Some(acc) => acc,
    };
    if out.hash() == expr.hash() {
        None
    } else {
        Some(out)
    }
}

fn collect_bitwise(expr: &Expr, op: BinaryOp, terms: &mut SmallVec<[Expr; 8]>, constant: &mut Option<u64>) {
    match expr.kind() {
        ExprKind::Const(c) => {
            *constant = Some(match (op, *constant) {
                (_, None) => *c,
                (BinaryOp::Xor, Some(prev)) => prev ^ c,
                (BinaryOp::Or, Some(prev)) => prev | c,
                (BinaryOp::And, Some(prev)) => prev & c,
                _ => unreachable!(),
            });
        }
        ExprKind::Binary { op: inner, left, right } if *inner == op => {
            collect_bitwise(left, op, terms, constant);
            collect_bitwise(right, op, terms, constant);
        }
        _ => terms.push(expr.clone()),
    }
}

/// Flattens an and/or/xor chain; xor cancels duplicate pairs, and/or drop
/// duplicates entirely.
fn normalize_bitwise(expr: &Expr, op: BinaryOp) -> Option<Expr> {
    let width = expr.bit_count();
    let mut terms: SmallVec<[Expr; 8]> = SmallVec::new();
    let mut constant = None;
    collect_bitwise(expr, op, &mut terms, &mut constant);

    let mut i = 0;
    while i < terms.len() {
        let mut removed = false;
        for j in i + 1..terms.len() {
            if terms[j] == terms[i] {
                terms.remove(j);
                if op == BinaryOp::Xor {
                    terms.remove(i);
                }
                removed = true;
                break;
            }
        }
        if !removed {
            i += 1;
        }
    }

    let identity = match op {
        BinaryOp::Xor | BinaryOp::Or => 0,
        BinaryOp::And => fill(width),
        _ => unreachable!(),
    };
    let mut acc: Option<Expr> = None;
    for term in &terms {
        acc = Some(match acc {
            None => term.clone(),
            Some(prev) => Expr::binary(op, &prev, term),
        });
    }
    let out = match acc {
        None => Expr::constant_u64(constant.unwrap_or(identity), width),
        Some(acc) => match constant {
            Some(c) if c != identity => {
                Expr::binary(op, &acc, &Expr::constant_u64(c & fill(width), width))
            }
            _ => acc,
        },
    };
    if out.hash() == expr.hash() {
        None
    } else {
        Some(out)
    }
}
