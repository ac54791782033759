//! Symbolic register and memory state of one segment.
//!
//! Both stores share a contract: `write` records an expression for a
//! register slice / memory range, `read` joins whatever was recorded,
//! synthesizes an initial-state variable for unresolved bits, and reports
//! which requested bits resolved without that fallback.

use std::fmt;

use fxhash::FxHashMap;
use smallvec::SmallVec;

use crate::bit_misc::{bits_overlap, fill};
use crate::block::Pos;
use crate::expr::{BinaryOp, Expr};
use crate::isa::{RegWeakId, RegisterDesc};
use crate::pointer::SymPointer;
use crate::variable::Variable;

/// Linear bit store of one register: non-overlapping written slices, kept
/// sorted by offset, plus a bitmap of all defined bits.
#[derive(Debug, Clone, Default)]
pub struct PartialValue {
    bitmap: u64,
    slots: SmallVec<[(u8, Expr); 2]>,
}

impl PartialValue {
    pub fn bitmap(&self) -> u64 {
        self.bitmap
    }

    pub fn slots(&self) -> impl Iterator<Item = (u8, &Expr)> {
        self.slots.iter().map(|(off, e)| (*off, e))
    }

    pub fn slots_mut(&mut self) -> impl Iterator<Item = (u8, &mut Expr)> {
        self.slots.iter_mut().map(|(off, e)| (*off, e))
    }

    fn insert(&mut self, offset: u8, value: Expr) {
        self.bitmap |= fill(value.bit_count()) << offset;
        let at = self
            .slots
            .iter()
            .position(|&(off, _)| off > offset)
            .unwrap_or(self.slots.len());
        self.slots.insert(at, (offset, value));
    }

    /// Removes every slice overlapping `[offset, offset + count)`, keeping
    /// the non-overlapping residues as extracts of the old expressions.
    fn carve(&mut self, offset: u8, count: u8) {
        let lo = offset;
        let hi = offset + count;
        let old = std::mem::take(&mut self.slots);
        self.bitmap &= !(fill(count) << offset);
        for (s, e) in old {
            let w = e.bit_count();
            if !bits_overlap(&(s..s + w), &(lo..hi)) {
                self.slots.push((s, e));
                continue;
            }
            if s < lo {
                self.slots.push((s, e.extract(0, lo - s)));
            }
            if s + w > hi {
                self.slots.push((hi, e.extract(hi - s, s + w - hi)));
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RegisterState {
    value_map: FxHashMap<RegWeakId, PartialValue>,
}

impl RegisterState {
    /// Number of registers tracked.
    pub fn size(&self) -> usize {
        self.value_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value_map.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (RegWeakId, &PartialValue)> {
        self.value_map.iter().map(|(k, v)| (*k, v))
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = (RegWeakId, &mut PartialValue)> {
        self.value_map.iter_mut().map(|(k, v)| (*k, v))
    }

    pub fn get(&self, key: RegWeakId) -> Option<&PartialValue> {
        self.value_map.get(&key)
    }

    pub fn write(&mut self, desc: &RegisterDesc, value: Expr) {
        let value = value.resize(desc.bit_count, false);
        let entry = self.value_map.entry(desc.weak()).or_default();
        entry.carve(desc.bit_offset, desc.bit_count);
        entry.insert(desc.bit_offset, value);
    }

    /// Joined value of the requested slice. `known` receives the bits (in
    /// absolute register positions) that resolved from writes recorded here;
    /// the rest come from a register-at-`origin` variable.
    pub fn read(&self, desc: &RegisterDesc, origin: Pos, known: &mut u64) -> Expr {
        let off = desc.bit_offset;
        let cnt = desc.bit_count;
        let requested = desc.mask();
        let entry = match self.value_map.get(&desc.weak()) {
            Some(entry) if entry.bitmap & requested != 0 => entry,
            _ => {
                *known = 0;
                return Expr::variable(Variable::register(origin, *desc));
            }
        };
        *known = entry.bitmap & requested;

        // Exact single-slice hit needs no joining.
        if let Some((_, e)) = entry
            .slots
            .iter()
            .find(|&&(s, ref e)| s == off && e.bit_count() == cnt)
        {
            return e.clone();
        }

        let mut acc: Option<Expr> = None;
        for &(s, ref e) in entry.slots.iter() {
            let w = e.bit_count();
            if !bits_overlap(&(s..s + w), &(off..off + cnt)) {
                continue;
            }
            let lo = s.max(off);
            let hi = (s + w).min(off + cnt);
            let piece = e.extract(lo - s, hi - lo).zext(cnt);
            let placed = if lo == off {
                piece
            } else {
                Expr::binary(
                    BinaryOp::Shl,
                    &piece,
                    &Expr::constant(i64::from(lo - off), 8),
                )
            };
            acc = Some(match acc {
                Some(prev) => &prev | &placed,
                None => placed,
            });
        }
        let gaps = (requested & !entry.bitmap) >> off;
        if gaps != 0 {
            let var = Expr::variable(Variable::register(origin, *desc));
            let masked = &var & &Expr::constant_u64(gaps, cnt);
            acc = Some(match acc {
                Some(prev) => &prev | &masked,
                None => masked,
            });
        }
        // bitmap overlapped the request, so at least one piece accumulated.
        acc.expect("non-empty join")
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    entries: Vec<(SymPointer, Expr)>,
}

impl MemoryState {
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SymPointer, &Expr)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut Expr> {
        self.entries.iter_mut().map(|(_, v)| v)
    }

    /// Records `value` at `[ptr, ptr + bit_count/8)`. Entries at a provable
    /// displacement are trimmed or shadowed; an entry whose displacement is
    /// unknown but which may overlap makes the write fail.
    pub fn write(&mut self, ptr: &SymPointer, value: Expr, bit_count: u8) -> Option<()> {
        debug_assert_eq!(bit_count % 8, 0);
        let value = value.resize(bit_count, false);
        let nb = i64::from(bit_count / 8);
        let mut kept = Vec::with_capacity(self.entries.len() + 1);
        let old = std::mem::take(&mut self.entries);
        for (eptr, eval) in old.into_iter() {
            let eb = i64::from(eval.bit_count() / 8);
            match eptr.sub(ptr) {
                Some(d) => {
                    // Entry spans [d, d + eb) relative to the new write.
                    if d + eb <= 0 || d >= nb {
                        kept.push((eptr, eval));
                        continue;
                    }
                    if d < 0 {
                        let keep = (-d) as u8;
                        kept.push((eptr.clone(), eval.extract(0, keep * 8)));
                    }
                    if d + eb > nb {
                        let from = (nb - d) as u8;
                        let keep = (d + eb - nb) as u8;
                        kept.push((
                            eptr.offset_by(nb - d),
                            eval.extract(from * 8, keep * 8),
                        ));
                    }
                }
                None => {
                    if eptr.can_overlap(ptr) {
                        // Ambiguous aliasing; restore and give up.
                        kept.push((eptr, eval));
                        self.entries = kept;
                        return None;
                    }
                    kept.push((eptr, eval));
                }
            }
        }
        kept.push((ptr.clone(), value));
        self.entries = kept;
        Some(())
    }

    /// Joined value of `[ptr, ptr + bit_count/8)`. `known` receives the bits
    /// that resolved from recorded writes; unresolved bytes come from a
    /// memory-at-`origin` variable. Entries at an unknown displacement are
    /// assumed disjoint (ambiguous writes never make it into the store).
    pub fn read(&self, ptr: &SymPointer, bit_count: u8, origin: Pos, known: &mut u64) -> Expr {
        debug_assert_eq!(bit_count % 8, 0);
        let nb = (bit_count / 8) as usize;
        // Latest write to each byte wins.
        let mut owner: SmallVec<[Option<(usize, u8)>; 8]> = SmallVec::from_elem(None, nb);
        for (idx, (eptr, eval)) in self.entries.iter().enumerate().rev() {
            let eb = i64::from(eval.bit_count() / 8);
            let d = match eptr.sub(ptr) {
                Some(d) => d,
                None => continue,
            };
            if d + eb <= 0 || d >= nb as i64 {
                continue;
            }
            for rel in 0..nb as i64 {
                if rel >= d && rel < d + eb && owner[rel as usize].is_none() {
                    owner[rel as usize] = Some((idx, (rel - d) as u8));
                }
            }
        }

        let mut acc: Option<Expr> = None;
        let mut covered = 0u64;
        let mut byte = 0usize;
        while byte < nb {
            let (idx, entry_off) = match owner[byte] {
                Some(o) => o,
                None => {
                    byte += 1;
                    continue;
                }
            };
            // Coalesce the run of bytes owned contiguously by this entry.
            let mut len = 1usize;
            while byte + len < nb {
                match owner[byte + len] {
                    Some((i, o)) if i == idx && o == entry_off + len as u8 => len += 1,
                    _ => break,
                }
            }
            let piece = self.entries[idx]
                .1
                .extract(entry_off * 8, (len * 8) as u8)
                .zext(bit_count);
            let placed = if byte == 0 {
                piece
            } else {
                Expr::binary(
                    BinaryOp::Shl,
                    &piece,
                    &Expr::constant((byte * 8) as i64, 8),
                )
            };
            covered |= fill((len * 8) as u8) << (byte * 8);
            acc = Some(match acc {
                Some(prev) => &prev | &placed,
                None => placed,
            });
            byte += len;
        }

        *known = covered;
        let mask = fill(bit_count);
        if covered == mask {
            return acc.expect("fully covered join");
        }
        let var = Expr::variable(Variable::memory(origin, ptr.base().clone(), bit_count));
        if covered == 0 {
            return var;
        }
        let masked = &var & &Expr::constant_u64(mask & !covered, bit_count);
        match acc {
            Some(prev) => &prev | &masked,
            None => masked,
        }
    }
}

impl fmt::Display for MemoryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (ptr, value) in self.iter() {
            writeln!(f, "{} => {}", ptr, value)?;
        }
        Ok(())
    }
}
