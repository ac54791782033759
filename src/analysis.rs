//! Symbolic analysis of a basic block: segmentation, preparation and
//! re-emission.
//!
//! [`SymbolicAnalysis::update`] symbolically executes the block, splitting
//! it into [`SymbolicSegment`]s wherever the memory model loses alias
//! precision, an instruction refuses symbolization, or control transfers.
//! [`prepare`](SymbolicAnalysis::prepare) simplifies the accumulated state
//! and recovers conditional branches hidden inside jump target expressions.
//! [`reemit`](SymbolicAnalysis::reemit) replaces the block with an
//! equivalent, typically shorter, instruction sequence rebuilt from the
//! segment states.

use std::io;
use std::ops::ControlFlow;

use fxhash::FxHashMap;
use log::{debug, trace};
use smallvec::{smallvec, SmallVec};

use crate::bit_misc::{fill, set_bit_ranges};
use crate::block::{BasicBlock, Pos};
use crate::expr::{Approximation, Expr};
use crate::isa::{ins, Instruction, Operand, RegWeakId, RegisterDesc, REG_SP};
use crate::pointer::SymPointer;
use crate::state::{MemoryState, RegisterState};
use crate::translator::BatchTranslator;
use crate::variable::{pack_all, Variable};
use crate::vm::{default_execute, ExitReason, Vm};

/// Analysis attached to a container it is derived from: exclusive access is
/// required to refresh it, and mutation of the container invalidates it
/// until the next [`update`](Self::update).
pub trait SynchronizedContext<T: ?Sized> {
    fn update(&mut self, target: &T);
    fn mark_dirty(&mut self);
    fn is_dirty(&self) -> bool;
}

/// One symbolic VM run over a contiguous instruction range.
pub struct SymbolicSegment {
    /// Why the run stopped.
    pub exit_reason: ExitReason,
    pub begin: Pos,
    /// One past the last covered instruction, suffix included.
    pub end: Pos,
    /// Instructions that could not be symbolized and must be re-appended
    /// verbatim after the segment's reconstructed effect.
    pub suffix: Vec<Pos>,

    // Branch details; populated on the last segment only.
    pub is_branch_real: bool,
    pub is_branch_exiting: bool,
    pub branch_cc: Option<Expr>,
    pub branch_targets: SmallVec<[Expr; 2]>,

    // State of the virtual machine.
    is_executing: bool,
    pub register_state: RegisterState,
    pub memory_state: MemoryState,

    /// For every register / pointer read during execution, the bits whose
    /// value depended on the initial state at `begin`.
    pub register_references: FxHashMap<RegWeakId, u64>,
    pub memory_references: FxHashMap<SymPointer, u64>,
}

impl SymbolicSegment {
    fn new(begin: Pos) -> SymbolicSegment {
        SymbolicSegment {
            exit_reason: ExitReason::None,
            begin,
            end: begin,
            suffix: Vec::new(),
            is_branch_real: false,
            is_branch_exiting: false,
            branch_cc: None,
            branch_targets: SmallVec::new(),
            is_executing: false,
            register_state: RegisterState::default(),
            memory_state: MemoryState::default(),
            register_references: FxHashMap::default(),
            memory_references: FxHashMap::default(),
        }
    }

    /// Pure read of the register state at `begin`, without reference
    /// tracking; used by re-emission and diagnostics.
    pub fn register_value(&self, desc: &RegisterDesc) -> Expr {
        let mut known = 0;
        self.register_state.read(desc, self.begin, &mut known)
    }

    /// Branch operand as a symbolic value. A stack-pointer operand gets the
    /// instruction's pending `sp_offset` added, since that delta has not
    /// been folded into `$sp` itself.
    fn branch_operand(&mut self, ins: &Instruction, idx: usize) -> Expr {
        match ins.operands[idx] {
            Operand::Reg(r) => {
                let value = self.read_register(&r);
                if r.is_stack_pointer() {
                    &value + &Expr::constant(ins.sp_offset, 64)
                } else {
                    value
                }
            }
            Operand::Imm(imm) => Expr::constant(imm.as_i64(), imm.bit_count),
        }
    }

    fn execute_inner(&mut self, ins: &Instruction) -> ExitReason {
        // Branching dispatch.
        if ins.base.branching {
            if ins.is(&ins::VEXIT) || ins.is(&ins::VXCALL) {
                let target = self.branch_operand(ins, 0);
                self.branch_targets.push(target);
                self.is_branch_real = true;
                self.is_branch_exiting = ins.is(&ins::VEXIT);
                self.branch_cc = None;
                return ExitReason::StreamEnd;
            }
            if ins.is(&ins::JMP) {
                let target = self.branch_operand(ins, 0);
                self.branch_targets.push(target);
                self.is_branch_real = false;
                self.branch_cc = None;
                return ExitReason::StreamEnd;
            }
            if ins.is(&ins::JS) {
                let cc = self.branch_operand(ins, 0);
                let t = self.branch_operand(ins, 1);
                let f = self.branch_operand(ins, 2);
                self.branch_targets.push(t);
                self.branch_targets.push(f);
                self.is_branch_real = false;
                self.branch_cc = Some(cc.resize(1, false));
                return ExitReason::StreamEnd;
            }
            unreachable!("unhandled branching opcode {}", ins.base.name);
        }

        // Volatile instructions halt symbolization.
        if ins.is_volatile() {
            return ExitReason::UnknownInstruction;
        }

        // As do accesses to volatile registers, excluding ?UD.
        for op in &ins.operands {
            if let Operand::Reg(r) = op {
                if r.is_volatile() && !r.is_undefined() {
                    return ExitReason::UnknownInstruction;
                }
            }
        }

        default_execute(self, ins)
    }
}

impl Vm for SymbolicSegment {
    fn read_register(&mut self, desc: &RegisterDesc) -> Expr {
        let mut known = 0;
        let read = desc.mask();
        let result = self.register_state.read(desc, self.begin, &mut known);

        // While executing, unresolved bits are references to the segment's
        // initial state.
        if self.is_executing && read & !known != 0 {
            *self.register_references.entry(desc.weak()).or_insert(0) |= read & !known;
        }
        result
    }

    fn read_memory(&mut self, pointer: &Expr, byte_count: u8) -> Expr {
        let size = byte_count * 8;
        let spointer = SymPointer::new(pointer.clone());
        let mut known = 0;
        let read = fill(size);
        let result = self.memory_state.read(&spointer, size, self.begin, &mut known);

        if self.is_executing && read & !known != 0 {
            *self.memory_references.entry(spointer).or_insert(0) |= read & !known;
        }
        result
    }

    fn write_register(&mut self, desc: &RegisterDesc, value: Expr) {
        // Defer simplification of intermediate values to `prepare`.
        self.register_state.write(desc, value.make_lazy());
    }

    fn write_memory(&mut self, pointer: &Expr, value: Expr, bit_count: u8) -> bool {
        self.memory_state
            .write(&SymPointer::new(pointer.clone()), value.make_lazy(), bit_count)
            .is_some()
    }

    fn execute(&mut self, ins: &Instruction) -> ExitReason {
        self.is_executing = true;
        let result = self.execute_inner(ins);
        self.is_executing = false;
        result
    }
}

/// The symbolic analysis of one basic block: an ordered list of segments,
/// ideally just one when alias analysis never fails.
#[derive(Default)]
pub struct SymbolicAnalysis {
    segments: Vec<SymbolicSegment>,
    dirty: bool,
}

impl SymbolicAnalysis {
    pub fn of(block: &BasicBlock) -> SymbolicAnalysis {
        let mut analysis = SymbolicAnalysis::default();
        analysis.update(block);
        analysis
    }

    pub fn segments(&self) -> &[SymbolicSegment] {
        &self.segments
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SymbolicSegment> {
        self.segments.iter()
    }

    pub fn size(&self) -> usize {
        self.segments.len()
    }

    /// Pre-simplifies all stored expressions and recovers conditional
    /// branches hidden inside jump target expressions.
    pub fn prepare(&mut self, pack: bool) {
        for seg in &mut self.segments {
            for (_, value) in seg.register_state.entries_mut() {
                for (_, e) in value.slots_mut() {
                    *e = e.simplify(pack);
                }
            }
            for v in seg.memory_state.values_mut() {
                *v = v.simplify(pack);
            }

            if !seg.branch_targets.is_empty() {
                for t in seg.branch_targets.iter_mut() {
                    *t = t.simplify(true);
                }
                if let Some(cc) = seg.branch_cc.as_mut() {
                    *cc = cc.simplify(true);
                }

                // Non-constant jmp: try converting into js.
                if seg.branch_cc.is_none() && seg.branch_targets[0].depth() > 2 {
                    recover_conditional(seg);
                }
            }
        }
    }

    /// Emits equivalent code into the given block, segment by segment:
    /// register writebacks, then memory writebacks, stack-pointer
    /// reconciliation, the verbatim suffix, and finally the branch.
    pub fn reemit(&mut self, block: &mut BasicBlock) {
        let mut temporary_block = block.derive_temporary();

        let mut instruction_buffer: Vec<Instruction> = Vec::new();
        for seg in &self.segments {
            // Registers the writebacks will clobber; the translator pins
            // their initial values when they appear as plain operands.
            let clobbered = seg
                .register_state
                .entries()
                .filter(|(_, value)| value.bitmap() != 0)
                .map(|(key, _)| key)
                .collect();
            let mut translator = BatchTranslator::with_clobbered(seg.begin, clobbered);
            instruction_buffer.clear();

            // Register writebacks, skipping $sp.
            for (key, value) in seg.register_state.entries() {
                if value.bitmap() == 0 || key.is_stack_pointer() {
                    continue;
                }
                let bitmap = value.bitmap();
                let low = bitmap.trailing_zeros() as u8;
                let high = 63 - bitmap.leading_zeros() as u8;
                let desc = key.full().slice(low, high + 1 - low);

                // Sparsely modified flags register: per-bit writeback.
                if key.is_flags()
                    && bitmap.count_ones() <= 4
                    && value.slots().all(|(_, e)| e.bit_count() == 1)
                {
                    for (offset, e) in value.slots() {
                        let v = pack_all(e);
                        let bit = key.full().slice(offset, 1);
                        let src = translator.translate(&mut temporary_block, &v);
                        instruction_buffer
                            .push(Instruction::new(&ins::MOV, [Operand::Reg(bit), src]));
                    }
                    continue;
                }

                assert!(
                    !desc.is_stack_pointer() && !desc.is_read_only(),
                    "invalid writeback target {}",
                    desc,
                );

                // Full modified slice; the read joins partial writes with
                // initial-state bits.
                let v = pack_all(&seg.register_value(&desc).simplify(true));
                let src = translator.translate(&mut temporary_block, &v);
                instruction_buffer.push(Instruction::new(&ins::MOV, [Operand::Reg(desc), src]));
            }

            // Memory writebacks.
            let sp_origin = SymPointer::new(Expr::variable(Variable::register(seg.begin, REG_SP)));
            for (key, value) in seg.memory_state.iter() {
                let v = pack_all(value);

                // $sp-relative stores keep $sp as the base.
                if let Some(displacement) = key.sub(&sp_origin) {
                    let src = translator.translate(&mut temporary_block, &v);
                    instruction_buffer.push(Instruction::new(
                        &ins::STR,
                        [Operand::Reg(REG_SP), Operand::imm(displacement, 64), src],
                    ));
                    continue;
                }

                // Otherwise split a constant offset off the base expression.
                let mut exp = pack_all(key.base());
                let mut offset = 0i64;
                if exp.if_constant().is_none() {
                    if let Some((base, off)) = exp.if_base_offset() {
                        exp = base;
                        offset = off;
                    }
                }
                let base = translator.translate(&mut temporary_block, &exp);
                let base = match base {
                    Operand::Imm(imm) => {
                        let tmp = temporary_block.tmp(imm.bit_count);
                        instruction_buffer
                            .push(Instruction::new(&ins::MOV, [Operand::Reg(tmp), base]));
                        Operand::Reg(tmp)
                    }
                    reg => reg,
                };
                let src = translator.translate(&mut temporary_block, &v);
                instruction_buffer.push(Instruction::new(
                    &ins::STR,
                    [base, Operand::imm(offset, 64), src],
                ));
            }

            // Branch requirements are translated up front, before the
            // writebacks clobber the registers the targets read.
            let mut branch_cc: Option<Operand> = None;
            let mut branch_targets: SmallVec<[Operand; 2]> = SmallVec::new();
            if !seg.branch_targets.is_empty() {
                for target in &seg.branch_targets {
                    let op = translator.translate(&mut temporary_block, &pack_all(target));
                    branch_targets.push(op);
                }
                if let Some(cc) = &seg.branch_cc {
                    branch_cc = Some(translator.translate(&mut temporary_block, &pack_all(cc)));
                }
            }

            // Flush the buffered writebacks.
            for buffered in instruction_buffer.drain(..) {
                temporary_block.emplace_back(buffered);
            }

            // Stack-pointer reconciliation: a constant delta becomes pure
            // bookkeeping, anything else materializes into $sp.
            let mut sp_offset_d = 0i64;
            let sp_written = seg
                .register_state
                .get(REG_SP.weak())
                .map(|v| v.bitmap() != 0)
                .unwrap_or(false);
            if sp_written {
                let new_sp = seg.register_value(&REG_SP);
                let initial_sp = Expr::variable(Variable::register(seg.begin, REG_SP));
                match (&new_sp - &initial_sp).simplify(false).if_constant_i64() {
                    Some(delta) => {
                        temporary_block.shift_sp(delta);
                        sp_offset_d = delta;
                    }
                    None => {
                        let v = pack_all(&new_sp);
                        let src = translator.translate(&mut temporary_block, &v);
                        temporary_block
                            .emplace_back(Instruction::new(&ins::MOV, [Operand::Reg(REG_SP), src]));
                    }
                }
            }

            // Suffix: cloned verbatim, rebased onto this block's stack
            // bookkeeping.
            if !seg.suffix.is_empty() {
                let first = block.ins(seg.suffix[0].index);
                let sp_index_d = i64::from(temporary_block.sp_index) - i64::from(first.sp_index);
                for pos in &seg.suffix {
                    let mut suffix_ins = block.ins(pos.index).clone();
                    suffix_ins.sp_index = (i64::from(suffix_ins.sp_index) + sp_index_d) as u32;
                    suffix_ins.sp_offset += sp_offset_d;
                    if suffix_ins.base.reads_memory {
                        if let Some((base, disp)) = suffix_ins.memory_location() {
                            if base.is_stack_pointer() {
                                suffix_ins.set_memory_displacement(disp + sp_offset_d);
                            }
                        }
                    }
                    let (sp_index, sp_offset) = (suffix_ins.sp_index, suffix_ins.sp_offset);
                    temporary_block.np_emplace_back(suffix_ins);
                    temporary_block.sp_index = sp_index;
                    temporary_block.sp_offset = sp_offset;
                }
            }

            // The re-emitted stream continues at the stack state the source
            // had at the end of this segment.
            debug_assert!(seg.end.index > seg.begin.index);
            temporary_block.sp_offset = block.ins(seg.end.index - 1).sp_offset + sp_offset_d;

            // Branch emission.
            if !branch_targets.is_empty() {
                if seg.is_branch_real {
                    assert!(branch_cc.is_none() && branch_targets.len() == 1);
                    if seg.is_branch_exiting {
                        temporary_block.vexit(branch_targets[0]);
                    } else {
                        temporary_block.vxcall(branch_targets[0]);
                    }
                } else if let Some(cc) = branch_cc {
                    assert!(branch_targets.len() == 2);
                    match cc {
                        Operand::Reg(..) => {
                            temporary_block.js(cc, branch_targets[0], branch_targets[1]);
                        }
                        Operand::Imm(imm) => {
                            // A constant condition picks the taken target.
                            let target = if imm.value != 0 {
                                branch_targets[0]
                            } else {
                                branch_targets[1]
                            };
                            temporary_block.jmp(target);
                        }
                    }
                } else {
                    assert!(branch_targets.len() == 1);
                    temporary_block.jmp(branch_targets[0]);
                }

                // End-of-block stack state tracks the source block.
                temporary_block.sp_offset = block.sp_offset + sp_offset_d;
            }
        }

        // Replacing the origin block invalidates every variable anchored
        // into it.
        if self
            .segments
            .first()
            .map(|seg| seg.begin.vip == block.entry_vip)
            .unwrap_or(false)
        {
            self.mark_dirty();
        }

        trace!(
            "reemit {}: {} instructions from {} segments",
            block.entry_vip,
            temporary_block.len(),
            self.segments.len(),
        );
        block.assign(temporary_block);
    }

    /// Human-readable diagnostic dump of the current segment states.
    pub fn dump<W: io::Write>(&self, block: &BasicBlock, out: &mut W) -> io::Result<()> {
        for (i, seg) in self.segments.iter().enumerate() {
            writeln!(out, "[{} - {})", seg.begin.index, seg.end.index)?;
            writeln!(out, "- # Memory Ops:   {}", seg.memory_state.size())?;
            writeln!(out, "- # Register Ops: {}", seg.register_state.size())?;
            writeln!(out, "- Stack pointer:  {}", seg.register_value(&REG_SP))?;
            for (ptr, value) in seg.memory_state.iter() {
                writeln!(out, "{} => {}", ptr, value)?;
            }
            write!(out, "Ref: MEM =")?;
            for (ptr, mask) in &seg.memory_references {
                write!(out, " {}:", ptr)?;
                for range in set_bit_ranges(*mask) {
                    write!(out, "[{}..{})", range.start, range.end)?;
                }
            }
            writeln!(out)?;
            write!(out, "     REG =")?;
            for (key, mask) in &seg.register_references {
                write!(out, " {}:", key.full())?;
                for range in set_bit_ranges(*mask) {
                    write!(out, "[{}..{})", range.start, range.end)?;
                }
            }
            writeln!(out)?;

            match seg.exit_reason {
                ExitReason::StreamEnd | ExitReason::None => {
                    writeln!(out, "Exit due to stream end")?;
                    if !seg.branch_targets.is_empty() {
                        if seg.is_branch_real {
                            if block.next.is_empty() {
                                write!(out, "Real Exit     ")?;
                            } else {
                                write!(out, "Real Call     ")?;
                            }
                        } else {
                            write!(out, "Virtual Branch")?;
                        }
                        write!(out, " => ")?;
                        if let Some(cc) = &seg.branch_cc {
                            writeln!(
                                out,
                                "{} ? {} : {}",
                                cc, seg.branch_targets[0], seg.branch_targets[1],
                            )?;
                        } else {
                            writeln!(out, "{}", seg.branch_targets[0])?;
                        }
                    }
                }
                ExitReason::AliasFailure => {
                    let next_begin = self.segments.get(i + 1).map(|s| s.begin.index);
                    match next_begin {
                        Some(index) => writeln!(
                            out,
                            "Exit due to alias analysis failure @ \"{}\"",
                            block.ins(index),
                        )?,
                        None => writeln!(out, "Exit due to alias analysis failure")?,
                    }
                }
                ExitReason::HighArithmetic => {
                    writeln!(out, "Exit due to high arithmetic:")?;
                }
                ExitReason::UnknownInstruction => {
                    writeln!(out, "Exit due to non-symbolic instruction:")?;
                }
            }
            for pos in &seg.suffix {
                writeln!(out, " + {}", block.ins(pos.index))?;
            }
        }
        Ok(())
    }
}

impl SynchronizedContext<BasicBlock> for SymbolicAnalysis {
    /// Re-partitions the block into segments, one symbolic VM run each.
    fn update(&mut self, block: &BasicBlock) {
        self.segments.clear();
        self.dirty = false;

        let mut index = 0u32;
        while (index as usize) < block.len() {
            // Create a new segment and run the VM.
            let mut seg = SymbolicSegment::new(block.pos(index));
            let (stop, reason) = seg.run(block, index);
            seg.exit_reason = reason;
            seg.end = block.pos(stop);
            index = stop;
            self.segments.push(seg);

            match reason {
                ExitReason::StreamEnd => break,
                // Natural end of stream without a branch.
                ExitReason::None => break,
                // Alias failure does not consume the instruction; the next
                // segment restarts there with an empty memory state.
                ExitReason::AliasFailure => {
                    trace!("segment split at {}: {}", index, reason);
                }
                ExitReason::HighArithmetic | ExitReason::UnknownInstruction => {
                    trace!("segment split at {}: {}", index, reason);
                    // A run of opaque instructions should not become a run
                    // of zero-effect segments; fold into the previous one.
                    // The first segment always stays.
                    let fold = {
                        let seg = self.segments.last().expect("just pushed");
                        seg.memory_state.is_empty()
                            && seg.register_state.is_empty()
                            && self.segments.len() > 1
                    };
                    if fold {
                        self.segments.pop();
                    }
                    let host = self.segments.last_mut().expect("first segment stays");
                    host.suffix.push(block.pos(index));
                    index += 1;
                    host.end = block.pos(index);
                }
            }
        }
        debug!(
            "analysis of {}: {} segments over {} instructions",
            block.entry_vip,
            self.segments.len(),
            block.len(),
        );
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }
}

/// Attempts to synthesize a conditional branch from an unconditional one
/// whose target expression embeds a 1-bit condition: substituting both
/// polarities of a candidate condition must simplify the target, and the
/// two residues become the taken/not-taken targets.
fn recover_conditional(seg: &mut SymbolicSegment) {
    let statement = seg.branch_targets[0].clone();
    let hash_unchanged = statement.hash();
    let mut found: Option<(Expr, Expr, Expr)> = None;
    let _ = scan_tree(&statement, &statement, hash_unchanged, &mut found);
    if let Some((cc, cnd_sat, cnd_nsat)) = found {
        debug!("recovered conditional: {} ? {} : {}", cc, cnd_sat, cnd_nsat);
        seg.branch_cc = Some(cc);
        seg.branch_targets = smallvec![cnd_sat, cnd_nsat];
    }
}

/// Pre-order scan for condition candidates, descending into the backing
/// pointers of memory variables; stops at the first commit.
fn scan_tree(
    tree: &Expr,
    statement: &Expr,
    hash_unchanged: u64,
    found: &mut Option<(Expr, Expr, Expr)>,
) -> ControlFlow<()> {
    tree.enumerate(&mut |ccexp| {
        if found.is_some() {
            return ControlFlow::Break(());
        }
        if let Some(var) = ccexp.if_variable() {
            if let Some(ptr) = var.if_memory() {
                scan_tree(ptr, statement, hash_unchanged, found)?;
                if found.is_some() {
                    return ControlFlow::Break(());
                }
            }
        }
        // Any sub-expression whose value fits in one bit is a candidate.
        if ccexp.value_mask() == 1 {
            try_candidate(ccexp, statement, hash_unchanged, found);
            if found.is_some() {
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    })
}

fn try_candidate(
    cc: &Expr,
    statement: &Expr,
    hash_unchanged: u64,
    found: &mut Option<(Expr, Expr, Expr)>,
) {
    let exp_approx = cc.approximate();
    let inv_cc = !cc;
    let inv_approx = exp_approx.flip_lsb();
    let rewrite = CcRewrite {
        cc,
        inv_cc: &inv_cc,
        exp_approx,
        inv_approx,
    };

    // One statement assuming cc, one assuming its inverse.
    let cnd_sat = rewrite.rewrite(statement, true);
    let cnd_nsat = rewrite.rewrite(statement, false);

    // Only commit if the substitution simplified both directions.
    if cnd_sat.hash() != hash_unchanged && cnd_nsat.hash() != hash_unchanged {
        *found = Some((
            cc.resize(1, false),
            cnd_sat.simplify(true),
            cnd_nsat.simplify(true),
        ));
    }
}

struct CcRewrite<'a> {
    cc: &'a Expr,
    inv_cc: &'a Expr,
    exp_approx: Approximation,
    inv_approx: Approximation,
}

impl CcRewrite<'_> {
    fn rewrite(&self, tree: &Expr, expected: bool) -> Expr {
        tree.transform(&mut |node| self.visit(node, expected))
    }

    fn visit(&self, node: &Expr, expected: bool) -> Option<Expr> {
        // Memory variables embed the condition through their pointers;
        // rewrite the pointer and rebuild the variable identity if changed.
        if let Some(var) = node.if_variable() {
            if let Some(ptr) = var.if_memory() {
                let rewritten = self.rewrite(ptr, expected);
                if rewritten.hash() != ptr.hash() {
                    return Some(Expr::variable(Variable::memory(
                        var.at,
                        rewritten,
                        var.bit_count(),
                    )));
                }
                return None;
            }
        }
        if node.value_mask() == 1 {
            let approx = node.approximate();
            if approx == self.exp_approx {
                if node == self.cc {
                    return Some(Expr::constant(i64::from(expected), 1));
                }
            } else if approx == self.inv_approx && node == self.inv_cc {
                return Some(Expr::constant(i64::from(!expected), 1));
            }
        }
        None
    }
}
