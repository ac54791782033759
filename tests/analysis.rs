extern crate vtir;

use vtir::analysis::SynchronizedContext;
use vtir::expr::BinaryOp;
use vtir::isa::RegisterFlags;
use vtir::{
    ins, BasicBlock, Expr, ExitReason, Operand, RegisterDesc, SymbolicAnalysis, Vip, REG_SP,
};

fn rax() -> RegisterDesc {
    RegisterDesc::virt(0, 64)
}

fn rbx() -> RegisterDesc {
    RegisterDesc::virt(1, 64)
}

fn rcx() -> RegisterDesc {
    RegisterDesc::virt(2, 64)
}

fn rdx() -> RegisterDesc {
    RegisterDesc::virt(3, 64)
}

fn block() -> BasicBlock {
    BasicBlock::new(Vip(0x1000))
}

fn check_contiguity(analysis: &SymbolicAnalysis, block: &BasicBlock) {
    let segments = analysis.segments();
    assert!(!segments.is_empty());
    assert_eq!(segments[0].begin.index, 0);
    for pair in segments.windows(2) {
        assert_eq!(pair[0].end, pair[1].begin);
    }
    assert_eq!(segments.last().unwrap().end.index as usize, block.len());
}

#[test]
fn straight_line_single_segment() {
    // S1: mov rax, 1 ; add rax, 2 ; mov rbx, rax
    let mut b = block();
    b.push(&ins::MOV, [Operand::Reg(rax()), Operand::imm(1, 64)]);
    b.push(&ins::ADD, [Operand::Reg(rax()), Operand::imm(2, 64)]);
    b.push(&ins::MOV, [Operand::Reg(rbx()), Operand::Reg(rax())]);

    let mut analysis = SymbolicAnalysis::of(&b);
    check_contiguity(&analysis, &b);
    assert_eq!(analysis.size(), 1);

    let seg = &analysis.segments()[0];
    assert!(seg.suffix.is_empty());
    assert!(seg.branch_targets.is_empty());
    assert!(seg.memory_state.is_empty());
    assert_eq!(seg.register_value(&rax()).simplify(true).if_constant(), Some(3));
    assert_eq!(seg.register_value(&rbx()).simplify(true).if_constant(), Some(3));
    // Everything resolved from in-segment writes; no initial-state reads.
    assert!(seg.register_references.is_empty());

    analysis.prepare(true);
    analysis.reemit(&mut b);

    assert_eq!(b.len(), 2);
    for i in b.iter() {
        assert!(i.is(&ins::MOV));
        assert_eq!(i.operands[1], Operand::imm(3, 64));
    }
    let written: Vec<_> = b.iter().map(|i| i.operands[0]).collect();
    assert!(written.contains(&Operand::Reg(rax())));
    assert!(written.contains(&Operand::Reg(rbx())));
}

#[test]
fn alias_failure_splits_segments() {
    // S2: str rcx, 0, 1 ; str rdx, 0, 2 ; str rcx, 0, 3
    let mut b = block();
    b.push(&ins::STR, [Operand::Reg(rcx()), Operand::imm(0, 64), Operand::imm(1, 64)]);
    b.push(&ins::STR, [Operand::Reg(rdx()), Operand::imm(0, 64), Operand::imm(2, 64)]);
    b.push(&ins::STR, [Operand::Reg(rcx()), Operand::imm(0, 64), Operand::imm(3, 64)]);

    let analysis = SymbolicAnalysis::of(&b);
    check_contiguity(&analysis, &b);
    assert!(analysis.size() >= 2);
    // First split right at the second store.
    assert_eq!(analysis.segments()[0].end.index, 1);
    assert_eq!(analysis.segments()[0].exit_reason, ExitReason::AliasFailure);
    assert!(analysis.segments()[0].suffix.is_empty());
    // Every segment's writes were accepted.
    for seg in analysis.iter() {
        assert_eq!(seg.memory_state.size(), 1);
        assert!(seg.suffix.is_empty());
    }
}

#[test]
fn volatile_instruction_splits_with_suffix() {
    // S3: mov rax, 1 ; vpinr rbx ; mov rbx, 2
    let mut b = block();
    b.push(&ins::MOV, [Operand::Reg(rax()), Operand::imm(1, 64)]);
    b.push(&ins::VPINR, [Operand::Reg(rbx())]);
    b.push(&ins::MOV, [Operand::Reg(rbx()), Operand::imm(2, 64)]);

    let mut analysis = SymbolicAnalysis::of(&b);
    check_contiguity(&analysis, &b);
    assert_eq!(analysis.size(), 2);

    let seg0 = &analysis.segments()[0];
    assert_eq!(seg0.exit_reason, ExitReason::UnknownInstruction);
    assert_eq!(seg0.suffix.len(), 1);
    assert_eq!(seg0.suffix[0].index, 1);
    assert_eq!(seg0.end.index, 2);

    let seg1 = &analysis.segments()[1];
    assert_eq!(seg1.begin.index, 2);
    assert!(seg1.suffix.is_empty());

    analysis.prepare(true);
    analysis.reemit(&mut b);
    // mov rax, 1 ; vpinr rbx ; mov rbx, 2 — the suffix is preserved verbatim.
    assert_eq!(b.len(), 3);
    assert!(b.ins(1).is(&ins::VPINR));
}

#[test]
fn opaque_run_folds_into_previous_segment() {
    let mut b = block();
    b.push(&ins::MOV, [Operand::Reg(rax()), Operand::imm(1, 64)]);
    b.push(&ins::VPINR, [Operand::Reg(rbx())]);
    b.push(&ins::VPINR, [Operand::Reg(rcx())]);
    b.push(&ins::MOV, [Operand::Reg(rbx()), Operand::imm(2, 64)]);

    let analysis = SymbolicAnalysis::of(&b);
    check_contiguity(&analysis, &b);
    assert_eq!(analysis.size(), 2);
    let seg0 = &analysis.segments()[0];
    assert_eq!(seg0.suffix.len(), 2);
    assert_eq!(seg0.end.index, 3);
}

#[test]
fn volatile_first_instruction_keeps_first_segment() {
    let mut b = block();
    b.push(&ins::VPINR, [Operand::Reg(rax())]);
    b.push(&ins::MOV, [Operand::Reg(rax()), Operand::imm(1, 64)]);

    let analysis = SymbolicAnalysis::of(&b);
    check_contiguity(&analysis, &b);
    assert_eq!(analysis.size(), 2);
    let seg0 = &analysis.segments()[0];
    assert!(seg0.register_state.is_empty());
    assert_eq!(seg0.suffix.len(), 1);
    assert_eq!(seg0.begin.index, 0);
    assert_eq!(seg0.end.index, 1);
}

#[test]
fn conditional_jump_recovery() {
    // S4: target = (zx(rax == 0) * (A ^ B)) ^ B, i.e. rax == 0 ? A : B.
    let a = 0x2000i64;
    let bb = 0x3000i64;
    let cc_reg = RegisterDesc::virt(5, 1);
    let tgt = RegisterDesc::virt(6, 64);

    let mut b = block();
    b.push(&ins::TE, [Operand::Reg(cc_reg), Operand::Reg(rax()), Operand::imm(0, 64)]);
    b.push(&ins::MOV, [Operand::Reg(tgt), Operand::Reg(cc_reg)]);
    b.push(&ins::MUL, [Operand::Reg(tgt), Operand::imm(a ^ bb, 64)]);
    b.push(&ins::XOR, [Operand::Reg(tgt), Operand::imm(bb, 64)]);
    b.jmp(Operand::Reg(tgt));

    let mut analysis = SymbolicAnalysis::of(&b);
    assert_eq!(analysis.size(), 1);
    {
        let seg = &analysis.segments()[0];
        assert_eq!(seg.exit_reason, ExitReason::StreamEnd);
        assert!(seg.branch_cc.is_none());
        assert_eq!(seg.branch_targets.len(), 1);
        assert!(seg.branch_targets[0].depth() > 2);
    }

    analysis.prepare(true);
    {
        let seg = &analysis.segments()[0];
        let cc = seg.branch_cc.as_ref().expect("condition recovered");
        assert_eq!(cc.bit_count(), 1);
        assert_eq!(seg.branch_targets.len(), 2);
        assert_eq!(seg.branch_targets[0].if_constant(), Some(a as u64));
        assert_eq!(seg.branch_targets[1].if_constant(), Some(bb as u64));
    }

    analysis.reemit(&mut b);
    let js = b.iter().find(|i| i.is(&ins::JS)).expect("js emitted");
    assert!(js.operands[0].is_register());
    assert_eq!(js.operands[1], Operand::imm(a, 64));
    assert_eq!(js.operands[2], Operand::imm(bb, 64));
    // The condition itself is computed by a comparison, not bit arithmetic.
    assert!(b.iter().any(|i| i.is(&ins::TE)));
}

#[test]
fn prepare_is_idempotent_on_recovered_branch() {
    let a = 0x2000i64;
    let bb = 0x3000i64;
    let cc_reg = RegisterDesc::virt(5, 1);
    let tgt = RegisterDesc::virt(6, 64);

    let mut b = block();
    b.push(&ins::TE, [Operand::Reg(cc_reg), Operand::Reg(rax()), Operand::imm(0, 64)]);
    b.push(&ins::MOV, [Operand::Reg(tgt), Operand::Reg(cc_reg)]);
    b.push(&ins::MUL, [Operand::Reg(tgt), Operand::imm(a ^ bb, 64)]);
    b.push(&ins::XOR, [Operand::Reg(tgt), Operand::imm(bb, 64)]);
    b.jmp(Operand::Reg(tgt));

    let mut analysis = SymbolicAnalysis::of(&b);
    analysis.prepare(true);
    let cc_once = analysis.segments()[0].branch_cc.clone().unwrap();
    let targets_once: Vec<Expr> = analysis.segments()[0].branch_targets.to_vec();
    analysis.prepare(true);
    assert_eq!(analysis.segments()[0].branch_cc.clone().unwrap(), cc_once);
    assert_eq!(analysis.segments()[0].branch_targets.to_vec(), targets_once);
}

#[test]
fn real_exit() {
    // S5: ends in vexit rax.
    let mut b = block();
    b.push(&ins::MOV, [Operand::Reg(rax()), Operand::imm(0x401000, 64)]);
    b.vexit(Operand::Reg(rax()));

    let mut analysis = SymbolicAnalysis::of(&b);
    assert_eq!(analysis.size(), 1);
    {
        let seg = &analysis.segments()[0];
        assert_eq!(seg.exit_reason, ExitReason::StreamEnd);
        assert!(seg.is_branch_real);
        assert!(seg.is_branch_exiting);
        assert!(seg.branch_cc.is_none());
        assert_eq!(seg.branch_targets.len(), 1);
    }

    analysis.prepare(true);
    analysis.reemit(&mut b);
    let exit = b.iter().find(|i| i.is(&ins::VEXIT)).expect("vexit emitted");
    assert_eq!(exit.operands[0], Operand::imm(0x401000, 64));
}

#[test]
fn vxcall_is_real_but_not_exiting() {
    let mut b = block();
    b.vxcall(Operand::imm(0x401000, 64));

    let analysis = SymbolicAnalysis::of(&b);
    let seg = &analysis.segments()[0];
    assert!(seg.is_branch_real);
    assert!(!seg.is_branch_exiting);
    assert_eq!(seg.branch_targets.len(), 1);
}

#[test]
fn stack_pointer_fold() {
    // S6: add $sp, 8 ; str $sp, 0, rax
    let mut b = block();
    b.push(&ins::ADD, [Operand::Reg(REG_SP), Operand::imm(8, 64)]);
    b.push(&ins::STR, [Operand::Reg(REG_SP), Operand::imm(0, 64), Operand::Reg(rax())]);

    let mut analysis = SymbolicAnalysis::of(&b);
    assert_eq!(analysis.size(), 1);
    analysis.prepare(true);
    analysis.reemit(&mut b);

    // One store, displaced by the folded delta; no explicit mov $sp.
    assert_eq!(b.len(), 1);
    let store = b.ins(0);
    assert!(store.is(&ins::STR));
    assert_eq!(store.operands[0], Operand::Reg(REG_SP));
    assert_eq!(store.operands[1], Operand::imm(8, 64));
    assert_eq!(store.operands[2], Operand::Reg(rax()));
    assert!(!b.iter().any(|i| i.is(&ins::MOV)));
    assert_eq!(b.sp_offset, 8);
}

#[test]
fn non_constant_sp_update_materializes() {
    // $sp := $sp + rax cannot fold into bookkeeping.
    let mut b = block();
    b.push(&ins::ADD, [Operand::Reg(REG_SP), Operand::Reg(rax())]);

    let mut analysis = SymbolicAnalysis::of(&b);
    analysis.prepare(true);
    analysis.reemit(&mut b);
    let mov_sp = b
        .iter()
        .find(|i| i.is(&ins::MOV) && i.operands[0].if_reg().map(|r| r.is_stack_pointer()) == Some(true));
    assert!(mov_sp.is_some(), "expected explicit $sp materialization");
}

#[test]
fn constant_condition_folds_to_jmp() {
    // js with a condition that is symbolically constant true.
    let cc_reg = RegisterDesc::virt(5, 1);
    let mut b = block();
    b.push(&ins::MOV, [Operand::Reg(cc_reg), Operand::imm(1, 1)]);
    b.js(
        Operand::Reg(cc_reg),
        Operand::imm(0x2000, 64),
        Operand::imm(0x3000, 64),
    );

    let mut analysis = SymbolicAnalysis::of(&b);
    analysis.prepare(true);
    analysis.reemit(&mut b);
    let jmp = b.iter().find(|i| i.is(&ins::JMP)).expect("folded to jmp");
    // Condition true selects the taken target.
    assert_eq!(jmp.operands[0], Operand::imm(0x2000, 64));
    assert!(!b.iter().any(|i| i.is(&ins::JS)));
}

#[test]
fn js_with_live_condition_survives() {
    let cc_reg = RegisterDesc::virt(5, 1);
    let mut b = block();
    b.push(&ins::TE, [Operand::Reg(cc_reg), Operand::Reg(rax()), Operand::imm(7, 64)]);
    b.js(
        Operand::Reg(cc_reg),
        Operand::imm(0x2000, 64),
        Operand::imm(0x3000, 64),
    );

    let mut analysis = SymbolicAnalysis::of(&b);
    {
        let seg = &analysis.segments()[0];
        let cc = seg.branch_cc.as_ref().unwrap();
        assert_eq!(cc.bit_count(), 1);
        assert_eq!(seg.branch_targets.len(), 2);
    }
    analysis.prepare(true);
    analysis.reemit(&mut b);
    let js = b.iter().find(|i| i.is(&ins::JS)).expect("js preserved");
    assert_eq!(js.operands[1], Operand::imm(0x2000, 64));
    assert_eq!(js.operands[2], Operand::imm(0x3000, 64));
}

#[test]
fn memory_writeback_splits_base_and_offset() {
    // str rcx+0x10 via symbolic pointer: ldd-free store re-emission keeps
    // the constant displacement in the str operand.
    let mut b = block();
    b.push(&ins::ADD, [Operand::Reg(rcx()), Operand::imm(0x10, 64)]);
    b.push(&ins::STR, [Operand::Reg(rcx()), Operand::imm(0, 64), Operand::imm(5, 64)]);

    let mut analysis = SymbolicAnalysis::of(&b);
    analysis.prepare(true);
    analysis.reemit(&mut b);
    let store = b.iter().find(|i| i.is(&ins::STR)).expect("store");
    // rcx is also a writeback target, so its initial value got pinned into
    // a temporary before serving as the store base.
    let base = store.operands[0].if_reg().unwrap();
    assert!(base.is_local());
    assert_eq!(store.operands[1], Operand::imm(0x10, 64));
    // rcx itself was modified and written back too.
    assert!(b
        .iter()
        .any(|i| i.is(&ins::MOV) && i.operands[0] == Operand::Reg(rcx())));
    // The pin reads rcx before the writeback clobbers it.
    let pin_index = b.iter().position(|i| {
        i.is(&ins::MOV) && i.operands[1] == Operand::Reg(rcx())
    });
    let writeback_index = b.iter().position(|i| {
        i.is(&ins::MOV) && i.operands[0] == Operand::Reg(rcx())
    });
    assert!(pin_index.unwrap() < writeback_index.unwrap());
}

#[test]
fn initial_state_reads_are_tracked() {
    let mut b = block();
    b.push(&ins::MOV, [Operand::Reg(rbx()), Operand::Reg(rax())]);

    let analysis = SymbolicAnalysis::of(&b);
    let seg = &analysis.segments()[0];
    let mask = seg
        .register_references
        .get(&rax().weak())
        .copied()
        .unwrap_or(0);
    assert_eq!(mask, !0u64);
    // The written register was never read from initial state.
    assert!(seg.register_references.get(&rbx().weak()).is_none());
}

#[test]
fn memory_reads_are_tracked() {
    let mut b = block();
    b.push(&ins::LDD, [Operand::Reg(rax()), Operand::Reg(rcx()), Operand::imm(0, 64)]);

    let analysis = SymbolicAnalysis::of(&b);
    let seg = &analysis.segments()[0];
    assert_eq!(seg.memory_references.len(), 1);
    let (_, mask) = seg.memory_references.iter().next().unwrap();
    assert_eq!(*mask, !0u64);
}

#[test]
fn roundtrip_preserves_state_closure() {
    // Property 6: re-emission followed by re-analysis yields equivalent
    // register and memory closures.
    let mut b = block();
    b.push(&ins::MOV, [Operand::Reg(rax()), Operand::imm(10, 64)]);
    b.push(&ins::ADD, [Operand::Reg(rax()), Operand::Reg(rbx())]);
    b.push(&ins::MOV, [Operand::Reg(rcx()), Operand::Reg(rax())]);
    b.shift_sp(-8);
    b.push(&ins::STR, [Operand::Reg(REG_SP), Operand::imm(-8, 64), Operand::Reg(rax())]);

    let mut analysis = SymbolicAnalysis::of(&b);
    let expected: Vec<(RegisterDesc, Expr)> = [rax(), rbx(), rcx()]
        .iter()
        .map(|r| (*r, analysis.segments()[0].register_value(r).simplify(true)))
        .collect();

    analysis.prepare(true);
    analysis.reemit(&mut b);
    assert!(analysis.is_dirty());

    let analysis2 = SymbolicAnalysis::of(&b);
    assert_eq!(analysis2.size(), 1);
    for (reg, value) in expected {
        let got = analysis2.segments()[0].register_value(&reg).simplify(true);
        assert_eq!(got, value, "closure of {} changed across re-emission", reg);
    }
    assert_eq!(analysis2.segments()[0].memory_state.size(), 1);
}

#[test]
fn reemit_marks_origin_analysis_dirty() {
    let mut b = block();
    b.push(&ins::MOV, [Operand::Reg(rax()), Operand::imm(1, 64)]);

    let mut analysis = SymbolicAnalysis::of(&b);
    assert!(!analysis.is_dirty());
    analysis.reemit(&mut b);
    assert!(analysis.is_dirty());
    // A fresh update clears the flag.
    analysis.update(&b);
    assert!(!analysis.is_dirty());
}

#[test]
fn flags_register_fast_path() {
    // Sparse 1-bit writes to the flags register re-emit per bit.
    let flags = vtir::REG_FLAGS;
    let zf = RegisterDesc {
        flags: flags.flags,
        id: flags.id,
        bit_count: 1,
        bit_offset: 6,
    };
    let cf = RegisterDesc {
        flags: flags.flags,
        id: flags.id,
        bit_count: 1,
        bit_offset: 0,
    };
    let mut b = block();
    b.push(&ins::MOV, [Operand::Reg(zf), Operand::imm(1, 1)]);
    b.push(&ins::MOV, [Operand::Reg(cf), Operand::imm(0, 1)]);

    let mut analysis = SymbolicAnalysis::of(&b);
    analysis.prepare(true);
    analysis.reemit(&mut b);

    assert_eq!(b.len(), 2);
    for i in b.iter() {
        assert!(i.is(&ins::MOV));
        let dst = i.operands[0].if_reg().unwrap();
        assert!(dst.flags.contains(RegisterFlags::FLAGS));
        assert_eq!(dst.bit_count, 1);
    }
}

#[test]
fn suffix_rebased_after_sp_shift() {
    // A volatile instruction after a folded $sp move keeps its stack
    // bookkeeping consistent with the re-emitted stream.
    let mut b = block();
    b.push(&ins::ADD, [Operand::Reg(REG_SP), Operand::imm(0x10, 64)]);
    b.push(&ins::VPINR, [Operand::Reg(rax())]);

    let mut analysis = SymbolicAnalysis::of(&b);
    assert_eq!(analysis.size(), 1);
    analysis.prepare(true);
    analysis.reemit(&mut b);

    assert_eq!(b.len(), 1);
    assert!(b.ins(0).is(&ins::VPINR));
    assert_eq!(b.ins(0).sp_offset, 0x10);
    assert_eq!(b.sp_offset, 0x10);
}

#[test]
fn dump_is_observational() {
    let mut b = block();
    b.push(&ins::MOV, [Operand::Reg(rax()), Operand::imm(1, 64)]);
    b.vexit(Operand::Reg(rax()));

    let analysis = SymbolicAnalysis::of(&b);
    let mut out = Vec::new();
    analysis.dump(&b, &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("Exit due to stream end"));
    assert!(text.contains("Real Exit"));
    assert!(text.contains("Register Ops"));
}

#[test]
fn branch_target_adjusts_pending_sp_offset() {
    // A jmp through $sp sees the un-materialized stack delta.
    let mut b = block();
    b.shift_sp(-0x20);
    b.push(&ins::NOP, []);
    b.jmp(Operand::Reg(REG_SP));

    let analysis = SymbolicAnalysis::of(&b);
    let seg = &analysis.segments()[0];
    let target = seg.branch_targets[0].simplify(true);
    let (_, offset) = target.if_base_offset().expect("sp-relative target");
    assert_eq!(offset, -0x20);
}

#[test]
fn comparison_condition_known_bits_enable_recovery() {
    // The recovery pre-condition: value mask of a comparison is one bit.
    let cc = Expr::binary(
        BinaryOp::Eq,
        &Expr::constant(1, 64),
        &Expr::constant(2, 64),
    );
    assert_eq!(cc.if_constant(), Some(0));
}
