use stylec_codegen::{
    BranchCond, EmitContext, ErrorCode, Instr, InstrSeq, ProcedureKind, ValueType,
};

fn ctx() -> EmitContext {
    EmitContext::new(ProcedureKind::Template, "branches", vec![], ValueType::Void)
}

#[test]
fn backpatching_every_handle_resolves_the_stream() {
    let mut c = ctx();
    let list = ValueType::Real.convert_to_desynthesized(&mut c).unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(c.code().pending_branches(), 2);
    let target = c.here();
    c.backpatch_all(list, target).unwrap();
    assert_eq!(c.code().pending_branches(), 0);
    c.finalize().unwrap();
}

#[test]
fn finalize_with_pending_branches_is_a_defect() {
    let mut c = ctx();
    let _list = ValueType::Int.convert_to_desynthesized(&mut c).unwrap();
    let err = c.finalize().unwrap_err();
    assert_eq!(err.code, ErrorCode::UnresolvedBranch);
    assert!(err.code.is_internal());
}

#[test]
fn finish_with_pending_branches_is_a_defect() {
    let mut seq = InstrSeq::new();
    seq.push(Instr::PushInt(1));
    let _h = seq.branch(BranchCond::IfZero);
    let err = seq.finish().unwrap_err();
    assert_eq!(err.code, ErrorCode::UnresolvedBranch);
}

#[test]
fn conversions_resolve_their_own_branches() {
    // Synthesized boolean conversions build diamonds internally; none of
    // their branches may leak to the caller unresolved.
    for source in [
        ValueType::Int,
        ValueType::Real,
        ValueType::String,
        ValueType::Node,
        ValueType::NodeSet,
        ValueType::ResultTree,
    ] {
        let mut c = ctx();
        source.convert_to(&mut c, &ValueType::Boolean).unwrap();
        assert_eq!(
            c.code().pending_branches(),
            0,
            "{source} -> boolean leaked pending branches"
        );
    }
}

#[test]
fn pending_branch_renders_as_pending() {
    let mut seq = InstrSeq::new();
    let h = seq.branch(BranchCond::IfZero);
    let text = seq.to_string();
    assert!(text.contains("BR_IF_ZERO <pending>"), "{text}");
    let target = seq.next_addr();
    seq.backpatch(h, target).unwrap();
    let text = seq.to_string();
    assert!(text.contains("BR_IF_ZERO 0001"), "{text}");
}
