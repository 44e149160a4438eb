use rstest::rstest;
use stylec_codegen::{
    EmitContext, ErrorCode, HostType, Machine, MockRuntime, NamedLocal, ProcedureKind, Value,
    ValueType,
};

fn template() -> EmitContext {
    EmitContext::new(ProcedureKind::Template, "t", vec![], ValueType::Void)
}

#[rstest]
#[case(ProcedureKind::Template, NamedLocal::Tree, Some(0))]
#[case(ProcedureKind::Template, NamedLocal::Cursor, Some(1))]
#[case(ProcedureKind::Template, NamedLocal::Output, Some(2))]
#[case(ProcedureKind::Template, NamedLocal::Current, None)]
#[case(ProcedureKind::Matcher, NamedLocal::Current, Some(3))]
#[case(ProcedureKind::External, NamedLocal::Tree, Some(0))]
#[case(ProcedureKind::External, NamedLocal::Output, Some(1))]
#[case(ProcedureKind::External, NamedLocal::Cursor, None)]
#[case(ProcedureKind::External, NamedLocal::Current, None)]
fn reserved_slot_conventions(
    #[case] kind: ProcedureKind,
    #[case] local: NamedLocal,
    #[case] expected: Option<u16>,
) {
    let ctx = EmitContext::new(kind, "p", vec![], ValueType::Void);
    match expected {
        Some(slot) => assert_eq!(ctx.named_slot(local).unwrap(), slot),
        None => {
            let err = ctx.named_slot(local).unwrap_err();
            assert_eq!(err.code, ErrorCode::Internal);
            assert!(err.code.is_internal());
        }
    }
}

#[test]
fn cursor_calls_need_a_cursor_capable_kind() {
    let mut ctx = EmitContext::new(ProcedureKind::External, "host_entry", vec![], ValueType::Void);
    let err = ctx.cursor_next().unwrap_err();
    assert_eq!(err.code, ErrorCode::Internal);
    // Nothing after the failed request; the procedure is abandoned.
    assert_eq!(ctx.code().len(), 0);
}

#[test]
fn output_bracketing_balances() {
    let mut ctx = template();
    ctx.output_begin().unwrap();
    ctx.output_end().unwrap();
    let proc = ctx.finalize().unwrap();

    let mut rt = MockRuntime::new();
    let mut m = Machine::new(&mut rt);
    m.set_local(2, Value::Output);
    m.run(&proc.code).unwrap();
    assert_eq!(rt.output_events, 2);
    assert_eq!(rt.output_depth, 0);
}

#[test]
fn cursor_reset_rewinds_iteration() {
    let mut ctx = template();
    // Walk two nodes forward, then reset to the node left on the stack
    // and advance once more.
    ctx.cursor_next().unwrap();
    ctx.cursor_reset().unwrap();
    ctx.cursor_next().unwrap();
    let proc = ctx.finalize().unwrap();

    let mut rt = MockRuntime::new();
    let cursor = rt.add_cursor(vec![4, 5, 6]);
    let mut m = Machine::new(&mut rt);
    m.set_local(1, cursor);
    m.run(&proc.code).unwrap();
    // First next consumed node 4, reset rewound to it, second next
    // yields it again.
    assert_eq!(m.pop().unwrap(), Value::Node(4));
}

#[test]
fn matcher_current_node_string_value() {
    let mut ctx = EmitContext::new(ProcedureKind::Matcher, "match", vec![], ValueType::String);
    ctx.load_named(NamedLocal::Current).unwrap();
    ctx.node_text().unwrap();
    let proc = ctx.finalize().unwrap();
    assert_eq!(proc.descriptor, "()Lstring;");
    assert_eq!(proc.kind.tag(), "matcher");

    let mut rt = MockRuntime::new();
    rt.set_node_text(9, "current text");
    let mut m = Machine::new(&mut rt);
    m.set_local(0, Value::Tree);
    m.set_local(3, Value::Node(9));
    m.run(&proc.code).unwrap();
    assert_eq!(m.pop().unwrap(), Value::Str("current text".to_string()));
}

#[test]
fn temporaries_start_after_params() {
    let mut ctx = EmitContext::new(
        ProcedureKind::Template,
        "t",
        vec![ValueType::Real],
        ValueType::Void,
    );
    // Reserved 0-2, real param 3-4, so the first temporary lands at 5.
    let h = ctx.allocate_temporary(1).unwrap();
    assert_eq!(h.slot(), 5);
    ctx.release_temporary(h).unwrap();
}

#[rstest]
#[case(ValueType::Boolean, Value::Int(1))]
#[case(ValueType::Int, Value::Int(-42))]
#[case(ValueType::Real, Value::Real(6.25))]
#[case(ValueType::Node, Value::Node(11))]
fn box_unbox_roundtrip(#[case] ty: ValueType, #[case] seed: Value) {
    let mut ctx = template();
    ty.box_value(&mut ctx).unwrap();
    ty.unbox_value(&mut ctx).unwrap();
    let proc = ctx.finalize().unwrap();

    let mut rt = MockRuntime::new();
    let mut m = Machine::new(&mut rt);
    m.push(seed.clone());
    m.run(&proc.code).unwrap();
    assert_eq!(m.pop().unwrap(), seed);
}

#[test]
fn reference_types_box_as_noop() {
    let mut ctx = template();
    ValueType::String.box_value(&mut ctx).unwrap();
    ValueType::String.unbox_value(&mut ctx).unwrap();
    assert!(ctx.code().is_empty());
}

#[test]
fn void_cannot_box() {
    let mut ctx = template();
    let err = ValueType::Void.box_value(&mut ctx).unwrap_err();
    assert_eq!(err.code, ErrorCode::DataConversion);
}

#[rstest]
#[case(Value::Int(300), HostType::Byte, Value::Int(44))]
#[case(Value::Int(300), HostType::Char, Value::Int(300))]
#[case(Value::Int(-1), HostType::Char, Value::Int(65535))]
#[case(Value::Int(40000), HostType::Short, Value::Int(-25536))]
#[case(Value::Int(7), HostType::Long, Value::Int(7))]
fn host_integer_narrowing(#[case] seed: Value, #[case] host: HostType, #[case] expected: Value) {
    let mut ctx = template();
    ValueType::Int.convert_to_external(&mut ctx, host).unwrap();
    let proc = ctx.finalize().unwrap();

    let mut rt = MockRuntime::new();
    let mut m = Machine::new(&mut rt);
    m.push(seed);
    m.run(&proc.code).unwrap();
    assert_eq!(m.pop().unwrap(), expected);
}

#[test]
fn real_to_host_float_narrows_precision() {
    let mut ctx = template();
    ValueType::Real
        .convert_to_external(&mut ctx, HostType::Float)
        .unwrap();
    let proc = ctx.finalize().unwrap();

    let mut rt = MockRuntime::new();
    let mut m = Machine::new(&mut rt);
    m.push(Value::Real(1.000_000_1));
    m.run(&proc.code).unwrap();
    match m.pop().unwrap() {
        Value::Real(v) => assert_eq!(v, f64::from(1.000_000_1f32)),
        other => panic!("expected real, got {other:?}"),
    }
}

#[test]
fn unmapped_host_descriptor_is_fatal() {
    let mut ctx = template();
    let err = ValueType::NodeSet
        .convert_to_external(&mut ctx, HostType::Int)
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::DataConversion);
    assert!(ctx.code().is_empty());

    let mut ctx = template();
    let err = ValueType::Boolean
        .convert_from_external(&mut ctx, HostType::Float)
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::DataConversion);
}

#[test]
fn host_object_boxes_primitives() {
    let mut ctx = template();
    ValueType::Real
        .convert_to_external(&mut ctx, HostType::Object)
        .unwrap();
    ValueType::Real
        .convert_from_external(&mut ctx, HostType::Double)
        .unwrap();
    // Boxing emitted a call; receiving a double back is a no-op.
    assert_eq!(ctx.code().len(), 1);
}

#[test]
fn finalize_reports_frame_size() {
    let mut ctx = EmitContext::new(
        ProcedureKind::Template,
        "t",
        vec![ValueType::Int],
        ValueType::Void,
    );
    let h = ctx.allocate_temporary(2).unwrap();
    ctx.release_temporary(h).unwrap();
    let proc = ctx.finalize().unwrap();
    // Reserved 0-2, int param 3, the released double still peaked at 4-5.
    assert_eq!(proc.frame_size, 6);
    assert_eq!(proc.descriptor, "(I)V");
}
