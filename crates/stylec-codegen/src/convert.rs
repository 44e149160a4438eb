//! Type-directed conversion engine.
//!
//! All conversion rules live in one `(source, target)` match so that an
//! undefined pair is a missing arm, not a runtime fallback. Compound
//! types convert to primitives compositionally (node -> real goes through
//! node -> string -> real); no semantic step is encoded twice. Boolean
//! results come in two shapes: synthesized (an explicit 0/1 on the stack)
//! and desynthesized (a pending branch list, nothing on the stack), the
//! latter feeding short-circuit control flow without materializing the
//! value.

use smallvec::smallvec;
use tracing::debug;

use crate::emit::EmitContext;
use crate::error::Error;
use crate::instr::{BranchCond, BranchList, Instr, IntWidth, RuntimeFn};
use crate::types::ValueType;

impl ValueType {
    /// Emit instructions turning a top-of-stack value of `self` into one
    /// of `target`. Undefined pairs fail without emitting.
    pub fn convert_to(&self, ctx: &mut EmitContext, target: &ValueType) -> Result<(), Error> {
        convert(ctx, self, target)
    }

    /// Emit the boolean test for a top-of-stack value of `self`, returning
    /// the branches taken when the value is false.
    pub fn convert_to_desynthesized(&self, ctx: &mut EmitContext) -> Result<BranchList, Error> {
        desynthesize(ctx, self)
    }

    /// Emit this type's boxing step (no-op for reference types).
    pub fn box_value(&self, ctx: &mut EmitContext) -> Result<(), Error> {
        box_value(ctx, self)
    }

    /// Emit this type's unboxing step (no-op for reference types).
    pub fn unbox_value(&self, ctx: &mut EmitContext) -> Result<(), Error> {
        unbox_value(ctx, self)
    }

    /// Emit the conversion used when passing a value of `self` to an
    /// external host procedure expecting `host`.
    pub fn convert_to_external(&self, ctx: &mut EmitContext, host: HostType) -> Result<(), Error> {
        convert_to_host(ctx, self, host)
    }

    /// Emit the conversion used when receiving a host value of `host` as
    /// a value of `self`.
    pub fn convert_from_external(&self, ctx: &mut EmitContext, host: HostType) -> Result<(), Error> {
        convert_from_host(ctx, host, self)
    }
}

pub fn convert(ctx: &mut EmitContext, source: &ValueType, target: &ValueType) -> Result<(), Error> {
    use ValueType::*;
    if source == target {
        return Ok(());
    }
    debug!(from = %source, to = %target, "convert");
    if *target == Boolean {
        return synthesize_boolean(ctx, source);
    }
    match (source, target) {
        (Boolean, String) => boolean_to_string(ctx),
        (Boolean, Real) => {
            ctx.emit(Instr::IntToReal);
            Ok(())
        }

        (Int, Real) => {
            ctx.emit(Instr::IntToReal);
            Ok(())
        }
        (Int, String) => {
            ctx.call_runtime(RuntimeFn::IntToString);
            Ok(())
        }

        (Real, Int) => {
            ctx.emit(Instr::RealToInt);
            Ok(())
        }
        (Real, String) => {
            ctx.call_runtime(RuntimeFn::RealToString);
            Ok(())
        }

        (String, Real) => {
            ctx.call_runtime(RuntimeFn::StringToReal);
            Ok(())
        }

        (Node, String) => ctx.node_text(),
        (Node, Real) => {
            convert(ctx, &Node, &String)?;
            convert(ctx, &String, &Real)
        }
        (Node, NodeSet) => {
            ctx.call_runtime(RuntimeFn::CursorFromNode);
            Ok(())
        }

        (NodeSet, Node) => {
            ctx.call_runtime(RuntimeFn::CursorFirst);
            Ok(())
        }
        (NodeSet, String) => {
            convert(ctx, &NodeSet, &Node)?;
            convert(ctx, &Node, &String)
        }
        (NodeSet, Real) => {
            convert(ctx, &NodeSet, &String)?;
            convert(ctx, &String, &Real)
        }

        (ResultTree, String) => {
            ctx.call_runtime(RuntimeFn::FragmentText);
            Ok(())
        }
        (ResultTree, Real) => {
            convert(ctx, &ResultTree, &String)?;
            convert(ctx, &String, &Real)
        }

        (Reference, Real) => {
            ctx.call_runtime(RuntimeFn::RefToReal);
            Ok(())
        }
        (Reference, Int) => {
            convert(ctx, &Reference, &Real)?;
            convert(ctx, &Real, &Int)
        }
        (Reference, String) => {
            ctx.call_runtime(RuntimeFn::RefToString);
            Ok(())
        }
        (Reference, NodeSet) => {
            ctx.call_runtime(RuntimeFn::RefToCursor);
            Ok(())
        }
        // Crossing into a host class is a checked downcast.
        (Reference, Object(name)) => {
            ctx.emit(Instr::CastClass(name.clone()));
            Ok(())
        }

        (Object(_), String) => {
            ctx.call_runtime(RuntimeFn::ObjectToString);
            Ok(())
        }

        (Void, String) => {
            ctx.emit(Instr::PushStr("".into()));
            Ok(())
        }

        // Converting to the generic reference type is boxing.
        (_, Reference) => box_value(ctx, source),

        _ => Err(Error::conversion(source, target)),
    }
}

/// Materialize a 0/1 from the desynthesized test: the true arm pushes 1
/// and jumps over the false arm, which collects every pending branch.
fn synthesize_boolean(ctx: &mut EmitContext, source: &ValueType) -> Result<(), Error> {
    let false_list = desynthesize(ctx, source)?;
    ctx.emit(Instr::PushInt(1));
    let done = ctx.branch(BranchCond::Always);
    let false_arm = ctx.here();
    ctx.backpatch_all(false_list, false_arm)?;
    ctx.emit(Instr::PushInt(0));
    let end = ctx.here();
    ctx.backpatch(done, end)
}

/// Two-way diamond pushing the literal "true" or "false".
fn boolean_to_string(ctx: &mut EmitContext) -> Result<(), Error> {
    let false_br = ctx.branch(BranchCond::IfZero);
    ctx.emit(Instr::PushStr("true".into()));
    let done = ctx.branch(BranchCond::Always);
    let false_arm = ctx.here();
    ctx.backpatch(false_br, false_arm)?;
    ctx.emit(Instr::PushStr("false".into()));
    let end = ctx.here();
    ctx.backpatch(done, end)
}

pub fn desynthesize(ctx: &mut EmitContext, source: &ValueType) -> Result<BranchList, Error> {
    use ValueType::*;
    match source {
        // Booleans, ints and node handles test directly; the null node
        // handle is zero.
        Boolean | Int | Node => Ok(smallvec![ctx.branch(BranchCond::IfZero)]),
        String => {
            ctx.call_runtime(RuntimeFn::StringLength);
            Ok(smallvec![ctx.branch(BranchCond::IfZero)])
        }
        NodeSet => {
            // True iff a first node exists; the node test is shared, not
            // re-encoded.
            ctx.call_runtime(RuntimeFn::CursorFirst);
            desynthesize(ctx, &Node)
        }
        ResultTree => {
            convert(ctx, &ResultTree, &String)?;
            desynthesize(ctx, &String)
        }
        Reference => {
            ctx.call_runtime(RuntimeFn::RefToBoolean);
            Ok(smallvec![ctx.branch(BranchCond::IfZero)])
        }
        Real => desynthesize_real(ctx),
        Void | Object(_) | Method(_) => Err(Error::conversion(source, &Boolean)),
    }
}

/// A real is true iff it is neither zero nor NaN. The operand must be
/// read twice (zero compare, then self compare for NaN), so it is parked
/// in the context's scratch local.
fn desynthesize_real(ctx: &mut EmitContext) -> Result<BranchList, Error> {
    let scratch = ctx.real_scratch_slot()?;
    ctx.emit(Instr::StoreLocal(scratch));
    ctx.emit(Instr::LoadLocal(scratch));
    ctx.emit(Instr::PushReal(0.0));
    ctx.emit(Instr::RealCmp);
    let zero = ctx.branch(BranchCond::IfZero);
    ctx.emit(Instr::LoadLocal(scratch));
    ctx.emit(Instr::LoadLocal(scratch));
    ctx.emit(Instr::RealCmp);
    // NaN compares unequal to itself.
    let nan = ctx.branch(BranchCond::IfNotZero);
    Ok(smallvec![zero, nan])
}

pub fn box_value(ctx: &mut EmitContext, ty: &ValueType) -> Result<(), Error> {
    use ValueType::*;
    match ty {
        Boolean => {
            ctx.call_runtime(RuntimeFn::BoxBoolean);
            Ok(())
        }
        Int => {
            ctx.call_runtime(RuntimeFn::BoxInt);
            Ok(())
        }
        Real => {
            ctx.call_runtime(RuntimeFn::BoxReal);
            Ok(())
        }
        Node => {
            ctx.call_runtime(RuntimeFn::BoxNode);
            Ok(())
        }
        t if t.is_reference() => Ok(()),
        _ => Err(Error::conversion(ty, &Reference)),
    }
}

pub fn unbox_value(ctx: &mut EmitContext, ty: &ValueType) -> Result<(), Error> {
    use ValueType::*;
    match ty {
        Boolean => {
            ctx.call_runtime(RuntimeFn::UnboxBoolean);
            Ok(())
        }
        Int => {
            ctx.call_runtime(RuntimeFn::UnboxInt);
            Ok(())
        }
        Real => {
            ctx.call_runtime(RuntimeFn::UnboxReal);
            Ok(())
        }
        Node => {
            ctx.call_runtime(RuntimeFn::UnboxNode);
            Ok(())
        }
        t if t.is_reference() => Ok(()),
        _ => Err(Error::conversion(&Reference, ty)),
    }
}

/// Primitive descriptors of the host procedure-call boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostType {
    Char,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    String,
    Object,
}

impl HostType {
    pub fn descriptor(&self) -> &'static str {
        match self {
            HostType::Char => "char",
            HostType::Byte => "byte",
            HostType::Short => "short",
            HostType::Int => "int",
            HostType::Long => "long",
            HostType::Float => "float",
            HostType::Double => "double",
            HostType::String => "string",
            HostType::Object => "object",
        }
    }

    pub fn from_descriptor(s: &str) -> Option<Self> {
        match s {
            "char" => Some(HostType::Char),
            "byte" => Some(HostType::Byte),
            "short" => Some(HostType::Short),
            "int" => Some(HostType::Int),
            "long" => Some(HostType::Long),
            "float" => Some(HostType::Float),
            "double" => Some(HostType::Double),
            "string" => Some(HostType::String),
            "object" => Some(HostType::Object),
            _ => None,
        }
    }
}

pub fn convert_to_host(
    ctx: &mut EmitContext,
    source: &ValueType,
    host: HostType,
) -> Result<(), Error> {
    use ValueType::*;
    match (source, host) {
        (Int, HostType::Char) => {
            ctx.emit(Instr::IntNarrow(IntWidth::Char));
            Ok(())
        }
        (Int, HostType::Byte) => {
            ctx.emit(Instr::IntNarrow(IntWidth::Byte));
            Ok(())
        }
        (Int, HostType::Short) => {
            ctx.emit(Instr::IntNarrow(IntWidth::Short));
            Ok(())
        }
        (Int, HostType::Int) => Ok(()),
        (Int, HostType::Long) => {
            ctx.emit(Instr::IntToLong);
            Ok(())
        }
        (Int, HostType::Double) => {
            ctx.emit(Instr::IntToReal);
            Ok(())
        }
        (Int, HostType::Float) => {
            ctx.emit(Instr::IntToReal);
            ctx.emit(Instr::RealToFloat);
            Ok(())
        }

        (Real, HostType::Double) => Ok(()),
        (Real, HostType::Float) => {
            ctx.emit(Instr::RealToFloat);
            Ok(())
        }
        (Real, HostType::Int) => {
            ctx.emit(Instr::RealToInt);
            Ok(())
        }
        (Real, HostType::Long) => {
            ctx.emit(Instr::RealToInt);
            ctx.emit(Instr::IntToLong);
            Ok(())
        }
        (Real, HostType::Char | HostType::Byte | HostType::Short) => {
            ctx.emit(Instr::RealToInt);
            convert_to_host(ctx, &Int, host)
        }

        (String, HostType::String) => Ok(()),

        (_, HostType::Object) => box_value(ctx, source),

        _ => Err(Error::host_conversion(source, host.descriptor(), true)),
    }
}

pub fn convert_from_host(
    ctx: &mut EmitContext,
    host: HostType,
    target: &ValueType,
) -> Result<(), Error> {
    use ValueType::*;
    match (host, target) {
        // Narrow host integers arrive widened on the operand stack.
        (
            HostType::Char | HostType::Byte | HostType::Short | HostType::Int | HostType::Long,
            Int,
        ) => Ok(()),
        (HostType::Float, Real) => {
            ctx.emit(Instr::FloatToReal);
            Ok(())
        }
        (HostType::Double, Real) => Ok(()),
        (HostType::String, String) => Ok(()),
        (HostType::Object, Reference) => Ok(()),
        _ => Err(Error::host_conversion(target, host.descriptor(), false)),
    }
}
