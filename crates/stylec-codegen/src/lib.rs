//! Type-directed code generation backend for the stylec stylesheet
//! compiler: the value-type lattice, its conversion engine (including
//! desynthesized booleans), the per-procedure emission context, and the
//! local-slot allocator. The surrounding compiler walks the expression
//! tree and drives conversions; the downstream assembly step receives
//! finalized procedures.

pub mod convert;
pub mod emit;
pub mod error;
pub mod eval;
pub mod instr;
pub mod slots;
pub mod types;

pub use convert::HostType;
pub use emit::{EmitContext, NamedLocal, Procedure, ProcedureKind};
pub use eval::{Machine, MockRuntime, Value};
pub use error::{Error, ErrorCode, Position};
pub use instr::{
    BranchCond, BranchHandle, BranchList, BranchTarget, Instr, InstrAddr, InstrSeq, IntWidth,
    RuntimeFn,
};
pub use slots::{SlotAllocator, SlotHandle, SlotRange};
pub use types::{INCOMPATIBLE, MethodType, ValueType, resolve_overload};
