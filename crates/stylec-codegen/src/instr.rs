//! Abstract instruction stream for the stack-oriented target machine.
//!
//! The stream is append-only; every append returns a stable address so
//! conditional branches can be fixed up later. A pending branch is
//! represented by a single-use [`BranchHandle`] token: it is consumed by
//! [`InstrSeq::backpatch`], which makes double-backpatching unrepresentable
//! through the public API, and the stream refuses to finish while any
//! branch is still pending.

use core::fmt;

use compact_str::CompactString;
use smallvec::SmallVec;
use tracing::trace;

use crate::error::Error;

/// Stable index of an instruction within one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstrAddr(pub u32);

impl fmt::Display for InstrAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.0)
    }
}

/// Narrowing widths for host-interop integer conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntWidth {
    Char,
    Byte,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchCond {
    Always,
    /// Branch when the popped integer (or node handle) is zero.
    IfZero,
    /// Branch when the popped integer is non-zero.
    IfNotZero,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchTarget {
    Pending,
    To(InstrAddr),
}

/// Entry points of the transformation runtime library.
///
/// Each runtime operation has exactly one emission path; conversion rules
/// call through these variants instead of re-encoding call descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeFn {
    OutputBegin,
    OutputEnd,
    CursorNext,
    CursorReset,
    CursorFirst,
    CursorFromNode,
    NodeText,
    FragmentText,
    StringLength,
    StringToReal,
    IntToString,
    RealToString,
    BoxBoolean,
    UnboxBoolean,
    BoxInt,
    UnboxInt,
    BoxReal,
    UnboxReal,
    BoxNode,
    UnboxNode,
    RefToBoolean,
    RefToReal,
    RefToString,
    RefToCursor,
    ObjectToString,
}

impl RuntimeFn {
    /// Call descriptor at the assembly boundary, arguments in push order.
    pub fn descriptor(&self) -> &'static str {
        match self {
            RuntimeFn::OutputBegin => "(Loutput;)V",
            RuntimeFn::OutputEnd => "(Loutput;)V",
            RuntimeFn::CursorNext => "(Lcursor;)N",
            RuntimeFn::CursorReset => "(NLcursor;)V",
            RuntimeFn::CursorFirst => "(Lcursor;)N",
            RuntimeFn::CursorFromNode => "(N)Lcursor;",
            RuntimeFn::NodeText => "(NLtree;)Lstring;",
            RuntimeFn::FragmentText => "(Lfragment;)Lstring;",
            RuntimeFn::StringLength => "(Lstring;)I",
            RuntimeFn::StringToReal => "(Lstring;)D",
            RuntimeFn::IntToString => "(I)Lstring;",
            RuntimeFn::RealToString => "(D)Lstring;",
            RuntimeFn::BoxBoolean => "(Z)Lobject;",
            RuntimeFn::UnboxBoolean => "(Lobject;)Z",
            RuntimeFn::BoxInt => "(I)Lobject;",
            RuntimeFn::UnboxInt => "(Lobject;)I",
            RuntimeFn::BoxReal => "(D)Lobject;",
            RuntimeFn::UnboxReal => "(Lobject;)D",
            RuntimeFn::BoxNode => "(N)Lobject;",
            RuntimeFn::UnboxNode => "(Lobject;)N",
            RuntimeFn::RefToBoolean => "(Lobject;)Z",
            RuntimeFn::RefToReal => "(Lobject;)D",
            RuntimeFn::RefToString => "(Lobject;)Lstring;",
            RuntimeFn::RefToCursor => "(Lobject;)Lcursor;",
            RuntimeFn::ObjectToString => "(Lobject;)Lstring;",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RuntimeFn::OutputBegin => "output-begin",
            RuntimeFn::OutputEnd => "output-end",
            RuntimeFn::CursorNext => "cursor-next",
            RuntimeFn::CursorReset => "cursor-reset",
            RuntimeFn::CursorFirst => "cursor-first",
            RuntimeFn::CursorFromNode => "cursor-from-node",
            RuntimeFn::NodeText => "node-text",
            RuntimeFn::FragmentText => "fragment-text",
            RuntimeFn::StringLength => "string-length",
            RuntimeFn::StringToReal => "string-to-real",
            RuntimeFn::IntToString => "int-to-string",
            RuntimeFn::RealToString => "real-to-string",
            RuntimeFn::BoxBoolean => "box-boolean",
            RuntimeFn::UnboxBoolean => "unbox-boolean",
            RuntimeFn::BoxInt => "box-int",
            RuntimeFn::UnboxInt => "unbox-int",
            RuntimeFn::BoxReal => "box-real",
            RuntimeFn::UnboxReal => "unbox-real",
            RuntimeFn::BoxNode => "box-node",
            RuntimeFn::UnboxNode => "unbox-node",
            RuntimeFn::RefToBoolean => "ref-to-boolean",
            RuntimeFn::RefToReal => "ref-to-real",
            RuntimeFn::RefToString => "ref-to-string",
            RuntimeFn::RefToCursor => "ref-to-cursor",
            RuntimeFn::ObjectToString => "object-to-string",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    PushInt(i64),
    PushReal(f64),
    PushStr(CompactString),
    Dup,
    Pop,
    Swap,
    LoadLocal(u16),
    StoreLocal(u16),
    IntToReal,
    /// Truncating.
    RealToInt,
    IntNarrow(IntWidth),
    IntToLong,
    RealToFloat,
    FloatToReal,
    /// Pops b then a; pushes 0 if a == b, -1/+1 on order, +1 if either
    /// operand is NaN.
    RealCmp,
    /// Checked downcast of the reference on the stack to a named external
    /// class; the runtime faults if the object is not an instance.
    CastClass(CompactString),
    Branch {
        cond: BranchCond,
        target: BranchTarget,
    },
    CallRuntime(RuntimeFn),
    Return,
}

/// Single-use token for a branch whose target is not yet fixed.
///
/// Deliberately neither `Clone` nor `Copy`: backpatching consumes it, so a
/// handle cannot be resolved twice and a forgotten handle is caught by the
/// pending count at finish time.
#[derive(Debug, PartialEq, Eq)]
pub struct BranchHandle(InstrAddr);

impl BranchHandle {
    pub fn addr(&self) -> InstrAddr {
        self.0
    }
}

/// Pending branches that must all be resolved to the same destination.
pub type BranchList = SmallVec<[BranchHandle; 2]>;

/// Append-only instruction stream owned by one emission context.
#[derive(Debug, Default)]
pub struct InstrSeq {
    instrs: Vec<Instr>,
    pending: usize,
}

impl InstrSeq {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an instruction, returning its address.
    pub fn push(&mut self, instr: Instr) -> InstrAddr {
        let addr = InstrAddr(self.instrs.len() as u32);
        trace!(addr = %addr, op = %instr, "emit");
        self.instrs.push(instr);
        addr
    }

    /// Append a conditional branch with an unresolved target.
    pub fn branch(&mut self, cond: BranchCond) -> BranchHandle {
        let addr = self.push(Instr::Branch {
            cond,
            target: BranchTarget::Pending,
        });
        self.pending += 1;
        BranchHandle(addr)
    }

    /// Address one past the last appended instruction; branching here
    /// falls through to whatever is emitted next.
    pub fn next_addr(&self) -> InstrAddr {
        InstrAddr(self.instrs.len() as u32)
    }

    /// Fix the target of a pending branch, consuming its handle.
    pub fn backpatch(&mut self, handle: BranchHandle, target: InstrAddr) -> Result<(), Error> {
        let addr = handle.0;
        match self.instrs.get_mut(addr.0 as usize) {
            Some(Instr::Branch {
                target: t @ BranchTarget::Pending,
                ..
            }) => {
                *t = BranchTarget::To(target);
                self.pending -= 1;
                Ok(())
            }
            Some(Instr::Branch { .. }) => Err(Error::unresolved_branch(format!(
                "branch at {addr} backpatched twice"
            ))),
            _ => Err(Error::internal(format!(
                "backpatch target {addr} is not a branch"
            ))),
        }
    }

    /// Resolve every handle in `list` to the same destination.
    pub fn backpatch_all(&mut self, list: BranchList, target: InstrAddr) -> Result<(), Error> {
        for handle in list {
            self.backpatch(handle, target)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    pub fn pending_branches(&self) -> usize {
        self.pending
    }

    pub fn instrs(&self) -> &[Instr] {
        &self.instrs
    }

    /// Hand the finished stream off. Fails if any branch is still pending;
    /// a stream with unresolved branches must never reach assembly.
    pub fn finish(self) -> Result<Vec<Instr>, Error> {
        if self.pending > 0 {
            return Err(Error::unresolved_branch(format!(
                "{} branch(es) never backpatched",
                self.pending
            )));
        }
        Ok(self.instrs)
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Instr::*;
        match self {
            PushInt(v) => write!(f, "PUSH_INT {v}"),
            PushReal(v) => write!(f, "PUSH_REAL {v}"),
            PushStr(s) => write!(f, "PUSH_STR {s:?}"),
            Dup => write!(f, "DUP"),
            Pop => write!(f, "POP"),
            Swap => write!(f, "SWAP"),
            LoadLocal(i) => write!(f, "LOAD_LOCAL {i}"),
            StoreLocal(i) => write!(f, "STORE_LOCAL {i}"),
            IntToReal => write!(f, "INT_TO_REAL"),
            RealToInt => write!(f, "REAL_TO_INT"),
            IntNarrow(w) => write!(f, "INT_NARROW {w:?}"),
            IntToLong => write!(f, "INT_TO_LONG"),
            RealToFloat => write!(f, "REAL_TO_FLOAT"),
            FloatToReal => write!(f, "FLOAT_TO_REAL"),
            RealCmp => write!(f, "REAL_CMP"),
            CastClass(name) => write!(f, "CAST_CLASS {name}"),
            Branch { cond, target } => {
                let mnemonic = match cond {
                    BranchCond::Always => "BR",
                    BranchCond::IfZero => "BR_IF_ZERO",
                    BranchCond::IfNotZero => "BR_IF_NOT_ZERO",
                };
                match target {
                    BranchTarget::Pending => write!(f, "{mnemonic} <pending>"),
                    BranchTarget::To(addr) => write!(f, "{mnemonic} {addr}"),
                }
            }
            CallRuntime(r) => write!(f, "CALL {} {}", r.name(), r.descriptor()),
            Return => write!(f, "RETURN"),
        }
    }
}

impl fmt::Display for InstrSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, op) in self.instrs.iter().enumerate() {
            writeln!(f, "{:04}: {}", i, op)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backpatch_resolves_pending() {
        let mut seq = InstrSeq::new();
        seq.push(Instr::PushInt(1));
        let h = seq.branch(BranchCond::IfZero);
        seq.push(Instr::PushInt(2));
        assert_eq!(seq.pending_branches(), 1);
        let target = seq.next_addr();
        seq.backpatch(h, target).unwrap();
        assert_eq!(seq.pending_branches(), 0);
        seq.finish().unwrap();
    }

    #[test]
    fn double_backpatch_is_a_defect() {
        // A second handle to the same branch cannot be built through the
        // public API; forge one here to exercise the defensive check.
        let mut seq = InstrSeq::new();
        let h = seq.branch(BranchCond::IfZero);
        let forged = BranchHandle(h.addr());
        seq.backpatch(h, InstrAddr(0)).unwrap();
        let err = seq.backpatch(forged, InstrAddr(0)).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::UnresolvedBranch);
    }

    #[test]
    fn finish_rejects_pending() {
        let mut seq = InstrSeq::new();
        let _h = seq.branch(BranchCond::Always);
        let err = seq.finish().unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::UnresolvedBranch);
    }

    #[test]
    fn backpatch_non_branch_is_internal() {
        let mut seq = InstrSeq::new();
        seq.push(Instr::Pop);
        let forged = BranchHandle(InstrAddr(0));
        let err = seq.backpatch(forged, InstrAddr(0)).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::Internal);
    }
}
