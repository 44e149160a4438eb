//! Per-procedure code-emission context.
//!
//! One context owns one instruction stream and one slot allocator for
//! exactly as long as one procedure is being compiled. The procedure kind
//! fixes the reserved-slot convention up front; declared parameters follow
//! the reserved prefix, and temporaries are allocated past both.

use compact_str::CompactString;
use tracing::debug;

use crate::error::Error;
use crate::instr::{BranchCond, BranchHandle, BranchList, Instr, InstrAddr, InstrSeq, RuntimeFn};
use crate::slots::{SlotAllocator, SlotHandle};
use crate::types::ValueType;

/// Calling kind of the procedure being generated. The kind decides which
/// reserved locals exist and therefore which standard calls are available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcedureKind {
    /// Ordinary template procedure.
    Template,
    /// Procedure compiled from a tree-matching context; additionally
    /// carries the implicit current-node cursor.
    Matcher,
    /// Procedure invoked by host code; no iteration cursor.
    External,
}

/// Reserved locals guaranteed present before any temporary is allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedLocal {
    Tree,
    Cursor,
    Output,
    Current,
}

impl NamedLocal {
    fn name(&self) -> &'static str {
        match self {
            NamedLocal::Tree => "tree",
            NamedLocal::Cursor => "cursor",
            NamedLocal::Output => "output",
            NamedLocal::Current => "current",
        }
    }
}

impl ProcedureKind {
    /// Fixed (local, slot) layout for this kind.
    fn reserved(&self) -> &'static [(NamedLocal, u16)] {
        match self {
            ProcedureKind::Template => &[
                (NamedLocal::Tree, 0),
                (NamedLocal::Cursor, 1),
                (NamedLocal::Output, 2),
            ],
            ProcedureKind::Matcher => &[
                (NamedLocal::Tree, 0),
                (NamedLocal::Cursor, 1),
                (NamedLocal::Output, 2),
                (NamedLocal::Current, 3),
            ],
            ProcedureKind::External => &[(NamedLocal::Tree, 0), (NamedLocal::Output, 1)],
        }
    }

    pub fn reserved_width(&self) -> u16 {
        self.reserved().len() as u16
    }

    /// Convention tag handed to the assembly step.
    pub fn tag(&self) -> &'static str {
        match self {
            ProcedureKind::Template => "template",
            ProcedureKind::Matcher => "matcher",
            ProcedureKind::External => "external",
        }
    }
}

/// A finished procedure, ready for the downstream assembly step.
#[derive(Debug)]
pub struct Procedure {
    pub name: CompactString,
    pub kind: ProcedureKind,
    pub code: Vec<Instr>,
    /// Local-frame size the assembly step must reserve.
    pub frame_size: u16,
    /// External descriptor built from the parameter and result types.
    pub descriptor: CompactString,
}

#[derive(Debug)]
pub struct EmitContext {
    kind: ProcedureKind,
    name: CompactString,
    params: Vec<ValueType>,
    result: ValueType,
    /// Start slot of each declared parameter (reals span two slots).
    param_slots: Vec<u16>,
    code: InstrSeq,
    slots: SlotAllocator,
    /// Scratch local for double-width comparisons, created on first need
    /// and kept for the procedure's lifetime.
    real_scratch: Option<SlotHandle>,
}

impl EmitContext {
    pub fn new(
        kind: ProcedureKind,
        name: impl Into<CompactString>,
        params: Vec<ValueType>,
        result: ValueType,
    ) -> Self {
        let mut next = kind.reserved_width();
        let mut param_slots = Vec::with_capacity(params.len());
        for p in &params {
            param_slots.push(next);
            next += p.slot_width();
        }
        Self {
            kind,
            name: name.into(),
            params,
            result,
            param_slots,
            code: InstrSeq::new(),
            slots: SlotAllocator::new(next),
            real_scratch: None,
        }
    }

    pub fn kind(&self) -> ProcedureKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn code(&self) -> &InstrSeq {
        &self.code
    }

    /// Slot of a reserved local. Asking for a local the kind does not
    /// reserve is a defect in the surrounding compiler, not a stylesheet
    /// diagnostic.
    pub fn named_slot(&self, local: NamedLocal) -> Result<u16, Error> {
        self.kind
            .reserved()
            .iter()
            .find(|(l, _)| *l == local)
            .map(|(_, slot)| *slot)
            .ok_or_else(|| {
                Error::internal(format!(
                    "procedure kind '{}' has no '{}' local",
                    self.kind.tag(),
                    local.name()
                ))
            })
    }

    pub fn param_slot(&self, index: usize) -> Result<u16, Error> {
        self.param_slots.get(index).copied().ok_or_else(|| {
            Error::internal(format!(
                "parameter {index} out of range for '{}'",
                self.name
            ))
        })
    }

    pub fn emit(&mut self, instr: Instr) -> InstrAddr {
        self.code.push(instr)
    }

    pub fn branch(&mut self, cond: BranchCond) -> BranchHandle {
        self.code.branch(cond)
    }

    /// Address the next emitted instruction will occupy.
    pub fn here(&self) -> InstrAddr {
        self.code.next_addr()
    }

    pub fn backpatch(&mut self, handle: BranchHandle, target: InstrAddr) -> Result<(), Error> {
        self.code.backpatch(handle, target)
    }

    pub fn backpatch_all(&mut self, list: BranchList, target: InstrAddr) -> Result<(), Error> {
        self.code.backpatch_all(list, target)
    }

    pub fn call_runtime(&mut self, f: RuntimeFn) -> InstrAddr {
        self.emit(Instr::CallRuntime(f))
    }

    pub fn load_named(&mut self, local: NamedLocal) -> Result<InstrAddr, Error> {
        let slot = self.named_slot(local)?;
        Ok(self.emit(Instr::LoadLocal(slot)))
    }

    pub fn store_named(&mut self, local: NamedLocal) -> Result<InstrAddr, Error> {
        let slot = self.named_slot(local)?;
        Ok(self.emit(Instr::StoreLocal(slot)))
    }

    pub fn allocate_temporary(&mut self, width: u16) -> Result<SlotHandle, Error> {
        self.slots.allocate(width)
    }

    pub fn release_temporary(&mut self, handle: SlotHandle) -> Result<(), Error> {
        self.slots.release(handle)
    }

    /// Double-width scratch slot for real comparisons, allocated lazily on
    /// first use and reused afterwards.
    pub fn real_scratch_slot(&mut self) -> Result<u16, Error> {
        if let Some(h) = &self.real_scratch {
            return Ok(h.slot());
        }
        let handle = self.slots.allocate(2)?;
        let slot = handle.slot();
        self.real_scratch = Some(handle);
        Ok(slot)
    }

    // Standard runtime-call emitters. Every conversion rule that needs a
    // runtime operation goes through one of these (or `call_runtime`), so
    // each call descriptor is encoded exactly once.

    /// Start output production on this procedure's sink.
    pub fn output_begin(&mut self) -> Result<(), Error> {
        self.load_named(NamedLocal::Output)?;
        self.call_runtime(RuntimeFn::OutputBegin);
        Ok(())
    }

    /// End output production on this procedure's sink.
    pub fn output_end(&mut self) -> Result<(), Error> {
        self.load_named(NamedLocal::Output)?;
        self.call_runtime(RuntimeFn::OutputEnd);
        Ok(())
    }

    /// Advance the iteration cursor; leaves the next node (or the null
    /// handle) on the stack.
    pub fn cursor_next(&mut self) -> Result<(), Error> {
        self.load_named(NamedLocal::Cursor)?;
        self.call_runtime(RuntimeFn::CursorNext);
        Ok(())
    }

    /// Reset the iteration cursor to the start node on the stack.
    pub fn cursor_reset(&mut self) -> Result<(), Error> {
        self.load_named(NamedLocal::Cursor)?;
        self.call_runtime(RuntimeFn::CursorReset);
        Ok(())
    }

    /// Replace the node on the stack with its tree string value.
    pub fn node_text(&mut self) -> Result<(), Error> {
        self.load_named(NamedLocal::Tree)?;
        self.call_runtime(RuntimeFn::NodeText);
        Ok(())
    }

    /// Finish the procedure: append the return, verify every branch was
    /// resolved, and hand the stream off with its frame size and external
    /// descriptor.
    pub fn finalize(mut self) -> Result<Procedure, Error> {
        self.emit(Instr::Return);
        let code = self.code.finish()?;
        let mut descriptor = CompactString::new("(");
        for p in &self.params {
            descriptor.push_str(&p.descriptor());
        }
        descriptor.push(')');
        descriptor.push_str(&self.result.descriptor());
        let frame_size = self.slots.frame_size();
        debug!(
            name = %self.name,
            kind = self.kind.tag(),
            instrs = code.len(),
            frame_size,
            "procedure finalized"
        );
        Ok(Procedure {
            name: self.name,
            kind: self.kind,
            code,
            frame_size,
            descriptor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_layouts() {
        let ctx = EmitContext::new(ProcedureKind::Matcher, "m", vec![], ValueType::Void);
        assert_eq!(ctx.named_slot(NamedLocal::Tree).unwrap(), 0);
        assert_eq!(ctx.named_slot(NamedLocal::Current).unwrap(), 3);

        let ctx = EmitContext::new(ProcedureKind::External, "e", vec![], ValueType::Void);
        assert_eq!(ctx.named_slot(NamedLocal::Output).unwrap(), 1);
        let err = ctx.named_slot(NamedLocal::Cursor).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::Internal);
    }

    #[test]
    fn params_follow_reserved_prefix() {
        let ctx = EmitContext::new(
            ProcedureKind::Template,
            "t",
            vec![ValueType::Real, ValueType::Int],
            ValueType::String,
        );
        // Real parameter spans slots 3-4, so the int lands at 5.
        assert_eq!(ctx.param_slot(0).unwrap(), 3);
        assert_eq!(ctx.param_slot(1).unwrap(), 5);
    }

    #[test]
    fn scratch_slot_is_one_shot() {
        let mut ctx = EmitContext::new(ProcedureKind::Template, "t", vec![], ValueType::Void);
        let a = ctx.real_scratch_slot().unwrap();
        let b = ctx.real_scratch_slot().unwrap();
        assert_eq!(a, b);
        assert_eq!(a, 3);
    }

    #[test]
    fn finalize_builds_descriptor() {
        let ctx = EmitContext::new(
            ProcedureKind::Template,
            "t",
            vec![ValueType::Int, ValueType::NodeSet],
            ValueType::Real,
        );
        let proc = ctx.finalize().unwrap();
        assert_eq!(proc.descriptor, "(ILcursor;)D");
        assert_eq!(proc.code.last(), Some(&Instr::Return));
    }
}
