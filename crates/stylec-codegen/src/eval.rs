//! Reference evaluator for the abstract target machine.
//!
//! Executes finalized instruction streams against [`MockRuntime`], an
//! in-memory stand-in for the transformation runtime. Used by the test
//! suite to check that emitted conversions compute the right values, and
//! available to downstream consumers as a sanity harness. Any operand of
//! the wrong kind, or execution of a still-pending branch, is an internal
//! error: it means the generator produced malformed code.

use std::collections::HashMap;

use smallvec::SmallVec;

use crate::error::Error;
use crate::instr::{BranchCond, BranchTarget, Instr, IntWidth, RuntimeFn};

/// Null node handle; cursors yield it when exhausted.
pub const NULL_NODE: u32 = 0;

/// A runtime value on the evaluation stack or in a local slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Integers and synthesized booleans (0/1).
    Int(i64),
    Real(f64),
    Str(String),
    /// Node handle; `NULL_NODE` is the absent node.
    Node(u32),
    /// Index into the runtime's cursor table.
    Cursor(usize),
    /// Index into the runtime's fragment table.
    Fragment(usize),
    /// The procedure's tree-source handle.
    Tree,
    /// The procedure's output-sink handle.
    Output,
    /// A boxed value (the generic reference representation).
    Ref(Box<Value>),
}

#[derive(Debug, Default)]
struct CursorState {
    nodes: Vec<u32>,
    pos: usize,
}

/// In-memory stand-in for the transformation runtime library.
#[derive(Debug, Default)]
pub struct MockRuntime {
    node_text: HashMap<u32, String>,
    cursors: Vec<CursorState>,
    fragments: Vec<String>,
    /// Nesting depth of output production; finished runs end at zero.
    pub output_depth: i32,
    /// Total begin/end output events observed.
    pub output_events: u32,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_node_text(&mut self, node: u32, text: impl Into<String>) {
        self.node_text.insert(node, text.into());
    }

    /// Register a cursor over `nodes`; returns its handle value.
    pub fn add_cursor(&mut self, nodes: Vec<u32>) -> Value {
        self.cursors.push(CursorState { nodes, pos: 0 });
        Value::Cursor(self.cursors.len() - 1)
    }

    /// Register a result-tree fragment with the given string value.
    pub fn add_fragment(&mut self, text: impl Into<String>) -> Value {
        self.fragments.push(text.into());
        Value::Fragment(self.fragments.len() - 1)
    }

    fn node_text(&self, node: u32) -> String {
        self.node_text.get(&node).cloned().unwrap_or_default()
    }
}

/// Renders a real the way the runtime library's `real-to-string` does:
/// whole finite values print without a fractional part.
fn real_to_string(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if v == v.trunc() && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

fn string_to_real(s: &str) -> f64 {
    s.trim().parse::<f64>().unwrap_or(f64::NAN)
}

/// Effective boolean value of a boxed operand.
fn ref_truth(rt: &MockRuntime, v: &Value) -> Result<bool, Error> {
    Ok(match v {
        Value::Int(i) => *i != 0,
        Value::Real(r) => *r != 0.0 && !r.is_nan(),
        Value::Str(s) => !s.is_empty(),
        Value::Node(h) => *h != NULL_NODE,
        Value::Cursor(id) => {
            let state = rt
                .cursors
                .get(*id)
                .ok_or_else(|| Error::internal(format!("unknown cursor {id}")))?;
            !state.nodes.is_empty()
        }
        Value::Fragment(id) => {
            let text = rt
                .fragments
                .get(*id)
                .ok_or_else(|| Error::internal(format!("unknown fragment {id}")))?;
            !text.is_empty()
        }
        other => {
            return Err(Error::internal(format!(
                "boxed operand {other:?} has no truth value"
            )));
        }
    })
}

/// One evaluation of one procedure's code.
pub struct Machine<'rt> {
    runtime: &'rt mut MockRuntime,
    stack: SmallVec<[Value; 8]>,
    locals: Vec<Option<Value>>,
}

impl<'rt> Machine<'rt> {
    pub fn new(runtime: &'rt mut MockRuntime) -> Self {
        Self {
            runtime,
            stack: SmallVec::new(),
            locals: Vec::new(),
        }
    }

    /// Seed a local slot before the run (reserved slots, parameters).
    pub fn set_local(&mut self, slot: u16, value: Value) {
        let idx = slot as usize;
        if self.locals.len() <= idx {
            self.locals.resize(idx + 1, None);
        }
        self.locals[idx] = Some(value);
    }

    /// Seed the operand stack before the run.
    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub fn pop(&mut self) -> Result<Value, Error> {
        self.stack
            .pop()
            .ok_or_else(|| Error::internal("operand stack underflow"))
    }

    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    fn pop_int(&mut self) -> Result<i64, Error> {
        match self.pop()? {
            Value::Int(v) => Ok(v),
            other => Err(Error::internal(format!("expected int, got {other:?}"))),
        }
    }

    fn pop_real(&mut self) -> Result<f64, Error> {
        match self.pop()? {
            Value::Real(v) => Ok(v),
            other => Err(Error::internal(format!("expected real, got {other:?}"))),
        }
    }

    fn pop_str(&mut self) -> Result<String, Error> {
        match self.pop()? {
            Value::Str(v) => Ok(v),
            other => Err(Error::internal(format!("expected string, got {other:?}"))),
        }
    }

    fn pop_node(&mut self) -> Result<u32, Error> {
        match self.pop()? {
            Value::Node(v) => Ok(v),
            other => Err(Error::internal(format!("expected node, got {other:?}"))),
        }
    }

    fn pop_cursor(&mut self) -> Result<usize, Error> {
        match self.pop()? {
            Value::Cursor(v) => Ok(v),
            other => Err(Error::internal(format!("expected cursor, got {other:?}"))),
        }
    }

    fn pop_ref(&mut self) -> Result<Value, Error> {
        match self.pop()? {
            Value::Ref(inner) => Ok(*inner),
            other => Err(Error::internal(format!("expected reference, got {other:?}"))),
        }
    }

    /// The integer a conditional branch tests: a plain int or a node
    /// handle (zero is the null node).
    fn pop_test(&mut self) -> Result<i64, Error> {
        match self.pop()? {
            Value::Int(v) => Ok(v),
            Value::Node(h) => Ok(i64::from(h)),
            other => Err(Error::internal(format!(
                "branch condition on non-integer {other:?}"
            ))),
        }
    }

    fn load_local(&mut self, slot: u16) -> Result<Value, Error> {
        self.locals
            .get(slot as usize)
            .and_then(Clone::clone)
            .ok_or_else(|| Error::internal(format!("load of uninitialized local {slot}")))
    }

    /// Run `code` to its return (or its end).
    pub fn run(&mut self, code: &[Instr]) -> Result<(), Error> {
        let mut pc = 0usize;
        while pc < code.len() {
            match &code[pc] {
                Instr::PushInt(v) => self.stack.push(Value::Int(*v)),
                Instr::PushReal(v) => self.stack.push(Value::Real(*v)),
                Instr::PushStr(s) => self.stack.push(Value::Str(s.to_string())),
                Instr::Dup => {
                    let top = self
                        .stack
                        .last()
                        .cloned()
                        .ok_or_else(|| Error::internal("dup on empty stack"))?;
                    self.stack.push(top);
                }
                Instr::Pop => {
                    self.pop()?;
                }
                Instr::Swap => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(b);
                    self.stack.push(a);
                }
                Instr::LoadLocal(slot) => {
                    let v = self.load_local(*slot)?;
                    self.stack.push(v);
                }
                Instr::StoreLocal(slot) => {
                    let v = self.pop()?;
                    self.set_local(*slot, v);
                }
                Instr::IntToReal => {
                    let v = self.pop_int()?;
                    self.stack.push(Value::Real(v as f64));
                }
                Instr::RealToInt => {
                    let v = self.pop_real()?;
                    // Truncation toward zero; NaN truncates to 0.
                    self.stack.push(Value::Int(v as i64));
                }
                Instr::IntNarrow(width) => {
                    let v = self.pop_int()?;
                    let narrowed = match width {
                        IntWidth::Char => i64::from(v as u16),
                        IntWidth::Byte => i64::from(v as i8),
                        IntWidth::Short => i64::from(v as i16),
                    };
                    self.stack.push(Value::Int(narrowed));
                }
                Instr::IntToLong => {
                    let v = self.pop_int()?;
                    self.stack.push(Value::Int(v));
                }
                Instr::RealToFloat => {
                    let v = self.pop_real()?;
                    self.stack.push(Value::Real(f64::from(v as f32)));
                }
                Instr::FloatToReal => {
                    let v = self.pop_real()?;
                    self.stack.push(Value::Real(v));
                }
                Instr::CastClass(name) => {
                    // The mock runtime carries no class metadata; the cast
                    // only checks that the operand is a reference at all.
                    match self.pop()? {
                        v @ Value::Ref(_) => self.stack.push(v),
                        other => {
                            return Err(Error::internal(format!(
                                "cast to '{name}' on non-reference {other:?}"
                            )));
                        }
                    }
                }
                Instr::RealCmp => {
                    let b = self.pop_real()?;
                    let a = self.pop_real()?;
                    let r = if a.is_nan() || b.is_nan() {
                        1
                    } else if a < b {
                        -1
                    } else if a > b {
                        1
                    } else {
                        0
                    };
                    self.stack.push(Value::Int(r));
                }
                Instr::Branch { cond, target } => {
                    let addr = match target {
                        BranchTarget::To(addr) => addr.0 as usize,
                        BranchTarget::Pending => {
                            return Err(Error::internal(format!(
                                "pending branch executed at {pc}"
                            )));
                        }
                    };
                    let taken = match cond {
                        BranchCond::Always => true,
                        BranchCond::IfZero => self.pop_test()? == 0,
                        BranchCond::IfNotZero => self.pop_test()? != 0,
                    };
                    if taken {
                        pc = addr;
                        continue;
                    }
                }
                Instr::CallRuntime(f) => self.runtime_call(*f)?,
                Instr::Return => break,
            }
            pc += 1;
        }
        Ok(())
    }

    fn runtime_call(&mut self, f: RuntimeFn) -> Result<(), Error> {
        match f {
            RuntimeFn::OutputBegin => {
                self.expect_output()?;
                self.runtime.output_depth += 1;
                self.runtime.output_events += 1;
            }
            RuntimeFn::OutputEnd => {
                self.expect_output()?;
                self.runtime.output_depth -= 1;
                self.runtime.output_events += 1;
            }
            RuntimeFn::CursorNext => {
                let id = self.pop_cursor()?;
                let state = self.cursor_mut(id)?;
                let node = if state.pos < state.nodes.len() {
                    let n = state.nodes[state.pos];
                    state.pos += 1;
                    n
                } else {
                    NULL_NODE
                };
                self.stack.push(Value::Node(node));
            }
            RuntimeFn::CursorReset => {
                let id = self.pop_cursor()?;
                let start = self.pop_node()?;
                let state = self.cursor_mut(id)?;
                state.pos = state
                    .nodes
                    .iter()
                    .position(|n| *n == start)
                    .unwrap_or_default();
            }
            RuntimeFn::CursorFirst => {
                let id = self.pop_cursor()?;
                let state = self.cursor_mut(id)?;
                state.pos = 0;
                let node = if state.nodes.is_empty() {
                    NULL_NODE
                } else {
                    state.pos = 1;
                    state.nodes[0]
                };
                self.stack.push(Value::Node(node));
            }
            RuntimeFn::CursorFromNode => {
                let node = self.pop_node()?;
                let nodes = if node == NULL_NODE { vec![] } else { vec![node] };
                let cursor = self.runtime.add_cursor(nodes);
                self.stack.push(cursor);
            }
            RuntimeFn::NodeText => {
                match self.pop()? {
                    Value::Tree => {}
                    other => {
                        return Err(Error::internal(format!("expected tree, got {other:?}")));
                    }
                }
                let node = self.pop_node()?;
                let text = self.runtime.node_text(node);
                self.stack.push(Value::Str(text));
            }
            RuntimeFn::FragmentText => {
                let id = match self.pop()? {
                    Value::Fragment(id) => id,
                    other => {
                        return Err(Error::internal(format!("expected fragment, got {other:?}")));
                    }
                };
                let text = self
                    .runtime
                    .fragments
                    .get(id)
                    .cloned()
                    .ok_or_else(|| Error::internal(format!("unknown fragment {id}")))?;
                self.stack.push(Value::Str(text));
            }
            RuntimeFn::StringLength => {
                let s = self.pop_str()?;
                self.stack.push(Value::Int(s.chars().count() as i64));
            }
            RuntimeFn::StringToReal => {
                let s = self.pop_str()?;
                self.stack.push(Value::Real(string_to_real(&s)));
            }
            RuntimeFn::IntToString => {
                let v = self.pop_int()?;
                self.stack.push(Value::Str(v.to_string()));
            }
            RuntimeFn::RealToString => {
                let v = self.pop_real()?;
                self.stack.push(Value::Str(real_to_string(v)));
            }
            RuntimeFn::BoxBoolean | RuntimeFn::BoxInt => {
                let v = self.pop_int()?;
                self.stack.push(Value::Ref(Box::new(Value::Int(v))));
            }
            RuntimeFn::UnboxBoolean | RuntimeFn::UnboxInt => {
                let inner = self.pop_ref()?;
                match inner {
                    Value::Int(v) => self.stack.push(Value::Int(v)),
                    other => {
                        return Err(Error::internal(format!(
                            "unboxed {other:?} where int was boxed"
                        )));
                    }
                }
            }
            RuntimeFn::BoxReal => {
                let v = self.pop_real()?;
                self.stack.push(Value::Ref(Box::new(Value::Real(v))));
            }
            RuntimeFn::UnboxReal => {
                let inner = self.pop_ref()?;
                match inner {
                    Value::Real(v) => self.stack.push(Value::Real(v)),
                    other => {
                        return Err(Error::internal(format!(
                            "unboxed {other:?} where real was boxed"
                        )));
                    }
                }
            }
            RuntimeFn::BoxNode => {
                let v = self.pop_node()?;
                self.stack.push(Value::Ref(Box::new(Value::Node(v))));
            }
            RuntimeFn::UnboxNode => {
                let inner = self.pop_ref()?;
                match inner {
                    Value::Node(v) => self.stack.push(Value::Node(v)),
                    other => {
                        return Err(Error::internal(format!(
                            "unboxed {other:?} where node was boxed"
                        )));
                    }
                }
            }
            RuntimeFn::RefToBoolean => {
                let inner = self.pop_ref()?;
                let b = ref_truth(self.runtime, &inner)?;
                self.stack.push(Value::Int(i64::from(b)));
            }
            RuntimeFn::RefToReal => {
                let inner = self.pop_ref()?;
                let v = match inner {
                    Value::Int(i) => i as f64,
                    Value::Real(r) => r,
                    Value::Str(s) => string_to_real(&s),
                    other => {
                        return Err(Error::internal(format!(
                            "boxed operand {other:?} has no numeric value"
                        )));
                    }
                };
                self.stack.push(Value::Real(v));
            }
            RuntimeFn::RefToString | RuntimeFn::ObjectToString => {
                let inner = self.pop_ref()?;
                let s = match inner {
                    Value::Int(i) => i.to_string(),
                    Value::Real(r) => real_to_string(r),
                    Value::Str(s) => s,
                    other => {
                        return Err(Error::internal(format!(
                            "boxed operand {other:?} has no string value"
                        )));
                    }
                };
                self.stack.push(Value::Str(s));
            }
            RuntimeFn::RefToCursor => {
                let inner = self.pop_ref()?;
                match inner {
                    Value::Cursor(id) => self.stack.push(Value::Cursor(id)),
                    other => {
                        return Err(Error::internal(format!(
                            "boxed operand {other:?} is not a cursor"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn expect_output(&mut self) -> Result<(), Error> {
        match self.pop()? {
            Value::Output => Ok(()),
            other => Err(Error::internal(format!(
                "expected output sink, got {other:?}"
            ))),
        }
    }

    fn cursor_mut(&mut self, id: usize) -> Result<&mut CursorState, Error> {
        self.runtime
            .cursors
            .get_mut(id)
            .ok_or_else(|| Error::internal(format!("unknown cursor {id}")))
    }
}
