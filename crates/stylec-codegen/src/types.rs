//! The closed lattice of runtime value types.
//!
//! Rationale:
//! - One closed enum instead of a class-per-type hierarchy: an undefined
//!   conversion pair is a missing match arm, not a runtime fallback.
//! - Non-parametric variants are unit variants, so the "one canonical
//!   instance per variant" invariant is structural and free; equality is
//!   derived.
//! - `Object` and `Method` are the only parametric variants and compare
//!   structurally.

use core::fmt;

use compact_str::{CompactString, ToCompactString};

use crate::error::Error;

/// Overload-distance sentinel for "no coercion path exists".
pub const INCOMPATIBLE: u32 = u32::MAX;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueType {
    Boolean,
    Int,
    Real,
    String,
    Node,
    NodeSet,
    ResultTree,
    Reference,
    Object(CompactString),
    Void,
    Method(Box<MethodType>),
}

/// A procedure signature carried through the lattice like any other type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodType {
    pub result: ValueType,
    pub args: Vec<ValueType>,
}

impl MethodType {
    pub fn new(result: ValueType, args: Vec<ValueType>) -> Self {
        Self { result, args }
    }

    /// Positional sum of argument distances. The result type does not
    /// participate. Arity mismatch or any incompatible position is
    /// incompatible as a whole; two nullary signatures are at distance 0.
    pub fn distance_to(&self, other: &MethodType) -> u32 {
        args_distance(&self.args, &other.args)
    }
}

/// Positional distance between two argument lists.
pub fn args_distance(actual: &[ValueType], declared: &[ValueType]) -> u32 {
    if actual.len() != declared.len() {
        return INCOMPATIBLE;
    }
    let mut total = 0u32;
    for (a, b) in actual.iter().zip(declared) {
        let d = a.distance_to(b);
        if d == INCOMPATIBLE {
            return INCOMPATIBLE;
        }
        total += d;
    }
    total
}

/// Reference names reserved for the built-in reference types; `Object`
/// never carries one of these, so descriptors stay injective.
const RESERVED_REF_NAMES: [(&str, ValueType); 4] = [
    ("string", ValueType::String),
    ("cursor", ValueType::NodeSet),
    ("fragment", ValueType::ResultTree),
    ("object", ValueType::Reference),
];

impl ValueType {
    /// Number of local-storage units a value of this type occupies.
    /// Double-precision reals take two consecutive slots.
    pub fn slot_width(&self) -> u16 {
        match self {
            ValueType::Real => 2,
            ValueType::Void => 0,
            _ => 1,
        }
    }

    /// True for types whose machine representation is already an object
    /// reference, making box/unbox no-ops.
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            ValueType::String
                | ValueType::NodeSet
                | ValueType::ResultTree
                | ValueType::Reference
                | ValueType::Object(_)
        )
    }

    /// Stable textual descriptor for the assembly boundary.
    pub fn descriptor(&self) -> CompactString {
        match self {
            ValueType::Boolean => "Z".to_compact_string(),
            ValueType::Int => "I".to_compact_string(),
            ValueType::Real => "D".to_compact_string(),
            ValueType::Node => "N".to_compact_string(),
            ValueType::Void => "V".to_compact_string(),
            ValueType::String => "Lstring;".to_compact_string(),
            ValueType::NodeSet => "Lcursor;".to_compact_string(),
            ValueType::ResultTree => "Lfragment;".to_compact_string(),
            ValueType::Reference => "Lobject;".to_compact_string(),
            ValueType::Object(name) => {
                let mut s = CompactString::new("L");
                s.push_str(name);
                s.push(';');
                s
            }
            ValueType::Method(sig) => {
                let mut s = CompactString::new("(");
                for arg in &sig.args {
                    s.push_str(&arg.descriptor());
                }
                s.push(')');
                s.push_str(&sig.result.descriptor());
                s
            }
        }
    }

    /// Parse a descriptor back into the type it was produced from.
    /// `parse_descriptor(t.descriptor()) == t` for every representable type.
    pub fn parse_descriptor(s: &str) -> Result<ValueType, Error> {
        let (ty, rest) = parse_prefix(s)?;
        if rest.is_empty() {
            Ok(ty)
        } else {
            Err(malformed(s))
        }
    }

    /// Overload distance to `other`: 0 for the same type, 1 for the single
    /// primitive widening Int -> Real, positional sums for method
    /// signatures, incompatible otherwise. Deliberately asymmetric:
    /// Real -> Int is incompatible even though a truncating conversion
    /// rule exists.
    pub fn distance_to(&self, other: &ValueType) -> u32 {
        match (self, other) {
            (a, b) if a == b => 0,
            (ValueType::Int, ValueType::Real) => 1,
            (ValueType::Method(a), ValueType::Method(b)) => a.distance_to(b),
            _ => INCOMPATIBLE,
        }
    }
}

fn malformed(s: &str) -> Error {
    Error::new(
        crate::error::ErrorCode::DataConversion,
        format!("malformed type descriptor '{s}'"),
    )
}

/// Parse one descriptor off the front of `s`, returning the remainder.
fn parse_prefix(s: &str) -> Result<(ValueType, &str), Error> {
    let mut chars = s.chars();
    let ty = match chars.next() {
        Some('Z') => ValueType::Boolean,
        Some('I') => ValueType::Int,
        Some('D') => ValueType::Real,
        Some('N') => ValueType::Node,
        Some('V') => ValueType::Void,
        Some('L') => {
            let rest = chars.as_str();
            let end = rest.find(';').ok_or_else(|| malformed(s))?;
            let name = &rest[..end];
            if name.is_empty() {
                return Err(malformed(s));
            }
            let ty = RESERVED_REF_NAMES
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, t)| t.clone())
                .unwrap_or_else(|| ValueType::Object(name.to_compact_string()));
            return Ok((ty, &rest[end + 1..]));
        }
        Some('(') => {
            let mut rest = chars.as_str();
            let mut args = Vec::new();
            loop {
                if let Some(after) = rest.strip_prefix(')') {
                    let (result, tail) = parse_prefix(after)?;
                    let ty = ValueType::Method(Box::new(MethodType::new(result, args)));
                    return Ok((ty, tail));
                }
                if rest.is_empty() {
                    return Err(malformed(s));
                }
                let (arg, tail) = parse_prefix(rest)?;
                args.push(arg);
                rest = tail;
            }
        }
        _ => return Err(malformed(s)),
    };
    Ok((ty, chars.as_str()))
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Boolean => write!(f, "boolean"),
            ValueType::Int => write!(f, "int"),
            ValueType::Real => write!(f, "real"),
            ValueType::String => write!(f, "string"),
            ValueType::Node => write!(f, "node"),
            ValueType::NodeSet => write!(f, "node-set"),
            ValueType::ResultTree => write!(f, "result-tree"),
            ValueType::Reference => write!(f, "reference"),
            ValueType::Object(name) => write!(f, "object({name})"),
            ValueType::Void => write!(f, "void"),
            ValueType::Method(sig) => {
                write!(f, "(")?;
                for (i, arg) in sig.args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ") -> {}", sig.result)
            }
        }
    }
}

/// Pick the unique minimum-distance candidate for `args`.
///
/// Returns the candidate index. No finite candidate, or a tie for the
/// minimum, is an overload-resolution failure; this layer reports the tie
/// and never arbitrates it.
pub fn resolve_overload(args: &[ValueType], candidates: &[MethodType]) -> Result<usize, Error> {
    let mut best: Option<(usize, u32)> = None;
    let mut tied: Vec<usize> = Vec::new();
    for (i, cand) in candidates.iter().enumerate() {
        let d = args_distance(args, &cand.args);
        if d == INCOMPATIBLE {
            continue;
        }
        match best {
            None => {
                best = Some((i, d));
                tied.clear();
            }
            Some((_, bd)) if d < bd => {
                best = Some((i, d));
                tied.clear();
            }
            Some((bi, bd)) if d == bd => {
                if tied.is_empty() {
                    tied.push(bi);
                }
                tied.push(i);
            }
            Some(_) => {}
        }
    }
    match best {
        None => Err(Error::overload(format!(
            "no candidate signature accepts ({})",
            display_list(args)
        ))),
        Some((i, _)) if tied.is_empty() => Ok(i),
        Some(_) => Err(Error::overload(format!(
            "ambiguous call for ({}): candidates {:?} tie for minimum distance",
            display_list(args),
            tied
        ))),
    }
}

fn display_list(types: &[ValueType]) -> String {
    let mut out = String::new();
    for (i, t) in types.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&t.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths() {
        assert_eq!(ValueType::Real.slot_width(), 2);
        assert_eq!(ValueType::Int.slot_width(), 1);
        assert_eq!(ValueType::Void.slot_width(), 0);
    }

    #[test]
    fn reserved_names_parse_to_builtins() {
        assert_eq!(
            ValueType::parse_descriptor("Lcursor;").unwrap(),
            ValueType::NodeSet
        );
        assert_eq!(
            ValueType::parse_descriptor("Lcom.example.Widget;").unwrap(),
            ValueType::Object("com.example.Widget".into())
        );
    }

    #[test]
    fn nested_method_descriptor() {
        let inner = ValueType::Method(Box::new(MethodType::new(
            ValueType::Real,
            vec![ValueType::Int],
        )));
        let outer = ValueType::Method(Box::new(MethodType::new(
            ValueType::Void,
            vec![inner.clone(), ValueType::String],
        )));
        let d = outer.descriptor();
        assert_eq!(d, "((I)DLstring;)V");
        assert_eq!(ValueType::parse_descriptor(&d).unwrap(), outer);
    }

    #[test]
    fn malformed_descriptors_rejected() {
        for bad in ["", "Q", "L;", "Lstring", "(I", "(I)ZX"] {
            assert!(ValueType::parse_descriptor(bad).is_err(), "{bad}");
        }
    }
}
