//! Structured error codes for the code generation backend.
//!
//! The backend never formats user-facing diagnostics itself; an [`Error`]
//! is the structured report handed to the surrounding compiler's
//! diagnostics collaborator, which localizes it and decides whether the
//! overall compilation continues.

use core::fmt;

use crate::types::ValueType;

/// Canonicalized set of error codes emitted by the backend.
///
/// Codes split into two classes: stylesheet-facing errors (the input asked
/// for something the type lattice does not define) and internal defects
/// (the compiler itself misused an invariant). Use [`ErrorCode::is_internal`]
/// to tell them apart instead of matching raw strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Requested conversion pair undefined, or a host-descriptor mapping
    /// undefined. Always fatal to the current compile unit.
    DataConversion,
    /// No candidate signature matched, or several tied for the minimum
    /// distance. Tie-breaking is the caller's policy; the tie is reported.
    OverloadResolution,
    /// Release of an untracked slot range, or an overlap detected in the
    /// occupied-range table.
    AllocatorInvariant,
    /// A pending branch never backpatched at finalization time, or a
    /// branch backpatched twice.
    UnresolvedBranch,
    /// A capability was requested that the procedure kind does not offer,
    /// or the reference evaluator hit malformed code.
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::DataConversion => "DATA_CONVERSION_ERR",
            ErrorCode::OverloadResolution => "OVERLOAD_RESOLUTION_ERR",
            ErrorCode::AllocatorInvariant => "ALLOCATOR_INVARIANT_ERR",
            ErrorCode::UnresolvedBranch => "UNRESOLVED_BRANCH_ERR",
            ErrorCode::Internal => "INTERNAL_ERR",
        }
    }

    pub fn from_code(s: &str) -> Option<Self> {
        match s {
            "DATA_CONVERSION_ERR" => Some(ErrorCode::DataConversion),
            "OVERLOAD_RESOLUTION_ERR" => Some(ErrorCode::OverloadResolution),
            "ALLOCATOR_INVARIANT_ERR" => Some(ErrorCode::AllocatorInvariant),
            "UNRESOLVED_BRANCH_ERR" => Some(ErrorCode::UnresolvedBranch),
            "INTERNAL_ERR" => Some(ErrorCode::Internal),
            _ => None,
        }
    }

    /// True for defects in the compiler itself, as opposed to diagnostics
    /// about the input stylesheet.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            ErrorCode::AllocatorInvariant | ErrorCode::UnresolvedBranch | ErrorCode::Internal
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of the offending construct in the source stylesheet, supplied
/// by the surrounding compiler when available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Structured error report.
///
/// `source_type`/`target_type` are populated for conversion and overload
/// failures so the collaborator can render them without re-deriving
/// context from the message text.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub source_type: Option<ValueType>,
    pub target_type: Option<ValueType>,
    pub position: Option<Position>,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        if let Some(pos) = &self.position {
            write!(f, " (at {pos})")?;
        }
        Ok(())
    }
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source_type: None,
            target_type: None,
            position: None,
        }
    }

    /// Undefined conversion pair.
    pub fn conversion(source: &ValueType, target: &ValueType) -> Self {
        Self {
            code: ErrorCode::DataConversion,
            message: format!("cannot convert {source} to {target}"),
            source_type: Some(source.clone()),
            target_type: Some(target.clone()),
            position: None,
        }
    }

    /// Undefined host-descriptor mapping.
    pub fn host_conversion(ty: &ValueType, descriptor: &str, to_host: bool) -> Self {
        let message = if to_host {
            format!("cannot pass {ty} to host as '{descriptor}'")
        } else {
            format!("cannot receive host '{descriptor}' as {ty}")
        };
        Self {
            code: ErrorCode::DataConversion,
            message,
            source_type: Some(ty.clone()),
            target_type: None,
            position: None,
        }
    }

    pub fn overload(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::OverloadResolution, message)
    }

    pub fn allocator(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AllocatorInvariant, message)
    }

    pub fn unresolved_branch(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnresolvedBranch, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_roundtrip() {
        let codes = [
            ErrorCode::DataConversion,
            ErrorCode::OverloadResolution,
            ErrorCode::AllocatorInvariant,
            ErrorCode::UnresolvedBranch,
            ErrorCode::Internal,
        ];
        for c in codes {
            assert_eq!(ErrorCode::from_code(c.as_str()), Some(c));
        }
        assert_eq!(ErrorCode::from_code("NOT_A_CODE"), None);
    }

    #[test]
    fn internal_classification() {
        assert!(!ErrorCode::DataConversion.is_internal());
        assert!(!ErrorCode::OverloadResolution.is_internal());
        assert!(ErrorCode::AllocatorInvariant.is_internal());
        assert!(ErrorCode::UnresolvedBranch.is_internal());
        assert!(ErrorCode::Internal.is_internal());
    }

    #[test]
    fn conversion_error_carries_types() {
        let e = Error::conversion(&ValueType::NodeSet, &ValueType::Int);
        assert_eq!(e.code, ErrorCode::DataConversion);
        assert_eq!(e.source_type, Some(ValueType::NodeSet));
        assert_eq!(e.target_type, Some(ValueType::Int));
    }
}
