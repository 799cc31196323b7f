// Error values.
//
// A raised problem in this interpreter is *data* first: an ErrorValue
// that can travel inside a cell (as the error antiform), be inspected,
// stored, or re-raised. Only the trampoline's rescue boundary ever deals
// in host-language panics, and it immediately converts them back into
// these values.

use std::fmt;

use thiserror::Error;


// Machine-readable identity of an error, independent of its message.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum ErrorId {
    #[error("cell is not in a liftable form")]
    InvalidLift,
    #[error("token split across variadic text chunks")]
    ScanSplitToken,
    #[error("missing closing delimiter")]
    MissingClose,
    #[error("unrecognized token")]
    BadToken,
    #[error("word is not bound to any context")]
    NotBound,
    #[error("word is unset (tripwire)")]
    Unset,
    #[error("unstable antiform cannot be stored in a variable")]
    UnstableAssign,
    #[error("antiform cannot be stored in a list")]
    AntiformInArray,
    #[error("argument does not match parameter's type spec")]
    TypeCheck,
    #[error("result does not match return spec")]
    ReturnTypeCheck,
    #[error("expression produced no value where one was needed")]
    NeedValue,
    #[error("not enough arguments for action")]
    ArityShort,
    #[error("too many expressions in strict apply block")]
    ApplyTooMany,
    #[error("no parameter with that name")]
    BadRefinement,
    #[error("locals (return, output) cannot be specialized")]
    LocalSpecialized,
    #[error("value is not an action")]
    NotAnAction,
    #[error("arithmetic overflow")]
    Overflow,
    #[error("data stack limit exceeded")]
    StackOverflow,
    #[error("no running level matches the unwind target")]
    NoLevelToUnwind,
    #[error("stepping is not supported over this value")]
    UnsupportedEvalStep,
    #[error("raised error was not observed")]
    UnhandledError,
    #[error("evaluation was halted")]
    Halted,
    #[error("out of memory")]
    OutOfMemory,
    #[error("repossession size exceeds allocated capacity")]
    RepossessTooBig,
    #[error("abrupt host failure")]
    AbruptPanic,
    #[error("internal invariant violated")]
    Internal,
}


// The error payload carried by error antiforms and warning elements.
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorValue {
    pub id: ErrorId,
    pub message: String,
    // Rendering of the nearest source the evaluator was looking at.
    pub near: Option<String>,
}


impl ErrorValue {
    pub fn new(id: ErrorId, message: impl Into<String>) -> ErrorValue {
        ErrorValue { id, message: message.into(), near: None }
    }

    pub fn bare(id: ErrorId) -> ErrorValue {
        ErrorValue { id, message: id.to_string(), near: None }
    }

    pub fn with_near(mut self, near: impl Into<String>) -> ErrorValue {
        self.near = Some(near.into());
        self
    }
}


impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(near) = &self.near {
            write!(f, " (near: {})", near)?;
        }
        Ok(())
    }
}


// Result alias used across the core where an operation can raise.
pub type Raised<T> = core::result::Result<T, ErrorValue>;


// Shortcut constructors for the errors the core raises most.

pub fn invalid_lift() -> ErrorValue {
    ErrorValue::bare(ErrorId::InvalidLift)
}

pub fn not_bound(name: &str) -> ErrorValue {
    ErrorValue::new(ErrorId::NotBound, format!("{} is not bound", name))
}

pub fn unset(name: &str) -> ErrorValue {
    ErrorValue::new(ErrorId::Unset, format!("{} is unset", name))
}

pub fn type_check(label: &str, key: &str, detail: &str) -> ErrorValue {
    ErrorValue::new(
        ErrorId::TypeCheck,
        format!("{} argument {}: {}", label, key, detail)
    )
}

pub fn arity_short(label: &str, key: &str) -> ErrorValue {
    ErrorValue::new(
        ErrorId::ArityShort,
        format!("{} is missing its {} argument", label, key)
    )
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_near() {
        let e = ErrorValue::bare(ErrorId::NotBound).with_near("foo + 1");
        let text = format!("{}", e);
        assert!(text.contains("near: foo + 1"));
    }

    #[test]
    fn test_ids_are_comparable() {
        assert_eq!(ErrorValue::bare(ErrorId::Overflow).id, ErrorId::Overflow);
        assert_ne!(ErrorId::Overflow, ErrorId::StackOverflow);
    }
}
