use thiserror::Error;

use crate::token::Span;

/// What a static scope error is about. Carried alongside the rendered
/// message so tests and tools can match without string comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeErrorKind {
    DuplicateDeclaration,
    SelfReferencingInitializer,
    UnusedLocalVariable,
    ReturnOutsideFunction,
    ReturnFromInitializer,
    ClassInheritsSelf,
    ThisOutsideClass,
    SuperOutsideClass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    TypeMismatch,
    UnresolvedVariable,
    NotCallable,
    ArityMismatch,
    NoSuchProperty,
    InvalidSuperclass,
    StackExhausted,
    /// A host function reported a failure of its own.
    NativeFailure,
}

#[derive(Debug, Error)]
pub enum RillError {
    #[error("i/o error")]
    Io(#[from] std::io::Error),

    #[error("syntax error")]
    Scan { message: String, span: Span },

    #[error("syntax error")]
    Parse { message: String, span: Span },

    #[error("scope error")]
    Scope {
        kind: ScopeErrorKind,
        message: String,
        span: Span,
    },

    #[error("runtime error")]
    Runtime {
        kind: RuntimeErrorKind,
        message: String,
        span: Span,
    },

    #[error("invalid program image")]
    Image(#[from] serde_json::Error),

    #[error("unsupported program image version {found}, expected {expected}")]
    ImageVersion { found: u32, expected: u32 },
}

impl RillError {
    /// The source span this error points at, when it has one.
    pub fn span(&self) -> Option<Span> {
        match self {
            RillError::Scan { span, .. }
            | RillError::Parse { span, .. }
            | RillError::Scope { span, .. }
            | RillError::Runtime { span, .. } => Some(span.clone()),
            RillError::Io(_) | RillError::Image(_) | RillError::ImageVersion { .. } => None,
        }
    }

    /// The detail message shown under the span label.
    pub fn detail(&self) -> String {
        match self {
            RillError::Scan { message, .. }
            | RillError::Parse { message, .. }
            | RillError::Scope { message, .. }
            | RillError::Runtime { message, .. } => message.clone(),
            RillError::Io(e) => e.to_string(),
            RillError::Image(e) => e.to_string(),
            RillError::ImageVersion { .. } => self.to_string(),
        }
    }
}
