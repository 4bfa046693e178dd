//! Error types and reporting
//!
//! Checking is fail-fast: the first error aborts the whole pass, since
//! the abstract stack is not guaranteed sound after a mismatch. Every
//! error carries the offending op's location where one exists.

use crate::ir::Loc;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, CheckError>;

/// Type-checking error
#[derive(Debug, Error)]
pub enum CheckError {
    /// Too few operands, or an operand of the wrong type
    #[error("Stack error at {loc}: {message}")]
    StackShape { message: String, loc: Loc },

    /// Branch arms or a loop body left the stack in irreconcilable shapes
    #[error("Control flow error at {loc}: {message}")]
    RouteMerge { message: String, loc: Loc },

    /// Unknown field, method, or operator overload
    #[error("Name error at {loc}: {message}")]
    NameResolution { message: String, loc: Loc },

    /// A declared type variable has no binding at instantiation time
    #[error("Generic error at {loc}: {message}")]
    GenericResolution { message: String, loc: Loc },

    /// Size taken of a wildcard or unresolved type
    #[error("Layout error: {message}")]
    Layout { message: String },

    /// The configured struct allocator is missing or malformed
    #[error("Allocator error: {message}")]
    Allocator { message: String },
}

impl CheckError {
    pub fn stack_shape(message: impl Into<String>, loc: &Loc) -> Self {
        Self::StackShape {
            message: message.into(),
            loc: loc.clone(),
        }
    }

    pub fn route_merge(message: impl Into<String>, loc: &Loc) -> Self {
        Self::RouteMerge {
            message: message.into(),
            loc: loc.clone(),
        }
    }

    pub fn name_resolution(message: impl Into<String>, loc: &Loc) -> Self {
        Self::NameResolution {
            message: message.into(),
            loc: loc.clone(),
        }
    }

    pub fn generic_resolution(message: impl Into<String>, loc: &Loc) -> Self {
        Self::GenericResolution {
            message: message.into(),
            loc: loc.clone(),
        }
    }

    pub fn layout(message: impl Into<String>) -> Self {
        Self::Layout {
            message: message.into(),
        }
    }

    pub fn allocator(message: impl Into<String>) -> Self {
        Self::Allocator {
            message: message.into(),
        }
    }

    pub fn loc(&self) -> Option<&Loc> {
        match self {
            Self::StackShape { loc, .. } => Some(loc),
            Self::RouteMerge { loc, .. } => Some(loc),
            Self::NameResolution { loc, .. } => Some(loc),
            Self::GenericResolution { loc, .. } => Some(loc),
            Self::Layout { .. } | Self::Allocator { .. } => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::StackShape { message, .. } => message,
            Self::RouteMerge { message, .. } => message,
            Self::NameResolution { message, .. } => message,
            Self::GenericResolution { message, .. } => message,
            Self::Layout { message } => message,
            Self::Allocator { message } => message,
        }
    }
}

/// Report an error with ariadne against the offending source file.
pub fn report_error(filename: &str, source: &str, error: &CheckError) {
    use ariadne::{Color, Label, Report, ReportKind, Source};

    let kind = match error {
        CheckError::StackShape { .. } => "Stack",
        CheckError::RouteMerge { .. } => "Control flow",
        CheckError::NameResolution { .. } => "Name",
        CheckError::GenericResolution { .. } => "Generic",
        CheckError::Layout { .. } => "Layout",
        CheckError::Allocator { .. } => "Allocator",
    };

    if let Some(loc) = error.loc() {
        let span = loc.span;
        Report::build(ReportKind::Error, (filename, span.start..span.end))
            .with_message(format!("{kind} error"))
            .with_label(
                Label::new((filename, span.start..span.end))
                    .with_message(error.message())
                    .with_color(Color::Red),
            )
            .finish()
            .print((filename, Source::from(source)))
            .unwrap();
    } else {
        Report::build(ReportKind::Error, (filename, 0..0))
            .with_message(format!("{kind} error: {}", error.message()))
            .finish()
            .print((filename, Source::from(source)))
            .unwrap();
    }
}
