//! Cont compiler middle end
//!
//! Consumes the flat op sequence produced by the parser, runs a single
//! left-to-right abstract-interpretation pass over it, and hands the
//! rewritten, type-annotated ops to the code generators.

pub mod check;
pub mod config;
pub mod error;
pub mod ir;
pub mod types;
pub mod util;

pub use check::type_check;
pub use config::{Config, Target};
pub use error::{CheckError, Result};
pub use ir::{Loc, Span};
