//! Crate-wide error taxonomy.
//!
//! Every fallible entry point into the domain compiler, rule compiler,
//! working memory, rule engine, and grammar engine returns a `Result<T,
//! MythosError>`. The variants mirror the five error classes the DSLs can
//! raise: malformed source text, cross-reference failures caught only after
//! a full parse, lookups that fail at runtime, unreadable backing files, and
//! the one kind of caller misuse that can't be ruled out by the type system
//! (feeding the grammar engine a non-string initial state through a generic
//! map).
//!
//! Parse and validation errors always quote the offending source line or
//! definition so the author can find the mistake without re-reading the
//! whole file.

use thiserror::Error;

/// The single error type returned by every compiler and engine in this crate.
#[derive(Debug, Error)]
pub enum MythosError {
    /// Malformed domain, rules, or grammar source text: unbalanced brackets,
    /// missing section markers, a missing `->` or `:` delimiter, a duplicate
    /// name, or a reserved identifier used where it isn't allowed.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// A cross-reference failure caught only after a full parse: an unknown
    /// response-action target, an unbound required role, an undefined
    /// grammar nonterminal, or a role reference that resolves to nothing.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A failure that can only be detected at run time: `generate()` hit an
    /// undefined nonterminal or state variable, or a debug lookup asked for
    /// a rule or entity that doesn't exist.
    #[error("runtime error: {message}")]
    Runtime { message: String },

    /// A backing file for a domain, rules, grammar, or corpus source could
    /// not be read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The grammar engine's initial state was not a string-to-string
    /// mapping. Unreachable through this crate's typed constructors; kept
    /// for parity with the documented taxonomy for callers who build state
    /// from an untyped source.
    #[error("programmer error: {message}")]
    Programmer { message: String },
}

impl MythosError {
    pub(crate) fn parse(message: impl Into<String>) -> Self {
        MythosError::Parse { message: message.into() }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        MythosError::Validation { message: message.into() }
    }

    pub(crate) fn runtime(message: impl Into<String>) -> Self {
        MythosError::Runtime { message: message.into() }
    }
}

pub type Result<T> = std::result::Result<T, MythosError>;
