//! `mythos`: an authoring runtime for procedurally generated narrative
//! artifacts, built from two cooperating engines.
//!
//! - The **rule engine** ([`engine`]) forward-chains over a working-memory
//!   fact base ([`memory`]): it repeatedly selects rules whose
//!   preconditions hold, binds their roles to entities, fires them to
//!   produce [`types::Action`]s, and updates facts.
//! - The **grammar engine** ([`grammar`]) expands a context-free grammar
//!   with write-through state variables into prose for each action.
//!
//! Both engines are fed by small textual DSL compilers ([`domain`],
//! [`rule_compiler`], and the compiler half of [`grammar`]) over the shared
//! value types in [`types`]. [`document`] is the typed boundary to an
//! external typeset-document generator; this crate emits no documents
//! itself.
//!
//! ```text
//! domain file ──▶ DomainCompiler ──▶ Domain, initial facts ──┐
//! rules file  ──▶ RuleCompiler   ──▶ Vec<Rule>        ────────┼──▶ RuleEngine::execute(n)
//!                                                              │        │
//!                                                              ▼        ▼
//!                                                  WorkingMemory    Vec<Action>
//!
//! grammar file ─▶ GrammarCompiler ─▶ Grammar ──▶ GrammarEngine::generate(symbol)
//!                                                       │
//!                                                       ▼
//!                                                  prose string ──▶ DocumentSink
//! ```
//!
//! A driver (out of scope for this crate) wires the two engines together:
//! for each fired [`types::Action`], it pushes the action's role bindings
//! into the grammar engine's state and generates a symbol named after the
//! action, then hands the resulting prose to a [`document::DocumentSink`].
//! `src/bin/mystery_demo.rs` is a worked example of exactly that.

mod document;
mod domain;
mod engine;
mod error;
mod grammar;
mod lexer;
mod memory;
mod rule_compiler;
mod types;

pub use document::{Alignment, ColorName, DocumentSink, FlowItem, ImageScale, Margins, PageSize, RecordingSink, Style};
pub use domain::{Domain, DomainCompiler};
pub use engine::{EngineSeed, RuleEngine, RuleEngineOptions};
pub use error::{MythosError, Result};
pub use grammar::{Grammar, GrammarCompiler, GrammarEngine, GrammarEngineOptions};
pub use memory::WorkingMemory;
pub use rule_compiler::RuleCompiler;
pub use types::{
    Action, Condition, Effect, Entity, Fact, OrExpression, Predicate, ResponseAction, Role, Rule, TemplateElement,
    TernaryExpression,
};
