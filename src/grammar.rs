//! Grammar engine: a context-free grammar compiler and a leftmost
//! derivation engine that rewrites a start symbol down to terminal text.
//!
//! ```text
//! grammar file ──▶ GrammarCompiler::parse ──▶ Grammar (productions map)
//!                                                    │
//!                          GrammarEngine::new(Grammar, state, seed)
//!                                                    │
//!                                          generate(start_symbol)
//!                                                    │
//!                      leftmost-nonterminal rewrite loop, one splice per pass:
//!                        <Symbol>       -> random production body
//!                        <@var>        -> state[var] (error if unbound)
//!                        <Symbol @var>  -> <$begin var> body <$end var>,
//!                                          later collapsed and captured into
//!                                          state[var] once its body is all
//!                                          terminal text
//! ```
//!
//! A grammar file line is `head -> body1|body2|...$corpusfile|...`; a `$name`
//! alternate is replaced by every line of the corpus file `name` (resolved
//! relative to the engine's corpus directory), each itself parsed as a rule
//! body.

use std::collections::HashMap;
use std::path::Path;

use log::{debug, trace};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::engine::EngineSeed;
use crate::error::{MythosError, Result};

/// One element of a production rule's body, or a node that appears only in
/// an in-progress derivation (`BeginWrite`/`EndWrite`).
#[derive(Debug, Clone, PartialEq, Eq)]
enum DerivationNode {
    Terminal(String),
    Symbol(String),
    Variable(String),
    /// `<Symbol @var>`: rewrite `Symbol`, then capture its fully-terminal
    /// expansion into state variable `var`.
    WriteDirective { symbol: String, var: String },
    BeginWrite(String),
    EndWrite(String),
}

impl DerivationNode {
    fn is_pending(&self) -> bool {
        !matches!(self, DerivationNode::Terminal(_))
    }
}

/// A compiled grammar: every nonterminal's production bodies, keyed by name.
/// Validated so that every nonterminal referenced anywhere has at least one
/// production.
#[derive(Debug, Clone, Default)]
pub struct Grammar {
    productions: HashMap<String, Vec<Vec<DerivationNode>>>,
}

impl Grammar {
    pub fn has_symbol(&self, name: &str) -> bool {
        self.productions.contains_key(name)
    }

    pub fn symbol_names(&self) -> Vec<&str> {
        self.productions.keys().map(String::as_str).collect()
    }

    fn rewrite(&self, name: &str, rng: &mut StdRng) -> Option<Vec<DerivationNode>> {
        self.productions.get(name).and_then(|bodies| bodies.choose(rng)).cloned()
    }
}

pub struct GrammarCompiler;

impl GrammarCompiler {
    /// Parse a grammar file. `corpus_dir` is where `$name` corpus-inclusion
    /// alternates are resolved.
    pub fn parse(text: &str, corpus_dir: &Path) -> Result<Grammar> {
        let mut productions: HashMap<String, Vec<Vec<DerivationNode>>> = HashMap::new();

        for raw_line in text.split('\n') {
            let line = raw_line.trim_start();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (head, bodies_str) = line.split_once("->").ok_or_else(|| {
                MythosError::parse(format!("malformed rule definition (no '->' delimiter): '{line}'"))
            })?;
            if bodies_str.matches('<').count() != bodies_str.matches('>').count() {
                return Err(MythosError::parse(format!("rule definition has mismatched angle brackets: '{line}'")));
            }
            let head = Self::strip_symbol_brackets(head.trim());
            let bodies_str = bodies_str.trim();
            if head.is_empty() {
                return Err(MythosError::parse(format!("rule definition includes no rule head: '{line}'")));
            }
            if bodies_str.is_empty() {
                return Err(MythosError::parse(format!("rule definition includes no rule bodies: '{line}'")));
            }
            productions.entry(head.to_string()).or_default();

            for raw_body in bodies_str.split('|') {
                if let Some(corpus_filename) = raw_body.strip_prefix('$') {
                    for corpus_line in Self::load_corpus(corpus_dir, corpus_filename)? {
                        let body = Self::parse_body(&corpus_line, &mut productions)?;
                        productions.get_mut(head).expect("just inserted").push(body);
                    }
                } else {
                    let body = Self::parse_body(raw_body, &mut productions)?;
                    productions.get_mut(head).expect("just inserted").push(body);
                }
            }
        }

        let grammar = Grammar { productions };
        Self::validate(&grammar)?;
        debug!("grammar compiler parsed {} nonterminal symbols", grammar.productions.len());
        Ok(grammar)
    }

    /// Authors commonly write a rule head the same way it's referenced
    /// elsewhere in the file (`<Briefing> -> ...`), even though the bare
    /// name is what every in-body reference resolves to once `<`/`>` are
    /// stripped off by `parse_reference`. Strip one enclosing pair here too,
    /// so a bracketed head and a reference to it land under the same key.
    fn strip_symbol_brackets(head: &str) -> &str {
        head.strip_prefix('<').and_then(|h| h.strip_suffix('>')).map(str::trim).unwrap_or(head)
    }

    fn load_corpus(corpus_dir: &Path, filename: &str) -> Result<Vec<String>> {
        let contents = std::fs::read_to_string(corpus_dir.join(filename))?;
        Ok(contents.split('\n').map(str::to_string).collect())
    }

    /// Parse a single rule-body string into its derivation nodes,
    /// registering any referenced nonterminal with `productions` (with an
    /// empty body list, if not already present) so `validate` can catch
    /// symbols that are referenced but never given a production.
    fn parse_body(body_str: &str, productions: &mut HashMap<String, Vec<Vec<DerivationNode>>>) -> Result<Vec<DerivationNode>> {
        let mut nodes = Vec::new();
        let mut terminal = String::new();
        let mut chars = body_str.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '<' {
                if !terminal.is_empty() {
                    nodes.push(DerivationNode::Terminal(std::mem::take(&mut terminal)));
                }
                let mut reference = String::new();
                for c2 in chars.by_ref() {
                    if c2 == '>' {
                        break;
                    }
                    reference.push(c2);
                }
                nodes.push(Self::parse_reference(&reference, productions)?);
            } else {
                terminal.push(c);
            }
        }
        if !terminal.is_empty() {
            nodes.push(DerivationNode::Terminal(terminal));
        }
        Ok(nodes)
    }

    fn parse_reference(reference: &str, productions: &mut HashMap<String, Vec<Vec<DerivationNode>>>) -> Result<DerivationNode> {
        let at_count = reference.matches('@').count();
        let (symbol, variable) = if at_count == 1 {
            let (symbol, variable) = reference.split_once('@').expect("exactly one '@'");
            let symbol = symbol.trim();
            (if symbol.is_empty() { None } else { Some(symbol.to_string()) }, Some(variable.to_string()))
        } else {
            let symbol = reference.trim();
            (if symbol.is_empty() { None } else { Some(symbol.to_string()) }, None)
        };

        match (symbol, variable) {
            (None, Some(var)) => Ok(DerivationNode::Variable(var)),
            (Some(symbol), Some(var)) => {
                productions.entry(symbol.clone()).or_default();
                Ok(DerivationNode::WriteDirective { symbol, var })
            }
            (Some(symbol), None) => {
                productions.entry(symbol.clone()).or_default();
                Ok(DerivationNode::Symbol(symbol))
            }
            (None, None) => Err(MythosError::parse(format!("empty '<...>' reference: '<{reference}>'"))),
        }
    }

    fn validate(grammar: &Grammar) -> Result<()> {
        for (name, bodies) in &grammar.productions {
            if bodies.is_empty() {
                return Err(MythosError::validation(format!(
                    "the following nonterminal symbol has no production rules: '{name}'"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GrammarEngineOptions {
    pub seed: EngineSeed,
}

/// Driver over a compiled `Grammar`: owns the mutable write-state map and
/// its own RNG, independent of any `RuleEngine`'s.
pub struct GrammarEngine {
    grammar: Grammar,
    state: HashMap<String, String>,
    rng: StdRng,
}

impl GrammarEngine {
    pub fn new(grammar: Grammar, initial_state: HashMap<String, String>, options: GrammarEngineOptions) -> Self {
        GrammarEngine { grammar, state: initial_state, rng: options.seed.into_rng() }
    }

    pub fn from_source(
        text: &str,
        corpus_dir: &Path,
        initial_state: HashMap<String, String>,
        options: GrammarEngineOptions,
    ) -> Result<Self> {
        let grammar = GrammarCompiler::parse(text, corpus_dir)?;
        Ok(Self::new(grammar, initial_state, options))
    }

    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    pub fn set_state(&mut self, variable_name: impl Into<String>, value: impl Into<String>) {
        let (variable_name, value) = (variable_name.into(), value.into());
        trace!("set state variable '{variable_name}' to '{value}'");
        self.state.insert(variable_name, value);
    }

    pub fn clear_state(&mut self) {
        self.state.clear();
    }

    pub fn export_state(&self) -> HashMap<String, String> {
        self.state.clone()
    }

    /// A human-readable rendering of the current state, for callers that
    /// want to print or log it (the engine itself never writes to stdout).
    pub fn inspect_state(&self) -> String {
        if self.state.is_empty() {
            return "engine state: (empty)".to_string();
        }
        let mut pairs: Vec<_> = self.state.iter().collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0));
        let mut out = String::from("engine state:\n");
        for (key, value) in pairs {
            out.push_str(&format!("  * {key}: {value}\n"));
        }
        out
    }

    /// Rewrite `start_symbol_name` down to terminal text.
    pub fn generate(&mut self, start_symbol_name: &str, debug: bool) -> Result<String> {
        if !self.grammar.has_symbol(start_symbol_name) {
            let mut names = self.grammar.symbol_names();
            names.sort_unstable();
            return Err(MythosError::runtime(format!(
                "there is no defined nonterminal symbol with the name {start_symbol_name}. \
                 these nonterminal symbols are defined: {}",
                names.join(", ")
            )));
        }
        if debug {
            trace!("{}", self.inspect_state());
            trace!("<{start_symbol_name}>");
        }

        let mut derivation = vec![DerivationNode::Symbol(start_symbol_name.to_string())];
        while derivation.iter().any(DerivationNode::is_pending) {
            self.rewrite_leftmost(&mut derivation)?;
            if debug {
                trace!("{}", Self::render(&derivation));
            }
        }
        Ok(Self::render(&derivation))
    }

    /// Scan left to right and act on the first element that can be acted on
    /// (a plain `Terminal` or an as-yet-unmatched `BeginWrite` marker is
    /// skipped over, mirroring the source's scan-then-break loop).
    fn rewrite_leftmost(&mut self, derivation: &mut Vec<DerivationNode>) -> Result<()> {
        for idx in 0..derivation.len() {
            match &derivation[idx] {
                DerivationNode::Symbol(name) => {
                    let name = name.clone();
                    let body = self.grammar.rewrite(&name, &mut self.rng).expect("validated grammar has a production");
                    derivation.splice(idx..=idx, body);
                    return Ok(());
                }
                DerivationNode::Variable(name) => {
                    let value = self
                        .state
                        .get(name)
                        .ok_or_else(|| MythosError::runtime(format!("encountered undefined state variable: '{name}'")))?
                        .clone();
                    derivation[idx] = DerivationNode::Terminal(value);
                    return Ok(());
                }
                DerivationNode::WriteDirective { symbol, var } => {
                    let (symbol, var) = (symbol.clone(), var.clone());
                    let body = self.grammar.rewrite(&symbol, &mut self.rng).expect("validated grammar has a production");
                    let mut replacement = vec![DerivationNode::BeginWrite(var.clone())];
                    replacement.extend(body);
                    replacement.push(DerivationNode::EndWrite(var));
                    derivation.splice(idx..=idx, replacement);
                    return Ok(());
                }
                DerivationNode::EndWrite(var) => {
                    let var = var.clone();
                    let begin_idx = derivation[..idx]
                        .iter()
                        .rposition(|n| matches!(n, DerivationNode::BeginWrite(v) if v == &var))
                        .expect("every EndWrite has a matching BeginWrite");
                    let mut value = String::new();
                    for node in &derivation[begin_idx + 1..idx] {
                        if let DerivationNode::Terminal(s) = node {
                            value.push_str(s);
                        }
                    }
                    self.set_state(var, value);
                    derivation[begin_idx] = DerivationNode::Terminal(String::new());
                    derivation[idx] = DerivationNode::Terminal(String::new());
                    return Ok(());
                }
                DerivationNode::BeginWrite(_) | DerivationNode::Terminal(_) => continue,
            }
        }
        Ok(())
    }

    fn render(derivation: &[DerivationNode]) -> String {
        let mut out = String::new();
        for node in derivation {
            if let DerivationNode::Terminal(s) = node {
                out.push_str(s);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(text: &str) -> Grammar {
        GrammarCompiler::parse(text, Path::new("/nonexistent")).unwrap()
    }

    #[test]
    fn parses_a_simple_grammar_and_generates_terminal_text() {
        let grammar = compile("<GREETING> -> hello there|hi there\n");
        let mut engine = GrammarEngine::new(grammar, HashMap::new(), GrammarEngineOptions { seed: EngineSeed::Seeded(1) });
        let output = engine.generate("GREETING", false).unwrap();
        assert!(output == "hello there" || output == "hi there");
    }

    #[test]
    fn rewrites_nonterminal_references_left_to_right() {
        let grammar = compile("<SENTENCE> -> <SUBJECT> waved.\n<SUBJECT> -> she|he\n");
        let mut engine = GrammarEngine::new(grammar, HashMap::new(), GrammarEngineOptions { seed: EngineSeed::Seeded(7) });
        let output = engine.generate("SENTENCE", false).unwrap();
        assert!(output == "she waved." || output == "he waved.");
    }

    #[test]
    fn write_state_scenario_captures_the_rewritten_subtree_and_leaves_no_markers() {
        let grammar = compile("<STORY> -> <NAME @hero> later, <@hero> returned.\n<NAME> -> Alex|Sam\n");
        let mut engine = GrammarEngine::new(grammar, HashMap::new(), GrammarEngineOptions { seed: EngineSeed::Seeded(3) });
        let output = engine.generate("STORY", false).unwrap();
        assert!(!output.contains("<$"));
        assert!(output.contains("later,"));
        let hero = engine.export_state().get("hero").cloned().unwrap();
        assert!(hero == "Alex" || hero == "Sam");
        assert!(output.starts_with(&hero));
        assert!(output.ends_with(&format!("{hero} returned.")));
    }

    #[test]
    fn variable_reference_resolves_from_preset_state() {
        let grammar = compile("<GREETING> -> hello, <@name>.\n");
        let mut state = HashMap::new();
        state.insert("name".to_string(), "Nyx".to_string());
        let mut engine = GrammarEngine::new(grammar, state, GrammarEngineOptions { seed: EngineSeed::Seeded(1) });
        assert_eq!(engine.generate("GREETING", false).unwrap(), "hello, Nyx.");
    }

    #[test]
    fn undefined_variable_reference_is_a_runtime_error() {
        let grammar = compile("<GREETING> -> hello, <@name>.\n");
        let mut engine = GrammarEngine::new(grammar, HashMap::new(), GrammarEngineOptions { seed: EngineSeed::Seeded(1) });
        assert!(engine.generate("GREETING", false).is_err());
    }

    #[test]
    fn write_directive_target_resolves_under_the_same_key_as_its_own_bracketed_head() {
        let grammar = compile("<ECHO> -> <CALLER @speaker> said it: <@speaker>.\n<CALLER> -> the baker|the clerk\n");
        let mut engine = GrammarEngine::new(grammar, HashMap::new(), GrammarEngineOptions { seed: EngineSeed::Seeded(2) });
        let output = engine.generate("ECHO", false).unwrap();
        assert!(output.contains("said it:"));
        let speaker = engine.export_state().get("speaker").cloned().unwrap();
        assert!(output.ends_with(&format!("{speaker}.")));
    }

    #[test]
    fn rejects_symbol_with_no_production_rules() {
        let text = "<SENTENCE> -> <SUBJECT> waved.\n";
        assert!(GrammarCompiler::parse(text, Path::new("/nonexistent")).is_err());
    }

    #[test]
    fn rejects_missing_arrow_delimiter() {
        assert!(GrammarCompiler::parse("<GREETING> hello\n", Path::new("/nonexistent")).is_err());
    }

    #[test]
    fn rejects_mismatched_angle_brackets() {
        assert!(GrammarCompiler::parse("<GREETING> -> hello <NAME\n", Path::new("/nonexistent")).is_err());
    }

    #[test]
    fn unknown_start_symbol_is_a_runtime_error() {
        let grammar = compile("<GREETING> -> hello\n");
        let mut engine = GrammarEngine::new(grammar, HashMap::new(), GrammarEngineOptions { seed: EngineSeed::Seeded(1) });
        assert!(engine.generate("NOPE", false).is_err());
    }

    #[test]
    fn seeded_generation_is_deterministic() {
        let build = || compile("<PICK> -> a|b|c|d|e\n");
        let mut e1 = GrammarEngine::new(build(), HashMap::new(), GrammarEngineOptions { seed: EngineSeed::Seeded(99) });
        let mut e2 = GrammarEngine::new(build(), HashMap::new(), GrammarEngineOptions { seed: EngineSeed::Seeded(99) });
        assert_eq!(e1.generate("PICK", false).unwrap(), e2.generate("PICK", false).unwrap());
    }
}
