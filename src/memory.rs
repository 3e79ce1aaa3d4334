//! Working memory: the indexed, mutable fact store the rule engine
//! reads and writes.
//!
//! Facts are bucketed by first character so a plain precondition probe
//! only has to scan the facts that could possibly match it. A `*` anywhere
//! in a grounded predicate switches that probe to a regex scan over the
//! whole store instead.

use std::collections::{HashMap, HashSet};

use log::{debug, trace};
use regex::Regex;

use crate::types::{Condition, Entity, Fact, Predicate};

#[derive(Debug, Clone, Default)]
pub struct WorkingMemory {
    facts: HashSet<Fact>,
    by_first_char: HashMap<char, Vec<Fact>>,
}

impl WorkingMemory {
    pub(crate) fn new(initial_facts: HashSet<Fact>) -> Self {
        let mut memory = WorkingMemory::default();
        for fact in initial_facts {
            // Initial facts are assumed already well-formed by the domain
            // compiler (it rejects role references outside brackets), so a
            // `*`-prefixed initial fact can't occur in practice; guard
            // anyway rather than trust that invariant silently.
            if !fact.starts_with('*') {
                memory.insert_fact(fact);
            }
        }
        memory
    }

    /// Insert a fact unconditionally, exactly as `add_grounded` does once
    /// its Kleene-star check has passed.
    fn insert_fact(&mut self, fact: Fact) {
        if self.facts.insert(fact.clone()) {
            let first = fact.chars().next().expect("facts are never empty");
            self.by_first_char.entry(first).or_default().push(fact);
        }
    }

    /// Add a pre-grounded fact directly. Rejects facts beginning with `*`
    /// (the Kleene-star marker is only meaningful inside a condition probe,
    /// never as a stored fact).
    pub fn add_grounded(&mut self, fact: impl Into<String>) -> Result<(), String> {
        let fact = fact.into();
        if fact.starts_with('*') {
            return Err(format!("grounded fact includes the Kleene star: {fact}"));
        }
        debug!("+ {fact}");
        self.insert_fact(fact);
        Ok(())
    }

    /// Ground `predicate` against `bindings` and add the result. A no-op if
    /// the predicate references an unbound optional role, or grounds to an
    /// empty string.
    pub(crate) fn add(&mut self, predicate: &Predicate, bindings: &HashMap<String, Entity>) {
        let Some(fact) = predicate.ground(bindings) else { return };
        debug!("+ {fact}");
        self.insert_fact(fact);
    }

    /// Ground `predicate` against `bindings` and remove the exact matching
    /// fact, if present. A no-op otherwise.
    pub(crate) fn delete(&mut self, predicate: &Predicate, bindings: &HashMap<String, Entity>) {
        let Some(fact) = predicate.ground(bindings) else { return };
        if self.facts.remove(&fact) {
            debug!("- {fact}");
            let first = fact.chars().next().expect("facts are never empty");
            if let Some(bucket) = self.by_first_char.get_mut(&first) {
                bucket.retain(|f| f != &fact);
            }
        }
    }

    pub fn has_fact(&self, literal: &str) -> bool {
        self.facts.contains(literal)
    }

    /// The full fact set, for callers that want to list or sort it (e.g. a
    /// driver printing a "facts" appendix, mirroring direct access to
    /// `working_memory.facts` in the original driver).
    pub fn facts(&self) -> &HashSet<Fact> {
        &self.facts
    }

    fn facts_starting_with(&self, c: char) -> &[Fact] {
        self.by_first_char.get(&c).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Evaluate a predicate, OR-expression, or negated variant against the
    /// store. An unbound optional role reference in a precondition
    /// grounds to `None` and is treated as not holding.
    pub(crate) fn holds(&self, condition: &Condition, bindings: &HashMap<String, Entity>) -> bool {
        match condition {
            Condition::Predicate(p) => self.holds_predicate(p, bindings),
            Condition::Or(or_expr) => {
                let any_holds = or_expr.conditions.iter().any(|p| self.holds_predicate(p, bindings));
                if or_expr.negated { !any_holds } else { any_holds }
            }
        }
    }

    fn holds_predicate(&self, predicate: &Predicate, bindings: &HashMap<String, Entity>) -> bool {
        let Some(grounded) = predicate.ground(bindings) else { return false };
        trace!("evaluating precondition: {grounded}");
        let matched = self.matches_any_fact(&grounded);
        if predicate.negated { !matched } else { matched }
    }

    fn matches_any_fact(&self, grounded: &str) -> bool {
        if !grounded.contains('*') {
            let first = grounded.chars().next().expect("grounded facts are never empty");
            return self.facts_starting_with(first).iter().any(|f| f == grounded);
        }
        let anchored = if grounded.starts_with('*') { format!("^.{grounded}") } else { format!("^{grounded}") };
        match Regex::new(&anchored) {
            Ok(re) => self.facts.iter().any(|f| re.is_match(f)),
            Err(err) => {
                log::warn!("'{grounded}' is not a valid regex probe ({err}); treating as no match");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Role, TemplateElement};

    fn memory(facts: &[&str]) -> WorkingMemory {
        WorkingMemory::new(facts.iter().map(|f| f.to_string()).collect())
    }

    fn literal_predicate(text: &str, negated: bool) -> Predicate {
        Predicate::new(vec![TemplateElement::Literal(text.to_string())], negated)
    }

    #[test]
    fn facts_exposes_the_full_set() {
        let mem = memory(&["alice is happy", "bob is sad"]);
        assert_eq!(mem.facts().len(), 2);
        assert!(mem.facts().contains("alice is happy"));
    }

    #[test]
    fn plain_predicate_holds_on_exact_match() {
        let mem = memory(&["alice is happy"]);
        let p = literal_predicate("alice is happy", false);
        assert!(mem.holds(&Condition::Predicate(p), &HashMap::new()));
    }

    #[test]
    fn negated_predicate_inverts_the_match() {
        let mem = memory(&["alice is happy"]);
        let present = literal_predicate("alice is happy", true);
        let absent = literal_predicate("bob is happy", true);
        assert!(!mem.holds(&Condition::Predicate(present), &HashMap::new()));
        assert!(mem.holds(&Condition::Predicate(absent), &HashMap::new()));
    }

    #[test]
    fn wildcard_probe_scans_regex_across_store() {
        let mem = memory(&["alice likes bob", "carol likes dave"]);
        let p = literal_predicate("* likes bob", false);
        assert!(mem.holds(&Condition::Predicate(p), &HashMap::new()));
    }

    #[test]
    fn or_expression_short_circuits_on_first_holding_disjunct() {
        let mem = memory(&["bob likes alice"]);
        let a = literal_predicate("alice likes bob", false);
        let b = literal_predicate("bob likes alice", false);
        let or_expr = crate::types::OrExpression { conditions: vec![a, b], negated: false };
        assert!(mem.holds(&Condition::Or(or_expr), &HashMap::new()));
    }

    #[test]
    fn negated_or_expression_holds_iff_neither_disjunct_holds() {
        // `!((X likes Y) / (Y likes X))` holds iff neither fact is present.
        let mem = memory(&[]);
        let a = literal_predicate("alice likes bob", false);
        let b = literal_predicate("bob likes alice", false);
        let or_expr = crate::types::OrExpression { conditions: vec![a, b], negated: true };
        assert!(mem.holds(&Condition::Or(or_expr), &HashMap::new()));

        let mem_with_fact = memory(&["alice likes bob"]);
        let a = literal_predicate("alice likes bob", false);
        let b = literal_predicate("bob likes alice", false);
        let or_expr = crate::types::OrExpression { conditions: vec![a, b], negated: true };
        assert!(!mem_with_fact.holds(&Condition::Or(or_expr), &HashMap::new()));
    }

    #[test]
    fn add_then_add_again_is_idempotent() {
        let mut mem = memory(&[]);
        let role = Role::required("Greeter", "Person");
        let p = Predicate::new(
            vec![TemplateElement::RoleRef(role), TemplateElement::Literal("is happy".to_string())],
            false,
        );
        let mut bindings = HashMap::new();
        bindings.insert("Greeter".to_string(), Entity::new("alice", "Person"));
        mem.add(&p, &bindings);
        let snapshot = mem.facts.clone();
        mem.add(&p, &bindings);
        assert_eq!(mem.facts, snapshot);
    }

    #[test]
    fn add_then_delete_restores_prior_state() {
        let mut mem = memory(&["bob is tired"]);
        let role = Role::required("Greeter", "Person");
        let p = Predicate::new(
            vec![TemplateElement::RoleRef(role), TemplateElement::Literal("is happy".to_string())],
            false,
        );
        let mut bindings = HashMap::new();
        bindings.insert("Greeter".to_string(), Entity::new("alice", "Person"));
        let before = mem.facts.clone();
        mem.add(&p, &bindings);
        mem.delete(&p, &bindings);
        assert_eq!(mem.facts, before);
    }

    #[test]
    fn add_is_a_no_op_for_unbound_optional_role() {
        let mut mem = memory(&[]);
        let role = Role::optional("Witness", "Person");
        let p = Predicate::new(vec![TemplateElement::RoleRef(role)], false);
        mem.add(&p, &HashMap::new());
        assert!(mem.facts.is_empty());
    }

    #[test]
    fn every_fact_is_indexed_under_its_first_character() {
        let mem = memory(&["alice is happy", "bob is tired"]);
        for fact in &mem.facts {
            let first = fact.chars().next().unwrap();
            assert!(mem.facts_starting_with(first).contains(fact));
        }
    }
}
