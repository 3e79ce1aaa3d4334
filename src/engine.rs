//! Rule engine: candidate-binding enumeration, firing, and response-
//! action chaining over a compiled rule set and a working-memory fact base.
//!
//! ```text
//!   rules file ──▶ RuleCompiler ──▶ Vec<Rule> ─┐
//!   domain file ─▶ DomainCompiler ─▶ Domain ────┼──▶ RuleEngine::new
//!                                  initial facts┘         │
//!                                                          ▼
//!                                           ┌─ execute(n) ─────────────┐
//!                                           │ 1. shuffle rules (opt.)  │
//!                                           │ 2. prune rules pool      │
//!                                           │ 3. per rule:             │
//!                                           │    enumerate candidates  │
//!                                           │    test preconditions    │
//!                                           │    draw probability      │
//!                                           │    bind optional roles   │
//!                                           │    fire → effects,       │
//!                                           │           responses     │
//!                                           └──────────────────────────┘
//! ```
//!
//! Exactly one rule fires per `execute` attempt (or none, if no rule's
//! candidates trigger, or the firing rule's probability draw fails). A
//! rule's response actions may recursively fire further rules before the
//! attempt returns.

use std::collections::{HashMap, HashSet};

use log::{debug, info, trace};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::domain::{Domain, DomainCompiler};
use crate::error::{MythosError, Result};
use crate::memory::WorkingMemory;
use crate::rule_compiler::RuleCompiler;
use crate::types::{Action, Condition, Effect, Entity, Fact, Role, Rule};

/// How an engine's RNG is seeded. Each engine owns an independent RNG, so
/// seeding the rule engine never perturbs the grammar engine's draws.
#[derive(Debug, Clone, Copy)]
pub enum EngineSeed {
    Seeded(u64),
    Entropy,
}

impl EngineSeed {
    fn into_rng(self) -> StdRng {
        match self {
            EngineSeed::Seeded(seed) => StdRng::seed_from_u64(seed),
            EngineSeed::Entropy => StdRng::from_entropy(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RuleEngineOptions {
    pub shuffle_randomly: bool,
    pub seed: EngineSeed,
}

impl Default for RuleEngineOptions {
    fn default() -> Self {
        RuleEngineOptions { shuffle_randomly: true, seed: EngineSeed::Entropy }
    }
}

pub struct RuleEngine {
    domain: Domain,
    rules: Vec<Rule>,
    memory: WorkingMemory,
    actions: Vec<Action>,
    shuffle_randomly: bool,
    rng: StdRng,
}

impl RuleEngine {
    /// Compile a domain file and a rules file and construct an engine ready
    /// to execute.
    pub fn from_sources(domain_source: &str, rules_source: &str, options: RuleEngineOptions) -> Result<Self> {
        let (domain, initial_facts) = DomainCompiler::parse(domain_source)?;
        let rules = RuleCompiler::parse(rules_source)?;
        Ok(Self::new(domain, rules, initial_facts, options))
    }

    pub(crate) fn new(domain: Domain, rules: Vec<Rule>, initial_facts: HashSet<Fact>, options: RuleEngineOptions) -> Self {
        RuleEngine {
            domain,
            rules,
            memory: WorkingMemory::new(initial_facts),
            actions: Vec::new(),
            shuffle_randomly: options.shuffle_randomly,
            rng: options.seed.into_rng(),
        }
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn memory(&self) -> &WorkingMemory {
        &self.memory
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Attempt up to `n` firings.
    pub fn execute(&mut self, n: usize) -> Result<()> {
        trace!("attempting to execute up to {n} rules");
        for _ in 0..n {
            self.attempt_rule_execution()?;
        }
        Ok(())
    }

    fn attempt_rule_execution(&mut self) -> Result<()> {
        if self.shuffle_randomly {
            self.rules.shuffle(&mut self.rng);
            trace!("shuffled rule order");
        }
        for rule_index in self.pruned_rule_indices() {
            let rule = &self.rules[rule_index];
            debug!("testing rule '${}'", rule.action_name);
            if rule.is_response_action {
                continue;
            }
            if rule.roles.iter().any(|r| r.required && !r.action_self_reference && !self.domain.has_type(&r.entity_type)) {
                continue;
            }
            let ignore = self.preconditions_to_ignore(rule_index);
            let mut found_trigger = false;
            for bindings in self.compile_candidate_bindings(rule_index) {
                if self.triggers(rule_index, &bindings, &ignore) {
                    found_trigger = true;
                    trace!("all preconditions hold for '${}'", self.rules[rule_index].action_name);
                    if self.rng.gen::<f64>() < self.rules[rule_index].probability {
                        let bindings = self.bind_optional_roles(rule_index, bindings);
                        self.fire(rule_index, bindings)?;
                    } else {
                        trace!("did not trigger '${}' (probability not met)", self.rules[rule_index].action_name);
                    }
                    break;
                }
            }
            if found_trigger {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Drop rules at least one of whose role-less (constant) preconditions
    /// fails to hold, returning the surviving rules' indices in order.
    fn pruned_rule_indices(&self) -> Vec<usize> {
        (0..self.rules.len())
            .filter(|&i| {
                self.rules[i].preconditions.iter().all(|precondition| {
                    if !is_constant_precondition(precondition) {
                        return true;
                    }
                    self.memory.holds(precondition, &HashMap::new())
                })
            })
            .collect()
    }

    /// Single-required-role, no-optional-role preconditions, pre-filtered
    /// by per-role candidate pruning and therefore safe to
    /// skip when `triggers` re-checks the rest.
    fn preconditions_to_ignore(&self, rule_index: usize) -> HashSet<usize> {
        self.rules[rule_index]
            .preconditions
            .iter()
            .enumerate()
            .filter(|(_, p)| p.required_roles().len() == 1 && !p.has_optional_roles())
            .map(|(i, _)| i)
            .collect()
    }

    fn compile_candidate_bindings(&mut self, rule_index: usize) -> Vec<HashMap<String, Entity>> {
        let rule = &self.rules[rule_index];
        let required_roles: Vec<Role> =
            rule.roles.iter().filter(|r| r.required && !r.action_self_reference).cloned().collect();

        let mut pools: Vec<Vec<Entity>> = Vec::with_capacity(required_roles.len());
        for role in &required_roles {
            let candidates: Vec<Entity> = self.domain.entities_of_type(&role.entity_type).to_vec();
            let mut pruned = self.prune_role_candidate_pool(rule_index, role, candidates);
            if pruned.is_empty() {
                return Vec::new();
            }
            if self.shuffle_randomly {
                pruned.shuffle(&mut self.rng);
            }
            pools.push(pruned);
        }

        let mut results = Vec::new();
        for combo in cartesian_product(&pools) {
            let mut names: Vec<&str> = combo.iter().map(|e| e.name.as_str()).collect();
            names.sort_unstable();
            if names.windows(2).any(|w| w[0] == w[1]) {
                continue; // same entity bound to two roles
            }
            let mut bindings = HashMap::new();
            for (role, entity) in required_roles.iter().zip(combo) {
                bindings.insert(role.name.clone(), entity);
            }
            results.push(bindings);
        }
        results
    }

    /// Remove entities from `candidates` for whom a single-role precondition
    /// referencing only `role` fails to hold.
    fn prune_role_candidate_pool(&self, rule_index: usize, role: &Role, candidates: Vec<Entity>) -> Vec<Entity> {
        let rule = &self.rules[rule_index];
        let single_role_preconditions: Vec<&Condition> = rule
            .preconditions
            .iter()
            .filter(|p| {
                let required = p.required_roles();
                required.len() == 1 && required[0].name == role.name && !p.has_optional_roles()
            })
            .collect();
        if single_role_preconditions.is_empty() {
            return candidates;
        }
        candidates
            .into_iter()
            .filter(|candidate| {
                let mut bindings = HashMap::new();
                bindings.insert(role.name.clone(), candidate.clone());
                single_role_preconditions.iter().all(|p| self.memory.holds(p, &bindings))
            })
            .collect()
    }

    fn triggers(&self, rule_index: usize, bindings: &HashMap<String, Entity>, ignore: &HashSet<usize>) -> bool {
        let rule = &self.rules[rule_index];
        for (i, precondition) in rule.preconditions.iter().enumerate() {
            if ignore.contains(&i) {
                continue;
            }
            if precondition.has_optional_roles() {
                continue;
            }
            if !self.memory.holds(precondition, bindings) {
                return false;
            }
        }
        true
    }

    /// Bind every non-required, non-self-reference role: optional
    /// roles first (so an entity-creation recipe may interpolate them),
    /// then entity-creating roles.
    fn bind_optional_roles(&mut self, rule_index: usize, mut bindings: HashMap<String, Entity>) -> HashMap<String, Entity> {
        let roles = self.rules[rule_index].roles.clone();
        for role in &roles {
            if role.entity_name_recipe.is_some() || role.required || role.action_self_reference {
                continue;
            }
            if let Some(entity) = self.bind_optional_role(rule_index, role, &bindings) {
                bindings.insert(role.name.clone(), entity);
            }
        }
        for role in &roles {
            if let Some(recipe) = &role.entity_name_recipe {
                let entity = self.bind_entity_creation_role(role, recipe, &bindings);
                bindings.insert(role.name.clone(), entity);
            }
        }
        bindings
    }

    fn bind_optional_role(&self, rule_index: usize, role: &Role, bindings: &HashMap<String, Entity>) -> Option<Entity> {
        trace!("attempting to bind optional role '{}'", role.name);
        let rule = &self.rules[rule_index];
        for candidate in self.domain.entities_of_type(&role.entity_type) {
            if bindings.values().any(|bound| bound.name == candidate.name) {
                continue;
            }
            let mut test_bindings = bindings.clone();
            test_bindings.insert(role.name.clone(), candidate.clone());
            if rule.preconditions.iter().all(|p| self.memory.holds(p, &test_bindings)) {
                return Some(candidate.clone());
            }
        }
        None
    }

    fn bind_entity_creation_role(&mut self, role: &Role, recipe: &str, bindings: &HashMap<String, Entity>) -> Entity {
        let resolved_name = interpolate(recipe, bindings);
        let unique_name = self.domain.disambiguate_name(&resolved_name);
        let entity = Entity::new(unique_name, role.entity_type.clone());
        self.domain.insert(entity.clone()).expect("just-disambiguated name is unique");
        entity
    }

    fn fire(&mut self, rule_index: usize, bindings: HashMap<String, Entity>) -> Result<()> {
        let bindings = self.spawn_action(rule_index, bindings);
        let effects = self.rules[rule_index].effects.clone();
        for effect in &effects {
            self.apply_effect(effect, &bindings);
        }

        let response_actions = self.rules[rule_index].response_actions.clone();
        let firing_probability = self.rules[rule_index].probability;
        for response in &response_actions {
            debug!("testing rule for response action '${}'", response.action_name);
            let Some(target_index) = self.rules.iter().position(|r| r.action_name == response.action_name) else {
                continue; // unreachable given compile-time validation
            };
            let mut response_bindings = HashMap::new();
            for (target_role, source_role) in &response.bindings {
                let entity = bindings.get(source_role).ok_or_else(|| {
                    MythosError::runtime(format!(
                        "response action '${}' maps role '{target_role}' from source role '{source_role}', \
                         which is not bound on the firing rule '${}'",
                        response.action_name, self.rules[rule_index].action_name
                    ))
                })?;
                response_bindings.insert(target_role.clone(), entity.clone());
            }
            if self.triggers(target_index, &response_bindings, &HashSet::new()) {
                // The firing rule's own probability gates the response draw;
                // the response target's own `probability` field is unused.
                if self.rng.gen::<f64>() < firing_probability {
                    // Response actions fire with exactly the bindings mapped
                    // over from the firing rule: unlike a top-level attempt,
                    // optional roles on the response target are never bound.
                    self.fire(target_index, response_bindings)?;
                }
            }
        }
        Ok(())
    }

    fn apply_effect(&mut self, effect: &Effect, bindings: &HashMap<String, Entity>) {
        match effect {
            Effect::Predicate(p) => {
                if p.negated {
                    self.memory.delete(p, bindings);
                } else {
                    self.memory.add(p, bindings);
                }
            }
            Effect::Ternary(t) => {
                let branch = if self.memory.holds(&t.condition, bindings) { &t.effect_if_true } else { &t.effect_if_false };
                if let Some(effect) = branch {
                    self.apply_effect(effect, bindings);
                }
            }
        }
    }

    fn spawn_action(&mut self, rule_index: usize, mut bindings: HashMap<String, Entity>) -> HashMap<String, Entity> {
        let rule = &self.rules[rule_index];
        let interpolated = interpolate(&rule.action_string, &bindings);
        // The author wraps the action string in a pair of literal characters
        // (conventionally quotes) purely for readability in the rules file;
        // trim them off before using the string as the action's display text.
        let display = if interpolated.len() >= 2 { interpolated[1..interpolated.len() - 1].to_string() } else { interpolated };
        let action_entity = Entity::new(display.clone(), "Action");
        let _ = self.domain.insert(action_entity.clone());
        bindings.insert(Role::SELF_REFERENCE_NAME.to_string(), action_entity);
        info!("{display}");
        self.actions.push(Action { name: rule.action_name.clone(), string: display, bindings: bindings.clone() });
        bindings
    }

    pub fn produced_action(&self, action_name: &str) -> bool {
        self.actions.iter().any(|a| a.name == action_name)
    }

    pub fn actions_involving(&self, entity_name: &str) -> Vec<&Action> {
        self.actions.iter().filter(|a| a.involves(entity_name)).collect()
    }

    pub fn entity_by_name(&self, name: &str) -> Option<&Entity> {
        self.domain.entity_by_name(name)
    }

    pub fn rule_by_action_name(&self, action_name: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.action_name == action_name)
    }

    /// Test-execute the rule associated with `action_name` against an
    /// explicit binding string like `"X=alice,Y=bob"`, without actually
    /// firing it. A debug helper for rule authors.
    pub fn debug(&mut self, action_name: &str, bindings_string: &str) -> Result<bool> {
        let rule_index = self
            .rules
            .iter()
            .position(|r| r.action_name == action_name)
            .ok_or_else(|| MythosError::runtime(format!("couldn't find rule with action name '{action_name}'")))?;
        let mut bindings = HashMap::new();
        for binding in bindings_string.split(',') {
            let (role_name, entity_name) = binding
                .trim()
                .split_once('=')
                .ok_or_else(|| MythosError::runtime(format!("malformed binding '{binding}'")))?;
            let entity = self
                .domain
                .entity_by_name(entity_name)
                .ok_or_else(|| MythosError::runtime(format!("couldn't find entity named '{entity_name}'")))?
                .clone();
            bindings.insert(role_name.to_string(), entity);
        }
        Ok(self.triggers(rule_index, &bindings, &HashSet::new()))
    }
}

fn is_constant_precondition(condition: &Condition) -> bool {
    condition.required_roles().is_empty() && !condition.has_optional_roles()
}

fn cartesian_product(pools: &[Vec<Entity>]) -> Vec<Vec<Entity>> {
    let mut combos: Vec<Vec<Entity>> = vec![Vec::new()];
    for pool in pools {
        let mut next = Vec::with_capacity(combos.len() * pool.len());
        for combo in &combos {
            for entity in pool {
                let mut extended = combo.clone();
                extended.push(entity.clone());
                next.push(extended);
            }
        }
        combos = next;
    }
    combos
}

/// A mini-formatter keyed on role names: scan for `{Role}` and substitute
/// the bound entity's name. No `eval`-style substitution: recipes are
/// literal text with role placeholders, nothing more.
fn interpolate(template: &str, bindings: &HashMap<String, Entity>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '{' {
            let mut name = String::new();
            for c2 in chars.by_ref() {
                if c2 == '}' {
                    break;
                }
                name.push(c2);
            }
            match bindings.get(&name) {
                Some(entity) => out.push_str(&entity.name),
                None => out.push_str(&format!("{{{name}}}")),
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Predicate, TemplateElement};

    fn person(name: &str) -> Entity {
        Entity::new(name, "Person")
    }

    fn greet_rule() -> Rule {
        let greeter = Role::required("Greeter", "Person");
        let precondition = Condition::Predicate(Predicate::new(
            vec![TemplateElement::RoleRef(greeter.clone()), TemplateElement::Literal("is happy".to_string())],
            false,
        ));
        let effect = Effect::Predicate(Predicate::new(
            vec![TemplateElement::RoleRef(greeter.clone()), TemplateElement::Literal("has greeted".to_string())],
            false,
        ));
        Rule {
            action_name: "Greet".to_string(),
            is_response_action: false,
            action_string: "\"{Greeter} greets.\"".to_string(),
            probability: 1.0,
            roles: vec![greeter, Role::this()],
            preconditions: vec![precondition],
            effects: vec![effect],
            response_actions: vec![],
            debug: false,
            raw_definition: "$Greet\n\"{Greeter} greets.\"\n".to_string(),
        }
    }

    #[test]
    fn trivial_firing_scenario() {
        let mut domain = Domain::new();
        domain.insert(person("alice")).unwrap();
        let mut facts = HashSet::new();
        facts.insert("alice is happy".to_string());
        let mut engine = RuleEngine::new(
            domain,
            vec![greet_rule()],
            facts,
            RuleEngineOptions { shuffle_randomly: false, seed: EngineSeed::Seeded(1) },
        );
        engine.execute(1).unwrap();
        assert_eq!(engine.actions().len(), 1);
        assert_eq!(engine.actions()[0].name, "Greet");
        assert!(engine.memory().has_fact("alice has greeted"));
        assert_eq!(engine.actions_involving("alice").len(), 1);
    }

    #[test]
    fn entity_creation_disambiguates_repeated_names() {
        let writer_role = Role::required("Writer", "Person");
        let note_role = Role::entity_creating("Note", "Prop", "{Writer}'s Note");
        let rule = Rule {
            action_name: "WriteNote".to_string(),
            is_response_action: false,
            action_string: "\"{Writer} writes a note.\"".to_string(),
            probability: 1.0,
            roles: vec![writer_role, note_role, Role::this()],
            preconditions: vec![],
            effects: vec![],
            response_actions: vec![],
            debug: false,
            raw_definition: "$WriteNote\n\"{Writer} writes a note.\"\n".to_string(),
        };
        let mut domain = Domain::new();
        domain.insert(person("alice")).unwrap();
        let mut engine = RuleEngine::new(
            domain,
            vec![rule],
            HashSet::new(),
            RuleEngineOptions { shuffle_randomly: false, seed: EngineSeed::Seeded(1) },
        );
        engine.execute(1).unwrap();
        assert!(engine.entity_by_name("alice's Note").is_some());
        engine.execute(1).unwrap();
        assert!(engine.entity_by_name("alice's Note (1)").is_some());
    }

    #[test]
    fn response_chain_fires_target_rule_immediately() {
        let x_role = Role::required("X", "Person");
        let rule_a = Rule {
            action_name: "A".to_string(),
            is_response_action: false,
            action_string: "\"{X} does A.\"".to_string(),
            probability: 1.0,
            roles: vec![x_role.clone(), Role::this()],
            preconditions: vec![],
            effects: vec![],
            response_actions: vec![crate::types::ResponseAction {
                action_name: "B".to_string(),
                bindings: HashMap::from([("Y".to_string(), "X".to_string())]),
            }],
            debug: false,
            raw_definition: "$A\n\"{X} does A.\"\n".to_string(),
        };
        let y_role = Role::required("Y", "Person");
        let rule_b = Rule {
            action_name: "B".to_string(),
            is_response_action: true,
            action_string: "\"{Y} does B.\"".to_string(),
            probability: 1.0,
            roles: vec![y_role, Role::this()],
            preconditions: vec![],
            effects: vec![],
            response_actions: vec![],
            debug: false,
            raw_definition: "$B (response)\n\"{Y} does B.\"\n".to_string(),
        };
        let mut domain = Domain::new();
        domain.insert(person("alice")).unwrap();
        let mut engine = RuleEngine::new(
            domain,
            vec![rule_a, rule_b],
            HashSet::new(),
            RuleEngineOptions { shuffle_randomly: false, seed: EngineSeed::Seeded(1) },
        );
        engine.execute(1).unwrap();
        assert!(engine.produced_action("A"));
        assert!(engine.produced_action("B"));
    }

    #[test]
    fn seeded_runs_produce_identical_outputs() {
        let build = || {
            let mut domain = Domain::new();
            domain.insert(person("alice")).unwrap();
            let mut facts = HashSet::new();
            facts.insert("alice is happy".to_string());
            RuleEngine::new(
                domain,
                vec![greet_rule()],
                facts,
                RuleEngineOptions { shuffle_randomly: true, seed: EngineSeed::Seeded(42) },
            )
        };
        let mut e1 = build();
        let mut e2 = build();
        e1.execute(1).unwrap();
        e2.execute(1).unwrap();
        assert_eq!(e1.actions()[0].string, e2.actions()[0].string);
    }

    #[test]
    fn every_action_name_matches_its_rules_action_name() {
        let mut domain = Domain::new();
        domain.insert(person("alice")).unwrap();
        let mut facts = HashSet::new();
        facts.insert("alice is happy".to_string());
        let mut engine = RuleEngine::new(
            domain,
            vec![greet_rule()],
            facts,
            RuleEngineOptions { shuffle_randomly: false, seed: EngineSeed::Seeded(1) },
        );
        engine.execute(1).unwrap();
        for action in engine.actions() {
            assert_eq!(action.name, engine.rule_by_action_name(&action.name).unwrap().action_name);
        }
    }

    #[test]
    fn interpolate_substitutes_bound_role_names() {
        let mut bindings = HashMap::new();
        bindings.insert("Greeter".to_string(), person("alice"));
        assert_eq!(interpolate("\"{Greeter} greets.\"", &bindings), "\"alice greets.\"");
    }
}
