//! Shared value types: `Entity`, `Role`, the predicate/condition/effect
//! IR, `Rule`, `ResponseAction`, and `Action`.
//!
//! Dynamic dispatch on predicate kind is deliberately avoided in favor of
//! tagged sums (`Condition`, `Effect`) that get pattern-matched at the few
//! evaluation sites in `memory.rs` and `engine.rs`. A common base trait
//! with virtual `holds`/`ground` methods
//! would scatter that logic across several small `impl` blocks instead of
//! keeping it where the working memory and rule engine can see all the
//! cases at once.

use std::collections::HashMap;
use std::fmt;

/// A named domain object of some type, with optional string attributes.
///
/// Names are unique across a domain; entities are created during
/// domain parsing or, for entity-creating roles, at rule-firing time, and
/// are never destroyed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub name: String,
    pub entity_type: String,
    pub attributes: HashMap<String, String>,
}

impl Entity {
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Entity { name: name.into(), entity_type: entity_type.into(), attributes: HashMap::new() }
    }

    pub fn with_attributes(
        name: impl Into<String>,
        entity_type: impl Into<String>,
        attributes: HashMap<String, String>,
    ) -> Self {
        Entity { name: name.into(), entity_type: entity_type.into(), attributes }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.entity_type)
    }
}

impl Entity {
    /// Push this entity's name, and each of its attributes under a
    /// dotted `variable_name.attr` key, into a grammar engine's state.
    /// A driver calls this once per role binding before generating an
    /// action's prose, so `<@Role>` and `<@Role.attr>` both resolve.
    pub fn add_to_grammar_engine_state(&self, engine: &mut crate::grammar::GrammarEngine, variable_name: &str) {
        engine.set_state(variable_name, self.name.clone());
        for (key, value) in &self.attributes {
            engine.set_state(format!("{variable_name}.{key}"), value.clone());
        }
    }
}

/// A grounded fact: a plain string, compared by string equality; working
/// memory never structures facts into tuples.
pub type Fact = String;

/// A named slot in a rule that must (or may) be filled by an entity of a
/// given type.
///
/// `action_self_reference` is true iff `name == "This"`: the reserved role
/// bound to the just-fired Action entity. `entity_name_recipe`, if
/// present, marks the role as entity-creating: firing synthesizes a new
/// entity of `entity_type` whose name is produced by interpolating other
/// role bindings into the recipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub name: String,
    pub entity_type: String,
    pub action_self_reference: bool,
    pub entity_name_recipe: Option<String>,
    pub required: bool,
}

impl Role {
    pub(crate) const SELF_REFERENCE_NAME: &'static str = "This";

    /// A required role, e.g. `Greeter:Person`.
    pub(crate) fn required(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Role {
            name: name.into(),
            entity_type: entity_type.into(),
            action_self_reference: false,
            entity_name_recipe: None,
            required: true,
        }
    }

    /// An optional role, e.g. `?Witness:Person`.
    pub(crate) fn optional(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Role {
            name: name.into(),
            entity_type: entity_type.into(),
            action_self_reference: false,
            entity_name_recipe: None,
            required: false,
        }
    }

    /// An entity-creating role, e.g. `+Note={Writer}'s Note:Prop`.
    pub(crate) fn entity_creating(
        name: impl Into<String>,
        entity_type: impl Into<String>,
        recipe: impl Into<String>,
    ) -> Self {
        Role {
            name: name.into(),
            entity_type: entity_type.into(),
            action_self_reference: false,
            entity_name_recipe: Some(recipe.into()),
            required: false,
        }
    }

    /// The reserved `This` role, bound to the Action entity after firing.
    pub(crate) fn this() -> Self {
        Role {
            name: Self::SELF_REFERENCE_NAME.to_string(),
            entity_type: "Action".to_string(),
            action_self_reference: true,
            entity_name_recipe: None,
            required: false,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(recipe) = &self.entity_name_recipe {
            write!(f, "+{}={}:{}", self.name, recipe, self.entity_type)
        } else {
            let prefix = if !self.required && !self.action_self_reference { "?" } else { "" };
            write!(f, "{prefix}{}:{}", self.name, self.entity_type)
        }
    }
}

/// One element of a predicate template: a literal (lowercase-initial)
/// token, or a reference to one of the enclosing rule's roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateElement {
    Literal(String),
    RoleRef(Role),
}

/// An ordered template whose elements are literal tokens or role
/// references, with a `negated` flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub template: Vec<TemplateElement>,
    pub negated: bool,
}

impl Predicate {
    pub(crate) fn new(template: Vec<TemplateElement>, negated: bool) -> Self {
        Predicate { template, negated }
    }

    /// Roles referenced by this predicate that are required (i.e. not
    /// optional and not the `This` self-reference).
    pub fn required_roles(&self) -> Vec<&Role> {
        self.template
            .iter()
            .filter_map(|e| match e {
                TemplateElement::RoleRef(r) if r.required => Some(r),
                _ => None,
            })
            .collect()
    }

    /// True if this predicate references at least one optional (non-required,
    /// non-self-reference) role.
    pub fn has_optional_roles(&self) -> bool {
        self.template.iter().any(|e| match e {
            TemplateElement::RoleRef(r) => !r.required && !r.action_self_reference,
            TemplateElement::Literal(_) => false,
        })
    }

    /// Ground this predicate's template against `bindings`, substituting each
    /// role reference with its bound entity's name and joining elements with
    /// single spaces. Returns `None` if the template references a role
    /// absent from `bindings` (an unbound optional role) or if the result is
    /// empty/blank — both are silent no-ops rather than errors.
    pub(crate) fn ground(&self, bindings: &HashMap<String, Entity>) -> Option<String> {
        let mut parts = Vec::with_capacity(self.template.len());
        for element in &self.template {
            match element {
                TemplateElement::Literal(s) => parts.push(s.clone()),
                TemplateElement::RoleRef(role) => parts.push(bindings.get(&role.name)?.name.clone()),
            }
        }
        let grounded = parts.join(" ");
        if grounded.trim().is_empty() { None } else { Some(grounded) }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = self
            .template
            .iter()
            .map(|e| match e {
                TemplateElement::Literal(s) => s.clone(),
                TemplateElement::RoleRef(r) => r.name.clone(),
            })
            .collect::<Vec<_>>()
            .join(" ");
        write!(f, "{}({body})", if self.negated { "!" } else { "" })
    }
}

/// A disjunction over conditions (themselves always plain `Predicate`s in
/// this DSL). `negated` de Morgans the whole disjunction at evaluation time:
/// a negated OR holds iff *no* alternate holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrExpression {
    pub conditions: Vec<Predicate>,
    pub negated: bool,
}

impl fmt::Display for OrExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = self.conditions.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(" / ");
        if self.negated { write!(f, "!({body})") } else { write!(f, "{body}") }
    }
}

impl OrExpression {
    /// The union of required roles referenced across all alternates, each
    /// name appearing once regardless of how many alternates reference it.
    pub fn required_roles(&self) -> Vec<&Role> {
        let mut seen = std::collections::HashSet::new();
        self.conditions
            .iter()
            .flat_map(|c| c.required_roles())
            .filter(move |r| seen.insert(r.name.clone()))
            .collect()
    }

    pub fn has_optional_roles(&self) -> bool {
        self.conditions.iter().any(Predicate::has_optional_roles)
    }
}

/// A precondition: either a plain predicate or a disjunction over them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Predicate(Predicate),
    Or(OrExpression),
}

impl Condition {
    pub fn required_roles(&self) -> Vec<&Role> {
        match self {
            Condition::Predicate(p) => p.required_roles(),
            Condition::Or(o) => o.required_roles(),
        }
    }

    pub fn has_optional_roles(&self) -> bool {
        match self {
            Condition::Predicate(p) => p.has_optional_roles(),
            Condition::Or(o) => o.has_optional_roles(),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Predicate(p) => write!(f, "{p}"),
            Condition::Or(o) => write!(f, "{o}"),
        }
    }
}

/// `(condition, effect_if_true, effect_if_false)`; either branch may be
/// `None` (a no-op branch, written `()` in the DSL).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TernaryExpression {
    pub condition: Condition,
    pub effect_if_true: Option<Box<Effect>>,
    pub effect_if_false: Option<Box<Effect>>,
}

/// An effect: a (possibly negated) predicate, or a ternary choice between
/// two effects gated on a condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Predicate(Predicate),
    Ternary(TernaryExpression),
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Predicate(p) => write!(f, "{p}"),
            Effect::Ternary(t) => {
                let true_str = t.effect_if_true.as_ref().map(|e| e.to_string()).unwrap_or_else(|| "()".to_string());
                let false_str = t.effect_if_false.as_ref().map(|e| e.to_string()).unwrap_or_else(|| "()".to_string());
                write!(f, "{true_str} if {} else {false_str}", t.condition)
            }
        }
    }
}

/// A directive naming an action that should be attempted immediately after
/// the rule that declares it fires, with a mapping from the target rule's
/// role names to the firing rule's role names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseAction {
    pub action_name: String,
    /// target_role -> source_role
    pub bindings: HashMap<String, String>,
}

impl fmt::Display for ResponseAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut pairs: Vec<_> = self.bindings.iter().collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0));
        let body = pairs.iter().map(|(t, s)| format!("{t}={s}")).collect::<Vec<_>>().join(", ");
        write!(f, "{}({body})", self.action_name)
    }
}

/// A compiled rule: the in-memory IR produced by the rule compiler and
/// consumed by the rule engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub action_name: String,
    pub is_response_action: bool,
    pub action_string: String,
    pub probability: f64,
    pub roles: Vec<Role>,
    pub preconditions: Vec<Condition>,
    pub effects: Vec<Effect>,
    pub response_actions: Vec<ResponseAction>,
    pub debug: bool,
    /// The raw `$...` block this rule was compiled from, used for
    /// diagnostics and the `Display` round-trip.
    pub raw_definition: String,
}

impl Rule {
    pub fn role(&self, name: &str) -> Option<&Role> {
        self.roles.iter().find(|r| r.name == name)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw_definition)
    }
}

/// A record of one rule firing: the rule's name, its rendered display
/// string, and the bindings (including `This`, bound to the Action entity
/// that firing itself created).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub name: String,
    pub string: String,
    pub bindings: HashMap<String, Entity>,
}

impl Action {
    /// All entities bound to roles for this action, in no particular order.
    pub fn entities(&self) -> Vec<&Entity> {
        self.bindings.values().collect()
    }

    pub fn involves(&self, entity_name: &str) -> bool {
        self.bindings.values().any(|e| e.name == entity_name)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicate_ground_substitutes_role_names() {
        let greeter = Role::required("Greeter", "Person");
        let predicate = Predicate::new(
            vec![
                TemplateElement::RoleRef(greeter.clone()),
                TemplateElement::Literal("is".to_string()),
                TemplateElement::Literal("happy".to_string()),
            ],
            false,
        );
        let mut bindings = HashMap::new();
        bindings.insert("Greeter".to_string(), Entity::new("alice", "Person"));
        assert_eq!(predicate.ground(&bindings), Some("alice is happy".to_string()));
    }

    #[test]
    fn predicate_ground_is_deterministic() {
        let role = Role::optional("Witness", "Person");
        let predicate =
            Predicate::new(vec![TemplateElement::RoleRef(role), TemplateElement::Literal("saw it".to_string())], false);
        let mut bindings = HashMap::new();
        bindings.insert("Witness".to_string(), Entity::new("bob", "Person"));
        assert_eq!(predicate.ground(&bindings), predicate.ground(&bindings));
    }

    #[test]
    fn predicate_ground_skips_unbound_optional_role() {
        let role = Role::optional("Witness", "Person");
        let predicate = Predicate::new(vec![TemplateElement::RoleRef(role)], false);
        assert_eq!(predicate.ground(&HashMap::new()), None);
    }

    #[test]
    fn or_expression_display_round_trips_shape() {
        let a = Predicate::new(vec![TemplateElement::Literal("a".into())], false);
        let b = Predicate::new(vec![TemplateElement::Literal("b".into())], false);
        let or_expr = OrExpression { conditions: vec![a, b], negated: true };
        assert_eq!(or_expr.to_string(), "!((a) / (b))");
    }

    #[test]
    fn role_display_marks_optional_and_entity_creating_roles() {
        assert_eq!(Role::required("Greeter", "Person").to_string(), "Greeter:Person");
        assert_eq!(Role::optional("Witness", "Person").to_string(), "?Witness:Person");
        assert_eq!(
            Role::entity_creating("Note", "Prop", "{Writer}'s Note").to_string(),
            "+Note={Writer}'s Note:Prop"
        );
    }
}
