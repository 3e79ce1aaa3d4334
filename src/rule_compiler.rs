//! Rule compiler: parses a rules file into the in-memory `Rule` IR the
//! rule engine executes.
//!
//! A rules file is a sequence of `$`-prefixed blocks. Each block's first
//! line is a header (`ActionName[ (response)][ debug]`), its second line is
//! the action's display-string template, and the remaining lines are
//! partitioned into up to five labeled sections: `prob:`, `roles:`,
//! `preconditions:`, `effects:`, `responses:`.

use std::collections::HashMap;

use log::debug;
use regex::Regex;

use crate::error::{MythosError, Result};
use crate::lexer::{brackets_balanced, is_role_reference, meaningful_lines, normalize_whitespace};
use crate::types::{Condition, Effect, OrExpression, Predicate, ResponseAction, Role, Rule, TemplateElement, TernaryExpression};

const SECTION_LABELS: [&str; 5] = ["prob:", "roles:", "preconditions:", "effects:", "responses:"];

pub struct RuleCompiler;

impl RuleCompiler {
    /// Parse a full rules file into the compiled rule set, running the
    /// cross-rule static checks once every block has compiled.
    pub fn parse(text: &str) -> Result<Vec<Rule>> {
        let normalized = normalize_whitespace(&meaningful_lines(text).join("\n"));

        let mut rules = Vec::new();
        for block in normalized.split('$') {
            let block = block.trim();
            if block.is_empty() {
                continue;
            }
            rules.push(Self::parse_rule_block(block)?);
        }

        Self::validate_unique_action_names(&rules)?;
        Self::validate_response_actions(&rules)?;

        debug!("rule compiler parsed {} rules", rules.len());
        Ok(rules)
    }

    fn parse_rule_block(block: &str) -> Result<Rule> {
        let mut lines = block.splitn(3, '\n');
        let header = lines
            .next()
            .ok_or_else(|| MythosError::parse(format!("empty rule block: '{block}'")))?
            .trim();
        let action_string = lines
            .next()
            .ok_or_else(|| MythosError::parse(format!("rule '{header}' is missing its action string")))?
            .trim()
            .to_string();
        let body = lines.next().unwrap_or("");

        let (action_name, is_response_action, debug_flag) = Self::parse_header(header)?;

        if action_string.chars().filter(|&c| c == '{').count() != action_string.chars().filter(|&c| c == '}').count() {
            return Err(MythosError::parse(format!(
                "malformed action string in rule '${action_name}' (unbalanced curly braces): '{action_string}'"
            )));
        }

        let sections = Self::split_sections(body, &action_name)?;

        let mut roles: Vec<Role> = Vec::new();
        if let Some(content) = sections.get("roles:") {
            for line in meaningful_lines(content) {
                roles.push(Self::parse_role_definition(line, &action_name)?);
            }
        }
        roles.push(Role::this());

        for brace_reference in Self::brace_references(&action_string) {
            if !roles.iter().any(|r| r.name == brace_reference) {
                return Err(MythosError::validation(format!(
                    "action string in rule '${action_name}' references undefined role '{brace_reference}'"
                )));
            }
        }

        let probability = match sections.get("prob:") {
            Some(content) => content.trim().parse::<f64>().map_err(|_| {
                MythosError::parse(format!("malformed probability value for rule '${action_name}': '{content}'"))
            })?,
            None => 1.0,
        };

        let mut preconditions = Vec::new();
        if let Some(content) = sections.get("preconditions:") {
            for line in meaningful_lines(content) {
                for expanded in Self::expand_macro_roles(line, &roles) {
                    preconditions.push(Self::parse_condition(&expanded, &action_name, &roles)?);
                }
            }
        }

        let mut effects = Vec::new();
        if let Some(content) = sections.get("effects:") {
            for line in meaningful_lines(content) {
                for expanded in Self::expand_macro_roles(line, &roles) {
                    if let Some(effect) = Self::parse_effect(&expanded, &action_name, &roles)? {
                        effects.push(effect);
                    }
                }
            }
        }

        let mut response_actions = Vec::new();
        if let Some(content) = sections.get("responses:") {
            for line in meaningful_lines(content) {
                response_actions.push(Self::parse_response_action(line, &action_name)?);
            }
        }

        Ok(Rule {
            action_name,
            is_response_action,
            action_string,
            probability,
            roles,
            preconditions,
            effects,
            response_actions,
            debug: debug_flag,
            raw_definition: format!("${block}"),
        })
    }

    /// `ActionName[ (response)][ debug]` -> `(name, is_response_action, debug)`.
    fn parse_header(header: &str) -> Result<(String, bool, bool)> {
        let mut remainder = header.trim_end();
        let debug_flag = remainder.ends_with(" debug");
        if debug_flag {
            remainder = remainder[..remainder.len() - " debug".len()].trim_end();
        }
        let is_response_action = remainder.ends_with("(response)");
        let action_name = remainder
            .split_whitespace()
            .next()
            .ok_or_else(|| MythosError::parse(format!("empty rule header: '{header}'")))?
            .to_string();
        Ok((action_name, is_response_action, debug_flag))
    }

    fn brace_references(action_string: &str) -> Vec<String> {
        let mut refs = Vec::new();
        let mut chars = action_string.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '{' {
                let mut name = String::new();
                for c2 in chars.by_ref() {
                    if c2 == '}' {
                        break;
                    }
                    name.push(c2);
                }
                refs.push(name);
            }
        }
        refs
    }

    /// Split a rule block's body into its labeled sections. Each label may
    /// appear on its own line at most once; a line that looks like a label
    /// (a single bare word followed by `:`) but isn't one of the five
    /// recognized keywords is fatal.
    fn split_sections<'a>(body: &'a str, action_name: &str) -> Result<HashMap<&'static str, String>> {
        let mut sections: HashMap<&'static str, String> = HashMap::new();
        let mut current: Option<&'static str> = None;
        for line in meaningful_lines(body) {
            if let Some(label) = SECTION_LABELS.iter().find(|&&l| l == line) {
                if sections.contains_key(label) {
                    return Err(MythosError::parse(format!(
                        "rule '${action_name}' repeats the '{label}' section"
                    )));
                }
                sections.insert(label, String::new());
                current = Some(label);
                continue;
            }
            if Self::looks_like_unknown_label(line) {
                return Err(MythosError::parse(format!(
                    "rule '${action_name}' has an unrecognized section label: '{line}'"
                )));
            }
            match current {
                Some(label) => {
                    let entry = sections.get_mut(label).expect("label inserted above");
                    if !entry.is_empty() {
                        entry.push('\n');
                    }
                    entry.push_str(line);
                }
                None => {
                    return Err(MythosError::parse(format!(
                        "rule '${action_name}' has content before any section label: '{line}'"
                    )));
                }
            }
        }
        Ok(sections)
    }

    fn looks_like_unknown_label(line: &str) -> bool {
        line.ends_with(':') && line.split_whitespace().count() == 1 && !line.starts_with('(') && !line.contains('.')
    }

    fn parse_role_definition(line: &str, action_name: &str) -> Result<Role> {
        if let Some(rest) = line.strip_prefix('+') {
            let (role_name, entity_name_and_type) = rest
                .split_once('=')
                .ok_or_else(|| MythosError::parse(format!("malformed entity-creating role in '${action_name}': '{line}'")))?;
            let (recipe, entity_type) = entity_name_and_type
                .rsplit_once(':')
                .ok_or_else(|| MythosError::parse(format!("malformed entity-creating role in '${action_name}': '{line}'")))?;
            return Ok(Role::entity_creating(role_name.trim(), entity_type.trim(), recipe));
        }
        let (name_part, entity_type) = line
            .split_once(':')
            .ok_or_else(|| MythosError::parse(format!("malformed role definition in '${action_name}': '{line}'")))?;
        let name_part = name_part.trim();
        let entity_type = entity_type.trim();
        if name_part.is_empty() || entity_type.is_empty() {
            return Err(MythosError::parse(format!("malformed role definition in '${action_name}': '{line}'")));
        }
        let optional = name_part.starts_with('?');
        let name = if optional { &name_part[1..] } else { name_part };
        if name == Role::SELF_REFERENCE_NAME {
            return Err(MythosError::parse(format!(
                "the role name 'This' is reserved and can't be declared in '${action_name}'"
            )));
        }
        Ok(if optional { Role::optional(name, entity_type) } else { Role::required(name, entity_type) })
    }

    /// Expand a `*:Type` macro role occurring in `line` into the Cartesian
    /// product over every declared role of that entity type. Returns
    /// `vec![line.to_string()]` unchanged if no macro role is present, and
    /// an empty vec if some macro type has zero matching declared roles.
    fn expand_macro_roles(line: &str, roles: &[Role]) -> Vec<String> {
        static MACRO_PATTERN: once_cell::sync::Lazy<Regex> =
            once_cell::sync::Lazy::new(|| Regex::new(r"\*:[A-Z][A-Za-z0-9_]*").unwrap());

        let occurrences: Vec<(usize, usize, String)> = MACRO_PATTERN
            .find_iter(line)
            .map(|m| (m.start(), m.end(), m.as_str().trim_start_matches("*:").to_string()))
            .collect();
        if occurrences.is_empty() {
            return vec![line.to_string()];
        }

        let pools: Vec<Vec<String>> = occurrences
            .iter()
            .map(|(_, _, entity_type)| {
                roles.iter().filter(|r| &r.entity_type == entity_type).map(|r| r.name.clone()).collect()
            })
            .collect();
        if pools.iter().any(Vec::is_empty) {
            return Vec::new();
        }

        cartesian_product(&pools)
            .into_iter()
            .map(|combo| {
                let mut result = line.to_string();
                for (i, (start, end, _)) in occurrences.iter().enumerate().rev() {
                    result.replace_range(*start..*end, &combo[i]);
                }
                result
            })
            .collect()
    }

    fn parse_condition(text: &str, action_name: &str, roles: &[Role]) -> Result<Condition> {
        let trimmed = text.trim();
        if !brackets_balanced(trimmed, '(', ')') {
            return Err(MythosError::parse(format!(
                "unbalanced parentheses in '${action_name}' precondition: '{trimmed}'"
            )));
        }
        if !trimmed.starts_with('(') && !trimmed.starts_with("!(") {
            return Err(MythosError::parse(format!(
                "precondition for '${action_name}' doesn't start with '(' or '!(': '{trimmed}'"
            )));
        }

        if let Some((negated, inner)) = strip_negatable_wrapping_group(trimmed) {
            let alternates = split_top_level(inner, '/');
            if alternates.len() > 1 {
                let conditions = alternates
                    .iter()
                    .map(|alt| Self::parse_predicate_alternate(alt, action_name, roles))
                    .collect::<Result<Vec<_>>>()?;
                return Ok(Condition::Or(OrExpression { conditions, negated }));
            }
            let predicate = Self::parse_predicate_body(inner, action_name, roles, negated)?;
            return Ok(Condition::Predicate(predicate));
        }

        let alternates = split_top_level(trimmed, '/');
        if alternates.len() > 1 {
            let conditions = alternates
                .iter()
                .map(|alt| Self::parse_predicate_alternate(alt, action_name, roles))
                .collect::<Result<Vec<_>>>()?;
            return Ok(Condition::Or(OrExpression { conditions, negated: false }));
        }

        Err(MythosError::parse(format!("malformed precondition for '${action_name}': '{trimmed}'")))
    }

    fn parse_predicate_alternate(text: &str, action_name: &str, roles: &[Role]) -> Result<Predicate> {
        let trimmed = text.trim();
        let (negated, body) = match trimmed.strip_prefix('!') {
            Some(rest) => (true, rest.trim_start()),
            None => (false, trimmed),
        };
        if !body.starts_with('(') || !body.ends_with(')') {
            return Err(MythosError::parse(format!("malformed condition for '${action_name}': '{trimmed}'")));
        }
        Self::parse_predicate_body(&body[1..body.len() - 1], action_name, roles, negated)
    }

    fn parse_predicate_body(inner: &str, action_name: &str, roles: &[Role], negated: bool) -> Result<Predicate> {
        Ok(Predicate::new(Self::parse_template(inner, action_name, roles)?, negated))
    }

    fn parse_template(text: &str, action_name: &str, roles: &[Role]) -> Result<Vec<TemplateElement>> {
        let mut template = Vec::new();
        for word in text.split_whitespace() {
            if is_role_reference(word) {
                let role = roles.iter().find(|r| r.name == word).ok_or_else(|| {
                    MythosError::validation(format!(
                        "rule '${action_name}' references undefined role '{word}' in '{text}'"
                    ))
                })?;
                template.push(TemplateElement::RoleRef(role.clone()));
            } else {
                template.push(TemplateElement::Literal(word.to_string()));
            }
        }
        Ok(template)
    }

    fn parse_effect(text: &str, action_name: &str, roles: &[Role]) -> Result<Option<Effect>> {
        let trimmed = text.trim();
        if !brackets_balanced(trimmed, '(', ')') {
            return Err(MythosError::parse(format!("unbalanced parentheses in '${action_name}' effect: '{trimmed}'")));
        }
        if trimmed == "()" {
            return Ok(None);
        }
        if !trimmed.starts_with('(') && !trimmed.starts_with("!(") {
            return Err(MythosError::parse(format!(
                "effect for '${action_name}' doesn't start with '(' or '!(': '{trimmed}'"
            )));
        }

        if trimmed.matches('(').count() == 3 {
            let groups = extract_three_paren_groups(trimmed)
                .ok_or_else(|| MythosError::parse(format!("malformed ternary effect in '${action_name}': '{trimmed}'")))?;
            let condition = Self::parse_condition(groups[1], action_name, roles)?;
            let effect_if_true = Self::parse_effect(groups[0], action_name, roles)?;
            let effect_if_false = Self::parse_effect(groups[2], action_name, roles)?;
            return Ok(Some(Effect::Ternary(TernaryExpression {
                condition,
                effect_if_true: effect_if_true.map(Box::new),
                effect_if_false: effect_if_false.map(Box::new),
            })));
        }

        let (negated, body) = match trimmed.strip_prefix('!') {
            Some(rest) => (true, rest.trim_start()),
            None => (false, trimmed),
        };
        if !body.starts_with('(') || !body.ends_with(')') {
            return Err(MythosError::parse(format!("malformed effect for '${action_name}': '{trimmed}'")));
        }
        let predicate = Self::parse_predicate_body(&body[1..body.len() - 1], action_name, roles, negated)?;
        Ok(Some(Effect::Predicate(predicate)))
    }

    fn parse_response_action(line: &str, action_name: &str) -> Result<ResponseAction> {
        let trimmed = line.trim().trim_end_matches(')');
        let (name, raw_bindings) = trimmed
            .split_once('(')
            .ok_or_else(|| MythosError::parse(format!("malformed response action in '${action_name}': '{line}'")))?;
        let mut bindings = HashMap::new();
        for raw_binding in raw_bindings.split(',') {
            let raw_binding = raw_binding.trim();
            if raw_binding.is_empty() {
                continue;
            }
            let (target, source) = raw_binding
                .split_once('=')
                .ok_or_else(|| MythosError::parse(format!("malformed response binding in '${action_name}': '{raw_binding}'")))?;
            bindings.insert(target.trim().to_string(), source.trim().to_string());
        }
        Ok(ResponseAction { action_name: name.trim().to_string(), bindings })
    }

    fn validate_unique_action_names(rules: &[Rule]) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for rule in rules {
            if !seen.insert(&rule.action_name) {
                return Err(MythosError::validation(format!("multiple rules for action: ${}", rule.action_name)));
            }
        }
        Ok(())
    }

    fn validate_response_actions(rules: &[Rule]) -> Result<()> {
        for rule in rules {
            for response in &rule.response_actions {
                let target = rules.iter().find(|r| r.action_name == response.action_name).ok_or_else(|| {
                    MythosError::validation(format!(
                        "rule '${}' includes a response action referring to rule '${}', but no such rule has been defined",
                        rule.action_name, response.action_name
                    ))
                })?;
                for (target_role, source_role) in &response.bindings {
                    if !target.roles.iter().any(|r| &r.name == target_role) {
                        return Err(MythosError::validation(format!(
                            "rule '${}' includes a response action that references an undefined role '{target_role}' on '${}'",
                            rule.action_name, target.action_name
                        )));
                    }
                    if !rule.roles.iter().any(|r| &r.name == source_role) {
                        return Err(MythosError::validation(format!(
                            "rule '${}' includes a response action that references an undefined role '{source_role}' on '${}'",
                            rule.action_name, rule.action_name
                        )));
                    }
                }
                for role in &target.roles {
                    if role.required && !response.bindings.contains_key(&role.name) {
                        return Err(MythosError::validation(format!(
                            "rule '${}' includes a response action to '${}' missing a binding for required role '{}'",
                            rule.action_name, target.action_name, role.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

fn cartesian_product(pools: &[Vec<String>]) -> Vec<Vec<String>> {
    let mut combos: Vec<Vec<String>> = vec![Vec::new()];
    for pool in pools {
        let mut next = Vec::with_capacity(combos.len() * pool.len());
        for combo in &combos {
            for item in pool {
                let mut extended = combo.clone();
                extended.push(item.clone());
                next.push(extended);
            }
        }
        combos = next;
    }
    combos
}

/// If `text` is `'!'?` followed by a single paren group spanning to the end
/// of the string, return `(negated, interior)` with the outer parens
/// stripped. Otherwise `None`.
fn strip_negatable_wrapping_group(text: &str) -> Option<(bool, &str)> {
    let (negated, body) = match text.strip_prefix('!') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, text),
    };
    if !body.starts_with('(') || !body.ends_with(')') {
        return None;
    }
    let mut depth = 0i32;
    for (i, c) in body.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 && i != body.len() - 1 {
                    return None;
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return None;
    }
    Some((negated, &body[1..body.len() - 1]))
}

/// Split `text` on top-level occurrences of `sep`, i.e. ones not nested
/// inside a `(...)` group.
fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            c2 if c2 == sep && depth == 0 => {
                parts.push(text[start..i].trim());
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(text[start..].trim());
    parts
}

/// Find the first three non-nested `(...)` groups in `text`, mirroring a
/// non-greedy `\(.*?\)` scan applied three times in sequence.
fn extract_three_paren_groups(text: &str) -> Option<[&str; 3]> {
    let mut groups = Vec::with_capacity(3);
    let mut rest = text;
    let mut base = 0;
    while groups.len() < 3 {
        let open = rest.find('(')?;
        let close = rest[open..].find(')')? + open;
        groups.push(&text[base + open..base + close + 1]);
        base += close + 1;
        rest = &text[base..];
    }
    groups.try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const GREET_RULE: &str = r#"
$Greet
"{Greeter} greets."
roles:
Greeter:Person
preconditions:
(Greeter is happy)
effects:
(Greeter has greeted)
"#;

    #[test]
    fn parses_a_simple_rule() {
        let rules = RuleCompiler::parse(GREET_RULE).unwrap();
        assert_eq!(rules.len(), 1);
        let rule = &rules[0];
        assert_eq!(rule.action_name, "Greet");
        assert_eq!(rule.probability, 1.0);
        assert_eq!(rule.roles.len(), 2); // Greeter + This
        assert_eq!(rule.preconditions.len(), 1);
        assert_eq!(rule.effects.len(), 1);
    }

    #[test]
    fn parses_debug_and_response_header_suffixes() {
        let text = GREET_RULE.replacen("$Greet\n", "$Greet (response) debug\n", 1);
        let rules = RuleCompiler::parse(&text).unwrap();
        assert!(rules[0].is_response_action);
        assert!(rules[0].debug);
    }

    #[test]
    fn parses_optional_and_entity_creating_roles() {
        let text = r#"
$Note
"A note."
roles:
Writer:Person
?Witness:Person
+Note={Writer}'s Note:Prop
effects:
(Writer wrote Note)
"#;
        let rules = RuleCompiler::parse(text).unwrap();
        let rule = &rules[0];
        assert!(!rule.role("Witness").unwrap().required);
        let note_role = rule.role("Note").unwrap();
        assert_eq!(note_role.entity_name_recipe.as_deref(), Some("{Writer}'s Note"));
    }

    #[test]
    fn negated_or_expression_wraps_whole_group() {
        let text = r#"
$Rivalry
"{X} and {Y} are rivals."
roles:
X:Person
Y:Person
preconditions:
!((X likes Y) / (Y likes X))
effects:
(X and Y are rivals)
"#;
        let rules = RuleCompiler::parse(text).unwrap();
        match &rules[0].preconditions[0] {
            Condition::Or(or_expr) => {
                assert!(or_expr.negated);
                assert_eq!(or_expr.conditions.len(), 2);
            }
            other => panic!("expected an OR-expression, got {other:?}"),
        }
    }

    #[test]
    fn bare_or_expression_is_not_negated_as_a_whole() {
        let text = r#"
$Meeting
"{X} meets {Y}."
roles:
X:Person
Y:Person
preconditions:
(X is free) / (Y is free)
effects:
(X met Y)
"#;
        let rules = RuleCompiler::parse(text).unwrap();
        match &rules[0].preconditions[0] {
            Condition::Or(or_expr) => assert!(!or_expr.negated),
            other => panic!("expected an OR-expression, got {other:?}"),
        }
    }

    #[test]
    fn parses_ternary_effects() {
        let text = r#"
$Apologize
"{Apologizer} apologizes."
roles:
Apologizer:Person
Rejecter:Person
effects:
(Rejecter accepted the apology)(Rejecter is forgiving)(Rejecter rejected the apology)
"#;
        let rules = RuleCompiler::parse(text).unwrap();
        match &rules[0].effects[0] {
            Effect::Ternary(t) => {
                assert!(t.effect_if_true.is_some());
                assert!(t.effect_if_false.is_some());
            }
            other => panic!("expected a ternary effect, got {other:?}"),
        }
    }

    #[test]
    fn macro_role_expands_across_matching_roles() {
        let text = r#"
$Party
"Everyone parties."
roles:
A:Person
B:Person
preconditions:
(*:Person is happy)
effects:
(*:Person has partied)
"#;
        let rules = RuleCompiler::parse(text).unwrap();
        assert_eq!(rules[0].preconditions.len(), 2);
        assert_eq!(rules[0].effects.len(), 2);
    }

    #[test]
    fn rejects_action_string_with_undefined_role_reference() {
        let text = GREET_RULE.replace("{Greeter} greets.", "{Stranger} greets.");
        assert!(RuleCompiler::parse(&text).is_err());
    }

    #[test]
    fn rejects_duplicate_action_names() {
        let text = format!("{GREET_RULE}\n{GREET_RULE}");
        assert!(RuleCompiler::parse(&text).is_err());
    }

    #[test]
    fn rejects_response_action_to_unknown_rule() {
        let text = r#"
$A
"A happens."
roles:
X:Person
responses:
B(Y=X)
"#;
        assert!(RuleCompiler::parse(text).is_err());
    }

    #[test]
    fn rule_display_round_trips_through_recompilation() {
        // Re-compiling a rule's raw definition should yield an equivalent IR.
        let rules = RuleCompiler::parse(GREET_RULE).unwrap();
        let re_rendered = rules[0].to_string();
        let re_compiled = RuleCompiler::parse(&re_rendered).unwrap();
        assert_eq!(re_compiled[0].action_name, rules[0].action_name);
        assert_eq!(re_compiled[0].preconditions.len(), rules[0].preconditions.len());
        assert_eq!(re_compiled[0].effects.len(), rules[0].effects.len());
    }
}
