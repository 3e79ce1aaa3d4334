//! Domain compiler: parses a domain file into a typed entity pool and
//! an initial fact set.
//!
//! ```text
//! <BEGIN ENTITIES>
//! alice : Person
//! bob : Person
//! alice.age = 30
//! <END ENTITIES>
//!
//! <BEGIN FACTS>
//! <alice> is happy
//! <END FACTS>
//! ```

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::error::{MythosError, Result};
use crate::lexer::{brackets_balanced, is_role_reference, meaningful_lines};
use crate::types::{Entity, Fact};

const ENTITIES_BEGIN: &str = "<BEGIN ENTITIES>";
const ENTITIES_END: &str = "<END ENTITIES>";
const FACTS_BEGIN: &str = "<BEGIN FACTS>";
const FACTS_END: &str = "<END FACTS>";

/// The entity pool produced by the domain compiler and mutated by the rule
/// engine as entity-creating roles fire.
#[derive(Debug, Clone, Default)]
pub struct Domain {
    by_type: HashMap<String, Vec<Entity>>,
    names: HashSet<String>,
}

impl Domain {
    pub(crate) fn new() -> Self {
        Domain::default()
    }

    /// Insert a new entity. Fails if its name is already taken.
    pub fn insert(&mut self, entity: Entity) -> Result<()> {
        if !self.names.insert(entity.name.clone()) {
            return Err(MythosError::validation(format!(
                "entity name '{}' is already in use",
                entity.name
            )));
        }
        self.by_type.entry(entity.entity_type.clone()).or_default().push(entity);
        Ok(())
    }

    pub fn entities_of_type(&self, entity_type: &str) -> &[Entity] {
        self.by_type.get(entity_type).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_type(&self, entity_type: &str) -> bool {
        self.by_type.contains_key(entity_type)
    }

    pub fn entity_by_name(&self, name: &str) -> Option<&Entity> {
        self.by_type.values().flatten().find(|e| e.name == name)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// The smallest ` (k)`, k >= 1, that, appended to `base`, yields a name
    /// not already in the domain — the entity-creation collision rule.
    pub(crate) fn disambiguate_name(&self, base: &str) -> String {
        if !self.contains_name(base) {
            return base.to_string();
        }
        let mut k = 1;
        loop {
            let candidate = format!("{base} ({k})");
            if !self.contains_name(&candidate) {
                return candidate;
            }
            k += 1;
        }
    }
}

pub struct DomainCompiler;

impl DomainCompiler {
    /// Parse a full domain file into a `(Domain, initial_facts)` pair.
    pub fn parse(text: &str) -> Result<(Domain, HashSet<Fact>)> {
        let entities_block = Self::extract_block(text, ENTITIES_BEGIN, ENTITIES_END)?;
        let facts_block = Self::extract_block(text, FACTS_BEGIN, FACTS_END)?;

        let domain = Self::parse_entities(entities_block)?;
        let facts = Self::parse_facts(facts_block, &domain)?;

        debug!(
            "domain compiler parsed {} entity types and {} initial facts",
            domain.by_type.len(),
            facts.len()
        );
        Ok((domain, facts))
    }

    fn extract_block<'a>(text: &'a str, begin: &str, end: &str) -> Result<&'a str> {
        let begin_pos = text
            .find(begin)
            .ok_or_else(|| MythosError::parse(format!("missing '{begin}' marker")))?;
        let end_pos = text
            .find(end)
            .ok_or_else(|| MythosError::parse(format!("missing '{end}' marker")))?;
        if end_pos < begin_pos {
            return Err(MythosError::parse(format!("'{end}' appears before '{begin}'")));
        }
        Ok(&text[begin_pos + begin.len()..end_pos])
    }

    fn parse_entities(block: &str) -> Result<Domain> {
        let mut domain = Domain::new();
        // entity_name -> index into its type's vec, so attribute lines
        // (which may arrive in any order relative to their entity's
        // definition line, as long as the entity line comes first) can
        // find their entity again.
        let mut index: HashMap<String, (String, usize)> = HashMap::new();

        for line in meaningful_lines(block) {
            if let Some(eq_pos) = line.find('=') {
                let (lhs, value) = (line[..eq_pos].trim(), line[eq_pos + 1..].trim());
                let dot_pos = lhs
                    .find('.')
                    .ok_or_else(|| MythosError::parse(format!("malformed attribute line: '{line}'")))?;
                let (entity_name, attr) = (lhs[..dot_pos].trim(), lhs[dot_pos + 1..].trim());
                let (entity_type, idx) = index.get(entity_name).cloned().ok_or_else(|| {
                    MythosError::parse(format!("attribute for unknown entity '{entity_name}': '{line}'"))
                })?;
                let entities = domain.by_type.get_mut(&entity_type).expect("indexed type exists");
                entities[idx].attributes.insert(attr.to_string(), value.to_string());
            } else if let Some(colon_pos) = line.find(':') {
                let (name, entity_type) = (line[..colon_pos].trim(), line[colon_pos + 1..].trim());
                if name.is_empty() || entity_type.is_empty() {
                    return Err(MythosError::parse(format!("malformed entity definition: '{line}'")));
                }
                if domain.contains_name(name) {
                    return Err(MythosError::parse(format!("duplicate entity name '{name}'")));
                }
                let entity = Entity::new(name, entity_type);
                domain.insert(entity)?;
                let idx = domain.by_type.get(entity_type).expect("just inserted").len() - 1;
                index.insert(name.to_string(), (entity_type.to_string(), idx));
            } else {
                return Err(MythosError::parse(format!("unrecognized entity-block line: '{line}'")));
            }
        }
        Ok(domain)
    }

    fn parse_facts(block: &str, domain: &Domain) -> Result<HashSet<Fact>> {
        let mut facts = HashSet::new();
        for line in meaningful_lines(block) {
            if !brackets_balanced(line, '<', '>') {
                return Err(MythosError::parse(format!("unbalanced '<...>' reference in fact: '{line}'")));
            }
            let fact = Self::parse_fact_line(line, domain)?;
            if !facts.insert(fact.clone()) {
                return Err(MythosError::parse(format!("duplicate initial fact: '{fact}'")));
            }
        }
        Ok(facts)
    }

    /// Resolve `<Name>` references and reject capital-initial words outside
    /// brackets (they would be role references, which are meaningless in a
    /// ground fact).
    fn parse_fact_line(line: &str, domain: &Domain) -> Result<Fact> {
        let mut tokens: Vec<String> = Vec::new();
        let mut chars = line.chars().peekable();
        let mut literal_buf = String::new();

        let flush_literal = |buf: &mut String, tokens: &mut Vec<String>| -> Result<()> {
            for word in buf.split_whitespace() {
                if is_role_reference(word) {
                    return Err(MythosError::parse(format!(
                        "role reference '{word}' is not allowed outside '<...>' in a ground fact: '{line}'"
                    )));
                }
                tokens.push(word.to_string());
            }
            buf.clear();
            Ok(())
        };

        while let Some(c) = chars.next() {
            if c == '<' {
                flush_literal(&mut literal_buf, &mut tokens)?;
                let mut name = String::new();
                for c2 in chars.by_ref() {
                    if c2 == '>' {
                        break;
                    }
                    name.push(c2);
                }
                let name = name.trim();
                if !domain.contains_name(name) {
                    return Err(MythosError::parse(format!(
                        "unknown entity '{name}' referenced in fact: '{line}'"
                    )));
                }
                tokens.push(name.to_string());
            } else {
                literal_buf.push(c);
            }
        }
        flush_literal(&mut literal_buf, &mut tokens)?;

        if tokens.is_empty() {
            return Err(MythosError::parse(format!("empty fact line: '{line}'")));
        }
        Ok(tokens.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
<BEGIN ENTITIES>
alice : Person
bob : Person
alice.age = 30
<END ENTITIES>

<BEGIN FACTS>
<alice> is happy
<bob> likes <alice>
<END FACTS>
"#;

    #[test]
    fn parses_entities_and_attributes() {
        let (domain, _) = DomainCompiler::parse(SAMPLE).unwrap();
        let people = domain.entities_of_type("Person");
        assert_eq!(people.len(), 2);
        let alice = domain.entity_by_name("alice").unwrap();
        assert_eq!(alice.attributes.get("age"), Some(&"30".to_string()));
    }

    #[test]
    fn parses_facts_substituting_entity_names() {
        let (domain, facts) = DomainCompiler::parse(SAMPLE).unwrap();
        assert!(facts.contains("alice is happy"));
        assert!(facts.contains("bob likes alice"));
        let _ = domain;
    }

    #[test]
    fn rejects_duplicate_entity_names() {
        let text = SAMPLE.replace("bob : Person", "alice : Person");
        assert!(DomainCompiler::parse(&text).is_err());
    }

    #[test]
    fn rejects_duplicate_facts() {
        let text = SAMPLE.replace("<bob> likes <alice>", "<alice> is happy");
        assert!(DomainCompiler::parse(&text).is_err());
    }

    #[test]
    fn rejects_unknown_entity_reference() {
        let text = SAMPLE.replace("<bob> likes <alice>", "<carol> is happy");
        assert!(DomainCompiler::parse(&text).is_err());
    }

    #[test]
    fn rejects_capitalized_literal_outside_brackets() {
        let text = SAMPLE.replace("<alice> is happy", "<alice> Is happy");
        assert!(DomainCompiler::parse(&text).is_err());
    }

    #[test]
    fn rejects_missing_markers() {
        assert!(DomainCompiler::parse("no markers here").is_err());
    }

    #[test]
    fn disambiguate_name_finds_smallest_free_suffix() {
        let mut domain = Domain::new();
        domain.insert(Entity::new("alice's Note", "Prop")).unwrap();
        assert_eq!(domain.disambiguate_name("alice's Note"), "alice's Note (1)");
        domain.insert(Entity::new("alice's Note (1)", "Prop")).unwrap();
        assert_eq!(domain.disambiguate_name("alice's Note"), "alice's Note (2)");
    }
}
