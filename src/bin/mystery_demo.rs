//! A worked driver: runs the bundled "railroad station" mystery through
//! both engines and prints the resulting prose to stdout.
//!
//! This is the kind of thin wiring layer an application owns, not the
//! core crate: it uses nothing `RuleEngine`, `GrammarEngine`, and
//! `DocumentSink` don't already expose. It runs until a briefing fires,
//! finds the detective/victim/culprit by scanning facts, generates prose
//! for every action that involves one of them, and hands it all to a
//! document sink — a `RecordingSink` standing in for the real PDF backend
//! that lives outside this crate.
//!
//! Usage: `mystery_demo [seed]` — an optional `u64` seed makes the run
//! reproducible; with none, both engines draw from entropy.

use std::collections::HashMap;
use std::path::Path;

use chrono::Local;
use mythos::{
    Alignment, DocumentSink, EngineSeed, GrammarEngine, GrammarEngineOptions, ImageScale, Margins, PageSize,
    RecordingSink, RuleEngine, RuleEngineOptions, Style,
};

const DOMAIN_SOURCE: &str = include_str!("../../demos/mystery/domain.txt");
const RULES_SOURCE: &str = include_str!("../../demos/mystery/rules.txt");
const GRAMMAR_SOURCE: &str = include_str!("../../demos/mystery/grammar.txt");

/// A rule never fails to make progress toward `Briefing` in this domain (its
/// role bindings are fully determined by the initial facts), but a bound
/// keeps a misconfigured run from spinning forever.
const MAX_BRIEFING_ATTEMPTS: usize = 200;
const FOLLOWUP_ATTEMPTS: usize = 40;

fn main() -> mythos::Result<()> {
    env_logger::init();

    let seed = std::env::args().nth(1).and_then(|arg| arg.parse::<u64>().ok());
    let rule_seed = seed.map(EngineSeed::Seeded).unwrap_or(EngineSeed::Entropy);
    let grammar_seed = seed.map(|s| EngineSeed::Seeded(s.wrapping_add(1))).unwrap_or(EngineSeed::Entropy);

    let mut rule_engine = RuleEngine::from_sources(
        DOMAIN_SOURCE,
        RULES_SOURCE,
        RuleEngineOptions { shuffle_randomly: true, seed: rule_seed },
    )?;

    let mut attempts = 0;
    while !rule_engine.produced_action("Briefing") && attempts < MAX_BRIEFING_ATTEMPTS {
        rule_engine.execute(1)?;
        attempts += 1;
    }
    if !rule_engine.produced_action("Briefing") {
        log::warn!("no briefing fired after {MAX_BRIEFING_ATTEMPTS} attempts; the domain's roles may be unsatisfiable");
    }
    rule_engine.execute(FOLLOWUP_ATTEMPTS)?;

    let detective = find_by_fact_suffix(&rule_engine, "Person", "is a detective")
        .expect("domain file always casts exactly one detective");
    let victim =
        find_by_fact_suffix(&rule_engine, "Person", "is the victim").expect("domain file always casts exactly one victim");
    let culprit =
        find_by_fact_suffix(&rule_engine, "Person", "is the culprit").expect("domain file always casts exactly one culprit");

    let mut plot = Vec::new();
    for name in [culprit.as_str(), victim.as_str(), detective.as_str()] {
        for action in rule_engine.actions_involving(name) {
            plot.push(action.clone());
        }
    }

    let corpus_dir = Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/demos/mystery/corpus"));
    let mut grammar_engine = GrammarEngine::from_source(
        GRAMMAR_SOURCE,
        corpus_dir,
        HashMap::new(),
        GrammarEngineOptions { seed: grammar_seed },
    )?;

    let filename = format!("mystery_{}.txt", Local::now().format("%Y%m%d_%H%M%S"));
    let mut book = RecordingSink::new();
    book.open(
        &filename,
        PageSize { width_in: 8.5, height_in: 5.5 },
        Margins { x_in: 1.0, y_in: 1.0 },
        Style::new().alignment(Alignment::Center),
    );
    book.append_paragraph("MURDER AT THE RAILROAD STATION");
    book.append_spacer(0.5);
    book.append_paragraph(&grammar_engine.generate("TownRumor", false)?);
    book.append_page_break();

    book.set_style(Style::new().alignment(Alignment::Left));
    for action in &plot {
        for (role_name, entity) in &action.bindings {
            entity.add_to_grammar_engine_state(&mut grammar_engine, role_name);
        }
        let prose = grammar_engine.generate(&action.name, false)?;
        book.append_paragraph(&prose);
        book.append_spacer(0.25);
    }
    book.append_page_break();

    book.set_style(Style::new().font_color("white").background_color("black"));
    book.append_paragraph(&format!("{detective} closes the file. The case of {victim}'s death is solved."));
    book.append_image("railroad_station.png", ImageScale::ProportionalWidth { width_in: 4.0 });
    book.append_page_break();

    book.set_style(Style::new().alignment(Alignment::Left));
    book.append_paragraph("Appendix: Facts");
    let mut facts: Vec<_> = rule_engine.memory().facts().iter().collect();
    facts.sort();
    for fact in facts {
        book.append_paragraph(fact);
    }
    book.finalize(true);

    for paragraph in book.paragraphs() {
        println!("{paragraph}");
        println!();
    }

    Ok(())
}

fn find_by_fact_suffix(engine: &RuleEngine, entity_type: &str, fact_suffix: &str) -> Option<String> {
    engine
        .domain()
        .entities_of_type(entity_type)
        .iter()
        .find(|entity| engine.memory().has_fact(&format!("{} {fact_suffix}", entity.name)))
        .map(|entity| entity.name.clone())
}
