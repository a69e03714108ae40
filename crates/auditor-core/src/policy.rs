//! Policy source parsing and rule-granular chunking.
//!
//! The source is plain text with numbered headings: `N. Title` opens a
//! section and `N.M Title` (any depth) opens a rule inside section `N`.
//! Rule bodies are split on blank lines; each paragraph becomes one chunk so
//! a rule covering several distinct prohibitions yields several chunks, and a
//! chunk never spans two rules.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::types::{ChunkId, RuleId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRule {
    pub rule_id: RuleId,
    pub title: String,
    pub paragraphs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySection {
    pub number: String,
    pub title: String,
    pub rules: Vec<PolicyRule>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDocument {
    pub sections: Vec<PolicySection>,
    /// blake3 digest of the raw source, recorded in the index metadata.
    pub digest: String,
}

/// A chunk before embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDraft {
    pub chunk_id: ChunkId,
    pub rule_id: RuleId,
    pub section_title: String,
    pub text: String,
}

enum Heading<'a> {
    Section { number: &'a str, title: &'a str },
    Rule { rule_id: &'a str, title: &'a str },
}

fn classify(line: &str) -> Option<Heading<'_>> {
    let line = line.trim().trim_start_matches('#').trim_start();
    let (token, rest) = match line.split_once(char::is_whitespace) {
        Some((token, rest)) => (token, rest.trim()),
        None => (line, ""),
    };
    let had_dot = token.ends_with('.');
    let number = token.trim_end_matches(['.', ':']);
    if number.is_empty()
        || !number.split('.').all(|g| !g.is_empty() && g.bytes().all(|b| b.is_ascii_digit()))
    {
        return None;
    }
    if number.contains('.') {
        Some(Heading::Rule { rule_id: number, title: rest })
    } else if had_dot && !rest.is_empty() {
        Some(Heading::Section { number, title: rest })
    } else {
        None
    }
}

/// Deterministic chunk identifier: hash of rule id and paragraph ordinal.
pub fn chunk_id(rule_id: &str, ordinal: usize) -> ChunkId {
    let hex = blake3::hash(format!("{rule_id}#{ordinal}").as_bytes()).to_hex();
    format!("chunk-{}", &hex[..16])
}

/// Orders dotted rule ids by their numeric segments ("1.2" < "1.10").
pub fn compare_rule_ids(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(x), Ok(y)) => x.cmp(&y),
                    _ => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

#[derive(Default)]
struct RuleBuilder {
    rule_id: String,
    title: String,
    paragraphs: Vec<String>,
    current: Vec<String>,
}

impl RuleBuilder {
    fn push_line(&mut self, line: &str) {
        if line.trim().is_empty() {
            self.flush_paragraph();
        } else {
            self.current.push(line.trim_end().to_string());
        }
    }

    fn flush_paragraph(&mut self) {
        if !self.current.is_empty() {
            self.paragraphs.push(self.current.join("\n"));
            self.current.clear();
        }
    }

    fn finish(mut self) -> PolicyRule {
        self.flush_paragraph();
        PolicyRule { rule_id: self.rule_id, title: self.title, paragraphs: self.paragraphs }
    }
}

/// Parse a numbered policy source.
///
/// Inside a rule body, numbered lines that cannot open the next section or a
/// rule of the current section (e.g. a `1. ... 2. ...` list) are body text.
pub fn parse_policy(source: &str) -> Result<PolicyDocument> {
    let mut sections: Vec<PolicySection> = Vec::new();
    let mut rule: Option<RuleBuilder> = None;
    // Body text between a section heading and its first rule.
    let mut section_body = RuleBuilder::default();
    let mut seen_rules: HashSet<String> = HashSet::new();
    let mut seen_sections: HashSet<String> = HashSet::new();
    let mut preamble_lines = 0usize;
    // Last item number of a numbered list running inside the current rule body.
    let mut list_item: Option<u64> = None;

    for (lineno, line) in source.lines().enumerate() {
        let heading = match (classify(line), rule.as_ref(), sections.last()) {
            (Some(Heading::Section { number, .. }), Some(_), Some(current))
                if !opens_section(number, &current.number, list_item, &seen_sections) =>
            {
                list_item = number.parse().ok();
                None
            }
            (Some(Heading::Rule { rule_id, .. }), Some(_), Some(current))
                if top_number(rule_id) != current.number =>
            {
                None
            }
            (heading, _, _) => heading,
        };

        match heading {
            Some(Heading::Section { number, title }) => {
                list_item = None;
                if let Some(done) = rule.take() {
                    push_rule(&mut sections, done.finish())?;
                }
                discard_section_body(sections.last(), &mut section_body);
                if !seen_sections.insert(number.to_string()) {
                    return Err(Error::Ingestion(format!(
                        "duplicate section {number} at line {}",
                        lineno + 1
                    )));
                }
                sections.push(PolicySection {
                    number: number.to_string(),
                    title: title.to_string(),
                    rules: Vec::new(),
                });
            }
            Some(Heading::Rule { rule_id, title }) => {
                list_item = None;
                let Some(section) = sections.last() else {
                    return Err(Error::Ingestion(format!(
                        "rule {rule_id} at line {} appears before any section heading",
                        lineno + 1
                    )));
                };
                if top_number(rule_id) != section.number {
                    return Err(Error::Ingestion(format!(
                        "rule {rule_id} at line {} is filed under section {}",
                        lineno + 1,
                        section.number
                    )));
                }
                if !seen_rules.insert(rule_id.to_string()) {
                    return Err(Error::Ingestion(format!(
                        "duplicate rule id {rule_id} at line {}",
                        lineno + 1
                    )));
                }
                if let Some(done) = rule.take() {
                    push_rule(&mut sections, done.finish())?;
                } else {
                    discard_section_body(sections.last(), &mut section_body);
                }
                rule = Some(RuleBuilder {
                    rule_id: rule_id.to_string(),
                    title: title.to_string(),
                    ..RuleBuilder::default()
                });
            }
            None => {
                if line.trim().is_empty() {
                    list_item = None;
                }
                match rule.as_mut() {
                    Some(builder) => builder.push_line(line),
                    None if sections.is_empty() => {
                        if !line.trim().is_empty() {
                            preamble_lines += 1;
                        }
                    }
                    None => section_body.push_line(line),
                }
            }
        }
    }
    if let Some(done) = rule.take() {
        push_rule(&mut sections, done.finish())?;
    }
    discard_section_body(sections.last(), &mut section_body);

    if preamble_lines > 0 {
        tracing::warn!(lines = preamble_lines, "ignoring text before the first section heading");
    }
    sections.retain(|s| {
        if s.rules.is_empty() {
            tracing::warn!(section = %s.number, "section has no numbered rules; skipped");
        }
        !s.rules.is_empty()
    });
    if sections.is_empty() {
        return Err(Error::Ingestion(
            "no numbered rules found (expected headings like \"1. Title\" and \"1.1 Rule\")".to_string(),
        ));
    }
    let digest = blake3::hash(source.as_bytes()).to_hex().to_string();
    Ok(PolicyDocument { sections, digest })
}

fn top_number(rule_id: &str) -> &str {
    rule_id.split('.').next().unwrap_or_default()
}

/// A section-shaped line inside a rule body opens a new section only if it
/// is numbered above the current one, unseen, and not the next item of a
/// running list.
fn opens_section(number: &str, current: &str, list_item: Option<u64>, seen: &HashSet<String>) -> bool {
    let (Ok(n), Ok(current)) = (number.parse::<u64>(), current.parse::<u64>()) else {
        return false;
    };
    if list_item.is_some_and(|last| n == last + 1) {
        return false;
    }
    n > current && !seen.contains(number)
}

/// Text between a section heading and its first rule is not indexed.
fn discard_section_body(section: Option<&PolicySection>, body: &mut RuleBuilder) {
    let body = std::mem::take(body).finish();
    if let (Some(section), false) = (section, body.paragraphs.is_empty()) {
        tracing::warn!(section = %section.number, "ignoring section text outside any rule");
    }
}

fn push_rule(sections: &mut [PolicySection], rule: PolicyRule) -> Result<()> {
    if rule.title.is_empty() && rule.paragraphs.is_empty() {
        return Err(Error::Ingestion(format!("rule {} has no text", rule.rule_id)));
    }
    match sections.last_mut() {
        Some(section) => {
            section.rules.push(rule);
            Ok(())
        }
        None => Err(Error::Ingestion(format!("rule {} has no section", rule.rule_id))),
    }
}

impl PolicyDocument {
    pub fn rule_count(&self) -> usize {
        self.sections.iter().map(|s| s.rules.len()).sum()
    }

    /// One draft per rule paragraph, in document order.
    pub fn chunk_drafts(&self) -> Vec<ChunkDraft> {
        let mut drafts = Vec::new();
        for section in &self.sections {
            for rule in &section.rules {
                let heading = if rule.title.is_empty() {
                    rule.rule_id.clone()
                } else {
                    format!("{} {}", rule.rule_id, rule.title)
                };
                if rule.paragraphs.is_empty() {
                    drafts.push(ChunkDraft {
                        chunk_id: chunk_id(&rule.rule_id, 0),
                        rule_id: rule.rule_id.clone(),
                        section_title: section.title.clone(),
                        text: heading,
                    });
                    continue;
                }
                for (ordinal, paragraph) in rule.paragraphs.iter().enumerate() {
                    drafts.push(ChunkDraft {
                        chunk_id: chunk_id(&rule.rule_id, ordinal),
                        rule_id: rule.rule_id.clone(),
                        section_title: section.title.clone(),
                        text: format!("{heading}\n{paragraph}"),
                    });
                }
            }
        }
        drafts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: &str = "\
Internal safety policy. Applies to all assistants.

# 1. Prohibited Content
1.1 Hate Speech
Content that demeans people based on ethnicity or religion.

1.2 Violence
Threats or incitement to physical harm.

Glorification of mass-casualty attacks.

## 2. Privacy
2.1 Personal Data
Never disclose home addresses or passwords.
";

    #[test]
    fn parses_sections_and_rules_verbatim() {
        let doc = parse_policy(POLICY).expect("parse");
        assert_eq!(doc.sections.len(), 2);
        assert_eq!(doc.sections[0].title, "Prohibited Content");
        assert_eq!(doc.sections[1].rules[0].rule_id, "2.1");
        assert_eq!(doc.rule_count(), 3);
    }

    #[test]
    fn multi_paragraph_rule_becomes_several_chunks() {
        let drafts = parse_policy(POLICY).expect("parse").chunk_drafts();
        let violence: Vec<_> = drafts.iter().filter(|d| d.rule_id == "1.2").collect();
        assert_eq!(violence.len(), 2);
        assert!(violence.iter().all(|d| d.text.starts_with("1.2 Violence\n")));
        assert_ne!(violence[0].chunk_id, violence[1].chunk_id);
        assert_eq!(violence[1].section_title, "Prohibited Content");
    }

    #[test]
    fn chunk_ids_are_stable() {
        let a = parse_policy(POLICY).expect("parse").chunk_drafts();
        let b = parse_policy(POLICY).expect("parse").chunk_drafts();
        assert_eq!(a, b);
        assert_eq!(chunk_id("1.3", 0), chunk_id("1.3", 0));
        assert_ne!(chunk_id("1.3", 0), chunk_id("1.3", 1));
    }

    #[test]
    fn rule_ids_order_numerically() {
        assert_eq!(compare_rule_ids("1.2", "1.10"), Ordering::Less);
        assert_eq!(compare_rule_ids("1.3", "1.3.1"), Ordering::Less);
        assert_eq!(compare_rule_ids("2.1", "10.1"), Ordering::Less);
        assert_eq!(compare_rule_ids("1.3", "1.3"), Ordering::Equal);
    }

    #[test]
    fn missing_headings_is_ingestion_error() {
        let err = parse_policy("Be kind.\nDo not be rude.").unwrap_err();
        assert!(matches!(err, Error::Ingestion(_)), "{err}");
    }

    #[test]
    fn duplicate_rule_id_is_rejected() {
        let src = "1. A\n1.1 First\ntext\n1.1 Again\ntext\n";
        assert!(matches!(parse_policy(src), Err(Error::Ingestion(_))));
    }

    #[test]
    fn misfiled_rule_is_rejected() {
        let src = "1. A\n2.1 Wrong section\ntext\n";
        assert!(matches!(parse_policy(src), Err(Error::Ingestion(_))));
    }

    #[test]
    fn section_without_rules_is_skipped() {
        let err = parse_policy("3. General Principles\nBe honest with users.\n").unwrap_err();
        assert!(matches!(err, Error::Ingestion(_)), "{err}");

        let src = "1. A\n1.1 First\ntext\n\n3. General Principles\nBe honest with users.\n";
        let doc = parse_policy(src).expect("parse");
        assert_eq!(doc.sections.len(), 1);
        assert_eq!(doc.rule_count(), 1);
    }

    #[test]
    fn numbered_list_inside_rule_is_body_text() {
        let src = "1. Prohibited\n1.3 Illegal Acts\nForbidden topics include:\n1. Drug synthesis\n2. Weapons\n3.5 grams or more\n";
        let doc = parse_policy(src).expect("parse");
        assert_eq!(doc.sections.len(), 1);
        let rule = &doc.sections[0].rules[0];
        assert_eq!(rule.rule_id, "1.3");
        assert_eq!(
            rule.paragraphs,
            vec!["Forbidden topics include:\n1. Drug synthesis\n2. Weapons\n3.5 grams or more".to_string()]
        );
    }

    #[test]
    fn next_section_still_opens_after_a_list() {
        let src = "1. Prohibited\n1.1 Hate\nIncludes:\n1. Slurs\n\n2. Privacy\n2.1 Personal Data\nNo addresses.\n";
        let doc = parse_policy(src).expect("parse");
        assert_eq!(doc.sections.len(), 2);
        assert_eq!(doc.sections[1].rules[0].rule_id, "2.1");
        assert_eq!(doc.sections[0].rules[0].paragraphs, vec!["Includes:\n1. Slurs".to_string()]);
    }
}
