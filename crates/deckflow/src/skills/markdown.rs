//! Markdown deck parsing.
//!
//! The accepted dialect is what the draft step produces: slides separated by
//! `---` lines, a `#` heading per slide, `-`/`*`/`+`/`1.` bullets, free
//! paragraphs, and an optional trailing `Notes:` block.

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use tracing::info;

use super::response::strip_code_fence;
use super::{names, DraftDocument, ParsedDeck, Skill, SkillInput, Slide};
use crate::{Error, Result};

lazy_static! {
    static ref HEADING: Regex = Regex::new(r"^#{1,6}\s+(.*)$").expect("valid regex");
    static ref BULLET: Regex = Regex::new(r"^\s*(?:[-*+]|\d+[.)])\s+(.*)$").expect("valid regex");
    static ref NOTES: Regex = Regex::new(r"(?i)^(?:speaker\s+)?notes:\s*(.*)$").expect("valid regex");
}

/// Split Markdown into slides. Sections with neither a heading nor content
/// are dropped; untitled sections keep an empty title for the quality step
/// to flag.
pub fn parse_markdown(markdown: &str) -> Result<Vec<Slide>> {
    let mut slides = Vec::new();
    let mut section: Vec<&str> = Vec::new();

    for line in strip_code_fence(markdown).lines() {
        if line.trim() == "---" {
            push_section(&mut slides, &section);
            section.clear();
        } else {
            section.push(line);
        }
    }
    push_section(&mut slides, &section);

    if slides.is_empty() {
        return Err(Error::Validation("Draft contains no slides".to_string()));
    }
    Ok(slides)
}

/// Index of the line opening the speaker notes: a `Notes:` line with no
/// bullet or heading after it.
fn notes_start(lines: &[&str]) -> Option<usize> {
    let start = lines.iter().position(|line| NOTES.is_match(line.trim()))?;
    let content_follows = lines[start + 1..]
        .iter()
        .any(|line| BULLET.is_match(line) || HEADING.is_match(line.trim()));
    if content_follows {
        notes_start(&lines[start + 1..]).map(|next| start + 1 + next)
    } else {
        Some(start)
    }
}

fn push_section(slides: &mut Vec<Slide>, lines: &[&str]) {
    let mut slide = Slide {
        index: slides.len() + 1,
        ..Slide::default()
    };
    let (content, notes) = match notes_start(lines) {
        Some(start) => (&lines[..start], &lines[start..]),
        None => (lines, &[][..]),
    };
    let mut paragraph: Vec<String> = Vec::new();

    let flush = |paragraph: &mut Vec<String>, body: &mut Vec<String>| {
        if !paragraph.is_empty() {
            body.push(paragraph.join(" "));
            paragraph.clear();
        }
    };

    for line in content {
        let trimmed = line.trim();

        if trimmed.is_empty() {
            flush(&mut paragraph, &mut slide.body);
            continue;
        }
        if let Some(caps) = HEADING.captures(trimmed) {
            if slide.title.is_empty() {
                flush(&mut paragraph, &mut slide.body);
                slide.title = caps[1].trim().to_string();
                continue;
            }
        }
        if let Some(caps) = BULLET.captures(line) {
            flush(&mut paragraph, &mut slide.body);
            let bullet = caps[1].trim();
            if !bullet.is_empty() {
                slide.bullets.push(bullet.to_string());
            }
            continue;
        }
        paragraph.push(trimmed.trim_start_matches('#').trim().to_string());
    }
    flush(&mut paragraph, &mut slide.body);

    let notes: Vec<&str> = notes
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let line = line.trim();
            match (i, NOTES.captures(line)) {
                (0, Some(caps)) => caps.get(1).map_or("", |m| m.as_str()).trim(),
                _ => line,
            }
        })
        .filter(|line| !line.is_empty())
        .collect();
    if !notes.is_empty() {
        slide.notes = Some(notes.join(" "));
    }

    if !slide.title.is_empty() || !slide.bullets.is_empty() || !slide.body.is_empty() {
        slides.push(slide);
    }
}

/// Parses the drafted Markdown into structured slides.
pub struct MarkdownSkill;

#[async_trait]
impl Skill for MarkdownSkill {
    fn name(&self) -> &str {
        names::PARSE
    }

    fn required_dependencies(&self) -> &[&'static str] {
        &[names::DRAFT]
    }

    async fn run(&self, input: &SkillInput<'_>) -> Result<Value> {
        let draft: DraftDocument = input.output(names::DRAFT)?;
        let slides = parse_markdown(&draft.markdown)?;
        info!("Parsed {} slides for run {}", slides.len(), input.run_id);

        Ok(serde_json::to_value(ParsedDeck {
            title: draft.title,
            subtitle: draft.subtitle,
            slides,
        })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_deck() {
        let markdown = "\
# Why Rust
- Memory safety without GC
* Zero-cost abstractions
1. Fearless concurrency

Rust is used in production
at many companies.

Notes: Mention Firefox.
And Android.

---

## Ownership
Every value has one owner.
";
        let slides = parse_markdown(markdown).unwrap();
        assert_eq!(slides.len(), 2);

        let first = &slides[0];
        assert_eq!(first.index, 1);
        assert_eq!(first.title, "Why Rust");
        assert_eq!(
            first.bullets,
            vec!["Memory safety without GC", "Zero-cost abstractions", "Fearless concurrency"]
        );
        assert_eq!(first.body, vec!["Rust is used in production at many companies."]);
        assert_eq!(first.notes.as_deref(), Some("Mention Firefox. And Android."));

        let second = &slides[1];
        assert_eq!(second.index, 2);
        assert_eq!(second.title, "Ownership");
        assert!(second.bullets.is_empty());
        assert_eq!(second.body, vec!["Every value has one owner."]);
        assert_eq!(second.notes, None);
    }

    #[test]
    fn test_parse_skips_empty_sections_and_keeps_untitled() {
        let slides = parse_markdown("---\n\n---\n- orphan bullet\n---\n# Last").unwrap();
        assert_eq!(slides.len(), 2);
        assert_eq!(slides[0].title, "");
        assert_eq!(slides[0].bullets, vec!["orphan bullet"]);
        assert_eq!(slides[1].index, 2);
        assert_eq!(slides[1].title, "Last");
    }

    #[test]
    fn test_parse_nested_bullets_and_second_heading() {
        let slides = parse_markdown("# Title\n- top\n  - nested\n### Sub heading").unwrap();
        assert_eq!(slides[0].bullets, vec!["top", "nested"]);
        assert_eq!(slides[0].body, vec!["Sub heading"]);
    }

    #[test]
    fn test_note_in_body_does_not_swallow_bullets() {
        let slides =
            parse_markdown("# Title\n\nNote: this API is experimental.\n\n- first point\n- second point")
                .unwrap();
        assert_eq!(slides[0].body, vec!["Note: this API is experimental."]);
        assert_eq!(slides[0].bullets, vec!["first point", "second point"]);
        assert_eq!(slides[0].notes, None);
    }

    #[test]
    fn test_notes_followed_by_bullets_stay_content() {
        let slides = parse_markdown(
            "# Title\nNotes: early remark\n- kept bullet\n\nSpeaker notes:\nClose with a demo.",
        )
        .unwrap();
        assert_eq!(slides[0].bullets, vec!["kept bullet"]);
        assert_eq!(slides[0].body, vec!["Notes: early remark"]);
        assert_eq!(slides[0].notes.as_deref(), Some("Close with a demo."));
    }

    #[test]
    fn test_parse_empty_draft_is_validation_error() {
        assert!(matches!(parse_markdown("\n---\n"), Err(Error::Validation(_))));
        assert!(matches!(parse_markdown(""), Err(Error::Validation(_))));
    }
}
