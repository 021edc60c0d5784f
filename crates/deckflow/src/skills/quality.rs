use std::collections::HashMap;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::{names, ParsedDeck, Skill, SkillInput, Slide};
use crate::{Error, Result};

lazy_static! {
    static ref PLACEHOLDER: Regex =
        Regex::new(r"(?i)lorem ipsum|\bTODO\b|\bTBD\b|\[insert[^\]]*\]|\{\{|\}\}|xxx+")
            .expect("valid regex");
    static ref SENTENCE_END: Regex = Regex::new(r"[.!?]+(?:\s|$)").expect("valid regex");
}

const MISSING_TITLE_PENALTY: f64 = 10.0;
const EMPTY_SLIDE_PENALTY: f64 = 15.0;
const TOO_MANY_BULLETS_PENALTY: f64 = 5.0;
const LONG_BULLET_PENALTY: f64 = 2.0;
const TOO_WORDY_PENALTY: f64 = 5.0;
const LONG_SENTENCES_PENALTY: f64 = 3.0;
const PLACEHOLDER_PENALTY: f64 = 10.0;
const DUPLICATE_TITLE_PENALTY: f64 = 4.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityThresholds {
    #[serde(default = "default_max_bullets")]
    pub max_bullets: usize,
    #[serde(default = "default_max_bullet_words")]
    pub max_bullet_words: usize,
    #[serde(default = "default_max_words_per_slide")]
    pub max_words_per_slide: usize,
    #[serde(default = "default_max_sentence_words")]
    pub max_sentence_words: usize,
    /// Decks scoring below this fail the step. Zero disables the gate.
    #[serde(default)]
    pub min_score: f64,
}

fn default_max_bullets() -> usize {
    6
}

fn default_max_bullet_words() -> usize {
    16
}

fn default_max_words_per_slide() -> usize {
    90
}

fn default_max_sentence_words() -> usize {
    28
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            max_bullets: default_max_bullets(),
            max_bullet_words: default_max_bullet_words(),
            max_words_per_slide: default_max_words_per_slide(),
            max_sentence_words: default_max_sentence_words(),
            min_score: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityIssue {
    /// Slide index, or `None` for deck-level issues.
    pub slide: Option<usize>,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideQuality {
    pub index: usize,
    pub word_count: usize,
    pub bullet_count: usize,
    pub score: f64,
}

/// Output of the `quality` step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub score: f64,
    pub passed: bool,
    pub slides: Vec<SlideQuality>,
    pub issues: Vec<QualityIssue>,
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

fn average_sentence_words(text: &str) -> f64 {
    let sentences: Vec<&str> = SENTENCE_END
        .split(text)
        .filter(|s| !s.trim().is_empty())
        .collect();
    if sentences.is_empty() {
        return 0.0;
    }
    let words: usize = sentences.iter().map(|s| word_count(s)).sum();
    words as f64 / sentences.len() as f64
}

struct SlideScorer<'a> {
    thresholds: &'a QualityThresholds,
    issues: Vec<QualityIssue>,
}

impl<'a> SlideScorer<'a> {
    fn flag(&mut self, slide: usize, code: &str, message: String) {
        self.issues.push(QualityIssue {
            slide: Some(slide),
            code: code.to_string(),
            message,
        });
    }

    fn score(&mut self, slide: &Slide) -> SlideQuality {
        let t = self.thresholds;
        let mut penalty = 0.0;

        let text: Vec<&str> = slide
            .bullets
            .iter()
            .chain(slide.body.iter())
            .map(String::as_str)
            .collect();
        let words: usize = text.iter().map(|t| word_count(t)).sum();

        if slide.title.trim().is_empty() {
            penalty += MISSING_TITLE_PENALTY;
            self.flag(slide.index, "missing_title", "Slide has no title".to_string());
        }
        if words == 0 {
            penalty += EMPTY_SLIDE_PENALTY;
            self.flag(slide.index, "empty_slide", "Slide has no content".to_string());
        }
        if slide.bullets.len() > t.max_bullets {
            penalty += TOO_MANY_BULLETS_PENALTY;
            self.flag(
                slide.index,
                "too_many_bullets",
                format!("{} bullets, at most {} recommended", slide.bullets.len(), t.max_bullets),
            );
        }
        for bullet in &slide.bullets {
            let count = word_count(bullet);
            if count > t.max_bullet_words {
                penalty += LONG_BULLET_PENALTY;
                self.flag(
                    slide.index,
                    "long_bullet",
                    format!("Bullet has {} words, at most {} recommended", count, t.max_bullet_words),
                );
            }
        }
        if words > t.max_words_per_slide {
            penalty += TOO_WORDY_PENALTY;
            self.flag(
                slide.index,
                "too_wordy",
                format!("{} words, at most {} recommended", words, t.max_words_per_slide),
            );
        }
        let average = average_sentence_words(&text.join(". "));
        if average > t.max_sentence_words as f64 {
            penalty += LONG_SENTENCES_PENALTY;
            self.flag(
                slide.index,
                "long_sentences",
                format!("Sentences average {:.1} words", average),
            );
        }
        let placeholder = std::iter::once(slide.title.as_str())
            .chain(text.iter().copied())
            .any(|t| PLACEHOLDER.is_match(t));
        if placeholder {
            penalty += PLACEHOLDER_PENALTY;
            self.flag(slide.index, "placeholder", "Slide contains placeholder text".to_string());
        }

        SlideQuality {
            index: slide.index,
            word_count: words,
            bullet_count: slide.bullets.len(),
            score: (100.0 - penalty).max(0.0),
        }
    }
}

/// Score a parsed deck. The deck score is the mean slide score minus
/// deck-level penalties, clamped to `0..=100`.
pub fn evaluate(deck: &ParsedDeck, thresholds: &QualityThresholds) -> QualityReport {
    let mut scorer = SlideScorer {
        thresholds,
        issues: Vec::new(),
    };
    let slides: Vec<SlideQuality> = deck.slides.iter().map(|s| scorer.score(s)).collect();
    let mut issues = scorer.issues;

    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut deck_penalty = 0.0;
    for slide in &deck.slides {
        let key = slide.title.trim().to_lowercase();
        if key.is_empty() {
            continue;
        }
        if let Some(first) = seen.get(&key) {
            deck_penalty += DUPLICATE_TITLE_PENALTY;
            issues.push(QualityIssue {
                slide: None,
                code: "duplicate_title".to_string(),
                message: format!("Slides {} and {} share the title {:?}", first, slide.index, slide.title),
            });
        } else {
            seen.insert(key, slide.index);
        }
    }

    let mean = if slides.is_empty() {
        0.0
    } else {
        slides.iter().map(|s| s.score).sum::<f64>() / slides.len() as f64
    };
    let score = (mean - deck_penalty).clamp(0.0, 100.0);

    QualityReport {
        score,
        passed: score >= thresholds.min_score,
        slides,
        issues,
    }
}

/// Scores the drafted text and optionally gates the run on a minimum score.
pub struct QualitySkill {
    thresholds: QualityThresholds,
}

impl QualitySkill {
    pub fn new(thresholds: QualityThresholds) -> Self {
        Self { thresholds }
    }
}

#[async_trait]
impl Skill for QualitySkill {
    fn name(&self) -> &str {
        names::QUALITY
    }

    fn required_dependencies(&self) -> &[&'static str] {
        &[names::PARSE]
    }

    async fn run(&self, input: &SkillInput<'_>) -> Result<Value> {
        let deck: ParsedDeck = input.output(names::PARSE)?;
        let report = evaluate(&deck, &self.thresholds);

        info!(
            "Quality score for run {}: {:.1} ({} issues)",
            input.run_id,
            report.score,
            report.issues.len()
        );
        if !report.passed {
            warn!("Run {} is below the quality gate", input.run_id);
            return Err(Error::Validation(format!(
                "Quality score {:.1} is below the minimum of {:.1}",
                report.score, self.thresholds.min_score
            )));
        }

        Ok(serde_json::to_value(report)?)
    }
}
