//! Prompt templates rendered with Tera.
//!
//! Every prompt starts with a `Task:` line so replies can be traced back to
//! the step that asked, and so the mock provider knows what to answer.

use serde_json::Value;
use tera::{Context, Tera};

use crate::Result;

pub const RESEARCH: &str = r#"Task: research
Topic: {{ topic }}
{% if audience %}Audience: {{ audience }}
{% endif %}
You are preparing background research for a slide presentation.
Summarise what a presenter needs to know, list the key points worth a slide,
and cite credible sources with URLs where possible.

Respond with a single JSON object and nothing else:
{"summary": "...", "key_points": ["..."], "citations": [{"title": "...", "url": "https://...", "publisher": "...", "note": "..."}]}
"#;

pub const OUTLINE: &str = r#"Task: outline
Topic: {{ topic }}
Slide count: {{ slide_count }}
{% if audience %}Audience: {{ audience }}
{% endif %}{% if tone %}Tone: {{ tone }}
{% endif %}
Research summary:
{{ summary }}

Key points:
{% for point in key_points %}- {{ point }}
{% endfor %}
Design a presentation of exactly {{ slide_count }} content slides (the title
slide is added separately). For slides that benefit from a graphic, describe
the image in "visual"; otherwise leave it null.

Respond with a single JSON object and nothing else:
{"title": "...", "subtitle": "...", "slides": [{"title": "...", "objective": "...", "key_points": ["..."], "visual": "..." }]}
"#;

pub const DRAFT_SLIDE: &str = r##"Task: draft-slide
Presentation: {{ deck_title }}
Slide {{ index }} of {{ total }}
Slide title: {{ title }}
{% if objective %}Objective: {{ objective }}
{% endif %}{% if audience %}Audience: {{ audience }}
{% endif %}{% if tone %}Tone: {{ tone }}
{% endif %}
Points to cover:
{% for point in key_points %}- {{ point }}
{% endfor %}
Write this one slide in Markdown. Start with "# {{ title }}", then at most five
short bullet points ("- "). Optionally finish with a line starting with
"Notes:" holding speaker notes. Do not use horizontal rules.
"##;

pub const IMAGE: &str = r#"Clean, modern presentation illustration for a slide titled "{{ title }}" in a deck about {{ topic }}. {{ visual }}. Flat style, generous whitespace, no text or lettering."#;

/// Render a prompt template with a JSON object as context.
pub fn render_prompt(template: &str, context: &Value) -> Result<String> {
    let mut tera = Tera::default();
    tera.add_raw_template("prompt", template)?;

    let mut tera_context = Context::new();
    match context {
        Value::Object(map) => {
            for (key, value) in map {
                tera_context.insert(key, &value);
            }
        }
        _ => {
            tera_context.insert("data", &context);
        }
    }

    Ok(tera.render("prompt", &tera_context)?)
}
