use serde::{Deserialize, Serialize};

/// A deck layout: a Tera template plus the extension of the file it renders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeckTemplate {
    pub name: String,
    pub extension: String,
    pub source: String,
}

impl DeckTemplate {
    pub fn new(name: impl Into<String>, extension: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extension: extension.into(),
            source: source.into(),
        }
    }

    /// Look up a template shipped with the crate.
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "marp" => Some(Self::new("marp", "md", MARP)),
            "html" => Some(Self::new("html", "html", HTML)),
            _ => None,
        }
    }

    pub fn builtin_names() -> &'static [&'static str] {
        &["marp", "html"]
    }

    /// File name the rendered deck is written under.
    pub fn file_name(&self) -> String {
        format!("deck.{}", self.extension)
    }
}

const MARP: &str = r#"---
marp: true
paginate: true
---

<!-- _class: lead -->

# {{ deck.title }}
{% if deck.subtitle %}
{{ deck.subtitle }}
{% endif %}
{% for slide in deck.slides %}
---

{% if slide.image %}![bg right:40% fit]({{ slide.image }})

{% endif %}# {{ slide.title }}
{% for bullet in slide.bullets %}
- {{ bullet }}{% endfor %}
{% for paragraph in slide.body %}
{{ paragraph }}
{% endfor %}{% if slide.notes %}
<!-- {{ slide.notes }} -->
{% endif %}{% endfor %}{% if deck.citations %}
---

# Sources
{% for citation in deck.citations %}
- {% if citation.url %}[{{ citation.title }}]({{ citation.url }}){% else %}{{ citation.title }}{% endif %}{% if citation.publisher %}, {{ citation.publisher }}{% endif %}{% endfor %}
{% endif %}"#;

const HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{{ deck.title }}</title>
<style>
  body { margin: 0; font-family: system-ui, sans-serif; background: #1e1e24; }
  section.slide { box-sizing: border-box; width: 1280px; height: 720px; margin: 24px auto; padding: 56px 72px;
    background: #fff; color: #222; display: flex; flex-direction: column; justify-content: center; position: relative; }
  section.slide.with-image { padding-right: 560px; }
  section.slide img { position: absolute; right: 48px; top: 120px; width: 480px; height: 480px; object-fit: contain; }
  section.title h1 { font-size: 64px; }
  h1 { font-size: 44px; margin: 0 0 24px; }
  li, p { font-size: 26px; line-height: 1.4; }
  aside.notes { display: none; }
  footer { position: absolute; bottom: 24px; right: 48px; color: #888; font-size: 16px; }
</style>
</head>
<body>
<section class="slide title">
  <h1>{{ deck.title }}</h1>
  {% if deck.subtitle %}<p>{{ deck.subtitle }}</p>{% endif %}
</section>
{% for slide in deck.slides %}<section class="slide{% if slide.image %} with-image{% endif %}" id="slide-{{ slide.index }}">
  <h1>{{ slide.title }}</h1>
  {% if slide.bullets %}<ul>
  {% for bullet in slide.bullets %}<li>{{ bullet }}</li>
  {% endfor %}</ul>{% endif %}
  {% for paragraph in slide.body %}<p>{{ paragraph }}</p>
  {% endfor %}{% if slide.image %}<img src="{{ slide.image | safe }}" alt="">{% endif %}
  {% if slide.notes %}<aside class="notes">{{ slide.notes }}</aside>{% endif %}
  <footer>{{ slide.index }}</footer>
</section>
{% endfor %}{% if deck.citations %}<section class="slide sources">
  <h1>Sources</h1>
  <ul>
  {% for citation in deck.citations %}<li>{% if citation.url %}<a href="{{ citation.url }}">{{ citation.title }}</a>{% else %}{{ citation.title }}{% endif %}{% if citation.publisher %}, {{ citation.publisher }}{% endif %}</li>
  {% endfor %}</ul>
</section>
{% endif %}</body>
</html>
"#;
