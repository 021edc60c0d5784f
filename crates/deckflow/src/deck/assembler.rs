use tera::{Context, Tera};
use tracing::debug;

use super::{DeckAssembler, DeckDocument, DeckTemplate};
use crate::Result;

/// Renders decks through Tera. Templates registered with an `.html`
/// extension are autoescaped.
#[derive(Debug, Clone, Default)]
pub struct TemplateAssembler;

impl TemplateAssembler {
    pub fn new() -> Self {
        Self
    }
}

impl DeckAssembler for TemplateAssembler {
    fn assemble(&self, document: &DeckDocument, template: &DeckTemplate) -> Result<Vec<u8>> {
        let name = template.file_name();
        let mut tera = Tera::default();
        tera.add_raw_template(&name, &template.source)?;

        let mut context = Context::new();
        context.insert("deck", document);

        let rendered = tera.render(&name, &context)?;
        debug!(
            "Rendered {} slides with template {} ({} bytes)",
            document.slides.len(),
            template.name,
            rendered.len()
        );
        Ok(rendered.into_bytes())
    }
}
