//! Deck rendering.
//!
//! A [`DeckDocument`] is everything the final file shows; a
//! [`DeckTemplate`] decides what it looks like. Assemblers turn the pair into
//! bytes and never touch the filesystem.

pub mod assembler;
pub mod template;

pub use assembler::TemplateAssembler;
pub use template::DeckTemplate;

use serde::{Deserialize, Serialize};

use crate::skills::{Citation, Slide};
use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeckDocument {
    pub title: String,
    pub subtitle: Option<String>,
    pub slides: Vec<Slide>,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

pub trait DeckAssembler: Send + Sync {
    fn assemble(&self, document: &DeckDocument, template: &DeckTemplate) -> Result<Vec<u8>>;
}
