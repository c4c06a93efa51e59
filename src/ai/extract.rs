//! JSON answers from the generation endpoint.
//!
//! Models often wrap JSON in markdown fences or a sentence of prose, so the
//! outermost `{ ... }` object is cut out before parsing. Any failure becomes
//! [`LoomError::MalformedResponse`]; the parse detail is logged and kept off
//! the user-facing message.

use crate::error::{LoomError, Result};
use crate::types::{CharacterEntry, LoreEntry};
use serde::de::DeserializeOwned;
use serde::Deserialize;

#[derive(Deserialize)]
struct CharacterEnvelope {
    character: CharacterEntry,
}

/// Characters and lore pulled out of a passage of prose.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExtractedEntities {
    pub characters: Vec<CharacterEntry>,
    pub lore: Vec<LoreEntry>,
}

impl ExtractedEntities {
    pub fn is_empty(&self) -> bool {
        self.characters.is_empty() && self.lore.is_empty()
    }
}

/// Parse a `{"character": {...}}` answer. The character must have a name.
pub fn parse_generated_character(body: &str) -> Result<CharacterEntry> {
    let envelope: CharacterEnvelope = parse_object(body)?;
    if envelope.character.name.trim().is_empty() {
        return Err(reject("generated character has no name"));
    }
    Ok(envelope.character)
}

/// Parse a `{"characters": [...], "lore": [...]}` answer. Entries without a
/// name or title are dropped.
pub fn parse_extracted_entities(body: &str) -> Result<ExtractedEntities> {
    let mut entities: ExtractedEntities = parse_object(body)?;
    entities.characters.retain(|c| !c.name.trim().is_empty());
    entities.lore.retain(|l| !l.title.trim().is_empty());
    Ok(entities)
}

fn parse_object<T: DeserializeOwned>(body: &str) -> Result<T> {
    let json = json_object_slice(body).ok_or_else(|| reject("no JSON object in response"))?;
    serde_json::from_str(json).map_err(|e| reject(e.to_string()))
}

/// The span from the first `{` to the last `}`.
fn json_object_slice(body: &str) -> Option<&str> {
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    (start < end).then(|| &body[start..=end])
}

fn reject(detail: impl Into<String>) -> LoomError {
    let detail = detail.into();
    tracing::warn!(%detail, "unusable AI response");
    LoomError::malformed(detail)
}
