//! Parsing for answers from the AI generation gateway.
//!
//! The gateway itself is an external HTTP service; this module only turns
//! what it returns into text or typed entities.

mod extract;
mod stream;

pub use extract::{parse_extracted_entities, parse_generated_character, ExtractedEntities};
pub use stream::{accumulate, StreamAccumulator, StreamEvent};
