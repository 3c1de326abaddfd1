//! Segment translation handler.
//!
//! [`SegmentTranslator`] wires the reconciler into the dispatch loop: it
//! renders a chunk of segments into a prompt with the id map embedded as
//! JSON, validates replies via [`reconcile`](crate::core::reconcile::reconcile),
//! falls back to the untranslated originals when retries run out, and
//! merges continuation fetches without duplicating ids.

use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use serde_json::json;
use tracing::{error, warn};

use crate::core::dispatcher::Agent;
use crate::core::executor::{Handled, ResultHandler};
use crate::core::reconcile::{SegmentMap, parse_reply, reconcile};

static EMBEDDED_SEGMENTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<input>\n```json\n(.*?)\n```\n</input>").expect("static pattern compiles")
});

/// Pull the embedded source segment JSON back out of a prompt.
fn embedded_segments(prompt: &str) -> Option<&str> {
    EMBEDDED_SEGMENTS
        .captures(prompt)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Translates discrete id-addressed segments into a target language.
#[derive(Debug, Clone)]
pub struct SegmentTranslator {
    /// Target language, in whatever phrasing the model should see
    /// (e.g. "Simplified Chinese", "de").
    pub to_lang: String,
    /// Extra rules or background appended to the system preamble.
    pub custom_prompt: Option<String>,
    /// term -> fixed translation pairs, injected into the system prompt
    /// only when the term occurs in the chunk being sent.
    pub glossary: IndexMap<String, String>,
}

impl SegmentTranslator {
    #[must_use]
    pub fn new(to_lang: impl Into<String>) -> Self {
        Self {
            to_lang: to_lang.into(),
            custom_prompt: None,
            glossary: IndexMap::new(),
        }
    }

    /// Render one chunk of segments into a translation prompt.
    #[must_use]
    pub fn build_prompt(&self, segments: &SegmentMap) -> String {
        let embedded = serde_json::to_string(segments).unwrap_or_else(|_| "{}".to_string());
        format!(
            "You will receive source text segments as a JSON object whose keys \
             are segment ids and whose values are the text to translate.\n\
             Here is the input:\n\n\
             <input>\n```json\n{embedded}\n```\n</input>\n\n\
             Translate every value into {lang} and reply with a JSON array of \
             records, one per segment: [{{\"id\": \"<segment id>\", \"t\": \"<translation>\"}}].\n\
             > Every id from the input must appear in the output exactly once, \
             unchanged. Do not add ids that are not in the input.\n\
             > If two segments can only be translated together, split the \
             translation across their ids in proportion to their lengths.\n\
             > Keep untranslatable elements (code, brand names, technical \
             terms) as they are.\n\
             Reply with the JSON array only, no extra commentary.",
            lang = self.to_lang,
        )
    }

    /// Prompts for a sequence of chunks, in order.
    #[must_use]
    pub fn build_prompts(&self, chunks: &[SegmentMap]) -> Vec<String> {
        chunks.iter().map(|chunk| self.build_prompt(chunk)).collect()
    }

    /// Translate chunks of segments, one result map per input chunk.
    ///
    /// Chunks that could not be translated come back with their original
    /// text; the batch never fails as a whole.
    pub async fn translate(&self, agent: &Agent, chunks: &[SegmentMap]) -> Vec<SegmentMap> {
        agent.send_batch(self.build_prompts(chunks), self).await
    }

    fn glossary_appendix(&self, prompt: &str) -> Option<String> {
        let hits: Vec<_> = self
            .glossary
            .iter()
            .filter(|(term, _)| prompt.contains(term.as_str()))
            .collect();
        if hits.is_empty() {
            return None;
        }
        let mut appendix = String::from("\n# Glossary\nUse these exact translations:\n");
        for (term, translation) in hits {
            appendix.push_str(&format!("- {term} => {translation}\n"));
        }
        Some(appendix)
    }
}

impl ResultHandler for SegmentTranslator {
    type Output = SegmentMap;

    fn system_prompt(&self) -> String {
        let mut prompt =
            String::from("# Role\n- You are a professional, faithful machine translation engine.\n");
        if let Some(custom) = &self.custom_prompt {
            prompt.push_str("\n# Important rules or background\n");
            prompt.push_str(custom);
            prompt.push('\n');
        }
        prompt
    }

    fn before_send(&self, mut system_prompt: String, prompt: String) -> (String, String) {
        if let Some(appendix) = self.glossary_appendix(&prompt) {
            system_prompt.push_str(&appendix);
        }
        (system_prompt, prompt)
    }

    fn on_reply(
        &self,
        reply: &str,
        prompt: &str,
        previous: Option<&SegmentMap>,
    ) -> Handled<SegmentMap> {
        let Some(embedded) = embedded_segments(prompt) else {
            // The prompt is built by this handler, so this means the
            // caller sent a foreign prompt through it.
            return Handled::Invalid("prompt carries no embedded segments".to_string());
        };
        let Some(original) = parse_reply(embedded) else {
            return Handled::Invalid("embedded segments are not valid JSON".to_string());
        };
        reconcile(&original, reply, previous)
    }

    fn fallback(&self, prompt: &str) -> SegmentMap {
        let original = embedded_segments(prompt).and_then(parse_reply);
        original.map_or_else(
            || {
                error!("prompt carries no parsable segments, returning error marker");
                let mut map = SegmentMap::new();
                map.insert(
                    "error".to_string(),
                    embedded_segments(prompt).unwrap_or(prompt).to_string(),
                );
                map
            },
            |map| map,
        )
    }

    fn continue_prompt(&self, accumulated: &str, prompt: &str) -> String {
        let resume_hint = parse_reply(accumulated)
            .and_then(|returned| {
                returned
                    .keys()
                    .filter_map(|id| id.trim().parse::<u64>().ok())
                    .max()
            })
            .map_or_else(String::new, |last| {
                format!(" Resume from segment id {}.", last + 1)
            });
        format!(
            "{prompt}\n\n[Note: your previous reply was cut off after emitting \
             these records:\n---\n{accumulated}\n---\n\
             Continue as a JSON array containing only the segments not yet \
             emitted; do not repeat ids already present.{resume_hint}]"
        )
    }

    fn merge_continuation(&self, accumulated: String, additional: &str) -> String {
        let (Some(mut have), Some(more)) = (parse_reply(&accumulated), parse_reply(additional))
        else {
            // Not yet parsable as segments; raw concatenation keeps the
            // text for the final reconcile pass.
            let mut merged = accumulated;
            merged.push_str(additional);
            return merged;
        };

        for (id, text) in more {
            if have.contains_key(&id) {
                warn!(%id, "continuation repeated an id, keeping the first value");
                continue;
            }
            have.insert(id, text);
        }

        let records: Vec<_> = have
            .iter()
            .map(|(id, t)| json!({"id": id, "t": t}))
            .collect();
        serde_json::to_string(&records).unwrap_or(accumulated)
    }
}
