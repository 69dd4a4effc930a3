//! Writing-prompt detection in reply bodies.

use tracing::{debug, warn};

use crate::store::Database;

/// Leading characters of a prompt that must appear in the reply.
const PROMPT_PREFIX_CHARS: usize = 71;

/// Links a reply to the writing prompt it echoes.
pub struct InspirationMatcher;

impl InspirationMatcher {
    /// Id of the first eligible prompt whose opening text appears in
    /// `raw_body` (case-insensitive). Lookup failures mean no match.
    pub async fn find(db: &dyn Database, raw_body: &str) -> Option<i64> {
        let prompts = match db.list_inspirations().await {
            Ok(prompts) => prompts,
            Err(e) => {
                warn!(error = %e, "Failed to load inspirations");
                return None;
            }
        };

        let haystack = raw_body.to_lowercase();
        let found = prompts
            .iter()
            .filter(|prompt| prompt.is_eligible())
            .find(|prompt| {
                let prefix: String = prompt.body.chars().take(PROMPT_PREFIX_CHARS).collect();
                let prefix = prefix.to_lowercase();
                !prefix.trim().is_empty() && haystack.contains(&prefix)
            })
            .map(|prompt| prompt.id);

        if let Some(id) = found {
            debug!(inspiration_id = id, "Reply matched an inspiration");
        }
        found
    }
}
