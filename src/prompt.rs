use std::fmt;

use handlebars::Handlebars;

#[derive(Debug)]
pub enum Prompt {
    Extraction,
    Validation,
    Reflection,
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl From<Prompt> for String {
    fn from(item: Prompt) -> String {
        format!("{:?}", item)
    }
}

const EXTRACTION_PROMPT: &str = r"
You are extracting durable facts worth remembering from a coding session
transcript. Read the TRANSCRIPT below and the notes that already exist
(EXISTING_NOTES) so you don't repeat what's already recorded.

Return a JSON array of objects, each with:
- note_id: a short kebab-case slug for the fact
- relation: \"NEW\", \"UPDATES:<existing-note-id>\" or \"EXTENDS:<existing-note-id>\"
- content: the fact itself, in markdown, written for future reference

Only extract facts that are specific, durable, and would actually help in
a future session. Do not invent facts that are not grounded in the
transcript.

EXISTING_NOTES:
{{existing_notes}}

RELATED_CONTEXT (full bodies of notes already close to this conversation):
{{related_context}}

TRANSCRIPT:
{{transcript}}
";

const VALIDATION_PROMPT: &str = r"
You are checking extracted facts against the CONVERSATION they were
extracted from. For each fact in FACTS, decide whether it is actually
grounded in the conversation or whether it looks hallucinated.

Return a JSON array of the facts that are grounded, in the same shape
they were given to you, with ungrounded facts dropped entirely.

FACTS:
{{facts}}

CONVERSATION:
{{conversation}}
";

const REFLECTION_PROMPT: &str = r"
You are reviewing a cluster of related notes (NOTES) to decide whether
they should be merged into a single consolidated note. Only propose a
merge if the notes genuinely describe the same underlying fact.

Return a JSON object with a `merge` boolean and, if true, a `content`
field holding the consolidated markdown body.

NOTES:
{{notes}}
";

pub fn templates<'a>() -> Handlebars<'a> {
    let mut registry = Handlebars::new();
    registry.set_strict_mode(true);
    registry
        .register_template_string(&Prompt::Extraction.to_string(), EXTRACTION_PROMPT)
        .expect("failed to register extraction template");
    registry
        .register_template_string(&Prompt::Validation.to_string(), VALIDATION_PROMPT)
        .expect("failed to register validation template");
    registry
        .register_template_string(&Prompt::Reflection.to_string(), REFLECTION_PROMPT)
        .expect("failed to register reflection template");
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_extraction_prompt() {
        let registry = templates();
        let rendered = registry
            .render(
                &Prompt::Extraction.to_string(),
                &json!({"existing_notes": "none", "related_context": "", "transcript": "user: hello"}),
            )
            .unwrap();
        assert!(rendered.contains("user: hello"));
        assert!(rendered.contains("EXISTING_NOTES"));
    }

    #[test]
    fn renders_validation_prompt() {
        let registry = templates();
        let rendered = registry
            .render(&Prompt::Validation.to_string(), &json!({"facts": "[]", "conversation": "hi"}))
            .unwrap();
        assert!(rendered.contains("FACTS"));
    }
}
