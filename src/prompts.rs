//! Prompt text sent to the model and fixed user-facing replies.

use docent_core::models::{Document, Section};
use docent_core::protocol::NEED_MORE_CHUNKS_PREFIX;
use docent_core::segment::truncate_with_ellipsis;

/// Returned without a model call when a question needs a document and none
/// is attached.
pub const ATTACH_DOCUMENT_MESSAGE: &str =
    "Please attach a document first. I can answer questions about it once it has been processed.";

/// Prefix of the reply given when escalation rounds run out.
pub const PARTIAL_ANSWER_PREFIX: &str =
    "I could only find part of what you asked for in the document.";

const TITLE_LIST_SUMMARY_CHARS: usize = 160;
const DIVISION_SAMPLE_CHARS: usize = 12_000;

pub fn general_system_prompt() -> String {
    "You are Docent, a concise and helpful assistant. Answer the user's message directly. \
     No document is involved in this exchange."
        .to_string()
}

/// System prompt for answering from document context, including the
/// escalation contract.
pub fn document_system_prompt(document_name: &str, whole_document: bool) -> String {
    let scope = if whole_document {
        "The full document is provided below."
    } else {
        "Only selected sections of the document are provided below, not the whole document."
    };
    format!(
        "You are Docent, an assistant that answers questions about the document \"{name}\". \
         {scope} Answer using only the provided context and cite section titles when useful. \
         If the context does not contain enough information to answer, reply with exactly \
         `{prefix} <what is missing>` and nothing else. Do not guess.",
        name = document_name,
        scope = scope,
        prefix = NEED_MORE_CHUNKS_PREFIX,
    )
}

/// User message carrying the context block and the question.
pub fn document_user_message(context: &str, question: &str) -> String {
    format!("{}\n\nQUESTION: {}", context, question)
}

/// Reply after the last escalation round still asked for more context.
pub fn partial_answer(hint: &str, titles: &[String]) -> String {
    let mut out = PARTIAL_ANSWER_PREFIX.to_string();
    if !titles.is_empty() {
        out.push_str(&format!(" I checked: {}.", titles.join("; ")));
    }
    if !hint.is_empty() {
        out.push_str(&format!(" Still missing: {}.", hint.trim_end_matches('.')));
    }
    out.push_str(" Try rephrasing the question or pointing me to the relevant section.");
    out
}

pub fn classification_messages(question: &str, document_name: &str) -> (String, String) {
    let system = "You decide whether a user message needs the attached document to be answered. \
                  Reply with a JSON object: {\"needs_document\": true|false, \"confidence\": 0.0-1.0, \
                  \"reasoning\": \"short explanation\"}."
        .to_string();
    let user = format!("Attached document: \"{}\"\nUser message: {}", document_name, question);
    (system, user)
}

/// Numbered list of section titles and summaries for model selection.
/// Numbering is 1-based.
pub fn selection_messages(question: &str, sections: &[&Section], max: usize) -> (String, String) {
    let system = format!(
        "You pick the document sections most likely to answer a question. Reply with a JSON object: \
         {{\"selected_sections\": [numbers], \"justification\": \"short explanation\"}}. \
         Select at most {} sections, most relevant first.",
        max
    );
    let mut user = String::from("SECTIONS:\n");
    for (i, section) in sections.iter().enumerate() {
        user.push_str(&format!(
            "{}. {} | {}\n",
            i + 1,
            section.title,
            truncate_with_ellipsis(&section.summary, TITLE_LIST_SUMMARY_CHARS)
        ));
    }
    user.push_str(&format!("\nQUESTION: {}", question));
    (system, user)
}

/// Ask for section boundaries of an unstructured document, showing its
/// beginning.
pub fn division_messages(document: &Document) -> (String, String) {
    let system = "You divide long documents into logical sections. Reply with a JSON object: \
                  {\"divisions\": [{\"title\": \"section title\", \"start_text\": \"the first words of the section, copied exactly\"}]}. \
                  Copy start_text verbatim from the document, 5 to 12 words, in document order."
        .to_string();
    let sample: String = document.content.chars().take(DIVISION_SAMPLE_CHARS).collect();
    let user = format!("DOCUMENT \"{}\":\n{}", document.name, sample);
    (system, user)
}
