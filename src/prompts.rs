//! Prompts for field extraction.
//!
//! The prompt is a pure function of the [`FieldSchema`] and the unknown
//! sentinel, so identical inputs always produce byte-identical prompts.
//! Page content never goes into the prompt itself; it travels in the user
//! message built by [`page_text_message`] or as an image attachment.

use crate::schema::FieldSchema;
use std::fmt::Write;

/// User-turn text accompanying a page image.
pub const IMAGE_PAGE_MESSAGE: &str =
    "Extract the fields from this résumé page image. Answer with the JSON object only.";

/// Build the system prompt listing every schema field in schema order.
pub fn extraction_prompt(schema: &FieldSchema, sentinel: &str) -> String {
    let mut prompt = String::with_capacity(512 + schema.len() * 96);

    prompt.push_str(
        "You extract structured candidate data from ONE page of a résumé or job-application document.\n\
\n\
Follow these rules precisely:\n\
\n\
1. OUTPUT FORMAT\n\
   - Return ONLY one JSON object. No commentary, no Markdown fences.\n\
   - Use exactly the keys listed under FIELDS, each once, and no other keys.\n\
   - Every value is a JSON string.\n\
\n\
2. MISSING DATA\n",
    );
    let _ = writeln!(
        prompt,
        "   - When a field is not present on this page, use \"{sentinel}\"."
    );
    prompt.push_str(
        "   - Never guess or invent values that are not visible in the document.\n\
\n\
3. FIDELITY\n\
   - Preserve accents and diacritics exactly (ç, ã, é, ...).\n\
   - Keep document numbers, phone numbers, and postal codes in the format the field asks for,\n\
     using only the digits that appear in the document.\n\
   - When the page shows several values for one field, choose the most complete one.\n\
\n\
FIELDS:\n",
    );

    for field in schema.fields() {
        let _ = writeln!(prompt, "- \"{}\": {}", field.key, field.instruction);
    }

    prompt.push_str("\nRESPONSE SHAPE:\n{\n");
    let last = schema.len().saturating_sub(1);
    for (i, key) in schema.keys().enumerate() {
        let comma = if i < last { "," } else { "" };
        let _ = writeln!(prompt, "  \"{key}\": \"...\"{comma}");
    }
    prompt.push('}');

    prompt
}

/// Wrap extracted page text as the user turn for a text-only model.
pub fn page_text_message(text: &str) -> String {
    format!("Résumé page text:\n\n\"\"\"\n{}\n\"\"\"", text.trim())
}
