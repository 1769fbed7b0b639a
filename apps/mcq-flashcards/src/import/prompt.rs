//! Instruction prompts sent to the extraction service.

/// MIME type of imported documents.
pub const PDF_MIME_TYPE: &str = "application/pdf";

/// Instruction sent alongside an imported document.
pub const EXTRACT_PROMPT: &str = r#"You are given a document that contains multiple-choice questions.
Extract every multiple-choice question you can find.

Return ONLY a single JSON array. Do not add any text, commentary or markdown before or after the array.
Each element of the array must be an object with these fields:
- "question": string, the full question text.
- "options": array of strings, the answer choices in the order they appear (at least one).
- "correctOptionIndex": integer, the 0-based index into "options" of the correct answer.
- "explanation": optional string, why the correct answer is correct.
- "topic": optional string, a short subject label for the question.

If the document marks no correct answer for a question, choose the most plausible one.
If the document contains no multiple-choice questions, return an empty array: []"#;

/// Instruction for generating a single card about `topic`.
pub fn generate_prompt(topic: &str, option_count: usize) -> String {
    format!(
        r#"Write one multiple-choice question about the topic "{topic}".

Return ONLY a single JSON object, with no text or markdown around it, with these fields:
- "question": string, the question text.
- "options": array of exactly {option_count} strings, the answer choices.
- "correctOptionIndex": integer, the 0-based index into "options" of the single correct answer.
- "explanation": string, a short explanation of the correct answer.
- "topic": string, a short subject label.

Exactly one option must be correct and all options must be distinct."#
    )
}
