//! Prompts for LLM-based note categorisation.
//!
//! Callers can override the system prompt via
//! [`crate::config::SortConfig::system_prompt`]; the instruction built by
//! [`categorize_prompt`] is always sent as the user turn.

/// Default system prompt for classifying OCR text.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a filing assistant. You read text that was extracted by OCR from a photo of handwritten or printed notes and decide which folder the photo belongs in.

Rules:
- Answer with exactly one category name.
- Copy the category name exactly as it is written in the list.
- Do NOT explain your choice, do NOT add punctuation, quotes or formatting."#;

/// Build the classification instruction for one image.
///
/// `fallback` is the label the model must use when nothing in `categories`
/// fits.
pub fn categorize_prompt(text: &str, categories: &[String], fallback: &str) -> String {
    let list = if categories.is_empty() {
        fallback.to_string()
    } else {
        categories.join(", ")
    };
    format!(
        "Classify the following image into ONE of the given categories. \
Choose ONLY one category from this list:\n{list}.\n\n\
If the image does not fit into any category, respond with \"{fallback}\".\n\n\
Do NOT provide explanations or multiple categories, only return the category name.\n\n\
Text extracted from image:\n\"\"\"\n{text}\n\"\"\""
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_lists_categories_and_fallback() {
        let cats = vec!["Motivation".to_string(), "Study".to_string()];
        let p = categorize_prompt("Integrals are areas", &cats, "Other");
        assert!(p.contains("Motivation, Study."));
        assert!(p.contains("respond with \"Other\""));
        assert!(p.contains("Integrals are areas"));
    }

    #[test]
    fn prompt_with_no_categories_still_names_fallback() {
        let p = categorize_prompt("anything", &[], "Other");
        assert!(p.contains("list:\nOther."));
    }
}
