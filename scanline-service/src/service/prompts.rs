//! Prompts sent to the vision model.

/// Prompt for a request carrying exactly one page image
pub(crate) const SINGLE_PAGE_PROMPT: &str =
    "Transcribe all text in this scanned page exactly as written. \
     Preserve reading order, paragraph breaks and line breaks where meaningful. \
     Do not summarize, translate, correct or comment. \
     Return only the transcribed plain text; return an empty response if the page has no text.";

/// Prompt for a request carrying `count` page images in page order
pub(crate) fn batch_prompt(count: usize) -> String {
    format!(
        "You are given {count} scanned page images, in order. \
         Transcribe all text on each page exactly as written, \
         preserving reading order and paragraph breaks. \
         Do not summarize, translate, correct or comment.\n\
         Respond with JSON only, no code fences, in exactly this shape:\n\
         {{\"pages\":[{{\"page\":1,\"text\":\"...\"}}]}}\n\
         where \"page\" is the 1-based position of the image in this request (1 to {count}) \
         and every image has exactly one entry. Use an empty string for a page without text."
    )
}
