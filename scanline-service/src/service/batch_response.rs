//! Tolerant parsing of batched vision responses.
//!
//! Models asked for JSON still wrap it in code fences or surround it with
//! prose. The raw text is tried first, then the first fenced block, then the
//! first balanced `{...}` span.

use serde::Deserialize;

/// Outcome of parsing one batch response
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BatchParse {
    /// One entry per image in the batch; `None` marks a page the response left out
    Parsed(Vec<Option<String>>),
    /// Nothing usable; every page of the batch falls back to a single-page request
    Malformed(String),
}

#[derive(Debug, Deserialize)]
struct BatchPayload {
    #[serde(default)]
    pages: Option<Vec<KeyedPage>>,
    #[serde(default)]
    texts: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct KeyedPage {
    /// 1-based position of the image in the request
    #[serde(alias = "index")]
    page: i64,
    #[serde(default)]
    text: Option<String>,
}

impl BatchPayload {
    fn into_page_texts(self, batch_len: usize) -> BatchParse {
        if let Some(pages) = self.pages {
            let mut texts = vec![None; batch_len];
            for entry in pages {
                let Some(text) = entry.text else { continue };
                let slot = usize::try_from(entry.page)
                    .ok()
                    .and_then(|p| p.checked_sub(1))
                    .and_then(|i| texts.get_mut(i));
                if let Some(slot) = slot {
                    *slot = Some(text);
                }
            }
            if texts.iter().all(Option::is_none) {
                return BatchParse::Malformed("no entry matched a page of the batch".to_string());
            }
            return BatchParse::Parsed(texts);
        }

        if let Some(flat) = self.texts {
            if flat.len() != batch_len {
                return BatchParse::Malformed(format!(
                    "expected {} texts, got {}",
                    batch_len,
                    flat.len()
                ));
            }
            return BatchParse::Parsed(flat.into_iter().map(Some).collect());
        }

        BatchParse::Malformed("response has neither `pages` nor `texts`".to_string())
    }
}

/// Parse a batch response for a request that carried `batch_len` images
pub(crate) fn parse_batch_response(raw: &str, batch_len: usize) -> BatchParse {
    let candidates = [
        Some(raw.trim()),
        fenced_block(raw),
        first_balanced_object(raw),
    ];

    for candidate in candidates.into_iter().flatten() {
        if let Ok(payload) = serde_json::from_str::<BatchPayload>(candidate) {
            return payload.into_page_texts(batch_len);
        }
    }

    BatchParse::Malformed("no JSON object found in response".to_string())
}

/// Body of the first ``` fenced block, language tag dropped
fn fenced_block(raw: &str) -> Option<&str> {
    let start = raw.find("```")? + 3;
    let rest = &raw[start..];
    let body_start = rest.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &rest[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

/// First `{...}` span whose braces balance, ignoring braces inside strings
fn first_balanced_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in raw[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
