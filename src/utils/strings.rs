//! Label extraction over model output.
//!
//! Models are asked to wrap structured fragments in XML-ish labels, e.g.
//! `<finish>TRUE</finish>`. Output is frequently truncated by stop words,
//! so a missing closing tag is treated as "the rest of the text".

/// Extract the contents of the first label (from `labels`, in order) found
/// in `text`. Returns an empty string when no label is present.
///
/// # Example
///
/// ```rust
/// use tasktree::utils::extract_by_label;
///
/// let text = "thinking...<finish>TRUE</finish>";
/// assert_eq!(extract_by_label(text, &["finish", "finish_flag"]), "TRUE");
/// assert_eq!(extract_by_label("no labels here", &["finish"]), "");
/// ```
pub fn extract_by_label(text: &str, labels: &[&str]) -> String {
    for label in labels {
        let open = format!("<{label}>");
        let close = format!("</{label}>");
        if let Some(start) = text.find(&open) {
            let body = &text[start + open.len()..];
            let end = body.find(&close).unwrap_or(body.len());
            return body[..end].trim().to_string();
        }
    }
    String::new()
}
