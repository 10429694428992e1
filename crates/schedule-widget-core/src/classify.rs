//! Response sniffing used by the transport layer.
//!
//! Hosts that sit behind a login wall answer an unauthenticated blob request
//! with a redirect to their own sign-in page, often with a 200 status. The
//! classifier decides from the content type first and the leading bytes
//! second, so such a page is never mistaken for schedule data.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Empty,
    Json,
    Markup,
    Text,
}

const MARKUP_PREFIXES: [&str; 5] = ["<!doctype", "<html", "<head", "<body", "<?xml"];

#[must_use]
pub fn classify_content(content_type: Option<&str>, body: &str) -> ContentKind {
    if let Some(content_type) = content_type {
        let content_type = content_type.to_ascii_lowercase();
        if content_type.contains("text/html") || content_type.contains("xhtml") {
            return ContentKind::Markup;
        }
    }

    let trimmed = body.trim_start_matches('\u{feff}').trim_start();
    if trimmed.is_empty() {
        return ContentKind::Empty;
    }

    let head = trimmed
        .get(..16)
        .unwrap_or(trimmed)
        .to_ascii_lowercase();
    if MARKUP_PREFIXES.iter().any(|prefix| head.starts_with(prefix)) {
        return ContentKind::Markup;
    }

    let mut chars = trimmed.chars();
    match (chars.next(), chars.next()) {
        (Some('<'), Some(next)) if next.is_ascii_alphabetic() || next == '!' => ContentKind::Markup,
        (Some('{' | '['), _) => ContentKind::Json,
        _ => ContentKind::Text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_content_type_wins_over_body() {
        assert_eq!(
            classify_content(Some("text/html; charset=utf-8"), "{\"Mon\":[]}"),
            ContentKind::Markup
        );
    }

    #[test]
    fn login_page_without_content_type_is_markup() {
        let page = "\u{feff}  <!DOCTYPE html><html><body><form id=\"login\"></form></body></html>";
        assert_eq!(classify_content(None, page), ContentKind::Markup);
        assert_eq!(
            classify_content(Some("application/octet-stream"), "<div class=\"login\">"),
            ContentKind::Markup
        );
    }

    #[test]
    fn structured_and_plain_bodies() {
        assert_eq!(
            classify_content(Some("application/json"), " {\"schedule\":{}}"),
            ContentKind::Json
        );
        assert_eq!(classify_content(None, "[]"), ContentKind::Json);
        assert_eq!(classify_content(None, "   \n"), ContentKind::Empty);
        assert_eq!(classify_content(None, "not found"), ContentKind::Text);
        assert_eq!(classify_content(None, "< 3 items"), ContentKind::Text);
    }
}
