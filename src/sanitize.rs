//! Creative sanitization. Advertiser-supplied HTML and landing URLs are
//! hostile input: everything served to a browser goes through here first.

use std::collections::HashSet;

use ammonia::Builder;

/// Strip advertiser HTML down to a display-safe subset: formatting tags,
/// images, and video, with http(s) URLs only. Scripts, event handlers,
/// and javascript:/data: URLs do not survive.
pub fn sanitize_creative_html(html: &str) -> String {
    let mut builder = Builder::default();
    builder
        .tags(HashSet::from([
            "a", "b", "br", "div", "em", "i", "img", "p", "picture", "source", "span", "strong",
            "video",
        ]))
        .url_schemes(HashSet::from(["http", "https"]))
        .generic_attributes(HashSet::from(["class", "title", "alt"]))
        // rel stays out of the allow-list: link_rel owns that attribute
        // and ammonia refuses the combination.
        .add_tag_attributes("a", &["href", "target"])
        .add_tag_attributes("img", &["src", "width", "height", "loading"])
        .add_tag_attributes("source", &["src", "srcset", "type"])
        .add_tag_attributes("video", &["src", "poster", "controls", "width", "height"])
        .link_rel(Some("nofollow noopener sponsored"));
    builder.clean(html).to_string()
}

/// Validate a click-through destination. Only absolute http(s) URLs with no
/// control characters, whitespace, or backslashes pass; anything else —
/// javascript:, data:, scheme-relative `//host` — is dropped and the click
/// is acknowledged without a redirect.
pub fn safe_redirect_url(raw: &str) -> Option<String> {
    let url = raw.trim();
    if url.is_empty() {
        return None;
    }
    if url.chars().any(|c| c.is_control() || c.is_whitespace() || c == '\\') {
        return None;
    }
    if url.starts_with("//") {
        return None;
    }
    let lower = url.to_ascii_lowercase();
    if !lower.starts_with("http://") && !lower.starts_with("https://") {
        return None;
    }
    Some(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripts_are_stripped() {
        let out = sanitize_creative_html("<p>Sale!</p><script>alert(1)</script>");
        assert!(out.contains("<p>Sale!</p>"));
        assert!(!out.contains("script"));
        assert!(!out.contains("alert"));
    }

    #[test]
    fn event_handlers_are_stripped() {
        let out = sanitize_creative_html(r#"<img src="https://cdn.example.com/a.png" onclick="evil()">"#);
        assert!(out.contains("cdn.example.com/a.png"));
        assert!(!out.contains("onclick"));
    }

    #[test]
    fn javascript_hrefs_are_stripped() {
        let out = sanitize_creative_html(r#"<a href="javascript:steal()">click</a>"#);
        assert!(!out.contains("javascript:"));
    }

    #[test]
    fn links_get_sponsored_rel() {
        let out = sanitize_creative_html(r#"<a href="https://example.com/buy">Buy</a>"#);
        assert!(out.contains("https://example.com/buy"));
        assert!(out.contains("nofollow"));
        assert!(out.contains("sponsored"));
    }

    #[test]
    fn advertiser_rel_is_overridden() {
        let out =
            sanitize_creative_html(r#"<a href="https://example.com/buy" rel="dofollow">Buy</a>"#);
        assert!(!out.contains("dofollow"));
        assert!(out.contains("nofollow"));
    }

    #[test]
    fn redirect_accepts_absolute_http_and_https() {
        assert_eq!(
            safe_redirect_url("https://example.com/landing?x=1"),
            Some("https://example.com/landing?x=1".to_string())
        );
        assert_eq!(
            safe_redirect_url("  http://example.com  "),
            Some("http://example.com".to_string())
        );
    }

    #[test]
    fn redirect_rejects_dangerous_schemes_and_shapes() {
        assert_eq!(safe_redirect_url("javascript:alert(1)"), None);
        assert_eq!(safe_redirect_url("data:text/html,<b>x</b>"), None);
        assert_eq!(safe_redirect_url("//evil.example.com/path"), None);
        assert_eq!(safe_redirect_url("https://example.com/\\..\\x"), None);
        assert_eq!(safe_redirect_url("https://exa mple.com"), None);
        assert_eq!(safe_redirect_url(""), None);
        assert_eq!(safe_redirect_url("/relative/path"), None);
    }
}
