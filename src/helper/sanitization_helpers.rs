use ammonia::Builder;
use pulldown_cmark::{html, Options, Parser};
use std::collections::HashSet;

/// Renders user-authored Markdown to HTML and sanitizes the result down to a
/// whitelist of tags. All scripting capability (`<script>`, `onclick`,
/// `javascript:` URLs) is removed.
pub fn render_markdown(markdown_input: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let parser = Parser::new_ext(markdown_input, options);
    let mut unsafe_html = String::new();
    html::push_html(&mut unsafe_html, parser);

    let tags_to_allow = [
        "h1", "h2", "h3", "h4", "h5", "h6", "b", "strong", "i", "em", "p", "br",
        "a", "ul", "ol", "li", "blockquote", "code", "pre", "hr", "img", "table",
        "thead", "tbody", "tr", "th", "td", "s", "del",
    ];
    let safe_tags = tags_to_allow.iter().cloned().collect::<HashSet<_>>();

    let safe_attributes = ["src", "href", "alt", "title"];
    let generic_attributes = safe_attributes.iter().cloned().collect::<HashSet<_>>();

    Builder::new()
        .tags(safe_tags)
        .generic_attributes(generic_attributes)
        .link_rel(Some("nofollow ugc"))
        .clean(&unsafe_html)
        .to_string()
}

/// Strips all HTML tags from a string, leaving only the text content.
pub fn strip_all_html(input: &str) -> String {
    Builder::new().tags(HashSet::new()).clean(input).to_string()
}

const ABSTRACT_CHARS: usize = 60;

/// Builds the tag-stripped abstract shown in post listings: the first 60
/// characters of the rendered body, with an ellipsis when truncated.
pub fn make_abstract(body_html: &str) -> String {
    let text = strip_all_html(body_html);
    let text = text.trim();
    if text.chars().count() <= ABSTRACT_CHARS {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(ABSTRACT_CHARS).collect();
        format!("{}...", truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_renders_basic_formatting() {
        let html = render_markdown("# Hello\n\nSome *emphasis* and **bold**.");
        assert!(html.contains("<h1>"));
        assert!(html.contains("<em>emphasis</em>"));
        assert!(html.contains("<strong>bold</strong>"));
    }

    #[test]
    fn markdown_strips_script_and_event_handlers() {
        let html = render_markdown("hi <script>alert('x')</script> <img src=x onerror=alert(1)>");
        assert!(!html.contains("<script"));
        assert!(!html.contains("alert('x')"));
        assert!(!html.contains("onerror"));
    }

    #[test]
    fn markdown_neutralizes_javascript_links() {
        let html = render_markdown("[click](javascript:alert(1))");
        assert!(!html.contains("javascript:"));
    }

    #[test]
    fn abstract_strips_tags_and_truncates() {
        let short = make_abstract("<p>short text</p>");
        assert_eq!(short, "short text");

        let long_body = format!("<p>{}</p>", "a".repeat(100));
        let long = make_abstract(&long_body);
        assert_eq!(long.chars().count(), 63);
        assert!(long.ends_with("..."));
        assert!(!long.contains('<'));
    }
}
