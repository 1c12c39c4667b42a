use ammonia::Builder;
use pulldown_cmark::{html, Options, Parser};

/// Renders article content to sanitized HTML.
pub struct MarkdownRenderer {
    sanitizer: Builder<'static>,
}

impl Default for MarkdownRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkdownRenderer {
    pub fn new() -> Self {
        let mut tags = Builder::default().clone_tags();
        tags.insert("pre");
        tags.insert("code");
        tags.insert("table");
        tags.insert("thead");
        tags.insert("tbody");
        tags.insert("tr");
        tags.insert("th");
        tags.insert("td");
        tags.insert("del");

        let mut sanitizer = Builder::default();
        sanitizer
            .tags(tags)
            .link_rel(Some("noopener noreferrer"));

        Self { sanitizer }
    }

    pub fn render(&self, markdown: &str) -> String {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);

        let parser = Parser::new_ext(markdown, options);
        let mut unsafe_html = String::new();
        html::push_html(&mut unsafe_html, parser);

        self.sanitizer.clean(&unsafe_html).to_string()
    }

    /// Plain-text summary used when an article has no meta description.
    pub fn generate_excerpt(&self, markdown: &str, max_len: usize) -> String {
        let text: String = markdown
            .lines()
            .map(str::trim)
            .filter(|line| !line.starts_with('#') && !line.starts_with("```") && !line.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        let text: String = text
            .chars()
            .filter(|c| !matches!(c, '*' | '_' | '`' | '>'))
            .collect();

        if text.chars().count() <= max_len {
            return text;
        }

        let truncated: String = text.chars().take(max_len).collect();
        match truncated.rfind(' ') {
            Some(pos) => format!("{}...", &truncated[..pos]),
            None => format!("{}...", truncated),
        }
    }
}
