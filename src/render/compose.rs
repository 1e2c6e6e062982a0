//! Final message composition: header + formatted body + footer, CSS inlined.

use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::email_log::model::EmailLogRecord;
use crate::error::RenderError;
use crate::render::unsubscribe::unsubscribe_link;
use crate::render::{ContentRenderer, CssInliner, TemplateKey, TemplateVars};

static BLOCK_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<(p|div|table|ul|ol|h[1-6]|blockquote|pre|section)[\s>/]")
        .expect("valid block tag regex")
});

static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n").expect("valid paragraph regex"));

/// Post-processor applied to the body after inlining.
pub type ContentFilter = Arc<dyn Fn(String) -> String + Send + Sync>;

/// Turn plain text into paragraphs.
///
/// Blank lines separate `<p>` blocks and single newlines become `<br />`.
/// Text that already contains block-level markup is returned unchanged.
pub fn autop(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    if text.trim().is_empty() {
        return String::new();
    }
    if BLOCK_TAG.is_match(&text) {
        return text;
    }

    PARAGRAPH_BREAK
        .split(&text)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| format!("<p>{}</p>", p.replace('\n', "<br />\n")))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Renders queued bodies into the HTML actually handed to the transport.
pub struct MessageComposer {
    renderer: Arc<dyn ContentRenderer>,
    inliner: Arc<dyn CssInliner>,
    site_url: String,
    content_filter: Option<ContentFilter>,
}

impl MessageComposer {
    pub fn new(
        renderer: Arc<dyn ContentRenderer>,
        inliner: Arc<dyn CssInliner>,
        site_url: impl Into<String>,
    ) -> Self {
        Self {
            renderer,
            inliner,
            site_url: site_url.into(),
            content_filter: None,
        }
    }

    /// Install a post-processor run on every composed body.
    pub fn with_content_filter(mut self, filter: ContentFilter) -> Self {
        self.content_filter = Some(filter);
        self
    }

    pub fn renderer(&self) -> &Arc<dyn ContentRenderer> {
        &self.renderer
    }

    /// Wrap `body` in header and footer chrome.
    ///
    /// `contact` is `(contact_id, email_address)` and keys the unsubscribe link.
    pub fn wrap_message(
        &self,
        subject: &str,
        body: &str,
        contact: Option<(i64, &str)>,
    ) -> Result<String, RenderError> {
        let mut header_vars = TemplateVars::new();
        header_vars.insert("subject".into(), subject.to_string());
        let header = self.renderer.render(TemplateKey::Header, &header_vars)?;

        let mut footer_vars = TemplateVars::new();
        footer_vars.insert(
            "unsubscribe_link".into(),
            unsubscribe_link(&self.site_url, contact),
        );
        let footer = self.renderer.render(TemplateKey::Footer, &footer_vars)?;

        Ok(format!("{header}{}{footer}", autop(body)))
    }

    /// Inline the configured stylesheet into `html`.
    pub fn style_inline(&self, html: &str) -> Result<String, RenderError> {
        let css = self.renderer.render(TemplateKey::Styles, &TemplateVars::new())?;
        self.inliner.inline(html, &css)
    }

    /// Compose the final body for a queued record.
    pub fn compose(&self, record: &EmailLogRecord) -> Result<String, RenderError> {
        let contact = record
            .contact_id
            .map(|id| (id, record.to_address.as_str()));
        let wrapped = self.wrap_message(&record.subject, &record.body, contact)?;
        let inlined = self.style_inline(&wrapped)?;
        Ok(match &self.content_filter {
            Some(filter) => filter(inlined),
            None => inlined,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{StyleInliner, TemplateRenderer};

    fn composer() -> MessageComposer {
        MessageComposer::new(
            Arc::new(TemplateRenderer::new()),
            Arc::new(StyleInliner),
            "https://homes.example.com",
        )
    }

    #[test]
    fn autop_paragraphs_and_breaks() {
        let out = autop("Dear Sam,\n\nWe found homes.\nHave a look.\n\n\nRegards");
        assert_eq!(
            out,
            "<p>Dear Sam,</p>\n<p>We found homes.<br />\nHave a look.</p>\n<p>Regards</p>"
        );
    }

    #[test]
    fn autop_leaves_block_markup_alone() {
        let html = "<div class=\"property\">x</div>\n\nmore";
        assert_eq!(autop(html), html);
    }

    #[test]
    fn autop_empty() {
        assert_eq!(autop("  \n "), "");
    }

    #[test]
    fn wrap_includes_chrome_and_unsubscribe() {
        let out = composer()
            .wrap_message("Hello", "Body text", Some((5, "sam@example.com")))
            .unwrap();
        assert!(out.contains("<title>Hello</title>"));
        assert!(out.contains("<p>Body text</p>"));
        assert!(out.contains("https://homes.example.com?ph_unsubscribe="));
    }

    #[test]
    fn wrap_without_contact_uses_placeholder_link() {
        let out = composer().wrap_message("s", "b", None).unwrap();
        assert!(out.contains(r##"href="#""##));
    }

    #[test]
    fn content_filter_runs_last() {
        let composer = composer().with_content_filter(Arc::new(|body| format!("{body}<!-- tracked -->")));
        let record = EmailLogRecord {
            id: 1,
            to_address: "sam@example.com".into(),
            from_address: "office@example.com".into(),
            from_name: "Office".into(),
            subject: "s".into(),
            body: "b".into(),
            contact_id: Some(5),
            send_at: chrono::Utc::now(),
            status: Default::default(),
            lock_id: "l".into(),
            locked_at: None,
        };
        let out = composer.compose(&record).unwrap();
        assert!(out.ends_with("<!-- tracked -->"));
        assert!(out.contains("style="));
    }
}
