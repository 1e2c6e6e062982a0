//! Built-in email templates with `{{name}}` placeholders.

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::{debug, info};

use crate::error::RenderError;
use crate::render::{ContentRenderer, TemplateKey, TemplateVars};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").expect("valid placeholder regex"));

const DEFAULT_HEADER: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta http-equiv="Content-Type" content="text/html; charset=UTF-8">
<title>{{subject}}</title>
</head>
<body>
<div id="wrapper">
<table id="template_container" cellpadding="0" cellspacing="0" width="600">
<tr><td id="body_content">
"#;

const DEFAULT_FOOTER: &str = r#"</td></tr>
<tr><td id="template_footer">
<p><a href="{{unsubscribe_link}}">Unsubscribe</a> from these emails.</p>
</td></tr>
</table>
</div>
</body>
</html>
"#;

const DEFAULT_STYLES: &str = r#"#wrapper { background-color: #f5f5f5; padding: 40px 0; }
#template_container { background-color: #ffffff; border: 1px solid #dcdcdc; }
#body_content { padding: 24px; font-family: Helvetica, Arial, sans-serif; font-size: 14px; color: #333333; }
#template_footer { padding: 12px 24px; font-size: 11px; color: #999999; text-align: center; }
.property { border-bottom: 1px solid #eeeeee; padding: 12px 0; }
.property h3 { margin: 0 0 6px; font-size: 16px; }
.price { font-weight: bold; }
a { color: #2b6cb0; }
"#;

const DEFAULT_PROPERTY: &str = r#"<div class="property">
<h3><a href="{{url}}">{{title}}</a></h3>
<div class="price">{{price}}</div>
</div>
"#;

/// Renders templates from an in-memory table.
///
/// Starts from built-in defaults; individual slots can be replaced in code or
/// from files on disk.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    templates: HashMap<TemplateKey, String>,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        let templates = TemplateKey::ALL
            .into_iter()
            .map(|key| {
                let body = match key {
                    TemplateKey::Header => DEFAULT_HEADER,
                    TemplateKey::Footer => DEFAULT_FOOTER,
                    TemplateKey::Styles => DEFAULT_STYLES,
                    TemplateKey::Property => DEFAULT_PROPERTY,
                };
                (key, body.to_string())
            })
            .collect();
        Self { templates }
    }
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace one slot.
    pub fn with_template(mut self, key: TemplateKey, body: impl Into<String>) -> Self {
        self.templates.insert(key, body.into());
        self
    }

    /// Load overrides from `dir`, keyed by [`TemplateKey::file_name`].
    /// Missing files keep the built-in default.
    pub fn from_dir(dir: &Path) -> Result<Self, RenderError> {
        let mut renderer = Self::default();
        for key in TemplateKey::ALL {
            let path = dir.join(key.file_name());
            if path.is_file() {
                let body = std::fs::read_to_string(&path)?;
                debug!(template = %key, path = %path.display(), "Loaded template override");
                renderer.templates.insert(key, body);
            }
        }
        info!(dir = %dir.display(), "Email templates loaded");
        Ok(renderer)
    }
}

/// Substitute `{{name}}` placeholders; unknown names render empty.
///
/// Values are plain text and are HTML-escaped on the way in.
pub fn substitute(template: &str, vars: &TemplateVars) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            vars.get(&caps[1])
                .map(|value| escape_html(value))
                .unwrap_or_default()
        })
        .into_owned()
}

/// Escape text for use in HTML content or a quoted attribute.
pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

impl ContentRenderer for TemplateRenderer {
    fn render(&self, key: TemplateKey, vars: &TemplateVars) -> Result<String, RenderError> {
        let template = self
            .templates
            .get(&key)
            .ok_or_else(|| RenderError::TemplateNotFound {
                key: key.to_string(),
            })?;
        Ok(substitute(template, vars))
    }
}
