//! Message rendering: templates, CSS inlining and final composition.

pub mod compose;
pub mod inline;
pub mod templates;
pub mod unsubscribe;

use std::collections::BTreeMap;
use std::fmt;

use crate::error::RenderError;

pub use compose::{ContentFilter, MessageComposer, autop};
pub use inline::{CssInliner, StyleInliner};
pub use templates::TemplateRenderer;

/// Named template slots the composer and matching engine render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TemplateKey {
    /// Chrome above the message body.
    Header,
    /// Chrome below the body; receives `unsubscribe_link`.
    Footer,
    /// Stylesheet inlined into every message.
    Styles,
    /// One matched property inside an applicant email.
    Property,
}

impl TemplateKey {
    pub const ALL: [TemplateKey; 4] = [
        TemplateKey::Header,
        TemplateKey::Footer,
        TemplateKey::Styles,
        TemplateKey::Property,
    ];

    /// File name used when loading overrides from a directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            TemplateKey::Header => "email-header.html",
            TemplateKey::Footer => "email-footer.html",
            TemplateKey::Styles => "email-styles.css",
            TemplateKey::Property => "applicant-match-property.html",
        }
    }
}

impl fmt::Display for TemplateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Variables substituted into a template.
pub type TemplateVars = BTreeMap<String, String>;

/// Renders a template slot to a string.
pub trait ContentRenderer: Send + Sync {
    fn render(&self, key: TemplateKey, vars: &TemplateVars) -> Result<String, RenderError>;
}
