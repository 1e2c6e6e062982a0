//! CSS inlining for email clients that ignore `<style>` blocks.

use crate::error::RenderError;

/// Moves stylesheet rules onto matching elements' `style` attributes.
///
/// An error here is fatal to the current invocation; callers must not fall
/// back to sending un-inlined markup.
pub trait CssInliner: Send + Sync {
    fn inline(&self, html: &str, css: &str) -> Result<String, RenderError>;
}

/// `css-inline` backed inliner.
#[derive(Debug, Clone, Copy, Default)]
pub struct StyleInliner;

impl CssInliner for StyleInliner {
    fn inline(&self, html: &str, css: &str) -> Result<String, RenderError> {
        let inliner = css_inline::CSSInliner::options()
            .extra_css(Some(css.into()))
            .build();
        inliner
            .inline(html)
            .map_err(|e| RenderError::Inline(e.to_string()))
    }
}
