//! Button recognition heuristics
//!
//! The host page has no stable API for its controls, so buttons are
//! recognised by attribute substrings in English and Russian. The strategy is
//! a trait so a different page or locale can swap it out.

use serde::{Deserialize, Serialize};

/// The attributes of a button the matchers look at
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementDescriptor {
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub dom_id: Option<String>,
    #[serde(default)]
    pub test_id: Option<String>,
    #[serde(default)]
    pub aria_label: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    /// `type` attribute, e.g. `submit`
    #[serde(default)]
    pub button_type: Option<String>,
    /// Whether the button sits inside a `<form>`
    #[serde(default)]
    pub in_form: bool,
}

impl std::fmt::Display for ElementDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = if self.tag.is_empty() { "node" } else { &self.tag };
        write!(f, "{}", tag.to_lowercase())?;
        if let Some(id) = &self.dom_id {
            write!(f, "#{}", id)?;
        }
        if let Some(dt) = &self.test_id {
            write!(f, " data-testid={}", dt)?;
        }
        if let Some(aria) = &self.aria_label {
            write!(f, " aria=\"{}\"", super::preview(aria, 60))?;
        }
        if let Some(title) = &self.title {
            write!(f, " title=\"{}\"", super::preview(title, 60))?;
        }
        if let Some(text) = self.text.as_deref().filter(|t| !t.trim().is_empty()) {
            write!(f, " text=\"{}\"", super::preview(text, 60))?;
        }
        Ok(())
    }
}

/// Decides which page buttons play which role
pub trait ControlMatcher: Send + Sync {
    /// The control that accepts a dictation transcript into the composer
    fn is_dictation_submit(&self, el: &ElementDescriptor) -> bool;

    /// Rank of a send-button candidate; lower wins, `None` is not a send button
    fn send_priority(&self, el: &ElementDescriptor) -> Option<u8>;

    /// The control that stops an in-progress response
    fn is_stop_generating(&self, el: &ElementDescriptor) -> bool;
}

/// Default heuristics for the chat page
#[derive(Debug, Clone, Copy, Default)]
pub struct LabelMatcher;

fn norm(value: &Option<String>) -> String {
    value.as_deref().unwrap_or_default().to_lowercase()
}

impl ControlMatcher for LabelMatcher {
    fn is_dictation_submit(&self, el: &ElementDescriptor) -> bool {
        let aria = norm(&el.aria_label);
        let title = norm(&el.title);
        let test_id = norm(&el.test_id);
        let text = norm(&el.text);

        if aria.contains("submit dictation") {
            return true;
        }
        if aria.contains("dictation")
            && ["submit", "accept", "confirm"].iter().any(|w| aria.contains(w))
        {
            return true;
        }
        if ["готово", "подтверд", "принять"].iter().any(|w| aria.contains(w)) {
            return true;
        }
        if test_id.contains("dictation")
            && ["submit", "done", "finish"].iter().any(|w| test_id.contains(w))
        {
            return true;
        }

        title.contains("submit dictation") || text.contains("submit dictation")
    }

    fn send_priority(&self, el: &ElementDescriptor) -> Option<u8> {
        let aria = el.aria_label.as_deref().unwrap_or_default();

        if el.test_id.as_deref() == Some("send-button") {
            Some(0)
        } else if el.dom_id.as_deref() == Some("composer-submit-button") {
            Some(1)
        } else if el.in_form && el.button_type.as_deref() == Some("submit") {
            Some(2)
        } else if aria.contains("Send") {
            Some(3)
        } else if aria.contains("Отправ") {
            Some(4)
        } else {
            None
        }
    }

    fn is_stop_generating(&self, el: &ElementDescriptor) -> bool {
        let aria = norm(&el.aria_label);
        let title = norm(&el.title);
        let test_id = norm(&el.test_id);

        test_id.contains("stop")
            || aria.contains("stop")
            || aria.contains("останов")
            || title.contains("stop")
            || title.contains("останов")
    }
}
