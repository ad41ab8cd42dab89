use serde::{Deserialize, Serialize};

/// Conversation view holding user attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveView {
    #[default]
    Composer,
    Status,
}

/// Selects the focused view in reaction to sends and inbound replies.
///
/// Hydration never routes. `Composer` is only reached through explicit user
/// navigation.
#[derive(Debug, Clone, Default)]
pub struct AttentionRouter {
    active: ActiveView,
}

impl AttentionRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_view(&self) -> ActiveView {
        self.active
    }

    /// Returns `true` if the view changed.
    pub fn route_on_send(&mut self) -> bool {
        self.set(ActiveView::Status)
    }

    /// Returns `true` if the view changed.
    pub fn route_on_receive(&mut self) -> bool {
        self.set(ActiveView::Status)
    }

    pub fn focus_composer(&mut self) -> bool {
        self.set(ActiveView::Composer)
    }

    pub fn focus_status(&mut self) -> bool {
        self.set(ActiveView::Status)
    }

    fn set(&mut self, view: ActiveView) -> bool {
        let changed = self.active != view;
        self.active = view;
        changed
    }
}
