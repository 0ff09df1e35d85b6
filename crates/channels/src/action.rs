//! User actions on an in-flight request and the buttons that trigger them.

use relay_common::RequestId;

/// A button press addressed to one request.
///
/// Callback data is `<verb>:<request id>`; the id keeps a stale button from
/// acting on whatever request happens to be active later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Pause(RequestId),
    Resume(RequestId),
    Cancel(RequestId),
}

impl Action {
    pub fn request_id(&self) -> RequestId {
        match self {
            Self::Pause(id) | Self::Resume(id) | Self::Cancel(id) => *id,
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Self::Pause(_) => "pause",
            Self::Resume(_) => "resume",
            Self::Cancel(_) => "cancel",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pause(_) => "⏸ Pause",
            Self::Resume(_) => "▶️ Resume",
            Self::Cancel(_) => "✖️ Cancel",
        }
    }

    /// Encode as callback data (well under Telegram's 64-byte limit).
    pub fn callback_data(&self) -> String {
        format!("{}:{}", self.verb(), self.request_id())
    }

    /// Decode callback data. Unknown verbs or malformed ids yield `None`.
    pub fn parse(data: &str) -> Option<Self> {
        let (verb, id) = data.split_once(':')?;
        let id: RequestId = id.parse().ok()?;
        match verb {
            "pause" => Some(Self::Pause(id)),
            "resume" => Some(Self::Resume(id)),
            "cancel" => Some(Self::Cancel(id)),
            _ => None,
        }
    }
}

/// Which buttons accompany a status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusControls {
    None,
    /// Shown while downloading.
    PauseCancel(RequestId),
    /// Shown while paused.
    ResumeCancel(RequestId),
}

impl StatusControls {
    /// Buttons in display order.
    pub fn actions(&self) -> Vec<Action> {
        match *self {
            Self::None => Vec::new(),
            Self::PauseCancel(id) => vec![Action::Pause(id), Action::Cancel(id)],
            Self::ResumeCancel(id) => vec![Action::Resume(id), Action::Cancel(id)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_data_parses_back() {
        let id = RequestId::new();
        for action in [Action::Pause(id), Action::Resume(id), Action::Cancel(id)] {
            let data = action.callback_data();
            assert!(data.len() <= 64, "{data} exceeds callback limit");
            assert_eq!(Action::parse(&data), Some(action));
        }
    }

    #[test]
    fn parse_rejects_unknown_verbs_and_ids() {
        let id = RequestId::new();
        assert_eq!(Action::parse(&format!("admin_stats:{id}")), None);
        assert_eq!(Action::parse("pause:not-an-id"), None);
        assert_eq!(Action::parse("pause"), None);
    }

    #[test]
    fn controls_map_to_buttons() {
        let id = RequestId::new();
        assert!(StatusControls::None.actions().is_empty());
        assert_eq!(
            StatusControls::ResumeCancel(id).actions(),
            vec![Action::Resume(id), Action::Cancel(id)]
        );
        assert_eq!(
            StatusControls::PauseCancel(id).actions(),
            vec![Action::Pause(id), Action::Cancel(id)]
        );
    }
}
