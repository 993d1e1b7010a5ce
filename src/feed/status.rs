use std::fmt;

use serde::Serialize;

// ---

/// Lifecycle of one feed subscription.
///
/// ```text
/// idle -> connecting -> live
/// connecting | live -> error -> connecting
/// any -> stopped -> idle (restart)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedStatus {
    #[default]
    Idle,
    Connecting,
    Live,
    Error,
    Stopped,
}

impl FeedStatus {
    // ---
    pub fn can_transition_to(self, next: FeedStatus) -> bool {
        // ---
        use FeedStatus::*;
        match (self, next) {
            (Stopped, Stopped) => false,
            (_, Stopped) => true,
            (Idle, Connecting)
            | (Connecting, Live)
            | (Connecting, Error)
            | (Live, Error)
            | (Error, Connecting)
            | (Stopped, Idle) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        // ---
        match self {
            FeedStatus::Idle => "idle",
            FeedStatus::Connecting => "connecting",
            FeedStatus::Live => "live",
            FeedStatus::Error => "error",
            FeedStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::FeedStatus::{self, *};

    const ALL: [FeedStatus; 5] = [Idle, Connecting, Live, Error, Stopped];

    #[test]
    fn test_allowed_transitions() {
        // ---
        let allowed = [
            (Idle, Connecting),
            (Connecting, Live),
            (Connecting, Error),
            (Live, Error),
            (Error, Connecting),
            (Stopped, Idle),
            (Idle, Stopped),
            (Connecting, Stopped),
            (Live, Stopped),
            (Error, Stopped),
        ];

        for from in ALL {
            for to in ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_serializes_lowercase() {
        // ---
        assert_eq!(serde_json::to_value(Live).unwrap(), "live");
        assert_eq!(Stopped.to_string(), "stopped");
        assert_eq!(FeedStatus::default(), Idle);
    }
}
