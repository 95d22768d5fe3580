//! Visibility trigger.
//!
//! The host application reports foreground/background transitions here.
//! Becoming visible while not connected reconnects at once, skipping any
//! pending backoff wait; the manager performs the status check so it is
//! evaluated against the state at the moment the transition is processed.

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;

use crate::manager::Command;

/// Application visibility.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Visibility {
    /// The user is looking at the application.
    Foreground,
    /// The application is hidden.
    Background,
}

impl Visibility {
    /// Map a "document hidden" flag.
    pub fn from_hidden(hidden: bool) -> Self {
        if hidden { Self::Background } else { Self::Foreground }
    }
}

/// Forwards visibility transitions to the connection manager.
///
/// Cheap to clone; every clone feeds the same manager.
#[derive(Clone, Debug)]
pub struct VisibilityTrigger {
    commands: mpsc::UnboundedSender<Command>,
}

impl VisibilityTrigger {
    pub(crate) fn new(commands: mpsc::UnboundedSender<Command>) -> Self {
        Self { commands }
    }

    /// Report a transition. Returns `false` once the manager has stopped.
    pub fn notify(&self, visibility: Visibility) -> bool {
        debug!(?visibility, "visibility changed");
        self.commands.send(Command::Visibility(visibility)).is_ok()
    }

    /// Shorthand for `notify(Visibility::Foreground)`.
    pub fn foregrounded(&self) -> bool {
        self.notify(Visibility::Foreground)
    }

    /// Shorthand for `notify(Visibility::Background)`.
    pub fn backgrounded(&self) -> bool {
        self.notify(Visibility::Background)
    }

    /// Forward every transition from `transitions` until it ends or the
    /// manager stops.
    pub async fn watch<S>(self, transitions: S)
    where
        S: Stream<Item = Visibility> + Send,
    {
        let mut transitions = std::pin::pin!(transitions);
        while let Some(visibility) = transitions.next().await {
            if !self.notify(visibility) {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn from_hidden() {
        assert_eq!(Visibility::from_hidden(true), Visibility::Background);
        assert_eq!(Visibility::from_hidden(false), Visibility::Foreground);
    }

    #[test]
    fn notify_sends_command() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let trigger = VisibilityTrigger::new(tx);
        assert!(trigger.foregrounded());
        assert!(trigger.backgrounded());
        assert_matches!(
            rx.try_recv(),
            Ok(Command::Visibility(Visibility::Foreground))
        );
        assert_matches!(
            rx.try_recv(),
            Ok(Command::Visibility(Visibility::Background))
        );
    }

    #[test]
    fn notify_reports_stopped_manager() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        assert!(!VisibilityTrigger::new(tx).foregrounded());
    }

    #[tokio::test]
    async fn watch_forwards_stream() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let trigger = VisibilityTrigger::new(tx);
        let transitions = futures::stream::iter([
            Visibility::Background,
            Visibility::Foreground,
        ]);
        trigger.watch(transitions).await;

        let mut seen = Vec::new();
        while let Ok(Command::Visibility(v)) = rx.try_recv() {
            seen.push(v);
        }
        assert_eq!(seen, vec![Visibility::Background, Visibility::Foreground]);
    }
}
