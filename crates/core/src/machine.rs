use std::fmt;

use serde::{Deserialize, Serialize};

/// Key of one conversation instance.
///
/// A new identity is minted for every brand-new conversation and never reused, so
/// continuations and UI events from a superseded conversation can be rejected.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ConversationIdentity(pub u64);

impl ConversationIdentity {
    pub const FIRST: Self = Self(1);

    /// Creates a typed conversation identity.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for ConversationIdentity {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Where the conversation window is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Hidden,
    Open,
    Minimized,
}

/// Lifecycle of the widget's conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConversationPhase {
    #[default]
    NotStarted,
    /// Window requested, waiting for the conversation UI to report ready.
    Opening(ConversationIdentity),
    Open(ConversationIdentity),
    /// Window hidden, conversation still live.
    MinimizedActive(ConversationIdentity),
    /// Window hidden, conversation already ended.
    MinimizedClosed(ConversationIdentity),
    /// Fully closed; carries the last identity, if a conversation ever started.
    Closed(Option<ConversationIdentity>),
}

impl ConversationPhase {
    pub fn identity(&self) -> Option<ConversationIdentity> {
        match self {
            Self::NotStarted => None,
            Self::Opening(identity)
            | Self::Open(identity)
            | Self::MinimizedActive(identity)
            | Self::MinimizedClosed(identity) => Some(*identity),
            Self::Closed(identity) => *identity,
        }
    }

    pub fn visibility(&self) -> Visibility {
        match self {
            Self::NotStarted | Self::Closed(_) => Visibility::Hidden,
            Self::Opening(_) | Self::Open(_) => Visibility::Open,
            Self::MinimizedActive(_) | Self::MinimizedClosed(_) => Visibility::Minimized,
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Opening(_))
    }
}

/// What a primary action did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryTransition {
    /// A new conversation was minted and the window requested.
    Opening(ConversationIdentity),
    /// A minimized live conversation was shown again.
    Restored(ConversationIdentity),
    /// The open window was hidden; the conversation keeps running.
    Minimized(ConversationIdentity),
}

/// Result of a full close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseOutcome {
    pub identity: Option<ConversationIdentity>,
    /// True when a live conversation existed and must be ended remotely.
    pub was_live: bool,
}

/// Rejection reason for illegal transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionRejection {
    /// A conversation is still opening; re-entrant opens are ignored.
    Busy { active: ConversationIdentity },
    /// The event belongs to a conversation that is no longer current.
    StaleIdentity {
        current: Option<ConversationIdentity>,
        attempted: ConversationIdentity,
    },
    /// Minimize requested while no window is shown.
    NotOpen { phase: ConversationPhase },
    /// Resume requested after the lifecycle already began.
    AlreadyStarted { phase: ConversationPhase },
}

/// Result type for transition application.
pub type TransitionResult<T> = Result<T, TransitionRejection>;

/// Single source of truth for the widget lifecycle.
#[derive(Debug, Clone, Default)]
pub struct ConversationMachine {
    phase: ConversationPhase,
    last_identity: Option<ConversationIdentity>,
    ended: Option<ConversationIdentity>,
}

impl ConversationMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> ConversationPhase {
        self.phase
    }

    pub fn current_identity(&self) -> Option<ConversationIdentity> {
        self.phase.identity()
    }

    /// True when `identity` names the current conversation and it is still running.
    pub fn is_live(&self, identity: ConversationIdentity) -> bool {
        let running = matches!(
            self.phase,
            ConversationPhase::Opening(current)
                | ConversationPhase::Open(current)
                | ConversationPhase::MinimizedActive(current)
                if current == identity
        );
        running && self.ended != Some(identity)
    }

    pub fn has_live_conversation(&self) -> bool {
        self.current_identity()
            .is_some_and(|identity| self.is_live(identity))
    }

    pub fn conversation_closed(&self) -> bool {
        match self.phase {
            ConversationPhase::Closed(_) | ConversationPhase::MinimizedClosed(_) => true,
            phase => phase.identity().is_some() && phase.identity() == self.ended,
        }
    }

    /// True when the next primary action would mint a new conversation.
    pub fn primary_action_opens(&self) -> bool {
        matches!(
            self.phase,
            ConversationPhase::NotStarted
                | ConversationPhase::MinimizedClosed(_)
                | ConversationPhase::Closed(_)
        )
    }

    /// Starts the lifecycle for a conversation persisted by an earlier page load.
    pub fn resume(&mut self) -> TransitionResult<ConversationIdentity> {
        if self.phase != ConversationPhase::NotStarted {
            return Err(TransitionRejection::AlreadyStarted { phase: self.phase });
        }
        Ok(self.open_new())
    }

    /// Applies the single "primary action" control.
    pub fn primary_action(&mut self) -> TransitionResult<PrimaryTransition> {
        match self.phase {
            ConversationPhase::NotStarted
            | ConversationPhase::MinimizedClosed(_)
            | ConversationPhase::Closed(_) => Ok(PrimaryTransition::Opening(self.open_new())),
            ConversationPhase::Opening(active) => Err(TransitionRejection::Busy { active }),
            ConversationPhase::MinimizedActive(identity) => {
                self.phase = ConversationPhase::Open(identity);
                Ok(PrimaryTransition::Restored(identity))
            }
            ConversationPhase::Open(identity) => {
                self.hide(identity);
                Ok(PrimaryTransition::Minimized(identity))
            }
        }
    }

    /// Hides the window without ending the conversation.
    pub fn minimize(&mut self) -> TransitionResult<ConversationIdentity> {
        match self.phase {
            ConversationPhase::Opening(identity) | ConversationPhase::Open(identity) => {
                self.hide(identity);
                Ok(identity)
            }
            phase => Err(TransitionRejection::NotOpen { phase }),
        }
    }

    /// Full close, legal from any phase. The next primary action mints a new identity.
    pub fn close(&mut self) -> CloseOutcome {
        let was_live = self.has_live_conversation();
        let identity = self.last_identity;
        self.phase = ConversationPhase::Closed(identity);
        CloseOutcome { identity, was_live }
    }

    /// The conversation UI for `identity` is usable: clears the busy state.
    ///
    /// Visibility is untouched; a ready signal after the user minimized is a no-op.
    pub fn ready(&mut self, identity: ConversationIdentity) -> TransitionResult<()> {
        self.ensure_current(identity)?;
        if self.phase == ConversationPhase::Opening(identity) {
            self.phase = ConversationPhase::Open(identity);
        }
        Ok(())
    }

    /// The conversation behind `identity` ended on the service side.
    pub fn remote_ended(&mut self, identity: ConversationIdentity) -> TransitionResult<()> {
        self.ensure_current(identity)?;
        self.ended = Some(identity);
        if self.phase == ConversationPhase::MinimizedActive(identity) {
            self.phase = ConversationPhase::MinimizedClosed(identity);
        }
        Ok(())
    }

    /// Starting the conversation behind `identity` failed; the button is usable again.
    pub fn start_failed(&mut self, identity: ConversationIdentity) -> TransitionResult<()> {
        self.ensure_current(identity)?;
        if self.is_live(identity) {
            self.phase = ConversationPhase::Closed(Some(identity));
        }
        Ok(())
    }

    fn open_new(&mut self) -> ConversationIdentity {
        let identity = self
            .last_identity
            .map_or(ConversationIdentity::FIRST, ConversationIdentity::next);
        self.last_identity = Some(identity);
        self.ended = None;
        self.phase = ConversationPhase::Opening(identity);
        identity
    }

    fn hide(&mut self, identity: ConversationIdentity) {
        self.phase = if self.ended == Some(identity) {
            ConversationPhase::MinimizedClosed(identity)
        } else {
            ConversationPhase::MinimizedActive(identity)
        };
    }

    fn ensure_current(&self, attempted: ConversationIdentity) -> TransitionResult<()> {
        let current = self.current_identity();
        if current == Some(attempted) {
            Ok(())
        } else {
            Err(TransitionRejection::StaleIdentity { current, attempted })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIRST: ConversationIdentity = ConversationIdentity::FIRST;
    const SECOND: ConversationIdentity = ConversationIdentity::new(2);

    #[test]
    fn open_ready_minimize_restore_close() {
        let mut machine = ConversationMachine::new();
        assert_eq!(machine.phase(), ConversationPhase::NotStarted);
        assert_eq!(machine.phase().visibility(), Visibility::Hidden);

        assert_eq!(
            machine.primary_action(),
            Ok(PrimaryTransition::Opening(FIRST))
        );
        assert!(machine.phase().is_busy());
        assert_eq!(machine.phase().visibility(), Visibility::Open);
        assert!(!machine.primary_action_opens());

        machine.ready(FIRST).expect("ready");
        assert_eq!(machine.phase(), ConversationPhase::Open(FIRST));
        assert!(!machine.phase().is_busy());

        assert_eq!(
            machine.primary_action(),
            Ok(PrimaryTransition::Minimized(FIRST))
        );
        assert_eq!(machine.phase(), ConversationPhase::MinimizedActive(FIRST));

        assert_eq!(
            machine.primary_action(),
            Ok(PrimaryTransition::Restored(FIRST))
        );
        assert_eq!(machine.phase(), ConversationPhase::Open(FIRST));

        assert_eq!(
            machine.close(),
            CloseOutcome {
                identity: Some(FIRST),
                was_live: true
            }
        );
        assert_eq!(machine.phase(), ConversationPhase::Closed(Some(FIRST)));
        assert_eq!(machine.current_identity(), Some(FIRST));
        assert!(machine.conversation_closed());
        assert!(machine.primary_action_opens());
    }

    #[test]
    fn reopening_after_close_mints_a_new_identity() {
        let mut machine = ConversationMachine::new();
        machine.primary_action().expect("open");
        machine.ready(FIRST).expect("ready");
        machine.close();

        assert_eq!(
            machine.primary_action(),
            Ok(PrimaryTransition::Opening(SECOND))
        );
        // Late signals from the first conversation must not touch the second.
        assert_eq!(
            machine.ready(FIRST),
            Err(TransitionRejection::StaleIdentity {
                current: Some(SECOND),
                attempted: FIRST,
            })
        );
        assert_eq!(machine.phase(), ConversationPhase::Opening(SECOND));
        assert!(machine.start_failed(FIRST).is_err());
        assert!(machine.remote_ended(FIRST).is_err());
        assert!(machine.is_live(SECOND));
    }

    #[test]
    fn opening_is_gated_while_busy() {
        let mut machine = ConversationMachine::new();
        machine.primary_action().expect("open");
        assert_eq!(
            machine.primary_action(),
            Err(TransitionRejection::Busy { active: FIRST })
        );
        assert_eq!(machine.phase(), ConversationPhase::Opening(FIRST));
    }

    #[test]
    fn remote_end_while_minimized_reopens_fresh() {
        let mut machine = ConversationMachine::new();
        machine.primary_action().expect("open");
        machine.ready(FIRST).expect("ready");
        machine.minimize().expect("minimize");
        machine.remote_ended(FIRST).expect("ended");
        assert_eq!(machine.phase(), ConversationPhase::MinimizedClosed(FIRST));
        assert!(!machine.has_live_conversation());

        assert_eq!(
            machine.primary_action(),
            Ok(PrimaryTransition::Opening(SECOND))
        );
        assert!(!machine.conversation_closed());
    }

    #[test]
    fn remote_end_while_open_minimizes_as_closed() {
        let mut machine = ConversationMachine::new();
        machine.primary_action().expect("open");
        machine.ready(FIRST).expect("ready");
        machine.remote_ended(FIRST).expect("ended");
        assert_eq!(machine.phase(), ConversationPhase::Open(FIRST));
        assert!(machine.conversation_closed());

        assert_eq!(
            machine.primary_action(),
            Ok(PrimaryTransition::Minimized(FIRST))
        );
        assert_eq!(machine.phase(), ConversationPhase::MinimizedClosed(FIRST));
    }

    #[test]
    fn close_without_conversation_is_not_live() {
        let mut machine = ConversationMachine::new();
        assert_eq!(
            machine.close(),
            CloseOutcome {
                identity: None,
                was_live: false
            }
        );
        assert_eq!(
            machine.primary_action(),
            Ok(PrimaryTransition::Opening(FIRST))
        );
    }

    #[test]
    fn minimize_requires_a_shown_window() {
        let mut machine = ConversationMachine::new();
        assert_eq!(
            machine.minimize(),
            Err(TransitionRejection::NotOpen {
                phase: ConversationPhase::NotStarted
            })
        );

        machine.primary_action().expect("open");
        assert_eq!(machine.minimize(), Ok(FIRST));
        assert_eq!(machine.phase(), ConversationPhase::MinimizedActive(FIRST));
        // Ready after the user minimized leaves the window hidden.
        machine.ready(FIRST).expect("ready");
        assert_eq!(machine.phase(), ConversationPhase::MinimizedActive(FIRST));
    }

    #[test]
    fn failed_start_frees_the_button() {
        let mut machine = ConversationMachine::new();
        machine.primary_action().expect("open");
        machine.start_failed(FIRST).expect("failed");
        assert_eq!(machine.phase(), ConversationPhase::Closed(Some(FIRST)));
        assert_eq!(
            machine.primary_action(),
            Ok(PrimaryTransition::Opening(SECOND))
        );
    }

    #[test]
    fn resume_only_from_not_started() {
        let mut machine = ConversationMachine::new();
        assert_eq!(machine.resume(), Ok(FIRST));
        assert!(matches!(
            machine.resume(),
            Err(TransitionRejection::AlreadyStarted { .. })
        ));
    }
}
