//! Coroutine lifecycle state

use core::fmt;

/// State of a coroutine
///
/// ```text
///            resume            yield
///   Ready ──────────► Running ───────► Ready
///     ▲                  │
///     │ wake             │ park / return
///     │                  ▼
///   Parked ◄──────── Parked | Terminated
/// ```
///
/// `Terminated` is absorbing. `Parked` only leaves through an external wake
/// issued by whatever structure the coroutine is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CoroutineState {
    /// Runnable, sitting in a ready queue (or freshly created)
    Ready = 0,

    /// Currently executing on its own stack
    Running = 1,

    /// Suspended on a channel, select, timer or descriptor
    Parked = 2,

    /// Entry closure returned (or panicked); stack may be released
    Terminated = 3,
}

impl CoroutineState {
    /// Check if this state allows the coroutine to be resumed
    #[inline]
    pub const fn is_runnable(&self) -> bool {
        matches!(self, CoroutineState::Ready)
    }

    /// Check if the coroutine has finished
    #[inline]
    pub const fn is_terminated(&self) -> bool {
        matches!(self, CoroutineState::Terminated)
    }

    /// Whether moving from `self` to `next` is a legal lifecycle step
    pub const fn can_transition_to(&self, next: CoroutineState) -> bool {
        use CoroutineState::*;
        matches!(
            (*self, next),
            (Ready, Running)
                | (Running, Ready)
                | (Running, Parked)
                | (Running, Terminated)
                | (Parked, Ready)
        )
    }
}

impl From<u8> for CoroutineState {
    fn from(v: u8) -> Self {
        match v {
            0 => CoroutineState::Ready,
            1 => CoroutineState::Running,
            2 => CoroutineState::Parked,
            _ => CoroutineState::Terminated,
        }
    }
}

impl From<CoroutineState> for u8 {
    fn from(state: CoroutineState) -> u8 {
        state as u8
    }
}

impl fmt::Display for CoroutineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoroutineState::Ready => write!(f, "ready"),
            CoroutineState::Running => write!(f, "running"),
            CoroutineState::Parked => write!(f, "parked"),
            CoroutineState::Terminated => write!(f, "terminated"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(CoroutineState::Ready.is_runnable());
        assert!(!CoroutineState::Running.is_runnable());
        assert!(!CoroutineState::Parked.is_runnable());
        assert!(CoroutineState::Terminated.is_terminated());
        assert!(!CoroutineState::Parked.is_terminated());
    }

    #[test]
    fn test_legal_transitions() {
        use CoroutineState::*;
        assert!(Ready.can_transition_to(Running));
        assert!(Running.can_transition_to(Parked));
        assert!(Parked.can_transition_to(Ready));
        assert!(Running.can_transition_to(Terminated));

        // Parked only leaves through a wake
        assert!(!Parked.can_transition_to(Running));
        // Terminated is absorbing
        for next in [Ready, Running, Parked, Terminated] {
            assert!(!Terminated.can_transition_to(next));
        }
    }

    #[test]
    fn test_u8_roundtrip_and_display() {
        assert_eq!(CoroutineState::from(2u8), CoroutineState::Parked);
        assert_eq!(u8::from(CoroutineState::Running), 1);
        assert_eq!(CoroutineState::Parked.to_string(), "parked");
    }
}
