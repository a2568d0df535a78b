use crate::error::StageResult;

/// Processing lifecycle shared by every stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    /// Nothing allocated.
    #[default]
    Null,
    /// Transform resources allocated, no stream data yet.
    Ready,
    /// Stream buffers allocated; frames may be processed.
    Active,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    NullToReady,
    ReadyToActive,
    ActiveToReady,
    ReadyToNull,
}

impl Transition {
    pub fn target(self) -> State {
        match self {
            Transition::NullToReady | Transition::ActiveToReady => State::Ready,
            Transition::ReadyToActive => State::Active,
            Transition::ReadyToNull => State::Null,
        }
    }
}

impl State {
    /// The single transition that moves one step from `self` toward `target`.
    pub fn step_toward(self, target: State) -> Option<Transition> {
        match (self, target) {
            (State::Null, State::Ready | State::Active) => Some(Transition::NullToReady),
            (State::Ready, State::Active) => Some(Transition::ReadyToActive),
            (State::Ready, State::Null) => Some(Transition::ReadyToNull),
            (State::Active, State::Ready | State::Null) => Some(Transition::ActiveToReady),
            _ => None,
        }
    }
}

/// Stages allocate and release their resources as they move through [`State`].
pub trait Lifecycle {
    fn state(&self) -> State;

    /// Perform one transition. Implementations record the new state on success.
    fn change_state(&mut self, transition: Transition) -> StageResult<()>;

    /// Walk every intermediate transition until `target` is reached.
    fn set_state(&mut self, target: State) -> StageResult<()> {
        while let Some(transition) = self.state().step_toward(target) {
            self.change_state(transition)?;
        }
        Ok(())
    }
}
