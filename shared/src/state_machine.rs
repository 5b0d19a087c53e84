//! Execution Lifecycle State Machine
//!
//! Running -> Finishing | Aborting -> Finished. Finishing and Aborting run the
//! same terminal action; they only differ in how the user is told about it.

/// Lifecycle state of one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Running,
    Finishing,
    Aborting,
    Finished,
}

/// Events that can trigger lifecycle transitions
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// Program time elapsed or power draw indicated the end
    Completed,
    /// A user aborted the execution
    AbortRequested,
    /// Terminal action ran through
    TerminalActionSucceeded,
    /// Terminal action stopped at a failing step
    TerminalActionFailed,
}

/// Result of a transition attempt
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionResult {
    Success(ExecutionState),
    Invalid {
        from: ExecutionState,
        event: LifecycleEvent,
    },
}

#[derive(Debug)]
pub struct ExecutionLifecycle {
    current_state: ExecutionState,
}

impl Default for ExecutionLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionLifecycle {
    /// A freshly started execution
    pub fn new() -> Self {
        Self {
            current_state: ExecutionState::Running,
        }
    }

    pub fn state(&self) -> ExecutionState {
        self.current_state
    }

    /// True once an abort was requested, even if the terminal action has
    /// not run yet
    pub fn is_aborted(&self) -> bool {
        self.current_state == ExecutionState::Aborting
    }

    pub fn is_finished(&self) -> bool {
        self.current_state == ExecutionState::Finished
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: LifecycleEvent) -> TransitionResult {
        match self.get_next_state(&event) {
            Some(state) => {
                self.current_state = state;
                TransitionResult::Success(state)
            }
            None => TransitionResult::Invalid {
                from: self.current_state,
                event,
            },
        }
    }

    fn get_next_state(&self, event: &LifecycleEvent) -> Option<ExecutionState> {
        use ExecutionState::*;
        use LifecycleEvent::*;

        match (self.current_state, event) {
            (Running, Completed) => Some(Finishing),
            (Running, AbortRequested) => Some(Aborting),

            // A retried natural finish may still be turned into an abort
            (Finishing, Completed) => Some(Finishing),
            (Finishing, AbortRequested) => Some(Aborting),

            // Abort wording sticks once requested
            (Aborting, Completed | AbortRequested) => Some(Aborting),

            (Finishing | Aborting, TerminalActionSucceeded) => Some(Finished),
            (Finishing | Aborting, TerminalActionFailed) => Some(self.current_state),

            _ => None,
        }
    }
}
