//! Multi-step conversation state machine.
//!
//! A sequence is an ordered list of steps. Each input event either advances
//! the cursor by exactly one step (running that step's transition) or leaves
//! it where it is. Guards decide which:
//!
//! 1. the current step's own guard, if any;
//! 2. then the common guard, if any.
//!
//! Both must pass before the transition runs. The common guard is never
//! evaluated when the step guard already rejected the event.

use crate::{
    errors::Error,
    event::{Event, EventKind},
    handler::{Guard, Handler},
    Result,
};

#[derive(Debug)]
pub struct Step<E> {
    pub transition: Handler<E>,
    pub check: Option<Guard<E>>,
}

impl<E> Clone for Step<E> {
    fn clone(&self) -> Self {
        Self {
            transition: self.transition.clone(),
            check: self.check.clone(),
        }
    }
}

/// What one `input` call did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputOutcome {
    /// Transition ran, more steps remain.
    Advanced,
    /// Transition ran and it was the last step.
    Finished,
    /// Step guard rejected the event; the same step is presented next time.
    Retry,
    /// Common guard rejected the event.
    Vetoed,
    /// The sequence was already finished; nothing ran.
    Ignored,
}

impl InputOutcome {
    pub fn advanced(self) -> bool {
        matches!(self, InputOutcome::Advanced | InputOutcome::Finished)
    }
}

#[derive(Debug)]
pub struct Sequence<E> {
    steps: Vec<Step<E>>,
    common_check: Option<Guard<E>>,
    on_enter: Option<Handler<E>>,
    on_exit: Option<Handler<E>>,
    on_veto: Option<Handler<E>>,
    cursor: usize,
}

impl<E> Clone for Sequence<E> {
    fn clone(&self) -> Self {
        Self {
            steps: self.steps.clone(),
            common_check: self.common_check.clone(),
            on_enter: self.on_enter.clone(),
            on_exit: self.on_exit.clone(),
            on_veto: self.on_veto.clone(),
            cursor: self.cursor,
        }
    }
}

impl<E> Default for Sequence<E> {
    fn default() -> Self {
        Self {
            steps: Vec::new(),
            common_check: None,
            on_enter: None,
            on_exit: None,
            on_veto: None,
            cursor: 0,
        }
    }
}

impl<E> Sequence<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_finished(&self) -> bool {
        self.cursor == self.steps.len()
    }

    /// Append a step and return its index.
    pub fn append_step(&mut self, transition: Handler<E>, check: Option<Guard<E>>) -> usize {
        self.steps.push(Step { transition, check });
        self.steps.len() - 1
    }

    /// Builder form of [`Sequence::append_step`] without a guard.
    pub fn step(mut self, transition: Handler<E>) -> Self {
        self.append_step(transition, None);
        self
    }

    /// Builder form of [`Sequence::append_step`] with a guard.
    pub fn guarded_step(mut self, transition: Handler<E>, check: Guard<E>) -> Self {
        self.append_step(transition, Some(check));
        self
    }

    /// Replace the guard of the most recently appended step.
    pub fn set_check_on_last_step(&mut self, check: Guard<E>) -> Result<()> {
        let last = self.steps.last_mut().ok_or(Error::NoStepsDefined)?;
        last.check = Some(check);
        Ok(())
    }

    pub fn set_common_check(&mut self, check: Guard<E>) {
        self.common_check = Some(check);
    }

    pub fn clear_common_check(&mut self) {
        self.common_check = None;
    }

    /// Runs right before the first transition.
    pub fn set_on_enter(&mut self, hook: Handler<E>) {
        self.on_enter = Some(hook);
    }

    /// Runs right after the last transition.
    pub fn set_on_exit(&mut self, hook: Handler<E>) {
        self.on_exit = Some(hook);
    }

    /// Runs with the event the common guard rejected.
    pub fn set_on_veto(&mut self, hook: Handler<E>) {
        self.on_veto = Some(hook);
    }

    pub fn finish(&mut self) {
        self.cursor = self.steps.len();
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Move the cursor; values past the end clamp to the end.
    pub fn set_cursor(&mut self, n: usize) {
        self.cursor = n.min(self.steps.len());
    }
}

impl<E: Clone + Send + 'static> Sequence<E> {
    /// Feed one event to the current step.
    pub async fn input(&mut self, event: E) -> InputOutcome {
        if self.is_finished() {
            return InputOutcome::Ignored;
        }

        let step = &self.steps[self.cursor];
        if let Some(check) = &step.check {
            if !check.check(&event) {
                return InputOutcome::Retry;
            }
        }
        if let Some(common) = &self.common_check {
            if !common.check(&event) {
                if let Some(veto) = &self.on_veto {
                    veto.call(event).await;
                }
                return InputOutcome::Vetoed;
            }
        }

        let transition = step.transition.clone();
        let is_first = self.cursor == 0;
        let is_last = self.cursor + 1 == self.steps.len();

        if is_first {
            if let Some(enter) = &self.on_enter {
                enter.call(event.clone()).await;
            }
        }

        let exit_event = match (&self.on_exit, is_last) {
            (Some(_), true) => Some(event.clone()),
            _ => None,
        };

        transition.call(event).await;
        self.cursor += 1;

        if let (Some(exit), Some(ev)) = (&self.on_exit, exit_event) {
            exit.call(ev).await;
        }

        if self.is_finished() {
            InputOutcome::Finished
        } else {
            InputOutcome::Advanced
        }
    }
}

impl<E: EventKind> Sequence<E> {
    /// Lift a typed sequence to the `Event` level for the conversation table.
    pub(crate) fn erase(self) -> Sequence<Event> {
        Sequence {
            steps: self
                .steps
                .into_iter()
                .map(|s| Step {
                    transition: s.transition.erase(),
                    check: s.check.map(Guard::erase),
                })
                .collect(),
            common_check: self.common_check.map(Guard::erase),
            on_enter: self.on_enter.map(Handler::erase),
            on_exit: self.on_exit.map(Handler::erase),
            on_veto: self.on_veto.map(Handler::erase),
            cursor: self.cursor,
        }
    }
}
