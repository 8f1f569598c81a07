//! Per-job context handed to workers.
//!
//! Inputs resolve through watch slots: text and URL inputs are ready at
//! dispatch, while event and job references fill in when their lookup
//! completes. A worker that asks for an input parks until the slot leaves
//! `Pending`, so referenced events may arrive after the request does.

use dvm_protocol::{Event, InputType, JobRequest};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

/// A job input in usable form.
#[derive(Debug, Clone)]
pub enum ResolvedInput {
    Text(String),
    Url(String),
    Event(Arc<Event>),
}

impl ResolvedInput {
    /// The input as text: the value itself, or the content of a
    /// referenced event.
    pub fn as_text(&self) -> &str {
        match self {
            ResolvedInput::Text(v) | ResolvedInput::Url(v) => v,
            ResolvedInput::Event(event) => &event.content,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum InputState {
    Pending,
    Ready(ResolvedInput),
    Failed(String),
}

/// Errors resolving a job input.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("no input at index {0}")]
    OutOfRange(usize),

    #[error("input {0} unresolved: {1}")]
    Unresolved(usize, String),
}

/// Everything a worker needs about one job.
pub struct JobContext {
    request: Arc<JobRequest>,
    slots: Vec<watch::Receiver<InputState>>,
}

impl JobContext {
    pub fn request(&self) -> &JobRequest {
        &self.request
    }

    pub fn input_count(&self) -> usize {
        self.slots.len()
    }

    /// Resolve the input at `index`, waiting for referenced events if
    /// their lookup is still in flight.
    pub async fn input(&self, index: usize) -> Result<ResolvedInput, InputError> {
        let mut rx = self
            .slots
            .get(index)
            .ok_or(InputError::OutOfRange(index))?
            .clone();
        let state = rx
            .wait_for(|s| !matches!(s, InputState::Pending))
            .await
            .map_err(|_| InputError::Unresolved(index, "resolution abandoned".to_string()))?;
        match &*state {
            InputState::Ready(input) => Ok(input.clone()),
            InputState::Failed(reason) => Err(InputError::Unresolved(index, reason.clone())),
            InputState::Pending => unreachable!("wait_for only returns non-pending states"),
        }
    }

    /// Resolve the input at `index` as text.
    pub async fn text_input(&self, index: usize) -> Result<String, InputError> {
        Ok(self.input(index).await?.as_text().to_string())
    }
}

/// Writers for the pending slots of one context, keyed by the referenced
/// event id. Several inputs referencing the same id share a lookup but
/// keep their own slot.
pub(crate) struct InputSlots {
    pub(crate) by_id: HashMap<String, Vec<watch::Sender<InputState>>>,
}

impl InputSlots {
    /// Fill every slot waiting on an id.
    pub(crate) fn resolve(&mut self, id: &str, event: &Arc<Event>) {
        if let Some(senders) = self.by_id.remove(id) {
            for tx in senders {
                let _ = tx.send(InputState::Ready(ResolvedInput::Event(Arc::clone(event))));
            }
        }
    }

    /// Mark every slot waiting on an id as failed.
    pub(crate) fn fail(&mut self, id: &str, reason: &str) {
        if let Some(senders) = self.by_id.remove(id) {
            for tx in senders {
                let _ = tx.send(InputState::Failed(reason.to_string()));
            }
        }
    }
}

/// Build the context for a request.
///
/// Returns the context plus the writers for its unresolved slots.
pub(crate) fn build_context(request: Arc<JobRequest>) -> (JobContext, InputSlots) {
    let mut slots = Vec::with_capacity(request.inputs.len());
    let mut by_id: HashMap<String, Vec<watch::Sender<InputState>>> = HashMap::new();

    for input in &request.inputs {
        let initial = match input.input_type {
            InputType::Text => InputState::Ready(ResolvedInput::Text(input.value.clone())),
            InputType::Url => InputState::Ready(ResolvedInput::Url(input.value.clone())),
            InputType::Event | InputType::Job => InputState::Pending,
        };
        let pending = matches!(initial, InputState::Pending);
        let (tx, rx) = watch::channel(initial);
        slots.push(rx);
        if pending {
            by_id.entry(input.value.clone()).or_default().push(tx);
        }
    }

    (JobContext { request, slots }, InputSlots { by_id })
}
