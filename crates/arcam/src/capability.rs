//! Capability gate - OS-mediated permission requests
//!
//! One request per capability is in flight at a time. Callers that ask while
//! a request is pending attach their continuation to it instead of causing
//! a second OS prompt. When the OS answers (on whatever thread it likes) the
//! `PermissionResponder` posts the answer onto the control queue, and the
//! control loop calls [`CapabilityGate::resolve`], which runs every attached
//! continuation exactly once. Continuations therefore always run on the
//! control context, never on the OS callback thread and never synchronously
//! inside `request`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::control::ControlEvent;

/// A hardware resource gated behind user consent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Camera,
    Microphone,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Camera => write!(f, "camera"),
            Capability::Microphone => write!(f, "microphone"),
        }
    }
}

/// Final answer for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityOutcome {
    Granted,
    Denied,
}

impl CapabilityOutcome {
    pub fn is_granted(self) -> bool {
        self == CapabilityOutcome::Granted
    }
}

/// Where a capability currently stands, as seen by the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    NotRequested,
    Pending,
    Granted,
    Denied,
}

/// What `request` did with a new caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestIssue {
    /// A new OS prompt was shown.
    Prompted,
    /// The OS already reports the capability as granted; no prompt.
    AlreadyGranted,
    /// Joined a request that was already pending.
    Attached,
}

/// Invoked once with the outcome, on the control context.
pub type Continuation = Box<dyn FnOnce(CapabilityOutcome) + Send>;

/// The OS side of permission handling.
pub trait PermissionPrompter: Send + Sync {
    /// Current grant state without prompting. `Some(Granted)` skips the prompt.
    fn check(&self, _capability: Capability) -> Option<CapabilityOutcome> {
        None
    }

    /// True if the OS recorded an earlier denial and wants an explanation shown.
    fn should_show_rationale(&self, _capability: Capability) -> bool {
        false
    }

    /// Show the explanation. Best effort.
    fn show_rationale(&self, _capability: Capability) -> Result<(), String> {
        Ok(())
    }

    /// Show the OS prompt. The answer goes through `responder`, from any thread.
    fn prompt(&self, capability: Capability, responder: PermissionResponder);
}

/// Completes one OS prompt. Consumed on use, so it answers at most once.
///
/// Dropping it unanswered (dialog failed to show, helper thread died) counts
/// as a denial, so the pending request always resolves.
#[derive(Debug)]
pub struct PermissionResponder {
    capability: Capability,
    events: Option<mpsc::UnboundedSender<ControlEvent>>,
}

impl PermissionResponder {
    pub(crate) fn new(capability: Capability, events: mpsc::UnboundedSender<ControlEvent>) -> Self {
        Self {
            capability,
            events: Some(events),
        }
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    /// Deliver the OS answer to the control context.
    pub fn respond(mut self, outcome: CapabilityOutcome) {
        self.send(outcome);
    }

    fn send(&mut self, outcome: CapabilityOutcome) {
        let Some(events) = self.events.take() else {
            return;
        };
        let event = ControlEvent::PermissionResponse {
            capability: self.capability,
            outcome,
        };
        if events.send(event).is_err() {
            debug!(capability = %self.capability, "permission answer after control loop exit");
        }
    }
}

impl Drop for PermissionResponder {
    fn drop(&mut self) {
        if self.events.is_some() {
            warn!(capability = %self.capability, "permission prompt dropped unanswered, treating as denied");
            self.send(CapabilityOutcome::Denied);
        }
    }
}

/// A request waiting on the OS.
pub struct PermissionRequest {
    pub capability: Capability,
    pub requested_at: DateTime<Utc>,
    continuations: Vec<Continuation>,
}

impl PermissionRequest {
    fn new(capability: Capability, continuation: Continuation) -> Self {
        Self {
            capability,
            requested_at: Utc::now(),
            continuations: vec![continuation],
        }
    }

    pub fn status(&self) -> RequestStatus {
        RequestStatus::Pending
    }

    pub fn waiters(&self) -> usize {
        self.continuations.len()
    }
}

/// De-duplicating permission gate. Lives on the control context.
pub struct CapabilityGate {
    prompter: Arc<dyn PermissionPrompter>,
    events: mpsc::UnboundedSender<ControlEvent>,
    pending: HashMap<Capability, PermissionRequest>,
    last_outcome: HashMap<Capability, CapabilityOutcome>,
    prompts_issued: u64,
}

impl CapabilityGate {
    pub fn new(
        prompter: Arc<dyn PermissionPrompter>,
        events: mpsc::UnboundedSender<ControlEvent>,
    ) -> Self {
        Self {
            prompter,
            events,
            pending: HashMap::new(),
            last_outcome: HashMap::new(),
            prompts_issued: 0,
        }
    }

    /// Ask for `capability`; `continuation` gets the outcome later.
    pub fn request(&mut self, capability: Capability, continuation: Continuation) -> RequestIssue {
        if let Some(pending) = self.pending.get_mut(&capability) {
            pending.continuations.push(continuation);
            debug!(
                %capability,
                waiters = pending.waiters(),
                "capability request already pending, attaching"
            );
            return RequestIssue::Attached;
        }

        self.pending
            .insert(capability, PermissionRequest::new(capability, continuation));
        let responder = PermissionResponder::new(capability, self.events.clone());

        if self.prompter.check(capability) == Some(CapabilityOutcome::Granted) {
            debug!(%capability, "capability already granted");
            responder.respond(CapabilityOutcome::Granted);
            return RequestIssue::AlreadyGranted;
        }

        if self.prompter.should_show_rationale(capability) {
            if let Err(e) = self.prompter.show_rationale(capability) {
                debug!(%capability, error = %e, "could not show permission rationale");
            }
        }

        info!(%capability, "requesting capability");
        self.prompts_issued += 1;
        self.prompter.prompt(capability, responder);
        RequestIssue::Prompted
    }

    /// Apply the OS answer. Returns how many continuations ran.
    ///
    /// A second answer for an already-resolved request is ignored.
    pub fn resolve(&mut self, capability: Capability, outcome: CapabilityOutcome) -> usize {
        let Some(request) = self.pending.remove(&capability) else {
            warn!(%capability, ?outcome, "permission answer with no pending request, ignoring");
            return 0;
        };

        info!(
            %capability,
            ?outcome,
            waiters = request.waiters(),
            "capability resolved"
        );
        self.last_outcome.insert(capability, outcome);

        let count = request.continuations.len();
        for continuation in request.continuations {
            continuation(outcome);
        }
        count
    }

    pub fn status(&self, capability: Capability) -> RequestStatus {
        if let Some(request) = self.pending.get(&capability) {
            return request.status();
        }
        match self.last_outcome.get(&capability) {
            Some(CapabilityOutcome::Granted) => RequestStatus::Granted,
            Some(CapabilityOutcome::Denied) => RequestStatus::Denied,
            None => RequestStatus::NotRequested,
        }
    }

    /// Number of OS prompts shown so far.
    pub fn prompts_issued(&self) -> u64 {
        self.prompts_issued
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct HoldingPrompter {
        held: Mutex<Vec<PermissionResponder>>,
        granted_already: bool,
        denied_before: bool,
        rationale_fails: bool,
        rationales: AtomicUsize,
    }

    impl PermissionPrompter for HoldingPrompter {
        fn check(&self, _capability: Capability) -> Option<CapabilityOutcome> {
            self.granted_already.then_some(CapabilityOutcome::Granted)
        }

        fn should_show_rationale(&self, _capability: Capability) -> bool {
            self.denied_before
        }

        fn show_rationale(&self, _capability: Capability) -> Result<(), String> {
            self.rationales.fetch_add(1, Ordering::SeqCst);
            if self.rationale_fails {
                Err("no window".to_string())
            } else {
                Ok(())
            }
        }

        fn prompt(&self, _capability: Capability, responder: PermissionResponder) {
            self.held.lock().unwrap().push(responder);
        }
    }

    fn gate_with(
        prompter: Arc<HoldingPrompter>,
    ) -> (CapabilityGate, mpsc::UnboundedReceiver<ControlEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (CapabilityGate::new(prompter, tx), rx)
    }

    fn recording(seen: &Arc<Mutex<Vec<CapabilityOutcome>>>) -> Continuation {
        let seen = Arc::clone(seen);
        Box::new(move |outcome| seen.lock().unwrap().push(outcome))
    }

    /// Feed queued OS answers back into the gate, as the control loop does.
    fn pump(gate: &mut CapabilityGate, rx: &mut mpsc::UnboundedReceiver<ControlEvent>) -> usize {
        let mut ran = 0;
        while let Ok(event) = rx.try_recv() {
            if let ControlEvent::PermissionResponse {
                capability,
                outcome,
            } = event
            {
                ran += gate.resolve(capability, outcome);
            }
        }
        ran
    }

    #[test]
    fn test_concurrent_requests_share_one_prompt() {
        let prompter = Arc::new(HoldingPrompter::default());
        let (mut gate, mut rx) = gate_with(Arc::clone(&prompter));
        let seen = Arc::new(Mutex::new(Vec::new()));

        assert_eq!(gate.request(Capability::Camera, recording(&seen)), RequestIssue::Prompted);
        assert_eq!(gate.request(Capability::Camera, recording(&seen)), RequestIssue::Attached);
        assert_eq!(gate.prompts_issued(), 1);
        assert_eq!(gate.status(Capability::Camera), RequestStatus::Pending);

        let responder = prompter.held.lock().unwrap().pop().unwrap();
        responder.respond(CapabilityOutcome::Denied);

        assert_eq!(pump(&mut gate, &mut rx), 2);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![CapabilityOutcome::Denied, CapabilityOutcome::Denied]
        );
        assert_eq!(gate.status(Capability::Camera), RequestStatus::Denied);
    }

    #[test]
    fn test_continuation_not_run_inside_request() {
        let prompter = Arc::new(HoldingPrompter {
            granted_already: true,
            ..Default::default()
        });
        let (mut gate, mut rx) = gate_with(prompter);
        let seen = Arc::new(Mutex::new(Vec::new()));

        assert_eq!(
            gate.request(Capability::Camera, recording(&seen)),
            RequestIssue::AlreadyGranted
        );
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(gate.prompts_issued(), 0);

        assert_eq!(pump(&mut gate, &mut rx), 1);
        assert_eq!(*seen.lock().unwrap(), vec![CapabilityOutcome::Granted]);
    }

    #[test]
    fn test_duplicate_answer_is_ignored() {
        let prompter = Arc::new(HoldingPrompter::default());
        let (mut gate, mut rx) = gate_with(prompter);
        let seen = Arc::new(Mutex::new(Vec::new()));

        gate.request(Capability::Camera, recording(&seen));
        assert_eq!(gate.resolve(Capability::Camera, CapabilityOutcome::Granted), 1);
        assert_eq!(gate.resolve(Capability::Camera, CapabilityOutcome::Denied), 0);
        assert_eq!(pump(&mut gate, &mut rx), 0);
        assert_eq!(*seen.lock().unwrap(), vec![CapabilityOutcome::Granted]);
    }

    #[test]
    fn test_new_request_after_resolution_prompts_again() {
        let prompter = Arc::new(HoldingPrompter::default());
        let (mut gate, _rx) = gate_with(prompter);
        let seen = Arc::new(Mutex::new(Vec::new()));

        gate.request(Capability::Camera, recording(&seen));
        gate.resolve(Capability::Camera, CapabilityOutcome::Denied);
        assert_eq!(gate.request(Capability::Camera, recording(&seen)), RequestIssue::Prompted);
        assert_eq!(gate.prompts_issued(), 2);
    }

    #[test]
    fn test_capabilities_are_independent() {
        let prompter = Arc::new(HoldingPrompter::default());
        let (mut gate, _rx) = gate_with(Arc::clone(&prompter));
        let seen = Arc::new(Mutex::new(Vec::new()));

        gate.request(Capability::Camera, recording(&seen));
        gate.request(Capability::Microphone, recording(&seen));
        assert_eq!(gate.prompts_issued(), 2);
        assert_eq!(gate.status(Capability::Microphone), RequestStatus::Pending);
        assert_eq!(prompter.held.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_rationale_failure_still_prompts() {
        let prompter = Arc::new(HoldingPrompter {
            denied_before: true,
            rationale_fails: true,
            ..Default::default()
        });
        let (mut gate, _rx) = gate_with(Arc::clone(&prompter));

        let issue = gate.request(Capability::Camera, Box::new(|_| {}));
        assert_eq!(issue, RequestIssue::Prompted);
        assert_eq!(prompter.rationales.load(Ordering::SeqCst), 1);
        assert_eq!(prompter.held.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_dropped_responder_resolves_as_denied() {
        let prompter = Arc::new(HoldingPrompter::default());
        let (mut gate, mut rx) = gate_with(Arc::clone(&prompter));
        let seen = Arc::new(Mutex::new(Vec::new()));

        gate.request(Capability::Camera, recording(&seen));
        gate.request(Capability::Camera, recording(&seen));
        prompter.held.lock().unwrap().clear();

        assert_eq!(pump(&mut gate, &mut rx), 2);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![CapabilityOutcome::Denied, CapabilityOutcome::Denied]
        );
        assert_eq!(gate.status(Capability::Camera), RequestStatus::Denied);

        assert_eq!(gate.request(Capability::Camera, recording(&seen)), RequestIssue::Prompted);
        assert_eq!(gate.prompts_issued(), 2);
    }

    #[test]
    fn test_answered_responder_sends_once() {
        let prompter = Arc::new(HoldingPrompter::default());
        let (mut gate, mut rx) = gate_with(Arc::clone(&prompter));

        gate.request(Capability::Camera, Box::new(|_| {}));
        let responder = prompter.held.lock().unwrap().pop().unwrap();
        responder.respond(CapabilityOutcome::Granted);

        let mut answers = Vec::new();
        while let Ok(event) = rx.try_recv() {
            answers.push(event);
        }
        assert_eq!(answers.len(), 1);
        assert!(matches!(
            answers[0],
            ControlEvent::PermissionResponse {
                outcome: CapabilityOutcome::Granted,
                ..
            }
        ));
    }

    #[test]
    fn test_status_before_any_request() {
        let (gate, _rx) = gate_with(Arc::new(HoldingPrompter::default()));
        assert_eq!(gate.status(Capability::Camera), RequestStatus::NotRequested);
    }
}
