//! Offer/answer negotiation for one session.
//!
//! The machine performs no I/O. Every input returns the [`NegotiationAction`]s
//! the coordinator has to run against the connection handle or the relay, and
//! the coordinator reports each completion back. State only moves forward on
//! those completions, so a slow `create_offer` never blocks inbound
//! candidates: they are queued here until a remote description is in place.
//!
//! ```text
//!            initiate_offer / receive_offer
//!   Idle ──────────────────────────────────▶ AwaitingLocalDescription
//!                                               │ offer committed + sent
//!                                               ▼
//!                              answer applied  AwaitingRemoteDescription
//!   Connected ◀──────────────────────────────────┘
//!       ▲  answer committed + sent (callee)
//!       └── AwaitingLocalDescription
//!
//!   any protocol violation or failed operation ─▶ Failed
//! ```

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use crate::error::{NegotiationError, ProtocolError};
use crate::peer::types::{IceCandidate, SdpKind, SessionDescription};
use crate::signaling::SignalingMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    /// An offer or answer is being created or committed locally
    AwaitingLocalDescription,
    /// Our offer is out, waiting for the answer
    AwaitingRemoteDescription,
    /// A remote description has been applied
    Connected,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Caller,
    Callee,
}

/// Work the coordinator performs on behalf of the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum NegotiationAction {
    CreateOffer,
    CreateAnswer,
    SetLocalDescription(SessionDescription),
    SetRemoteDescription(SessionDescription),
    AddRemoteCandidate(IceCandidate),
    /// Withdraw our uncommitted offer after losing a glare tie-break
    Rollback,
    Send(SignalingMessage),
}

pub struct NegotiationStateMachine {
    local_peer_id: String,
    state: NegotiationState,
    role: Option<Role>,
    /// Kind of local description currently being produced
    producing: Option<SdpKind>,
    /// A local offer was handed to the connection handle and not rolled back
    local_offer_set: bool,
    remote_pending: bool,
    remote_applied: bool,
    pending_candidates: VecDeque<IceCandidate>,
    /// Local candidates gathered before our first description went out
    held_local_candidates: Vec<IceCandidate>,
    local_description_sent: bool,
    candidates_applied: usize,
    local_candidates_sent: usize,
}

impl NegotiationStateMachine {
    pub fn new(local_peer_id: impl Into<String>) -> Self {
        Self {
            local_peer_id: local_peer_id.into(),
            state: NegotiationState::Idle,
            role: None,
            producing: None,
            local_offer_set: false,
            remote_pending: false,
            remote_applied: false,
            pending_candidates: VecDeque::new(),
            held_local_candidates: Vec::new(),
            local_description_sent: false,
            candidates_applied: 0,
            local_candidates_sent: 0,
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn local_peer_id(&self) -> &str {
        &self.local_peer_id
    }

    /// Remote candidates waiting for a remote description
    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    pub fn candidates_applied(&self) -> usize {
        self.candidates_applied
    }

    pub fn local_candidates_sent(&self) -> usize {
        self.local_candidates_sent
    }

    pub fn is_failed(&self) -> bool {
        self.state == NegotiationState::Failed
    }

    fn set_state(&mut self, next: NegotiationState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, role = ?self.role, "negotiation state");
            self.state = next;
        }
    }

    fn fail<T>(&mut self, error: ProtocolError) -> Result<T, ProtocolError> {
        Err(self.reject(error))
    }

    /// Move to `Failed` because of `error`, handing it back for reporting.
    pub fn reject(&mut self, error: ProtocolError) -> ProtocolError {
        warn!(error = %error, state = ?self.state, "negotiation protocol error");
        self.set_state(NegotiationState::Failed);
        self.pending_candidates.clear();
        self.held_local_candidates.clear();
        error
    }

    /// A connection-handle operation failed; the session cannot continue.
    pub fn operation_failed(&mut self, error: &NegotiationError) {
        warn!(error = %error, state = ?self.state, "negotiation operation failed");
        self.set_state(NegotiationState::Failed);
        self.pending_candidates.clear();
        self.held_local_candidates.clear();
    }

    /// Caller path: start negotiating by creating an offer.
    pub fn initiate_offer(&mut self) -> Result<Vec<NegotiationAction>, ProtocolError> {
        match self.state {
            NegotiationState::Idle => {
                self.role = Some(Role::Caller);
                self.producing = Some(SdpKind::Offer);
                self.set_state(NegotiationState::AwaitingLocalDescription);
                Ok(vec![NegotiationAction::CreateOffer])
            }
            NegotiationState::Failed => Err(ProtocolError::SessionFailed),
            state => Err(ProtocolError::NegotiationInProgress { state }),
        }
    }

    /// Callee path, or a glare collision when we are already offering.
    pub fn receive_offer(
        &mut self,
        sdp: String,
        from: Option<&str>,
    ) -> Result<Vec<NegotiationAction>, ProtocolError> {
        match (self.state, self.role) {
            (NegotiationState::Idle, _) => Ok(self.accept_offer(sdp)),
            (NegotiationState::Failed, _) => Err(ProtocolError::SessionFailed),
            // a collision only while the counterpart has not answered us yet
            (
                NegotiationState::AwaitingLocalDescription
                | NegotiationState::AwaitingRemoteDescription,
                Some(Role::Caller),
            ) if !self.remote_pending && !self.remote_applied => self.resolve_glare(sdp, from),
            (state, role) => self.fail(ProtocolError::UnexpectedOffer { state, role }),
        }
    }

    fn accept_offer(&mut self, sdp: String) -> Vec<NegotiationAction> {
        self.role = Some(Role::Callee);
        self.producing = Some(SdpKind::Answer);
        self.remote_pending = true;
        self.set_state(NegotiationState::AwaitingLocalDescription);
        vec![NegotiationAction::SetRemoteDescription(
            SessionDescription::offer(sdp),
        )]
    }

    /// The peer with the smaller identifier is polite and yields.
    fn resolve_glare(
        &mut self,
        sdp: String,
        from: Option<&str>,
    ) -> Result<Vec<NegotiationAction>, ProtocolError> {
        if from == Some(self.local_peer_id.as_str()) {
            return self.fail(ProtocolError::PeerIdCollision(self.local_peer_id.clone()));
        }
        let polite = from.is_some_and(|remote| self.local_peer_id.as_str() < remote);
        if !polite {
            info!(remote = ?from, "offer collision, keeping our offer");
            return Ok(Vec::new());
        }

        info!(remote = ?from, "offer collision, withdrawing our offer");
        let mut actions = Vec::new();
        if self.local_offer_set {
            self.local_offer_set = false;
            actions.push(NegotiationAction::Rollback);
        }
        actions.extend(self.accept_offer(sdp));
        Ok(actions)
    }

    /// Caller path: the counterpart answered our offer.
    pub fn receive_answer(&mut self, sdp: String) -> Result<Vec<NegotiationAction>, ProtocolError> {
        match (self.state, self.role) {
            (NegotiationState::AwaitingRemoteDescription, Some(Role::Caller))
                if !self.remote_pending && !self.remote_applied =>
            {
                self.remote_pending = true;
                Ok(vec![NegotiationAction::SetRemoteDescription(
                    SessionDescription::answer(sdp),
                )])
            }
            (NegotiationState::Failed, _) => Err(ProtocolError::SessionFailed),
            (state, role) => self.fail(ProtocolError::UnexpectedAnswer { state, role }),
        }
    }

    /// Always accepted: applied right away or queued until a remote description exists.
    pub fn receive_candidate(&mut self, candidate: IceCandidate) -> Vec<NegotiationAction> {
        if self.is_failed() {
            debug!("session failed, ignoring remote candidate");
            return Vec::new();
        }
        if self.remote_applied {
            vec![NegotiationAction::AddRemoteCandidate(candidate)]
        } else {
            self.pending_candidates.push_back(candidate);
            debug!(
                pending = self.pending_candidates.len(),
                "remote description not set yet, queuing candidate"
            );
            Vec::new()
        }
    }

    /// `create_offer` / `create_answer` finished.
    pub fn local_description_created(
        &mut self,
        desc: SessionDescription,
    ) -> Vec<NegotiationAction> {
        if self.producing != Some(desc.kind) || self.is_failed() {
            debug!(kind = ?desc.kind, "discarding stale local description");
            return Vec::new();
        }
        if desc.kind == SdpKind::Offer {
            self.local_offer_set = true;
        }
        vec![NegotiationAction::SetLocalDescription(desc)]
    }

    /// The local description is in place; emit it exactly once, followed by
    /// the local candidates gathered while it was being committed.
    pub fn local_description_committed(
        &mut self,
        desc: SessionDescription,
    ) -> Vec<NegotiationAction> {
        if self.producing != Some(desc.kind) || self.is_failed() {
            debug!(kind = ?desc.kind, "local description was superseded, not sending");
            return Vec::new();
        }
        self.producing = None;
        match desc.kind {
            SdpKind::Offer => self.set_state(NegotiationState::AwaitingRemoteDescription),
            SdpKind::Answer => self.set_state(NegotiationState::Connected),
        }
        self.local_description_sent = true;
        self.local_candidates_sent += self.held_local_candidates.len();

        let mut actions = vec![NegotiationAction::Send(desc.into())];
        actions.extend(
            self.held_local_candidates
                .drain(..)
                .map(|candidate| NegotiationAction::Send(SignalingMessage::Candidate { candidate })),
        );
        actions
    }

    /// The remote description is in place: flush queued candidates in arrival
    /// order, then continue with the answer if we are the callee.
    pub fn remote_description_applied(&mut self, kind: SdpKind) -> Vec<NegotiationAction> {
        if self.is_failed() {
            return Vec::new();
        }
        self.remote_pending = false;
        self.remote_applied = true;

        let mut actions: Vec<NegotiationAction> = self
            .pending_candidates
            .drain(..)
            .map(NegotiationAction::AddRemoteCandidate)
            .collect();
        if !actions.is_empty() {
            debug!(count = actions.len(), "flushing queued remote candidates");
        }

        match kind {
            SdpKind::Offer => {
                if self.producing == Some(SdpKind::Answer) {
                    actions.push(NegotiationAction::CreateAnswer);
                }
            }
            SdpKind::Answer => self.set_state(NegotiationState::Connected),
        }
        actions
    }

    /// Only counts; state is driven by descriptions, never by candidates.
    pub fn candidate_applied(&mut self, _candidate: &IceCandidate) {
        self.candidates_applied += 1;
    }

    pub fn rolled_back(&mut self) {
        debug!("local offer rolled back");
    }

    /// The connection handle found a path; forward it to the counterpart.
    /// Candidates are held back until our description is out, so the remote
    /// side never sees a candidate before the offer or answer it belongs to.
    pub fn local_candidate_discovered(&mut self, candidate: IceCandidate) -> Vec<NegotiationAction> {
        if self.is_failed() {
            return Vec::new();
        }
        if self.local_description_sent {
            self.local_candidates_sent += 1;
            vec![NegotiationAction::Send(SignalingMessage::Candidate { candidate })]
        } else {
            self.held_local_candidates.push(candidate);
            Vec::new()
        }
    }
}
