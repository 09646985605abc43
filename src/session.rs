//! One media session: the record created once local media is in hand, the
//! events reported to whoever watches it, and the coordinator that drives
//! negotiation between the relay and the connection handle.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{NegotiationError, SessionError, SessionResult, TransportError};
use crate::logger::{dump_candidate, EventEmitter};
use crate::negotiation::{NegotiationAction, NegotiationState, NegotiationStateMachine, Role};
use crate::peer::ice::{self, CandidateTally};
use crate::peer::media::{LocalMedia, MediaSource};
use crate::peer::transport::{PeerConnectionState, PeerTransport, TransportEvent, TransportFactory};
use crate::peer::types::{IceCandidate, SdpKind, SessionDescription};
use crate::signaling::{SignalingChannel, SignalingEvent, SignalingMessage};

pub struct Session {
    pub id: String,
    pub local_peer_id: String,
    pub media: LocalMedia,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>, local_peer_id: impl Into<String>, media: LocalMedia) -> Self {
        Self {
            id: id.into(),
            local_peer_id: local_peer_id.into(),
            media,
            created_at: Utc::now(),
        }
    }
}

/// Progress of a session as seen from outside
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The relay accepted us into the session
    RelayConnected,
    Negotiation(NegotiationState),
    /// Both descriptions are in place
    Connected { role: Role },
    RemoteTrack { id: String, kind: String },
    PeerConnection(PeerConnectionState),
    /// Terminal; carries the rendered [`SessionError`]
    Failed(String),
    /// Terminal; the session ended without error
    Closed,
}

/// What a finished session looked like
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub session_id: String,
    pub local_peer_id: String,
    /// When local media was acquired; `None` if it never was
    pub started_at: Option<DateTime<Utc>>,
    pub role: Option<Role>,
    pub state: NegotiationState,
    pub candidates_applied: usize,
    pub local_candidates_sent: usize,
    pub local_candidates: CandidateTally,
}

/// Result of one connection-handle operation
#[derive(Debug)]
enum Completion {
    LocalCreated(SessionDescription),
    LocalCommitted(SessionDescription),
    RemoteApplied(SdpKind),
    CandidateApplied(IceCandidate),
    CandidateRejected(IceCandidate, NegotiationError),
    RolledBack,
    Failed(NegotiationError),
}

type Operation = Pin<Box<dyn Future<Output = Completion> + Send>>;

enum Step {
    Shutdown,
    Completed(Completion),
    Signaling(Option<SignalingEvent>),
    Transport(Option<TransportEvent>),
}

enum Flow {
    Continue,
    Stop,
}

/// Drives a single session. Everything runs on one task: signaling events,
/// transport events and the one in-flight connection-handle operation are
/// multiplexed by a `select!` loop, so state changes never interleave.
pub struct SessionCoordinator<C, F: TransportFactory> {
    session_id: String,
    channel: C,
    factory: F,
    machine: NegotiationStateMachine,
    session: Option<Session>,
    transport: Option<Arc<F::Transport>>,
    transport_tx: mpsc::UnboundedSender<TransportEvent>,
    transport_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    queue: VecDeque<NegotiationAction>,
    emitter: EventEmitter,
    announced: NegotiationState,
    tally: CandidateTally,
}

impl<C, F> SessionCoordinator<C, F>
where
    C: SignalingChannel,
    F: TransportFactory,
{
    /// Build a coordinator and the stream its [`SessionEvent`]s arrive on
    pub fn new(
        session_id: impl Into<String>,
        channel: C,
        factory: F,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let session_id = session_id.into();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let machine = NegotiationStateMachine::new(channel.peer_id());
        let coordinator = Self {
            emitter: EventEmitter::new(session_id.clone(), events_tx),
            session_id,
            channel,
            factory,
            machine,
            session: None,
            transport: None,
            transport_tx,
            transport_rx: Some(transport_rx),
            queue: VecDeque::new(),
            announced: NegotiationState::Idle,
            tally: CandidateTally::default(),
        };
        (coordinator, events_rx)
    }

    pub fn state(&self) -> NegotiationState {
        self.machine.state()
    }

    /// Run until the peer connection closes or the session fails
    pub async fn run<M: MediaSource>(self, media: M) -> SessionResult<SessionSummary> {
        self.run_until(media, std::future::pending()).await
    }

    /// Like [`run`](Self::run), but also stops cleanly once `shutdown` resolves
    pub async fn run_until<M, S>(mut self, media: M, shutdown: S) -> SessionResult<SessionSummary>
    where
        M: MediaSource,
        S: Future<Output = ()> + Send,
    {
        let outcome = self.drive(&media, shutdown).await;
        self.teardown(outcome.as_ref().err()).await;
        outcome.map(|()| self.summary())
    }

    async fn drive<M, S>(&mut self, media: &M, shutdown: S) -> SessionResult<()>
    where
        M: MediaSource,
        S: Future<Output = ()> + Send,
    {
        let media = media.acquire().await?;
        info!(
            session = %self.session_id,
            peer = %self.channel.peer_id(),
            track = media.track_id(),
            "local media acquired"
        );
        self.session = Some(Session::new(
            self.session_id.clone(),
            self.channel.peer_id(),
            media,
        ));

        let mut signaling = self
            .channel
            .subscribe()
            .ok_or(TransportError::AlreadySubscribed)?;
        let mut transport_events = self
            .transport_rx
            .take()
            .ok_or(TransportError::AlreadySubscribed)?;

        self.channel.connect().await?;
        info!(session = %self.session_id, "joined relay, waiting for counterpart");
        self.emitter.emit(SessionEvent::RelayConnected);

        let mut in_flight: Option<Operation> = None;
        let mut signaling_open = true;
        tokio::pin!(shutdown);

        loop {
            if in_flight.is_none() {
                in_flight = self.start_next().await?;
            }

            let step = tokio::select! {
                _ = &mut shutdown => Step::Shutdown,
                done = next_completion(&mut in_flight) => Step::Completed(done),
                event = signaling.recv(), if signaling_open => Step::Signaling(event),
                event = transport_events.recv() => Step::Transport(event),
            };

            match step {
                Step::Shutdown => {
                    info!(session = %self.session_id, "shutdown requested");
                    return Ok(());
                }
                Step::Completed(done) => {
                    in_flight = None;
                    self.on_completion(done)?;
                }
                Step::Signaling(Some(event)) => self.on_signaling(event).await?,
                Step::Signaling(None) => {
                    debug!(session = %self.session_id, "signaling stream ended");
                    signaling_open = false;
                }
                Step::Transport(Some(event)) => {
                    if let Flow::Stop = self.on_transport(event)? {
                        return Ok(());
                    }
                }
                // unreachable while we hold `transport_tx`
                Step::Transport(None) => return Ok(()),
            }
            self.announce();
        }
    }

    /// Run queued sends inline and hand back the next connection-handle operation.
    async fn start_next(&mut self) -> SessionResult<Option<Operation>> {
        while let Some(action) = self.queue.pop_front() {
            let op: Operation = match action {
                NegotiationAction::Send(message) => {
                    self.send(message).await?;
                    continue;
                }
                NegotiationAction::CreateOffer => {
                    let transport = self.transport()?;
                    Box::pin(async move {
                        match transport.create_offer().await {
                            Ok(desc) => Completion::LocalCreated(desc),
                            Err(e) => Completion::Failed(e),
                        }
                    })
                }
                NegotiationAction::CreateAnswer => {
                    let transport = self.transport()?;
                    Box::pin(async move {
                        match transport.create_answer().await {
                            Ok(desc) => Completion::LocalCreated(desc),
                            Err(e) => Completion::Failed(e),
                        }
                    })
                }
                NegotiationAction::SetLocalDescription(desc) => {
                    let transport = self.transport()?;
                    Box::pin(async move {
                        match transport.set_local_description(desc.clone()).await {
                            Ok(()) => Completion::LocalCommitted(desc),
                            Err(e) => Completion::Failed(e),
                        }
                    })
                }
                NegotiationAction::SetRemoteDescription(desc) => {
                    let transport = self.transport()?;
                    Box::pin(async move {
                        let kind = desc.kind;
                        match transport.set_remote_description(desc).await {
                            Ok(()) => Completion::RemoteApplied(kind),
                            Err(e) => Completion::Failed(e),
                        }
                    })
                }
                NegotiationAction::AddRemoteCandidate(candidate) => {
                    let transport = self.transport()?;
                    Box::pin(async move {
                        match transport.add_ice_candidate(candidate.clone()).await {
                            Ok(()) => Completion::CandidateApplied(candidate),
                            Err(e) => Completion::CandidateRejected(candidate, e),
                        }
                    })
                }
                NegotiationAction::Rollback => {
                    let transport = self.transport()?;
                    Box::pin(async move {
                        match transport.rollback().await {
                            Ok(()) => Completion::RolledBack,
                            Err(e) => Completion::Failed(e),
                        }
                    })
                }
            };
            return Ok(Some(op));
        }
        Ok(None)
    }

    async fn send(&mut self, message: SignalingMessage) -> SessionResult<()> {
        match &message {
            SignalingMessage::Candidate { candidate } => dump_candidate("SENT", candidate),
            other => info!(session = %self.session_id, kind = other.kind(), "sending description"),
        }
        self.channel.send(&message).await?;
        Ok(())
    }

    fn transport(&self) -> SessionResult<Arc<F::Transport>> {
        self.transport.clone().ok_or_else(|| {
            SessionError::from(NegotiationError::CreateConnection(
                "connection handle does not exist yet".into(),
            ))
        })
    }

    /// Create the connection handle; at most once per session.
    async fn ensure_transport(&mut self) -> SessionResult<()> {
        if self.transport.is_some() {
            return Ok(());
        }
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| NegotiationError::NoLocalMedia("media not acquired".into()))?;
        let transport = self
            .factory
            .create(&session.media, self.transport_tx.clone())
            .await?;
        info!(session = %self.session_id, "connection handle created");
        self.transport = Some(Arc::new(transport));
        Ok(())
    }

    fn on_completion(&mut self, done: Completion) -> SessionResult<()> {
        let actions = match done {
            Completion::LocalCreated(desc) => self.machine.local_description_created(desc),
            Completion::LocalCommitted(desc) => self.machine.local_description_committed(desc),
            Completion::RemoteApplied(kind) => self.machine.remote_description_applied(kind),
            Completion::CandidateApplied(candidate) => {
                dump_candidate("APPLIED", &candidate);
                self.machine.candidate_applied(&candidate);
                Vec::new()
            }
            Completion::CandidateRejected(candidate, e) => {
                warn!(error = %e, candidate = %candidate.candidate, "remote candidate rejected");
                Vec::new()
            }
            Completion::RolledBack => {
                self.machine.rolled_back();
                Vec::new()
            }
            Completion::Failed(e) => {
                self.machine.operation_failed(&e);
                return Err(e.into());
            }
        };
        self.queue.extend(actions);
        Ok(())
    }

    async fn on_signaling(&mut self, event: SignalingEvent) -> SessionResult<()> {
        match event {
            SignalingEvent::Ready => {
                if self.machine.state() != NegotiationState::Idle {
                    info!(
                        state = ?self.machine.state(),
                        "remote side already started negotiating, not offering"
                    );
                    return Ok(());
                }
                self.ensure_transport().await?;
                let actions = self.machine.initiate_offer()?;
                self.queue.extend(actions);
            }
            SignalingEvent::Message { message, from } => {
                debug!(kind = message.kind(), from = ?from, "signaling message");
                let actions = match message {
                    SignalingMessage::Offer { sdp } => {
                        self.ensure_transport().await?;
                        self.machine.receive_offer(sdp, from.as_deref())?
                    }
                    SignalingMessage::Answer { sdp } => self.machine.receive_answer(sdp)?,
                    SignalingMessage::Candidate { candidate } => {
                        dump_candidate("REMOTE", &candidate);
                        self.machine.receive_candidate(candidate)
                    }
                };
                self.queue.extend(actions);
            }
            SignalingEvent::Malformed(e) => return Err(self.machine.reject(e).into()),
            SignalingEvent::Closed => {
                if self.machine.state() != NegotiationState::Connected {
                    return Err(TransportError::Closed.into());
                }
                info!(session = %self.session_id, "relay closed after negotiation");
            }
        }
        Ok(())
    }

    fn on_transport(&mut self, event: TransportEvent) -> SessionResult<Flow> {
        match event {
            TransportEvent::LocalCandidate(candidate) => {
                self.tally.record(&candidate);
                let actions = self.machine.local_candidate_discovered(candidate);
                self.queue.extend(actions);
            }
            TransportEvent::GatheringComplete => ice::report(&self.tally),
            TransportEvent::RemoteTrack { id, kind } => {
                self.emitter.emit(SessionEvent::RemoteTrack { id, kind });
            }
            TransportEvent::ConnectionState(state) => {
                self.emitter.emit(SessionEvent::PeerConnection(state));
                match state {
                    PeerConnectionState::Failed => {
                        let e = NegotiationError::ConnectivityFailed;
                        self.machine.operation_failed(&e);
                        return Err(e.into());
                    }
                    PeerConnectionState::Closed => return Ok(Flow::Stop),
                    _ => {}
                }
            }
        }
        Ok(Flow::Continue)
    }

    /// Report negotiation state changes since the last step
    fn announce(&mut self) {
        let state = self.machine.state();
        if state == self.announced {
            return;
        }
        self.announced = state;
        self.emitter.emit(SessionEvent::Negotiation(state));
        if state == NegotiationState::Connected {
            if let Some(role) = self.machine.role() {
                self.emitter.emit(SessionEvent::Connected { role });
            }
        }
    }

    async fn teardown(&mut self, error: Option<&SessionError>) {
        self.announce();
        if let Some(transport) = self.transport.take() {
            transport.close().await;
        }
        self.channel.disconnect().await;
        match error {
            Some(e) => self.emitter.emit(SessionEvent::Failed(e.to_string())),
            None => self.emitter.emit(SessionEvent::Closed),
        }
    }

    fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            local_peer_id: self.channel.peer_id().to_owned(),
            started_at: self.session.as_ref().map(|s| s.created_at),
            role: self.machine.role(),
            state: self.machine.state(),
            candidates_applied: self.machine.candidates_applied(),
            local_candidates_sent: self.machine.local_candidates_sent(),
            local_candidates: self.tally,
        }
    }
}

async fn next_completion(in_flight: &mut Option<Operation>) -> Completion {
    match in_flight.as_mut() {
        Some(op) => op.await,
        None => std::future::pending().await,
    }
}
