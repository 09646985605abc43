use crate::peer::types::IceCandidate;
use crate::session::SessionEvent;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};
use webrtc::peer_connection::RTCPeerConnection;

/// Environment variable that overrides the configured filter
pub const LOG_ENV: &str = "PEER_SIGNAL_LOG";

/// Install the global subscriber. `format` is `text` or `json`.
pub fn init_logging(level: &str, format: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new(crate::config::default_log_level()));

    let result = match format {
        "json" => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_current_span(true)
            .try_init(),
        _ => fmt().with_env_filter(filter).with_target(true).try_init(),
    };
    if result.is_err() {
        debug!("global subscriber already installed");
    }
}

/// Trickle ICE trace for every candidate as it shows up
pub fn dump_candidate(label: &str, cand: &IceCandidate) {
    debug!(
        label,
        candidate = %cand.candidate,
        sdp_mid = ?cand.sdp_mid,
        sdp_mline_index = ?cand.sdp_mline_index,
        username_fragment = ?cand.username_fragment,
        "trickle candidate"
    );
}

/// getStats snapshot of the nominated pair
pub async fn dump_selected_pair(pc: &RTCPeerConnection, moment: &str) {
    let stats = pc.get_stats().await;
    for (_, v) in stats.reports {
        if let webrtc::stats::StatsReportType::CandidatePair(pair) = v {
            if pair.nominated {
                info!(
                    moment,
                    local = %pair.local_candidate_id,
                    remote = %pair.remote_candidate_id,
                    bytes_sent = pair.bytes_sent,
                    bytes_received = pair.bytes_received,
                    state = ?pair.state,
                    "selected candidate pair"
                );
            }
        }
    }
}

/// Publishes [`SessionEvent`]s to whoever watches the session, logging each one
#[derive(Clone)]
pub struct EventEmitter {
    session: String,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventEmitter {
    pub fn new(session: impl Into<String>, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            session: session.into(),
            tx,
        }
    }

    pub fn emit(&self, event: SessionEvent) {
        match &event {
            SessionEvent::Failed(reason) => {
                warn!(session = %self.session, %reason, "session failed")
            }
            SessionEvent::Connected { .. } => info!(session = %self.session, ?event, "session event"),
            _ => debug!(session = %self.session, ?event, "session event"),
        }
        if self.tx.send(event).is_err() {
            debug!(session = %self.session, "no one is watching session events");
        }
    }
}
