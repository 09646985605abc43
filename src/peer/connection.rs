use crate::error::NegotiationError;
use crate::logger::{dump_candidate, dump_selected_pair};
use crate::peer::media::LocalMedia;
use crate::peer::transport::{PeerConnectionState, PeerTransport, TransportEvent, TransportFactory};
use crate::peer::types::{IceCandidate, SdpKind, ServerConfig, SessionDescription};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;
use webrtc::{
    api::APIBuilder,
    ice_transport::ice_server::RTCIceServer,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
};

/// Builds [`WebrtcTransport`]s for the configured ICE servers
#[derive(Debug, Clone)]
pub struct WebrtcTransportFactory {
    ice_servers: Vec<ServerConfig>,
}

impl WebrtcTransportFactory {
    pub fn new(ice_servers: Vec<ServerConfig>) -> Self {
        Self { ice_servers }
    }
}

#[async_trait]
impl TransportFactory for WebrtcTransportFactory {
    type Transport = WebrtcTransport;

    async fn create(
        &self,
        media: &LocalMedia,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<WebrtcTransport, NegotiationError> {
        new_peer(&self.ice_servers, media, events).await
    }
}

/// Connection handle backed by an `RTCPeerConnection`
pub struct WebrtcTransport {
    pc: Arc<RTCPeerConnection>,
}

fn connection_error(e: webrtc::Error) -> NegotiationError {
    NegotiationError::CreateConnection(e.to_string())
}

/// Create the peer connection, wire its callbacks into `events` and attach the local track
pub async fn new_peer(
    servers: &[ServerConfig],
    media: &LocalMedia,
    events: mpsc::UnboundedSender<TransportEvent>,
) -> Result<WebrtcTransport, NegotiationError> {
    let mut engine = MediaEngine::default();
    engine.register_default_codecs().map_err(connection_error)?;
    let registry = register_default_interceptors(Registry::new(), &mut engine)
        .map_err(connection_error)?;
    let api = APIBuilder::new()
        .with_media_engine(engine)
        .with_interceptor_registry(registry)
        .build();

    let pc = Arc::new(
        api.new_peer_connection(rtc_config(servers))
            .await
            .map_err(connection_error)?,
    );

    // Trickle ICE: forwarded synchronously so discovery order is kept
    let tx = events.clone();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        match cand {
            Some(c) => match c.to_json() {
                Ok(init) => {
                    let candidate = IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    };
                    dump_candidate("LOCAL", &candidate);
                    let _ = tx.send(TransportEvent::LocalCandidate(candidate));
                }
                Err(e) => warn!(error = %e, "could not serialize local candidate"),
            },
            None => {
                debug!("ICE candidate gathering completed (null candidate received)");
                let _ = tx.send(TransportEvent::GatheringComplete);
            }
        }
        Box::pin(async {})
    }));

    pc.on_ice_gathering_state_change(Box::new(move |state| {
        debug!(?state, "ICE gathering state changed");
        Box::pin(async {})
    }));

    pc.on_negotiation_needed(Box::new(move || {
        debug!("negotiation needed");
        Box::pin(async {})
    }));

    let tx = events.clone();
    let pc_state = Arc::downgrade(&pc);
    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        info!(state = ?st, "peer connection state changed");
        let mapped = match st {
            RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => {
                PeerConnectionState::New
            }
            RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
            RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
            RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
        };
        if mapped == PeerConnectionState::Failed {
            if let Some(pc) = pc_state.upgrade() {
                tokio::spawn(async move {
                    dump_selected_pair(&pc, "BEFORE-FAIL").await;
                });
            }
        }
        let _ = tx.send(TransportEvent::ConnectionState(mapped));
        Box::pin(async {})
    }));

    let tx = events;
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let id = track.id();
            let kind = track.kind().to_string();
            info!(%id, %kind, "remote track added");
            let _ = tx.send(TransportEvent::RemoteTrack { id, kind });
            Box::pin(async {})
        },
    ));

    let sender = pc.add_track(media.track()).await.map_err(connection_error)?;
    // RTCP has to be drained for interceptors (NACK, reports) to work
    tokio::spawn(async move {
        let mut rtcp_buf = vec![0u8; 1500];
        while sender.read(&mut rtcp_buf).await.is_ok() {}
    });

    info!(track = media.track_id(), "peer connection created");
    Ok(WebrtcTransport { pc })
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, webrtc::Error> {
    match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
    }
}

#[async_trait]
impl PeerTransport for WebrtcTransport {
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| NegotiationError::CreateOffer(e.to_string()))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| NegotiationError::CreateAnswer(e.to_string()))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), NegotiationError> {
        let err = |e: webrtc::Error| NegotiationError::SetLocalDescription(e.to_string());
        let desc = to_rtc(desc).map_err(err)?;
        self.pc.set_local_description(desc).await.map_err(err)
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), NegotiationError> {
        let err = |e: webrtc::Error| NegotiationError::SetRemoteDescription(e.to_string());
        let desc = to_rtc(desc).map_err(err)?;
        self.pc.set_remote_description(desc).await.map_err(err)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| NegotiationError::AddCandidate(e.to_string()))
    }

    async fn rollback(&self) -> Result<(), NegotiationError> {
        let mut rollback = RTCSessionDescription::default();
        rollback.sdp_type = RTCSdpType::Rollback;
        self.pc
            .set_local_description(rollback)
            .await
            .map_err(|e| NegotiationError::Rollback(e.to_string()))
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!(error = %e, "closing peer connection failed");
        }
    }
}

/// Peer connection configuration; falls back to public STUN when nothing is configured
fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    let servers = if servers.is_empty() {
        ServerConfig::default_stun()
    } else {
        servers.to_vec()
    };

    RTCConfiguration {
        ice_servers: get_user_ice_servers(servers),
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn get_user_ice_servers(servers: Vec<ServerConfig>) -> Vec<RTCIceServer> {
    servers
        .into_iter()
        .map(|config| {
            let url = add_ice_url_scheme(&config);

            RTCIceServer {
                urls: vec![url],
                username: config.username.unwrap_or_default(),
                credential: config.credential.unwrap_or_default(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_servers_keep_credentials() {
        let servers = get_user_ice_servers(vec![ServerConfig {
            id: "turn-tcp".into(),
            r#type: "turn".into(),
            url: "localhost:3478?transport=tcp".into(),
            username: Some("username".into()),
            credential: Some("credential".into()),
        }]);
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].urls, vec!["turn:localhost:3478?transport=tcp"]);
        assert_eq!(servers[0].username, "username");
        assert_eq!(servers[0].credential, "credential");
    }

    #[test]
    fn empty_server_list_uses_public_stun() {
        let config = rtc_config(&[]);
        assert_eq!(config.ice_servers.len(), 2);
        assert!(config.ice_servers[0].urls[0].starts_with("stun:"));
        assert_eq!(config.bundle_policy, RTCBundlePolicy::MaxBundle);
    }

    #[tokio::test]
    async fn offer_from_real_peer_connection_carries_video() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = new_peer(&[], &LocalMedia::vp8("video", "test"), tx)
            .await
            .unwrap();
        let offer = transport.create_offer().await.unwrap();
        assert_eq!(offer.kind, SdpKind::Offer);
        assert!(offer.sdp.contains("m=video"));
        transport.close().await;
    }
}
