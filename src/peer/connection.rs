use crate::config::SignalingConfig;
use crate::error::{Error, Result};
use crate::logger::{dump_candidate, dump_selected_pair};
use crate::peer::media::{MediaTrack, TrackKind};
use crate::peer::state::ConnectivityState;
use crate::peer::transport::{PeerTransport, TransportEvent, TransportEvents, TransportFactory};
use crate::peer::types::{IceCandidate, SdpKind, SessionDescription};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Фабрика транспортов на webrtc-rs
pub struct WebRtcFactory {
    config: SignalingConfig,
}

impl WebRtcFactory {
    pub fn new(config: SignalingConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TransportFactory for WebRtcFactory {
    async fn create(&self) -> Result<(Arc<dyn PeerTransport>, TransportEvents)> {
        let (transport, events) = WebRtcTransport::new(&self.config).await?;
        Ok((Arc::new(transport), events))
    }
}

/// Транспорт поверх RTCPeerConnection
pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    /// Кандидаты, полученные до установки remote description
    pending_remote: Mutex<Vec<IceCandidate>>,
    local_tracks: Mutex<HashMap<String, Arc<TrackLocalStaticSample>>>,
}

impl WebRtcTransport {
    pub async fn new(config: &SignalingConfig) -> Result<(Self, TransportEvents)> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        debug!(
            "Create PeerConnection with {} ICE servers",
            config.ice_servers.len()
        );
        let pc = Arc::new(api.new_peer_connection(config.rtc_configuration()).await?);

        let (tx, rx) = mpsc::unbounded_channel();
        register_listeners(&pc, tx);

        Ok((
            Self {
                pc,
                pending_remote: Mutex::new(Vec::new()),
                local_tracks: Mutex::new(HashMap::new()),
            },
            rx,
        ))
    }

    /// Трек, в который источник захвата пишет сэмплы
    pub async fn sample_track(&self, track_id: &str) -> Option<Arc<TrackLocalStaticSample>> {
        self.local_tracks.lock().await.get(track_id).cloned()
    }
}

fn register_listeners(pc: &Arc<RTCPeerConnection>, tx: mpsc::UnboundedSender<TransportEvent>) {
    let cand_tx = tx.clone();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        let tx = cand_tx.clone();
        Box::pin(async move {
            match cand {
                Some(c) => match c.to_json() {
                    Ok(init) => {
                        let candidate = IceCandidate::from(init);
                        dump_candidate("LOCAL", &candidate);
                        let _ = tx.send(TransportEvent::LocalCandidate(Some(candidate)));
                    }
                    Err(e) => warn!("Failed to serialize local candidate: {}", e),
                },
                None => {
                    debug!("ICE candidate gathering completed (null candidate received)");
                    let _ = tx.send(TransportEvent::LocalCandidate(None));
                }
            }
        })
    }));

    pc.on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
        debug!("ICE gathering state changed: {:?}", state);
        Box::pin(async {})
    }));

    pc.on_signaling_state_change(Box::new(move |state: RTCSignalingState| {
        debug!("Signaling state change: {:?}", state);
        Box::pin(async {})
    }));

    pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
        debug!("ICE connection state change: {:?}", state);
        Box::pin(async {})
    }));

    let track_tx = tx.clone();
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let kind = match track.kind() {
                RTPCodecType::Audio => TrackKind::Audio,
                _ => TrackKind::Video,
            };
            let remote = MediaTrack::new(track.id(), kind, track.stream_id());
            info!("Got remote track: {} in stream {}", remote.id(), remote.stream_id());
            let _ = track_tx.send(TransportEvent::RemoteTrack(remote));
            Box::pin(async {})
        },
    ));

    let pc_stats = Arc::downgrade(pc);
    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        info!("Connection state change: {:?}", st);
        let state = match st {
            RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => {
                ConnectivityState::New
            }
            RTCPeerConnectionState::Connecting => ConnectivityState::Connecting,
            RTCPeerConnectionState::Connected => ConnectivityState::Connected,
            RTCPeerConnectionState::Disconnected => ConnectivityState::Disconnected,
            RTCPeerConnectionState::Failed => ConnectivityState::Failed,
            RTCPeerConnectionState::Closed => ConnectivityState::Closed,
        };
        let _ = tx.send(TransportEvent::Connectivity(state));

        let pc = pc_stats.clone();
        Box::pin(async move {
            if state == ConnectivityState::Failed {
                if let Some(pc) = pc.upgrade() {
                    dump_selected_pair(&pc, "FAILED").await;
                }
            }
        })
    }));
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn create_local_description(&self, kind: SdpKind) -> Result<SessionDescription> {
        let desc = match kind {
            SdpKind::Offer => self.pc.create_offer(None).await?,
            SdpKind::Answer => self.pc.create_answer(None).await?,
        };
        SessionDescription::try_from(desc)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc.set_local_description(desc.to_rtc()?).await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let mut pending = self.pending_remote.lock().await;
        self.pc.set_remote_description(desc.to_rtc()?).await?;

        // Применяем отложенные кандидаты
        for candidate in pending.drain(..) {
            debug!("Applying pending candidate: {}", candidate.candidate);
            if let Err(e) = self.pc.add_ice_candidate(candidate.into()).await {
                warn!("Failed to apply pending candidate: {}", e);
            }
        }
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut pending = self.pending_remote.lock().await;
        if self.pc.remote_description().await.is_none() {
            debug!("Remote description not set yet, queuing candidate");
            pending.push(candidate);
            return Ok(());
        }
        self.pc
            .add_ice_candidate(candidate.into())
            .await
            .map_err(|e| Error::CandidateDeliveryFailure(e.to_string()))
    }

    async fn add_local_track(&self, track: &MediaTrack) -> Result<()> {
        let mime_type = match track.kind() {
            TrackKind::Audio => MIME_TYPE_OPUS,
            TrackKind::Video => MIME_TYPE_VP8,
        };
        let sample = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            track.id().to_owned(),
            track.stream_id().to_owned(),
        ));

        let sender = self
            .pc
            .add_track(Arc::clone(&sample) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // RTCP нужно вычитывать, иначе интерсепторы не работают
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while sender.read(&mut rtcp_buf).await.is_ok() {}
        });

        self.local_tracks
            .lock()
            .await
            .insert(track.id().to_owned(), sample);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pending_remote.lock().await.clear();
        self.pc.close().await?;
        Ok(())
    }
}
