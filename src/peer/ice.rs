//! Candidate Buffer: локальные кандидаты → хранилище, удалённые → транспорт.

use crate::logger::dump_candidate;
use crate::peer::types::IceCandidate;
use crate::session::{ConnectionSession, SessionEvent};
use crate::store::{ChangeKind, SignalingStore, Subscription};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Пишет локальные кандидаты в свою коллекцию по одному, в порядке появления.
///
/// Запись не блокирует переговоры: ошибки только логируются и уходят
/// в `SessionEvent::DeliveryFailed`. `None` (конец сбора) не записывается.
pub(crate) fn spawn_candidate_writer(
    store: Arc<dyn SignalingStore>,
    path: String,
    events: broadcast::Sender<SessionEvent>,
) -> (mpsc::UnboundedSender<Option<IceCandidate>>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Option<IceCandidate>>();
    let handle = tokio::spawn(async move {
        let mut written = Vec::new();
        while let Some(candidate) = rx.recv().await {
            let Some(candidate) = candidate else {
                info!("Got final candidate! ({} written to {})", written.len(), path);
                analyze_candidates(&written);
                continue;
            };

            dump_candidate("OUT", &candidate);
            let record = match serde_json::to_value(&candidate) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Failed to encode candidate: {}", e);
                    continue;
                }
            };
            match store.append_to_subcollection(&path, record).await {
                Ok(_) => {
                    written.push(candidate.clone());
                    let _ = events.send(SessionEvent::CandidatePublished(candidate));
                }
                Err(e) => {
                    warn!("Failed to write candidate to {}: {}", path, e);
                    let _ = events.send(SessionEvent::DeliveryFailed(e.to_string()));
                }
            }
        }
    });
    (tx, handle)
}

/// Применяет кандидаты другой стороны в порядке ленты подписки.
/// Учитываются только `added`: записанный кандидат не меняется.
pub(crate) fn spawn_remote_listener(
    mut subscription: Subscription,
    session: Weak<ConnectionSession>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(change) = subscription.next().await {
            if change.kind != ChangeKind::Added {
                continue;
            }
            let candidate: IceCandidate = match serde_json::from_value(change.data) {
                Ok(candidate) => candidate,
                Err(e) => {
                    warn!("Skipping malformed candidate {}: {}", change.id, e);
                    continue;
                }
            };
            let Some(session) = session.upgrade() else {
                break;
            };
            session.apply_remote_candidate(candidate).await;
        }
        debug!("remote candidate subscription {} ended", subscription.path());
    })
}

/// Сколько кандидатов каждого типа собрано
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSummary {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

pub fn analyze_candidates(candidates: &[IceCandidate]) -> CandidateSummary {
    let mut summary = CandidateSummary::default();

    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            summary.host += 1;
        } else if candidate.candidate.contains("typ srflx") {
            summary.srflx += 1;
        } else if candidate.candidate.contains("typ relay") {
            summary.relay += 1;
        }
    }

    debug!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        summary.host, summary.srflx, summary.relay
    );
    if summary.relay == 0 {
        debug!("No TURN relay candidates found, connection through symmetric NAT may fail");
    }
    summary
}
