// Конфигурация приложения
// Логирование можно отключить только в режиме разработки

use crate::error::{Error, Result};
use crate::peer::types::ServerConfig;
use crate::utils::add_ice_url_scheme;
use serde::{Deserialize, Serialize};
use std::path::Path;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true; // В режиме отладки логирование включено

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false; // В продакшене логирование отключено

#[cfg(debug_assertions)]
pub mod dev {
    // Для полного отключения логирования в режиме разработки
    // измените эту константу на false
    pub const ENABLE_LOGGING: bool = true;
}

/// Настройки сигнализации и ICE
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    pub ice_servers: Vec<ServerConfig>,
    pub ice_candidate_pool_size: u8,
    /// Коллекция комнат в хранилище
    pub rooms_collection: String,
    /// Подколлекция кандидатов инициатора
    pub initiator_candidates: String,
    /// Подколлекция кандидатов присоединившегося
    pub joiner_candidates: String,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![
                ServerConfig {
                    id: "default-stun-1".into(),
                    r#type: "stun".into(),
                    url: "stun:stun1.l.google.com:19302".into(),
                    username: None,
                    credential: None,
                },
                ServerConfig {
                    id: "default-stun-2".into(),
                    r#type: "stun".into(),
                    url: "stun:stun2.l.google.com:19302".into(),
                    username: None,
                    credential: None,
                },
            ],
            ice_candidate_pool_size: 10,
            rooms_collection: "rooms".into(),
            initiator_candidates: "callerCandidates".into(),
            joiner_candidates: "calleeCandidates".into(),
        }
    }
}

impl SignalingConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "server `{}`: URL cannot be empty",
                    server.id
                )));
            }
            if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none())
            {
                return Err(Error::InvalidConfig(format!(
                    "server `{}`: TURN servers require username and credential",
                    server.id
                )));
            }
        }

        let names = [
            &self.rooms_collection,
            &self.initiator_candidates,
            &self.joiner_candidates,
        ];
        if names.iter().any(|n| n.is_empty() || n.contains('/')) {
            return Err(Error::InvalidConfig(
                "collection names must be non-empty single path segments".into(),
            ));
        }
        if self.initiator_candidates == self.joiner_candidates {
            return Err(Error::InvalidConfig(
                "initiator and joiner candidate collections must differ".into(),
            ));
        }
        Ok(())
    }

    /// Конфигурация для RTCPeerConnection
    pub fn rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = self
            .ice_servers
            .iter()
            .map(|config| RTCIceServer {
                urls: vec![add_ice_url_scheme(config)],
                username: config.username.clone().unwrap_or_default(),
                credential: config.credential.clone().unwrap_or_default(),
            })
            .collect();

        RTCConfiguration {
            ice_servers,
            ice_candidate_pool_size: self.ice_candidate_pool_size,
            ..Default::default()
        }
    }
}
