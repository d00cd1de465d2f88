use serde::Serialize;

/// Состояние Connection Session
///
/// `Idle -> Negotiating -> Connected -> Closed`; `Failed` приходит от транспорта
/// и остаётся до teardown, повторных попыток нет.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Negotiating,
    Connected,
    Failed,
    Closed,
}

/// Агрегированное состояние связности, как его сообщает транспорт
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectivityState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl SessionState {
    pub fn is_closed(self) -> bool {
        self == SessionState::Closed
    }

    /// Переговоры начались (create/join)
    pub fn begin(self) -> Option<SessionState> {
        match self {
            SessionState::Idle => Some(SessionState::Negotiating),
            _ => None,
        }
    }

    /// Реакция на сигнал транспорта. `None` — состояние не меняется.
    pub fn on_connectivity(self, signal: ConnectivityState) -> Option<SessionState> {
        match (self, signal) {
            (SessionState::Negotiating, ConnectivityState::Connected) => {
                Some(SessionState::Connected)
            }
            (SessionState::Negotiating, ConnectivityState::Failed)
            | (SessionState::Connected, ConnectivityState::Failed) => Some(SessionState::Failed),
            _ => None,
        }
    }

    /// teardown; повторный вызов ничего не меняет
    pub fn close(self) -> Option<SessionState> {
        match self {
            SessionState::Closed => None,
            _ => Some(SessionState::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let s = SessionState::Idle.begin().unwrap();
        assert_eq!(s, SessionState::Negotiating);
        let s = s.on_connectivity(ConnectivityState::Connected).unwrap();
        assert_eq!(s, SessionState::Connected);
        let s = s.close().unwrap();
        assert!(s.is_closed());
        assert_eq!(s.close(), None);
    }

    #[test]
    fn test_failure_holds_until_teardown() {
        let s = SessionState::Connected
            .on_connectivity(ConnectivityState::Failed)
            .unwrap();
        assert_eq!(s, SessionState::Failed);
        assert_eq!(s.on_connectivity(ConnectivityState::Connected), None);
        assert_eq!(s.on_connectivity(ConnectivityState::Failed), None);
        assert_eq!(s.close(), Some(SessionState::Closed));
    }

    #[test]
    fn test_closed_ignores_transport_signals() {
        assert_eq!(
            SessionState::Closed.on_connectivity(ConnectivityState::Connected),
            None
        );
        assert_eq!(SessionState::Negotiating.begin(), None);
        assert_eq!(
            SessionState::Negotiating.on_connectivity(ConnectivityState::Connecting),
            None
        );
    }
}
