//! Tipos de erro do gateway de chamadas remotas.
//!
//! Define [`CallError`], a forma normalizada de toda falha de uma chamada HTTP:
//! rede indisponível, status fora de 2xx ou timeout. Nenhum `reqwest::Error`
//! atravessa a fronteira do gateway; tudo é convertido aqui em mensagens legíveis.

use thiserror::Error;

/// Falha normalizada de uma chamada ao backend.
///
/// As variantes cobrem os cenários de falha observados:
/// - [`Transport`](CallError::Transport): rede indisponível ou status não-2xx sem detalhe útil
/// - [`RemoteDetail`](CallError::RemoteDetail): status não-2xx com `{"detail": "..."}` no corpo
/// - [`Timeout`](CallError::Timeout): a chamada excedeu a duração da sua classe de timeout
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// Falha de transporte. `status` é `None` quando nenhuma resposta chegou.
    #[error("{message}")]
    Transport { status: Option<u16>, message: String },

    /// O serviço respondeu com erro e uma mensagem de detalhe,
    /// exibida ao usuário sem alterações.
    #[error("{detail}")]
    RemoteDetail { status: u16, detail: String },

    /// A chamada excedeu o tempo limite configurado.
    #[error("timeout of {timeout_ms}ms exceeded calling {endpoint}")]
    Timeout { endpoint: String, timeout_ms: u64 },
}

impl CallError {
    /// Status HTTP da resposta, quando houve resposta.
    pub fn status(&self) -> Option<u16> {
        match self {
            CallError::Transport { status, .. } => *status,
            CallError::RemoteDetail { status, .. } => Some(*status),
            CallError::Timeout { .. } => None,
        }
    }

    /// Detalhe estruturado extraído do corpo da resposta, se houver.
    pub fn detail(&self) -> Option<&str> {
        match self {
            CallError::RemoteDetail { detail, .. } => Some(detail),
            _ => None,
        }
    }

    /// Verdadeiro quando o servidor nunca respondeu (conexão recusada, DNS, timeout).
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            CallError::Transport { status: None, .. } | CallError::Timeout { .. }
        )
    }

    /// Verdadeiro quando o status coincide com o sentinela "ainda não pronto".
    pub fn is_status(&self, sentinel: u16) -> bool {
        self.status() == Some(sentinel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_detail_displays_verbatim() {
        let err = CallError::RemoteDetail {
            status: 500,
            detail: "template not found".into(),
        };
        assert_eq!(err.to_string(), "template not found");
        assert_eq!(err.detail(), Some("template not found"));
        assert_eq!(err.status(), Some(500));
    }

    #[test]
    fn transport_without_response_is_unreachable() {
        let err = CallError::Transport {
            status: None,
            message: "connection refused".into(),
        };
        assert!(err.is_unreachable());
        assert!(!err.is_status(404));
    }

    #[test]
    fn not_found_matches_sentinel() {
        let err = CallError::Transport {
            status: Some(404),
            message: "Request failed with status code 404".into(),
        };
        assert!(err.is_status(404));
        assert!(!err.is_unreachable());
    }

    #[test]
    fn timeout_display() {
        let err = CallError::Timeout {
            endpoint: "generate-presentation".into(),
            timeout_ms: 600_000,
        };
        assert_eq!(
            err.to_string(),
            "timeout of 600000ms exceeded calling generate-presentation"
        );
        assert!(err.is_unreachable());
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CallError>();
    }
}
