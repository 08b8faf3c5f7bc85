use solana_client::{
    client_error::{ClientError, ClientErrorKind},
    rpc_request::{RpcError, RpcResponseErrorData},
};
use solana_sdk::transaction::TransactionError;

use crate::batch::errors::DispatchError;

// JSON-RPC codes the Solana RPC server uses for rejected transactions
const SEND_TRANSACTION_PREFLIGHT_FAILURE: i64 = -32002;
const TRANSACTION_SIGNATURE_VERIFICATION_FAILURE: i64 = -32003;
const INVALID_REQUEST: i64 = -32600;
const INVALID_PARAMS: i64 = -32602;

/// Map a `solana-client` error onto the engine's taxonomy
///
/// Network trouble, rate limits and lagging nodes are transient. Anything
/// the cluster rejected on its merits is deterministic.
pub fn classify_client_error(err: &ClientError) -> DispatchError {
    match err.kind() {
        ClientErrorKind::Io(e) => DispatchError::Transient(format!("io: {}", e)),
        ClientErrorKind::Reqwest(e) => DispatchError::Transient(format!("http: {}", e)),
        ClientErrorKind::RpcError(rpc) => classify_rpc_error(rpc),
        ClientErrorKind::TransactionError(tx_err) => classify_transaction_error(tx_err),
        ClientErrorKind::SigningError(e) => DispatchError::Configuration(format!("signing: {}", e)),
        other => DispatchError::Transient(other.to_string()),
    }
}

fn classify_rpc_error(err: &RpcError) -> DispatchError {
    match err {
        RpcError::RpcResponseError { code, message, data } => match data {
            RpcResponseErrorData::SendTransactionPreflightFailure(sim) => {
                let logs = sim.logs.as_ref().map(|l| l.join(" | ")).unwrap_or_default();
                match &sim.err {
                    Some(tx_err) => DispatchError::Deterministic(format!("preflight: {:?} [{}]", tx_err, logs)),
                    None => DispatchError::Deterministic(format!("preflight: {} [{}]", message, logs)),
                }
            }
            RpcResponseErrorData::NodeUnhealthy { num_slots_behind } => {
                DispatchError::Transient(format!("node unhealthy (behind: {:?})", num_slots_behind))
            }
            _ => match *code {
                SEND_TRANSACTION_PREFLIGHT_FAILURE
                | TRANSACTION_SIGNATURE_VERIFICATION_FAILURE
                | INVALID_PARAMS..=INVALID_REQUEST => {
                    DispatchError::Deterministic(format!("rpc {}: {}", code, message))
                }
                _ => DispatchError::Transient(format!("rpc {}: {}", code, message)),
            },
        },
        other => DispatchError::Transient(other.to_string()),
    }
}

fn classify_transaction_error(err: &TransactionError) -> DispatchError {
    match err {
        TransactionError::BlockhashNotFound | TransactionError::WouldExceedMaxBlockCostLimit => {
            DispatchError::Transient(err.to_string())
        }
        _ => DispatchError::Deterministic(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::instruction::InstructionError;

    fn response_error(code: i64) -> ClientError {
        ClientError::from(ClientErrorKind::RpcError(RpcError::RpcResponseError {
            code,
            message: "boom".to_string(),
            data: RpcResponseErrorData::Empty,
        }))
    }

    #[test]
    fn test_transaction_errors() {
        let err = ClientError::from(TransactionError::BlockhashNotFound);
        assert!(classify_client_error(&err).is_retryable());

        let err = ClientError::from(TransactionError::InstructionError(0, InstructionError::Custom(6000)));
        assert!(matches!(classify_client_error(&err), DispatchError::Deterministic(_)));
    }

    #[test]
    fn test_rpc_response_codes() {
        assert!(matches!(classify_client_error(&response_error(-32002)), DispatchError::Deterministic(_)));
        assert!(matches!(classify_client_error(&response_error(-32602)), DispatchError::Deterministic(_)));
        assert!(classify_client_error(&response_error(-32005)).is_retryable());
        assert!(classify_client_error(&response_error(429)).is_retryable());
    }

    #[test]
    fn test_node_unhealthy_is_transient() {
        let err = ClientError::from(ClientErrorKind::RpcError(RpcError::RpcResponseError {
            code: -32005,
            message: "Node is behind".to_string(),
            data: RpcResponseErrorData::NodeUnhealthy {
                num_slots_behind: Some(40),
            },
        }));
        assert!(classify_client_error(&err).is_retryable());
    }

    #[test]
    fn test_io_is_transient() {
        let err = ClientError::from(std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out"));
        assert!(classify_client_error(&err).is_retryable());
    }
}
