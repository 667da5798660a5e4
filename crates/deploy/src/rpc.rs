//! Shared RPC utilities for interacting with Ethereum JSON-RPC endpoints.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Default timeout for RPC requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval between polling attempts when waiting for a receipt.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Failure of a single JSON-RPC exchange.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The request never got a well-formed HTTP answer.
    #[error("failed to reach RPC endpoint: {0}")]
    Transport(#[from] reqwest::Error),

    /// The node answered with a JSON-RPC error object.
    #[error("RPC error {code}: {message}")]
    Node { code: i64, message: String },

    /// The node answered, but not with what the method is documented to return.
    #[error("unexpected {method} response: {reason}")]
    Decode { method: String, reason: String },
}

impl RpcError {
    /// Whether the node rejected the call because execution reverted.
    pub fn is_revert(&self) -> bool {
        match self {
            Self::Node { code, message } => {
                *code == 3 || message.to_lowercase().contains("revert")
            }
            _ => false,
        }
    }
}

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client(timeout: Duration) -> Result<reqwest::Client, RpcError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Make a JSON-RPC call and deserialize the result.
///
/// # Arguments
/// * `client` - The HTTP client to use
/// * `url` - The RPC endpoint URL
/// * `method` - The RPC method name
/// * `params` - The method parameters
///
/// # Returns
/// The deserialized result, or an error if the request failed or returned an error response.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
) -> Result<T, RpcError> {
    let response: Value = client
        .post(url)
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await?
        .json()
        .await?;

    parse_response(method, response)
}

/// Split a JSON-RPC response envelope into its result or error.
fn parse_response<T: DeserializeOwned>(method: &str, response: Value) -> Result<T, RpcError> {
    if let Some(error) = response.get("error") {
        return Err(RpcError::Node {
            code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
        });
    }

    let result = response
        .get("result")
        .cloned()
        .ok_or_else(|| RpcError::Decode {
            method: method.to_string(),
            reason: "no result in response".to_string(),
        })?;

    serde_json::from_value(result).map_err(|e| RpcError::Decode {
        method: method.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use alloy_core::primitives::U64;

    use super::*;

    #[test]
    fn test_parse_response_result() {
        let response = serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": "0xaa36a7"});
        let chain_id: U64 = parse_response("eth_chainId", response).unwrap();
        assert_eq!(chain_id.to::<u64>(), 11155111);
    }

    #[test]
    fn test_parse_response_null_result() {
        let response = serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": null});
        let receipt: Option<Value> = parse_response("eth_getTransactionReceipt", response).unwrap();
        assert!(receipt.is_none());
    }

    #[test]
    fn test_parse_response_error() {
        let response = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": 3, "message": "execution reverted: not owner"}
        });
        let err = parse_response::<Value>("eth_estimateGas", response).unwrap_err();
        assert!(err.is_revert());
        assert!(err.to_string().contains("not owner"));
    }

    #[test]
    fn test_parse_response_missing_result() {
        let response = serde_json::json!({"jsonrpc": "2.0", "id": 1});
        let err = parse_response::<Value>("eth_blockNumber", response).unwrap_err();
        assert!(matches!(err, RpcError::Decode { .. }));
        assert!(!err.is_revert());
    }
}
