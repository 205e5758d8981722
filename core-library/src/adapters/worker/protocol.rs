//! Messages crossing the worker boundary.
//!
//! Requests and responses travel as JSON-encoded bytes; the reply channel
//! rides alongside the payload.

use bridge_traits::database::{QueryRow, Statement, TxMode};
use bridge_traits::error::{BridgeError, Result};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WorkerRequest {
    Begin { tx: u64, mode: TxMode },
    Execute { tx: u64, statement: Statement },
    Commit { tx: u64 },
    Rollback { tx: u64 },
    /// Single statement outside any transaction
    Query { statement: Statement },
    /// Whole batch as one local write transaction
    BulkExec { statements: Vec<Statement> },
    Close,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "body", rename_all = "snake_case")]
pub enum WorkerResponse {
    Rows(Vec<QueryRow>),
    Done,
    Error(String),
}

impl WorkerResponse {
    /// Rows of a successful reply; `Done` counts as no rows
    pub fn into_rows(self) -> Result<Vec<QueryRow>> {
        match self {
            WorkerResponse::Rows(rows) => Ok(rows),
            WorkerResponse::Done => Ok(Vec::new()),
            WorkerResponse::Error(message) => Err(BridgeError::DatabaseError(message)),
        }
    }
}

/// Serialized request plus the channel its reply goes back on
#[derive(Debug)]
pub struct Envelope {
    pub payload: Bytes,
    pub reply: oneshot::Sender<Bytes>,
}

pub fn encode<T: Serialize>(message: &T) -> Result<Bytes> {
    serde_json::to_vec(message)
        .map(Bytes::from)
        .map_err(|e| BridgeError::OperationFailed(format!("Failed to encode worker message: {}", e)))
}

pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    serde_json::from_slice(payload)
        .map_err(|e| BridgeError::OperationFailed(format!("Failed to decode worker message: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::database::QueryValue;
    use std::collections::HashMap;

    #[test]
    fn test_request_wire_shape() {
        let request = WorkerRequest::Execute {
            tx: 3,
            statement: Statement::new("DELETE FROM songs WHERE id = ?", vec![9.into()]),
        };
        let bytes = encode(&request).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["op"], "execute");
        assert_eq!(value["tx"], 3);
        assert_eq!(decode::<WorkerRequest>(&bytes).unwrap(), request);
    }

    #[test]
    fn test_error_response_maps_to_database_error() {
        let bytes = encode(&WorkerResponse::Error("no such table: x".into())).unwrap();
        let err = decode::<WorkerResponse>(&bytes).unwrap().into_rows().unwrap_err();
        assert!(matches!(err, BridgeError::DatabaseError(m) if m.contains("no such table")));
    }

    #[test]
    fn test_rows_survive_encoding() {
        let mut row = HashMap::new();
        row.insert("id".to_string(), QueryValue::Integer(1));
        row.insert("title".to_string(), QueryValue::Text("Şükür".into()));
        let bytes = encode(&WorkerResponse::Rows(vec![row.clone()])).unwrap();
        assert_eq!(
            decode::<WorkerResponse>(&bytes).unwrap().into_rows().unwrap(),
            vec![row]
        );
    }

    #[test]
    fn test_garbage_payload() {
        assert!(decode::<WorkerRequest>(b"{not json").is_err());
    }
}
