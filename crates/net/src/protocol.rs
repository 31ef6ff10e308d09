//! Store protocol message types
//!
//! All messages are JSON-serialized and length-prefixed on the wire.
//! Every request carries a client-chosen `id` that its response echoes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Get {
        id: u64,
        path: String,
    },

    /// Overwrite; `null` removes
    Set {
        id: u64,
        path: String,
        value: Value,
    },

    /// Overwrite named children of `path`
    Update {
        id: u64,
        path: String,
        fields: Map<String, Value>,
    },

    Remove {
        id: u64,
        path: String,
    },

    /// Write `value` only if the current value equals `expected`
    CompareAndSet {
        id: u64,
        path: String,
        #[serde(default)]
        expected: Option<Value>,
        value: Value,
    },

    /// Start pushing `changed` for `path`, keyed by this request's id
    Subscribe {
        id: u64,
        path: String,
    },

    /// Stop the subscription opened by request `id`. No response.
    Unsubscribe {
        id: u64,
    },

    Ping {
        id: u64,
    },
}

impl Request {
    pub fn id(&self) -> u64 {
        match self {
            Request::Get { id, .. }
            | Request::Set { id, .. }
            | Request::Update { id, .. }
            | Request::Remove { id, .. }
            | Request::CompareAndSet { id, .. }
            | Request::Subscribe { id, .. }
            | Request::Unsubscribe { id }
            | Request::Ping { id } => *id,
        }
    }
}

/// Server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Result of a `get`
    Value {
        id: u64,
        #[serde(default)]
        value: Option<Value>,
    },

    /// Write or subscribe succeeded
    Ack {
        id: u64,
    },

    /// Compare-and-set lost; carries what is stored now
    Conflict {
        id: u64,
        #[serde(default)]
        current: Option<Value>,
    },

    Failed {
        id: u64,
        reason: String,
    },

    /// Subscription push
    Changed {
        subscription: u64,
        #[serde(default)]
        value: Option<Value>,
    },

    Pong {
        id: u64,
    },
}

impl Response {
    /// Id of the request this answers; `None` for subscription pushes
    pub fn request_id(&self) -> Option<u64> {
        match self {
            Response::Value { id, .. }
            | Response::Ack { id }
            | Response::Conflict { id, .. }
            | Response::Failed { id, .. }
            | Response::Pong { id } => Some(*id),
            Response::Changed { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let req = Request::CompareAndSet {
            id: 7,
            path: "rooms/ABC123/viewers".into(),
            expected: None,
            value: json!(1),
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({
                "type": "compare_and_set",
                "id": 7,
                "path": "rooms/ABC123/viewers",
                "expected": null,
                "value": 1
            })
        );
        assert_eq!(req.id(), 7);
    }

    #[test]
    fn test_null_value_reads_as_absent() {
        let resp: Response =
            serde_json::from_value(json!({"type": "changed", "subscription": 3, "value": null}))
                .unwrap();
        assert_eq!(
            resp,
            Response::Changed {
                subscription: 3,
                value: None
            }
        );

        let resp: Response = serde_json::from_value(json!({"type": "value", "id": 1})).unwrap();
        assert_eq!(resp, Response::Value { id: 1, value: None });
    }

    #[test]
    fn test_unknown_type_rejected() {
        let result: Result<Request, _> =
            serde_json::from_value(json!({"type": "drop_database", "id": 1}));
        assert!(result.is_err());
    }
}
