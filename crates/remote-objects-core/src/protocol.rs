//! Wire protocol for client-server communication.

use serde::{Deserialize, Serialize};

use crate::{
    error::CodecError,
    flatted::{self, Graph, Node, Slot},
};

/// Request posted by a client.
///
/// Either `{uid, channel, code}` or `{uid, channel, exit: true}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeRequest {
    #[serde(default, alias = "UID", skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub exit: bool,
}

impl BridgeRequest {
    /// Evaluate `code` in the session `uid`.
    #[must_use]
    pub fn execute(uid: &str, channel: &str, code: &str) -> Self {
        Self {
            uid: Some(uid.to_string()),
            channel: Some(channel.to_string()),
            code: Some(code.to_string()),
            exit: false,
        }
    }

    /// Tear down the session `uid`.
    #[must_use]
    pub fn teardown(uid: &str, channel: &str) -> Self {
        Self {
            uid: Some(uid.to_string()),
            channel: Some(channel.to_string()),
            code: None,
            exit: true,
        }
    }

    /// Encode as flatted text.
    ///
    /// # Errors
    /// Returns error if the record cannot be serialized.
    pub fn encode(&self) -> Result<String, CodecError> {
        flatted::encode(&Graph::from_json(&serde_json::to_value(self)?))
    }

    /// Decode a request body.
    ///
    /// Flatted text is the native format; a plain JSON object is accepted
    /// too, for hand-written clients.
    ///
    /// # Errors
    /// Returns error if the body is neither.
    pub fn decode(body: &str) -> Result<Self, CodecError> {
        let body = body.trim_start();
        if body.starts_with('[') {
            let value = flatted::decode(body)?.to_json()?;
            Ok(serde_json::from_value(value)?)
        } else {
            Ok(serde_json::from_str(body)?)
        }
    }
}

/// Outcome of an execute request.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeResponse {
    /// Value produced by the expression; the graph root is the result.
    Result(Graph),
    /// Message of the error the expression raised.
    Error(String),
}

impl BridgeResponse {
    /// Encode as `{result}` or `{error}` flatted text.
    ///
    /// # Errors
    /// Returns error if the result graph is inconsistent.
    pub fn encode(&self) -> Result<String, CodecError> {
        let graph = match self {
            Self::Result(graph) => {
                let mut graph = graph.clone();
                let root = graph.root().clone();
                let id = graph.push(Node::Object(vec![("result".into(), root)]));
                graph.with_root(Slot::Node(id))
            }
            Self::Error(message) => {
                let mut graph = Graph::default();
                let id = graph.push(Node::Object(vec![(
                    "error".into(),
                    Slot::String(message.clone()),
                )]));
                graph.with_root(Slot::Node(id))
            }
        };
        flatted::encode(&graph)
    }

    /// Decode a response body.
    ///
    /// # Errors
    /// Returns error if the body is not a `{result}` or `{error}` record.
    pub fn decode(body: &str) -> Result<Self, CodecError> {
        let graph = flatted::decode(body)?;
        let root = graph.root().clone();
        if let Some(error) = graph.field(&root, "error") {
            let message = match error {
                Slot::String(s) => s.clone(),
                other => graph.slot_to_json(other)?.to_string(),
            };
            return Ok(Self::Error(message));
        }
        if graph.entries(&root).is_none() {
            return Err(CodecError::Malformed("expected a response record".into()));
        }
        match graph.field(&root, "result").cloned().unwrap_or(Slot::Null) {
            Slot::Node(id) => Ok(Self::Result(graph.with_root(Slot::Node(id)))),
            primitive => Ok(Self::Result(Graph::primitive(primitive))),
        }
    }
}

/// Add a reference descriptor `{<channel>: <expression>}` to `graph`.
pub fn reference_descriptor(graph: &mut Graph, channel: &str, expression: String) -> Slot {
    Slot::Node(graph.push(Node::Object(vec![(
        channel.to_string(),
        Slot::String(expression),
    )])))
}

/// Expression carried by the reference descriptor at `slot`, if it is one.
#[must_use]
pub fn as_reference<'a>(graph: &'a Graph, slot: &Slot, channel: &str) -> Option<&'a str> {
    match graph.entries(slot)? {
        [(key, Slot::String(expression))] if key == channel => Some(expression.as_str()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_roundtrip() {
        let request = BridgeRequest::execute("u1", "secret", "1 + 1");
        let text = request.encode().unwrap();
        assert_eq!(
            text,
            r#"[{"uid":"1","channel":"2","code":"3"},"u1","secret","1 + 1"]"#
        );
        assert_eq!(BridgeRequest::decode(&text).unwrap(), request);
    }

    #[test]
    fn test_plain_json_request() {
        let parsed =
            BridgeRequest::decode(r#"{"UID":"u1","channel":"c","exit":true}"#).unwrap();
        assert_eq!(parsed, BridgeRequest::teardown("u1", "c"));
    }

    #[test]
    fn test_malformed_request() {
        assert!(BridgeRequest::decode("").is_err());
        assert!(BridgeRequest::decode("[1,").is_err());
        assert!(BridgeRequest::decode(r#"{"uid": 5}"#).is_err());
    }

    #[test]
    fn test_response_encoding() {
        let ok = BridgeResponse::Result(Graph::primitive(Slot::from(2)));
        assert_eq!(ok.encode().unwrap(), r#"[{"result":2}]"#);
        assert_eq!(BridgeResponse::decode(r#"[{"result":2}]"#).unwrap(), ok);

        let err = BridgeResponse::Error("boom".into());
        assert_eq!(err.encode().unwrap(), r#"[{"error":"1"},"boom"]"#);
        assert_eq!(BridgeResponse::decode(&err.encode().unwrap()).unwrap(), err);
    }

    #[test]
    fn test_missing_result_is_null() {
        let BridgeResponse::Result(graph) = BridgeResponse::decode("[{}]").unwrap() else {
            panic!("Wrong response type");
        };
        assert_eq!(graph.root(), &Slot::Null);
        assert!(BridgeResponse::decode("[2]").is_err());
    }

    #[test]
    fn test_reference_descriptor() {
        let mut graph = Graph::default();
        let slot = reference_descriptor(&mut graph, "chan", "path[\"0\"]".into());
        graph.set_root(slot.clone());

        let text = BridgeResponse::Result(graph.clone()).encode().unwrap();
        let BridgeResponse::Result(decoded) = BridgeResponse::decode(&text).unwrap() else {
            panic!("Wrong response type");
        };
        assert_eq!(
            as_reference(&decoded, decoded.root(), "chan"),
            Some("path[\"0\"]")
        );
        assert_eq!(as_reference(&decoded, decoded.root(), "other"), None);
    }
}
