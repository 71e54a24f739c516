//! Result classification and conversion to the wire graph.

use chrono::{DateTime, SecondsFormat, Utc};
use remote_objects_core::{EvalError, Graph, Node, Slot, protocol::reference_descriptor};
use rhai::{Array, Blob, Dynamic, FLOAT, INT, ImmutableString, Map};
use serde_json::Number;

use crate::{
    deferred::Deferred,
    namespace::{IdentityProbe, Namespace},
};

const MAX_DEPTH: usize = 256;

/// Serialization category of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// `()`, sent as `null`.
    Unit,
    /// Booleans and numbers.
    Scalar,
    /// Strings and characters.
    Text,
    /// Blobs, sent as UTF-8 text.
    Binary,
    /// Arrays, sent element by element.
    Sequence,
    /// Object maps, sent entry by entry.
    Record,
    /// `DateTime<Utc>`, sent as RFC 3339 text.
    Timestamp,
    /// A pending value; awaited first when it is the result itself.
    Deferred,
    /// Anything else. Kept server-side and sent as a reference.
    Opaque,
}

impl Shape {
    /// Whether values of this shape cross the wire by value.
    #[must_use]
    pub const fn is_by_value(self) -> bool {
        !matches!(self, Self::Deferred | Self::Opaque)
    }
}

/// Classify a value.
#[must_use]
pub fn classify(value: &Dynamic) -> Shape {
    if value.is::<()>() {
        Shape::Unit
    } else if value.is::<bool>() || value.is::<INT>() || value.is::<FLOAT>() {
        Shape::Scalar
    } else if value.is::<ImmutableString>() || value.is::<char>() {
        Shape::Text
    } else if value.is::<Blob>() {
        Shape::Binary
    } else if value.is::<Array>() {
        Shape::Sequence
    } else if value.is::<Map>() {
        Shape::Record
    } else if value.is::<DateTime<Utc>>() {
        Shape::Timestamp
    } else if value.is::<Deferred>() {
        Shape::Deferred
    } else {
        Shape::Opaque
    }
}

/// Converts evaluation results into a wire graph, retaining opaque values in
/// the session's instance registry.
pub(crate) struct Marshaller<'a> {
    graph: Graph,
    namespace: &'a mut Namespace,
    probes: &'a [IdentityProbe],
    channel: &'a str,
    origin: Option<String>,
}

impl<'a> Marshaller<'a> {
    pub(crate) fn new(
        namespace: &'a mut Namespace,
        probes: &'a [IdentityProbe],
        channel: &'a str,
    ) -> Self {
        Self {
            graph: Graph::default(),
            namespace,
            probes,
            channel,
            origin: None,
        }
    }

    /// The value being marshalled was read from the instance stored under
    /// `key`; an opaque root is referenced through that key again.
    pub(crate) fn reusing(mut self, key: Option<String>) -> Self {
        self.origin = key;
        self
    }

    pub(crate) fn finish(mut self, value: Dynamic) -> Result<Graph, EvalError> {
        let root = self.slot(value, 0)?;
        self.graph.set_root(root);
        Ok(self.graph)
    }

    fn slot(&mut self, value: Dynamic, depth: usize) -> Result<Slot, EvalError> {
        if depth > MAX_DEPTH {
            return Err(EvalError::new("Result is nested too deeply"));
        }
        let value = value.flatten();

        let slot = match classify(&value) {
            Shape::Unit => Slot::Null,
            Shape::Scalar => scalar(&value),
            Shape::Text => Slot::String(value.to_string()),
            Shape::Binary => {
                let blob = value.try_cast::<Blob>().ok_or_else(|| mismatch("blob"))?;
                Slot::String(String::from_utf8_lossy(&blob).into_owned())
            }
            Shape::Sequence => {
                let items = value.try_cast::<Array>().ok_or_else(|| mismatch("array"))?;
                let slots = items
                    .into_iter()
                    .map(|item| self.slot(item, depth + 1))
                    .collect::<Result<_, _>>()?;
                Slot::Node(self.graph.push(Node::Array(slots)))
            }
            Shape::Record => {
                let map = value.try_cast::<Map>().ok_or_else(|| mismatch("map"))?;
                let mut entries = Vec::with_capacity(map.len());
                for (key, item) in map {
                    entries.push((key.to_string(), self.slot(item, depth + 1)?));
                }
                Slot::Node(self.graph.push(Node::Object(entries)))
            }
            Shape::Timestamp => {
                let date = value
                    .try_cast::<DateTime<Utc>>()
                    .ok_or_else(|| mismatch("timestamp"))?;
                Slot::String(date.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            Shape::Deferred | Shape::Opaque => {
                let key = match self.origin.take().filter(|_| depth == 0) {
                    Some(key) => key,
                    None => self.namespace.retain(value, self.probes),
                };
                let path = self.namespace.instance_path(&key);
                tracing::debug!(uid = %self.namespace.uid(), key = %key, "Retained instance");
                reference_descriptor(&mut self.graph, self.channel, path)
            }
        };
        Ok(slot)
    }
}

fn scalar(value: &Dynamic) -> Slot {
    if let Ok(b) = value.as_bool() {
        Slot::Bool(b)
    } else if let Ok(i) = value.as_int() {
        Slot::Number(i.into())
    } else if let Ok(f) = value.as_float() {
        Number::from_f64(f).map_or(Slot::Null, Slot::Number)
    } else {
        Slot::Null
    }
}

fn mismatch(expected: &str) -> EvalError {
    EvalError::new(format!("Unexpected value type, expected {expected}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_shapes() {
        assert_eq!(classify(&Dynamic::UNIT), Shape::Unit);
        assert_eq!(classify(&Dynamic::from(1_i64)), Shape::Scalar);
        assert_eq!(classify(&Dynamic::from(1.5_f64)), Shape::Scalar);
        assert_eq!(classify(&Dynamic::from(true)), Shape::Scalar);
        assert_eq!(classify(&Dynamic::from("x")), Shape::Text);
        assert_eq!(classify(&Dynamic::from('x')), Shape::Text);
        assert_eq!(classify(&Dynamic::from(vec![1_u8, 2])), Shape::Binary);
        assert_eq!(classify(&Dynamic::from_array(Array::new())), Shape::Sequence);
        assert_eq!(classify(&Dynamic::from_map(Map::new())), Shape::Record);
        assert_eq!(classify(&Dynamic::from(Utc::now())), Shape::Timestamp);
    }

    #[test]
    fn test_reference_shapes() {
        #[derive(Clone)]
        struct Socket;

        let deferred = Deferred::settled(Ok(Dynamic::UNIT));
        assert_eq!(classify(&Dynamic::from(deferred)), Shape::Deferred);
        assert_eq!(classify(&Dynamic::from(Socket)), Shape::Opaque);
        assert!(!Shape::Opaque.is_by_value());
        assert!(Shape::Record.is_by_value());
    }

    #[test]
    fn test_marshal_nested_opaque() {
        #[derive(Clone)]
        struct Socket;

        let mut ns = Namespace::new("u1".into());
        let value = Dynamic::from_array(vec![Dynamic::from(1_i64), Dynamic::from(Socket)]);
        let graph = Marshaller::new(&mut ns, &[], "chan").finish(value).unwrap();

        assert_eq!(
            graph.to_json().unwrap(),
            serde_json::json!([1, {"chan": "sandbox[\"u1\"].instances[\"0\"]"}])
        );
        assert_eq!(ns.instance_count(), 1);
    }
}
