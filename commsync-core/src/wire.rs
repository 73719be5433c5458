use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{CallbackId, SessionId};
use crate::patch::Patch;

/// The envelope as it travels over the channel.
///
/// `data` is kept untyped here so that an unknown or malformed message can
/// be reported with its method name instead of failing the whole read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub method: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Session that must ignore this message because it originated there.
    #[serde(rename = "exceptId", default, skip_serializing_if = "Option::is_none")]
    pub except_id: Option<String>,
    /// Session the message originated from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}
impl Metadata {
    /// Metadata for a message sent by `session`. Both fields are set, so an
    /// echo is suppressed whether the backend rewrites `id` into `exceptId`
    /// or relays the envelope untouched.
    pub fn origin(session: &SessionId) -> Self {
        Metadata {
            except_id: Some(session.to_string()),
            id: Some(session.to_string()),
        }
    }
}

impl Envelope {
    /// Whether this message must be ignored by `session` (echo suppression).
    pub fn is_echo_for(&self, session: &SessionId) -> bool {
        self.metadata
            .as_ref()
            .and_then(|m| m.except_id.as_deref())
            .is_some_and(|except| except == session.as_str())
    }
}

/// This interface is shared between the UI session and the backend process.
/// Both sides must agree on it; it mirrors the comm messages of the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Ask the backend for a full snapshot. Sent once the channel opens.
    SyncRequest,
    /// Full state hydration.
    Sync(SyncPayload),
    /// A reducer action, dispatched as-is.
    Action(Value),
    Patch(PatchPayload),
    MethodCall(MethodCall),
    MethodReturn(MethodReturn),
    SetAppCode(AppCode),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPayload {
    pub state: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchPayload {
    pub patches: Vec<Patch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub method_name: String,
    #[serde(default)]
    pub args: Vec<Value>,
    /// Absent when the backend invokes the UI; no reply is expected then.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_id: Option<CallbackId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodReturn {
    pub callback_id: CallbackId,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppCode {
    /// Application source, handed to the code provider.
    pub code: String,
    /// Encoded position mappings (bare `mappings` or a source map document).
    #[serde(default)]
    pub sourcemap: String,
    /// Original backend-authored source, used for error line extraction.
    #[serde(default)]
    pub py_code: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown message method {0:?}")]
    UnknownMethod(String),
    #[error("malformed {method:?} payload: {source}")]
    Payload {
        method: String,
        #[source]
        source: serde_json::Error,
    },
}

impl Message {
    pub const SYNC_REQUEST: &'static str = "sync_request";
    pub const SYNC: &'static str = "sync";
    pub const ACTION: &'static str = "action";
    pub const PATCH: &'static str = "patch";
    pub const METHOD_CALL: &'static str = "method_call";
    pub const METHOD_RETURN: &'static str = "method_return";
    pub const SET_APP_CODE: &'static str = "set_app_code";

    pub fn method(&self) -> &'static str {
        match self {
            Message::SyncRequest => Self::SYNC_REQUEST,
            Message::Sync(_) => Self::SYNC,
            Message::Action(_) => Self::ACTION,
            Message::Patch(_) => Self::PATCH,
            Message::MethodCall(_) => Self::METHOD_CALL,
            Message::MethodReturn(_) => Self::METHOD_RETURN,
            Message::SetAppCode(_) => Self::SET_APP_CODE,
        }
    }

    pub fn decode(envelope: &Envelope) -> Result<Message, DecodeError> {
        fn payload<T: serde::de::DeserializeOwned>(
            envelope: &Envelope,
        ) -> Result<T, DecodeError> {
            serde_json::from_value(envelope.data.clone()).map_err(|source| DecodeError::Payload {
                method: envelope.method.clone(),
                source,
            })
        }
        Ok(match envelope.method.as_str() {
            Self::SYNC_REQUEST => Message::SyncRequest,
            Self::SYNC => Message::Sync(payload(envelope)?),
            Self::ACTION => Message::Action(envelope.data.clone()),
            Self::PATCH => Message::Patch(payload(envelope)?),
            Self::METHOD_CALL => Message::MethodCall(payload(envelope)?),
            Self::METHOD_RETURN => Message::MethodReturn(payload(envelope)?),
            Self::SET_APP_CODE => Message::SetAppCode(payload(envelope)?),
            other => return Err(DecodeError::UnknownMethod(other.to_string())),
        })
    }

    pub fn encode(&self, metadata: Option<Metadata>) -> Result<Envelope> {
        let data = match self {
            Message::SyncRequest => Value::Object(Default::default()),
            Message::Sync(p) => serde_json::to_value(p)?,
            Message::Action(a) => a.clone(),
            Message::Patch(p) => serde_json::to_value(p)?,
            Message::MethodCall(p) => serde_json::to_value(p)?,
            Message::MethodReturn(p) => serde_json::to_value(p)?,
            Message::SetAppCode(p) => serde_json::to_value(p)?,
        };
        Ok(Envelope {
            method: self.method().to_string(),
            data,
            metadata,
        })
    }
}

/// Facade for channel readers
pub fn envelope_from_json(s: &str) -> Result<Envelope> {
    serde_json::from_str(s).map_err(|e| e.into())
}

/// Facade for channel writers
pub fn envelope_to_json(e: &Envelope) -> Result<String> {
    serde_json::to_string(e).map_err(|e| e.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::Id;
    use crate::path;
    use serde_json::json;

    #[test]
    fn test_sync_request_encoding() {
        let e = Message::SyncRequest.encode(None).unwrap();
        assert_eq!(
            serde_json::to_value(&e).unwrap(),
            json!({"method": "sync_request", "data": {}})
        );
    }

    #[test]
    fn test_method_call_decoding() {
        let e = envelope_from_json(
            r#"{"method":"method_call","data":{"method_name":"ping","args":[1,"a"],"callback_id":"c1"}}"#,
        )
        .unwrap();
        match Message::decode(&e).unwrap() {
            Message::MethodCall(call) => {
                assert_eq!(call.method_name, "ping");
                assert_eq!(call.args, vec![json!(1), json!("a")]);
                assert_eq!(call.callback_id, Some(Id::from_string("c1".to_string())));
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_patch_decoding() {
        let e = envelope_from_json(
            r#"{"method":"patch","data":{"patches":[{"op":"replace","path":["count"],"value":1}]},"metadata":{"exceptId":"s1"}}"#,
        )
        .unwrap();
        assert_eq!(
            Message::decode(&e).unwrap(),
            Message::Patch(PatchPayload {
                patches: vec![Patch::replace(path!["count"], json!(1))]
            })
        );
        assert!(e.is_echo_for(&Id::from_string("s1".to_string())));
        assert!(!e.is_echo_for(&Id::from_string("s2".to_string())));
    }

    #[test]
    fn test_unknown_method() {
        let e = envelope_from_json(r#"{"method":"frobnicate","data":{}}"#).unwrap();
        assert!(matches!(
            Message::decode(&e),
            Err(DecodeError::UnknownMethod(m)) if m == "frobnicate"
        ));
    }

    #[test]
    fn test_malformed_payload() {
        let e = envelope_from_json(r#"{"method":"sync","data":{"nope":1}}"#).unwrap();
        assert!(matches!(
            Message::decode(&e),
            Err(DecodeError::Payload { method, .. }) if method == "sync"
        ));
    }

    #[test]
    fn test_origin_metadata() {
        let id: SessionId = Id::from_string("me".to_string());
        let e = Message::Patch(PatchPayload { patches: vec![] })
            .encode(Some(Metadata::origin(&id)))
            .unwrap();
        let s = envelope_to_json(&e).unwrap();
        let v: Value = serde_json::from_str(&s).unwrap();
        assert_eq!(v["metadata"], json!({"exceptId": "me", "id": "me"}));
        assert!(e.is_echo_for(&id));
    }
}
