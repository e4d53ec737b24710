//! Wire message envelopes exchanged with the server. serde's default
//! externally-tagged enum representation already produces the "exactly one
//! discriminator key" shape the protocol requires, so no custom tagging is
//! needed here — only field naming and the `SetLanguage`/`SetMeta`
//! compatibility shim (§9 open question b).
use crate::operation::Operation;
use serde::{Deserialize, Serialize};

pub type PeerId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Internal,
    Private,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub name: String,
    pub hue: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorData {
    pub cursors: Vec<u64>,
    pub selections: Vec<(u64, u64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationWithId {
    pub id: PeerId,
    pub operation: Operation,
}

/// Messages sent from this client to the server. Discriminator keys are
/// PascalCase, matching serde's default externally-tagged representation
/// for a derive-named enum variant (`Edit`, `SetMeta`, …) — the wire
/// contract this protocol actually speaks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    Edit {
        revision: u32,
        operation: Operation,
    },
    #[serde(alias = "SetLanguage")]
    SetMeta(SetMetaPayload),
    ClientInfo {
        name: String,
        hue: u16,
    },
    CursorData(CursorData),
}

/// `SetMeta`'s payload also accepts the bare-string `SetLanguage` shape on
/// deserialization (an older variant some servers in this family still
/// speak); on the wire out, this client always emits the richer `SetMeta`
/// object form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "SetMetaWire")]
pub struct SetMetaPayload {
    pub language: Option<String>,
    pub visibility: Option<Visibility>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum SetMetaWire {
    Language(String),
    Full {
        #[serde(default)]
        language: Option<String>,
        #[serde(default)]
        visibility: Option<Visibility>,
    },
}

impl From<SetMetaWire> for SetMetaPayload {
    fn from(wire: SetMetaWire) -> Self {
        match wire {
            SetMetaWire::Language(language) => Self {
                language: Some(language),
                visibility: None,
            },
            SetMetaWire::Full {
                language,
                visibility,
            } => Self {
                language,
                visibility,
            },
        }
    }
}

/// Messages received from the server. Discriminator keys are PascalCase,
/// same as [`ClientMessage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    Identity {
        id: PeerId,
        info: Option<UserInfo>,
    },
    History {
        start: u32,
        operations: Vec<OperationWithId>,
    },
    #[serde(alias = "Language")]
    Meta(MetaPayload),
    UserInfo {
        id: PeerId,
        user: UserInfo,
    },
    UserDisconnect {
        id: PeerId,
    },
    UserCursor {
        id: PeerId,
        data: CursorData,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "MetaWire")]
pub struct MetaPayload {
    pub language: String,
    pub visibility: Option<Visibility>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum MetaWire {
    Language(String),
    Full {
        language: String,
        #[serde(default)]
        visibility: Option<Visibility>,
    },
}

impl From<MetaWire> for MetaPayload {
    fn from(wire: MetaWire) -> Self {
        match wire {
            MetaWire::Language(language) => Self {
                language,
                visibility: None,
            },
            MetaWire::Full {
                language,
                visibility,
            } => Self {
                language,
                visibility,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn edit_envelope_has_single_discriminator() {
        let mut op = Operation::new();
        op.insert("hi");
        let msg = ClientMessage::Edit {
            revision: 0,
            operation: op,
        };
        let json = serde_json::to_value(&msg).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 1);
        assert!(obj.contains_key("Edit"));
    }

    #[test]
    fn history_round_trips() {
        let mut op = Operation::new();
        op.retain(1);
        op.insert("X");
        let msg = ServerMessage::History {
            start: 0,
            operations: vec![OperationWithId { id: 7, operation: op }],
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn set_language_shim_accepted() {
        let json = r#"{"SetLanguage":"rust"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::SetMeta(payload) => {
                assert_eq!(payload.language.as_deref(), Some("rust"));
                assert_eq!(payload.visibility, None);
            }
            other => panic!("expected SetMeta, got {other:?}"),
        }
    }

    #[test]
    fn set_meta_full_shape_accepted() {
        let json = r#"{"SetMeta":{"language":"rust","visibility":"private"}}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::SetMeta(payload) => {
                assert_eq!(payload.language.as_deref(), Some("rust"));
                assert_eq!(payload.visibility, Some(Visibility::Private));
            }
            other => panic!("expected SetMeta, got {other:?}"),
        }
    }

    #[test]
    fn language_shim_accepted_on_server_side() {
        let json = r#"{"Language":"python"}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        match msg {
            ServerMessage::Meta(payload) => {
                assert_eq!(payload.language, "python");
                assert_eq!(payload.visibility, None);
            }
            other => panic!("expected Meta, got {other:?}"),
        }
    }

    #[test]
    fn user_disconnect_round_trips() {
        let msg = ServerMessage::UserDisconnect { id: 3 };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"UserDisconnect":{"id":3}}"#);
    }
}
