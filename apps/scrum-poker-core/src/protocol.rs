//! Wire shapes of the frames exchanged over a session channel. Every frame is
//! a JSON object tagged by its `type` field.

use serde::{Deserialize, Serialize};

use crate::model::{ClientId, Member, Vote};

/// Frames a client sends to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename_all = "camelCase")]
    Identify { client_id: ClientId },
    UpdateData(MemberUpdate),
    SetOptions { raw: String },
    ClearVotes,
    ShowVotes,
}

/// Partial member update; absent fields are left untouched by the server.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote: Option<Vote>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

impl MemberUpdate {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.vote.is_none() && self.active.is_none()
    }
}

/// Frames the server sends to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// First frame on every connection; the server now expects `Identify`.
    Welcome,
    StateUpdate(StateUpdateFrame),
}

/// Full session state addressed to one recipient. The top-level
/// `displayName`/`vote`/`active` describe the recipient's own member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUpdateFrame {
    pub display_name: String,
    pub vote: Vote,
    pub votes_visible: bool,
    pub active: bool,
    pub vote_options: String,
    pub members: Vec<Member>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test_timeout::timeout]
    fn client_frames_carry_type_tags() {
        let identify = ClientFrame::Identify {
            client_id: ClientId::from("c1"),
        };
        assert_eq!(
            serde_json::to_value(&identify).expect("identify"),
            json!({ "type": "Identify", "clientId": "c1" })
        );

        let update = ClientFrame::UpdateData(MemberUpdate {
            display_name: Some("Ann".into()),
            vote: None,
            active: Some(true),
        });
        assert_eq!(
            serde_json::to_value(&update).expect("update"),
            json!({ "type": "UpdateData", "displayName": "Ann", "active": true })
        );

        assert_eq!(
            serde_json::to_value(&ClientFrame::ShowVotes).expect("show"),
            json!({ "type": "ShowVotes" })
        );
    }

    #[test_timeout::timeout]
    fn welcome_parses_from_bare_tag() {
        let frame: ServerFrame =
            serde_json::from_str(r#"{"type":"Welcome"}"#).expect("welcome");
        assert_eq!(frame, ServerFrame::Welcome);
    }
}
