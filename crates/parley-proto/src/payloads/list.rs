//! Conversation list payloads (`admin_get_chats`, `chat_list`,
//! `update_chat_list`).

use serde::{Deserialize, Serialize};

use super::chat::WireTime;

/// `admin_get_chats` request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatListRequest {
    /// Operator id, if the deployment needs it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_id: Option<String>,
}

/// Counterpart profile embedded in a list entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireUser {
    /// User id. Doubles as the conversation id.
    #[serde(rename = "_id")]
    pub id: String,
    /// Given name.
    #[serde(default)]
    pub first_name: String,
    /// Family name.
    #[serde(default)]
    pub last_name: String,
    /// Contact email.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl WireUser {
    /// "First Last", trimmed. Falls back to the id when both are empty.
    pub fn display_name(&self) -> String {
        let name = format!("{} {}", self.first_name, self.last_name);
        let name = name.trim();
        if name.is_empty() { self.id.clone() } else { name.to_string() }
    }
}

/// One row of the server's conversation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatListEntry {
    /// Server chat document id.
    #[serde(rename = "_id")]
    pub id: String,
    /// Counterpart.
    pub user: WireUser,
    /// Preview of the latest message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    /// Time of the latest message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<WireTime>,
    /// Messages the operator has not read.
    #[serde(default)]
    pub unread_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_server_list_row() {
        let entry: ChatListEntry = serde_json::from_str(
            r#"{
                "_id": "chat1",
                "user": {"_id": "u1", "firstName": "Ada", "lastName": "Lovelace", "email": "ada@example.com"},
                "lastMessage": "hello",
                "lastMessageAt": "2024-05-01T10:00:00.000Z",
                "unreadCount": 3
            }"#,
        )
        .unwrap();

        assert_eq!(entry.user.display_name(), "Ada Lovelace");
        assert_eq!(entry.unread_count, 3);
        assert_eq!(entry.last_message_at.unwrap().to_millis().unwrap(), 1_714_557_600_000);
    }

    #[test]
    fn display_name_falls_back_to_id() {
        let user = WireUser {
            id: "u9".to_string(),
            first_name: String::new(),
            last_name: String::new(),
            email: None,
        };
        assert_eq!(user.display_name(), "u9");
    }
}
