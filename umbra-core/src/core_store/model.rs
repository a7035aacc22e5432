/*
    model.rs - Records stored in the node's logs

    All records travel as camelCase JSON inside log entries so they stay
    readable by the front layer without a second mapping.
*/

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Entry of the public channel directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRecord {
    pub address: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub keys: BTreeMap<String, String>,
}

impl ChannelRecord {
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
            description: String::new(),
            owner: String::new(),
            timestamp: 0,
            keys: BTreeMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Message appended to a `channels.<address>` log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: u32,
    pub message: String,
    pub created_at: u64,
    #[serde(default)]
    pub channel_address: String,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub pub_key: String,
}

/// Entry of the `msg-threads` directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    pub address: String,
    pub encrypted_phrase: String,
}

/// Entry of the `dms` directory: a user reachable by direct message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectMessageUser {
    pub public_key: String,
    pub half_key: String,
}

/// Payload appended to a `dms.<address>` log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectMessagePayload {
    pub payload: String,
}

/// Direct message as pushed to consumers; `id` is the entry hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectMessage {
    pub id: String,
    pub payload: String,
}

/// Accepted certificate, `sequence` is its position in the certificates log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateEntry {
    pub pem: String,
    pub sequence: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_message_wire_names() {
        let message = ChannelMessage {
            id: "m1".to_string(),
            message_type: 1,
            message: "hello".to_string(),
            created_at: 1_700_000_000,
            channel_address: "general".to_string(),
            signature: "sig".to_string(),
            pub_key: "key".to_string(),
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], 1);
        assert_eq!(json["createdAt"], 1_700_000_000u64);
        assert_eq!(json["channelAddress"], "general");
        assert_eq!(json["pubKey"], "key");
    }

    #[test]
    fn test_channel_record_defaults() {
        let record: ChannelRecord =
            serde_json::from_str(r#"{"address":"general","name":"general"}"#).unwrap();
        assert_eq!(record, ChannelRecord::new("general", "general"));
    }
}
