//! Oracle wire format: JSON types exchanged between nodes.
//!
//! Two things travel between peers: work RPCs (`WorkRequest` out,
//! `WorkResponse` back) over a point-to-point stream, and `NodeData`
//! gossip on a pub/sub topic. The gossip record lives with the registry in
//! `oracle-services`; everything here is shared by both sides of an RPC.
//!
//! Field names are camelCase on the wire. Changing a name here breaks
//! interop with every deployed node.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ── Naming ────────────────────────────────────────────────────────────────────

/// Prefix shared by every protocol and topic name.
pub const MASA_PREFIX: &str = "/masa";

/// Protocol name for the work request/response stream.
pub const ORACLE_PROTOCOL: &str = "oracle_protocol";

/// Topic name for `NodeData` gossip.
pub const NODE_GOSSIP_TOPIC: &str = "gossip";

/// Protocol version advertised when the config does not override it.
pub const DEFAULT_VERSION: &str = "v0.0.4-beta";

/// Versioned protocol identifier, e.g. `/masa/oracle_protocol/v0.0.4-beta-test`.
pub fn protocol_id(name: &str, version: &str, environment: &str) -> String {
    if environment.is_empty() {
        format!("{MASA_PREFIX}/{name}/{version}")
    } else {
        format!("{MASA_PREFIX}/{name}/{version}-{environment}")
    }
}

/// Versioned topic name. Same scheme as [`protocol_id`].
pub fn topic_id(name: &str, version: &str, environment: &str) -> String {
    protocol_id(name, version, environment)
}

// ── Peer identity ─────────────────────────────────────────────────────────────

/// Stable peer identity, independent of network address.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading characters, for log fields.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(12)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ── Categories ────────────────────────────────────────────────────────────────

/// Work category: the capability bit and the dispatch routing key.
///
/// Closed and ordered. The discriminants are part of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum WorkerCategory {
    Twitter = 0,
    Web = 1,
    Discord = 2,
    Telegram = 3,
    Llm = 4,
}

impl WorkerCategory {
    pub const ALL: [WorkerCategory; 5] = [
        WorkerCategory::Twitter,
        WorkerCategory::Web,
        WorkerCategory::Discord,
        WorkerCategory::Telegram,
        WorkerCategory::Llm,
    ];
}

impl fmt::Display for WorkerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerCategory::Twitter => "Twitter",
            WorkerCategory::Web => "Web",
            WorkerCategory::Discord => "Discord",
            WorkerCategory::Telegram => "Telegram",
            WorkerCategory::Llm => "LLM",
        };
        f.write_str(s)
    }
}

impl TryFrom<u8> for WorkerCategory {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(WorkerCategory::Twitter),
            1 => Ok(WorkerCategory::Web),
            2 => Ok(WorkerCategory::Discord),
            3 => Ok(WorkerCategory::Telegram),
            4 => Ok(WorkerCategory::Llm),
            other => Err(WireError::UnknownCategory(other)),
        }
    }
}

impl From<WorkerCategory> for u8 {
    fn from(c: WorkerCategory) -> u8 {
        c as u8
    }
}

/// Capability flags a node advertises. Set once at startup from config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(rename = "isTwitterScraper", default)]
    pub twitter: bool,
    #[serde(rename = "isWebScraper", default)]
    pub web: bool,
    #[serde(rename = "isDiscordScraper", default)]
    pub discord: bool,
    #[serde(rename = "isTelegramScraper", default)]
    pub telegram: bool,
    #[serde(rename = "isLlmServer", default)]
    pub llm: bool,
}

impl Capabilities {
    pub fn supports(&self, category: WorkerCategory) -> bool {
        match category {
            WorkerCategory::Twitter => self.twitter,
            WorkerCategory::Web => self.web,
            WorkerCategory::Discord => self.discord,
            WorkerCategory::Telegram => self.telegram,
            WorkerCategory::Llm => self.llm,
        }
    }

    pub fn with(mut self, category: WorkerCategory) -> Self {
        match category {
            WorkerCategory::Twitter => self.twitter = true,
            WorkerCategory::Web => self.web = true,
            WorkerCategory::Discord => self.discord = true,
            WorkerCategory::Telegram => self.telegram = true,
            WorkerCategory::Llm => self.llm = true,
        }
        self
    }

    /// Enabled categories in protocol order.
    pub fn categories(&self) -> Vec<WorkerCategory> {
        WorkerCategory::ALL
            .into_iter()
            .filter(|c| self.supports(*c))
            .collect()
    }
}

// ── Work types ────────────────────────────────────────────────────────────────

/// Concrete kind of work. Selects the handler and, via [`WorkType::category`],
/// the capability a worker must advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkType {
    Discord,
    DiscordProfile,
    DiscordChannelMessages,
    DiscordSentiment,
    DiscordGuildChannels,
    DiscordUserGuilds,
    TelegramSentiment,
    TelegramChannelMessages,
    LlmChat,
    Twitter,
    TwitterFollowers,
    TwitterProfile,
    TwitterSentiment,
    TwitterTrends,
    Web,
    WebSentiment,
    Test,
}

impl WorkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkType::Discord => "discord",
            WorkType::DiscordProfile => "discord-profile",
            WorkType::DiscordChannelMessages => "discord-channel-messages",
            WorkType::DiscordSentiment => "discord-sentiment",
            WorkType::DiscordGuildChannels => "discord-guild-channels",
            WorkType::DiscordUserGuilds => "discord-user-guilds",
            WorkType::TelegramSentiment => "telegram-sentiment",
            WorkType::TelegramChannelMessages => "telegram-channel-messages",
            WorkType::LlmChat => "llm-chat",
            WorkType::Twitter => "twitter",
            WorkType::TwitterFollowers => "twitter-followers",
            WorkType::TwitterProfile => "twitter-profile",
            WorkType::TwitterSentiment => "twitter-sentiment",
            WorkType::TwitterTrends => "twitter-trends",
            WorkType::Web => "web",
            WorkType::WebSentiment => "web-sentiment",
            WorkType::Test => "test",
        }
    }

    /// The capability category this work requires. `Test` has none and can
    /// only ever run locally.
    pub fn category(&self) -> Option<WorkerCategory> {
        match self {
            WorkType::Discord
            | WorkType::DiscordProfile
            | WorkType::DiscordChannelMessages
            | WorkType::DiscordSentiment
            | WorkType::DiscordGuildChannels
            | WorkType::DiscordUserGuilds => Some(WorkerCategory::Discord),
            WorkType::TelegramSentiment | WorkType::TelegramChannelMessages => {
                Some(WorkerCategory::Telegram)
            }
            WorkType::Twitter
            | WorkType::TwitterFollowers
            | WorkType::TwitterProfile
            | WorkType::TwitterSentiment
            | WorkType::TwitterTrends => Some(WorkerCategory::Twitter),
            WorkType::Web | WorkType::WebSentiment => Some(WorkerCategory::Web),
            WorkType::LlmChat => Some(WorkerCategory::Llm),
            WorkType::Test => None,
        }
    }
}

impl fmt::Display for WorkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkType {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| WireError::UnknownWorkType(s.to_string()))
    }
}

// ── RPC messages ──────────────────────────────────────────────────────────────

/// One unit of work. `data` is opaque here and interpreted by the handler
/// (see [`WorkPayload::decode`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkRequest {
    pub work_type: WorkType,
    pub request_id: String,
    #[serde(with = "base64_bytes", default)]
    pub data: Vec<u8>,
}

impl WorkRequest {
    pub fn new(work_type: WorkType, request_id: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            work_type,
            request_id: request_id.into(),
            data,
        }
    }

    /// Build a request from a typed payload, deriving the request id.
    pub fn from_payload(payload: &WorkPayload, timestamp_ms: u64) -> Result<Self, WireError> {
        let work_type = payload.work_type();
        let data = payload.encode()?;
        let request_id = new_request_id(work_type, &data, timestamp_ms);
        Ok(Self {
            work_type,
            request_id,
            data,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        serde_json::to_vec(self).map_err(WireError::Encode)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, WireError> {
        serde_json::from_slice(bytes).map_err(WireError::Decode)
    }
}

/// Result of one unit of work. Empty `error` means success.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkResponse {
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_peer_id: Option<PeerId>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub record_count: u64,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

impl WorkResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            ..Self::default()
        }
    }

    pub fn with_record_count(mut self, count: u64) -> Self {
        self.record_count = count;
        self
    }

    pub fn is_success(&self) -> bool {
        self.error.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        serde_json::to_vec(self).map_err(WireError::Encode)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, WireError> {
        serde_json::from_slice(bytes).map_err(WireError::Decode)
    }
}

/// Request id: `hex(blake3(work_type || data || timestamp_le))`.
pub fn new_request_id(work_type: WorkType, data: &[u8], timestamp_ms: u64) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(work_type.as_str().as_bytes());
    hasher.update(data);
    hasher.update(&timestamp_ms.to_le_bytes());
    hex::encode(hasher.finalize().as_bytes())
}

// ── Typed payloads ────────────────────────────────────────────────────────────

/// A single chat turn for `llm-chat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwitterQuery {
    pub query: String,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwitterFollowers {
    pub username: String,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Username {
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebScrape {
    pub url: String,
    #[serde(default)]
    pub depth: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscordProfile {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscordChannelMessages {
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscordGuild {
    pub guild_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sentiment {
    pub model: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmChat {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestMessage {
    pub message: String,
}

/// Typed view of `WorkRequest.data`, one variant per payload shape.
///
/// The bytes carry only the argument object; the variant is chosen by the
/// request's `WorkType`, so the JSON itself is untagged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkPayload {
    TwitterQuery(TwitterQuery),
    TwitterFollowers(TwitterFollowers),
    TwitterProfile(Username),
    TwitterTrends,
    Web(WebScrape),
    DiscordProfile(DiscordProfile),
    DiscordChannelMessages(DiscordChannelMessages),
    DiscordGuildChannels(DiscordGuild),
    DiscordUserGuilds,
    TelegramChannelMessages(Username),
    /// `*-sentiment` work types share one shape.
    Sentiment(WorkType, Sentiment),
    LlmChat(LlmChat),
    Test(TestMessage),
}

impl WorkPayload {
    /// Decode the payload for `work_type`. Shape mismatches are errors.
    pub fn decode(work_type: WorkType, data: &[u8]) -> Result<Self, WireError> {
        fn parse<T: serde::de::DeserializeOwned>(
            work_type: WorkType,
            data: &[u8],
        ) -> Result<T, WireError> {
            serde_json::from_slice(data).map_err(|e| WireError::InvalidPayload {
                work_type,
                reason: e.to_string(),
            })
        }

        let payload = match work_type {
            WorkType::Twitter => WorkPayload::TwitterQuery(parse(work_type, data)?),
            WorkType::TwitterFollowers => WorkPayload::TwitterFollowers(parse(work_type, data)?),
            WorkType::TwitterProfile => WorkPayload::TwitterProfile(parse(work_type, data)?),
            WorkType::TwitterTrends => WorkPayload::TwitterTrends,
            WorkType::Web => WorkPayload::Web(parse(work_type, data)?),
            WorkType::Discord | WorkType::DiscordProfile => {
                WorkPayload::DiscordProfile(parse(work_type, data)?)
            }
            WorkType::DiscordChannelMessages => {
                WorkPayload::DiscordChannelMessages(parse(work_type, data)?)
            }
            WorkType::DiscordGuildChannels => {
                WorkPayload::DiscordGuildChannels(parse(work_type, data)?)
            }
            WorkType::DiscordUserGuilds => WorkPayload::DiscordUserGuilds,
            WorkType::TelegramChannelMessages => {
                WorkPayload::TelegramChannelMessages(parse(work_type, data)?)
            }
            WorkType::DiscordSentiment
            | WorkType::TelegramSentiment
            | WorkType::TwitterSentiment
            | WorkType::WebSentiment => WorkPayload::Sentiment(work_type, parse(work_type, data)?),
            WorkType::LlmChat => WorkPayload::LlmChat(parse(work_type, data)?),
            WorkType::Test => WorkPayload::Test(parse(work_type, data)?),
        };
        Ok(payload)
    }

    pub fn work_type(&self) -> WorkType {
        match self {
            WorkPayload::TwitterQuery(_) => WorkType::Twitter,
            WorkPayload::TwitterFollowers(_) => WorkType::TwitterFollowers,
            WorkPayload::TwitterProfile(_) => WorkType::TwitterProfile,
            WorkPayload::TwitterTrends => WorkType::TwitterTrends,
            WorkPayload::Web(_) => WorkType::Web,
            WorkPayload::DiscordProfile(_) => WorkType::DiscordProfile,
            WorkPayload::DiscordChannelMessages(_) => WorkType::DiscordChannelMessages,
            WorkPayload::DiscordGuildChannels(_) => WorkType::DiscordGuildChannels,
            WorkPayload::DiscordUserGuilds => WorkType::DiscordUserGuilds,
            WorkPayload::TelegramChannelMessages(_) => WorkType::TelegramChannelMessages,
            WorkPayload::Sentiment(t, _) => *t,
            WorkPayload::LlmChat(_) => WorkType::LlmChat,
            WorkPayload::Test(_) => WorkType::Test,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let value = match self {
            WorkPayload::TwitterQuery(p) => serde_json::to_vec(p),
            WorkPayload::TwitterFollowers(p) => serde_json::to_vec(p),
            WorkPayload::TwitterProfile(p) | WorkPayload::TelegramChannelMessages(p) => {
                serde_json::to_vec(p)
            }
            WorkPayload::TwitterTrends | WorkPayload::DiscordUserGuilds => {
                Ok(b"{}".to_vec())
            }
            WorkPayload::Web(p) => serde_json::to_vec(p),
            WorkPayload::DiscordProfile(p) => serde_json::to_vec(p),
            WorkPayload::DiscordChannelMessages(p) => serde_json::to_vec(p),
            WorkPayload::DiscordGuildChannels(p) => serde_json::to_vec(p),
            WorkPayload::Sentiment(_, p) => serde_json::to_vec(p),
            WorkPayload::LlmChat(p) => serde_json::to_vec(p),
            WorkPayload::Test(p) => serde_json::to_vec(p),
        };
        value.map_err(WireError::Encode)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("failed to encode: {0}")]
    Encode(serde_json::Error),
    #[error("failed to decode: {0}")]
    Decode(serde_json::Error),
    #[error("unknown work type: {0}")]
    UnknownWorkType(String),
    #[error("unknown worker category: {0}")]
    UnknownCategory(u8),
    #[error("invalid {work_type} payload: {reason}")]
    InvalidPayload { work_type: WorkType, reason: String },
}

// ── Serde helpers ─────────────────────────────────────────────────────────────

/// Byte slices as standard base64 strings in JSON.
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = Option::<String>::deserialize(deserializer)?;
        match s {
            Some(s) => STANDARD.decode(s).map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_request_roundtrip() {
        let req = WorkRequest::new(WorkType::Twitter, "req-1", br#"{"query":"rust","count":5}"#.to_vec());
        let bytes = req.to_bytes().unwrap();
        let back = WorkRequest::from_slice(&bytes).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn work_request_uses_camel_case_and_base64() {
        let req = WorkRequest::new(WorkType::TwitterProfile, "abc", b"hi".to_vec());
        let json: serde_json::Value = serde_json::from_slice(&req.to_bytes().unwrap()).unwrap();
        assert_eq!(json["workType"], "twitter-profile");
        assert_eq!(json["requestId"], "abc");
        assert_eq!(json["data"], "aGk=");
    }

    #[test]
    fn work_response_roundtrip() {
        let resp = WorkResponse {
            data: serde_json::json!({ "tweets": [1, 2, 3] }),
            error: String::new(),
            worker_peer_id: Some(PeerId::from("12D3KooWabc")),
            record_count: 3,
        };
        let back = WorkResponse::from_slice(&resp.to_bytes().unwrap()).unwrap();
        assert_eq!(back, resp);
    }

    #[test]
    fn empty_fields_are_omitted() {
        let resp = WorkResponse::ok(serde_json::json!("done"));
        let json = String::from_utf8(resp.to_bytes().unwrap()).unwrap();
        assert_eq!(json, r#"{"data":"done"}"#);
        assert!(resp.is_success());
        assert!(!WorkResponse::failed("boom").is_success());
    }

    #[test]
    fn category_mapping() {
        assert_eq!(WorkType::TwitterTrends.category(), Some(WorkerCategory::Twitter));
        assert_eq!(WorkType::DiscordUserGuilds.category(), Some(WorkerCategory::Discord));
        assert_eq!(WorkType::TelegramSentiment.category(), Some(WorkerCategory::Telegram));
        assert_eq!(WorkType::WebSentiment.category(), Some(WorkerCategory::Web));
        assert_eq!(WorkType::LlmChat.category(), Some(WorkerCategory::Llm));
        assert_eq!(WorkType::Test.category(), None);
    }

    #[test]
    fn category_discriminants_are_stable() {
        assert_eq!(u8::from(WorkerCategory::Twitter), 0);
        assert_eq!(u8::from(WorkerCategory::Web), 1);
        assert_eq!(u8::from(WorkerCategory::Discord), 2);
        assert_eq!(u8::from(WorkerCategory::Telegram), 3);
        assert!(WorkerCategory::try_from(9).is_err());
        assert_eq!(WorkerCategory::Discord.to_string(), "Discord");
    }

    #[test]
    fn work_type_parses_from_wire_name() {
        assert_eq!("llm-chat".parse::<WorkType>().unwrap(), WorkType::LlmChat);
        assert_eq!(
            "discord-channel-messages".parse::<WorkType>().unwrap(),
            WorkType::DiscordChannelMessages
        );
        assert!("myspace".parse::<WorkType>().is_err());
    }

    #[test]
    fn payload_decodes_by_work_type() {
        let p = WorkPayload::decode(WorkType::Twitter, br#"{"query":"$BTC","count":10}"#).unwrap();
        assert_eq!(
            p,
            WorkPayload::TwitterQuery(TwitterQuery {
                query: "$BTC".into(),
                count: 10
            })
        );
        assert_eq!(p.work_type(), WorkType::Twitter);
    }

    #[test]
    fn payload_shape_mismatch_is_an_error() {
        let err = WorkPayload::decode(WorkType::Twitter, br#"{"username":"x"}"#).unwrap_err();
        assert!(matches!(err, WireError::InvalidPayload { work_type: WorkType::Twitter, .. }));
    }

    #[test]
    fn sentiment_keeps_its_work_type() {
        let p = WorkPayload::decode(
            WorkType::WebSentiment,
            br#"{"model":"gpt-4","prompt":"summarise"}"#,
        )
        .unwrap();
        assert_eq!(p.work_type(), WorkType::WebSentiment);
    }

    #[test]
    fn request_from_payload_derives_stable_id() {
        let payload = WorkPayload::Test(TestMessage {
            message: "ping".into(),
        });
        let a = WorkRequest::from_payload(&payload, 42).unwrap();
        let b = WorkRequest::from_payload(&payload, 42).unwrap();
        let c = WorkRequest::from_payload(&payload, 43).unwrap();
        assert_eq!(a.request_id, b.request_id);
        assert_ne!(a.request_id, c.request_id);
        assert_eq!(a.request_id.len(), 64);
    }

    #[test]
    fn protocol_names_carry_version_and_environment() {
        assert_eq!(
            protocol_id(ORACLE_PROTOCOL, "v1", ""),
            "/masa/oracle_protocol/v1"
        );
        assert_eq!(
            topic_id(NODE_GOSSIP_TOPIC, "v1", "test"),
            "/masa/gossip/v1-test"
        );
    }

    #[test]
    fn capabilities_serialize_with_wire_names() {
        let caps = Capabilities::default().with(WorkerCategory::Twitter);
        let json = serde_json::to_value(caps).unwrap();
        assert_eq!(json["isTwitterScraper"], true);
        assert_eq!(json["isWebScraper"], false);
        assert_eq!(caps.categories(), vec![WorkerCategory::Twitter]);
    }
}
