//! Frame types for the Beacon protocol.
//!
//! Frames are the fundamental unit of communication in Beacon.
//! Each frame is serialized as one JSON object per line.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reply route naming the broker itself rather than a remote session.
pub const SELF_ROUTE: &str = "self";

/// Command selecting the semantics of a frame.
///
/// The wire vocabulary is closed, but unrecognized commands still decode into
/// [`Command::Unknown`] so that the dispatcher can ignore them instead of
/// dropping the connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Command {
    /// Credential exchange, first frame of a connection.
    Auth,
    /// Connection accepted; payload carries the session id.
    Connected,
    /// Registration acknowledgment.
    Ok,
    /// Credentials rejected.
    AuthFailed,
    /// Subscribe to a (possibly wildcard) topic pattern.
    Subscribe,
    /// Register as the service handler of a topic.
    Service,
    /// Publish to a topic.
    Publish,
    /// Request addressed to a service.
    Request,
    /// Response to a request.
    Response,
    /// Keepalive ping.
    Ping,
    /// Keepalive pong.
    Pong,
    /// Read a key.
    Get,
    /// Write a key.
    Set,
    /// Delete a key.
    Del,
    /// Create a bucket.
    BucketAdd,
    /// Delete a bucket.
    BucketDel,
    /// Filter a bucket by key prefix.
    BucketFilterKey,
    /// Filter a bucket by value prefix.
    BucketFilterValue,
    /// Create a collection, optionally with an index.
    DbCreate,
    /// Drop a collection and its indexes.
    DbDrop,
    /// Insert a document.
    DbInsert,
    /// Fetch one document by id.
    DbGet,
    /// Remove one document by id.
    DbRemove,
    /// Query documents with a predicate.
    DbFind,
    /// Update a document.
    DbUpdate,
    /// List every document of a collection.
    DbList,
    /// Anything outside the vocabulary.
    Unknown(String),
}

impl Command {
    /// The case-sensitive wire spelling.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Command::Auth => "AUTH",
            Command::Connected => "CNN",
            Command::Ok => "OK",
            Command::AuthFailed => "ER_AUTH_FAILED",
            Command::Subscribe => "SUB",
            Command::Service => "SER",
            Command::Publish => "PUB",
            Command::Request => "REQ",
            Command::Response => "RES",
            Command::Ping => "PING",
            Command::Pong => "PONG",
            Command::Get => "GET",
            Command::Set => "SET",
            Command::Del => "DEL",
            Command::BucketAdd => "BADD",
            Command::BucketDel => "BDEL",
            Command::BucketFilterKey => "BFK",
            Command::BucketFilterValue => "BFV",
            Command::DbCreate => "DB_CC",
            Command::DbDrop => "DB_CD",
            Command::DbInsert => "DB_CI",
            Command::DbGet => "DB_CG",
            Command::DbRemove => "DB_CR",
            Command::DbFind => "DB_CF",
            Command::DbUpdate => "DB_CU",
            Command::DbList => "DB_CL",
            Command::Unknown(other) => other,
        }
    }

    /// Whether this command is a key/value or bucket operation.
    #[must_use]
    pub fn is_kv(&self) -> bool {
        matches!(
            self,
            Command::Get
                | Command::Set
                | Command::Del
                | Command::BucketAdd
                | Command::BucketDel
                | Command::BucketFilterKey
                | Command::BucketFilterValue
        )
    }

    /// Whether this command is a document store operation.
    #[must_use]
    pub fn is_document(&self) -> bool {
        matches!(
            self,
            Command::DbCreate
                | Command::DbDrop
                | Command::DbInsert
                | Command::DbGet
                | Command::DbRemove
                | Command::DbFind
                | Command::DbUpdate
                | Command::DbList
        )
    }
}

impl From<&str> for Command {
    fn from(value: &str) -> Self {
        match value {
            "AUTH" => Command::Auth,
            "CNN" => Command::Connected,
            "OK" => Command::Ok,
            "ER_AUTH_FAILED" => Command::AuthFailed,
            "SUB" => Command::Subscribe,
            "SER" => Command::Service,
            "PUB" => Command::Publish,
            "REQ" => Command::Request,
            "RES" => Command::Response,
            "PING" => Command::Ping,
            "PONG" => Command::Pong,
            "GET" => Command::Get,
            "SET" => Command::Set,
            "DEL" => Command::Del,
            "BADD" => Command::BucketAdd,
            "BDEL" => Command::BucketDel,
            "BFK" => Command::BucketFilterKey,
            "BFV" => Command::BucketFilterValue,
            "DB_CC" => Command::DbCreate,
            "DB_CD" => Command::DbDrop,
            "DB_CI" => Command::DbInsert,
            "DB_CG" => Command::DbGet,
            "DB_CR" => Command::DbRemove,
            "DB_CF" => Command::DbFind,
            "DB_CU" => Command::DbUpdate,
            "DB_CL" => Command::DbList,
            other => Command::Unknown(other.to_string()),
        }
    }
}

impl From<String> for Command {
    fn from(value: String) -> Self {
        match Command::from(value.as_str()) {
            Command::Unknown(_) => Command::Unknown(value),
            known => known,
        }
    }
}

impl From<Command> for String {
    fn from(cmd: Command) -> String {
        match cmd {
            Command::Unknown(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol frame.
///
/// Every frame carries the same flat set of fields; `command` decides which
/// of them are meaningful. Absent fields decode as empty strings and empty
/// fields are omitted on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    /// Frame semantics.
    pub command: Command,
    /// Addressed subject.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub topic: String,
    /// Opaque payload.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub payload: String,
    /// Pairs a request with its response.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub correlation_id: String,
    /// Session (or [`SELF_ROUTE`]) that must receive the response.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reply_route: String,
    /// Subscribed pattern that matched a publish.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub topic_pattern: String,
    /// Error text; empty on success.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    /// Session that originated the frame.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub origin_id: String,
}

impl Frame {
    /// Create an empty frame for a command.
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            command,
            topic: String::new(),
            payload: String::new(),
            correlation_id: String::new(),
            reply_route: String::new(),
            topic_pattern: String::new(),
            error: String::new(),
            origin_id: String::new(),
        }
    }

    /// Set the topic.
    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Set the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Set the correlation id.
    #[must_use]
    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// Set the reply route.
    #[must_use]
    pub fn with_reply_route(mut self, route: impl Into<String>) -> Self {
        self.reply_route = route.into();
        self
    }

    /// Set the matched topic pattern.
    #[must_use]
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.topic_pattern = pattern.into();
        self
    }

    /// Set the error text.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = error.into();
        self
    }

    /// Set the origin session.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin_id = origin.into();
        self
    }

    /// Whether the frame reports an error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }

    /// Create an AUTH frame.
    #[must_use]
    pub fn auth(
        username: impl Into<String>,
        password: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Frame::new(Command::Auth)
            .with_topic(username)
            .with_payload(password)
            .with_correlation(correlation_id)
    }

    /// Create the CNN frame that promotes a connection to a session.
    #[must_use]
    pub fn connected(correlation_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Frame::new(Command::Connected)
            .with_correlation(correlation_id)
            .with_payload(session_id)
    }

    /// Create an ER_AUTH_FAILED frame.
    #[must_use]
    pub fn auth_failed(correlation_id: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Frame::new(Command::AuthFailed)
            .with_correlation(correlation_id)
            .with_payload(message.clone())
            .with_error(message)
    }

    /// Create a SUB frame.
    #[must_use]
    pub fn subscribe(pattern: impl Into<String>) -> Self {
        Frame::new(Command::Subscribe).with_topic(pattern)
    }

    /// Create a SER frame.
    #[must_use]
    pub fn service(topic: impl Into<String>) -> Self {
        Frame::new(Command::Service).with_topic(topic)
    }

    /// Create an OK acknowledgment for a topic.
    #[must_use]
    pub fn ok(topic: impl Into<String>) -> Self {
        Frame::new(Command::Ok).with_topic(topic)
    }

    /// Create a PUB frame.
    #[must_use]
    pub fn publish(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Frame::new(Command::Publish)
            .with_topic(topic)
            .with_payload(payload)
    }

    /// Create a REQ frame.
    #[must_use]
    pub fn request(
        topic: impl Into<String>,
        payload: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Frame::new(Command::Request)
            .with_topic(topic)
            .with_payload(payload)
            .with_correlation(correlation_id)
    }

    /// Create a RES frame answering `request`.
    #[must_use]
    pub fn response_to(
        request: &Frame,
        payload: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Frame::new(Command::Response)
            .with_topic(request.topic.clone())
            .with_correlation(request.correlation_id.clone())
            .with_reply_route(request.reply_route.clone())
            .with_payload(payload)
            .with_error(error)
    }

    /// Create a PING frame.
    #[must_use]
    pub fn ping(correlation_id: impl Into<String>) -> Self {
        Frame::new(Command::Ping).with_correlation(correlation_id)
    }

    /// Create the PONG answering `ping`.
    #[must_use]
    pub fn pong(ping: &Frame) -> Self {
        Frame::new(Command::Pong)
            .with_correlation(ping.correlation_id.clone())
            .with_topic(ping.topic.clone())
            .with_payload("PONG")
    }

    /// Create the reply to a storage command: same command, topic and
    /// correlation id, addressed back to `session`.
    #[must_use]
    pub fn reply(request: &Frame, session: impl Into<String>) -> Self {
        Frame::new(request.command.clone())
            .with_topic(request.topic.clone())
            .with_correlation(request.correlation_id.clone())
            .with_reply_route(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_names() {
        assert_eq!(Command::from("DB_CF"), Command::DbFind);
        assert_eq!(Command::AuthFailed.as_str(), "ER_AUTH_FAILED");
        assert_eq!(Command::Connected.to_string(), "CNN");
        assert!(Command::BucketFilterValue.is_kv());
        assert!(Command::DbList.is_document());
        assert!(!Command::Publish.is_kv());
    }

    #[test]
    fn test_command_is_case_sensitive() {
        assert_eq!(Command::from("sub"), Command::Unknown("sub".to_string()));
        assert_eq!(String::from(Command::from("S_RUN")), "S_RUN");
    }

    #[test]
    fn test_response_to_request() {
        let req = Frame::request("math.add", "[1,2]", "c-1").with_reply_route("sess-a");
        let res = Frame::response_to(&req, "3", "");

        assert_eq!(res.command, Command::Response);
        assert_eq!(res.topic, "math.add");
        assert_eq!(res.correlation_id, "c-1");
        assert_eq!(res.reply_route, "sess-a");
        assert!(!res.is_error());
    }

    #[test]
    fn test_pong_echoes_ping() {
        let ping = Frame::ping("p-9");
        let pong = Frame::pong(&ping);
        assert_eq!(pong.command, Command::Pong);
        assert_eq!(pong.correlation_id, "p-9");
    }
}
