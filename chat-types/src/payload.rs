//! Pipe-delimited payload records.
//!
//! Structured payloads are UTF-8 text with `|` separating fields. Nickname
//! lists are comma-separated.

use crate::{Pdu, PduType, PayloadError};

const FIELD_SEP: char = '|';
const LIST_SEP: char = ',';
const DELIVERY_SEP: &str = ": ";

/// Authentication request, `"name|secret"`.
///
/// Used by clients (CLIENT_CONNECT, name is the nickname) and by the
/// federation link (PEER_CONNECT, name is the server name).
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Nickname or server name.
    pub name: String,
    /// Shared secret.
    pub secret: String,
}

impl ConnectRequest {
    /// Create a request.
    pub fn new(name: &str, secret: &str) -> Self {
        Self {
            name: name.to_string(),
            secret: secret.to_string(),
        }
    }

    /// Parse `"name|secret"`. The secret is everything after the first `|`.
    pub fn parse(payload: &str) -> Result<Self, PayloadError> {
        let (name, secret) = payload
            .split_once(FIELD_SEP)
            .ok_or(PayloadError::Malformed {
                record: "connect",
                expected: "name|secret",
            })?;
        Ok(Self::new(name, secret))
    }

    /// Wire form.
    pub fn to_payload(&self) -> String {
        format!("{}{FIELD_SEP}{}", self.name, self.secret)
    }

    /// Build the PDU with the given connect code.
    pub fn to_pdu(&self, kind: PduType) -> Pdu {
        Pdu::text(kind, &self.to_payload())
    }
}

impl std::fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("name", &self.name)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Direct message, `"recipient|message|sender"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectMessage {
    /// Target nickname.
    pub recipient: String,
    /// Message text. May itself contain `|`.
    pub text: String,
    /// Originating nickname.
    pub sender: String,
}

impl DirectMessage {
    /// Create a message.
    pub fn new(recipient: &str, text: &str, sender: &str) -> Self {
        Self {
            recipient: recipient.to_string(),
            text: text.to_string(),
            sender: sender.to_string(),
        }
    }

    /// Parse `"recipient|message|sender"`.
    ///
    /// The recipient ends at the first `|` and the sender starts after the
    /// last one; everything in between is the message.
    pub fn parse(payload: &str) -> Result<Self, PayloadError> {
        let malformed = PayloadError::Malformed {
            record: "direct message",
            expected: "recipient|message|sender",
        };
        let (recipient, rest) = payload.split_once(FIELD_SEP).ok_or(malformed.clone())?;
        let (text, sender) = rest.rsplit_once(FIELD_SEP).ok_or(malformed)?;
        Ok(Self::new(recipient, text, sender))
    }

    /// Wire form, used both client→server and server→server.
    pub fn to_payload(&self) -> String {
        format!(
            "{}{FIELD_SEP}{}{FIELD_SEP}{}",
            self.recipient, self.text, self.sender
        )
    }

    /// DM PDU carrying this message.
    pub fn to_pdu(&self) -> Pdu {
        Pdu::text(PduType::DM, &self.to_payload())
    }

    /// The DATA delivery shown to the recipient.
    pub fn delivery(&self) -> Delivery {
        Delivery {
            sender: self.sender.clone(),
            text: self.text.clone(),
        }
    }
}

/// A message as rendered to its recipient, `"sender: message"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Originating nickname.
    pub sender: String,
    /// Message text.
    pub text: String,
}

impl Delivery {
    /// Parse `"sender: message"`, splitting at the first `": "`.
    pub fn parse(payload: &str) -> Option<Self> {
        let (sender, text) = payload.split_once(DELIVERY_SEP)?;
        if sender.is_empty() || sender.contains(FIELD_SEP) || sender.contains(LIST_SEP) {
            return None;
        }
        Some(Self {
            sender: sender.to_string(),
            text: text.to_string(),
        })
    }

    /// Wire form.
    pub fn to_payload(&self) -> String {
        format!("{}{DELIVERY_SEP}{}", self.sender, self.text)
    }

    /// DATA PDU carrying this delivery.
    pub fn to_pdu(&self) -> Pdu {
        Pdu::text(PduType::DATA, &self.to_payload())
    }
}

/// Join nickname groups with commas, skipping empty entries.
pub fn join_nicknames<I, S>(names: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .filter(|n| !n.as_ref().is_empty())
        .map(|n| n.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Split a comma-joined nickname list.
pub fn split_nicknames(list: &str) -> Vec<String> {
    list.split(LIST_SEP)
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect()
}
