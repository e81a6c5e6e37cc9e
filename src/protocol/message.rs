//! Protocol messages for chatlink communication.
//!
//! Every decoded frame is a JSON object carrying a tag (`code`, or `opCode`
//! from older servers) plus payload-specific fields. The tag selects the
//! [`OpCode`]; the remaining fields are opaque to the transport.

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};

use crate::error::{ChatLinkError, Result};

/// Primary tag field
pub const CODE_FIELD: &str = "code";

/// Alternate tag field accepted on inbound frames
pub const ALT_CODE_FIELD: &str = "opCode";

/// Who sends a given opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Server to client only
    ServerToClient,
    /// Client to server only
    ClientToServer,
    /// Request/answer pairs that share a flow
    Both,
}

/// Message kinds exchanged with the server.
///
/// The numeric values are the wire encoding and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum OpCode {
    /// Server delivers its RSA public key
    ReceiveRsa = 0,
    /// Client delivers the RSA-wrapped session key
    SendAes = 1,
    /// Server holds the session key; handshake complete
    ServerReadyToReceive = 2,
    /// Account creation request
    RequestCreateAccount = 3,
    /// Account creation answer
    AnswerCreateAccount = 4,
    /// Login request
    RequestLogin = 5,
    /// Login answer
    AnswerLogin = 6,
    /// Second-factor verification step
    VerificationProcess = 7,
    /// Second-factor verification failed
    VerificationWentWrong = 8,
    /// Token-based silent login request
    AutoLoginRequest = 9,
    /// Token-based silent login answer
    AutoLoginResponse = 10,
    /// Friend/block/pending state change
    UpdateRelationship = 11,
}

impl OpCode {
    /// Every opcode in wire order
    pub const ALL: [OpCode; 12] = [
        OpCode::ReceiveRsa,
        OpCode::SendAes,
        OpCode::ServerReadyToReceive,
        OpCode::RequestCreateAccount,
        OpCode::AnswerCreateAccount,
        OpCode::RequestLogin,
        OpCode::AnswerLogin,
        OpCode::VerificationProcess,
        OpCode::VerificationWentWrong,
        OpCode::AutoLoginRequest,
        OpCode::AutoLoginResponse,
        OpCode::UpdateRelationship,
    ];

    /// Wire value
    pub fn value(self) -> u8 {
        self as u8
    }

    /// Look up by wire value
    pub fn from_value(value: u64) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| u64::from(op.value()) == value)
    }

    /// Wire name
    pub fn name(&self) -> &'static str {
        match self {
            OpCode::ReceiveRsa => "ReceiveRSA",
            OpCode::SendAes => "SendAes",
            OpCode::ServerReadyToReceive => "ServerReadyToReceive",
            OpCode::RequestCreateAccount => "RequestCreateAccount",
            OpCode::AnswerCreateAccount => "AnswerCreateAccount",
            OpCode::RequestLogin => "RequestLogin",
            OpCode::AnswerLogin => "AnswerLogin",
            OpCode::VerificationProcess => "VerificationProcess",
            OpCode::VerificationWentWrong => "VerificationWentWrong",
            OpCode::AutoLoginRequest => "AutoLoginRequest",
            OpCode::AutoLoginResponse => "AutoLoginResponse",
            OpCode::UpdateRelationship => "UpdateRelationship",
        }
    }

    /// Look up by wire name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|op| op.name().eq_ignore_ascii_case(name))
    }

    /// Handshake messages must be handled before the next frame is read
    pub fn is_handshake(&self) -> bool {
        matches!(self, OpCode::ReceiveRsa | OpCode::ServerReadyToReceive)
    }

    /// Who sends this opcode
    pub fn direction(&self) -> Direction {
        match self {
            OpCode::ReceiveRsa | OpCode::ServerReadyToReceive => Direction::ServerToClient,
            OpCode::SendAes | OpCode::UpdateRelationship => Direction::ClientToServer,
            _ => Direction::Both,
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for OpCode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        s.parse::<u64>()
            .ok()
            .and_then(Self::from_value)
            .or_else(|| Self::from_name(s))
            .ok_or_else(|| format!("Unknown opcode: {s}"))
    }
}

/// Decoded logical message: opcode plus opaque payload fields
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    op_code: OpCode,
    fields: Map<String, Value>,
}

/// Result of reading an inbound frame as an envelope
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Recognized opcode
    Envelope(Envelope),
    /// Tag missing or not a known opcode; carries the raw tag
    Unrecognized(Value),
}

impl Envelope {
    /// Create an envelope with no payload fields
    pub fn new(op_code: OpCode) -> Self {
        Self {
            op_code,
            fields: Map::new(),
        }
    }

    /// Add a payload field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Set a payload field; tag fields are reserved and ignored
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        if key == CODE_FIELD || key == ALT_CODE_FIELD {
            return;
        }
        self.fields.insert(key, value.into());
    }

    /// Opcode
    pub fn op_code(&self) -> OpCode {
        self.op_code
    }

    /// Look up a payload field
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// All payload fields
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Take the payload fields
    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    /// JSON document with the numeric `code` tag
    pub fn to_json(&self) -> Value {
        let mut object = self.fields.clone();
        object.insert(CODE_FIELD.to_string(), Value::from(self.op_code.value()));
        Value::Object(object)
    }

    /// Serialized wire payload
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.to_json())?)
    }

    /// Build from a JSON document (used for envelopes supplied by callers)
    pub fn from_json(value: Value) -> Result<Self> {
        match Self::classify(value)? {
            Inbound::Envelope(envelope) => Ok(envelope),
            Inbound::Unrecognized(tag) => Err(ChatLinkError::Protocol(format!(
                "Unknown opcode: {tag}"
            ))),
        }
    }

    /// Parse decoded frame bytes.
    ///
    /// Malformed JSON or a non-object document is an error; an unknown or
    /// missing tag is reported as [`Inbound::Unrecognized`].
    pub fn parse(bytes: &[u8]) -> Result<Inbound> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| ChatLinkError::Decode(format!("invalid JSON: {e}")))?;
        Self::classify(value)
    }

    fn classify(value: Value) -> Result<Inbound> {
        let Value::Object(mut fields) = value else {
            return Err(ChatLinkError::Decode(
                "frame is not a JSON object".to_string(),
            ));
        };

        let tag = fields
            .remove(CODE_FIELD)
            .or_else(|| fields.remove(ALT_CODE_FIELD))
            .unwrap_or(Value::Null);
        fields.remove(ALT_CODE_FIELD);

        let op_code = match &tag {
            Value::Number(n) => n.as_u64().and_then(OpCode::from_value),
            Value::String(s) => s.parse::<OpCode>().ok(),
            _ => None,
        };

        Ok(match op_code {
            Some(op_code) => Inbound::Envelope(Self { op_code, fields }),
            None => Inbound::Unrecognized(tag),
        })
    }
}
