//! Wire protocol at the message boundary.
//!
//! Requests and replies travel as length-delimited JSON frames. Each
//! message carries a numeric `type` tag from the closed [`MessageType`]
//! set; replies add an [`ErrorCode`] and the operation's result fields.

use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::errors::LicenceError;
use crate::server::manager::LicenceDetails;
use crate::server::store::ConnectionRow;

/// The type of message communicated between clients and the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum MessageType {
    /// A reply from the server to a client.
    Reply = 0,
    /// Take a seat for a product.
    TakeSeat = 1,
    /// Release a previously taken seat.
    ReleaseSeat = 2,
    /// Refresh a seat's update time.
    RefreshSeat = 3,
    /// Query the live connections for a product.
    QueryConnections = 4,
    /// Query the total number of seats for a product.
    NumberOfSeats = 5,
    /// Query the server version.
    ServerVersion = 6,
    /// Query the known products.
    QueryProducts = 7,
    /// Query the licence details for a product.
    QueryLicence = 8,
    /// Query the web dashboard address (empty when disabled).
    WebServerAddress = 9,
    /// Internal: signal the server to shut its sockets down.
    Kill = -1,
}

impl From<MessageType> for i32 {
    fn from(value: MessageType) -> Self {
        value as i32
    }
}

impl TryFrom<i32> for MessageType {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageType::Reply),
            1 => Ok(MessageType::TakeSeat),
            2 => Ok(MessageType::ReleaseSeat),
            3 => Ok(MessageType::RefreshSeat),
            4 => Ok(MessageType::QueryConnections),
            5 => Ok(MessageType::NumberOfSeats),
            6 => Ok(MessageType::ServerVersion),
            7 => Ok(MessageType::QueryProducts),
            8 => Ok(MessageType::QueryLicence),
            9 => Ok(MessageType::WebServerAddress),
            -1 => Ok(MessageType::Kill),
            other => Err(format!("unknown message type {other}")),
        }
    }
}

/// Error codes carried in replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum ErrorCode {
    NoError = 0,
    UnknownError = 1000,
    InvalidProduct = 1001,
}

impl From<ErrorCode> for i32 {
    fn from(value: ErrorCode) -> Self {
        value as i32
    }
}

impl TryFrom<i32> for ErrorCode {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ErrorCode::NoError),
            1000 => Ok(ErrorCode::UnknownError),
            1001 => Ok(ErrorCode::InvalidProduct),
            other => Err(format!("unknown error code {other}")),
        }
    }
}

impl From<&LicenceError> for ErrorCode {
    fn from(error: &LicenceError) -> Self {
        match error {
            LicenceError::InvalidProduct(_) => ErrorCode::InvalidProduct,
            _ => ErrorCode::UnknownError,
        }
    }
}

/// A client request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub product: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub ip: String,
}

impl Request {
    pub fn new(message_type: MessageType) -> Self {
        Self {
            message_type,
            product: String::new(),
            user: String::new(),
            host: String::new(),
            ip: String::new(),
        }
    }
}

/// A server reply. Only the fields relevant to the request are present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub error: ErrorCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seats: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub products: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connections: Option<Vec<ConnectionRow>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub licence: Option<LicenceDetails>,
}

impl Reply {
    pub fn ok() -> Self {
        Self {
            message_type: MessageType::Reply,
            error: ErrorCode::NoError,
            granted: None,
            seats: None,
            version: None,
            address: None,
            products: None,
            connections: None,
            licence: None,
        }
    }

    pub fn failure(code: ErrorCode) -> Self {
        Self {
            error: code,
            ..Self::ok()
        }
    }

    pub fn with_granted(mut self, granted: bool) -> Self {
        self.granted = Some(granted);
        self
    }

    pub fn with_seats(mut self, seats: i64) -> Self {
        self.seats = Some(seats);
        self
    }

    pub fn with_version(mut self, version: String) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_address(mut self, address: String) -> Self {
        self.address = Some(address);
        self
    }

    pub fn with_products(mut self, products: Vec<String>) -> Self {
        self.products = Some(products);
        self
    }

    pub fn with_connections(mut self, connections: Vec<ConnectionRow>) -> Self {
        self.connections = Some(connections);
        self
    }

    pub fn with_licence(mut self, licence: LicenceDetails) -> Self {
        self.licence = Some(licence);
        self
    }
}

/// A framed message stream over TCP.
pub type MessageFrames = Framed<TcpStream, LengthDelimitedCodec>;

/// Wrap a TCP stream in the length-delimited framing used by the protocol.
pub fn message_frames(stream: TcpStream) -> MessageFrames {
    Framed::new(stream, LengthDelimitedCodec::new())
}
