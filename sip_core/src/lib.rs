//! SIP user-agent core: header and message model, digest authentication,
//! transaction/dialog bookkeeping, the client state machine and the UDP
//! channel that feeds it.

use std::time::Duration;

use thiserror::Error;

pub mod auth;
pub mod builder;
pub mod client;
pub mod config;
pub mod context;
pub mod dialog;
pub mod header;
pub mod message;
pub mod stack;
pub mod transaction;
pub mod transport;

pub use auth::{digest_response, Authenticator, DigestCredentials};
pub use builder::RequestBuilder;
pub use client::{Call, Client, Registration};
pub use config::{ClientConfig, Cnonce};
pub use context::Context;
pub use dialog::Dialog;
pub use header::{Authorization, CSeq, Contact, Header, NameAddr, Via, WwwAuthenticate};
pub use message::{parse_message, Headers, Message, Method, Request, Response, Version};
pub use stack::{SipStack, Status};
pub use transaction::Transaction;
pub use transport::{Channel, ResponseHandler, Transport, UdpTransport};

/// Marker every generated Via branch starts with (RFC 3261 magic cookie).
pub const BRANCH_MAGIC: &str = "z9hG4bK";

#[derive(Debug, Error)]
pub enum SipError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("invalid {header} value: {value:?}")]
    Format { header: &'static str, value: String },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("authentication failed: {0}")]
    AuthChallenge(String),
    #[error("unexpected response: {status} {method}")]
    UnexpectedResponse { status: u16, method: Method },
    #[error("precondition failed: {0}")]
    Precondition(&'static str),
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("timed out after {elapsed:?} waiting for {target:?}")]
    Timeout { target: Status, elapsed: Duration },
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SipError>;
