use std::net::SocketAddr;
use std::time::Duration;

/// Client nonce used for digest responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cnonce {
    /// Same value for every challenge.
    Fixed(String),
    /// Fresh random value per challenge (RFC 2617 behaviour).
    Random,
}

impl Default for Cnonce {
    fn default() -> Self {
        Cnonce::Fixed(DEFAULT_CNONCE.to_string())
    }
}

pub const DEFAULT_CNONCE: &str = "4uKBAw6V0O358p0K1Kf0UnMJGuppcwLd";
pub const DEFAULT_ALLOW: &str =
    "PRACK, INVITE, ACK, BYE, CANCEL, UPDATE, INFO, SUBSCRIBE, NOTIFY, REFER, MESSAGE, OPTIONS";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Registrar / PBX domain, also used as the request host.
    pub domain: String,
    pub username: String,
    /// Empty disables digest retries.
    pub password: String,
    /// User part called by `invite`.
    pub target: String,
    pub registrar_port: u16,
    pub bind: SocketAddr,
    /// Address written into Via/Contact. Derived from the socket when `None`.
    pub advertised: Option<SocketAddr>,
    pub max_forwards: u32,
    pub allow: String,
    pub cnonce: Cnonce,
    /// Port announced in the SDP offer. Nothing listens on it.
    pub rtp_port: u16,
    /// Upper bound for a foreground wait on a state transition.
    pub response_timeout: Duration,
    /// Receive timeout of the background loop; bounds how fast it sees a close.
    pub socket_timeout: Duration,
    /// Upper bound for joining the receive loop on close.
    pub join_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            domain: "un100".into(),
            username: "6001".into(),
            password: String::new(),
            target: "6002".into(),
            registrar_port: 5060,
            bind: SocketAddr::from(([0, 0, 0, 0], 0)),
            advertised: None,
            max_forwards: 70,
            allow: DEFAULT_ALLOW.into(),
            cnonce: Cnonce::default(),
            rtp_port: 4000,
            // 10 x 200ms
            response_timeout: Duration::from_millis(2000),
            socket_timeout: Duration::from_millis(100),
            join_timeout: Duration::from_secs(1),
        }
    }
}

impl ClientConfig {
    pub fn new(domain: &str, username: &str, password: &str) -> Self {
        Self {
            domain: domain.into(),
            username: username.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    /// `sip:<username>@<domain>`
    pub fn address_of_record(&self) -> String {
        format!("sip:{}@{}", self.username, self.domain)
    }

    pub fn registrar_uri(&self) -> String {
        format!("sip:{}", self.domain)
    }

    pub fn target_uri(&self) -> String {
        format!("sip:{}@{}", self.target, self.domain)
    }
}
