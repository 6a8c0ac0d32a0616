use core::fmt;

use crate::{message::Method, Result, SipError, BRANCH_MAGIC};

pub const MAX_FORWARDS: &str = "Max-Forwards";
pub const CONTENT_LENGTH: &str = "Content-Length";
pub const EXPIRES: &str = "Expires";
pub const FROM: &str = "From";
pub const TO: &str = "To";
pub const CONTACT: &str = "Contact";
pub const CALL_ID: &str = "Call-ID";
pub const CSEQ: &str = "CSeq";
pub const VIA: &str = "Via";
pub const WWW_AUTHENTICATE: &str = "WWW-Authenticate";
pub const AUTHORIZATION: &str = "Authorization";

/// A single SIP header field.
///
/// Only the headers this client emits or reacts to are typed; everything
/// else is carried verbatim in [`Header::General`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Header {
    MaxForwards(u32),
    ContentLength(u32),
    Expires(u32),
    From(NameAddr),
    To(NameAddr),
    Contact(Contact),
    CallId(String),
    CSeq(CSeq),
    Via(Via),
    WwwAuthenticate(WwwAuthenticate),
    Authorization(Authorization),
    General { name: String, value: String },
}

/// `"display" <uri>;tag=...` as used by From and To.
///
/// From always carries a tag; To only once the remote side assigned one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameAddr {
    pub uri: String,
    pub display_name: Option<String>,
    pub tag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub uri: String,
    pub display_name: Option<String>,
    /// `;expires=` parameter granted by a registrar.
    pub expires: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CSeq {
    pub seq: u32,
    pub method: Method,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Via {
    /// Protocol and address, e.g. `SIP/2.0/UDP 192.0.2.1:5060`.
    pub sent_by: String,
    pub branch: String,
    /// Remaining parameters (`rport`, `received=...`) in wire order.
    pub params: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WwwAuthenticate {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub algorithm: String,
    pub qop: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    pub username: String,
    pub realm: String,
    pub nonce: String,
    pub uri: String,
    pub response: String,
    pub algorithm: String,
    pub cnonce: Option<String>,
    pub opaque: Option<String>,
    pub qop: Option<String>,
    pub nonce_count: Option<u32>,
}

impl Header {
    /// Canonical wire name.
    pub fn name(&self) -> &str {
        match self {
            Header::MaxForwards(_) => MAX_FORWARDS,
            Header::ContentLength(_) => CONTENT_LENGTH,
            Header::Expires(_) => EXPIRES,
            Header::From(_) => FROM,
            Header::To(_) => TO,
            Header::Contact(_) => CONTACT,
            Header::CallId(_) => CALL_ID,
            Header::CSeq(_) => CSEQ,
            Header::Via(_) => VIA,
            Header::WwwAuthenticate(_) => WWW_AUTHENTICATE,
            Header::Authorization(_) => AUTHORIZATION,
            Header::General { name, .. } => name,
        }
    }

    pub fn general(name: &str, value: &str) -> Self {
        Header::General {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

type Parser = fn(&str) -> Result<Header>;

// Lowercase names, compact forms included.
static PARSERS: &[(&str, Parser)] = &[
    ("max-forwards", parse_max_forwards),
    ("content-length", parse_content_length),
    ("l", parse_content_length),
    ("expires", parse_expires),
    ("from", parse_from),
    ("f", parse_from),
    ("to", parse_to),
    ("t", parse_to),
    ("contact", parse_contact),
    ("m", parse_contact),
    ("call-id", parse_call_id),
    ("i", parse_call_id),
    ("cseq", parse_cseq),
    ("via", parse_via),
    ("v", parse_via),
    ("www-authenticate", parse_www_authenticate),
    ("authorization", parse_authorization),
];

/// Parse a header value by name. Unknown names become [`Header::General`].
pub fn parse(name: &str, raw: &str) -> Result<Header> {
    let name = name.trim();
    let raw = raw.trim();
    match PARSERS.iter().find(|(key, _)| key.eq_ignore_ascii_case(name)) {
        Some((_, parser)) => parser(raw),
        None => Ok(Header::general(name, raw)),
    }
}

fn parse_u32(header: &'static str, raw: &str) -> Result<u32> {
    raw.trim().parse().map_err(|_| SipError::Format {
        header,
        value: raw.to_string(),
    })
}

fn parse_max_forwards(raw: &str) -> Result<Header> {
    parse_u32(MAX_FORWARDS, raw).map(Header::MaxForwards)
}

fn parse_content_length(raw: &str) -> Result<Header> {
    parse_u32(CONTENT_LENGTH, raw).map(Header::ContentLength)
}

fn parse_expires(raw: &str) -> Result<Header> {
    parse_u32(EXPIRES, raw).map(Header::Expires)
}

fn parse_call_id(raw: &str) -> Result<Header> {
    if raw.is_empty() {
        return Err(SipError::Parse("empty Call-ID".into()));
    }
    Ok(Header::CallId(raw.to_string()))
}

fn parse_from(raw: &str) -> Result<Header> {
    let addr = NameAddr::parse(raw)?;
    if addr.tag.is_none() {
        return Err(SipError::Validation(format!("From without tag: {raw:?}")));
    }
    Ok(Header::From(addr))
}

fn parse_to(raw: &str) -> Result<Header> {
    NameAddr::parse(raw).map(Header::To)
}

fn parse_contact(raw: &str) -> Result<Header> {
    let (display_name, uri, params) = split_name_addr(raw)?;
    let mut expires = None;
    for (key, value) in uri_params(params) {
        if key.eq_ignore_ascii_case("expires") {
            expires = Some(parse_u32(CONTACT, value.unwrap_or_default())?);
        }
    }
    Ok(Header::Contact(Contact {
        uri: uri.to_string(),
        display_name,
        expires,
    }))
}

fn parse_cseq(raw: &str) -> Result<Header> {
    let mut parts = raw.split_whitespace();
    let seq = parts
        .next()
        .ok_or_else(|| SipError::Parse("empty CSeq".into()))?;
    let method = parts
        .next()
        .ok_or_else(|| SipError::Parse(format!("CSeq without method: {raw:?}")))?;
    if parts.next().is_some() {
        return Err(SipError::Parse(format!("trailing data in CSeq: {raw:?}")));
    }
    Ok(Header::CSeq(CSeq {
        seq: parse_u32(CSEQ, seq)?,
        method: method.parse()?,
    }))
}

fn parse_via(raw: &str) -> Result<Header> {
    let mut parts = raw.split(';').map(str::trim);
    let sent_by = parts.next().unwrap_or_default();
    if sent_by.is_empty() {
        return Err(SipError::Parse("empty Via".into()));
    }

    let mut branch = None;
    let mut params = Vec::new();
    for part in parts.filter(|p| !p.is_empty()) {
        match part.strip_prefix("branch=") {
            Some(value) => branch = Some(value.to_string()),
            None => params.push(part.to_string()),
        }
    }

    let branch = branch.unwrap_or_default();
    if !branch.starts_with(BRANCH_MAGIC) {
        return Err(SipError::Validation(format!(
            "Via branch must start with {BRANCH_MAGIC}: {raw:?}"
        )));
    }

    Ok(Header::Via(Via {
        sent_by: sent_by.to_string(),
        branch,
        params,
    }))
}

fn parse_www_authenticate(raw: &str) -> Result<Header> {
    let mut realm = None;
    let mut nonce = None;
    let mut opaque = None;
    let mut algorithm = "MD5".to_string();
    let mut qop = None;

    for (key, value) in digest_params(raw)? {
        match key.to_ascii_lowercase().as_str() {
            "realm" => realm = Some(value),
            "nonce" => nonce = Some(value),
            "opaque" => opaque = Some(value),
            "algorithm" => algorithm = value,
            "qop" => qop = Some(value),
            _ => {}
        }
    }

    Ok(Header::WwwAuthenticate(WwwAuthenticate {
        realm: realm.ok_or_else(|| SipError::Parse("challenge without realm".into()))?,
        nonce: nonce.ok_or_else(|| SipError::Parse("challenge without nonce".into()))?,
        opaque,
        algorithm,
        qop,
    }))
}

fn parse_authorization(raw: &str) -> Result<Header> {
    let mut username = None;
    let mut realm = None;
    let mut nonce = None;
    let mut uri = None;
    let mut response = None;
    let mut algorithm = "MD5".to_string();
    let mut cnonce = None;
    let mut opaque = None;
    let mut qop = None;
    let mut nonce_count = None;

    for (key, value) in digest_params(raw)? {
        match key.to_ascii_lowercase().as_str() {
            "username" => username = Some(value),
            "realm" => realm = Some(value),
            "nonce" => nonce = Some(value),
            "uri" => uri = Some(value),
            "response" => response = Some(value),
            "algorithm" => algorithm = value,
            "cnonce" => cnonce = Some(value),
            "opaque" => opaque = Some(value),
            "qop" => qop = Some(value),
            "nc" => {
                let nc = u32::from_str_radix(&value, 16).map_err(|_| SipError::Format {
                    header: AUTHORIZATION,
                    value: value.clone(),
                })?;
                nonce_count = Some(nc);
            }
            _ => {}
        }
    }

    let missing = |what: &str| SipError::Parse(format!("Authorization without {what}"));
    Ok(Header::Authorization(Authorization {
        username: username.ok_or_else(|| missing("username"))?,
        realm: realm.ok_or_else(|| missing("realm"))?,
        nonce: nonce.ok_or_else(|| missing("nonce"))?,
        uri: uri.ok_or_else(|| missing("uri"))?,
        response: response.ok_or_else(|| missing("response"))?,
        algorithm,
        cnonce,
        opaque,
        qop,
        nonce_count,
    }))
}

/// Split `Digest k="v",k2=v2` into unquoted key/value pairs.
/// Commas inside quoted values do not split.
fn digest_params(raw: &str) -> Result<Vec<(String, String)>> {
    let (scheme, params) = raw
        .trim()
        .split_once(' ')
        .ok_or_else(|| SipError::Parse(format!("missing auth params: {raw:?}")))?;
    if !scheme.eq_ignore_ascii_case("digest") {
        return Err(SipError::Parse(format!("unsupported auth scheme: {scheme}")));
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    for (i, c) in params.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                pieces.push(&params[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    pieces.push(&params[start..]);

    pieces
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|piece| {
            let (key, value) = piece
                .split_once('=')
                .ok_or_else(|| SipError::Parse(format!("bad auth param: {piece:?}")))?;
            Ok((key.trim().to_string(), value.trim().trim_matches('"').to_string()))
        })
        .collect()
}

/// Split an address into display name, URI and the trailing parameter text.
fn split_name_addr(raw: &str) -> Result<(Option<String>, &str, &str)> {
    let raw = raw.trim();
    let unterminated = || SipError::Parse(format!("unterminated address: {raw:?}"));

    let (display_name, rest) = match raw.chars().next() {
        Some(quote @ ('"' | '\'')) => {
            let inner = &raw[1..];
            let end = inner.find(quote).ok_or_else(unterminated)?;
            (Some(inner[..end].to_string()), inner[end + 1..].trim_start())
        }
        _ => match raw.find('<') {
            Some(lt) if lt > 0 => (Some(raw[..lt].trim().to_string()), &raw[lt..]),
            _ => (None, raw),
        },
    };

    if let Some(inner) = rest.strip_prefix('<') {
        let end = inner.find('>').ok_or_else(unterminated)?;
        return Ok((display_name, &inner[..end], &inner[end + 1..]));
    }

    Ok(match rest.find(';') {
        Some(semi) => (display_name, &rest[..semi], &rest[semi..]),
        None => (display_name, rest, ""),
    })
}

fn uri_params(params: &str) -> impl Iterator<Item = (&str, Option<&str>)> {
    params
        .split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| match p.split_once('=') {
            Some((key, value)) => (key.trim(), Some(value.trim())),
            None => (p, None),
        })
}

impl NameAddr {
    pub fn new(uri: impl Into<String>, display_name: Option<&str>, tag: Option<&str>) -> Self {
        Self {
            uri: uri.into(),
            display_name: display_name.map(str::to_string),
            tag: tag.map(str::to_string),
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let (display_name, uri, params) = split_name_addr(raw)?;
        let tag = uri_params(params)
            .find(|(key, _)| key.eq_ignore_ascii_case("tag"))
            .and_then(|(_, value)| value)
            .map(str::to_string);
        Ok(Self {
            uri: uri.to_string(),
            display_name,
            tag,
        })
    }
}

impl Via {
    /// Via for an outgoing UDP request, asking for `rport`.
    pub fn udp(host: &str, port: u16, branch: &str) -> Self {
        Self {
            sent_by: format!("SIP/2.0/UDP {host}:{port}"),
            branch: branch.to_string(),
            params: vec!["rport".to_string()],
        }
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Header::MaxForwards(v) | Header::ContentLength(v) | Header::Expires(v) => {
                write!(f, "{v}")
            }
            Header::From(addr) | Header::To(addr) => write!(f, "{addr}"),
            Header::Contact(contact) => write!(f, "{contact}"),
            Header::CallId(id) => f.write_str(id),
            Header::CSeq(cseq) => write!(f, "{cseq}"),
            Header::Via(via) => write!(f, "{via}"),
            Header::WwwAuthenticate(chal) => write!(f, "{chal}"),
            Header::Authorization(auth) => write!(f, "{auth}"),
            Header::General { value, .. } => f.write_str(value),
        }
    }
}

impl fmt::Display for NameAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.display_name {
            write!(f, "\"{name}\" ")?;
        }
        write!(f, "<{}>", self.uri)?;
        if let Some(tag) = &self.tag {
            write!(f, ";tag={tag}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.display_name {
            write!(f, "\"{name}\" ")?;
        }
        write!(f, "<{}>", self.uri)?;
        if let Some(expires) = self.expires {
            write!(f, ";expires={expires}")?;
        }
        Ok(())
    }
}

impl fmt::Display for CSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.seq, self.method)
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sent_by)?;
        for param in &self.params {
            write!(f, ";{param}")?;
        }
        write!(f, ";branch={}", self.branch)
    }
}

impl fmt::Display for WwwAuthenticate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest realm=\"{}\",nonce=\"{}\"", self.realm, self.nonce)?;
        if let Some(opaque) = &self.opaque {
            write!(f, ",opaque=\"{opaque}\"")?;
        }
        write!(f, ",algorithm={}", self.algorithm)?;
        if let Some(qop) = &self.qop {
            write!(f, ",qop=\"{qop}\"")?;
        }
        Ok(())
    }
}

impl fmt::Display for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Digest username=\"{}\",realm=\"{}\",nonce=\"{}\",uri=\"{}\",response=\"{}\",algorithm={}",
            self.username, self.realm, self.nonce, self.uri, self.response, self.algorithm
        )?;
        if let Some(cnonce) = &self.cnonce {
            write!(f, ",cnonce=\"{cnonce}\"")?;
        }
        if let Some(opaque) = &self.opaque {
            write!(f, ",opaque=\"{opaque}\"")?;
        }
        if let Some(qop) = &self.qop {
            write!(f, ",qop={qop}")?;
        }
        if let Some(nc) = self.nonce_count {
            write!(f, ",nc={nc:08x}")?;
        }
        Ok(())
    }
}
