use core::fmt::{self, Write};
use std::str::FromStr;

use crate::header::{self, Authorization, CSeq, Contact, Header, NameAddr, Via, WwwAuthenticate};
use crate::{Result, SipError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Register,
    Invite,
    Ack,
    Bye,
    Cancel,
    Options,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    pub const SIP_2_0: Version = Version { major: 2, minor: 0 };
}

/// Ordered header list, unique per (case-insensitive) name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<Header>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub uri: String,
    pub version: Version,
    pub headers: Headers,
    pub body: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub version: Version,
    pub status_code: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a header, or replace an existing one with the same name in place.
    pub fn insert(&mut self, header: Header) {
        match self
            .0
            .iter_mut()
            .find(|h| h.name().eq_ignore_ascii_case(header.name()))
        {
            Some(slot) => *slot = header,
            None => self.0.push(header),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Header> {
        self.0.iter().find(|h| h.name().eq_ignore_ascii_case(name))
    }

    pub fn remove(&mut self, name: &str) -> Option<Header> {
        let idx = self
            .0
            .iter()
            .position(|h| h.name().eq_ignore_ascii_case(name))?;
        Some(self.0.remove(idx))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Header> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn cseq(&self) -> Option<&CSeq> {
        match self.get(header::CSEQ)? {
            Header::CSeq(cseq) => Some(cseq),
            _ => None,
        }
    }

    pub fn call_id(&self) -> Option<&str> {
        match self.get(header::CALL_ID)? {
            Header::CallId(id) => Some(id),
            _ => None,
        }
    }

    pub fn from_addr(&self) -> Option<&NameAddr> {
        match self.get(header::FROM)? {
            Header::From(addr) => Some(addr),
            _ => None,
        }
    }

    pub fn to_addr(&self) -> Option<&NameAddr> {
        match self.get(header::TO)? {
            Header::To(addr) => Some(addr),
            _ => None,
        }
    }

    pub fn via(&self) -> Option<&Via> {
        match self.get(header::VIA)? {
            Header::Via(via) => Some(via),
            _ => None,
        }
    }

    pub fn contact(&self) -> Option<&Contact> {
        match self.get(header::CONTACT)? {
            Header::Contact(contact) => Some(contact),
            _ => None,
        }
    }

    pub fn expires(&self) -> Option<u32> {
        match self.get(header::EXPIRES)? {
            Header::Expires(expires) => Some(*expires),
            _ => None,
        }
    }

    pub fn www_authenticate(&self) -> Option<&WwwAuthenticate> {
        match self.get(header::WWW_AUTHENTICATE)? {
            Header::WwwAuthenticate(chal) => Some(chal),
            _ => None,
        }
    }

    pub fn authorization(&self) -> Option<&Authorization> {
        match self.get(header::AUTHORIZATION)? {
            Header::Authorization(auth) => Some(auth),
            _ => None,
        }
    }
}

impl FromIterator<Header> for Headers {
    fn from_iter<I: IntoIterator<Item = Header>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for header in iter {
            headers.insert(header);
        }
        headers
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = &'a Header;
    type IntoIter = core::slice::Iter<'a, Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl Request {
    pub fn new(method: Method, uri: &str) -> Self {
        Self {
            method,
            uri: uri.to_string(),
            version: Version::SIP_2_0,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    pub fn add_header(&mut self, header: Header) {
        self.headers.insert(header);
    }

    pub fn set_body(&mut self, lines: Vec<String>) {
        self.body = lines;
    }

    /// Byte length of the body as it goes on the wire.
    pub fn body_len(&self) -> usize {
        body_len(&self.body)
    }

    pub fn cseq(&self) -> Option<&CSeq> {
        self.headers.cseq()
    }

    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl Response {
    pub fn new(status_code: u16, reason: &str) -> Self {
        Self {
            version: Version::SIP_2_0,
            status_code,
            reason: reason.to_string(),
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    pub fn add_header(&mut self, header: Header) {
        self.headers.insert(header);
    }

    /// Method of the request this answers, taken from the response's own CSeq.
    pub fn method(&self) -> Option<Method> {
        self.headers.cseq().map(|cseq| cseq.method)
    }

    pub fn render(&self) -> String {
        self.to_string()
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match parse_message(raw)? {
            Message::Response(resp) => Ok(resp),
            Message::Request(req) => Err(SipError::Parse(format!(
                "expected a response, got {} request",
                req.method
            ))),
        }
    }
}

fn body_len(body: &[String]) -> usize {
    if body.is_empty() {
        return 0;
    }
    body.iter().map(String::len).sum::<usize>() + body.len() - 1
}

fn write_tail(f: &mut fmt::Formatter<'_>, headers: &Headers, body: &[String]) -> fmt::Result {
    for header in headers {
        write!(f, "\n{}: {}", header.name(), header)?;
    }
    f.write_char('\n')?;
    for line in body {
        write!(f, "\n{line}")?;
    }
    Ok(())
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.method, self.uri, self.version)?;
        write_tail(f, &self.headers, &self.body)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.version, self.status_code, self.reason)?;
        write_tail(f, &self.headers, &self.body)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIP/{}.{}", self.major, self.minor)
    }
}

impl FromStr for Version {
    type Err = SipError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || SipError::Parse(format!("invalid SIP version: {s:?}"));
        let (major, minor) = s
            .strip_prefix("SIP/")
            .and_then(|v| v.split_once('.'))
            .ok_or_else(invalid)?;
        Ok(Version {
            major: major.parse().map_err(|_| invalid())?,
            minor: minor.parse().map_err(|_| invalid())?,
        })
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Register => "REGISTER",
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Options => "OPTIONS",
        })
    }
}

impl FromStr for Method {
    type Err = SipError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "REGISTER" => Ok(Method::Register),
            "INVITE" => Ok(Method::Invite),
            "ACK" => Ok(Method::Ack),
            "BYE" => Ok(Method::Bye),
            "CANCEL" => Ok(Method::Cancel),
            "OPTIONS" => Ok(Method::Options),
            _ => Err(SipError::Parse(format!("unknown method: {s}"))),
        }
    }
}

// Decide request vs response by the first line. Accepts LF or CRLF.
pub fn parse_message(input: &str) -> Result<Message> {
    let mut lines = input.lines();
    let first = lines
        .next()
        .filter(|l| !l.trim().is_empty())
        .ok_or_else(|| SipError::Parse("empty message".into()))?;

    if first.starts_with("SIP/") {
        parse_response(first, &mut lines)
    } else {
        parse_request(first, &mut lines)
    }
}

fn parse_request<'a, I>(start_line: &str, lines: &mut I) -> Result<Message>
where
    I: Iterator<Item = &'a str>,
{
    let parts: Vec<&str> = start_line.split_whitespace().collect();
    let [method, uri, version] = parts.as_slice() else {
        return Err(SipError::Parse(format!("malformed request line: {start_line:?}")));
    };

    let mut req = Request::new(method.parse()?, uri);
    req.version = version.parse()?;
    (req.headers, req.body) = parse_headers_and_body(lines)?;
    Ok(Message::Request(req))
}

fn parse_response<'a, I>(start_line: &str, lines: &mut I) -> Result<Message>
where
    I: Iterator<Item = &'a str>,
{
    let malformed = || SipError::Parse(format!("malformed status line: {start_line:?}"));
    let mut parts = start_line.trim().splitn(3, ' ');
    let (Some(version), Some(status), Some(reason)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(malformed());
    };
    if reason.trim().is_empty() {
        return Err(malformed());
    }
    let status_code: u16 = status.parse().map_err(|_| malformed())?;

    let mut resp = Response::new(status_code, reason.trim());
    resp.version = version.parse()?;
    (resp.headers, resp.body) = parse_headers_and_body(lines)?;
    Ok(Message::Response(resp))
}

fn parse_headers_and_body<'a, I>(lines: &mut I) -> Result<(Headers, Vec<String>)>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers = Headers::new();
    for line in lines.by_ref() {
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| SipError::Parse(format!("header without colon: {line:?}")))?;
        let header = header::parse(name, value)?;
        if keeps_first(headers.get(header.name()), &header) {
            continue;
        }
        headers.insert(header);
    }

    // Body is opaque.
    let body = lines.map(str::to_string).collect();
    Ok((headers, body))
}

// Only the topmost Via is ours. Of several challenges the first MD5 one is kept.
fn keeps_first(existing: Option<&Header>, incoming: &Header) -> bool {
    match (existing, incoming) {
        (Some(Header::Via(_)), Header::Via(_)) => true,
        (Some(Header::WwwAuthenticate(first)), Header::WwwAuthenticate(_)) => {
            first.algorithm.eq_ignore_ascii_case("MD5")
        }
        _ => false,
    }
}
