use core::fmt::Write;

use log::{debug, warn};
use md5::{Digest, Md5};

use crate::{
    config::{ClientConfig, Cnonce},
    header::{self, Authorization, CSeq, Header, WwwAuthenticate},
    message::{Method, Request, Response},
    transaction::random_token,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestCredentials<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// Everything that goes into one digest response hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestInput<'a> {
    pub credentials: DigestCredentials<'a>,
    pub realm: &'a str,
    pub method: &'a str,
    pub uri: &'a str,
    pub nonce: &'a str,
    pub cnonce: &'a str,
    pub nonce_count: u32,
    /// `None` selects the RFC 2069 form without cnonce/nc.
    pub qop: Option<&'a str>,
}

pub fn digest_response(input: &DigestInput<'_>) -> String {
    let creds = &input.credentials;
    let ha1 = md5_hex(format!("{}:{}:{}", creds.username, input.realm, creds.password).as_bytes());
    let ha2 = md5_hex(format!("{}:{}", input.method, input.uri).as_bytes());

    let combo = match input.qop {
        Some(qop) => format!(
            "{}:{}:{:08x}:{}:{}:{}",
            ha1, input.nonce, input.nonce_count, input.cnonce, qop, ha2
        ),
        None => format!("{}:{}:{}", ha1, input.nonce, ha2),
    };

    md5_hex(combo.as_bytes())
}

fn md5_hex(data: &[u8]) -> String {
    let digest = Md5::digest(data);
    let mut out = String::with_capacity(32);
    for b in &digest {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

/// Answers digest challenges on behalf of one account.
#[derive(Debug, Clone)]
pub struct Authenticator {
    username: String,
    password: String,
    cnonce: Cnonce,
}

impl Authenticator {
    pub fn new(username: &str, password: &str, cnonce: Cnonce) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            cnonce,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(&config.username, &config.password, config.cnonce.clone())
    }

    pub fn has_credentials(&self) -> bool {
        !self.password.is_empty()
    }

    fn next_cnonce(&self) -> String {
        match &self.cnonce {
            Cnonce::Fixed(value) => value.clone(),
            Cnonce::Random => random_token(32),
        }
    }

    /// Build the Authorization header for a challenge, or `None` when the
    /// challenge asks for something other than MD5 / qop=auth.
    pub fn authorize(
        &self,
        challenge: &WwwAuthenticate,
        method: Method,
        uri: &str,
    ) -> Option<Authorization> {
        if !challenge.algorithm.eq_ignore_ascii_case("MD5") {
            warn!("unsupported digest algorithm {}", challenge.algorithm);
            return None;
        }

        let qop = match challenge.qop.as_deref() {
            None => None,
            Some(offered) => {
                let auth = offered
                    .split(',')
                    .map(str::trim)
                    .find(|q| q.eq_ignore_ascii_case("auth"));
                if auth.is_none() {
                    warn!("no supported qop in {offered:?}");
                    return None;
                }
                auth
            }
        };

        let cnonce = self.next_cnonce();
        let nonce_count = 1;
        let method = method.to_string();
        let response = digest_response(&DigestInput {
            credentials: DigestCredentials {
                username: &self.username,
                password: &self.password,
            },
            realm: &challenge.realm,
            method: &method,
            uri,
            nonce: &challenge.nonce,
            cnonce: &cnonce,
            nonce_count,
            qop,
        });

        Some(Authorization {
            username: self.username.clone(),
            realm: challenge.realm.clone(),
            nonce: challenge.nonce.clone(),
            uri: uri.to_string(),
            response,
            algorithm: challenge.algorithm.clone(),
            cnonce: qop.map(|_| cnonce),
            opaque: challenge.opaque.clone(),
            qop: qop.map(str::to_string),
            nonce_count: qop.map(|_| nonce_count),
        })
    }

    /// Rebuild `request` with credentials for the challenge in `response`.
    ///
    /// The challenge header is removed from `response`, so the same response
    /// never yields a second retry. Returns `None` when there is no usable
    /// challenge.
    pub fn retry(&self, request: &Request, response: &mut Response) -> Option<Request> {
        let Some(Header::WwwAuthenticate(challenge)) =
            response.headers.remove(header::WWW_AUTHENTICATE)
        else {
            debug!("{} response carries no challenge", response.status_code);
            return None;
        };

        let cseq = *request.cseq()?;
        let authorization = self.authorize(&challenge, request.method, &request.uri)?;

        let mut retry = request.clone();
        retry.add_header(Header::CSeq(CSeq {
            seq: cseq.seq + 1,
            method: cseq.method,
        }));
        retry.add_header(Header::Authorization(authorization));
        Some(retry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_CNONCE;

    fn challenge(qop: Option<&str>) -> WwwAuthenticate {
        WwwAuthenticate {
            realm: "asterisk".into(),
            nonce: "1694340480/be2dcee2681e965161a7fdb1e3ca0d6c".into(),
            opaque: Some("456759f668e20830".into()),
            algorithm: "MD5".into(),
            qop: qop.map(str::to_string),
        }
    }

    fn register(seq: u32) -> Request {
        let mut req = Request::new(Method::Register, "sip:un100");
        req.add_header(Header::CallId("abc".into()));
        req.add_header(Header::CSeq(CSeq {
            seq,
            method: Method::Register,
        }));
        req.add_header(Header::ContentLength(0));
        req
    }

    fn unauthorized(chal: WwwAuthenticate) -> Response {
        let mut resp = Response::new(401, "Unauthorized");
        resp.add_header(Header::CSeq(CSeq {
            seq: 10,
            method: Method::Register,
        }));
        resp.add_header(Header::WwwAuthenticate(chal));
        resp
    }

    #[test]
    fn asterisk_vector() {
        let response = digest_response(&DigestInput {
            credentials: DigestCredentials {
                username: "6001",
                password: "unsecurepassword",
            },
            realm: "asterisk",
            method: "REGISTER",
            uri: "sip:un100",
            nonce: "1694340480/be2dcee2681e965161a7fdb1e3ca0d6c",
            cnonce: "4uKBAw6V0O358p0K1Kf0UnMJGuppcwLd",
            nonce_count: 1,
            qop: Some("auth"),
        });
        assert_eq!(response, "9566381df29daae0299427f6deae7b98");
    }

    #[test]
    fn rfc2617_vectors() {
        let mut input = DigestInput {
            credentials: DigestCredentials {
                username: "Mufasa",
                password: "Circle Of Life",
            },
            realm: "testrealm@host.com",
            method: "GET",
            uri: "/dir/index.html",
            nonce: "dcd98b7102dd2f0e8b11d0f600bfb0c093",
            cnonce: "0a4f113b",
            nonce_count: 1,
            qop: Some("auth"),
        };
        assert_eq!(digest_response(&input), "6629fae49393a05397450978507c4ef1");

        input.qop = None;
        assert_eq!(digest_response(&input), "670fd8c2df070c60b045671b8b24ff02");
    }

    #[test]
    fn md5_round_trip_reference() {
        assert_eq!(md5_hex(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn retry_bumps_cseq_and_adds_authorization() {
        let auth = Authenticator::new("6001", "unsecurepassword", Cnonce::default());
        let req = register(46544);
        let mut resp = unauthorized(challenge(Some("auth")));

        let retry = auth.retry(&req, &mut resp).unwrap();
        assert_eq!(retry.cseq().unwrap().seq, 46545);
        assert_eq!(retry.uri, req.uri);
        assert_eq!(retry.headers.call_id(), Some("abc"));

        let authorization = retry.headers.authorization().unwrap();
        assert_eq!(authorization.response, "9566381df29daae0299427f6deae7b98");
        assert_eq!(authorization.cnonce.as_deref(), Some(DEFAULT_CNONCE));
        assert_eq!(authorization.nonce_count, Some(1));
        assert_eq!(authorization.opaque.as_deref(), Some("456759f668e20830"));
        assert_eq!(
            retry.headers.iter().last().map(Header::name),
            Some(header::AUTHORIZATION)
        );
    }

    #[test]
    fn challenge_is_consumed() {
        let auth = Authenticator::new("6001", "pw", Cnonce::default());
        let req = register(1);
        let mut resp = unauthorized(challenge(Some("auth")));

        assert!(auth.retry(&req, &mut resp).is_some());
        assert!(resp.headers.www_authenticate().is_none());
        assert!(auth.retry(&req, &mut resp).is_none());
    }

    #[test]
    fn legacy_challenge_without_qop() {
        let auth = Authenticator::new("6001", "pw", Cnonce::default());
        let mut resp = unauthorized(challenge(None));
        let retry = auth.retry(&register(1), &mut resp).unwrap();
        let authorization = retry.headers.authorization().unwrap();
        assert_eq!(authorization.qop, None);
        assert_eq!(authorization.cnonce, None);
        assert_eq!(authorization.nonce_count, None);
    }

    #[test]
    fn unsupported_challenges_yield_no_retry() {
        let auth = Authenticator::new("6001", "pw", Cnonce::default());

        let mut chal = challenge(Some("auth"));
        chal.algorithm = "SHA-256".into();
        assert!(auth.retry(&register(1), &mut unauthorized(chal)).is_none());

        let chal = challenge(Some("auth-int"));
        assert!(auth.retry(&register(1), &mut unauthorized(chal)).is_none());
    }

    #[test]
    fn random_cnonce_differs_per_challenge() {
        let auth = Authenticator::new("6001", "pw", Cnonce::Random);
        let chal = challenge(Some("auth"));
        let a = auth.authorize(&chal, Method::Register, "sip:un100").unwrap();
        let b = auth.authorize(&chal, Method::Register, "sip:un100").unwrap();
        assert_eq!(a.cnonce.as_ref().map(String::len), Some(32));
        assert_ne!(a.cnonce, b.cnonce);
        assert_ne!(a.response, b.response);
    }
}
