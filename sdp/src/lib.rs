use log::trace;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub origin: String,
    pub connection_address: String,
    pub media_port: u16,
    pub payload_types: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum SdpError {
    #[error("invalid SDP: {0}")]
    Invalid(String),
}

const PCMU: u8 = 0;
const PCMA: u8 = 8;
const TELEPHONE_EVENT: u8 = 101;

impl SessionDescription {
    /// The fixed audio offer sent with every INVITE: G.711 u-law/A-law plus DTMF events.
    pub fn offer(address: &str, media_port: u16) -> Self {
        Self {
            origin: "-".into(),
            connection_address: address.into(),
            media_port,
            payload_types: vec![PCMU, PCMA, TELEPHONE_EVENT],
        }
    }

    pub fn to_lines(&self) -> Vec<String> {
        let formats: Vec<String> = self.payload_types.iter().map(u8::to_string).collect();
        let mut lines = vec![
            "v=0".to_string(),
            format!("o={} 0 0 IN IP4 {}", self.origin, self.connection_address),
            "s=-".to_string(),
            format!("c=IN IP4 {}", self.connection_address),
            "t=0 0".to_string(),
            format!("m=audio {} RTP/AVP {}", self.media_port, formats.join(" ")),
        ];
        for pt in &self.payload_types {
            match *pt {
                PCMU => lines.push("a=rtpmap:0 PCMU/8000".into()),
                PCMA => lines.push("a=rtpmap:8 PCMA/8000".into()),
                TELEPHONE_EVENT => {
                    lines.push("a=rtpmap:101 telephone-event/8000".into());
                    lines.push("a=fmtp:101 0-16".into());
                }
                _ => {}
            }
        }
        lines.push("a=sendrecv".into());
        lines
    }

    /// Read origin, connection address and the first audio stream.
    pub fn parse(input: &str) -> Result<Self, SdpError> {
        let mut origin = None;
        let mut address = None;
        let mut media = None;

        for line in input.lines().map(str::trim) {
            if let Some(o) = line.strip_prefix("o=") {
                origin = o.split_whitespace().next().map(str::to_string);
            } else if let Some(c) = line.strip_prefix("c=") {
                address = c.split_whitespace().nth(2).map(str::to_string);
            } else if let Some(m) = line.strip_prefix("m=audio ") {
                if media.is_none() {
                    media = Some(parse_media(m)?);
                }
            } else {
                trace!("sdp: skipping {line:?}");
            }
        }

        let (media_port, payload_types) =
            media.ok_or_else(|| SdpError::Invalid("no audio stream".into()))?;
        Ok(Self {
            origin: origin.unwrap_or_else(|| "-".into()),
            connection_address: address
                .ok_or_else(|| SdpError::Invalid("no connection address".into()))?,
            media_port,
            payload_types,
        })
    }
}

fn parse_media(m: &str) -> Result<(u16, Vec<u8>), SdpError> {
    let mut parts = m.split_whitespace();
    let port = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(|| SdpError::Invalid(format!("bad media port in {m:?}")))?;
    let _proto = parts.next();
    let payload_types = parts.filter_map(|pt| pt.parse().ok()).collect();
    Ok((port, payload_types))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_basic_offer() {
        let offer = SessionDescription::offer("192.0.2.1", 4000);
        let lines = offer.to_lines();
        assert_eq!(lines[0], "v=0");
        assert_eq!(lines[3], "c=IN IP4 192.0.2.1");
        assert_eq!(lines[5], "m=audio 4000 RTP/AVP 0 8 101");
        assert_eq!(lines.last().map(String::as_str), Some("a=sendrecv"));
    }

    #[test]
    fn parses_own_offer() {
        let offer = SessionDescription::offer("192.0.2.1", 4000);
        let parsed = SessionDescription::parse(&offer.to_lines().join("\r\n")).unwrap();
        assert_eq!(parsed, offer);
    }

    #[test]
    fn rejects_answer_without_media() {
        let err = SessionDescription::parse("v=0\nc=IN IP4 192.0.2.1\n").unwrap_err();
        assert!(matches!(err, SdpError::Invalid(_)));
    }
}
