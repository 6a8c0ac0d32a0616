use log::{debug, warn};
use sdp::SessionDescription;

use crate::{message::Response, transaction::Transaction};

/// One call leg: the INVITE transaction followed by the transactions that
/// reuse its identity (BYE).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dialog {
    transactions: Vec<Transaction>,
    remote_target: String,
    remote_media: Option<SessionDescription>,
}

impl Dialog {
    pub fn new(remote_target: &str, transaction: Transaction) -> Self {
        Self {
            transactions: vec![transaction],
            remote_target: remote_target.to_string(),
            remote_media: None,
        }
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn active(&self) -> Option<&Transaction> {
        self.transactions.last()
    }

    pub fn active_mut(&mut self) -> Option<&mut Transaction> {
        self.transactions.last_mut()
    }

    /// Start the next transaction of this dialog (CSeq + 1, same tags/Call-ID).
    pub fn open_transaction(&mut self) -> Option<&mut Transaction> {
        let next = Transaction::follow_up(self.active()?);
        self.transactions.push(next);
        self.transactions.last_mut()
    }

    /// Request-URI for in-dialog requests.
    pub fn remote_target(&self) -> &str {
        &self.remote_target
    }

    /// SDP answer from the 2xx, when one was received and understood.
    pub fn remote_media(&self) -> Option<&SessionDescription> {
        self.remote_media.as_ref()
    }

    /// Take the remote target and SDP answer from a 2xx to the INVITE.
    pub(crate) fn confirm(&mut self, response: &Response) {
        if let Some(contact) = response.headers.contact() {
            self.remote_target.clone_from(&contact.uri);
        }
        if response.body.is_empty() {
            return;
        }
        match SessionDescription::parse(&response.body.join("\n")) {
            Ok(answer) => {
                debug!(
                    "remote media at {}:{}",
                    answer.connection_address, answer.media_port
                );
                self.remote_media = Some(answer);
            }
            Err(e) => warn!("ignoring unparseable SDP answer: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{self, Contact, Header};

    #[test]
    fn open_transaction_follows_active() {
        let mut dialog = Dialog::new("sip:6002@un100", Transaction::new());
        let first_seq = dialog.active().unwrap().local_sequence();
        let call_id = dialog.active().unwrap().call_id().to_string();

        let next = dialog.open_transaction().unwrap();
        assert_eq!(next.local_sequence(), first_seq + 1);
        assert_eq!(next.call_id(), call_id);
        assert_eq!(dialog.transactions().len(), 2);
    }

    #[test]
    fn confirm_reads_contact_and_answer() {
        let mut dialog = Dialog::new("sip:6002@un100", Transaction::new());
        let mut ok = Response::new(200, "OK");
        ok.add_header(header::parse("CSeq", "1 INVITE").unwrap());
        ok.add_header(Header::Contact(Contact {
            uri: "sip:6002@192.0.2.9:5062".into(),
            display_name: None,
            expires: None,
        }));
        ok.body = vec![
            "v=0".into(),
            "o=- 1 1 IN IP4 192.0.2.9".into(),
            "s=-".into(),
            "c=IN IP4 192.0.2.9".into(),
            "t=0 0".into(),
            "m=audio 30000 RTP/AVP 8".into(),
        ];

        dialog.confirm(&ok);
        assert_eq!(dialog.remote_target(), "sip:6002@192.0.2.9:5062");
        let media = dialog.remote_media().unwrap();
        assert_eq!(media.connection_address, "192.0.2.9");
        assert_eq!(media.media_port, 30000);
    }
}
