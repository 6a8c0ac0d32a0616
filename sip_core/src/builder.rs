use std::net::SocketAddr;

use sdp::SessionDescription;

use crate::{
    config::ClientConfig,
    dialog::Dialog,
    header::{CSeq, Contact, Header, NameAddr, Via},
    message::{Method, Request},
    transaction::{new_branch, Transaction},
    Result, SipError,
};

/// Builds outgoing requests for one account from its config and the address
/// peers should reach us on.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    config: ClientConfig,
    advertised: SocketAddr,
}

impl RequestBuilder {
    pub fn new(config: &ClientConfig, advertised: SocketAddr) -> Self {
        Self {
            config: config.clone(),
            advertised,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn advertised(&self) -> SocketAddr {
        self.advertised
    }

    /// REGISTER with sequence `seq`; `expires` 0 removes the binding.
    pub fn register(&self, tx: &Transaction, seq: u32, expires: u32) -> Request {
        let aor = self.config.address_of_record();
        let mut req = Request::new(Method::Register, &self.config.registrar_uri());
        req.add_header(self.via(tx.branch()));
        req.add_header(Header::MaxForwards(self.config.max_forwards));
        req.add_header(Header::From(self.local_addr(tx)));
        req.add_header(Header::To(NameAddr::new(
            aor,
            Some(&self.config.username),
            None,
        )));
        req.add_header(Header::CallId(tx.call_id().to_string()));
        req.add_header(Header::CSeq(CSeq {
            seq,
            method: Method::Register,
        }));
        req.add_header(self.contact());
        req.add_header(Header::Expires(expires));
        req.add_header(Header::general("Allow", &self.config.allow));
        req.add_header(Header::ContentLength(0));
        req
    }

    /// INVITE toward the configured target carrying the audio offer.
    pub fn invite(&self, tx: &Transaction) -> Request {
        let mut req = Request::new(Method::Invite, &self.config.target_uri());
        req.add_header(self.via(tx.branch()));
        req.add_header(Header::MaxForwards(self.config.max_forwards));
        req.add_header(Header::From(self.local_addr(tx)));
        req.add_header(Header::To(NameAddr::new(self.config.target_uri(), None, None)));
        req.add_header(Header::CallId(tx.call_id().to_string()));
        req.add_header(Header::CSeq(CSeq {
            seq: tx.local_sequence(),
            method: Method::Invite,
        }));
        req.add_header(self.contact());
        req.add_header(Header::general("Allow", &self.config.allow));
        req.add_header(Header::general("Content-Type", "application/sdp"));

        let offer = SessionDescription::offer(&self.advertised.ip().to_string(), self.config.rtp_port);
        req.set_body(offer.to_lines());
        req.add_header(Header::ContentLength(req.body_len() as u32));
        req
    }

    /// ACK for the 2xx answering the dialog's INVITE. Same CSeq number, new branch.
    pub fn ack(&self, dialog: &Dialog) -> Result<Request> {
        let tx = dialog
            .active()
            .ok_or(SipError::InvalidState("dialog has no transaction"))?;
        Ok(self.in_dialog(Method::Ack, dialog, tx, &new_branch()))
    }

    /// BYE on the dialog's active transaction (opened with
    /// [`Dialog::open_transaction`]).
    pub fn bye(&self, dialog: &Dialog) -> Result<Request> {
        let tx = dialog
            .active()
            .ok_or(SipError::InvalidState("dialog has no transaction"))?;
        Ok(self.in_dialog(Method::Bye, dialog, tx, tx.branch()))
    }

    fn in_dialog(&self, method: Method, dialog: &Dialog, tx: &Transaction, branch: &str) -> Request {
        let mut req = Request::new(method, dialog.remote_target());
        req.add_header(self.via(branch));
        req.add_header(Header::MaxForwards(self.config.max_forwards));
        req.add_header(Header::From(self.local_addr(tx)));
        req.add_header(Header::To(NameAddr::new(
            self.config.target_uri(),
            None,
            tx.remote_tag(),
        )));
        req.add_header(Header::CallId(tx.call_id().to_string()));
        req.add_header(Header::CSeq(CSeq {
            seq: tx.local_sequence(),
            method,
        }));
        req.add_header(Header::ContentLength(0));
        req
    }

    fn via(&self, branch: &str) -> Header {
        Header::Via(Via::udp(
            &self.advertised.ip().to_string(),
            self.advertised.port(),
            branch,
        ))
    }

    fn local_addr(&self, tx: &Transaction) -> NameAddr {
        NameAddr::new(
            self.config.address_of_record(),
            Some(&self.config.username),
            Some(tx.local_tag()),
        )
    }

    fn contact(&self) -> Header {
        Header::Contact(Contact {
            uri: format!(
                "sip:{}@{}:{};ob",
                self.config.username,
                self.advertised.ip(),
                self.advertised.port()
            ),
            display_name: Some(self.config.username.clone()),
            expires: None,
        })
    }
}
