use std::net::SocketAddr;

use log::{debug, info, warn};

use crate::{
    auth::Authenticator,
    builder::RequestBuilder,
    config::ClientConfig,
    context::Context,
    dialog::Dialog,
    header,
    message::{Method, Request, Response},
    transaction::Transaction,
    Result, SipError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Unavailable,
    Available,
    Calling,
}

/// Client state machine. Does no I/O: outbound operations return the request
/// to send, [`SipStack::on_receive`] returns whatever must go out in reply.
///
/// Failures of the exchange in flight (rejected credentials) are kept until
/// [`SipStack::take_failure`] collects them. Unexpected status codes are only
/// logged.
#[derive(Debug)]
pub struct SipStack {
    builder: RequestBuilder,
    authenticator: Authenticator,
    context: Context,
    status: Status,
    failure: Option<SipError>,
    granted_expires: Option<u32>,
    registered: bool,
    pending: bool,
}

impl SipStack {
    pub fn new(config: &ClientConfig, advertised: SocketAddr) -> Self {
        Self {
            builder: RequestBuilder::new(config, advertised),
            authenticator: Authenticator::from_config(config),
            context: Context::new(),
            status: Status::Unavailable,
            failure: None,
            granted_expires: None,
            registered: false,
            pending: false,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Expiry the registrar granted in its last 200 to REGISTER.
    pub fn granted_expires(&self) -> Option<u32> {
        self.granted_expires
    }

    /// True from a `begin_*` call until its final response or failure.
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Status a REGISTER with `expires` settles on. A call keeps `Calling`.
    pub fn status_after_register(&self, expires: u32) -> Status {
        match (self.status, expires) {
            (Status::Calling, _) => Status::Calling,
            (_, 0) => Status::Unavailable,
            _ => Status::Available,
        }
    }

    /// Status once the current call ends.
    pub fn status_after_call(&self) -> Status {
        if self.registered {
            Status::Available
        } else {
            Status::Unavailable
        }
    }

    pub fn failure(&self) -> Option<&SipError> {
        self.failure.as_ref()
    }

    pub fn take_failure(&mut self) -> Option<SipError> {
        self.failure.take()
    }

    /// REGISTER on the register transaction, created on first use.
    pub fn begin_register(&mut self, expires: u32) -> Request {
        self.start();
        let fresh = self.context.register_transaction().is_none();
        let tx = self.context.register_transaction_mut();
        let seq = if fresh {
            tx.local_sequence()
        } else {
            tx.next_sequence()
        };
        let request = self.builder.register(tx, seq, expires);
        tx.add_request(request.clone());
        request
    }

    pub fn begin_unregister(&mut self) -> Request {
        self.begin_register(0)
    }

    pub fn begin_invite(&mut self) -> Result<Request> {
        if self.status != Status::Available {
            return Err(SipError::Precondition("INVITE requires a registration"));
        }
        self.start();
        let tx = Transaction::new();
        let request = self.builder.invite(&tx);
        self.context
            .open_dialog(Dialog::new(&self.builder.config().target_uri(), tx));
        self.context.add_request(request.clone())?;
        Ok(request)
    }

    pub fn begin_bye(&mut self) -> Result<Request> {
        if self.status != Status::Calling {
            return Err(SipError::Precondition("BYE requires an established call"));
        }
        self.start();
        let dialog = self
            .context
            .active_dialog_mut()
            .ok_or(SipError::InvalidState("no open dialog"))?;
        dialog.open_transaction();
        let request = self.builder.bye(dialog)?;
        self.context.add_request(request.clone())?;
        Ok(request)
    }

    /// Feed one response. Returns the request to send in reply (ACK or a
    /// credentialed retry), if any.
    ///
    /// Errors mean the response could not be attributed to anything; they
    /// do not touch the stored failure.
    pub fn on_receive(&mut self, response: Response) -> Result<Option<Request>> {
        let method = response
            .method()
            .ok_or_else(|| SipError::Parse("response without CSeq".into()))?;
        let status = response.status_code;
        let seq = response.headers.cseq().map(|cseq| cseq.seq);
        let response_expires = response
            .headers
            .expires()
            .or_else(|| response.headers.contact().and_then(|c| c.expires));

        if (200..300).contains(&status) && method == Method::Invite {
            let current = self
                .context
                .transaction_for(Method::Invite)
                .filter(|tx| tx.requests().iter().any(|r| r.method == Method::Invite))
                .map(Transaction::local_sequence);
            if current != seq {
                debug!("ignoring {status} for stale INVITE {seq:?}");
                return Ok(None);
            }
            if let Some(dialog) = self.context.active_dialog_mut() {
                dialog.confirm(&response);
            }
        }
        self.context.add_response(response)?;

        match (status, method) {
            (100..=199, _) => {
                debug!("provisional {status} for {method}");
                Ok(None)
            }
            (200, Method::Register) => {
                let expires = response_expires.or_else(|| {
                    self.context
                        .register_transaction()
                        .and_then(Transaction::last_request)
                        .and_then(|req| req.headers.expires())
                });
                self.granted_expires = expires;
                self.registered = expires.is_some_and(|e| e > 0);
                if self.status == Status::Calling {
                    if !self.registered {
                        warn!("registration removed during a call");
                    }
                    self.transition(Status::Calling);
                } else {
                    self.transition(self.status_after_call());
                }
                Ok(None)
            }
            (200, Method::Invite) => {
                let dialog = self
                    .context
                    .active_dialog()
                    .ok_or(SipError::InvalidState("no open dialog"))?;
                let ack = self.builder.ack(dialog)?;
                self.context.add_request(ack.clone())?;
                self.transition(Status::Calling);
                Ok(Some(ack))
            }
            (200, Method::Bye) => {
                self.transition(self.status_after_call());
                Ok(None)
            }
            (401, _) => self.answer_challenge(method),
            (403, Method::Register) => {
                self.fail(SipError::AuthChallenge("registration rejected".into()));
                Ok(None)
            }
            (status, method) => {
                warn!("{}", SipError::UnexpectedResponse { status, method });
                Ok(None)
            }
        }
    }

    fn answer_challenge(&mut self, method: Method) -> Result<Option<Request>> {
        let tx = self.context.transaction_for_mut(method)?;
        let (request, response) = tx
            .last_exchange_mut()
            .ok_or(SipError::InvalidState("challenge without a request"))?;

        let outcome = if request.headers.contains(header::AUTHORIZATION) {
            Err("credentials rejected")
        } else if !self.authenticator.has_credentials() {
            Err("challenge received but no password configured")
        } else {
            self.authenticator
                .retry(request, response)
                .ok_or("no usable challenge")
        };

        match outcome {
            Ok(retry) => {
                debug!("answering {method} challenge");
                tx.add_request(retry.clone());
                Ok(Some(retry))
            }
            Err(reason) => {
                self.fail(SipError::AuthChallenge(reason.into()));
                Ok(None)
            }
        }
    }

    fn start(&mut self) {
        self.failure = None;
        self.pending = true;
    }

    fn transition(&mut self, status: Status) {
        self.pending = false;
        if status != self.status {
            info!("status {:?} -> {:?}", self.status, status);
            self.status = status;
        }
    }

    fn fail(&mut self, err: SipError) {
        warn!("{err}");
        self.pending = false;
        self.failure = Some(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{CSeq, Contact, Header, NameAddr, WwwAuthenticate};

    fn stack(password: &str) -> SipStack {
        let config = ClientConfig::new("un100", "6001", password);
        SipStack::new(&config, "192.0.2.1:5062".parse().unwrap())
    }

    fn answer(req: &Request, status: u16) -> Response {
        let mut resp = Response::new(status, "Whatever");
        for name in [header::VIA, header::FROM, header::TO, header::CALL_ID, header::CSEQ] {
            if let Some(h) = req.headers.get(name) {
                resp.add_header(h.clone());
            }
        }
        resp
    }

    fn challenge(req: &Request) -> Response {
        let mut resp = answer(req, 401);
        resp.add_header(Header::WwwAuthenticate(WwwAuthenticate {
            realm: "asterisk".into(),
            nonce: "1694340480/be2dcee2681e965161a7fdb1e3ca0d6c".into(),
            opaque: Some("456759f668e20830".into()),
            algorithm: "MD5".into(),
            qop: Some("auth".into()),
        }));
        resp
    }

    fn granted(req: &Request, expires: u32) -> Response {
        let mut ok = answer(req, 200);
        ok.add_header(Header::Expires(expires));
        ok
    }

    fn registered(password: &str) -> SipStack {
        let mut stack = stack(password);
        let req = stack.begin_register(300);
        stack.on_receive(granted(&req, 300)).unwrap();
        stack
    }

    fn accepted(invite: &Request) -> Response {
        let mut ok = answer(invite, 200);
        ok.add_header(Header::To(NameAddr::new("sip:6002@un100", None, Some("callee"))));
        ok
    }

    fn calling() -> (SipStack, Request) {
        let mut stack = registered("");
        let invite = stack.begin_invite().unwrap();
        stack.on_receive(accepted(&invite)).unwrap();
        (stack, invite)
    }

    #[test]
    fn register_and_unregister() {
        let mut stack = registered("");
        assert_eq!(stack.status(), Status::Available);
        assert_eq!(stack.granted_expires(), Some(300));
        assert!(!stack.is_pending());

        let req = stack.begin_unregister();
        assert_eq!(req.headers.expires(), Some(0));
        stack.on_receive(granted(&req, 0)).unwrap();
        assert_eq!(stack.status(), Status::Unavailable);
        assert_eq!(stack.granted_expires(), Some(0));
        assert!(stack.take_failure().is_none());
    }

    #[test]
    fn granted_expiry_prefers_response_values() {
        let mut stack = stack("");
        let req = stack.begin_register(300);
        let mut ok = answer(&req, 200);
        ok.add_header(Header::Contact(Contact {
            uri: "sip:6001@192.0.2.1:5062;ob".into(),
            display_name: None,
            expires: Some(60),
        }));
        stack.on_receive(ok).unwrap();
        assert_eq!(stack.granted_expires(), Some(60));

        let req = stack.begin_register(300);
        let mut ok = answer(&req, 200);
        ok.add_header(Header::Expires(120));
        stack.on_receive(ok).unwrap();
        assert_eq!(stack.granted_expires(), Some(120));
    }

    #[test]
    fn register_sequence_is_monotonic() {
        let mut stack = stack("pw");
        let first = stack.begin_register(300);
        let retry = stack.on_receive(challenge(&first)).unwrap().unwrap();
        stack.on_receive(answer(&retry, 200)).unwrap();
        let second = stack.begin_unregister();

        let seqs: Vec<u32> = [&first, &retry, &second]
            .iter()
            .map(|r| r.cseq().unwrap().seq)
            .collect();
        let n = seqs[0];
        assert_eq!(seqs, [n, n + 1, n + 2]);
        assert_eq!(
            first.headers.call_id(),
            second.headers.call_id(),
            "re-registrations share the Call-ID"
        );
    }

    #[test]
    fn single_retry_per_challenge() {
        let mut stack = stack("unsecurepassword");
        let req = stack.begin_register(300);

        let retry = stack.on_receive(challenge(&req)).unwrap().unwrap();
        assert!(retry.headers.authorization().is_some());
        assert_eq!(retry.cseq().unwrap().seq, req.cseq().unwrap().seq + 1);
        assert!(stack.failure().is_none());
        assert!(stack.is_pending());

        assert!(stack.on_receive(challenge(&retry)).unwrap().is_none());
        assert!(matches!(stack.take_failure(), Some(SipError::AuthChallenge(_))));
        assert_eq!(stack.status(), Status::Unavailable);
    }

    #[test]
    fn challenge_without_password_fails() {
        let mut stack = stack("");
        let req = stack.begin_register(300);
        assert!(stack.on_receive(challenge(&req)).unwrap().is_none());
        assert!(matches!(stack.take_failure(), Some(SipError::AuthChallenge(_))));
    }

    #[test]
    fn forbidden_register_keeps_status() {
        let mut stack = registered("");
        let req = stack.begin_register(300);
        stack.on_receive(answer(&req, 403)).unwrap();
        assert_eq!(stack.status(), Status::Available);
        assert!(matches!(stack.take_failure(), Some(SipError::AuthChallenge(_))));
    }

    #[test]
    fn unexpected_status_is_not_fatal() {
        let mut stack = registered("");
        let invite = stack.begin_invite().unwrap();
        assert!(stack.on_receive(answer(&invite, 500)).unwrap().is_none());
        assert!(stack.failure().is_none());
        assert!(stack.is_pending());
        assert_eq!(stack.status(), Status::Available);

        stack.on_receive(accepted(&invite)).unwrap();
        assert_eq!(stack.status(), Status::Calling);
        assert!(!stack.is_pending());
    }

    #[test]
    fn challenged_invite_and_bye() {
        let mut stack = registered("unsecurepassword");
        let invite = stack.begin_invite().unwrap();
        let n = invite.cseq().unwrap().seq;

        let retry = stack.on_receive(challenge(&invite)).unwrap().unwrap();
        assert_eq!(retry.method, Method::Invite);
        assert_eq!(retry.cseq().unwrap().seq, n + 1);
        assert_eq!(retry.headers.authorization().unwrap().uri, invite.uri);
        let tx = stack.context().transaction_for(Method::Invite).unwrap();
        assert_eq!(tx.last_request(), Some(&retry));
        assert!(stack.is_pending());

        let ack = stack.on_receive(accepted(&retry)).unwrap().unwrap();
        assert_eq!(ack.cseq().map(|c| (c.seq, c.method)), Some((n + 1, Method::Ack)));
        assert_eq!(stack.status(), Status::Calling);

        let bye = stack.begin_bye().unwrap();
        assert_eq!(bye.cseq().unwrap().seq, n + 2);
        let bye_retry = stack.on_receive(challenge(&bye)).unwrap().unwrap();
        assert_eq!(bye_retry.method, Method::Bye);
        assert_eq!(bye_retry.cseq().unwrap().seq, n + 3);
        assert!(bye_retry.headers.authorization().is_some());

        stack.on_receive(answer(&bye_retry, 200)).unwrap();
        assert_eq!(stack.status(), Status::Available);
        assert!(stack.failure().is_none());
    }

    #[test]
    fn refresh_during_call_keeps_calling() {
        let (mut stack, _) = calling();
        assert_eq!(stack.status_after_register(300), Status::Calling);
        let req = stack.begin_register(300);
        stack.on_receive(granted(&req, 300)).unwrap();
        assert_eq!(stack.status(), Status::Calling);
        assert!(!stack.is_pending());

        let bye = stack.begin_bye().unwrap();
        stack.on_receive(answer(&bye, 200)).unwrap();
        assert_eq!(stack.status(), Status::Available);
    }

    #[test]
    fn unregister_during_call_ends_unavailable() {
        let (mut stack, _) = calling();
        let req = stack.begin_unregister();
        stack.on_receive(granted(&req, 0)).unwrap();
        assert_eq!(stack.status(), Status::Calling);
        assert_eq!(stack.status_after_call(), Status::Unavailable);

        let bye = stack.begin_bye().unwrap();
        stack.on_receive(answer(&bye, 200)).unwrap();
        assert_eq!(stack.status(), Status::Unavailable);
        assert!(matches!(stack.begin_invite(), Err(SipError::Precondition(_))));
    }

    #[test]
    fn stale_invite_success_is_ignored() {
        let (mut stack, invite) = calling();
        let bye = stack.begin_bye().unwrap();
        stack.on_receive(answer(&bye, 200)).unwrap();
        assert_eq!(stack.status(), Status::Available);

        assert!(stack.on_receive(accepted(&invite)).unwrap().is_none());
        assert_eq!(stack.status(), Status::Available);
        let bye_tx = stack.context().transaction_for(Method::Bye).unwrap();
        assert_eq!(bye_tx.responses().len(), 1);
    }

    #[test]
    fn call_flow() {
        let mut stack = registered("");
        let invite = stack.begin_invite().unwrap();

        assert!(stack.on_receive(answer(&invite, 180)).unwrap().is_none());
        assert_eq!(stack.status(), Status::Available);

        let ack = stack.on_receive(accepted(&invite)).unwrap().unwrap();
        assert_eq!(ack.method, Method::Ack);
        assert_eq!(ack.cseq().unwrap().seq, invite.cseq().unwrap().seq);
        assert_eq!(stack.status(), Status::Calling);

        let bye = stack.begin_bye().unwrap();
        assert_eq!(bye.cseq().unwrap().seq, invite.cseq().unwrap().seq + 1);
        assert_eq!(bye.headers.call_id(), invite.headers.call_id());
        assert_eq!(
            bye.headers.to_addr().and_then(|t| t.tag.as_deref()),
            Some("callee")
        );
        stack.on_receive(answer(&bye, 200)).unwrap();
        assert_eq!(stack.status(), Status::Available);
        assert_eq!(stack.context().dialogs()[0].transactions().len(), 2);
    }

    #[test]
    fn preconditions() {
        let mut stack = stack("");
        assert!(matches!(stack.begin_invite(), Err(SipError::Precondition(_))));
        assert!(matches!(stack.begin_bye(), Err(SipError::Precondition(_))));
    }

    #[test]
    fn stray_dialog_response_is_an_error() {
        let mut stack = registered("");
        let mut resp = Response::new(200, "OK");
        resp.add_header(Header::CSeq(CSeq {
            seq: 1,
            method: Method::Bye,
        }));
        assert!(matches!(stack.on_receive(resp), Err(SipError::InvalidState(_))));
        assert_eq!(stack.status(), Status::Available);
    }
}
