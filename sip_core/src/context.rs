use crate::{
    dialog::Dialog,
    message::{Method, Request, Response},
    transaction::Transaction,
    Result, SipError,
};

/// Session history for one client: the registration lineage and every dialog.
///
/// REGISTER traffic goes to the register transaction, everything else to the
/// newest transaction of the newest dialog.
#[derive(Debug, Clone, Default)]
pub struct Context {
    register_transaction: Option<Transaction>,
    dialogs: Vec<Dialog>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_transaction(&self) -> Option<&Transaction> {
        self.register_transaction.as_ref()
    }

    /// Register transaction, created on first use.
    pub fn register_transaction_mut(&mut self) -> &mut Transaction {
        self.register_transaction.get_or_insert_with(Transaction::new)
    }

    pub fn dialogs(&self) -> &[Dialog] {
        &self.dialogs
    }

    pub fn open_dialog(&mut self, dialog: Dialog) -> &mut Dialog {
        self.dialogs.push(dialog);
        let last = self.dialogs.len() - 1;
        &mut self.dialogs[last]
    }

    pub fn active_dialog(&self) -> Option<&Dialog> {
        self.dialogs.last()
    }

    pub fn active_dialog_mut(&mut self) -> Option<&mut Dialog> {
        self.dialogs.last_mut()
    }

    pub fn transaction_for(&self, method: Method) -> Option<&Transaction> {
        match method {
            Method::Register => self.register_transaction.as_ref(),
            _ => self.active_dialog()?.active(),
        }
    }

    pub fn transaction_for_mut(&mut self, method: Method) -> Result<&mut Transaction> {
        match method {
            Method::Register => self
                .register_transaction
                .as_mut()
                .ok_or(SipError::InvalidState("no register transaction")),
            _ => self
                .dialogs
                .last_mut()
                .and_then(Dialog::active_mut)
                .ok_or(SipError::InvalidState("no open dialog")),
        }
    }

    pub fn add_request(&mut self, request: Request) -> Result<()> {
        self.transaction_for_mut(request.method)?.add_request(request);
        Ok(())
    }

    pub fn add_response(&mut self, response: Response) -> Result<()> {
        let method = response
            .method()
            .ok_or_else(|| SipError::Parse("response without CSeq".into()))?;
        self.transaction_for_mut(method)?.add_response(response);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{CSeq, Header};

    fn response(status: u16, method: Method) -> Response {
        let mut resp = Response::new(status, "OK");
        resp.add_header(Header::CSeq(CSeq { seq: 1, method }));
        resp
    }

    #[test]
    fn routes_register_and_dialog_traffic() {
        let mut ctx = Context::new();
        ctx.register_transaction_mut();
        ctx.open_dialog(Dialog::new("sip:6002@un100", Transaction::new()));

        ctx.add_response(response(200, Method::Register)).unwrap();
        ctx.add_response(response(200, Method::Invite)).unwrap();
        ctx.add_request(Request::new(Method::Ack, "sip:6002@un100")).unwrap();

        assert_eq!(ctx.register_transaction().unwrap().responses().len(), 1);
        let tx = ctx.transaction_for(Method::Bye).unwrap();
        assert_eq!(tx.responses().len(), 1);
        assert_eq!(tx.requests().len(), 1);
    }

    #[test]
    fn newest_dialog_wins() {
        let mut ctx = Context::new();
        ctx.open_dialog(Dialog::new("sip:a@un100", Transaction::new()));
        ctx.open_dialog(Dialog::new("sip:b@un100", Transaction::new()));
        ctx.add_response(response(200, Method::Invite)).unwrap();

        assert!(ctx.dialogs()[0].active().unwrap().responses().is_empty());
        assert_eq!(ctx.dialogs()[1].active().unwrap().responses().len(), 1);
    }

    #[test]
    fn dialog_traffic_without_dialog_is_rejected() {
        let mut ctx = Context::new();
        let err = ctx.add_response(response(200, Method::Bye)).unwrap_err();
        assert!(matches!(err, SipError::InvalidState(_)));
        let err = ctx.add_response(Response::new(200, "OK")).unwrap_err();
        assert!(matches!(err, SipError::Parse(_)));
    }
}
