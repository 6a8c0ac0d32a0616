use log::trace;
use rand::{distr::Alphanumeric, Rng};

use crate::{
    message::{Request, Response},
    BRANCH_MAGIC,
};

/// One request/response lineage and the identifiers binding it.
///
/// Tags, sequence numbers, branch and Call-ID are refreshed from every
/// message passed to [`Transaction::add_request`] / [`Transaction::add_response`];
/// they cannot be set directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    local_tag: String,
    branch: String,
    call_id: String,
    local_sequence: u32,
    remote_tag: Option<String>,
    remote_sequence: Option<u32>,
    requests: Vec<Request>,
    responses: Vec<Response>,
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Transaction {
    /// Fresh identity: new tag, branch, Call-ID and a random starting CSeq.
    pub fn new() -> Self {
        Self {
            local_tag: random_token(32),
            branch: new_branch(),
            call_id: random_token(32),
            local_sequence: rand::rng().random_range(1..=u16::MAX as u32),
            remote_tag: None,
            remote_sequence: None,
            requests: Vec::new(),
            responses: Vec::new(),
        }
    }

    /// Next transaction of the same dialog: identity kept, CSeq + 1, new branch.
    pub fn follow_up(previous: &Transaction) -> Self {
        Self {
            local_tag: previous.local_tag.clone(),
            branch: new_branch(),
            call_id: previous.call_id.clone(),
            local_sequence: previous.next_sequence(),
            remote_tag: previous.remote_tag.clone(),
            remote_sequence: None,
            requests: Vec::new(),
            responses: Vec::new(),
        }
    }

    pub fn add_request(&mut self, request: Request) {
        if let Some(tag) = request.headers.from_addr().and_then(|f| f.tag.as_ref()) {
            self.local_tag.clone_from(tag);
        }
        if let Some(cseq) = request.headers.cseq() {
            self.local_sequence = cseq.seq;
        }
        trace!("tx {} += {} request", self.call_id, request.method);
        self.requests.push(request);
    }

    pub fn add_response(&mut self, response: Response) {
        let headers = &response.headers;
        if let Some(tag) = headers.to_addr().and_then(|t| t.tag.as_ref()) {
            self.remote_tag = Some(tag.clone());
        }
        if let Some(via) = headers.via() {
            self.branch.clone_from(&via.branch);
        }
        if let Some(call_id) = headers.call_id() {
            self.call_id = call_id.to_string();
        }
        if let Some(cseq) = headers.cseq() {
            self.remote_sequence = Some(cseq.seq);
        }
        trace!("tx {} += {} response", self.call_id, response.status_code);
        self.responses.push(response);
    }

    pub fn local_tag(&self) -> &str {
        &self.local_tag
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn local_sequence(&self) -> u32 {
        self.local_sequence
    }

    pub fn next_sequence(&self) -> u32 {
        self.local_sequence + 1
    }

    pub fn remote_tag(&self) -> Option<&str> {
        self.remote_tag.as_deref()
    }

    pub fn remote_sequence(&self) -> Option<u32> {
        self.remote_sequence
    }

    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    pub fn responses(&self) -> &[Response] {
        &self.responses
    }

    pub fn last_request(&self) -> Option<&Request> {
        self.requests.last()
    }

    pub fn last_response(&self) -> Option<&Response> {
        self.responses.last()
    }

    /// Last request together with a mutable handle on the last response.
    pub(crate) fn last_exchange_mut(&mut self) -> Option<(&Request, &mut Response)> {
        Some((self.requests.last()?, self.responses.last_mut()?))
    }
}

pub(crate) fn random_token(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

pub fn new_branch() -> String {
    format!("{BRANCH_MAGIC}{}", random_token(24))
}
