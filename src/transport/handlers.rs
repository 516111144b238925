use raft::message::{
    AppendEntriesReq, AppendEntriesResp, Message, RequestVoteReq, RequestVoteResp, Rpc,
    ServerRef, TermId,
};

use crate::error::ConfigError;

type Handler<X> = Box<dyn Fn(ServerRef, TermId, X) + Send + Sync>;
type ConnectedHandler = Box<dyn Fn(ServerRef) + Send + Sync>;
type ErrorHandler = Box<dyn Fn(ServerRef, String) + Send + Sync>;

/// One callback per Raft message kind, plus the lifecycle of our own connections, fixed before the transport starts.
///
/// Message handlers run on the reader thread of the connection the message arrived on, connection handlers on the
/// transport's control thread. Either way they should hand the event off rather than block.
#[derive(Default)]
pub struct Handlers {
    append_entries_req: Option<Handler<AppendEntriesReq>>,
    append_entries_resp: Option<Handler<AppendEntriesResp>>,
    request_vote_req: Option<Handler<RequestVoteReq>>,
    request_vote_resp: Option<Handler<RequestVoteResp>>,
    connected: Option<ConnectedHandler>,
    error: Option<ErrorHandler>,
}

#[derive(Default)]
pub struct HandlersBuilder {
    handlers: Handlers,
}

impl Handlers {
    pub fn builder() -> HandlersBuilder {
        HandlersBuilder::default()
    }

    pub(crate) fn dispatch(&self, from: ServerRef, message: Message) {
        let Message { term, rpc } = message;
        let kind = rpc.kind();
        let handled = match rpc {
            Rpc::AppendEntriesReq(req) => call(&self.append_entries_req, from.clone(), term, req),
            Rpc::AppendEntriesResp(resp) => {
                call(&self.append_entries_resp, from.clone(), term, resp)
            }
            Rpc::RequestVoteReq(req) => call(&self.request_vote_req, from.clone(), term, req),
            Rpc::RequestVoteResp(resp) => call(&self.request_vote_resp, from.clone(), term, resp),
        };
        if !handled {
            warn!("no handler for {} from {}, dropped", kind, from);
        }
    }

    pub(crate) fn connected(&self, peer: &ServerRef) {
        if let Some(handler) = &self.connected {
            handler(peer.clone());
        }
    }

    /// Our connection to `peer`, pending or working, is gone.
    pub(crate) fn error(&self, peer: &ServerRef, reason: String) {
        if let Some(handler) = &self.error {
            handler(peer.clone(), reason);
        }
    }
}

impl HandlersBuilder {
    pub fn on_append_entries_req<F>(mut self, handler: F) -> Result<Self, ConfigError>
    where
        F: Fn(ServerRef, TermId, AppendEntriesReq) + Send + Sync + 'static,
    {
        set_once(&mut self.handlers.append_entries_req, "AppendEntriesReq", handler)?;
        Ok(self)
    }

    pub fn on_append_entries_resp<F>(mut self, handler: F) -> Result<Self, ConfigError>
    where
        F: Fn(ServerRef, TermId, AppendEntriesResp) + Send + Sync + 'static,
    {
        set_once(&mut self.handlers.append_entries_resp, "AppendEntriesResp", handler)?;
        Ok(self)
    }

    pub fn on_request_vote_req<F>(mut self, handler: F) -> Result<Self, ConfigError>
    where
        F: Fn(ServerRef, TermId, RequestVoteReq) + Send + Sync + 'static,
    {
        set_once(&mut self.handlers.request_vote_req, "RequestVoteReq", handler)?;
        Ok(self)
    }

    pub fn on_request_vote_resp<F>(mut self, handler: F) -> Result<Self, ConfigError>
    where
        F: Fn(ServerRef, TermId, RequestVoteResp) + Send + Sync + 'static,
    {
        set_once(&mut self.handlers.request_vote_resp, "RequestVoteResp", handler)?;
        Ok(self)
    }

    /// Called once a connection we opened to a peer is ready to carry messages.
    pub fn on_connected<F>(mut self, handler: F) -> Result<Self, ConfigError>
    where
        F: Fn(ServerRef) + Send + Sync + 'static,
    {
        ensure_unset(&self.handlers.connected, "connected")?;
        self.handlers.connected = Some(Box::new(handler));
        Ok(self)
    }

    /// Called once per connection we opened, or tried to open, that failed or was closed.
    pub fn on_error<F>(mut self, handler: F) -> Result<Self, ConfigError>
    where
        F: Fn(ServerRef, String) + Send + Sync + 'static,
    {
        ensure_unset(&self.handlers.error, "error")?;
        self.handlers.error = Some(Box::new(handler));
        Ok(self)
    }

    /// Route every kind of message, as a whole [`Message`], to one callback.
    pub fn on_any_message<F>(self, handler: F) -> Result<Self, ConfigError>
    where
        F: Fn(ServerRef, Message) + Send + Sync + Clone + 'static,
    {
        let (a, b, c, d) = (handler.clone(), handler.clone(), handler.clone(), handler);
        self.on_append_entries_req(move |from, term, req| {
            a(from, message(term, Rpc::AppendEntriesReq(req)))
        })?
        .on_append_entries_resp(move |from, term, resp| {
            b(from, message(term, Rpc::AppendEntriesResp(resp)))
        })?
        .on_request_vote_req(move |from, term, req| {
            c(from, message(term, Rpc::RequestVoteReq(req)))
        })?
        .on_request_vote_resp(move |from, term, resp| {
            d(from, message(term, Rpc::RequestVoteResp(resp)))
        })
    }

    pub fn build(self) -> Handlers {
        self.handlers
    }
}

fn set_once<X, F>(
    slot: &mut Option<Handler<X>>,
    kind: &'static str,
    handler: F,
) -> Result<(), ConfigError>
where
    F: Fn(ServerRef, TermId, X) + Send + Sync + 'static,
{
    ensure_unset(slot, kind)?;
    *slot = Some(Box::new(handler));
    Ok(())
}

fn ensure_unset<T: ?Sized>(slot: &Option<Box<T>>, kind: &'static str) -> Result<(), ConfigError> {
    match slot {
        Some(_) => Err(ConfigError::HandlerAlreadySet(kind)),
        None => Ok(()),
    }
}

fn call<X>(handler: &Option<Handler<X>>, from: ServerRef, term: TermId, body: X) -> bool {
    match handler {
        Some(handler) => {
            handler(from, term, body);
            true
        }
        None => false,
    }
}

fn message(term: TermId, rpc: Rpc) -> Message {
    Message { term, rpc }
}
