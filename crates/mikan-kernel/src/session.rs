//! Synchronous IPC sessions and ports.
//!
//! A session is a pair of endpoints holding nullable ids of each other; destroying either
//! endpoint clears its peer's back-reference, so the survivor observes "closed by remote"
//! instead of dangling. A client's `SendSyncRequest` parks the calling thread on the server
//! session until a server thread replies through `ReplyAndReceive` or the session dies.
//!
//! Ports are the rendezvous for establishing sessions: `connect` on a client port creates a
//! session pair and queues the server end on the server port, where an `accept` picks it up.
//! Named ports are registered on the kernel and looked up by `ConnectToPort`.

use tracing::warn;

use crate::object::{ObjectData, ObjectId};
use crate::result::{
    ResultCode, ERR_MAX_CONNECTIONS_REACHED, ERR_NO_PENDING_SESSIONS,
    ERR_SESSION_CLOSED_BY_REMOTE, RESULT_SUCCESS,
};
use crate::thread::ThreadStatus;
use crate::Kernel;

/// Longest accepted port name, not counting the terminator.
pub const PORT_NAME_MAX_LENGTH: u32 = 11;

#[derive(Debug)]
pub struct ClientSession {
    /// Peer endpoint; `None` once the server side has been destroyed.
    pub server: Option<ObjectId>,
    /// Port this session was established through, if any.
    pub port: Option<ObjectId>,
}

#[derive(Debug)]
pub struct ServerSession {
    /// Peer endpoint; `None` once the client side has been destroyed.
    pub client: Option<ObjectId>,
    /// Threads parked in `SendSyncRequest`, most recent last.
    pub(crate) pending_requesting_threads: Vec<ObjectId>,
    /// The request a server thread is currently servicing, between receive and reply.
    pub(crate) currently_handling: Option<ObjectId>,
}

#[derive(Debug)]
pub struct ClientPort {
    pub(crate) server_port: Option<ObjectId>,
    pub max_sessions: u32,
    pub(crate) active_sessions: u32,
}

#[derive(Debug)]
pub struct ServerPort {
    pub(crate) pending_sessions: Vec<ObjectId>,
}

impl Kernel {
    /// Creates a connected session pair. Caller owns one reference to each endpoint.
    pub fn create_session_pair(
        &mut self,
        port: Option<ObjectId>,
        name: &str,
    ) -> (ObjectId, ObjectId) {
        let server = self.insert_object(
            format!("{name}_server"),
            ObjectData::ServerSession(ServerSession {
                client: None,
                pending_requesting_threads: Vec::new(),
                currently_handling: None,
            }),
        );
        let client = self.insert_object(
            format!("{name}_client"),
            ObjectData::ClientSession(ClientSession { server: Some(server), port }),
        );
        if let Some(port) = port {
            self.retain(port);
        }
        self.server_session_mut(server).client = Some(client);
        (server, client)
    }

    /// Creates a connected port pair with a connection limit. Caller owns one reference to
    /// each end.
    pub fn create_port_pair(&mut self, max_sessions: u32, name: &str) -> (ObjectId, ObjectId) {
        let server = self.insert_object(
            format!("{name}_server"),
            ObjectData::ServerPort(ServerPort {
                pending_sessions: Vec::new(),
            }),
        );
        let client = self.insert_object(
            format!("{name}_client"),
            ObjectData::ClientPort(ClientPort {
                server_port: Some(server),
                max_sessions,
                active_sessions: 0,
            }),
        );
        // The client port keeps its server end alive.
        self.retain(server);
        (server, client)
    }

    /// Publishes a client port under a name resolvable by `ConnectToPort`.
    pub fn register_named_port(&mut self, name: &str, client_port: ObjectId) {
        self.retain(client_port);
        if let Some(previous) = self.named_ports.insert(name.to_owned(), client_port) {
            warn!(name, "named port re-registered");
            self.release(previous);
        }
    }

    pub fn named_port(&self, name: &str) -> Option<ObjectId> {
        self.named_ports.get(name).copied()
    }

    /// Establishes a new session through `client_port`, honouring its connection limit.
    /// Returns the client session with a caller-owned reference.
    pub fn connect_to_port(&mut self, client_port: ObjectId) -> Result<ObjectId, ResultCode> {
        let (max_sessions, active_sessions, server_port) = {
            let port = self.client_port(client_port);
            (port.max_sessions, port.active_sessions, port.server_port)
        };
        if active_sessions >= max_sessions {
            return Err(ERR_MAX_CONNECTIONS_REACHED);
        }
        self.client_port_mut(client_port).active_sessions += 1;
        let name = self.object(client_port).expect("stale port id").name.clone();
        let (server, client) = self.create_session_pair(Some(client_port), &name);
        match server_port {
            Some(server_port) => {
                // The caller's server-session reference moves into the pending queue.
                self.server_port_mut(server_port).pending_sessions.push(server);
                self.wakeup_all_waiting_threads(server_port);
            }
            None => self.release(server),
        }
        Ok(client)
    }

    /// Pops the oldest pending session off a server port. The reference moves to the caller.
    pub fn accept_session(&mut self, server_port: ObjectId) -> Result<ObjectId, ResultCode> {
        let port = self.server_port_mut(server_port);
        if port.pending_sessions.is_empty() {
            return Err(ERR_NO_PENDING_SESSIONS);
        }
        Ok(port.pending_sessions.remove(0))
    }

    /// Client half of the synchronous rendezvous: parks `thread` on the server session until
    /// a reply arrives or the session dies.
    pub fn send_sync_request(&mut self, client_session: ObjectId, thread: ObjectId) -> ResultCode {
        let server = self.client_session(client_session).server;
        let Some(server) = server else {
            return ERR_SESSION_CLOSED_BY_REMOTE;
        };
        self.retain(thread);
        self.server_session_mut(server)
            .pending_requesting_threads
            .push(thread);
        self.thread_mut(thread).status = ThreadStatus::WaitIpc;
        // New data available: wake a server thread blocked in ReplyAndReceive.
        self.wakeup_all_waiting_threads(server);
        RESULT_SUCCESS
    }

    // Acquire half of the wait-object contract: pop the most recent pending request into the
    // handling slot. A session whose client is gone has nothing to pop; the error surfaces
    // on receive.
    pub(crate) fn acquire_server_session(&mut self, session: ObjectId) {
        let state = self.server_session_mut(session);
        if state.client.is_none() {
            return;
        }
        debug_assert!(state.currently_handling.is_none());
        let request = state
            .pending_requesting_threads
            .pop()
            .expect("acquired server session without a pending request");
        state.currently_handling = Some(request);
    }

    /// Receive-side translation when a server thread picks up a request. `Err(())` means the
    /// translation failed: the client has already been resumed with the error and the server
    /// thread must go back to waiting.
    pub(crate) fn receive_ipc_request(
        &mut self,
        session: ObjectId,
        server_thread: ObjectId,
    ) -> Result<ResultCode, ()> {
        if self.server_session(session).client.is_none() {
            return Ok(ERR_SESSION_CLOSED_BY_REMOTE);
        }
        let client_thread = self
            .server_session(session)
            .currently_handling
            .expect("receive without a request being handled");
        let source = self.thread(client_thread).command_buffer_address();
        let target = self.thread(server_thread).command_buffer_address();
        match self.translate_command_buffer(client_thread, server_thread, source, target) {
            Ok(()) => Ok(RESULT_SUCCESS),
            Err(code) => {
                // The client gets the translation error directly; the server never sees the
                // request.
                self.server_session_mut(session).currently_handling = None;
                self.set_thread_wait_result(client_thread, code);
                self.resume_from_wait(client_thread);
                self.release(client_thread);
                Err(())
            }
        }
    }

    pub(crate) fn client_session(&self, id: ObjectId) -> &ClientSession {
        match &self.object(id).expect("stale client session id").data {
            ObjectData::ClientSession(session) => session,
            _ => panic!("object {id:?} is not a client session"),
        }
    }

    pub(crate) fn server_session(&self, id: ObjectId) -> &ServerSession {
        match &self.object(id).expect("stale server session id").data {
            ObjectData::ServerSession(session) => session,
            _ => panic!("object {id:?} is not a server session"),
        }
    }

    pub(crate) fn server_session_mut(&mut self, id: ObjectId) -> &mut ServerSession {
        match &mut self.object_mut(id).expect("stale server session id").data {
            ObjectData::ServerSession(session) => session,
            _ => panic!("object {id:?} is not a server session"),
        }
    }

    pub(crate) fn client_port(&self, id: ObjectId) -> &ClientPort {
        match &self.object(id).expect("stale client port id").data {
            ObjectData::ClientPort(port) => port,
            _ => panic!("object {id:?} is not a client port"),
        }
    }

    pub(crate) fn client_port_mut(&mut self, id: ObjectId) -> &mut ClientPort {
        match &mut self.object_mut(id).expect("stale client port id").data {
            ObjectData::ClientPort(port) => port,
            _ => panic!("object {id:?} is not a client port"),
        }
    }

    pub(crate) fn server_port_mut(&mut self, id: ObjectId) -> &mut ServerPort {
        match &mut self.object_mut(id).expect("stale server port id").data {
            ObjectData::ServerPort(port) => port,
            _ => panic!("object {id:?} is not a server port"),
        }
    }
}
