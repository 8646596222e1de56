//! In-process transport pairing dialled endpoints with listener peers.
//!
//! Used by tests and by hosts that want to exercise the dispatch core without
//! a kernel IPC service. Event callbacks are invoked with the transport lock
//! held, which keeps per-handle ordering strict; callbacks must not call
//! back into the transport.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::{HostTransport, RawError, RawEvent, RawEventCallback, RawHandle, TRANSPORT_TARGET};
use crate::errors::TransportError;
use crate::event::Blob;

enum EndpointKind {
    Listener { service: String },
    Peer { remote: RawHandle },
}

struct InboundRequest {
    requester: RawHandle,
    on_reply: RawEventCallback,
}

struct Endpoint {
    kind: EndpointKind,
    callback: Option<RawEventCallback>,
    resumed: bool,
    cancelled: bool,
    held: VecDeque<RawEvent>,
    requests: VecDeque<InboundRequest>,
    fail_next_send: Option<TransportError>,
}

impl Endpoint {
    fn new(kind: EndpointKind) -> Self {
        Self {
            kind,
            callback: None,
            resumed: false,
            cancelled: false,
            held: VecDeque::new(),
            requests: VecDeque::new(),
            fail_next_send: None,
        }
    }

    fn deliver(&mut self, event: RawEvent) {
        if self.cancelled {
            return;
        }
        self.held.push_back(event);
        self.flush();
    }

    fn flush(&mut self) {
        if !self.resumed {
            return;
        }
        let Some(callback) = self.callback.clone() else {
            return;
        };
        while let Some(event) = self.held.pop_front() {
            callback(event);
        }
    }
}

#[derive(Default)]
struct LoopbackState {
    next_handle: u64,
    services: HashMap<String, RawHandle>,
    endpoints: HashMap<RawHandle, Endpoint>,
}

impl LoopbackState {
    fn allocate(&mut self, kind: EndpointKind) -> RawHandle {
        self.next_handle = self.next_handle.saturating_add(1);
        let handle = RawHandle::new(self.next_handle);
        self.endpoints.insert(handle, Endpoint::new(kind));
        handle
    }

    fn endpoint_mut(&mut self, handle: RawHandle) -> Result<&mut Endpoint, TransportError> {
        self.endpoints
            .get_mut(&handle)
            .ok_or(TransportError::UnknownHandle {
                handle: handle.value(),
            })
    }

    /// Resolves the remote end of a usable peer handle.
    fn remote_of(&mut self, handle: RawHandle) -> Result<RawHandle, TransportError> {
        let endpoint = self.endpoint_mut(handle)?;
        if endpoint.cancelled {
            return Err(TransportError::Cancelled {
                handle: handle.value(),
            });
        }
        if let Some(error) = endpoint.fail_next_send.take() {
            return Err(error);
        }
        let remote = match &endpoint.kind {
            EndpointKind::Peer { remote } => *remote,
            EndpointKind::Listener { .. } => {
                return Err(TransportError::rejected("listeners cannot carry messages"));
            }
        };
        match self.endpoints.get(&remote) {
            Some(peer) if !peer.cancelled => Ok(remote),
            _ => Err(TransportError::Cancelled {
                handle: remote.value(),
            }),
        }
    }
}

/// In-memory [`HostTransport`].
///
/// Dialling a published service creates two linked handles: the returned
/// client handle and a server-side peer handle delivered to the listener as
/// a connection object. Events for a handle are held until it is resumed and
/// while it is suspended. Cancelling a handle delivers `ConnectionInvalid` to
/// both ends and fails requests still awaiting replies.
#[derive(Default)]
pub struct LoopbackTransport {
    state: Mutex<LoopbackState>,
}

impl LoopbackTransport {
    /// Creates a transport with no published services.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delivers `event` on `handle` as if the host had produced it.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::UnknownHandle` for handles this transport
    /// never issued.
    pub fn inject(&self, handle: RawHandle, event: RawEvent) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.endpoint_mut(handle)?.deliver(event);
        Ok(())
    }

    /// Answers the oldest request addressed to `handle` with `reply`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Rejected` when no request is outstanding.
    pub fn respond(&self, handle: RawHandle, reply: impl Into<Blob>) -> Result<(), TransportError> {
        let mut state = self.lock();
        let request = state
            .endpoint_mut(handle)?
            .requests
            .pop_front()
            .ok_or_else(|| TransportError::rejected(format!("no request awaits a reply on {handle}")))?;
        (request.on_reply)(RawEvent::Dictionary(reply.into()));
        Ok(())
    }

    /// Makes the next send on `handle` fail synchronously with `error`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::UnknownHandle` for handles this transport
    /// never issued.
    pub fn fail_next_send(&self, handle: RawHandle, error: TransportError) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.endpoint_mut(handle)?.fail_next_send = Some(error);
        Ok(())
    }

    /// Remote end linked to a peer handle.
    #[must_use]
    pub fn remote_of(&self, handle: RawHandle) -> Option<RawHandle> {
        let state = self.lock();
        match state.endpoints.get(&handle).map(|endpoint| &endpoint.kind) {
            Some(EndpointKind::Peer { remote }) => Some(*remote),
            Some(EndpointKind::Listener { .. }) | None => None,
        }
    }

    /// Number of requests addressed to `handle` still awaiting a reply.
    #[must_use]
    pub fn outstanding_requests(&self, handle: RawHandle) -> usize {
        self.lock()
            .endpoints
            .get(&handle)
            .map_or(0, |endpoint| endpoint.requests.len())
    }

    /// Whether `handle` has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self, handle: RawHandle) -> bool {
        self.lock()
            .endpoints
            .get(&handle)
            .is_some_and(|endpoint| endpoint.cancelled)
    }

    /// Whether `handle` is currently delivering events.
    #[must_use]
    pub fn is_resumed(&self, handle: RawHandle) -> bool {
        self.lock()
            .endpoints
            .get(&handle)
            .is_some_and(|endpoint| endpoint.resumed && !endpoint.cancelled)
    }
}

impl HostTransport for LoopbackTransport {
    fn accept_connection(&self, service: &str) -> Result<RawHandle, TransportError> {
        let mut state = self.lock();
        if state.services.contains_key(service) {
            return Err(TransportError::rejected(format!(
                "service '{service}' is already published"
            )));
        }
        let handle = state.allocate(EndpointKind::Listener {
            service: service.to_owned(),
        });
        state.services.insert(service.to_owned(), handle);
        debug!(target: TRANSPORT_TARGET, service, %handle, "loopback service published");
        Ok(handle)
    }

    fn dial(&self, service: &str) -> Result<RawHandle, TransportError> {
        let mut state = self.lock();
        let listener = *state
            .services
            .get(service)
            .ok_or_else(|| TransportError::UnknownService {
                service: service.to_owned(),
            })?;
        let client = state.allocate(EndpointKind::Peer {
            remote: RawHandle::new(0),
        });
        let server = state.allocate(EndpointKind::Peer { remote: client });
        state.endpoint_mut(client)?.kind = EndpointKind::Peer { remote: server };
        state
            .endpoint_mut(listener)?
            .deliver(RawEvent::Connection(server));
        debug!(target: TRANSPORT_TARGET, service, %client, %server, "loopback peers linked");
        Ok(client)
    }

    fn set_event_callback(&self, handle: RawHandle, callback: RawEventCallback) {
        let mut state = self.lock();
        if let Ok(endpoint) = state.endpoint_mut(handle)
            && !endpoint.cancelled
        {
            endpoint.callback = Some(callback);
            endpoint.flush();
        }
    }

    fn resume(&self, handle: RawHandle) {
        let mut state = self.lock();
        if let Ok(endpoint) = state.endpoint_mut(handle) {
            endpoint.resumed = true;
            endpoint.flush();
        }
    }

    fn suspend(&self, handle: RawHandle) {
        let mut state = self.lock();
        if let Ok(endpoint) = state.endpoint_mut(handle) {
            endpoint.resumed = false;
        }
    }

    fn cancel(&self, handle: RawHandle) {
        let mut state = self.lock();
        let (requests, remote, service) = {
            let Ok(endpoint) = state.endpoint_mut(handle) else {
                return;
            };
            if endpoint.cancelled {
                return;
            }
            endpoint.held.clear();
            if let Some(callback) = endpoint.callback.take() {
                callback(RawEvent::Error(RawError::ConnectionInvalid));
            }
            endpoint.cancelled = true;
            endpoint.resumed = false;
            let requests: Vec<InboundRequest> = endpoint.requests.drain(..).collect();
            match &endpoint.kind {
                EndpointKind::Listener { service } => (requests, None, Some(service.clone())),
                EndpointKind::Peer { remote } => (requests, Some(*remote), None),
            }
        };
        if let Some(service) = service {
            state.services.remove(&service);
        }

        for request in requests {
            (request.on_reply)(RawEvent::Error(RawError::ConnectionInvalid));
        }
        if let Some(remote) = remote
            && let Some(peer) = state.endpoints.get_mut(&remote)
        {
            let (orphaned, kept): (Vec<InboundRequest>, Vec<InboundRequest>) = peer
                .requests
                .drain(..)
                .partition(|request| request.requester == handle);
            peer.requests = kept.into();
            for request in orphaned {
                (request.on_reply)(RawEvent::Error(RawError::ConnectionInvalid));
            }
            peer.deliver(RawEvent::Error(RawError::ConnectionInvalid));
        }
        debug!(target: TRANSPORT_TARGET, %handle, "loopback handle cancelled");
    }

    fn send(&self, handle: RawHandle, message: Blob) -> Result<(), TransportError> {
        let mut state = self.lock();
        let remote = state.remote_of(handle)?;
        state.endpoint_mut(remote)?.deliver(RawEvent::Dictionary(message));
        Ok(())
    }

    fn send_with_reply(
        &self,
        handle: RawHandle,
        message: Blob,
        on_reply: RawEventCallback,
    ) -> Result<(), TransportError> {
        let mut state = self.lock();
        let remote = state.remote_of(handle)?;
        let peer = state.endpoint_mut(remote)?;
        peer.requests.push_back(InboundRequest {
            requester: handle,
            on_reply,
        });
        peer.deliver(RawEvent::Dictionary(message));
        Ok(())
    }
}
