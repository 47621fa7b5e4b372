//! In-memory kernel used by tests: scriptable replies, drivable status
//! transitions, and inspectable comm traffic.

use super::{
    Comm, CommEvent, CommSink, ConnectionStatus, KernelConnection, KernelStatus, KernelTransport,
    TransportError,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

/// Scripted reply policy: given the comm target and the request, return the
/// messages the kernel pushes back. An empty vec means the kernel stays
/// silent, which is how timeout paths are exercised.
pub type Responder = Box<dyn FnMut(&str, &Value) -> Vec<Value> + Send>;

pub struct MockKernel {
    state: Arc<MockState>,
}

struct MockState {
    client_session_id: String,
    connection_status: Mutex<ConnectionStatus>,
    kernel_status: Mutex<KernelStatus>,
    connection_tx: broadcast::Sender<ConnectionStatus>,
    kernel_tx: broadcast::Sender<KernelStatus>,
    responder: Mutex<Option<Responder>>,
    comms: Mutex<Vec<Arc<MockComm>>>,
    connect_count: AtomicUsize,
    disposed: AtomicBool,
}

impl MockKernel {
    pub fn new() -> Self {
        let (connection_tx, _) = broadcast::channel(64);
        let (kernel_tx, _) = broadcast::channel(64);
        Self {
            state: Arc::new(MockState {
                client_session_id: Uuid::new_v4().to_string(),
                connection_status: Mutex::new(ConnectionStatus::Connecting),
                kernel_status: Mutex::new(KernelStatus::Unknown),
                connection_tx,
                kernel_tx,
                responder: Mutex::new(None),
                comms: Mutex::new(Vec::new()),
                connect_count: AtomicUsize::new(0),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn respond_with<F>(&self, responder: F)
    where
        F: FnMut(&str, &Value) -> Vec<Value> + Send + 'static,
    {
        *self.state.responder.lock() = Some(Box::new(responder));
    }

    /// Drive a connection-status transition, as the real socket layer would.
    pub fn set_connection_status(&self, status: ConnectionStatus) {
        *self.state.connection_status.lock() = status;
        let _ = self.state.connection_tx.send(status);
    }

    pub fn set_kernel_status(&self, status: KernelStatus) {
        *self.state.kernel_status.lock() = status;
        let _ = self.state.kernel_tx.send(status);
    }

    pub fn connect_count(&self) -> usize {
        self.state.connect_count.load(Ordering::SeqCst)
    }

    pub fn disposed(&self) -> bool {
        self.state.disposed.load(Ordering::SeqCst)
    }

    /// All comms opened so far, oldest first.
    pub fn comms(&self) -> Vec<Arc<MockComm>> {
        self.state.comms.lock().clone()
    }

    /// The most recently opened comm for a target, if any.
    pub fn last_comm(&self, target: &str) -> Option<Arc<MockComm>> {
        self.state
            .comms
            .lock()
            .iter()
            .rev()
            .find(|comm| comm.target == target)
            .cloned()
    }
}

impl Default for MockKernel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KernelTransport for MockKernel {
    async fn connect(&self, kernel_id: &str) -> Result<Arc<dyn KernelConnection>, TransportError> {
        self.state.connect_count.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockConnection {
            kernel_id: kernel_id.to_string(),
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockConnection {
    kernel_id: String,
    state: Arc<MockState>,
}

#[async_trait]
impl KernelConnection for MockConnection {
    fn kernel_id(&self) -> &str {
        &self.kernel_id
    }

    fn client_session_id(&self) -> &str {
        &self.state.client_session_id
    }

    fn connection_status(&self) -> ConnectionStatus {
        *self.state.connection_status.lock()
    }

    fn kernel_status(&self) -> KernelStatus {
        *self.state.kernel_status.lock()
    }

    fn subscribe_connection_status(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.state.connection_tx.subscribe()
    }

    fn subscribe_kernel_status(&self) -> broadcast::Receiver<KernelStatus> {
        self.state.kernel_tx.subscribe()
    }

    async fn open_comm(&self, target: &str) -> Result<Comm, TransportError> {
        if self.state.disposed.load(Ordering::SeqCst) {
            return Err(TransportError::CommClosed);
        }
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let comm = Arc::new(MockComm {
            target: target.to_string(),
            comm_id: Uuid::new_v4().to_string(),
            inbound: inbound_tx,
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        self.state.comms.lock().push(Arc::clone(&comm));
        Ok(Comm {
            comm_id: comm.comm_id.clone(),
            tx: Box::new(MockCommSink {
                comm,
                state: Arc::clone(&self.state),
            }),
            rx: inbound_rx,
        })
    }

    async fn dispose(&self) {
        self.state.disposed.store(true, Ordering::SeqCst);
        for comm in self.state.comms.lock().iter() {
            comm.close_from_kernel();
        }
    }
}

/// Kernel-side view of an open comm.
pub struct MockComm {
    pub target: String,
    pub comm_id: String,
    inbound: mpsc::UnboundedSender<CommEvent>,
    sent: Mutex<Vec<Value>>,
    closed: AtomicBool,
}

impl MockComm {
    /// Push a message toward the client, bypassing the responder. Used for
    /// unsolicited messages and late replies.
    pub fn push(&self, message: Value) {
        let _ = self.inbound.send(CommEvent::Message(message));
    }

    pub fn close_from_kernel(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.inbound.send(CommEvent::Closed);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Messages the client has sent on this comm, oldest first.
    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().clone()
    }
}

struct MockCommSink {
    comm: Arc<MockComm>,
    state: Arc<MockState>,
}

#[async_trait]
impl CommSink for MockCommSink {
    async fn send(&self, message: Value) -> Result<(), TransportError> {
        if self.comm.closed.load(Ordering::SeqCst) {
            return Err(TransportError::CommClosed);
        }
        self.comm.sent.lock().push(message.clone());
        let replies = {
            let mut responder = self.state.responder.lock();
            match responder.as_mut() {
                Some(respond) => respond(&self.comm.target, &message),
                None => Vec::new(),
            }
        };
        for reply in replies {
            self.comm.push(reply);
        }
        Ok(())
    }

    async fn close(&self) {
        self.comm.close_from_kernel();
    }
}
