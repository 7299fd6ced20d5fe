use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::channel::{
    ChannelEvent, ChannelHandle, ChannelRequest, CloseInitiator, Connector, Outbound,
};
use crate::error::TransportError;

const WAIT: Duration = Duration::from_secs(2);

/// Server side of a channel opened through [`FakeConnector`].
pub(crate) struct FakeSocket {
    pub request: ChannelRequest,
    events: mpsc::UnboundedSender<ChannelEvent>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
}

impl FakeSocket {
    pub fn conn_id(&self) -> Uuid {
        self.request.conn_id
    }

    pub fn accept(&self) {
        let _ = self.events.send(ChannelEvent::Opened {
            conn_id: self.conn_id(),
        });
    }

    pub fn frame(&self, text: &str) {
        let _ = self.events.send(ChannelEvent::Frame {
            conn_id: self.conn_id(),
            text: text.to_string(),
        });
    }

    pub fn close_remote(&self) {
        let _ = self.events.send(ChannelEvent::Closed {
            conn_id: self.conn_id(),
            initiator: CloseInitiator::Remote,
        });
    }

    pub fn fail(&self, error: TransportError) {
        let _ = self.events.send(ChannelEvent::Failed {
            conn_id: self.conn_id(),
            error,
        });
    }

    pub async fn next_outbound(&mut self) -> Option<Outbound> {
        tokio::time::timeout(WAIT, self.outbound.recv()).await.ok().flatten()
    }
}

#[derive(Default, Clone)]
pub(crate) struct FakeConnector {
    sockets: Arc<Mutex<VecDeque<FakeSocket>>>,
    opened: Arc<AtomicUsize>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// The next channel the manager opens, in open order.
    pub async fn next_socket(&self) -> FakeSocket {
        let poll = async {
            loop {
                if let Some(socket) = self.sockets.lock().unwrap().pop_front() {
                    return socket;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(WAIT, poll)
            .await
            .expect("no channel was opened")
    }
}

impl Connector for FakeConnector {
    fn open(
        &self,
        request: ChannelRequest,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> ChannelHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn_id = request.conn_id;
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.sockets.lock().unwrap().push_back(FakeSocket {
            request,
            events,
            outbound: rx,
        });
        ChannelHandle::new(conn_id, tx, None)
    }
}

/// Wait for the first event matching `pred`, skipping the rest.
pub(crate) async fn wait_for<E: Clone>(
    rx: &mut broadcast::Receiver<E>,
    pred: impl Fn(&E) -> bool,
) -> E {
    let poll = async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
            }
        }
    };
    tokio::time::timeout(WAIT, poll)
        .await
        .expect("timed out waiting for event")
}

/// Give spawned tasks and the actor a moment to drain.
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
