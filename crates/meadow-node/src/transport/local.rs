//! In-process transport over tokio channels.
//!
//! Every node owns one unbounded inbox; every node holds a sender to every
//! inbox. Messages travel as encoded [`Frame`]s so the wire codec is on the
//! path exactly as it would be over a socket. Per-pair delivery is FIFO and
//! lossless for as long as the receiving transport is alive.

use std::sync::Arc;

use bytes::Bytes;
use meadow_protocol::{Frame, Message, NodeId};
use tokio::sync::{mpsc, Mutex};
use tracing::trace;

use super::Transport;
use crate::error::{Error, Result};

/// Factory for a fully connected in-process cluster.
pub struct LocalNetwork;

impl LocalNetwork {
    /// Create transports for nodes `0..nodes`, in id order.
    pub fn new(nodes: usize) -> Vec<LocalTransport> {
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..nodes).map(|_| mpsc::unbounded_channel::<Bytes>()).unzip();
        let peers = Arc::new(senders);

        receivers
            .into_iter()
            .enumerate()
            .map(|(id, inbox)| LocalTransport {
                id: id as NodeId,
                peers: Arc::clone(&peers),
                inbox: Mutex::new(inbox),
            })
            .collect()
    }
}

/// One node's endpoint on a [`LocalNetwork`].
pub struct LocalTransport {
    id: NodeId,
    peers: Arc<Vec<mpsc::UnboundedSender<Bytes>>>,
    inbox: Mutex<mpsc::UnboundedReceiver<Bytes>>,
}

impl std::fmt::Debug for LocalTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTransport")
            .field("id", &self.id)
            .field("cluster_size", &self.peers.len())
            .finish()
    }
}

impl LocalTransport {
    fn deliver(&self, to: NodeId, frame: Bytes) -> Result<()> {
        let peer = self
            .peers
            .get(to as usize)
            .ok_or_else(|| {
                Error::Transport(format!("no node {to} in a cluster of {}", self.peers.len()))
            })?;
        peer.send(frame).map_err(|_| Error::ChannelClosed)
    }
}

impl Transport for LocalTransport {
    fn local_id(&self) -> NodeId {
        self.id
    }

    fn cluster_size(&self) -> usize {
        self.peers.len()
    }

    async fn send(&self, to: NodeId, message: Message) -> Result<()> {
        if to == self.id {
            return Err(Error::Transport(format!("node {to} cannot send to itself")));
        }
        trace!(from = self.id, to, %message, "send");
        self.deliver(to, Frame::encode(&message)?)
    }

    async fn broadcast(&self, message: Message) -> Result<()> {
        trace!(from = self.id, %message, "broadcast");
        let frame = Frame::encode(&message)?;
        for to in (0..self.peers.len() as NodeId).filter(|&to| to != self.id) {
            self.deliver(to, frame.clone())?;
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Message> {
        let frame = self
            .inbox
            .lock()
            .await
            .recv()
            .await
            .ok_or(Error::ChannelClosed)?;
        Ok(Frame::decode(&frame)?)
    }
}
