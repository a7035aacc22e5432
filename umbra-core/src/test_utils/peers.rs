//! In-memory peers running a full node

use crate::config::NodeConfig;
use crate::core_log::{MemoryNetwork, MemoryPeer};
use crate::core_store::StoreResult;
use crate::node::{Backends, Node};
use crate::notify::{MemorySink, Notification};
use std::sync::Arc;
use std::time::Duration;

use super::fixtures::{root_pem, FakeVerifier};

/// How long tests wait for an asynchronous push
pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);

/// Builder for a node on a `MemoryNetwork`
pub struct TestPeer {
    peer: MemoryPeer,
    config: NodeConfig,
}

impl TestPeer {
    /// Peer on a fresh network of its own
    pub fn new(id: &str) -> Self {
        Self::on(&MemoryNetwork::new(), id)
    }

    /// Peer on `network`, trusting the fixture root `root`
    pub fn on(network: &MemoryNetwork, id: &str) -> Self {
        let config = NodeConfig::new(id)
            .with_root_pem(root_pem("root"))
            .with_fetch_timeout(Duration::from_millis(500));
        Self { peer: network.peer(id), config }
    }

    pub fn producer(mut self) -> Self {
        self.config.snapshot.create_snapshot = true;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.config.snapshot.fetch_timeout = timeout;
        self
    }

    pub fn with_config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    pub async fn try_start(self) -> StoreResult<RunningPeer> {
        let sink = Arc::new(MemorySink::new());
        let backends = Backends::memory(&self.peer, Arc::new(FakeVerifier), sink.clone());
        let node = Node::start(self.config, backends).await?;
        Ok(RunningPeer { node, sink, peer: self.peer })
    }

    /// Start the node, panicking on failure
    pub async fn start(self) -> RunningPeer {
        match self.try_start().await {
            Ok(running) => running,
            Err(e) => panic!("test peer failed to start: {}", e),
        }
    }
}

/// A started test node with its recorded pushes
pub struct RunningPeer {
    pub node: Node,
    pub sink: Arc<MemorySink>,
    pub peer: MemoryPeer,
}

impl RunningPeer {
    /// Wait for a push named `name` satisfying `pred`
    pub async fn wait_for<F>(&self, name: &str, mut pred: F) -> Option<Notification>
    where
        F: FnMut(&Notification) -> bool,
    {
        self.sink.wait_for(DEFAULT_WAIT, |n| n.name() == name && pred(n)).await
    }
}
