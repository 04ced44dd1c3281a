//! Client façade over all peer sessions
//!
//! Keeps the registry of outbound sessions, fans requests out to the full
//! nodes among them and reduces their answers to the value most of them
//! agree on. A server is a client that also owns a ledger; its own ledger
//! then counts as one more voter and broadcasts are applied to it first.

use crate::config::Settings;
use crate::core::{Balance, Block, Blockchain, Transaction, MAX_PENDING_TRANSACTIONS};
use crate::error::{BlockchainError, Result};
use crate::network::channel::{is_well_formed, Connector, TcpConnector};
use crate::network::handler::NodeHandler;
use crate::network::message::{Request, ResponseBody};
use crate::network::peer::{Peer, RequestHandler};
use futures::future::join_all;
use log::{debug, info, warn};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Registry {
    peers: HashMap<String, Arc<Peer>>,
    // Addresses with a connect in progress
    connecting: HashSet<String>,
}

pub(crate) struct ClientInner {
    ledger: Option<Blockchain>,
    address: String,
    connector: Arc<dyn Connector>,
    registry: Mutex<Registry>,
    request_timeout: Duration,
    target_peers: usize,
    shutdown: CancellationToken,
}

#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

/// The most frequent value; ties go to the group seen first
pub fn plurality<T: PartialEq>(values: Vec<T>) -> Option<T> {
    let mut groups: Vec<(T, usize)> = Vec::new();
    for value in values {
        match groups.iter_mut().find(|(seen, _)| *seen == value) {
            Some(group) => group.1 += 1,
            None => groups.push((value, 1)),
        }
    }

    let mut best: Option<(T, usize)> = None;
    for (value, count) in groups {
        if best.as_ref().map_or(true, |(_, top)| count > *top) {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value)
}

/// Runs a ledger operation on the blocking pool
pub(crate) async fn run_blocking<T, F>(ledger: &Blockchain, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Blockchain) -> Result<T> + Send + 'static,
{
    let ledger = ledger.clone();
    tokio::task::spawn_blocking(move || op(&ledger))
        .await
        .map_err(|e| BlockchainError::Database(format!("Ledger task failed: {e}")))?
}

impl Client {
    /// A light client: no ledger, no reachable address
    pub fn light(settings: &Settings) -> Client {
        Self::with_connector(
            None,
            String::new(),
            Arc::new(TcpConnector::new(settings.connect_timeout())),
            settings,
        )
    }

    /// A full node serving `ledger`, reachable at `address`
    pub fn full_node(ledger: Blockchain, address: &str, settings: &Settings) -> Client {
        Self::with_connector(
            Some(ledger),
            address.to_string(),
            Arc::new(TcpConnector::new(settings.connect_timeout())),
            settings,
        )
    }

    pub fn with_connector(
        ledger: Option<Blockchain>,
        address: String,
        connector: Arc<dyn Connector>,
        settings: &Settings,
    ) -> Client {
        Client {
            inner: Arc::new(ClientInner {
                ledger,
                address,
                connector,
                registry: Mutex::new(Registry::default()),
                request_timeout: settings.request_timeout(),
                target_peers: settings.target_peers,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ClientInner>) -> Client {
        Client { inner }
    }

    /// Handler for sessions this node answers on
    pub fn handler(&self) -> Arc<dyn RequestHandler> {
        Arc::new(NodeHandler::new(Arc::downgrade(&self.inner)))
    }

    pub fn ledger(&self) -> Option<&Blockchain> {
        self.inner.ledger.as_ref()
    }

    pub fn is_full_node(&self) -> bool {
        self.inner.ledger.is_some()
    }

    /// Address announced to peers; empty for a light client
    pub fn address(&self) -> &str {
        &self.inner.address
    }

    pub fn request_timeout(&self) -> Duration {
        self.inner.request_timeout
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        match self.inner.registry.lock() {
            Ok(registry) => registry,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Live sessions
    pub fn peers(&self) -> Vec<Arc<Peer>> {
        self.registry()
            .peers
            .values()
            .filter(|peer| peer.is_alive())
            .cloned()
            .collect()
    }

    fn full_node_peers(&self) -> Vec<Arc<Peer>> {
        self.peers()
            .into_iter()
            .filter(|peer| peer.is_full_node())
            .collect()
    }

    pub fn peer_count(&self) -> usize {
        self.peers().len()
    }

    /// Reachable addresses of the connected full nodes
    pub fn servers(&self) -> Vec<String> {
        let servers: BTreeSet<String> = self
            .full_node_peers()
            .iter()
            .map(|peer| peer.address())
            .collect();
        servers.into_iter().collect()
    }

    fn is_new_server(&self, address: &str) -> bool {
        if !is_well_formed(address) {
            debug!("Skipping malformed server address {address:?}");
            return false;
        }
        if address == self.inner.address {
            return false;
        }
        let registry = self.registry();
        if registry.connecting.contains(address) {
            return false;
        }
        !registry
            .peers
            .iter()
            .any(|(dialed, peer)| peer.is_alive() && (dialed == address || peer.address() == address))
    }

    /// Opens a session to `address` and runs the handshake. A full node
    /// peer also learns this node's own address.
    pub async fn connect(&self, address: &str) -> Result<Arc<Peer>> {
        if !is_well_formed(address) {
            return Err(BlockchainError::Connection(format!(
                "Malformed address {address:?}"
            )));
        }
        if address == self.inner.address {
            return Err(BlockchainError::Connection(format!(
                "Refusing to connect to own address {address}"
            )));
        }
        {
            let mut registry = self.registry();
            let alive = registry
                .peers
                .get(address)
                .is_some_and(|peer| peer.is_alive());
            if alive || registry.connecting.contains(address) {
                return Err(BlockchainError::AlreadyConnected(address.to_string()));
            }
            registry.connecting.insert(address.to_string());
        }

        let result = self.open_session(address).await;
        let peer = {
            let mut registry = self.registry();
            registry.connecting.remove(address);
            let peer = result?;
            if let Some(stale) = registry.peers.insert(address.to_string(), peer.clone()) {
                debug!("Replacing dead session {} to {address}", stale.id());
            }
            peer
        };

        info!(
            "Connected to {} node {address}",
            if peer.is_full_node() { "full" } else { "light" }
        );
        if peer.is_full_node() && !self.inner.address.is_empty() {
            let announce = Request::PostServers {
                servers: vec![self.inner.address.clone()],
            };
            if let Err(e) = peer.request(announce, &self.inner.shutdown).await {
                warn!("Announcing ourselves to {address} failed: {e}");
            }
        }
        Ok(peer)
    }

    async fn open_session(&self, address: &str) -> Result<Arc<Peer>> {
        let channel = self.inner.connector.connect(address).await?;
        let peer = Peer::spawn(channel, self.handler(), self.inner.request_timeout);
        match tokio::time::timeout(self.inner.request_timeout, self.handshake(&peer)).await {
            Ok(Ok(())) => Ok(peer),
            Ok(Err(e)) => {
                peer.close().await;
                Err(e)
            }
            Err(_) => {
                peer.close().await;
                Err(BlockchainError::Timeout(format!("handshake with {address}")))
            }
        }
    }

    async fn handshake(&self, peer: &Peer) -> Result<()> {
        let cancel = &self.inner.shutdown;
        let full_node = match peer.request(Request::GetNodeType, cancel).await?.body {
            ResponseBody::NodeType { is_full_node } => is_full_node,
            _ => false,
        };
        peer.set_full_node(full_node);
        if full_node {
            if let ResponseBody::ServerAddress { uri } =
                peer.request(Request::GetServerAddress, cancel).await?.body
            {
                if is_well_formed(&uri) {
                    peer.set_address(&uri);
                }
            }
        }
        Ok(())
    }

    pub async fn disconnect(&self, address: &str) -> Result<()> {
        let peer = self
            .registry()
            .peers
            .remove(address)
            .ok_or_else(|| BlockchainError::NotFound(format!("peer {address}")))?;
        peer.close().await;
        info!("Disconnected from {address}");
        Ok(())
    }

    /// Gossip entry point: dials announced servers while below the target
    /// peer count
    pub(crate) fn learn_servers(&self, servers: Vec<String>) {
        let fresh: BTreeSet<String> = servers
            .into_iter()
            .filter(|address| self.is_new_server(address))
            .collect();
        if fresh.is_empty() || self.peer_count() >= self.inner.target_peers {
            return;
        }

        let client = self.clone();
        tokio::spawn(async move {
            for address in fresh {
                if client.inner.shutdown.is_cancelled() {
                    break;
                }
                match client.connect(&address).await {
                    Ok(_) => info!("Discovered server {address}"),
                    Err(BlockchainError::AlreadyConnected(_)) => {}
                    Err(e) => warn!("Announced server {address} is unreachable: {e}"),
                }
            }
        });
    }

    async fn ask<T>(
        &self,
        peers: &[Arc<Peer>],
        request: Request,
        cancel: &CancellationToken,
        extract: impl Fn(ResponseBody) -> Option<T>,
    ) -> Result<Vec<T>> {
        let calls = peers.iter().map(|peer| peer.request(request.clone(), cancel));
        let results = join_all(calls).await;
        if cancel.is_cancelled() {
            return Err(BlockchainError::Cancelled);
        }

        let mut values = Vec::new();
        for (peer, result) in peers.iter().zip(results) {
            match result {
                Ok(response) => values.extend(extract(response.body)),
                Err(BlockchainError::Rejected(reason)) => {
                    debug!(
                        "{} had no {:?} answer: {reason}",
                        peer.address(),
                        request.expected_response()
                    )
                }
                Err(e) => warn!("{} failed to answer: {e}", peer.address()),
            }
        }
        Ok(values)
    }

    async fn local_vote<T, F>(&self, op: F) -> Vec<T>
    where
        T: Send + 'static,
        F: FnOnce(&Blockchain) -> Result<T> + Send + 'static,
    {
        let Some(ledger) = self.ledger() else {
            return Vec::new();
        };
        match run_blocking(ledger, op).await {
            Ok(value) => vec![value],
            Err(e) => {
                debug!("Local ledger has no answer: {e}");
                Vec::new()
            }
        }
    }

    async fn majority<T, F>(
        &self,
        request: Request,
        cancel: &CancellationToken,
        local: F,
        extract: impl Fn(ResponseBody) -> Option<T>,
    ) -> Result<Option<T>>
    where
        T: PartialEq + Send + 'static,
        F: FnOnce(&Blockchain) -> Result<T> + Send + 'static,
    {
        let mut values = self.local_vote(local).await;
        let peers = self.full_node_peers();
        values.extend(self.ask(&peers, request, cancel, extract).await?);
        Ok(plurality(values))
    }

    pub async fn query_balance(&self, owner: &str, cancel: &CancellationToken) -> Result<Balance> {
        let key = owner.to_string();
        self.majority(
            Request::GetBalance {
                owner: owner.to_string(),
            },
            cancel,
            move |ledger| ledger.get_balance(&key),
            |body| match body {
                ResponseBody::Balance { balance } => balance,
                _ => None,
            },
        )
        .await?
        .ok_or_else(|| BlockchainError::NotFound(format!("balance of {owner}")))
    }

    pub async fn query_last_block(&self, cancel: &CancellationToken) -> Result<Block> {
        self.majority(
            Request::GetLastBlock,
            cancel,
            |ledger| ledger.get_last_block(),
            block_of,
        )
        .await?
        .ok_or_else(|| BlockchainError::NotFound("last block".to_string()))
    }

    pub async fn query_difficulty(&self, cancel: &CancellationToken) -> Result<u32> {
        self.majority(
            Request::GetDifficulty,
            cancel,
            |ledger| Ok(ledger.difficulty()),
            |body| match body {
                ResponseBody::Difficulty { difficulty } => Some(difficulty),
                _ => None,
            },
        )
        .await?
        .ok_or_else(|| BlockchainError::NotFound("difficulty".to_string()))
    }

    /// The block built on `hash`, as most nodes see it
    pub async fn query_next_block(&self, hash: &str, cancel: &CancellationToken) -> Result<Block> {
        let key = hash.to_string();
        self.majority(
            Request::GetNextBlock {
                block_id: hash.to_string(),
            },
            cancel,
            move |ledger| ledger.get_next_block(&key),
            block_of,
        )
        .await?
        .ok_or_else(|| BlockchainError::NotFound(format!("block after {hash}")))
    }

    pub async fn query_transaction(
        &self,
        signature: &str,
        include_pending: bool,
        cancel: &CancellationToken,
    ) -> Result<Transaction> {
        let key = signature.to_string();
        self.majority(
            Request::GetTransaction {
                transaction_signature: signature.to_string(),
                pending: include_pending,
            },
            cancel,
            move |ledger| ledger.get_transaction(&key, include_pending),
            |body| match body {
                ResponseBody::Transaction { transaction } => transaction,
                _ => None,
            },
        )
        .await?
        .ok_or_else(|| BlockchainError::NotFound(format!("transaction {signature}")))
    }

    /// Union of every reachable pending pool, oldest nonce first
    pub async fn query_pending_transactions(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<Transaction>> {
        let mut pools = self
            .local_vote(|ledger| ledger.get_pending_transactions())
            .await;
        let peers = self.full_node_peers();
        pools.extend(
            self.ask(&peers, Request::GetPendingTransactions, cancel, |body| {
                match body {
                    ResponseBody::PendingTransactions { transactions } => Some(transactions),
                    _ => None,
                }
            })
            .await?,
        );

        let mut seen = HashSet::new();
        let mut union: Vec<Transaction> = pools
            .into_iter()
            .flatten()
            .filter(|tx| seen.insert(tx.signature.clone()))
            .collect();
        union.sort_by_key(|tx| tx.nonce);
        union.truncate(MAX_PENDING_TRANSACTIONS);
        Ok(union)
    }

    async fn fan_out(&self, peers: &[Arc<Peer>], request: Request, cancel: &CancellationToken) -> Result<usize> {
        let calls = peers.iter().map(|peer| peer.request(request.clone(), cancel));
        let results = join_all(calls).await;
        if cancel.is_cancelled() {
            return Err(BlockchainError::Cancelled);
        }

        let mut acknowledged = 0;
        for (peer, result) in peers.iter().zip(results) {
            match result {
                Ok(_) => acknowledged += 1,
                Err(e) => warn!("{} did not accept the broadcast: {e}", peer.address()),
            }
        }
        Ok(acknowledged)
    }

    fn delivered(&self, acknowledged: usize) -> Result<usize> {
        if acknowledged == 0 && !self.is_full_node() {
            return Err(BlockchainError::Connection(
                "no full node accepted the broadcast".to_string(),
            ));
        }
        Ok(acknowledged)
    }

    /// Posts `tx` to the local ledger (if any) and every full node.
    /// Returns how many peers acknowledged it.
    pub async fn broadcast_transaction(
        &self,
        tx: &Transaction,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        if let Some(ledger) = self.ledger() {
            let local = tx.clone();
            run_blocking(ledger, move |ledger| ledger.post_transaction(&local)).await?;
        }
        let request = Request::PostTransaction {
            transaction: tx.clone(),
        };
        let acknowledged = self.fan_out(&self.full_node_peers(), request, cancel).await?;
        info!("Transaction {} accepted by {acknowledged} peers", tx.signature);
        self.delivered(acknowledged)
    }

    pub async fn broadcast_block(&self, block: &Block, cancel: &CancellationToken) -> Result<usize> {
        if let Some(ledger) = self.ledger() {
            let local = block.clone();
            run_blocking(ledger, move |ledger| ledger.post_block(&local)).await?;
        }
        let request = Request::PostBlock {
            block: block.clone(),
        };
        let acknowledged = self.fan_out(&self.full_node_peers(), request, cancel).await?;
        info!("Block {} accepted by {acknowledged} peers", block.hash);
        self.delivered(acknowledged)
    }

    pub async fn broadcast_servers(
        &self,
        servers: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        if self.is_full_node() {
            self.learn_servers(servers.clone());
        }
        self.fan_out(&self.peers(), Request::PostServers { servers }, cancel)
            .await
    }

    /// Asks every peer for the servers it knows and connects to the new
    /// ones. Returns how many sessions were opened.
    pub async fn find_servers(&self, cancel: &CancellationToken) -> Result<usize> {
        let lists = self
            .ask(&self.peers(), Request::GetServers, cancel, |body| match body {
                ResponseBody::Servers { servers } => Some(servers),
                _ => None,
            })
            .await?;
        let fresh: BTreeSet<String> = lists
            .into_iter()
            .flatten()
            .filter(|address| self.is_new_server(address))
            .collect();

        let mut opened = 0;
        for address in fresh {
            if cancel.is_cancelled() {
                return Err(BlockchainError::Cancelled);
            }
            match self.connect(&address).await {
                Ok(_) => opened += 1,
                Err(e) => warn!("Could not connect to {address}: {e}"),
            }
        }
        Ok(opened)
    }

    /// Pulls blocks built on the local tip from the full node peers until
    /// none of them has a next block. Returns how many blocks were added.
    pub async fn sync(&self, cancel: &CancellationToken) -> Result<usize> {
        let ledger = self
            .ledger()
            .ok_or_else(|| BlockchainError::Config("a light client keeps no chain".to_string()))?
            .clone();
        let mut cursor = ledger.get_tip_hash()?;
        let mut added = 0;
        loop {
            let peers = self.full_node_peers();
            let candidates = self
                .ask(
                    &peers,
                    Request::GetNextBlock {
                        block_id: cursor.clone(),
                    },
                    cancel,
                    block_of,
                )
                .await?;
            let Some(block) = plurality(candidates) else {
                break;
            };

            let hash = block.hash.clone();
            match run_blocking(&ledger, move |ledger| ledger.post_block(&block)).await {
                Ok(()) => {
                    cursor = hash;
                    added += 1;
                }
                Err(e) => {
                    warn!("Stopping sync, block {hash} was rejected: {e}");
                    break;
                }
            }
        }
        info!("Sync finished with {added} new blocks, tip {cursor}");
        Ok(added)
    }

    /// Builds a block from the pending pools on the agreed tip, mines it on
    /// the blocking pool and broadcasts it. `None` means mining was
    /// cancelled.
    pub async fn mine(&self, validator: &str, cancel: &CancellationToken) -> Result<Option<Block>> {
        let tip = self.query_last_block(cancel).await?;
        let difficulty = self.query_difficulty(cancel).await?;
        let pending = self.query_pending_transactions(cancel).await?;

        let transactions = match self.ledger() {
            Some(ledger) if ledger.get_tip_hash()? == tip.hash => {
                run_blocking(ledger, move |ledger| ledger.filter_candidates(&pending)).await?
            }
            // No local state on the agreed tip to check against, so settle
            // rival nonces using the majority balances
            _ => {
                let senders: BTreeSet<String> =
                    pending.iter().map(|tx| tx.sender.clone()).collect();
                let mut final_nonces = HashMap::new();
                for sender in senders {
                    let balance = self.query_balance(&sender, cancel).await?;
                    final_nonces.insert(sender, balance.nonce);
                }
                contiguous_nonces(pending, &final_nonces)
            }
        };

        let mut block = Block::new(Some(tip.hash), transactions, validator, difficulty)?;
        info!(
            "Mining block with {} transactions at difficulty {difficulty}",
            block.transactions.len()
        );
        let token = cancel.clone();
        let (mined, block) = tokio::task::spawn_blocking(move || {
            let mined = block.try_mine(difficulty, &token);
            (mined, block)
        })
        .await
        .map_err(|e| BlockchainError::Database(format!("Mining task failed: {e}")))?;
        if !mined {
            info!("Mining cancelled");
            return Ok(None);
        }

        self.broadcast_block(&block, cancel).await?;
        Ok(Some(block))
    }

    /// Stops discovery and closes every session
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let peers: Vec<Arc<Peer>> = self.registry().peers.drain().map(|(_, peer)| peer).collect();
        for peer in peers {
            peer.close().await;
        }
        info!("Client shut down");
    }
}

/// Keeps, per sender, the first transaction for each nonce and only while
/// the nonces run on without a gap from the sender's final nonce.
/// `transactions` must be sorted by nonce.
fn contiguous_nonces(
    transactions: Vec<Transaction>,
    final_nonces: &HashMap<String, i64>,
) -> Vec<Transaction> {
    let mut next: HashMap<String, i64> = HashMap::new();
    let mut kept = Vec::new();
    for tx in transactions {
        let expected = next.entry(tx.sender.clone()).or_insert_with(|| {
            let final_nonce = final_nonces.get(&tx.sender).copied().unwrap_or(0);
            final_nonce.saturating_add(1)
        });
        if tx.nonce == *expected {
            *expected += 1;
            kept.push(tx);
        } else {
            debug!("Leaving {} out of the block: nonce {} is not next", tx.signature, tx.nonce);
        }
    }
    kept
}

fn block_of(body: ResponseBody) -> Option<Block> {
    match body {
        ResponseBody::Block { block } => block,
        _ => None,
    }
}
