// One session per connection. I run exactly one receive loop per session:
// requests from the remote go to the handler and the answer is written back
// on the same channel, responses go into a FIFO queue that the single
// outstanding outbound request reads from. There are no request ids on the
// wire, so holding the queue lock for the whole call is what keeps a second
// request from being sent before the first one is answered.

use crate::error::{BlockchainError, Result};
use crate::network::channel::{Channel, FrameSink, FrameStream};
use crate::network::message::{Message, Request, Response};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Answers requests that arrive on a session
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: Request) -> Response;
}

type SharedSink = Arc<Mutex<Box<dyn FrameSink>>>;

pub struct Peer {
    id: Uuid,
    // Address the remote is reachable at; starts as the transport address
    address: StdMutex<String>,
    full_node: AtomicBool,
    sink: SharedSink,
    responses: Mutex<mpsc::UnboundedReceiver<Response>>,
    cancel: CancellationToken,
    task: StdMutex<Option<JoinHandle<()>>>,
    timeout: Duration,
}

impl Peer {
    /// Starts the receive loop for `channel`
    pub fn spawn(
        channel: Channel,
        handler: Arc<dyn RequestHandler>,
        timeout: Duration,
    ) -> Arc<Peer> {
        let Channel {
            remote,
            sink,
            stream,
        } = channel;
        let sink: SharedSink = Arc::new(Mutex::new(sink));
        let (responses_tx, responses_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(receive_loop(
            stream,
            sink.clone(),
            responses_tx,
            handler,
            cancel.clone(),
            remote.clone(),
        ));

        let peer = Arc::new(Peer {
            id: Uuid::new_v4(),
            address: StdMutex::new(remote),
            full_node: AtomicBool::new(false),
            sink,
            responses: Mutex::new(responses_rx),
            cancel,
            task: StdMutex::new(Some(task)),
            timeout,
        });
        debug!("Session {} started with {}", peer.id, peer.address());
        peer
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn address(&self) -> String {
        match self.address.lock() {
            Ok(address) => address.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set_address(&self, address: &str) {
        match self.address.lock() {
            Ok(mut current) => *current = address.to_string(),
            Err(poisoned) => *poisoned.into_inner() = address.to_string(),
        }
    }

    pub fn is_full_node(&self) -> bool {
        self.full_node.load(Ordering::SeqCst)
    }

    pub fn set_full_node(&self, full_node: bool) {
        self.full_node.store(full_node, Ordering::SeqCst);
    }

    /// False once the receive loop has stopped
    pub fn is_alive(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Sends `request` and waits for the response of the matching kind.
    /// A response with `ok=false` comes back as `Rejected`.
    pub async fn request(&self, request: Request, cancel: &CancellationToken) -> Result<Response> {
        let expected = request.expected_response();
        let mut responses = tokio::select! {
            _ = cancel.cancelled() => return Err(BlockchainError::Cancelled),
            guard = self.responses.lock() => guard,
        };
        while let Ok(stale) = responses.try_recv() {
            warn!("Dropping unanswered {:?} response from {}", stale.kind(), self.address());
        }

        send_message(&self.sink, &Message::Request(request), &self.address()).await?;

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);
        loop {
            let response = tokio::select! {
                _ = cancel.cancelled() => return Err(BlockchainError::Cancelled),
                _ = &mut deadline => {
                    return Err(BlockchainError::Timeout(format!(
                        "no {expected:?} response from {} within {:?}",
                        self.address(),
                        self.timeout
                    )))
                }
                response = responses.recv() => response,
            };
            match response {
                None => {
                    return Err(BlockchainError::Connection(format!(
                        "session with {} closed",
                        self.address()
                    )))
                }
                Some(response) if response.kind() != expected => {
                    warn!(
                        "Expected {expected:?} from {}, dropping {:?}",
                        self.address(),
                        response.kind()
                    );
                }
                Some(response) if !response.ok => {
                    return Err(BlockchainError::Rejected(response.message))
                }
                Some(response) => return Ok(response),
            }
        }
    }

    /// Stops the receive loop, closes the channel and waits for the loop
    /// to finish
    pub async fn close(&self) {
        self.cancel.cancel();
        if let Err(e) = self.sink.lock().await.close().await {
            debug!("Closing channel to {}: {e}", self.address());
        }
        let task = match self.task.lock() {
            Ok(mut task) => task.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Receive loop for {} ended abnormally: {e}", self.address());
            }
        }
        debug!("Session {} closed", self.id);
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("address", &self.address())
            .field("full_node", &self.is_full_node())
            .finish()
    }
}

async fn send_message(sink: &SharedSink, message: &Message, remote: &str) -> Result<()> {
    let frame = message.encode()?;
    debug!("Sending to {remote}: {frame}");
    sink.lock().await.send(frame).await
}

async fn receive_loop(
    mut stream: Box<dyn FrameStream>,
    sink: SharedSink,
    responses: mpsc::UnboundedSender<Response>,
    handler: Arc<dyn RequestHandler>,
    cancel: CancellationToken,
    remote: String,
) {
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = stream.recv() => received,
        };
        let frame = match received {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!("Peer {remote} closed the connection");
                break;
            }
            Err(BlockchainError::Protocol(e)) => {
                warn!("Dropping frame from {remote}: {e}");
                continue;
            }
            Err(e) => {
                warn!("Receiving from {remote} failed: {e}");
                break;
            }
        };
        debug!("Received from {remote}: {frame}");

        match Message::decode(&frame) {
            Ok(Message::Response(response)) => {
                if responses.send(response).is_err() {
                    break;
                }
            }
            Ok(Message::Request(request)) => {
                let response = handler.handle(request).await;
                if let Err(e) = send_message(&sink, &Message::Response(response), &remote).await {
                    warn!("Answering {remote} failed: {e}");
                    break;
                }
            }
            Err(e) => warn!("Dropping frame from {remote}: {e}"),
        }
    }
    cancel.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::channel::memory_pair;
    use crate::network::message::{ResponseBody, ResponseKind};

    struct FixedDifficulty(u32);

    #[async_trait]
    impl RequestHandler for FixedDifficulty {
        async fn handle(&self, request: Request) -> Response {
            match request {
                Request::GetDifficulty => {
                    Response::ok(ResponseBody::Difficulty { difficulty: self.0 })
                }
                other => Response::error(other.expected_response(), "Not supported."),
            }
        }
    }

    fn pair(timeout: Duration) -> (Arc<Peer>, Arc<Peer>) {
        let (a, b) = memory_pair();
        (
            Peer::spawn(a, Arc::new(FixedDifficulty(1)), timeout),
            Peer::spawn(b, Arc::new(FixedDifficulty(7)), timeout),
        )
    }

    #[tokio::test]
    async fn test_request_is_answered_by_remote_handler() {
        let (a, b) = pair(Duration::from_secs(5));
        let cancel = CancellationToken::new();

        let response = a.request(Request::GetDifficulty, &cancel).await.unwrap();
        assert_eq!(response.body, ResponseBody::Difficulty { difficulty: 7 });
        let response = b.request(Request::GetDifficulty, &cancel).await.unwrap();
        assert_eq!(response.body, ResponseBody::Difficulty { difficulty: 1 });

        a.close().await;
        b.close().await;
    }

    #[tokio::test]
    async fn test_debug_names_the_remote() {
        let (a, b) = pair(Duration::from_secs(5));
        a.set_full_node(true);
        let shown = format!("{a:?}");
        assert!(shown.contains("memory:b"));
        assert!(shown.contains("full_node: true"));
        assert!(shown.contains(&a.id().to_string()));
        a.close().await;
        b.close().await;
    }

    #[tokio::test]
    async fn test_error_response_is_rejected() {
        let (a, b) = pair(Duration::from_secs(5));
        let err = a
            .request(Request::GetNodeType, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, BlockchainError::Rejected("Not supported.".to_string()));
        a.close().await;
        b.close().await;
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let (a, mut raw) = memory_pair();
        let peer = Peer::spawn(a, Arc::new(FixedDifficulty(0)), Duration::from_millis(100));

        let err = peer
            .request(Request::GetDifficulty, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BlockchainError::Timeout(_)));
        assert!(raw.stream.recv().await.unwrap().is_some());
        peer.close().await;
    }

    #[tokio::test]
    async fn test_unexpected_response_is_dropped() {
        let (a, mut raw) = memory_pair();
        let peer = Peer::spawn(a, Arc::new(FixedDifficulty(0)), Duration::from_secs(5));

        let remote = tokio::spawn(async move {
            let _request = raw.stream.recv().await.unwrap();
            let wrong = Message::Response(Response::ok(ResponseBody::Servers { servers: vec![] }));
            let right = Message::Response(Response::ok(ResponseBody::Difficulty { difficulty: 3 }));
            raw.sink.send(wrong.encode().unwrap()).await.unwrap();
            raw.sink.send("garbage".to_string()).await.unwrap();
            raw.sink.send(right.encode().unwrap()).await.unwrap();
            raw
        });

        let response = peer
            .request(Request::GetDifficulty, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.kind(), ResponseKind::Difficulty);
        assert_eq!(response.body, ResponseBody::Difficulty { difficulty: 3 });
        let _raw = remote.await.unwrap();
        peer.close().await;
    }

    #[tokio::test]
    async fn test_cancelled_request() {
        let (a, _raw) = memory_pair();
        let peer = Peer::spawn(a, Arc::new(FixedDifficulty(0)), Duration::from_secs(30));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = peer.request(Request::GetDifficulty, &cancel).await.unwrap_err();
        assert_eq!(err, BlockchainError::Cancelled);
        peer.close().await;
    }

    #[tokio::test]
    async fn test_remote_close_ends_session() {
        let (a, raw) = memory_pair();
        let peer = Peer::spawn(a, Arc::new(FixedDifficulty(0)), Duration::from_secs(5));
        drop(raw);

        let err = peer
            .request(Request::GetDifficulty, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BlockchainError::Connection(_)));
        tokio::time::timeout(Duration::from_secs(1), async {
            while peer.is_alive() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        peer.close().await;
    }
}
