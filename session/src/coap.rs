//! CoAP exchange engine over a datagram connection.
//!
//! One receive loop demultiplexes inbound traffic: responses complete the
//! token-correlated pending table, inbound requests are handed to the owner's
//! dispatcher. Confirmable requests retransmit with binary exponential
//! backoff until acknowledged, with block-wise transfer for large payloads.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use rand::Rng;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, trace, warn};

use meshcop_wire::coap::{BlockOption, Code, Message, MessageType};
use meshcop_wire::{Error, ErrorKind, Result};

use crate::transport::Connection;

/// RFC 7252 ACK_TIMEOUT.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(2);
/// RFC 7252 MAX_RETRANSMIT.
pub const MAX_RETRANSMIT: u32 = 4;
/// Block size used for block-wise transfer (SZX 6).
pub const BLOCK_SIZE: usize = 1024;
const BLOCK_SZX: u8 = 6;

/// Default per-operation response budget.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

fn token_key(token: &[u8]) -> u64 {
    let mut key = [0u8; 8];
    key[..token.len().min(8)].copy_from_slice(&token[..token.len().min(8)]);
    u64::from_be_bytes(key)
}

struct Inner {
    conn: Arc<dyn Connection>,
    pending: DashMap<u64, oneshot::Sender<Result<Message>>>,
    ack_waiters: DashMap<u16, Arc<Notify>>,
    next_message_id: AtomicU16,
    closed: Notify,
}

/// A CoAP client+server endpoint bound to one connection.
#[derive(Clone)]
pub struct CoapEndpoint {
    inner: Arc<Inner>,
}

impl CoapEndpoint {
    /// Wrap a connection. Returns the endpoint and the stream of inbound
    /// requests; the receive loop runs until the connection fails.
    pub fn new(conn: Arc<dyn Connection>) -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            conn,
            pending: DashMap::new(),
            ack_waiters: DashMap::new(),
            next_message_id: AtomicU16::new(rand::thread_rng().gen()),
            closed: Notify::new(),
        });
        let endpoint = Self { inner };
        tokio::spawn(endpoint.clone().recv_loop(requests_tx));
        (endpoint, requests_rx)
    }

    async fn recv_loop(self, requests_tx: mpsc::UnboundedSender<Message>) {
        loop {
            let received = tokio::select! {
                received = self.inner.conn.recv() => received,
                _ = self.inner.closed.notified() => return,
            };
            let datagram = match received {
                Ok(datagram) => datagram,
                Err(err) => {
                    debug!("connection closed: {err}");
                    self.fail_all(err);
                    return;
                }
            };
            let message = match Message::decode(&datagram) {
                Ok(message) => message,
                Err(err) => {
                    warn!("dropping undecodable CoAP datagram: {err}");
                    continue;
                }
            };
            trace!(
                "rx {:?} {} mid={} uri={:?}",
                message.typ,
                message.code,
                message.message_id,
                message.uri_path()
            );
            match message.typ {
                MessageType::Acknowledgement => {
                    if let Some((_, notify)) = self.inner.ack_waiters.remove(&message.message_id) {
                        notify.notify_one();
                    }
                    if message.code != Code::EMPTY {
                        self.complete(message);
                    }
                }
                MessageType::Reset => {
                    if let Some((_, notify)) = self.inner.ack_waiters.remove(&message.message_id) {
                        notify.notify_one();
                    }
                    let key = token_key(&message.token);
                    if let Some((_, tx)) = self.inner.pending.remove(&key) {
                        let _ = tx.send(Err(Error::rejected("peer reset the exchange")));
                    }
                }
                MessageType::Confirmable | MessageType::NonConfirmable => {
                    if message.code.is_request() {
                        if requests_tx.send(message).is_err() {
                            return;
                        }
                    } else {
                        // Separate response: acknowledge, then complete.
                        if message.typ == MessageType::Confirmable {
                            let ack = Message::empty_ack(&message);
                            if let Ok(encoded) = ack.encode() {
                                let _ = self.inner.conn.send(&encoded).await;
                            }
                        }
                        self.complete(message);
                    }
                }
            }
        }
    }

    fn complete(&self, response: Message) {
        let key = token_key(&response.token);
        match self.inner.pending.remove(&key) {
            Some((_, tx)) => {
                let _ = tx.send(Ok(response));
            }
            None => debug!("response with unknown token {key:#018x}"),
        }
    }

    fn next_message_id(&self) -> u16 {
        self.inner.next_message_id.fetch_add(1, Ordering::Relaxed)
    }

    fn new_token() -> Bytes {
        let token: [u8; 8] = rand::thread_rng().gen();
        Bytes::copy_from_slice(&token)
    }

    /// Issue a request and await its response, retransmitting confirmable
    /// messages and transparently performing block-wise transfer.
    pub async fn request(&self, message: Message, timeout: Duration) -> Result<Message> {
        let response = if message.payload.len() > BLOCK_SIZE {
            self.request_blockwise_out(message.clone(), timeout).await?
        } else {
            self.exchange(message.clone(), timeout).await?
        };
        self.collect_blockwise_in(&message, response, timeout).await
    }

    /// One request/response exchange, no block handling.
    async fn exchange(&self, mut message: Message, timeout: Duration) -> Result<Message> {
        message.message_id = self.next_message_id();
        if message.token.is_empty() {
            message.token = Self::new_token();
        }
        let key = token_key(&message.token);
        let (response_tx, mut response_rx) = oneshot::channel();
        self.inner.pending.insert(key, response_tx);

        let confirmable = message.typ == MessageType::Confirmable;
        let ack = Arc::new(Notify::new());
        if confirmable {
            self.inner
                .ack_waiters
                .insert(message.message_id, ack.clone());
        }

        let encoded = message.encode()?;
        let uri = message.uri_path();
        let send_result = self.inner.conn.send(&encoded).await;
        if let Err(err) = send_result {
            self.cleanup(key, message.message_id);
            return Err(err);
        }

        let outcome = tokio::time::timeout(timeout, async {
            let mut attempts = 0u32;
            let mut backoff = random_ack_timeout();
            loop {
                tokio::select! {
                    result = &mut response_rx => {
                        return result.unwrap_or_else(|_| {
                            Err(Error::cancelled(format!("request to {uri} aborted")))
                        });
                    }
                    _ = ack.notified(), if confirmable => {
                        // Acknowledged; the response arrives separately.
                        let result = (&mut response_rx).await;
                        return result.unwrap_or_else(|_| {
                            Err(Error::cancelled(format!("request to {uri} aborted")))
                        });
                    }
                    _ = tokio::time::sleep(backoff), if confirmable => {
                        if attempts >= MAX_RETRANSMIT {
                            return Err(Error::timeout(format!(
                                "no acknowledgement for {uri} after {} transmissions",
                                attempts + 1
                            )));
                        }
                        attempts += 1;
                        backoff *= 2;
                        trace!("retransmitting {uri} (attempt {attempts})");
                        self.inner.conn.send(&encoded).await?;
                    }
                }
            }
        })
        .await;

        self.cleanup(key, message.message_id);
        match outcome {
            Ok(result) => result,
            Err(_elapsed) => Err(Error::timeout(format!("no response for {uri}"))),
        }
    }

    fn cleanup(&self, token_key: u64, message_id: u16) {
        self.inner.pending.remove(&token_key);
        self.inner.ack_waiters.remove(&message_id);
    }

    /// Send the payload in Block1 segments; returns the final response.
    async fn request_blockwise_out(&self, message: Message, timeout: Duration) -> Result<Message> {
        let payload = message.payload.clone();
        let blocks = payload.chunks(BLOCK_SIZE).count();
        let mut response = None;
        for (num, chunk) in payload.chunks(BLOCK_SIZE).enumerate() {
            let more = num + 1 < blocks;
            let mut segment = message.clone();
            segment.token = Bytes::new();
            segment.payload = Bytes::copy_from_slice(chunk);
            segment.set_block1(BlockOption::new(num as u32, more, BLOCK_SZX));
            let rsp = self.exchange(segment, timeout).await?;
            if more && rsp.code != Code::CONTINUE {
                return Err(Error::rejected(format!(
                    "block {num} of {} refused with {}",
                    message.uri_path(),
                    rsp.code
                )));
            }
            response = Some(rsp);
        }
        response.ok_or_else(|| Error::internal("block-wise request with empty payload"))
    }

    /// Follow Block2 continuations until the full response payload is held.
    async fn collect_blockwise_in(
        &self,
        request: &Message,
        first: Message,
        timeout: Duration,
    ) -> Result<Message> {
        let mut block = match first.block2()? {
            Some(block) if block.more => block,
            _ => return Ok(first),
        };
        let mut assembled = BytesMut::from(first.payload.as_ref());
        loop {
            let mut follow = request.clone();
            follow.token = Bytes::new();
            follow.payload = Bytes::new();
            follow.set_block2(BlockOption::new(block.num + 1, false, block.szx));
            let rsp = self.exchange(follow, timeout).await?;
            assembled.extend_from_slice(&rsp.payload);
            match rsp.block2()? {
                Some(next) if next.more => block = next,
                _ => {
                    let mut out = rsp;
                    out.payload = assembled.freeze();
                    return Ok(out);
                }
            }
        }
    }

    /// Send a non-confirmable notification; nothing is awaited.
    pub async fn notify(&self, mut message: Message) -> Result<()> {
        message.message_id = self.next_message_id();
        self.inner.conn.send(&message.encode()?).await
    }

    /// Send the response to an inbound request (piggybacked for confirmable
    /// requests, non-confirmable otherwise).
    pub async fn respond(
        &self,
        request: &Message,
        code: Code,
        payload: impl Into<Bytes>,
    ) -> Result<()> {
        let mut response = if request.typ == MessageType::Confirmable {
            Message::response(request, code)
        } else {
            let mut rsp = Message::new(MessageType::NonConfirmable, code, self.next_message_id());
            rsp.token = request.token.clone();
            rsp
        };
        response = response.with_payload(payload);
        self.inner.conn.send(&response.encode()?).await
    }

    /// Fail every outstanding exchange with the given error.
    pub fn fail_all(&self, err: Error) {
        let keys: Vec<u64> = self.inner.pending.iter().map(|entry| *entry.key()).collect();
        for key in keys {
            if let Some((_, tx)) = self.inner.pending.remove(&key) {
                let _ = tx.send(Err(err.clone()));
            }
        }
    }

    /// Cancel every outstanding exchange.
    pub fn abort(&self) {
        self.fail_all(Error::new(ErrorKind::Cancelled, "aborted by request"));
    }

    /// Close the underlying connection; outstanding exchanges fail and the
    /// receive loop stops.
    pub async fn close(&self) {
        let _ = self.inner.conn.close().await;
        self.inner.closed.notify_waiters();
        self.fail_all(Error::new(ErrorKind::Cancelled, "session closed"));
    }

    /// The underlying connection (relay encapsulation, key export).
    pub fn connection(&self) -> Arc<dyn Connection> {
        self.inner.conn.clone()
    }
}

fn random_ack_timeout() -> Duration {
    // ACK_TIMEOUT .. ACK_TIMEOUT * ACK_RANDOM_FACTOR (1.5)
    let base = ACK_TIMEOUT.as_millis() as u64;
    let millis = rand::thread_rng().gen_range(base..=base * 3 / 2);
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::PairConnection;
    use meshcop_wire::uri;

    fn endpoints() -> (
        CoapEndpoint,
        mpsc::UnboundedReceiver<Message>,
        CoapEndpoint,
        mpsc::UnboundedReceiver<Message>,
    ) {
        let (a, b) = PairConnection::pair();
        let (client, client_rx) = CoapEndpoint::new(Arc::new(a));
        let (server, server_rx) = CoapEndpoint::new(Arc::new(b));
        (client, client_rx, server, server_rx)
    }

    #[tokio::test]
    async fn test_confirmable_roundtrip() {
        let (client, _client_rx, server, mut server_rx) = endpoints();

        tokio::spawn(async move {
            let request = server_rx.recv().await.unwrap();
            assert_eq!(request.uri_path(), uri::PETITION);
            server
                .respond(&request, Code::CHANGED, request.payload.clone())
                .await
                .unwrap();
        });

        let request =
            Message::request(true, Code::POST, uri::PETITION).with_payload(vec![1, 2, 3]);
        let response = client.request(request, DEFAULT_TIMEOUT).await.unwrap();
        assert_eq!(response.code, Code::CHANGED);
        assert_eq!(response.payload.as_ref(), &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_unanswered_request_times_out() {
        let (client, _client_rx, _server, _server_rx) = endpoints();
        let request = Message::request(true, Code::POST, uri::KEEP_ALIVE);
        let err = client
            .request(request, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_abort_fails_pending_with_cancelled() {
        let (client, _client_rx, _server, _server_rx) = endpoints();
        let pending = {
            let client = client.clone();
            tokio::spawn(async move {
                let request = Message::request(true, Code::POST, uri::ACTIVE_SET);
                client.request(request, Duration::from_secs(30)).await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.abort();
        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn test_separate_response() {
        let (client, _client_rx, server, mut server_rx) = endpoints();

        tokio::spawn(async move {
            let request = server_rx.recv().await.unwrap();
            // Empty ACK first, then a confirmable response with the token.
            let ack = Message::empty_ack(&request);
            server.notify_raw(ack).await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            let mut response = Message::new(MessageType::Confirmable, Code::CONTENT, 0);
            response.token = request.token.clone();
            let response = response.with_payload(vec![9]);
            server.notify(response).await.unwrap();
        });

        let request = Message::request(true, Code::POST, uri::COMMISSIONER_GET);
        let response = client.request(request, DEFAULT_TIMEOUT).await.unwrap();
        assert_eq!(response.code, Code::CONTENT);
        assert_eq!(response.payload.as_ref(), &[9]);
    }

    #[tokio::test]
    async fn test_block2_reassembly() {
        let (client, _client_rx, server, mut server_rx) = endpoints();

        tokio::spawn(async move {
            let payload: Vec<u8> = (0..2500u32).map(|i| i as u8).collect();
            loop {
                let request = match server_rx.recv().await {
                    Some(request) => request,
                    None => return,
                };
                let num = request
                    .block2()
                    .unwrap()
                    .map(|block| block.num as usize)
                    .unwrap_or(0);
                let start = num * BLOCK_SIZE;
                let end = (start + BLOCK_SIZE).min(payload.len());
                let more = end < payload.len();
                let mut response = Message::response(&request, Code::CONTENT)
                    .with_payload(payload[start..end].to_vec());
                response.set_block2(BlockOption::new(num as u32, more, BLOCK_SZX));
                server.notify_raw(response).await;
            }
        });

        let request = Message::request(true, Code::POST, uri::ACTIVE_GET);
        let response = client.request(request, DEFAULT_TIMEOUT).await.unwrap();
        assert_eq!(response.payload.len(), 2500);
        assert_eq!(response.payload[1234], 1234u32 as u8);
    }

    impl CoapEndpoint {
        /// Test helper: send a pre-built message verbatim.
        async fn notify_raw(&self, message: Message) {
            let _ = self.inner.conn.send(&message.encode().unwrap()).await;
        }
    }
}
