//!
//! # minint
//!
//! A minimal NetworkTables 4 client: connect, publish topics, set values.
//!

#[macro_use]
extern crate log;
extern crate rmp;
extern crate serde;
extern crate serde_json;
extern crate tokio;
extern crate tokio_tungstenite;

mod datatype;
mod error;
mod messages;

use std::collections::HashMap;
use std::marker::PhantomData;
use std::net::IpAddr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub use datatype::{DataType, DataWrap};
pub use error::{NtError, Result};
pub use messages::PublishProps;
use messages::*;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::AbortHandle,
};
use tokio_tungstenite::tungstenite::{
    client::IntoClientRequest,
    http::{header, HeaderValue},
    Message,
};

/// Default NT4 server port
pub const DEFAULT_PORT: u16 = 5810;
/// Longest [NtConn::stop] waits for queued messages to go out
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// How to reach the server
#[derive(Debug, Clone)]
pub struct ConnOptions {
    pub server: IpAddr,
    pub port: u16,
    pub client_ident: String,
    /// Capacity of the outgoing message queue
    ///
    /// Once full, [NtTopic::set] drops values instead of waiting.
    pub outgoing_capacity: usize,
    /// How long [NtConn::publish] waits for the server to announce the topic
    pub announce_timeout: Duration,
}
impl ConnOptions {
    pub fn new(server: impl Into<IpAddr>, client_ident: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            port: DEFAULT_PORT,
            client_ident: client_ident.into(),
            outgoing_capacity: 64,
            announce_timeout: Duration::from_secs(5),
        }
    }

    /// WebSocket URL as specified by WPILib
    pub fn url(&self) -> String {
        format!(
            "ws://{server}:{port}/nt/{ident}",
            server = self.server,
            port = self.port,
            ident = self.client_ident
        )
    }
}

/// Topic bookkeeping shared between the connection, its topics and the reader task
#[derive(Default)]
struct Topics {
    names: HashMap<i32, String>,
    topic_pubuids: HashMap<i32, i32>,
    pubuid_topics: HashMap<i32, i32>,
}
impl Topics {
    fn handle(&mut self, msg: ServerMsg) {
        match msg {
            ServerMsg::Announce {
                name,
                id,
                r#type,
                pubuid,
                ..
            } => {
                self.names.insert(id, name.clone());

                if let Some(pubuid) = pubuid {
                    self.pubuid_topics.insert(pubuid, id);
                    self.topic_pubuids.insert(id, pubuid);

                    debug!("{name} ({type}): published successfully with topic id {id}");
                } else {
                    debug!("{name} ({type}): announced with topic id {id}");
                }
            }
            ServerMsg::Unannounce { name, id } => {
                self.names.remove(&id);
                if let Some(pubuid) = self.topic_pubuids.remove(&id) {
                    self.pubuid_topics.remove(&pubuid);
                }

                debug!("{name}: unannounced");
            }
            ServerMsg::Properties { name, ack } => {
                trace!("{name}: properties updated (ack={ack})");
            }
        }
    }

    fn is_announced(&self, pubuid: i32) -> bool {
        self.pubuid_topics.contains_key(&pubuid)
    }
}

struct Shared {
    next_id: AtomicI32,
    c2s: mpsc::Sender<Message>,
    topics: Mutex<Topics>,
}
impl Shared {
    fn next_id(&self) -> i32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Queue a message without waiting
    fn try_send(&self, msg: Message) -> Result<()> {
        self.c2s.try_send(msg).map_err(queue_error)
    }

    fn unpublish(&self, pubuid: i32) -> Result<()> {
        let buf = serde_json::to_string(&[ClientMsg::Unpublish { pubuid }])?;
        self.try_send(Message::Text(buf))
    }
}

fn queue_error<T>(err: TrySendError<T>) -> NtError {
    match err {
        TrySendError::Full(_) => NtError::QueueFull,
        TrySendError::Closed(_) => NtError::Disconnected,
    }
}

/// Wait until the outgoing task has taken every queued message, or `timeout` passes
async fn drain(c2s: &mpsc::Sender<Message>, timeout: Duration) -> bool {
    tokio::time::timeout(timeout, async {
        while c2s.capacity() < c2s.max_capacity() && !c2s.is_closed() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}

/// A NetworkTables connection
pub struct NtConn {
    shared: Arc<Shared>,
    announce_timeout: Duration,

    incoming_abort: AbortHandle,
    outgoing_abort: AbortHandle,
}
impl NtConn {
    /// Connect to a NetworkTables server on the default port
    pub async fn new(server: impl Into<IpAddr>, client_ident: impl Into<String>) -> Result<Self> {
        Self::connect(ConnOptions::new(server, client_ident)).await
    }

    /// Connect to a NetworkTables server
    pub async fn connect(opts: ConnOptions) -> Result<Self> {
        // Build the WebSocket URL and turn it into tungstenite's client req type
        let mut req = opts.url().into_client_request()?;

        // Add header as specified in WPILib's spec
        req.headers_mut().append(
            header::SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static("networktables.first.wpi.edu"),
        );

        let (c2s_tx, mut c2s_rx) = mpsc::channel::<Message>(opts.outgoing_capacity.max(1));

        // Connect to the server and split into read and write
        let (sock, _) = tokio_tungstenite::connect_async(req)
            .await
            .map_err(|err| NtError::ConnectionError(format!("{}: {err}", opts.url())))?;
        let (mut sock_wr, mut sock_rd) = sock.split();
        info!("connected to {}", opts.url());

        let shared = Arc::new(Shared {
            next_id: AtomicI32::new(0),
            c2s: c2s_tx,
            topics: Mutex::new(Topics::default()),
        });

        // Spawn event loop to read and process incoming messages
        let incoming_abort = {
            let shared = shared.clone();

            tokio::spawn(async move {
                while let Some(buf) = sock_rd.next().await {
                    match buf {
                        Ok(Message::Text(json)) => {
                            for msg in parse_server_msgs(&json) {
                                shared.topics.lock().handle(msg);
                            }
                        }
                        Ok(Message::Binary(bin)) => {
                            trace!("ignoring {} byte value frame", bin.len());
                        }
                        Ok(Message::Close(frame)) => {
                            warn!("server closed the connection: {frame:?}");
                            break;
                        }
                        Ok(msg) => trace!("unhandled incoming message: {msg:?}"),
                        Err(err) => {
                            error!("error reading incoming message: {err:?}");
                            break;
                        }
                    }
                }
            })
            .abort_handle()
        };

        // Spawn event loop to send outgoing messages
        let outgoing_abort = tokio::spawn(async move {
            while let Some(outgoing) = c2s_rx.recv().await {
                if let Err(err) = sock_wr.send(outgoing).await {
                    error!("error sending outgoing message: {err:?}");
                    break;
                }
            }
        })
        .abort_handle();

        Ok(Self {
            shared,
            announce_timeout: opts.announce_timeout,

            incoming_abort,
            outgoing_abort,
        })
    }

    /// Publish a topic
    ///
    /// Waits until the server announces the topic back to us.
    /// The topic will be unpublished when the [NtTopic] is dropped.
    pub async fn publish<T: DataWrap>(
        &self,
        name: impl Into<String>,
        properties: PublishProps,
    ) -> Result<NtTopic<T>> {
        let pubuid = self.shared.next_id();
        let name = name.into();

        let buf = serde_json::to_string(&[ClientMsg::Publish {
            pubuid,
            name: name.clone(),
            r#type: T::STRING.to_string(),
            properties: Some(properties),
        }])?;

        self.shared
            .c2s
            .send(Message::Text(buf))
            .await
            .map_err(|_| NtError::Disconnected)?;

        debug!("{name} ({data_type}): publishing with pubuid {pubuid}", data_type = T::STRING);

        let announced = tokio::time::timeout(self.announce_timeout, async {
            while !self.shared.topics.lock().is_announced(pubuid) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        if announced.is_err() {
            return Err(NtError::AnnounceTimeout(name));
        }

        Ok(NtTopic {
            shared: self.shared.clone(),
            pubuid,
            name,
            _marker: PhantomData,
        })
    }

    /// Whether the socket tasks are still running
    pub fn is_connected(&self) -> bool {
        !self.incoming_abort.is_finished() && !self.outgoing_abort.is_finished()
    }

    /// Shutdown the connection
    ///
    /// Gives messages that are already queued (unpublishes of dropped topics, usually) a short
    /// while to go out first. Topics still alive afterwards will fail with
    /// [NtError::Disconnected].
    pub async fn stop(self) {
        if !drain(&self.shared.c2s, DRAIN_TIMEOUT).await {
            warn!("gave up flushing the outgoing queue");
        }
        // The last frame taken off the queue may still be in flight
        tokio::time::sleep(Duration::from_millis(10)).await;

        self.incoming_abort.abort();
        self.outgoing_abort.abort();
    }
}

/// Parse a text frame, which holds a JSON array of server messages
///
/// Messages we don't understand are logged and skipped.
fn parse_server_msgs(json: &str) -> Vec<ServerMsg> {
    let values: Vec<serde_json::Value> = match serde_json::from_str(json) {
        Ok(values) => values,
        Err(err) => {
            warn!("malformed text frame from server: {err}");
            return Vec::new();
        }
    };

    values
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<ServerMsg>(value.clone()) {
            Ok(msg) => Some(msg),
            Err(_) => {
                debug!("ignoring server message: {value}");
                None
            }
        })
        .collect()
}

/// Encode a value frame: `[pubuid, timestamp, type, value]`
fn encode_bin_frame<T: DataWrap>(uid: i32, ts: u64, value: T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    rmp::encode::write_array_len(&mut buf, 4)?;

    rmp::encode::write_sint(&mut buf, uid as i64)?;
    rmp::encode::write_uint(&mut buf, ts)?;
    rmp::encode::write_uint(&mut buf, T::MSGPCK as u64)?;
    T::encode(&mut buf, value)?;

    Ok(buf)
}

/// A NetworkTables topic
///
/// Automatically unpublished when dropped.
pub struct NtTopic<T: DataWrap> {
    shared: Arc<Shared>,
    pubuid: i32,
    name: String,
    _marker: PhantomData<fn(T)>,
}
impl<T: DataWrap> NtTopic<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a new value for this topic
    ///
    /// Never waits on the socket. Returns [NtError::QueueFull] if the outgoing queue is full,
    /// in which case the value is dropped.
    pub fn set(&mut self, val: T) -> Result<()> {
        trace!("{name} ({data_type}): set to {val:?}", name = self.name, data_type = T::STRING);

        let buf = encode_bin_frame(self.pubuid, 0, val)?;
        self.shared.try_send(Message::Binary(buf))
    }

    /// Start a batch of values on this topic's connection
    pub fn batch(&self) -> NtBatch {
        NtBatch {
            shared: self.shared.clone(),
            frames: Vec::new(),
        }
    }
}

/// Values for several topics that are queued together or not at all
///
/// ```ignore
/// let mut batch = x.batch();
/// batch.set(&x, 1.0)?.set(&y, 2.0)?;
/// batch.send()?;
/// ```
pub struct NtBatch {
    shared: Arc<Shared>,
    frames: Vec<Message>,
}
impl NtBatch {
    /// Add a value for `topic`, which must belong to the same connection
    pub fn set<T: DataWrap>(&mut self, topic: &NtTopic<T>, val: T) -> Result<&mut Self> {
        if !Arc::ptr_eq(&self.shared, &topic.shared) {
            return Err(NtError::ForeignTopic(topic.name.clone()));
        }
        trace!("{name} ({data_type}): batched {val:?}", name = topic.name, data_type = T::STRING);

        let buf = encode_bin_frame(topic.pubuid, 0, val)?;
        self.frames.push(Message::Binary(buf));
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Queue every value without waiting
    ///
    /// If the outgoing queue can't take all of them, none are queued and
    /// [NtError::QueueFull] is returned.
    pub fn send(self) -> Result<()> {
        if self.frames.is_empty() {
            return Ok(());
        }

        let permits = self
            .shared
            .c2s
            .try_reserve_many(self.frames.len())
            .map_err(queue_error)?;
        for (permit, frame) in permits.zip(self.frames) {
            permit.send(frame);
        }

        Ok(())
    }
}
impl<T: DataWrap> Drop for NtTopic<T> {
    fn drop(&mut self) {
        if let Err(err) = self.shared.unpublish(self.pubuid) {
            debug!("{}: failed to unpublish: {err}", self.name);
        }
    }
}
