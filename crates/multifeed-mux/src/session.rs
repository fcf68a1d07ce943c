use std::collections::HashMap;
use std::sync::Arc;

use multifeed_store::{Feed, ImportOutcome};
use multifeed_types::FeedKey;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle, JoinSet};
use tracing::{debug, trace};

use crate::codec::MuxCodec;
use crate::error::{MuxError, MuxResult};
use crate::message::{MuxMessage, ERR_HANDSHAKE, PROTOCOL_VERSION};
use crate::muxer::MuxerInner;
use crate::transport::Transport;

/// Frames read ahead of the session loop.
const FRAME_QUEUE: usize = 16;

/// Aborts the wrapped task when dropped.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Drive one replication session to completion.
///
/// Returns `Ok(())` when the peer closes the transport or the muxer shuts down.
pub(crate) async fn run<T: Transport>(
    inner: Arc<MuxerInner>,
    id: u64,
    transport: T,
    initiator: bool,
) -> MuxResult<()> {
    let codec = MuxCodec::new(inner.config.max_message_size);
    let (mut reader, mut writer) = tokio::io::split(transport);
    let mut shutdown = inner.shutdown_signal();

    tokio::select! {
        result = handshake(&codec, &mut reader, &mut writer, &inner.discovery_key, initiator) => result?,
        _ = shutdown_requested(&mut shutdown) => return Err(MuxError::Shutdown),
    }
    debug!("handshake complete");

    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (data_tx, data_rx) = mpsc::channel(inner.config.data_queue.max(1));
    let (_guard, known) = inner.attach(id, control_tx.clone())?;
    for key in known {
        let _ = control_tx.send(MuxMessage::Announce { key });
    }

    let mut writer_task = AbortOnDrop(tokio::spawn(write_loop(codec, writer, control_rx, data_rx)));
    let (frames_tx, mut frames) = mpsc::channel(FRAME_QUEUE);
    let _reader_task = AbortOnDrop(tokio::spawn(read_loop(codec, reader, frames_tx)));
    let mut session = Session {
        inner,
        id,
        control: control_tx,
        data: data_tx,
        uploads: JoinSet::new(),
        upload_handles: HashMap::new(),
        requested: HashMap::new(),
    };

    loop {
        tokio::select! {
            _ = shutdown_requested(&mut shutdown) => return Ok(()),
            result = &mut writer_task.0 => {
                return match result {
                    Ok(result) => result,
                    Err(_) => Err(MuxError::Aborted),
                };
            }
            frame = frames.recv() => match frame {
                Some(Ok(msg)) => session.handle(msg).await?,
                Some(Err(e)) => return Err(e),
                None => return Ok(()),
            },
            Some(_) = session.uploads.join_next(), if !session.uploads.is_empty() => {}
        }
    }
}

async fn handshake<R, W>(
    codec: &MuxCodec,
    reader: &mut R,
    writer: &mut W,
    discovery_key: &[u8; 32],
    initiator: bool,
) -> MuxResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let hello = MuxMessage::Hello {
        version: PROTOCOL_VERSION,
        discovery_key: *discovery_key,
        initiator,
    };
    codec.write_frame(writer, &hello).await?;

    let remote = codec
        .read_frame(reader)
        .await?
        .ok_or_else(|| MuxError::Handshake("transport closed before hello".into()))?;

    let rejection = match remote {
        MuxMessage::Hello {
            version,
            discovery_key: remote_key,
            initiator: remote_initiator,
        } => {
            if version != PROTOCOL_VERSION {
                Some(format!("version mismatch: local {PROTOCOL_VERSION}, remote {version}"))
            } else if remote_key != *discovery_key {
                Some("discovery key mismatch".to_string())
            } else if remote_initiator == initiator {
                Some(format!("both peers claim initiator={initiator}"))
            } else {
                None
            }
        }
        MuxMessage::Error { code, message } => return Err(MuxError::Remote { code, message }),
        other => Some(format!("expected Hello, got {}", other.type_name())),
    };

    if let Some(reason) = rejection {
        let reply = MuxMessage::Error {
            code: ERR_HANDSHAKE,
            message: reason.clone(),
        };
        let _ = codec.write_frame(writer, &reply).await;
        return Err(MuxError::Handshake(reason));
    }
    Ok(())
}

/// Resolves once the muxer is shutting down. The `wait_for` guard is not
/// `Send` and is dropped before this returns.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closed| *closed).await;
}

/// Reads frames until the peer hangs up. Frame reads are not cancel-safe, so
/// they run in their own task and hand complete messages to the session.
async fn read_loop<R>(codec: MuxCodec, mut reader: R, frames: mpsc::Sender<MuxResult<MuxMessage>>)
where
    R: AsyncRead + Unpin,
{
    loop {
        match codec.read_frame(&mut reader).await {
            Ok(Some(msg)) => {
                if frames.send(Ok(msg)).await.is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                let _ = frames.send(Err(e)).await;
                return;
            }
        }
    }
}

/// Writes frames, always preferring control frames over queued data.
async fn write_loop<W>(
    codec: MuxCodec,
    mut writer: W,
    mut control: mpsc::UnboundedReceiver<MuxMessage>,
    mut data: mpsc::Receiver<MuxMessage>,
) -> MuxResult<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let msg = tokio::select! {
            biased;
            Some(msg) = control.recv() => msg,
            Some(msg) = data.recv() => msg,
            else => break,
        };
        trace!(kind = msg.type_name(), "send");
        codec.write_frame(&mut writer, &msg).await?;
    }
    let _ = writer.shutdown().await;
    Ok(())
}

struct Session {
    inner: Arc<MuxerInner>,
    id: u64,
    control: mpsc::UnboundedSender<MuxMessage>,
    data: mpsc::Sender<MuxMessage>,
    uploads: JoinSet<()>,
    upload_handles: HashMap<FeedKey, AbortHandle>,
    /// Last `from` requested per feed, so a run of gapped blocks triggers one `Want`.
    requested: HashMap<FeedKey, u64>,
}

impl Session {
    async fn handle(&mut self, msg: MuxMessage) -> MuxResult<()> {
        trace!(kind = msg.type_name(), "recv");
        match msg {
            MuxMessage::Hello { .. } => Err(MuxError::UnexpectedMessage("Hello")),
            MuxMessage::Announce { key } => self.on_announce(key).await,
            MuxMessage::Want { key, from } => {
                self.on_want(key, from);
                Ok(())
            }
            MuxMessage::Data { key, index, data } => self.on_data(key, index, &data),
            MuxMessage::Error { code, message } => Err(MuxError::Remote { code, message }),
        }
    }

    async fn on_announce(&mut self, key: FeedKey) -> MuxResult<()> {
        let feed = match self.inner.feed(&key) {
            Some(feed) => feed,
            None => {
                let feed = self.inner.store.get(&key).await?;
                self.inner.discover(feed, self.id)?
            }
        };
        if feed.is_writable() {
            return Ok(());
        }
        self.request(key, feed.len());
        Ok(())
    }

    fn on_want(&mut self, key: FeedKey, from: u64) {
        let Some(feed) = self.inner.feed(&key) else {
            debug!(key = %key.short_hex(), "want for unknown feed");
            return;
        };
        if let Some(previous) = self.upload_handles.remove(&key) {
            previous.abort();
        }
        let handle = self.uploads.spawn(upload(feed, from, self.data.clone()));
        self.upload_handles.insert(key, handle);
    }

    fn on_data(&mut self, key: FeedKey, index: u64, data: &[u8]) -> MuxResult<()> {
        let Some(feed) = self.inner.feed(&key) else {
            debug!(key = %key.short_hex(), index, "data for unknown feed");
            return Ok(());
        };
        match feed.import_block(index, data)? {
            ImportOutcome::Appended => {
                self.requested.remove(&key);
            }
            ImportOutcome::Gap { expected } => {
                if self.requested.get(&key) != Some(&expected) {
                    debug!(key = %key.short_hex(), index, expected, "gap; re-requesting");
                    self.request(key, expected);
                }
            }
            ImportOutcome::Duplicate | ImportOutcome::Ignored => {}
        }
        Ok(())
    }

    fn request(&mut self, key: FeedKey, from: u64) {
        self.requested.insert(key, from);
        let _ = self.control.send(MuxMessage::Want { key, from });
    }
}

/// Send blocks of `feed` from `from` onward, then follow new appends.
async fn upload(feed: Feed, from: u64, data: mpsc::Sender<MuxMessage>) {
    let key = *feed.key();
    let mut length = feed.subscribe_len();
    let mut next = from;
    loop {
        while next < feed.len() {
            let block = match feed.get(next) {
                Ok(Some(block)) => block,
                Ok(None) => break,
                Err(e) => {
                    debug!(key = %key.short_hex(), index = next, error = %e, "upload stopped");
                    return;
                }
            };
            let msg = MuxMessage::Data {
                key,
                index: next,
                data: block.to_vec(),
            };
            if data.send(msg).await.is_err() {
                return;
            }
            next += 1;
        }
        if feed.is_closed() || length.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use multifeed_crypto::KeyPair;
    use multifeed_store::MemoryBlocks;
    use std::time::Duration;

    fn writable() -> Feed {
        Feed::writable(KeyPair::generate(), Box::new(MemoryBlocks::default()))
    }

    #[tokio::test]
    async fn upload_follows_appends() {
        let feed = writable();
        feed.append(b"a").unwrap();
        feed.append(b"b").unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let task = tokio::spawn(upload(feed.clone(), 1, tx));

        let first = rx.recv().await.unwrap();
        assert_eq!(first, MuxMessage::Data { key: *feed.key(), index: 1, data: b"b".to_vec() });

        feed.append(b"c").unwrap();
        let next = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(next, MuxMessage::Data { key: *feed.key(), index: 2, data: b"c".to_vec() });

        feed.close().unwrap();
        tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn writer_prefers_control_frames() {
        let codec = MuxCodec::default();
        let key = FeedKey::from_bytes([1; 32]);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (data_tx, data_rx) = mpsc::channel(4);
        data_tx.send(MuxMessage::Data { key, index: 0, data: vec![] }).await.unwrap();
        control_tx.send(MuxMessage::Announce { key }).unwrap();
        drop(control_tx);
        drop(data_tx);

        let (a, mut b) = tokio::io::duplex(1024);
        write_loop(codec, a, control_rx, data_rx).await.unwrap();

        assert_eq!(codec.read_frame(&mut b).await.unwrap(), Some(MuxMessage::Announce { key }));
        assert!(matches!(
            codec.read_frame(&mut b).await.unwrap(),
            Some(MuxMessage::Data { index: 0, .. })
        ));
        assert_eq!(codec.read_frame(&mut b).await.unwrap(), None);
    }

    #[tokio::test]
    async fn handshake_rejects_unexpected_first_frame() {
        let codec = MuxCodec::default();
        let (local, mut remote) = tokio::io::duplex(1024);
        let (mut reader, mut writer) = tokio::io::split(local);

        codec
            .write_frame(&mut remote, &MuxMessage::Announce { key: FeedKey::from_bytes([1; 32]) })
            .await
            .unwrap();
        let result = handshake(&codec, &mut reader, &mut writer, &[0; 32], true).await;
        assert!(matches!(result, Err(MuxError::Handshake(_))));

        assert!(matches!(codec.read_frame(&mut remote).await.unwrap(), Some(MuxMessage::Hello { .. })));
        assert!(matches!(
            codec.read_frame(&mut remote).await.unwrap(),
            Some(MuxMessage::Error { code: ERR_HANDSHAKE, .. })
        ));
    }
}
