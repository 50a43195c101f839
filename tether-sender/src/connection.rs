//! A framed, optionally obfuscated byte stream with its own I/O tasks.
//!
//! [`Connection`] owns a writer pump and a reader pump. Packets handed to
//! [`Connection::send`] are queued for the writer, so sending never waits on
//! the socket; packets read by the reader are queued for
//! [`Connection::recv`]. The first I/O failure on either side shuts both pumps
//! down and is reported by the next `recv`.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, Encoder, Framed};
use tokio_util::sync::CancellationToken;

use tether_crypto::aes::CtrCipher;
use tether_mtproto::transport::Transport;
use tether_mtproto::transport::obfuscated::{ObfuscatedCipher, ProxyParams};

use crate::errors::ConnectionError;
use crate::{Obfuscation, TransportKind};

// ─── Codec adapter ───────────────────────────────────────────────────────────

/// Adapts a sans-IO [`Transport`] to `tokio_util`'s codec traits.
///
/// Checksum mismatches drop the damaged packet and keep decoding; every other
/// framing error is fatal.
pub struct PacketCodec {
    transport: Box<dyn Transport>,
}

impl PacketCodec {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self { transport }
    }
}

impl Decoder for PacketCodec {
    type Item = Vec<u8>;
    type Error = ConnectionError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Vec<u8>>, ConnectionError> {
        loop {
            match self.transport.decode(src) {
                Err(e) if e.is_recoverable() => {
                    tracing::warn!("dropping damaged packet: {e}");
                }
                other => return other.map_err(ConnectionError::Transport),
            }
        }
    }
}

impl Encoder<Vec<u8>> for PacketCodec {
    type Error = ConnectionError;

    fn encode(&mut self, item: Vec<u8>, dst: &mut BytesMut) -> Result<(), ConnectionError> {
        self.transport.encode(&item, dst);
        Ok(())
    }
}

// ─── Obfuscated stream ───────────────────────────────────────────────────────

/// Runs every byte read from or written to `S` through the obfuscation
/// keystreams.
pub struct ObfuscatedStream<S> {
    inner:   S,
    enc:     CtrCipher,
    dec:     CtrCipher,
    /// Already-encrypted bytes the inner stream has not accepted yet.
    pending: BytesMut,
}

impl<S: AsyncWrite + Unpin> ObfuscatedStream<S> {
    /// Send the 64-byte obfuscation header over `inner` and wrap it.
    pub async fn handshake(mut inner: S, tag: [u8; 4], proxy: Option<&ProxyParams>) -> io::Result<Self> {
        let (header, cipher) = ObfuscatedCipher::client(tag, proxy);
        inner.write_all(&header).await?;
        let (enc, dec) = cipher.into_parts();
        Ok(Self { inner, enc, dec, pending: BytesMut::new() })
    }

    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while !self.pending.is_empty() {
            let n = ready!(Pin::new(&mut self.inner).poll_write(cx, &self.pending))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            self.pending.advance(n);
        }
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for ObfuscatedStream<S> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let start = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        this.dec.apply(&mut buf.filled_mut()[start..]);
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for ObfuscatedStream<S> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        // The keystream has to advance exactly once per byte, so bytes are
        // encrypted when accepted and buffered until the socket takes them.
        ready!(this.poll_drain(cx))?;
        let start = this.pending.len();
        this.pending.extend_from_slice(buf);
        this.enc.apply(&mut this.pending[start..]);
        if let Poll::Ready(Err(e)) = this.poll_drain(cx) {
            return Poll::Ready(Err(e));
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}

// ─── Connection ──────────────────────────────────────────────────────────────

enum Outgoing {
    Packet(Vec<u8>),
    Close,
}

enum Inbound {
    Packet(Vec<u8>),
    Closed(ConnectionError),
}

/// A live connection: framed packets in, framed packets out.
pub struct Connection {
    outgoing: mpsc::UnboundedSender<Outgoing>,
    inbound:  mpsc::UnboundedReceiver<Inbound>,
    cancel:   CancellationToken,
}

impl Connection {
    /// Open a TCP connection to `address:port` and start the pumps.
    pub async fn connect(
        address:     &str,
        port:        u16,
        transport:   TransportKind,
        obfuscation: Option<Obfuscation>,
        timeout:     Duration,
    ) -> Result<Self, ConnectionError> {
        tracing::info!("connecting to {address}:{port} ({transport:?})");
        let stream = tokio::time::timeout(timeout, TcpStream::connect((address, port)))
            .await
            .map_err(|_| ConnectionError::Timeout)??;
        stream.set_nodelay(true)?;
        let keepalive = socket2::TcpKeepalive::new().with_time(Duration::from_secs(30));
        socket2::SockRef::from(&stream).set_tcp_keepalive(&keepalive)?;
        Self::open(stream, transport, obfuscation).await
    }

    /// Start the pumps over an already-open stream.
    ///
    /// Writes the transport's init bytes, or the obfuscation header when
    /// `obfuscation` is set.
    pub async fn open<S>(
        mut stream:  S,
        transport:   TransportKind,
        obfuscation: Option<Obfuscation>,
    ) -> Result<Self, ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let codec = transport.build();
        match obfuscation {
            Some(obfuscation) => {
                let tag = codec.obfuscation_tag().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidInput, "transport has no obfuscation tag")
                })?;
                let proxy = obfuscation.proxy_params();
                let stream = ObfuscatedStream::handshake(stream, tag, proxy.as_ref()).await?;
                Ok(Self::spawn(stream, codec))
            }
            None => {
                stream.write_all(codec.init_bytes()).await?;
                Ok(Self::spawn(stream, codec))
            }
        }
    }

    fn spawn<S>(stream: S, codec: Box<dyn Transport>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (sink, source) = Framed::new(stream, PacketCodec::new(codec)).split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        tokio::spawn(write_pump(sink, out_rx, in_tx.clone(), cancel.clone()));
        tokio::spawn(read_pump(source, in_tx, cancel.clone()));

        Self { outgoing: out_tx, inbound: in_rx, cancel }
    }

    /// Queue a packet for writing.
    ///
    /// Fails only once the writer has stopped; write errors themselves are
    /// reported by [`recv`](Self::recv).
    pub fn send(&self, packet: Vec<u8>) -> Result<(), ConnectionError> {
        if self.cancel.is_cancelled() {
            return Err(ConnectionError::Closed);
        }
        self.outgoing.send(Outgoing::Packet(packet)).map_err(|_| ConnectionError::Closed)
    }

    /// Next packet from the server.
    pub async fn recv(&mut self) -> Result<Vec<u8>, ConnectionError> {
        match self.inbound.recv().await {
            Some(Inbound::Packet(p)) => Ok(p),
            Some(Inbound::Closed(e)) => Err(e),
            None => Err(ConnectionError::Closed),
        }
    }

    /// Stop both pumps. Calling this more than once is harmless.
    pub fn disconnect(&self) {
        let _ = self.outgoing.send(Outgoing::Close);
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

type Sink<S> = futures::stream::SplitSink<Framed<S, PacketCodec>, Vec<u8>>;
type Source<S> = futures::stream::SplitStream<Framed<S, PacketCodec>>;

async fn write_pump<S>(
    mut sink: Sink<S>,
    mut queue: mpsc::UnboundedReceiver<Outgoing>,
    inbound: mpsc::UnboundedSender<Inbound>,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = queue.recv() => next,
        };
        match next {
            Some(Outgoing::Packet(packet)) => {
                tracing::trace!("writing {} bytes", packet.len());
                if let Err(e) = sink.send(packet).await {
                    tracing::warn!("write failed: {e}");
                    let _ = inbound.send(Inbound::Closed(e));
                    break;
                }
            }
            Some(Outgoing::Close) | None => break,
        }
    }
    cancel.cancel();
    let _ = sink.close().await;
}

async fn read_pump<S>(mut source: Source<S>, inbound: mpsc::UnboundedSender<Inbound>, cancel: CancellationToken)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = source.next() => next,
        };
        match next {
            Some(Ok(packet)) => {
                tracing::trace!("read {} bytes", packet.len());
                if inbound.send(Inbound::Packet(packet)).is_err() {
                    break;
                }
            }
            Some(Err(e)) => {
                tracing::warn!("read failed: {e}");
                let _ = inbound.send(Inbound::Closed(e));
                break;
            }
            None => {
                tracing::debug!("server closed the connection");
                let _ = inbound.send(Inbound::Closed(ConnectionError::Closed));
                break;
            }
        }
    }
    cancel.cancel();
}
