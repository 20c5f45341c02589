//! Peer session: one task per TCP connection.
//!
//! A session owns the write half of its socket; a companion reader task
//! turns the byte stream into frames so the main loop can `select!` over
//! frames, controller commands and the keep-alive timer without tearing a
//! partially read frame. All writes happen on the session task, so send
//! order matches enqueue order.
//!
//! The controller reaches a session only through its command channel
//! ([`PeerCommand`]); the session reaches the controller through the
//! shared state ([`Shared`]). Every failure is local: the session
//! surfaces the error, the peer leaves the map, the torrent carries on.
use crate::bitfield::Bitfield;
use crate::peer::handshake::Handshake;
use crate::peer::message::Message;
use crate::peer::{PeerError, PeerResult, KEEPALIVE_INTERVAL, MAX_BLOCK_SIZE};
use crate::torrent::Shared;
use crate::tracker::RemotePeer;
use bytes::Bytes;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{interval_at, timeout, Instant};

/// What the controller can ask of a session.
#[derive(Debug)]
pub(crate) enum PeerCommand {
    /// Announce a freshly persisted piece.
    Have(u32),
    /// A disk read finished; serve the block if it is still wanted.
    Block { index: u32, begin: u32, data: Bytes },
    Shutdown,
}

/// The controller's end of a live session.
#[derive(Debug)]
pub(crate) struct PeerHandle {
    pub(crate) addr: SocketAddrV4,
    pub(crate) commands: UnboundedSender<PeerCommand>,
}

/// Dials a peer the tracker told us about. The address sits in the
/// blacklist while the dial is in flight and leaves it only on handshake
/// success, which is what stops parallel dial storms.
pub(crate) async fn connect_outbound(shared: Arc<Shared>, peer: RemotePeer) {
    let ip = u32::from(*peer.addr.ip());
    match establish_outbound(&shared, &peer).await {
        Ok(stream) => {
            shared.unblacklist(ip);
            drive_session(shared, stream, peer.addr).await;
        }
        Err(err) => {
            tracing::debug!(peer = %peer.addr, error = %err, "outbound connection failed");
        }
    }
}

async fn establish_outbound(shared: &Shared, peer: &RemotePeer) -> PeerResult<TcpStream> {
    let connect = TcpStream::connect(SocketAddr::V4(peer.addr));
    let mut stream = match timeout(shared.settings.connect_timeout, connect).await {
        Ok(connected) => connected?,
        Err(_) => return Err(PeerError::ConnectTimeout),
    };
    // Outbound side sends first, then reads the reply.
    stream.write_all(&shared.handshake).await?;
    let remote = Handshake::read(&mut stream).await?;
    remote.validate(&shared.info_hash, peer.id.as_ref())?;
    Ok(stream)
}

/// Verifies an accepted connection: the inbound side reads the remote
/// handshake first and answers only when it is on our torrent.
pub(crate) async fn run_inbound<S>(shared: Arc<Shared>, mut stream: S, addr: SocketAddrV4)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let verified = async {
        let remote = Handshake::read(&mut stream).await?;
        remote.validate(&shared.info_hash, None)?;
        stream.write_all(&shared.handshake).await?;
        Ok::<(), PeerError>(())
    }
    .await;
    match verified {
        Ok(()) => drive_session(shared, stream, addr).await,
        Err(err) => tracing::debug!(peer = %addr, error = %err, "inbound handshake failed"),
    }
}

/// Runs a verified connection until it closes or errors.
pub(crate) async fn drive_session<S>(shared: Arc<Shared>, stream: S, addr: SocketAddrV4)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let ip = u32::from(*addr.ip());
    let (reader, writer) = tokio::io::split(stream);
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    if !shared.try_register_peer(ip, PeerHandle { addr, commands: cmd_tx }) {
        tracing::debug!(peer = %addr, "duplicate connection dropped");
        return;
    }

    let (frame_tx, frame_rx) = mpsc::unbounded_channel();
    let reader_task = tokio::spawn(read_frames(
        reader,
        frame_cap(shared.store.total_pieces()),
        frame_tx,
    ));

    let total_pieces = shared.store.total_pieces();
    let mut session = Session {
        shared: Arc::clone(&shared),
        ip,
        addr,
        writer,
        commands: cmd_rx,
        frames: frame_rx,
        remote_bits: Bitfield::new(total_pieces),
        am_choked: true,
        am_interested: false,
        peer_choked: true,
        peer_interested: false,
        inflight: Vec::new(),
        pending_serves: Vec::new(),
    };
    let outcome = session.run().await;
    reader_task.abort();
    match outcome {
        Ok(()) => shared.remove_peer(ip, "connection closed"),
        Err(err) => shared.remove_peer(ip, &err.to_string()),
    }
}

/// Largest frame payload we will accept: a full bitfield or a block plus
/// its piece header, whichever is bigger.
fn frame_cap(total_pieces: usize) -> u32 {
    let bitfield = 1 + total_pieces.div_ceil(8) as u32;
    bitfield.max(9 + MAX_BLOCK_SIZE)
}

async fn read_frames<R: AsyncRead + Unpin>(
    mut reader: R,
    max_payload: u32,
    out: UnboundedSender<PeerResult<Message>>,
) {
    loop {
        match Message::read_from(&mut reader, max_payload).await {
            Ok(msg) => {
                if out.send(Ok(msg)).is_err() {
                    return;
                }
            }
            Err(err) => {
                let _ = out.send(Err(err));
                return;
            }
        }
    }
}

/// A piece we are downloading from this peer.
struct InflightPiece {
    index: u32,
    piece_size: u32,
    block_size: u32,
    blocks: Vec<Option<Bytes>>,
    received: usize,
}

impl InflightPiece {
    fn new(index: u32, piece_size: u32, block_size: u32) -> Self {
        let num_blocks = piece_size.div_ceil(block_size) as usize;
        InflightPiece {
            index,
            piece_size,
            block_size,
            blocks: vec![None; num_blocks],
            received: 0,
        }
    }

    fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// `(begin, length)` of one block slot; the last block may be short.
    fn block_bounds(&self, slot: usize) -> (u32, u32) {
        let begin = slot as u32 * self.block_size;
        (begin, self.block_size.min(self.piece_size - begin))
    }

    fn missing_blocks(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        (0..self.num_blocks())
            .filter(|&slot| self.blocks[slot].is_none())
            .map(|slot| self.block_bounds(slot))
    }

    fn assemble(self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.piece_size as usize);
        for block in self.blocks.into_iter().flatten() {
            data.extend_from_slice(&block);
        }
        data
    }
}

/// A block the remote asked us for, not yet served.
#[derive(Debug, PartialEq, Eq)]
struct BlockRequest {
    index: u32,
    begin: u32,
    length: u32,
}

struct Session<W> {
    shared: Arc<Shared>,
    ip: u32,
    addr: SocketAddrV4,
    writer: W,
    commands: UnboundedReceiver<PeerCommand>,
    frames: UnboundedReceiver<PeerResult<Message>>,
    remote_bits: Bitfield,
    /// We choke the remote.
    am_choked: bool,
    /// We want the remote's pieces.
    am_interested: bool,
    /// The remote chokes us.
    peer_choked: bool,
    /// The remote wants our pieces.
    peer_interested: bool,
    inflight: Vec<InflightPiece>,
    pending_serves: Vec<BlockRequest>,
}

impl<W: AsyncWrite + Unpin> Session<W> {
    async fn run(&mut self) -> PeerResult<()> {
        // Open with our bitfield so the remote can start picking.
        let bits = self.shared.store.completed_bits();
        self.send(Message::Bitfield(Bytes::copy_from_slice(bits.as_bytes())))
            .await?;

        let mut keepalive = interval_at(Instant::now() + KEEPALIVE_INTERVAL, KEEPALIVE_INTERVAL);
        loop {
            tokio::select! {
                frame = self.frames.recv() => match frame {
                    Some(Ok(msg)) => self.handle_message(msg).await?,
                    Some(Err(err)) => return Err(err),
                    None => return Ok(()),
                },
                command = self.commands.recv() => match command {
                    Some(PeerCommand::Have(index)) => self.send(Message::Have(index)).await?,
                    Some(PeerCommand::Block { index, begin, data }) => {
                        self.serve_block(index, begin, data).await?;
                    }
                    Some(PeerCommand::Shutdown) | None => return Ok(()),
                },
                _ = keepalive.tick() => self.send(Message::KeepAlive).await?,
            }
        }
    }

    async fn handle_message(&mut self, msg: Message) -> PeerResult<()> {
        match msg {
            Message::KeepAlive => {}
            Message::Choke => {
                // Outstanding requests die with the choke; the in-flight
                // queue stays and is replayed on the next unchoke.
                self.peer_choked = true;
            }
            Message::Unchoke => {
                self.peer_choked = false;
                for queued in 0..self.inflight.len() {
                    self.request_missing_blocks(queued).await?;
                }
            }
            Message::Interested => {
                self.peer_interested = true;
                if self.am_choked {
                    self.am_choked = false;
                    self.send(Message::Unchoke).await?;
                }
            }
            Message::NotInterested => {
                self.peer_interested = false;
            }
            Message::Have(index) => {
                self.remote_bits.set(index as usize);
            }
            Message::Bitfield(bits) => {
                let expected = self.remote_bits.byte_len();
                if bits.len() != expected {
                    return Err(PeerError::BadBitfieldLength {
                        got: bits.len(),
                        expected,
                    });
                }
                self.remote_bits = Bitfield::from_bytes(&bits, self.shared.store.total_pieces());
                if !self.shared.is_finished() {
                    self.request_next_piece().await?;
                }
            }
            Message::Request { index, begin, length } => {
                self.handle_request(index, begin, length).await?;
            }
            Message::Piece { index, begin, block } => {
                self.handle_block(index, begin, block).await?;
            }
            Message::Cancel { index, begin, length } => {
                self.pending_serves
                    .retain(|r| !(r.index == index && r.begin == begin && r.length == length));
            }
            Message::Port(_) => {} // DHT port; accepted and ignored
        }
        Ok(())
    }

    /// Picks another piece this peer can give us and queues it.
    async fn request_next_piece(&mut self) -> PeerResult<()> {
        let bits = &self.remote_bits;
        let Some(index) = self
            .shared
            .store
            .piece_for_request(|i| bits.has(i as usize))
        else {
            return Ok(());
        };
        tracing::trace!(peer = %self.addr, index, "requesting piece");
        if !self.am_interested {
            self.am_interested = true;
            self.send(Message::Interested).await?;
        }
        let piece_size = self.shared.store.piece_size(index) as u32;
        let block_size = self.shared.settings.block_size.min(MAX_BLOCK_SIZE);
        self.inflight
            .push(InflightPiece::new(index, piece_size, block_size));
        if !self.peer_choked {
            self.request_missing_blocks(self.inflight.len() - 1).await?;
        }
        Ok(())
    }

    async fn request_missing_blocks(&mut self, queued: usize) -> PeerResult<()> {
        let piece = &self.inflight[queued];
        let index = piece.index;
        let requests: Vec<Message> = piece
            .missing_blocks()
            .map(|(begin, length)| Message::Request { index, begin, length })
            .collect();
        for request in requests {
            self.send(request).await?;
        }
        Ok(())
    }

    async fn handle_request(&mut self, index: u32, begin: u32, length: u32) -> PeerResult<()> {
        if !self.peer_interested {
            return Err(PeerError::RequestWithoutInterest);
        }
        if self.am_choked {
            return Err(PeerError::RequestWhileChoked);
        }
        if length > MAX_BLOCK_SIZE {
            return Err(PeerError::OversizedRequest(length));
        }
        if self.shared.handle_block_request(self.ip, index, begin, length) {
            self.pending_serves.push(BlockRequest { index, begin, length });
        } else {
            self.send_choke().await?;
        }
        Ok(())
    }

    async fn handle_block(&mut self, index: u32, begin: u32, block: Bytes) -> PeerResult<()> {
        if block.len() as u32 > MAX_BLOCK_SIZE {
            return Err(PeerError::OversizedBlock(block.len()));
        }
        let Some(pos) = self.inflight.iter().position(|p| p.index == index) else {
            return Err(PeerError::UnrequestedPiece(index));
        };
        let slot = (begin / self.inflight[pos].block_size) as usize;
        if slot >= self.inflight[pos].num_blocks() {
            return Err(PeerError::BlockOutOfRange { index, begin });
        }

        if self.shared.store.piece_done(index) {
            // Another peer finished this piece first: cancel whatever is
            // still outstanding and forget the entry.
            let mut piece = self.inflight.remove(pos);
            piece.blocks[slot] = Some(block);
            let cancels: Vec<(u32, u32)> = piece.missing_blocks().collect();
            for (begin, length) in cancels {
                self.send(Message::Cancel { index, begin, length }).await?;
            }
            return Ok(());
        }

        let piece = &mut self.inflight[pos];
        if piece.blocks[slot].is_none() {
            piece.blocks[slot] = Some(block);
            piece.received += 1;
        }
        if piece.received < piece.num_blocks() {
            return Ok(());
        }

        let data = self.inflight.remove(pos).assemble();
        if self.shared.handle_piece_completed(self.ip, index, data) {
            if !self.shared.is_finished() {
                self.request_next_piece().await?;
            }
        } else {
            self.send_choke().await?;
        }
        Ok(())
    }

    /// A disk read came back; send it unless it was cancelled or the
    /// gates closed in the meantime.
    async fn serve_block(&mut self, index: u32, begin: u32, data: Bytes) -> PeerResult<()> {
        let Some(pos) = self
            .pending_serves
            .iter()
            .position(|r| r.index == index && r.begin == begin)
        else {
            return Ok(());
        };
        self.pending_serves.remove(pos);
        if self.am_choked || !self.peer_interested {
            return Ok(());
        }
        let served = data.len() as u64;
        self.send(Message::Piece { index, begin, block: data }).await?;
        self.shared.add_uploaded(served);
        Ok(())
    }

    async fn send_choke(&mut self) -> PeerResult<()> {
        self.am_choked = true;
        self.send(Message::Choke).await
    }

    async fn send(&mut self, msg: Message) -> PeerResult<()> {
        self.writer.write_all(&msg.encode()).await?;
        Ok(())
    }
}
