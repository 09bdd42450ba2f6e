//! LAN mesh adapter: UDP multicast discovery plus TCP session links.
//!
//! Discovery is symmetric; both sides beacon while advertising and both sides
//! listen while browsing, so each device finds the other without a query step.
//! An invitation is a TCP connect carrying a hello; the answering side replies
//! with a single accept/decline byte before frames start flowing.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use rink_core::identity::{PeerId, PeerIdentity};
use rink_core::protocol::{DiscoveryInfo, PROTOCOL_VERSION, SERVICE_ID};
use rink_core::transport::{PeerTransportState, Transport, TransportError, TransportEvent};

const MULTICAST_GROUP: &str = "239.255.71.80";
const BEACON_INTERVAL: Duration = Duration::from_secs(2);
const PEER_TIMEOUT: Duration = Duration::from_secs(8);
const SWEEP_INTERVAL: Duration = Duration::from_secs(2);
const HELLO_TIMEOUT: Duration = Duration::from_secs(10);
/// How long an unanswered inbound invitation holds its socket open.
const DECISION_TIMEOUT: Duration = Duration::from_secs(30);
const LEN_SIZE: usize = 4;
const MAX_FRAME_LEN: u32 = 64 * 1024;
const MAX_HELLO_LEN: u32 = 4 * 1024;
const HELLO_DECLINE: u8 = 0;
const HELLO_ACCEPT: u8 = 1;

/// Multicast discovery beacon.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Beacon {
    protocol_version: u8,
    service_id: String,
    peer_id: PeerId,
    display_name: String,
    info: DiscoveryInfo,
    listen_port: u16,
}

/// First bytes on a new TCP link, length-prefixed like every later frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Hello {
    protocol_version: u8,
    service_id: String,
    peer_id: PeerId,
    display_name: String,
    info: Option<DiscoveryInfo>,
}

#[derive(Debug, Clone)]
pub struct MeshConfig {
    pub discovery_port: u16,
    pub transport_port: u16,
}

enum MeshCommand {
    StartAdvertising(DiscoveryInfo),
    StopAdvertising,
    StartBrowsing,
    StopBrowsing,
    Invite { peer_id: PeerId, timeout_secs: u32 },
    Respond { peer_id: PeerId, accept: bool },
    Send { peer_id: PeerId, frame: Vec<u8> },
    DisconnectAll,
}

enum LinkEvent {
    /// Handshake finished; the main task wires up reader and writer.
    Established { peer_id: PeerId, stream: TcpStream },
    /// An inbound invitation waits for the accept/decline decision.
    Pending {
        peer_id: PeerId,
        decision_tx: oneshot::Sender<bool>,
    },
    Closed { peer_id: PeerId },
}

/// Command front implementing [`Transport`]. Methods fail fast; asynchronous
/// outcomes arrive as [`TransportEvent`]s on the channel given to [`spawn_mesh`].
pub struct MeshTransport {
    cmd_tx: mpsc::UnboundedSender<MeshCommand>,
    links_index: Arc<Mutex<HashSet<PeerId>>>,
}

impl MeshTransport {
    fn post(&self, cmd: MeshCommand) -> Result<(), TransportError> {
        self.cmd_tx.send(cmd).map_err(|_| TransportError::NotRunning)
    }
}

impl Transport for MeshTransport {
    fn start_advertising(&mut self, info: &DiscoveryInfo) -> Result<(), TransportError> {
        self.post(MeshCommand::StartAdvertising(*info))
    }

    fn stop_advertising(&mut self) -> Result<(), TransportError> {
        self.post(MeshCommand::StopAdvertising)
    }

    fn start_browsing(&mut self) -> Result<(), TransportError> {
        self.post(MeshCommand::StartBrowsing)
    }

    fn stop_browsing(&mut self) -> Result<(), TransportError> {
        self.post(MeshCommand::StopBrowsing)
    }

    fn invite(&mut self, peer_id: &PeerId, timeout_secs: u32) -> Result<(), TransportError> {
        self.post(MeshCommand::Invite {
            peer_id: peer_id.clone(),
            timeout_secs,
        })
    }

    fn respond_to_invitation(
        &mut self,
        peer_id: &PeerId,
        accept: bool,
    ) -> Result<(), TransportError> {
        self.post(MeshCommand::Respond {
            peer_id: peer_id.clone(),
            accept,
        })
    }

    fn send(&mut self, peer_id: &PeerId, frame: Vec<u8>, _reliable: bool) -> Result<(), TransportError> {
        // Single TCP link per peer; the reliability hint is accepted and ignored.
        let connected = self
            .links_index
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(peer_id);
        if !connected {
            return Err(TransportError::UnknownPeer(peer_id.clone()));
        }
        self.post(MeshCommand::Send {
            peer_id: peer_id.clone(),
            frame,
        })
    }

    fn disconnect_all(&mut self) -> Result<(), TransportError> {
        self.post(MeshCommand::DisconnectAll)
    }
}

struct DiscoveredPeer {
    addr: SocketAddr,
    last_seen: Instant,
}

struct Link {
    writer: mpsc::UnboundedSender<Vec<u8>>,
    reader_task: JoinHandle<()>,
}

/// Bind the mesh sockets and start the mesh task.
pub async fn spawn_mesh(
    identity: PeerIdentity,
    cfg: MeshConfig,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
) -> std::io::Result<MeshTransport> {
    let group: std::net::Ipv4Addr = MULTICAST_GROUP
        .parse()
        .map_err(|e: std::net::AddrParseError| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, e)
        })?;
    let udp = make_multicast_socket(group, cfg.discovery_port)?;
    let listener = TcpListener::bind(("0.0.0.0", cfg.transport_port)).await?;
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let links_index = Arc::new(Mutex::new(HashSet::new()));

    let task = MeshTask {
        identity,
        beacon_dest: SocketAddr::new(group.into(), cfg.discovery_port),
        cfg,
        udp: Arc::new(udp),
        events_tx,
        links_index: links_index.clone(),
        advertising: None,
        browsing: false,
        peers: HashMap::new(),
        links: HashMap::new(),
        pending: HashMap::new(),
    };
    tokio::spawn(task.run(listener, cmd_rx));

    Ok(MeshTransport {
        cmd_tx,
        links_index,
    })
}

fn make_multicast_socket(
    group: std::net::Ipv4Addr,
    discovery_port: u16,
) -> std::io::Result<UdpSocket> {
    let std_sock = std::net::UdpSocket::bind(("0.0.0.0", discovery_port))?;
    std_sock.join_multicast_v4(&group, &std::net::Ipv4Addr::UNSPECIFIED)?;
    std_sock.set_multicast_ttl_v4(1)?;
    std_sock.set_nonblocking(true)?;
    UdpSocket::from_std(std_sock)
}

struct MeshTask {
    identity: PeerIdentity,
    beacon_dest: SocketAddr,
    cfg: MeshConfig,
    udp: Arc<UdpSocket>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    links_index: Arc<Mutex<HashSet<PeerId>>>,
    advertising: Option<DiscoveryInfo>,
    browsing: bool,
    peers: HashMap<PeerId, DiscoveredPeer>,
    links: HashMap<PeerId, Link>,
    pending: HashMap<PeerId, oneshot::Sender<bool>>,
}

impl MeshTask {
    async fn run(mut self, listener: TcpListener, mut cmd_rx: mpsc::UnboundedReceiver<MeshCommand>) {
        let (link_tx, mut link_rx) = mpsc::unbounded_channel();
        let (datagram_tx, mut datagram_rx) = mpsc::unbounded_channel();

        let accept_events = self.events_tx.clone();
        let accept_link_tx = link_tx.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        tokio::spawn(run_inbound(
                            stream,
                            accept_events.clone(),
                            accept_link_tx.clone(),
                        ));
                    }
                    Err(_) => break,
                }
            }
        });

        let recv_socket = self.udp.clone();
        let recv_task = tokio::spawn(async move {
            let mut buf = vec![0u8; 2048];
            loop {
                match recv_socket.recv_from(&mut buf).await {
                    Ok((n, from)) => {
                        if datagram_tx.send((buf[..n].to_vec(), from)).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        let mut beacon_tick = tokio::time::interval(BEACON_INTERVAL);
        let mut sweep_tick = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    self.on_command(cmd, &link_tx);
                }
                // The mesh task holds a link_tx clone, so this never closes.
                Some(ev) = link_rx.recv() => self.on_link_event(ev, &link_tx),
                Some((data, from)) = datagram_rx.recv() => self.on_datagram(&data, from),
                _ = beacon_tick.tick() => self.send_beacon().await,
                _ = sweep_tick.tick() => self.sweep_stale_peers(),
            }
        }
        accept_task.abort();
        recv_task.abort();
        self.teardown_links();
    }

    fn on_command(&mut self, cmd: MeshCommand, link_tx: &mpsc::UnboundedSender<LinkEvent>) {
        match cmd {
            MeshCommand::StartAdvertising(info) => self.advertising = Some(info),
            MeshCommand::StopAdvertising => self.advertising = None,
            MeshCommand::StartBrowsing => self.browsing = true,
            MeshCommand::StopBrowsing => self.browsing = false,
            MeshCommand::Invite {
                peer_id,
                timeout_secs,
            } => {
                let Some(peer) = self.peers.get(&peer_id) else {
                    debug!(%peer_id, "invite for unknown peer");
                    self.emit_state(peer_id, PeerTransportState::NotConnected);
                    return;
                };
                let hello = self.local_hello();
                tokio::spawn(run_invite(
                    peer.addr,
                    peer_id,
                    hello,
                    timeout_secs,
                    self.events_tx.clone(),
                    link_tx.clone(),
                ));
            }
            MeshCommand::Respond { peer_id, accept } => {
                if let Some(decision_tx) = self.pending.remove(&peer_id) {
                    let _ = decision_tx.send(accept);
                } else {
                    debug!(%peer_id, "response without pending invitation");
                }
            }
            MeshCommand::Send { peer_id, frame } => {
                let delivered = self
                    .links
                    .get(&peer_id)
                    .map(|link| link.writer.send(frame).is_ok())
                    .unwrap_or(false);
                if !delivered {
                    debug!(%peer_id, "frame dropped, link gone");
                }
            }
            MeshCommand::DisconnectAll => {
                self.teardown_links();
                for (_, decision_tx) in self.pending.drain() {
                    let _ = decision_tx.send(false);
                }
            }
        }
    }

    fn on_link_event(&mut self, ev: LinkEvent, link_tx: &mpsc::UnboundedSender<LinkEvent>) {
        match ev {
            LinkEvent::Pending {
                peer_id,
                decision_tx,
            } => {
                self.pending.insert(peer_id, decision_tx);
            }
            LinkEvent::Established { peer_id, stream } => {
                // A replacement link supersedes the old one.
                self.drop_link(&peer_id);
                let (read_half, write_half) = stream.into_split();
                let (writer_tx, writer_rx) = mpsc::unbounded_channel();
                tokio::spawn(write_loop(write_half, writer_rx));
                let reader_task = tokio::spawn(read_loop(
                    peer_id.clone(),
                    read_half,
                    self.events_tx.clone(),
                    link_tx.clone(),
                ));
                self.links.insert(
                    peer_id.clone(),
                    Link {
                        writer: writer_tx,
                        reader_task,
                    },
                );
                self.links_index
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(peer_id.clone());
                self.emit_state(peer_id, PeerTransportState::Connected);
            }
            LinkEvent::Closed { peer_id } => {
                if self.drop_link(&peer_id) {
                    self.emit_state(peer_id, PeerTransportState::NotConnected);
                }
            }
        }
    }

    fn drop_link(&mut self, peer_id: &PeerId) -> bool {
        let Some(link) = self.links.remove(peer_id) else {
            return false;
        };
        link.reader_task.abort();
        self.links_index
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(peer_id);
        true
    }

    fn teardown_links(&mut self) {
        let ids: Vec<PeerId> = self.links.keys().cloned().collect();
        for peer_id in ids {
            self.drop_link(&peer_id);
        }
    }

    async fn send_beacon(&self) {
        let Some(info) = self.advertising else { return };
        let beacon = Beacon {
            protocol_version: PROTOCOL_VERSION,
            service_id: SERVICE_ID.to_string(),
            peer_id: self.identity.id.clone(),
            display_name: self.identity.display_name.clone(),
            info,
            listen_port: self.cfg.transport_port,
        };
        let Ok(payload) = bincode::serialize(&beacon) else {
            return;
        };
        if let Err(err) = self.udp.send_to(&payload, self.beacon_dest).await {
            debug!(%err, "beacon send failed");
        }
    }

    fn on_datagram(&mut self, data: &[u8], from: SocketAddr) {
        if !self.browsing {
            return;
        }
        let Ok(beacon) = bincode::deserialize::<Beacon>(data) else {
            return;
        };
        if beacon.protocol_version != PROTOCOL_VERSION || beacon.service_id != SERVICE_ID {
            return;
        }
        if beacon.peer_id == self.identity.id {
            return;
        }
        let addr = SocketAddr::new(from.ip(), beacon.listen_port);
        let is_new = !self.peers.contains_key(&beacon.peer_id);
        self.peers.insert(
            beacon.peer_id.clone(),
            DiscoveredPeer {
                addr,
                last_seen: Instant::now(),
            },
        );
        if is_new {
            let peer = PeerIdentity::new(beacon.peer_id, beacon.display_name);
            let _ = self.events_tx.send(TransportEvent::PeerFound {
                peer,
                info: Some(beacon.info),
            });
        }
    }

    fn sweep_stale_peers(&mut self) {
        let now = Instant::now();
        let stale: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|(_, p)| now.duration_since(p.last_seen) >= PEER_TIMEOUT)
            .map(|(id, _)| id.clone())
            .collect();
        for peer_id in stale {
            self.peers.remove(&peer_id);
            let _ = self
                .events_tx
                .send(TransportEvent::PeerLost { peer_id });
        }
    }

    fn local_hello(&self) -> Hello {
        Hello {
            protocol_version: PROTOCOL_VERSION,
            service_id: SERVICE_ID.to_string(),
            peer_id: self.identity.id.clone(),
            display_name: self.identity.display_name.clone(),
            info: self.advertising,
        }
    }

    fn emit_state(&self, peer_id: PeerId, state: PeerTransportState) {
        let _ = self
            .events_tx
            .send(TransportEvent::PeerStateChanged { peer_id, state });
    }
}

/// Outbound invitation: connect, send hello, wait for the decision byte.
async fn run_invite(
    addr: SocketAddr,
    peer_id: PeerId,
    hello: Hello,
    timeout_secs: u32,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    link_tx: mpsc::UnboundedSender<LinkEvent>,
) {
    let _ = events_tx.send(TransportEvent::PeerStateChanged {
        peer_id: peer_id.clone(),
        state: PeerTransportState::Connecting,
    });
    let attempt = tokio::time::timeout(Duration::from_secs(timeout_secs as u64), async {
        let mut stream = TcpStream::connect(addr).await?;
        write_hello(&mut stream, &hello).await?;
        let mut decision = [0u8; 1];
        stream.read_exact(&mut decision).await?;
        if decision[0] == HELLO_ACCEPT {
            Ok(stream)
        } else {
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "invitation declined",
            ))
        }
    })
    .await;
    match attempt {
        Ok(Ok(stream)) => {
            let _ = link_tx.send(LinkEvent::Established { peer_id, stream });
        }
        Ok(Err(err)) => {
            debug!(%err, %peer_id, "invitation failed");
            let _ = events_tx.send(TransportEvent::PeerStateChanged {
                peer_id,
                state: PeerTransportState::NotConnected,
            });
        }
        Err(_) => {
            debug!(%peer_id, "invitation timed out");
            let _ = events_tx.send(TransportEvent::PeerStateChanged {
                peer_id,
                state: PeerTransportState::NotConnected,
            });
        }
    }
}

/// Inbound link: read the hello, surface the invitation, wait for the
/// session's decision, then answer with one byte.
async fn run_inbound(
    mut stream: TcpStream,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    link_tx: mpsc::UnboundedSender<LinkEvent>,
) {
    let hello = match tokio::time::timeout(HELLO_TIMEOUT, read_hello(&mut stream)).await {
        Ok(Ok(hello)) => hello,
        _ => return,
    };
    let peer_id = hello.peer_id.clone();
    let peer = PeerIdentity::new(hello.peer_id, hello.display_name);
    let (decision_tx, decision_rx) = oneshot::channel();
    if link_tx
        .send(LinkEvent::Pending {
            peer_id: peer_id.clone(),
            decision_tx,
        })
        .is_err()
    {
        return;
    }
    let _ = events_tx.send(TransportEvent::InvitationReceived {
        peer,
        info: hello.info,
    });
    let accept = match tokio::time::timeout(DECISION_TIMEOUT, decision_rx).await {
        Ok(Ok(accept)) => accept,
        _ => false,
    };
    let byte = if accept { HELLO_ACCEPT } else { HELLO_DECLINE };
    if stream.write_all(&[byte]).await.is_err() {
        return;
    }
    if accept {
        let _ = link_tx.send(LinkEvent::Established { peer_id, stream });
    }
}

async fn write_hello(stream: &mut TcpStream, hello: &Hello) -> std::io::Result<()> {
    let body = bincode::serialize(hello)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let len = body.len() as u32;
    stream.write_all(&len.to_le_bytes()).await?;
    stream.write_all(&body).await?;
    stream.flush().await
}

async fn read_hello(stream: &mut TcpStream) -> std::io::Result<Hello> {
    let mut len_buf = [0u8; LEN_SIZE];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_HELLO_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "hello too large",
        ));
    }
    let mut body = vec![0u8; len as usize];
    stream.read_exact(&mut body).await?;
    let hello: Hello = bincode::deserialize(&body)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    if hello.protocol_version != PROTOCOL_VERSION || hello.service_id != SERVICE_ID {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "incompatible hello",
        ));
    }
    Ok(hello)
}

/// Forward complete length-prefixed frames to the session; any framing or
/// socket error drops the link.
async fn read_loop(
    peer_id: PeerId,
    mut reader: OwnedReadHalf,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    link_tx: mpsc::UnboundedSender<LinkEvent>,
) {
    loop {
        let mut len_buf = [0u8; LEN_SIZE];
        if reader.read_exact(&mut len_buf).await.is_err() {
            break;
        }
        let len = u32::from_le_bytes(len_buf);
        if len > MAX_FRAME_LEN {
            warn!(%peer_id, len, "oversized frame, dropping link");
            break;
        }
        let mut body = vec![0u8; len as usize];
        if reader.read_exact(&mut body).await.is_err() {
            break;
        }
        let mut frame = Vec::with_capacity(LEN_SIZE + body.len());
        frame.extend_from_slice(&len_buf);
        frame.extend_from_slice(&body);
        let _ = events_tx.send(TransportEvent::DataReceived {
            peer_id: peer_id.clone(),
            bytes: frame,
        });
    }
    let _ = link_tx.send(LinkEvent::Closed { peer_id });
}

async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(frame) = rx.recv().await {
        if writer.write_all(&frame).await.is_err() {
            break;
        }
        let _ = writer.flush().await;
    }
}
