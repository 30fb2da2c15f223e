// src/tcp.rs
//
// Non-blocking TCP front end for the order gateway: accept loop plus a
// per-session recv/send pass. Each successful read is stamped with the kernel
// software receive timestamp (SO_TIMESTAMPNS) so the FIFO sequencer can order
// requests across clients. Framing is the handler's responsibility.

use anyhow::Context;
use bytes::{Buf, BufMut, BytesMut};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::Write;
use std::net::{SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, RawFd};

use crate::util::now_nanos;

const RECV_CHUNK: usize = 64 * 1024;

pub struct TcpSession {
    pub id: u64,
    stream: TcpStream,
    pub peer: SocketAddr,
    pub inbound: BytesMut,
    pub outbound: BytesMut,
    pub alive: bool,
}

impl TcpSession {
    /// Append to the outbound buffer; transmission is deferred to the next
    /// send_and_recv() pass.
    pub fn queue_send(&mut self, bytes: &[u8]) {
        self.outbound.extend_from_slice(bytes);
    }
}

pub trait SessionHandler {
    fn on_recv(&mut self, session: &mut TcpSession, rx_ns: u64);
    /// Fired once per pass, after all sessions were read, iff any produced bytes.
    fn on_batch_end(&mut self);
}

pub struct TcpServer {
    listener: TcpListener,
    sessions: Vec<TcpSession>,
    next_session_id: u64,
}

impl TcpServer {
    pub fn bind(listen: SocketAddrV4) -> anyhow::Result<Self> {
        let sock = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).context("socket")?;
        sock.set_reuse_address(true).ok();
        sock.bind(&SocketAddr::V4(listen).into()).context("bind order server")?;
        sock.listen(128).context("listen")?;
        let listener: TcpListener = sock.into();
        listener.set_nonblocking(true).context("listener nonblocking")?;
        Ok(Self { listener, sessions: Vec::new(), next_session_id: 1 })
    }

    /// Accept zero or more pending connections without blocking.
    pub fn poll(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = setup_session_socket(&stream) {
                        log::warn!("dropping connection from {peer}: {e:?}");
                        continue;
                    }
                    let id = self.next_session_id;
                    self.next_session_id += 1;
                    log::info!("accepted session {id} from {peer}");
                    self.sessions.push(TcpSession {
                        id,
                        stream,
                        peer,
                        inbound: BytesMut::with_capacity(RECV_CHUNK),
                        outbound: BytesMut::new(),
                        alive: true,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::error!("accept failed: {e}");
                    break;
                }
            }
        }
    }

    /// One recv attempt and one flush attempt per session. Returns whether
    /// any session produced bytes this pass.
    pub fn send_and_recv<H: SessionHandler>(&mut self, handler: &mut H) -> bool {
        let mut received_any = false;
        for session in &mut self.sessions {
            let fd = session.stream.as_raw_fd();
            session.inbound.reserve(RECV_CHUNK);
            let dst = unsafe {
                let chunk = session.inbound.chunk_mut();
                std::slice::from_raw_parts_mut(chunk.as_mut_ptr(), chunk.len())
            };
            match recv_once(fd, dst) {
                RecvOutcome::Data { len, rx_ns } => {
                    unsafe { session.inbound.advance_mut(len); }
                    handler.on_recv(session, rx_ns);
                    received_any = true;
                }
                RecvOutcome::Idle => {}
                RecvOutcome::Closed => {
                    log::info!("session {} ({}) disconnected", session.id, session.peer);
                    session.alive = false;
                }
                RecvOutcome::Error(e) => {
                    log::warn!("session {} recv error: {e}", session.id);
                    session.alive = false;
                }
            }

            if session.alive && !session.outbound.is_empty() {
                match session.stream.write(&session.outbound) {
                    // Unsent remainder stays queued for the next pass.
                    Ok(n) => session.outbound.advance(n),
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(e) => {
                        log::warn!("session {} send error: {e}", session.id);
                        session.alive = false;
                    }
                }
            }
        }
        if received_any {
            handler.on_batch_end();
        }
        // Evict dead sessions; queued outbound bytes for them are lost.
        self.sessions.retain(|s| s.alive);
        received_any
    }

    pub fn session_mut(&mut self, id: u64) -> Option<&mut TcpSession> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

enum RecvOutcome {
    Data { len: usize, rx_ns: u64 },
    Idle,
    Closed,
    Error(std::io::Error),
}

#[cfg(target_os = "linux")]
fn recv_once(fd: RawFd, dst: &mut [u8]) -> RecvOutcome {
    use nix::errno::Errno;
    use nix::sys::socket::{recvmsg, ControlMessageOwned, MsgFlags, SockaddrStorage};
    use std::io::IoSliceMut;

    let mut iov = [IoSliceMut::new(dst)];
    let mut cmsg_buf = nix::cmsg_space!(libc::timespec);
    match recvmsg::<SockaddrStorage>(fd, &mut iov, Some(&mut cmsg_buf), MsgFlags::MSG_DONTWAIT) {
        Ok(msg) => {
            if msg.bytes == 0 {
                return RecvOutcome::Closed;
            }
            let mut rx_ns = now_nanos();
            for c in msg.cmsgs() {
                if let ControlMessageOwned::ScmTimestampns(ts) = c {
                    rx_ns = (ts.tv_sec() as u64) * 1_000_000_000 + (ts.tv_nsec() as u64);
                }
            }
            RecvOutcome::Data { len: msg.bytes, rx_ns }
        }
        Err(Errno::EAGAIN) | Err(Errno::EINTR) => RecvOutcome::Idle,
        Err(e) => RecvOutcome::Error(std::io::Error::from(e)),
    }
}

#[cfg(not(target_os = "linux"))]
fn recv_once(fd: RawFd, dst: &mut [u8]) -> RecvOutcome {
    let n = unsafe { libc::recv(fd, dst.as_mut_ptr() as *mut libc::c_void, dst.len(), libc::MSG_DONTWAIT) };
    if n > 0 {
        RecvOutcome::Data { len: n as usize, rx_ns: now_nanos() }
    } else if n == 0 {
        RecvOutcome::Closed
    } else {
        let e = std::io::Error::last_os_error();
        match e.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted => RecvOutcome::Idle,
            _ => RecvOutcome::Error(e),
        }
    }
}

fn setup_session_socket(stream: &TcpStream) -> anyhow::Result<()> {
    stream.set_nonblocking(true).context("session nonblocking")?;
    stream.set_nodelay(true).context("session nodelay")?;
    enable_rx_timestamps(stream.as_raw_fd());
    Ok(())
}

fn enable_rx_timestamps(fd: RawFd) {
    #[cfg(target_os = "linux")]
    unsafe {
        let one: libc::c_int = 1;
        let _ = libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_TIMESTAMPNS,
            &one as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
    }
    #[cfg(not(target_os = "linux"))]
    let _ = fd;
}
