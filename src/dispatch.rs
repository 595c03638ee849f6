//! The single-threaded, mio-driven event loop. This is the reactor: there is
//! no separate generic state-machine-over-any-protocol layer underneath it,
//! unlike the reference this crate grew out of.

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};

use crate::error::{DispatchError, InitError, StopError};
use crate::parser::{Parser, ParserState};
use crate::request::Request;
use crate::writer;

const TOKEN_V4: Token = Token(0);
const TOKEN_V6: Token = Token(1);
const TOKEN_SHUTDOWN: Token = Token(2);
const FIRST_SLOT_TOKEN: usize = 3;
const SLOT_GROWTH: usize = 128;
const READ_CHUNK: usize = 4096;

struct Connection {
    stream: TcpStream,
    parser: Parser,
}

/// Read end of a self-pipe, registered with the `Poll`; becomes readable
/// (returns `Ok(0)`) once the write end is closed by a `ShutdownHandle`.
struct ShutdownRead(std::fs::File);

impl mio::event::Source for ShutdownRead {
    fn register(
        &mut self,
        registry: &mio::Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        mio::unix::SourceFd(&self.0.as_raw_fd()).register(registry, token, interests)
    }
    fn reregister(
        &mut self,
        registry: &mio::Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        mio::unix::SourceFd(&self.0.as_raw_fd()).reregister(registry, token, interests)
    }
    fn deregister(&mut self, registry: &mio::Registry) -> io::Result<()> {
        mio::unix::SourceFd(&self.0.as_raw_fd()).deregister(registry)
    }
}

/// Cloneable, `Send` handle used to wake a running `dispatch()` loop from any
/// thread. Idempotent: a second `stop()` returns `StopError::NotFound`.
#[derive(Clone)]
pub struct ShutdownHandle {
    write_fd: RawFd,
    closed: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn stop(&self) -> Result<(), StopError> {
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(StopError::NotFound);
        }
        unsafe {
            libc::close(self.write_fd);
        }
        Ok(())
    }
}

pub struct Dispatcher {
    poll: Poll,
    listener_v4: TcpListener,
    listener_v6: TcpListener,
    shutdown_read: ShutdownRead,
    shutdown_write_fd: RawFd,
    shutdown_closed: Arc<AtomicBool>,
    slots: Vec<Option<Connection>>,
}

impl Dispatcher {
    /// Binds an IPv4 wildcard listener and an IPv6-only wildcard listener on
    /// the same `port`, both with `SO_REUSEADDR`, backlog 128, non-blocking.
    pub fn new(port: u16) -> Result<Dispatcher, InitError> {
        if port < 1024 {
            return Err(InitError::InvalidPort);
        }

        let listener_v4 = bind_v4(port)?;
        let listener_v6 = bind_v6(port)?;

        let mut poll = Poll::new().map_err(InitError::Io)?;
        let mut listener_v4 = listener_v4;
        let mut listener_v6 = listener_v6;
        poll.registry()
            .register(&mut listener_v4, TOKEN_V4, Interest::READABLE)
            .map_err(InitError::Io)?;
        poll.registry()
            .register(&mut listener_v6, TOKEN_V6, Interest::READABLE)
            .map_err(InitError::Io)?;

        let mut fds = [0 as RawFd; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(InitError::Io(io::Error::last_os_error()));
        }
        let (read_fd, write_fd) = (fds[0], fds[1]);
        set_nonblocking_fd(read_fd).map_err(InitError::Io)?;

        let mut shutdown_read = ShutdownRead(unsafe { std::fs::File::from_raw_fd(read_fd) });
        poll.registry()
            .register(&mut shutdown_read, TOKEN_SHUTDOWN, Interest::READABLE)
            .map_err(InitError::Io)?;

        Ok(Dispatcher {
            poll,
            listener_v4,
            listener_v6,
            shutdown_read,
            shutdown_write_fd: write_fd,
            shutdown_closed: Arc::new(AtomicBool::new(false)),
            slots: Vec::new(),
        })
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            write_fd: self.shutdown_write_fd,
            closed: self.shutdown_closed.clone(),
        }
    }

    /// Runs until the shutdown handle fires. The callback is invoked
    /// synchronously for every fully parsed request, on this thread, between
    /// reading the last request byte and writing the first response byte.
    pub fn dispatch(
        &mut self,
        mut callback: impl FnMut(&mut Request<'_>),
    ) -> Result<(), DispatchError> {
        let mut events = Events::with_capacity(1024);
        'outer: loop {
            match self.poll.poll(&mut events, None) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(DispatchError::Io(e)),
            }

            for event in events.iter() {
                match event.token() {
                    TOKEN_V4 => self.accept_loop(true)?,
                    TOKEN_V6 => self.accept_loop(false)?,
                    TOKEN_SHUTDOWN => break 'outer,
                    Token(n) => {
                        let idx = n - FIRST_SLOT_TOKEN;
                        self.service_connection(idx, &mut callback)?;
                    }
                }
            }
        }

        self.poll
            .registry()
            .deregister(&mut self.listener_v4)
            .ok();
        self.poll
            .registry()
            .deregister(&mut self.listener_v6)
            .ok();
        for slot in self.slots.iter_mut() {
            if let Some(conn) = slot {
                self.poll.registry().deregister(&mut conn.stream).ok();
            }
        }
        self.slots.clear();

        Ok(())
    }

    fn accept_loop(&mut self, v4: bool) -> Result<(), DispatchError> {
        loop {
            let accepted = if v4 {
                self.listener_v4.accept()
            } else {
                self.listener_v6.accept()
            };
            let (mut stream, _addr) = match accepted {
                Ok(pair) => pair,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => {
                    log::warn!("accept failed: {e}");
                    return Ok(());
                }
            };

            let idx = self.free_slot()?;
            let token = Token(idx + FIRST_SLOT_TOKEN);
            self.poll
                .registry()
                .register(&mut stream, token, Interest::READABLE)?;
            self.slots[idx] = Some(Connection {
                stream,
                parser: Parser::new(),
            });
        }
    }

    fn free_slot(&mut self) -> Result<usize, DispatchError> {
        if let Some(idx) = self.slots.iter().position(|s| s.is_none()) {
            return Ok(idx);
        }
        let start = self.slots.len();
        self.slots
            .try_reserve(SLOT_GROWTH)
            .map_err(|_| DispatchError::Alloc)?;
        self.slots.resize_with(start + SLOT_GROWTH, || None);
        Ok(start)
    }

    fn service_connection(
        &mut self,
        idx: usize,
        callback: &mut impl FnMut(&mut Request<'_>),
    ) -> Result<(), DispatchError> {
        let mut buf = [0u8; READ_CHUNK];
        let read_result = match self.slots[idx].as_mut() {
            Some(conn) => conn.stream.read(&mut buf),
            None => return Ok(()),
        };

        let n = match read_result {
            Ok(0) => {
                self.close_slot(idx);
                return Ok(());
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) => {
                log::warn!("read failed on slot {idx}: {e}");
                self.close_slot(idx);
                return Ok(());
            }
        };

        let conn = self.slots[idx].as_mut().expect("slot checked above");
        conn.parser.feed(&buf[..n])?;

        if conn.parser.err_status() != 0 {
            let status = conn.parser.err_status();
            let mut out = Vec::new();
            writer::write_error(&mut out, status);
            self.write_all_and_decide(idx, &out, false)?;
            return Ok(());
        }

        if conn.parser.state() != ParserState::Done {
            return Ok(());
        }

        let peer_ip = conn
            .stream
            .peer_addr()
            .map(|a| a.ip().to_string())
            .unwrap_or_default();

        let mut request = conn.parser.take_request();
        request.client_ip = peer_ip;
        callback(&mut request);

        let keep_alive = request
            .header("Connection")
            .map(|v| v.trim().eq_ignore_ascii_case("keep-alive"))
            .unwrap_or(false);

        let mut out = Vec::new();
        writer::write_response(
            &mut out,
            request.response.status(),
            request.response.headers(),
            request.response.body(),
        );
        drop(request);

        self.write_all_and_decide(idx, &out, keep_alive)?;
        Ok(())
    }

    fn write_all_and_decide(
        &mut self,
        idx: usize,
        out: &[u8],
        keep_alive: bool,
    ) -> Result<(), DispatchError> {
        {
            let conn = match self.slots[idx].as_mut() {
                Some(c) => c,
                None => return Ok(()),
            };
            let mut written = 0;
            while written < out.len() {
                match conn.stream.write(&out[written..]) {
                    Ok(0) => {
                        self.close_slot(idx);
                        return Ok(());
                    }
                    Ok(n) => written += n,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                    Err(e) => {
                        log::warn!("write failed on slot {idx}: {e}");
                        self.close_slot(idx);
                        return Ok(());
                    }
                }
            }
        }

        if keep_alive {
            let conn = self.slots[idx].as_mut().expect("slot checked above");
            conn.parser = Parser::new();
            let token = Token(idx + FIRST_SLOT_TOKEN);
            self.poll
                .registry()
                .reregister(&mut conn.stream, token, Interest::READABLE)?;
        } else {
            self.close_slot(idx);
        }
        Ok(())
    }

    fn close_slot(&mut self, idx: usize) {
        if let Some(mut conn) = self.slots[idx].take() {
            self.poll.registry().deregister(&mut conn.stream).ok();
        }
    }
}

fn set_nonblocking_fd(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn bind_v4(port: u16) -> Result<TcpListener, InitError> {
    let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
    bind_reuseaddr(addr, false).map_err(InitError::Io)
}

fn bind_v6(port: u16) -> Result<TcpListener, InitError> {
    let addr = SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, port, 0, 0));
    bind_reuseaddr(addr, true).map_err(InitError::Io)
}

fn bind_reuseaddr(addr: SocketAddr, v6_only: bool) -> io::Result<TcpListener> {
    use socket2::{Domain, Socket, Type};

    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    if v6_only {
        socket.set_only_v6(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(128)?;
    TcpListener::from_std(socket.into())
}
