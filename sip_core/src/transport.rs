use std::io::{self, ErrorKind};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use crate::{
    config::ClientConfig,
    message::{parse_message, Message, Request, Response},
    Result,
};

const MAX_DATAGRAM: usize = 65_535;

/// Datagram transport under a [`Channel`]. Shared between the receive loop
/// and the sending thread.
pub trait Transport: Send + Sync + 'static {
    fn send_to(&self, bytes: &[u8], destination: SocketAddr) -> io::Result<()>;

    /// Wait up to `timeout` for one datagram. `Ok(None)` when nothing arrived.
    fn receive(&self, timeout: Duration) -> io::Result<Option<Vec<u8>>>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Consumer of decoded responses. Whatever requests it returns are sent to
/// the channel's remote before the next datagram is read.
pub trait ResponseHandler: Send + Sync {
    fn on_receive(&self, response: Response) -> Vec<Request>;

    /// Called after the replies returned by `on_receive` were sent.
    fn on_replies_sent(&self) {}
}

#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        Ok(Self::from_socket(UdpSocket::bind(addr)?))
    }

    pub fn from_socket(socket: UdpSocket) -> Self {
        Self { socket }
    }

    pub fn socket(&self) -> &UdpSocket {
        &self.socket
    }
}

impl Transport for UdpTransport {
    fn send_to(&self, bytes: &[u8], destination: SocketAddr) -> io::Result<()> {
        let sent = self.socket.send_to(bytes, destination)?;
        if sent != bytes.len() {
            return Err(io::Error::new(
                ErrorKind::WriteZero,
                format!("short send: {sent} of {} bytes", bytes.len()),
            ));
        }
        Ok(())
    }

    fn receive(&self, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        // A zero timeout means "block forever" to the socket.
        self.socket
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        let mut buf = vec![0u8; MAX_DATAGRAM];
        match self.socket.recv_from(&mut buf) {
            Ok((len, from)) => {
                trace!("{len} bytes from {from}");
                buf.truncate(len);
                Ok(Some(buf))
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

/// A transport bound to one remote peer plus the background thread that
/// reads from it.
pub struct Channel<T: Transport = UdpTransport> {
    transport: Arc<T>,
    remote: SocketAddr,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    join_timeout: Duration,
}

impl<T: Transport> Channel<T> {
    /// Start the receive loop. It holds `handler` weakly and exits once the
    /// handler is gone or [`Channel::close`] is called.
    pub fn open(
        transport: Arc<T>,
        remote: SocketAddr,
        handler: Weak<dyn ResponseHandler>,
        config: &ClientConfig,
    ) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let worker = thread::Builder::new().name("sip-rx".into()).spawn({
            let transport = Arc::clone(&transport);
            let stop = Arc::clone(&stop);
            let poll = config.socket_timeout;
            move || receive_loop(transport.as_ref(), remote, &handler, &stop, poll)
        })?;

        Ok(Self {
            transport,
            remote,
            stop,
            worker: Some(worker),
            join_timeout: config.join_timeout,
        })
    }

    pub fn send(&self, request: &Request) -> Result<()> {
        send_request(self.transport.as_ref(), self.remote, request)
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn is_open(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Stop the receive loop and join it, waiting at most the configured
    /// join timeout. A loop that overruns is detached.
    pub fn close(&mut self) {
        self.stop.store(true, Ordering::Release);
        let Some(worker) = self.worker.take() else {
            return;
        };

        let deadline = Instant::now() + self.join_timeout;
        while !worker.is_finished() {
            if Instant::now() >= deadline {
                warn!("receive loop still running after {:?}, detaching", self.join_timeout);
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        if worker.join().is_err() {
            warn!("receive loop panicked");
        }
    }
}

impl<T: Transport> Drop for Channel<T> {
    fn drop(&mut self) {
        self.close();
    }
}

fn send_request<T: Transport + ?Sized>(
    transport: &T,
    remote: SocketAddr,
    request: &Request,
) -> Result<()> {
    let text = request.render();
    debug!("--> {remote}\n{text}");
    transport.send_to(text.as_bytes(), remote)?;
    Ok(())
}

fn receive_loop<T: Transport + ?Sized>(
    transport: &T,
    remote: SocketAddr,
    handler: &Weak<dyn ResponseHandler>,
    stop: &AtomicBool,
    poll: Duration,
) {
    info!("receive loop started (peer {remote})");

    while !stop.load(Ordering::Acquire) {
        let datagram = match transport.receive(poll) {
            Ok(Some(datagram)) => datagram,
            Ok(None) => {
                if handler.strong_count() == 0 {
                    break;
                }
                continue;
            }
            Err(e) => {
                warn!("receive failed: {e}");
                thread::sleep(poll);
                continue;
            }
        };

        let Some(handler) = handler.upgrade() else {
            break;
        };

        let text = match std::str::from_utf8(&datagram) {
            Ok(text) => text,
            Err(e) => {
                warn!("dropping non-UTF-8 datagram: {e}");
                continue;
            }
        };
        debug!("<-- {remote}\n{text}");

        match parse_message(text) {
            Ok(Message::Response(response)) => {
                for request in handler.on_receive(response) {
                    if let Err(e) = send_request(transport, remote, &request) {
                        warn!("failed to send {}: {e}", request.method);
                    }
                }
                handler.on_replies_sent();
            }
            Ok(Message::Request(request)) => {
                debug!("ignoring inbound {} request", request.method);
            }
            Err(e) => warn!("dropping undecodable datagram: {e}"),
        }
    }

    info!("receive loop stopped");
}
