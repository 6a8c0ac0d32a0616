use std::io::{self, ErrorKind};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::{
    config::ClientConfig,
    context::Context,
    dialog::Dialog,
    message::{Request, Response},
    stack::{SipStack, Status},
    transport::{Channel, ResponseHandler, Transport, UdpTransport},
    Result, SipError,
};

/// State shared between the caller and the receive loop.
struct Shared {
    stack: Mutex<SipStack>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SipStack> {
        self.stack.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ResponseHandler for Shared {
    fn on_receive(&self, response: Response) -> Vec<Request> {
        match self.lock().on_receive(response) {
            Ok(reply) => reply.into_iter().collect(),
            Err(e) => {
                warn!("dropping response: {e}");
                Vec::new()
            }
        }
    }

    // Waiters wake only once any ACK is out, so a BYE cannot overtake it.
    fn on_replies_sent(&self) {
        self.changed.notify_all();
    }
}

/// Blocking SIP user agent: one account, one registrar, one UDP socket.
///
/// Every operation sends its request and blocks until the matching state
/// change, a failure, or `response_timeout`.
pub struct Client<T: Transport = UdpTransport> {
    shared: Arc<Shared>,
    channel: Channel<T>,
    config: ClientConfig,
}

impl Client<UdpTransport> {
    /// Bind the configured address and start listening for the registrar.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let remote = resolve(&config.domain, config.registrar_port)?;
        let transport = UdpTransport::bind(config.bind)?;
        let advertised = match config.advertised {
            Some(addr) => addr,
            None => SocketAddr::new(outbound_ip(remote)?, transport.local_addr()?.port()),
        };
        info!("{} via {remote}, reachable at {advertised}", config.address_of_record());
        Self::with_transport(config, transport, remote, advertised)
    }
}

impl<T: Transport> Client<T> {
    pub fn with_transport(
        config: ClientConfig,
        transport: T,
        remote: SocketAddr,
        advertised: SocketAddr,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            stack: Mutex::new(SipStack::new(&config, advertised)),
            changed: Condvar::new(),
        });
        let handler = Arc::downgrade(&shared) as Weak<dyn ResponseHandler>;
        let channel = Channel::open(Arc::new(transport), remote, handler, &config)?;
        Ok(Self {
            shared,
            channel,
            config,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn status(&self) -> Status {
        self.shared.lock().status()
    }

    /// Snapshot of the session history.
    pub fn context(&self) -> Context {
        self.shared.lock().context().clone()
    }

    /// Register for `expires` seconds. The binding is removed when the
    /// returned guard is dropped or released.
    pub fn register(&self, expires: u32) -> Result<Registration<'_, T>> {
        self.send_register(expires)?;
        Ok(Registration {
            client: self,
            active: expires > 0,
        })
    }

    /// Call the configured target. Hangs up when the returned guard is
    /// dropped.
    pub fn invite(&self) -> Result<Call<'_, T>> {
        let request = self.shared.lock().begin_invite()?;
        self.exchange(&request, Status::Calling)?;
        Ok(Call {
            client: self,
            active: true,
        })
    }

    pub fn close(&mut self) {
        self.channel.close();
    }

    fn unregister(&self) -> Result<()> {
        self.send_register(0)
    }

    // A call in progress stays up across REGISTER exchanges.
    fn send_register(&self, expires: u32) -> Result<()> {
        let (request, target) = {
            let mut stack = self.shared.lock();
            let target = stack.status_after_register(expires);
            (stack.begin_register(expires), target)
        };
        self.exchange(&request, target)
    }

    fn hang_up(&self) -> Result<()> {
        let (request, target) = {
            let mut stack = self.shared.lock();
            (stack.begin_bye()?, stack.status_after_call())
        };
        self.exchange(&request, target)
    }

    fn exchange(&self, request: &Request, target: Status) -> Result<()> {
        info!("sending {}", request.method);
        self.channel.send(request)?;
        self.wait_for(target)
    }

    fn wait_for(&self, target: Status) -> Result<()> {
        let started = Instant::now();
        let (mut stack, _) = self
            .shared
            .changed
            .wait_timeout_while(self.shared.lock(), self.config.response_timeout, |stack| {
                (stack.is_pending() || stack.status() != target) && stack.failure().is_none()
            })
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(err) = stack.take_failure() {
            return Err(err);
        }
        if stack.is_pending() || stack.status() != target {
            return Err(SipError::Timeout {
                target,
                elapsed: started.elapsed(),
            });
        }
        Ok(())
    }
}

/// Live registration. Dropping it unregisters.
pub struct Registration<'c, T: Transport = UdpTransport> {
    client: &'c Client<T>,
    active: bool,
}

impl<T: Transport> Registration<'_, T> {
    /// Expiry granted by the registrar.
    pub fn expires(&self) -> Option<u32> {
        self.client.shared.lock().granted_expires()
    }

    /// When to refresh: 80% of the granted expiry.
    pub fn refresh_interval(&self) -> Option<Duration> {
        self.expires()
            .map(|expires| Duration::from_secs(u64::from(expires) * 8 / 10))
    }

    /// Re-register on the same Call-ID with the next sequence number.
    pub fn refresh(&mut self, expires: u32) -> Result<()> {
        self.client.send_register(expires)
    }

    pub fn release(mut self) -> Result<()> {
        self.active = false;
        self.client.unregister()
    }
}

impl<T: Transport> Drop for Registration<'_, T> {
    fn drop(&mut self) {
        if self.active {
            if let Err(e) = self.client.unregister() {
                warn!("unregister failed: {e}");
            }
        }
    }
}

/// Established call. Dropping it sends BYE.
pub struct Call<'c, T: Transport = UdpTransport> {
    client: &'c Client<T>,
    active: bool,
}

impl<T: Transport> Call<'_, T> {
    pub fn dialog(&self) -> Option<Dialog> {
        self.client.shared.lock().context().active_dialog().cloned()
    }

    pub fn hang_up(mut self) -> Result<()> {
        self.active = false;
        self.client.hang_up()
    }
}

impl<T: Transport> Drop for Call<'_, T> {
    fn drop(&mut self) {
        if self.active {
            if let Err(e) = self.client.hang_up() {
                warn!("hang up failed: {e}");
            }
        }
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| {
            SipError::Io(io::Error::new(
                ErrorKind::NotFound,
                format!("no IPv4 address for {host}"),
            ))
        })
}

// Local address the OS routes toward `remote`. Connecting a UDP socket sends nothing.
fn outbound_ip(remote: SocketAddr) -> Result<std::net::IpAddr> {
    let probe = UdpSocket::bind(("0.0.0.0", 0))?;
    probe.connect(remote)?;
    Ok(probe.local_addr()?.ip())
}
