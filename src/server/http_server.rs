use crate::dispatcher::RequestContext;
use crate::worker_pool::{WorkerPool, WorkerPoolConfig};
use dashmap::DashMap;
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

use super::request::parse_request;
use super::response::write_response;
use super::service::AppService;

/// HTTP/1.1 listener feeding an [`AppService`] through a coroutine worker pool.
pub struct HttpServer(pub AppService);

/// Contexts of the requests currently being served.
///
/// Once closed, every tracked context is cancelled, including ones tracked after
/// the close, so long-running work (ad-hoc commands) cannot hold the pool open.
#[derive(Debug, Default)]
pub struct InFlight {
    next: AtomicU64,
    closed: AtomicBool,
    live: DashMap<u64, RequestContext>,
}

impl InFlight {
    pub fn track(&self, ctx: &RequestContext) -> u64 {
        let ticket = self.next.fetch_add(1, Ordering::Relaxed);
        self.live.insert(ticket, ctx.clone());
        if self.closed.load(Ordering::SeqCst) {
            ctx.cancel();
        }
        ticket
    }

    pub fn release(&self, ticket: u64) {
        self.live.remove(&ticket);
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Cancel every tracked context and any tracked later; returns how many were live.
    pub fn close(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        let mut cancelled = 0;
        for entry in self.live.iter() {
            entry.value().cancel();
            cancelled += 1;
        }
        cancelled
    }
}

/// Handle to a running server.
pub struct ServerHandle {
    addr: SocketAddr,
    server: Arc<tiny_http::Server>,
    acceptor: thread::JoinHandle<()>,
    pool: WorkerPool<tiny_http::Request>,
    in_flight: Arc<InFlight>,
}

impl ServerHandle {
    /// Bound address (resolves port 0 to the real port).
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Poll until the listener accepts connections (50 × 5 ms).
    pub fn wait_ready(&self) -> io::Result<()> {
        for _ in 0..50 {
            if TcpStream::connect(self.addr).is_ok() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(5));
        }
        Err(io::Error::new(io::ErrorKind::TimedOut, "server not ready"))
    }

    /// Requests currently being served.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Stop accepting, cancel in-flight requests and wait for them to answer.
    pub fn stop(self) {
        self.server.unblock();
        let cancelled = self.in_flight.close();
        if cancelled > 0 {
            info!(cancelled, "Cancelled in-flight requests");
        }
        if self.acceptor.join().is_err() {
            error!("Accept loop terminated abnormally");
        }
        self.pool.shutdown();
        info!(addr = %self.addr, "Server stopped");
    }
}

impl HttpServer {
    pub fn start<A: ToSocketAddrs>(self, addr: A, config: WorkerPoolConfig) -> io::Result<ServerHandle> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid address"))?;

        let server = tiny_http::Server::http(addr).map_err(io::Error::other)?;
        let bound = server
            .server_addr()
            .to_ip()
            .ok_or_else(|| io::Error::other("listener is not an IP socket"))?;
        let server = Arc::new(server);

        let service = self.0;
        let in_flight = Arc::new(InFlight::default());
        let tracker = Arc::clone(&in_flight);
        let pool = WorkerPool::start("http", config, move |mut request: tiny_http::Request| {
            let parsed = parse_request(&mut request);
            let ctx = parsed.context.clone();
            let ticket = tracker.track(&ctx);
            let response = service.handle(parsed);
            if let Err(e) = write_response(request, &response) {
                // client went away; anything still sharing the context stops
                ctx.cancel();
                warn!(error = %e, status = response.status, "Failed to write response");
            }
            tracker.release(ticket);
        })?;

        let accept_server = Arc::clone(&server);
        let sender = pool
            .sender()
            .ok_or_else(|| io::Error::other("worker pool already stopped"))?;
        let acceptor = thread::Builder::new()
            .name("masterchef-accept".to_string())
            .spawn(move || {
                for request in accept_server.incoming_requests() {
                    if let Err(request) = sender.dispatch(request) {
                        let busy = tiny_http::Response::from_string(
                            r#"{"error":"server shutting down"}"#,
                        )
                        .with_status_code(tiny_http::StatusCode(503));
                        if let Err(e) = request.respond(busy) {
                            warn!(error = %e, "Failed to reject request during shutdown");
                        }
                    }
                }
            })?;

        info!(addr = %bound, workers = config.num_workers, "Server listening");
        Ok(ServerHandle {
            addr: bound,
            server,
            acceptor,
            pool,
            in_flight,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_cancels_live_and_late_contexts() {
        let in_flight = InFlight::default();
        let live = RequestContext::new();
        let done = RequestContext::new();
        let ticket = in_flight.track(&live);
        let released = in_flight.track(&done);
        in_flight.release(released);
        assert_eq!(in_flight.len(), 1);

        assert_eq!(in_flight.close(), 1);
        assert!(live.is_cancelled());
        assert!(!done.is_cancelled());

        let late = RequestContext::new();
        in_flight.track(&late);
        assert!(late.is_cancelled());
        in_flight.release(ticket);
    }
}
