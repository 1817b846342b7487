//! Delivery stage: a small HTTP/1.1 server on `std::net`.
//!
//! `GET /` serves the landing page, `GET /video_feed` streams the encoded
//! channel as `multipart/x-mixed-replace`. Each client gets its own thread.

mod http;
mod mjpeg;
mod page;

use anyhow::{anyhow, Context, Result};
use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use crate::channel::FrameChannel;
use crate::frame::EncodedFrame;
use crate::lifecycle::Shutdown;
use crate::netinfo;

use http::{read_request, write_response, write_stream_head, write_text_response};
pub use mjpeg::{encode_part, MjpegParts, BOUNDARY, CONTENT_TYPE, ENCODED_POP_TIMEOUT};
pub use page::render_index;

/// Accept poll interval while the listener is idle.
pub const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Read and write timeout on client sockets.
pub const CLIENT_IO_TIMEOUT: Duration = Duration::from_secs(2);

/// Bound listener plus everything a client handler needs.
pub struct StreamServer {
    listener: TcpListener,
    addr: SocketAddr,
    encoded: FrameChannel<EncodedFrame>,
    shutdown: Shutdown,
}

impl StreamServer {
    pub fn bind(
        addr: &str,
        encoded: FrameChannel<EncodedFrame>,
        shutdown: Shutdown,
    ) -> Result<Self> {
        let listener =
            TcpListener::bind(addr).with_context(|| format!("failed to bind {}", addr))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;
        log::info!(
            "stream server listening on {} (open http://{}:{}/)",
            addr,
            netinfo::local_ip(),
            addr.port()
        );
        Ok(Self {
            listener,
            addr,
            encoded,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Accept clients until shutdown. Accept errors other than `WouldBlock`
    /// are fatal and returned.
    pub fn run(&self) -> Result<()> {
        while !self.shutdown.is_triggered() {
            match self.listener.accept() {
                Ok((stream, peer)) => self.spawn_client(stream, peer),
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                Err(err) => return Err(anyhow!("stream server accept failed: {}", err)),
            }
        }
        log::info!("stream server stopped");
        Ok(())
    }

    fn spawn_client(&self, stream: TcpStream, peer: SocketAddr) {
        let client = ClientContext {
            port: self.addr.port(),
            encoded: self.encoded.clone(),
            shutdown: self.shutdown.clone(),
        };
        let spawned = std::thread::Builder::new()
            .name(format!("client-{}", peer))
            .spawn(move || {
                if let Err(err) = client.handle(stream) {
                    log::debug!("client {} closed: {}", peer, err);
                }
            });
        if let Err(err) = spawned {
            log::warn!("failed to spawn handler for {}: {}", peer, err);
        }
    }
}

struct ClientContext {
    port: u16,
    encoded: FrameChannel<EncodedFrame>,
    shutdown: Shutdown,
}

impl ClientContext {
    fn handle(&self, mut stream: TcpStream) -> Result<()> {
        // Accepted sockets may inherit non-blocking mode.
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(CLIENT_IO_TIMEOUT))?;
        stream.set_write_timeout(Some(CLIENT_IO_TIMEOUT))?;

        let request = match read_request(&mut stream) {
            Ok(request) => request,
            Err(err) => {
                write_text_response(&mut stream, 400, "bad request\n")?;
                return Err(err);
            }
        };
        if request.method != "GET" {
            return write_text_response(&mut stream, 405, "method not allowed\n");
        }
        match request.path.as_str() {
            "/" => {
                // Resolved per request.
                let body = render_index(netinfo::local_ip(), self.port);
                write_response(&mut stream, 200, "text/html; charset=utf-8", body.as_bytes())
            }
            "/video_feed" => self.stream_feed(stream),
            _ => write_text_response(&mut stream, 404, "not found\n"),
        }
    }

    fn stream_feed(&self, mut stream: TcpStream) -> Result<()> {
        let peer = stream.peer_addr()?;
        write_stream_head(&mut stream, CONTENT_TYPE)?;
        log::info!("viewer {} connected", peer);

        let mut parts_sent = 0u64;
        let parts = MjpegParts::new(self.encoded.clone(), self.shutdown.clone());
        let result = parts
            .map(|part| {
                stream.write_all(&part)?;
                stream.flush()?;
                parts_sent += 1;
                Ok(())
            })
            .collect::<std::io::Result<()>>();

        log::info!("viewer {} disconnected after {} frames", peer, parts_sent);
        result.context("write multipart frame")
    }
}
