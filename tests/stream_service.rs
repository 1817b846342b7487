use anyhow::{anyhow, Result};
use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use detstream::{JoinOutcome, LifecycleState, Shutdown, StopReport, StreamService, StreamerConfig};

struct TestService {
    addr: SocketAddr,
    shutdown: Shutdown,
    join: Option<JoinHandle<Result<StopReport>>>,
}

impl TestService {
    fn start(source: &str, model: &str) -> Result<Self> {
        let mut cfg = StreamerConfig::default();
        cfg.source.uri = source.to_string();
        cfg.model = model.to_string();
        cfg.server.host = "127.0.0.1".to_string();
        cfg.server.port = 0;

        let shutdown = Shutdown::new();
        let service = StreamService::start(&cfg, shutdown.clone())?;
        assert_eq!(service.state(), LifecycleState::Running);
        let addr = service.local_addr();
        let join = std::thread::spawn(move || service.serve());
        Ok(Self {
            addr,
            shutdown,
            join: Some(join),
        })
    }

    fn connect(&self) -> Result<TcpStream> {
        let stream = TcpStream::connect(self.addr)?;
        stream.set_read_timeout(Some(Duration::from_secs(5)))?;
        Ok(stream)
    }

    fn stop(mut self) -> Result<StopReport> {
        self.shutdown.trigger();
        let join = self
            .join
            .take()
            .ok_or_else(|| anyhow!("service already stopped"))?;
        join.join().map_err(|_| anyhow!("service thread panicked"))?
    }
}

impl Drop for TestService {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

fn get(service: &TestService, request: &str) -> Result<(String, String)> {
    let mut stream = service.connect()?;
    stream.write_all(request.as_bytes())?;
    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    let mut parts = response.splitn(2, "\r\n\r\n");
    let headers = parts.next().unwrap_or("").to_string();
    let body = parts.next().unwrap_or("").to_string();
    Ok((headers, body))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Parts that are followed by another boundary, i.e. fully received.
fn complete_parts(body: &[u8]) -> Vec<&[u8]> {
    let mut starts = Vec::new();
    let mut offset = 0;
    while let Some(at) = find(&body[offset..], b"--frame\r\n") {
        starts.push(offset + at);
        offset += at + 1;
    }
    starts.windows(2).map(|w| &body[w[0]..w[1]]).collect()
}

#[test]
fn index_page_embeds_ip_and_feed() -> Result<()> {
    let service = TestService::start("stub://index?fps=30&width=64&height=48", "stub")?;
    let (headers, body) = get(&service, "GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")?;

    assert!(headers.starts_with("HTTP/1.1 200 OK"));
    assert!(headers.contains("Content-Type: text/html"));
    assert!(body.contains("/video_feed"));
    let start = body
        .find(r#"<code id="lan-ip">"#)
        .ok_or_else(|| anyhow!("missing ip element"))?
        + r#"<code id="lan-ip">"#.len();
    let end = start
        + body[start..]
            .find("</code>")
            .ok_or_else(|| anyhow!("unterminated ip element"))?;
    assert!(body[start..end].parse::<Ipv4Addr>().is_ok());

    service.stop()?;
    Ok(())
}

#[test]
fn unknown_paths_and_methods_are_rejected() -> Result<()> {
    let service = TestService::start("stub://errors?fps=30&width=64&height=48", "stub")?;
    let (headers, _) = get(&service, "GET /missing HTTP/1.1\r\n\r\n")?;
    assert!(headers.starts_with("HTTP/1.1 404"));
    let (headers, _) = get(&service, "POST /video_feed HTTP/1.1\r\nContent-Length: 0\r\n\r\n")?;
    assert!(headers.starts_with("HTTP/1.1 405"));
    service.stop()?;
    Ok(())
}

#[test]
fn video_feed_streams_jpeg_parts() -> Result<()> {
    let service = TestService::start("stub://feed?fps=30&width=96&height=64", "motion")?;
    let mut stream = service.connect()?;
    stream.write_all(b"GET /video_feed HTTP/1.1\r\nHost: localhost\r\n\r\n")?;

    let mut data = Vec::new();
    let mut buf = [0u8; 8192];
    let deadline = Instant::now() + Duration::from_secs(10);
    while data.windows(9).filter(|w| *w == b"--frame\r\n").count() < 4 {
        if Instant::now() > deadline {
            return Err(anyhow!("timed out waiting for parts"));
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("stream closed early"));
        }
        data.extend_from_slice(&buf[..n]);
    }

    let head_end = find(&data, b"\r\n\r\n").ok_or_else(|| anyhow!("no header"))?;
    let head = String::from_utf8_lossy(&data[..head_end]);
    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert!(head.contains("Content-Type: multipart/x-mixed-replace; boundary=frame"));

    let body = &data[head_end + 4..];
    assert!(body.starts_with(b"--frame\r\n"));
    let parts = complete_parts(body);
    assert!(parts.len() >= 3);
    for part in parts {
        let header = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
        assert!(part.starts_with(header));
        assert!(part.ends_with(b"\r\n"));
        let jpeg = &part[header.len()..part.len() - 2];
        let image = image::load_from_memory(jpeg)?;
        assert_eq!((image.width(), image.height()), (96, 64));
    }

    drop(stream);
    service.stop()?;
    Ok(())
}

#[test]
fn shutdown_stops_all_workers_within_bounds() -> Result<()> {
    let service = TestService::start("stub://endless?fps=60&width=64&height=48", "stub")?;
    // Keep a viewer attached so the delivery side is busy too.
    let mut viewer = service.connect()?;
    viewer.write_all(b"GET /video_feed HTTP/1.1\r\n\r\n")?;
    std::thread::sleep(Duration::from_millis(300));

    let started = Instant::now();
    let report = service.stop()?;
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(matches!(report.capture, JoinOutcome::Joined(_)));
    assert!(matches!(report.annotate, JoinOutcome::Joined(_)));
    assert!(report.frames_read() > 0);

    // The viewer's generator ends once shutdown is seen, closing the socket.
    viewer.set_read_timeout(Some(Duration::from_secs(3)))?;
    let closing = Instant::now();
    let mut sink = Vec::new();
    viewer.read_to_end(&mut sink)?;
    assert!(closing.elapsed() < Duration::from_millis(2500));
    assert!(sink.starts_with(b"HTTP/1.1 200 OK"));
    Ok(())
}

#[test]
fn slow_detector_causes_raw_drops_without_deadlock() -> Result<()> {
    let service = TestService::start(
        "stub://burst?frames=10&fps=0&width=160&height=120",
        "stub?delay_ms=50",
    )?;
    std::thread::sleep(Duration::from_millis(800));
    let started = Instant::now();
    let report = service.stop()?;
    assert!(started.elapsed() < Duration::from_secs(3));

    assert_eq!(report.frames_read(), 10);
    assert!(report.raw.dropped > 0);
    assert_eq!(report.raw.accepted + report.raw.dropped, 10);
    assert!(report.frames_annotated() >= 1);
    assert!(report.frames_annotated() <= report.raw.accepted);
    Ok(())
}
