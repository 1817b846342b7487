//! `multipart/x-mixed-replace` framing for the live feed.

use std::time::Duration;

use crate::channel::FrameChannel;
use crate::frame::EncodedFrame;
use crate::lifecycle::Shutdown;

pub const BOUNDARY: &str = "frame";
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Bound on the wait for the next encoded frame.
pub const ENCODED_POP_TIMEOUT: Duration = Duration::from_secs(1);

/// One multipart part wrapping a JPEG.
pub fn encode_part(jpeg: &[u8]) -> Vec<u8> {
    let head = format!("--{BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\n");
    let mut part = Vec::with_capacity(head.len() + jpeg.len() + 2);
    part.extend_from_slice(head.as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part
}

/// Pull-based part generator bound to one response body.
///
/// Each `next` waits for an encoded frame, re-checking shutdown after every
/// timed-out wait; the iterator ends once shutdown is set.
pub struct MjpegParts {
    encoded: FrameChannel<EncodedFrame>,
    shutdown: Shutdown,
}

impl MjpegParts {
    pub fn new(encoded: FrameChannel<EncodedFrame>, shutdown: Shutdown) -> Self {
        Self { encoded, shutdown }
    }
}

impl Iterator for MjpegParts {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.shutdown.is_triggered() {
            if let Some(frame) = self.encoded.pop_timeout(ENCODED_POP_TIMEOUT) {
                return Some(encode_part(frame.bytes()));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn part_layout() {
        let part = encode_part(&[0xff, 0xd8, 0xff, 0xd9]);
        assert_eq!(
            part,
            b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\xff\xd8\xff\xd9\r\n".to_vec()
        );
    }

    #[test]
    fn parts_follow_channel_order() {
        let encoded = FrameChannel::bounded(4);
        encoded.try_push(EncodedFrame::from_jpeg(1, vec![1]));
        encoded.try_push(EncodedFrame::from_jpeg(2, vec![2]));
        let mut parts = MjpegParts::new(encoded, Shutdown::new());
        assert!(parts.next().is_some_and(|p| p.ends_with(b"\x01\r\n")));
        assert!(parts.next().is_some_and(|p| p.ends_with(b"\x02\r\n")));
    }

    #[test]
    fn shutdown_ends_generator_within_bound() {
        let encoded = FrameChannel::bounded(4);
        let shutdown = Shutdown::new();
        let mut parts = MjpegParts::new(encoded, shutdown.clone());
        let trigger = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            shutdown.trigger();
        });
        let started = Instant::now();
        assert!(parts.next().is_none());
        assert!(started.elapsed() < ENCODED_POP_TIMEOUT + Duration::from_millis(500));
        let _ = trigger.join();
    }
}
