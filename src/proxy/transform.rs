//! Image-alteration collaborator.
//!
//! The alteration itself happens in an external transcoding service; from
//! this crate's point of view it is opaque: send a byte buffer, get a byte
//! buffer back, substitute it in place. A failed call leaves the original
//! bytes unmodified and is never escalated to a client-visible error.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

/// The opaque collaborator interface.
pub trait ImageFilter: Send + Sync + 'static {
    /// Returns the altered bytes, or `None` when the collaborator failed.
    fn alter(&self, bytes: &[u8]) -> Option<Vec<u8>>;
}

/// Extensions the proxy treats as images.
pub fn is_image_target(target: &str) -> bool {
    let ext = target.rsplit('.').next().unwrap_or("");
    matches!(
        ext.to_ascii_lowercase().as_str(),
        "jpg" | "jpeg" | "png" | "gif"
    )
}

/// Client for a transcoding service speaking length-prefixed frames:
/// request `[len: u32 BE][bytes]`, response in the same framing.
pub struct RemoteTranscoder {
    address: String,
    timeout: Duration,
}

impl RemoteTranscoder {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }

    fn call(&self, bytes: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut stream = TcpStream::connect(&self.address)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        stream.write_all(&(bytes.len() as u32).to_be_bytes())?;
        stream.write_all(bytes)?;

        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf)?;
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut altered = vec![0u8; len];
        stream.read_exact(&mut altered)?;
        Ok(altered)
    }
}

impl ImageFilter for RemoteTranscoder {
    fn alter(&self, bytes: &[u8]) -> Option<Vec<u8>> {
        match self.call(bytes) {
            Ok(altered) => Some(altered),
            Err(e) => {
                tracing::warn!(address = %self.address, error = %e, "Image filter call failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_extensions() {
        assert!(is_image_target("/pics/cat.jpg"));
        assert!(is_image_target("/pics/cat.JPEG"));
        assert!(is_image_target("/x.png"));
        assert!(!is_image_target("/index.html"));
        assert!(!is_image_target("/noext"));
    }

    #[test]
    fn test_unreachable_transcoder_returns_none() {
        let filter = RemoteTranscoder::new("127.0.0.1:1", Duration::from_millis(200));
        assert!(filter.alter(b"bytes").is_none());
    }
}
