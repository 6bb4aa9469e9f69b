//! Delimiter-based frame codec for the device wire protocol.
//!
//! Frames are arbitrary-length byte runs terminated by a literal `<END>`
//! token. Payloads embed base64 images and can run to megabytes, so the
//! decoder keeps a scan cursor instead of re-searching the whole buffer
//! every time another chunk arrives.

use bytes::{Buf, Bytes, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// In-band token terminating every frame
pub const FRAME_DELIMITER: &[u8] = b"<END>";

/// Framing codec: splits the inbound byte stream on [`FRAME_DELIMITER`]
/// and appends it to every outbound frame. Frame bodies are opaque bytes
/// here; JSON decoding is the caller's concern.
#[derive(Debug, Default)]
pub struct DelimitedCodec {
    /// Offset up to which the buffer has already been scanned without
    /// finding a delimiter.
    scanned: usize,
}

impl DelimitedCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for DelimitedCodec {
    type Item = Bytes;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, Self::Error> {
        loop {
            // Resume just before the scanned edge so a delimiter split
            // across chunk boundaries is still found.
            let resume = self.scanned.saturating_sub(FRAME_DELIMITER.len() - 1);
            let found = src[resume..]
                .windows(FRAME_DELIMITER.len())
                .position(|window| window == FRAME_DELIMITER)
                .map(|pos| resume + pos);

            match found {
                Some(pos) => {
                    let frame = src.split_to(pos).freeze();
                    src.advance(FRAME_DELIMITER.len());
                    self.scanned = 0;
                    if frame.is_empty() {
                        // Empty frames are dropped silently
                        continue;
                    }
                    return Ok(Some(frame));
                }
                None => {
                    self.scanned = src.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                // A trailing run without a delimiter is an incomplete
                // frame from a dying connection; discard it.
                src.clear();
                self.scanned = 0;
                Ok(None)
            }
        }
    }
}

impl Encoder<String> for DelimitedCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len() + FRAME_DELIMITER.len());
        dst.put(item.as_bytes());
        dst.put(FRAME_DELIMITER);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feed `data` to a fresh decoder in chunks of `chunk_size` bytes and
    /// collect every decoded frame.
    fn decode_chunked(data: &[u8], chunk_size: usize) -> Vec<Bytes> {
        let mut codec = DelimitedCodec::new();
        let mut buf = BytesMut::new();
        let mut frames = Vec::new();

        for chunk in data.chunks(chunk_size) {
            buf.extend_from_slice(chunk);
            while let Some(frame) = codec.decode(&mut buf).expect("decode") {
                frames.push(frame);
            }
        }
        while let Some(frame) = codec.decode_eof(&mut buf).expect("decode_eof") {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_single_frame() {
        let frames = decode_chunked(b"{\"a\":1}<END>", 1024);
        assert_eq!(frames, vec![Bytes::from_static(b"{\"a\":1}")]);
    }

    #[test]
    fn test_chunking_invariance() {
        let data = b"first<END>second frame<END>{\"third\":true}<END>";
        let whole = decode_chunked(data, data.len());

        for chunk_size in 1..=data.len() {
            let chunked = decode_chunked(data, chunk_size);
            assert_eq!(chunked, whole, "chunk_size {chunk_size} diverged");
        }
    }

    #[test]
    fn test_delimiter_split_across_chunks() {
        // "<EN" arrives in one chunk, "D>" in the next
        let frames = decode_chunked(b"payload<END>", 10);
        assert_eq!(frames, vec![Bytes::from_static(b"payload")]);
    }

    #[test]
    fn test_empty_frames_dropped() {
        let frames = decode_chunked(b"<END><END>data<END><END>", 4);
        assert_eq!(frames, vec![Bytes::from_static(b"data")]);
    }

    #[test]
    fn test_partial_frame_retained_until_delimiter() {
        let mut codec = DelimitedCodec::new();
        let mut buf = BytesMut::from(&b"incomplete"[..]);

        assert!(codec.decode(&mut buf).expect("decode").is_none());

        buf.extend_from_slice(b" now complete<END>");
        let frame = codec.decode(&mut buf).expect("decode").expect("frame");
        assert_eq!(frame, Bytes::from_static(b"incomplete now complete"));
    }

    #[test]
    fn test_trailing_partial_discarded_at_eof() {
        let frames = decode_chunked(b"whole<END>cut off mid", 1024);
        assert_eq!(frames, vec![Bytes::from_static(b"whole")]);
    }

    #[test]
    fn test_large_payload() {
        let body = "x".repeat(2 * 1024 * 1024);
        let data = format!("{body}<END>");
        let frames = decode_chunked(data.as_bytes(), 64 * 1024);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), body.len());
    }

    #[test]
    fn test_encoder_appends_delimiter() {
        let mut codec = DelimitedCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode("{\"messageType\":\"command\"}".to_string(), &mut buf)
            .expect("encode");
        assert_eq!(&buf[..], b"{\"messageType\":\"command\"}<END>");
    }

    #[test]
    fn test_encode_decode_roundtrip_interleaved() {
        let mut codec = DelimitedCodec::new();
        let mut buf = BytesMut::new();
        codec.encode("one".to_string(), &mut buf).expect("encode");
        codec.encode("two".to_string(), &mut buf).expect("encode");

        assert_eq!(
            codec.decode(&mut buf).expect("decode"),
            Some(Bytes::from_static(b"one"))
        );
        assert_eq!(
            codec.decode(&mut buf).expect("decode"),
            Some(Bytes::from_static(b"two"))
        );
        assert_eq!(codec.decode(&mut buf).expect("decode"), None);
    }
}
