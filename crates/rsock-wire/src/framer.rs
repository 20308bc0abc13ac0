use crate::{
    frame::{HEADER_SIZE, MAX_FRAME_LEN},
    types::FrameError,
};

const LEN_PREFIX_SIZE: usize = 4;

/// Reassembles length-prefixed frames from an arbitrary chunk stream.
///
/// A chunk may carry zero or many complete frames plus at most a leading and
/// a trailing partial. Complete frames that arrive in one chunk are emitted
/// straight from the input without copying; only partials are buffered.
/// Every emitted slice starts with the original length prefix.
#[derive(Debug, Default)]
pub struct Framer {
    /// Bytes of the frame currently being assembled, length prefix included.
    partial: Vec<u8>,
    /// Total length of the partial frame once the prefix is known, else 0.
    need: usize,
}

impl Framer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, invoking `on_frame` for every completed frame.
    pub fn push<F>(&mut self, mut chunk: &[u8], on_frame: &mut F) -> Result<(), FrameError>
    where
        F: FnMut(&[u8]),
    {
        while !chunk.is_empty() {
            if self.partial.is_empty() && chunk.len() >= LEN_PREFIX_SIZE {
                let len = declared_len(&chunk[..LEN_PREFIX_SIZE])?;
                if chunk.len() >= len {
                    on_frame(&chunk[..len]);
                    chunk = &chunk[len..];
                    continue;
                }
                self.partial.extend_from_slice(chunk);
                self.need = len;
                return Ok(());
            }

            if self.partial.len() < LEN_PREFIX_SIZE {
                let take = (LEN_PREFIX_SIZE - self.partial.len()).min(chunk.len());
                self.partial.extend_from_slice(&chunk[..take]);
                chunk = &chunk[take..];
                if self.partial.len() == LEN_PREFIX_SIZE {
                    self.need = declared_len(&self.partial)?;
                }
                continue;
            }

            let take = (self.need - self.partial.len()).min(chunk.len());
            self.partial.extend_from_slice(&chunk[..take]);
            chunk = &chunk[take..];
            if self.partial.len() == self.need {
                on_frame(&self.partial);
                self.partial.clear();
                self.need = 0;
            }
        }
        Ok(())
    }

    /// Whether a partial frame is buffered.
    #[inline]
    pub fn has_partial(&self) -> bool {
        !self.partial.is_empty()
    }
}

fn declared_len(prefix: &[u8]) -> Result<usize, FrameError> {
    let len = u32::from_be_bytes(prefix[..LEN_PREFIX_SIZE].try_into().expect("prefix is 4 bytes"));
    if (len as usize) < HEADER_SIZE {
        return Err(FrameError::LengthTooShort(len));
    }
    if len as usize > MAX_FRAME_LEN {
        return Err(FrameError::LengthTooLong(len));
    }
    Ok(len as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Body, Frame};

    fn frames(bytes: &[Vec<u8>], chunk_size: usize) -> Vec<Vec<u8>> {
        let wire: Vec<u8> = bytes.iter().flatten().copied().collect();
        let mut framer = Framer::new();
        let mut out = Vec::new();
        for chunk in wire.chunks(chunk_size.max(1)) {
            framer.push(chunk, &mut |f| out.push(f.to_vec())).unwrap();
        }
        out
    }

    fn sample_frames() -> Vec<Vec<u8>> {
        vec![
            Frame::new(2, Body::RequestResponse)
                .with_data(Some(b"hello".to_vec()))
                .encode()
                .unwrap(),
            Frame::new(0, Body::Keepalive).encode().unwrap(),
            Frame::new(2, Body::Response)
                .with_metadata(Some(b"m".to_vec()))
                .with_data(Some(b"world".to_vec()))
                .encode()
                .unwrap(),
        ]
    }

    #[test]
    fn whole_chunk_per_frame() {
        let input = sample_frames();
        let mut framer = Framer::new();
        let mut out = Vec::new();
        for f in &input {
            framer.push(f, &mut |b| out.push(b.to_vec())).unwrap();
        }
        assert_eq!(out, input);
        assert!(!framer.has_partial());
    }

    #[test]
    fn byte_at_a_time() {
        let input = sample_frames();
        assert_eq!(frames(&input, 1), input);
    }

    #[test]
    fn all_frames_in_one_chunk() {
        let input = sample_frames();
        assert_eq!(frames(&input, usize::MAX), input);
    }

    #[test]
    fn awkward_chunk_sizes() {
        let input = sample_frames();
        for size in [2, 3, 5, 7, 11, 13] {
            assert_eq!(frames(&input, size), input, "chunk size {size}");
        }
    }

    #[test]
    fn emitted_frames_decode() {
        let input = sample_frames();
        for bytes in frames(&input, 3) {
            Frame::decode(&bytes).unwrap();
        }
    }

    #[test]
    fn absurd_length_prefix_is_fatal() {
        let mut framer = Framer::new();
        let bogus = (MAX_FRAME_LEN as u32 + 1).to_be_bytes();
        let err = framer.push(&bogus, &mut |_| {}).unwrap_err();
        assert!(matches!(err, FrameError::LengthTooLong(_)));
    }

    #[test]
    fn tiny_length_prefix_is_fatal() {
        let mut framer = Framer::new();
        let err = framer.push(&3u32.to_be_bytes(), &mut |_| {}).unwrap_err();
        assert!(matches!(err, FrameError::LengthTooShort(3)));
    }
}
