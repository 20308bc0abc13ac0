/// Request or response payload: optional metadata plus optional data.
///
/// Both blocks are opaque bytes; interpretation is up to the encodings
/// negotiated at setup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    pub metadata: Option<Vec<u8>>,
    pub data: Option<Vec<u8>>,
}

impl Payload {
    pub fn new(metadata: Option<Vec<u8>>, data: Option<Vec<u8>>) -> Self {
        Self { metadata, data }
    }

    pub fn from_data(data: impl Into<Vec<u8>>) -> Self {
        Self { metadata: None, data: Some(data.into()) }
    }

    pub fn with_metadata(mut self, metadata: impl Into<Vec<u8>>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.metadata.is_none() && self.data.is_none()
    }

    pub fn data_utf8(&self) -> Option<&str> {
        self.data.as_deref().and_then(|d| std::str::from_utf8(d).ok())
    }

    /// Append another fragment, concatenating both blocks.
    pub(crate) fn extend(&mut self, fragment: Payload) {
        match (&mut self.metadata, fragment.metadata) {
            (Some(acc), Some(more)) => acc.extend_from_slice(&more),
            (slot @ None, Some(more)) => *slot = Some(more),
            _ => {}
        }
        match (&mut self.data, fragment.data) {
            (Some(acc), Some(more)) => acc.extend_from_slice(&more),
            (slot @ None, Some(more)) => *slot = Some(more),
            _ => {}
        }
    }
}

impl From<&str> for Payload {
    fn from(data: &str) -> Self {
        Self::from_data(data.as_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragments_concatenate() {
        let mut p = Payload::from_data(b"he".to_vec()).with_metadata(b"a".to_vec());
        p.extend(Payload::from_data(b"llo".to_vec()).with_metadata(b"b".to_vec()));
        assert_eq!(p.data.as_deref(), Some(b"hello".as_slice()));
        assert_eq!(p.metadata.as_deref(), Some(b"ab".as_slice()));
    }

    #[test]
    fn extend_fills_missing_blocks() {
        let mut p = Payload::default();
        p.extend(Payload::from_data(b"x".to_vec()));
        assert_eq!(p.data_utf8(), Some("x"));
        assert!(p.metadata.is_none());
    }
}
