//! Wire frames.
//!
//! A [`Frame`] is one complete binary transport message, exactly as it
//! travels: opaque to everything except the [`SessionCodec`](super::SessionCodec).
//! Frame buffers are zeroized on drop so decrypted remnants do not linger.

use zeroize::Zeroizing;

/// One complete binary unit exchanged over the transport
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Zeroizing<Vec<u8>>,
}

impl Frame {
    /// Wrap bytes as a frame
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Zeroizing::new(bytes),
        }
    }

    /// Frame contents
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Frame length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the frame is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Copy the contents out, e.g. to hand them to a transport sink
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }
}

impl From<Vec<u8>> for Frame {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Frame({} bytes)", self.bytes.len())
    }
}
