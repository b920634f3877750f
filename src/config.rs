use std::fmt;

/// Size in bytes of the pad's configuration block.
pub const CONFIG_SIZE: usize = 250;

// The wire format carries the length in a single byte.
const _: () = assert!(CONFIG_SIZE <= u8::MAX as usize);

/// The pad's persistent settings, stored and owned by the pad firmware.
///
/// This layer never interprets the contents. It is read with `g`, written
/// with `w`, and handed to callers as raw bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PadConfig([u8; CONFIG_SIZE]);

impl PadConfig {
    pub const fn from_bytes(bytes: [u8; CONFIG_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; CONFIG_SIZE] {
        &self.0
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8; CONFIG_SIZE] {
        &mut self.0
    }

    /// Overwrite the leading bytes of the block with `data`.
    ///
    /// A readback shorter than the block only replaces its prefix; anything
    /// past `CONFIG_SIZE` is ignored. Returns the number of bytes copied.
    pub fn copy_from_prefix(&mut self, data: &[u8]) -> usize {
        let len = data.len().min(CONFIG_SIZE);
        self.0[..len].copy_from_slice(&data[..len]);
        len
    }
}

impl Default for PadConfig {
    fn default() -> Self {
        Self([0; CONFIG_SIZE])
    }
}

impl From<[u8; CONFIG_SIZE]> for PadConfig {
    fn from(bytes: [u8; CONFIG_SIZE]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for PadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PadConfig").field(&hex::encode(self.0)).finish()
    }
}
