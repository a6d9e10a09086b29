use crate::coords::BlockIndex;

/// Half-byte values packed two per byte, the even index in the low nibble.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct NibbleArray(Vec<u8>);

impl NibbleArray {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub(crate) fn get(&self, index: BlockIndex) -> u8 {
        let byte = self.0.get(index.get() / 2).copied().unwrap_or(0);
        if index.get() % 2 == 0 {
            byte & 0x0f
        } else {
            byte >> 4
        }
    }

    pub(crate) fn set(&mut self, index: BlockIndex, value: u8) {
        let Some(byte) = self.0.get_mut(index.get() / 2) else {
            return;
        };
        let value = value & 0x0f;
        *byte = if index.get() % 2 == 0 {
            (*byte & 0xf0) | value
        } else {
            (*byte & 0x0f) | (value << 4)
        };
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}
