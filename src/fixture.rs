//! Little-endian byte buffer builder for constructing test files by hand.

use crate::nitro::NITRO_NAME_LENGTH;

#[derive(Debug, Default)]
pub struct Buf(Vec<u8>);

impl Buf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn bytes(&mut self, bytes: &[u8]) {
        self.0.extend_from_slice(bytes);
    }

    pub fn u8(&mut self, v: u8) {
        self.0.push(v);
    }

    pub fn u16(&mut self, v: u16) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }

    pub fn u32(&mut self, v: u32) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }

    pub fn i16(&mut self, v: i16) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }

    pub fn i32(&mut self, v: i32) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }

    /// Zero-pads up to `len`. Panics when the buffer is already past it.
    pub fn pad_to(&mut self, len: usize) {
        assert!(len >= self.0.len(), "buffer already at {}", self.0.len());
        self.0.resize(len, 0);
    }

    /// Overwrites a previously written word, for back-patched offsets.
    pub fn set_u32(&mut self, at: usize, v: u32) {
        self.0[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }

    pub fn set_u16(&mut self, at: usize, v: u16) {
        self.0[at..at + 2].copy_from_slice(&v.to_le_bytes());
    }

    /// Fixed-width name entry, zero padded.
    pub fn name(&mut self, name: &str) {
        assert!(name.len() <= NITRO_NAME_LENGTH);
        let start = self.0.len();
        self.0.extend_from_slice(name.as_bytes());
        self.pad_to(start + NITRO_NAME_LENGTH);
    }

    /// The list header that precedes every record table: a dummy byte, the
    /// entry count, section sizes and the per-entry unknown block.
    pub fn info3d_prelude(&mut self, num: u8) {
        self.u8(0); // dummy
        self.u8(num);
        self.u16(0); // section size
        self.u16(8); // unknown block header size
        self.u16(8 + 4 * u16::from(num)); // unknown block section size
        self.u32(0x0170_0000); // constant
        for _ in 0..num {
            self.u32(0);
        }
        self.u16(4); // info block header size
        self.u16(0); // info block section size
    }
}
