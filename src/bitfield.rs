//! Packed piece bitfield.
//!
//! Wire layout per BEP-3: bit 7 of byte 0 is piece 0, so bit `i` lives at
//! `byte[i / 8] & (1 << (7 - i % 8))`. Spare bits in the trailing byte are
//! always zero.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitfield {
    bytes: Vec<u8>,
    len: usize,
}

impl Bitfield {
    /// An all-zero bitfield for `len` pieces.
    pub fn new(len: usize) -> Self {
        Bitfield {
            bytes: vec![0; len.div_ceil(8)],
            len,
        }
    }

    /// Builds a bitfield from wire bytes. Spare bits past `len` are
    /// dropped so later equality and `all()` checks stay honest.
    pub fn from_bytes(bytes: &[u8], len: usize) -> Self {
        let mut bf = Bitfield {
            bytes: bytes.to_vec(),
            len,
        };
        bf.bytes.resize(len.div_ceil(8), 0);
        if len % 8 != 0 {
            if let Some(last) = bf.bytes.last_mut() {
                *last &= !(0xffu8 >> (len % 8));
            }
        }
        bf
    }

    /// Number of pieces tracked, not the byte length.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Wire length in bytes.
    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    pub fn has(&self, index: usize) -> bool {
        index < self.len && self.bytes[index / 8] & (1 << (7 - index % 8)) != 0
    }

    pub fn set(&mut self, index: usize) {
        if index < self.len {
            self.bytes[index / 8] |= 1 << (7 - index % 8);
        }
    }

    pub fn count(&self) -> usize {
        self.bytes.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn all(&self) -> bool {
        self.count() == self.len
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(move |i| self.has(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_bit_order() {
        let mut bf = Bitfield::new(16);
        bf.set(0);
        bf.set(9);
        bf.set(15);
        assert_eq!(bf.as_bytes(), &[0b1000_0000, 0b0100_0001]);
        for i in 0..16 {
            assert_eq!(bf.has(i), matches!(i, 0 | 9 | 15), "bit {i}");
        }
    }

    #[test]
    fn rounds_byte_length_up() {
        assert_eq!(Bitfield::new(1).byte_len(), 1);
        assert_eq!(Bitfield::new(8).byte_len(), 1);
        assert_eq!(Bitfield::new(9).byte_len(), 2);
    }

    #[test]
    fn masks_spare_bits_from_wire() {
        // 10 pieces, remote set all 16 bits including the 6 spare ones.
        let bf = Bitfield::from_bytes(&[0xff, 0xff], 10);
        assert_eq!(bf.count(), 10);
        assert!(bf.all());
        assert!(!bf.has(10));
        assert!(!bf.has(100));
    }

    #[test]
    fn out_of_range_set_is_ignored() {
        let mut bf = Bitfield::new(10);
        bf.set(10);
        bf.set(999);
        assert_eq!(bf.count(), 0);
    }

    #[test]
    fn counts_and_all() {
        let mut bf = Bitfield::new(3);
        assert!(!bf.all());
        bf.set(0);
        bf.set(1);
        assert_eq!(bf.count(), 2);
        bf.set(2);
        assert!(bf.all());
    }
}
