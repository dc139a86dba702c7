//! Fixed-length bitfield indexed by piece number.
//!
//! Wire order follows the BitTorrent convention: the high bit of the first
//! byte is piece 0, and spare bits in the final byte are zero.

use bitvec::prelude::*;

/// A bitfield of `len` bits, one per piece.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitfield {
    bits: BitVec<u8, Msb0>,
}

impl Bitfield {
    /// All-zero bitfield of the given length.
    pub fn new(len: usize) -> Self {
        Self {
            bits: bitvec![u8, Msb0; 0; len],
        }
    }

    /// Rebuild from wire bytes. Bits beyond `len` are ignored; missing bytes
    /// read as zero.
    pub fn from_bytes(bytes: &[u8], len: usize) -> Self {
        let mut out = Self::new(len);
        for i in 0..len {
            let mask = 0x80 >> (i % 8);
            if bytes.get(i / 8).is_some_and(|b| b & mask != 0) {
                out.set(i);
            }
        }
        out
    }

    /// Number of bits.
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Bit at `index`; out-of-range reads as unset.
    pub fn get(&self, index: usize) -> bool {
        self.bits.get(index).map(|b| *b).unwrap_or(false)
    }

    /// Set the bit at `index`. Out-of-range indices are ignored.
    pub fn set(&mut self, index: usize) {
        if index < self.bits.len() {
            self.bits.set(index, true);
        }
    }

    /// Clear the bit at `index`. Out-of-range indices are ignored.
    pub fn clear(&mut self, index: usize) {
        if index < self.bits.len() {
            self.bits.set(index, false);
        }
    }

    /// Number of set bits.
    pub fn count(&self) -> usize {
        self.bits.count_ones()
    }

    /// True if every bit is set.
    pub fn is_full(&self) -> bool {
        self.count() == self.bits.len() && !self.bits.is_empty()
    }

    /// True if any bit is set.
    pub fn any(&self) -> bool {
        self.bits.any()
    }

    /// Ordered list of set positions.
    pub fn set_indices(&self) -> Vec<usize> {
        self.bits.iter_ones().collect()
    }

    /// Bitwise AND; lengths must match.
    pub fn and(&self, other: &Self) -> Self {
        self.zip_with(other, |a, b| a & b)
    }

    /// Bitwise OR; lengths must match.
    pub fn or(&self, other: &Self) -> Self {
        self.zip_with(other, |a, b| a | b)
    }

    /// Bitwise XOR; lengths must match.
    pub fn xor(&self, other: &Self) -> Self {
        self.zip_with(other, |a, b| a ^ b)
    }

    /// Bits set in `self` and unset in `other`.
    pub fn difference(&self, other: &Self) -> Self {
        self.zip_with(other, |a, b| a & !b)
    }

    fn zip_with(&self, other: &Self, f: impl Fn(bool, bool) -> bool) -> Self {
        debug_assert_eq!(self.len(), other.len());
        let mut out = Self::new(self.len());
        for i in 0..self.len() {
            if f(self.get(i), other.get(i)) {
                out.set(i);
            }
        }
        out
    }

    /// Wire representation: big-endian bit order per byte, final byte
    /// zero-padded.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.bits.len().div_ceil(8)];
        for i in self.bits.iter_ones() {
            out[i / 8] |= 0x80 >> (i % 8);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_clear_count() {
        let mut bf = Bitfield::new(10);
        assert_eq!(bf.count(), 0);
        bf.set(0);
        bf.set(9);
        bf.set(9);
        assert_eq!(bf.count(), 2);
        assert!(bf.get(0) && bf.get(9));
        bf.clear(9);
        assert_eq!(bf.count(), 1);
        // out-of-range access is inert
        bf.set(10);
        assert_eq!(bf.count(), 1);
        assert!(!bf.get(100));
    }

    #[test]
    fn wire_bit_order() {
        let mut bf = Bitfield::new(12);
        bf.set(0);
        bf.set(7);
        bf.set(8);
        // piece 0 is the high bit of byte 0; trailing bits stay zero
        assert_eq!(bf.to_bytes(), vec![0b1000_0001, 0b1000_0000]);

        let back = Bitfield::from_bytes(&bf.to_bytes(), 12);
        assert_eq!(back, bf);
    }

    #[test]
    fn from_bytes_ignores_spare_bits() {
        // 10 bits from two bytes; bits 10..16 of the input must not matter
        let bf = Bitfield::from_bytes(&[0xff, 0xff], 10);
        assert_eq!(bf.len(), 10);
        assert_eq!(bf.count(), 10);
        assert_eq!(bf.to_bytes(), vec![0xff, 0b1100_0000]);
    }

    #[test]
    fn set_ops() {
        let mut a = Bitfield::new(8);
        let mut b = Bitfield::new(8);
        a.set(1);
        a.set(2);
        a.set(3);
        b.set(2);
        b.set(4);

        assert_eq!(a.and(&b).set_indices(), vec![2]);
        assert_eq!(a.or(&b).set_indices(), vec![1, 2, 3, 4]);
        assert_eq!(a.xor(&b).set_indices(), vec![1, 3, 4]);
        assert_eq!(a.difference(&b).set_indices(), vec![1, 3]);
    }

    #[test]
    fn fullness() {
        let mut bf = Bitfield::new(3);
        assert!(!bf.is_full());
        bf.set(0);
        bf.set(1);
        bf.set(2);
        assert!(bf.is_full());
        assert!(bf.any());
        assert!(!Bitfield::new(0).is_full());
    }
}
