// Evhub Bounded Bit Array
// Fixed-capacity bitset loaded from raw kernel bitmask buffers

use std::fmt;

/// Element type of the backing store. Kernel bitmask ioctls fill arrays of
/// this width on every supported target.
pub type Word = u32;

/// Number of bits held by one [`Word`].
pub const WORD_BITS: usize = Word::BITS as usize;

/// Number of words needed to hold `bits` bits.
pub const fn words_for(bits: usize) -> usize {
    (bits + WORD_BITS - 1) / WORD_BITS
}

/// Fixed-size bit vector over `BITS` bits backed by `WORDS` words.
///
/// `WORDS` must equal [`words_for`]`(BITS)`; this is checked when the array
/// is constructed. Use the aliases in [`crate::codes`] (`KeyBits`,
/// `AbsBits`, ...) rather than spelling out both parameters.
///
/// Single-bit tests are O(1) and range tests are O(words in range); nothing
/// here allocates, so it is safe to use on the per-event path.
#[derive(Clone, PartialEq, Eq)]
pub struct BitArray<const BITS: usize, const WORDS: usize> {
    data: [Word; WORDS],
}

impl<const BITS: usize, const WORDS: usize> BitArray<BITS, WORDS> {
    const LAYOUT_OK: () = assert!(
        WORDS == words_for(BITS),
        "BitArray word count does not match its bit count"
    );

    /// Create an array with every bit cleared.
    pub fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::LAYOUT_OK;
        Self { data: [0; WORDS] }
    }

    /// Number of addressable bits.
    pub const fn bits(&self) -> usize {
        BITS
    }

    /// Number of bytes a kernel bitmask of this size occupies.
    pub const fn bytes(&self) -> usize {
        (BITS + 7) / 8
    }

    /// Test a single bit. Any index at or beyond `BITS` reads as clear.
    #[inline]
    pub fn test(&self, bit: usize) -> bool {
        if bit >= BITS {
            return false;
        }
        self.data[bit / WORD_BITS] & (1 << (bit % WORD_BITS)) != 0
    }

    /// Set a bit. Out-of-range indices are ignored.
    #[inline]
    pub fn set(&mut self, bit: usize) {
        if bit < BITS {
            self.data[bit / WORD_BITS] |= 1 << (bit % WORD_BITS);
        }
    }

    /// Clear a bit. Out-of-range indices are ignored.
    #[inline]
    pub fn clear(&mut self, bit: usize) {
        if bit < BITS {
            self.data[bit / WORD_BITS] &= !(1 << (bit % WORD_BITS));
        }
    }

    /// Set or clear a bit depending on `on`.
    #[inline]
    pub fn assign(&mut self, bit: usize, on: bool) {
        if on {
            self.set(bit);
        } else {
            self.clear(bit);
        }
    }

    /// Clear every bit.
    pub fn reset(&mut self) {
        self.data = [0; WORDS];
    }

    /// Returns true if any bit in `[start_index, end_index)` is set.
    ///
    /// Ranges that do not line up with word boundaries are handled by masking
    /// the first and last partial words and scanning the whole words in
    /// between. An invalid range (`start >= end`, `start > BITS` or
    /// `end > BITS + 1`) is logged and reports false.
    pub fn any(&self, start_index: usize, end_index: usize) -> bool {
        if start_index >= end_index || start_index > BITS || end_index > BITS + 1 {
            log::error!(
                "Invalid start/end index. start = {}, end = {}, total bits = {}",
                start_index,
                end_index,
                BITS
            );
            return false;
        }

        let mut se = start_index / WORD_BITS;
        let ee = end_index / WORD_BITS;
        let si = start_index % WORD_BITS;
        let ei = end_index % WORD_BITS;

        // Leading partial word
        if si > 0 {
            let n_bits = if se == ee { ei - si } else { WORD_BITS - si };
            let mask = (((1u64 << n_bits) - 1) << si) as Word;
            if self.word(se) & mask != 0 {
                return true;
            }
            se += 1;
        }

        while se < ee {
            if self.word(se) != 0 {
                return true;
            }
            se += 1;
        }

        // Trailing partial word
        if ei > 0 && se <= ee {
            let mask = ((1u64 << ei) - 1) as Word;
            if self.word(se) & mask != 0 {
                return true;
            }
        }

        false
    }

    /// Replace every bit from a raw word buffer, the shape returned by the
    /// kernel's "get bitmask" ioctls. This is a destructive load, not a merge.
    /// Bits at or beyond `BITS` in the last word are dropped.
    pub fn load_from_buffer(&mut self, buffer: &[Word; WORDS]) {
        self.data = *buffer;
        let tail = BITS % WORD_BITS;
        if tail != 0 {
            if let Some(last) = self.data.last_mut() {
                *last &= ((1u64 << tail) - 1) as Word;
            }
        }
    }

    /// Copy of the backing words.
    pub fn to_buffer(&self) -> [Word; WORDS] {
        self.data
    }

    /// Iterate over the indices of all set bits in ascending order.
    pub fn iter_set(&self) -> impl Iterator<Item = usize> + '_ {
        (0..BITS).filter(move |&bit| self.test(bit))
    }

    /// Number of set bits.
    pub fn count(&self) -> usize {
        self.data.iter().map(|w| w.count_ones() as usize).sum()
    }

    // The range check admits `end == BITS + 1`, which can land one word past
    // the store when BITS is a multiple of the word width.
    #[inline]
    fn word(&self, index: usize) -> Word {
        self.data.get(index).copied().unwrap_or(0)
    }
}

impl<const BITS: usize, const WORDS: usize> Default for BitArray<BITS, WORDS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const BITS: usize, const WORDS: usize> fmt::Debug for BitArray<BITS, WORDS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter_set()).finish()
    }
}
