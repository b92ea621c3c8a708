/// Size of the sliding window, in bytes. Must stay a power of two so the
/// write cursor can wrap with a mask.
pub const WINDOW_SIZE: usize = 64;

/// Added to every byte before it enters the sums, so an all-zero input does
/// not produce an all-zero digest.
const CHAR_OFFSET: u32 = 31;

/// Default number of trailing bits tested for a split, giving an average
/// chunk size of about 8 KiB.
pub const DEFAULT_TARGET_BITS: u32 = 13;

/// Rolling checksum over the trailing `WINDOW_SIZE` bytes of a stream,
/// updatable in O(1) per byte.
///
/// The sums start out as though `WINDOW_SIZE` zero bytes had already been
/// rolled in, so inputs shorter than the window need no special handling:
/// the evicted byte is simply one of the pre-filled zeros.
#[derive(Debug, Clone)]
pub struct RollSum {
    s1: u32,
    s2: u32,
    window: [u8; WINDOW_SIZE],
    wofs: usize,
}

impl Default for RollSum {
    fn default() -> Self {
        Self::new()
    }
}

impl RollSum {
    pub fn new() -> Self {
        let w = WINDOW_SIZE as u32;
        RollSum {
            s1: w * CHAR_OFFSET,
            s2: w * (w - 1) * CHAR_OFFSET,
            window: [0; WINDOW_SIZE],
            wofs: 0,
        }
    }

    /// Roll the next input byte into the window, evicting the oldest one.
    #[inline]
    pub fn roll(&mut self, byte: u8) {
        let add = byte as u32;
        let drop = self.window[self.wofs] as u32;

        self.s1 = self.s1.wrapping_add(add).wrapping_sub(drop);
        self.s2 = self
            .s2
            .wrapping_add(self.s1)
            .wrapping_sub((WINDOW_SIZE as u32).wrapping_mul(drop + CHAR_OFFSET));

        self.window[self.wofs] = byte;
        self.wofs = (self.wofs + 1) & (WINDOW_SIZE - 1);
    }

    /// Current checksum value: high 16 bits of s1, low 16 bits of s2.
    #[inline]
    pub fn digest(&self) -> u32 {
        (self.s1 << 16) | (self.s2 & 0xffff)
    }

    /// True when the low `n_bits` bits of s2 are all ones, which happens on
    /// average once every `2^n_bits` bytes of random input.
    #[inline]
    pub fn on_split(&self, n_bits: u32) -> bool {
        let mask = (1u32 << n_bits) - 1;
        self.s2 & mask == mask
    }

    /// Number of matching trailing bits in the digest beyond the default
    /// split threshold. Useful for reporting how "strong" a boundary is.
    pub fn bits(&self) -> u32 {
        let mut bits = DEFAULT_TARGET_BITS;
        let mut rsum = self.digest() >> DEFAULT_TARGET_BITS;
        while (rsum >> 1) & 1 != 0 {
            rsum >>= 1;
            bits += 1;
        }
        bits
    }
}
