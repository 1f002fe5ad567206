#![forbid(unsafe_code)]
//! Little-endian field helpers shared by the fixed-size record codecs.

pub mod le {
    //! Fixed-width little-endian accessors.
    //!
    //! Callers size their buffers from the record layout constants, so an
    //! out-of-bounds offset is a programming error and panics.

    fn array<const N: usize>(src: &[u8], off: usize) -> [u8; N] {
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(&src[off..off + N]);
        bytes
    }

    /// Writes `v` at `dst[off..off + 4]`.
    pub fn put_u32(dst: &mut [u8], off: usize, v: u32) {
        dst[off..off + 4].copy_from_slice(&v.to_le_bytes());
    }

    /// Reads the `u32` at `src[off..off + 4]`.
    pub fn get_u32(src: &[u8], off: usize) -> u32 {
        u32::from_le_bytes(array(src, off))
    }

    /// Writes `v` at `dst[off..off + 8]`.
    pub fn put_u64(dst: &mut [u8], off: usize, v: u64) {
        dst[off..off + 8].copy_from_slice(&v.to_le_bytes());
    }

    /// Reads the `u64` at `src[off..off + 8]`.
    pub fn get_u64(src: &[u8], off: usize) -> u64 {
        u64::from_le_bytes(array(src, off))
    }

    /// Writes `v` at `dst[off..off + 8]`.
    pub fn put_i64(dst: &mut [u8], off: usize, v: i64) {
        dst[off..off + 8].copy_from_slice(&v.to_le_bytes());
    }

    /// Reads the `i64` at `src[off..off + 8]`.
    pub fn get_i64(src: &[u8], off: usize) -> i64 {
        i64::from_le_bytes(array(src, off))
    }
}
