//! Chunked append-only byte buffer.
//!
//! Both sides of the binary-XML codec and the WAV assembler accumulate
//! output into this container. Storage is a list of fixed 1 MiB chunks so
//! that multi-megabyte documents never require a single contiguous
//! reallocation while being built.

/// Size of a single storage chunk. This is a constant of the container,
/// not a tuning knob: offset arithmetic throughout assumes it.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// A scalar that can be appended to or read from a [`ChunkedBuffer`] in
/// little-endian byte order.
pub trait Scalar: Copy {
    /// Encoded width in bytes.
    const SIZE: usize;

    /// Write the little-endian encoding into `out[..Self::SIZE]`.
    fn write_le(self, out: &mut [u8]);

    /// Decode from `bytes[..Self::SIZE]`.
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_scalar {
    ($($ty:ty),+) => {
        $(impl Scalar for $ty {
            const SIZE: usize = std::mem::size_of::<$ty>();

            #[inline]
            fn write_le(self, out: &mut [u8]) {
                out[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
            }

            #[inline]
            fn read_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; Self::SIZE];
                raw.copy_from_slice(&bytes[..Self::SIZE]);
                <$ty>::from_le_bytes(raw)
            }
        })+
    };
}

impl_scalar!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

/// Append-only byte sequence stored as fixed-size chunks.
///
/// The logical length is `(chunks - 1) * CHUNK_SIZE + last_chunk_used`
/// with `last_chunk_used == 0` only when the buffer is empty. The buffer
/// grows only through appends and is never shared for mutation.
#[derive(Default)]
pub struct ChunkedBuffer {
    chunks: Vec<Vec<u8>>,
    last_chunk_used: usize,
}

impl ChunkedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a buffer holding a copy of `data`.
    pub fn from_slice(data: &[u8]) -> Self {
        let mut buffer = Self::new();
        buffer.append(data);
        buffer
    }

    /// Logical length in bytes.
    pub fn len(&self) -> usize {
        if self.chunks.is_empty() {
            0
        } else {
            (self.chunks.len() - 1) * CHUNK_SIZE + self.last_chunk_used
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Drop all chunks, returning the buffer to its freshly created state.
    pub fn reset(&mut self) {
        self.chunks.clear();
        self.last_chunk_used = 0;
    }

    /// Append raw bytes, splitting the write across chunk boundaries.
    /// A new chunk is allocated only once the current one is full.
    pub fn append(&mut self, data: &[u8]) {
        let mut data = data;

        while !data.is_empty() {
            if self.chunks.is_empty() || self.last_chunk_used == CHUNK_SIZE {
                self.chunks.push(vec![0u8; CHUNK_SIZE]);
                self.last_chunk_used = 0;
            }

            let room = CHUNK_SIZE - self.last_chunk_used;
            let take = room.min(data.len());

            let last = self.chunks.len() - 1;
            self.chunks[last][self.last_chunk_used..self.last_chunk_used + take]
                .copy_from_slice(&data[..take]);

            self.last_chunk_used += take;
            data = &data[take..];
        }
    }

    /// Append a scalar in little-endian byte order.
    pub fn append_scalar<T: Scalar>(&mut self, value: T) {
        let mut raw = [0u8; 8];
        value.write_le(&mut raw);
        self.append(&raw[..T::SIZE]);
    }

    /// Copy bytes starting at `offset` into `out`.
    ///
    /// Returns the number of bytes copied: zero when `offset` is at or
    /// past the end, and a truncated count when the request runs past the
    /// end of the buffer.
    pub fn read(&self, offset: usize, out: &mut [u8]) -> usize {
        let total = self.len();

        if offset >= total || out.is_empty() {
            return 0;
        }

        let count = out.len().min(total - offset);

        let mut chunk_index = offset / CHUNK_SIZE;
        let mut chunk_offset = offset % CHUNK_SIZE;
        let mut copied = 0;

        while copied < count {
            let take = (CHUNK_SIZE - chunk_offset).min(count - copied);
            out[copied..copied + take]
                .copy_from_slice(&self.chunks[chunk_index][chunk_offset..chunk_offset + take]);

            copied += take;
            chunk_index += 1;
            chunk_offset = 0;
        }

        count
    }

    /// Read a little-endian scalar at `offset`, or `None` if the scalar
    /// does not fit inside the buffer.
    pub fn read_scalar<T: Scalar>(&self, offset: usize) -> Option<T> {
        if offset + T::SIZE > self.len() {
            return None;
        }

        let mut raw = [0u8; 8];
        self.read(offset, &mut raw[..T::SIZE]);
        Some(T::read_le(&raw))
    }

    /// Materialize the whole buffer as one contiguous byte vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut left = self.len();
        let mut result = Vec::with_capacity(left);

        for chunk in &self.chunks {
            let take = CHUNK_SIZE.min(left);
            result.extend_from_slice(&chunk[..take]);
            left -= take;
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_buffer() {
        let buffer = ChunkedBuffer::new();
        assert_eq!(buffer.len(), 0);
        assert!(buffer.is_empty());
        assert!(buffer.to_vec().is_empty());

        let mut out = [0u8; 4];
        assert_eq!(buffer.read(0, &mut out), 0);
    }

    #[test]
    fn append_and_read_across_chunks() {
        let mut buffer = ChunkedBuffer::new();
        let data: Vec<u8> = (0..(CHUNK_SIZE + 4096)).map(|i| (i % 251) as u8).collect();
        buffer.append(&data);

        assert_eq!(buffer.len(), data.len());
        assert_eq!(buffer.to_vec(), data);

        // A read spanning the chunk boundary.
        let mut out = vec![0u8; 8192];
        let copied = buffer.read(CHUNK_SIZE - 4096, &mut out);
        assert_eq!(copied, 8192);
        assert_eq!(out, data[CHUNK_SIZE - 4096..CHUNK_SIZE + 4096]);
    }

    #[test]
    fn read_truncates_at_end() {
        let mut buffer = ChunkedBuffer::new();
        buffer.append(b"abcdef");

        let mut out = [0u8; 16];
        assert_eq!(buffer.read(4, &mut out), 2);
        assert_eq!(&out[..2], b"ef");

        // Offset exactly at the end reads nothing and leaves `out` alone.
        let mut out = [0xAAu8; 4];
        assert_eq!(buffer.read(6, &mut out), 0);
        assert_eq!(out, [0xAAu8; 4]);
    }

    #[test]
    fn scalar_roundtrip() {
        let mut buffer = ChunkedBuffer::new();
        buffer.append_scalar(0x1234u16);
        buffer.append_scalar(-7i32);
        buffer.append_scalar(1.5f64);

        assert_eq!(buffer.read_scalar::<u16>(0), Some(0x1234));
        assert_eq!(buffer.read_scalar::<i32>(2), Some(-7));
        assert_eq!(buffer.read_scalar::<f64>(6), Some(1.5));
        assert_eq!(buffer.read_scalar::<u32>(11), None);
    }

    #[test]
    fn scalar_across_chunk_boundary() {
        let mut buffer = ChunkedBuffer::new();
        buffer.append(&vec![0u8; CHUNK_SIZE - 2]);
        buffer.append_scalar(0xDEAD_BEEFu32);

        assert_eq!(buffer.read_scalar::<u32>(CHUNK_SIZE - 2), Some(0xDEAD_BEEF));
    }

    #[test]
    fn slicing_matches_linearization() {
        let mut buffer = ChunkedBuffer::new();
        let data: Vec<u8> = (0..10_000).map(|i| (i % 17) as u8).collect();
        buffer.append(&data);

        let linear = buffer.to_vec();
        for &(offset, len) in &[(0usize, 100usize), (9_990, 100), (5_000, 0), (10_000, 8)] {
            let mut out = vec![0u8; len];
            let copied = buffer.read(offset, &mut out);
            let expected = &linear[offset.min(linear.len())..(offset + len).min(linear.len())];
            assert_eq!(&out[..copied], expected);
        }
    }

    #[test]
    fn reset_drops_contents() {
        let mut buffer = ChunkedBuffer::from_slice(b"payload");
        buffer.reset();
        assert!(buffer.is_empty());
        buffer.append(b"xy");
        assert_eq!(buffer.to_vec(), b"xy");
    }
}
