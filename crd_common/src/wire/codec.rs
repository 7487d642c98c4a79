//! Little-endian field codec.
//!
//! `WireWriter` appends into a fixed-capacity `heapless::Vec`, so encoding
//! never allocates and overflowing a frame payload is an explicit error.

use heapless::Vec;

use super::WireError;

/// Append-only little-endian writer with a compile-time capacity.
#[derive(Debug, Clone, Default)]
pub struct WireWriter<const N: usize> {
    buf: Vec<u8, N>,
}

impl<const N: usize> WireWriter<N> {
    pub const fn new() -> Self {
        Self { buf: Vec::new() }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes still available before the writer overflows.
    #[inline]
    pub fn remaining(&self) -> usize {
        N - self.buf.len()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8, N> {
        self.buf
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        self.buf
            .extend_from_slice(bytes)
            .map_err(|_| WireError::Overflow { capacity: N })
    }

    pub fn put_u8(&mut self, v: u8) -> Result<(), WireError> {
        self.put_bytes(&[v])
    }

    pub fn put_u16(&mut self, v: u16) -> Result<(), WireError> {
        self.put_bytes(&v.to_le_bytes())
    }

    pub fn put_i16(&mut self, v: i16) -> Result<(), WireError> {
        self.put_bytes(&v.to_le_bytes())
    }

    pub fn put_u32(&mut self, v: u32) -> Result<(), WireError> {
        self.put_bytes(&v.to_le_bytes())
    }

    pub fn put_i32(&mut self, v: i32) -> Result<(), WireError> {
        self.put_bytes(&v.to_le_bytes())
    }

    pub fn put_f32(&mut self, v: f32) -> Result<(), WireError> {
        self.put_bytes(&v.to_le_bytes())
    }

    pub fn put_f64(&mut self, v: f64) -> Result<(), WireError> {
        self.put_bytes(&v.to_le_bytes())
    }
}

/// Cursor over a received byte slice.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::Truncated {
                needed: n,
                available: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn array<const K: usize>(&mut self) -> Result<[u8; K], WireError> {
        let mut out = [0u8; K];
        out.copy_from_slice(self.take(K)?);
        Ok(out)
    }

    pub fn get_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.array::<1>()?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16, WireError> {
        self.array().map(u16::from_le_bytes)
    }

    pub fn get_i16(&mut self) -> Result<i16, WireError> {
        self.array().map(i16::from_le_bytes)
    }

    pub fn get_u32(&mut self) -> Result<u32, WireError> {
        self.array().map(u32::from_le_bytes)
    }

    pub fn get_i32(&mut self) -> Result<i32, WireError> {
        self.array().map(i32::from_le_bytes)
    }

    pub fn get_f32(&mut self) -> Result<f32, WireError> {
        self.array().map(f32::from_le_bytes)
    }

    pub fn get_f64(&mut self) -> Result<f64, WireError> {
        self.array().map(f64::from_le_bytes)
    }
}
