#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    #[error("write of {needed} bytes exceeds buffer capacity {capacity}")]
    Overflow { needed: usize, capacity: usize },
    #[error("read of {needed} bytes past end of message ({remaining} left)")]
    Underrun { needed: usize, remaining: usize },
}

/// Cursor-based reader/writer over a fixed-capacity byte buffer. All values
/// are little-endian. Writes past capacity are refused without touching the
/// bytes already written; reads advance the cursor only on success.
#[derive(Debug, Clone)]
pub struct NetBuffer {
    data: Vec<u8>,
    capacity: usize,
    cursor: usize,
}

impl NetBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            cursor: 0,
        }
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        let capacity = data.len();
        Self {
            data,
            capacity,
            cursor: 0,
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        if self.data.len() + bytes.len() > self.capacity {
            return Err(BufferError::Overflow {
                needed: bytes.len(),
                capacity: self.capacity,
            });
        }

        self.data.extend_from_slice(bytes);
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), BufferError> {
        self.write_bytes(&[value])
    }

    pub fn write_u16(&mut self, value: u16) -> Result<(), BufferError> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<(), BufferError> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<(), BufferError> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, BufferError> {
        let remaining = self.data.len() - self.cursor;
        if len > remaining {
            return Err(BufferError::Underrun {
                needed: len,
                remaining,
            });
        }

        let bytes = self.data[self.cursor..self.cursor + len].to_vec();
        self.cursor += len;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8, BufferError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, BufferError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, BufferError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, BufferError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], BufferError> {
        let remaining = self.data.len() - self.cursor;
        if N > remaining {
            return Err(BufferError::Underrun {
                needed: N,
                remaining,
            });
        }

        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.cursor..self.cursor + N]);
        self.cursor += N;
        Ok(out)
    }

    /// True once the read cursor has consumed the whole payload. Only
    /// meaningful when parsing; composed messages are closed by writing
    /// the end tag, not through this cursor.
    pub fn end(&self) -> bool {
        self.cursor >= self.data.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let mut msg = NetBuffer::with_capacity(64);
        msg.write_u32(0xDEADBEEF).unwrap();
        msg.write_u16(512).unwrap();
        msg.write_u8(7).unwrap();
        msg.write_u64(u64::MAX).unwrap();
        msg.write_bytes(b"payload").unwrap();

        let mut read = NetBuffer::from_bytes(msg.as_bytes().to_vec());
        assert_eq!(read.read_u32().unwrap(), 0xDEADBEEF);
        assert_eq!(read.read_u16().unwrap(), 512);
        assert_eq!(read.read_u8().unwrap(), 7);
        assert_eq!(read.read_u64().unwrap(), u64::MAX);
        assert_eq!(read.read_bytes(7).unwrap(), b"payload");
        assert!(read.end());
    }

    #[test]
    fn test_overflow_refused_without_corruption() {
        let mut msg = NetBuffer::with_capacity(6);
        msg.write_u32(1).unwrap();

        let err = msg.write_u32(2).unwrap_err();
        assert!(matches!(err, BufferError::Overflow { .. }));

        // previously written bytes stay intact and more writes can follow
        msg.write_u16(3).unwrap();
        let mut read = NetBuffer::from_bytes(msg.as_bytes().to_vec());
        assert_eq!(read.read_u32().unwrap(), 1);
        assert_eq!(read.read_u16().unwrap(), 3);
    }

    #[test]
    fn test_underrun_does_not_advance() {
        let mut read = NetBuffer::from_bytes(vec![1, 2]);
        assert!(read.read_u32().is_err());
        assert_eq!(read.read_u16().unwrap(), 0x0201);
        assert!(read.end());
    }

    #[test]
    fn test_little_endian_layout() {
        let mut msg = NetBuffer::with_capacity(4);
        msg.write_u32(0x0A0B0C0D).unwrap();
        assert_eq!(msg.as_bytes(), &[0x0D, 0x0C, 0x0B, 0x0A]);
    }
}
