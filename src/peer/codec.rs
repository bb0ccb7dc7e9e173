//! Cursor-based binary encoding over a fixed-size buffer.
//!
//! Integers are little-endian. Every read or write either names an explicit
//! offset (the `*_at` methods, which leave the cursor alone) or uses and
//! advances the internal cursor. The buffer never grows; running past its
//! end is a [`CodecError::OutOfBounds`].

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("access of {len} bytes at offset {offset} exceeds buffer of {size}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },

    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("string at offset {0} has no terminator")]
    MissingTerminator(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ByteBuffer {
    data: Vec<u8>,
    cursor: usize,
}

macro_rules! int_access {
    ($ty:ty, $read:ident, $read_at:ident, $write:ident, $write_at:ident) => {
        pub fn $read_at(&self, offset: usize) -> Result<$ty, CodecError> {
            let bytes = self.range(offset, std::mem::size_of::<$ty>())?;
            let mut raw = [0u8; std::mem::size_of::<$ty>()];
            raw.copy_from_slice(bytes);
            Ok(<$ty>::from_le_bytes(raw))
        }

        pub fn $read(&mut self) -> Result<$ty, CodecError> {
            let value = self.$read_at(self.cursor)?;
            self.cursor += std::mem::size_of::<$ty>();
            Ok(value)
        }

        pub fn $write_at(&mut self, offset: usize, value: $ty) -> Result<(), CodecError> {
            self.write_bytes_at(offset, &value.to_le_bytes())
        }

        pub fn $write(&mut self, value: $ty) -> Result<(), CodecError> {
            self.$write_at(self.cursor, value)?;
            self.cursor += std::mem::size_of::<$ty>();
            Ok(())
        }
    };
}

impl ByteBuffer {
    /// A zeroed buffer of `len` bytes.
    pub fn with_len(len: usize) -> Self {
        Self {
            data: vec![0; len],
            cursor: 0,
        }
    }

    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            cursor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn set_position(&mut self, position: usize) -> Result<(), CodecError> {
        if position > self.data.len() {
            return Err(self.out_of_bounds(position, 0));
        }
        self.cursor = position;
        Ok(())
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.cursor)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    pub fn get(&self, index: usize) -> Option<u8> {
        self.data.get(index).copied()
    }

    pub fn set(&mut self, index: usize, value: u8) -> Result<(), CodecError> {
        let size = self.data.len();
        let slot = self.data.get_mut(index).ok_or(CodecError::OutOfBounds {
            offset: index,
            len: 1,
            size,
        })?;
        *slot = value;
        Ok(())
    }

    /// Copy of `start..end` as a new buffer with its own cursor.
    pub fn slice(&self, start: usize, end: usize) -> Result<ByteBuffer, CodecError> {
        if start > end {
            return Err(self.out_of_bounds(start, 0));
        }
        Ok(ByteBuffer::from_bytes(self.range(start, end - start)?.to_vec()))
    }

    /// Next byte without advancing the cursor.
    pub fn peek(&self) -> Option<u8> {
        self.get(self.cursor)
    }

    int_access!(u8, read_u8, read_u8_at, write_u8, write_u8_at);
    int_access!(u16, read_u16, read_u16_at, write_u16, write_u16_at);
    int_access!(u32, read_u32, read_u32_at, write_u32, write_u32_at);
    int_access!(u64, read_u64, read_u64_at, write_u64, write_u64_at);

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, CodecError> {
        let bytes = self.range(self.cursor, len)?.to_vec();
        self.cursor += len;
        Ok(bytes)
    }

    /// Everything from the cursor to the end.
    pub fn read_rest(&mut self) -> Vec<u8> {
        let start = self.cursor.min(self.data.len());
        self.cursor = self.data.len();
        self.data[start..].to_vec()
    }

    pub fn write_bytes_at(&mut self, offset: usize, bytes: &[u8]) -> Result<(), CodecError> {
        let end = offset
            .checked_add(bytes.len())
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| self.out_of_bounds(offset, bytes.len()))?;
        self.data[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.write_bytes_at(self.cursor, bytes)?;
        self.cursor += bytes.len();
        Ok(())
    }

    /// Read a NUL-terminated UTF-8 string, consuming the terminator.
    pub fn read_cstr(&mut self) -> Result<String, CodecError> {
        let rest = self.range(self.cursor, self.remaining())?;
        let end = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or(CodecError::MissingTerminator(self.cursor))?;
        let text = std::str::from_utf8(&rest[..end])
            .map_err(|_| CodecError::InvalidUtf8)?
            .to_string();
        self.cursor += end + 1;
        Ok(text)
    }

    /// Write `text` followed by a NUL byte.
    pub fn write_cstr(&mut self, text: &str) -> Result<(), CodecError> {
        let needed = text.len() + 1;
        if needed > self.remaining() {
            return Err(self.out_of_bounds(self.cursor, needed));
        }
        self.write_bytes(text.as_bytes())?;
        self.write_u8(0)
    }

    /// Bytes needed to hold `text` as a NUL-terminated string.
    pub fn cstr_len(text: &str) -> usize {
        text.len() + 1
    }

    fn range(&self, offset: usize, len: usize) -> Result<&[u8], CodecError> {
        offset
            .checked_add(len)
            .and_then(|end| self.data.get(offset..end))
            .ok_or_else(|| self.out_of_bounds(offset, len))
    }

    fn out_of_bounds(&self, offset: usize, len: usize) -> CodecError {
        CodecError::OutOfBounds {
            offset,
            len,
            size: self.data.len(),
        }
    }
}

impl From<Vec<u8>> for ByteBuffer {
    fn from(data: Vec<u8>) -> Self {
        ByteBuffer::from_bytes(data)
    }
}
