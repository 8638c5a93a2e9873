//! Cursor types over a [`ChunkedBuffer`].
//!
//! [`StreamReader`] provides the fixed-width little-endian reads and
//! length-prefixed string reads the parser consumes. Dictionary strings
//! honor a character-width mode of 1, 2 or 4 bytes per code unit and are
//! transcoded to UTF-8 on the way in; attribute values and character
//! data are always UTF-8 on the wire. The width mode is an input-only
//! concern: [`StreamWriter`] emits UTF-8 exclusively.

use crate::common::{ChunkedBuffer, Error, Result, Scalar};

/// Forward-only reader over a chunked buffer.
pub struct StreamReader<'a> {
    buffer: &'a ChunkedBuffer,
    offset: usize,
    len: usize,
    /// Bytes per code unit for dictionary strings; zero until a
    /// `CharSize` record has been seen.
    char_width: usize,
}

impl<'a> StreamReader<'a> {
    pub fn new(buffer: &'a ChunkedBuffer) -> Self {
        Self {
            buffer,
            offset: 0,
            len: buffer.len(),
            char_width: 0,
        }
    }

    pub fn is_eof(&self) -> bool {
        self.offset == self.len
    }

    /// Set the character width for subsequent dictionary strings.
    /// Only 1, 2 and 4 are valid widths.
    pub fn set_char_width(&mut self, width: u8) -> Result<()> {
        match width {
            1 | 2 | 4 => {
                self.char_width = width as usize;
                Ok(())
            }
            other => Err(Error::Malformed(format!("invalid char size {other}"))),
        }
    }

    /// Read one little-endian scalar and advance.
    pub fn read_scalar<T: Scalar>(&mut self) -> Result<T> {
        let value = self.buffer.read_scalar::<T>(self.offset).ok_or_else(|| {
            Error::Malformed(format!(
                "unable to read {} bytes at offset {}",
                T::SIZE,
                self.offset
            ))
        })?;

        self.offset += T::SIZE;
        Ok(value)
    }

    fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>> {
        if self.offset + count > self.len {
            return Err(Error::Malformed(format!(
                "unable to read {count} bytes at offset {}",
                self.offset
            )));
        }

        let mut data = vec![0u8; count];
        self.buffer.read(self.offset, &mut data);
        self.offset += count;
        Ok(data)
    }

    fn read_length(&mut self, wide_prefix: bool) -> Result<usize> {
        Ok(if wide_prefix {
            self.read_scalar::<u32>()? as usize
        } else {
            self.read_scalar::<u16>()? as usize
        })
    }

    /// Read a length-prefixed string that is always UTF-8 on the wire
    /// (attribute values and character data).
    pub fn read_utf8_string(&mut self, wide_prefix: bool) -> Result<String> {
        let count = self.read_length(wide_prefix)?;
        let bytes = self.read_bytes(count)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Read a length-prefixed dictionary string, transcoding from the
    /// current character width to UTF-8.
    pub fn read_dictionary_string(&mut self, wide_prefix: bool) -> Result<String> {
        let count = self.read_length(wide_prefix)?;
        let bytes = self.read_bytes(count)?;

        match self.char_width {
            1 => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            2 => Ok(encoding_rs::UTF_16LE
                .decode_without_bom_handling(&bytes)
                .0
                .into_owned()),
            4 => {
                let mut result = String::with_capacity(bytes.len() / 4);
                for unit in bytes.chunks_exact(4) {
                    let code = u32::from_le_bytes([unit[0], unit[1], unit[2], unit[3]]);
                    result.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
                }
                Ok(result)
            }
            _ => Err(Error::Malformed("char size is not set".into())),
        }
    }

    /// Skip over a length-prefixed string without decoding it.
    pub fn skip_string(&mut self, wide_prefix: bool) -> Result<()> {
        let count = self.read_length(wide_prefix)?;

        if self.offset + count > self.len {
            return Err(Error::Malformed(format!(
                "unable to skip {count} bytes at offset {}",
                self.offset
            )));
        }

        self.offset += count;
        Ok(())
    }

    /// Skip a fixed number of bytes.
    pub fn skip(&mut self, count: usize) -> Result<()> {
        if self.offset + count > self.len {
            return Err(Error::Malformed(format!(
                "unable to skip {count} bytes at offset {}",
                self.offset
            )));
        }

        self.offset += count;
        Ok(())
    }
}

/// Writing counterpart of [`StreamReader`]. Strings go out in UTF-8 with
/// the requested prefix width.
pub struct StreamWriter<'a> {
    buffer: &'a mut ChunkedBuffer,
}

impl<'a> StreamWriter<'a> {
    pub fn new(buffer: &'a mut ChunkedBuffer) -> Self {
        Self { buffer }
    }

    pub fn write_scalar<T: Scalar>(&mut self, value: T) {
        self.buffer.append_scalar(value);
    }

    /// Write a string with a `u16` length prefix (dictionary entries).
    pub fn write_string_u16(&mut self, text: &str) {
        self.buffer.append_scalar(text.len() as u16);
        self.buffer.append(text.as_bytes());
    }

    /// Write a string with a `u32` length prefix (values and data).
    pub fn write_string_u32(&mut self, text: &str) {
        self.buffer.append_scalar(text.len() as u32);
        self.buffer.append(text.as_bytes());
    }
}
