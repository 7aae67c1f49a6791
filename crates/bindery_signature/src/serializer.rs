//! Three-mode binary serializer.
//!
//! A single `serialize` routine drives all three modes:
//!
//! | Mode        | Effect on the stream        | Effect on the value |
//! |-------------|-----------------------------|---------------------|
//! | [`Measure`] | counts bytes                | untouched           |
//! | [`Writer`]  | copies the value in         | untouched           |
//! | [`Reader`]  | consumes bytes              | overwritten         |
//!
//! Because every mode walks the same field sequence, the size computed by
//! `Measure` is exactly the number of bytes `Writer` produces and `Reader`
//! consumes. [`to_bytes`] and [`from_bytes`] check that at the end of each pass.
//!
//! Values are passed as `&mut T` in every mode; only `Reader` writes to them.
//!
//! Multi-byte values use the host byte order. Blobs are produced and consumed
//! by the same engine build, so no endianness conversion is done.

use bindery_core::errors::{BinderyError, Result};
use bitflags::Flags;
use bytemuck::Pod;

mod sealed {
    pub trait Sealed {}
}

/// Serializer operating mode.
pub trait Mode: sealed::Sealed {
    /// `true` only for [`Reader`].
    const READING: bool;

    /// Moves `value.len()` bytes between `value` and the stream.
    fn transfer(&mut self, value: &mut [u8]) -> Result<()>;

    /// Appends `value` to the stream. Invalid while reading.
    fn emit(&mut self, value: &[u8]) -> Result<()>;

    /// Fails if fewer than `bytes` bytes are left to read.
    fn ensure_available(&self, _bytes: usize) -> Result<()> {
        Ok(())
    }
}

/// Size computation pass.
#[derive(Debug, Default)]
pub struct Measure {
    size: usize,
}

/// Serialization into a buffer pre-sized by [`Measure`].
#[derive(Debug)]
pub struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

/// Deserialization from a byte slice.
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl sealed::Sealed for Measure {}
impl sealed::Sealed for Writer<'_> {}
impl sealed::Sealed for Reader<'_> {}

impl Mode for Measure {
    const READING: bool = false;

    #[inline]
    fn transfer(&mut self, value: &mut [u8]) -> Result<()> {
        self.size += value.len();
        Ok(())
    }

    #[inline]
    fn emit(&mut self, value: &[u8]) -> Result<()> {
        self.size += value.len();
        Ok(())
    }
}

impl Mode for Writer<'_> {
    const READING: bool = false;

    #[inline]
    fn transfer(&mut self, value: &mut [u8]) -> Result<()> {
        self.emit(value)
    }

    fn emit(&mut self, value: &[u8]) -> Result<()> {
        let end = self.pos + value.len();
        let dst = self
            .buf
            .get_mut(self.pos..end)
            .ok_or_else(|| BinderyError::format(format!("write of {} bytes overflows the buffer at {}", value.len(), self.pos)))?;
        dst.copy_from_slice(value);
        self.pos = end;
        Ok(())
    }
}

impl Mode for Reader<'_> {
    const READING: bool = true;

    fn transfer(&mut self, value: &mut [u8]) -> Result<()> {
        let end = self.pos + value.len();
        let src = self
            .buf
            .get(self.pos..end)
            .ok_or_else(|| BinderyError::format(format!("unexpected end of data: need {} bytes at {}, have {}", value.len(), self.pos, self.buf.len())))?;
        value.copy_from_slice(src);
        self.pos = end;
        Ok(())
    }

    fn emit(&mut self, _value: &[u8]) -> Result<()> {
        Err(BinderyError::format("emit is not available while reading"))
    }

    fn ensure_available(&self, bytes: usize) -> Result<()> {
        let remaining = self.buf.len() - self.pos;
        if bytes > remaining {
            return Err(BinderyError::format(format!(
                "length prefix needs {bytes} bytes at {}, only {remaining} remain",
                self.pos
            )));
        }
        Ok(())
    }
}

/// Field-level serializer over a [`Mode`].
#[derive(Debug)]
pub struct Serializer<M: Mode> {
    mode: M,
}

impl Serializer<Measure> {
    #[must_use]
    pub fn measure() -> Self {
        Self { mode: Measure::default() }
    }

    /// Bytes counted so far.
    #[must_use]
    pub fn size(&self) -> usize {
        self.mode.size
    }
}

impl<'a> Serializer<Writer<'a>> {
    pub fn writer(buf: &'a mut [u8]) -> Self {
        Self {
            mode: Writer { buf, pos: 0 },
        }
    }

    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.mode.pos == self.mode.buf.len()
    }

    #[must_use]
    pub fn position(&self) -> usize {
        self.mode.pos
    }
}

impl<'a> Serializer<Reader<'a>> {
    #[must_use]
    pub fn reader(buf: &'a [u8]) -> Self {
        Self {
            mode: Reader { buf, pos: 0 },
        }
    }

    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.mode.pos == self.mode.buf.len()
    }

    #[must_use]
    pub fn position(&self) -> usize {
        self.mode.pos
    }
}

impl<M: Mode> Serializer<M> {
    #[inline]
    #[must_use]
    pub fn is_reading(&self) -> bool {
        M::READING
    }

    /// Any plain-old-data value, including arrays and `#[repr(C)]` structs.
    #[inline]
    pub fn pod<T: Pod>(&mut self, value: &mut T) -> Result<()> {
        self.mode.transfer(bytemuck::bytes_of_mut(value))
    }

    #[inline]
    pub fn u8(&mut self, value: &mut u8) -> Result<()> {
        self.pod(value)
    }

    #[inline]
    pub fn u32(&mut self, value: &mut u32) -> Result<()> {
        self.pod(value)
    }

    pub fn bool(&mut self, value: &mut bool) -> Result<()> {
        let mut raw = u8::from(*value);
        self.u8(&mut raw)?;
        if M::READING {
            *value = match raw {
                0 => false,
                1 => true,
                _ => return Err(BinderyError::format(format!("invalid bool value {raw}"))),
            };
        }
        Ok(())
    }

    /// A `u8`-backed enum. Unknown discriminants are rejected on read.
    pub fn enum_u8<T>(&mut self, value: &mut T) -> Result<()>
    where
        T: Copy + Into<u8> + TryFrom<u8, Error = BinderyError>,
    {
        let mut raw: u8 = (*value).into();
        self.u8(&mut raw)?;
        if M::READING {
            *value = T::try_from(raw)?;
        }
        Ok(())
    }

    /// A `bitflags` mask. Unknown bits are rejected on read.
    pub fn flags<F>(&mut self, value: &mut F) -> Result<()>
    where
        F: Flags,
        F::Bits: Pod,
    {
        let mut bits = value.bits();
        self.pod(&mut bits)?;
        if M::READING {
            *value = F::from_bits(bits).ok_or_else(|| BinderyError::format("invalid flag bits"))?;
        }
        Ok(())
    }

    /// Length-prefixed UTF-8 string.
    pub fn string(&mut self, value: &mut String) -> Result<()> {
        let mut len = u32::try_from(value.len()).map_err(|_| BinderyError::format("string is too long"))?;
        self.u32(&mut len)?;
        if M::READING {
            self.mode.ensure_available(len as usize)?;
            let mut bytes = vec![0u8; len as usize];
            self.mode.transfer(&mut bytes)?;
            *value = String::from_utf8(bytes).map_err(|e| BinderyError::format(format!("invalid UTF-8 string: {e}")))?;
            Ok(())
        } else {
            self.mode.emit(value.as_bytes())
        }
    }

    /// Length-prefixed array of plain-old-data elements, copied as one block.
    pub fn pod_vec<T: Pod>(&mut self, value: &mut Vec<T>) -> Result<()> {
        let len = self.len_prefix(value.len())?;
        if M::READING {
            self.mode
                .ensure_available((len as usize).saturating_mul(std::mem::size_of::<T>()))?;
            value.clear();
            value.resize(len as usize, T::zeroed());
        }
        self.mode.transfer(bytemuck::cast_slice_mut(value.as_mut_slice()))
    }

    /// Length-prefixed array of structured elements, each handled by `element`.
    pub fn vec_with<T, F>(&mut self, value: &mut Vec<T>, mut element: F) -> Result<()>
    where
        T: Default,
        F: FnMut(&mut Self, &mut T) -> Result<()>,
    {
        let len = self.len_prefix(value.len())?;
        if M::READING {
            // Every element occupies at least one byte.
            self.mode.ensure_available(len as usize)?;
            value.clear();
            value.resize_with(len as usize, T::default);
        }
        for item in value.iter_mut() {
            element(self, item)?;
        }
        Ok(())
    }

    /// Raw bytes with a length prefix.
    pub fn bytes(&mut self, value: &mut Vec<u8>) -> Result<()> {
        self.pod_vec(value)
    }

    fn len_prefix(&mut self, len: usize) -> Result<u32> {
        let mut len = u32::try_from(len).map_err(|_| BinderyError::format("array is too long"))?;
        self.u32(&mut len)?;
        Ok(len)
    }
}

/// Types that can be walked by a [`Serializer`] in any mode.
pub trait Serializable {
    fn serialize<M: Mode>(&mut self, ser: &mut Serializer<M>) -> Result<()>;
}

/// Number of bytes `value` serializes to.
pub fn measure<T: Serializable>(value: &mut T) -> Result<usize> {
    let mut measure = Serializer::measure();
    value.serialize(&mut measure)?;
    Ok(measure.size())
}

/// Writes `value` into `buf`, which must be exactly [`measure`] bytes long.
pub fn write_into<T: Serializable>(value: &mut T, buf: &mut [u8]) -> Result<()> {
    let size = buf.len();
    let mut writer = Serializer::writer(buf);
    value.serialize(&mut writer)?;
    if !writer.is_ended() {
        return Err(BinderyError::format(format!(
            "buffer holds {size} bytes but {} were written",
            writer.position()
        )));
    }
    Ok(())
}

/// Measures, allocates and writes `value`.
pub fn to_bytes<T: Serializable>(value: &mut T) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; measure(value)?];
    write_into(value, &mut buf)?;
    Ok(buf)
}

/// Reads a `T` that must consume `bytes` exactly.
pub fn from_bytes<T: Serializable + Default>(bytes: &[u8]) -> Result<T> {
    let mut value = T::default();
    let mut reader = Serializer::reader(bytes);
    value.serialize(&mut reader)?;
    if !reader.is_ended() {
        return Err(BinderyError::format(format!(
            "{} trailing bytes after deserialization",
            bytes.len() - reader.position()
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq)]
    struct Sample {
        name: String,
        flag: bool,
        values: Vec<u32>,
        nested: Vec<(String, u8)>,
    }

    impl Serializable for Sample {
        fn serialize<M: Mode>(&mut self, ser: &mut Serializer<M>) -> Result<()> {
            ser.string(&mut self.name)?;
            ser.bool(&mut self.flag)?;
            ser.pod_vec(&mut self.values)?;
            ser.vec_with(&mut self.nested, |ser, (name, v)| {
                ser.string(name)?;
                ser.u8(v)
            })
        }
    }

    fn sample() -> Sample {
        Sample {
            name: "g_Constants".into(),
            flag: true,
            values: vec![1, 2, 3],
            nested: vec![("a".into(), 1), ("bc".into(), 2)],
        }
    }

    #[test]
    fn measured_size_matches_written_size() {
        let mut value = sample();
        let mut measure = Serializer::measure();
        value.serialize(&mut measure).unwrap();
        // 4+11 + 1 + 4+12 + 4 + (4+1+1) + (4+2+1)
        assert_eq!(measure.size(), 49);

        let bytes = to_bytes(&mut value).unwrap();
        assert_eq!(bytes.len(), measure.size());
        assert_eq!(from_bytes::<Sample>(&bytes).unwrap(), sample());
    }

    #[test]
    fn write_into_undersized_buffer_fails() {
        let mut value = sample();
        let mut buf = vec![0u8; 8];
        let mut writer = Serializer::writer(&mut buf);
        assert!(value.serialize(&mut writer).is_err());
    }

    #[test]
    fn truncated_blob_is_a_format_error() {
        let bytes = to_bytes(&mut sample()).unwrap();
        let err = from_bytes::<Sample>(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, BinderyError::SerializationFormat(_)));
    }

    #[test]
    fn trailing_bytes_are_a_format_error() {
        let mut bytes = to_bytes(&mut sample()).unwrap();
        bytes.push(0);
        assert!(matches!(
            from_bytes::<Sample>(&bytes),
            Err(BinderyError::SerializationFormat(_))
        ));
    }

    #[test]
    fn invalid_bool_is_rejected() {
        let mut bytes = to_bytes(&mut sample()).unwrap();
        // bool follows the 4-byte length and 11 name bytes
        bytes[15] = 7;
        assert!(from_bytes::<Sample>(&bytes).is_err());
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let mut bytes = to_bytes(&mut sample()).unwrap();
        bytes[..4].copy_from_slice(&u32::MAX.to_ne_bytes());
        assert!(matches!(
            from_bytes::<Sample>(&bytes),
            Err(BinderyError::SerializationFormat(_))
        ));
    }
}
