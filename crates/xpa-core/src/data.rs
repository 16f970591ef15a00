//! Typed views of answer payloads.

use crate::error::{Error, Result};

/// Fixed-width value that can be decoded from payload bytes.
///
/// Payloads travel in the byte order of the sending process.
pub trait Element: Copy + Send + Sync + 'static {
    /// Encoded width in bytes.
    const SIZE: usize;

    /// Decode from exactly `SIZE` native-order bytes.
    fn read(bytes: &[u8]) -> Self;

    /// Append the native-order encoding to `out`.
    fn write(&self, out: &mut Vec<u8>);
}

macro_rules! impl_element {
    ($($t:ty),*) => {$(
        impl Element for $t {
            const SIZE: usize = std::mem::size_of::<$t>();

            fn read(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(bytes);
                <$t>::from_ne_bytes(raw)
            }

            fn write(&self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_ne_bytes());
            }
        }
    )*};
}

impl_element!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

/// Encode a slice of values into payload bytes.
pub fn encode<T: Element>(values: &[T]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * T::SIZE);
    for v in values {
        v.write(&mut out);
    }
    out
}

/// Decode as many whole values as `bytes` holds. Trailing bytes are ignored.
pub fn decode<T: Element>(bytes: &[u8]) -> Vec<T> {
    bytes.chunks_exact(T::SIZE).map(T::read).collect()
}

/// Requested shape of an extraction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Shape {
    /// Raw bytes.
    #[default]
    Bytes,
    /// The largest vector of elements the buffer holds.
    Vector,
    /// Exactly this many elements, column-major, with these dimensions.
    Array(Vec<usize>),
    /// Text, decoded lossily from UTF-8.
    Text,
}

impl Shape {
    /// Extraction used when the caller does not choose one.
    ///
    /// Text decoding copies anyway, so it keeps the source buffer.
    pub fn default_extraction(&self) -> Extraction {
        match self {
            Shape::Text => Extraction::Copy,
            _ => Extraction::Take,
        }
    }

    /// Bytes needed for elements of `elem_size` bytes, if the shape fixes it.
    pub fn required_bytes(&self, elem_size: usize) -> Option<usize> {
        match self {
            Shape::Array(dims) => Some(byte_count(dims, elem_size).unwrap_or(usize::MAX)),
            _ => None,
        }
    }
}

/// Element count of `dims`, or `None` if it overflows.
fn element_count(dims: &[usize]) -> Option<usize> {
    dims.iter().try_fold(1usize, |n, &d| n.checked_mul(d))
}

/// Bytes held by `dims` elements of `elem_size` bytes, or `None` on overflow.
fn byte_count(dims: &[usize], elem_size: usize) -> Option<usize> {
    element_count(dims)?.checked_mul(elem_size)
}

/// Whether an extraction keeps the reply's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extraction {
    /// Move the buffer out and leave the slot empty.
    Take,
    /// Copy and leave the buffer in place.
    Copy,
}

/// A dense, column-major array.
#[derive(Debug, Clone, PartialEq)]
pub struct Array<T> {
    dims: Vec<usize>,
    values: Vec<T>,
}

impl<T: Element> Array<T> {
    /// Build an array; `values` must hold exactly the product of `dims`.
    pub fn new(dims: Vec<usize>, values: Vec<T>) -> Result<Self> {
        if element_count(&dims) != Some(values.len()) {
            return Err(Error::Size {
                needed: byte_count(&dims, T::SIZE).unwrap_or(usize::MAX),
                available: values.len().saturating_mul(T::SIZE),
            });
        }
        Ok(Self { dims, values })
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn into_values(self) -> Vec<T> {
        self.values
    }

    /// Element at a multi-index, column-major.
    pub fn get(&self, index: &[usize]) -> Option<T> {
        if index.len() != self.dims.len() {
            return None;
        }
        let mut offset = 0;
        let mut stride = 1;
        for (&i, &d) in index.iter().zip(&self.dims) {
            if i >= d {
                return None;
            }
            offset += i * stride;
            stride *= d;
        }
        self.values.get(offset).copied()
    }
}

/// An extracted payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Data<T> {
    Bytes(Vec<u8>),
    Vector(Vec<T>),
    Array(Array<T>),
    Text(String),
}

impl<T> Data<T> {
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Data::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn into_vector(self) -> Option<Vec<T>> {
        match self {
            Data::Vector(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<Array<T>> {
        match self {
            Data::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            Data::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Check that `available` bytes satisfy `shape` before reading anything.
pub fn check_size<T: Element>(shape: &Shape, available: usize) -> Result<()> {
    match shape.required_bytes(T::SIZE) {
        Some(needed) if needed > available => Err(Error::Size { needed, available }),
        _ => Ok(()),
    }
}

/// Convert owned bytes into the requested shape.
///
/// Callers run [`check_size`] first; this never fails on size.
pub fn convert<T: Element>(shape: &Shape, bytes: Vec<u8>) -> Data<T> {
    match shape {
        Shape::Bytes => Data::Bytes(bytes),
        Shape::Text => Data::Text(match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
        }),
        Shape::Vector => Data::Vector(decode(&bytes)),
        Shape::Array(dims) => {
            let len = byte_count(dims, T::SIZE)
                .unwrap_or(usize::MAX)
                .min(bytes.len());
            let values = decode(&bytes[..len]);
            Data::Array(Array {
                dims: dims.clone(),
                values,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_values() {
        let bytes = encode(&[42i32, -1]);
        assert_eq!(bytes.len(), 8);
        assert_eq!(decode::<i32>(&bytes), vec![42, -1]);
        assert_eq!(decode::<f64>(&encode(&[1.5f64])), vec![1.5]);
    }

    #[test]
    fn vector_ignores_trailing_bytes() {
        let mut bytes = encode(&[7u16, 8]);
        bytes.push(0xff);
        match convert::<u16>(&Shape::Vector, bytes) {
            Data::Vector(v) => assert_eq!(v, vec![7, 8]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn array_shape_is_checked() {
        let shape = Shape::Array(vec![2, 3]);
        assert!(matches!(
            check_size::<i32>(&shape, 20),
            Err(Error::Size {
                needed: 24,
                available: 20
            })
        ));
        let bytes = encode(&[1i32, 2, 3, 4, 5, 6, 7]);
        check_size::<i32>(&shape, bytes.len()).unwrap();
        let array = convert::<i32>(&shape, bytes).into_array().unwrap();
        assert_eq!(array.dims(), &[2, 3]);
        assert_eq!(array.values().len(), 6);
        assert_eq!(array.get(&[1, 2]), Some(6));
        assert_eq!(array.get(&[2, 0]), None);
    }

    #[test]
    fn overflowing_dims_need_more_than_any_payload() {
        let shape = Shape::Array(vec![1 << 62, 4]);
        assert_eq!(shape.required_bytes(4), Some(usize::MAX));
        assert!(matches!(
            check_size::<i32>(&shape, 8),
            Err(Error::Size {
                needed: usize::MAX,
                available: 8
            })
        ));
        assert!(matches!(
            Array::<i32>::new(vec![usize::MAX, 2], vec![1, 2]),
            Err(Error::Size {
                needed: usize::MAX,
                available: 8
            })
        ));
        assert_eq!(Array::new(vec![2, 1], vec![1u8, 2]).unwrap().values(), &[1, 2]);
    }

    #[test]
    fn text_is_lossy() {
        let text = convert::<u8>(&Shape::Text, vec![b'h', 0xff, b'i'])
            .into_text()
            .unwrap();
        assert_eq!(text, "h\u{fffd}i");
    }

    #[test]
    fn default_extraction_keeps_text() {
        assert_eq!(Shape::Text.default_extraction(), Extraction::Copy);
        assert_eq!(Shape::Bytes.default_extraction(), Extraction::Take);
        assert_eq!(Shape::Array(vec![1]).default_extraction(), Extraction::Take);
    }
}
