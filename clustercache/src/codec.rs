//! Value encoding
//!
//! Stored values come in two layouts:
//!
//! - integers (any Rust integer type up to 64 bits, never `bool`, also
//!   inside `Some` or a newtype struct) are stored as their decimal text, so
//!   the store can `INCRBY` them natively;
//! - everything else is serialized (MessagePack or JSON) and, when it is at
//!   least `compress_min_len` bytes long, compressed if that makes it shorter.
//!
//! Reading inverts this by trial: decimal text is taken as an integer, then
//! decompression is attempted and a failure means "stored uncompressed".
//! A corrupted compressed value and a value written with compression
//! disabled are therefore indistinguishable, and a serializer output that
//! happens to be decimal text would be read back as an integer. Neither
//! shipped serializer produces bare decimal text for a non-integer value.

use crate::compression::Compressor;
use crate::error::CodecError;
use serde::de::DeserializeOwned;
use serde::de::value::{I64Deserializer, U64Deserializer};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::sync::Arc;
use tracing::debug;

/// Serialization format for non-integer values
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SerializerFormat {
    /// MessagePack with named struct fields
    #[default]
    Msgpack,
    Json,
}

impl SerializerFormat {
    fn serialize<V: Serialize + ?Sized>(self, value: &V) -> Result<Vec<u8>, CodecError> {
        match self {
            Self::Msgpack => Ok(rmp_serde::to_vec_named(value)?),
            Self::Json => Ok(serde_json::to_vec(value)?),
        }
    }

    fn deserialize<V: DeserializeOwned>(self, bytes: &[u8]) -> Result<V, CodecError> {
        match self {
            Self::Msgpack => {
                let mut cursor = Cursor::new(bytes);
                let value = rmp_serde::from_read(&mut cursor)?;
                let consumed = cursor.position() as usize;
                if consumed != bytes.len() {
                    return Err(CodecError::TrailingBytes {
                        consumed,
                        len: bytes.len(),
                    });
                }
                Ok(value)
            }
            Self::Json => Ok(serde_json::from_slice(bytes)?),
        }
    }
}

impl std::str::FromStr for SerializerFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "msgpack" | "messagepack" => Ok(Self::Msgpack),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown serializer: {value}")),
        }
    }
}

/// An encoded value ready for the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedValue {
    /// Integer stored verbatim as decimal text
    Integer(i128),
    /// Serialized, possibly compressed payload
    Blob(Vec<u8>),
}

impl EncodedValue {
    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Integer(_))
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Integer(n) => n.to_string().into_bytes(),
            Self::Blob(bytes) => bytes,
        }
    }
}

/// Encodes application values to stored bytes and back
#[derive(Debug, Clone)]
pub struct ValueCodec {
    serializer: SerializerFormat,
    compressor: Option<Arc<dyn Compressor>>,
    compress_min_len: usize,
}

impl ValueCodec {
    /// `compress_min_len == 0` disables compression regardless of `compressor`
    pub fn new(
        serializer: SerializerFormat,
        compressor: Option<Arc<dyn Compressor>>,
        compress_min_len: usize,
    ) -> Self {
        Self {
            serializer,
            compressor,
            compress_min_len,
        }
    }

    pub fn serializer(&self) -> SerializerFormat {
        self.serializer
    }

    fn active_compressor(&self) -> Option<&dyn Compressor> {
        if self.compress_min_len == 0 {
            return None;
        }
        self.compressor.as_deref()
    }

    pub fn encode<V: Serialize + ?Sized>(&self, value: &V) -> Result<EncodedValue, CodecError> {
        if let Some(n) = integer_value(value) {
            return Ok(EncodedValue::Integer(n));
        }

        let serialized = self.serializer.serialize(value)?;

        if let Some(compressor) = self.active_compressor() {
            if serialized.len() >= self.compress_min_len {
                let compressed = compressor.compress(&serialized)?;
                if compressed.len() < serialized.len() {
                    return Ok(EncodedValue::Blob(compressed));
                }
                debug!(
                    "Keeping uncompressed value: {} bytes would become {}",
                    serialized.len(),
                    compressed.len()
                );
            }
        }

        Ok(EncodedValue::Blob(serialized))
    }

    /// Decode stored bytes
    ///
    /// Decimal text is read as an integer. If `V` cannot hold that integer
    /// (a narrower type, a sign mismatch) the result is
    /// [`CodecError::Integer`]. MessagePack never reinterprets decimal text;
    /// JSON may, since its reading of the text is the same number.
    pub fn decode<V: DeserializeOwned>(&self, bytes: &[u8]) -> Result<V, CodecError> {
        match decode_integer(bytes) {
            Some(Ok(value)) => Ok(value),
            Some(Err(err)) => match self.serializer {
                SerializerFormat::Json => self.decode_serialized(bytes).map_err(|_| err),
                SerializerFormat::Msgpack => Err(err),
            },
            None => self.decode_serialized(bytes),
        }
    }

    fn decode_serialized<V: DeserializeOwned>(&self, bytes: &[u8]) -> Result<V, CodecError> {
        if let Some(compressor) = self.active_compressor() {
            match compressor.decompress(bytes) {
                Ok(decompressed) => return self.serializer.deserialize(&decompressed),
                Err(e) => debug!(
                    "Value is not {} compressed, reading raw: {}",
                    compressor.algorithm(),
                    e
                ),
            }
        }

        self.serializer.deserialize(bytes)
    }
}

fn decode_integer<V: DeserializeOwned>(bytes: &[u8]) -> Option<Result<V, CodecError>> {
    let text = std::str::from_utf8(bytes).ok()?;

    let integer = if let Ok(n) = text.parse::<i64>() {
        StoredInteger::Signed(n)
    } else if let Ok(n) = text.parse::<u64>() {
        StoredInteger::Unsigned(n)
    } else {
        return None;
    };

    Some(V::deserialize(integer).map_err(|e| CodecError::Integer {
        value: text.to_string(),
        reason: e.to_string(),
    }))
}

/// Deserializer over an integer read from decimal text
///
/// `Some(n)` and newtype wrappers around integers are encoded as the bare
/// integer, so they are accepted here too.
#[derive(Clone, Copy)]
enum StoredInteger {
    Signed(i64),
    Unsigned(u64),
}

impl<'de> serde::Deserializer<'de> for StoredInteger {
    type Error = serde::de::value::Error;

    fn deserialize_any<Vis: serde::de::Visitor<'de>>(
        self,
        visitor: Vis,
    ) -> Result<Vis::Value, Self::Error> {
        match self {
            Self::Signed(n) => {
                serde::Deserializer::deserialize_any(I64Deserializer::<Self::Error>::new(n), visitor)
            }
            Self::Unsigned(n) => {
                serde::Deserializer::deserialize_any(U64Deserializer::<Self::Error>::new(n), visitor)
            }
        }
    }

    fn deserialize_option<Vis: serde::de::Visitor<'de>>(
        self,
        visitor: Vis,
    ) -> Result<Vis::Value, Self::Error> {
        visitor.visit_some(self)
    }

    fn deserialize_newtype_struct<Vis: serde::de::Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: Vis,
    ) -> Result<Vis::Value, Self::Error> {
        visitor.visit_newtype_struct(self)
    }

    serde::forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf unit unit_struct seq tuple tuple_struct map struct enum
        identifier ignored_any
    }
}

/// `Some(n)` when `value` serializes as a single primitive integer
fn integer_value<V: Serialize + ?Sized>(value: &V) -> Option<i128> {
    value.serialize(IntegerProbe).ok()
}

/// Serializer that only accepts primitive integers, bare or wrapped in
/// `Some` or a newtype struct
struct IntegerProbe;

#[derive(Debug)]
struct NotInteger;

impl std::fmt::Display for NotInteger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("not an integer")
    }
}

impl std::error::Error for NotInteger {}

impl serde::ser::Error for NotInteger {
    fn custom<T: std::fmt::Display>(_msg: T) -> Self {
        NotInteger
    }
}

macro_rules! accept_integer {
    ($($method:ident: $ty:ty),*) => {
        $(fn $method(self, v: $ty) -> Result<i128, NotInteger> {
            Ok(i128::from(v))
        })*
    };
}

macro_rules! reject {
    ($($method:ident: $ty:ty),*) => {
        $(fn $method(self, _v: $ty) -> Result<i128, NotInteger> {
            Err(NotInteger)
        })*
    };
}

type Rejected = serde::ser::Impossible<i128, NotInteger>;

impl serde::Serializer for IntegerProbe {
    type Ok = i128;
    type Error = NotInteger;
    type SerializeSeq = Rejected;
    type SerializeTuple = Rejected;
    type SerializeTupleStruct = Rejected;
    type SerializeTupleVariant = Rejected;
    type SerializeMap = Rejected;
    type SerializeStruct = Rejected;
    type SerializeStructVariant = Rejected;

    accept_integer!(
        serialize_i8: i8,
        serialize_i16: i16,
        serialize_i32: i32,
        serialize_i64: i64,
        serialize_u8: u8,
        serialize_u16: u16,
        serialize_u32: u32,
        serialize_u64: u64
    );

    reject!(
        serialize_bool: bool,
        serialize_f32: f32,
        serialize_f64: f64,
        serialize_char: char,
        serialize_str: &str,
        serialize_bytes: &[u8]
    );

    fn serialize_none(self) -> Result<i128, NotInteger> {
        Err(NotInteger)
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<i128, NotInteger> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<i128, NotInteger> {
        Err(NotInteger)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<i128, NotInteger> {
        Err(NotInteger)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
    ) -> Result<i128, NotInteger> {
        Err(NotInteger)
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<i128, NotInteger> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<i128, NotInteger> {
        Err(NotInteger)
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Rejected, NotInteger> {
        Err(NotInteger)
    }

    fn serialize_tuple(self, _len: usize) -> Result<Rejected, NotInteger> {
        Err(NotInteger)
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Rejected, NotInteger> {
        Err(NotInteger)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Rejected, NotInteger> {
        Err(NotInteger)
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Rejected, NotInteger> {
        Err(NotInteger)
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<Rejected, NotInteger> {
        Err(NotInteger)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Rejected, NotInteger> {
        Err(NotInteger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::{CompressionAlgorithm, ZlibCompressor};
    use crate::error::CompressionError;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        tags: Vec<String>,
        score: f64,
    }

    fn plain() -> ValueCodec {
        ValueCodec::new(SerializerFormat::Msgpack, None, 0)
    }

    fn compressing(min_len: usize) -> ValueCodec {
        ValueCodec::new(
            SerializerFormat::Msgpack,
            CompressionAlgorithm::Zlib.compressor(3),
            min_len,
        )
    }

    #[test]
    fn test_integers_stored_verbatim() {
        let codec = plain();

        assert_eq!(codec.encode(&42i64).unwrap(), EncodedValue::Integer(42));
        assert_eq!(codec.encode(&-7i32).unwrap().into_bytes(), b"-7".to_vec());
        assert_eq!(
            codec.encode(&u64::MAX).unwrap().into_bytes(),
            u64::MAX.to_string().into_bytes()
        );
        assert_eq!(codec.decode::<i64>(b"42").unwrap(), 42);
        assert_eq!(codec.decode::<u64>(u64::MAX.to_string().as_bytes()).unwrap(), u64::MAX);
    }

    #[test]
    fn test_booleans_are_not_integers() {
        let codec = plain();

        let encoded = codec.encode(&true).unwrap();
        assert!(!encoded.is_integer());
        assert!(codec.decode::<bool>(&encoded.into_bytes()).unwrap());
    }

    #[test]
    fn test_integers_skip_compression() {
        let codec = compressing(1);
        let encoded = codec.encode(&1234567890i64).unwrap();
        assert_eq!(encoded.into_bytes(), b"1234567890".to_vec());
    }

    #[test]
    fn test_struct_round_trip() {
        let codec = plain();
        let profile = Profile {
            name: "ada".into(),
            tags: vec!["admin".into(), "ops".into()],
            score: 9.5,
        };

        let bytes = codec.encode(&profile).unwrap().into_bytes();
        assert_eq!(codec.decode::<Profile>(&bytes).unwrap(), profile);
    }

    #[test]
    fn test_json_serializer() {
        let codec = ValueCodec::new(SerializerFormat::Json, None, 0);

        let bytes = codec.encode("hello").unwrap().into_bytes();
        assert_eq!(bytes, b"\"hello\"".to_vec());
        assert_eq!(codec.decode::<String>(&bytes).unwrap(), "hello");
    }

    #[test]
    fn test_integer_looking_string_is_not_an_integer() {
        for serializer in [SerializerFormat::Msgpack, SerializerFormat::Json] {
            let codec = ValueCodec::new(serializer, None, 0);
            let bytes = codec.encode("42").unwrap().into_bytes();

            assert_ne!(bytes, b"42".to_vec());
            assert_eq!(codec.decode::<String>(&bytes).unwrap(), "42");
        }
    }

    #[test]
    fn test_json_option_of_integer() {
        let codec = ValueCodec::new(SerializerFormat::Json, None, 0);

        let bytes = codec.encode(&Some(5i64)).unwrap().into_bytes();
        assert_eq!(bytes, b"5".to_vec());
        assert_eq!(codec.decode::<Option<i64>>(&bytes).unwrap(), Some(5));
    }

    #[test]
    fn test_msgpack_option_and_newtype_of_integer() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct UserId(u32);

        let codec = plain();

        let bytes = codec.encode(&Some(42i64)).unwrap().into_bytes();
        assert_eq!(bytes, b"42".to_vec());
        assert_eq!(codec.decode::<Option<i64>>(&bytes).unwrap(), Some(42));
        assert_eq!(codec.decode::<Option<i64>>(b"5").unwrap(), Some(5));

        let none = codec.encode(&None::<i64>).unwrap();
        assert!(!none.is_integer());
        assert_eq!(codec.decode::<Option<i64>>(&none.into_bytes()).unwrap(), None);

        let bytes = codec.encode(&UserId(7)).unwrap().into_bytes();
        assert_eq!(bytes, b"7".to_vec());
        assert_eq!(codec.decode::<UserId>(&bytes).unwrap(), UserId(7));
    }

    #[test]
    fn test_integer_out_of_range_is_an_error() {
        for serializer in [SerializerFormat::Msgpack, SerializerFormat::Json] {
            let codec = ValueCodec::new(serializer, None, 0);

            let err = codec.decode::<i32>(b"3000000000").unwrap_err();
            assert!(matches!(err, CodecError::Integer { .. }), "{serializer:?}: {err:?}");

            let err = codec.decode::<u64>(b"-5").unwrap_err();
            assert!(matches!(err, CodecError::Integer { .. }), "{serializer:?}: {err:?}");

            let max = u64::MAX.to_string();
            let err = codec.decode::<i64>(max.as_bytes()).unwrap_err();
            assert!(matches!(err, CodecError::Integer { .. }), "{serializer:?}: {err:?}");
        }
    }

    #[test]
    fn test_msgpack_rejects_trailing_bytes() {
        let codec = plain();
        let mut bytes = codec.encode("hello").unwrap().into_bytes();
        bytes.extend_from_slice(b"junk");

        let err = codec.decode::<String>(&bytes).unwrap_err();
        assert!(matches!(err, CodecError::TrailingBytes { len: 10, .. }));
    }

    #[test]
    fn test_stored_integer_into_string_is_an_error() {
        let err = plain().decode::<String>(b"42").unwrap_err();
        assert!(matches!(err, CodecError::Integer { .. }));
    }

    #[test]
    fn test_compression_kept_only_when_smaller() {
        let codec = compressing(100);

        let compressible = "a".repeat(150);
        let serialized = rmp_serde::to_vec_named(&compressible).unwrap();
        let encoded = codec.encode(&compressible).unwrap().into_bytes();
        assert!(encoded.len() < serialized.len());
        assert_eq!(codec.decode::<String>(&encoded).unwrap(), compressible);
    }

    /// Prepends a marker, so its output is always longer than its input
    #[derive(Debug)]
    struct ExpandingCompressor;

    impl Compressor for ExpandingCompressor {
        fn algorithm(&self) -> CompressionAlgorithm {
            CompressionAlgorithm::None
        }

        fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
            Ok([b"XPND".as_slice(), data].concat())
        }

        fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
            data.strip_prefix(b"XPND".as_slice())
                .map(<[u8]>::to_vec)
                .ok_or_else(|| {
                    CompressionError::decompress(
                        "xpnd",
                        std::io::Error::new(std::io::ErrorKind::InvalidData, "missing marker"),
                    )
                })
        }
    }

    #[test]
    fn test_expanding_compression_discarded() {
        let codec = ValueCodec::new(
            SerializerFormat::Msgpack,
            Some(Arc::new(ExpandingCompressor)),
            100,
        );
        let value = "q".repeat(150);

        let encoded = codec.encode(&value).unwrap().into_bytes();
        assert_eq!(encoded, rmp_serde::to_vec_named(&value).unwrap());
        assert_eq!(codec.decode::<String>(&encoded).unwrap(), value);
    }

    #[test]
    fn test_below_threshold_not_compressed() {
        let codec = compressing(1024);
        let value = "b".repeat(200);

        let encoded = codec.encode(&value).unwrap().into_bytes();
        assert_eq!(encoded, rmp_serde::to_vec_named(&value).unwrap());
    }

    #[test]
    fn test_decode_tolerates_uncompressed_values() {
        let writer = plain();
        let reader = compressing(10);

        let value = vec!["x".to_string(); 40];
        let bytes = writer.encode(&value).unwrap().into_bytes();
        assert_eq!(reader.decode::<Vec<String>>(&bytes).unwrap(), value);
    }

    #[test]
    fn test_compressed_values_unreadable_without_compression() {
        let writer = ValueCodec::new(
            SerializerFormat::Msgpack,
            Some(Arc::new(ZlibCompressor::default())),
            10,
        );
        let value = "z".repeat(500);
        let bytes = writer.encode(&value).unwrap().into_bytes();

        assert!(plain().decode::<String>(&bytes).is_err());
    }

    #[test]
    fn test_dynamic_json_values() {
        let codec = plain();

        let number = serde_json::json!(17);
        assert_eq!(codec.encode(&number).unwrap(), EncodedValue::Integer(17));
        assert_eq!(codec.decode::<serde_json::Value>(b"17").unwrap(), number);

        let object = serde_json::json!({"a": [1, 2.5, "x"], "b": null});
        let bytes = codec.encode(&object).unwrap().into_bytes();
        assert_eq!(codec.decode::<serde_json::Value>(&bytes).unwrap(), object);
    }
}
