//! Property tests for the key layout, value codec and hash slots

use clustercache::store::hash_slot::{TOTAL_SLOTS, hash_slot};
use clustercache::{
    CompressionAlgorithm, DefaultKeyFunction, DefaultVersion, KeyCodec, SerializerFormat,
    ValueCodec,
};
use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Record {
    name: String,
    values: Vec<i64>,
    flag: Option<bool>,
}

fn record_strategy() -> impl Strategy<Value = Record> {
    (
        any::<String>(),
        prop::collection::vec(any::<i64>(), 0..32),
        any::<Option<bool>>(),
    )
        .prop_map(|(name, values, flag)| Record { name, values, flag })
}

fn codec_strategy() -> impl Strategy<Value = ValueCodec> {
    let serializer = prop_oneof![Just(SerializerFormat::Msgpack), Just(SerializerFormat::Json)];
    let compressor = prop_oneof![
        Just(CompressionAlgorithm::None),
        Just(CompressionAlgorithm::Zlib),
        Just(CompressionAlgorithm::Lz4),
        Just(CompressionAlgorithm::Zstd),
    ];
    (serializer, compressor, 0usize..64).prop_map(|(serializer, compressor, min_len)| {
        ValueCodec::new(serializer, compressor.compressor(3), min_len)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Reversing a built key yields the logical key
    #[test]
    fn prop_key_reverse_roundtrip(
        prefix in "[a-z0-9_.]{0,12}",
        version in 1u64..1_000_000,
        key in "\\PC{0,40}",
    ) {
        let keys = KeyCodec::new(prefix, DefaultVersion::new(1), Arc::new(DefaultKeyFunction));
        let built = keys.build(key.as_str(), Some(version));

        prop_assert_eq!(built.version(), version);
        prop_assert_eq!(keys.reverse(built.as_str()), key);
    }

    /// Non-integer values survive encode/decode under every codec setup
    #[test]
    fn prop_record_roundtrip(codec in codec_strategy(), record in record_strategy()) {
        let encoded = codec.encode(&record).unwrap();
        prop_assert!(!encoded.is_integer());

        let decoded: Record = codec.decode(&encoded.into_bytes()).unwrap();
        prop_assert_eq!(decoded, record);
    }

    /// Strings never collide with the integer layout, even when they look numeric
    #[test]
    fn prop_string_roundtrip(
        codec in codec_strategy(),
        text in prop_oneof!["-?[0-9]{1,19}", any::<String>()],
    ) {
        let bytes = codec.encode(&text).unwrap().into_bytes();
        let decoded: String = codec.decode(&bytes).unwrap();
        prop_assert_eq!(decoded, text);
    }

    /// Integers are stored as their decimal text
    #[test]
    fn prop_integers_stored_verbatim(codec in codec_strategy(), n in any::<i64>(), u in any::<u64>()) {
        let bytes = codec.encode(&n).unwrap().into_bytes();
        prop_assert_eq!(&bytes, &n.to_string().into_bytes());
        prop_assert_eq!(codec.decode::<i64>(&bytes).unwrap(), n);

        let bytes = codec.encode(&u).unwrap().into_bytes();
        prop_assert_eq!(codec.decode::<u64>(&bytes).unwrap(), u);
    }

    /// Compression is only kept when it makes the payload smaller
    #[test]
    fn prop_compression_never_grows(record in record_strategy(), min_len in 1usize..64) {
        let plain = ValueCodec::new(SerializerFormat::Msgpack, None, 0);
        let compressing = ValueCodec::new(
            SerializerFormat::Msgpack,
            CompressionAlgorithm::Zlib.compressor(3),
            min_len,
        );

        let serialized = plain.encode(&record).unwrap().into_bytes();
        let stored = compressing.encode(&record).unwrap().into_bytes();
        prop_assert!(stored.len() <= serialized.len());
        if serialized.len() < min_len {
            prop_assert_eq!(stored, serialized);
        }
    }

    /// Hash slots are in range and honor hash tags
    #[test]
    fn prop_hash_slot_tags(
        head in "[a-z:]{0,8}",
        tag in "[a-z0-9]{1,8}",
        tail in "\\PC{0,16}",
    ) {
        let key = format!("{head}{{{tag}}}{tail}");
        prop_assert!(hash_slot(&key) < TOTAL_SLOTS);
        prop_assert_eq!(hash_slot(&key), hash_slot(&tag));
    }
}
