// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::codec::{decode_record, encode_record};
use crate::error::KernelError;
use crate::types::labels::LabelSet;
use crate::types::record::LogRecord;
use crate::types::timestamp::Timestamp;

#[test]
fn test_record_roundtrip() {
    let labels = LabelSet::from_pairs(vec![("app", "api"), ("level", "warn")]).unwrap();
    let record = LogRecord::new(Timestamp(1_700_000_000_123_456_789), labels, vec![0u8, 159, 146, 150]);

    let bytes = encode_record(&record).unwrap();
    let decoded = decode_record(&bytes).unwrap();
    assert_eq!(decoded, record);
}

#[test]
fn test_decode_rejects_trailing_bytes() {
    let record = LogRecord::new(Timestamp(42), LabelSet::new(), "hello");
    let mut bytes = encode_record(&record).unwrap();
    bytes.push(0);

    assert!(matches!(decode_record(&bytes), Err(KernelError::Decode(_))));
}

#[test]
fn test_decode_rejects_truncation() {
    let record = LogRecord::new(Timestamp(42), LabelSet::new(), "hello world");
    let bytes = encode_record(&record).unwrap();

    assert!(decode_record(&bytes[..bytes.len() - 3]).is_err());
}

#[test]
fn test_encoded_len_tracks_message_len() {
    // Lengths below 251 use a one-byte varint prefix, so size grows 1:1.
    let short = encode_record(&LogRecord::new(Timestamp(7), LabelSet::new(), vec![b'a'; 10])).unwrap();
    let long = encode_record(&LogRecord::new(Timestamp(7), LabelSet::new(), vec![b'a'; 110])).unwrap();
    assert_eq!(long.len() - short.len(), 100);
}
