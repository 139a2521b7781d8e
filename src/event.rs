//! Decoder for inbound object-creation event payloads.
//!
//! A payload that is not an event envelope at all fails the whole
//! invocation; a record that is individually broken only fails that record.
use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::model::ReplicationRequest;

#[derive(Debug, Error)]
#[error("malformed event payload: {0}")]
pub struct MalformedEventError(pub String);

/// A record that could not be turned into a request. Carried to the
/// orchestrator so the record still gets an outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRecord {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedRecord {
    Request(ReplicationRequest),
    Malformed(MalformedRecord),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "Records")]
    records: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct S3Record {
    #[serde(rename = "eventTime", default)]
    event_time: Option<DateTime<Utc>>,
    s3: S3Entity,
}

#[derive(Debug, Deserialize)]
struct S3Entity {
    bucket: S3Bucket,
    object: S3Object,
}

#[derive(Debug, Deserialize)]
struct S3Bucket {
    name: String,
}

#[derive(Debug, Deserialize)]
struct S3Object {
    key: String,
    #[serde(default)]
    size: Option<u64>,
}

/// Decode an event payload into one entry per record, preserving record
/// order. An empty record list is a no-op invocation, not an error.
pub fn decode(payload: &Value) -> Result<Vec<DecodedRecord>, MalformedEventError> {
    let envelope: Envelope = serde_json::from_value(payload.clone())
        .map_err(|err| MalformedEventError(format!("payload is not an event envelope: {err}")))?;
    Ok(envelope
        .records
        .into_iter()
        .enumerate()
        .map(|(index, raw)| decode_record(index, raw))
        .collect())
}

fn decode_record(index: usize, raw: Value) -> DecodedRecord {
    let record: S3Record = match serde_json::from_value(raw) {
        Ok(record) => record,
        Err(err) => {
            return DecodedRecord::Malformed(MalformedRecord {
                index,
                reason: format!("unrecognized record shape: {err}"),
            })
        }
    };

    if record.s3.bucket.name.trim().is_empty() {
        return DecodedRecord::Malformed(MalformedRecord {
            index,
            reason: "record has an empty bucket name".into(),
        });
    }

    let object_key = match decode_object_key(&record.s3.object.key) {
        Ok(key) => key,
        Err(reason) => return DecodedRecord::Malformed(MalformedRecord { index, reason }),
    };
    if object_key.trim().is_empty() {
        return DecodedRecord::Malformed(MalformedRecord {
            index,
            reason: "record has an empty object key".into(),
        });
    }

    DecodedRecord::Request(ReplicationRequest {
        source_bucket: record.s3.bucket.name,
        object_key,
        size_bytes: record.s3.object.size,
        event_time: record.event_time,
    })
}

/// Object keys arrive form-URL-encoded: `+` is a space, the rest is
/// percent-encoded.
pub fn decode_object_key(raw: &str) -> Result<String, String> {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|key| key.into_owned())
        .map_err(|err| format!("object key is not valid UTF-8 after decoding: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(bucket: &str, key: &str, size: u64) -> Value {
        json!({
            "eventTime": "2024-03-01T12:00:00Z",
            "eventName": "ObjectCreated:Put",
            "s3": {
                "bucket": { "name": bucket },
                "object": { "key": key, "size": size }
            }
        })
    }

    #[test]
    fn decodes_wellformed_records_in_order() {
        let payload = json!({ "Records": [record("src", "a.txt", 1), record("src", "b.txt", 2)] });
        let decoded = decode(&payload).unwrap();
        assert_eq!(decoded.len(), 2);
        match (&decoded[0], &decoded[1]) {
            (DecodedRecord::Request(a), DecodedRecord::Request(b)) => {
                assert_eq!(a.object_key, "a.txt");
                assert_eq!(a.size_bytes, Some(1));
                assert!(a.event_time.is_some());
                assert_eq!(b.object_key, "b.txt");
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn url_decodes_object_keys() {
        let payload = json!({ "Records": [record("src", "reports/q1+final%241.csv", 7)] });
        let decoded = decode(&payload).unwrap();
        match &decoded[0] {
            DecodedRecord::Request(req) => assert_eq!(req.object_key, "reports/q1 final$1.csv"),
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn size_and_event_time_are_optional() {
        let payload = json!({
            "Records": [{ "s3": { "bucket": { "name": "src" }, "object": { "key": "k" } } }]
        });
        let decoded = decode(&payload).unwrap();
        match &decoded[0] {
            DecodedRecord::Request(req) => {
                assert_eq!(req.size_bytes, None);
                assert_eq!(req.event_time, None);
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn empty_records_is_a_noop() {
        let payload = json!({ "Records": [] });
        assert!(decode(&payload).unwrap().is_empty());
    }

    #[test]
    fn record_missing_key_is_malformed_not_fatal() {
        let payload = json!({
            "Records": [
                { "s3": { "bucket": { "name": "src" } } },
                record("src", "ok.txt", 3)
            ]
        });
        let decoded = decode(&payload).unwrap();
        assert_eq!(decoded.len(), 2);
        assert!(matches!(&decoded[0], DecodedRecord::Malformed(m) if m.index == 0));
        assert!(matches!(&decoded[1], DecodedRecord::Request(_)));
    }

    #[test]
    fn empty_bucket_name_is_malformed() {
        let payload = json!({ "Records": [record("  ", "k.txt", 1)] });
        let decoded = decode(&payload).unwrap();
        assert!(matches!(
            &decoded[0],
            DecodedRecord::Malformed(m) if m.reason.contains("bucket")
        ));
    }

    #[test]
    fn whole_payload_unparseable_is_fatal() {
        let err = decode(&json!("not an event")).unwrap_err();
        assert!(err.to_string().contains("not an event envelope"));
        assert!(decode(&json!({ "Detail": {} })).is_err());
    }
}
