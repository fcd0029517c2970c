//! Canonical JSON serialization for signed payloads.
//!
//! Signatures must be reproducible by the receiving endpoint, so the byte
//! encoding of a payload has to be deterministic regardless of how either
//! side's JSON library orders map keys. The canonical form is:
//!
//! - object keys sorted lexicographically by UTF-8 byte order
//! - no insignificant whitespace
//! - array element order preserved
//! - strings and numbers escaped/formatted as by `serde_json`
//!
//! A verifier that parses the delivered body and re-serializes it with
//! these rules recovers the exact signed bytes.

use serde_json::Value;

/// Serialize a JSON value to its canonical byte representation.
#[must_use]
pub fn to_canonical_bytes(value: &Value) -> Vec<u8> {
    let mut out = Vec::with_capacity(128);
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Object(map) => {
            out.push(b'{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_scalar(out, &Value::String((*key).clone()));
                out.push(b':');
                write_value(out, &map[*key]);
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(out, item);
            }
            out.push(b']');
        }
        scalar => write_scalar(out, scalar),
    }
}

/// Scalars (null, bool, number, string) delegate to serde_json so escaping
/// and number formatting stay consistent with ordinary serialization.
fn write_scalar(out: &mut Vec<u8>, value: &Value) {
    match serde_json::to_vec(value) {
        Ok(bytes) => out.extend_from_slice(&bytes),
        // Scalar serialization is infallible in practice; keep the byte
        // stream valid JSON if it ever is not.
        Err(_) => out.extend_from_slice(b"null"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn canon(value: &Value) -> String {
        String::from_utf8(to_canonical_bytes(value)).expect("canonical bytes are UTF-8")
    }

    #[test]
    fn test_object_keys_sorted() {
        let value = json!({"zeta": 1, "alpha": 2, "mid": 3});
        assert_eq!(canon(&value), r#"{"alpha":2,"mid":3,"zeta":1}"#);
    }

    #[test]
    fn test_nested_objects_sorted() {
        let value = json!({"b": {"y": 1, "x": 2}, "a": [{"q": 1, "p": 2}]});
        assert_eq!(canon(&value), r#"{"a":[{"p":2,"q":1}],"b":{"x":2,"y":1}}"#);
    }

    #[test]
    fn test_array_order_preserved() {
        let value = json!([3, 1, 2]);
        assert_eq!(canon(&value), "[3,1,2]");
    }

    #[test]
    fn test_no_whitespace() {
        let value = json!({"event": "filing.submitted", "data": {"amount": 12.5}});
        let text = canon(&value);
        assert!(!text.contains(' '));
        assert!(!text.contains('\n'));
    }

    #[test]
    fn test_string_escaping_matches_serde() {
        let value = json!({"note": "line1\nline2 \"quoted\""});
        assert_eq!(canon(&value), r#"{"note":"line1\nline2 \"quoted\""}"#);
    }

    #[test]
    fn test_insertion_order_irrelevant() {
        let a: Value = serde_json::from_str(r#"{"x":1,"y":2,"z":3}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"z":3,"x":1,"y":2}"#).unwrap();
        assert_eq!(to_canonical_bytes(&a), to_canonical_bytes(&b));
    }

    #[test]
    fn test_scalars() {
        assert_eq!(canon(&json!(null)), "null");
        assert_eq!(canon(&json!(true)), "true");
        assert_eq!(canon(&json!(42)), "42");
        assert_eq!(canon(&json!("s")), r#""s""#);
    }

    #[test]
    fn test_reparse_roundtrip_is_stable() {
        let value = json!({"b": [1, {"d": 4, "c": 3}], "a": "x"});
        let bytes = to_canonical_bytes(&value);
        let reparsed: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(to_canonical_bytes(&reparsed), bytes);
    }
}
