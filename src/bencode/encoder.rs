//! Bencode encoder.
//!
//! Dictionaries are emitted with keys in lexicographic byte order; the
//! info-hash computation of every client depends on canonical ordering, so
//! this is a protocol requirement, not a style choice. Integers come out
//! in shortest decimal form.
use super::Value;

pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(&mut out, value);
    out
}

pub fn encode_into(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Int(i) => {
            out.push(b'i');
            out.extend_from_slice(i.to_string().as_bytes());
            out.push(b'e');
        }
        Value::Bytes(s) => encode_bytes(out, s),
        Value::List(list) => {
            out.push(b'l');
            for item in list {
                encode_into(out, item);
            }
            out.push(b'e');
        }
        Value::Dict(dict) => {
            out.push(b'd');
            // BTreeMap iterates in key order, which is the wire order.
            for (key, item) in dict {
                encode_bytes(out, key);
                encode_into(out, item);
            }
            out.push(b'e');
        }
    }
}

fn encode_bytes(out: &mut Vec<u8>, s: &[u8]) {
    out.extend_from_slice(s.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(s);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::{decode, Value};
    use std::collections::BTreeMap;

    fn dict(entries: Vec<(&[u8], Value)>) -> Value {
        Value::Dict(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_vec(), v))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    #[test]
    fn encodes_scalars() {
        assert_eq!(encode(&Value::Int(42)), b"i42e");
        assert_eq!(encode(&Value::Int(-1)), b"i-1e");
        assert_eq!(encode(&Value::Int(0)), b"i0e");
        assert_eq!(encode(&Value::Bytes(b"spam".to_vec())), b"4:spam");
        assert_eq!(encode(&Value::Bytes(Vec::new())), b"0:");
    }

    #[test]
    fn encodes_dict_keys_sorted() {
        let v = dict(vec![
            (b"zebra", Value::Int(1)),
            (b"apple", Value::Int(2)),
            (b"mango", Value::List(vec![Value::Bytes(b"x".to_vec())])),
        ]);
        assert_eq!(encode(&v), b"d5:applei2e5:mangol1:xe5:zebrai1ee");
    }

    #[test]
    fn round_trips_through_decoder() {
        let v = dict(vec![
            (b"foo", Value::Bytes(b"bar".to_vec())),
            (b"n", Value::Int(-7)),
            (
                b"nested",
                dict(vec![(b"list", Value::List(vec![Value::Int(1), Value::Int(2)]))]),
            ),
        ]);
        let bytes = encode(&v);
        let decoded = Value::Dict(decode(&bytes).unwrap().into_root());
        assert_eq!(decoded, v);
        // Encoder output is already canonical, so a second trip is stable.
        assert_eq!(encode(&decoded), bytes);
    }

    #[test]
    fn scenario_literals_round_trip() {
        let doc = decode(b"d3:foo3:bare").unwrap();
        let v = Value::Dict(doc.into_root());
        assert_eq!(encode(&v), b"d3:foo3:bare");
    }
}
