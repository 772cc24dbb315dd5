//! Lossless escaping of identifiers the store would reject
//!
//! Service and service-path values flow straight into database and collection
//! identifiers, and the store forbids a handful of characters there. The
//! codec replaces each forbidden character with `x` followed by its two-digit
//! hex code; a literal `x` is doubled so decoding never misreads one. Both
//! directions are deterministic, making the pair safe for offline rename
//! tooling that walks every database and collection.

/// Characters the store rejects inside database identifiers
const DATABASE_ESCAPED: &[char] = &['/', '\\', '.', ' ', '"', '$'];

/// Characters the store rejects inside collection identifiers
const COLLECTION_ESCAPED: &[char] = &['$'];

/// Characters that cannot appear in a stored field path
const FIELD_ESCAPED: &[char] = &['.', '$'];

fn encode(name: &str, escaped: &[char]) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c == 'x' {
            out.push_str("xx");
        } else if escaped.contains(&c) {
            out.push_str(&format!("x{:02x}", c as u32));
        } else {
            out.push(c);
        }
    }
    out
}

fn decode(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut chars = name.chars().peekable();
    while let Some(c) = chars.next() {
        if c != 'x' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('x') => {
                chars.next();
                out.push('x');
            }
            _ => {
                let high = chars.next();
                let low = chars.next();
                let escaped = high
                    .zip(low)
                    .and_then(|(h, l)| u32::from_str_radix(&format!("{h}{l}"), 16).ok())
                    .and_then(char::from_u32);
                match escaped {
                    Some(original) => out.push(original),
                    None => {
                        // Not a valid escape; keep the text as it came.
                        out.push('x');
                        if let Some(h) = high {
                            out.push(h);
                        }
                        if let Some(l) = low {
                            out.push(l);
                        }
                    }
                }
            }
        }
    }
    out
}

/// Encode a logical database name into its store-safe form
pub fn encode_database_name(name: &str) -> String {
    encode(name, DATABASE_ESCAPED)
}

/// Decode a store-safe database name back to its logical form
pub fn decode_database_name(name: &str) -> String {
    decode(name)
}

/// Encode a logical collection name into its store-safe form
pub fn encode_collection_name(name: &str) -> String {
    encode(name, COLLECTION_ESCAPED)
}

/// Decode a store-safe collection name back to its logical form
pub fn decode_collection_name(name: &str) -> String {
    decode(name)
}

/// Encode a categorical value for use as a stored field name
pub(crate) fn encode_field_name(name: &str) -> String {
    encode(name, FIELD_ESCAPED)
}

/// Decode a stored field name back to the categorical value
pub(crate) fn decode_field_name(name: &str) -> String {
    decode(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_round_trip() {
        let names = [
            "tm_factory",
            "tm_acme. corp",
            "with/slash\\and\"quote",
            "dollar$sign",
            "unexpected xliteral",
            "xx",
            "x2e-not-an-escape-source",
        ];
        for name in names {
            let encoded = encode_database_name(name);
            assert_eq!(decode_database_name(&encoded), name, "for {name:?}");
        }
    }

    #[test]
    fn test_collection_round_trip() {
        let names = ["tm_/floor1_press7", "pay$roll", "xylophone.aggr"];
        for name in names {
            let encoded = encode_collection_name(name);
            assert_eq!(decode_collection_name(&encoded), name, "for {name:?}");
        }
    }

    #[test]
    fn test_encoded_database_name_has_no_forbidden_characters() {
        let encoded = encode_database_name("a.b/c\\d e\"f$g");
        for c in DATABASE_ESCAPED {
            assert!(!encoded.contains(*c), "{c:?} left in {encoded:?}");
        }
    }

    #[test]
    fn test_collection_encoding_keeps_dots() {
        // Collection namespaces use dots; only `$` is rewritten.
        assert_eq!(encode_collection_name("tm_name.aggr"), "tm_name.aggr");
        assert_eq!(encode_collection_name("a$b"), "ax24b");
    }

    #[test]
    fn test_field_name_round_trip() {
        for value in ["plain", "v1.2.3", "$ref", "x-ray"] {
            let encoded = encode_field_name(value);
            assert!(!encoded.contains('.') && !encoded.contains('$'));
            assert_eq!(decode_field_name(&encoded), value);
        }
    }

    #[test]
    fn test_decode_tolerates_malformed_escapes() {
        assert_eq!(decode("truncated-x"), "truncated-x");
        assert_eq!(decode("xzq"), "xzq");
    }
}
