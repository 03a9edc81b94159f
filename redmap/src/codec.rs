use crate::{AppError, Attributes};
use serde_json::Value;

pub const DEFAULT_PREFIX: &str = "db:";
/// Record attribute naming the originating model kind in polymorphic tables.
pub const CLASS_ATTRIBUTE: &str = "__class";
/// Query parameter distinguishing a detached attribute key from its record key.
pub const ATTRIBUTE_PARAM: &str = "__attr";

/// Maps table names and attribute subsets to storage keys, and attribute maps to stored bytes.
///
/// Keys have the shape `<prefix><table>?<query>` where the query is the attribute subset sorted
/// by name and form-encoded, e.g. `db:Project?owner_id=test&status=done`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyCodec {
    prefix: String,
}

impl Default for KeyCodec {
    fn default() -> Self {
        KeyCodec::new(DEFAULT_PREFIX)
    }
}

impl KeyCodec {
    pub fn new(prefix: impl Into<String>) -> Self {
        KeyCodec { prefix: prefix.into() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn build_key(&self, table: &str, attrs: &Attributes) -> Result<String, AppError> {
        self.build_key_from(table, attrs.iter().map(|(k, v)| (k.as_str(), v)))
    }

    /// Same as [`build_key`](Self::build_key) for pairs in arbitrary order.
    pub fn build_key_from<'a, I>(&self, table: &str, attrs: I) -> Result<String, AppError>
    where
        I: IntoIterator<Item = (&'a str, &'a Value)>,
    {
        let mut pairs: Vec<(&str, &Value)> = attrs.into_iter().collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0));
        let mut query = String::new();
        for (name, value) in pairs {
            if let Some(encoded) = query_value(name, value)? {
                if !query.is_empty() {
                    query.push('&');
                }
                query.push_str(&form_encode(name));
                query.push('=');
                query.push_str(&form_encode(&encoded));
            }
        }
        Ok(format!("{}{}?{}", self.prefix, table, query))
    }

    /// Splits a key produced by [`build_key`](Self::build_key) back into its table and attributes.
    /// Attribute values come back as strings.
    pub fn parse_key(&self, key: &str) -> Result<(String, Attributes), AppError> {
        let rest = key
            .strip_prefix(self.prefix.as_str())
            .ok_or_else(|| AppError::InvalidModelEncoding(format!("key {key} lacks prefix {}", self.prefix)))?;
        let (table, query) = rest
            .split_once('?')
            .ok_or_else(|| AppError::InvalidModelEncoding(format!("key {key} lacks a query separator")))?;
        let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query)
            .map_err(|e| AppError::InvalidModelEncoding(format!("key {key}: {e}")))?;
        let attrs = pairs.into_iter().map(|(k, v)| (k, Value::String(v))).collect();
        Ok((table.to_string(), attrs))
    }

    /// Key of one attribute stored outside its record, next to the record key.
    pub fn attribute_key(&self, table: &str, primary_key: &Attributes, attr: &str) -> Result<String, AppError> {
        let marker = Value::String(attr.to_string());
        let pairs = primary_key.iter().map(|(k, v)| (k.as_str(), v)).chain(std::iter::once((ATTRIBUTE_PARAM, &marker)));
        self.build_key_from(table, pairs)
    }

    /// Counter key used for sequential ids, `<prefix>unique:<table>:<attr>`.
    pub fn counter_key(&self, table: &str, attr: &str) -> String {
        format!("{}unique:{}:{}", self.prefix, table, attr)
    }

    pub fn encode_record(&self, attrs: &Attributes) -> Result<Vec<u8>, AppError> {
        Ok(serde_json::to_vec(attrs)?)
    }

    pub fn decode_record(&self, key: &str, bytes: &[u8]) -> Result<Attributes, AppError> {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(Value::Object(map)) => Ok(map.into_iter().collect()),
            Ok(other) => Err(AppError::corrupt(key, format!("expected a JSON object, got {other}"))),
            Err(e) => Err(AppError::corrupt(key, e)),
        }
    }

    pub fn encode_value(&self, value: &Value) -> Result<Vec<u8>, AppError> {
        Ok(serde_json::to_vec(value)?)
    }

    pub fn decode_value(&self, key: &str, bytes: &[u8]) -> Result<Value, AppError> {
        serde_json::from_slice(bytes).map_err(|e| AppError::corrupt(key, e))
    }
}

// Scalars render as query text: bools as 1/0, nulls dropped.
fn query_value(name: &str, value: &Value) -> Result<Option<String>, AppError> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(if *b { "1" } else { "0" }.to_string())),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Array(_) | Value::Object(_) => {
            Err(AppError::InvalidModelEncoding(format!("attribute {name} is not a scalar and cannot be part of a key")))
        }
    }
}

// RFC 1738 style: only alphanumerics and `-_.` stay raw, so `*` and `~` are escaped unlike application/x-www-form-urlencoded.
fn form_encode(s: &str) -> String {
    urlencoding::encode(s).replace("%20", "+").replace('~', "%7E")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn it_should_build_primary_key() {
        let codec = KeyCodec::default();
        assert_eq!(codec.build_key("Project", &attrs! { "id" => "test" }).unwrap(), "db:Project?id=test");
    }

    #[test]
    fn it_should_sort_attributes_alphabetically() {
        let codec = KeyCodec::default();
        let status = json!("done");
        let owner = json!("test");
        let key = codec.build_key_from("Project", vec![("status", &status), ("owner_id", &owner)]).unwrap();
        assert_eq!(key, "db:Project?owner_id=test&status=done");
    }

    #[test]
    fn empty_attributes_leave_a_bare_separator() {
        let codec = KeyCodec::default();
        assert_eq!(codec.build_key("Project", &Attributes::new()).unwrap(), "db:Project?");
    }

    #[test]
    fn values_are_form_encoded() {
        let codec = KeyCodec::new("app:");
        // 1) spaces become '+', reserved characters are percent-encoded
        let key = codec.build_key("User", &attrs! { "name" => "a b&c=d~" }).unwrap();
        assert_eq!(key, "app:User?name=a+b%26c%3Dd%7E");
        // 2) '*' is escaped too
        let key = codec.build_key("User", &attrs! { "name" => "x*y-z_w.v" }).unwrap();
        assert_eq!(key, "app:User?name=x%2Ay-z_w.v");
        // 3) booleans and numbers render as text, nulls are dropped
        let key = codec.build_key("User", &attrs! { "active" => true, "age" => 42, "nick" => null }).unwrap();
        assert_eq!(key, "app:User?active=1&age=42");
    }

    #[test]
    fn nested_values_cannot_be_keyed() {
        let codec = KeyCodec::default();
        let err = codec.build_key("Project", &attrs! { "tags" => ["a", "b"] }).unwrap_err();
        assert!(matches!(err, AppError::InvalidModelEncoding(_)));
    }

    #[test]
    fn it_should_parse_keys_back() {
        let codec = KeyCodec::default();
        let key = codec.build_key("Project", &attrs! { "owner_id" => "a b", "status" => "done&dusted" }).unwrap();
        let (table, attrs) = codec.parse_key(&key).unwrap();
        assert_eq!(table, "Project");
        assert_eq!(attrs, attrs! { "owner_id" => "a b", "status" => "done&dusted" });
        assert!(codec.parse_key("other:Project?id=1").is_err());
        assert!(codec.parse_key("db:Project").is_err());
    }

    #[test]
    fn attribute_keys_extend_the_record_key() {
        let codec = KeyCodec::default();
        let key = codec.attribute_key("Project", &attrs! { "id" => "7" }, "body").unwrap();
        assert_eq!(key, "db:Project?__attr=body&id=7");
        assert_eq!(codec.counter_key("Project", "id"), "db:unique:Project:id");
    }

    #[test]
    fn decoding_garbage_is_a_corrupt_record() {
        let codec = KeyCodec::default();
        // 1) not JSON at all
        let err = codec.decode_record("db:Project?id=1", b"\x00\x01garbage").unwrap_err();
        assert!(matches!(err, AppError::CorruptRecord { ref key, .. } if key == "db:Project?id=1"));
        // 2) JSON but not an object
        let err = codec.decode_record("db:Project?id=1", b"[1,2]").unwrap_err();
        assert!(matches!(err, AppError::CorruptRecord { .. }));
    }

    fn scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<i64>().prop_map(Value::from),
            any::<bool>().prop_map(Value::Bool),
            "[a-zA-Z0-9 _~%&=?+-]{0,12}".prop_map(Value::String),
            Just(Value::Null),
        ]
    }

    fn attribute() -> impl Strategy<Value = Value> {
        prop_oneof![
            4 => scalar(),
            1 => proptest::collection::vec(scalar(), 0..3).prop_map(Value::from),
        ]
    }

    proptest! {
        #[test]
        fn key_ignores_attribute_order(pairs in proptest::collection::btree_map("[a-z_]{1,8}", scalar(), 0..6)) {
            let codec = KeyCodec::default();
            let forward: Vec<(&str, &Value)> = pairs.iter().map(|(k, v)| (k.as_str(), v)).collect();
            let mut backward = forward.clone();
            backward.reverse();
            let a = codec.build_key_from("Project", forward).unwrap();
            let b = codec.build_key_from("Project", backward).unwrap();
            prop_assert_eq!(a, b);
        }

        #[test]
        fn records_survive_encoding(attrs in proptest::collection::btree_map("[a-zA-Z_]{1,8}", attribute(), 0..8)) {
            let codec = KeyCodec::default();
            let bytes = codec.encode_record(&attrs).unwrap();
            prop_assert_eq!(codec.decode_record("k", &bytes).unwrap(), attrs);
        }
    }
}
