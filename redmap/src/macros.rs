/// Builds an [`Attributes`](crate::Attributes) map from `name => value` pairs,
/// values being anything `serde_json::json!` accepts.
///
/// ```
/// let attrs = redmap::attrs! { "owner_id" => "test", "status" => "done" };
/// assert_eq!(attrs.len(), 2);
/// ```
#[macro_export]
macro_rules! attrs {
    () => {
        $crate::Attributes::new()
    };
    ($($name:expr => $value:tt),+ $(,)?) => {{
        let mut attrs = $crate::Attributes::new();
        $(
            attrs.insert(::std::string::String::from($name), $crate::serde_json::json!($value));
        )+
        attrs
    }};
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    #[test]
    fn attrs_macro_builds_sorted_map() {
        let attrs = attrs! { "status" => "done", "owner_id" => "test", "n" => 3, "flag" => true };
        let names: Vec<&str> = attrs.keys().map(|k| k.as_str()).collect();
        assert_eq!(names, vec!["flag", "n", "owner_id", "status"]);
        assert_eq!(attrs["n"], json!(3));
        assert!(attrs! {}.is_empty());
    }
}
