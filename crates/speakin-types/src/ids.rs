use serde::{Deserialize, Deserializer};

/// Backend user ids are integer primary keys.
pub type UserId = u64;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Int(u64),
    Text(String),
}

/// Accepts an id rendered either as a JSON number or as a numeric string.
///
/// The chat consumer echoes the URL path segment verbatim in
/// `new_conversation` frames, so the same field arrives as `42` or `"42"`
/// depending on which side of the conversation opened the socket.
pub fn lenient<'de, D>(deserializer: D) -> Result<UserId, D::Error>
where
    D: Deserializer<'de>,
{
    match RawId::deserialize(deserializer)? {
        RawId::Int(id) => Ok(id),
        RawId::Text(text) => text
            .trim()
            .parse()
            .map_err(|e| serde::de::Error::custom(format!("invalid user id '{}': {}", text, e))),
    }
}

/// Same as [`lenient`] for optional fields.
pub fn lenient_opt<'de, D>(deserializer: D) -> Result<Option<UserId>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "lenient")] UserId);

    Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|Wrapper(id)| id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Probe {
        #[serde(deserialize_with = "lenient")]
        id: UserId,
        #[serde(default, deserialize_with = "lenient_opt")]
        other: Option<UserId>,
    }

    #[test]
    fn accepts_numbers_and_numeric_strings() {
        let a: Probe = serde_json::from_str(r#"{"id": 42}"#).unwrap();
        let b: Probe = serde_json::from_str(r#"{"id": "42", "other": "7"}"#).unwrap();
        assert_eq!(a.id, 42);
        assert_eq!(a.other, None);
        assert_eq!(b.id, 42);
        assert_eq!(b.other, Some(7));
    }

    #[test]
    fn rejects_non_numeric_strings() {
        let result = serde_json::from_str::<Probe>(r#"{"id": "abc"}"#);
        assert!(result.is_err());
    }
}
