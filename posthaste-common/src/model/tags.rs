use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Ordered labels attached to a post.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Tags(Vec<String>);

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("Tags must be a JSON array of strings: {0}")]
pub struct InvalidTagsError(String);

impl Tags {
    #[must_use]
    pub fn new(tags: Vec<String>) -> Self {
        Self(tags)
    }

    /// Reads the optional `tags` form field.
    ///
    /// A missing or empty field means no tags. Anything else has to be a JSON array of
    /// strings, malformed input is an error rather than an empty list.
    pub fn from_field(field: Option<&str>) -> Result<Self, InvalidTagsError> {
        match field {
            None | Some("") => Ok(Self::default()),
            Some(encoded) => encoded.parse(),
        }
    }

    #[must_use]
    pub fn get(&self) -> &[String] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<String> {
        self.0
    }
}

impl FromStr for Tags {
    type Err = InvalidTagsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str::<Vec<String>>(s)
            .map(Self)
            .map_err(|err| InvalidTagsError(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use crate::model::tags::Tags;

    #[test]
    fn absent_tags_are_empty() {
        assert!(Tags::from_field(None).unwrap().is_empty());
        assert!(Tags::from_field(Some("")).unwrap().is_empty());
    }

    #[test]
    fn tags_keep_their_order() {
        let tags = Tags::from_field(Some(r#"["b", "a", "b"]"#)).unwrap();
        assert_eq!(tags.get(), ["b", "a", "b"]);
    }

    #[test]
    fn malformed_tags_are_an_error() {
        for malformed in ["not json", "[\"open\"", "\"single\"", "[1, 2]", "{}", "  "] {
            assert!(
                Tags::from_field(Some(malformed)).is_err(),
                "{malformed:?} should be rejected"
            );
        }
    }
}
