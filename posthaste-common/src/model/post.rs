use crate::model::{Id, tags::Tags, user::UserMarker};
use serde::{
    Deserialize, Deserializer, Serialize,
    de::{Error, Unexpected},
};
use thiserror::Error;
use url::Url;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct PostMarker;

/// A request to create a post, handed to the `posts` queue for persistence elsewhere.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostEvent {
    pub title: PostTitle,
    pub content: Option<String>,
    pub user_id: Id<UserMarker>,
    pub tags: Tags,
    pub asset_url: Option<Url>,
}

/// A request to remove a post, handed to the `posts-deletion` queue.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct DeletionEvent {
    pub id: Id<PostMarker>,
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize)]
#[serde(transparent)]
pub struct PostTitle(String);

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("Title is required")]
pub struct EmptyTitleError;

impl PostTitle {
    pub fn new(title: impl Into<String>) -> Result<Self, EmptyTitleError> {
        let title = title.into();
        if title.is_empty() {
            Err(EmptyTitleError)
        } else {
            Ok(PostTitle(title))
        }
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl<'de> Deserialize<'de> for PostTitle {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let inner = String::deserialize(deserializer)?;
        PostTitle::new(inner)
            .map_err(|_| Error::invalid_value(Unexpected::Str(""), &"a non-empty PostTitle"))
    }
}

#[cfg(test)]
mod tests {
    use crate::model::{
        Id,
        post::{DeletionEvent, EmptyTitleError, PostEvent, PostTitle},
        tags::Tags,
    };
    use serde_json::json;

    fn hello_post() -> PostEvent {
        PostEvent {
            title: PostTitle::new("Hello").unwrap(),
            content: None,
            user_id: Id::new("u1").unwrap(),
            tags: Tags::default(),
            asset_url: None,
        }
    }

    #[test]
    fn empty_titles_are_rejected() {
        assert_eq!(PostTitle::new(""), Err(EmptyTitleError));
        assert!(serde_json::from_value::<PostTitle>(json!("")).is_err());
    }

    #[test]
    fn post_event_wire_format() {
        let value = serde_json::to_value(hello_post()).unwrap();

        assert_eq!(
            value,
            json!({
                "title": "Hello",
                "content": null,
                "userId": "u1",
                "tags": [],
                "assetUrl": null,
            })
        );
    }

    #[test]
    fn post_event_survives_the_queue() {
        let post = PostEvent {
            content: Some("Body text".to_owned()),
            tags: Tags::new(vec!["rust".to_owned(), "queues".to_owned()]),
            asset_url: Some("https://assets.example.com/posts/abc".parse().unwrap()),
            ..hello_post()
        };

        let bytes = serde_json::to_vec(&post).unwrap();
        let decoded: PostEvent = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(decoded, post);
    }

    #[test]
    fn deletion_event_wire_format() {
        let event = DeletionEvent {
            id: Id::new("p-17").unwrap(),
        };

        assert_eq!(serde_json::to_value(&event).unwrap(), json!({ "id": "p-17" }));

        let numeric: DeletionEvent = serde_json::from_value(json!({ "id": 17 })).unwrap();
        assert_eq!(serde_json::to_vec(&numeric).unwrap(), br#"{"id":17}"#);
    }
}
