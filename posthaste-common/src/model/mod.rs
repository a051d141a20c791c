pub mod asset;
pub mod post;
pub mod tags;
pub mod user;

use serde::{
    Deserialize, Deserializer, Serialize,
    de::{Error, Unexpected},
};
use std::{fmt::Display, marker::PhantomData};
use thiserror::Error;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("Identifiers must not be empty or zero")]
pub struct EmptyIdError;

/// An opaque identifier as it arrives from clients.
///
/// Clients send ids either as strings or as plain JSON numbers. The JSON type is kept, so
/// an id is handed on exactly the way it was received.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RawId {
    Text(String),
    Unsigned(u64),
    Signed(i64),
}

impl RawId {
    /// Empty text and the number zero do not identify anything.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        match self {
            RawId::Text(text) => text.is_empty(),
            RawId::Unsigned(number) => *number == 0,
            RawId::Signed(number) => *number == 0,
        }
    }
}

impl Display for RawId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawId::Text(text) => f.write_str(text),
            RawId::Unsigned(number) => Display::fmt(number, f),
            RawId::Signed(number) => Display::fmt(number, f),
        }
    }
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize)]
#[serde(transparent)]
pub struct Id<Marker>(RawId, #[serde(skip)] PhantomData<Marker>);

impl<Marker> Id<Marker> {
    pub fn new(id: impl Into<String>) -> Result<Self, EmptyIdError> {
        Self::try_from(RawId::Text(id.into()))
    }

    #[must_use]
    pub fn get(&self) -> &RawId {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> RawId {
        self.0
    }
}

impl<Marker> Display for Id<Marker> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl<Marker> TryFrom<RawId> for Id<Marker> {
    type Error = EmptyIdError;

    fn try_from(value: RawId) -> Result<Self, Self::Error> {
        if value.is_blank() {
            Err(EmptyIdError)
        } else {
            Ok(Self(value, PhantomData))
        }
    }
}

impl<'de, Marker> Deserialize<'de> for Id<Marker> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawId::deserialize(deserializer)?;
        Id::try_from(raw).map_err(|_| {
            Error::invalid_value(Unexpected::Other("an empty or zero id"), &"a usable identifier")
        })
    }
}
