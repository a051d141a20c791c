use std::fmt::Display;
use uuid::Uuid;

/// Object store key of an uploaded post asset.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub struct AssetKey(Uuid);

impl AssetKey {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn get(self) -> Uuid {
        self.0
    }
}

impl Display for AssetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0.hyphenated(), f)
    }
}

impl From<Uuid> for AssetKey {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use crate::model::asset::AssetKey;

    #[test]
    fn generated_keys_are_fresh() {
        let first = AssetKey::generate();
        let second = AssetKey::generate();

        assert_ne!(first, second);
        assert_eq!(first.to_string().len(), 36);
    }
}
