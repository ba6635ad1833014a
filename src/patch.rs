/// Field-level update semantics for partial JSON bodies
use serde::{Deserialize, Deserializer};

/// A field that was either left out of an update or given a value.
///
/// Use with `#[serde(default)]`: an absent key stays `Unset`, a present key
/// (including `null` when `T` is an `Option`) becomes `Set`.
#[derive(Debug, Clone, PartialEq)]
pub enum Patch<T> {
    Unset,
    Set(T),
}

impl<T> Default for Patch<T> {
    fn default() -> Self {
        Patch::Unset
    }
}

impl<T> Patch<T> {
    pub fn is_set(&self) -> bool {
        matches!(self, Patch::Set(_))
    }

    pub fn as_ref(&self) -> Patch<&T> {
        match self {
            Patch::Unset => Patch::Unset,
            Patch::Set(v) => Patch::Set(v),
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Patch::Unset => None,
            Patch::Set(v) => Some(v),
        }
    }

    /// The new value if set, otherwise `current`
    pub fn apply(self, current: T) -> T {
        match self {
            Patch::Unset => current,
            Patch::Set(v) => v,
        }
    }
}

impl<'de, T> Deserialize<'de> for Patch<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        T::deserialize(deserializer).map(Patch::Set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Body {
        #[serde(default)]
        date: Patch<Option<String>>,
        #[serde(default)]
        notes: Patch<String>,
    }

    #[test]
    fn test_absent_null_and_value_are_distinct() {
        let absent: Body = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.date, Patch::Unset);
        assert_eq!(absent.notes, Patch::Unset);

        let null: Body = serde_json::from_str(r#"{"date": null}"#).unwrap();
        assert_eq!(null.date, Patch::Set(None));

        let value: Body = serde_json::from_str(r#"{"date": "2026-01-01", "notes": ""}"#).unwrap();
        assert_eq!(value.date, Patch::Set(Some("2026-01-01".to_string())));
        assert_eq!(value.notes, Patch::Set(String::new()));
    }

    #[test]
    fn test_apply() {
        assert_eq!(Patch::Unset.apply(3), 3);
        assert_eq!(Patch::Set(5).apply(3), 5);
    }
}
