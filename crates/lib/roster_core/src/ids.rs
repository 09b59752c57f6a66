// Helper for generating record identifiers.
//
// User ids double as bucket keys, so they are generated app-side as UUIDv7
// (timestamp-sortable) and stored as their hyphenated string form.

use uuid::Uuid;

/// Generate a new UUIDv7 (timestamp-sortable).
pub fn uuidv7() -> Uuid {
    Uuid::now_v7()
}

/// Generate a new user id as a string key.
pub fn new_user_id() -> String {
    uuidv7().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuidv7_is_valid() {
        let id = uuidv7();
        assert_eq!(id.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn user_ids_are_unique_and_parseable() {
        let a = new_user_id();
        let b = new_user_id();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(&a).is_ok());
    }
}
