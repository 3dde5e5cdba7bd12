//! Common type definitions.
//!
//! All entity IDs are UUIDs wrapped in type aliases so signatures say which entity they expect.
//! UUIDs are generated in the service, never by the database, so both storage backends assign
//! identifiers the same way.

use uuid::Uuid;

pub type ProjectId = Uuid;
pub type ApiKeyId = Uuid;
pub type FunctionId = Uuid;
pub type InvocationRowId = Uuid;

/// Abbreviate a UUID to its first 8 characters for log fields.
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abbrev_uuid() {
        let id = Uuid::parse_str("a1b2c3d4-0000-4000-8000-000000000000").unwrap();
        assert_eq!(abbrev_uuid(&id), "a1b2c3d4");
    }
}
