//! redb table definitions for the embedded store.
//!
//! Keys mirror the Redis layout so both backends agree on naming.

use redb::TableDefinition;

/// Group field hashes (JSON object of string fields) keyed by group name.
pub const GROUPS: TableDefinition<&str, &[u8]> = TableDefinition::new("groups");

/// Group-name index; value is the unix second the name was indexed.
pub const GROUP_INDEX: TableDefinition<&str, u64> = TableDefinition::new("group_index");

/// Raw status JSON keyed by full status key (`{namespace}{name}`).
pub const STATUSES: TableDefinition<&str, &[u8]> = TableDefinition::new("statuses");
