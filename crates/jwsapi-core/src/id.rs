//! ID generation utilities.

use uuid::Uuid;

/// Generate a process-unique transaction id.
pub fn transaction_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a short random id (8 hex characters), used to label connections in logs.
pub fn short_id() -> String {
    let simple = Uuid::new_v4().simple().to_string();
    simple[..8].to_string()
}
