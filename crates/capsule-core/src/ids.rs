use chrono::{SecondsFormat, Utc};
use uuid::Uuid;

/// Current time as RFC 3339 UTC with a `Z` suffix.
pub fn utc_now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// `{owner}/{uuidv7}` when the owner identity is known, else a bare uuidv7.
pub fn new_capsule_id(owner: Option<&str>) -> String {
    let id = Uuid::now_v7();
    match owner {
        Some(owner) if !owner.is_empty() => format!("{owner}/{id}"),
        _ => id.to_string(),
    }
}
