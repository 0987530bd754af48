//! Provenance attributes stamped on every open.

use time::OffsetDateTime;

use crate::clock::iso8601;
use crate::format::Attributes;

pub const HISTORY: &str = "history";
pub const DATE_CREATED: &str = "date_created";
pub const DATE_MODIFIED: &str = "date_modified";
pub const DATE_ISSUED: &str = "date_issued";

/// Append `"<time>: <program>"` to `history`, refresh the modified and
/// issued dates, and set `date_created` when the file has no history yet.
pub fn stamp(attrs: &mut Attributes, program: &str, now: OffsetDateTime) {
    let at = iso8601(now);
    let line = format!("{at}: {program}\n");
    let existing = attrs
        .get(HISTORY)
        .and_then(|v| v.as_text())
        .map(str::to_string);
    match existing {
        Some(mut history) => {
            if !history.is_empty() && !history.ends_with('\n') {
                history.push('\n');
            }
            history.push_str(&line);
            attrs.set(HISTORY, history);
        }
        None => {
            attrs.set(DATE_CREATED, at.as_str());
            attrs.set(HISTORY, line);
        }
    }
    attrs.set(DATE_MODIFIED, at.as_str());
    attrs.set(DATE_ISSUED, at.as_str());
}
