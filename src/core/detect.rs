use crate::adapters::storage::split_location;
use std::path::Path;

/// Sentinel tag asking the orchestrator to pick a format from the location.
pub const AUTO: &str = "auto";

pub fn is_auto(tag: &str) -> bool {
    tag.eq_ignore_ascii_case(AUTO)
}

/// Maps a location's file suffix to a type tag.
pub fn detect(location: &str) -> Option<&'static str> {
    let (_, path) = split_location(location);
    let extension = Path::new(path).extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "csv" => Some("csv"),
        "json" => Some("json"),
        "xml" => Some("xml"),
        "sql" => Some("sql"),
        "xlsx" | "xls" => Some("excel"),
        _ => None,
    }
}
