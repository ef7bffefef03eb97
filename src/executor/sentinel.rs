//! Parses the `CSM-OUTPUT-DATA:<name>:<value>` line protocol steps use to
//! forward data to their dependents.

const SENTINEL_PREFIX: &str = "CSM-OUTPUT-DATA:";

/// Parses one line of step output. Returns `Some((name, value))` when the
/// line carries the sentinel.
///
/// The first colon after the prefix separates `name` from `value`; any
/// further colons belong to `value` verbatim, so
/// `CSM-OUTPUT-DATA:k:v:with:colons` yields `("k", "v:with:colons")`.
pub fn parse_output_data_line(line: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix(SENTINEL_PREFIX)?;
    let (name, value) = rest.split_once(':')?;
    Some((name.to_string(), value.to_string()))
}
