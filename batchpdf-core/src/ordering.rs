//! Ordering of group members by their numeric extension.
//!
//! A member name looks like `<base>.<n>`, possibly prefixed by directory
//! components when it comes from an archive (`reports/EPABig.003`). Only the
//! final component is inspected.

use crate::error::OrderingError;

/// Final path component, accepting both separators since archive entry names
/// always use `/` while directory listings may not.
pub fn file_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

/// Text after the last `.` of the file name, without the dot.
pub fn extension(name: &str) -> Option<&str> {
    let file = file_name(name);
    file.rfind('.').map(|idx| &file[idx + 1..])
}

/// File name with its last extension removed. This is the grouping key.
pub fn base_name(name: &str) -> &str {
    let file = file_name(name);
    match file.rfind('.') {
        Some(idx) => &file[..idx],
        None => file,
    }
}

/// Integer value of the member's extension, any digit width (`7`, `007`).
pub fn numeric_extension(name: &str) -> Result<i64, OrderingError> {
    extension(name)
        .and_then(|ext| ext.trim().parse::<i64>().ok())
        .ok_or_else(|| OrderingError::MalformedMemberName {
            member: name.to_string(),
        })
}

/// Sort members ascending by numeric extension.
///
/// Fails on the first member without an integer extension; nothing is
/// returned for a partially valid group.
pub fn order_members<S: AsRef<str>>(members: &[S]) -> Result<Vec<String>, OrderingError> {
    let mut keyed = members
        .iter()
        .map(|m| numeric_extension(m.as_ref()).map(|n| (n, m.as_ref().to_string())))
        .collect::<Result<Vec<_>, _>>()?;
    keyed.sort_by_key(|(n, _)| *n);
    Ok(keyed.into_iter().map(|(_, m)| m).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_integer_value_not_lexically() {
        let ordered = order_members(&["EPA.10", "EPA.2", "EPA.1"]).unwrap();
        assert_eq!(ordered, vec!["EPA.1", "EPA.2", "EPA.10"]);
    }

    #[test]
    fn zero_padded_and_unpadded_extensions_mix() {
        let ordered = order_members(&["a.003", "a.2", "a.001"]).unwrap();
        assert_eq!(ordered, vec!["a.001", "a.2", "a.003"]);
    }

    #[test]
    fn result_is_independent_of_input_order() {
        let forward = order_members(&["k.1", "k.2", "k.3", "k.4"]).unwrap();
        let reversed = order_members(&["k.4", "k.3", "k.2", "k.1"]).unwrap();
        let shuffled = order_members(&["k.3", "k.1", "k.4", "k.2"]).unwrap();
        assert_eq!(forward, reversed);
        assert_eq!(forward, shuffled);
        assert_eq!(order_members(&forward[..]).unwrap(), forward);
    }

    #[test]
    fn non_numeric_extension_is_malformed() {
        let err = order_members(&["A.1", "A.x"]).unwrap_err();
        assert_eq!(
            err,
            OrderingError::MalformedMemberName {
                member: "A.x".into()
            }
        );
    }

    #[test]
    fn missing_extension_is_malformed() {
        assert!(order_members(&["README"]).is_err());
        assert!(order_members(&["trailing."]).is_err());
    }

    #[test]
    fn directory_components_are_ignored() {
        assert_eq!(base_name("reports/2020.v1/EPA.003"), "EPA");
        assert_eq!(numeric_extension("reports/2020.v1/EPA.003").unwrap(), 3);
        assert_eq!(base_name("dir\\B.7"), "B");
        assert_eq!(base_name("plain"), "plain");
    }

    #[test]
    fn empty_group_orders_to_empty() {
        let empty: [&str; 0] = [];
        assert!(order_members(&empty).unwrap().is_empty());
    }
}
