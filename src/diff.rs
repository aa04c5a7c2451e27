use serde::Serialize;

use crate::types::{Field, FieldMap};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct FieldChange {
    pub field: Field,
    pub old: Option<String>,
    pub new: Option<String>,
}

/// Changes needed to turn `previous` into `current`, in field order.
pub(crate) fn diff_fields(previous: &FieldMap, current: &FieldMap) -> Vec<FieldChange> {
    Field::ALL
        .iter()
        .filter_map(|field| {
            let old = previous.get(field);
            let new = current.get(field);
            (old != new).then(|| FieldChange {
                field: *field,
                old: old.cloned(),
                new: new.cloned(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(Field, &str)]) -> FieldMap {
        pairs.iter().map(|(f, v)| (*f, v.to_string())).collect()
    }

    #[test]
    fn diff_detects_value_change() {
        let prev = map(&[(Field::RoomTemp, "19"), (Field::Mode, "thermo")]);
        let curr = map(&[(Field::RoomTemp, "20"), (Field::Mode, "thermo")]);
        let changes = diff_fields(&prev, &curr);
        assert_eq!(
            changes,
            vec![FieldChange {
                field: Field::RoomTemp,
                old: Some("19".into()),
                new: Some("20".into()),
            }]
        );
    }

    #[test]
    fn diff_ignores_unchanged() {
        let val = map(&[(Field::System, "on"), (Field::SetPoint, "21")]);
        assert!(diff_fields(&val, &val).is_empty());
    }

    #[test]
    fn diff_reports_added_and_removed_fields() {
        let prev = map(&[(Field::SetPoint, "21")]);
        let curr = map(&[(Field::System, "off")]);
        let changes = diff_fields(&prev, &curr);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].field, Field::System);
        assert_eq!(changes[0].old, None);
        assert_eq!(changes[1].field, Field::SetPoint);
        assert_eq!(changes[1].new, None);
    }
}
