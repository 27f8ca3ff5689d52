use std::collections::BTreeMap;

use doctrack_core::DocumentRecord;

/// Staff × department document counts plus both marginals.
///
/// Empty strings count as absent: a record contributes to a marginal only when
/// that field is non-empty, and to `pair_counts` only when both are.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregation {
    pub pair_counts: BTreeMap<(String, String), usize>,
    /// Sorted by staff name ascending.
    pub staff_totals: Vec<(String, usize)>,
    /// Sorted by count descending, then department name ascending.
    pub department_totals: Vec<(String, usize)>,
}

impl Aggregation {
    pub fn pair_count(&self, staff: &str, department: &str) -> usize {
        self.pair_counts
            .get(&(staff.to_string(), department.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn staff_total(&self, staff: &str) -> usize {
        lookup(&self.staff_totals, staff)
    }

    pub fn department_total(&self, department: &str) -> usize {
        lookup(&self.department_totals, department)
    }

    /// Sum of all staff totals.
    pub fn grand_total(&self) -> usize {
        self.staff_totals.iter().map(|(_, n)| n).sum()
    }
}

fn lookup(totals: &[(String, usize)], name: &str) -> usize {
    totals
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, count)| *count)
        .unwrap_or(0)
}

/// Group records by (staff, department) and by each dimension alone.
pub fn aggregate(records: &[DocumentRecord]) -> Aggregation {
    let mut pair_counts: BTreeMap<(String, String), usize> = BTreeMap::new();
    let mut staff: BTreeMap<&str, usize> = BTreeMap::new();
    let mut departments: BTreeMap<&str, usize> = BTreeMap::new();

    for record in records {
        let s = record.staff_name.as_str();
        let d = record.department.as_str();
        if !s.is_empty() {
            *staff.entry(s).or_insert(0) += 1;
        }
        if !d.is_empty() {
            *departments.entry(d).or_insert(0) += 1;
        }
        if !s.is_empty() && !d.is_empty() {
            *pair_counts.entry((s.to_string(), d.to_string())).or_insert(0) += 1;
        }
    }

    let staff_totals = staff.into_iter().map(|(k, v)| (k.to_string(), v)).collect();

    // BTreeMap iteration is name-ascending; a stable sort by count keeps that as the tie-break
    let mut department_totals: Vec<(String, usize)> =
        departments.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
    department_totals.sort_by(|a, b| b.1.cmp(&a.1));

    Aggregation { pair_counts, staff_totals, department_totals }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(staff: &str, dept: &str) -> DocumentRecord {
        DocumentRecord {
            staff_name: staff.into(),
            department: dept.into(),
            ..Default::default()
        }
    }

    #[test]
    fn basic_cross_tab() {
        let records = vec![
            rec("A", "X"),
            rec("A", "X"),
            rec("A", "Y"),
            rec("B", "X"),
        ];
        let agg = aggregate(&records);
        assert_eq!(agg.pair_count("A", "X"), 2);
        assert_eq!(agg.pair_count("A", "Y"), 1);
        assert_eq!(agg.pair_count("B", "Y"), 0);
        assert_eq!(agg.staff_totals, vec![("A".into(), 3), ("B".into(), 1)]);
        assert_eq!(agg.department_totals, vec![("X".into(), 3), ("Y".into(), 1)]);
        assert_eq!(agg.grand_total(), 4);
    }

    #[test]
    fn empty_fields_are_excluded_per_dimension() {
        let records = vec![rec("A", ""), rec("", "X"), rec("", ""), rec("A", "X")];
        let agg = aggregate(&records);
        assert_eq!(agg.staff_total("A"), 2);
        assert_eq!(agg.department_total("X"), 2);
        assert_eq!(agg.pair_counts.values().sum::<usize>(), 1);
        assert_eq!(agg.grand_total(), 2);
    }

    #[test]
    fn department_ties_break_by_name() {
        let records = vec![rec("A", "Z"), rec("A", "M"), rec("A", "B"), rec("A", "M")];
        let agg = aggregate(&records);
        let order: Vec<&str> = agg.department_totals.iter().map(|(d, _)| d.as_str()).collect();
        assert_eq!(order, ["M", "B", "Z"]);
    }

    #[test]
    fn staff_sorted_by_name() {
        let records = vec![rec("佐藤", "X"), rec("Abe", "X"), rec("佐藤", "X")];
        let agg = aggregate(&records);
        assert_eq!(agg.staff_totals[0].0, "Abe");
        assert_eq!(agg.staff_total("佐藤"), 2);
    }
}
