use std::cmp::Ordering;
use std::fmt;

use crate::inference::ColumnMeta;

pub const CRITICAL_MISSING_THRESHOLD: f64 = 0.5;
pub const WARN_MISSING_THRESHOLD: f64 = 0.2;
pub const INFO_MISSING_THRESHOLD: f64 = 0.05;

const SUMMARY_SEPARATOR: &str = " · ";
const NO_ISSUES_SUMMARY: &str = "No significant data quality issues";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Info,
    Warn,
    Critical,
}

impl Severity {
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Critical => 3,
            Self::Warn => 2,
            Self::Info => 1,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Warn => "warn",
            Self::Info => "info",
        }
    }

    /// `None` when the fraction is too small to be worth reporting.
    #[must_use]
    pub fn for_missing_fraction(missing_fraction: f64) -> Option<Self> {
        if missing_fraction >= CRITICAL_MISSING_THRESHOLD {
            Some(Self::Critical)
        } else if missing_fraction >= WARN_MISSING_THRESHOLD {
            Some(Self::Warn)
        } else if missing_fraction > INFO_MISSING_THRESHOLD {
            Some(Self::Info)
        } else {
            None
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataQualityIssue {
    pub column: String,
    pub missing_fraction: f64,
    pub severity: Severity,
    pub message: String,
}

#[must_use]
pub fn compute_data_quality_issues(columns: &[ColumnMeta]) -> Vec<DataQualityIssue> {
    let mut issues = columns
        .iter()
        .filter(|column| column.missing_fraction > 0.0)
        .filter_map(|column| {
            let severity = Severity::for_missing_fraction(column.missing_fraction)?;
            Some(DataQualityIssue {
                column: column.name.clone(),
                missing_fraction: column.missing_fraction,
                severity,
                message: format!(
                    "{:.0}% of sampled rows are missing `{}`",
                    column.missing_fraction * 100.0,
                    column.name
                ),
            })
        })
        .collect::<Vec<_>>();

    issues.sort_by(|left, right| {
        right
            .severity
            .rank()
            .cmp(&left.severity.rank())
            .then_with(|| {
                right
                    .missing_fraction
                    .partial_cmp(&left.missing_fraction)
                    .unwrap_or(Ordering::Equal)
            })
    });
    issues
}

#[must_use]
pub fn summarize_issues(issues: &[DataQualityIssue]) -> String {
    if issues.is_empty() {
        return NO_ISSUES_SUMMARY.to_string();
    }

    [Severity::Critical, Severity::Warn, Severity::Info]
        .into_iter()
        .filter_map(|severity| {
            let count = issues
                .iter()
                .filter(|issue| issue.severity == severity)
                .count();
            (count > 0).then(|| format!("{count} {severity}"))
        })
        .collect::<Vec<_>>()
        .join(SUMMARY_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::{compute_data_quality_issues, summarize_issues, Severity};
    use crate::inference::{ColumnMeta, ColumnType};
    use crate::value::CellValue;

    fn column(name: &str, missing_fraction: f64) -> ColumnMeta {
        ColumnMeta {
            name: name.to_string(),
            column_type: ColumnType::String,
            nullable: missing_fraction > 0.0,
            sample_value: CellValue::Null,
            foreign_key: None,
            missing_fraction,
        }
    }

    #[test]
    fn issues_are_ordered_by_severity() {
        let columns = vec![
            column("complete", 0.0),
            column("mostly_empty", 0.55),
            column("patchy", 0.25),
            column("sparse", 0.08),
        ];

        let issues = compute_data_quality_issues(&columns);
        let severities = issues
            .iter()
            .map(|issue| issue.severity)
            .collect::<Vec<_>>();

        assert_eq!(
            severities,
            vec![Severity::Critical, Severity::Warn, Severity::Info]
        );
        assert!(issues[0].missing_fraction >= issues[1].missing_fraction);
        assert_eq!(issues[0].column, "mostly_empty");
        assert!(issues[0].message.contains("55%"));
    }

    #[test]
    fn small_gaps_are_not_reported() {
        let issues = compute_data_quality_issues(&[column("a", 0.05), column("b", 0.01)]);
        assert!(issues.is_empty());
    }

    #[test]
    fn ties_break_on_larger_fraction_first() {
        let issues = compute_data_quality_issues(&[column("a", 0.6), column("b", 0.9)]);
        assert_eq!(issues[0].column, "b");
        assert_eq!(issues[1].column, "a");
    }

    #[test]
    fn thresholds_are_inclusive_for_warn_and_critical() {
        assert_eq!(Severity::for_missing_fraction(0.5), Some(Severity::Critical));
        assert_eq!(Severity::for_missing_fraction(0.2), Some(Severity::Warn));
        assert_eq!(Severity::for_missing_fraction(0.06), Some(Severity::Info));
        assert_eq!(Severity::for_missing_fraction(0.05), None);
    }

    #[test]
    fn summary_counts_each_severity() {
        let issues = compute_data_quality_issues(&[
            column("a", 0.7),
            column("b", 0.8),
            column("c", 0.1),
        ]);
        assert_eq!(summarize_issues(&issues), "2 critical · 1 info");
        assert_eq!(summarize_issues(&[]), "No significant data quality issues");
    }
}
