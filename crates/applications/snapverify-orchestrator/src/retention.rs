//! Retention of monthly snapshot repositories
//!
//! Only repositories named `MM-YYYY` are managed here. A repository's date is
//! the first day of its month; it is deleted when that date is strictly
//! before `now - retention_months`. Anything else is left alone.

use crate::cluster::ClusterApi;
use crate::error::{Result, VerifyError};
use chrono::{DateTime, Months, NaiveDate, TimeZone, Utc};
use tracing::{error, info};

/// Default retention window in months
pub const DEFAULT_RETENTION_MONTHS: u32 = 3;

/// Parse a repository name of the form `MM-YYYY`
pub fn parse_repository_month(name: &str) -> Option<DateTime<Utc>> {
    let bytes = name.as_bytes();
    if bytes.len() != 7 || bytes[2] != b'-' {
        return None;
    }
    if !bytes[..2].iter().chain(&bytes[3..]).all(u8::is_ascii_digit) {
        return None;
    }

    let month: u32 = name[..2].parse().ok()?;
    let year: i32 = name[3..].parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, month, 1)?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

/// Start of the retention window
pub fn retention_cutoff(now: DateTime<Utc>, retention_months: u32) -> DateTime<Utc> {
    now.checked_sub_months(Months::new(retention_months))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Repository names that fall before the retention window
pub fn expired_repositories<'a>(
    names: impl IntoIterator<Item = &'a str>,
    now: DateTime<Utc>,
    retention_months: u32,
) -> Vec<String> {
    let cutoff = retention_cutoff(now, retention_months);
    let mut expired: Vec<String> = names
        .into_iter()
        .filter(|name| parse_repository_month(name).is_some_and(|date| date < cutoff))
        .map(str::to_string)
        .collect();
    expired.sort();
    expired
}

/// Deletes expired snapshot repositories
pub struct RetentionPruner {
    api: ClusterApi,
    retention_months: u32,
}

impl RetentionPruner {
    /// Create a pruner with a retention window
    pub fn new(api: ClusterApi, retention_months: u32) -> Self {
        Self {
            api,
            retention_months,
        }
    }

    /// Delete every expired repository
    ///
    /// Each deletion is attempted even if an earlier one fails; failures are
    /// reported together as `RetentionFailed`. Returns the deleted names.
    pub async fn prune(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let cutoff = retention_cutoff(now, self.retention_months);
        info!(
            cutoff = %cutoff.format("%m-%Y"),
            retention_months = self.retention_months,
            "Removing backups older than cutoff"
        );

        let repositories = self.api.list_repositories().await?;
        let expired = expired_repositories(
            repositories.iter().map(String::as_str),
            now,
            self.retention_months,
        );

        let mut removed = Vec::new();
        let mut failed = Vec::new();
        for repository in expired {
            info!(repository = %repository, "Removing expired backup repository");
            match self.api.delete_repository(&repository).await {
                Ok(()) => removed.push(repository),
                Err(e) => {
                    error!(repository = %repository, error = %e, "Failed to remove backup repository");
                    failed.push(repository);
                }
            }
        }

        if failed.is_empty() {
            Ok(removed)
        } else {
            Err(VerifyError::RetentionFailed {
                repositories: failed,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_repository_month() {
        assert_eq!(
            parse_repository_month("03-2024"),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_repository_month("13-2024"), None);
        assert_eq!(parse_repository_month("00-2024"), None);
        assert_eq!(parse_repository_month("3-2024"), None);
        assert_eq!(parse_repository_month("03/2024"), None);
        assert_eq!(parse_repository_month("+3-2024"), None);
        assert_eq!(parse_repository_month("legacy-backups"), None);
        assert_eq!(parse_repository_month(""), None);
    }

    #[test]
    fn test_expired_repositories() {
        let names = ["11-2023", "12-2023", "01-2024", "02-2024", "03-2024", "nightly", "2023-11"];
        let expired = expired_repositories(names, at(2024, 3, 15), 3);

        // cutoff is 2023-12-15; 12-2023 starts on the 1st, before it
        assert_eq!(expired, vec!["11-2023".to_string(), "12-2023".to_string()]);
    }

    #[test]
    fn test_cutoff_clamps_month_end() {
        assert_eq!(
            retention_cutoff(at(2024, 5, 31), 3),
            at(2024, 2, 29)
        );
    }

    #[test]
    fn test_nothing_expired_without_dated_repos() {
        assert!(expired_repositories(["foo", "bar"], at(2024, 3, 15), 3).is_empty());
    }
}
