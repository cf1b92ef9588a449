//! Cadence arithmetic and the long-running scheduler loop.

use std::future::Future;

use chrono::{DateTime, Datelike, Days, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// How often the pipeline fires. Boundaries are midnight UTC; weekly runs
/// fire at the start of Sunday.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    Daily,
    #[default]
    Weekly,
}

impl Cadence {
    /// First boundary strictly after `after`.
    pub fn next_fire_after(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        let today = after.date_naive();
        let days_ahead = match self {
            Cadence::Daily => 1,
            Cadence::Weekly => {
                let since_sunday = u64::from(today.weekday().num_days_from_sunday());
                7 - since_sunday
            }
        };

        // On a Sunday (or any day, for daily) this lands a full interval
        // ahead, so a time exactly on the boundary moves to the next one.
        today.and_time(NaiveTime::MIN).and_utc() + Days::new(days_ahead)
    }
}

/// Drive `run_once` on every cadence boundary, forever. Missed intervals are
/// never replayed; a failing run is logged and the loop keeps going.
pub async fn run_forever<F, Fut, E>(cadence: Cadence, run_now: bool, mut run_once: F)
where
    F: FnMut(DateTime<Utc>) -> Fut,
    Fut: Future<Output = Result<bool, E>>,
    E: std::fmt::Display,
{
    if run_now {
        fire(Utc::now(), &mut run_once).await;
    }

    loop {
        let now = Utc::now();
        let next = cadence.next_fire_after(now);
        let wait = (next - now).to_std().unwrap_or_default();
        info!(next_run = %next, wait_secs = wait.as_secs(), "waiting for next scheduled run");
        tokio::time::sleep(wait).await;
        fire(next, &mut run_once).await;
    }
}

async fn fire<F, Fut, E>(logical_date: DateTime<Utc>, run_once: &mut F)
where
    F: FnMut(DateTime<Utc>) -> Fut,
    Fut: Future<Output = Result<bool, E>>,
    E: std::fmt::Display,
{
    match run_once(logical_date).await {
        Ok(true) => info!(%logical_date, "scheduled run succeeded"),
        Ok(false) => error!(%logical_date, "scheduled run finished with failed tasks"),
        Err(err) => error!(%logical_date, error = %err, "scheduled run could not start"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn weekly_fires_on_the_following_sunday() {
        // 2024-01-03 is a Wednesday.
        assert_eq!(
            Cadence::Weekly.next_fire_after(at(2024, 1, 3, 15, 30)),
            at(2024, 1, 7, 0, 0)
        );
        // Saturday late evening.
        assert_eq!(
            Cadence::Weekly.next_fire_after(at(2024, 1, 6, 23, 59)),
            at(2024, 1, 7, 0, 0)
        );
    }

    #[test]
    fn weekly_boundary_is_strictly_after() {
        assert_eq!(
            Cadence::Weekly.next_fire_after(at(2024, 1, 7, 0, 0)),
            at(2024, 1, 14, 0, 0)
        );
        assert_eq!(
            Cadence::Weekly.next_fire_after(at(2024, 1, 7, 0, 1)),
            at(2024, 1, 14, 0, 0)
        );
    }

    #[test]
    fn daily_fires_at_next_midnight() {
        assert_eq!(
            Cadence::Daily.next_fire_after(at(2024, 2, 28, 0, 0)),
            at(2024, 2, 29, 0, 0)
        );
        assert_eq!(
            Cadence::Daily.next_fire_after(at(2024, 12, 31, 18, 0)),
            at(2025, 1, 1, 0, 0)
        );
    }

    #[test]
    fn cadence_parses_from_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            cadence: Cadence,
        }
        let parsed: Wrapper = toml::from_str("cadence = \"daily\"").unwrap();
        assert_eq!(parsed.cadence, Cadence::Daily);
    }
}
