use chrono::{NaiveDate, Utc};
use redis::aio::ConnectionManager;

use crate::error::Result;

/// Day counters are kept a little past midnight so late readers still see them.
const VISIT_KEY_TTL_SECS: i64 = 2 * 86400;

fn visit_key(day: NaiveDate) -> String {
    format!("visits:{}", day.format("%Y-%m-%d"))
}

/// Counts one successful live fetch against today's counter.
pub async fn record_visit(redis: &ConnectionManager) -> Result<()> {
    let key = visit_key(Utc::now().date_naive());

    let _: i64 = redis::cmd("INCR")
        .arg(&key)
        .query_async(&mut redis.clone())
        .await?;

    let _: () = redis::cmd("EXPIRE")
        .arg(&key)
        .arg(VISIT_KEY_TTL_SECS)
        .query_async(&mut redis.clone())
        .await?;

    Ok(())
}

/// Number of live fetches recorded today (UTC).
pub async fn today_count(redis: &ConnectionManager) -> Result<i64> {
    let count: Option<i64> = redis::cmd("GET")
        .arg(visit_key(Utc::now().date_naive()))
        .query_async(&mut redis.clone())
        .await?;
    Ok(count.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_per_day() {
        let day = NaiveDate::from_ymd_opt(2025, 7, 1).unwrap();
        assert_eq!(visit_key(day), "visits:2025-07-01");
    }
}
