use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::entities::{Granularity, Period, Rollup, Session, Visit};
use crate::error::InvariantError;

/// Stands in for "no previous page" and "no next page" in transition maps.
pub const NO_PAGE: &str = "www";

/// Normalized frequency of each value, with `None` counted as [`NO_PAGE`].
pub fn distribution<'a, I>(values: I) -> BTreeMap<String, f64>
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut total = 0u64;
    for value in values {
        *counts.entry(value.unwrap_or(NO_PAGE).to_string()).or_default() += 1;
        total += 1;
    }
    counts
        .into_iter()
        .map(|(page, count)| (page, count as f64 / total as f64))
        .collect()
}

/// Mean of the present samples; a lone sample is its own mean.
pub fn mean<I>(samples: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let (sum, count) = samples
        .into_iter()
        .flatten()
        .fold((0.0, 0u32), |(sum, count), t| (sum + t, count + 1));
    (count > 0).then(|| sum / f64::from(count))
}

/// Average time on page and total length, in seconds, of one session's
/// visits (sorted by date). A single-visit session has no total.
pub fn session_times(visits: &[Visit]) -> (Option<f64>, Option<f64>) {
    let average = mean(visits.iter().map(|v| v.time_on_page));
    let total = match (visits.first(), visits.last()) {
        (Some(first), Some(last)) if visits.len() > 1 => {
            Some((last.date - first.date).num_milliseconds() as f64 / 1000.0)
        }
        _ => None,
    };
    (average, total)
}

/// Builds the session record for one session's visits.
pub fn summarize_session(visits: &[Visit]) -> Result<Session, InvariantError> {
    let first = visits.first().ok_or(InvariantError::EmptyPartition)?;
    let expected = Session::gsi2_pk(&first.ip, &first.session_start);
    if let Some(stray) = visits
        .iter()
        .find(|v| v.ip != first.ip || v.session_start != first.session_start)
    {
        return Err(InvariantError::SessionMismatch {
            expected,
            found: Session::gsi2_pk(&stray.ip, &stray.session_start),
        });
    }
    let (average_time, total_time) = session_times(visits);
    Ok(Session {
        ip: first.ip.clone(),
        session_start: first.session_start,
        average_time,
        total_time,
    })
}

/// Summarizes visits that all share one slug, one title and one period.
pub fn summarize(visits: &[Visit], period: Period) -> Result<Rollup, InvariantError> {
    let first = visits.first().ok_or(InvariantError::EmptyPartition)?;
    for visit in visits {
        if visit.slug != first.slug {
            return Err(InvariantError::SlugMismatch {
                expected: first.slug.clone(),
                found: visit.slug.clone(),
            });
        }
        if visit.title != first.title {
            return Err(InvariantError::TitleMismatch {
                expected: first.title.clone(),
                found: visit.title.clone(),
            });
        }
        if !period.contains(&visit.date) {
            return Err(InvariantError::PeriodMismatch {
                expected: period.to_string(),
                found: period.granularity().period_of(&visit.date).to_string(),
            });
        }
    }

    let visitors: HashSet<&str> = visits.iter().map(|v| v.ip.as_str()).collect();
    let churned = visits.iter().filter(|v| v.next_slug.is_none()).count();

    Ok(Rollup {
        slug: first.slug.clone(),
        title: first.title.clone(),
        period,
        number_visitors: visitors.len() as i64,
        average_time: mean(visits.iter().map(|v| v.time_on_page)),
        percent_churn: churned as f64 / visits.len() as f64,
        from_page: distribution(visits.iter().map(|v| v.prev_slug.as_deref())),
        to_page: distribution(visits.iter().map(|v| v.next_slug.as_deref())),
    })
}

/// Every page, day, week, month and year rollup for one page's visits.
///
/// A page keeps its slug across renames, so every rollup carries the title
/// of the most recent visit.
pub fn page_rollups(visits: &[Visit]) -> Result<Vec<Rollup>, InvariantError> {
    let Some(latest) = visits.iter().max_by_key(|v| v.date) else {
        return Ok(Vec::new());
    };
    let title = latest.title.clone();
    let mut rollups = Vec::new();
    for granularity in Granularity::ALL {
        let periods: BTreeSet<Period> = visits
            .iter()
            .map(|v| granularity.period_of(&v.date))
            .collect();
        for period in periods {
            let members: Vec<Visit> = visits
                .iter()
                .filter(|v| period.contains(&v.date))
                .map(|v| Visit {
                    title: title.clone(),
                    ..v.clone()
                })
                .collect();
            rollups.push(summarize(&members, period)?);
        }
    }
    Ok(rollups)
}
