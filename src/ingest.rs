//! Ingestion: turns an export into visitor, session, visit and browser
//! records.
//!
//! Rows are grouped by visitor and handled one visitor at a time. First-time
//! visitors are created with their first session. For known visitors the new
//! visits are merged with everything already stored, re-sessionized, and each
//! session that gained visits is reconciled with the stored sessions it now
//! overlaps.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::AddAssign;
use std::time::Duration;

use crate::aggregate::summarize_session;
use crate::client::{TableClient, VisitorDetails};
use crate::entities::{Browser, Session, Visit, Visitor};
use crate::error::Result;
use crate::export::ExportRow;
use crate::geo::LocationLookup;
use crate::sessionize::link;
use crate::store::Store;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub visitors_created: usize,
    pub sessions_created: usize,
    pub sessions_updated: usize,
    /// Stored sessions folded into an earlier one and deleted.
    pub sessions_merged: usize,
    pub visits_written: usize,
}

impl AddAssign for IngestReport {
    fn add_assign(&mut self, other: Self) {
        self.visitors_created += other.visitors_created;
        self.sessions_created += other.sessions_created;
        self.sessions_updated += other.sessions_updated;
        self.sessions_merged += other.sessions_merged;
        self.visits_written += other.visits_written;
    }
}

pub struct Pipeline<'a, S> {
    client: &'a TableClient<S>,
    lookup: Option<&'a dyn LocationLookup>,
    idle: Duration,
}

/// Identity of a page view, independent of its links.
type View = (DateTime<Utc>, String);

fn view(visit: &Visit) -> View {
    (visit.date, visit.slug.clone())
}

/// One browser per device, dated by the first row that used it.
fn browsers_of(rows: &[&ExportRow], ip: &str, now: DateTime<Utc>) -> Result<Vec<Browser>> {
    let mut seen = HashSet::new();
    let mut browsers = Vec::new();
    for row in rows {
        if let Some((app, width, height)) = row.device() {
            if seen.insert((app, width, height)) {
                browsers.push(Browser::new(ip, app, width, height, row.date()?, now));
            }
        }
    }
    Ok(browsers)
}

/// The browsers first seen during `visits`.
fn browsers_during(browsers: &[Browser], visits: &[Visit]) -> Vec<Browser> {
    browsers
        .iter()
        .filter(|b| visits.iter().any(|v| v.date == b.date_visited))
        .cloned()
        .collect()
}

impl<'a, S: Store> Pipeline<'a, S> {
    pub fn new(client: &'a TableClient<S>, idle: Duration) -> Self {
        Self {
            client,
            lookup: None,
            idle,
        }
    }

    /// New visitors get their location looked up through `lookup`.
    pub fn with_lookup(mut self, lookup: &'a dyn LocationLookup) -> Self {
        self.lookup = Some(lookup);
        self
    }

    /// Ingests every row, stopping at the first visitor that fails.
    pub async fn ingest(&self, rows: &[ExportRow], now: DateTime<Utc>) -> Result<IngestReport> {
        let mut by_visitor: BTreeMap<&str, Vec<&ExportRow>> = BTreeMap::new();
        for row in rows {
            by_visitor.entry(row.ip.as_str()).or_default().push(row);
        }

        let mut report = IngestReport::default();
        for (ip, mut rows) in by_visitor {
            rows.sort_by(|a, b| a.id.cmp(&b.id));
            if let Err(e) = self.ingest_visitor(ip, &rows, now, &mut report).await {
                tracing::error!(ip, err=%e, retryable=e.is_retryable(), "ingest failed");
                return Err(e);
            }
        }
        tracing::info!(?report, "ingest finished");
        Ok(report)
    }

    async fn ingest_visitor(
        &self,
        ip: &str,
        rows: &[&ExportRow],
        now: DateTime<Utc>,
        report: &mut IngestReport,
    ) -> Result<()> {
        let visits = rows
            .iter()
            .map(|row| row.to_visit())
            .collect::<Result<Vec<_>>>()?;
        let browsers = browsers_of(rows, ip, now)?;

        match self.client.get_visitor_details(ip).await {
            Ok(stored) => self.extend_visitor(ip, stored, visits, browsers, report).await,
            Err(e) if e.is_not_found() => {
                self.create_visitor(ip, visits, browsers, now, report).await
            }
            Err(e) => Err(e),
        }
    }

    async fn create_visitor(
        &self,
        ip: &str,
        visits: Vec<Visit>,
        browsers: Vec<Browser>,
        now: DateTime<Utc>,
        report: &mut IngestReport,
    ) -> Result<()> {
        let location = match self.lookup {
            Some(lookup) => Some(lookup.lookup(ip, now).await?),
            None => None,
        };

        let mut sessions = link(visits, self.idle).into_iter();
        let Some(first) = sessions.next() else {
            return Ok(());
        };
        self.client
            .add_new_visitor(
                &Visitor::with_sessions(ip, 1),
                location.as_ref(),
                &browsers_during(&browsers, &first),
                &first,
            )
            .await?;
        report.visitors_created += 1;
        report.sessions_created += 1;
        report.visits_written += first.len();

        for session in sessions {
            self.client
                .add_new_session(ip, &browsers_during(&browsers, &session), &session)
                .await?;
            report.sessions_created += 1;
            report.visits_written += session.len();
        }
        Ok(())
    }

    async fn extend_visitor(
        &self,
        ip: &str,
        stored: VisitorDetails,
        visits: Vec<Visit>,
        browsers: Vec<Browser>,
        report: &mut IngestReport,
    ) -> Result<()> {
        let known: HashSet<View> = stored.visits.iter().map(view).collect();
        let fresh: HashSet<View> = visits
            .iter()
            .map(view)
            .filter(|v| !known.contains(v))
            .collect();
        if fresh.is_empty() {
            tracing::debug!(ip, "export holds no new visits");
            return Ok(());
        }

        let known_devices: HashSet<(&str, u32, u32)> = stored
            .browsers
            .iter()
            .map(|b| (b.app.as_str(), b.width, b.height))
            .collect();
        let browsers: Vec<Browser> = browsers
            .into_iter()
            .filter(|b| !known_devices.contains(&(b.app.as_str(), b.width, b.height)))
            .collect();

        // Where each stored visit sat before relinking.
        let stored_starts: HashMap<View, DateTime<Utc>> = stored
            .visits
            .iter()
            .map(|v| (view(v), v.session_start))
            .collect();
        let stored_sessions: HashMap<DateTime<Utc>, &Session> = stored
            .sessions
            .iter()
            .map(|s| (s.session_start, s))
            .collect();

        let mut combined = stored.visits.clone();
        combined.extend(visits.into_iter().filter(|v| fresh.contains(&view(v))));

        for group in link(combined, self.idle) {
            if !group.iter().any(|v| fresh.contains(&view(v))) {
                continue;
            }
            let overlapped: Vec<Session> = group
                .iter()
                .filter_map(|v| stored_starts.get(&view(v)))
                .collect::<HashSet<_>>()
                .into_iter()
                .filter_map(|start| stored_sessions.get(start).map(|s| (*s).clone()))
                .collect();
            let group_browsers = browsers_during(&browsers, &group);
            report.visits_written += group.len();

            if overlapped.is_empty() {
                self.client
                    .add_new_session(ip, &group_browsers, &group)
                    .await?;
                report.sessions_created += 1;
                continue;
            }

            let survivor = summarize_session(&group)?;
            let mut absorbed: Vec<Session> = overlapped
                .iter()
                .filter(|s| s.session_start != survivor.session_start)
                .cloned()
                .collect();
            absorbed.sort_by_key(|s| s.session_start);
            if absorbed.len() < overlapped.len() {
                report.sessions_updated += 1;
            } else {
                report.sessions_created += 1;
            }
            report.sessions_merged += absorbed.len();

            self.client
                .merge_sessions(ip, &survivor, &absorbed, &group_browsers, &group)
                .await?;
        }
        Ok(())
    }
}
