use std::time::Duration;

use crate::entities::Visit;

/// Splits one visitor's visits wherever consecutive visits are more than
/// `idle` apart and links the visits inside each session.
pub fn link(mut visits: Vec<Visit>, idle: Duration) -> Vec<Vec<Visit>> {
    visits.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.slug.cmp(&b.slug)));
    visits.dedup_by(|later, earlier| later.same_view(earlier));

    let idle = idle.as_secs_f64();
    let mut sessions: Vec<Vec<Visit>> = Vec::new();
    let mut current: Vec<Visit> = Vec::new();

    for mut visit in visits {
        match current.last_mut() {
            Some(prev) => {
                let gap = (visit.date - prev.date).num_milliseconds() as f64 / 1000.0;
                if gap > idle {
                    close(prev);
                    sessions.push(std::mem::take(&mut current));
                    open(&mut visit);
                } else {
                    prev.next_slug = Some(visit.slug.clone());
                    prev.next_title = Some(visit.title.clone());
                    prev.time_on_page = Some(gap);
                    visit.prev_slug = Some(prev.slug.clone());
                    visit.prev_title = Some(prev.title.clone());
                    visit.session_start = prev.session_start;
                }
            }
            None => open(&mut visit),
        }
        current.push(visit);
    }
    if let Some(last) = current.last_mut() {
        close(last);
        sessions.push(current);
    }
    sessions
}

fn open(visit: &mut Visit) {
    visit.prev_slug = None;
    visit.prev_title = None;
    visit.session_start = visit.date;
}

fn close(visit: &mut Visit) {
    visit.next_slug = None;
    visit.next_title = None;
    visit.time_on_page = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::parse_date;
    use crate::config::DEFAULT_IDLE_THRESHOLD;

    fn visit(date: &str, slug: &str) -> Visit {
        Visit::new(parse_date(date).unwrap(), "0.0.0.0", None, slug.to_uppercase(), slug)
    }

    #[test]
    fn close_visits_share_a_session() {
        let sessions = link(
            vec![
                visit("2021-01-01T00:02:00.000Z", "/resume"),
                visit("2021-01-01T00:00:00.000Z", "/"),
                visit("2021-01-01T00:01:00.000Z", "/blog"),
            ],
            DEFAULT_IDLE_THRESHOLD,
        );
        assert_eq!(sessions.len(), 1);
        let s = &sessions[0];
        assert_eq!(s[0].slug, "/");
        assert_eq!(s[0].prev_slug, None);
        assert_eq!(s[0].next_slug.as_deref(), Some("/blog"));
        assert_eq!(s[0].time_on_page, Some(60.0));
        assert_eq!(s[1].prev_title.as_deref(), Some("/"));
        assert_eq!(s[1].time_on_page, Some(60.0));
        assert_eq!(s[2].next_slug, None);
        assert_eq!(s[2].time_on_page, None);
        assert!(s.iter().all(|v| v.session_start == s[0].date));
    }

    #[test]
    fn idle_gap_splits_sessions() {
        let sessions = link(
            vec![
                visit("2021-01-01T00:00:00.000Z", "/"),
                visit("2021-01-01T00:40:00.000Z", "/blog"),
            ],
            DEFAULT_IDLE_THRESHOLD,
        );
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0][0].next_slug, None);
        assert_eq!(sessions[0][0].time_on_page, None);
        assert_eq!(sessions[1][0].prev_slug, None);
        assert_eq!(sessions[1][0].session_start, sessions[1][0].date);
    }

    #[test]
    fn threshold_is_exclusive() {
        let sessions = link(
            vec![
                visit("2021-01-01T00:00:00.000Z", "/"),
                visit("2021-01-01T00:30:00.000Z", "/blog"),
            ],
            DEFAULT_IDLE_THRESHOLD,
        );
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0][0].time_on_page, Some(1800.0));
    }

    #[test]
    fn stale_links_are_replaced() {
        let mut stored = visit("2021-01-01T00:00:00.000Z", "/");
        stored.next_slug = Some("/old".into());
        stored.time_on_page = Some(5.0);
        let sessions = link(
            vec![stored.clone(), stored, visit("2021-01-01T00:00:10.000Z", "/new")],
            DEFAULT_IDLE_THRESHOLD,
        );
        assert_eq!(sessions[0].len(), 2);
        assert_eq!(sessions[0][0].next_slug.as_deref(), Some("/new"));
        assert_eq!(sessions[0][0].time_on_page, Some(10.0));
    }

    #[test]
    fn nothing_in_nothing_out() {
        assert!(link(Vec::new(), DEFAULT_IDLE_THRESHOLD).is_empty());
    }
}
