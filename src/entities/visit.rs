use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use super::{base_item, page_pk, visitor_pk, Entity, Session};
use crate::codec::{format_date, n, null, opt_n, opt_s, parse_date, ratio_map, s, Attrs};
use crate::error::DecodeError;
use crate::store::{Item, Key, GSI1_PK, GSI1_SK, GSI2_PK, GSI2_SK, PK, SK};

/// A single page view.
///
/// `prev_*`/`next_*` link the visit to its neighbours within the session and
/// are `None` at the session's edges. `time_on_page` is `None` for the last
/// visit of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct Visit {
    pub date: DateTime<Utc>,
    pub ip: String,
    pub user: i64,
    pub title: String,
    pub slug: String,
    pub session_start: DateTime<Utc>,
    pub time_on_page: Option<f64>,
    pub prev_title: Option<String>,
    pub prev_slug: Option<String>,
    pub next_title: Option<String>,
    pub next_slug: Option<String>,
    /// Scroll depth samples keyed by event name.
    pub scroll_events: BTreeMap<String, f64>,
}

impl Visit {
    /// An unlinked visit that starts its own session.
    pub fn new(
        date: DateTime<Utc>,
        ip: impl Into<String>,
        user: Option<i64>,
        title: impl Into<String>,
        slug: impl Into<String>,
    ) -> Self {
        Self {
            date,
            ip: ip.into(),
            user: user.unwrap_or(0),
            title: title.into(),
            slug: slug.into(),
            session_start: date,
            time_on_page: None,
            prev_title: None,
            prev_slug: None,
            next_title: None,
            next_slug: None,
            scroll_events: BTreeMap::new(),
        }
    }

    pub fn gsi1(&self) -> Key {
        Key::new(page_pk(&self.slug), format!("VISIT#{}", format_date(&self.date)))
    }

    pub fn gsi2(&self) -> Key {
        Key::new(
            Session::gsi2_pk(&self.ip, &self.session_start),
            format!("VISIT#{}", format_date(&self.date)),
        )
    }

    /// Same page at the same instant from the same visitor.
    pub fn same_view(&self, other: &Visit) -> bool {
        self.ip == other.ip && self.date == other.date && self.slug == other.slug
    }
}

impl Entity for Visit {
    const TYPE: &'static str = "visit";

    fn key(&self) -> Key {
        Key::new(
            visitor_pk(&self.ip),
            format!("VISIT#{}#{}", format_date(&self.date), self.slug),
        )
    }

    fn encode(&self) -> Item {
        let mut item = base_item(self);
        let gsi1 = self.gsi1();
        let gsi2 = self.gsi2();
        item.extend([
            (GSI1_PK.into(), s(gsi1.pk)),
            (GSI1_SK.into(), s(gsi1.sk)),
            (GSI2_PK.into(), s(gsi2.pk)),
            (GSI2_SK.into(), s(gsi2.sk)),
            ("User".into(), n(self.user)),
            ("Title".into(), s(&self.title)),
            ("Slug".into(), s(&self.slug)),
            ("PreviousTitle".into(), opt_s(self.prev_title.as_deref())),
            ("PreviousSlug".into(), opt_s(self.prev_slug.as_deref())),
            ("NextTitle".into(), opt_s(self.next_title.as_deref())),
            ("NextSlug".into(), opt_s(self.next_slug.as_deref())),
            ("TimeOnPage".into(), opt_n(self.time_on_page)),
        ]);
        let scroll_events = if self.scroll_events.is_empty() {
            null()
        } else {
            ratio_map(&self.scroll_events)
        };
        item.insert("ScrollEvents".into(), scroll_events);
        item
    }

    fn decode(item: &Item) -> Result<Self, DecodeError> {
        let a = Attrs::new(Self::TYPE, item);
        a.expect_type(Self::TYPE)?;
        let ip = a.key_suffix(PK, "VISITOR#")?.to_string();
        let slug = a.s("Slug")?.to_string();
        let visit_date = a
            .key_suffix(SK, "VISIT#")?
            .strip_suffix(slug.as_str())
            .and_then(|rest| rest.strip_suffix('#'))
            .and_then(parse_date)
            .ok_or_else(|| a.err("SK does not hold the visit date and slug"))?;
        let session_start = a.key_date(GSI2_PK, &format!("SESSION#{ip}#"))?;
        let scroll_events = match item.get("ScrollEvents") {
            Some(v) if !v.is_null() => a.ratio_map("ScrollEvents")?,
            _ => BTreeMap::new(),
        };

        Ok(Self {
            date: visit_date,
            user: a.n("User")?,
            title: a.s("Title")?.to_string(),
            slug,
            session_start,
            time_on_page: a.opt_n("TimeOnPage")?,
            prev_title: a.opt_s("PreviousTitle")?,
            prev_slug: a.opt_s("PreviousSlug")?,
            next_title: a.opt_s("NextTitle")?,
            next_slug: a.opt_s("NextSlug")?,
            scroll_events,
            ip,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn visit() -> Visit {
        let date = parse_date("2020-12-23T20:32:26.000Z").unwrap();
        let mut visit = Visit::new(date, "0.0.0.0", None, "Tyler Norlund", "/");
        visit.next_slug = Some("/blog".into());
        visit.next_title = Some("Blog".into());
        visit.time_on_page = Some(60.0);
        visit
    }

    #[test]
    fn keys() {
        let visit = visit();
        assert_eq!(
            visit.key(),
            Key::new("VISITOR#0.0.0.0", "VISIT#2020-12-23T20:32:26.000Z#/")
        );
        assert_eq!(
            visit.gsi1(),
            Key::new("PAGE#/", "VISIT#2020-12-23T20:32:26.000Z")
        );
        assert_eq!(
            visit.gsi2(),
            Key::new(
                "SESSION#0.0.0.0#2020-12-23T20:32:26.000Z",
                "VISIT#2020-12-23T20:32:26.000Z"
            )
        );
    }

    #[test]
    fn anonymous_user_is_zero() {
        let item = visit().encode();
        assert_eq!(item["User"].as_n().unwrap(), "0");
        assert!(item["PreviousSlug"].is_null());
        assert_eq!(item["NextSlug"].as_s().unwrap(), "/blog");
    }

    #[test]
    fn decode_inverts_encode() {
        let mut visit = visit();
        visit.scroll_events.insert("50%".into(), 12.0);
        assert_eq!(Visit::decode(&visit.encode()).unwrap(), visit);
    }

    #[test]
    fn no_scroll_events_is_null() {
        let visit = visit();
        let item = visit.encode();
        assert!(item["ScrollEvents"].is_null());
        assert_eq!(Visit::decode(&item).unwrap(), visit);
    }

    #[test]
    fn missing_title_fails() {
        let mut item = visit().encode();
        item.remove("Title");
        assert!(Visit::decode(&item).is_err());
    }
}
