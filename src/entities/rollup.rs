use chrono::{DateTime, Datelike, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::fmt;

use super::{base_item, page_pk, Entity};
use crate::codec::{n, opt_n, ratio_map, s, Attrs};
use crate::error::DecodeError;
use crate::store::{Item, Key, GSI1_PK, GSI1_SK, PK, SK, TYPE};

/// Time grain a rollup summarizes over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Granularity {
    Page,
    Day,
    Week,
    Month,
    Year,
}

impl Granularity {
    pub const ALL: [Granularity; 5] = [
        Granularity::Page,
        Granularity::Day,
        Granularity::Week,
        Granularity::Month,
        Granularity::Year,
    ];

    pub fn type_name(self) -> &'static str {
        match self {
            Granularity::Page => "page",
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
            Granularity::Year => "year",
        }
    }

    pub fn from_type_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|g| g.type_name() == name)
    }

    /// The period of this grain that contains `date`.
    pub fn period_of(self, date: &DateTime<Utc>) -> Period {
        match self {
            Granularity::Page => Period::All,
            Granularity::Day => Period::Day(date.date_naive()),
            Granularity::Week => Period::Week {
                year: date.year(),
                week: sunday_week(date.date_naive()),
            },
            Granularity::Month => Period::Month {
                year: date.year(),
                month: date.month(),
            },
            Granularity::Year => Period::Year(date.year()),
        }
    }
}

/// Week of the year with Sunday as the first day; days before the first
/// Sunday fall in week 0 (`strftime`'s `%U`).
fn sunday_week(date: NaiveDate) -> u32 {
    (date.ordinal0() + 7 - date.weekday().num_days_from_sunday()) / 7
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Period {
    /// Every visit the page ever had.
    All,
    Day(NaiveDate),
    Week { year: i32, week: u32 },
    Month { year: i32, month: u32 },
    Year(i32),
}

impl Period {
    pub fn granularity(&self) -> Granularity {
        match self {
            Period::All => Granularity::Page,
            Period::Day(_) => Granularity::Day,
            Period::Week { .. } => Granularity::Week,
            Period::Month { .. } => Granularity::Month,
            Period::Year(_) => Granularity::Year,
        }
    }

    pub fn sort_key(&self) -> String {
        match self {
            Period::All => "#PAGE".to_string(),
            Period::Day(day) => format!("#DAY#{}", day.format("%Y-%m-%d")),
            Period::Week { year, week } => format!("#WEEK#{year:04}-{week:02}"),
            Period::Month { year, month } => format!("#MONTH#{year:04}-{month:02}"),
            Period::Year(year) => format!("#YEAR#{year:04}"),
        }
    }

    pub fn parse(sort_key: &str) -> Option<Period> {
        if sort_key == "#PAGE" {
            return Some(Period::All);
        }
        let (grain, value) = sort_key.strip_prefix('#')?.split_once('#')?;
        let pair = |raw: &str| -> Option<(i32, u32)> {
            let (a, b) = raw.split_once('-')?;
            Some((a.parse().ok()?, b.parse().ok()?))
        };
        match grain {
            "DAY" => NaiveDate::parse_from_str(value, "%Y-%m-%d").ok().map(Period::Day),
            "WEEK" => pair(value)
                .filter(|(_, week)| *week <= 53)
                .map(|(year, week)| Period::Week { year, week }),
            "MONTH" => pair(value)
                .filter(|(_, month)| (1..=12).contains(month))
                .map(|(year, month)| Period::Month { year, month }),
            "YEAR" => value.parse().ok().map(Period::Year),
            _ => None,
        }
    }

    pub fn contains(&self, date: &DateTime<Utc>) -> bool {
        self.granularity().period_of(date) == *self
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sort_key())
    }
}

/// Page statistics over one period, recomputed wholesale from the visits.
#[derive(Debug, Clone, PartialEq)]
pub struct Rollup {
    pub slug: String,
    pub title: String,
    pub period: Period,
    pub number_visitors: i64,
    pub average_time: Option<f64>,
    pub percent_churn: f64,
    pub from_page: BTreeMap<String, f64>,
    pub to_page: BTreeMap<String, f64>,
}

impl Rollup {
    pub fn key_for(slug: &str, period: &Period) -> Key {
        Key::new(page_pk(slug), period.sort_key())
    }
}

impl Entity for Rollup {
    const TYPE: &'static str = "rollup";

    fn kind(&self) -> &'static str {
        self.period.granularity().type_name()
    }

    fn key(&self) -> Key {
        Self::key_for(&self.slug, &self.period)
    }

    fn encode(&self) -> Item {
        let mut item = base_item(self);
        item.extend([
            (GSI1_PK.into(), s(page_pk(&self.slug))),
            (GSI1_SK.into(), s(self.period.sort_key())),
            ("Title".into(), s(&self.title)),
            ("Slug".into(), s(&self.slug)),
            ("NumberVisitors".into(), n(self.number_visitors)),
            ("AverageTime".into(), opt_n(self.average_time)),
            ("PercentChurn".into(), n(self.percent_churn)),
            ("FromPage".into(), ratio_map(&self.from_page)),
            ("ToPage".into(), ratio_map(&self.to_page)),
        ]);
        item
    }

    fn decode(item: &Item) -> Result<Self, DecodeError> {
        let a = Attrs::new(Self::TYPE, item);
        let kind = a.s(TYPE)?;
        let granularity = Granularity::from_type_name(kind)
            .ok_or_else(|| a.err(format!("{kind} is not a rollup type")))?;
        let sort_key = a.s(SK)?;
        let period = Period::parse(sort_key)
            .filter(|p| p.granularity() == granularity)
            .ok_or_else(|| a.err(format!("SK {sort_key} is not a {kind} period")))?;
        let slug = a.key_suffix(PK, "PAGE#")?.to_string();
        if a.s("Slug")? != slug {
            return Err(a.err("Slug does not match PK"));
        }

        Ok(Self {
            title: a.s("Title")?.to_string(),
            period,
            number_visitors: a.n("NumberVisitors")?,
            average_time: a.opt_n("AverageTime")?,
            percent_churn: a.n("PercentChurn")?,
            from_page: a.ratio_map("FromPage")?,
            to_page: a.ratio_map("ToPage")?,
            slug,
        })
    }
}
