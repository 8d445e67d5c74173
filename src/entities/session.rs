use chrono::{DateTime, Utc};

use super::{base_item, visitor_pk, Entity};
use crate::codec::{format_date, opt_n, s, Attrs};
use crate::error::DecodeError;
use crate::store::{Item, Key, GSI2_PK, GSI2_SK, PK, SK};

/// One visitor's run of visits with no idle gap over the threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub ip: String,
    pub session_start: DateTime<Utc>,
    pub average_time: Option<f64>,
    pub total_time: Option<f64>,
}

impl Session {
    pub fn key_for(ip: &str, session_start: &DateTime<Utc>) -> Key {
        Key::new(visitor_pk(ip), format!("SESSION#{}", format_date(session_start)))
    }

    /// Partition shared by the session and its visits in `GSI2`.
    pub fn gsi2_pk(ip: &str, session_start: &DateTime<Utc>) -> String {
        format!("SESSION#{ip}#{}", format_date(session_start))
    }
}

impl Entity for Session {
    const TYPE: &'static str = "session";

    fn key(&self) -> Key {
        Self::key_for(&self.ip, &self.session_start)
    }

    fn encode(&self) -> Item {
        let mut item = base_item(self);
        item.insert(GSI2_PK.into(), s(Self::gsi2_pk(&self.ip, &self.session_start)));
        item.insert(GSI2_SK.into(), s("#SESSION"));
        item.insert("AverageTime".into(), opt_n(self.average_time));
        item.insert("TotalTime".into(), opt_n(self.total_time));
        item
    }

    fn decode(item: &Item) -> Result<Self, DecodeError> {
        let a = Attrs::new(Self::TYPE, item);
        a.expect_type(Self::TYPE)?;
        Ok(Self {
            ip: a.key_suffix(PK, "VISITOR#")?.to_string(),
            session_start: a.key_date(SK, "SESSION#")?,
            average_time: a.opt_n("AverageTime")?,
            total_time: a.opt_n("TotalTime")?,
        })
    }
}
