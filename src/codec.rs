use aws_sdk_dynamodb::types::AttributeValue as Av;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::str::FromStr;

use crate::error::DecodeError;
use crate::store::{Item, TYPE};

const DATE_OUT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";
const DATE_IN: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

/// `2021-01-01T00:00:00.000Z`: UTC with millisecond precision.
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.format(DATE_OUT).to_string()
}

pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, DATE_IN)
        .ok()
        .map(|naive| naive.and_utc())
}

pub fn s(value: impl Into<String>) -> Av {
    Av::S(value.into())
}

pub fn n(value: impl Display) -> Av {
    Av::N(value.to_string())
}

pub fn null() -> Av {
    Av::Null(true)
}

pub fn opt_s(value: Option<&str>) -> Av {
    value.map_or_else(null, s)
}

pub fn opt_n(value: Option<f64>) -> Av {
    value.map_or_else(null, n)
}

pub fn date(value: &DateTime<Utc>) -> Av {
    Av::S(format_date(value))
}

pub fn ratio_map(map: &BTreeMap<String, f64>) -> Av {
    Av::M(map.iter().map(|(k, v)| (k.clone(), n(v))).collect())
}

pub struct Attrs<'a> {
    entity: &'static str,
    item: &'a Item,
}

impl<'a> Attrs<'a> {
    pub fn new(entity: &'static str, item: &'a Item) -> Self {
        Self { entity, item }
    }

    pub fn err(&self, reason: impl Into<String>) -> DecodeError {
        DecodeError::new(self.entity, reason)
    }

    fn get(&self, name: &str) -> Result<&'a Av, DecodeError> {
        self.item
            .get(name)
            .ok_or_else(|| self.err(format!("missing {name}")))
    }

    /// Absent and `NULL` both read as `None`.
    fn get_opt(&self, name: &str) -> Option<&'a Av> {
        self.item.get(name).filter(|v| !v.is_null())
    }

    pub fn expect_type(&self, kind: &str) -> Result<(), DecodeError> {
        match self.s(TYPE)? {
            found if found == kind => Ok(()),
            found => Err(self.err(format!("Type is {found}, expected {kind}"))),
        }
    }

    pub fn s(&self, name: &str) -> Result<&'a str, DecodeError> {
        self.get(name)?
            .as_s()
            .map(String::as_str)
            .map_err(|_| self.err(format!("{name} is not a string")))
    }

    pub fn opt_s(&self, name: &str) -> Result<Option<String>, DecodeError> {
        match self.get_opt(name) {
            None => Ok(None),
            Some(Av::S(v)) => Ok(Some(v.clone())),
            Some(_) => Err(self.err(format!("{name} is not a string"))),
        }
    }

    pub fn n<T: FromStr>(&self, name: &str) -> Result<T, DecodeError> {
        let raw = self
            .get(name)?
            .as_n()
            .map_err(|_| self.err(format!("{name} is not a number")))?;
        raw.parse()
            .map_err(|_| self.err(format!("{name}={raw} is out of range")))
    }

    pub fn opt_n<T: FromStr>(&self, name: &str) -> Result<Option<T>, DecodeError> {
        match self.get_opt(name) {
            None => Ok(None),
            Some(_) => self.n(name).map(Some),
        }
    }

    pub fn bool(&self, name: &str) -> Result<bool, DecodeError> {
        self.get(name)?
            .as_bool()
            .copied()
            .map_err(|_| self.err(format!("{name} is not a bool")))
    }

    pub fn date(&self, name: &str) -> Result<DateTime<Utc>, DecodeError> {
        let raw = self.s(name)?;
        parse_date(raw).ok_or_else(|| self.err(format!("{name}={raw} is not a timestamp")))
    }

    pub fn string_set(&self, name: &str) -> Result<Vec<String>, DecodeError> {
        match self.get_opt(name) {
            None => Ok(Vec::new()),
            Some(Av::Ss(values)) => Ok(values.clone()),
            Some(_) => Err(self.err(format!("{name} is not a string set"))),
        }
    }

    pub fn map(&self, name: &str) -> Result<&'a HashMap<String, Av>, DecodeError> {
        self.get(name)?
            .as_m()
            .map_err(|_| self.err(format!("{name} is not a map")))
    }

    pub fn opt_map(&self, name: &str) -> Result<Option<&'a HashMap<String, Av>>, DecodeError> {
        match self.get_opt(name) {
            None => Ok(None),
            Some(_) => self.map(name).map(Some),
        }
    }

    pub fn ratio_map(&self, name: &str) -> Result<BTreeMap<String, f64>, DecodeError> {
        self.map(name)?
            .iter()
            .map(|(k, v)| {
                v.as_n()
                    .ok()
                    .and_then(|raw| raw.parse::<f64>().ok())
                    .map(|ratio| (k.clone(), ratio))
                    .ok_or_else(|| self.err(format!("{name}.{k} is not a number")))
            })
            .collect()
    }

    /// The part of a key attribute after `prefix`, e.g. the IP in `VISITOR#<ip>`.
    pub fn key_suffix(&self, name: &str, prefix: &str) -> Result<&'a str, DecodeError> {
        let raw = self.s(name)?;
        raw.strip_prefix(prefix)
            .ok_or_else(|| self.err(format!("{name}={raw} does not start with {prefix}")))
    }

    /// A key attribute's suffix parsed as a timestamp.
    pub fn key_date(&self, name: &str, prefix: &str) -> Result<DateTime<Utc>, DecodeError> {
        let raw = self.key_suffix(name, prefix)?;
        parse_date(raw).ok_or_else(|| self.err(format!("{name} holds no timestamp")))
    }
}
