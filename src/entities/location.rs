use aws_sdk_dynamodb::types::AttributeValue as Av;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;

use super::{base_item, visitor_pk, Entity};
use crate::codec::{date, n, null, s, Attrs};
use crate::error::DecodeError;
use crate::store::{Item, Key, PK};

/// Network that announces the visitor's address.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AutonomousSystem {
    pub asn: i64,
    pub name: String,
    pub route: String,
    pub domain: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl AutonomousSystem {
    fn encode(&self) -> Av {
        Av::M(HashMap::from([
            ("asn".to_string(), n(self.asn)),
            ("name".to_string(), s(&self.name)),
            ("route".to_string(), s(&self.route)),
            ("domain".to_string(), s(&self.domain)),
            ("type".to_string(), s(&self.kind)),
        ]))
    }

    fn decode(a: &Attrs<'_>, name: &str) -> Result<Option<Self>, DecodeError> {
        let fields = match a.opt_map(name)? {
            Some(fields) => fields,
            None => return Ok(None),
        };
        let text = |field: &str| {
            fields
                .get(field)
                .and_then(|v| v.as_s().ok())
                .cloned()
                .ok_or_else(|| a.err(format!("{name}.{field} is not a string")))
        };
        let asn = fields
            .get("asn")
            .and_then(|v| v.as_n().ok())
            .and_then(|raw| raw.parse().ok())
            .ok_or_else(|| a.err(format!("{name}.asn is not a number")))?;
        Ok(Some(Self {
            asn,
            name: text("name")?,
            route: text("route")?,
            domain: text("domain")?,
            kind: text("type")?,
        }))
    }
}

/// Geolocation of a visitor's IP address. One per visitor.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub ip: String,
    pub country: String,
    pub region: String,
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
    pub postal_code: String,
    pub time_zone: String,
    pub domains: Vec<String>,
    pub autonomous_system: Option<AutonomousSystem>,
    pub isp: String,
    pub proxy: bool,
    pub vpn: bool,
    pub tor: bool,
    pub date_added: DateTime<Utc>,
}

impl Location {
    pub fn key_for(ip: &str) -> Key {
        Key::new(visitor_pk(ip), "#LOCATION")
    }
}

impl Entity for Location {
    const TYPE: &'static str = "location";

    fn key(&self) -> Key {
        Self::key_for(&self.ip)
    }

    fn encode(&self) -> Item {
        let mut item = base_item(self);
        // DynamoDB rejects empty sets.
        let domains = if self.domains.is_empty() {
            null()
        } else {
            Av::Ss(self.domains.clone())
        };
        item.extend([
            ("Country".into(), s(&self.country)),
            ("Region".into(), s(&self.region)),
            ("City".into(), s(&self.city)),
            ("Latitude".into(), n(self.latitude)),
            ("Longitude".into(), n(self.longitude)),
            ("PostalCode".into(), s(&self.postal_code)),
            ("TimeZone".into(), s(&self.time_zone)),
            ("Domains".into(), domains),
            (
                "AutonomousSystem".into(),
                self.autonomous_system
                    .as_ref()
                    .map_or_else(null, AutonomousSystem::encode),
            ),
            ("ISP".into(), s(&self.isp)),
            ("Proxy".into(), Av::Bool(self.proxy)),
            ("VPN".into(), Av::Bool(self.vpn)),
            ("TOR".into(), Av::Bool(self.tor)),
            ("DateAdded".into(), date(&self.date_added)),
        ]);
        item
    }

    fn decode(item: &Item) -> Result<Self, DecodeError> {
        let a = Attrs::new(Self::TYPE, item);
        a.expect_type(Self::TYPE)?;
        Ok(Self {
            ip: a.key_suffix(PK, "VISITOR#")?.to_string(),
            country: a.s("Country")?.to_string(),
            region: a.s("Region")?.to_string(),
            city: a.s("City")?.to_string(),
            latitude: a.n("Latitude")?,
            longitude: a.n("Longitude")?,
            postal_code: a.s("PostalCode")?.to_string(),
            time_zone: a.s("TimeZone")?.to_string(),
            domains: a.string_set("Domains")?,
            autonomous_system: AutonomousSystem::decode(&a, "AutonomousSystem")?,
            isp: a.s("ISP")?.to_string(),
            proxy: a.bool("Proxy")?,
            vpn: a.bool("VPN")?,
            tor: a.bool("TOR")?,
            date_added: a.date("DateAdded")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::parse_date;

    fn location(ip: &str) -> Location {
        Location {
            ip: ip.to_string(),
            country: "US".into(),
            region: "California".into(),
            city: "Acton".into(),
            latitude: 34.497,
            longitude: -118.1965,
            postal_code: "93510".into(),
            time_zone: "-08:00".into(),
            domains: vec!["example.com".into()],
            autonomous_system: Some(AutonomousSystem {
                asn: 22252,
                name: "The City of New York".into(),
                route: "149.10.0.0/16".into(),
                domain: "nyc.gov".into(),
                kind: "Content".into(),
            }),
            isp: "Google LLC".into(),
            proxy: false,
            vpn: false,
            tor: false,
            date_added: parse_date("2020-12-23T20:32:26.000Z").unwrap(),
        }
    }

    #[test]
    fn decode_inverts_encode() {
        let location = location("0.0.0.0");
        assert_eq!(location.key(), Key::new("VISITOR#0.0.0.0", "#LOCATION"));
        assert_eq!(Location::decode(&location.encode()).unwrap(), location);
    }

    #[test]
    fn empty_optional_parts() {
        let mut location = location("0.0.0.0");
        location.domains.clear();
        location.autonomous_system = None;
        let item = location.encode();
        assert!(item["Domains"].is_null());
        assert!(item["AutonomousSystem"].is_null());
        assert_eq!(Location::decode(&item).unwrap(), location);
    }
}
