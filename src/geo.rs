use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::entities::{AutonomousSystem, Location};
use crate::error::{Error, Result};

const IPIFY_URL: &str = "https://geo.ipify.org/api/v1";

#[async_trait]
pub trait LocationLookup: Send + Sync {
    async fn lookup(&self, ip: &str, now: DateTime<Utc>) -> Result<Location>;
}

#[derive(Debug, Deserialize)]
struct IpifyReply {
    ip: String,
    location: IpifyLocation,
    #[serde(default)]
    domains: Vec<String>,
    #[serde(rename = "as", default)]
    autonomous_system: Option<AutonomousSystem>,
    #[serde(default)]
    isp: String,
    #[serde(default)]
    proxy: IpifyProxy,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpifyLocation {
    #[serde(default)]
    country: String,
    #[serde(default)]
    region: String,
    #[serde(default)]
    city: String,
    lat: f64,
    lng: f64,
    #[serde(default)]
    postal_code: String,
    #[serde(default)]
    timezone: String,
}

#[derive(Debug, Default, Deserialize)]
struct IpifyProxy {
    #[serde(default)]
    proxy: bool,
    #[serde(default)]
    vpn: bool,
    #[serde(default)]
    tor: bool,
}

impl IpifyReply {
    fn into_location(self, now: DateTime<Utc>) -> Location {
        Location {
            ip: self.ip,
            country: self.location.country,
            region: self.location.region,
            city: self.location.city,
            latitude: self.location.lat,
            longitude: self.location.lng,
            postal_code: self.location.postal_code,
            time_zone: self.location.timezone,
            domains: self.domains,
            autonomous_system: self.autonomous_system,
            isp: self.isp,
            proxy: self.proxy.proxy,
            vpn: self.proxy.vpn,
            tor: self.proxy.tor,
            date_added: now,
        }
    }
}

#[derive(Clone)]
pub struct IpifyLookup {
    http: Client,
    api_key: String,
}

impl IpifyLookup {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl LocationLookup for IpifyLookup {
    async fn lookup(&self, ip: &str, now: DateTime<Utc>) -> Result<Location> {
        let reply: IpifyReply = self
            .http
            .get(IPIFY_URL)
            .header("User-Agent", "sitestats")
            .query(&[("apiKey", self.api_key.as_str()), ("ipAddress", ip)])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::Lookup(format!("ipify {ip}: {e}")))?
            .json()
            .await
            .map_err(|e| Error::Lookup(format!("ipify {ip} json: {e}")))?;
        Ok(reply.into_location(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::parse_date;

    #[test]
    fn reply_maps_onto_location() {
        let body = serde_json::json!({
            "ip": "8.8.8.8",
            "location": {
                "country": "US",
                "region": "California",
                "city": "Mountain View",
                "lat": 37.40599,
                "lng": -122.078514,
                "postalCode": "94043",
                "timezone": "-07:00",
                "geonameId": 5375481
            },
            "domains": ["0d2.net", "dns.google"],
            "as": {
                "asn": 15169,
                "name": "Google LLC",
                "route": "8.8.8.0/24",
                "domain": "https://about.google/intl/en/",
                "type": "Content"
            },
            "isp": "Google LLC",
            "proxy": { "proxy": false, "vpn": false, "tor": true }
        });
        let now = parse_date("2021-01-01T00:00:00.000Z").unwrap();
        let reply: IpifyReply = serde_json::from_value(body).unwrap();
        let location = reply.into_location(now);

        assert_eq!(location.ip, "8.8.8.8");
        assert_eq!(location.postal_code, "94043");
        assert_eq!(location.domains.len(), 2);
        assert_eq!(location.autonomous_system.unwrap().asn, 15169);
        assert!(location.tor);
        assert_eq!(location.date_added, now);
    }

    #[test]
    fn autonomous_system_is_optional() {
        let body = serde_json::json!({
            "ip": "1.1.1.1",
            "location": { "country": "AU", "lat": -33.4940, "lng": 143.2104 },
            "isp": "Cloudflare"
        });
        let reply: IpifyReply = serde_json::from_value(body).unwrap();
        let location = reply.into_location(Utc::now());
        assert!(location.autonomous_system.is_none());
        assert!(location.domains.is_empty());
        assert!(!location.proxy);
    }
}
