use chrono::{DateTime, Utc};
use regex::{Captures, Regex};
use std::sync::LazyLock;

use super::{base_item, visitor_pk, Entity};
use crate::codec::{date, format_date, n, opt_s, s, Attrs};
use crate::error::DecodeError;
use crate::store::{Item, Key, PK};

/// What the user-agent string says about the visitor's device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAgent {
    pub device: String,
    pub device_type: String,
    pub browser: String,
    pub os: String,
    pub webkit: String,
    pub version: Option<String>,
}

type Extract = fn(&Captures<'_>) -> UserAgent;

fn group(caps: &Captures<'_>, i: usize) -> String {
    caps.get(i).map_or_else(String::new, |m| m.as_str().to_string())
}

fn dotted(caps: &Captures<'_>, i: usize) -> String {
    group(caps, i).replace('_', ".")
}

fn desktop(device: &str, browser: &str, caps: &Captures<'_>) -> UserAgent {
    UserAgent {
        device: device.into(),
        device_type: "desktop".into(),
        browser: browser.into(),
        os: dotted(caps, 1),
        webkit: group(caps, 2),
        version: Some(group(caps, 3)),
    }
}

/// Tried in order; the first pattern that matches wins.
const RULES: &[(&str, Extract)] = &[
    (
        r"^Mozilla/5\.0 \(Macintosh; Intel Mac OS X (\d+_\d+_\d+)\) AppleWebKit/(\d+\.\d+\.\d+) \(KHTML, like Gecko\) Version/(\d+\.\d+\.\d+) Safari/(\d+\.\d+\.\d+)",
        |caps| desktop("mac", "safari", caps),
    ),
    (
        r"^Mozilla/5\.0 \(Macintosh; Intel Mac OS X (\d+_\d+_\d+)\) AppleWebKit/(\d+\.\d+) \(KHTML, like Gecko\) Chrome/(\d+\.\d+\.\d+\.\d+) Safari/(\d+\.\d+)",
        |caps| desktop("mac", "chrome", caps),
    ),
    (
        r"^Mozilla/5\.0 \(Windows NT (\d+\.\d+); Win64; x64\) AppleWebKit/(\d+\.\d+) \(KHTML, like Gecko\) Chrome/(\d+\.\d+\.\d+\.\d+) Safari/(\d+\.\d+)",
        |caps| desktop("windows", "chrome", caps),
    ),
    (
        r"^Mozilla/5\.0 \(iPhone; CPU iPhone OS (\d+_\d+) like Mac OS X\) AppleWebKit/(\d+\.\d+\.\d+) \(KHTML, like Gecko\) Version/(\d+\.\d+\.\d+|\d+\.\d) Mobile/15E148 Safari/(\d+\.\d+)",
        |caps| UserAgent {
            device: "iphone".into(),
            device_type: "mobile".into(),
            browser: "safari".into(),
            os: dotted(caps, 1),
            webkit: group(caps, 2),
            version: Some(group(caps, 3)),
        },
    ),
    (
        r"^Mozilla/5\.0 \(iPhone; CPU iPhone OS (\d+_\d+) like Mac OS X\) AppleWebKit/(\d+\.\d+\.\d+) \(KHTML, like Gecko\) Mobile/15E148 (\[[a-zA-Z0-9]+\])",
        |caps| UserAgent {
            device: "iphone".into(),
            device_type: "mobile".into(),
            browser: group(caps, 3),
            os: dotted(caps, 1),
            webkit: group(caps, 2),
            version: None,
        },
    ),
    (
        r"^Mozilla/5\.0 \(Linux; Android (\d+); ([^)]+)\) AppleWebKit/(\d+\.\d+) \(KHTML, like Gecko\) Chrome/(\d+\.\d+\.\d+\.\d+) Mobile Safari/(\d+\.\d+)",
        |caps| UserAgent {
            device: group(caps, 2),
            device_type: "mobile".into(),
            browser: "chrome".into(),
            os: group(caps, 1),
            webkit: group(caps, 3),
            version: Some(group(caps, 4)),
        },
    ),
    (
        r"^Mozilla/5\.0 \(Linux; Android (\d+); ([^)]+)\) AppleWebKit/(\d+\.\d+) \(KHTML, like Gecko\) SamsungBrowser/(\d+\.\d+) Chrome/(\d+\.\d+\.\d+\.\d+) Mobile Safari/(\d+\.\d+)",
        |caps| UserAgent {
            device: group(caps, 2),
            device_type: "mobile".into(),
            browser: "samsung".into(),
            os: group(caps, 1),
            webkit: group(caps, 3),
            version: Some(group(caps, 4)),
        },
    ),
];

static MATCHERS: LazyLock<Vec<(Regex, Extract)>> = LazyLock::new(|| {
    RULES
        .iter()
        .filter_map(|(pattern, extract)| Regex::new(pattern).ok().map(|re| (re, *extract)))
        .collect()
});

/// Classifies one of the known user-agent shapes; `None` for anything else.
pub fn parse_user_agent(app: &str) -> Option<UserAgent> {
    MATCHERS
        .iter()
        .find_map(|(re, extract)| re.captures(app).map(|caps| extract(&caps)))
}

/// The device a visitor browsed with, keyed by when it was first seen.
#[derive(Debug, Clone, PartialEq)]
pub struct Browser {
    pub ip: String,
    pub app: String,
    pub width: u32,
    pub height: u32,
    pub date_visited: DateTime<Utc>,
    pub device: Option<String>,
    pub device_type: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub webkit: Option<String>,
    pub version: Option<String>,
    pub date_added: DateTime<Utc>,
}

impl Browser {
    pub fn new(
        ip: impl Into<String>,
        app: impl Into<String>,
        width: u32,
        height: u32,
        date_visited: DateTime<Utc>,
        date_added: DateTime<Utc>,
    ) -> Self {
        let app = app.into();
        let ua = parse_user_agent(&app);
        Self {
            ip: ip.into(),
            width,
            height,
            date_visited,
            device: ua.as_ref().map(|ua| ua.device.clone()),
            device_type: ua.as_ref().map(|ua| ua.device_type.clone()),
            browser: ua.as_ref().map(|ua| ua.browser.clone()),
            os: ua.as_ref().map(|ua| ua.os.clone()),
            webkit: ua.as_ref().map(|ua| ua.webkit.clone()),
            version: ua.and_then(|ua| ua.version),
            app,
            date_added,
        }
    }
}

impl Entity for Browser {
    const TYPE: &'static str = "browser";

    fn key(&self) -> Key {
        Key::new(
            visitor_pk(&self.ip),
            format!("BROWSER#{}", format_date(&self.date_visited)),
        )
    }

    fn encode(&self) -> Item {
        let mut item = base_item(self);
        item.extend([
            ("App".into(), s(&self.app)),
            ("Width".into(), n(self.width)),
            ("Height".into(), n(self.height)),
            ("DateVisited".into(), date(&self.date_visited)),
            ("Device".into(), opt_s(self.device.as_deref())),
            ("DeviceType".into(), opt_s(self.device_type.as_deref())),
            ("Browser".into(), opt_s(self.browser.as_deref())),
            ("OS".into(), opt_s(self.os.as_deref())),
            ("Webkit".into(), opt_s(self.webkit.as_deref())),
            ("Version".into(), opt_s(self.version.as_deref())),
            ("DateAdded".into(), date(&self.date_added)),
        ]);
        item
    }

    fn decode(item: &Item) -> Result<Self, DecodeError> {
        let a = Attrs::new(Self::TYPE, item);
        a.expect_type(Self::TYPE)?;
        Ok(Self {
            ip: a.key_suffix(PK, "VISITOR#")?.to_string(),
            app: a.s("App")?.to_string(),
            width: a.n("Width")?,
            height: a.n("Height")?,
            date_visited: a.date("DateVisited")?,
            device: a.opt_s("Device")?,
            device_type: a.opt_s("DeviceType")?,
            browser: a.opt_s("Browser")?,
            os: a.opt_s("OS")?,
            webkit: a.opt_s("Webkit")?,
            version: a.opt_s("Version")?,
            date_added: a.date("DateAdded")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::parse_date;

    const PIXEL: &str = "Mozilla/5.0 (Linux; Android 11; Pixel 4 XL) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/86.0.4240.198 Mobile Safari/537.36";
    const MAC_CHROME: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 11_1_0) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/87.0.4280.88 Safari/537.36";
    const MAC_SAFARI: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_6) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.0.2 Safari/605.1.15";
    const WINDOWS_CHROME: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/87.0.4280.88 Safari/537.36";
    const IPHONE_SAFARI: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 14_3 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.0.2 Mobile/15E148 Safari/604.1";
    const IPHONE_LINKEDIN: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 14_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Mobile/15E148 [LinkedInApp]";
    const SAMSUNG: &str = "Mozilla/5.0 (Linux; Android 10; SM-G973U) AppleWebKit/537.36 (KHTML, like Gecko) SamsungBrowser/13.2 Chrome/83.0.4103.106 Mobile Safari/537.36";

    fn ua(app: &str) -> (String, String, String, String, String, Option<String>) {
        let ua = parse_user_agent(app).unwrap();
        (ua.device, ua.device_type, ua.browser, ua.os, ua.webkit, ua.version)
    }

    fn owned(
        parts: (&str, &str, &str, &str, &str, Option<&str>),
    ) -> (String, String, String, String, String, Option<String>) {
        (
            parts.0.into(),
            parts.1.into(),
            parts.2.into(),
            parts.3.into(),
            parts.4.into(),
            parts.5.map(Into::into),
        )
    }

    #[test]
    fn every_rule_compiles() {
        assert_eq!(MATCHERS.len(), RULES.len());
    }

    #[test]
    fn known_user_agents() {
        assert_eq!(
            ua(PIXEL),
            owned(("Pixel 4 XL", "mobile", "chrome", "11", "537.36", Some("86.0.4240.198")))
        );
        assert_eq!(
            ua(MAC_CHROME),
            owned(("mac", "desktop", "chrome", "11.1.0", "537.36", Some("87.0.4280.88")))
        );
        assert_eq!(
            ua(MAC_SAFARI),
            owned(("mac", "desktop", "safari", "10.15.6", "605.1.15", Some("14.0.2")))
        );
        assert_eq!(
            ua(WINDOWS_CHROME),
            owned(("windows", "desktop", "chrome", "10.0", "537.36", Some("87.0.4280.88")))
        );
        assert_eq!(
            ua(IPHONE_SAFARI),
            owned(("iphone", "mobile", "safari", "14.3", "605.1.15", Some("14.0.2")))
        );
        assert_eq!(
            ua(IPHONE_LINKEDIN),
            owned(("iphone", "mobile", "[LinkedInApp]", "14.2", "605.1.15", None))
        );
        assert_eq!(
            ua(SAMSUNG),
            owned(("SM-G973U", "mobile", "samsung", "10", "537.36", Some("13.2")))
        );
    }

    #[test]
    fn unknown_agents_leave_fields_empty() {
        let now = parse_date("2020-01-01T00:00:00.000Z").unwrap();
        let browser = Browser::new("0.0.0.0", "curl/7.64.1", 100, 200, now, now);
        assert_eq!(browser.device, None);
        assert_eq!(browser.browser, None);
        assert_eq!(browser.version, None);
    }

    #[test]
    fn decode_inverts_encode() {
        let visited = parse_date("2020-01-01T00:00:00.000Z").unwrap();
        let added = parse_date("2020-01-02T00:00:00.000Z").unwrap();
        let browser = Browser::new("0.0.0.0", PIXEL, 100, 200, visited, added);
        assert_eq!(
            browser.key(),
            Key::new("VISITOR#0.0.0.0", "BROWSER#2020-01-01T00:00:00.000Z")
        );
        let item = browser.encode();
        assert_eq!(item["Device"].as_s().unwrap(), "Pixel 4 XL");
        assert_eq!(Browser::decode(&item).unwrap(), browser);
    }
}
