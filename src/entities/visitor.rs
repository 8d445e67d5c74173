use super::{base_item, visitor_pk, Entity};
use crate::codec::{n, Attrs};
use crate::error::DecodeError;
use crate::store::{Item, Key, PK};

pub const NUMBER_SESSIONS: &str = "NumberSessions";

#[derive(Debug, Clone, PartialEq)]
pub struct Visitor {
    pub ip: String,
    pub number_sessions: i64,
}

impl Visitor {
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            number_sessions: 0,
        }
    }

    pub fn with_sessions(ip: impl Into<String>, number_sessions: i64) -> Self {
        Self {
            ip: ip.into(),
            number_sessions,
        }
    }

    pub fn key_for(ip: &str) -> Key {
        Key::new(visitor_pk(ip), "#VISITOR")
    }
}

impl Entity for Visitor {
    const TYPE: &'static str = "visitor";

    fn key(&self) -> Key {
        Self::key_for(&self.ip)
    }

    fn encode(&self) -> Item {
        let mut item = base_item(self);
        item.insert(NUMBER_SESSIONS.into(), n(self.number_sessions));
        item
    }

    fn decode(item: &Item) -> Result<Self, DecodeError> {
        let a = Attrs::new(Self::TYPE, item);
        a.expect_type(Self::TYPE)?;
        Ok(Self {
            ip: a.key_suffix(PK, "VISITOR#")?.to_string(),
            number_sessions: a.n(NUMBER_SESSIONS)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_dynamodb::types::AttributeValue as Av;

    #[test]
    fn key_and_item() {
        let visitor = Visitor::with_sessions("0.0.0.0", 3);
        assert_eq!(visitor.key(), Key::new("VISITOR#0.0.0.0", "#VISITOR"));

        let item = visitor.encode();
        assert_eq!(item["Type"], Av::S("visitor".into()));
        assert_eq!(item["NumberSessions"], Av::N("3".into()));
        assert_eq!(Visitor::decode(&item).unwrap(), visitor);
    }

    #[test]
    fn wrong_type_is_rejected() {
        let mut item = Visitor::new("0.0.0.0").encode();
        item.insert("Type".into(), Av::S("session".into()));
        let err = Visitor::decode(&item).unwrap_err();
        assert_eq!(err.entity, "visitor");
    }
}
