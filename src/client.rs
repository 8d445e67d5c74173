use chrono::{DateTime, Utc};
use futures::TryStreamExt;

use crate::aggregate::{page_rollups, summarize_session};
use crate::entities::{page_pk, Browser, Entity, Location, Rollup, Session, Visit, Visitor};
use crate::entities::NUMBER_SESSIONS;
use crate::error::{Error, Result};
use crate::store::{Index, Item, Store, TYPE};

#[derive(Debug, Clone, PartialEq)]
pub struct VisitorDetails {
    pub visitor: Visitor,
    pub location: Option<Location>,
    pub browsers: Vec<Browser>,
    pub sessions: Vec<Session>,
    pub visits: Vec<Visit>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionDetails {
    pub session: Session,
    pub visits: Vec<Visit>,
}

fn kind(item: &Item) -> Option<&str> {
    item.get(TYPE).and_then(|v| v.as_s().ok()).map(String::as_str)
}

#[derive(Clone)]
pub struct TableClient<S> {
    store: S,
}

impl<S: Store> TableClient<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    async fn create<E: Entity>(&self, entity: &E, action: &str) -> Result<()> {
        self.store
            .put_if_absent(entity.encode())
            .await
            .map_err(|e| Error::from_store(E::TYPE, action, e))
    }

    async fn delete<E: Entity>(&self, entity: &E, action: &str) -> Result<()> {
        self.store
            .delete_if_exists(&entity.key())
            .await
            .map_err(|e| Error::from_store(E::TYPE, action, e))
    }

    async fn create_many<E: Entity>(&self, entities: &[E], action: &str) -> Result<()> {
        if entities.is_empty() {
            return Ok(());
        }
        self.store
            .batch_put(entities.iter().map(E::encode).collect())
            .await
            .map_err(|e| Error::from_store(E::TYPE, action, e))
    }

    async fn query(
        &self,
        index: Index,
        partition: &str,
        entity: &'static str,
        action: &str,
    ) -> Result<Vec<Item>> {
        self.store
            .query(index, partition, true)
            .try_collect()
            .await
            .map_err(|e| Error::from_store(entity, action, e))
    }

    // Visitor

    pub async fn add_visitor(&self, visitor: &Visitor) -> Result<()> {
        self.create(visitor, "add visitor").await
    }

    pub async fn remove_visitor(&self, visitor: &Visitor) -> Result<()> {
        self.delete(visitor, "remove visitor").await
    }

    pub async fn increment_visitor_sessions(&self, ip: &str) -> Result<i64> {
        self.store
            .increment_counter(&Visitor::key_for(ip), NUMBER_SESSIONS, 1)
            .await
            .map_err(|e| Error::from_store(Visitor::TYPE, "increment visitor sessions", e))
    }

    pub async fn decrement_visitor_sessions(&self, ip: &str) -> Result<i64> {
        self.store
            .increment_counter(&Visitor::key_for(ip), NUMBER_SESSIONS, -1)
            .await
            .map_err(|e| Error::from_store(Visitor::TYPE, "decrement visitor sessions", e))
    }

    // Location

    pub async fn add_location(&self, location: &Location) -> Result<()> {
        self.create(location, "add location").await
    }

    pub async fn remove_location(&self, location: &Location) -> Result<()> {
        self.delete(location, "remove location").await
    }

    pub async fn list_locations(&self) -> Result<Vec<Location>> {
        let items: Vec<Item> = self
            .store
            .scan(Location::TYPE)
            .try_collect()
            .await
            .map_err(|e| Error::from_store(Location::TYPE, "list locations", e))?;
        items
            .iter()
            .map(|item| Location::decode(item).map_err(Error::from))
            .collect()
    }

    // Browser

    pub async fn add_browser(&self, browser: &Browser) -> Result<()> {
        self.create(browser, "add browser").await
    }

    pub async fn remove_browser(&self, browser: &Browser) -> Result<()> {
        self.delete(browser, "remove browser").await
    }

    pub async fn add_browsers(&self, browsers: &[Browser]) -> Result<()> {
        self.create_many(browsers, "add browsers").await
    }

    // Visit

    pub async fn add_visit(&self, visit: &Visit) -> Result<()> {
        self.create(visit, "add visit").await
    }

    pub async fn remove_visit(&self, visit: &Visit) -> Result<()> {
        self.delete(visit, "remove visit").await
    }

    pub async fn add_visits(&self, visits: &[Visit]) -> Result<()> {
        self.create_many(visits, "add visits").await
    }

    // Session

    pub async fn add_session(&self, session: &Session) -> Result<()> {
        self.create(session, "add session").await
    }

    pub async fn update_session(&self, session: &Session) -> Result<()> {
        self.store
            .put_if_exists(session.encode())
            .await
            .map_err(|e| Error::from_store(Session::TYPE, "update session", e))
    }

    pub async fn remove_session(&self, session: &Session) -> Result<()> {
        self.delete(session, "remove session").await
    }

    // Rollups

    pub async fn put_rollup(&self, rollup: &Rollup) -> Result<()> {
        self.store
            .put_overwrite(rollup.encode())
            .await
            .map_err(|e| Error::from_store(rollup.kind(), "put rollup", e))
    }

    // Reads

    pub async fn get_visitor_details(&self, ip: &str) -> Result<VisitorDetails> {
        let key = Visitor::key_for(ip);
        let items = self
            .query(Index::Primary, &key.pk, Visitor::TYPE, "get visitor details")
            .await?;

        let mut visitor = None;
        let mut location = None;
        let mut browsers = Vec::new();
        let mut sessions = Vec::new();
        let mut visits = Vec::new();
        for item in &items {
            match kind(item) {
                Some(Visitor::TYPE) => visitor = Some(Visitor::decode(item)?),
                Some(Location::TYPE) => location = Some(Location::decode(item)?),
                Some(Browser::TYPE) => browsers.push(Browser::decode(item)?),
                Some(Session::TYPE) => sessions.push(Session::decode(item)?),
                Some(Visit::TYPE) => visits.push(Visit::decode(item)?),
                other => tracing::warn!(pk=%key.pk, kind=?other, "skipping unknown item"),
            }
        }

        let visitor = visitor.ok_or(Error::NotFound {
            entity: Visitor::TYPE,
            key,
        })?;
        Ok(VisitorDetails {
            visitor,
            location,
            browsers,
            sessions,
            visits,
        })
    }

    pub async fn get_session_details(
        &self,
        ip: &str,
        session_start: &DateTime<Utc>,
    ) -> Result<SessionDetails> {
        let partition = Session::gsi2_pk(ip, session_start);
        let items = self
            .query(Index::Gsi2, &partition, Session::TYPE, "get session details")
            .await?;

        let mut session = None;
        let mut visits = Vec::new();
        for item in &items {
            match kind(item) {
                Some(Session::TYPE) => session = Some(Session::decode(item)?),
                Some(Visit::TYPE) => visits.push(Visit::decode(item)?),
                _ => {}
            }
        }
        let session = session.ok_or_else(|| Error::NotFound {
            entity: Session::TYPE,
            key: Session::key_for(ip, session_start),
        })?;
        Ok(SessionDetails { session, visits })
    }

    pub async fn get_page_visits(&self, slug: &str) -> Result<Vec<Visit>> {
        let items = self
            .query(Index::Gsi1, &page_pk(slug), Visit::TYPE, "get page visits")
            .await?;
        items
            .iter()
            .filter(|item| kind(item) == Some(Visit::TYPE))
            .map(|item| Visit::decode(item).map_err(Error::from))
            .collect()
    }

    // Multi-step writes. Each stops at the first failing step; earlier steps stay written.

    pub async fn add_new_visitor(
        &self,
        visitor: &Visitor,
        location: Option<&Location>,
        browsers: &[Browser],
        visits: &[Visit],
    ) -> Result<Session> {
        let session = summarize_session(visits)?;
        self.add_visitor(visitor).await?;
        if let Some(location) = location {
            self.add_location(location).await?;
        }
        self.add_browsers(browsers).await?;
        self.add_session(&session).await?;
        self.add_visits(visits).await?;
        tracing::info!(ip=%visitor.ip, visits=visits.len(), "added new visitor");
        Ok(session)
    }

    pub async fn add_new_session(
        &self,
        ip: &str,
        browsers: &[Browser],
        visits: &[Visit],
    ) -> Result<Session> {
        let session = summarize_session(visits)?;
        self.increment_visitor_sessions(ip).await?;
        self.add_browsers(browsers).await?;
        self.add_session(&session).await?;
        self.add_visits(visits).await?;
        tracing::info!(ip, start=%session.session_start, visits=visits.len(), "added session");
        Ok(session)
    }

    /// Folds `absorbed` sessions into `survivor`.
    ///
    /// `visits` are the survivor's visits, already relinked; they are written
    /// over whatever was stored for them. The survivor is rewritten if it is
    /// stored and created otherwise. Each absorbed session is deleted and
    /// taken off the visitor's session count.
    pub async fn merge_sessions(
        &self,
        ip: &str,
        survivor: &Session,
        absorbed: &[Session],
        browsers: &[Browser],
        visits: &[Visit],
    ) -> Result<()> {
        match self.update_session(survivor).await {
            Err(e) if e.is_not_found() => {
                self.increment_visitor_sessions(ip).await?;
                self.add_session(survivor).await?;
            }
            other => other?,
        }
        self.add_visits(visits).await?;
        self.add_browsers(browsers).await?;
        for session in absorbed {
            self.remove_session(session).await?;
            self.decrement_visitor_sessions(ip).await?;
        }
        tracing::info!(
            ip,
            start=%survivor.session_start,
            absorbed=absorbed.len(),
            "merged sessions"
        );
        Ok(())
    }

    pub async fn recompute_page(&self, slug: &str) -> Result<Vec<Rollup>> {
        let visits = self.get_page_visits(slug).await?;
        let rollups = page_rollups(&visits)?;
        for rollup in &rollups {
            self.put_rollup(rollup).await?;
        }
        tracing::info!(slug, visits=visits.len(), rollups=rollups.len(), "recomputed page");
        Ok(rollups)
    }
}
