//! Profile & log store
//!
//! [`LogStore`] is the persistence seam: profiles, the append-only entry log,
//! plan proposals and the single active plan per user. [`MemoryStore`] keeps
//! everything behind one `RwLock`; `database::SqliteStore` persists to SQLite.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::admission::AdmissionGate;
use crate::error::{ConflictError, DatabaseError, Result, ValidationError};
use crate::models::{LogEntry, PlanProposal, PlanState, SequencedEntry, UserProfile};

/// Entries fetched per page when a cursor is created without an explicit size
pub const DEFAULT_PAGE_SIZE: usize = 256;

/// Ordering key of an entry inside a query: timestamp, then sequence
pub type CursorPosition = (DateTime<Utc>, u64);

/// One page request against a user's log
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    /// Resume strictly after this position
    pub after: Option<CursorPosition>,
    /// Ignore entries appended after this sequence
    pub max_sequence: u64,
    pub limit: usize,
}

impl PageRequest {
    pub fn matches(&self, entry: &SequencedEntry) -> bool {
        let timestamp = entry.entry.timestamp();
        timestamp >= self.since
            && timestamp < self.until
            && entry.sequence <= self.max_sequence
            && self
                .after
                .map_or(true, |after| (timestamp, entry.sequence) > after)
    }
}

/// Durable record of profiles, logs and plans
pub trait LogStore: Send + Sync {
    fn put_profile(&self, profile: &UserProfile) -> Result<()>;

    fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>>;

    /// Validate and append one entry, returning it with its sequence position
    fn append(&self, user_id: &str, entry: LogEntry) -> Result<SequencedEntry>;

    /// Single entry by sequence position
    fn get_entry(&self, user_id: &str, sequence: u64) -> Result<Option<SequencedEntry>>;

    /// One page of entries ordered by (timestamp, sequence)
    fn query_page(&self, user_id: &str, request: &PageRequest) -> Result<Vec<SequencedEntry>>;

    /// Highest sequence assigned for the user, 0 for an empty log
    fn latest_sequence(&self, user_id: &str) -> Result<u64>;

    /// Store a draft, pending or rejected proposal
    fn save_proposal(&self, proposal: &PlanProposal) -> Result<()>;

    fn get_proposal(&self, user_id: &str, plan_id: Uuid) -> Result<Option<PlanProposal>>;

    /// All proposals for a user, oldest first
    fn list_proposals(&self, user_id: &str) -> Result<Vec<PlanProposal>>;

    fn get_active_plan(&self, user_id: &str) -> Result<Option<PlanProposal>>;

    /// Compare-and-set the active plan; the previous one becomes superseded
    fn set_active_plan(
        &self,
        user_id: &str,
        plan: &PlanProposal,
        expected_active: Option<Uuid>,
    ) -> Result<()>;

    /// Lazy cursor over `since <= timestamp < until`
    fn query(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<EntryCursor<'_, Self>>
    where
        Self: Sized,
    {
        EntryCursor::new(self, user_id, since, until, DEFAULT_PAGE_SIZE)
    }
}

/// Lazy, restartable, finite iterator over a user's entries
///
/// The high-water sequence is captured at creation; entries appended later
/// are never yielded, so iteration always ends.
pub struct EntryCursor<'a, S: LogStore + ?Sized> {
    store: &'a S,
    user_id: String,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
    page_size: usize,
    high_water: u64,
    position: Option<CursorPosition>,
    buffer: VecDeque<SequencedEntry>,
    exhausted: bool,
}

impl<'a, S: LogStore + ?Sized> EntryCursor<'a, S> {
    pub fn new(
        store: &'a S,
        user_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        page_size: usize,
    ) -> Result<Self> {
        let high_water = store.latest_sequence(user_id)?;
        Ok(EntryCursor {
            store,
            user_id: user_id.to_string(),
            since,
            until,
            page_size: page_size.max(1),
            high_water,
            position: None,
            buffer: VecDeque::new(),
            exhausted: since >= until || high_water == 0,
        })
    }

    pub fn high_water(&self) -> u64 {
        self.high_water
    }

    /// Rewind to the first entry; the high-water mark is kept
    pub fn restart(&mut self) {
        self.position = None;
        self.buffer.clear();
        self.exhausted = self.since >= self.until || self.high_water == 0;
    }

    /// Drain the cursor into a vector
    pub fn collect_entries(self) -> Result<Vec<SequencedEntry>> {
        self.collect()
    }

    fn fetch_page(&mut self) -> Result<()> {
        let request = PageRequest {
            since: self.since,
            until: self.until,
            after: self.position,
            max_sequence: self.high_water,
            limit: self.page_size,
        };
        let page = self.store.query_page(&self.user_id, &request)?;
        if page.len() < self.page_size {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.position = Some((last.entry.timestamp(), last.sequence));
        }
        debug!(user_id = %self.user_id, fetched = page.len(), "Fetched entry page");
        self.buffer.extend(page);
        Ok(())
    }
}

impl<S: LogStore + ?Sized> Clone for EntryCursor<'_, S> {
    fn clone(&self) -> Self {
        EntryCursor {
            store: self.store,
            user_id: self.user_id.clone(),
            since: self.since,
            until: self.until,
            page_size: self.page_size,
            high_water: self.high_water,
            position: self.position,
            buffer: self.buffer.clone(),
            exhausted: self.exhausted,
        }
    }
}

impl<S: LogStore + ?Sized> Iterator for EntryCursor<'_, S> {
    type Item = Result<SequencedEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch_page() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

/// Entry validation shared by every backend: ranges, then the `supersedes` target
pub fn validate_append(entry: &LogEntry, target: Option<&SequencedEntry>) -> Result<()> {
    entry.validate()?;
    if let Some(sequence) = entry.supersedes() {
        let target = target.ok_or_else(|| {
            ValidationError::new("supersedes", format!("no entry at sequence {}", sequence))
        })?;
        if target.entry.kind() != entry.kind() {
            return Err(ValidationError::new(
                "supersedes",
                format!(
                    "entry {} is a {} entry, not a {} entry",
                    sequence,
                    target.entry.kind(),
                    entry.kind()
                ),
            )
            .into());
        }
    }
    Ok(())
}

/// Proposal write rules shared by every backend
pub fn validate_proposal_write(proposal: &PlanProposal, existing: Option<&PlanProposal>) -> Result<()> {
    if proposal.state == PlanState::Approved {
        return Err(ValidationError::new(
            "state",
            "approved plans are stored through set_active_plan",
        )
        .into());
    }
    if let Some(existing) = existing {
        if existing.user_id != proposal.user_id {
            return Err(ValidationError::new("user_id", "proposal belongs to another user").into());
        }
        if matches!(existing.state, PlanState::Approved | PlanState::Superseded) {
            return Err(ConflictError::InvalidTransition {
                plan_id: existing.id,
                from: existing.state,
                action: "overwrite".to_string(),
            }
            .into());
        }
    }
    Ok(())
}

/// Time the activating transition happened, used to stamp the superseded plan
pub fn activation_time(plan: &PlanProposal) -> DateTime<Utc> {
    plan.transitions
        .last()
        .map(|t| t.at)
        .unwrap_or(plan.created_at)
}

#[derive(Default)]
struct MemoryInner {
    profiles: HashMap<String, UserProfile>,
    logs: HashMap<String, Vec<SequencedEntry>>,
    proposals: HashMap<Uuid, PlanProposal>,
    proposal_order: Vec<Uuid>,
    active: HashMap<String, Uuid>,
}

/// In-memory store
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, MemoryInner>> {
        self.inner.read().map_err(|_| DatabaseError::Poisoned.into())
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, MemoryInner>> {
        self.inner.write().map_err(|_| DatabaseError::Poisoned.into())
    }
}

impl LogStore for MemoryStore {
    fn put_profile(&self, profile: &UserProfile) -> Result<()> {
        profile.validate()?;
        self.write()?
            .profiles
            .insert(profile.id.clone(), profile.clone());
        Ok(())
    }

    fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        Ok(self.read()?.profiles.get(user_id).cloned())
    }

    fn append(&self, user_id: &str, entry: LogEntry) -> Result<SequencedEntry> {
        let mut inner = self.write()?;
        let log = inner.logs.entry(user_id.to_string()).or_default();

        let target = entry
            .supersedes()
            .and_then(|seq| log.iter().find(|e| e.sequence == seq));
        validate_append(&entry, target)?;

        let sequenced = SequencedEntry {
            user_id: user_id.to_string(),
            sequence: log.last().map_or(1, |e| e.sequence + 1),
            entry,
        };
        log.push(sequenced.clone());
        Ok(sequenced)
    }

    fn get_entry(&self, user_id: &str, sequence: u64) -> Result<Option<SequencedEntry>> {
        Ok(self
            .read()?
            .logs
            .get(user_id)
            .and_then(|log| log.iter().find(|e| e.sequence == sequence))
            .cloned())
    }

    fn query_page(&self, user_id: &str, request: &PageRequest) -> Result<Vec<SequencedEntry>> {
        let inner = self.read()?;
        let Some(log) = inner.logs.get(user_id) else {
            return Ok(Vec::new());
        };

        let mut matching: Vec<&SequencedEntry> = log.iter().filter(|e| request.matches(e)).collect();
        matching.sort_by_key(|e| (e.entry.timestamp(), e.sequence));
        Ok(matching
            .into_iter()
            .take(request.limit)
            .cloned()
            .collect())
    }

    fn latest_sequence(&self, user_id: &str) -> Result<u64> {
        Ok(self
            .read()?
            .logs
            .get(user_id)
            .and_then(|log| log.last())
            .map_or(0, |e| e.sequence))
    }

    fn save_proposal(&self, proposal: &PlanProposal) -> Result<()> {
        let mut inner = self.write()?;
        validate_proposal_write(proposal, inner.proposals.get(&proposal.id))?;
        if inner.proposals.insert(proposal.id, proposal.clone()).is_none() {
            inner.proposal_order.push(proposal.id);
        }
        Ok(())
    }

    fn get_proposal(&self, user_id: &str, plan_id: Uuid) -> Result<Option<PlanProposal>> {
        Ok(self
            .read()?
            .proposals
            .get(&plan_id)
            .filter(|p| p.user_id == user_id)
            .cloned())
    }

    fn list_proposals(&self, user_id: &str) -> Result<Vec<PlanProposal>> {
        let inner = self.read()?;
        Ok(inner
            .proposal_order
            .iter()
            .filter_map(|id| inner.proposals.get(id))
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }

    fn get_active_plan(&self, user_id: &str) -> Result<Option<PlanProposal>> {
        let inner = self.read()?;
        Ok(inner
            .active
            .get(user_id)
            .and_then(|id| inner.proposals.get(id))
            .cloned())
    }

    fn set_active_plan(
        &self,
        user_id: &str,
        plan: &PlanProposal,
        expected_active: Option<Uuid>,
    ) -> Result<()> {
        AdmissionGate::ensure_activatable(plan)?;
        if plan.user_id != user_id {
            return Err(ValidationError::new("user_id", "plan belongs to another user").into());
        }

        let mut inner = self.write()?;
        let actual = inner.active.get(user_id).copied();
        if actual != expected_active {
            return Err(ConflictError::ActivePlanChanged {
                expected: expected_active,
                actual,
            }
            .into());
        }

        // Build every change before touching the maps so a failure leaves nothing behind
        let retired = match actual.and_then(|id| inner.proposals.get(&id)) {
            Some(previous) => Some(AdmissionGate::supersede(
                previous.clone(),
                plan.id,
                activation_time(plan),
            )?),
            None => None,
        };

        if let Some(retired) = retired {
            inner.proposals.insert(retired.id, retired);
        }
        if inner.proposals.insert(plan.id, plan.clone()).is_none() {
            inner.proposal_order.push(plan.id);
        }
        inner.active.insert(user_id.to_string(), plan.id);
        debug!(user_id, plan_id = %plan.id, "Active plan replaced");
        Ok(())
    }
}
