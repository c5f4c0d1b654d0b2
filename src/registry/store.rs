//! Authoritative in-memory registration store
//!
//! The store exclusively owns every [`RegistrationRecord`]. All mutations
//! (register, renew, deregister, sweep) serialize on the write lock, so a
//! renew can never race a sweep into resurrecting a removed record;
//! lookups take the read lock and see a consistent snapshot.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::channel::Endpoint;
use crate::error::{RegistryError, RegistryResult};

/// A live registration owned by the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRecord {
    /// Opaque id assigned at registration, unique per live registration
    pub service_id: Uuid,
    /// Category the service is discovered under, e.g. "STORAGE"
    pub service_type: String,
    /// Host the service listens on
    pub host: String,
    /// Port the service listens on
    pub port: u16,
    /// Process id of the registering service
    pub pid: u32,
    /// Additional service metadata, not interpreted by the registry
    pub metadata: Map<String, Value>,
    /// When the registration was created
    pub registered_at: DateTime<Utc>,
    /// When the lease was last renewed
    pub last_renewed: DateTime<Utc>,
    /// Lease time-to-live
    pub ttl: Duration,
}

impl RegistrationRecord {
    /// The endpoint this record advertises.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }

    /// Whether the lease has lapsed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        now.signed_duration_since(self.last_renewed) > ttl
    }
}

/// Validated input for a new registration
#[derive(Debug, Clone)]
pub struct NewRegistration {
    /// Category the service is discovered under
    pub service_type: String,
    /// Host the service listens on
    pub host: String,
    /// Port the service listens on
    pub port: u16,
    /// Process id of the registering service
    pub pid: u32,
    /// Lease time-to-live
    pub ttl: Duration,
    /// Additional service metadata
    pub metadata: Map<String, Value>,
}

impl NewRegistration {
    /// A registration for the current process with empty metadata.
    pub fn new(
        service_type: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        ttl: Duration,
    ) -> Self {
        Self {
            service_type: service_type.into(),
            host: host.into(),
            port,
            pid: std::process::id(),
            ttl,
            metadata: Map::new(),
        }
    }
}

/// The authoritative map from service id to registration
#[derive(Default)]
pub struct RegistryStore {
    records: RwLock<HashMap<Uuid, RegistrationRecord>>,
}

impl RegistryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and insert a new registration, returning the stored record.
    ///
    /// Malformed records are rejected rather than stored: empty host, port
    /// zero, or a zero ttl.
    pub fn register(&self, new: NewRegistration) -> RegistryResult<RegistrationRecord> {
        if new.host.trim().is_empty() {
            return Err(RegistryError::InvalidRecord("host must not be empty".into()));
        }
        if new.port == 0 {
            return Err(RegistryError::InvalidRecord("port must be non-zero".into()));
        }
        if new.ttl.is_zero() {
            return Err(RegistryError::InvalidRecord("ttl must be positive".into()));
        }

        let now = Utc::now();
        let record = RegistrationRecord {
            service_id: Uuid::new_v4(),
            service_type: new.service_type,
            host: new.host,
            port: new.port,
            pid: new.pid,
            metadata: new.metadata,
            registered_at: now,
            last_renewed: now,
            ttl: new.ttl,
        };

        let mut records = self.records.write();
        records.insert(record.service_id, record.clone());
        Ok(record)
    }

    /// Refresh a lease. An unknown or already-expired id fails with
    /// `UnknownRegistration`: the caller must re-register for a fresh id,
    /// a lease is never silently resurrected.
    pub fn renew(&self, service_id: Uuid) -> RegistryResult<()> {
        let now = Utc::now();
        let mut records = self.records.write();
        match records.get_mut(&service_id) {
            Some(record) if record.is_expired(now) => {
                records.remove(&service_id);
                Err(RegistryError::UnknownRegistration(service_id))
            }
            Some(record) => {
                record.last_renewed = now;
                Ok(())
            }
            None => Err(RegistryError::UnknownRegistration(service_id)),
        }
    }

    /// Remove a registration immediately, returning the removed record.
    pub fn deregister(&self, service_id: Uuid) -> RegistryResult<RegistrationRecord> {
        let mut records = self.records.write();
        records
            .remove(&service_id)
            .ok_or(RegistryError::UnknownRegistration(service_id))
    }

    /// The record for a specific id, if still live.
    pub fn get(&self, service_id: Uuid) -> Option<RegistrationRecord> {
        let now = Utc::now();
        self.records
            .read()
            .get(&service_id)
            .filter(|record| !record.is_expired(now))
            .cloned()
    }

    /// The most-recently-renewed live record of a service type.
    ///
    /// Expired records are filtered at read time, so a lookup between
    /// sweeps never returns a stale endpoint.
    pub fn lookup(&self, service_type: &str) -> RegistryResult<RegistrationRecord> {
        let now = Utc::now();
        self.records
            .read()
            .values()
            .filter(|r| r.service_type == service_type && !r.is_expired(now))
            .max_by_key(|r| r.last_renewed)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(service_type.to_string()))
    }

    /// All live records of a service type, most recently renewed first.
    pub fn lookup_all(&self, service_type: &str) -> Vec<RegistrationRecord> {
        let now = Utc::now();
        let mut records: Vec<_> = self
            .records
            .read()
            .values()
            .filter(|r| r.service_type == service_type && !r.is_expired(now))
            .cloned()
            .collect();
        records.sort_by_key(|r| std::cmp::Reverse(r.last_renewed));
        records
    }

    /// Every live record.
    pub fn list(&self) -> Vec<RegistrationRecord> {
        let now = Utc::now();
        self.records
            .read()
            .values()
            .filter(|r| !r.is_expired(now))
            .cloned()
            .collect()
    }

    /// Remove every record whose lease lapsed before `now`, returning the
    /// evicted records.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<RegistrationRecord> {
        let mut records = self.records.write();
        let expired: Vec<Uuid> = records
            .values()
            .filter(|r| r.is_expired(now))
            .map(|r| r.service_id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| records.remove(&id))
            .collect()
    }

    /// Number of records currently held, including not-yet-swept ones.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn quick(service_type: &str, ttl: Duration) -> NewRegistration {
        NewRegistration::new(service_type, "10.0.0.5", 4000, ttl)
    }

    #[test]
    fn register_then_lookup_returns_the_endpoint() {
        let store = RegistryStore::new();
        let record = store
            .register(quick("SM", Duration::from_secs(10)))
            .unwrap();
        let found = store.lookup("SM").unwrap();
        assert_eq!(found.service_id, record.service_id);
        assert_eq!(found.endpoint(), Endpoint::new("10.0.0.5", 4000));
    }

    #[test]
    fn malformed_records_are_rejected() {
        let store = RegistryStore::new();
        assert!(matches!(
            store.register(NewRegistration::new("SM", "", 4000, Duration::from_secs(10))),
            Err(RegistryError::InvalidRecord(_))
        ));
        assert!(matches!(
            store.register(NewRegistration::new("SM", "10.0.0.5", 0, Duration::from_secs(10))),
            Err(RegistryError::InvalidRecord(_))
        ));
        assert!(matches!(
            store.register(NewRegistration::new("SM", "10.0.0.5", 4000, Duration::ZERO)),
            Err(RegistryError::InvalidRecord(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn deregistered_ids_are_never_returned() {
        let store = RegistryStore::new();
        let record = store
            .register(quick("SM", Duration::from_secs(10)))
            .unwrap();
        store.deregister(record.service_id).unwrap();
        assert!(matches!(
            store.lookup("SM"),
            Err(RegistryError::NotFound(_))
        ));
        assert!(matches!(
            store.deregister(record.service_id),
            Err(RegistryError::UnknownRegistration(_))
        ));
    }

    #[test]
    fn lookup_skips_expired_records_before_any_sweep() {
        let store = RegistryStore::new();
        store
            .register(quick("SM", Duration::from_millis(20)))
            .unwrap();
        sleep(Duration::from_millis(40));
        assert!(matches!(
            store.lookup("SM"),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn renew_keeps_a_lease_alive() {
        let store = RegistryStore::new();
        let record = store
            .register(quick("SM", Duration::from_millis(150)))
            .unwrap();
        for _ in 0..3 {
            sleep(Duration::from_millis(50));
            store.renew(record.service_id).unwrap();
        }
        assert!(store.lookup("SM").is_ok());
    }

    #[test]
    fn renew_of_an_expired_lease_demands_re_registration() {
        let store = RegistryStore::new();
        let record = store
            .register(quick("SM", Duration::from_millis(20)))
            .unwrap();
        sleep(Duration::from_millis(40));
        assert!(matches!(
            store.renew(record.service_id),
            Err(RegistryError::UnknownRegistration(id)) if id == record.service_id
        ));
        // The failed renew also dropped the stale record.
        assert!(store.is_empty());
    }

    #[test]
    fn sweep_evicts_only_lapsed_leases() {
        let store = RegistryStore::new();
        let short = store
            .register(quick("SM", Duration::from_millis(20)))
            .unwrap();
        let long = store
            .register(quick("CM", Duration::from_secs(60)))
            .unwrap();
        sleep(Duration::from_millis(40));

        let evicted = store.sweep(Utc::now());
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].service_id, short.service_id);
        assert_eq!(store.list().len(), 1);
        assert_eq!(store.lookup("CM").unwrap().service_id, long.service_id);
    }

    #[test]
    fn lookup_prefers_the_most_recently_renewed_instance() {
        let store = RegistryStore::new();
        let first = store
            .register(quick("SM", Duration::from_secs(30)))
            .unwrap();
        let second = store
            .register(quick("SM", Duration::from_secs(30)))
            .unwrap();

        sleep(Duration::from_millis(15));
        store.renew(first.service_id).unwrap();
        assert_eq!(store.lookup("SM").unwrap().service_id, first.service_id);

        sleep(Duration::from_millis(15));
        store.renew(second.service_id).unwrap();
        assert_eq!(store.lookup("SM").unwrap().service_id, second.service_id);

        assert_eq!(store.lookup_all("SM").len(), 2);
    }
}
