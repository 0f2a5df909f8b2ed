//! DHCP lease allocation and tracking.
//!
//! This module owns the single address pool a server hands out. It implements
//! the server-side lease state machine including:
//!
//! - IP allocation from a cursor over the configured range
//! - Reuse of released and expired addresses in FIFO order
//! - Offered leases that become bound once the client confirms them
//! - Release, decline (with a cooldown) and lazy expiry
//! - A bounded per-client history of past leases
//!
//! # Thread Safety
//!
//! [`LeasePool`] keeps all of its mutable state behind one [`Mutex`], so
//! "check the client's lease, otherwise allocate" is atomic. Two concurrent
//! DISCOVERs from different clients never see the same address, and two from
//! the same client converge on one lease.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};

/// How long declined IPs remain unavailable by default (1 hour).
///
/// When a client sends DECLINE (indicating IP conflict), the IP is removed
/// from the pool for this duration to avoid repeatedly offering conflicting IPs.
pub const DEFAULT_DECLINE_COOLDOWN: Duration = Duration::from_secs(3600);

/// Past leases retained per client.
const MAX_HISTORY_PER_CLIENT: usize = 8;

/// Clients with retained history; the least recently updated is evicted first.
const MAX_HISTORY_CLIENTS: usize = 1024;

const MAX_HARDWARE_ADDR_LEN: usize = 16;

/// Predicate marking addresses the allocator must never hand out.
pub type Exclusion = Arc<dyn Fn(Ipv4Addr) -> bool + Send + Sync>;

/// A client hardware address, the key leases are tracked under.
///
/// Holds up to 16 bytes (the size of the `chaddr` field). Displays as
/// lowercase colon-separated hex, e.g. `aa:bb:cc:dd:ee:ff`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HardwareAddr {
    bytes: [u8; MAX_HARDWARE_ADDR_LEN],
    len: u8,
}

impl HardwareAddr {
    /// Creates an address from raw bytes, truncated to 16 bytes.
    pub fn new(bytes: &[u8]) -> Self {
        let len = bytes.len().min(MAX_HARDWARE_ADDR_LEN);
        let mut buffer = [0u8; MAX_HARDWARE_ADDR_LEN];
        buffer[..len].copy_from_slice(&bytes[..len]);
        Self {
            bytes: buffer,
            len: len as u8,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// Returns true for an empty or all-zero address, which cannot key a lease.
    pub fn is_unset(&self) -> bool {
        self.as_bytes().iter().all(|&byte| byte == 0)
    }
}

impl From<[u8; 6]> for HardwareAddr {
    fn from(mac: [u8; 6]) -> Self {
        Self::new(&mac)
    }
}

impl fmt::Display for HardwareAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, byte) in self.as_bytes().iter().enumerate() {
            if index > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for HardwareAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HardwareAddr({})", self)
    }
}

/// Where a lease stands in the DORA exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    /// Sent in an OFFER, waiting for the client's REQUEST.
    Offered,
    /// Confirmed by an ACK.
    Bound,
}

/// A time-bounded grant of an IP address to a hardware address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub hardware_addr: HardwareAddr,
    pub ip: Ipv4Addr,
    pub state: LeaseState,
    /// When the lease was issued or last renewed (UTC).
    pub issued_at: DateTime<Utc>,
    pub duration: Duration,
    /// `issued_at + duration`, saturating at the maximum representable time.
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    fn new(
        hardware_addr: HardwareAddr,
        ip: Ipv4Addr,
        state: LeaseState,
        duration: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            hardware_addr,
            ip,
            state,
            issued_at: now,
            duration,
            expires_at: deadline(now, duration),
        }
    }

    /// Returns true while `now < expires_at`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn is_active(&self) -> bool {
        self.is_active_at(Utc::now())
    }

    /// Returns seconds remaining until expiration, or 0 if expired.
    pub fn remaining_seconds(&self) -> i64 {
        let remaining = self.expires_at - Utc::now();
        remaining.num_seconds().max(0)
    }

    fn renew(&mut self, duration: Duration, now: DateTime<Utc>) {
        self.issued_at = now;
        self.duration = duration;
        self.expires_at = deadline(now, duration);
    }

    fn end(&mut self, now: DateTime<Utc>) {
        self.expires_at = self.expires_at.min(now);
    }
}

fn deadline(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(duration)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Mutable pool state, guarded as a whole by [`LeasePool`]'s mutex.
#[derive(Debug, Default)]
struct PoolState {
    /// Offset from the pool start of the next never-allocated address.
    cursor: u64,
    /// Current lease per client. Every entry is active once expiry has run.
    leases: HashMap<HardwareAddr, Lease>,
    /// Addresses free for reuse, oldest first.
    released: VecDeque<Ipv4Addr>,
    /// Declined addresses and when their cooldown ends.
    declined: HashMap<Ipv4Addr, DateTime<Utc>>,
    /// Ended leases per client, oldest first.
    history: HashMap<HardwareAddr, VecDeque<Lease>>,
    /// Keys of `history`, least recently updated first.
    history_order: VecDeque<HardwareAddr>,
}

impl PoolState {
    fn record_history(&mut self, lease: Lease) {
        let hardware_addr = lease.hardware_addr;
        if let Some(position) = self
            .history_order
            .iter()
            .rposition(|&recorded| recorded == hardware_addr)
        {
            self.history_order.remove(position);
        }
        self.history_order.push_back(hardware_addr);

        let entries = self.history.entry(hardware_addr).or_default();
        if entries.len() == MAX_HISTORY_PER_CLIENT {
            entries.pop_front();
        }
        entries.push_back(lease);

        while self.history_order.len() > MAX_HISTORY_CLIENTS {
            if let Some(evicted) = self.history_order.pop_front() {
                self.history.remove(&evicted);
            }
        }
    }

    fn previous_ip(&self, hardware_addr: &HardwareAddr) -> Option<Ipv4Addr> {
        self.history
            .get(hardware_addr)
            .and_then(|entries| entries.back())
            .map(|lease| lease.ip)
    }

    /// Removes `ip` from the released queue, returning whether it was there.
    fn take_released(&mut self, ip: Ipv4Addr) -> bool {
        match self.released.iter().position(|&queued| queued == ip) {
            Some(position) => {
                self.released.remove(position);
                true
            }
            None => false,
        }
    }
}

/// The address pool and lease table for one contiguous range.
///
/// # Example
///
/// ```no_run
/// use std::net::Ipv4Addr;
/// use std::time::Duration;
/// use ddhcp::{HardwareAddr, LeasePool};
///
/// # async fn example() -> ddhcp::Result<()> {
/// let pool = LeasePool::new(
///     Ipv4Addr::new(10, 0, 0, 10),
///     Ipv4Addr::new(10, 0, 0, 20),
///     Duration::from_secs(3600),
/// )?;
///
/// let client = HardwareAddr::from([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
/// let offer = pool.get_lease(&client).await?;
/// let bound = pool.confirm(&client, offer.ip).await?;
/// # Ok(())
/// # }
/// ```
pub struct LeasePool {
    state: Mutex<PoolState>,
    start: Ipv4Addr,
    capacity: u64,
    lease_duration: Duration,
    offer_hold: Duration,
    decline_cooldown: Duration,
    exclusion: Option<Exclusion>,
}

impl fmt::Debug for LeasePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeasePool")
            .field("start", &self.start)
            .field("capacity", &self.capacity)
            .field("lease_duration", &self.lease_duration)
            .field("offer_hold", &self.offer_hold)
            .field("decline_cooldown", &self.decline_cooldown)
            .field("exclusion", &self.exclusion.is_some())
            .finish_non_exhaustive()
    }
}

impl LeasePool {
    /// Creates a pool over the inclusive range `start..=end`.
    ///
    /// Offers are held for the full lease duration and declined addresses
    /// cool down for [`DEFAULT_DECLINE_COOLDOWN`] until changed with the
    /// `with_*` builders.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `start > end`.
    pub fn new(start: Ipv4Addr, end: Ipv4Addr, lease_duration: Duration) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidConfig(format!(
                "pool start {} is after pool end {}",
                start, end
            )));
        }

        Ok(Self {
            state: Mutex::new(PoolState::default()),
            start,
            capacity: u64::from(u32::from(end)) - u64::from(u32::from(start)) + 1,
            lease_duration,
            offer_hold: lease_duration,
            decline_cooldown: DEFAULT_DECLINE_COOLDOWN,
            exclusion: None,
        })
    }

    /// Creates a pool from the server configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let pool = Self::new(config.pool_start, config.pool_end, config.lease_duration())?
            .with_offer_hold(config.offer_hold())
            .with_decline_cooldown(config.decline_cooldown());

        Ok(match config.exclusion_predicate() {
            Some(exclusion) => pool.with_exclusion(exclusion),
            None => pool,
        })
    }

    pub fn with_offer_hold(mut self, offer_hold: Duration) -> Self {
        self.offer_hold = offer_hold;
        self
    }

    pub fn with_decline_cooldown(mut self, cooldown: Duration) -> Self {
        self.decline_cooldown = cooldown;
        self
    }

    /// Installs a predicate; matching addresses are skipped by the cursor.
    pub fn with_exclusion(mut self, exclusion: Exclusion) -> Self {
        self.exclusion = Some(exclusion);
        self
    }

    /// Number of addresses in the range, including excluded ones.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    /// Returns the client's lease, renewing it, or offers a new address.
    ///
    /// An active lease is renewed from now: bound leases for the lease
    /// duration, offered leases for the offer hold. Otherwise a new
    /// [`LeaseState::Offered`] lease is created.
    ///
    /// # Allocation Priority
    ///
    /// 1. The client's previous address, if still unclaimed in the released queue
    /// 2. The oldest released address
    /// 3. The next address at the cursor that is not excluded
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolExhausted`] if no address is available.
    pub async fn get_lease(&self, hardware_addr: &HardwareAddr) -> Result<Lease> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        self.reclaim_expired(&mut state, now);

        if let Some(lease) = state.leases.get_mut(hardware_addr) {
            let duration = match lease.state {
                LeaseState::Bound => self.lease_duration,
                LeaseState::Offered => self.offer_hold,
            };
            lease.renew(duration, now);
            return Ok(lease.clone());
        }

        let ip = self.allocate(&mut state, hardware_addr)?;
        let lease = Lease::new(*hardware_addr, ip, LeaseState::Offered, self.offer_hold, now);
        state.leases.insert(*hardware_addr, lease.clone());
        Ok(lease)
    }

    /// Binds `requested` to the client (REQUEST handling).
    ///
    /// Succeeds when the client's active lease holds `requested`, or when
    /// the client's most recent lease held it and the address is still
    /// unclaimed (a client rebooting after its lease lapsed). The lease
    /// becomes [`LeaseState::Bound`] for the full lease duration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LeaseMismatch`] otherwise. The client's current
    /// lease, if any, is left untouched.
    pub async fn confirm(&self, hardware_addr: &HardwareAddr, requested: Ipv4Addr) -> Result<Lease> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        self.reclaim_expired(&mut state, now);

        if let Some(lease) = state.leases.get_mut(hardware_addr) {
            if lease.ip != requested {
                return Err(Error::LeaseMismatch {
                    requested: Some(requested),
                });
            }
            lease.state = LeaseState::Bound;
            lease.renew(self.lease_duration, now);
            return Ok(lease.clone());
        }

        if state.previous_ip(hardware_addr) == Some(requested) && state.take_released(requested) {
            let lease = Lease::new(
                *hardware_addr,
                requested,
                LeaseState::Bound,
                self.lease_duration,
                now,
            );
            state.leases.insert(*hardware_addr, lease.clone());
            return Ok(lease);
        }

        Err(Error::LeaseMismatch {
            requested: Some(requested),
        })
    }

    /// Ends the client's lease and queues its address for reuse.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the client has no active lease.
    pub async fn release(&self, hardware_addr: &HardwareAddr) -> Result<Ipv4Addr> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        self.reclaim_expired(&mut state, now);

        let mut lease = state
            .leases
            .remove(hardware_addr)
            .ok_or(Error::NotFound(*hardware_addr))?;
        lease.end(now);

        let ip = lease.ip;
        state.released.push_back(ip);
        state.record_history(lease);
        Ok(ip)
    }

    /// Ends the client's lease and quarantines its address.
    ///
    /// The address returns to the released queue once the decline
    /// cooldown has passed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the client has no active lease.
    pub async fn decline(&self, hardware_addr: &HardwareAddr) -> Result<Ipv4Addr> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        self.reclaim_expired(&mut state, now);

        let mut lease = state
            .leases
            .remove(hardware_addr)
            .ok_or(Error::NotFound(*hardware_addr))?;
        lease.end(now);

        let ip = lease.ip;
        state.declined.insert(ip, deadline(now, self.decline_cooldown));
        state.record_history(lease);
        Ok(ip)
    }

    /// Drops the client's pending offer and queues its address for reuse.
    ///
    /// Used when the client accepts another server's offer. A bound lease
    /// is left alone. Returns the freed address, if any.
    pub async fn withdraw_offer(&self, hardware_addr: &HardwareAddr) -> Option<Ipv4Addr> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        self.reclaim_expired(&mut state, now);

        if state.leases.get(hardware_addr)?.state != LeaseState::Offered {
            return None;
        }

        let mut lease = state.leases.remove(hardware_addr)?;
        lease.end(now);

        let ip = lease.ip;
        state.released.push_back(ip);
        state.record_history(lease);
        Some(ip)
    }

    /// Reclaims expired leases and finished declines now.
    ///
    /// Returns how many addresses went back to the released queue.
    pub async fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let reclaimed = self.reclaim_expired(&mut state, now);
        if reclaimed > 0 {
            debug!("Reclaimed {} addresses", reclaimed);
        }
        reclaimed
    }

    /// Returns the client's active lease without renewing it.
    pub async fn lease_for(&self, hardware_addr: &HardwareAddr) -> Option<Lease> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        self.reclaim_expired(&mut state, now);
        state.leases.get(hardware_addr).cloned()
    }

    /// Returns all active leases ordered by address.
    pub async fn list_leases(&self) -> Vec<Lease> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        self.reclaim_expired(&mut state, now);
        let mut leases: Vec<Lease> = state.leases.values().cloned().collect();
        leases.sort_by_key(|lease| lease.ip);
        leases
    }

    pub async fn active_lease_count(&self) -> usize {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        self.reclaim_expired(&mut state, now);
        state.leases.len()
    }

    /// Returns how many addresses could still be allocated.
    ///
    /// Excluded addresses ahead of the cursor are counted, so with an
    /// exclusion predicate installed this is an upper bound.
    pub async fn available_count(&self) -> u64 {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        self.reclaim_expired(&mut state, now);
        state.released.len() as u64 + (self.capacity - state.cursor)
    }

    /// Returns the client's ended leases, oldest first.
    pub async fn history(&self, hardware_addr: &HardwareAddr) -> Vec<Lease> {
        let state = self.state.lock().await;
        state
            .history
            .get(hardware_addr)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn allocate(&self, state: &mut PoolState, hardware_addr: &HardwareAddr) -> Result<Ipv4Addr> {
        if let Some(previous) = state.previous_ip(hardware_addr)
            && state.take_released(previous)
        {
            return Ok(previous);
        }

        if let Some(ip) = state.released.pop_front() {
            return Ok(ip);
        }

        while state.cursor < self.capacity {
            let ip = Ipv4Addr::from((u64::from(u32::from(self.start)) + state.cursor) as u32);
            state.cursor += 1;
            if self.is_excluded(ip) {
                continue;
            }
            return Ok(ip);
        }

        Err(Error::PoolExhausted)
    }

    fn is_excluded(&self, ip: Ipv4Addr) -> bool {
        self.exclusion.as_ref().is_some_and(|exclusion| exclusion(ip))
    }

    /// Moves expired leases and finished declines into the released queue.
    fn reclaim_expired(&self, state: &mut PoolState, now: DateTime<Utc>) -> usize {
        let expired: Vec<HardwareAddr> = state
            .leases
            .iter()
            .filter(|(_, lease)| !lease.is_active_at(now))
            .map(|(hardware_addr, _)| *hardware_addr)
            .collect();

        for hardware_addr in &expired {
            if let Some(lease) = state.leases.remove(hardware_addr) {
                state.released.push_back(lease.ip);
                state.record_history(lease);
            }
        }

        let cooled: Vec<Ipv4Addr> = state
            .declined
            .iter()
            .filter(|(_, until)| **until <= now)
            .map(|(ip, _)| *ip)
            .collect();

        for ip in &cooled {
            state.declined.remove(ip);
            state.released.push_back(*ip);
        }

        expired.len() + cooled.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn client(last: u8) -> HardwareAddr {
        HardwareAddr::from([0xaa, 0xbb, 0xcc, 0xdd, 0xee, last])
    }

    fn test_pool(last_octet: u8) -> LeasePool {
        LeasePool::new(
            Ipv4Addr::new(10, 0, 0, 10),
            Ipv4Addr::new(10, 0, 0, last_octet),
            Duration::from_secs(3600),
        )
        .unwrap()
    }

    async fn expire(pool: &LeasePool, hardware_addr: &HardwareAddr) {
        let mut state = pool.state.lock().await;
        if let Some(lease) = state.leases.get_mut(hardware_addr) {
            lease.expires_at = Utc::now() - TimeDelta::seconds(1);
        }
    }

    #[test]
    fn test_hardware_addr_display() {
        let addr = client(0xff);
        assert_eq!(addr.to_string(), "aa:bb:cc:dd:ee:ff");
        assert_eq!(format!("{:?}", addr), "HardwareAddr(aa:bb:cc:dd:ee:ff)");
        assert!(!addr.is_unset());
        assert!(HardwareAddr::new(&[]).is_unset());
        assert!(HardwareAddr::new(&[0u8; 6]).is_unset());
        assert_eq!(HardwareAddr::new(&[0u8; 20]).as_bytes().len(), 16);
    }

    #[test]
    fn test_lease_struct() {
        let now = Utc::now();
        let mut lease = Lease::new(
            client(1),
            Ipv4Addr::new(10, 0, 0, 10),
            LeaseState::Offered,
            Duration::from_secs(3600),
            now,
        );
        assert!(lease.is_active());
        assert!(lease.remaining_seconds() > 3500);
        assert!(!lease.is_active_at(now + TimeDelta::seconds(3600)));

        lease.renew(Duration::from_secs(7200), now);
        assert!(lease.remaining_seconds() > 7100);

        lease.end(now);
        assert!(!lease.is_active_at(now));
    }

    #[test]
    fn test_huge_duration_saturates() {
        let lease = Lease::new(
            client(1),
            Ipv4Addr::new(10, 0, 0, 10),
            LeaseState::Bound,
            Duration::from_secs(u64::MAX),
            Utc::now(),
        );
        assert_eq!(lease.expires_at, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_invalid_range() {
        let result = LeasePool::new(
            Ipv4Addr::new(10, 0, 0, 20),
            Ipv4Addr::new(10, 0, 0, 10),
            Duration::from_secs(60),
        );
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_capacity_is_inclusive() {
        assert_eq!(test_pool(10).capacity(), 1);
        assert_eq!(test_pool(20).capacity(), 11);

        let whole = LeasePool::new(
            Ipv4Addr::new(0, 0, 0, 0),
            Ipv4Addr::new(255, 255, 255, 255),
            Duration::from_secs(60),
        )
        .unwrap();
        assert_eq!(whole.capacity(), 1 << 32);
    }

    #[tokio::test]
    async fn test_first_lease_is_pool_start() {
        let pool = test_pool(20);
        let lease = pool.get_lease(&client(1)).await.unwrap();
        assert_eq!(lease.ip, Ipv4Addr::new(10, 0, 0, 10));
        assert_eq!(lease.state, LeaseState::Offered);
        assert_eq!(lease.hardware_addr, client(1));
    }

    #[tokio::test]
    async fn test_allocation_stability() {
        let pool = test_pool(20);
        let first = pool.get_lease(&client(1)).await.unwrap();
        let second = pool.get_lease(&client(1)).await.unwrap();
        assert_eq!(first.ip, second.ip);
        assert!(second.issued_at >= first.issued_at);
        assert_eq!(pool.active_lease_count().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_allocations() {
        let pool = Arc::new(test_pool(20));

        let mut handles = vec![];
        for index in 0..10 {
            let pool_clone = Arc::clone(&pool);
            handles.push(tokio::spawn(async move {
                pool_clone.get_lease(&client(index)).await.map(|lease| lease.ip)
            }));
        }

        let mut allocated_ips = HashSet::new();
        for handle in handles {
            let ip = handle.await.unwrap().unwrap();
            assert!(allocated_ips.insert(ip), "Duplicate IP allocated: {}", ip);
        }

        assert_eq!(allocated_ips.len(), 10);
    }

    #[tokio::test]
    async fn test_concurrent_same_client_converges() {
        let pool = Arc::new(test_pool(20));

        let mut handles = vec![];
        for _ in 0..8 {
            let pool_clone = Arc::clone(&pool);
            handles.push(tokio::spawn(async move {
                pool_clone.get_lease(&client(7)).await.map(|lease| lease.ip)
            }));
        }

        let mut allocated_ips = HashSet::new();
        for handle in handles {
            allocated_ips.insert(handle.await.unwrap().unwrap());
        }

        assert_eq!(allocated_ips.len(), 1);
        assert_eq!(pool.active_lease_count().await, 1);
    }

    #[tokio::test]
    async fn test_pool_exhaustion() {
        let pool = test_pool(10);
        pool.get_lease(&client(1)).await.unwrap();

        let result = pool.get_lease(&client(2)).await;
        assert!(matches!(result, Err(Error::PoolExhausted)));
    }

    #[tokio::test]
    async fn test_release_then_reuse() {
        let pool = test_pool(10);
        let first = pool.get_lease(&client(1)).await.unwrap();

        let released = pool.release(&client(1)).await.unwrap();
        assert_eq!(released, first.ip);
        assert!(pool.lease_for(&client(1)).await.is_none());

        let second = pool.get_lease(&client(2)).await.unwrap();
        assert_eq!(second.ip, first.ip);
    }

    #[tokio::test]
    async fn test_release_unknown_client() {
        let pool = test_pool(20);
        let result = pool.release(&client(9)).await;
        assert!(matches!(result, Err(Error::NotFound(addr)) if addr == client(9)));
    }

    #[tokio::test]
    async fn test_released_queue_is_fifo() {
        let pool = test_pool(20);
        let a = pool.get_lease(&client(1)).await.unwrap().ip;
        let b = pool.get_lease(&client(2)).await.unwrap().ip;

        pool.release(&client(2)).await.unwrap();
        pool.release(&client(1)).await.unwrap();

        assert_eq!(pool.get_lease(&client(3)).await.unwrap().ip, b);
        assert_eq!(pool.get_lease(&client(4)).await.unwrap().ip, a);
    }

    #[tokio::test]
    async fn test_returning_client_gets_previous_address() {
        let pool = test_pool(20);
        let a = pool.get_lease(&client(1)).await.unwrap().ip;
        pool.get_lease(&client(2)).await.unwrap();

        pool.release(&client(2)).await.unwrap();
        pool.release(&client(1)).await.unwrap();

        let again = pool.get_lease(&client(1)).await.unwrap();
        assert_eq!(again.ip, a);
    }

    #[tokio::test]
    async fn test_confirm_binds_offer() {
        let pool = test_pool(20);
        let offer = pool.get_lease(&client(1)).await.unwrap();

        let bound = pool.confirm(&client(1), offer.ip).await.unwrap();
        assert_eq!(bound.ip, offer.ip);
        assert_eq!(bound.state, LeaseState::Bound);
        assert_eq!(bound.duration, Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_confirm_mismatch() {
        let pool = test_pool(20);
        let offer = pool.get_lease(&client(1)).await.unwrap();

        let wrong = Ipv4Addr::new(10, 0, 0, 15);
        let result = pool.confirm(&client(1), wrong).await;
        assert!(matches!(
            result,
            Err(Error::LeaseMismatch { requested: Some(ip) }) if ip == wrong
        ));
        assert_eq!(pool.lease_for(&client(1)).await.unwrap().ip, offer.ip);

        let stranger = pool.confirm(&client(2), offer.ip).await;
        assert!(matches!(stranger, Err(Error::LeaseMismatch { .. })));
    }

    #[tokio::test]
    async fn test_confirm_after_expiry_rebinds_unclaimed_address() {
        let pool = test_pool(20);
        let offer = pool.get_lease(&client(1)).await.unwrap();
        pool.confirm(&client(1), offer.ip).await.unwrap();
        expire(&pool, &client(1)).await;

        let rebound = pool.confirm(&client(1), offer.ip).await.unwrap();
        assert_eq!(rebound.ip, offer.ip);
        assert_eq!(rebound.state, LeaseState::Bound);
        assert_eq!(pool.available_count().await, 10);
    }

    #[tokio::test]
    async fn test_confirm_after_expiry_fails_once_reassigned() {
        let pool = test_pool(10);
        let offer = pool.get_lease(&client(1)).await.unwrap();
        expire(&pool, &client(1)).await;

        let taken = pool.get_lease(&client(2)).await.unwrap();
        assert_eq!(taken.ip, offer.ip);

        let result = pool.confirm(&client(1), offer.ip).await;
        assert!(matches!(result, Err(Error::LeaseMismatch { .. })));
    }

    #[tokio::test]
    async fn test_bound_lease_renews_for_full_duration() {
        let pool = test_pool(20).with_offer_hold(Duration::from_secs(30));
        let offer = pool.get_lease(&client(1)).await.unwrap();
        assert_eq!(offer.duration, Duration::from_secs(30));

        pool.confirm(&client(1), offer.ip).await.unwrap();
        let renewed = pool.get_lease(&client(1)).await.unwrap();
        assert_eq!(renewed.state, LeaseState::Bound);
        assert_eq!(renewed.duration, Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_expired_lease_cleanup() {
        let pool = test_pool(10);
        let lease = pool.get_lease(&client(1)).await.unwrap();
        expire(&pool, &client(1)).await;

        assert_eq!(pool.sweep().await, 1);
        assert!(pool.lease_for(&client(1)).await.is_none());
        assert_eq!(pool.available_count().await, 1);

        let history = pool.history(&client(1)).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].ip, lease.ip);
    }

    #[tokio::test]
    async fn test_expired_lease_reused_lazily() {
        let pool = test_pool(10);
        let first = pool.get_lease(&client(1)).await.unwrap();
        expire(&pool, &client(1)).await;

        let second = pool.get_lease(&client(2)).await.unwrap();
        assert_eq!(second.ip, first.ip);
    }

    #[tokio::test]
    async fn test_lapsed_offer_returns_address() {
        let pool = test_pool(10).with_offer_hold(Duration::from_millis(50));
        let offer = pool.get_lease(&client(1)).await.unwrap();
        assert_eq!(offer.state, LeaseState::Offered);

        tokio::time::sleep(Duration::from_millis(120)).await;

        let taken = pool.get_lease(&client(2)).await.unwrap();
        assert_eq!(taken.ip, offer.ip);
        assert!(pool.lease_for(&client(1)).await.is_none());
        assert!(matches!(
            pool.confirm(&client(1), offer.ip).await,
            Err(Error::LeaseMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_withdraw_offer() {
        let pool = test_pool(10);
        let offer = pool.get_lease(&client(1)).await.unwrap();

        assert_eq!(pool.withdraw_offer(&client(1)).await, Some(offer.ip));
        assert!(pool.lease_for(&client(1)).await.is_none());
        assert_eq!(pool.get_lease(&client(2)).await.unwrap().ip, offer.ip);

        pool.confirm(&client(2), offer.ip).await.unwrap();
        assert_eq!(pool.withdraw_offer(&client(2)).await, None);
        assert_eq!(pool.lease_for(&client(2)).await.unwrap().state, LeaseState::Bound);
        assert_eq!(pool.withdraw_offer(&client(3)).await, None);
    }

    #[tokio::test]
    async fn test_decline_cooldown() {
        let pool = test_pool(11);
        let declined = pool.get_lease(&client(1)).await.unwrap().ip;

        assert_eq!(pool.decline(&client(1)).await.unwrap(), declined);
        assert!(pool.lease_for(&client(1)).await.is_none());

        let next = pool.get_lease(&client(1)).await.unwrap();
        assert_ne!(next.ip, declined);
        assert!(matches!(
            pool.get_lease(&client(2)).await,
            Err(Error::PoolExhausted)
        ));

        {
            let mut state = pool.state.lock().await;
            for until in state.declined.values_mut() {
                *until = Utc::now() - TimeDelta::seconds(1);
            }
        }

        assert_eq!(pool.sweep().await, 1);
        assert_eq!(pool.get_lease(&client(2)).await.unwrap().ip, declined);
    }

    #[tokio::test]
    async fn test_decline_unknown_client() {
        let pool = test_pool(20);
        assert!(matches!(
            pool.decline(&client(3)).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_exclusion_predicate() {
        let excluded = Ipv4Addr::new(10, 0, 0, 11);
        let pool = test_pool(12).with_exclusion(Arc::new(move |ip: Ipv4Addr| ip == excluded));

        let first = pool.get_lease(&client(1)).await.unwrap();
        let second = pool.get_lease(&client(2)).await.unwrap();
        assert_eq!(first.ip, Ipv4Addr::new(10, 0, 0, 10));
        assert_eq!(second.ip, Ipv4Addr::new(10, 0, 0, 12));
        assert!(matches!(
            pool.get_lease(&client(3)).await,
            Err(Error::PoolExhausted)
        ));
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let pool = test_pool(20);
        for _ in 0..(MAX_HISTORY_PER_CLIENT + 3) {
            pool.get_lease(&client(1)).await.unwrap();
            pool.release(&client(1)).await.unwrap();
        }
        assert_eq!(pool.history(&client(1)).await.len(), MAX_HISTORY_PER_CLIENT);
    }

    #[tokio::test]
    async fn test_history_client_count_is_bounded() {
        let pool = test_pool(10);
        let numbered = |index: u32| HardwareAddr::new(&index.to_be_bytes());

        for index in 1..=MAX_HISTORY_CLIENTS as u32 {
            pool.get_lease(&numbered(index)).await.unwrap();
            pool.release(&numbered(index)).await.unwrap();
        }

        pool.get_lease(&numbered(1)).await.unwrap();
        pool.release(&numbered(1)).await.unwrap();

        let newest = MAX_HISTORY_CLIENTS as u32 + 10;
        for index in (MAX_HISTORY_CLIENTS as u32 + 1)..=newest {
            pool.get_lease(&numbered(index)).await.unwrap();
            pool.release(&numbered(index)).await.unwrap();
        }

        {
            let state = pool.state.lock().await;
            assert_eq!(state.history.len(), MAX_HISTORY_CLIENTS);
            assert_eq!(state.history_order.len(), MAX_HISTORY_CLIENTS);
        }

        assert_eq!(pool.history(&numbered(1)).await.len(), 2);
        assert!(pool.history(&numbered(2)).await.is_empty());
        assert_eq!(pool.history(&numbered(newest)).await.len(), 1);
    }

    #[tokio::test]
    async fn test_list_leases_sorted() {
        let pool = test_pool(20);
        for index in (0..4).rev() {
            pool.get_lease(&client(index)).await.unwrap();
        }
        let leases = pool.list_leases().await;
        let ips: Vec<Ipv4Addr> = leases.iter().map(|lease| lease.ip).collect();
        let mut sorted = ips.clone();
        sorted.sort();
        assert_eq!(ips, sorted);
        assert_eq!(pool.active_lease_count().await, 4);
        assert_eq!(pool.available_count().await, 7);
    }

    #[tokio::test]
    async fn test_from_config() {
        let config = Config {
            server_ip: Ipv4Addr::new(192, 168, 1, 254),
            pool_start: Ipv4Addr::new(192, 168, 1, 0),
            pool_end: Ipv4Addr::new(192, 168, 1, 1),
            exclude_subnet_edges: true,
            ..Default::default()
        };
        let pool = LeasePool::from_config(&config).unwrap();
        assert_eq!(pool.capacity(), 2);

        let lease = pool.get_lease(&client(1)).await.unwrap();
        assert_eq!(lease.ip, Ipv4Addr::new(192, 168, 1, 1));
        assert!(matches!(
            pool.get_lease(&client(2)).await,
            Err(Error::PoolExhausted)
        ));
    }
}
