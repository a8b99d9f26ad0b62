//! Failed-login tracking, account lockout and IP blocking.
//!
//! # Data Flow
//! ```text
//! Login attempt:
//!     → check_login_allowed (blocked IP? locked account?)
//!     → credentials checked by the caller
//!     → record_failed_attempt / record_successful_login
//! ```
//!
//! # Design Decisions
//! - A blocked IP is rejected before its failure is counted
//! - Reaching the threshold locks the account, deletes its counter and blocks
//!   the source IP
//! - Lockouts and IP blocks expire on their own; `sweep_expired` reclaims memory

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::clock::{SharedClock, SystemClock};
use crate::observability::metrics;
use crate::resilience::ConfigError;
use crate::security::error::SecurityError;
use crate::security::masking::{mask_identifier, mask_ip};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BruteForceConfig {
    pub max_attempts: u32,
    pub attempt_window_ms: u64,
    pub lockout_ms: u64,
    pub ip_block_ms: u64,
}

impl Default for BruteForceConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            attempt_window_ms: 15 * 60 * 1000,
            lockout_ms: 30 * 60 * 1000,
            ip_block_ms: 60 * 60 * 1000,
        }
    }
}

impl BruteForceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts < 1 {
            return Err(ConfigError::Invalid("brute_force.max_attempts must be >= 1".into()));
        }
        if self.attempt_window_ms == 0 || self.lockout_ms == 0 || self.ip_block_ms == 0 {
            return Err(ConfigError::Invalid("brute_force windows must be > 0".into()));
        }
        Ok(())
    }
}

/// Result of recording a failed login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoginAttemptOutcome {
    pub locked: bool,
    pub attempts_remaining: u32,
    pub lockout_until_ms: Option<u64>,
    /// The attempt came from an already blocked IP and was not counted.
    pub ip_blocked: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LockedAccount {
    pub identifier: String,
    pub locked_until_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockedIp {
    pub ip: String,
    pub blocked_until_ms: u64,
    pub reason: String,
}

#[derive(Debug, Clone, Copy)]
struct AttemptRecord {
    count: u32,
    reset_at_ms: u64,
}

#[derive(Debug, Clone)]
struct BlockRecord {
    until_ms: u64,
    reason: String,
}

/// Counts of entries removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BruteForceSweep {
    pub attempts: usize,
    pub lockouts: usize,
    pub ip_blocks: usize,
}

pub struct BruteForceProtectionService {
    config: BruteForceConfig,
    attempts: DashMap<String, AttemptRecord>,
    locked: DashMap<String, u64>,
    blocked_ips: DashMap<String, BlockRecord>,
    clock: SharedClock,
}

impl BruteForceProtectionService {
    pub fn new(config: BruteForceConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            attempts: DashMap::new(),
            locked: DashMap::new(),
            blocked_ips: DashMap::new(),
            clock: SystemClock::shared(),
        })
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &BruteForceConfig {
        &self.config
    }

    /// Pre-flight gate: rejects blocked IPs and locked accounts.
    pub fn check_login_allowed(&self, identifier: &str, ip: &str) -> Result<(), SecurityError> {
        if let Some(until_ms) = self.ip_blocked_until(ip) {
            self.log_blocked_ip_attempt(identifier, ip);
            return Err(SecurityError::IpBlocked {
                ip: mask_ip(ip),
                until_ms,
            });
        }
        if let Some(until_ms) = self.account_locked_until(identifier) {
            tracing::warn!(identifier = %mask_identifier(identifier), "Login attempt on locked account");
            return Err(SecurityError::AccountLocked {
                identifier: mask_identifier(identifier),
                until_ms,
            });
        }
        Ok(())
    }

    pub fn record_failed_attempt(&self, identifier: &str, ip: &str) -> LoginAttemptOutcome {
        if self.is_ip_blocked(ip) {
            self.log_blocked_ip_attempt(identifier, ip);
            return LoginAttemptOutcome {
                locked: self.is_account_locked(identifier),
                attempts_remaining: 0,
                lockout_until_ms: self.account_locked_until(identifier),
                ip_blocked: true,
            };
        }

        let now = self.clock.now_ms();
        let max = self.config.max_attempts;
        let fresh = AttemptRecord {
            count: 1,
            reset_at_ms: now + self.config.attempt_window_ms,
        };
        let count = match self.attempts.entry(identifier.to_string()) {
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                if now >= record.reset_at_ms {
                    *record = fresh;
                } else {
                    record.count += 1;
                }
                let count = record.count;
                if count >= max {
                    entry.remove();
                }
                count
            }
            Entry::Vacant(entry) => {
                if max > 1 {
                    entry.insert(fresh);
                }
                1
            }
        };
        metrics::record_failed_login();

        if count < max {
            tracing::info!(
                identifier = %mask_identifier(identifier),
                attempts = count,
                remaining = max - count,
                "Failed login attempt"
            );
            return LoginAttemptOutcome {
                locked: false,
                attempts_remaining: max - count,
                lockout_until_ms: None,
                ip_blocked: false,
            };
        }

        let lockout_until = now + self.config.lockout_ms;
        self.locked.insert(identifier.to_string(), lockout_until);
        self.blocked_ips.insert(
            ip.to_string(),
            BlockRecord {
                until_ms: now + self.config.ip_block_ms,
                reason: format!("{max} failed login attempts"),
            },
        );
        metrics::record_account_lockout();
        tracing::warn!(
            identifier = %mask_identifier(identifier),
            ip = %mask_ip(ip),
            lockout_ms = self.config.lockout_ms,
            ip_block_ms = self.config.ip_block_ms,
            "Account locked and IP blocked after repeated failures"
        );

        LoginAttemptOutcome {
            locked: true,
            attempts_remaining: 0,
            lockout_until_ms: Some(lockout_until),
            ip_blocked: false,
        }
    }

    pub fn record_successful_login(&self, identifier: &str) {
        self.attempts.remove(identifier);
    }

    pub fn failed_attempts(&self, identifier: &str) -> u32 {
        let now = self.clock.now_ms();
        self.attempts
            .get(identifier)
            .filter(|r| now < r.reset_at_ms)
            .map(|r| r.count)
            .unwrap_or(0)
    }

    pub fn is_account_locked(&self, identifier: &str) -> bool {
        self.account_locked_until(identifier).is_some()
    }

    pub fn is_ip_blocked(&self, ip: &str) -> bool {
        self.ip_blocked_until(ip).is_some()
    }

    pub fn unlock_account(&self, identifier: &str) -> bool {
        self.attempts.remove(identifier);
        let removed = self.locked.remove(identifier).is_some();
        if removed {
            tracing::info!(identifier = %mask_identifier(identifier), "Account unlocked");
        }
        removed
    }

    pub fn unblock_ip(&self, ip: &str) -> bool {
        let removed = self.blocked_ips.remove(ip).is_some();
        if removed {
            tracing::info!(ip = %mask_ip(ip), "IP unblocked");
        }
        removed
    }

    pub fn locked_accounts(&self) -> Vec<LockedAccount> {
        let now = self.clock.now_ms();
        let mut out: Vec<_> = self
            .locked
            .iter()
            .filter(|e| now < *e.value())
            .map(|e| LockedAccount {
                identifier: e.key().clone(),
                locked_until_ms: *e.value(),
            })
            .collect();
        out.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        out
    }

    pub fn blocked_ips(&self) -> Vec<BlockedIp> {
        let now = self.clock.now_ms();
        let mut out: Vec<_> = self
            .blocked_ips
            .iter()
            .filter(|e| now < e.value().until_ms)
            .map(|e| BlockedIp {
                ip: e.key().clone(),
                blocked_until_ms: e.value().until_ms,
                reason: e.value().reason.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.ip.cmp(&b.ip));
        out
    }

    pub fn sweep_expired(&self) -> BruteForceSweep {
        let now = self.clock.now_ms();
        BruteForceSweep {
            attempts: retain_counted(&self.attempts, |r| now < r.reset_at_ms),
            lockouts: retain_counted(&self.locked, |until| now < *until),
            ip_blocks: retain_counted(&self.blocked_ips, |b| now < b.until_ms),
        }
    }

    fn account_locked_until(&self, identifier: &str) -> Option<u64> {
        let now = self.clock.now_ms();
        let until = *self.locked.get(identifier)?;
        if now < until {
            Some(until)
        } else {
            self.locked.remove_if(identifier, |_, u| now >= *u);
            None
        }
    }

    fn ip_blocked_until(&self, ip: &str) -> Option<u64> {
        let now = self.clock.now_ms();
        let until = self.blocked_ips.get(ip)?.until_ms;
        if now < until {
            Some(until)
        } else {
            self.blocked_ips.remove_if(ip, |_, b| now >= b.until_ms);
            None
        }
    }

    fn log_blocked_ip_attempt(&self, identifier: &str, ip: &str) {
        metrics::record_blocked_ip_attempt();
        tracing::warn!(
            identifier = %mask_identifier(identifier),
            ip = %mask_ip(ip),
            "Blocked IP attempt"
        );
    }
}

fn retain_counted<V>(map: &DashMap<String, V>, keep: impl Fn(&V) -> bool) -> usize {
    let before = map.len();
    map.retain(|_, v| keep(v));
    before.saturating_sub(map.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use std::time::Duration;

    const IP: &str = "198.51.100.23";

    fn service() -> (BruteForceProtectionService, MockClock) {
        let clock = MockClock::default();
        let svc = BruteForceProtectionService::new(BruteForceConfig::default())
            .unwrap()
            .with_clock(clock.shared());
        (svc, clock)
    }

    #[test]
    fn test_four_failures_leave_one_attempt() {
        let (svc, _) = service();
        let mut last = None;
        for _ in 0..4 {
            last = Some(svc.record_failed_attempt("alice@example.com", IP));
        }
        let outcome = last.unwrap();
        assert!(!outcome.locked);
        assert_eq!(outcome.attempts_remaining, 1);
        assert!(!svc.is_account_locked("alice@example.com"));
    }

    #[test]
    fn test_fifth_failure_locks_account_and_blocks_ip() {
        let (svc, _) = service();
        for _ in 0..4 {
            svc.record_failed_attempt("alice@example.com", IP);
        }
        let outcome = svc.record_failed_attempt("alice@example.com", IP);
        assert!(outcome.locked);
        assert_eq!(outcome.attempts_remaining, 0);
        assert!(outcome.lockout_until_ms.is_some());
        assert!(svc.is_account_locked("alice@example.com"));
        assert!(svc.is_ip_blocked(IP));
        assert_eq!(svc.failed_attempts("alice@example.com"), 0);

        // Correct credentials from the blocked IP are still refused.
        assert!(matches!(
            svc.check_login_allowed("bob@example.com", IP),
            Err(SecurityError::IpBlocked { .. })
        ));
    }

    #[test]
    fn test_blocked_ip_attempt_is_not_counted() {
        let (svc, _) = service();
        for _ in 0..5 {
            svc.record_failed_attempt("alice@example.com", IP);
        }
        let outcome = svc.record_failed_attempt("carol@example.com", IP);
        assert!(outcome.ip_blocked);
        assert_eq!(svc.failed_attempts("carol@example.com"), 0);
    }

    #[test]
    fn test_success_clears_counter() {
        let (svc, _) = service();
        svc.record_failed_attempt("dave", IP);
        svc.record_failed_attempt("dave", IP);
        svc.record_successful_login("dave");
        assert_eq!(svc.failed_attempts("dave"), 0);
        assert_eq!(svc.record_failed_attempt("dave", IP).attempts_remaining, 4);
    }

    #[test]
    fn test_counter_window_resets() {
        let (svc, clock) = service();
        for _ in 0..4 {
            svc.record_failed_attempt("erin", IP);
        }
        clock.advance(Duration::from_secs(15 * 60));
        let outcome = svc.record_failed_attempt("erin", IP);
        assert_eq!(outcome.attempts_remaining, 4);
    }

    #[test]
    fn test_lockout_expiry_unlock_and_sweep() {
        let (svc, clock) = service();
        for _ in 0..5 {
            svc.record_failed_attempt("frank", IP);
        }
        assert_eq!(svc.locked_accounts().len(), 1);
        assert_eq!(svc.blocked_ips()[0].ip, IP);

        clock.advance(Duration::from_secs(30 * 60));
        assert!(!svc.is_account_locked("frank"));
        assert!(svc.is_ip_blocked(IP));

        assert!(svc.unblock_ip(IP));
        assert!(svc.check_login_allowed("frank", IP).is_ok());

        for _ in 0..5 {
            svc.record_failed_attempt("grace", "203.0.113.1");
        }
        assert!(svc.unlock_account("grace"));
        assert!(!svc.is_account_locked("grace"));

        svc.record_failed_attempt("heidi", "203.0.113.9");
        clock.advance(Duration::from_secs(2 * 60 * 60));
        let sweep = svc.sweep_expired();
        assert_eq!(sweep.attempts, 1);
        assert_eq!(sweep.ip_blocks, 1);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = BruteForceConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(BruteForceProtectionService::new(config).is_err());
    }
}
