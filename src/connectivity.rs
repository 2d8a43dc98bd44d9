//! # Connectivity Supervisor
//!
//! Checks the Wi-Fi link every 30 seconds. When it is down the supervisor
//! tries a bounded number of full reconnects (radio off/on, associate, wait,
//! DNS check). If every attempt fails the process asks to be restarted: the
//! sign has no buttons and no operator, so a restart is the only recovery left.
//!
//! The state machine is never touched here. A reconnect in the middle of the
//! departures just delays the next tick.

use crate::timer::Timer;
use std::fs;
use std::net::ToSocketAddrs;
use std::process::Command;
use thiserror::Error;

/// Exit status used to ask the service manager for a restart.
pub const RESTART_EXIT_CODE: i32 = 75;

#[derive(Error, Debug)]
pub enum LinkError {
    /// External network tool failed or could not be started
    #[error("`{command}` failed: {reason}")]
    Command { command: String, reason: String },

    /// Check host did not resolve after reconnecting
    #[error("cannot resolve {0}")]
    Dns(String),
}

/// The network link the sign depends on.
pub trait Link {
    fn is_connected(&self) -> bool;

    /// Power-cycle the radio.
    fn reset_radio(&mut self) -> Result<(), LinkError>;

    /// Start associating with the configured network. Does not wait.
    fn associate(&mut self) -> Result<(), LinkError>;

    /// Reapply name server settings and check that names resolve again.
    fn refresh_dns(&mut self) -> Result<(), LinkError>;
}

/// Wi-Fi link managed by NetworkManager.
pub struct NmcliLink {
    interface: String,
    ssid: String,
    password: String,
    /// Static name servers; empty keeps the ones DHCP hands out
    dns: Vec<String>,
    check_host: String,
}

impl NmcliLink {
    pub fn new(interface: &str, ssid: &str, password: &str, dns: &[String], check_host: &str) -> Self {
        Self {
            interface: interface.to_string(),
            ssid: ssid.to_string(),
            password: password.to_string(),
            dns: dns.to_vec(),
            check_host: check_host.to_string(),
        }
    }

    /// Push the static name servers into the connection profile and bring
    /// it up again so they take effect.
    fn apply_dns(&self) -> Result<(), LinkError> {
        let servers = self.dns.join(" ");
        self.nmcli(
            &[
                "connection",
                "modify",
                self.ssid.as_str(),
                "ipv4.dns",
                servers.as_str(),
                "ipv4.ignore-auto-dns",
                "yes",
            ],
            &format!("connection modify {} ipv4.dns \"{}\"", self.ssid, servers),
        )?;
        self.nmcli(
            &["connection", "up", self.ssid.as_str()],
            &format!("connection up {}", self.ssid),
        )
    }

    fn resolve_check_host(&self) -> Result<(), LinkError> {
        match (self.check_host.as_str(), 443).to_socket_addrs() {
            Ok(mut addrs) => match addrs.next() {
                Some(_) => Ok(()),
                None => Err(LinkError::Dns(self.check_host.clone())),
            },
            Err(_) => Err(LinkError::Dns(self.check_host.clone())),
        }
    }

    fn nmcli(&self, args: &[&str], shown: &str) -> Result<(), LinkError> {
        let command = format!("nmcli {shown}");
        let output = Command::new("nmcli")
            .args(args)
            .output()
            .map_err(|e| LinkError::Command {
                command: command.clone(),
                reason: e.to_string(),
            })?;
        if output.status.success() {
            Ok(())
        } else {
            Err(LinkError::Command {
                command,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

impl Link for NmcliLink {
    fn is_connected(&self) -> bool {
        let path = format!("/sys/class/net/{}/operstate", self.interface);
        fs::read_to_string(path)
            .map(|state| state.trim() == "up")
            .unwrap_or(false)
    }

    fn reset_radio(&mut self) -> Result<(), LinkError> {
        self.nmcli(&["radio", "wifi", "off"], "radio wifi off")?;
        self.nmcli(&["radio", "wifi", "on"], "radio wifi on")
    }

    fn associate(&mut self) -> Result<(), LinkError> {
        let args = [
            "--wait",
            "0",
            "device",
            "wifi",
            "connect",
            self.ssid.as_str(),
            "password",
            self.password.as_str(),
            "ifname",
            self.interface.as_str(),
        ];
        // Keep the password out of error messages.
        let shown = format!("device wifi connect {} ifname {}", self.ssid, self.interface);
        self.nmcli(&args, &shown)
    }

    fn refresh_dns(&mut self) -> Result<(), LinkError> {
        if !self.dns.is_empty() {
            self.apply_dns()?;
        }
        self.resolve_check_host()
    }
}

/// Link owned by someone else (a desktop, a wired board). Always reported
/// up; the supervisor never has anything to repair.
#[derive(Debug, Default)]
pub struct UnmanagedLink;

impl Link for UnmanagedLink {
    fn is_connected(&self) -> bool {
        true
    }

    fn reset_radio(&mut self) -> Result<(), LinkError> {
        Ok(())
    }

    fn associate(&mut self) -> Result<(), LinkError> {
        Ok(())
    }

    fn refresh_dns(&mut self) -> Result<(), LinkError> {
        Ok(())
    }
}

/// Last-resort recovery.
pub trait Restart {
    fn restart(&mut self);
}

/// Exits with [`RESTART_EXIT_CODE`]; the systemd unit restarts the service.
pub struct ProcessRestart;

impl Restart for ProcessRestart {
    fn restart(&mut self) {
        tracing::error!("network unrecoverable, exiting for restart");
        std::process::exit(RESTART_EXIT_CODE);
    }
}

/// Timing and retry limits of the supervisor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SupervisorPolicy {
    pub check_interval_ms: u64,
    pub max_retries: u32,
    pub association_timeout_ms: u64,
    pub poll_ms: u64,
    pub retry_delay_ms: u64,
    pub restart_grace_ms: u64,
}

impl Default for SupervisorPolicy {
    fn default() -> Self {
        Self {
            check_interval_ms: 30_000,
            max_retries: 2,
            association_timeout_ms: 10_000,
            poll_ms: 500,
            retry_delay_ms: 1_000,
            restart_grace_ms: 5_000,
        }
    }
}

/// Result of one health check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Reconnected { attempts: u32 },
    /// Every attempt failed and a restart was requested
    Restarting,
}

pub struct Supervisor<R> {
    policy: SupervisorPolicy,
    restarter: R,
    last_check_ms: u64,
}

impl<R: Restart> Supervisor<R> {
    /// The first check happens one interval after `now_ms`.
    pub fn new(policy: SupervisorPolicy, restarter: R, now_ms: u64) -> Self {
        Self {
            policy,
            restarter,
            last_check_ms: now_ms,
        }
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_check_ms) >= self.policy.check_interval_ms
    }

    /// Run a health check if one is due.
    pub fn poll<L: Link, T: Timer>(&mut self, link: &mut L, timer: &T) -> Option<Health> {
        if !self.is_due(timer.now_ms()) {
            return None;
        }
        Some(self.check(link, timer))
    }

    /// Check the link now and repair it if needed. Blocks for the duration of
    /// the reconnect attempts.
    pub fn check<L: Link, T: Timer>(&mut self, link: &mut L, timer: &T) -> Health {
        self.last_check_ms = timer.now_ms();
        if link.is_connected() {
            return Health::Healthy;
        }

        tracing::warn!("network link lost, reconnecting");
        for attempt in 1..=self.policy.max_retries {
            if attempt > 1 {
                timer.sleep_ms(self.policy.retry_delay_ms);
            }
            tracing::info!("reconnect attempt {}/{}", attempt, self.policy.max_retries);

            if let Err(e) = link.reset_radio().and_then(|_| link.associate()) {
                tracing::warn!("reconnect attempt {} failed: {}", attempt, e);
                continue;
            }

            if self.wait_for_link(link, timer) {
                if let Err(e) = link.refresh_dns() {
                    tracing::warn!("reconnect attempt {}: link is up but DNS is not: {}", attempt, e);
                    continue;
                }
                tracing::info!("network link restored after {} attempt(s)", attempt);
                self.last_check_ms = timer.now_ms();
                return Health::Reconnected { attempts: attempt };
            }
            tracing::warn!(
                "no association within {} ms on attempt {}",
                self.policy.association_timeout_ms,
                attempt
            );
        }

        tracing::error!(
            "network still down after {} attempts, restarting in {} ms",
            self.policy.max_retries,
            self.policy.restart_grace_ms
        );
        timer.sleep_ms(self.policy.restart_grace_ms);
        self.restarter.restart();
        Health::Restarting
    }

    /// Poll the link until it is up or the association timeout runs out.
    pub fn wait_for_link<L: Link, T: Timer>(&self, link: &L, timer: &T) -> bool {
        let start = timer.now_ms();
        loop {
            if link.is_connected() {
                return true;
            }
            if timer.elapsed_since(start) >= self.policy.association_timeout_ms {
                return false;
            }
            timer.sleep_ms(self.policy.poll_ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::support::{CountingRestart, MockLink, MockTimer};

    fn supervisor() -> Supervisor<CountingRestart> {
        Supervisor::new(SupervisorPolicy::default(), CountingRestart::default(), 0)
    }

    #[test]
    fn test_checks_every_30_seconds() {
        let timer = MockTimer::new();
        let mut link = MockLink::connected();
        let mut sup = supervisor();

        timer.set(29_999);
        assert_eq!(sup.poll(&mut link, &timer), None);
        timer.set(30_000);
        assert_eq!(sup.poll(&mut link, &timer), Some(Health::Healthy));
        timer.set(45_000);
        assert_eq!(sup.poll(&mut link, &timer), None);
        timer.set(60_000);
        assert_eq!(sup.poll(&mut link, &timer), Some(Health::Healthy));
    }

    #[test]
    fn test_reconnects_on_first_attempt() {
        let timer = MockTimer::new();
        let mut link = MockLink::disconnected().reconnects_on_attempt(1);
        let mut sup = supervisor();

        assert_eq!(sup.check(&mut link, &timer), Health::Reconnected { attempts: 1 });
        assert_eq!(link.resets(), 1);
        assert_eq!(link.associations(), 1);
        assert_eq!(link.dns_refreshes(), 1);
        assert_eq!(sup.restarter.count, 0);
    }

    #[test]
    fn test_second_attempt_after_association_timeout() {
        let timer = MockTimer::new();
        let mut link = MockLink::disconnected().reconnects_on_attempt(2);
        let mut sup = supervisor();

        assert_eq!(sup.check(&mut link, &timer), Health::Reconnected { attempts: 2 });
        assert_eq!(link.associations(), 2);
        // Full association timeout, then the retry delay, before attempt 2.
        assert!(timer.now_ms() >= 10_000 + 1_000);
        assert_eq!(sup.restarter.count, 0);
    }

    #[test]
    fn test_restarts_after_exhausting_retries() {
        let timer = MockTimer::new();
        let mut link = MockLink::disconnected();
        let mut sup = supervisor();

        assert_eq!(sup.check(&mut link, &timer), Health::Restarting);
        assert_eq!(link.associations(), 2, "bounded to max_retries attempts");
        assert_eq!(sup.restarter.count, 1);
        assert!(timer.now_ms() >= 2 * 10_000 + 1_000 + 5_000, "waits the grace delay");
    }

    #[test]
    fn test_failed_commands_count_as_attempts() {
        let timer = MockTimer::new();
        let mut link = MockLink::disconnected().failing_commands();
        let mut sup = supervisor();

        assert_eq!(sup.check(&mut link, &timer), Health::Restarting);
        assert_eq!(link.resets(), 2);
        assert_eq!(sup.restarter.count, 1);
    }

    #[test]
    fn test_dns_failure_counts_as_failed_attempt() {
        let timer = MockTimer::new();
        let mut link = MockLink::disconnected().reconnects_on_attempt(1).failing_dns(1);
        let mut sup = supervisor();

        assert_eq!(sup.check(&mut link, &timer), Health::Reconnected { attempts: 2 });
        assert_eq!(link.resets(), 2, "radio cycled again after the DNS failure");
        assert_eq!(link.dns_refreshes(), 2);
        assert_eq!(sup.restarter.count, 0);
    }

    #[test]
    fn test_dns_never_recovering_restarts() {
        let timer = MockTimer::new();
        let mut link = MockLink::disconnected().reconnects_on_attempt(1).failing_dns(u32::MAX);
        let mut sup = supervisor();

        assert_eq!(sup.check(&mut link, &timer), Health::Restarting);
        assert_eq!(link.dns_refreshes(), 2);
        assert_eq!(sup.restarter.count, 1);
    }

    #[test]
    fn test_wait_for_link_is_bounded() {
        let timer = MockTimer::new();
        let link = MockLink::disconnected();
        let sup = supervisor();

        assert!(!sup.wait_for_link(&link, &timer));
        assert_eq!(timer.now_ms(), 10_000);

        let link = MockLink::disconnected().up_after_polls(3);
        timer.set(0);
        assert!(sup.wait_for_link(&link, &timer));
        assert_eq!(timer.now_ms(), 3 * 500, "three failed polls, then up");
    }

    #[test]
    fn test_unmanaged_link_is_always_healthy() {
        let timer = MockTimer::new();
        let mut link = UnmanagedLink;
        let mut sup = supervisor();
        timer.set(30_000);
        assert_eq!(sup.poll(&mut link, &timer), Some(Health::Healthy));
        assert_eq!(sup.restarter.count, 0);
    }

    #[test]
    fn test_nmcli_link_reports_missing_interface_down() {
        let link = NmcliLink::new("no-such-iface0", "ssid", "pw", &[], "localhost");
        assert!(!link.is_connected());
    }

    #[test]
    fn test_refresh_dns_without_static_servers_only_resolves() {
        let mut link = NmcliLink::new("no-such-iface0", "ssid", "pw", &[], "localhost");
        assert!(link.refresh_dns().is_ok());

        let mut link = NmcliLink::new("no-such-iface0", "ssid", "pw", &[], "no-such-host.invalid");
        assert!(matches!(link.refresh_dns(), Err(LinkError::Dns(host)) if host == "no-such-host.invalid"));
    }
}
