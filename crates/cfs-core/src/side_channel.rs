//! Direct Redis connection used for online store maintenance.
//!
//! The handshake happens once, at construction. When Redis is down the
//! channel is `Unavailable` and maintenance commands become logged no-ops;
//! the rest of the service keeps working.

use std::fmt;
use std::time::Duration;

use cfs_common::RedisSettings;
use tracing::{info, warn};

/// Commands the side channel needs from a Redis-like server.
pub trait KeyValueAdmin: Send {
    fn ping(&mut self) -> Result<(), String>;
    /// Synchronous snapshot to disk.
    fn save(&mut self) -> Result<(), String>;
    /// Drop every key in the selected database.
    fn flush_db(&mut self) -> Result<(), String>;
}

struct RedisAdmin {
    conn: redis::Connection,
}

impl RedisAdmin {
    fn command(&mut self, name: &str) -> Result<(), String> {
        redis::cmd(name)
            .query::<()>(&mut self.conn)
            .map_err(|e| format!("{} failed: {}", name, e))
    }
}

impl KeyValueAdmin for RedisAdmin {
    fn ping(&mut self) -> Result<(), String> {
        redis::cmd("PING")
            .query::<String>(&mut self.conn)
            .map(|_| ())
            .map_err(|e| format!("PING failed: {}", e))
    }

    fn save(&mut self) -> Result<(), String> {
        self.command("SAVE")
    }

    fn flush_db(&mut self) -> Result<(), String> {
        self.command("FLUSHDB")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Connected,
    Unavailable(String),
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Uninitialized => write!(f, "uninitialized"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Unavailable(reason) => write!(f, "unavailable ({})", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideChannelOutcome {
    Completed,
    Unavailable(String),
}

impl SideChannelOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, SideChannelOutcome::Completed)
    }
}

pub struct RedisSideChannel {
    state: ConnectionState,
    admin: Option<Box<dyn KeyValueAdmin>>,
}

impl Default for RedisSideChannel {
    fn default() -> Self {
        RedisSideChannel {
            state: ConnectionState::Uninitialized,
            admin: None,
        }
    }
}

impl RedisSideChannel {
    /// Connect and `PING` once. Failure is recorded, not returned.
    pub fn connect(settings: &RedisSettings) -> Self {
        let url = settings.url();
        let timeout = Duration::from_millis(settings.connect_timeout_ms);
        let conn = redis::Client::open(url.as_str())
            .and_then(|client| client.get_connection_with_timeout(timeout));
        match conn {
            Ok(conn) => Self::with_admin(Box::new(RedisAdmin { conn })),
            Err(e) => {
                warn!(
                    url = %url,
                    error = %e,
                    "redis unavailable, online store maintenance disabled"
                );
                Self::unavailable(e.to_string())
            }
        }
    }

    /// Wrap an already-open admin connection and `PING` it.
    pub fn with_admin(mut admin: Box<dyn KeyValueAdmin>) -> Self {
        match admin.ping() {
            Ok(()) => {
                info!("redis side channel connected");
                RedisSideChannel {
                    state: ConnectionState::Connected,
                    admin: Some(admin),
                }
            }
            Err(reason) => {
                warn!(%reason, "redis unavailable, online store maintenance disabled");
                Self::unavailable(reason)
            }
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        RedisSideChannel {
            state: ConnectionState::Unavailable(reason.into()),
            admin: None,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// `SAVE` on the server.
    pub fn backup(&mut self) -> SideChannelOutcome {
        self.run("backup", |admin| admin.save())
    }

    /// `FLUSHDB` on the server.
    pub fn clear(&mut self) -> SideChannelOutcome {
        self.run("clear", |admin| admin.flush_db())
    }

    fn run<F>(&mut self, operation: &str, command: F) -> SideChannelOutcome
    where
        F: FnOnce(&mut Box<dyn KeyValueAdmin>) -> Result<(), String>,
    {
        let Some(admin) = self.admin.as_mut() else {
            let reason = match &self.state {
                ConnectionState::Unavailable(reason) => reason.clone(),
                _ => "not connected".to_string(),
            };
            warn!(operation, %reason, "redis unavailable, skipping");
            return SideChannelOutcome::Unavailable(reason);
        };
        match command(admin) {
            Ok(()) => {
                info!(operation, "redis command completed");
                SideChannelOutcome::Completed
            }
            Err(reason) => {
                warn!(operation, %reason, "redis command failed");
                SideChannelOutcome::Unavailable(reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FakeAdmin {
        calls: Arc<Mutex<Vec<&'static str>>>,
        fail_ping: bool,
        fail_commands: bool,
    }

    impl KeyValueAdmin for FakeAdmin {
        fn ping(&mut self) -> Result<(), String> {
            self.calls.lock().unwrap().push("PING");
            if self.fail_ping {
                Err("connection reset".into())
            } else {
                Ok(())
            }
        }

        fn save(&mut self) -> Result<(), String> {
            self.calls.lock().unwrap().push("SAVE");
            if self.fail_commands {
                Err("MISCONF".into())
            } else {
                Ok(())
            }
        }

        fn flush_db(&mut self) -> Result<(), String> {
            self.calls.lock().unwrap().push("FLUSHDB");
            Ok(())
        }
    }

    #[test]
    fn test_default_is_uninitialized_and_noop() {
        let mut channel = RedisSideChannel::default();
        assert_eq!(channel.state(), &ConnectionState::Uninitialized);
        assert!(!channel.backup().is_completed());
    }

    #[test]
    fn test_connected_channel_issues_commands() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut channel = RedisSideChannel::with_admin(Box::new(FakeAdmin {
            calls: calls.clone(),
            ..Default::default()
        }));
        assert!(channel.is_connected());
        assert_eq!(channel.backup(), SideChannelOutcome::Completed);
        assert_eq!(channel.clear(), SideChannelOutcome::Completed);
        assert_eq!(*calls.lock().unwrap(), vec!["PING", "SAVE", "FLUSHDB"]);
    }

    #[test]
    fn test_failed_ping_is_unavailable() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut channel = RedisSideChannel::with_admin(Box::new(FakeAdmin {
            calls: calls.clone(),
            fail_ping: true,
            ..Default::default()
        }));
        assert_eq!(
            channel.state(),
            &ConnectionState::Unavailable("connection reset".into())
        );
        assert_eq!(
            channel.clear(),
            SideChannelOutcome::Unavailable("connection reset".into())
        );
        assert_eq!(*calls.lock().unwrap(), vec!["PING"]);
    }

    #[test]
    fn test_command_failure_does_not_raise() {
        let mut channel = RedisSideChannel::with_admin(Box::new(FakeAdmin {
            fail_commands: true,
            ..Default::default()
        }));
        assert!(matches!(channel.backup(), SideChannelOutcome::Unavailable(_)));
        assert!(channel.is_connected());
    }

    #[test]
    fn test_unreachable_server() {
        let settings = RedisSettings {
            host: "127.0.0.1".into(),
            port: 1,
            db: 0,
            connect_timeout_ms: 200,
        };
        let mut channel = RedisSideChannel::connect(&settings);
        assert!(matches!(channel.state(), ConnectionState::Unavailable(_)));
        assert!(matches!(channel.backup(), SideChannelOutcome::Unavailable(_)));
    }
}
