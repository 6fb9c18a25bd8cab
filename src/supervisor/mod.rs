//! Process supervisor.
//!
//! The core never relaunches itself: it hands back `Shutdown::Reboot` or a
//! `TransportError` that requires a restart, and the binary calls into this
//! module to replace the running process with a fresh copy of itself.

mod store;

use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

pub use store::{Entry, Store, StoreError};

use crate::plugins::RebootRequest;
use crate::telegram::Transport;

/// Store key holding the pending reboot coordinate.
pub const REBOOT_KEY: &str = "_reboot";

/// Executable and arguments of the running process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launch {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl Launch {
    /// Captures how the current process was started.
    pub fn current() -> io::Result<Self> {
        Ok(Self {
            program: std::env::current_exe()?,
            args: std::env::args_os().skip(1).collect(),
        })
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

/// A reboot that was requested by the previous process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReboot {
    pub request: RebootRequest,
    pub requested_at: DateTime<Utc>,
}

/// Restarts the process on request or after transport corruption.
pub struct Supervisor {
    transport: Arc<dyn Transport>,
    store: Store,
    launch: Launch,
}

impl Supervisor {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, store: Store, launch: Launch) -> Self {
        Self {
            transport,
            store,
            launch,
        }
    }

    /// Disconnects and replaces the process image with a fresh copy.
    ///
    /// Only returns if relaunching failed.
    pub fn restart(&self, reason: &str) -> io::Error {
        warn!("Restarting: {}", reason);
        self.transport.disconnect();
        info!(
            "Relaunching {} with {} argument(s)",
            self.launch.program.display(),
            self.launch.args.len()
        );
        relaunch(self.launch.command())
    }

    /// Remembers where to report completion, then restarts.
    pub fn reboot(&self, request: RebootRequest) -> io::Error {
        self.mark_reboot(request);
        self.restart("reboot requested")
    }

    fn mark_reboot(&self, request: RebootRequest) {
        if let Err(e) = self.store.set(REBOOT_KEY, request.encode()) {
            warn!("Could not record reboot target: {}", e);
        }
    }

    /// Reads and clears the coordinate left by a previous reboot.
    pub fn take_reboot_marker(&self) -> Option<PendingReboot> {
        let entry = match self.store.take(REBOOT_KEY) {
            Ok(entry) => entry?,
            Err(e) => {
                warn!("Could not clear reboot marker: {}", e);
                return None;
            }
        };

        let Some(request) = RebootRequest::decode(&entry.value) else {
            warn!("Discarding malformed reboot marker {:?}", entry.value);
            return None;
        };

        let took = Utc::now().signed_duration_since(entry.updated_at);
        info!(
            "Reboot completed in {}s (requested from chat {}, message {})",
            took.num_seconds(),
            request.chat_id,
            request.message_id
        );
        Some(PendingReboot {
            request,
            requested_at: entry.updated_at,
        })
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("store", &self.store.path())
            .field("launch", &self.launch)
            .finish_non_exhaustive()
    }
}

#[cfg(unix)]
fn relaunch(mut command: Command) -> io::Error {
    use std::os::unix::process::CommandExt;

    command.exec()
}

#[cfg(not(unix))]
fn relaunch(mut command: Command) -> io::Error {
    match command.spawn() {
        Ok(_) => std::process::exit(0),
        Err(e) => e,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::plugins::Dispatcher;
    use crate::telegram::{Account, Credential, DcOption, SessionDc, Shutdown, TransportError};

    #[derive(Default)]
    struct IdleTransport {
        disconnected: AtomicBool,
    }

    #[async_trait]
    impl Transport for IdleTransport {
        async fn start(&self, _credential: &Credential) -> Result<(), TransportError> {
            Ok(())
        }

        async fn is_bot(&self) -> Result<bool, TransportError> {
            Ok(false)
        }

        async fn get_me(&self) -> Result<Account, TransportError> {
            Ok(Account::default())
        }

        async fn dc_options(&self) -> Result<Vec<DcOption>, TransportError> {
            Ok(Vec::new())
        }

        fn session_dc(&self) -> SessionDc {
            SessionDc::default()
        }

        fn set_dc(&self, _dc_id: i32, _ip: &str, _port: u16) -> Result<(), TransportError> {
            Ok(())
        }

        async fn save(&self) -> Result<(), TransportError> {
            Ok(())
        }

        async fn run_until_disconnected(
            &self,
            _dispatcher: &Dispatcher,
        ) -> Result<Shutdown, TransportError> {
            Ok(Shutdown::Disconnected)
        }

        fn disconnect(&self) {
            self.disconnected.store(true, Ordering::SeqCst);
        }
    }

    fn supervisor(store: Store, program: &str) -> (Supervisor, Arc<IdleTransport>) {
        let transport = Arc::new(IdleTransport::default());
        let launch = Launch {
            program: PathBuf::from(program),
            args: vec![OsString::from("--no-autoload")],
        };
        (
            Supervisor::new(Arc::clone(&transport) as Arc<dyn Transport>, store, launch),
            transport,
        )
    }

    #[test]
    fn test_reboot_marker_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let request = RebootRequest {
            chat_id: -100_123,
            message_id: 77,
        };

        let (first, _) = supervisor(Store::open(&path), "userbot");
        first.mark_reboot(request);
        assert_eq!(Store::open(&path).get(REBOOT_KEY).unwrap().value, "-100123|77");

        let (second, _) = supervisor(Store::open(&path), "userbot");
        let pending = second.take_reboot_marker().unwrap();
        assert_eq!(pending.request, request);
        assert!(pending.requested_at <= Utc::now());
        assert!(second.take_reboot_marker().is_none());
    }

    #[test]
    fn test_malformed_marker_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("store.json"));
        store.set(REBOOT_KEY, "garbage").unwrap();

        let (supervisor, _) = supervisor(store, "userbot");
        assert!(supervisor.take_reboot_marker().is_none());
        assert!(supervisor.store.get(REBOOT_KEY).is_none());
    }

    #[test]
    fn test_failed_restart_disconnects_first() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no-such-binary");
        let (supervisor, transport) =
            supervisor(Store::open(dir.path().join("store.json")), missing.to_str().unwrap());

        let err = supervisor.restart("test");
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(transport.disconnected.load(Ordering::SeqCst));
    }

    #[test]
    fn test_launch_keeps_arguments() {
        let launch = Launch {
            program: PathBuf::from("/usr/bin/userbot"),
            args: vec![OsString::from("--env-file"), OsString::from("prod.env")],
        };
        let command = launch.command();
        assert_eq!(command.get_program(), "/usr/bin/userbot");
        assert_eq!(command.get_args().collect::<Vec<_>>(), ["--env-file", "prod.env"]);
    }
}
