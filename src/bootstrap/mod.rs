//! Client bootstrap.
//!
//! Runs the login sequence strictly in order:
//! 1. Sleep a random jitter, then sign in
//! 2. For user accounts, repair the session's DC id if the server remapped
//!    the address it connects through
//! 3. Resolve the account identity (phone number dropped)
//! 4. Refuse to continue if the account is on the deny-list
//!
//! Any failure is fatal; the caller exits with the error's exit code.

mod timing;

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};

pub use timing::Timing;

use crate::blacklist::{BlacklistFetcher, BlacklistId, SourceFormat};
use crate::config::BotSettings;
use crate::telegram::{Credential, Identity, Transport, TransportError};

/// Progress of the login sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    Constructed,
    Connecting,
    Authenticating,
    DcCheck,
    IdentityResolved,
    BlacklistCheck,
    Ready,
    Failed,
}

/// Fatal login failures, one operator message per class.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("API_ID and API_HASH combination does not match, please re-check! Quitting...")]
    ApiIdInvalid(#[source] TransportError),

    #[error("STRING_SESSION expired, please create new! Quitting...")]
    SessionExpired(#[source] TransportError),

    #[error("Bot token expired or invalid. Create a new one with @BotFather and update BOT_TOKEN! Quitting...")]
    BotTokenInvalid(#[source] TransportError),

    #[error("({display} - {id}) YOU ARE BLACKLISTED !!")]
    Blacklisted { display: String, id: i64 },

    #[error("Login failed: {0}")]
    Other(#[source] TransportError),
}

impl BootstrapError {
    /// Process exit status for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        1
    }
}

impl From<TransportError> for BootstrapError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::ApiIdInvalid(_) => Self::ApiIdInvalid(err),
            TransportError::AuthKeyDuplicated(_)
            | TransportError::PhoneInvalid(_)
            | TransportError::UnexpectedEof
            | TransportError::MalformedSession(_) => Self::SessionExpired(err),
            TransportError::BotTokenInvalid(_) => Self::BotTokenInvalid(err),
            other => Self::Other(other),
        }
    }
}

/// Deny-list settings used by the last bootstrap step.
#[derive(Debug, Clone)]
pub struct BlacklistPolicy {
    pub url: String,
    pub attempts: u32,
    pub developer_ids: Vec<i64>,
}

impl BlacklistPolicy {
    #[must_use]
    pub fn from_settings(settings: &BotSettings) -> Self {
        Self {
            url: settings.blacklist_url.clone(),
            attempts: settings.blacklist_attempts,
            developer_ids: settings.developer_ids.clone(),
        }
    }

    /// Whether `id` bypasses the deny-list.
    #[must_use]
    pub fn is_developer(&self, id: i64) -> bool {
        self.developer_ids.contains(&id)
    }

    fn format(&self) -> SourceFormat {
        if self.url.ends_with(".json") {
            SourceFormat::Json
        } else {
            SourceFormat::Text
        }
    }
}

/// Result of a successful bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ready {
    pub identity: Identity,
}

/// Drives the login sequence against a transport.
pub struct Bootstrap {
    transport: Arc<dyn Transport>,
    blacklist: Arc<BlacklistFetcher>,
    policy: BlacklistPolicy,
    timing: Timing,
    state: BootstrapState,
}

impl Bootstrap {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        blacklist: Arc<BlacklistFetcher>,
        policy: BlacklistPolicy,
    ) -> Self {
        Self {
            transport,
            blacklist,
            policy,
            timing: Timing::default(),
            state: BootstrapState::Constructed,
        }
    }

    /// Replaces the delays between steps.
    #[must_use]
    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    #[must_use]
    pub const fn state(&self) -> BootstrapState {
        self.state
    }

    /// Runs every step; on error the state is `Failed` and the error logged.
    pub async fn run(&mut self, credential: &Credential) -> Result<Ready, BootstrapError> {
        let result = self.advance(credential).await;
        if let Err(ref e) = result {
            self.state = BootstrapState::Failed;
            match e {
                BootstrapError::Other(source) => error!("[Bootstrap] - {:?}", source),
                _ => error!("{}", e),
            }
        }
        result
    }

    async fn advance(&mut self, credential: &Credential) -> Result<Ready, BootstrapError> {
        info!("Trying to login...");
        self.state = BootstrapState::Connecting;
        let jitter = self.timing.jitter();
        debug!("Waiting {:?} before login", jitter);
        tokio::time::sleep(jitter).await;

        self.state = BootstrapState::Authenticating;
        self.transport.start(credential).await?;

        if self.transport.is_bot().await? {
            debug!("Bot account, skipping DC check");
        } else {
            self.state = BootstrapState::DcCheck;
            self.reconcile_dc().await?;
        }
        tokio::time::sleep(self.timing.settle).await;

        let identity = Identity::from_account(self.transport.get_me().await?);
        self.state = BootstrapState::IdentityResolved;
        tokio::time::sleep(self.timing.settle).await;

        self.state = BootstrapState::BlacklistCheck;
        self.check_blacklist(&identity).await?;

        self.state = BootstrapState::Ready;
        info!("Logged in as {} [{}]", identity.display(), identity.id());
        Ok(Ready { identity })
    }

    /// Corrects the stored DC id when the connected address belongs to another DC.
    async fn reconcile_dc(&self) -> Result<(), BootstrapError> {
        let current = self.transport.session_dc();
        let Some(address) = current.server_address else {
            debug!("Session carries no server address, skipping DC check");
            return Ok(());
        };

        let options = self.transport.dc_options().await?;
        let Some(option) = options.iter().find(|o| o.ip_address == address) else {
            return Ok(());
        };

        if current.dc_id != Some(option.id) {
            warn!(
                "Fixed DC ID in session from {} to {}",
                current.dc_id.map_or_else(|| "unknown".to_owned(), |id| id.to_string()),
                option.id
            );
            self.transport
                .set_dc(option.id, &option.ip_address, option.port)?;
            self.transport.save().await?;
        }
        Ok(())
    }

    async fn check_blacklist(&self, identity: &Identity) -> Result<(), BootstrapError> {
        if self.policy.is_developer(identity.id()) {
            debug!("Developer account, skipping blacklist");
            return Ok(());
        }

        let listed = self
            .blacklist
            .fetch(&self.policy.url, self.policy.format(), self.policy.attempts, None)
            .await;

        if listed.contains(&BlacklistId::Int(identity.id())) {
            return Err(BootstrapError::Blacklisted {
                display: identity.display(),
                id: identity.id(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Bootstrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bootstrap")
            .field("state", &self.state)
            .field("policy", &self.policy)
            .field("timing", &self.timing)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::blacklist::{Fetch, FetchResponse};
    use crate::plugins::Dispatcher;
    use crate::telegram::{Account, DcOption, SessionDc, Shutdown};

    #[derive(Default)]
    struct MockTransport {
        start_error: Mutex<Option<TransportError>>,
        account: Account,
        options: Vec<DcOption>,
        session: Mutex<SessionDc>,
        topology_queries: AtomicUsize,
        saves: AtomicUsize,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn start(&self, _credential: &Credential) -> Result<(), TransportError> {
            match self.start_error.lock().unwrap().take() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }

        async fn is_bot(&self) -> Result<bool, TransportError> {
            Ok(self.account.is_bot)
        }

        async fn get_me(&self) -> Result<Account, TransportError> {
            Ok(self.account.clone())
        }

        async fn dc_options(&self) -> Result<Vec<DcOption>, TransportError> {
            self.topology_queries.fetch_add(1, Ordering::SeqCst);
            Ok(self.options.clone())
        }

        fn session_dc(&self) -> SessionDc {
            self.session.lock().unwrap().clone()
        }

        fn set_dc(&self, dc_id: i32, ip: &str, _port: u16) -> Result<(), TransportError> {
            let mut session = self.session.lock().unwrap();
            session.dc_id = Some(dc_id);
            session.server_address = Some(ip.to_owned());
            Ok(())
        }

        async fn save(&self) -> Result<(), TransportError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn run_until_disconnected(
            &self,
            _dispatcher: &Dispatcher,
        ) -> Result<Shutdown, TransportError> {
            Ok(Shutdown::Disconnected)
        }

        fn disconnect(&self) {}
    }

    struct StaticFetch {
        body: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Fetch for StaticFetch {
        async fn fetch(&self, _url: &str, _format: SourceFormat) -> Option<FetchResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Some(FetchResponse::Raw(self.body.as_bytes().to_vec()))
        }
    }

    fn user(id: i64) -> Account {
        Account {
            id,
            is_bot: false,
            username: Some("ada".to_owned()),
            first_name: Some("Ada".to_owned()),
            last_name: None,
            phone: Some("+15550001111".to_owned()),
        }
    }

    fn policy(developer_ids: Vec<i64>) -> BlacklistPolicy {
        BlacklistPolicy {
            url: "https://example.org/blacklist.py".to_owned(),
            attempts: 2,
            developer_ids,
        }
    }

    fn fetch(body: &'static str) -> Arc<StaticFetch> {
        Arc::new(StaticFetch {
            body,
            calls: AtomicUsize::new(0),
        })
    }

    fn bootstrap(
        transport: &Arc<MockTransport>,
        source: &Arc<StaticFetch>,
        policy: BlacklistPolicy,
    ) -> Bootstrap {
        let fetcher = BlacklistFetcher::new(Arc::clone(source) as Arc<dyn Fetch>)
            .with_backoff(std::time::Duration::ZERO);
        Bootstrap::new(
            Arc::clone(transport) as Arc<dyn Transport>,
            Arc::new(fetcher),
            policy,
        )
        .with_timing(Timing::immediate())
    }

    #[tokio::test]
    async fn test_reaches_ready() {
        let transport = Arc::new(MockTransport {
            account: user(42),
            ..MockTransport::default()
        });
        let source = fetch("[1, 2, 3]");
        let mut boot = bootstrap(&transport, &source, policy(Vec::new()));
        assert_eq!(boot.state(), BootstrapState::Constructed);

        let ready = boot.run(&Credential::Session).await.unwrap();
        assert_eq!(boot.state(), BootstrapState::Ready);
        assert_eq!(ready.identity.id(), 42);
        assert_eq!(ready.identity.display(), "Ada");
        assert!(!format!("{:?}", ready.identity).contains("5550001111"));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_blacklisted_identity_never_ready() {
        let transport = Arc::new(MockTransport {
            account: user(222),
            ..MockTransport::default()
        });
        let source = fetch("111 222 abc -333");
        let mut boot = bootstrap(&transport, &source, policy(vec![7]));

        let err = boot.run(&Credential::Session).await.unwrap_err();
        assert!(matches!(err, BootstrapError::Blacklisted { id: 222, .. }));
        assert_eq!(err.exit_code(), 1);
        assert_eq!(boot.state(), BootstrapState::Failed);
    }

    #[tokio::test]
    async fn test_developer_skips_blacklist_fetch() {
        let transport = Arc::new(MockTransport {
            account: user(222),
            ..MockTransport::default()
        });
        let source = fetch("222");
        let mut boot = bootstrap(&transport, &source, policy(vec![222]));

        assert!(boot.run(&Credential::Session).await.is_ok());
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dc_mismatch_is_repaired_once() {
        let transport = Arc::new(MockTransport {
            account: user(1),
            options: vec![
                DcOption {
                    id: 1,
                    ip_address: "149.154.175.53".to_owned(),
                    port: 443,
                },
                DcOption {
                    id: 4,
                    ip_address: "149.154.167.91".to_owned(),
                    port: 443,
                },
                DcOption {
                    id: 5,
                    ip_address: "149.154.167.91".to_owned(),
                    port: 443,
                },
            ],
            session: Mutex::new(SessionDc {
                dc_id: Some(2),
                server_address: Some("149.154.167.91".to_owned()),
            }),
            ..MockTransport::default()
        });
        let source = fetch("");
        let mut boot = bootstrap(&transport, &source, policy(Vec::new()));

        boot.run(&Credential::Session).await.unwrap();
        assert_eq!(transport.session_dc().dc_id, Some(4));
        assert_eq!(transport.saves.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_matching_dc_is_not_saved() {
        let transport = Arc::new(MockTransport {
            account: user(1),
            options: vec![DcOption {
                id: 2,
                ip_address: "149.154.167.51".to_owned(),
                port: 443,
            }],
            session: Mutex::new(SessionDc {
                dc_id: Some(2),
                server_address: Some("149.154.167.51".to_owned()),
            }),
            ..MockTransport::default()
        });
        let mut boot = bootstrap(&transport, &fetch(""), policy(Vec::new()));

        boot.run(&Credential::Session).await.unwrap();
        assert_eq!(transport.saves.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_bot_skips_dc_check() {
        let transport = Arc::new(MockTransport {
            account: Account {
                is_bot: true,
                username: Some("helper_bot".to_owned()),
                ..user(9)
            },
            session: Mutex::new(SessionDc {
                dc_id: Some(2),
                server_address: Some("149.154.167.51".to_owned()),
            }),
            ..MockTransport::default()
        });
        let mut boot = bootstrap(&transport, &fetch(""), policy(Vec::new()));

        let ready = boot
            .run(&Credential::BotToken("1:abc".to_owned()))
            .await
            .unwrap();
        assert_eq!(ready.identity.display(), "@helper_bot");
        assert_eq!(transport.topology_queries.load(Ordering::SeqCst), 0);
    }

    async fn fail_with(error: TransportError) -> BootstrapError {
        let transport = Arc::new(MockTransport {
            start_error: Mutex::new(Some(error)),
            account: user(1),
            ..MockTransport::default()
        });
        let mut boot = bootstrap(&transport, &fetch(""), policy(Vec::new()));
        let err = boot.run(&Credential::Session).await.unwrap_err();
        assert_eq!(boot.state(), BootstrapState::Failed);
        err
    }

    #[tokio::test]
    async fn test_login_failures_are_classified() {
        assert!(matches!(
            fail_with(TransportError::ApiIdInvalid("API_ID_INVALID".to_owned())).await,
            BootstrapError::ApiIdInvalid(_)
        ));
        for error in [
            TransportError::AuthKeyDuplicated("AUTH_KEY_DUPLICATED".to_owned()),
            TransportError::PhoneInvalid("PHONE_NUMBER_INVALID".to_owned()),
            TransportError::UnexpectedEof,
        ] {
            assert!(matches!(fail_with(error).await, BootstrapError::SessionExpired(_)));
        }
        assert!(matches!(
            fail_with(TransportError::BotTokenInvalid("ACCESS_TOKEN_INVALID".to_owned())).await,
            BootstrapError::BotTokenInvalid(_)
        ));
        let other = fail_with(TransportError::Connection("reset".to_owned())).await;
        assert!(matches!(other, BootstrapError::Other(_)));
        assert_eq!(other.exit_code(), 1);
    }

    #[test]
    fn test_blacklist_format_from_url() {
        let mut policy = policy(Vec::new());
        assert_eq!(policy.format(), SourceFormat::Text);
        policy.url = "https://example.org/ids.json".to_owned();
        assert_eq!(policy.format(), SourceFormat::Json);
    }
}
