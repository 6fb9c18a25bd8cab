//! `grammers`-backed transport.

use std::net::{SocketAddrV4, SocketAddrV6};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use grammers_client::types::Message;
use grammers_client::update::Update;
use grammers_client::sender::{self, ConnectionParams};
use grammers_client::{Client, InvocationError, SenderPool, UpdatesConfiguration};
use grammers_session::Session as _;
use grammers_session::storages::SqliteSession;
use grammers_session::types::DcOption as StoredDcOption;
use grammers_tl_types as tl;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::login;
use super::transport::{
    Account, Credential, DcOption, SessionDc, Shutdown, Transport, TransportError,
};
use crate::config::TelegramConfig;
use crate::plugins::{Dispatcher, MessageEvent};
use crate::session::{SessionData, StringSession};

/// Fixed connection behaviour of the client.
///
/// Reconnection and the peer cache are managed by the sender pool itself.
#[derive(Debug, Clone)]
pub struct TransportPolicy {
    pub request_retries: u32,
    pub connection_retries: u32,
    pub device_model: String,
    pub system_version: String,
    pub app_version: String,
}

impl Default for TransportPolicy {
    fn default() -> Self {
        Self {
            request_retries: 3,
            connection_retries: 3,
            device_model: env!("CARGO_PKG_NAME").to_owned(),
            system_version: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
            app_version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }
}

impl TransportPolicy {
    /// Client identity strings sent when the connection is initialised.
    fn connection_params(&self) -> ConnectionParams {
        ConnectionParams {
            device_model: self.device_model.clone(),
            system_version: self.system_version.clone(),
            app_version: self.app_version.clone(),
            ..ConnectionParams::default()
        }
    }
}

impl From<InvocationError> for TransportError {
    fn from(err: InvocationError) -> Self {
        let err_str = err.to_string();
        match err {
            InvocationError::Rpc(_) => Self::classify(&err_str),
            _ => match Self::classify(&err_str) {
                Self::Other(msg) => Self::Connection(msg),
                classified => classified,
            },
        }
    }
}

type UpdateItem = Result<Update, TransportError>;

/// Telegram connection backed by `grammers`.
pub struct GrammersTransport {
    /// The underlying grammers client.
    client: Client,

    /// Handle to the sender pool for disconnection.
    handle: sender::SenderPoolHandle,

    /// MTProto session storage.
    storage: Arc<SqliteSession>,

    /// The configured string session, updated on DC fixes.
    session: Mutex<StringSession>,

    /// Where `save` writes the string session.
    session_string_path: PathBuf,

    api_hash: String,

    policy: TransportPolicy,

    /// Updates forwarded from the update stream.
    updates: AsyncMutex<mpsc::UnboundedReceiver<UpdateItem>>,

    /// Background task running the sender pool.
    _pool_task: JoinHandle<()>,

    /// Background task pumping updates.
    _updates_task: JoinHandle<()>,
}

impl GrammersTransport {
    /// Builds the connection object for a validated session.
    ///
    /// # Errors
    ///
    /// Returns an error if the session storage cannot be opened.
    pub async fn connect(
        config: &TelegramConfig,
        session: StringSession,
        policy: TransportPolicy,
    ) -> Result<Self, TransportError> {
        info!("Connecting to Telegram...");
        debug!(
            "Transport policy: device={}, system={}, app={}, retries={}/{}",
            policy.device_model,
            policy.system_version,
            policy.app_version,
            policy.request_retries,
            policy.connection_retries
        );

        let storage = Arc::new(
            SqliteSession::open(&config.session_path)
                .await
                .map_err(|e| TransportError::Session(e.to_string()))?,
        );

        match (session.data(), stored_auth_key(&storage).await) {
            (Some(_), Some(_)) => debug!("Session storage already authorized, keeping it"),
            (Some(data), None) => import_session(&storage, data).await,
            (None, _) => {}
        }

        let SenderPool {
            runner,
            updates,
            handle,
        } = SenderPool::with_configuration(
            Arc::clone(&storage),
            config.api_id,
            policy.connection_params(),
        );

        let client = Client::new(handle.clone());

        // Spawn the sender pool runner
        let pool_task = tokio::spawn(async move {
            runner.run().await;
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let mut stream = client
            .stream_updates(
                updates,
                UpdatesConfiguration {
                    catch_up: false,
                    ..Default::default()
                },
            )
            .await;
        let updates_task = tokio::spawn(async move {
            loop {
                let item = stream.next().await.map_err(TransportError::from);
                let failed = item.is_err();
                if tx.send(item).is_err() || failed {
                    break;
                }
            }
        });

        Ok(Self {
            client,
            handle: handle.thin,
            storage,
            session: Mutex::new(session),
            session_string_path: config.session_string_path.clone(),
            api_hash: config.api_hash.clone(),
            policy,
            updates: AsyncMutex::new(rx),
            _pool_task: pool_task,
            _updates_task: updates_task,
        })
    }

    /// Invokes a request, retrying failures that are not server errors.
    async fn invoke<R: tl::RemoteCall>(&self, request: &R) -> Result<R::Return, TransportError> {
        let mut attempt = 1;
        loop {
            match self.client.invoke(request).await {
                Ok(value) => return Ok(value),
                Err(e @ InvocationError::Rpc(_)) => return Err(e.into()),
                Err(e) if attempt >= self.policy.request_retries => return Err(e.into()),
                Err(e) => {
                    debug!("Request attempt {} failed: {}", attempt, e);
                    attempt += 1;
                }
            }
        }
    }

    async fn is_authorized(&self) -> Result<bool, TransportError> {
        let mut attempt = 1;
        loop {
            match self.client.is_authorized().await {
                Ok(authorized) => return Ok(authorized),
                Err(e) if attempt >= self.policy.connection_retries => return Err(e.into()),
                Err(e) => {
                    warn!("Connection attempt {} failed: {}", attempt, e);
                    attempt += 1;
                }
            }
        }
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, StringSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn send_replies(&self, message: &Message, event: &MessageEvent, replies: Vec<String>) {
        for (i, text) in replies.into_iter().enumerate() {
            let sent = if event.outgoing && i == 0 {
                message.edit(text.as_str()).await.map(|_| ())
            } else {
                message.reply(text.as_str()).await.map(|_| ())
            };
            if let Err(e) = sent {
                warn!("Failed to respond in chat {}: {}", event.chat_id, e);
            }
        }
    }
}

#[async_trait]
impl Transport for GrammersTransport {
    async fn start(&self, credential: &Credential) -> Result<(), TransportError> {
        if self.is_authorized().await? {
            debug!("Session already authorized");
            return Ok(());
        }

        match credential {
            Credential::BotToken(token) => {
                info!("Signing in as bot...");
                self.client
                    .bot_sign_in(token, &self.api_hash)
                    .await
                    .map_err(|e| TransportError::classify(&e.to_string()))?;
                Ok(())
            }
            Credential::Session => {
                if self.lock_session().data().is_none() {
                    return Err(TransportError::MalformedSession(
                        "unsupported string session version".to_owned(),
                    ));
                }
                login::interactive(&self.client, &self.api_hash).await
            }
        }
    }

    async fn is_bot(&self) -> Result<bool, TransportError> {
        Ok(self.get_me().await?.is_bot)
    }

    async fn get_me(&self) -> Result<Account, TransportError> {
        let request = tl::functions::users::GetUsers {
            id: vec![tl::enums::InputUser::UserSelf],
        };

        match self.invoke(&request).await?.into_iter().next() {
            Some(tl::enums::User::User(user)) => Ok(Account {
                id: user.id,
                is_bot: user.bot,
                username: user.username,
                first_name: user.first_name,
                last_name: user.last_name,
                phone: user.phone,
            }),
            _ => Err(TransportError::Other("server returned no account".to_owned())),
        }
    }

    async fn dc_options(&self) -> Result<Vec<DcOption>, TransportError> {
        let tl::enums::Config::Config(config) = self.invoke(&tl::functions::help::GetConfig {}).await?;

        Ok(config
            .dc_options
            .into_iter()
            .filter_map(|option| {
                let tl::enums::DcOption::Option(option) = option;
                Some(DcOption {
                    id: option.id,
                    port: u16::try_from(option.port).ok()?,
                    ip_address: option.ip_address,
                })
            })
            .collect())
    }

    fn session_dc(&self) -> SessionDc {
        let session = self.lock_session();
        SessionDc {
            dc_id: session.dc_id(),
            server_address: session.server_address(),
        }
    }

    fn set_dc(&self, dc_id: i32, ip: &str, port: u16) -> Result<(), TransportError> {
        self.lock_session()
            .set_dc(dc_id, ip, port)
            .map_err(|e| TransportError::Session(e.to_string()))
    }

    async fn save(&self) -> Result<(), TransportError> {
        let session = self.lock_session().clone();
        session
            .save(&self.session_string_path)
            .map_err(|e| TransportError::Session(e.to_string()))?;

        if let Some(data) = session.data() {
            import_session(&self.storage, data).await;
        }
        debug!("Session saved to {}", self.session_string_path.display());
        Ok(())
    }

    async fn run_until_disconnected(&self, dispatcher: &Dispatcher) -> Result<Shutdown, TransportError> {
        let mut updates = self.updates.lock().await;

        while let Some(item) = updates.recv().await {
            let Update::NewMessage(message) = item? else {
                continue;
            };

            let event = message_event(&message);
            let dispatch = dispatcher.dispatch(&event).await;
            self.send_replies(&message, &event, dispatch.replies).await;

            if let Some(request) = dispatch.reboot {
                return Ok(Shutdown::Reboot(request));
            }
        }

        Ok(Shutdown::Disconnected)
    }

    fn disconnect(&self) {
        info!("Disconnecting from Telegram...");
        self.handle.quit();
    }
}

impl std::fmt::Debug for GrammersTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrammersTransport")
            .field("policy", &self.policy)
            .field("session", &*self.lock_session())
            .finish_non_exhaustive()
    }
}

/// Auth key the storage holds for its home data center.
async fn stored_auth_key(storage: &SqliteSession) -> Option<[u8; 256]> {
    let home = storage.home_dc_id().await;
    storage.dc_option(home).await?.auth_key
}

/// Writes the string session's DC into the MTProto storage.
///
/// A key already in storage wins over the one in the token, so a login
/// completed in-process is not replaced by a stale token.
async fn import_session(storage: &SqliteSession, data: &SessionData) {
    let auth_key = stored_auth_key(storage).await.unwrap_or(data.auth_key);
    let option = StoredDcOption {
        id: data.dc_id,
        ipv4: SocketAddrV4::new(data.server_address, data.port),
        ipv6: SocketAddrV6::new(data.server_address.to_ipv6_mapped(), data.port, 0, 0),
        auth_key: Some(auth_key),
    };
    storage.set_dc_option(&option).await;
    storage.set_home_dc_id(data.dc_id).await;
}

fn message_event(message: &Message) -> MessageEvent {
    MessageEvent {
        chat_id: message.chat().id(),
        message_id: message.id(),
        sender_id: message.sender().map(|sender| sender.id()),
        text: message.text().to_owned(),
        outgoing: message.outgoing(),
    }
}
