//! The Parlor client: public REST operations, resource caching, and the
//! entry point to the realtime event session.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::errors::{Error, Resource, Result};
use crate::gateway::{Event, EventKind, EventRegistry, HandlerHandle};
use crate::http::{decode, Call, Executor, FilePayload, HttpSend, ReqwestSend};
use crate::limiter::RateLimiter;
use crate::models::{
    Channel, ChannelKind, Member, Message, Permission, Presence, Role, ServerInfo, User,
};
use crate::transport::Transport;

/// Query options for [`Client::get_messages`].
#[derive(Clone, Copy, Debug)]
pub struct MessageQuery {
    pub limit: u32,
    /// Only messages with ids strictly below this one.
    pub before: Option<u64>,
    /// Only messages with ids strictly above this one.
    pub after: Option<u64>,
}

impl Default for MessageQuery {
    fn default() -> Self {
        Self {
            limit: 50,
            before: None,
            after: None,
        }
    }
}

impl MessageQuery {
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn before(mut self, id: u64) -> Self {
        self.before = Some(id);
        self
    }

    pub fn after(mut self, id: u64) -> Self {
        self.after = Some(id);
        self
    }
}

/// A client session scoped to one server.
///
/// All REST operations funnel through a single executor (rate limit, retry,
/// error mapping); channel and user lookups consult best-effort caches
/// first. The caches and the limiter ledger are mutex-guarded, so one
/// client may be shared across tasks.
pub struct Client {
    cfg: ClientConfig,
    exec: Executor,
    server_info: Option<ServerInfo>,
    /// Last fetched channel set, keyed by id. Replaced wholesale on
    /// refresh, patched in place after create/delete. The lock is held
    /// across a refresh so concurrent callers observe either the previous
    /// or the new generation, never a partial one.
    channels: Mutex<HashMap<u64, Channel>>,
    /// Filled opportunistically from member listings; never proactively
    /// invalidated.
    users: Mutex<HashMap<String, User>>,
    registry: Arc<EventRegistry>,
    stop: CancellationToken,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("cfg", &self.cfg)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Connect using the production HTTP stack.
    ///
    /// Unless `skip_initialization` is set, this validates the token by
    /// listing servers and adopts the first one as the session's server.
    pub async fn connect(cfg: ClientConfig) -> Result<Self> {
        Self::connect_with(cfg, Arc::new(ReqwestSend::new())).await
    }

    /// Connect with a custom [`HttpSend`] implementation (tests, recording
    /// proxies).
    pub async fn connect_with(cfg: ClientConfig, sender: Arc<dyn HttpSend>) -> Result<Self> {
        let transport = Transport::new(&cfg);
        let limiter = RateLimiter::new(cfg.rate_limit_per_minute);
        let exec = Executor::new(transport, sender, limiter, cfg.retry_attempts, cfg.timeout);

        let mut client = Self {
            cfg,
            exec,
            server_info: None,
            channels: Mutex::new(HashMap::new()),
            users: Mutex::new(HashMap::new()),
            registry: Arc::new(EventRegistry::default()),
            stop: CancellationToken::new(),
        };

        if !client.cfg.skip_initialization {
            client.initialize().await?;
        }
        Ok(client)
    }

    async fn initialize(&mut self) -> Result<()> {
        let servers: Vec<ServerInfo> = decode(self.exec.execute(Call::get("/servers")).await?)?;
        let info = servers.into_iter().next().ok_or(Error::InvalidToken)?;
        tracing::info!(server = %info.name, server_id = info.id, "connected");
        self.server_info = Some(info);
        Ok(())
    }

    /// The server this session is scoped to, if initialization ran.
    pub fn server(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    fn server_id(&self) -> Result<u64> {
        self.server_info
            .as_ref()
            .map(|s| s.id)
            .ok_or(Error::NotFound(Resource::Server))
    }

    // Channel operations

    /// List channels, served from cache unless empty or `force_refresh`.
    ///
    /// A refresh replaces the cache wholesale; if the fetch fails, the
    /// previous cache generation is retained.
    pub async fn get_channels(&self, force_refresh: bool) -> Result<Vec<Channel>> {
        let mut cache = self.channels.lock().await;
        if !force_refresh && !cache.is_empty() {
            let mut out: Vec<Channel> = cache.values().cloned().collect();
            out.sort_by_key(|c| c.id);
            return Ok(out);
        }

        let server_id = self.server_id()?;
        let path = format!("/servers/{server_id}/channels");
        let mut channels: Vec<Channel> =
            decode(self.exec.execute(Call::get(&path)).await?)?;

        *cache = channels.iter().map(|c| (c.id, c.clone())).collect();
        channels.sort_by_key(|c| c.id);
        Ok(channels)
    }

    /// Look a channel up by id: cache first, then one forced refresh.
    pub async fn get_channel(&self, channel_id: u64) -> Result<Channel> {
        if let Some(ch) = self.channels.lock().await.get(&channel_id) {
            return Ok(ch.clone());
        }

        let channels = self.get_channels(true).await?;
        channels
            .into_iter()
            .find(|c| c.id == channel_id)
            .ok_or(Error::NotFound(Resource::Channel))
    }

    /// Create a channel and patch it into the cache in place.
    pub async fn create_channel(
        &self,
        name: &str,
        description: &str,
        kind: ChannelKind,
    ) -> Result<Channel> {
        let server_id = self.server_id()?;
        let path = format!("/servers/{server_id}/channels");
        let body = json!({
            "name": name,
            "description": description,
            "type": kind.as_str(),
        });

        let channel: Channel =
            decode(self.exec.execute(Call::post(&path).body(body)).await?)?;
        self.channels
            .lock()
            .await
            .insert(channel.id, channel.clone());
        Ok(channel)
    }

    /// Delete a channel and remove it from the cache in place.
    pub async fn delete_channel(&self, channel_id: u64) -> Result<()> {
        let server_id = self.server_id()?;
        let path = format!("/servers/{server_id}/channels/{channel_id}");
        self.exec
            .execute(Call::delete(&path).not_found(Resource::Channel))
            .await?;

        self.channels.lock().await.remove(&channel_id);
        Ok(())
    }

    // Message operations. Messages are never cached; every fetch is live.

    pub async fn send_message(
        &self,
        channel_id: u64,
        content: impl Into<String>,
    ) -> Result<Message> {
        self.send_message_with_embeds(channel_id, content, Vec::new())
            .await
    }

    pub async fn send_message_with_embeds(
        &self,
        channel_id: u64,
        content: impl Into<String>,
        embeds: Vec<Value>,
    ) -> Result<Message> {
        let server_id = self.server_id()?;
        let path = format!("/servers/{server_id}/channels/{channel_id}/messages");
        let mut body = json!({ "content": content.into() });
        if !embeds.is_empty() {
            body["embeds"] = Value::Array(embeds);
        }

        decode(
            self.exec
                .execute(Call::post(&path).body(body).not_found(Resource::Channel))
                .await?,
        )
    }

    /// Fetch message history in the order the backend returns it.
    pub async fn get_messages(
        &self,
        channel_id: u64,
        query: MessageQuery,
    ) -> Result<Vec<Message>> {
        let server_id = self.server_id()?;
        let path = format!("/servers/{server_id}/channels/{channel_id}/messages");

        let mut call = Call::get(&path)
            .not_found(Resource::Channel)
            .query("limit", query.limit);
        if let Some(before) = query.before {
            call = call.query("before", before);
        }
        if let Some(after) = query.after {
            call = call.query("after", after);
        }

        decode(self.exec.execute(call).await?)
    }

    /// Best-effort file upload as a multipart form, with an optional
    /// accompanying message.
    pub async fn send_file(
        &self,
        channel_id: u64,
        path: &Path,
        message: Option<&str>,
    ) -> Result<Message> {
        let server_id = self.server_id()?;
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("upload.bin")
            .to_string();

        let mut fields = Vec::new();
        if let Some(text) = message {
            fields.push(("message".to_string(), text.to_string()));
        }

        let api_path = format!("/servers/{server_id}/channels/{channel_id}/files");
        let file = FilePayload {
            filename,
            bytes,
            content_type: "application/octet-stream".to_string(),
            fields,
        };

        decode(
            self.exec
                .execute(
                    Call::post(&api_path)
                        .file(file)
                        .not_found(Resource::Channel),
                )
                .await?,
        )
    }

    // Member and user operations

    /// List the server's members and opportunistically fill the user cache.
    pub async fn get_members(&self) -> Result<Vec<Member>> {
        let server_id = self.server_id()?;
        let path = format!("/servers/{server_id}/members");
        let members: Vec<Member> = decode(self.exec.execute(Call::get(&path)).await?)?;

        let mut users = self.users.lock().await;
        for member in &members {
            users.insert(member.user.id.clone(), member.user.clone());
        }
        Ok(members)
    }

    /// Look a user up: cache first, then a fresh member listing.
    pub async fn get_user(&self, user_id: &str) -> Result<User> {
        if let Some(user) = self.users.lock().await.get(user_id) {
            return Ok(user.clone());
        }

        let members = self.get_members().await?;
        members
            .into_iter()
            .map(|m| m.user)
            .find(|u| u.id == user_id)
            .ok_or(Error::NotFound(Resource::User))
    }

    pub async fn get_online_members(&self) -> Result<Vec<Member>> {
        let members = self.get_members().await?;
        Ok(members
            .into_iter()
            .filter(|m| m.user.status == Presence::Online)
            .collect())
    }

    /// Whether a member's role grants a permission. Unknown users hold no
    /// permissions.
    pub async fn has_permission(&self, user_id: &str, permission: Permission) -> Result<bool> {
        let members = self.get_members().await?;
        Ok(members
            .iter()
            .find(|m| m.user.id == user_id)
            .map(|m| permission.allows(m.role))
            .unwrap_or(false))
    }

    pub async fn is_admin(&self, user_id: &str) -> Result<bool> {
        let members = self.get_members().await?;
        Ok(members
            .iter()
            .find(|m| m.user.id == user_id)
            .map(|m| matches!(m.role, Role::Owner | Role::Admin))
            .unwrap_or(false))
    }

    // Event handling

    /// Register a handler for an event kind, replacing any existing one.
    pub fn on<F, Fut>(&self, kind: EventKind, handler: F) -> HandlerHandle
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.registry.register(kind, handler)
    }

    /// Deregister a previously registered handler.
    pub fn off(&self, handle: HandlerHandle) {
        self.registry.deregister(handle);
    }

    /// Fired once per successful gateway connection.
    pub fn on_ready<F, Fut>(&self, handler: F) -> HandlerHandle
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on(EventKind::Ready, move |_| handler())
    }

    pub fn on_message<F, Fut>(&self, handler: F) -> HandlerHandle
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on(EventKind::Message, move |event| {
            let fut = match event {
                Event::Message(message) => Some(handler(message)),
                _ => None,
            };
            async move {
                if let Some(fut) = fut {
                    fut.await;
                }
            }
        })
    }

    pub fn on_member_join<F, Fut>(&self, handler: F) -> HandlerHandle
    where
        F: Fn(Member) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on(EventKind::MemberJoined, move |event| {
            let fut = match event {
                Event::MemberJoined(member) => Some(handler(member)),
                _ => None,
            };
            async move {
                if let Some(fut) = fut {
                    fut.await;
                }
            }
        })
    }

    pub fn on_channel_create<F, Fut>(&self, handler: F) -> HandlerHandle
    where
        F: Fn(Channel) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on(EventKind::ChannelCreated, move |event| {
            let fut = match event {
                Event::ChannelCreated(channel) => Some(handler(channel)),
                _ => None,
            };
            async move {
                if let Some(fut) = fut {
                    fut.await;
                }
            }
        })
    }

    /// Run the event session until [`Client::stop`] is called.
    ///
    /// A no-op when no handler is registered or no server id is known.
    /// Event-session failures never propagate; they are absorbed by the
    /// reconnect loop and observable only through logging.
    #[cfg(feature = "gateway")]
    pub async fn run(&self) -> Result<()> {
        use crate::gateway::{EventSession, WsConnector};

        if self.registry.is_empty() {
            tracing::debug!("no event handlers registered, nothing to run");
            return Ok(());
        }
        let Some(info) = &self.server_info else {
            tracing::warn!("no server info available, event session disabled");
            return Ok(());
        };

        let url = self.exec.transport().gateway_url(info.id);
        let session = EventSession::new(
            self.registry.clone(),
            Arc::new(WsConnector),
            url,
            self.cfg.auto_reconnect,
            self.stop.clone(),
        );
        session.run().await
    }

    /// Without the `gateway` feature the event session degrades to a
    /// silent no-op; the REST surface is unaffected.
    #[cfg(not(feature = "gateway"))]
    pub async fn run(&self) -> Result<()> {
        tracing::debug!("built without the gateway feature, event session is a no-op");
        Ok(())
    }

    /// Mark the event session inactive. The running loop observes the flag
    /// at its next decision point and terminates.
    pub fn stop(&self) {
        self.stop.cancel();
    }
}
