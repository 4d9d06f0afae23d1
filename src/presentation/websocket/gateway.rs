//! WebSocket Gateway
//!
//! Owns every live connection of this process. Client intents either act on
//! presence directly (typing, status, read receipts) or go through a queue
//! (messages, joins, leaves). Events from the fan-out bus are re-emitted to
//! the local sockets they concern.
//!
//! Room events produced here are delivered to local sockets immediately and
//! relayed over the bus tagged with this gateway's instance id; the relay is
//! ignored when it comes back.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::messages::{ClientEvent, Outbound, SendMessagePayload, ServerEvent};
use super::pending::PendingTracker;
use super::session::ConnectedSession;
use crate::application::queues::{MessageQueue, RoomQueue};
use crate::application::services::{validate_content, MessageService, TokenVerifier};
use crate::config::WebSocketSettings;
use crate::domain::events::{BusEvent, MessageDropped, RoomBroadcast, RoomEvent};
use crate::domain::{
    Identity, MembershipOutcome, MembershipRepository, OptimisticMessage, QueuedMessage,
    RoomJoinRequest, RoomLeaveRequest, Snowflake, StatusChange, UserStatus,
};
use crate::infrastructure::coordination::{FanoutBus, PresenceStore};
use crate::infrastructure::metrics;
use crate::shared::error::AppError;
use crate::shared::validation::validate;

/// Collaborators injected into the gateway.
pub struct GatewayDeps {
    pub verifier: Arc<TokenVerifier>,
    pub memberships: Arc<dyn MembershipRepository>,
    pub messages: Arc<MessageService>,
    pub presence: Arc<dyn PresenceStore>,
    pub bus: Arc<dyn FanoutBus>,
    pub message_queue: MessageQueue,
    pub room_queue: RoomQueue,
    pub settings: WebSocketSettings,
}

pub struct Gateway {
    instance_id: Uuid,
    /// Live sessions by connection id
    sessions: DashMap<String, Arc<ConnectedSession>>,
    /// Room id to subscribed connection ids
    room_sessions: DashMap<Snowflake, HashSet<String>>,
    pending: PendingTracker,
    verifier: Arc<TokenVerifier>,
    memberships: Arc<dyn MembershipRepository>,
    messages: Arc<MessageService>,
    presence: Arc<dyn PresenceStore>,
    bus: Arc<dyn FanoutBus>,
    message_queue: MessageQueue,
    room_queue: RoomQueue,
    settings: WebSocketSettings,
}

impl Gateway {
    pub fn new(deps: GatewayDeps) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            sessions: DashMap::new(),
            room_sessions: DashMap::new(),
            pending: PendingTracker::new(),
            verifier: deps.verifier,
            memberships: deps.memberships,
            messages: deps.messages,
            presence: deps.presence,
            bus: deps.bus,
            message_queue: deps.message_queue,
            room_queue: deps.room_queue,
            settings: deps.settings,
        }
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn settings(&self) -> &WebSocketSettings {
        &self.settings
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn authenticated_count(&self) -> usize {
        self.sessions.iter().filter(|s| s.is_authenticated()).count()
    }

    pub fn session(&self, connection_id: &str) -> Option<Arc<ConnectedSession>> {
        self.sessions.get(connection_id).map(|s| s.value().clone())
    }

    /// Connection ids currently subscribed to a room on this gateway.
    pub fn room_connections(&self, room_id: Snowflake) -> Vec<String> {
        self.room_sessions
            .get(&room_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Register a new, unauthenticated connection.
    pub fn connect(&self, sender: mpsc::UnboundedSender<Outbound>) -> Arc<ConnectedSession> {
        let session = Arc::new(ConnectedSession::new(sender));
        self.sessions
            .insert(session.connection_id.clone(), Arc::clone(&session));
        debug!(connection_id = %session.connection_id, "Connection opened");
        self.update_connection_gauge();
        session
    }

    /// Handle one text frame from a client.
    pub async fn handle_frame(&self, session: &Arc<ConnectedSession>, text: &str) {
        let event: ClientEvent = match serde_json::from_str(text) {
            Ok(event) => event,
            Err(e) => {
                debug!(connection_id = %session.connection_id, error = %e, "Unparsable frame");
                session.send(ServerEvent::error("Invalid message format"));
                return;
            }
        };

        if let Err(e) = self.dispatch(session, event).await {
            debug!(connection_id = %session.connection_id, error = %e, "Client request failed");
            session.send(ServerEvent::error(e.client_message()));
        }
    }

    async fn dispatch(&self, session: &Arc<ConnectedSession>, event: ClientEvent) -> Result<(), AppError> {
        let identity = match (&event, session.identity()) {
            (ClientEvent::Authenticate { token }, _) => {
                self.authenticate(session, token).await;
                return Ok(());
            }
            (_, identity) => identity.ok_or(AppError::Unauthenticated)?,
        };

        match event {
            ClientEvent::Authenticate { .. } => Ok(()),
            ClientEvent::JoinRoom { room_id } => self.join_room(session, &identity, room_id).await,
            ClientEvent::LeaveRoom { room_id } => self.leave_room(session, &identity, room_id).await,
            ClientEvent::SendMessage(payload) => self.send_message(session, &identity, payload).await,
            ClientEvent::TypingStart { room_id } => self.typing(session, &identity, room_id, true).await,
            ClientEvent::TypingStop { room_id } => self.typing(session, &identity, room_id, false).await,
            ClientEvent::MarkAsRead { message_id } => self.mark_as_read(&identity, message_id).await,
            ClientEvent::UpdateStatus { status } => self.update_status(&identity, &status).await,
        }
    }

    /// Verify the token, bind the identity and subscribe the connection to
    /// every room the user already belongs to.
    ///
    /// An expired token leaves the connection open for one more attempt; any
    /// other failure closes it. Re-authenticating an already bound connection
    /// first releases the previous identity with its rooms and presence.
    #[instrument(skip_all, fields(connection_id = %session.connection_id))]
    pub async fn authenticate(&self, session: &Arc<ConnectedSession>, token: &str) {
        let identity = match self.verifier.verify(token) {
            Ok(identity) => identity,
            Err(e) => {
                let failures = session.record_auth_failure();
                session.send(ServerEvent::AuthenticationError {
                    message: e.to_string(),
                });
                if e.is_retryable() && failures == 1 {
                    debug!("Stale token, awaiting retry");
                } else {
                    info!(failures, "Authentication failed, closing connection");
                    session.close();
                }
                return;
            }
        };

        if session.is_authenticated() {
            self.release_identity(session).await;
        }

        let user_id = identity.user_id;
        session.bind(identity.clone());

        if let Err(e) = self.presence.set_connected(user_id, &session.connection_id).await {
            warn!(user_id = %user_id, error = %e, "Failed to register presence");
        }

        match self.memberships.find_room_ids_by_user(user_id).await {
            Ok(room_ids) => {
                for room_id in room_ids {
                    self.subscribe(session, room_id);
                    if let Err(e) = self.presence.add_to_room(user_id, room_id).await {
                        warn!(user_id = %user_id, room_id = %room_id, error = %e, "Failed to record room presence");
                    }
                }
            }
            Err(e) => warn!(user_id = %user_id, error = %e, "Failed to load room memberships"),
        }

        session.send(ServerEvent::Authenticated {
            success: true,
            user_id,
            username: identity.username.clone(),
        });
        self.update_connection_gauge();
        info!(user_id = %user_id, rooms = session.rooms().len(), "User authenticated");

        self.bus
            .publish(BusEvent::UserStatusChanged(StatusChange::now(&identity, UserStatus::Online)))
            .await;
    }

    /// Confirm immediately when already subscribed, otherwise queue the join.
    #[instrument(skip(self, session, identity), fields(user_id = %identity.user_id))]
    pub async fn join_room(
        &self,
        session: &Arc<ConnectedSession>,
        identity: &Identity,
        room_id: Snowflake,
    ) -> Result<(), AppError> {
        if session.is_subscribed(room_id) {
            session.send(ServerEvent::RoomJoined { room_id });
            return Ok(());
        }

        let request = RoomJoinRequest::new(
            identity.user_id,
            room_id,
            &identity.username,
            &session.connection_id,
        );
        self.room_queue.enqueue_join(&request).await?;
        session.send(ServerEvent::RoomJoinQueued { room_id });
        Ok(())
    }

    /// Stop room traffic for this connection now; durable cleanup is queued.
    #[instrument(skip(self, session, identity), fields(user_id = %identity.user_id))]
    pub async fn leave_room(
        &self,
        session: &Arc<ConnectedSession>,
        identity: &Identity,
        room_id: Snowflake,
    ) -> Result<(), AppError> {
        self.unsubscribe(session, room_id);

        let request = RoomLeaveRequest::new(
            identity.user_id,
            room_id,
            &identity.username,
            &session.connection_id,
        );
        if let Err(e) = self.room_queue.enqueue_leave(&request).await {
            warn!(room_id = %room_id, error = %e, "Failed to queue membership cleanup");
        }

        session.send(ServerEvent::RoomLeft { room_id });
        self.broadcast_room(
            room_id,
            Some(identity.user_id),
            RoomEvent::UserLeftRoom {
                user_id: identity.user_id,
                username: identity.username.clone(),
                room_id,
            },
        )
        .await;
        Ok(())
    }

    /// Broadcast the optimistic copy, then queue the message for persistence.
    #[instrument(skip(self, session, identity, payload), fields(user_id = %identity.user_id, room_id = %payload.room_id))]
    pub async fn send_message(
        &self,
        session: &Arc<ConnectedSession>,
        identity: &Identity,
        payload: SendMessagePayload,
    ) -> Result<(), AppError> {
        validate(&payload)?;
        validate_content(&payload.content)?;

        let room_id = payload.room_id;
        self.ensure_member(session, identity.user_id, room_id).await?;

        let queued = QueuedMessage::new(identity.user_id, room_id, payload.content, payload.reply_to_id);
        let optimistic = OptimisticMessage::from_queued(&queued, &identity.username);

        self.pending.track(&queued.temp_id, room_id);
        self.broadcast_room(room_id, None, RoomEvent::NewMessage(optimistic)).await;

        if let Err(e) = self.message_queue.enqueue(&queued).await {
            warn!(temp_id = %queued.temp_id, error = %e, "Failed to enqueue message");
            self.bus
                .publish(BusEvent::MessageDropped(MessageDropped {
                    temp_id: queued.temp_id,
                    room_id,
                    user_id: identity.user_id,
                    reason: e.client_message(),
                }))
                .await;
        }
        Ok(())
    }

    /// Membership check: local subscription, then presence, then the durable
    /// store. A durable hit is promoted into presence and subscribed locally.
    async fn ensure_member(
        &self,
        session: &Arc<ConnectedSession>,
        user_id: Snowflake,
        room_id: Snowflake,
    ) -> Result<(), AppError> {
        if session.is_subscribed(room_id) {
            return Ok(());
        }

        let cached = match self.presence.is_in_room(user_id, room_id).await {
            Ok(cached) => cached,
            Err(e) => {
                warn!(error = %e, "Presence lookup failed, checking durable store");
                false
            }
        };

        if !cached {
            self.memberships
                .find(user_id, room_id)
                .await?
                .ok_or_else(|| AppError::AccessDenied("You are not a member of this room".into()))?;

            if let Err(e) = self.presence.add_to_room(user_id, room_id).await {
                warn!(error = %e, "Failed to cache room membership");
            }
        }

        self.subscribe(session, room_id);
        Ok(())
    }

    pub async fn typing(
        &self,
        session: &Arc<ConnectedSession>,
        identity: &Identity,
        room_id: Snowflake,
        is_typing: bool,
    ) -> Result<(), AppError> {
        if !session.is_subscribed(room_id) {
            return Err(AppError::AccessDenied("You are not in this room".into()));
        }

        self.broadcast_room(
            room_id,
            Some(identity.user_id),
            RoomEvent::UserTyping {
                user_id: identity.user_id,
                username: identity.username.clone(),
                room_id,
                is_typing,
            },
        )
        .await;
        Ok(())
    }

    pub async fn mark_as_read(&self, identity: &Identity, message_id: Snowflake) -> Result<(), AppError> {
        let (message, read_at) = self.messages.mark_as_read(message_id, identity.user_id).await?;

        self.broadcast_room(
            message.room_id,
            Some(identity.user_id),
            RoomEvent::MessageRead {
                message_id,
                user_id: identity.user_id,
                username: identity.username.clone(),
                read_at,
            },
        )
        .await;
        Ok(())
    }

    pub async fn update_status(&self, identity: &Identity, status: &str) -> Result<(), AppError> {
        let status = UserStatus::parse(status)
            .ok_or_else(|| AppError::Validation(format!("Invalid status: {}", status)))?;

        self.bus
            .publish(BusEvent::UserStatusChanged(StatusChange::now(identity, status)))
            .await;
        Ok(())
    }

    /// Tear down a connection. Safe to call more than once.
    #[instrument(skip_all, fields(connection_id = %session.connection_id))]
    pub async fn disconnect(&self, session: &Arc<ConnectedSession>) {
        if self.sessions.remove(&session.connection_id).is_none() {
            return;
        }

        match self.release_identity(session).await {
            Some(user_id) => info!(user_id = %user_id, "User disconnected"),
            None => debug!("Unauthenticated connection closed"),
        }
        self.update_connection_gauge();
    }

    /// Unsubscribe every room and unbind the identity, announcing the user
    /// offline.
    ///
    /// Presence is cleared only if it still points at this connection, so a
    /// newer connection of the same user keeps its entry.
    async fn release_identity(&self, session: &ConnectedSession) -> Option<Snowflake> {
        for room_id in session.take_rooms() {
            self.remove_room_session(room_id, &session.connection_id);
        }

        let identity = session.unbind()?;

        let cleared = match self
            .presence
            .clear_connected(identity.user_id, &session.connection_id)
            .await
        {
            Ok(cleared) => cleared,
            Err(e) => {
                warn!(user_id = %identity.user_id, error = %e, "Failed to clear presence");
                false
            }
        };

        if cleared {
            if let Err(e) = self.presence.clear_rooms(identity.user_id).await {
                warn!(user_id = %identity.user_id, error = %e, "Failed to clear room presence");
            }
            self.bus
                .publish(BusEvent::UserStatusChanged(StatusChange::now(&identity, UserStatus::Offline)))
                .await;
        }

        Some(identity.user_id)
    }

    /// Extend the presence expiry of an authenticated connection.
    pub async fn refresh_presence(&self, session: &ConnectedSession) {
        if let Some(user_id) = session.user_id() {
            if let Err(e) = self.presence.refresh(user_id).await {
                warn!(user_id = %user_id, error = %e, "Failed to refresh presence");
            }
        }
    }

    /// Re-emit a bus event to the local sockets it concerns.
    pub fn handle_bus_event(&self, event: BusEvent) {
        match event {
            BusEvent::UserStatusChanged(change) => {
                for session in self.sessions.iter().filter(|s| s.is_authenticated()) {
                    session.send(ServerEvent::UserStatusChanged(change.clone()));
                }
            }
            BusEvent::RoomEvent(broadcast) => {
                if broadcast.origin == self.instance_id {
                    return;
                }
                if let RoomEvent::NewMessage(message) = &broadcast.event {
                    self.pending.track(&message.temp_id, broadcast.room_id);
                }
                self.deliver_local(broadcast.room_id, broadcast.exclude_user, broadcast.event.into());
            }
            BusEvent::MessagePersisted(persisted) => {
                if self.pending.confirm(&persisted.temp_id) {
                    let room_id = persisted.message.room_id;
                    self.deliver_local(
                        room_id,
                        None,
                        ServerEvent::MessageConfirmed {
                            temp_id: persisted.temp_id,
                            message: persisted.message,
                        },
                    );
                }
            }
            BusEvent::MessageDropped(dropped) => {
                if self.pending.fail(&dropped.temp_id) {
                    self.deliver_local(
                        dropped.room_id,
                        None,
                        ServerEvent::MessageFailed {
                            temp_id: dropped.temp_id,
                            room_id: dropped.room_id,
                            reason: dropped.reason,
                        },
                    );
                }
            }
            BusEvent::RoomJoinProcessed(outcome) => self.on_join_processed(outcome),
            BusEvent::RoomLeaveProcessed(outcome) => self.on_leave_processed(outcome),
        }
    }

    /// Only the gateway still holding the originating connection answers the
    /// requester; every gateway announces a successful join to its occupants.
    fn on_join_processed(&self, outcome: MembershipOutcome) {
        let room_id = outcome.room_id;

        if outcome.is_success() {
            self.deliver_local(
                room_id,
                Some(outcome.user_id),
                ServerEvent::UserJoinedRoom {
                    user_id: outcome.user_id,
                    username: outcome.username.clone(),
                    room_id,
                },
            );
        }

        let Some(session) = self.session(&outcome.connection_id) else {
            return;
        };
        if session.user_id() != Some(outcome.user_id) {
            return;
        }

        if outcome.is_success() {
            self.subscribe(&session, room_id);
            session.send(ServerEvent::RoomJoined { room_id });
        } else {
            session.send(ServerEvent::error(failure_text("join", outcome.error)));
        }
    }

    /// The socket already left locally; only a failed cleanup is reported.
    fn on_leave_processed(&self, outcome: MembershipOutcome) {
        if outcome.is_success() {
            debug!(user_id = %outcome.user_id, room_id = %outcome.room_id, "Leave cleanup done");
            return;
        }

        let Some(session) = self.session(&outcome.connection_id) else {
            return;
        };
        if session.user_id() == Some(outcome.user_id) {
            session.send(ServerEvent::error(failure_text("leave", outcome.error)));
        }
    }

    /// Emit `message_failed` for optimistic messages past the pending timeout.
    pub fn expire_pending(&self) -> usize {
        let expired = self.pending.drain_expired(self.settings.pending_timeout());
        let count = expired.len();
        for (temp_id, room_id) in expired {
            warn!(temp_id = %temp_id, room_id = %room_id, "Message not confirmed in time");
            self.deliver_local(
                room_id,
                None,
                ServerEvent::MessageFailed {
                    temp_id,
                    room_id,
                    reason: "timeout".into(),
                },
            );
        }
        count
    }

    /// Consume the bus until shutdown.
    pub fn spawn_bus_listener(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let gateway = Arc::clone(self);
        let mut events = gateway.bus.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = events.recv() => match received {
                        Ok(event) => {
                            metrics::record_bus_event(event.topic(), "received");
                            gateway.handle_bus_event(event);
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Bus listener lagged, events were skipped");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = shutdown.changed() => break,
                }
            }
            debug!("Bus listener stopped");
        })
    }

    /// Periodically fail optimistic messages that were never confirmed.
    pub fn spawn_pending_watchdog(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let gateway = Arc::clone(self);
        let period = (gateway.settings.pending_timeout() / 2).max(Duration::from_millis(100));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        gateway.expire_pending();
                    }
                    _ = shutdown.changed() => break,
                }
            }
        })
    }

    /// Deliver locally now and relay to other gateways.
    async fn broadcast_room(&self, room_id: Snowflake, exclude_user: Option<Snowflake>, event: RoomEvent) {
        self.deliver_local(room_id, exclude_user, event.clone().into());
        self.bus
            .publish(BusEvent::RoomEvent(RoomBroadcast {
                origin: self.instance_id,
                room_id,
                exclude_user,
                event,
            }))
            .await;
    }

    fn deliver_local(&self, room_id: Snowflake, exclude_user: Option<Snowflake>, event: ServerEvent) {
        for connection_id in self.room_connections(room_id) {
            let Some(session) = self.session(&connection_id) else {
                continue;
            };
            if exclude_user.is_some() && session.user_id() == exclude_user {
                continue;
            }
            session.send(event.clone());
        }
    }

    fn subscribe(&self, session: &ConnectedSession, room_id: Snowflake) {
        session.subscribe(room_id);
        self.room_sessions
            .entry(room_id)
            .or_default()
            .insert(session.connection_id.clone());
    }

    fn unsubscribe(&self, session: &ConnectedSession, room_id: Snowflake) {
        session.unsubscribe(room_id);
        self.remove_room_session(room_id, &session.connection_id);
    }

    fn remove_room_session(&self, room_id: Snowflake, connection_id: &str) {
        if let Some(mut ids) = self.room_sessions.get_mut(&room_id) {
            ids.remove(connection_id);
        }
        self.room_sessions.remove_if(&room_id, |_, ids| ids.is_empty());
    }

    fn update_connection_gauge(&self) {
        metrics::set_websocket_connections(
            self.session_count() as i64,
            self.authenticated_count() as i64,
        );
    }
}

fn failure_text(action: &str, reason: Option<String>) -> String {
    match reason {
        Some(reason) => format!("Failed to {} room: {}", action, reason),
        None => format!("Failed to {} room", action),
    }
}
