//! Relay server.
//!
//! One hub task owns every room, the matchmaking queues and the outbound
//! handle of every connection. Connection tasks only frame lines: they
//! forward decoded client messages to the hub over an `mpsc` channel and
//! write whatever the hub queues for them. The hub also runs the countdown
//! ticker, so room state is never shared between tasks.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use royale_core::cards::CardId;
use royale_core::config::MatchFormat;
use royale_core::simulation::HostSync;

use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::protocol::{decode_line, encode_line, ClientMessage, RelayedDeploy, ServerMessage};

/// Relay-assigned connection id.
pub type ConnId = u64;

#[derive(Debug)]
enum HubEvent {
    Connected {
        conn: ConnId,
        outbound: mpsc::Sender<ServerMessage>,
    },
    Message {
        conn: ConnId,
        message: ClientMessage,
    },
    Disconnected {
        conn: ConnId,
    },
}

/// A bound relay, ready to [`run`](Self::run).
#[derive(Debug)]
pub struct RelayServer {
    listener: TcpListener,
    config: RelayConfig,
}

impl RelayServer {
    /// Bind the listener named by `config.bind`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Io`] if the address cannot be bound.
    pub async fn bind(config: RelayConfig) -> Result<Self> {
        let listener = TcpListener::bind(&config.bind).await?;
        Ok(Self { listener, config })
    }

    /// Address actually bound, useful with port 0.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Io`] if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Bind and run on a background task.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Io`] if the address cannot be bound.
    pub async fn spawn(config: RelayConfig) -> Result<(SocketAddr, JoinHandle<Result<()>>)> {
        let server = Self::bind(config).await?;
        let addr = server.local_addr()?;
        Ok((addr, tokio::spawn(server.run())))
    }

    /// Accept connections until the listener fails.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Io`] when accepting a connection fails.
    pub async fn run(self) -> Result<()> {
        let (hub_tx, hub_rx) = mpsc::channel(self.config.command_capacity);
        tokio::spawn(Hub::new(self.config.clone()).run(hub_rx));

        info!(addr = ?self.listener.local_addr().ok(), "relay listening");
        let mut next_conn: ConnId = 1;
        loop {
            let (stream, peer) = self.listener.accept().await?;
            let conn = next_conn;
            next_conn += 1;
            info!(conn, %peer, "client connected");

            let hub_tx = hub_tx.clone();
            let capacity = self.config.outbound_capacity;
            tokio::spawn(async move {
                if let Err(e) = serve_connection(stream, conn, hub_tx, capacity).await {
                    warn!(conn, error = %e, "connection ended with error");
                }
                info!(conn, "client disconnected");
            });
        }
    }
}

enum LoopControl {
    Continue,
    Disconnect,
}

async fn serve_connection(
    stream: TcpStream,
    conn: ConnId,
    hub: mpsc::Sender<HubEvent>,
    capacity: usize,
) -> Result<()> {
    let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
    hub.send(HubEvent::Connected {
        conn,
        outbound: outbound_tx,
    })
    .await
    .map_err(|_| RelayError::Closed)?;

    let result = run_connection_loop(stream, conn, &hub, outbound_rx).await;

    // Always tell the hub, whatever ended the loop.
    hub.send(HubEvent::Disconnected { conn })
        .await
        .map_err(|_| RelayError::Closed)?;
    result
}

async fn run_connection_loop(
    stream: TcpStream,
    conn: ConnId,
    hub: &mpsc::Sender<HubEvent>,
    mut outbound: mpsc::Receiver<ServerMessage>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        let control = tokio::select! {
            incoming = lines.next_line() => match incoming? {
                Some(line) => handle_incoming(&line, conn, hub).await?,
                None => LoopControl::Disconnect,
            },
            outgoing = outbound.recv() => match outgoing {
                Some(message) => {
                    writer.write_all(encode_line(&message)?.as_bytes()).await?;
                    LoopControl::Continue
                }
                None => LoopControl::Disconnect,
            },
        };
        if let LoopControl::Disconnect = control {
            return Ok(());
        }
    }
}

async fn handle_incoming(
    line: &str,
    conn: ConnId,
    hub: &mpsc::Sender<HubEvent>,
) -> Result<LoopControl> {
    if line.trim().is_empty() {
        return Ok(LoopControl::Continue);
    }
    let message = match decode_line::<ClientMessage>(line) {
        Ok(message) => message,
        Err(e) => {
            warn!(conn, error = %e, "malformed frame skipped");
            return Ok(LoopControl::Continue);
        }
    };
    hub.send(HubEvent::Message { conn, message })
        .await
        .map_err(|_| RelayError::Closed)?;
    Ok(LoopControl::Continue)
}

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Connection {
    outbound: mpsc::Sender<ServerMessage>,
    seat: Option<(u64, u8)>,
}

#[derive(Debug)]
struct Seat {
    identity: String,
    conn: Option<ConnId>,
    dropped_at: Option<Instant>,
}

impl Seat {
    fn connected(identity: String, conn: ConnId) -> Self {
        Self {
            identity,
            conn: Some(conn),
            dropped_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum RoomPhase {
    /// Private room with open seats.
    Filling,
    /// Every seat taken; waiting for the host to delegate.
    Ready,
    Battle {
        started: Instant,
    },
}

#[derive(Debug)]
struct Room {
    game_id: u64,
    format: MatchFormat,
    /// Filled in seat order.
    seats: Vec<Seat>,
    phase: RoomPhase,
    deploys: Vec<RelayedDeploy>,
    seen: HashSet<(u8, u64)>,
}

impl Room {
    fn new(game_id: u64, format: MatchFormat) -> Self {
        Self {
            game_id,
            format,
            seats: Vec::new(),
            phase: RoomPhase::Filling,
            deploys: Vec::new(),
            seen: HashSet::new(),
        }
    }

    fn is_full(&self) -> bool {
        self.seats.len() >= usize::from(self.format.player_count())
    }

    fn players(&self) -> Vec<String> {
        self.seats.iter().map(|seat| seat.identity.clone()).collect()
    }

    /// Identity of the first seat on the side opposing `role`.
    fn opponent_of(&self, role: u8) -> String {
        let other = 1 - self.format.side_of(role);
        let index = usize::from(self.format.first_player_of(other));
        self.seats
            .get(index)
            .map(|seat| seat.identity.clone())
            .unwrap_or_default()
    }

    fn connected(&self) -> impl Iterator<Item = (u8, ConnId)> + '_ {
        self.seats
            .iter()
            .enumerate()
            .filter_map(|(index, seat)| Some((role_of(index), seat.conn?)))
    }

    fn elapsed_ms(&self, now: Instant) -> u64 {
        match self.phase {
            RoomPhase::Battle { started } => millis(now.saturating_duration_since(started)),
            RoomPhase::Filling | RoomPhase::Ready => 0,
        }
    }

    /// First seat whose rejoin grace ran out.
    fn expired_seat(&self, now: Instant, grace: Duration) -> Option<u8> {
        self.seats.iter().enumerate().find_map(|(index, seat)| {
            let dropped = seat.dropped_at?;
            (now.saturating_duration_since(dropped) >= grace).then_some(role_of(index))
        })
    }
}

fn role_of(index: usize) -> u8 {
    u8::try_from(index).unwrap_or(u8::MAX)
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

struct Hub {
    config: RelayConfig,
    connections: HashMap<ConnId, Connection>,
    rooms: BTreeMap<u64, Room>,
    queues: HashMap<MatchFormat, VecDeque<(ConnId, String)>>,
    next_game_id: u64,
    outbox: Vec<(ConnId, ServerMessage)>,
}

impl Hub {
    fn new(config: RelayConfig) -> Self {
        Self {
            config,
            connections: HashMap::new(),
            rooms: BTreeMap::new(),
            queues: HashMap::new(),
            next_game_id: 1,
            outbox: Vec::new(),
        }
    }

    async fn run(mut self, mut events: mpsc::Receiver<HubEvent>) {
        let mut ticker = time::interval(Duration::from_millis(self.config.tick_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle(event, Instant::now()),
                    None => break,
                },
                _ = ticker.tick() => self.on_tick(Instant::now()),
            }
            self.flush();
        }
        debug!("hub stopped");
    }

    fn handle(&mut self, event: HubEvent, now: Instant) {
        match event {
            HubEvent::Connected { conn, outbound } => {
                self.connections.insert(
                    conn,
                    Connection {
                        outbound,
                        seat: None,
                    },
                );
            }
            HubEvent::Message { conn, message } => self.dispatch(conn, message, now),
            HubEvent::Disconnected { conn } => self.on_disconnect(conn, now),
        }
    }

    fn flush(&mut self) {
        for (conn, message) in self.outbox.drain(..) {
            let Some(connection) = self.connections.get(&conn) else {
                continue;
            };
            match connection.outbound.try_send(message) {
                Ok(()) | Err(TrySendError::Closed(_)) => {}
                Err(TrySendError::Full(message)) => {
                    warn!(conn, ?message, "outbound queue full, message dropped");
                }
            }
        }
    }

    fn dispatch(&mut self, conn: ConnId, message: ClientMessage, now: Instant) {
        match message {
            ClientMessage::JoinQueue { identity, format } => self.join_queue(conn, identity, format),
            ClientMessage::CreateRoom {
                identity,
                game_id,
                format,
            } => self.create_room(conn, identity, game_id, format),
            ClientMessage::JoinRoom { identity, game_id } => {
                self.join_room(conn, identity, game_id);
            }
            ClientMessage::Delegated => self.delegated(conn, now),
            ClientMessage::DeployTroop {
                seq,
                card_id,
                x,
                y,
            } => self.relay_deploy(conn, seq, card_id, (x, y), now),
            ClientMessage::SyncUnits(sync) => self.relay_sync(conn, sync),
            ClientMessage::Rejoin { identity, game_id } => self.rejoin(conn, &identity, game_id, now),
            ClientMessage::Leave => self.leave(conn),
        }
    }

    fn refuse(&mut self, conn: ConnId, message: impl Into<String>) {
        let message = message.into();
        warn!(conn, %message, "request refused");
        self.outbox.push((conn, ServerMessage::Error { message }));
    }

    fn seat_of(&self, conn: ConnId) -> Option<(u64, u8)> {
        self.connections.get(&conn).and_then(|c| c.seat)
    }

    fn is_busy(&self, conn: ConnId) -> bool {
        self.seat_of(conn).is_some()
            || self
                .queues
                .values()
                .any(|queue| queue.iter().any(|(queued, _)| *queued == conn))
    }

    fn take_seat(&mut self, conn: ConnId, game_id: u64, role: u8) {
        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.seat = Some((game_id, role));
        }
    }

    fn allocate_game_id(&mut self) -> u64 {
        loop {
            let id = self.next_game_id;
            self.next_game_id += 1;
            if !self.rooms.contains_key(&id) {
                return id;
            }
        }
    }

    fn join_queue(&mut self, conn: ConnId, identity: String, format: MatchFormat) {
        if self.is_busy(conn) {
            return self.refuse(conn, "already queued or seated");
        }
        let queue = self.queues.entry(format).or_default();
        queue.push_back((conn, identity));
        let needed = usize::from(format.player_count());
        if queue.len() < needed {
            debug!(conn, ?format, queued = queue.len(), "waiting for opponents");
            return;
        }
        let seated: Vec<_> = queue.drain(..needed).collect();

        let game_id = self.allocate_game_id();
        let mut room = Room::new(game_id, format);
        room.phase = RoomPhase::Ready;
        for (index, (conn, identity)) in seated.into_iter().enumerate() {
            room.seats.push(Seat::connected(identity, conn));
            self.take_seat(conn, game_id, role_of(index));
        }
        self.rooms.insert(game_id, room);
        info!(game_id, ?format, "match made");
        self.announce(game_id, true);
    }

    fn create_room(
        &mut self,
        conn: ConnId,
        identity: String,
        game_id: Option<u64>,
        format: MatchFormat,
    ) {
        if self.is_busy(conn) {
            return self.refuse(conn, "already queued or seated");
        }
        let game_id = match game_id {
            Some(id) if self.rooms.contains_key(&id) => {
                return self.refuse(conn, format!("room {id} already exists"));
            }
            Some(id) => id,
            None => self.allocate_game_id(),
        };
        let mut room = Room::new(game_id, format);
        room.seats.push(Seat::connected(identity, conn));
        self.rooms.insert(game_id, room);
        self.take_seat(conn, game_id, 0);
        info!(game_id, ?format, "room created");
    }

    fn join_room(&mut self, conn: ConnId, identity: String, game_id: u64) {
        if self.is_busy(conn) {
            return self.refuse(conn, "already queued or seated");
        }
        let Some(room) = self.rooms.get_mut(&game_id) else {
            return self.refuse(conn, format!("unknown room {game_id}"));
        };
        if !matches!(room.phase, RoomPhase::Filling) || room.is_full() {
            return self.refuse(conn, format!("room {game_id} is full"));
        }
        if room.seats.iter().any(|seat| seat.identity == identity) {
            return self.refuse(conn, "identity already seated");
        }
        let role = role_of(room.seats.len());
        room.seats.push(Seat::connected(identity, conn));
        let full = room.is_full();
        if full {
            room.phase = RoomPhase::Ready;
        }
        self.take_seat(conn, game_id, role);
        info!(game_id, role, "player joined room");
        if full {
            self.announce(game_id, false);
        }
    }

    /// Tell every seat of a newly full room who they are playing.
    fn announce(&mut self, game_id: u64, matchmade: bool) {
        let Some(room) = self.rooms.get(&game_id) else {
            return;
        };
        let players = room.players();
        for (role, conn) in room.connected() {
            let opponent_identity = room.opponent_of(role);
            let players = players.clone();
            let message = if matchmade {
                ServerMessage::MatchFound {
                    game_id,
                    role,
                    opponent_identity,
                    players,
                }
            } else {
                ServerMessage::GameStart {
                    game_id,
                    role,
                    opponent_identity,
                    players,
                }
            };
            self.outbox.push((conn, message));
        }
    }

    fn delegated(&mut self, conn: ConnId, now: Instant) {
        let Some((game_id, role)) = self.seat_of(conn) else {
            return self.refuse(conn, "not in a room");
        };
        if role != 0 {
            return self.refuse(conn, "only the host may start the battle");
        }
        let Some(room) = self.rooms.get_mut(&game_id) else {
            return self.refuse(conn, "not in a room");
        };
        if !matches!(room.phase, RoomPhase::Ready) {
            return self.refuse(conn, "battle cannot start now");
        }
        room.phase = RoomPhase::Battle { started: now };
        for (_, seat_conn) in room.connected() {
            self.outbox.push((seat_conn, ServerMessage::BattleStarted));
        }
        info!(game_id, "battle started");
    }

    fn relay_deploy(
        &mut self,
        conn: ConnId,
        seq: u64,
        card_id: CardId,
        (x, y): (i32, i32),
        now: Instant,
    ) {
        let Some((game_id, role)) = self.seat_of(conn) else {
            return self.refuse(conn, "not in a room");
        };
        let Some(room) = self.rooms.get_mut(&game_id) else {
            return self.refuse(conn, "not in a room");
        };
        if !matches!(room.phase, RoomPhase::Battle { .. }) {
            return self.refuse(conn, "battle is not running");
        }
        if !room.seen.insert((role, seq)) {
            warn!(game_id, role, seq, "duplicate deploy dropped");
            return;
        }
        let elapsed_ms = room.elapsed_ms(now);
        room.deploys.push(RelayedDeploy {
            owner: role,
            seq,
            card_id,
            x,
            y,
            elapsed_ms,
        });
        for (other, seat_conn) in room.connected() {
            if other != role {
                self.outbox.push((
                    seat_conn,
                    ServerMessage::OpponentDeployTroop {
                        owner: role,
                        seq,
                        card_id,
                        x,
                        y,
                    },
                ));
            }
        }
        debug!(game_id, role, seq, card_id, elapsed_ms, "deploy relayed");
    }

    fn relay_sync(&mut self, conn: ConnId, sync: HostSync) {
        let Some((game_id, role)) = self.seat_of(conn) else {
            return self.refuse(conn, "not in a room");
        };
        if role != 0 {
            return self.refuse(conn, "only the host may sync units");
        }
        let Some(room) = self.rooms.get(&game_id) else {
            return self.refuse(conn, "not in a room");
        };
        if !matches!(room.phase, RoomPhase::Battle { .. }) {
            return self.refuse(conn, "battle is not running");
        }
        trace!(game_id, tick = sync.tick, units = sync.units.len(), "host sync relayed");
        for (other, seat_conn) in room.connected() {
            if other != role {
                self.outbox
                    .push((seat_conn, ServerMessage::SyncUnits(sync.clone())));
            }
        }
    }

    fn rejoin(&mut self, conn: ConnId, identity: &str, game_id: u64, now: Instant) {
        if self.is_busy(conn) {
            return self.refuse(conn, "already queued or seated");
        }
        let Some(room) = self.rooms.get_mut(&game_id) else {
            return self.refuse(conn, format!("unknown room {game_id}"));
        };
        let Some(index) = room.seats.iter().position(|seat| seat.identity == identity) else {
            return self.refuse(conn, "not seated in this room");
        };
        let seat = &mut room.seats[index];
        if seat.conn.is_some() {
            return self.refuse(conn, "seat is still connected");
        }
        seat.conn = Some(conn);
        seat.dropped_at = None;

        let role = role_of(index);
        let message = ServerMessage::Rejoined {
            game_id,
            role,
            elapsed_ms: room.elapsed_ms(now),
            deploys: room.deploys.clone(),
        };
        self.outbox.push((conn, message));
        self.take_seat(conn, game_id, role);
        info!(game_id, role, "player rejoined");
    }

    fn leave(&mut self, conn: ConnId) {
        self.dequeue(conn);
        if let Some((game_id, role)) = self.seat_of(conn) {
            info!(game_id, role, "player left");
            self.close_room(game_id, Some(role));
        }
    }

    fn dequeue(&mut self, conn: ConnId) {
        for queue in self.queues.values_mut() {
            queue.retain(|(queued, _)| *queued != conn);
        }
    }

    fn on_disconnect(&mut self, conn: ConnId, now: Instant) {
        self.dequeue(conn);
        let Some(connection) = self.connections.remove(&conn) else {
            return;
        };
        let Some((game_id, role)) = connection.seat else {
            return;
        };
        let Some(room) = self.rooms.get_mut(&game_id) else {
            return;
        };
        if matches!(room.phase, RoomPhase::Battle { .. }) {
            if let Some(seat) = room.seats.get_mut(usize::from(role)) {
                seat.conn = None;
                seat.dropped_at = Some(now);
            }
            info!(game_id, role, "seat held for rejoin");
        } else {
            self.close_room(game_id, Some(role));
        }
    }

    /// Remove a room and unseat its connections. When a seat departed, the
    /// remaining ones are told which.
    fn close_room(&mut self, game_id: u64, departed: Option<u8>) {
        let Some(room) = self.rooms.remove(&game_id) else {
            return;
        };
        for (role, conn) in room.connected() {
            if let Some(connection) = self.connections.get_mut(&conn) {
                connection.seat = None;
            }
            if let Some(departed) = departed.filter(|departed| *departed != role) {
                self.outbox
                    .push((conn, ServerMessage::OpponentDisconnected { role: departed }));
            }
        }
        info!(game_id, ?departed, "room closed");
    }

    fn on_tick(&mut self, now: Instant) {
        let grace = Duration::from_millis(self.config.rejoin_grace_ms);
        let duration = self.config.match_duration_ms;
        let mut timed_out = Vec::new();
        let mut abandoned = Vec::new();

        for room in self.rooms.values() {
            if !matches!(room.phase, RoomPhase::Battle { .. }) {
                continue;
            }
            if let Some(role) = room.expired_seat(now, grace) {
                abandoned.push((room.game_id, role));
                continue;
            }
            let elapsed_ms = room.elapsed_ms(now);
            if elapsed_ms >= duration {
                timed_out.push(room.game_id);
                continue;
            }
            for (_, conn) in room.connected() {
                self.outbox.push((
                    conn,
                    ServerMessage::Tick {
                        elapsed_ms,
                        remaining_ms: duration - elapsed_ms,
                    },
                ));
            }
        }

        for (game_id, role) in abandoned {
            warn!(game_id, role, "rejoin grace expired");
            self.close_room(game_id, Some(role));
        }
        for game_id in timed_out {
            if let Some(room) = self.rooms.get(&game_id) {
                for (_, conn) in room.connected() {
                    self.outbox.push((conn, ServerMessage::GameTimeout));
                }
            }
            info!(game_id, "countdown finished");
            self.close_room(game_id, None);
        }
    }
}
