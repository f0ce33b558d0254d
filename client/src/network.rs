use crate::game::ClientWorld;
use crate::input::{InputSampler, InputSource};
use crate::session::{LeaveListener, Session, SessionError};
use log::{debug, error, info, warn};
use shared::{
    decode, encode, get_timestamp, presentation_events, Bus, BusEvent, ConnectionIntent, Fact,
    Packet, ReliableReceiver, Subscription, Tuning, MAX_PACKET_SIZE,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, MissedTickBehavior};

/// What happened during one run of the client loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub ticks: u32,
    pub inputs_sent: u32,
    pub snapshots: u32,
    pub facts: u32,
    pub reconciliations: u32,
    /// Set when the server ended the session.
    pub disconnect_reason: Option<String>,
}

pub struct Client {
    session: Session,
    world: ClientWorld,
    receiver: ReliableReceiver<Fact>,
    sampler: InputSampler,
    bus: Bus<BusEvent>,

    intents_tx: mpsc::UnboundedSender<ConnectionIntent>,
    intents_rx: Option<mpsc::UnboundedReceiver<ConnectionIntent>>,

    ping_ms: u64,
    fake_ping: Duration,
    stats: ClientStats,
}

impl Client {
    /// The server's tick rate overrides `tuning.tick_rate`, so prediction
    /// integrates with the same step the server simulates.
    pub fn new(session: Session, mut tuning: Tuning, fake_ping: Duration) -> Self {
        if tuning.tick_rate != session.tick_rate {
            debug!(
                "Using server tick rate {} instead of {}",
                session.tick_rate, tuning.tick_rate
            );
            tuning.tick_rate = session.tick_rate.max(1);
        }
        let mut world = ClientWorld::new(tuning);
        world.set_identity(session.client_id, session.entity);
        let (intents_tx, intents_rx) = mpsc::unbounded_channel();

        Client {
            session,
            world,
            receiver: ReliableReceiver::new(),
            sampler: InputSampler::new(),
            bus: Bus::new(),
            intents_tx,
            intents_rx: Some(intents_rx),
            ping_ms: 0,
            fake_ping,
            stats: ClientStats::default(),
        }
    }

    /// Facts received from the server plus the presentation events they imply.
    pub fn subscribe(&mut self) -> Subscription<BusEvent> {
        self.bus.subscribe()
    }

    /// Where menu actions (restart, leave) are delivered while running.
    pub fn intents(&self) -> mpsc::UnboundedSender<ConnectionIntent> {
        self.intents_tx.clone()
    }

    pub fn world(&self) -> &ClientWorld {
        &self.world
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn ping_ms(&self) -> u64 {
        self.ping_ms
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), SessionError> {
        if !self.fake_ping.is_zero() {
            sleep(self.fake_ping / 2).await;
        }

        let data = encode(packet)?;
        self.session
            .socket
            .send_to(&data, self.session.server_addr)
            .await?;
        Ok(())
    }

    fn publish_fact(&mut self, fact: Fact) {
        let presentation = presentation_events(&fact);
        self.bus.publish(BusEvent::Fact(fact));
        for event in presentation {
            self.bus.publish(event);
        }
    }

    /// Returns the disconnect reason if the server ended the session.
    async fn handle_packet(&mut self, packet: Packet) -> Option<String> {
        match packet {
            Packet::Snapshot {
                tick,
                timestamp,
                players,
                projectiles,
            } => {
                if timestamp > 0 {
                    self.ping_ms = get_timestamp().saturating_sub(timestamp);
                }
                self.stats.snapshots += 1;
                self.world.apply_snapshot(tick, &players, &projectiles);
            }

            Packet::Reliable { messages } => {
                let delivered = self.receiver.receive_batch(messages);
                for fact in delivered {
                    self.stats.facts += 1;
                    self.world.apply_fact(&fact);
                    self.publish_fact(fact);
                }
                // Always ack so a lost ack is repaired by the next resend.
                let ack = Packet::Ack {
                    reliable_seq: self.receiver.ack(),
                };
                if let Err(e) = self.send_packet(&ack).await {
                    error!("Error sending ack: {}", e);
                }
            }

            Packet::Disconnected { reason } => {
                warn!("Disconnected: {}", reason);
                return Some(reason);
            }

            // Duplicate handshake reply.
            Packet::Connected { .. } => {}

            _ => {
                warn!("Unexpected packet type");
            }
        }
        None
    }

    async fn send_input<S: InputSource>(&mut self, source: &mut S) -> Result<(), SessionError> {
        let tick = self.world.server_tick();
        let command = self.sampler.sample(source, tick);
        self.world.predict(&command);

        let packet = Packet::Input {
            entity: self.session.entity,
            command,
        };
        self.send_packet(&packet).await?;
        self.stats.inputs_sent += 1;
        Ok(())
    }

    async fn handle_intent(&mut self, intent: ConnectionIntent) -> bool {
        match intent {
            ConnectionIntent::RestartClicked => {
                info!("Requesting restart");
                if let Err(e) = self.send_packet(&Packet::Restart).await {
                    error!("Error sending restart: {}", e);
                }
                false
            }
            ConnectionIntent::LeaveClicked => true,
            ConnectionIntent::HostClicked | ConnectionIntent::JoinClicked => {
                debug!("Already in a session, ignoring {:?}", intent);
                false
            }
        }
    }

    /// Runs the fixed-rate client loop until the server disconnects us or
    /// `leave` fires. Does not leave the session; call [`Client::leave`].
    pub async fn run<S: InputSource>(
        &mut self,
        source: &mut S,
        mut leave: LeaveListener,
    ) -> Result<ClientStats, SessionError> {
        let tick_duration = Duration::from_secs_f64(1.0 / self.session.tick_rate.max(1) as f64);
        let dt = tick_duration.as_secs_f32();
        let mut tick_interval = interval(tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let Some(mut intents) = self.intents_rx.take() else {
            return Ok(self.stats.clone());
        };
        let mut buffer = vec![0u8; MAX_PACKET_SIZE];

        info!(
            "Joined '{}' as client {} (entity {})",
            self.session.session_name, self.session.client_id, self.session.entity
        );

        loop {
            tokio::select! {
                _ = leave.left() => break,

                Some(intent) = intents.recv() => {
                    if self.handle_intent(intent).await {
                        break;
                    }
                }

                result = self.session.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, from)) => {
                            if from != self.session.server_addr {
                                continue;
                            }
                            if !self.fake_ping.is_zero() {
                                sleep(self.fake_ping / 2).await;
                            }
                            match decode(&buffer[..len]) {
                                Ok(packet) => {
                                    if let Some(reason) = self.handle_packet(packet).await {
                                        self.bus.publish(BusEvent::StatusText(format!("Disconnected: {}", reason)));
                                        self.bus.publish(BusEvent::ShowMenu(true));
                                        self.stats.disconnect_reason = Some(reason);
                                        break;
                                    }
                                }
                                Err(e) => warn!("Failed to deserialize packet: {}", e),
                            }
                        }
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                }

                _ = tick_interval.tick() => {
                    if let Err(e) = self.send_input(source).await {
                        error!("Error sending input: {}", e);
                    }
                    self.world.advance_tick();
                    self.world.interpolate(dt);
                    self.stats.ticks += 1;

                    if self.stats.ticks % 300 == 0 {
                        debug!(
                            "Client tick {}: ping {}ms, {} unacked inputs, {} reconciliations",
                            self.stats.ticks,
                            self.ping_ms,
                            self.world.pending_inputs(),
                            self.world.reconciliation_count()
                        );
                    }
                }
            }
        }

        self.intents_rx = Some(intents);
        self.stats.reconciliations = self.world.reconciliation_count();
        Ok(self.stats.clone())
    }

    /// Leaves the session: disconnects and stops a locally hosted server.
    pub async fn leave(self) {
        self.session.leave().await;
    }
}
