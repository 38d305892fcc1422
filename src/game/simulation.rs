//! World actor and authoritative tick loop

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::util::time::Timer;

use super::queue::InputQueue;
use super::registry::{ConnectionRegistry, OutputChannel};
use super::snapshot::{encode_snapshot, SnapshotStats};
use super::world::{ParticipantId, PlayerState, Snapshot, World};
use super::CommandBatch;

/// Ticks between snapshot stat log lines
const STATS_LOG_INTERVAL: u64 = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WorldError {
    #[error("world actor has stopped")]
    Closed,
}

/// World model, connection registry and input queue.
/// Only ever touched by the task that owns it, which makes every
/// method here one critical section.
#[derive(Debug, Default)]
pub struct Simulation {
    world: World,
    registry: ConnectionRegistry,
    queue: InputQueue,
    tick: u64,
    stats: SnapshotStats,
}

impl Simulation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a participant to the world and the registry together
    pub fn register(&mut self, participant: ParticipantId, channel: OutputChannel) -> PlayerState {
        self.registry.insert(participant, channel);
        self.world.spawn(participant)
    }

    /// Remove a participant from both the world and the registry.
    /// Unknown identities are a no-op; returns whether anything was removed.
    pub fn unregister(&mut self, participant: &ParticipantId) -> bool {
        let channel = self.registry.remove(participant);
        let player = self.world.remove(participant);
        channel.is_some() || player.is_some()
    }

    pub fn enqueue(&mut self, batch: CommandBatch) {
        self.queue.enqueue(batch);
    }

    /// Advance the world one tick: reset intent, apply queued input,
    /// move and clamp.
    pub fn step(&mut self) {
        self.tick += 1;
        self.world.clear_directions();

        let mut discarded = 0usize;
        for batch in self.queue.drain_all() {
            if !self.world.apply(&batch) {
                discarded += 1;
            }
        }
        if discarded > 0 {
            trace!(tick = self.tick, discarded, "Dropped input for departed participants");
        }

        self.world.advance();
    }

    /// Send the current snapshot to every registered channel. Participants
    /// whose channel has closed are unregistered; the rest still receive it.
    pub fn broadcast(&mut self) -> Vec<ParticipantId> {
        if self.registry.is_empty() {
            return Vec::new();
        }

        let frame = match encode_snapshot(&self.world.snapshot()) {
            Ok(frame) => frame,
            Err(e) => {
                error!(tick = self.tick, error = %e, "Failed to encode snapshot");
                return Vec::new();
            }
        };

        let report = self.registry.deliver_all(&frame);
        self.stats.record(self.world.len(), frame.len() * report.delivered);

        for participant in &report.skipped {
            warn!(participant_id = %participant, tick = self.tick, "Output channel full, skipping snapshot");
        }
        for participant in &report.disconnected {
            debug!(participant_id = %participant, "Output channel closed, unregistering");
            self.unregister(participant);
        }

        report.disconnected
    }

    /// One full tick: step then broadcast
    pub fn tick(&mut self) -> Snapshot {
        self.step();
        self.broadcast();

        if self.tick % STATS_LOG_INTERVAL == 0 {
            debug!(
                tick = self.tick,
                total_snapshots = self.stats.total_snapshots,
                total_bytes = self.stats.total_bytes,
                avg_players = self.stats.avg_players_per_snapshot,
                "Snapshot stats"
            );
        }

        self.world.snapshot()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.world.snapshot()
    }

    pub fn participant_count(&self) -> usize {
        self.registry.len()
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn pending_inputs(&self) -> usize {
        self.queue.len()
    }
}

/// Messages handled by the world actor, strictly one at a time
#[derive(Debug)]
enum WorldCommand {
    Register {
        participant: ParticipantId,
        channel: OutputChannel,
        reply: oneshot::Sender<PlayerState>,
    },
    Unregister {
        participant: ParticipantId,
    },
    Enqueue(CommandBatch),
    Step {
        reply: oneshot::Sender<Snapshot>,
    },
    Snapshot {
        reply: oneshot::Sender<Snapshot>,
    },
}

/// Handle to the running world actor
#[derive(Debug, Clone)]
pub struct WorldHandle {
    commands: mpsc::UnboundedSender<WorldCommand>,
    participants: Arc<AtomicUsize>,
    ticks: Arc<AtomicU64>,
}

impl WorldHandle {
    /// Spawn a participant and register its output channel
    pub async fn register(
        &self,
        participant: ParticipantId,
        channel: OutputChannel,
    ) -> Result<PlayerState, WorldError> {
        let (reply, rx) = oneshot::channel();
        self.send(WorldCommand::Register {
            participant,
            channel,
            reply,
        })?;
        rx.await.map_err(|_| WorldError::Closed)
    }

    /// Register and get a guard that unregisters when dropped
    pub async fn join(
        &self,
        participant: ParticipantId,
        channel: OutputChannel,
    ) -> Result<(PlayerState, Membership), WorldError> {
        let state = self.register(participant, channel).await?;
        let membership = Membership {
            participant,
            world: self.clone(),
        };
        Ok((state, membership))
    }

    /// Remove a participant. Idempotent; a stopped actor is ignored.
    pub fn unregister(&self, participant: ParticipantId) {
        let _ = self.send(WorldCommand::Unregister { participant });
    }

    pub fn enqueue(&self, batch: CommandBatch) -> Result<(), WorldError> {
        self.send(WorldCommand::Enqueue(batch))
    }

    /// Run one tick immediately, outside the timer
    pub async fn step(&self) -> Result<Snapshot, WorldError> {
        let (reply, rx) = oneshot::channel();
        self.send(WorldCommand::Step { reply })?;
        rx.await.map_err(|_| WorldError::Closed)
    }

    pub async fn snapshot(&self) -> Result<Snapshot, WorldError> {
        let (reply, rx) = oneshot::channel();
        self.send(WorldCommand::Snapshot { reply })?;
        rx.await.map_err(|_| WorldError::Closed)
    }

    pub fn participant_count(&self) -> usize {
        self.participants.load(Ordering::Relaxed)
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    fn send(&self, command: WorldCommand) -> Result<(), WorldError> {
        self.commands.send(command).map_err(|_| WorldError::Closed)
    }
}

/// Registration scoped to one connection; dropping it unregisters
#[derive(Debug)]
pub struct Membership {
    participant: ParticipantId,
    world: WorldHandle,
}

impl Drop for Membership {
    fn drop(&mut self) {
        self.world.unregister(self.participant);
    }
}

/// The authoritative world actor
pub struct GameWorld {
    sim: Simulation,
    commands: mpsc::UnboundedReceiver<WorldCommand>,
    tick_period: Duration,
    participants: Arc<AtomicUsize>,
    ticks: Arc<AtomicU64>,
}

impl GameWorld {
    pub fn new(tick_period: Duration) -> (Self, WorldHandle) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let participants = Arc::new(AtomicUsize::new(0));
        let ticks = Arc::new(AtomicU64::new(0));

        let handle = WorldHandle {
            commands: commands_tx,
            participants: participants.clone(),
            ticks: ticks.clone(),
        };

        let world = Self {
            sim: Simulation::new(),
            commands,
            tick_period,
            participants,
            ticks,
        };

        (world, handle)
    }

    /// Run the fixed-rate tick loop until every handle is dropped
    pub async fn run(mut self) {
        info!(tick_ms = self.tick_period.as_millis() as u64, "World loop started");

        let mut ticker = interval(self.tick_period);
        // Late wakeups are not made up for
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = ticker.tick() => {
                    let timer = Timer::new();
                    self.sim.tick();
                    self.publish_counters();

                    let elapsed = timer.elapsed_micros();
                    if elapsed > self.tick_period.as_micros() as u64 {
                        warn!(
                            tick = self.sim.current_tick(),
                            elapsed_micros = elapsed,
                            "Tick overran its period"
                        );
                    }
                }
                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.handle(command),
                        None => {
                            info!("All world handles dropped, stopping world loop");
                            break;
                        }
                    }
                }
            }
        }
    }

    fn handle(&mut self, command: WorldCommand) {
        match command {
            WorldCommand::Register {
                participant,
                channel,
                reply,
            } => {
                let state = self.sim.register(participant, channel);
                info!(
                    participant_id = %participant,
                    participants = self.sim.participant_count(),
                    "Participant registered"
                );
                let _ = reply.send(state);
            }
            WorldCommand::Unregister { participant } => {
                if self.sim.unregister(&participant) {
                    info!(
                        participant_id = %participant,
                        participants = self.sim.participant_count(),
                        "Participant unregistered"
                    );
                }
            }
            WorldCommand::Enqueue(batch) => self.sim.enqueue(batch),
            WorldCommand::Step { reply } => {
                let snapshot = self.sim.tick();
                let _ = reply.send(snapshot);
            }
            WorldCommand::Snapshot { reply } => {
                let _ = reply.send(self.sim.snapshot());
            }
        }
        self.publish_counters();
    }

    fn publish_counters(&self) {
        self.participants
            .store(self.sim.participant_count(), Ordering::Relaxed);
        self.ticks.store(self.sim.current_tick(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::registry::Frame;
    use crate::game::world::{Directions, Position};
    use std::collections::HashSet;
    use tokio_test::assert_ok;
    use uuid::Uuid;

    fn batch(participant: ParticipantId, tokens: &[&str]) -> CommandBatch {
        CommandBatch::new(participant, Directions::from_tokens(tokens))
    }

    fn join(sim: &mut Simulation) -> (ParticipantId, tokio::sync::mpsc::Receiver<Frame>) {
        let id = Uuid::new_v4();
        let (channel, rx) = OutputChannel::bounded(64);
        sim.register(id, channel);
        (id, rx)
    }

    fn assert_consistent(sim: &Simulation) {
        let world: HashSet<_> = sim.world().ids().copied().collect();
        let registry: HashSet<_> = sim.registry().ids().copied().collect();
        assert_eq!(world, registry);
    }

    #[test]
    fn moves_right_twice_over_two_ticks() {
        let mut sim = Simulation::new();
        let (id, _rx) = join(&mut sim);
        assert_eq!(sim.snapshot()[&id], Position::new(400, 300));

        sim.enqueue(batch(id, &["right", "right"]));
        sim.step();
        sim.enqueue(batch(id, &["right"]));
        sim.step();

        assert_eq!(sim.snapshot()[&id], Position::new(402, 300));
    }

    #[test]
    fn flags_reset_between_ticks() {
        let mut sim = Simulation::new();
        let (id, _rx) = join(&mut sim);

        sim.enqueue(batch(id, &["down"]));
        sim.step();
        assert_eq!(sim.snapshot()[&id], Position::new(400, 301));

        sim.step();
        assert_eq!(sim.snapshot()[&id], Position::new(400, 301));
        assert!(sim.world().get(&id).unwrap().active_directions.is_empty());
    }

    #[test]
    fn batches_within_a_tick_union_into_one_step() {
        let mut sim = Simulation::new();
        let (id, _rx) = join(&mut sim);

        sim.enqueue(batch(id, &["left"]));
        sim.enqueue(batch(id, &["up"]));
        sim.step();

        assert_eq!(sim.snapshot()[&id], Position::new(399, 299));
        assert_eq!(sim.pending_inputs(), 0);
    }

    #[test]
    fn clamped_at_left_edge() {
        let mut sim = Simulation::new();
        let (id, _rx) = join(&mut sim);
        sim.world.get_mut(&id).unwrap().position = Position::new(0, 300);

        sim.enqueue(batch(id, &["left"]));
        sim.step();

        assert_eq!(sim.snapshot()[&id], Position::new(0, 300));
    }

    #[test]
    fn input_for_departed_participant_is_discarded() {
        let mut sim = Simulation::new();
        let (a, _rx_a) = join(&mut sim);
        let (b, _rx_b) = join(&mut sim);

        sim.enqueue(batch(a, &["up"]));
        sim.enqueue(batch(b, &["up"]));
        sim.unregister(&a);
        sim.step();

        assert!(!sim.world().contains(&a));
        assert_eq!(sim.snapshot()[&b], Position::new(400, 299));
        assert_consistent(&sim);
    }

    #[test]
    fn unregister_is_idempotent() {
        let mut sim = Simulation::new();
        let (a, _rx_a) = join(&mut sim);
        let (b, _rx_b) = join(&mut sim);

        assert!(sim.unregister(&a));
        assert!(!sim.unregister(&a));
        assert!(!sim.unregister(&Uuid::new_v4()));

        assert_eq!(sim.participant_count(), 1);
        assert!(sim.world().contains(&b));
        assert_consistent(&sim);
    }

    #[test]
    fn broadcast_sends_same_frame_to_everyone() {
        let mut sim = Simulation::new();
        let (a, mut rx_a) = join(&mut sim);
        let (b, mut rx_b) = join(&mut sim);

        sim.tick();

        let frame_a = rx_a.try_recv().unwrap();
        let frame_b = rx_b.try_recv().unwrap();
        assert_eq!(frame_a, frame_b);

        let decoded: serde_json::Value = serde_json::from_str(&frame_a).unwrap();
        assert_eq!(decoded[a.to_string()]["x"], 400);
        assert_eq!(decoded[b.to_string()]["y"], 300);
    }

    #[test]
    fn broadcast_without_connections_encodes_nothing() {
        let mut sim = Simulation::new();
        let (_, rx) = join(&mut sim);
        drop(rx);

        assert_eq!(sim.broadcast().len(), 1);
        assert_eq!(sim.stats.total_snapshots, 1);

        assert!(sim.broadcast().is_empty());
        assert_eq!(sim.stats.total_snapshots, 1);
    }

    // A failed write does not abort the broadcast; only the failing
    // participant is removed.
    #[test]
    fn broadcast_failure_is_isolated_to_one_participant() {
        let mut sim = Simulation::new();
        let (a, rx_a) = join(&mut sim);
        let (b, mut rx_b) = join(&mut sim);
        drop(rx_a);

        let removed = sim.broadcast();

        assert_eq!(removed, vec![a]);
        assert!(rx_b.try_recv().is_ok());
        assert!(!sim.world().contains(&a));
        assert_consistent(&sim);

        sim.tick();
        let frame = rx_b.try_recv().unwrap();
        let decoded: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(decoded.as_object().unwrap().len(), 1);
        assert!(decoded.get(b.to_string()).is_some());
    }

    fn spawn_world() -> WorldHandle {
        // Long period so only explicit steps advance the world
        let (world, handle) = GameWorld::new(Duration::from_secs(3600));
        tokio::spawn(world.run());
        handle
    }

    #[tokio::test]
    async fn handle_round_trip() {
        let handle = spawn_world();
        let id = Uuid::new_v4();
        let (channel, mut rx) = OutputChannel::bounded(8);

        let state = assert_ok!(handle.register(id, channel).await);
        assert_eq!(state.position, Position::SPAWN);

        assert_ok!(handle.enqueue(batch(id, &["right", "down"])));
        let snapshot = assert_ok!(handle.step().await);
        assert_eq!(snapshot[&id], Position::new(401, 301));
        assert!(rx.recv().await.is_some());

        assert_eq!(handle.participant_count(), 1);
    }

    #[tokio::test]
    async fn dropping_membership_unregisters() {
        let handle = spawn_world();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let (channel_a, _rx_a) = OutputChannel::bounded(8);
        let (channel_b, _rx_b) = OutputChannel::bounded(8);

        let (_, membership_a) = assert_ok!(handle.join(a, channel_a).await);
        let (_, _membership_b) = assert_ok!(handle.join(b, channel_b).await);
        drop(membership_a);

        let snapshot = assert_ok!(handle.snapshot().await);
        assert!(!snapshot.contains_key(&a));
        assert!(snapshot.contains_key(&b));

        // A second unregister for the same identity is harmless
        handle.unregister(a);
        let snapshot = assert_ok!(handle.step().await);
        assert_eq!(snapshot.len(), 1);
    }

    #[tokio::test]
    async fn stopped_world_reports_closed() {
        let (world, handle) = GameWorld::new(Duration::from_millis(24));
        drop(world);

        assert_eq!(handle.enqueue(batch(Uuid::new_v4(), &["up"])), Err(WorldError::Closed));
        assert_eq!(handle.snapshot().await, Err(WorldError::Closed));
    }
}
