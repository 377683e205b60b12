use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::protocol::{Channel, FrameError, MAX_WIRE_PAYLOAD, Message, Packet, PacketKind};
use super::stats::NetworkStats;
use super::tracking::{Arrival, ReceiveTracker, RttEstimator, SendWindow};

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub max_payload: usize,
    pub initial_rto: Duration,
    pub min_rto: Duration,
    pub max_rto: Duration,
    pub max_retries: u32,
    pub window: usize,
    pub keepalive_interval: Duration,
    pub send_queue: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_payload: 4096,
            initial_rto: Duration::from_millis(250),
            min_rto: Duration::from_millis(50),
            max_rto: Duration::from_secs(4),
            max_retries: 8,
            window: 256,
            keepalive_interval: Duration::from_secs(5),
            send_queue: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkFailure {
    #[error("frame {sequence} unacknowledged after {attempts} transmissions")]
    RetriesExhausted { sequence: u32, attempts: u32 },
    #[error("socket error: {0}")]
    Io(std::io::ErrorKind),
    #[error("byte stream lost frame alignment")]
    Desynchronized,
    #[error("outbound queue overflowed")]
    QueueOverflow,
}

/// Sequencing, acknowledgement and retransmission for one connection.
///
/// The transport performs no I/O. Callers feed it complete frames with
/// [`receive`](Self::receive), drive its timers with [`poll`](Self::poll) and
/// write whatever [`drain_outgoing`](Self::drain_outgoing) returns.
#[derive(Debug)]
pub struct ReliableTransport {
    config: TransportConfig,
    next_sequence: u32,
    window: SendWindow,
    backlog: VecDeque<Message>,
    receiver: ReceiveTracker,
    rtt: RttEstimator,
    outgoing: VecDeque<Vec<u8>>,
    failure: Option<LinkFailure>,
    stats: NetworkStats,
    last_send: Instant,
}

impl ReliableTransport {
    pub fn new(config: TransportConfig) -> Self {
        let now = Instant::now();
        Self {
            next_sequence: 0,
            window: SendWindow::new(config.window),
            backlog: VecDeque::new(),
            receiver: ReceiveTracker::new(config.window),
            rtt: RttEstimator::new(config.initial_rto),
            outgoing: VecDeque::new(),
            failure: None,
            stats: NetworkStats::default(),
            last_send: now,
            config,
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Queues `payload` for reliable, ordered delivery. Never blocks: when the
    /// window is full the message waits in the backlog.
    pub fn send(&mut self, channel: Channel, payload: Vec<u8>, now: Instant) -> Result<(), FrameError> {
        let max = self.config.max_payload.min(MAX_WIRE_PAYLOAD);
        if payload.len() > max {
            return Err(FrameError::PayloadTooLarge {
                len: payload.len(),
                max,
            });
        }

        let message = Message { channel, payload };
        if self.window.is_full() {
            self.backlog.push_back(message);
        } else {
            self.transmit_new(message, now);
        }
        Ok(())
    }

    fn transmit_new(&mut self, message: Message, now: Instant) {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);

        let frame = Packet::new(sequence, message.channel.kind(), message.payload).encode_unchecked();
        self.outgoing.push_back(frame.clone());
        self.window.track(sequence, frame, now);
        self.last_send = now;
    }

    fn fill_window(&mut self, now: Instant) {
        while !self.window.is_full() {
            let Some(message) = self.backlog.pop_front() else {
                break;
            };
            self.transmit_new(message, now);
        }
    }

    pub fn receive(&mut self, frame: &[u8], now: Instant) -> Vec<Message> {
        self.stats.frames_received += 1;
        self.stats.bytes_received += frame.len() as u64;

        let packet = match Packet::decode(frame, self.config.max_payload) {
            Ok(packet) => packet,
            Err(err) => {
                self.stats.corrupt_frames += 1;
                let expected = self.receiver.expected();
                log::debug!("discarding corrupt frame ({err}), requesting {expected}");
                self.queue_control(Packet::nack(expected));
                return Vec::new();
            }
        };

        let Packet {
            sequence,
            kind,
            payload,
        } = packet;
        match kind {
            PacketKind::Ack => {
                self.on_ack(sequence, now);
                Vec::new()
            }
            PacketKind::Nack => {
                self.on_nack(sequence, now);
                Vec::new()
            }
            PacketKind::Data => self.on_sequenced(sequence, Message::new(Channel::Data, payload)),
            PacketKind::Chat => self.on_sequenced(sequence, Message::new(Channel::Chat, payload)),
            PacketKind::Control => {
                self.on_sequenced(sequence, Message::new(Channel::Control, payload))
            }
        }
    }

    fn on_sequenced(&mut self, sequence: u32, message: Message) -> Vec<Message> {
        match self.receiver.record(sequence, message) {
            Arrival::InOrder(delivered) => {
                self.queue_control(Packet::ack(sequence));
                delivered
            }
            Arrival::Duplicate => {
                self.stats.duplicates += 1;
                self.queue_control(Packet::ack(sequence));
                Vec::new()
            }
            Arrival::Buffered { missing } => {
                self.stats.out_of_order += 1;
                self.queue_control(Packet::ack(sequence));
                for gap in missing {
                    log::debug!("sequence gap: requesting {gap}");
                    self.queue_control(Packet::nack(gap));
                }
                Vec::new()
            }
            Arrival::TooFarAhead => {
                log::debug!(
                    "dropping frame {sequence}, expected {}",
                    self.receiver.expected()
                );
                Vec::new()
            }
        }
    }

    fn on_ack(&mut self, sequence: u32, now: Instant) {
        if let Some(acked) = self.window.acknowledge(sequence) {
            // Karn: retransmitted frames give ambiguous samples.
            if acked.retries == 0 {
                self.rtt.update(now.saturating_duration_since(acked.first_sent));
                self.stats.rtt_ms = self.rtt.srtt();
                self.stats.rtt_variance = self.rtt.rtt_var();
            }
        }
        self.fill_window(now);
    }

    fn on_nack(&mut self, sequence: u32, now: Instant) {
        let holdoff = self.rtt.smoothed();
        let max_retries = self.config.max_retries;
        let Some(pending) = self.window.get_mut(sequence) else {
            return;
        };

        if pending.retries > 0 && now.saturating_duration_since(pending.last_sent) < holdoff {
            return;
        }
        if pending.retries >= max_retries {
            self.failure.get_or_insert(LinkFailure::RetriesExhausted {
                sequence,
                attempts: pending.retries + 1,
            });
            return;
        }

        pending.retries += 1;
        pending.last_sent = now;
        self.outgoing.push_back(pending.frame.clone());
        self.stats.retransmissions += 1;
        log::debug!("retransmitting {sequence} on request");
    }

    fn queue_control(&mut self, packet: Packet) {
        self.outgoing.push_back(packet.encode_unchecked());
    }

    fn backoff(&self, retries: u32) -> Duration {
        let base = self.rtt.rto(self.config.min_rto, self.config.max_rto);
        base.saturating_mul(1 << retries.min(16))
            .min(self.config.max_rto)
    }

    /// Runs the retransmission timer. Fails once any frame has used up its
    /// retry budget; the failure is sticky.
    pub fn poll(&mut self, now: Instant) -> Result<(), LinkFailure> {
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }

        let max_retries = self.config.max_retries;
        let timeouts: Vec<Duration> = self.window.iter().map(|p| self.backoff(p.retries)).collect();

        for (pending, timeout) in self.window.iter_mut().zip(timeouts) {
            if now.saturating_duration_since(pending.last_sent) < timeout {
                continue;
            }
            if pending.retries >= max_retries {
                let failure = LinkFailure::RetriesExhausted {
                    sequence: pending.sequence,
                    attempts: pending.retries + 1,
                };
                self.failure = Some(failure.clone());
                return Err(failure);
            }

            pending.retries += 1;
            pending.last_sent = now;
            self.outgoing.push_back(pending.frame.clone());
            self.stats.retransmissions += 1;
            log::debug!(
                "retransmitting {} after {:?} (attempt {})",
                pending.sequence,
                timeout,
                pending.retries + 1
            );
        }

        Ok(())
    }

    pub fn next_timeout(&self, now: Instant) -> Option<Duration> {
        self.window
            .iter()
            .map(|p| (p.last_sent + self.backoff(p.retries)).saturating_duration_since(now))
            .min()
    }

    pub fn keepalive_due(&self, now: Instant) -> bool {
        self.is_idle()
            && now.saturating_duration_since(self.last_send) >= self.config.keepalive_interval
    }

    pub fn drain_outgoing(&mut self) -> Vec<Vec<u8>> {
        let frames: Vec<Vec<u8>> = self.outgoing.drain(..).collect();
        self.stats.frames_sent += frames.len() as u64;
        self.stats.bytes_sent += frames.iter().map(|f| f.len() as u64).sum::<u64>();
        frames
    }

    pub fn has_outgoing(&self) -> bool {
        !self.outgoing.is_empty()
    }

    pub fn is_idle(&self) -> bool {
        self.window.is_empty() && self.backlog.is_empty() && self.outgoing.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.window.len()
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    pub fn stats(&self) -> NetworkStats {
        self.stats.clone()
    }

    pub fn abandon(&mut self) {
        self.window.clear();
        self.backlog.clear();
        self.outgoing.clear();
        self.receiver.reset();
    }
}
