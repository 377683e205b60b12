use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use super::protocol::{Message, sequence_greater_than};

#[derive(Debug, Clone)]
pub struct InFlight {
    pub sequence: u32,
    pub frame: Vec<u8>,
    pub first_sent: Instant,
    pub last_sent: Instant,
    pub retries: u32,
}

#[derive(Debug)]
pub struct SendWindow {
    in_flight: VecDeque<InFlight>,
    capacity: usize,
}

impl SendWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            in_flight: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn is_full(&self) -> bool {
        self.in_flight.len() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn track(&mut self, sequence: u32, frame: Vec<u8>, now: Instant) {
        self.in_flight.push_back(InFlight {
            sequence,
            frame,
            first_sent: now,
            last_sent: now,
            retries: 0,
        });
    }

    pub fn acknowledge(&mut self, sequence: u32) -> Option<InFlight> {
        let index = self
            .in_flight
            .iter()
            .position(|pending| pending.sequence == sequence)?;
        self.in_flight.remove(index)
    }

    pub fn get_mut(&mut self, sequence: u32) -> Option<&mut InFlight> {
        self.in_flight
            .iter_mut()
            .find(|pending| pending.sequence == sequence)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut InFlight> {
        self.in_flight.iter_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InFlight> {
        self.in_flight.iter()
    }

    pub fn clear(&mut self) {
        self.in_flight.clear();
    }
}

/// Smoothed round-trip estimate (RFC 6298 gains).
#[derive(Debug, Clone)]
pub struct RttEstimator {
    srtt: f32,
    rtt_var: f32,
    sampled: bool,
}

impl RttEstimator {
    pub fn new(initial: Duration) -> Self {
        Self {
            srtt: initial.as_secs_f32() * 1000.0,
            rtt_var: 0.0,
            sampled: false,
        }
    }

    pub fn update(&mut self, rtt: Duration) {
        const ALPHA: f32 = 0.125;
        const BETA: f32 = 0.25;

        let rtt = rtt.as_secs_f32() * 1000.0;
        if !self.sampled {
            self.srtt = rtt;
            self.rtt_var = rtt / 2.0;
            self.sampled = true;
            return;
        }

        let diff = (rtt - self.srtt).abs();
        self.rtt_var = (1.0 - BETA) * self.rtt_var + BETA * diff;
        self.srtt = (1.0 - ALPHA) * self.srtt + ALPHA * rtt;
    }

    pub fn srtt(&self) -> f32 {
        self.srtt
    }

    pub fn rtt_var(&self) -> f32 {
        self.rtt_var
    }

    pub fn smoothed(&self) -> Duration {
        Duration::from_secs_f32(self.srtt.max(0.0) / 1000.0)
    }

    pub fn rto(&self, min: Duration, max: Duration) -> Duration {
        let ms = self.srtt + 4.0 * self.rtt_var;
        Duration::from_secs_f32(ms.max(0.0) / 1000.0).clamp(min, max)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Arrival {
    InOrder(Vec<Message>),
    Duplicate,
    Buffered { missing: Vec<u32> },
    TooFarAhead,
}

#[derive(Debug)]
pub struct ReceiveTracker {
    expected: u32,
    buffered: HashMap<u32, Message>,
    highest_buffered: Option<u32>,
    capacity: u32,
}

impl ReceiveTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            expected: 0,
            buffered: HashMap::new(),
            highest_buffered: None,
            capacity: capacity.clamp(1, u32::MAX as usize / 4) as u32,
        }
    }

    pub fn expected(&self) -> u32 {
        self.expected
    }

    pub fn buffered_count(&self) -> usize {
        self.buffered.len()
    }

    pub fn record(&mut self, sequence: u32, message: Message) -> Arrival {
        if sequence == self.expected {
            let mut delivered = vec![message];
            self.expected = self.expected.wrapping_add(1);
            while let Some(next) = self.buffered.remove(&self.expected) {
                delivered.push(next);
                self.expected = self.expected.wrapping_add(1);
            }
            if self.buffered.is_empty() {
                self.highest_buffered = None;
            }
            return Arrival::InOrder(delivered);
        }

        if sequence_greater_than(self.expected, sequence) {
            return Arrival::Duplicate;
        }

        if sequence.wrapping_sub(self.expected) >= self.capacity {
            return Arrival::TooFarAhead;
        }

        if self.buffered.contains_key(&sequence) {
            return Arrival::Duplicate;
        }
        self.buffered.insert(sequence, message);

        let gap_start = match self.highest_buffered {
            Some(highest) if sequence_greater_than(sequence, highest) => highest.wrapping_add(1),
            Some(_) => return Arrival::Buffered { missing: Vec::new() },
            None => self.expected,
        };
        self.highest_buffered = Some(sequence);

        let mut missing = Vec::new();
        let mut cursor = gap_start;
        while cursor != sequence {
            if !self.buffered.contains_key(&cursor) {
                missing.push(cursor);
            }
            cursor = cursor.wrapping_add(1);
        }
        Arrival::Buffered { missing }
    }

    pub fn reset(&mut self) {
        self.expected = 0;
        self.buffered.clear();
        self.highest_buffered = None;
    }
}
