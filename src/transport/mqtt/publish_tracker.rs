//! Correlates QoS 1 publish requests with broker acknowledgments
//!
//! The client assigns packet ids inside its event loop, so a request only
//! learns its id when the outgoing publish is reported. Requests are matched
//! to outgoing ids in FIFO order and resolved when the PubAck arrives.

use std::collections::{HashMap, HashSet, VecDeque};

/// Tracks publish responders of type `R` until the broker acknowledges them
#[derive(Debug)]
pub struct PublishTracker<R> {
    awaiting_pkid: VecDeque<R>,
    in_flight: HashMap<u16, R>,
    /// Ids from a dropped connection that the client may retransmit
    orphaned: HashSet<u16>,
    /// Requests queued before an interruption that the client will still send
    stale_unsent: usize,
}

impl<R> Default for PublishTracker<R> {
    fn default() -> Self {
        Self {
            awaiting_pkid: VecDeque::new(),
            in_flight: HashMap::new(),
            orphaned: HashSet::new(),
            stale_unsent: 0,
        }
    }
}

impl<R> PublishTracker<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// A publish request was handed to the client
    pub fn enqueue(&mut self, responder: R) {
        self.awaiting_pkid.push_back(responder);
    }

    /// The client wrote a publish with `pkid`
    ///
    /// Returns true when the id was matched to a waiting request.
    pub fn on_sent(&mut self, pkid: u16) -> bool {
        if self.orphaned.contains(&pkid) {
            return false;
        }
        if self.stale_unsent > 0 {
            self.stale_unsent -= 1;
            self.orphaned.insert(pkid);
            return false;
        }
        match self.awaiting_pkid.pop_front() {
            Some(responder) => {
                self.in_flight.insert(pkid, responder);
                true
            }
            None => false,
        }
    }

    /// The broker acknowledged `pkid`
    pub fn on_acked(&mut self, pkid: u16) -> Option<R> {
        if self.orphaned.remove(&pkid) {
            return None;
        }
        self.in_flight.remove(&pkid)
    }

    /// The connection dropped: hand back every pending responder
    pub fn interrupt(&mut self) -> Vec<R> {
        self.stale_unsent += self.awaiting_pkid.len();
        let mut failed: Vec<R> = self.awaiting_pkid.drain(..).collect();
        for (pkid, responder) in self.in_flight.drain() {
            self.orphaned.insert(pkid);
            failed.push(responder);
        }
        failed
    }

    /// Forget everything, returning pending responders
    pub fn clear(&mut self) -> Vec<R> {
        self.orphaned.clear();
        self.stale_unsent = 0;
        let mut pending: Vec<R> = self.awaiting_pkid.drain(..).collect();
        pending.extend(self.in_flight.drain().map(|(_, r)| r));
        pending
    }

    pub fn pending(&self) -> usize {
        self.awaiting_pkid.len() + self.in_flight.len()
    }
}
