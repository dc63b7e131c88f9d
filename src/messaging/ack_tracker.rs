use std::collections::{BTreeSet, HashMap};

// ============================================================================
// Per-partition Acknowledgement Tracking
// ============================================================================
//
// Handlers finish out of order, but a partition only has one commit
// position. The position may advance to the lowest offset still pending and
// never past it, so an unacknowledged message is redelivered after a restart
// or rebalance even when later messages were acknowledged.
//
// Partition state only means something while this member owns the
// partition. It is forgotten on revoke and assign, so a stale pending offset
// cannot pin the position once the partition resumes elsewhere in the log.
//
// ============================================================================

#[derive(Debug, Default)]
pub struct AckTracker {
    partitions: HashMap<(String, i32), PartitionAcks>,
}

#[derive(Debug, Default)]
struct PartitionAcks {
    pending: BTreeSet<i64>,
    highest_acked: Option<i64>,
    committed: Option<i64>,
}

impl PartitionAcks {
    /// Offset of the next message to consume after a restart
    fn position(&self) -> Option<i64> {
        match self.pending.first() {
            Some(&lowest) => Some(lowest),
            None => self.highest_acked.map(|offset| offset + 1),
        }
    }
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a delivered, not yet acknowledged offset
    pub fn track(&mut self, topic: &str, partition: i32, offset: i64) {
        self.partitions
            .entry((topic.to_string(), partition))
            .or_default()
            .pending
            .insert(offset);
    }

    /// Mark `offset` done. Returns the new commit position when it moved
    /// forward, `None` when an earlier offset is still outstanding.
    pub fn ack(&mut self, topic: &str, partition: i32, offset: i64) -> Option<i64> {
        let acks = self.partitions.get_mut(&(topic.to_string(), partition))?;

        if !acks.pending.remove(&offset) {
            return None;
        }
        acks.highest_acked = Some(acks.highest_acked.map_or(offset, |h| h.max(offset)));

        let position = acks.position()?;
        if acks.committed.is_some_and(|c| position <= c) {
            return None;
        }
        acks.committed = Some(position);
        Some(position)
    }

    /// Drop everything known about a partition
    pub fn forget(&mut self, topic: &str, partition: i32) {
        self.partitions.remove(&(topic.to_string(), partition));
    }

    pub fn pending(&self, topic: &str, partition: i32) -> usize {
        self.partitions
            .get(&(topic.to_string(), partition))
            .map_or(0, |acks| acks.pending.len())
    }
}
