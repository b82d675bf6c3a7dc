//! Block notification quorum tracking.
//!
//! Every masternode broadcasts what it believes the next block is. The
//! tracker counts distinct senders per `(block_num, block_hash, kind)` and
//! reports, exactly once, when one outcome reaches its threshold. The first
//! outcome to reach quorum for a block number wins; competing records for
//! that number are dropped.

use quorumchain_types::{BlockNotification, Hash, NodeId, NotificationKind, Roster};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, trace};

/// Identity of one reported outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordKey {
    /// Block number reported.
    pub block_num: u64,
    /// Block hash reported.
    pub block_hash: Hash,
    /// Reported outcome.
    pub kind: NotificationKind,
}

impl RecordKey {
    fn of(notification: &BlockNotification) -> Self {
        Self {
            block_num: notification.block_num,
            block_hash: notification.block_hash,
            kind: notification.kind,
        }
    }
}

/// Senders accumulated for one outcome.
#[derive(Debug, Clone)]
struct QuorumRecord {
    senders: BTreeSet<NodeId>,
    required_quorum: usize,
    /// First notification seen for this key
    notification: BlockNotification,
}

/// The outcome that reached quorum for a block number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecidedBlock {
    /// The agreed notification (as first received).
    pub notification: BlockNotification,
    /// Masternodes that reported it, ascending; they hold the block.
    pub senders: Vec<NodeId>,
}

/// Quorum tracker for block notifications.
#[derive(Debug)]
pub struct BlockNotificationTracker {
    members: HashSet<NodeId>,
    new_quorum: usize,
    failed_quorum: usize,
    records: HashMap<RecordKey, QuorumRecord>,
    decided: BTreeMap<u64, DecidedBlock>,
    /// Notifications below this block number are ignored.
    floor: u64,
}

impl BlockNotificationTracker {
    /// Create a tracker for the roster's masternodes.
    pub fn new(roster: &Roster) -> Self {
        Self {
            members: roster.masternodes().iter().copied().collect(),
            new_quorum: roster.new_block_quorum(),
            failed_quorum: roster.failed_block_quorum(),
            records: HashMap::new(),
            decided: BTreeMap::new(),
            floor: 0,
        }
    }

    /// Senders required for a notification of `kind`.
    pub fn required_quorum(&self, kind: NotificationKind) -> usize {
        match kind {
            NotificationKind::New => self.new_quorum,
            NotificationKind::Failed => self.failed_quorum,
        }
    }

    /// Record `sender`'s notification.
    ///
    /// Returns true exactly on the call that brings its outcome to quorum.
    /// Notifications from non-masternodes, below the floor, or for a block
    /// number that is already decided return false.
    pub fn add_notification(&mut self, notification: &BlockNotification, sender: NodeId) -> bool {
        let block_num = notification.block_num;
        if !self.members.contains(&sender) {
            debug!(sender = %sender, block_num, "Notification from non-masternode ignored");
            return false;
        }
        if block_num < self.floor {
            trace!(
                sender = %sender,
                block_num,
                floor = self.floor,
                "Notification below floor ignored"
            );
            return false;
        }
        if self.decided.contains_key(&block_num) {
            trace!(sender = %sender, block_num, "Block number already decided");
            return false;
        }

        let key = RecordKey::of(notification);
        let required_quorum = self.required_quorum(notification.kind);
        let record = self.records.entry(key).or_insert_with(|| QuorumRecord {
            senders: BTreeSet::new(),
            required_quorum,
            notification: notification.clone(),
        });
        if !record.senders.insert(sender) {
            trace!(sender = %sender, block_num, "Duplicate notification");
            return false;
        }

        trace!(
            sender = %sender,
            block_num,
            kind = %notification.kind,
            have = record.senders.len(),
            need = record.required_quorum,
            "Notification recorded"
        );
        if record.senders.len() < record.required_quorum {
            return false;
        }

        let decided = DecidedBlock {
            notification: record.notification.clone(),
            senders: record.senders.iter().copied().collect(),
        };
        self.records.retain(|k, _| k.block_num != block_num);
        debug!(
            block_num,
            block_hash = %decided.notification.block_hash,
            kind = %decided.notification.kind,
            senders = decided.senders.len(),
            "Notification quorum reached"
        );
        self.decided.insert(block_num, decided);
        true
    }

    /// Drop everything below `below` and ignore it from now on.
    pub fn reset(&mut self, below: u64) {
        self.floor = self.floor.max(below);
        let floor = self.floor;
        self.records.retain(|k, _| k.block_num >= floor);
        self.decided.retain(|num, _| *num >= floor);
    }

    /// Forget the decision and all records for `block_num`, so a later
    /// round at the same number can reach quorum.
    pub fn release(&mut self, block_num: u64) {
        self.decided.remove(&block_num);
        self.records.retain(|k, _| k.block_num != block_num);
    }

    /// The decided outcome for `block_num`, if any.
    pub fn decided(&self, block_num: u64) -> Option<&DecidedBlock> {
        self.decided.get(&block_num)
    }

    /// Senders counted so far for an undecided outcome.
    pub fn sender_count(&self, block_num: u64, block_hash: &Hash, kind: NotificationKind) -> usize {
        let key = RecordKey {
            block_num,
            block_hash: *block_hash,
            kind,
        };
        self.records.get(&key).map_or(0, |r| r.senders.len())
    }

    /// Highest block number with a decided outcome.
    pub fn highest_decided(&self) -> Option<u64> {
        self.decided.keys().next_back().copied()
    }

    /// Current floor.
    pub fn floor(&self) -> u64 {
        self.floor
    }

    /// Number of open (undecided) records.
    pub fn pending_records(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn id(i: u8) -> NodeId {
        NodeId::from_bytes([i; 32])
    }

    fn roster(n: u8) -> Roster {
        Roster::new((1..=n).map(id).collect(), vec![id(100)], 2).unwrap()
    }

    fn new_block(num: u64, seed: &[u8]) -> BlockNotification {
        BlockNotification::new_block(
            num,
            Hash::compute(seed),
            vec![],
            vec![vec![0]],
            vec![vec![Hash::compute(b"in")]],
        )
    }

    fn failed(num: u64) -> BlockNotification {
        BlockNotification::failed(
            num,
            &Hash::ZERO,
            vec![],
            vec![vec![0]],
            vec![vec![Hash::compute(b"in")]],
        )
    }

    #[test]
    fn test_four_masternodes_third_sender_reaches_quorum() {
        let mut tracker = BlockNotificationTracker::new(&roster(4));
        let notif = new_block(1, b"x");

        assert!(!tracker.add_notification(&notif, id(1)));
        assert!(!tracker.add_notification(&notif, id(2)));
        assert!(tracker.add_notification(&notif, id(3)));
        // edge-triggered: the fourth sender does not fire again
        assert!(!tracker.add_notification(&notif, id(4)));

        let decided = tracker.decided(1).unwrap();
        assert_eq!(decided.notification.block_hash, Hash::compute(b"x"));
        assert_eq!(decided.senders, vec![id(1), id(2), id(3)]);
    }

    #[test]
    fn test_duplicate_and_unknown_senders_do_not_count() {
        let mut tracker = BlockNotificationTracker::new(&roster(4));
        let notif = new_block(1, b"x");

        assert!(!tracker.add_notification(&notif, id(1)));
        assert!(!tracker.add_notification(&notif, id(1)));
        assert!(!tracker.add_notification(&notif, id(9)));
        assert!(!tracker.add_notification(&notif, id(100)));
        assert_eq!(tracker.sender_count(1, &Hash::compute(b"x"), NotificationKind::New), 1);
    }

    #[test]
    fn test_first_quorum_wins_and_drops_competitors() {
        let mut tracker = BlockNotificationTracker::new(&roster(4));
        let a = new_block(1, b"a");
        let b = new_block(1, b"b");

        tracker.add_notification(&b, id(4));
        tracker.add_notification(&a, id(1));
        tracker.add_notification(&a, id(2));
        assert!(tracker.add_notification(&a, id(3)));
        assert_eq!(tracker.pending_records(), 0);

        // competitor cannot reach quorum afterwards
        assert!(!tracker.add_notification(&b, id(1)));
        assert!(!tracker.add_notification(&b, id(2)));
        assert_eq!(tracker.decided(1).unwrap().notification.block_hash, Hash::compute(b"a"));
    }

    #[test]
    fn test_failed_threshold() {
        // n = 4: new = 3, failed = 2
        let mut tracker = BlockNotificationTracker::new(&roster(4));
        assert_eq!(tracker.required_quorum(NotificationKind::New), 3);
        assert_eq!(tracker.required_quorum(NotificationKind::Failed), 2);

        let notif = failed(1);
        assert!(!tracker.add_notification(&notif, id(1)));
        assert!(tracker.add_notification(&notif, id(2)));
    }

    #[test]
    fn test_new_and_failed_cannot_both_reach_quorum() {
        for n in 1..=10u8 {
            let r = roster(n);
            assert!(
                r.new_block_quorum() + r.failed_block_quorum() > r.cluster_size(),
                "n = {n}"
            );
        }
    }

    #[test]
    fn test_reset_raises_floor() {
        let mut tracker = BlockNotificationTracker::new(&roster(4));
        tracker.add_notification(&new_block(1, b"x"), id(1));
        tracker.add_notification(&new_block(2, b"y"), id(1));

        tracker.reset(2);
        assert_eq!(tracker.floor(), 2);
        assert_eq!(tracker.pending_records(), 1);
        assert!(!tracker.add_notification(&new_block(1, b"x"), id(2)));

        // floor never moves back
        tracker.reset(1);
        assert_eq!(tracker.floor(), 2);
    }

    #[test]
    fn test_release_allows_next_round_at_same_number() {
        let mut tracker = BlockNotificationTracker::new(&roster(4));
        let notif = failed(5);
        tracker.add_notification(&notif, id(1));
        assert!(tracker.add_notification(&notif, id(2)));
        assert!(!tracker.add_notification(&notif, id(3)));

        tracker.release(5);
        assert!(tracker.decided(5).is_none());
        assert!(!tracker.add_notification(&notif, id(3)));
        assert!(tracker.add_notification(&notif, id(4)));
    }

    #[test]
    fn test_single_masternode_decides_alone() {
        let mut tracker = BlockNotificationTracker::new(&roster(1));
        assert!(tracker.add_notification(&new_block(1, b"solo"), id(1)));
    }

    proptest! {
        #[test]
        fn test_quorum_fires_once_in_any_order(
            order in Just((1..=7u8).collect::<Vec<_>>()).prop_shuffle()
        ) {
            let mut tracker = BlockNotificationTracker::new(&roster(7));
            let notif = new_block(1, b"x");
            let fired: Vec<usize> = order
                .iter()
                .enumerate()
                .filter(|(_, i)| tracker.add_notification(&notif, id(**i)))
                .map(|(pos, _)| pos)
                .collect();
            prop_assert_eq!(fired, vec![3]);
            prop_assert_eq!(tracker.decided(1).unwrap().senders.len(), 4);
        }
    }
}
