use serde::{Deserialize, Serialize};

use crate::{DeviceId, ResultTime, Slot, MAX_SLOTS};

/// One player position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSlot {
    /// Claimed during joining.
    pub joined: bool,
    /// The controller that claimed it.
    pub controller: Option<DeviceId>,
    /// Reported (or penalized) this round.
    pub finished: bool,
    /// This round's result, once known.
    pub result: Option<ResultTime>,
    /// Rounds won.
    pub score: u8,
    /// Latest shake count reported this round.
    pub shake_progress: u8,
}

impl PeerSlot {
    /// Joined and bound to a controller.
    #[must_use]
    pub const fn is_bound(&self) -> bool {
        self.joined && self.controller.is_some()
    }
}

/// Why a join claim was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimRejected {
    /// The controller already owns a slot.
    AlreadySeated(Slot),
    /// Someone else owns the slot.
    SlotTaken(DeviceId),
    /// Not a controller id.
    NotAController,
}

/// The four slots plus the tie-break pair, if one is running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    slots: [PeerSlot; MAX_SLOTS],
    tie_break: Option<(Slot, Slot)>,
}

impl Roster {
    /// Four empty slots.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Empties every slot and ends any tie-break.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Clears per-round fields, keeping bindings and scores.
    pub fn reset_round(&mut self) {
        for slot in &mut self.slots {
            slot.finished = false;
            slot.result = None;
            slot.shake_progress = 0;
        }
    }

    /// The slot at `slot`.
    #[must_use]
    pub fn get(&self, slot: Slot) -> &PeerSlot {
        &self.slots[slot.index()]
    }

    /// Every slot in order.
    #[must_use]
    pub fn slots(&self) -> &[PeerSlot; MAX_SLOTS] {
        &self.slots
    }

    /// The slot owned by `controller`.
    #[must_use]
    pub fn slot_of(&self, controller: DeviceId) -> Option<Slot> {
        Slot::ALL
            .into_iter()
            .find(|slot| self.get(*slot).controller == Some(controller))
    }

    /// Binds `controller` to `slot`.
    ///
    /// # Errors
    ///
    /// A controller holds at most one slot and a slot at most one controller.
    pub fn claim(&mut self, slot: Slot, controller: DeviceId) -> Result<(), ClaimRejected> {
        if !controller.is_controller() {
            return Err(ClaimRejected::NotAController);
        }
        if let Some(owned) = self.slot_of(controller) {
            return Err(ClaimRejected::AlreadySeated(owned));
        }
        let entry = &mut self.slots[slot.index()];
        if let Some(owner) = entry.controller {
            return Err(ClaimRejected::SlotTaken(owner));
        }
        entry.joined = true;
        entry.controller = Some(controller);
        Ok(())
    }

    /// Number of bound slots.
    #[must_use]
    pub fn joined_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_bound()).count()
    }

    /// First unbound slot after `after` (or from slot 1 when `None`).
    #[must_use]
    pub fn next_unbound(&self, after: Option<Slot>) -> Option<Slot> {
        let start = after.map_or(0, |slot| slot.index() + 1);
        Slot::ALL
            .into_iter()
            .skip(start)
            .find(|slot| !self.get(*slot).is_bound())
    }

    /// Takes part in the current round: bound, and in the tie-break pair if
    /// one is running.
    #[must_use]
    pub fn is_active(&self, slot: Slot) -> bool {
        if !self.get(slot).is_bound() {
            return false;
        }
        match self.tie_break {
            Some((a, b)) => slot == a || slot == b,
            None => true,
        }
    }

    /// Active slots in order.
    pub fn active_slots(&self) -> impl Iterator<Item = Slot> + '_ {
        Slot::ALL.into_iter().filter(|slot| self.is_active(*slot))
    }

    /// Active slots with their controllers.
    pub fn active_controllers(&self) -> impl Iterator<Item = (Slot, DeviceId)> + '_ {
        self.active_slots()
            .filter_map(|slot| self.get(slot).controller.map(|id| (slot, id)))
    }

    /// Every active slot has a result.
    #[must_use]
    pub fn all_active_finished(&self) -> bool {
        self.active_slots().all(|slot| self.get(slot).finished)
    }

    /// Stores a result. Returns `false` (and changes nothing) if the slot
    /// already finished this round.
    pub fn record(&mut self, slot: Slot, result: ResultTime) -> bool {
        let entry = &mut self.slots[slot.index()];
        if entry.finished {
            return false;
        }
        entry.finished = true;
        entry.result = Some(result);
        true
    }

    /// Stores the latest shake count.
    pub fn set_progress(&mut self, slot: Slot, count: u8) {
        self.slots[slot.index()].shake_progress = count;
    }

    /// Penalizes every active slot without a result and returns them.
    pub fn penalize_unfinished(&mut self) -> Vec<Slot> {
        let unfinished: Vec<Slot> = self
            .active_slots()
            .filter(|slot| !self.get(*slot).finished)
            .collect();
        for slot in &unfinished {
            self.record(*slot, ResultTime::Penalty);
        }
        unfinished
    }

    /// Lowest numeric time among active finished slots; lowest slot on ties.
    /// `None` when every result is a penalty.
    #[must_use]
    pub fn round_winner(&self) -> Option<Slot> {
        self.active_slots()
            .filter_map(|slot| match self.get(slot).result {
                Some(ResultTime::Millis(ms)) => Some((ms, slot)),
                _ => None,
            })
            .min()
            .map(|(_, slot)| slot)
    }

    /// Adds a point.
    pub fn award(&mut self, slot: Slot) {
        let entry = &mut self.slots[slot.index()];
        entry.score = entry.score.saturating_add(1);
    }

    /// Highest score above zero among joined slots; lowest slot on ties.
    #[must_use]
    pub fn final_winner(&self) -> Option<Slot> {
        let mut best: Option<(u8, Slot)> = None;
        for slot in Slot::ALL {
            let entry = self.get(slot);
            if entry.joined && entry.score > best.map_or(0, |(score, _)| score) {
                best = Some((entry.score, slot));
            }
        }
        best.map(|(_, slot)| slot)
    }

    /// The pair sharing the top score, when exactly two joined slots do.
    #[must_use]
    pub fn tied_for_top(&self) -> Option<(Slot, Slot)> {
        let top = self
            .slots
            .iter()
            .filter(|slot| slot.joined)
            .map(|slot| slot.score)
            .max()?;
        let tied: Vec<Slot> = Slot::ALL
            .into_iter()
            .filter(|slot| self.get(*slot).joined && self.get(*slot).score == top)
            .collect();
        match tied.as_slice() {
            [a, b] => Some((*a, *b)),
            _ => None,
        }
    }

    /// Restricts rounds to `pair`.
    pub fn start_tie_break(&mut self, pair: (Slot, Slot)) {
        self.tie_break = Some(pair);
    }

    /// The running tie-break pair.
    #[must_use]
    pub const fn tie_break(&self) -> Option<(Slot, Slot)> {
        self.tie_break
    }

    /// Score difference of the tie-break pair.
    #[must_use]
    pub fn tie_break_lead(&self) -> Option<u8> {
        self.tie_break
            .map(|(a, b)| self.get(a).score.abs_diff(self.get(b).score))
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn slot(n: u8) -> Slot {
        Slot::from_number(n).unwrap()
    }

    fn seated(pairs: &[(u8, DeviceId)]) -> Roster {
        let mut roster = Roster::new();
        for (n, id) in pairs {
            roster.claim(slot(*n), *id).unwrap();
        }
        roster
    }

    #[test]
    fn controller_holds_at_most_one_slot() {
        let mut roster = seated(&[(1, DeviceId::STICK2)]);
        assert_eq!(
            roster.claim(slot(2), DeviceId::STICK2),
            Err(ClaimRejected::AlreadySeated(slot(1)))
        );
        assert_eq!(
            roster.claim(slot(1), DeviceId::STICK3),
            Err(ClaimRejected::SlotTaken(DeviceId::STICK2))
        );
        assert_eq!(
            roster.claim(slot(3), DeviceId::DISPLAY),
            Err(ClaimRejected::NotAController)
        );
        assert_eq!(roster.joined_count(), 1);
    }

    #[test]
    fn next_unbound_skips_claimed_slots() {
        let roster = seated(&[(2, DeviceId::STICK1), (3, DeviceId::STICK4)]);
        assert_eq!(roster.next_unbound(None), Some(slot(1)));
        assert_eq!(roster.next_unbound(Some(slot(1))), Some(slot(4)));
        assert_eq!(roster.next_unbound(Some(slot(4))), None);
    }

    #[test]
    fn duplicate_result_is_refused() {
        let mut roster = seated(&[(1, DeviceId::STICK1)]);
        assert!(roster.record(slot(1), ResultTime::Millis(200)));
        assert!(!roster.record(slot(1), ResultTime::Millis(100)));
        assert_eq!(roster.get(slot(1)).result, Some(ResultTime::Millis(200)));
    }

    #[test]
    fn round_winner_is_lowest_numeric_time() {
        let mut roster = seated(&[
            (1, DeviceId::STICK1),
            (2, DeviceId::STICK2),
            (3, DeviceId::STICK3),
        ]);
        roster.record(slot(1), ResultTime::Millis(120));
        roster.record(slot(2), ResultTime::Penalty);
        roster.record(slot(3), ResultTime::Millis(95));
        assert_eq!(roster.round_winner(), Some(slot(3)));
    }

    #[test]
    fn all_penalties_means_no_winner() {
        let mut roster = seated(&[(1, DeviceId::STICK1), (2, DeviceId::STICK2)]);
        assert_eq!(roster.penalize_unfinished(), vec![slot(1), slot(2)]);
        assert_eq!(roster.round_winner(), None);
    }

    #[test]
    fn equal_times_go_to_lowest_slot() {
        let mut roster = seated(&[(2, DeviceId::STICK1), (4, DeviceId::STICK2)]);
        roster.record(slot(4), ResultTime::Millis(150));
        roster.record(slot(2), ResultTime::Millis(150));
        assert_eq!(roster.round_winner(), Some(slot(2)));
    }

    #[test]
    fn final_winner_requires_a_point() {
        let mut roster = seated(&[(1, DeviceId::STICK1), (2, DeviceId::STICK2)]);
        assert_eq!(roster.final_winner(), None);
        roster.award(slot(2));
        assert_eq!(roster.final_winner(), Some(slot(2)));
        roster.award(slot(1));
        assert_eq!(roster.final_winner(), Some(slot(1)));
    }

    #[test]
    fn tie_detection_needs_exactly_two() {
        let mut roster = seated(&[
            (1, DeviceId::STICK1),
            (2, DeviceId::STICK2),
            (3, DeviceId::STICK3),
        ]);
        assert_eq!(roster.tied_for_top(), None);
        roster.award(slot(1));
        roster.award(slot(3));
        assert_eq!(roster.tied_for_top(), Some((slot(1), slot(3))));
        roster.award(slot(2));
        assert_eq!(roster.tied_for_top(), None);
    }

    #[test]
    fn tie_break_restricts_active_slots() {
        let mut roster = seated(&[
            (1, DeviceId::STICK1),
            (2, DeviceId::STICK2),
            (3, DeviceId::STICK3),
        ]);
        roster.start_tie_break((slot(1), slot(3)));
        let active: Vec<Slot> = roster.active_slots().collect();
        assert_eq!(active, vec![slot(1), slot(3)]);
        roster.award(slot(3));
        roster.award(slot(3));
        assert_eq!(roster.tie_break_lead(), Some(2));
    }

    #[test]
    fn reset_round_keeps_scores_and_bindings() {
        let mut roster = seated(&[(1, DeviceId::STICK1)]);
        roster.record(slot(1), ResultTime::Millis(300));
        roster.award(slot(1));
        roster.set_progress(slot(1), 4);
        roster.reset_round();
        let entry = roster.get(slot(1));
        assert!(!entry.finished);
        assert_eq!(entry.result, None);
        assert_eq!(entry.score, 1);
        assert_eq!(entry.shake_progress, 0);
        assert_eq!(entry.controller, Some(DeviceId::STICK1));
    }
}
