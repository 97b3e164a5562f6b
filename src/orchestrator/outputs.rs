//! What the coordinator asks of its rendering collaborators.
//!
//! The orchestrator never drives LEDs, audio or a screen itself. It describes
//! what changed as [`UiCommand`]s and keeps the current [`LedScene`] and zone
//! overrides in the published snapshot; renderers on the other side of the
//! [`StateBoundary`](crate::StateBoundary) turn those into light and sound.

use serde::{Deserialize, Serialize};

use crate::{DeviceId, Slot};

/// Number of LED zones (rings): four player zones and the centre.
pub const ZONE_COUNT: usize = 5;

/// One LED zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ZoneId(pub u8);

impl ZoneId {
    /// The middle ring, used for the shake timer.
    pub const CENTRE: Self = Self(2);

    /// 0-based index for zone tables.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// How player slots are wired to LED zones.
///
/// Cabinets have been built both ways round; which physical side is slot 1
/// is a per-build decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ZoneLayout {
    /// Slot 1 → zone 4, 2 → 3, 3 → 1, 4 → 0.
    #[default]
    Reversed,
    /// Slot 1 → zone 0, 2 → 1, 3 → 3, 4 → 4.
    Direct,
}

impl ZoneLayout {
    /// Maps a slot to the zone that shows it. Never returns [`ZoneId::CENTRE`].
    ///
    /// ```
    /// use reflex_duel::orchestrator::outputs::{ZoneId, ZoneLayout};
    /// use reflex_duel::Slot;
    ///
    /// let slot1 = Slot::from_number(1).unwrap();
    /// assert_eq!(ZoneLayout::Reversed.slot_to_zone(slot1), ZoneId(4));
    /// assert_eq!(ZoneLayout::Direct.slot_to_zone(slot1), ZoneId(0));
    /// ```
    #[must_use]
    pub const fn slot_to_zone(self, slot: Slot) -> ZoneId {
        const REVERSED: [u8; 4] = [4, 3, 1, 0];
        const DIRECT: [u8; 4] = [0, 1, 3, 4];
        let table = match self {
            Self::Reversed => REVERSED,
            Self::Direct => DIRECT,
        };
        ZoneId(table[slot.index()])
    }
}

/// Colours a zone can be overridden with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ZoneColor {
    /// Dark.
    Off,
    /// Controller 1 identity.
    White,
    /// Controller 2 identity.
    Blue,
    /// Controller 3 identity, penalty.
    Red,
    /// Controller 4 identity, still waiting.
    Yellow,
    /// Valid result in.
    Green,
}

impl ZoneColor {
    /// Identity colour of a controller: 1 white, 2 blue, 3 red, 4 yellow.
    #[must_use]
    pub const fn identity(controller: DeviceId) -> Self {
        match controller.as_u8() {
            0x01 => Self::White,
            0x02 => Self::Blue,
            0x03 => Self::Red,
            0x04 => Self::Yellow,
            _ => Self::Off,
        }
    }
}

/// A per-zone colour drawn over the running scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ZoneOverride {
    /// Colour.
    pub color: ZoneColor,
    /// Blink instead of holding solid.
    pub blink: bool,
}

/// Background animation of the LED rings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LedScene {
    /// Attract mode.
    IdleRainbow,
    /// Blink the zone of the slot being offered during joining.
    BlinkSlot(Slot),
    /// Show the zone overrides only.
    Status,
    /// Red blink while a shake round is announced.
    Countdown,
    /// Random fast cycling while a reaction round waits for its go.
    RandomFast,
    /// Player zones cycle, the centre drains over `timeout_ms`.
    ShakeCountdown {
        /// Length of the shake window.
        timeout_ms: u32,
    },
    /// Hold the current frame. The go cue of reaction rounds.
    Frozen,
}

/// Symbolic audio clips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SoundCue {
    /// "Press to join".
    PressToJoin,
    /// "Player N".
    PlayerNumber(u8),
    /// "Get ready".
    GetReady,
    /// Reaction round title.
    ReactionMode,
    /// Reaction round rules, first time only.
    ReactionInstructions,
    /// "Shake it".
    ShakeIt,
    /// Shake round rules, first time only.
    ShakeInstructions,
    /// The number of shakes to reach.
    ShakeTarget(u8),
    /// Countdown number.
    Countdown(u8),
    /// Go beep.
    Beep,
    /// "Fastest".
    Fastest,
    /// "Player N wins".
    PlayerWins(u8),
    /// Victory music.
    VictoryFanfare,
    /// "Game over".
    GameOver,
}

/// One change for the rendering side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UiCommand {
    /// Switch the LED scene.
    SetScene(LedScene),
    /// Override the colour of a slot's zone.
    SetSlotColor {
        /// The slot.
        slot: Slot,
        /// Its zone under the configured layout.
        zone: ZoneId,
        /// Colour.
        color: ZoneColor,
        /// Blink instead of holding solid.
        blink: bool,
    },
    /// Remove every zone override.
    ClearSlotColors,
    /// Countdown number on screen and rings.
    ShowCountdown {
        /// Value.
        n: u8,
    },
    /// Brief all-zone white flash paired with a countdown tick.
    CountdownFlash,
    /// Hold the LEDs on their current frame.
    FreezeScene,
    /// Queue a clip.
    PlaySound(SoundCue),
    /// Cut current audio and clear the queue.
    StopSound,
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

    #[test]
    fn reversed_layout_matches_cabinet_wiring() {
        let zones: Vec<u8> = Slot::ALL
            .iter()
            .map(|slot| ZoneLayout::Reversed.slot_to_zone(*slot).0)
            .collect();
        assert_eq!(zones, vec![4, 3, 1, 0]);
    }

    #[test]
    fn no_layout_uses_the_centre_zone() {
        for layout in [ZoneLayout::Reversed, ZoneLayout::Direct] {
            let mut seen = [false; ZONE_COUNT];
            for slot in Slot::ALL {
                let zone = layout.slot_to_zone(slot);
                assert_ne!(zone, ZoneId::CENTRE);
                assert!(!seen[zone.index()], "{layout:?} maps two slots to {zone:?}");
                seen[zone.index()] = true;
            }
        }
    }

    #[test]
    fn identity_colours() {
        assert_eq!(ZoneColor::identity(DeviceId::STICK1), ZoneColor::White);
        assert_eq!(ZoneColor::identity(DeviceId::STICK2), ZoneColor::Blue);
        assert_eq!(ZoneColor::identity(DeviceId::STICK3), ZoneColor::Red);
        assert_eq!(ZoneColor::identity(DeviceId::STICK4), ZoneColor::Yellow);
        assert_eq!(ZoneColor::identity(DeviceId::DISPLAY), ZoneColor::Off);
    }
}
