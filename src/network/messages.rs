//! Typed view of wire frames.
//!
//! A [`Frame`] is five raw bytes; a [`Message`] says what they mean. Command
//! codes are fixed per direction and agreed by every device in a session (see
//! [`codes`]). Conversion is lossless for every valid message:
//! `Message::try_from(message.to_frame()) == Ok(message)`.

use serde::{Deserialize, Serialize};

use crate::network::codec::Frame;
use crate::{DeviceId, DuelError, ResultTime, Slot};

/// Command codes on the wire.
pub mod codes {
    /// Controller asks to claim the prompted slot.
    pub const JOIN_REQUEST: u8 = 0x0D;
    /// Coordinator confirms a claim; `data_low` = slot number.
    pub const JOIN_CONFIRM: u8 = 0x0B;
    /// Generic acknowledge; `data_low` = acknowledged command.
    pub const ACK: u8 = 0x0C;
    /// Controller-side error report.
    pub const ERROR: u8 = 0x0F;
    /// Round start; `data_high` = mode, `data_low` = parameter.
    pub const ROUND_START: u8 = 0x21;
    /// Haptic pulse; `data_low` = duration in 10 ms units or [`HAPTIC_GO_MARKER`].
    pub const HAPTIC: u8 = 0x23;
    /// Return to idle.
    pub const RETURN_TO_IDLE: u8 = 0x24;
    /// Countdown tick; `data_low` = n.
    pub const COUNTDOWN_TICK: u8 = 0x25;
    /// Reaction result in milliseconds.
    pub const REACTION_RESULT: u8 = 0x26;
    /// Shake result in milliseconds.
    pub const SHAKE_RESULT: u8 = 0x27;
    /// The go event.
    pub const GO: u8 = 0x28;
    /// Shake progress; `data_high` = count, `data_low` = target.
    pub const SHAKE_PROGRESS: u8 = 0x29;

    /// Display: idle screen.
    pub const DISP_IDLE: u8 = 0x30;
    /// Display: generic join prompt.
    pub const DISP_PROMPT_JOIN: u8 = 0x31;
    /// Display: slot bound; `data_high` = slot, `data_low` = controller id.
    pub const DISP_SLOT_READY: u8 = 0x32;
    /// Display: countdown value.
    pub const DISP_COUNTDOWN: u8 = 0x33;
    /// Display: go.
    pub const DISP_GO: u8 = 0x34;
    /// Display: reaction mode announce.
    pub const DISP_REACTION_MODE: u8 = 0x35;
    /// Display: shake mode announce; `data_low` = target.
    pub const DISP_SHAKE_MODE: u8 = 0x36;
    /// Display: time for slot 1. Slots 2..=4 follow consecutively.
    pub const DISP_TIME_P1: u8 = 0x37;
    /// Display: time for slot 4.
    pub const DISP_TIME_P4: u8 = 0x3A;
    /// Display: round winner; 0 = none.
    pub const DISP_ROUND_WINNER: u8 = 0x3B;
    /// Display: score; `data_high` = slot, `data_low` = score.
    pub const DISP_SCORES: u8 = 0x3C;
    /// Display: final winner; 0 = none.
    pub const DISP_FINAL_WINNER: u8 = 0x3D;
    /// Display: tie-break between two slots.
    pub const DISP_TIE_BREAK: u8 = 0x3E;
    /// Display: prompt a specific slot.
    pub const DISP_PROMPT_SLOT: u8 = 0x3F;
    /// Display to coordinator: user asked to skip the current wait.
    pub const SKIP_WAIT: u8 = 0x40;

    /// Haptic payload meaning "this is the go event".
    pub const HAPTIC_GO_MARKER: u8 = 0xFF;
}

/// Contest mode of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameMode {
    /// Press the button as soon as the go event fires.
    Reaction,
    /// Shake the controller a target number of times.
    Shake,
}

impl GameMode {
    /// Wire representation.
    #[must_use]
    pub const fn to_wire(self) -> u8 {
        match self {
            Self::Reaction => 0x01,
            Self::Shake => 0x02,
        }
    }

    /// Parses the wire representation.
    #[must_use]
    pub const fn from_wire(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Reaction),
            0x02 => Some(Self::Shake),
            _ => None,
        }
    }
}

/// Firmware version carried by a join request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FirmwareVersion {
    /// Major version, 0..=15.
    pub major: u8,
    /// Minor version, 0..=15.
    pub minor: u8,
    /// Patch version.
    pub patch: u8,
}

impl FirmwareVersion {
    /// Creates a version. Major and minor are truncated to four bits on the wire.
    #[must_use]
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    const fn to_wire(self) -> u16 {
        let high = ((self.major & 0x0F) << 4) | (self.minor & 0x0F);
        ((high as u16) << 8) | self.patch as u16
    }

    const fn from_wire(data: u16) -> Self {
        let high = (data >> 8) as u8;
        Self {
            major: (high >> 4) & 0x0F,
            minor: high & 0x0F,
            patch: (data & 0xFF) as u8,
        }
    }
}

impl std::fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "V{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Haptic request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HapticPulse {
    /// Treated as the go event by the receiver.
    GoMarker,
    /// Vibrate for `n * 10` milliseconds.
    Tens(u8),
}

/// Commands the coordinator sends to the display, and their payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisplayCommand {
    /// Idle screen.
    Idle,
    /// Generic "press to join".
    PromptJoin,
    /// A controller claimed `slot`.
    SlotReady {
        /// The claimed slot.
        slot: Slot,
        /// The controller that claimed it.
        controller: DeviceId,
    },
    /// Countdown value; 0 clears it.
    Countdown {
        /// Seconds remaining.
        n: u8,
    },
    /// The go event.
    Go,
    /// Reaction round announced.
    ReactionMode,
    /// Shake round announced.
    ShakeMode {
        /// Shakes required.
        target: u8,
    },
    /// Result time of one slot.
    SlotTime {
        /// Slot the time belongs to.
        slot: Slot,
        /// The time or the penalty.
        time: ResultTime,
    },
    /// Round winner, `None` when every slot was penalized.
    RoundWinner(Option<Slot>),
    /// Running score of one slot.
    Score {
        /// Slot the score belongs to.
        slot: Slot,
        /// Rounds won.
        score: u8,
    },
    /// Game winner, `None` when nobody scored.
    FinalWinner(Option<Slot>),
    /// Tie-break between two slots.
    TieBreak {
        /// Lower tied slot.
        first: Slot,
        /// Higher tied slot.
        second: Slot,
    },
    /// Prompt a specific slot to join.
    PromptSlot {
        /// The prompted slot.
        slot: Slot,
    },
}

impl DisplayCommand {
    /// Command code on the wire.
    #[must_use]
    pub const fn code(&self) -> u8 {
        match self {
            Self::Idle => codes::DISP_IDLE,
            Self::PromptJoin => codes::DISP_PROMPT_JOIN,
            Self::SlotReady { .. } => codes::DISP_SLOT_READY,
            Self::Countdown { .. } => codes::DISP_COUNTDOWN,
            Self::Go => codes::DISP_GO,
            Self::ReactionMode => codes::DISP_REACTION_MODE,
            Self::ShakeMode { .. } => codes::DISP_SHAKE_MODE,
            Self::SlotTime { slot, .. } => codes::DISP_TIME_P1 + slot.index() as u8,
            Self::RoundWinner(_) => codes::DISP_ROUND_WINNER,
            Self::Score { .. } => codes::DISP_SCORES,
            Self::FinalWinner(_) => codes::DISP_FINAL_WINNER,
            Self::TieBreak { .. } => codes::DISP_TIE_BREAK,
            Self::PromptSlot { .. } => codes::DISP_PROMPT_SLOT,
        }
    }

    /// Whether this command goes through reliable delivery.
    ///
    /// Times and scores are sent in bursts, one per slot, and would replace each
    /// other in the single pending record the display has.
    #[must_use]
    pub const fn is_reliable(&self) -> bool {
        !matches!(self, Self::SlotTime { .. } | Self::Score { .. })
    }

    /// Returns true if `code` falls in the display command range.
    #[must_use]
    pub const fn is_display_code(code: u8) -> bool {
        code >= codes::DISP_IDLE && code <= codes::DISP_PROMPT_SLOT
    }

    fn data(&self) -> u16 {
        match *self {
            Self::Idle | Self::PromptJoin | Self::Go | Self::ReactionMode => 0,
            Self::SlotReady { slot, controller } => pack(slot.number(), controller.as_u8()),
            Self::Countdown { n } => u16::from(n),
            Self::ShakeMode { target } => u16::from(target),
            Self::SlotTime { time, .. } => time.to_wire(),
            Self::RoundWinner(slot) | Self::FinalWinner(slot) => {
                u16::from(slot.map_or(0, Slot::number))
            },
            Self::Score { slot, score } => pack(slot.number(), score),
            Self::TieBreak { first, second } => pack(first.number(), second.number()),
            Self::PromptSlot { slot } => u16::from(slot.number()),
        }
    }

    fn parse(frame: &Frame) -> Result<Self, DuelError> {
        let high = frame.data_high();
        let low = frame.data_low();
        let command = match frame.cmd {
            codes::DISP_IDLE => Self::Idle,
            codes::DISP_PROMPT_JOIN => Self::PromptJoin,
            codes::DISP_SLOT_READY => Self::SlotReady {
                slot: slot_number(high)?,
                controller: DeviceId::new(low),
            },
            codes::DISP_COUNTDOWN => Self::Countdown { n: low },
            codes::DISP_GO => Self::Go,
            codes::DISP_REACTION_MODE => Self::ReactionMode,
            codes::DISP_SHAKE_MODE => Self::ShakeMode { target: low },
            code @ codes::DISP_TIME_P1..=codes::DISP_TIME_P4 => Self::SlotTime {
                slot: slot_number(code - codes::DISP_TIME_P1 + 1)?,
                time: ResultTime::from_wire(frame.data),
            },
            codes::DISP_ROUND_WINNER => Self::RoundWinner(optional_slot(low)?),
            codes::DISP_SCORES => Self::Score {
                slot: slot_number(high)?,
                score: low,
            },
            codes::DISP_FINAL_WINNER => Self::FinalWinner(optional_slot(low)?),
            codes::DISP_TIE_BREAK => Self::TieBreak {
                first: slot_number(high)?,
                second: slot_number(low)?,
            },
            codes::DISP_PROMPT_SLOT => Self::PromptSlot {
                slot: slot_number(low)?,
            },
            code => return Err(DuelError::UnknownCommand { code }),
        };
        Ok(command)
    }
}

/// Meaning of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageBody {
    /// Controller asks to claim the prompted slot.
    JoinRequest {
        /// Firmware running on the controller.
        firmware: FirmwareVersion,
    },
    /// Coordinator confirms a claim.
    JoinConfirm {
        /// The slot now bound to the controller.
        slot: Slot,
    },
    /// Round configuration, replayed at every round start.
    RoundStart {
        /// Contest mode.
        mode: GameMode,
        /// Shake target, or 0 for reaction rounds.
        param: u8,
    },
    /// The go event.
    Go,
    /// Countdown tick.
    CountdownTick {
        /// Seconds remaining.
        n: u8,
    },
    /// Haptic pulse request.
    Haptic(HapticPulse),
    /// Abandon the round and wait for the next game.
    ReturnToIdle,
    /// Reaction round result.
    ReactionResult(ResultTime),
    /// Shake round result.
    ShakeResult(ResultTime),
    /// Best-effort shake progress.
    ShakeProgress {
        /// Shakes counted so far.
        count: u8,
        /// Shakes required.
        target: u8,
    },
    /// Acknowledges a reliable command.
    Ack {
        /// Command code being acknowledged.
        acked: u8,
    },
    /// Controller error report.
    Error {
        /// Device-specific error code.
        code: u16,
    },
    /// A display command.
    Display(DisplayCommand),
    /// Display asks to skip the current wait.
    SkipWait,
}

impl MessageBody {
    /// Command code on the wire.
    #[must_use]
    pub const fn code(&self) -> u8 {
        match self {
            Self::JoinRequest { .. } => codes::JOIN_REQUEST,
            Self::JoinConfirm { .. } => codes::JOIN_CONFIRM,
            Self::RoundStart { .. } => codes::ROUND_START,
            Self::Go => codes::GO,
            Self::CountdownTick { .. } => codes::COUNTDOWN_TICK,
            Self::Haptic(_) => codes::HAPTIC,
            Self::ReturnToIdle => codes::RETURN_TO_IDLE,
            Self::ReactionResult(_) => codes::REACTION_RESULT,
            Self::ShakeResult(_) => codes::SHAKE_RESULT,
            Self::ShakeProgress { .. } => codes::SHAKE_PROGRESS,
            Self::Ack { .. } => codes::ACK,
            Self::Error { .. } => codes::ERROR,
            Self::Display(command) => command.code(),
            Self::SkipWait => codes::SKIP_WAIT,
        }
    }

    /// Payload on the wire.
    #[must_use]
    pub fn data(&self) -> u16 {
        match *self {
            Self::JoinRequest { firmware } => firmware.to_wire(),
            Self::JoinConfirm { slot } => u16::from(slot.number()),
            Self::RoundStart { mode, param } => pack(mode.to_wire(), param),
            Self::Go | Self::ReturnToIdle | Self::SkipWait => 0,
            Self::CountdownTick { n } => u16::from(n),
            Self::Haptic(HapticPulse::GoMarker) => u16::from(codes::HAPTIC_GO_MARKER),
            Self::Haptic(HapticPulse::Tens(n)) => u16::from(n),
            Self::ReactionResult(time) | Self::ShakeResult(time) => time.to_wire(),
            Self::ShakeProgress { count, target } => pack(count, target),
            Self::Ack { acked } => u16::from(acked),
            Self::Error { code } => code,
            Self::Display(command) => command.data(),
        }
    }

    /// Returns true for commands the receiver must acknowledge when they arrive
    /// from the coordinator.
    #[must_use]
    pub const fn expects_ack(&self) -> bool {
        match self {
            Self::RoundStart { .. }
            | Self::Go
            | Self::CountdownTick { .. }
            | Self::Haptic(_)
            | Self::ReturnToIdle => true,
            Self::Display(command) => command.is_reliable(),
            _ => false,
        }
    }
}

/// A routed, typed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Message {
    /// Destination device.
    pub dest: DeviceId,
    /// Source device.
    pub src: DeviceId,
    /// What the frame says.
    pub body: MessageBody,
}

impl Message {
    /// Creates a message.
    #[must_use]
    pub const fn new(dest: DeviceId, src: DeviceId, body: MessageBody) -> Self {
        Self { dest, src, body }
    }

    /// Converts to a wire frame.
    #[must_use]
    pub fn to_frame(&self) -> Frame {
        Frame::new(
            self.dest.as_u8(),
            self.src.as_u8(),
            self.body.code(),
            self.body.data(),
        )
    }

    /// Serializes straight to wire bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; crate::network::codec::FRAME_LEN] {
        self.to_frame().to_bytes()
    }
}

impl TryFrom<Frame> for Message {
    type Error = DuelError;

    fn try_from(frame: Frame) -> Result<Self, Self::Error> {
        let high = frame.data_high();
        let low = frame.data_low();
        let body = match frame.cmd {
            codes::JOIN_REQUEST => MessageBody::JoinRequest {
                firmware: FirmwareVersion::from_wire(frame.data),
            },
            codes::JOIN_CONFIRM => MessageBody::JoinConfirm {
                slot: slot_number(low)?,
            },
            codes::ROUND_START => MessageBody::RoundStart {
                mode: GameMode::from_wire(high).ok_or_else(|| DuelError::InvalidFrame {
                    reason: format!("unknown game mode 0x{:02X}", high),
                })?,
                param: low,
            },
            codes::GO => MessageBody::Go,
            codes::COUNTDOWN_TICK => MessageBody::CountdownTick { n: low },
            codes::HAPTIC => MessageBody::Haptic(if low == codes::HAPTIC_GO_MARKER {
                HapticPulse::GoMarker
            } else {
                HapticPulse::Tens(low)
            }),
            codes::RETURN_TO_IDLE => MessageBody::ReturnToIdle,
            codes::REACTION_RESULT => {
                MessageBody::ReactionResult(ResultTime::from_wire(frame.data))
            },
            codes::SHAKE_RESULT => MessageBody::ShakeResult(ResultTime::from_wire(frame.data)),
            codes::SHAKE_PROGRESS => MessageBody::ShakeProgress {
                count: high,
                target: low,
            },
            codes::ACK => MessageBody::Ack { acked: low },
            codes::ERROR => MessageBody::Error { code: frame.data },
            codes::SKIP_WAIT => MessageBody::SkipWait,
            code if DisplayCommand::is_display_code(code) => {
                MessageBody::Display(DisplayCommand::parse(&frame)?)
            },
            code => return Err(DuelError::UnknownCommand { code }),
        };
        Ok(Self {
            dest: DeviceId::new(frame.dest),
            src: DeviceId::new(frame.src),
            body,
        })
    }
}

const fn pack(high: u8, low: u8) -> u16 {
    ((high as u16) << 8) | low as u16
}

fn slot_number(number: u8) -> Result<Slot, DuelError> {
    Slot::from_number(number).ok_or_else(|| DuelError::InvalidFrame {
        reason: format!("slot number {} out of range", number),
    })
}

fn optional_slot(number: u8) -> Result<Option<Slot>, DuelError> {
    if number == 0 {
        Ok(None)
    } else {
        slot_number(number).map(Some)
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

    fn slot(number: u8) -> Slot {
        Slot::from_number(number).unwrap()
    }

    fn roundtrip(body: MessageBody) {
        let message = Message::new(DeviceId::DISPLAY, DeviceId::HOST, body);
        let parsed = Message::try_from(message.to_frame()).unwrap();
        assert_eq!(parsed, message, "roundtrip of {body:?}");
    }

    #[test]
    fn every_body_kind_roundtrips() {
        let bodies = [
            MessageBody::JoinRequest {
                firmware: FirmwareVersion::new(1, 4, 2),
            },
            MessageBody::JoinConfirm { slot: slot(3) },
            MessageBody::RoundStart {
                mode: GameMode::Shake,
                param: 15,
            },
            MessageBody::Go,
            MessageBody::CountdownTick { n: 2 },
            MessageBody::Haptic(HapticPulse::GoMarker),
            MessageBody::Haptic(HapticPulse::Tens(20)),
            MessageBody::ReturnToIdle,
            MessageBody::ReactionResult(ResultTime::Millis(120)),
            MessageBody::ShakeResult(ResultTime::Penalty),
            MessageBody::ShakeProgress {
                count: 7,
                target: 10,
            },
            MessageBody::Ack {
                acked: codes::DISP_GO,
            },
            MessageBody::Error { code: 0x0102 },
            MessageBody::SkipWait,
            MessageBody::Display(DisplayCommand::SlotReady {
                slot: slot(2),
                controller: DeviceId::stick(4).unwrap(),
            }),
            MessageBody::Display(DisplayCommand::SlotTime {
                slot: slot(4),
                time: ResultTime::Millis(95),
            }),
            MessageBody::Display(DisplayCommand::RoundWinner(None)),
            MessageBody::Display(DisplayCommand::FinalWinner(Some(slot(1)))),
            MessageBody::Display(DisplayCommand::TieBreak {
                first: slot(1),
                second: slot(3),
            }),
            MessageBody::Display(DisplayCommand::PromptSlot { slot: slot(4) }),
        ];
        for body in bodies {
            roundtrip(body);
        }
    }

    #[test]
    fn slot_time_codes_are_consecutive() {
        for number in 1..=4 {
            let command = DisplayCommand::SlotTime {
                slot: slot(number),
                time: ResultTime::Penalty,
            };
            assert_eq!(command.code(), codes::DISP_TIME_P1 + number - 1);
            assert!(!command.is_reliable());
        }
    }

    #[test]
    fn penalty_is_0xffff_on_the_wire() {
        let body = MessageBody::ReactionResult(ResultTime::Penalty);
        assert_eq!(body.data(), 0xFFFF);
    }

    #[test]
    fn firmware_version_packs_into_nibbles() {
        let body = MessageBody::JoinRequest {
            firmware: FirmwareVersion::new(2, 7, 13),
        };
        assert_eq!(body.data(), 0x270D);
        assert_eq!(FirmwareVersion::new(2, 7, 13).to_string(), "V2.7.13");
    }

    #[test]
    fn unknown_command_is_rejected() {
        let frame = Frame::new(0x00, 0x01, 0x7E, 0);
        assert_eq!(
            Message::try_from(frame),
            Err(DuelError::UnknownCommand { code: 0x7E })
        );
    }

    #[test]
    fn out_of_range_slot_is_rejected() {
        let frame = Frame::new(0x01, 0x00, codes::JOIN_CONFIRM, 9);
        assert!(matches!(
            Message::try_from(frame),
            Err(DuelError::InvalidFrame { .. })
        ));
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let frame = Frame::with_bytes(0x01, 0x00, codes::ROUND_START, 0x07, 0);
        assert!(Message::try_from(frame).is_err());
    }

    #[test]
    fn ack_policy_excludes_results_and_bursts() {
        assert!(MessageBody::Go.expects_ack());
        assert!(MessageBody::Display(DisplayCommand::Go).expects_ack());
        assert!(!MessageBody::JoinConfirm { slot: slot(1) }.expects_ack());
        assert!(!MessageBody::ShakeProgress {
            count: 1,
            target: 10
        }
        .expects_ack());
        assert!(!MessageBody::Display(DisplayCommand::Score {
            slot: slot(1),
            score: 2
        })
        .expects_ack());
    }
}
