//! Fuzz target for device state machines.
//!
//! Arbitrary frames (any source, any command, any payload) are delivered to a
//! controller and the display between polls with arbitrary inputs.
//!
//! # Safety Properties Tested
//! - No panics whatever arrives in whatever order
//! - A controller that reported a result is in the done state

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use web_time::{Duration, Instant};

use reflex_duel::network::codec::encode;
use reflex_duel::network::loopback::LoopbackBus;
use reflex_duel::peer::PeerInputs;
use reflex_duel::{
    AccelSample, DeviceId, DisplayUnit, PeerConfig, PeerState, PeerTimingUnit, Transport,
};

#[derive(Debug, Arbitrary)]
struct Step {
    src: u8,
    dest: u8,
    cmd: u8,
    data: u16,
    advance_ms: u8,
    button_down: bool,
    accel: Option<(i16, i16, i16)>,
}

fuzz_target!(|steps: Vec<Step>| {
    let bus = LoopbackBus::new();
    let start = Instant::now();
    let Ok(mut stick) = PeerTimingUnit::new(
        PeerConfig::new(DeviceId::STICK1),
        bus.port(DeviceId::STICK1),
        start,
    ) else {
        return;
    };
    let mut display = DisplayUnit::new(bus.port(DeviceId::DISPLAY));
    let mut injector = bus.port(DeviceId::new(0x42));

    let mut now = start;
    for step in steps.iter().take(512) {
        let dest = match step.dest % 3 {
            0 => DeviceId::STICK1,
            1 => DeviceId::DISPLAY,
            _ => DeviceId::BROADCAST,
        };
        let bytes = encode(dest.as_u8(), step.src, step.cmd, step.data);
        injector.send_to(&bytes, dest);

        now += Duration::from_millis(u64::from(step.advance_ms));
        let inputs = PeerInputs {
            button_down: step.button_down,
            accel: step.accel.map(|(x, y, z)| AccelSample::new(x, y, z)),
        };
        stick.poll(now, inputs);
        display.poll();

        if stick.last_result().is_some() {
            assert!(matches!(stick.state(), PeerState::Done | PeerState::Idle));
        }
    }
});
