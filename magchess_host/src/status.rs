// magchess_host/src/status.rs
// JSON snapshots of a running session for the console and for scripts.

use embedded_hal::delay::DelayNs;
use magchess_mcu::command::CommandSource;
use magchess_mcu::hal::SwitchSensor;
use magchess_mcu::motion::Engagement;
use magchess_mcu::{Motion, OccupancyTracker, Session};
use serde_json::{json, Value};

/// Board ranks as strings, eighth rank first, one symbol per square.
pub fn board_rows(tracker: &OccupancyTracker) -> Vec<String> {
    (0..8u8)
        .rev()
        .map(|rank| tracker.board().rank(rank).iter().map(|o| o.symbol()).collect())
        .collect()
}

pub fn tracker_status(tracker: &OccupancyTracker) -> Value {
    let parked: Vec<Value> = tracker
        .parked()
        .map(|(slot, occupant)| json!({ "slot": slot.index, "occupant": occupant.symbol().to_string() }))
        .collect();
    json!({
        "board": board_rows(tracker),
        "holding_slots": parked,
        "free_slots": tracker.slot_count() - parked.len(),
        "occupants": tracker.occupant_count(),
    })
}

pub fn session_status<M, S, B, D>(session: &Session<M, S, B, D>) -> Value
where
    M: Motion,
    S: CommandSource,
    B: SwitchSensor,
    D: DelayNs,
{
    let head = session.head_state();
    json!({
        "state": format!("{:?}", session.state()),
        "expected": format!("{:?}", session.expected_source()),
        "fault": session.fault().map(|e| e.to_string()),
        "head": {
            "x": head.position.x,
            "y": head.position.y,
            "homed": head.homed,
            "engaged": head.engagement == Engagement::Engaged,
        },
        "tracker": tracker_status(session.tracker()),
    })
}
