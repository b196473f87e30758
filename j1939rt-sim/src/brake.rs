use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;

use j1939rt_bus::{Subscription, TimerHandle};
use j1939rt_proto::DecodedMessage;
use j1939rt_runtime::{J1939Tx, Module, ModuleContext};

use crate::request;

const PGN_ABS: u32 = 0xFEEE;
const PGN_ASC2: u32 = 0xFEAE;

#[derive(Debug, Clone, Copy)]
pub struct BrakeConfig {
    pub sa: u8,
    pub rate_ms: u64,
}

impl Default for BrakeConfig {
    fn default() -> Self {
        Self { sa: 0x0B, rate_ms: 100 }
    }
}

struct WheelSpeeds {
    fl: f64,
    fr: f64,
    rl: f64,
    rr: f64,
}

struct State {
    abs_active: bool,
    traction_control_active: bool,
    brake_pedal_position: f64,
    front_pressure: f64,
    rear_pressure: f64,
    parking_brake_engaged: bool,
    wheel_speeds: WheelSpeeds,
    air_pressure: f64,
}

/// No drive model is specified for the brake ECU, only its PG layouts; the
/// vehicle is treated as stationary, so wheel speeds hold at zero, ABS
/// engages only while the pedal is held past a threshold, and traction
/// control (which needs a wheel-spin signal absent here) never engages.
fn advance(state: &mut State) {
    state.abs_active = state.brake_pedal_position > 50.0 && !state.parking_brake_engaged;
    state.traction_control_active = false;
}

/// Bytes 0-1/2-3/4-5/6-7 are FL/FR/RL/RR wheel speed at 1/256 km/h/bit LE.
fn encode_abs(state: &State) -> [u8; 8] {
    let mut out = [0u8; 8];
    for (i, speed) in [
        state.wheel_speeds.fl,
        state.wheel_speeds.fr,
        state.wheel_speeds.rl,
        state.wheel_speeds.rr,
    ]
    .iter()
    .enumerate()
    {
        let raw = (speed * 256.0).round() as u16;
        let [lo, hi] = raw.to_le_bytes();
        out[i * 2] = lo;
        out[i * 2 + 1] = hi;
    }
    out
}

/// Byte 0 pedal position at 0.4%/bit; bytes 1-2/3-4 front/rear pressure at
/// 2 kPa/bit LE; bytes 5-6 air pressure at 4 kPa/bit LE; byte 7 status
/// bitmask (bit 0 ABS, bit 1 traction control, bit 2 parking brake).
fn encode_asc2(state: &State) -> [u8; 8] {
    let pedal = (state.brake_pedal_position / 0.4).round() as u8;
    let [flo, fhi] = ((state.front_pressure / 2.0).round() as u16).to_le_bytes();
    let [rlo, rhi] = ((state.rear_pressure / 2.0).round() as u16).to_le_bytes();
    let [alo, ahi] = ((state.air_pressure / 4.0).round() as u16).to_le_bytes();

    let mut status = 0u8;
    if state.abs_active {
        status |= 0b001;
    }
    if state.traction_control_active {
        status |= 0b010;
    }
    if state.parking_brake_engaged {
        status |= 0b100;
    }

    [pedal, flo, fhi, rlo, rhi, alo, ahi, status]
}

/// Simulates a brake ECU, broadcasting both ABS (per-wheel speed) and ASC2
/// (pedal/pressure/status) PGs and answering requests for either.
pub struct BrakeSimulator {
    config: BrakeConfig,
    state: Arc<Mutex<State>>,
    subscription: Option<Subscription>,
    timer: Option<TimerHandle>,
}

impl BrakeSimulator {
    pub fn new(config: BrakeConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(State {
                abs_active: false,
            traction_control_active: false,
                brake_pedal_position: 0.0,
                front_pressure: 700.0,
                rear_pressure: 700.0,
                parking_brake_engaged: false,
                wheel_speeds: WheelSpeeds {
                    fl: 0.0,
                    fr: 0.0,
                    rl: 0.0,
                    rr: 0.0,
                },
                air_pressure: 800.0,
            })),
            subscription: None,
            timer: None,
        }
    }
}

#[async_trait]
impl Module for BrakeSimulator {
    fn name(&self) -> &str {
        "brake-simulator"
    }

    async fn on_start(
        &mut self,
        ctx: &ModuleContext,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let sa = self.config.sa;
        let state = self.state.clone();
        let bus = ctx.bus.clone();
        self.subscription = Some(ctx.bus.subscribe_typed::<DecodedMessage>(
            "j1939.rx",
            move |msg, timestamp_ms| {
                if msg.pgn != j1939rt_proto::PGN_REQUEST {
                    return;
                }
                let requested = request::decode_requested_pgn(&msg.raw);
                let data = match requested {
                    Some(PGN_ABS) => encode_abs(&state.lock().unwrap()).to_vec(),
                    Some(PGN_ASC2) => encode_asc2(&state.lock().unwrap()).to_vec(),
                    _ => return,
                };
                bus.publish(
                    "j1939.tx",
                    J1939Tx {
                        pgn: requested.unwrap(),
                        data,
                        priority: Some(3),
                        sa: Some(sa),
                        da: Some(msg.sa),
                    },
                    timestamp_ms,
                );
            },
        ));

        let state = self.state.clone();
        let bus = ctx.bus.clone();
        let start = Instant::now();
        self.timer = Some(ctx.scheduler.every(self.config.rate_ms, move || {
            let (abs, asc2) = {
                let mut state = state.lock().unwrap();
                advance(&mut state);
                (encode_abs(&state).to_vec(), encode_asc2(&state).to_vec())
            };
            let now_ms = start.elapsed().as_millis() as u64;
            bus.publish(
                "j1939.tx",
                J1939Tx {
                    pgn: PGN_ABS,
                    data: abs,
                    priority: Some(3),
                    sa: Some(sa),
                    da: None,
                },
                now_ms,
            );
            bus.publish(
                "j1939.tx",
                J1939Tx {
                    pgn: PGN_ASC2,
                    data: asc2,
                    priority: Some(3),
                    sa: Some(sa),
                    da: None,
                },
                now_ms,
            );
        }));

        Ok(())
    }

    async fn on_stop(&mut self, ctx: &ModuleContext) {
        if let Some(timer) = self.timer.take() {
            ctx.scheduler.clear(timer);
        }
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abs_engages_once_pedal_crosses_threshold() {
        let mut state = State {
            abs_active: false,
            traction_control_active: false,
            brake_pedal_position: 60.0,
            front_pressure: 700.0,
            rear_pressure: 700.0,
            parking_brake_engaged: false,
            wheel_speeds: WheelSpeeds { fl: 0.0, fr: 0.0, rl: 0.0, rr: 0.0 },
            air_pressure: 800.0,
        };
        advance(&mut state);
        assert!(state.abs_active);
    }

    #[test]
    fn parking_brake_suppresses_abs() {
        let mut state = State {
            abs_active: false,
            traction_control_active: false,
            brake_pedal_position: 90.0,
            front_pressure: 700.0,
            rear_pressure: 700.0,
            parking_brake_engaged: true,
            wheel_speeds: WheelSpeeds { fl: 0.0, fr: 0.0, rl: 0.0, rr: 0.0 },
            air_pressure: 800.0,
        };
        advance(&mut state);
        assert!(!state.abs_active);
    }

    #[test]
    fn asc2_status_byte_does_not_mirror_abs_onto_traction_control() {
        let mut state = State {
            abs_active: false,
            traction_control_active: false,
            brake_pedal_position: 90.0,
            front_pressure: 700.0,
            rear_pressure: 700.0,
            parking_brake_engaged: false,
            wheel_speeds: WheelSpeeds { fl: 0.0, fr: 0.0, rl: 0.0, rr: 0.0 },
            air_pressure: 800.0,
        };
        advance(&mut state);
        assert!(state.abs_active);
        assert_eq!(encode_asc2(&state)[7] & 0b001, 0b001);
        assert_eq!(encode_asc2(&state)[7] & 0b010, 0);
    }

    #[test]
    fn asc2_status_byte_reflects_parking_brake() {
        let state = State {
            abs_active: false,
            traction_control_active: false,
            brake_pedal_position: 0.0,
            front_pressure: 700.0,
            rear_pressure: 700.0,
            parking_brake_engaged: true,
            wheel_speeds: WheelSpeeds { fl: 0.0, fr: 0.0, rl: 0.0, rr: 0.0 },
            air_pressure: 800.0,
        };
        assert_eq!(encode_asc2(&state)[7] & 0b100, 0b100);
    }
}
