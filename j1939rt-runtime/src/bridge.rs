//! Wires the virtual CAN port and the Transport Protocol engine onto the
//! message bus, so modules only ever see `can.rx`/`can.tx` and
//! `j1939.rx`/`j1939.tx` — never the port or the engine directly.

use std::sync::{Arc, Mutex};

use j1939rt_bus::MessageBus;
use j1939rt_can::{CanPort, VirtualPort};
use j1939rt_proto::{CANFrame, DecodedMessage};
use j1939rt_tp::TpEngine;

/// Payload published/consumed on `j1939.tx`: an application-level PG to
/// send, addressed either globally (BAM if it needs fragmenting) or to a
/// specific destination (RTS/CTS if it needs fragmenting).
#[derive(Debug, Clone)]
pub struct J1939Tx {
    pub pgn: u32,
    pub data: Vec<u8>,
    pub priority: Option<u8>,
    pub sa: Option<u8>,
    pub da: Option<u8>,
}

pub(crate) fn wire(
    bus: &MessageBus,
    port: &Arc<VirtualPort>,
    tp: &Arc<Mutex<TpEngine>>,
    own_address: u8,
) {
    wire_rx(bus, port, tp);
    wire_can_tx(bus, port);
    wire_j1939_tx(bus, port, tp, own_address);
}

fn wire_rx(bus: &MessageBus, port: &Arc<VirtualPort>, tp: &Arc<Mutex<TpEngine>>) {
    let rx_bus = bus.clone();
    let tp = tp.clone();
    let tx_port = port.clone();

    port.on_frame(Box::new(move |frame: &CANFrame| {
        let now_ms = frame.timestamp().unwrap_or(0);
        rx_bus.publish("can.rx", frame.clone(), now_ms);

        let parsed = j1939rt_proto::parse(frame.id());
        if parsed.pgn == j1939rt_proto::PGN_TP_CM || parsed.pgn == j1939rt_proto::PGN_TP_DT {
            let outcome = tp.lock().unwrap().on_frame(frame, now_ms);

            for out_frame in outcome.frames {
                if let Err(err) = tx_port.send(out_frame) {
                    log::warn!("TP engine could not send a control/data frame: {}", err);
                }
            }
            for error in &outcome.errors {
                log::warn!("TP engine error: {}", error);
            }
            for message in outcome.completed {
                let decoded = DecodedMessage {
                    priority: parsed.priority,
                    pgn: message.pgn,
                    sa: message.sa,
                    da: message.da,
                    raw: message.data,
                    name: j1939rt_proto::lookup(message.pgn)
                        .map(|info| info.name)
                        .unwrap_or("Unknown PGN"),
                };
                rx_bus.publish("j1939.rx", decoded, now_ms);
            }
        } else {
            let decoded = j1939rt_proto::decode(frame.id(), frame.data());
            rx_bus.publish("j1939.rx", decoded, now_ms);
        }
    }));
}

fn wire_can_tx(bus: &MessageBus, port: &Arc<VirtualPort>) {
    let tx_port = port.clone();
    bus.subscribe("can.tx", move |envelope| {
        if let Some(frame) = envelope.payload::<CANFrame>() {
            if let Err(err) = tx_port.send(frame.clone()) {
                log::warn!("can.tx send failed: {}", err);
            }
        }
    });
}

fn wire_j1939_tx(bus: &MessageBus, port: &Arc<VirtualPort>, tp: &Arc<Mutex<TpEngine>>, own_address: u8) {
    let tx_port = port.clone();
    let tp = tp.clone();
    bus.subscribe("j1939.tx", move |envelope| {
        let Some(message) = envelope.payload::<J1939Tx>() else {
            return;
        };

        match build_outgoing_frames(&tp, message, envelope.timestamp_ms(), own_address) {
            Ok(frames) => {
                for frame in frames {
                    if let Err(err) = tx_port.send(frame) {
                        log::warn!("j1939.tx send failed: {}", err);
                    }
                }
            }
            Err(err) => log::warn!("j1939.tx encode failed: {}", err),
        }
    });
}

fn build_outgoing_frames(
    tp: &Arc<Mutex<TpEngine>>,
    message: &J1939Tx,
    now_ms: u64,
    own_address: u8,
) -> Result<Vec<CANFrame>, Box<dyn std::error::Error + Send + Sync>> {
    let sa = message.sa.unwrap_or(own_address);
    let priority = message.priority.unwrap_or(6);

    if message.data.len() <= j1939rt_proto::frame::MAX_DATA_LEN {
        let da = message.da.unwrap_or(j1939rt_proto::ADDRESS_GLOBAL);
        let id = j1939rt_proto::build(&j1939rt_proto::BuildJ1939Id {
            priority,
            pgn: message.pgn,
            sa,
            da,
        })?;
        return Ok(vec![CANFrame::new_j1939(id, message.data.clone())?]);
    }

    if let Some(da) = message.da {
        let mut tp = tp.lock().unwrap();
        Ok(tp.begin_rts_send(message.pgn, sa, da, message.data.clone(), now_ms)?)
    } else {
        let tp = tp.lock().unwrap();
        Ok(tp.begin_bam_send(message.pgn, sa, &message.data)?)
    }
}
