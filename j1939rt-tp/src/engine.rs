//! The Transport Protocol session engine.

use std::collections::HashMap;
use std::time::Duration;

use j1939rt_proto::CANFrame;

use crate::control::{self, ClearToSend, ConnectionAnnounce, ControlMessage};
use crate::error::TpError;
use crate::session::{BamSession, MAX_MESSAGE_LENGTH, Role, RtsCtsSession, RtsCtsState, SessionKey};

/// T1: max gap between BAM data packets.
pub const T1: Duration = Duration::from_millis(750);
/// T2: max gap between end of data and the next CTS/EOM.
pub const T2: Duration = Duration::from_millis(1250);
/// T3: max time waiting for CTS after RTS.
pub const T3: Duration = Duration::from_millis(1250);
/// T4: max time waiting for the next CTS during a multi-window transfer.
pub const T4: Duration = Duration::from_millis(1050);
/// Hard ceiling regardless of which timer governs a session.
pub const MAX_ASSEMBLY_TIME: Duration = Duration::from_millis(5000);

/// A message reassembled (BAM) or fully sent/received (RTS/CTS).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReassembledMessage {
    pub pgn: u32,
    pub sa: u8,
    pub da: Option<u8>,
    pub data: Vec<u8>,
}

/// Result of feeding one frame, or of a sweep, to the engine.
#[derive(Debug, Default)]
pub struct TpOutcome {
    /// Frames the engine wants transmitted (CTS, EOM, RTS, DT, Abort).
    pub frames: Vec<CANFrame>,
    /// Messages that finished reassembling or transmitting this call.
    pub completed: Vec<ReassembledMessage>,
    /// Errors to forward to the engine's error sink. Never fatal.
    pub errors: Vec<TpError>,
}

enum Session {
    Bam(BamSession),
    RtsCts(RtsCtsSession),
}

/// Multi-packet reassembly and transmission engine.
///
/// Owns every in-progress BAM and RTS/CTS session. The caller is
/// responsible for routing only TP.CM (0xEC00) and TP.DT (0xEB00) frames
/// here and for building outgoing frames' 29-bit identifiers via
/// `j1939rt-proto`.
pub struct TpEngine {
    own_address: u8,
    sessions: HashMap<SessionKey, Session>,
}

impl TpEngine {
    pub fn new(own_address: u8) -> Self {
        Self {
            own_address,
            sessions: HashMap::new(),
        }
    }

    /// Begin a BAM broadcast. BAM has no flow control, so this returns the
    /// full set of outgoing frames immediately; no session bookkeeping is
    /// needed on the sending side.
    pub fn begin_bam_send(
        &self,
        pgn: u32,
        sa: u8,
        data: &[u8],
    ) -> Result<Vec<CANFrame>, TpError> {
        if data.len() > MAX_MESSAGE_LENGTH {
            return Err(TpError::InvalidPacket("message exceeds 1785 bytes"));
        }

        let packets = ((data.len() + 6) / 7) as u8;
        let cm = control::build_bam(data.len() as u16, packets, pgn);

        let mut frames = vec![build_tp_frame(j1939rt_proto::PGN_TP_CM, sa, 0xFF, &cm)];
        for (n, chunk) in data.chunks(7).enumerate() {
            let mut payload = [0xFFu8; 8];
            payload[0] = (n + 1) as u8;
            payload[1..1 + chunk.len()].copy_from_slice(chunk);
            frames.push(build_tp_frame(
                j1939rt_proto::PGN_TP_DT,
                sa,
                0xFF,
                &payload,
            ));
        }
        Ok(frames)
    }

    /// Begin an RTS/CTS point-to-point transfer. Returns the RTS frame;
    /// further frames are produced as `on_frame` processes the peer's CTS.
    pub fn begin_rts_send(
        &mut self,
        pgn: u32,
        sa: u8,
        da: u8,
        data: Vec<u8>,
        now_ms: u64,
    ) -> Result<Vec<CANFrame>, TpError> {
        if data.len() > MAX_MESSAGE_LENGTH {
            return Err(TpError::InvalidPacket("message exceeds 1785 bytes"));
        }

        let key = SessionKey::rts_cts(pgn, sa, da);
        if self.sessions.contains_key(&key) {
            return Err(TpError::InvalidPacket("already in session"));
        }

        let session = RtsCtsSession::new_sender(pgn, sa, da, data, 0xFF, now_ms);
        let rts = control::build_rts(
            session.message_length,
            session.number_of_packets,
            session.max_packets_per_cts,
            pgn,
        );
        let frame = build_tp_frame(j1939rt_proto::PGN_TP_CM, sa, da, &rts);
        self.sessions.insert(key, Session::RtsCts(session));
        Ok(vec![frame])
    }

    /// Feed one incoming frame (already identified as TP.CM or TP.DT) to
    /// the engine.
    pub fn on_frame(&mut self, frame: &CANFrame, now_ms: u64) -> TpOutcome {
        let parsed = j1939rt_proto::parse(frame.id());

        match parsed.pgn {
            p if p == j1939rt_proto::PGN_TP_CM => self.on_control_frame(&parsed, frame, now_ms),
            p if p == j1939rt_proto::PGN_TP_DT => self.on_data_frame(&parsed, frame, now_ms),
            _ => TpOutcome::default(),
        }
    }

    fn on_control_frame(
        &mut self,
        parsed: &j1939rt_proto::ParsedJ1939Id,
        frame: &CANFrame,
        now_ms: u64,
    ) -> TpOutcome {
        let data = frame.data();
        if data.len() < 8 {
            return TpOutcome {
                errors: vec![TpError::InvalidPacket("TP.CM frame shorter than 8 bytes")],
                ..Default::default()
            };
        }

        let sa = parsed.sa;
        match ControlMessage::from_byte(data[0]) {
            Some(ControlMessage::BroadcastAnnounce) => self.on_bam(data, sa, now_ms),
            Some(ControlMessage::RequestToSend) => {
                self.on_rts(data, sa, parsed.destination_address(), now_ms)
            }
            Some(ControlMessage::ClearToSend) => self.on_cts(data, sa, now_ms),
            Some(ControlMessage::EndOfMessageAck) => self.on_eom(data, sa, now_ms),
            Some(ControlMessage::Abort) => self.on_abort(data, sa),
            None => TpOutcome {
                errors: vec![TpError::InvalidPacket("unrecognized TP.CM control byte")],
                ..Default::default()
            },
        }
    }

    fn on_bam(&mut self, data: &[u8], sa: u8, now_ms: u64) -> TpOutcome {
        let announce = match control::parse_announce(data) {
            Some(a) => a,
            None => {
                return TpOutcome {
                    errors: vec![TpError::InvalidPacket("malformed BAM")],
                    ..Default::default()
                }
            }
        };
        let ConnectionAnnounce {
            message_length,
            number_of_packets,
            pgn,
            ..
        } = announce;

        let key = SessionKey::bam(pgn, sa);
        if self.sessions.contains_key(&key) {
            log::debug!("replacing in-progress BAM session for pgn={:#x} sa={:#x}", pgn, sa);
        }
        self.sessions.insert(
            key,
            Session::Bam(BamSession::new(
                pgn,
                sa,
                message_length,
                number_of_packets,
                now_ms,
            )),
        );
        TpOutcome::default()
    }

    fn on_rts(&mut self, data: &[u8], sa: u8, da: Option<u8>, now_ms: u64) -> TpOutcome {
        let announce = match control::parse_announce(data) {
            Some(a) => a,
            None => {
                return TpOutcome {
                    errors: vec![TpError::InvalidPacket("malformed RTS")],
                    ..Default::default()
                }
            }
        };
        let da = da.unwrap_or(self.own_address);
        let key = SessionKey::rts_cts(announce.pgn, sa, da);

        if self.sessions.contains_key(&key) {
            let abort = control::build_abort(announce.pgn, 0xFF);
            return TpOutcome {
                frames: vec![build_tp_frame(j1939rt_proto::PGN_TP_CM, da, sa, &abort)],
                errors: vec![TpError::InvalidPacket("already in session")],
                ..Default::default()
            };
        }

        let session = RtsCtsSession::new_receiver(
            announce.pgn,
            sa,
            da,
            announce.message_length,
            announce.number_of_packets,
            now_ms,
        );
        let cts = control::build_cts(1, session.number_of_packets, announce.pgn);
        self.sessions.insert(key, Session::RtsCts(session));

        TpOutcome {
            frames: vec![build_tp_frame(j1939rt_proto::PGN_TP_CM, da, sa, &cts)],
            ..Default::default()
        }
    }

    fn on_cts(&mut self, data: &[u8], sa: u8, now_ms: u64) -> TpOutcome {
        let ClearToSend {
            next_packet,
            count,
            pgn,
        } = match control::parse_cts(data) {
            Some(c) => c,
            None => {
                return TpOutcome {
                    errors: vec![TpError::InvalidPacket("malformed CTS")],
                    ..Default::default()
                }
            }
        };

        // We are the destination (peer's SA is our session's `da`), and our
        // own SA is the session's `sa` — find by matching on the field that
        // identifies us as the sender role.
        let key = self
            .sessions
            .iter()
            .find_map(|(k, s)| match s {
                Session::RtsCts(rc) if rc.pgn == pgn && rc.da == sa && rc.role == Role::Sender => {
                    Some(*k)
                }
                _ => None,
            });

        let Some(key) = key else {
            return TpOutcome::default();
        };

        let Some(Session::RtsCts(session)) = self.sessions.get_mut(&key) else {
            return TpOutcome::default();
        };

        session.last_activity_ms = now_ms;
        session.awaiting_first_cts = false;
        session.state = RtsCtsState::Transferring;
        session.next_packet = next_packet;

        let mut frames = Vec::new();
        for i in 0..count {
            let packet = next_packet + i;
            if packet > session.number_of_packets {
                break;
            }
            let offset = (packet as usize - 1) * 7;
            let mut payload = [0u8; 8];
            payload[0] = packet;
            payload[1..8].copy_from_slice(&session.data[offset..offset + 7]);
            frames.push(build_tp_frame(
                j1939rt_proto::PGN_TP_DT,
                session.sa,
                session.da,
                &payload,
            ));
        }

        let last_sent = next_packet + count.saturating_sub(1);
        if last_sent >= session.number_of_packets {
            session.state = RtsCtsState::AwaitingEom;
        } else {
            session.state = RtsCtsState::AwaitingCts;
            session.next_packet = last_sent + 1;
        }

        TpOutcome {
            frames,
            ..Default::default()
        }
    }

    fn on_eom(&mut self, data: &[u8], sa: u8, now_ms: u64) -> TpOutcome {
        let pgn = control::parse_embedded_pgn(data);
        let key = self.sessions.iter().find_map(|(k, s)| match s {
            Session::RtsCts(rc) if rc.pgn == pgn && rc.da == sa && rc.role == Role::Sender => {
                Some(*k)
            }
            _ => None,
        });

        let Some(key) = key else {
            return TpOutcome::default();
        };

        if let Some(Session::RtsCts(session)) = self.sessions.get_mut(&key) {
            session.last_activity_ms = now_ms;
            session.state = RtsCtsState::Complete;
            let message = ReassembledMessage {
                pgn: session.pgn,
                sa: session.sa,
                da: Some(session.da),
                data: session.assembled(),
            };
            self.sessions.remove(&key);
            return TpOutcome {
                completed: vec![message],
                ..Default::default()
            };
        }
        TpOutcome::default()
    }

    fn on_abort(&mut self, data: &[u8], sa: u8) -> TpOutcome {
        let pgn = control::parse_embedded_pgn(data);
        self.sessions.retain(|k, s| {
            let matches = match s {
                Session::Bam(b) => b.pgn == pgn && b.sa == sa,
                Session::RtsCts(rc) => rc.pgn == pgn && (rc.sa == sa || rc.da == sa),
            };
            !(matches && (k.pgn == pgn))
        });
        TpOutcome::default()
    }

    fn on_data_frame(
        &mut self,
        _parsed: &j1939rt_proto::ParsedJ1939Id,
        frame: &CANFrame,
        now_ms: u64,
    ) -> TpOutcome {
        let data = frame.data();
        if data.is_empty() {
            return TpOutcome {
                errors: vec![TpError::InvalidPacket("empty TP.DT frame")],
                ..Default::default()
            };
        }
        let sequence = data[0];
        let sa = j1939rt_proto::parse(frame.id()).sa;

        // Try a matching BAM session first, then an RTS/CTS receiver session.
        if let Some(key) = self
            .sessions
            .iter()
            .find_map(|(k, s)| matches!(s, Session::Bam(b) if b.sa == sa).then_some(*k))
        {
            return self.feed_bam_packet(key, sequence, data, now_ms);
        }

        if let Some(key) = self.sessions.iter().find_map(|(k, s)| match s {
            Session::RtsCts(rc) if rc.sa == sa && rc.role == Role::Receiver => Some(*k),
            _ => None,
        }) {
            return self.feed_rts_packet(key, sequence, data, now_ms);
        }

        TpOutcome::default()
    }

    fn feed_bam_packet(&mut self, key: SessionKey, sequence: u8, data: &[u8], now_ms: u64) -> TpOutcome {
        let Some(Session::Bam(session)) = self.sessions.get_mut(&key) else {
            return TpOutcome::default();
        };

        if sequence == 0 || sequence > session.number_of_packets {
            return TpOutcome {
                errors: vec![TpError::InvalidPacket("sequence number out of range")],
                ..Default::default()
            };
        }

        let mut chunk = [0u8; 7];
        let n = (data.len() - 1).min(7);
        chunk[..n].copy_from_slice(&data[1..1 + n]);
        session.received.insert(sequence, chunk);
        session.last_activity_ms = now_ms;

        if session.is_complete() {
            let message = ReassembledMessage {
                pgn: session.pgn,
                sa: session.sa,
                da: None,
                data: session.assemble(),
            };
            self.sessions.remove(&key);
            return TpOutcome {
                completed: vec![message],
                ..Default::default()
            };
        }
        TpOutcome::default()
    }

    fn feed_rts_packet(
        &mut self,
        key: SessionKey,
        sequence: u8,
        data: &[u8],
        now_ms: u64,
    ) -> TpOutcome {
        let Some(Session::RtsCts(session)) = self.sessions.get_mut(&key) else {
            return TpOutcome::default();
        };

        if sequence == 0 || sequence > session.number_of_packets {
            return TpOutcome {
                errors: vec![TpError::InvalidPacket("sequence number out of range")],
                ..Default::default()
            };
        }

        let offset = (sequence as usize - 1) * 7;
        let n = (data.len() - 1).min(7);
        session.data[offset..offset + n].copy_from_slice(&data[1..1 + n]);
        session.last_activity_ms = now_ms;
        session.next_packet = sequence + 1;

        if sequence >= session.number_of_packets {
            let message = ReassembledMessage {
                pgn: session.pgn,
                sa: session.sa,
                da: Some(session.da),
                data: session.assembled(),
            };
            let eom = control::build_eom_ack(
                session.message_length,
                session.number_of_packets,
                session.pgn,
            );
            let frame = build_tp_frame(j1939rt_proto::PGN_TP_CM, session.da, session.sa, &eom);
            self.sessions.remove(&key);
            return TpOutcome {
                frames: vec![frame],
                completed: vec![message],
                ..Default::default()
            };
        }

        TpOutcome::default()
    }

    /// Periodic sweep: remove any session whose governing timer (or the
    /// hard `MAX_ASSEMBLY_TIME` ceiling) has elapsed, and emit one error
    /// per removed session.
    pub fn sweep(&mut self, now_ms: u64) -> TpOutcome {
        let mut outcome = TpOutcome::default();
        let mut stale = Vec::new();

        for (key, session) in self.sessions.iter() {
            let (created_at, last_activity, governing) = match session {
                Session::Bam(b) => (b.created_at_ms, b.last_activity_ms, T1),
                Session::RtsCts(rc) => {
                    let timer = match rc.state {
                        RtsCtsState::AwaitingCts if rc.awaiting_first_cts => T3,
                        RtsCtsState::AwaitingCts => T4,
                        RtsCtsState::AwaitingEom => T2,
                        RtsCtsState::Transferring => T1,
                        RtsCtsState::Complete | RtsCtsState::Aborted => Duration::ZERO,
                    };
                    (rc.created_at_ms, rc.last_activity_ms, timer)
                }
            };

            let elapsed = now_ms.saturating_sub(last_activity);
            let total_elapsed = now_ms.saturating_sub(created_at);

            let timed_out = elapsed > governing.as_millis() as u64
                || total_elapsed > MAX_ASSEMBLY_TIME.as_millis() as u64;

            if timed_out {
                let error = match session {
                    Session::Bam(b) => TpError::BamTimeout { pgn: b.pgn, sa: b.sa },
                    Session::RtsCts(rc) => match rc.state {
                        RtsCtsState::AwaitingCts if rc.awaiting_first_cts => TpError::RtsTimeout {
                            pgn: rc.pgn,
                            sa: rc.sa,
                            da: rc.da,
                        },
                        _ => TpError::CtsTimeout {
                            pgn: rc.pgn,
                            sa: rc.sa,
                            da: rc.da,
                        },
                    },
                };
                stale.push(*key);
                outcome.errors.push(error);
            }
        }

        for key in stale {
            self.sessions.remove(&key);
        }

        outcome
    }

    /// Number of sessions currently tracked. Exposed for tests/diagnostics.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// State of an in-progress RTS/CTS session, if any, keyed by
    /// `(pgn, sa, da)`. Exposed for tests observing sender-side transitions.
    pub fn rts_cts_state(&self, pgn: u32, sa: u8, da: u8) -> Option<RtsCtsState> {
        match self.sessions.get(&SessionKey::rts_cts(pgn, sa, da))? {
            Session::RtsCts(rc) => Some(rc.state),
            Session::Bam(_) => None,
        }
    }
}

fn build_tp_frame(pgn: u32, sa: u8, da: u8, data: &[u8; 8]) -> CANFrame {
    let id = j1939rt_proto::build(&j1939rt_proto::BuildJ1939Id {
        priority: 7,
        pgn,
        sa,
        da,
    })
    .expect("TP PGNs are within the 18-bit range");
    CANFrame::new_j1939(id, data.to_vec()).expect("8-byte TP frame is always valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    const EEC1: u32 = 0xF004;

    #[test]
    fn bam_reassembles_a_fifty_byte_broadcast() {
        let sender = TpEngine::new(0x01);
        let payload: Vec<u8> = (0..50).collect();
        let frames = sender.begin_bam_send(EEC1, 0x01, &payload).unwrap();
        assert_eq!(frames.len(), 1 + 8); // ceil(50/7) == 8 data packets

        let mut receiver = TpEngine::new(0xFF);
        let mut reassembled = None;
        for (i, frame) in frames.iter().enumerate() {
            let outcome = receiver.on_frame(frame, i as u64 * 10);
            assert!(outcome.errors.is_empty());
            if let Some(message) = outcome.completed.into_iter().next() {
                reassembled = Some(message);
            }
        }

        let message = reassembled.expect("reassembly should complete on the last data packet");
        assert_eq!(message.pgn, EEC1);
        assert_eq!(message.sa, 0x01);
        assert_eq!(message.da, None);
        assert_eq!(message.data, payload);
        assert_eq!(receiver.session_count(), 0);
    }

    #[test]
    fn rts_cts_transitions_through_full_handshake() {
        let mut sender = TpEngine::new(0x01);
        let mut receiver = TpEngine::new(0x02);
        let payload: Vec<u8> = (0..20).collect();

        let rts_frames = sender.begin_rts_send(EEC1, 0x01, 0x02, payload.clone(), 0).unwrap();
        assert_eq!(rts_frames.len(), 1);
        assert_eq!(
            sender.rts_cts_state(EEC1, 0x01, 0x02),
            Some(RtsCtsState::AwaitingCts)
        );

        let cts_outcome = receiver.on_frame(&rts_frames[0], 0);
        assert_eq!(cts_outcome.frames.len(), 1);
        assert_eq!(
            receiver.rts_cts_state(EEC1, 0x01, 0x02),
            Some(RtsCtsState::Transferring)
        );

        let dt_outcome = sender.on_frame(&cts_outcome.frames[0], 10);
        assert_eq!(dt_outcome.frames.len(), 3); // ceil(20/7) == 3 packets
        assert_eq!(
            sender.rts_cts_state(EEC1, 0x01, 0x02),
            Some(RtsCtsState::AwaitingEom)
        );

        let mut completed = None;
        let mut eom_frame = None;
        for frame in &dt_outcome.frames {
            let outcome = receiver.on_frame(frame, 20);
            if !outcome.completed.is_empty() {
                completed = outcome.completed.into_iter().next();
                eom_frame = outcome.frames.into_iter().next();
            }
        }

        let message = completed.expect("receiver completes on the last data packet");
        assert_eq!(message.data, payload);
        assert_eq!(receiver.rts_cts_state(EEC1, 0x01, 0x02), None);

        let eom_outcome = sender.on_frame(&eom_frame.expect("EOM is sent"), 30);
        assert_eq!(eom_outcome.completed.len(), 1);
        assert_eq!(sender.rts_cts_state(EEC1, 0x01, 0x02), None);
    }

    #[test]
    fn duplicate_bam_replaces_prior_session() {
        let mut receiver = TpEngine::new(0xFF);
        let first = TpEngine::new(0x01)
            .begin_bam_send(EEC1, 0x01, &[0u8; 20])
            .unwrap();
        receiver.on_frame(&first[0], 0);
        assert_eq!(receiver.session_count(), 1);

        let second = TpEngine::new(0x01)
            .begin_bam_send(EEC1, 0x01, &[1u8; 20])
            .unwrap();
        let outcome = receiver.on_frame(&second[0], 100);
        assert!(outcome.errors.is_empty());
        assert_eq!(receiver.session_count(), 1);

        let mut completed = None;
        for frame in &second[1..] {
            let outcome = receiver.on_frame(frame, 100);
            if !outcome.completed.is_empty() {
                completed = outcome.completed.into_iter().next();
            }
        }
        assert_eq!(completed.unwrap().data, vec![1u8; 20]);
    }

    #[test]
    fn rts_from_already_in_session_peer_is_rejected_with_abort() {
        let cm = control::build_rts(10, 2, 0xFF, EEC1);
        let rts = build_tp_frame(j1939rt_proto::PGN_TP_CM, 0x01, 0x02, &cm);

        let mut receiver = TpEngine::new(0x02);
        receiver.on_frame(&rts, 0);
        let second = receiver.on_frame(&rts, 10);

        assert_eq!(second.frames.len(), 1);
        assert!(!second.errors.is_empty());
        assert_eq!(receiver.session_count(), 1);
    }

    #[test]
    fn bam_timeout_is_reported_after_t1_elapses_with_no_data() {
        let mut receiver = TpEngine::new(0xFF);
        let cm = control::build_bam(20, 3, EEC1);
        let frame = build_tp_frame(j1939rt_proto::PGN_TP_CM, 0x01, 0xFF, &cm);
        receiver.on_frame(&frame, 0);
        assert_eq!(receiver.session_count(), 1);

        let before = receiver.sweep(T1.as_millis() as u64 - 1);
        assert!(before.errors.is_empty());
        assert_eq!(receiver.session_count(), 1);

        let after = receiver.sweep(T1.as_millis() as u64 + 1);
        assert_eq!(after.errors.len(), 1);
        assert!(matches!(after.errors[0], TpError::BamTimeout { pgn, sa } if pgn == EEC1 && sa == 0x01));
        assert_eq!(receiver.session_count(), 0);
    }
}
