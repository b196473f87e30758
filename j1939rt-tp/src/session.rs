use std::collections::HashMap;

/// Maximum payload a single TP session may carry.
pub const MAX_MESSAGE_LENGTH: usize = 1785;
/// `ceil(MAX_MESSAGE_LENGTH / 7)`.
pub const MAX_PACKETS: u8 = 255;

/// Session identity: `(pgn, sourceAddress[, destinationAddress])`.
/// BAM sessions carry `da = None`; RTS/CTS sessions always carry `Some`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub pgn: u32,
    pub sa: u8,
    pub da: Option<u8>,
}

impl SessionKey {
    pub fn bam(pgn: u32, sa: u8) -> Self {
        Self { pgn, sa, da: None }
    }

    pub fn rts_cts(pgn: u32, sa: u8, da: u8) -> Self {
        Self {
            pgn,
            sa,
            da: Some(da),
        }
    }
}

/// A Broadcast Announce Message reassembly in progress.
#[derive(Debug)]
pub struct BamSession {
    pub pgn: u32,
    pub sa: u8,
    pub message_length: u16,
    pub number_of_packets: u8,
    pub received: HashMap<u8, [u8; 7]>,
    pub created_at_ms: u64,
    pub last_activity_ms: u64,
}

impl BamSession {
    pub fn new(pgn: u32, sa: u8, message_length: u16, number_of_packets: u8, now_ms: u64) -> Self {
        Self {
            pgn,
            sa,
            message_length,
            number_of_packets,
            received: HashMap::new(),
            created_at_ms: now_ms,
            last_activity_ms: now_ms,
        }
    }

    pub fn is_complete(&self) -> bool {
        (1..=self.number_of_packets).all(|n| self.received.contains_key(&n))
    }

    pub fn assemble(&self) -> Vec<u8> {
        let mut buffer = vec![0u8; self.number_of_packets as usize * 7];
        for (n, chunk) in &self.received {
            let offset = (*n as usize - 1) * 7;
            buffer[offset..offset + 7].copy_from_slice(chunk);
        }
        buffer.truncate(self.message_length as usize);
        buffer
    }
}

/// Which side of an RTS/CTS exchange this session represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// We sent the RTS and are transmitting data.
    Sender,
    /// We received the RTS and are issuing CTS/accumulating data.
    Receiver,
}

/// RTS/CTS session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtsCtsState {
    AwaitingCts,
    Transferring,
    AwaitingEom,
    Complete,
    Aborted,
}

#[derive(Debug)]
pub struct RtsCtsSession {
    pub pgn: u32,
    pub sa: u8,
    pub da: u8,
    pub role: Role,
    pub state: RtsCtsState,
    pub message_length: u16,
    pub number_of_packets: u8,
    pub max_packets_per_cts: u8,
    /// Sender: data to transmit, padded to a multiple of 7 bytes.
    /// Receiver: accumulation buffer.
    pub data: Vec<u8>,
    /// Sender: next packet number to send when a CTS window opens.
    /// Receiver: next packet number expected.
    pub next_packet: u8,
    /// True while waiting for the *first* CTS after RTS (governs T3 instead
    /// of T4).
    pub awaiting_first_cts: bool,
    pub created_at_ms: u64,
    pub last_activity_ms: u64,
}

impl RtsCtsSession {
    pub fn new_sender(
        pgn: u32,
        sa: u8,
        da: u8,
        data: Vec<u8>,
        max_packets_per_cts: u8,
        now_ms: u64,
    ) -> Self {
        let number_of_packets = ((data.len() + 6) / 7) as u8;
        let message_length = data.len() as u16;
        let mut padded = data;
        padded.resize(number_of_packets as usize * 7, 0xFF);

        Self {
            pgn,
            sa,
            da,
            role: Role::Sender,
            state: RtsCtsState::AwaitingCts,
            message_length,
            number_of_packets,
            max_packets_per_cts,
            data: padded,
            next_packet: 1,
            awaiting_first_cts: true,
            created_at_ms: now_ms,
            last_activity_ms: now_ms,
        }
    }

    pub fn new_receiver(
        pgn: u32,
        sa: u8,
        da: u8,
        message_length: u16,
        number_of_packets: u8,
        now_ms: u64,
    ) -> Self {
        Self {
            pgn,
            sa,
            da,
            role: Role::Receiver,
            state: RtsCtsState::Transferring,
            message_length,
            number_of_packets,
            max_packets_per_cts: number_of_packets,
            data: vec![0u8; number_of_packets as usize * 7],
            next_packet: 1,
            awaiting_first_cts: false,
            created_at_ms: now_ms,
            last_activity_ms: now_ms,
        }
    }

    pub fn assembled(&self) -> Vec<u8> {
        let mut data = self.data.clone();
        data.truncate(self.message_length as usize);
        data
    }
}
