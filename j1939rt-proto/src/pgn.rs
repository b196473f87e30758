//! Static, process-lifetime dictionary of known Parameter Groups.

use crate::id::{self, ParsedJ1939Id};

/// Metadata describing a known Parameter Group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PGNInfo {
    pub pgn: u32,
    pub name: &'static str,
    pub length: u8,
    pub description: &'static str,
}

/// The curated PGN dictionary required by the core stack. Kept as a flat
/// static table (mirrors the SPN table layout in the reference J1939 decoder
/// this was grounded on) rather than a lazily built map: the table is small,
/// read-only, and the process never mutates it.
pub static PGN_TABLE: &[PGNInfo] = &[
    PGNInfo {
        pgn: 0xF004,
        name: "EEC1",
        length: 8,
        description: "Electronic Engine Controller 1",
    },
    PGNInfo {
        pgn: 0xF001,
        name: "ETC1",
        length: 8,
        description: "Electronic Transmission Controller 1",
    },
    PGNInfo {
        pgn: 0xF003,
        name: "ETC1",
        length: 8,
        description: "Electronic Transmission Controller 1 (alt.)",
    },
    PGNInfo {
        pgn: 0xFEF1,
        name: "CCVS",
        length: 8,
        description: "Cruise Control / Vehicle Speed",
    },
    PGNInfo {
        pgn: 0xFEF2,
        name: "Fuel Rate",
        length: 4,
        description: "Fuel economy / fuel rate",
    },
    PGNInfo {
        pgn: 0xFEF5,
        name: "Engine Fluid Temp",
        length: 5,
        description: "Engine fluid level/pressure temperature",
    },
    PGNInfo {
        pgn: 0xFECA,
        name: "DM1",
        length: 8,
        description: "Active Diagnostic Trouble Codes",
    },
    PGNInfo {
        pgn: 0xFECB,
        name: "DM2",
        length: 8,
        description: "Previously Active Diagnostic Trouble Codes",
    },
    PGNInfo {
        pgn: 0xEE00,
        name: "Address Claimed",
        length: 8,
        description: "NAME used in network management address claiming",
    },
    PGNInfo {
        pgn: 0xEA00,
        name: "Request",
        length: 3,
        description: "Request for a specific PGN",
    },
    PGNInfo {
        pgn: 0xEC00,
        name: "TP.BAM",
        length: 8,
        description: "Transport Protocol Connection Management, Broadcast Announce Message",
    },
    PGNInfo {
        pgn: 0xEB00,
        name: "TP.DT",
        length: 8,
        description: "Transport Protocol Data Transfer",
    },
    PGNInfo {
        pgn: 0xED00,
        name: "TP.CM",
        length: 8,
        description: "Transport Protocol Connection Management",
    },
    PGNInfo {
        pgn: 0xFEEE,
        name: "ABS",
        length: 8,
        description: "Anti-lock Braking System, per-wheel speeds",
    },
    PGNInfo {
        pgn: 0xFEAE,
        name: "ASC2",
        length: 8,
        description: "Automatic/Anti-skid Control, brake system status",
    },
];

/// Look up dictionary metadata for a PGN. Unknown PGNs return `None`; callers
/// that need a display name should fall back to `"Unknown PGN"`.
pub fn lookup(pgn: u32) -> Option<&'static PGNInfo> {
    PGN_TABLE.iter().find(|info| info.pgn == pgn)
}

/// A decoded J1939 message: the parsed identifier fields plus the raw bytes
/// and dictionary name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    pub priority: u8,
    pub pgn: u32,
    pub sa: u8,
    pub da: Option<u8>,
    pub raw: Vec<u8>,
    pub name: &'static str,
}

/// Decode a raw CAN identifier and payload into a named J1939 message.
/// Unknown PGNs are decoded with `name = "Unknown PGN"` rather than failing.
pub fn decode(id: u32, data: &[u8]) -> DecodedMessage {
    let ParsedJ1939Id {
        priority, pgn, sa, ..
    } = id::parse(id);

    let name = lookup(pgn).map(|info| info.name).unwrap_or("Unknown PGN");

    DecodedMessage {
        priority,
        pgn,
        sa,
        da: id::parse(id).destination_address(),
        raw: data.to_vec(),
        name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_pgn_resolves_name() {
        assert_eq!(lookup(0xF004).unwrap().name, "EEC1");
        assert_eq!(lookup(0xEC00).unwrap().length, 8);
    }

    #[test]
    fn unknown_pgn_has_no_entry() {
        assert!(lookup(0x1234).is_none());
    }

    #[test]
    fn decode_unknown_pgn_reports_placeholder_name() {
        // PDU2 frame, pf=0x12 ps=0x34 -> pgn 0x1234, not in the dictionary.
        let id = id::build(&id::BuildJ1939Id {
            priority: 3,
            pgn: 0x1234,
            sa: 0x01,
            da: id::ADDRESS_GLOBAL,
        })
        .unwrap();
        let decoded = decode(id, &[0; 8]);
        assert_eq!(decoded.name, "Unknown PGN");
    }

    #[test]
    fn decode_eec1_reports_name_and_sa() {
        let id = id::build(&id::BuildJ1939Id {
            priority: 3,
            pgn: 0xF004,
            sa: 0x01,
            da: id::ADDRESS_GLOBAL,
        })
        .unwrap();
        let decoded = decode(id, &[0xE0, 0x2E, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(decoded.name, "EEC1");
        assert_eq!(decoded.sa, 0x01);
        assert_eq!(decoded.pgn, 0xF004);
    }
}
