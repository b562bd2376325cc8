//! Connection finite-state machine (FSM) types.
//!
//! This module defines every state a [`crate::connection::Connection`] can
//! occupy and which edges between them are legal.  The connection layer
//! drives the transitions; keeping the table here lets it assert legality on
//! every step and lets the table be tested without sockets.
//!
//! ```text
//!  client:  CLOSED ──SYN──▶ SYN_SENT ──SYN-ACK──▶ ESTABLISHED ──FIN──▶ FIN_WAIT ──FIN-ACK──▶ CLOSED
//!  server:  LISTEN ──SYN──▶ SYN_RCVD ──ACK──────▶ ESTABLISHED ──FIN──────────────────────▶ CLOSED
//! ```
//!
//! Timeouts in SYN_SENT / SYN_RCVD abort straight to CLOSED, as does an
//! exhausted teardown retry budget in FIN_WAIT.

use crate::packet::Flags;

/// Which end of the transfer a connection plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Active opener; sends the payload.
    Client,
    /// Passive opener; receives and reassembles the payload.
    Server,
}

/// All possible states of the connection FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection exists; initial client state and terminal state.
    #[default]
    Closed,
    /// Server waiting for a SYN.
    Listen,
    /// SYN has been sent; waiting for SYN-ACK.
    SynSent,
    /// SYN received; SYN-ACK sent; waiting for ACK.
    SynReceived,
    /// Three-way handshake complete; data transfer in progress.
    Established,
    /// Client sent FIN; waiting for the server's acknowledgement.
    FinWait,
}

impl ConnectionState {
    /// `true` when `self → next` is an edge of the DRTP state diagram.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Closed, SynSent)
                | (Closed, Listen)
                | (SynSent, Established)
                | (SynSent, Closed)
                | (Listen, SynReceived)
                | (SynReceived, Established)
                | (SynReceived, Closed)
                | (Established, FinWait)
                | (Established, Closed)
                | (FinWait, Closed)
        )
    }

    /// State reached when a control packet with `flags` arrives while in
    /// `self`, playing `role`.
    ///
    /// Returns `None` when the packet is not expected here; the caller logs
    /// and ignores it.
    pub fn on_control(self, role: Role, flags: Flags) -> Option<ConnectionState> {
        use ConnectionState::*;
        let Flags { syn, ack, fin } = flags;
        match (role, self) {
            (Role::Client, SynSent) if syn && ack && !fin => Some(Established),
            (Role::Client, FinWait) if ack && !syn => Some(Closed),
            (Role::Server, Listen) if syn && !ack && !fin => Some(SynReceived),
            (Role::Server, SynReceived) if ack && !syn && !fin => Some(Established),
            (Role::Server, Established) if fin && !syn && !ack => Some(Closed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Closed => "CLOSED",
            Self::Listen => "LISTEN",
            Self::SynSent => "SYN_SENT",
            Self::SynReceived => "SYN_RCVD",
            Self::Established => "ESTABLISHED",
            Self::FinWait => "FIN_WAIT",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{decode_flags, flags};

    const ALL: [ConnectionState; 6] = [
        ConnectionState::Closed,
        ConnectionState::Listen,
        ConnectionState::SynSent,
        ConnectionState::SynReceived,
        ConnectionState::Established,
        ConnectionState::FinWait,
    ];

    #[test]
    fn client_happy_path_is_legal() {
        use ConnectionState::*;
        let path = [Closed, SynSent, Established, FinWait, Closed];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn server_happy_path_is_legal() {
        use ConnectionState::*;
        let path = [Closed, Listen, SynReceived, Established, Closed];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn no_shortcuts_into_established() {
        use ConnectionState::*;
        for from in ALL {
            let legal = from.can_transition_to(Established);
            assert_eq!(legal, matches!(from, SynSent | SynReceived), "{from}");
        }
    }

    #[test]
    fn client_handshake_needs_syn_ack() {
        let s = ConnectionState::SynSent;
        let syn_ack = decode_flags(flags::SYN | flags::ACK);
        assert_eq!(
            s.on_control(Role::Client, syn_ack),
            Some(ConnectionState::Established)
        );
        assert_eq!(s.on_control(Role::Client, decode_flags(flags::SYN)), None);
        assert_eq!(s.on_control(Role::Client, decode_flags(flags::ACK)), None);
    }

    #[test]
    fn server_handshake_sequence() {
        let syn = decode_flags(flags::SYN);
        let ack = decode_flags(flags::ACK);
        let s = ConnectionState::Listen;
        let s = s.on_control(Role::Server, syn).unwrap();
        assert_eq!(s, ConnectionState::SynReceived);
        assert_eq!(s.on_control(Role::Server, ack), Some(ConnectionState::Established));
    }

    #[test]
    fn listen_ignores_everything_but_syn() {
        let s = ConnectionState::Listen;
        for raw in [flags::ACK, flags::FIN, flags::SYN | flags::ACK, 0] {
            assert_eq!(s.on_control(Role::Server, decode_flags(raw)), None);
        }
    }

    #[test]
    fn teardown_transitions() {
        let fin = decode_flags(flags::FIN);
        let fin_ack = decode_flags(flags::FIN | flags::ACK);
        assert_eq!(
            ConnectionState::Established.on_control(Role::Server, fin),
            Some(ConnectionState::Closed)
        );
        assert_eq!(
            ConnectionState::FinWait.on_control(Role::Client, fin_ack),
            Some(ConnectionState::Closed)
        );
        // A client never accepts a FIN while established.
        assert_eq!(ConnectionState::Established.on_control(Role::Client, fin), None);
    }

    #[test]
    fn every_control_result_is_a_legal_edge() {
        for from in ALL {
            for raw in 0u16..16 {
                for role in [Role::Client, Role::Server] {
                    if let Some(next) = from.on_control(role, decode_flags(raw)) {
                        assert!(from.can_transition_to(next), "{from} -> {next}");
                    }
                }
            }
        }
    }

    #[test]
    fn default_is_closed() {
        assert_eq!(ConnectionState::default(), ConnectionState::Closed);
        assert_eq!(ConnectionState::SynReceived.to_string(), "SYN_RCVD");
    }
}
