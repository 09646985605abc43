use crate::peer::types::IceCandidate;
use tracing::{info, warn};

/// Counts of gathered candidates by type
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateTally {
    pub host: usize,
    pub srflx: usize,
    pub prflx: usize,
    pub relay: usize,
}

impl CandidateTally {
    pub fn record(&mut self, candidate: &IceCandidate) {
        match candidate.kind() {
            Some("host") => self.host += 1,
            Some("srflx") => self.srflx += 1,
            Some("prflx") => self.prflx += 1,
            Some("relay") => self.relay += 1,
            _ => {}
        }
    }

    pub fn total(&self) -> usize {
        self.host + self.srflx + self.prflx + self.relay
    }
}

/// Log the tally; a missing relay candidate means NAT traversal may fail.
pub fn report(tally: &CandidateTally) {
    info!(
        total = tally.total(),
        host = tally.host,
        srflx = tally.srflx,
        prflx = tally.prflx,
        relay = tally.relay,
        "candidate analysis"
    );
    if tally.relay == 0 {
        warn!("no TURN relay candidates found, connection through NAT may fail");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_counts_each_type() {
        let mut tally = CandidateTally::default();
        for candidate in [
            IceCandidate::new("candidate:1 1 udp 2130706431 192.168.0.2 50000 typ host"),
            IceCandidate::new("candidate:2 1 udp 1694498815 198.51.100.1 50000 typ srflx raddr 192.168.0.2 rport 50000"),
            IceCandidate::new("candidate:3 1 udp 16777215 203.0.113.5 3478 typ relay raddr 198.51.100.1 rport 50000"),
            IceCandidate::new("candidate:4 1 tcp 1518280447 192.168.0.2 9 typ host tcptype active"),
            IceCandidate::new("garbage"),
        ] {
            tally.record(&candidate);
        }
        report(&tally);
        assert_eq!(
            tally,
            CandidateTally {
                host: 2,
                srflx: 1,
                prflx: 0,
                relay: 1
            }
        );
        assert_eq!(tally.total(), 4);
    }
}
