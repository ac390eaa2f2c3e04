//! Version negotiation: intersect locally-supported versions with a
//! peer's advertised set and pick the locally most-preferred one. Must
//! never select a weaker version when a stronger one is mutually
//! supported (downgrade resistance).

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    Legacy,
    NoiseIk,
}

impl ProtocolVersion {
    pub fn label(self) -> &'static str {
        match self {
            ProtocolVersion::Legacy => "legacy",
            ProtocolVersion::NoiseIk => "noise-ik",
        }
    }

    /// Strength ordering: higher is stronger/more preferred by default.
    fn rank(self) -> u8 {
        match self {
            ProtocolVersion::Legacy => 0,
            ProtocolVersion::NoiseIk => 1,
        }
    }
}

/// The capability list a peer advertises on first contact.
#[derive(Debug, Clone)]
pub struct VersionOffer {
    pub supported: Vec<ProtocolVersion>,
    pub preferred: ProtocolVersion,
}

impl VersionOffer {
    pub fn modern() -> Self {
        VersionOffer {
            supported: vec![ProtocolVersion::Legacy, ProtocolVersion::NoiseIk],
            preferred: ProtocolVersion::NoiseIk,
        }
    }

    pub fn legacy_only() -> Self {
        VersionOffer {
            supported: vec![ProtocolVersion::Legacy],
            preferred: ProtocolVersion::Legacy,
        }
    }
}

/// Intersect `local`'s supported set with `peer`'s, and pick the
/// strongest version `local` prefers among the intersection. Local
/// preference order is `local.supported` itself, ranked by
/// [`ProtocolVersion::rank`] so a peer can never talk a stronger local
/// endpoint down to a weaker version it also happens to support.
pub fn negotiate(local: &VersionOffer, peer_supported: &[ProtocolVersion]) -> Option<ProtocolVersion> {
    local
        .supported
        .iter()
        .copied()
        .filter(|v| peer_supported.contains(v))
        .max_by_key(|v| v.rank())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_noise_ik_when_both_support_it() {
        let local = VersionOffer::modern();
        let peer = vec![ProtocolVersion::Legacy, ProtocolVersion::NoiseIk];
        assert_eq!(negotiate(&local, &peer), Some(ProtocolVersion::NoiseIk));
    }

    #[test]
    fn falls_back_to_legacy_when_peer_lacks_noise_ik() {
        let local = VersionOffer::modern();
        let peer = vec![ProtocolVersion::Legacy];
        assert_eq!(negotiate(&local, &peer), Some(ProtocolVersion::Legacy));
    }

    #[test]
    fn no_intersection_fails_negotiation() {
        let local = VersionOffer {
            supported: vec![ProtocolVersion::NoiseIk],
            preferred: ProtocolVersion::NoiseIk,
        };
        let peer = vec![ProtocolVersion::Legacy];
        assert_eq!(negotiate(&local, &peer), None);
    }
}
