//! Proxy protocol version gating

/// The version the connected proxy advertises. The client gates optional
/// features on this rather than silently degrading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProxyProtocolVersion(pub u32);

/// An optional feature whose availability depends on the negotiated
/// protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// `truncate` requires version > 5.
    Truncate,
    /// Priming listeners over in-key-set filters with `lite=true` require
    /// version > 5 (priming events are not supported below that).
    PrimingOverKeySetFilter,
}

impl ProxyProtocolVersion {
    pub fn supports(&self, feature: Feature) -> bool {
        match feature {
            Feature::Truncate => self.0 > 5,
            Feature::PrimingOverKeySetFilter => self.0 > 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_at_exactly_five() {
        let v = ProxyProtocolVersion(5);
        assert!(!v.supports(Feature::Truncate));
        assert!(!v.supports(Feature::PrimingOverKeySetFilter));
    }

    #[test]
    fn test_gate_above_five() {
        let v = ProxyProtocolVersion(6);
        assert!(v.supports(Feature::Truncate));
        assert!(v.supports(Feature::PrimingOverKeySetFilter));
    }
}
