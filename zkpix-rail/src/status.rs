//! Mapping of rail-specific status codes onto [`PaymentStatus`].

use zkpix_common::PaymentStatus;

/// Default codes the Inter banking API uses for a completed Pix.
pub const DEFAULT_SETTLED_STATUSES: &[&str] = &["CONCLUIDA", "PAGO", "EFETIVADO"];
/// Default codes that end a Pix without settlement.
pub const DEFAULT_FAILED_STATUSES: &[&str] = &[
    "NAO_REALIZADO",
    "CANCELADA",
    "CANCELADO",
    "DEVOLVIDA",
    "REJEITADO",
    "ERRO",
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusPolicy {
    settled: Vec<String>,
    failed: Vec<String>,
}

impl Default for StatusPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_SETTLED_STATUSES.iter().map(|s| s.to_string()),
            DEFAULT_FAILED_STATUSES.iter().map(|s| s.to_string()),
        )
    }
}

impl StatusPolicy {
    pub fn new(
        settled: impl IntoIterator<Item = String>,
        failed: impl IntoIterator<Item = String>,
    ) -> Self {
        let normalize = |s: String| s.trim().to_ascii_uppercase();
        Self {
            settled: settled.into_iter().map(normalize).collect(),
            failed: failed.into_iter().map(normalize).collect(),
        }
    }

    /// Build from comma separated lists, falling back to the defaults for `None`.
    pub fn from_lists(settled: Option<&str>, failed: Option<&str>) -> Self {
        let split = |list: &str| {
            list.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
        };
        let defaults = Self::default();
        Self {
            settled: settled.map(split).map_or(defaults.settled, |v| {
                v.into_iter().map(|s| s.to_ascii_uppercase()).collect()
            }),
            failed: failed.map(split).map_or(defaults.failed, |v| {
                v.into_iter().map(|s| s.to_ascii_uppercase()).collect()
            }),
        }
    }

    pub fn classify(&self, raw_status: &str) -> PaymentStatus {
        let code = raw_status.trim().to_ascii_uppercase();
        if self.settled.iter().any(|s| *s == code) {
            PaymentStatus::Settled
        } else if self.failed.iter().any(|s| *s == code) {
            PaymentStatus::Failed
        } else {
            PaymentStatus::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_classifies_inter_codes() {
        let policy = StatusPolicy::default();
        assert_eq!(policy.classify("CONCLUIDA"), PaymentStatus::Settled);
        assert_eq!(policy.classify("concluida "), PaymentStatus::Settled);
        assert_eq!(policy.classify("DEVOLVIDA"), PaymentStatus::Failed);
        assert_eq!(policy.classify("AGUARDANDO_APROVACAO"), PaymentStatus::Pending);
        assert_eq!(policy.classify(""), PaymentStatus::Pending);
    }

    #[test]
    fn lists_override_defaults() {
        let policy = StatusPolicy::from_lists(Some("paid, done"), None);
        assert_eq!(policy.classify("PAID"), PaymentStatus::Settled);
        assert_eq!(policy.classify("CONCLUIDA"), PaymentStatus::Pending);
        assert_eq!(policy.classify("ERRO"), PaymentStatus::Failed);
    }
}
