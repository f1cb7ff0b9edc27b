use serde::{Deserialize, Serialize};
use tdm_core::SourceKind;

/// Confidence weight per source kind, consumed by the fusion engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcePriority {
    pub database: f64,
    pub api: f64,
    pub ui: f64,
    pub test_case: f64,
    pub domain_pack: f64,
}

impl Default for SourcePriority {
    fn default() -> Self {
        Self {
            database: 1.0,
            api: 0.9,
            ui: 0.7,
            test_case: 0.7,
            domain_pack: 0.6,
        }
    }
}

impl SourcePriority {
    pub fn weight(&self, kind: SourceKind) -> f64 {
        match kind {
            SourceKind::Database => self.database,
            SourceKind::Api => self.api,
            SourceKind::Ui => self.ui,
            SourceKind::TestCase => self.test_case,
            SourceKind::DomainPack => self.domain_pack,
        }
    }

    /// Fixed tie-break rank, lower wins. UI and test cases share a rank.
    pub fn rank(kind: SourceKind) -> u8 {
        match kind {
            SourceKind::Database => 0,
            SourceKind::Api => 1,
            SourceKind::Ui | SourceKind::TestCase => 2,
            SourceKind::DomainPack => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_source_trust() {
        let priority = SourcePriority::default();
        assert_eq!(priority.weight(SourceKind::Database), 1.0);
        assert_eq!(priority.weight(SourceKind::DomainPack), 0.6);
        assert!(SourcePriority::rank(SourceKind::Api) < SourcePriority::rank(SourceKind::Ui));
        assert_eq!(
            SourcePriority::rank(SourceKind::Ui),
            SourcePriority::rank(SourceKind::TestCase)
        );
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let priority: SourcePriority = serde_json::from_str(r#"{"ui": 0.95}"#).expect("parse");
        assert_eq!(priority.ui, 0.95);
        assert_eq!(priority.api, 0.9);
    }
}
