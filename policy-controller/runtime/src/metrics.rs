use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

#[derive(Clone, Debug)]
pub struct ReconcileMetrics {
    reconciles: Family<OutcomeLabels, Counter>,
    matched: Family<PolicyLabels, Gauge>,
}

#[derive(Clone, Debug)]
pub struct AdmissionMetrics {
    decisions: Family<DecisionLabels, Counter>,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct OutcomeLabels {
    outcome: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct PolicyLabels {
    policy: String,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct DecisionLabels {
    decision: &'static str,
}

// === ReconcileMetrics ===

impl ReconcileMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let reconciles = Family::<OutcomeLabels, Counter>::default();
        reg.register(
            "reconcile",
            "Total number of policy reconciliations by outcome",
            reconciles.clone(),
        );

        let matched = Family::<PolicyLabels, Gauge>::default();
        reg.register(
            "reconcile_matched_namespaces",
            "Number of namespaces selected by each policy as of its last reconciliation",
            matched.clone(),
        );

        Self {
            reconciles,
            matched,
        }
    }

    pub(crate) fn outcome(&self, outcome: &'static str) {
        self.reconciles
            .get_or_create(&OutcomeLabels { outcome })
            .inc();
    }

    pub(crate) fn matched(&self, policy: &str, matched: u32) {
        self.matched
            .get_or_create(&PolicyLabels {
                policy: policy.to_string(),
            })
            .set(matched.into());
    }

    pub(crate) fn forget(&self, policy: &str) {
        self.matched.remove(&PolicyLabels {
            policy: policy.to_string(),
        });
    }

    #[cfg(test)]
    pub(crate) fn outcome_count(&self, outcome: &'static str) -> u64 {
        self.reconciles
            .get_or_create(&OutcomeLabels { outcome })
            .get()
    }

    #[cfg(test)]
    pub(crate) fn matched_count(&self, policy: &str) -> i64 {
        self.matched
            .get_or_create(&PolicyLabels {
                policy: policy.to_string(),
            })
            .get()
    }
}

// === AdmissionMetrics ===

impl AdmissionMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let decisions = Family::<DecisionLabels, Counter>::default();
        reg.register(
            "admission_decisions",
            "Total number of pod admission decisions by kind",
            decisions.clone(),
        );
        Self { decisions }
    }

    pub(crate) fn decision(&self, decision: &'static str) {
        self.decisions
            .get_or_create(&DecisionLabels { decision })
            .inc();
    }

    #[cfg(test)]
    pub(crate) fn decision_count(&self, decision: &'static str) -> u64 {
        self.decisions
            .get_or_create(&DecisionLabels { decision })
            .get()
    }
}
