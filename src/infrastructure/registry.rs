use crate::domain::ports::{Step, StepRef};
use std::collections::HashMap;
use std::sync::Arc;

/// Closed mapping from step name to implementation, fixed at startup.
///
/// Lookups are case-insensitive so that `refundValidation`, `refundvalidation` and
/// `RefundValidation` resolve to the same step. An unregistered name yields `None`; the router
/// decides what to do about it.
#[derive(Clone, Default)]
pub struct StepRegistry {
    steps: HashMap<String, StepRef>,
}

impl StepRegistry {
    pub fn builder() -> StepRegistryBuilder {
        StepRegistryBuilder::default()
    }

    pub fn resolve(&self, name: &str) -> Option<StepRef> {
        self.steps.get(&normalize(name)).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.steps.contains_key(&normalize(name))
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Registered (normalized) names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.steps.keys().cloned().collect();
        names.sort();
        names
    }
}

#[derive(Default)]
pub struct StepRegistryBuilder {
    steps: HashMap<String, StepRef>,
}

impl StepRegistryBuilder {
    pub fn register<S: Step + 'static>(self, name: &str, step: S) -> Self {
        self.register_shared(name, Arc::new(step))
    }

    pub fn register_shared(mut self, name: &str, step: StepRef) -> Self {
        self.steps.insert(normalize(name), step);
        self
    }

    /// Makes `alias` resolve to whatever `target` resolves to. Unknown targets are ignored.
    pub fn alias(mut self, alias: &str, target: &str) -> Self {
        if let Some(step) = self.steps.get(&normalize(target)).cloned() {
            self.steps.insert(normalize(alias), step);
        }
        self
    }

    pub fn build(self) -> StepRegistry {
        StepRegistry { steps: self.steps }
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::variables::TransactionVariables;
    use crate::error::Result;
    use async_trait::async_trait;

    struct Marker(&'static str);

    #[async_trait]
    impl Step for Marker {
        async fn run(&self, vars: &TransactionVariables) -> Result<()> {
            vars.set("ran", self.0);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_resolve_is_case_insensitive() {
        let registry = StepRegistry::builder()
            .register("refundValidation", Marker("refund"))
            .build();

        let step = registry.resolve("REFUNDVALIDATION").unwrap();
        let vars = TransactionVariables::new();
        step.run(&vars).await.unwrap();
        assert_eq!(vars.get_str("ran").as_deref(), Some("refund"));
        assert!(registry.resolve("refundProcess").is_none());
    }

    #[test]
    fn test_alias() {
        let registry = StepRegistry::builder()
            .register("purchaseAuthorization", Marker("auth"))
            .alias("authorize", "purchaseAuthorization")
            .alias("ghost", "missing")
            .build();

        assert!(registry.contains("authorize"));
        assert!(!registry.contains("ghost"));
        assert_eq!(registry.names(), vec!["authorize", "purchaseauthorization"]);
    }
}
