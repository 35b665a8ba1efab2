use super::transaction::TransactionRequest;
use crate::error::ProcessingError;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The key/value bag shared by every step of one flow execution.
///
/// Cloning yields another handle onto the same bag, which is how parallel batch members get
/// access to it. Writes to distinct keys from concurrent steps never interfere; concurrent
/// writes to the same key resolve to whichever lands last.
#[derive(Debug, Clone, Default)]
pub struct TransactionVariables {
    values: Arc<DashMap<String, Value>>,
}

impl TransactionVariables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a bag with the request fields the steps read.
    pub fn from_request(request: &TransactionRequest) -> Self {
        let vars = Self::new();
        vars.set_opt("transactionType", request.transaction_type.clone());
        if let Some(amount) = request.amount {
            vars.set("amount", amount.to_string());
        }
        vars.set_opt("currency", request.currency.clone());
        if let Some(at) = request.transaction_date_time {
            vars.set("transactionDateTime", at.to_string());
        }
        vars.set_opt("description", request.description.clone());
        vars.set_opt("referenceNumber", request.reference_number.clone());

        if let Some(card) = &request.credit_card_info {
            vars.set_opt("cardNumber", card.card_number.clone());
            vars.set_opt("holderName", card.holder_name.clone());
            vars.set_opt("customerName", card.holder_name.clone());
            vars.set_opt("cardType", card.card_type.clone());
        }
        if let Some(address) = &request.billing_address {
            vars.set_opt("billingStreet", address.street.clone());
            vars.set_opt("billingCity", address.city.clone());
            vars.set_opt("billingState", address.state.clone());
            vars.set_opt("billingZip", address.zip_code.clone());
            vars.set_opt("country", address.country.clone());
        }
        if let Some(vendor) = &request.vendor_info {
            vars.set_opt("vendorName", vendor.name.clone());
            vars.set_opt("vendorLocation", vendor.location.clone());
            vars.set_opt("merchantId", vendor.merchant_id.clone());
            vars.set_opt("vendorCategory", vendor.category.clone());
        }

        vars.set_opt("originalTransactionId", request.original_transaction_id.clone());
        vars.set_opt("refundReason", request.refund_reason.clone());
        vars.set_opt("chargebackReason", request.chargeback_reason.clone());
        vars.set_opt("chargebackCode", request.chargeback_code.clone());
        if let Some(shift) = request.liability_shift {
            vars.set("liabilityShift", shift);
        }
        vars
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).map(|entry| entry.value().clone())
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.values
            .get(key)
            .and_then(|entry| entry.value().as_str().map(str::to_string))
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    fn set_opt(&self, key: &str, value: Option<String>) {
        if let Some(value) = value {
            self.set(key, value);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.values.remove(key).map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Point-in-time copy, sorted by key.
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.values
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Writes the failure markers downstream consumers inspect after a failed flow.
    pub fn record_failure(&self, err: &ProcessingError) {
        self.set("processingFailed", true);
        match err.violation() {
            Some(violation) => {
                self.set("businessRuleViolation", true);
                self.set("businessCode", violation.code.clone());
                self.set("failureReason", violation.reason.clone());
            }
            None => {
                self.set("systemError", true);
                self.set("failureReason", err.to_string());
            }
        }
        self.set("failureTimestamp", chrono::Utc::now().to_rfc3339());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::transaction::CreditCardInfo;
    use rust_decimal_macros::dec;

    #[test]
    fn test_last_writer_wins_and_case_sensitive() {
        let vars = TransactionVariables::new();
        vars.set("status", "PENDING");
        vars.set("status", "APPROVED");
        vars.set("Status", "OTHER");

        assert_eq!(vars.get_str("status").as_deref(), Some("APPROVED"));
        assert_eq!(vars.get_str("Status").as_deref(), Some("OTHER"));
        assert_eq!(vars.len(), 2);
    }

    #[test]
    fn test_clone_shares_bag() {
        let vars = TransactionVariables::new();
        let handle = vars.clone();
        handle.set("reviewStatus", "APPROVED");
        assert!(vars.contains("reviewStatus"));
    }

    #[test]
    fn test_from_request_seeds_fields() {
        let mut request = TransactionRequest::new("ADJUSTMENT", dec!(42.10));
        request.credit_card_info = Some(CreditCardInfo {
            holder_name: Some("Ann".into()),
            ..Default::default()
        });
        let vars = TransactionVariables::from_request(&request);

        assert_eq!(vars.get_str("transactionType").as_deref(), Some("ADJUSTMENT"));
        assert_eq!(vars.get_str("amount").as_deref(), Some("42.10"));
        assert_eq!(vars.get_str("customerName").as_deref(), Some("Ann"));
        assert!(!vars.contains("currency"));
    }

    #[test]
    fn test_record_business_failure() {
        let vars = TransactionVariables::new();
        vars.record_failure(&ProcessingError::business(
            "REVIEW_NOT_APPROVED",
            "Cannot apply adjustment - review not approved",
        ));

        assert_eq!(vars.get("businessRuleViolation"), Some(Value::Bool(true)));
        assert_eq!(vars.get_str("businessCode").as_deref(), Some("REVIEW_NOT_APPROVED"));
        assert!(!vars.contains("systemError"));
    }

    #[test]
    fn test_record_system_failure() {
        let vars = TransactionVariables::new();
        vars.record_failure(&ProcessingError::step("post", "ledger offline"));

        assert_eq!(vars.get("systemError"), Some(Value::Bool(true)));
        assert!(!vars.contains("businessCode"));
        assert!(vars.contains("failureTimestamp"));
    }

    #[tokio::test]
    async fn test_concurrent_disjoint_writes() {
        let vars = TransactionVariables::new();
        let mut handles = Vec::new();
        for i in 0..32 {
            let vars = vars.clone();
            handles.push(tokio::spawn(async move {
                for j in 0..50 {
                    vars.set(format!("step{}-{}", i, j), j);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(vars.len(), 32 * 50);
    }
}
