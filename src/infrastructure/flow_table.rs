use crate::config::FlowTableConfig;
use crate::domain::ports::FlowResolver;
use crate::domain::transaction::{TransactionRequest, TransactionType};
use crate::error::{ProcessingError, Result};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Decision table mapping a transaction type (and whether it is high value) to a flow.
///
/// Stands in for the external rules engine. High-value requests use the `high_value` entry
/// when one exists and fall back to the standard flow otherwise.
pub struct StaticFlowTable {
    standard: HashMap<TransactionType, String>,
    high_value: HashMap<TransactionType, String>,
    high_value_threshold: Decimal,
}

impl StaticFlowTable {
    pub fn new(config: &FlowTableConfig, high_value_threshold: Decimal) -> Self {
        Self {
            standard: config.standard.clone(),
            high_value: config.high_value.clone(),
            high_value_threshold,
        }
    }
}

impl FlowResolver for StaticFlowTable {
    fn resolve_flow(
        &self,
        transaction_type: TransactionType,
        request: &TransactionRequest,
    ) -> Result<String> {
        let high_value = request
            .amount
            .is_some_and(|amount| amount > self.high_value_threshold);
        let flow = if high_value {
            self.high_value
                .get(&transaction_type)
                .or_else(|| self.standard.get(&transaction_type))
        } else {
            self.standard.get(&transaction_type)
        };
        flow.cloned().ok_or_else(|| {
            ProcessingError::InvalidFlow(format!(
                "No task flow configured for transaction type {}",
                transaction_type
            ))
        })
    }
}
