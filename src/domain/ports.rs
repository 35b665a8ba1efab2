use super::transaction::{TransactionRequest, TransactionType};
use super::variables::TransactionVariables;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// One named unit of work invoked by the router.
///
/// A step may read and write the shared variable bag. It reports expected rejections as
/// `ProcessingError::BusinessRule` and technical faults as any other variant.
#[async_trait]
pub trait Step: Send + Sync {
    async fn run(&self, vars: &TransactionVariables) -> Result<()>;
}

pub type StepRef = Arc<dyn Step>;

/// Source of flow specifications, normally backed by an external rules engine.
pub trait FlowResolver: Send + Sync {
    fn resolve_flow(
        &self,
        transaction_type: TransactionType,
        request: &TransactionRequest,
    ) -> Result<String>;
}

pub type FlowResolverBox = Box<dyn FlowResolver>;
