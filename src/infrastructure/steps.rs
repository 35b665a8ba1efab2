//! Built-in simulated steps.
//!
//! These stand in for the real integrations (card networks, ledgers, case management) so the
//! engine can run end to end. Each one records its status in the variable bag; a few enforce
//! the business preconditions the downstream flows rely on.

use super::registry::StepRegistry;
use crate::domain::ports::Step;
use crate::domain::variables::TransactionVariables;
use crate::error::{ProcessingError, Result};
use async_trait::async_trait;
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;
use tracing::error;

const FRAUD_BLOCK_THRESHOLD: Decimal = dec!(50000);
const AUTO_REVIEW_LIMIT: Decimal = dec!(10000);
const EXECUTIVE_DENIAL_THRESHOLD: Decimal = dec!(100000);
const EXTREME_RISK_SCORE: i64 = 90;
const MAX_RISK_SCORE: i64 = 100;

fn amount(vars: &TransactionVariables) -> Decimal {
    vars.get_str("amount")
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(Decimal::ZERO)
}

fn lowercase(vars: &TransactionVariables, key: &str) -> String {
    vars.get_str(key).unwrap_or_default().to_lowercase()
}

async fn work(min_ms: u64, max_ms: u64) {
    let delay = rand::thread_rng().gen_range(min_ms..=max_ms);
    tokio::time::sleep(Duration::from_millis(delay)).await;
}

/// Step that does nothing but take a little time and record a status.
pub struct SimulatedStep {
    status_key: &'static str,
    status: &'static str,
}

impl SimulatedStep {
    pub fn new(status_key: &'static str, status: &'static str) -> Self {
        Self { status_key, status }
    }
}

#[async_trait]
impl Step for SimulatedStep {
    async fn run(&self, vars: &TransactionVariables) -> Result<()> {
        work(5, 20).await;
        vars.set(self.status_key, self.status);
        Ok(())
    }
}

pub struct FraudCheckStep;

#[async_trait]
impl Step for FraudCheckStep {
    async fn run(&self, vars: &TransactionVariables) -> Result<()> {
        work(5, 20).await;
        let amount = amount(vars);
        if amount >= FRAUD_BLOCK_THRESHOLD {
            vars.set("fraudCheckStatus", "FAILED");
            return Err(ProcessingError::business(
                "FRAUD_DETECTED",
                format!("Transaction of {} flagged as high fraud risk", amount),
            ));
        }
        vars.set("riskScore", fraud_risk_score(amount, &lowercase(vars, "vendorLocation")));
        vars.set("fraudCheckStatus", "PASSED");
        Ok(())
    }
}

/// Initial risk score from the amount and where the vendor operates.
fn fraud_risk_score(amount: Decimal, location: &str) -> i64 {
    let mut score = if amount >= dec!(10000) {
        30
    } else if amount >= dec!(5000) {
        20
    } else if amount >= dec!(1000) {
        10
    } else {
        0
    };
    if location.contains("international") {
        score += 15;
    }
    if location.contains("online") {
        score += 5;
    }
    score.min(MAX_RISK_SCORE)
}

/// Builds on the fraud check's `riskScore` with amount, customer and merchant category factors.
///
/// Scores of 90 and above block the transaction with `EXTREME_RISK`.
pub struct RiskAssessmentStep;

impl RiskAssessmentStep {
    fn score(vars: &TransactionVariables) -> i64 {
        let mut score = vars
            .get("riskScore")
            .and_then(|value| value.as_i64())
            .unwrap_or(0);
        let amount = amount(vars);
        score += if amount >= dec!(25000) {
            25
        } else if amount >= dec!(15000) {
            20
        } else if amount >= dec!(10000) {
            15
        } else {
            0
        };

        let customer = lowercase(vars, "customerName");
        if customer.contains("test") || customer.contains("demo") {
            score += 10;
        }

        score += match lowercase(vars, "vendorCategory").as_str() {
            "luxury goods" | "jewelry" | "electronics" => 15,
            "gambling" | "cryptocurrency" => 25,
            "cash advance" => 20,
            "gas station" | "grocery" => -5,
            _ => 0,
        };
        score.clamp(0, MAX_RISK_SCORE)
    }

    fn level(score: i64) -> &'static str {
        match score {
            80.. => "EXTREME",
            60..=79 => "HIGH",
            40..=59 => "MEDIUM",
            20..=39 => "LOW",
            _ => "MINIMAL",
        }
    }
}

#[async_trait]
impl Step for RiskAssessmentStep {
    async fn run(&self, vars: &TransactionVariables) -> Result<()> {
        work(10, 30).await;
        let score = Self::score(vars);
        if score >= EXTREME_RISK_SCORE {
            error!(risk_score = score, "Extreme risk detected");
            return Err(ProcessingError::business(
                "EXTREME_RISK",
                format!(
                    "Transaction blocked due to extreme risk assessment score: {}",
                    score
                ),
            ));
        }
        vars.set("comprehensiveRiskScore", score);
        vars.set("riskLevel", Self::level(score));
        vars.set("riskAssessmentStatus", "COMPLETED");
        if score >= 70 {
            vars.set("requiresManualReview", true);
        }
        if score >= 50 {
            vars.set("enhancedMonitoring", true);
        }
        Ok(())
    }
}

/// Approves adjustments up to the automatic review limit; larger ones wait for an executive.
pub struct ReviewStep;

#[async_trait]
impl Step for ReviewStep {
    async fn run(&self, vars: &TransactionVariables) -> Result<()> {
        work(5, 20).await;
        let status = if amount(vars).abs() <= AUTO_REVIEW_LIMIT {
            "APPROVED"
        } else {
            "PENDING_APPROVAL"
        };
        vars.set("reviewStatus", status);
        vars.set("reviewedBy", "SYSTEM_REVIEWER");
        Ok(())
    }
}

pub struct ExecutiveApprovalStep;

#[async_trait]
impl Step for ExecutiveApprovalStep {
    async fn run(&self, vars: &TransactionVariables) -> Result<()> {
        work(5, 20).await;
        if amount(vars).abs() >= EXECUTIVE_DENIAL_THRESHOLD {
            vars.set("executiveApprovalStatus", "DENIED");
            return Err(ProcessingError::business(
                "EXECUTIVE_APPROVAL_DENIED",
                "Amount exceeds executive approval authority",
            ));
        }
        vars.set("executiveApprovalStatus", "APPROVED");
        vars.set("reviewStatus", "APPROVED");
        Ok(())
    }
}

pub struct ApplyStep;

#[async_trait]
impl Step for ApplyStep {
    async fn run(&self, vars: &TransactionVariables) -> Result<()> {
        let review = vars.get_str("reviewStatus");
        if review.as_deref() != Some("APPROVED") {
            return Err(ProcessingError::business(
                "REVIEW_NOT_APPROVED",
                format!(
                    "Cannot apply adjustment - review not approved. Status: {}",
                    review.as_deref().unwrap_or("NONE")
                ),
            ));
        }
        work(5, 20).await;
        vars.set("applyStatus", "APPLIED");
        Ok(())
    }
}

pub struct DisputeStep;

#[async_trait]
impl Step for DisputeStep {
    async fn run(&self, vars: &TransactionVariables) -> Result<()> {
        if vars.get_str("investigationStatus").as_deref() != Some("COMPLETED") {
            return Err(ProcessingError::business(
                "INVESTIGATION_INCOMPLETE",
                "Cannot process dispute - investigation not completed",
            ));
        }
        work(5, 20).await;
        vars.set("disputeStatus", "SUBMITTED");
        Ok(())
    }
}

/// Registry holding every built-in step.
///
/// Steps are registered under their full names; the short forms used by the default flows are
/// aliases of the same instances.
pub fn builtin_registry() -> StepRegistry {
    StepRegistry::builder()
        .register(
            "purchaseAuthorization",
            SimulatedStep::new("authorizationStatus", "AUTHORIZED"),
        )
        .register(
            "purchaseSettlement",
            SimulatedStep::new("settlementStatus", "SETTLED"),
        )
        .register(
            "paymentValidation",
            SimulatedStep::new("validationStatus", "VALID"),
        )
        .register("paymentPosting", SimulatedStep::new("postingStatus", "POSTED"))
        .register(
            "refundValidation",
            SimulatedStep::new("refundValidationStatus", "VALID"),
        )
        .register("refundProcess", SimulatedStep::new("refundStatus", "REFUNDED"))
        .register(
            "chargebackInvestigate",
            SimulatedStep::new("investigationStatus", "COMPLETED"),
        )
        .register("notification", SimulatedStep::new("notificationStatus", "SENT"))
        .register("compliance", SimulatedStep::new("complianceStatus", "COMPLIANT"))
        .register("auditTrail", SimulatedStep::new("auditStatus", "COMPLETED"))
        .register("fraudCheck", FraudCheckStep)
        .register("riskAssessment", RiskAssessmentStep)
        .register("adjustmentReview", ReviewStep)
        .register("executiveApproval", ExecutiveApprovalStep)
        .register("adjustmentApply", ApplyStep)
        .register("chargebackDispute", DisputeStep)
        .alias("authorize", "purchaseAuthorization")
        .alias("settle", "purchaseSettlement")
        .alias("validate", "paymentValidation")
        .alias("post", "paymentPosting")
        .alias("investigate", "chargebackInvestigate")
        .alias("review", "adjustmentReview")
        .alias("apply", "adjustmentApply")
        .alias("dispute", "chargebackDispute")
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn vars_with_amount(amount: &str) -> TransactionVariables {
        let vars = TransactionVariables::new();
        vars.set("amount", amount);
        vars
    }

    #[tokio::test]
    async fn test_review_then_apply() {
        let vars = vars_with_amount("250.00");
        ReviewStep.run(&vars).await.unwrap();
        ApplyStep.run(&vars).await.unwrap();
        assert_eq!(vars.get_str("applyStatus").as_deref(), Some("APPLIED"));
    }

    #[tokio::test]
    async fn test_apply_without_approval_is_business_failure() {
        let vars = vars_with_amount("25000");
        ReviewStep.run(&vars).await.unwrap();

        let err = ApplyStep.run(&vars).await.unwrap_err();
        assert_eq!(err.violation().unwrap().code, "REVIEW_NOT_APPROVED");
        assert!(!vars.contains("applyStatus"));
    }

    #[tokio::test]
    async fn test_executive_approval_unblocks_apply() {
        let vars = vars_with_amount("25000");
        ReviewStep.run(&vars).await.unwrap();
        ExecutiveApprovalStep.run(&vars).await.unwrap();
        ApplyStep.run(&vars).await.unwrap();
    }

    #[tokio::test]
    async fn test_fraud_check_blocks_large_amounts() {
        let err = FraudCheckStep
            .run(&vars_with_amount("75000"))
            .await
            .unwrap_err();
        assert_eq!(err.violation().unwrap().code, "FRAUD_DETECTED");
    }

    #[tokio::test]
    async fn test_dispute_requires_investigation() {
        let vars = TransactionVariables::new();
        let err = DisputeStep.run(&vars).await.unwrap_err();
        assert_eq!(err.violation().unwrap().code, "INVESTIGATION_INCOMPLETE");

        vars.set("investigationStatus", "COMPLETED");
        DisputeStep.run(&vars).await.unwrap();
    }

    #[tokio::test]
    async fn test_fraud_check_scores_risk() {
        let vars = vars_with_amount("12000");
        vars.set("vendorLocation", "International Online Store");
        FraudCheckStep.run(&vars).await.unwrap();
        assert_eq!(vars.get("riskScore"), Some(serde_json::json!(50)));
        assert_eq!(vars.get_str("fraudCheckStatus").as_deref(), Some("PASSED"));
    }

    #[tokio::test]
    async fn test_risk_assessment_blocks_extreme_scores() {
        let vars = vars_with_amount("25000");
        vars.set("riskScore", 80);

        let err = RiskAssessmentStep.run(&vars).await.unwrap_err();
        assert_eq!(err.violation().unwrap().code, "EXTREME_RISK");
        assert!(err.to_string().contains("100"));
        assert!(!vars.contains("riskAssessmentStatus"));
    }

    #[tokio::test]
    async fn test_risk_assessment_levels() {
        let vars = vars_with_amount("50");
        vars.set("vendorCategory", "Grocery");
        RiskAssessmentStep.run(&vars).await.unwrap();
        assert_eq!(vars.get_str("riskLevel").as_deref(), Some("MINIMAL"));
        assert_eq!(vars.get("comprehensiveRiskScore"), Some(serde_json::json!(0)));
        assert_eq!(
            vars.get_str("riskAssessmentStatus").as_deref(),
            Some("COMPLETED")
        );

        let vars = vars_with_amount("15000");
        vars.set("riskScore", 30);
        vars.set("customerName", "Demo Customer");
        vars.set("vendorCategory", "jewelry");
        RiskAssessmentStep.run(&vars).await.unwrap();
        assert_eq!(vars.get("comprehensiveRiskScore"), Some(serde_json::json!(75)));
        assert_eq!(vars.get_str("riskLevel").as_deref(), Some("HIGH"));
        assert!(vars.contains("requiresManualReview"));
    }

    #[test]
    fn test_builtin_registry_covers_default_flows() {
        let registry = builtin_registry();
        for name in [
            "authorize",
            "settle",
            "refundvalidation",
            "AuditTrail",
            "dispute",
            "riskAssessment",
        ] {
            assert!(registry.contains(name), "{name}");
        }
    }

    #[test]
    fn test_short_names_alias_full_names() {
        let registry = builtin_registry();
        for (short, full) in [
            ("authorize", "purchaseAuthorization"),
            ("settle", "purchaseSettlement"),
            ("validate", "paymentValidation"),
            ("post", "paymentPosting"),
            ("investigate", "chargebackInvestigate"),
            ("review", "adjustmentReview"),
            ("apply", "adjustmentApply"),
            ("dispute", "chargebackDispute"),
        ] {
            let aliased = registry.resolve(short).unwrap();
            let target = registry.resolve(full).unwrap();
            assert!(Arc::ptr_eq(&aliased, &target), "{short} -> {full}");
        }
    }
}
