use crate::error::{ProcessingError, Result};
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    Purchase,
    Payment,
    Adjustment,
    Refund,
    Chargeback,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "PURCHASE",
            Self::Payment => "PAYMENT",
            Self::Adjustment => "ADJUSTMENT",
            Self::Refund => "REFUND",
            Self::Chargeback => "CHARGEBACK",
        }
    }

    /// Token returned to the caller on a successful pass, e.g. `PURCHASE_SUCCESS:TXN-1-1`.
    pub fn success_token(&self, transaction_id: &str) -> String {
        format!("{}_SUCCESS:{}", self.as_str(), transaction_id)
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = ProcessingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PURCHASE" => Ok(Self::Purchase),
            "PAYMENT" => Ok(Self::Payment),
            "ADJUSTMENT" => Ok(Self::Adjustment),
            "REFUND" => Ok(Self::Refund),
            "CHARGEBACK" => Ok(Self::Chargeback),
            _ => Err(ProcessingError::business(
                "INVALID_TRANSACTION_TYPE",
                format!("Unsupported transaction type: {}", s),
            )),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreditCardInfo {
    pub card_number: Option<String>,
    pub holder_name: Option<String>,
    pub expiry_date: Option<String>,
    pub card_type: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct VendorInfo {
    pub name: Option<String>,
    pub location: Option<String>,
    pub merchant_id: Option<String>,
    pub category: Option<String>,
}

/// A transaction submitted for processing.
///
/// Every field is optional on the wire; `validate` decides what is actually required so that
/// malformed input is rejected as a business violation instead of a decode failure.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    pub transaction_type: Option<String>,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub transaction_date_time: Option<NaiveDateTime>,
    pub credit_card_info: Option<CreditCardInfo>,
    pub billing_address: Option<Address>,
    pub vendor_info: Option<VendorInfo>,
    pub description: Option<String>,
    pub reference_number: Option<String>,
    pub original_transaction_id: Option<String>,
    pub refund_reason: Option<String>,
    pub chargeback_reason: Option<String>,
    pub chargeback_code: Option<String>,
    pub liability_shift: Option<bool>,
}

/// The fields of a request that passed validation.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct ValidatedRequest {
    pub transaction_type: TransactionType,
    pub amount: Decimal,
}

impl TransactionRequest {
    pub fn new(transaction_type: impl Into<String>, amount: Decimal) -> Self {
        Self {
            transaction_type: Some(transaction_type.into()),
            amount: Some(amount),
            ..Default::default()
        }
    }

    pub fn holder_name(&self) -> Option<&str> {
        self.credit_card_info
            .as_ref()
            .and_then(|card| card.holder_name.as_deref())
    }

    /// Parses the transaction type without requiring the rest of the request to be valid.
    pub fn parsed_type(&self) -> Option<TransactionType> {
        self.transaction_type
            .as_deref()
            .and_then(|raw| raw.parse().ok())
    }

    pub fn validate(&self) -> Result<ValidatedRequest> {
        let raw_type = match self.transaction_type.as_deref() {
            Some(raw) if !raw.trim().is_empty() => raw,
            _ => {
                return Err(ProcessingError::business(
                    "INVALID_TRANSACTION_TYPE",
                    "Transaction type is required",
                ));
            }
        };
        let amount = self.amount.ok_or_else(|| {
            ProcessingError::business("INVALID_AMOUNT", "Transaction amount is required")
        })?;
        Ok(ValidatedRequest {
            transaction_type: raw_type.parse()?,
            amount,
        })
    }
}
