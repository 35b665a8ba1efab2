use crate::domain::outcome::{OutcomeStatus, TransactionOutcome};
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct OutcomeRow<'a> {
    transaction_id: &'a str,
    status: OutcomeStatus,
    business_code: Option<&'a str>,
    elapsed_ms: u64,
    result: String,
}

/// Writes one CSV row per transaction outcome.
pub struct OutcomeWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> OutcomeWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_outcome(&mut self, outcome: &TransactionOutcome) -> Result<()> {
        let row = match outcome {
            Ok(receipt) => OutcomeRow {
                transaction_id: &receipt.transaction_id,
                status: OutcomeStatus::Success,
                business_code: None,
                elapsed_ms: receipt.elapsed.as_millis() as u64,
                result: receipt.result.clone(),
            },
            Err(failure) => OutcomeRow {
                transaction_id: &failure.transaction_id,
                status: failure.status,
                business_code: failure.business_code(),
                elapsed_ms: failure.elapsed.as_millis() as u64,
                result: failure.message(),
            },
        };
        self.writer.serialize(row)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::outcome::{TransactionFailure, TransactionReceipt};
    use crate::error::ProcessingError;
    use std::time::Duration;

    #[test]
    fn test_writes_header_and_rows() {
        let mut buffer = Vec::new();
        {
            let mut writer = OutcomeWriter::new(&mut buffer);
            writer
                .write_outcome(&Ok(TransactionReceipt {
                    transaction_id: "TXN-1-1".into(),
                    result: "PURCHASE_SUCCESS:TXN-1-1".into(),
                    elapsed: Duration::from_millis(42),
                }))
                .unwrap();
            writer
                .write_outcome(&Err(TransactionFailure::new(
                    "TXN-1-2".into(),
                    ProcessingError::business("FRAUD_DETECTED", "flagged"),
                    Duration::from_millis(7),
                )))
                .unwrap();
            writer.flush().unwrap();
        }

        let output = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(
            lines,
            [
                "transaction_id,status,business_code,elapsed_ms,result",
                "TXN-1-1,success,,42,PURCHASE_SUCCESS:TXN-1-1",
                "TXN-1-2,business_rule_violation,FRAUD_DETECTED,7,flagged",
            ]
        );
    }
}
