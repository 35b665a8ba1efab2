use crate::domain::transaction::TransactionRequest;
use crate::error::{ProcessingError, Result};
use std::io::{BufRead, BufReader, Read};

/// Reads transaction requests from a JSON-lines source, one request object per line.
///
/// Blank lines are skipped. A malformed line yields an error for that line only, so the
/// caller can report it and carry on with the rest of the stream.
pub struct RequestReader<R: Read> {
    reader: BufReader<R>,
}

impl<R: Read> RequestReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            reader: BufReader::new(source),
        }
    }

    /// Lazily parses requests, pairing each with its 1-based line number.
    pub fn requests(self) -> impl Iterator<Item = (usize, Result<TransactionRequest>)> {
        self.reader
            .lines()
            .enumerate()
            .map(|(index, line)| (index + 1, line))
            .filter(|(_, line)| !matches!(line, Ok(text) if text.trim().is_empty()))
            .map(|(number, line)| {
                let parsed = line
                    .map_err(ProcessingError::from)
                    .and_then(|text| Ok(serde_json::from_str::<TransactionRequest>(&text)?));
                (number, parsed)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reader_valid_stream() {
        let data = r#"{"transactionType":"PURCHASE","amount":"10.00","currency":"USD"}

{"transactionType":"refund","amount":5,"refundReason":"damaged"}
"#;
        let results: Vec<_> = RequestReader::new(data.as_bytes()).requests().collect();

        assert_eq!(results.len(), 2);
        let (line, first) = &results[0];
        assert_eq!(*line, 1);
        assert_eq!(first.as_ref().unwrap().amount, Some(dec!(10.00)));

        let (line, second) = &results[1];
        assert_eq!(*line, 3);
        assert_eq!(
            second.as_ref().unwrap().refund_reason.as_deref(),
            Some("damaged")
        );
    }

    #[test]
    fn test_reader_malformed_line() {
        let data = "{\"transactionType\":\"PAYMENT\",\"amount\":1}\nnot json\n";
        let results: Vec<_> = RequestReader::new(data.as_bytes()).requests().collect();

        assert!(results[0].1.is_ok());
        assert_eq!(results[1].0, 2);
        assert!(matches!(results[1].1, Err(ProcessingError::Json(_))));
    }
}
