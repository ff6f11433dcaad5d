//! Validation helpers for DTOs.

use indexmap::IndexMap;
use validator::ValidationError;

/// Highest score a survey metric accepts.
pub const MAX_METRIC_SCORE: u8 = 10;

/// Validates that a value fits on one line of a line-based log.
///
/// # Examples
///
/// ```ignore
/// validate_single_line("Alice")        // Ok
/// validate_single_line("Al\nice")      // Err - line break
/// validate_single_line("Alice,Scarlet") // Err - mapping delimiter
/// ```
pub fn validate_single_line(value: &str) -> Result<(), ValidationError> {
    if value.contains(['\n', '\r']) {
        let mut err = ValidationError::new("single_line");
        err.message = Some("Value must not contain line breaks".into());
        return Err(err);
    }

    if value.contains(',') {
        let mut err = ValidationError::new("reserved_character");
        err.message = Some("Value must not contain a comma".into());
        return Err(err);
    }

    Ok(())
}

/// Validates survey metric names and their 1 to [`MAX_METRIC_SCORE`] scores.
pub fn validate_metric_scores(metrics: &IndexMap<String, u8>) -> Result<(), ValidationError> {
    for (name, score) in metrics {
        if name.trim().is_empty() || name.contains(['\n', '\r', ':']) {
            let mut err = ValidationError::new("metric_name");
            err.message = Some(format!("Invalid metric name `{name}`").into());
            return Err(err);
        }
        if !(1..=MAX_METRIC_SCORE).contains(score) {
            let mut err = ValidationError::new("metric_score");
            err.message = Some(
                format!("Score of `{name}` must be between 1 and {MAX_METRIC_SCORE} (got {score})")
                    .into(),
            );
            return Err(err);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_single_line() {
        assert!(validate_single_line("Alice").is_ok());
        assert!(validate_single_line("Mary Ann").is_ok());
        assert!(validate_single_line("Al\nice").is_err());
        assert!(validate_single_line("Alice\r").is_err());
        assert!(validate_single_line("Alice,Scarlet").is_err());
    }

    #[test]
    fn test_validate_metric_scores() {
        let mut metrics = IndexMap::new();
        metrics.insert("human_likeness".to_string(), 7);
        assert!(validate_metric_scores(&metrics).is_ok());

        metrics.insert("fun".to_string(), 0);
        assert!(validate_metric_scores(&metrics).is_err());

        let mut bad_name = IndexMap::new();
        bad_name.insert("a:b".to_string(), 3);
        assert!(validate_metric_scores(&bad_name).is_err());
    }
}
