use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn validate_timestamp(t: Ms, what: &str) -> Result<(), EngineError> {
    if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&t) {
        return Err(EngineError::InvalidInput(format!("{what} out of range")));
    }
    Ok(())
}

pub(crate) fn validate_plate(raw: &str) -> Result<Plate, EngineError> {
    let plate = Plate::parse(raw).ok_or_else(|| EngineError::InvalidInput("empty plate".into()))?;
    if plate.as_str().len() > MAX_PLATE_LEN {
        return Err(EngineError::InvalidInput("plate too long".into()));
    }
    Ok(plate)
}

pub(crate) fn validate_space_code(code: &str) -> Result<(), EngineError> {
    if code.trim().is_empty() || code.trim() != code {
        return Err(EngineError::InvalidInput("malformed space code".into()));
    }
    if code.len() > MAX_SPACE_CODE_LEN {
        return Err(EngineError::InvalidInput("space code too long".into()));
    }
    Ok(())
}

pub(crate) fn validate_client(client: Option<&ClientRef>) -> Result<(), EngineError> {
    if let Some(c) = client
        && (c.is_empty() || c.len() > MAX_CLIENT_REF_LEN) {
            return Err(EngineError::InvalidInput("malformed client reference".into()));
        }
    Ok(())
}

pub(crate) fn validate_rate(rate: Money) -> Result<(), EngineError> {
    if rate <= 0 {
        return Err(EngineError::InvalidInput("hourly rate must be positive".into()));
    }
    if rate > MAX_HOURLY_RATE {
        return Err(EngineError::InvalidInput("hourly rate too large".into()));
    }
    Ok(())
}

/// Report windows are half-open, non-empty and bounded.
pub(crate) fn validate_window(from: Ms, to: Ms) -> Result<Span, EngineError> {
    if from >= to {
        return Err(EngineError::InvalidInput("report range must satisfy from < to".into()));
    }
    if to - from > MAX_REPORT_WINDOW_MS {
        return Err(EngineError::InvalidInput("report range too wide".into()));
    }
    Ok(Span::new(from, to))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plates() {
        assert_eq!(validate_plate(" ab c1 ").unwrap().as_str(), "ABC1");
        assert!(validate_plate("   ").is_err());
        assert!(validate_plate(&"X".repeat(MAX_PLATE_LEN + 1)).is_err());
    }

    #[test]
    fn space_codes() {
        assert!(validate_space_code("A-01").is_ok());
        assert!(validate_space_code(" A-01").is_err());
        assert!(validate_space_code("").is_err());
        assert!(validate_space_code(&"A".repeat(MAX_SPACE_CODE_LEN + 1)).is_err());
    }

    #[test]
    fn rates() {
        assert!(validate_rate(1).is_ok());
        assert!(validate_rate(0).is_err());
        assert!(validate_rate(-5).is_err());
        assert!(validate_rate(MAX_HOURLY_RATE + 1).is_err());
    }

    #[test]
    fn windows() {
        assert!(validate_window(10, 10).is_err());
        assert!(validate_window(20, 10).is_err());
        assert!(validate_window(0, MAX_REPORT_WINDOW_MS + 1).is_err());
        assert_eq!(validate_window(0, DAY_MS).unwrap(), Span::new(0, DAY_MS));
    }

    #[test]
    fn timestamps() {
        assert!(validate_timestamp(1_700_000_000_000, "entry").is_ok());
        assert!(validate_timestamp(0, "entry").is_err());
    }
}
