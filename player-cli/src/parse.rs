use crate::error::AppError;

/// Parses "90", "90s", "1.5m" or "2h" into seconds.
pub fn parse_time(time_str: &str) -> Result<f64, AppError> {
    let time_str = time_str.trim();
    if time_str.is_empty() {
        return Err(AppError::ParseError("Invalid format: empty string".to_string()));
    }

    if let Ok(seconds) = time_str.parse::<f64>() {
        return Ok(seconds);
    }

    let split_index = time_str
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit() && *c != '.')
        .map_or(time_str.len(), |(i, _)| i);
    let (numeric_part, unit_part) = time_str.split_at(split_index);

    let value = numeric_part
        .parse::<f64>()
        .map_err(|_| AppError::ParseError(format!("Invalid number in \"{time_str}\"")))?;

    match unit_part.trim().to_lowercase().as_str() {
        "s" => Ok(value),
        "m" => Ok(value * 60.0),
        "h" => Ok(value * 3600.0),
        unit => Err(AppError::ParseError(format!("Unknown time unit: {unit}"))),
    }
}

/// Splits a "Name: Value" header argument.
pub fn parse_header(header: &str) -> Result<(&str, &str), AppError> {
    header
        .split_once(':')
        .map(|(name, value)| (name.trim(), value.trim()))
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| AppError::InvalidInput(format!("Invalid header: {header}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_units() {
        assert_eq!(parse_time("90").unwrap(), 90.0);
        assert_eq!(parse_time("90s").unwrap(), 90.0);
        assert_eq!(parse_time("1.5m").unwrap(), 90.0);
        assert_eq!(parse_time(" 2h ").unwrap(), 7200.0);
        assert!(parse_time("").is_err());
        assert!(parse_time("5d").is_err());
        assert!(parse_time("m").is_err());
    }

    #[test]
    fn parses_headers() {
        assert_eq!(parse_header("Referer: http://a/").unwrap(), ("Referer", "http://a/"));
        assert!(parse_header("no-colon").is_err());
        assert!(parse_header(": value").is_err());
    }
}
