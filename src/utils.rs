use std::str::FromStr;
use tokio::time::Duration;

/// Parses "20", "30s", "10m" or "5h". A bare number is seconds.
pub fn parse_duration_string(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    let Some(unit_char) = s.chars().last() else {
        return Err("Duration string cannot be empty".to_string());
    };

    let (value_str, multiplier) = match unit_char {
        '0'..='9' => (s, 1),
        's' => (&s[..s.len() - 1], 1),
        'm' => (&s[..s.len() - 1], 60),
        'h' => (&s[..s.len() - 1], 60 * 60),
        _ => {
            return Err(format!(
                "Unknown duration unit: '{}'. Use 's', 'm', or 'h'.",
                unit_char
            ))
        }
    };

    let value = u64::from_str(value_str)
        .map_err(|_| format!("Invalid numeric value in duration: '{}'", value_str))?;

    let secs = value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("Duration too large: '{}'", s))?;

    Ok(Duration::from_secs(secs))
}

/// Parses a boolean flag the way environment variables are usually written.
///
/// Accepts `true`/`false`, `1`/`0`, `yes`/`no` (case-insensitive).
pub fn parse_bool(s: &str) -> Result<bool, String> {
    match s.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(format!("Invalid boolean value: '{}'", other)),
    }
}

/// Parses a comma-separated header string with support for escaped commas.
///
/// Use `\,` to include a literal comma in a header value.
/// Example: "X-Tenant:acme,Accept:text/html\,application/json"
pub fn parse_headers_with_escapes(headers_str: &str) -> Vec<String> {
    let mut headers = Vec::new();
    let mut current = String::new();
    let mut chars = headers_str.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' if chars.peek() == Some(&',') => {
                chars.next();
                current.push(',');
            }
            ',' => {
                let header = std::mem::take(&mut current);
                if !header.trim().is_empty() {
                    headers.push(header);
                }
            }
            _ => current.push(ch),
        }
    }

    if !current.trim().is_empty() {
        headers.push(current);
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_with_and_without_units() {
        let cases = [
            ("20", 20),
            ("30s", 30),
            ("10m", 600),
            ("2h", 7200),
            ("  10m  ", 600),
        ];
        for (input, secs) in cases {
            assert_eq!(parse_duration_string(input), Ok(Duration::from_secs(secs)), "{:?}", input);
        }
    }

    #[test]
    fn duration_errors_name_the_problem() {
        let cases = [
            ("   ", "empty"),
            ("10d", "Unknown duration unit"),
            ("s", "Invalid numeric"),
            ("-5s", "Invalid numeric"),
            ("1.5m", "Invalid numeric"),
            ("6000000000000000h", "too large"),
        ];
        for (input, expected) in cases {
            let err = parse_duration_string(input).unwrap_err();
            assert!(err.contains(expected), "{:?} gave: {}", input, err);
        }
    }

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("TRUE"), Ok(true));
        assert_eq!(parse_bool("1"), Ok(true));
        assert_eq!(parse_bool(" no "), Ok(false));
        assert!(parse_bool("maybe").is_err());
    }

    #[test]
    fn parse_headers_with_escaped_comma() {
        let result = parse_headers_with_escapes("Connection:keep-alive,Keep-Alive:timeout=5\\,max=200");

        assert_eq!(result, vec!["Connection:keep-alive", "Keep-Alive:timeout=5,max=200"]);
    }

    #[test]
    fn parse_headers_keeps_backslash_not_before_comma() {
        let result = parse_headers_with_escapes("Path:C:\\Users\\test,Host:example.com");

        assert_eq!(result, vec!["Path:C:\\Users\\test", "Host:example.com"]);
    }

    #[test]
    fn parse_headers_skips_empty_segments() {
        let result = parse_headers_with_escapes("Header1:value1,  ,Header2:value2,");

        assert_eq!(result, vec!["Header1:value1", "Header2:value2"]);
    }
}
