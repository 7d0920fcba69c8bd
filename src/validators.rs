//! Input validation for robofw
//!
//! Everything the user types is checked here before it reaches the engine, so
//! the reconciler only ever sees well-formed rules.

/// Maximum length the web service accepts for rule and template names.
pub const MAX_NAME_LEN: usize = 64;

/// TCP flag names the provider understands.
const TCP_FLAGS: [&str; 6] = ["syn", "fin", "rst", "psh", "urg", "ack"];

/// Validates a rule name.
///
/// Empty names are allowed (the provider accepts unnamed rules) but never take
/// part in name-based duplicate detection.
///
/// # Errors
///
/// Returns `Err` if the name is too long or contains control characters or
/// characters that break the form-encoded payload.
///
/// # Examples
///
/// ```
/// use robofw::validators::validate_rule_name;
///
/// assert!(validate_rule_name("Allow SSH from 203.0.113.5/32").is_ok());
/// assert!(validate_rule_name("bad\nname").is_err());
/// ```
pub fn validate_rule_name(input: &str) -> Result<String, String> {
    let trimmed = input.trim();

    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(format!("Name too long (max {MAX_NAME_LEN} characters)"));
    }

    // SECURITY: ASCII-only keeps names byte-for-byte stable across the form encoding
    if !trimmed.chars().all(|c| {
        c.is_ascii_alphanumeric()
            || matches!(c, ' ' | '-' | '_' | '.' | ':' | '/' | '(' | ')' | '#' | ',' | '+')
    }) {
        return Err("Name contains invalid characters".to_string());
    }

    Ok(trimmed.to_string())
}

/// Validates a template name. Unlike rule names it must not be empty.
///
/// # Errors
///
/// Returns `Err` if the name is empty or fails [`validate_rule_name`].
pub fn validate_template_name(input: &str) -> Result<String, String> {
    let name = validate_rule_name(input)?;
    if name.is_empty() {
        return Err("Template name cannot be empty".to_string());
    }
    Ok(name)
}

/// Validates a single port number.
///
/// # Errors
///
/// Returns `Err` if the text is not a number between 1 and 65535.
pub fn validate_port(text: &str) -> Result<u16, String> {
    match text.parse::<u16>() {
        Ok(0) | Err(_) => Err(format!("Port '{text}' must be between 1 and 65535")),
        Ok(port) => Ok(port),
    }
}

/// Validates a port specification: comma separated ports or `start-end` ranges.
///
/// Returns the canonical form with whitespace removed.
///
/// # Errors
///
/// Returns `Err` if the spec is empty, a port is out of range or a range is
/// reversed.
///
/// # Examples
///
/// ```
/// use robofw::validators::validate_port_spec;
///
/// assert_eq!(validate_port_spec("25, 465").unwrap(), "25,465");
/// assert_eq!(validate_port_spec("32768-65535").unwrap(), "32768-65535");
/// assert!(validate_port_spec("443-80").is_err());
/// ```
pub fn validate_port_spec(input: &str) -> Result<String, String> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err("Port specification cannot be empty".to_string());
    }

    for part in compact.split(',') {
        if let Some((start, end)) = part.split_once('-') {
            let start = validate_port(start)?;
            let end = validate_port(end)?;
            if start > end {
                return Err("Start port must be less than or equal to end port".to_string());
            }
        } else {
            validate_port(part)?;
        }
    }

    Ok(compact)
}

/// Validates a TCP flag expression such as `ack`, `syn|fin` or `syn&ack`.
///
/// Returns the canonical lowercase form.
///
/// # Errors
///
/// Returns `Err` on unknown flags, empty terms or mixed `|`/`&` operators.
pub fn validate_tcp_flags(input: &str) -> Result<String, String> {
    let compact: String = input
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase();

    if compact.is_empty() {
        return Err("TCP flags cannot be empty".to_string());
    }
    if compact.contains('|') && compact.contains('&') {
        return Err("TCP flags cannot mix '|' and '&'".to_string());
    }

    for flag in compact.split(['|', '&']) {
        if !TCP_FLAGS.contains(&flag) {
            return Err(format!(
                "Unknown TCP flag '{flag}' (expected one of {})",
                TCP_FLAGS.join(", ")
            ));
        }
    }

    Ok(compact)
}

/// Validates a server identifier: a server number or the server's main IP.
///
/// # Errors
///
/// Returns `Err` if the identifier is neither.
pub fn validate_server_id(input: &str) -> Result<String, String> {
    let trimmed = input.trim();
    if trimmed.parse::<u32>().is_ok() || trimmed.parse::<std::net::IpAddr>().is_ok() {
        Ok(trimmed.to_string())
    } else {
        Err(format!("'{trimmed}' is neither a server number nor an IP address"))
    }
}
