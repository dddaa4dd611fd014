//! Log masking helpers
//!
//! Account keys, pagination tokens, addresses and endpoint URLs are passed
//! through these before they reach a log line.

/// Keep the first and last two characters, star the rest
pub fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return value.to_string();
    }

    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{}{}{}", head, "*".repeat(chars.len() - 4), tail)
}

pub fn mask_account(account: &str) -> String {
    mask_secret(account)
}

pub fn mask_token(token: &str) -> String {
    mask_secret(token)
}

/// `10.1.2.3` -> `10.***.***.3`; anything that isn't dotted quad is returned as is
pub fn mask_ip(ip: &str) -> String {
    let parts: Vec<&str> = ip.split('.').collect();
    if parts.len() == 4 {
        format!("{}.***.***.{}", parts[0], parts[3])
    } else {
        ip.to_string()
    }
}

/// Strip path and query, keeping only scheme and host
pub fn mask_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(parsed) => match parsed.host_str() {
            Some(host) => format!("{}://{}/****", parsed.scheme(), host),
            None => raw.to_string(),
        },
        Err(_) => raw.to_string(),
    }
}
