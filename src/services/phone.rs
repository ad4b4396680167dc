/// Normalises a phone number to digits with a country code, the form the
/// messaging platform addresses leads by. Returns `None` when nothing is
/// left after cleaning.
///
/// - punctuation (spaces, `-`, `(`, `)`, `.`, `+`) is stripped
/// - more than 10 digits without a leading `0` is taken as international
/// - a leading `0` is a trunk prefix and becomes `country_code`
/// - exactly 10 digits gets `country_code` prepended
pub fn normalize_phone(raw: &str, country_code: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '(' | ')' | '.' | '+'))
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    if cleaned.len() > 10 && !cleaned.starts_with('0') {
        return Some(cleaned);
    }

    if let Some(local) = cleaned.strip_prefix('0') {
        return Some(format!("{}{}", country_code, local));
    }

    if cleaned.len() == 10 {
        return Some(format!("{}{}", country_code, cleaned));
    }

    Some(cleaned)
}
