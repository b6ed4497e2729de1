//! Plain-text cleanup applied to user input before it reaches a template.

/// Removes `<...>` markup. An unterminated `<` drops the rest of the input.
pub fn strip_tags(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    for c in input.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

/// Truncates to `max_chars` characters and appends `...` when anything was cut.
pub fn limit_chars(input: &str, max_chars: usize) -> String {
    match input.char_indices().nth(max_chars) {
        None => input.to_string(),
        Some((byte_idx, _)) => {
            let mut out = input[..byte_idx].trim_end().to_string();
            out.push_str("...");
            out
        }
    }
}

/// `trim`, then `strip_tags`, then an optional `limit_chars`.
pub fn clean_field(input: &str, limit: Option<usize>) -> String {
    let stripped = strip_tags(input);
    let trimmed = stripped.trim();
    match limit {
        Some(max) => limit_chars(trimmed, max),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markup() {
        assert_eq!(strip_tags("<b>Иванов</b> Иван"), "Иванов Иван");
        assert_eq!(strip_tags("a < b"), "a ");
        assert_eq!(strip_tags("no tags"), "no tags");
    }

    #[test]
    fn limit_counts_characters_not_bytes() {
        assert_eq!(limit_chars("Иванов", 10), "Иванов");
        assert_eq!(limit_chars("Иванов Иван", 6), "Иванов...");
        assert_eq!(limit_chars("abcdef", 3), "abc...");
        assert_eq!(limit_chars("abc", 3), "abc");
    }

    #[test]
    fn clean_field_trims_before_limiting() {
        assert_eq!(clean_field("  <i>ООО Банк</i>  ", Some(20)), "ООО Банк");
        assert_eq!(clean_field("  12345678901234567890123  ", Some(20)), "12345678901234567890...");
    }
}
