/// Canonical form used for hashing: trimmed, inner whitespace collapsed, lowercased.
pub fn normalize(text: &str) -> String {
    normalize_with(text, false)
}

pub fn normalize_with(text: &str, case_sensitive: bool) -> String {
    let s = text.split_whitespace().collect::<Vec<_>>().join(" ");

    if case_sensitive {
        s
    } else {
        s.to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace_and_case() {
        assert_eq!(normalize("  Open\tthe \n GATE  "), "open the gate");
    }

    #[test]
    fn case_sensitive_keeps_letters() {
        assert_eq!(normalize_with(" Open  Gate ", true), "Open Gate");
    }

    #[test]
    fn whitespace_only_is_empty() {
        assert_eq!(normalize(" \t\n "), "");
    }
}
