//! String normalization and similarity helpers shared by the normalizer,
//! the validation engine and identity resolution.

/// Collapse whitespace, trim, lowercase. This is the canonical form used for
/// all header and name matching.
pub fn normalize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_was_space = true;
    for ch in input.trim().chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            for lc in ch.to_lowercase() {
                out.push(lc);
            }
            last_was_space = false;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Strip control characters and script/markup fragments from free text,
/// collapsing runs of whitespace. Returns `None` when nothing survives.
pub fn sanitize(input: &str) -> Option<String> {
    let mut cleaned = input.to_string();

    // Spreadsheet cells occasionally carry pasted HTML. Drop whole <script>
    // blocks, then any remaining tags, then inline javascript: handlers.
    loop {
        let lower = cleaned.to_lowercase();
        let Some(start) = lower.find("<script") else {
            break;
        };
        let end = lower[start..]
            .find("</script>")
            .map(|i| start + i + "</script>".len())
            .unwrap_or(cleaned.len());
        cleaned.replace_range(start..end, "");
    }
    while let Some(start) = cleaned.find('<') {
        let Some(rel_end) = cleaned[start..].find('>') else {
            break;
        };
        cleaned.replace_range(start..start + rel_end + 1, "");
    }
    let cleaned = cleaned.replace("javascript:", "");

    let mut out = String::with_capacity(cleaned.len());
    let mut last_was_space = true;
    for ch in cleaned.trim().chars() {
        if ch.is_control() {
            continue;
        }
        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(ch);
            last_was_space = false;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Character-based Levenshtein distance. Char-based, not byte-based, so CJK
/// names compare sensibly.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Normalized edit-distance similarity in `0.0..=1.0`.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let len = a.chars().count().max(b.chars().count());
    if len == 0 {
        return 1.0;
    }
    let dist = levenshtein(a, b);
    ((len - dist.min(len)) as f64) / (len as f64)
}

pub fn is_valid_email(email: &str) -> bool {
    let mut parts = email.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    if local.is_empty() || domain.is_empty() {
        return false;
    }
    if local.chars().any(char::is_whitespace) || domain.chars().any(char::is_whitespace) {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
        None => false,
    }
}

/// Hong Kong phone shapes: optional +852 prefix, 8 digits starting 2–9.
pub fn is_valid_phone(phone: &str) -> bool {
    let cleaned: String = phone
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();
    let digits = cleaned.strip_prefix("+852").unwrap_or(&cleaned);
    digits.len() == 8
        && digits.chars().all(|c| c.is_ascii_digit())
        && !digits.starts_with('0')
        && !digits.starts_with('1')
}

/// All ASCII digits in the string, concatenated, as an integer.
pub fn extract_number(input: &str) -> Option<i64> {
    let digits: String = input.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}
