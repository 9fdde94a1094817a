use md5::{Digest, Md5};

/// Canonicalizes SQL into query fingerprints.
///
/// A fingerprint identifies a query *class*: literal values, comments, and
/// whitespace are normalized away so that all invocations of the same
/// statement shape share one fingerprint. This is a character-driven
/// tokenizer, not a SQL parser; it terminates on any input but pathological
/// queries (a string literal containing slow-log header text, say) can be
/// mis-collapsed.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fingerprinter {
    /// Replace digit runs inside identifiers (`rt_5min` -> `rt_?min`).
    /// Leading digit runs are part of the name and always preserved
    /// (`123foo` stays `123foo`).
    pub replace_numbers_in_words: bool,
}

/// Fingerprints a query with the default configuration.
///
/// # Examples
///
/// ```
/// use slowlog_digest::fingerprint;
///
/// assert_eq!(fingerprint("SELECT c FROM t WHERE id=1"), "select c from t where id=?");
/// assert_eq!(fingerprint("CALL foo(1, 2, 3)"), "call foo");
/// ```
pub fn fingerprint(query: &str) -> String {
    Fingerprinter::default().fingerprint(query)
}

/// Returns the class id for a fingerprint: the uppercase hex encoding of
/// bytes 8..16 of its MD5 digest. Ids are persisted by consumers, so this
/// derivation must never change.
///
/// # Examples
///
/// ```
/// use slowlog_digest::id;
///
/// assert_eq!(id("hello world"), "93CB22BB8F5ACDC3");
/// ```
pub fn id(fingerprint: &str) -> String {
    let digest = Md5::digest(fingerprint.as_bytes());
    digest[8..16].iter().map(|b| format!("{b:02X}")).collect()
}

impl Fingerprinter {
    pub fn new(replace_numbers_in_words: bool) -> Fingerprinter {
        Fingerprinter {
            replace_numbers_in_words,
        }
    }

    /// Canonicalizes `query` into its fingerprint.
    pub fn fingerprint(&self, query: &str) -> String {
        // Admin commands fingerprint as themselves.
        if query.starts_with("administrator command: ") {
            return query.to_string();
        }
        let trimmed = query.trim_start();
        // Stored procedure calls keep only the procedure name.
        if let Some(rest) = prefix_ignore_case(trimmed, "call ") {
            let name: String = rest
                .trim_start()
                .chars()
                .take_while(|c| *c != '(' && !c.is_whitespace())
                .collect();
            return format!("call {}", name.to_ascii_lowercase());
        }
        // USE statements drop the database name.
        if prefix_ignore_case(trimmed, "use ").is_some() {
            return "use ?".to_string();
        }

        let scanned = self.scan(query);
        let collapsed = collapse_lists(&scanned);
        strip_order_by_asc(&collapsed)
    }

    // The main left-to-right pass: collapses literals to `?`, strips
    // comments, folds whitespace, and lowercases everything outside
    // backticks and string bodies.
    fn scan(&self, input: &str) -> String {
        let b = input.as_bytes();
        let n = b.len();
        let mut out = String::with_capacity(n);
        let mut space_pending = false;
        let mut in_hint = false;
        let mut i = 0;

        while i < n {
            let c = b[i];

            if c.is_ascii_whitespace() {
                space_pending = true;
                i += 1;
                continue;
            }

            // One-line comments go together with their newline, so
            // `foo-- bar\n,foo` stays `foo,foo`.
            if c == b'#'
                || (c == b'-'
                    && i + 1 < n
                    && b[i + 1] == b'-'
                    && (i + 2 >= n || b[i + 2].is_ascii_whitespace()))
            {
                while i < n && b[i] != b'\n' {
                    i += 1;
                }
                if i < n {
                    i += 1;
                }
                continue;
            }

            // Block comments vanish; /*!NNNNN version hints survive with
            // their interiors canonicalized in place.
            if c == b'/' && i + 1 < n && b[i + 1] == b'*' {
                if i + 2 < n && b[i + 2] == b'!' {
                    emit(&mut out, &mut space_pending, "/*!");
                    i += 3;
                    while i < n && b[i].is_ascii_digit() {
                        out.push(b[i] as char);
                        i += 1;
                    }
                    in_hint = true;
                    continue;
                }
                i += 2;
                while i + 1 < n && !(b[i] == b'*' && b[i + 1] == b'/') {
                    i += 1;
                }
                i = if i + 1 < n { i + 2 } else { n };
                continue;
            }
            if in_hint && c == b'*' && i + 1 < n && b[i + 1] == b'/' {
                emit(&mut out, &mut space_pending, "*/");
                in_hint = false;
                i += 2;
                continue;
            }

            // String literals, with \x escapes and '' doubling.
            if c == b'\'' || c == b'"' {
                i = skip_string(b, i);
                emit(&mut out, &mut space_pending, "?");
                continue;
            }

            // Backticked identifiers are preserved byte for byte.
            if c == b'`' {
                let start = i;
                i += 1;
                while i < n && b[i] != b'`' {
                    i += 1;
                }
                if i < n {
                    i += 1;
                }
                emit(&mut out, &mut space_pending, &input[start..i]);
                continue;
            }

            // x'F00D' and b'1010' quoted hex/bit literals.
            if matches!(c, b'x' | b'X' | b'b' | b'B')
                && i + 1 < n
                && b[i + 1] == b'\''
                && (i == 0 || !is_word_byte(b[i - 1]))
            {
                i = skip_string(b, i + 1);
                emit(&mut out, &mut space_pending, "?");
                continue;
            }

            // Numeric literals. A numeral glued to word characters is an
            // identifier (`123foo`) and falls through to the word branch.
            let digit_start = c.is_ascii_digit() && (i == 0 || !is_word_byte(b[i - 1]));
            let dot_start = c == b'.'
                && i + 1 < n
                && b[i + 1].is_ascii_digit()
                && (i == 0 || !is_word_byte(b[i - 1]));
            let sign_start = matches!(c, b'+' | b'-')
                && i + 1 < n
                && (b[i + 1].is_ascii_digit()
                    || (b[i + 1] == b'.' && i + 2 < n && b[i + 2].is_ascii_digit()))
                && matches!(last_significant(&out), None | Some('(' | ',' | '='));
            if digit_start || dot_start || sign_start {
                if let Some(end) = scan_number(b, i) {
                    i = end;
                    emit(&mut out, &mut space_pending, "?");
                    continue;
                }
            }

            if is_word_byte(c) {
                let start = i;
                while i < n && is_word_byte(b[i]) {
                    i += 1;
                }
                let word = &input[start..i];
                if word.eq_ignore_ascii_case("null") {
                    emit(&mut out, &mut space_pending, "?");
                } else {
                    let mut word = word.to_ascii_lowercase();
                    if self.replace_numbers_in_words {
                        word = replace_digit_runs(&word);
                    }
                    emit(&mut out, &mut space_pending, &word);
                }
                continue;
            }

            // Operators and punctuation pass through.
            if space_pending && !out.is_empty() {
                out.push(' ');
            }
            space_pending = false;
            out.push(c as char);
            i += 1;
        }

        out
    }
}

fn emit(out: &mut String, space_pending: &mut bool, token: &str) {
    if *space_pending && !out.is_empty() {
        out.push(' ');
    }
    *space_pending = false;
    out.push_str(token);
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

fn prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

fn last_significant(out: &str) -> Option<char> {
    out.chars().rev().find(|c| *c != ' ')
}

// Skips a quoted string starting at the opening quote; returns the index
// just past the closing quote. Handles backslash escapes and doubled-quote
// escapes ('' inside a '-quoted string). Adjacent but space-separated
// strings are left as separate literals.
fn skip_string(b: &[u8], mut i: usize) -> usize {
    let quote = b[i];
    i += 1;
    while i < b.len() {
        if b[i] == b'\\' {
            i += 2;
            continue;
        }
        if b[i] == quote {
            if i + 1 < b.len() && b[i + 1] == quote {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    b.len()
}

// Scans a numeric literal (decimal, leading-dot, scientific, 0x hex, 0b
// binary) starting at `i`, which may be a sign. Returns None if the numeral
// runs into word characters and is really an identifier.
fn scan_number(b: &[u8], mut i: usize) -> Option<usize> {
    let n = b.len();
    if matches!(b[i], b'+' | b'-') {
        i += 1;
    }
    if b[i] == b'0' && i + 1 < n && matches!(b[i + 1], b'x' | b'X') {
        let mut j = i + 2;
        while j < n && b[j].is_ascii_hexdigit() {
            j += 1;
        }
        if j > i + 2 && (j >= n || !is_word_byte(b[j])) {
            return Some(j);
        }
        return None;
    }
    if b[i] == b'0' && i + 1 < n && matches!(b[i + 1], b'b' | b'B') {
        let mut j = i + 2;
        while j < n && matches!(b[j], b'0' | b'1') {
            j += 1;
        }
        if j > i + 2 && (j >= n || !is_word_byte(b[j])) {
            return Some(j);
        }
        return None;
    }
    let mut j = i;
    while j < n && b[j].is_ascii_digit() {
        j += 1;
    }
    if j < n && b[j] == b'.' {
        j += 1;
        while j < n && b[j].is_ascii_digit() {
            j += 1;
        }
    }
    if j < n && matches!(b[j], b'e' | b'E') {
        let mut k = j + 1;
        if k < n && matches!(b[k], b'+' | b'-') {
            k += 1;
        }
        let exponent = k;
        while k < n && b[k].is_ascii_digit() {
            k += 1;
        }
        if k > exponent {
            j = k;
        }
    }
    if j < n && is_word_byte(b[j]) {
        return None;
    }
    Some(j)
}

// With the flag on, interior digit runs in an identifier become `?`.
fn replace_digit_runs(word: &str) -> String {
    let mut out = String::with_capacity(word.len());
    let mut chars = word.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            out.push(c);
            chars.next();
        } else {
            break;
        }
    }
    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            out.push('?');
            while matches!(chars.peek(), Some(d) if d.is_ascii_digit()) {
                chars.next();
            }
        } else {
            out.push(c);
        }
    }
    out
}

// Collapses IN/VALUES/VALUE lists: the whole balanced group after the
// keyword becomes (?+), plus any `, (...)` continuation groups. After ON
// DUPLICATE KEY UPDATE, VALUES(col) is the MySQL function and never
// collapses. Runs on scanned text, so parens inside string literals are
// already gone and cannot unbalance the group.
fn collapse_lists(input: &str) -> String {
    let b = input.as_bytes();
    let n = b.len();
    let mut out = String::with_capacity(n);
    let mut words: Vec<&str> = Vec::new();
    let mut on_dupe = false;
    let mut i = 0;

    while i < n {
        let c = b[i];
        if c == b'`' {
            let start = i;
            i += 1;
            while i < n && b[i] != b'`' {
                i += 1;
            }
            if i < n {
                i += 1;
            }
            out.push_str(&input[start..i]);
            continue;
        }
        if is_word_byte(c) {
            let start = i;
            while i < n && is_word_byte(b[i]) {
                i += 1;
            }
            let word = &input[start..i];
            out.push_str(word);
            words.push(word);
            if words.ends_with(&["on", "duplicate", "key", "update"]) {
                on_dupe = true;
            }
            if !on_dupe && matches!(word, "in" | "values" | "value") {
                let mut j = i;
                while j < n && b[j] == b' ' {
                    j += 1;
                }
                if j < n && b[j] == b'(' {
                    if let Some((end, empty)) = scan_group(b, j) {
                        out.push('(');
                        if !empty {
                            out.push_str("?+");
                        }
                        out.push(')');
                        i = end;
                        // Swallow `, (...)` continuations of a VALUES list.
                        loop {
                            let mut k = i;
                            while k < n && b[k] == b' ' {
                                k += 1;
                            }
                            if k < n && b[k] == b',' {
                                k += 1;
                                while k < n && b[k] == b' ' {
                                    k += 1;
                                }
                                if k < n && b[k] == b'(' {
                                    if let Some((end, _)) = scan_group(b, k) {
                                        i = end;
                                        continue;
                                    }
                                }
                            }
                            break;
                        }
                    }
                }
            }
            continue;
        }
        out.push(c as char);
        i += 1;
    }
    out
}

// Walks a balanced paren group starting at `(`; returns the index past the
// closing paren and whether the body is empty. None if unbalanced.
fn scan_group(b: &[u8], start: usize) -> Option<(usize, bool)> {
    let mut depth = 0usize;
    let mut i = start;
    while i < b.len() {
        match b[i] {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    let empty = b[start + 1..i].iter().all(|&c| c == b' ');
                    return Some((i + 1, empty));
                }
            }
            b'`' => {
                i += 1;
                while i < b.len() && b[i] != b'`' {
                    i += 1;
                }
                if i >= b.len() {
                    break;
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

const ORDER_BY_TERMINATORS: &[&str] = &["limit", "procedure", "for", "lock", "into"];

// Drops explicit ASC from ORDER BY items and normalizes separators to ", ".
// DESC is significant and kept.
fn strip_order_by_asc(input: &str) -> String {
    let b = input.as_bytes();
    let n = b.len();
    let mut out = String::with_capacity(n);
    let mut i = 0;

    while i < n {
        let c = b[i];
        if c == b'`' {
            let start = i;
            i += 1;
            while i < n && b[i] != b'`' {
                i += 1;
            }
            if i < n {
                i += 1;
            }
            out.push_str(&input[start..i]);
            continue;
        }
        if is_word_byte(c) {
            let start = i;
            while i < n && is_word_byte(b[i]) {
                i += 1;
            }
            let word = &input[start..i];
            if word == "order" {
                let mut j = i;
                while j < n && b[j] == b' ' {
                    j += 1;
                }
                if input[j..].starts_with("by") && (j + 2 >= n || !is_word_byte(b[j + 2])) {
                    out.push_str("order by");
                    i = rewrite_order_by(input, j + 2, &mut out);
                    continue;
                }
            }
            out.push_str(word);
            continue;
        }
        out.push(c as char);
        i += 1;
    }
    out
}

// Rewrites the expression list after ORDER BY into `out`; returns the
// position at which the main scan resumes (a terminator keyword, `;`, a
// closing paren, or end of input).
fn rewrite_order_by(input: &str, mut i: usize, out: &mut String) -> usize {
    let b = input.as_bytes();
    let n = b.len();
    let mut items: Vec<String> = Vec::new();

    'items: loop {
        let mut tokens: Vec<&str> = Vec::new();
        loop {
            while i < n && b[i] == b' ' {
                i += 1;
            }
            if i >= n || b[i] == b';' || b[i] == b')' {
                break;
            }
            if b[i] == b',' {
                break;
            }
            // A terminator keyword ends the whole clause.
            if is_word_byte(b[i]) {
                let mut j = i;
                while j < n && is_word_byte(b[j]) {
                    j += 1;
                }
                if ORDER_BY_TERMINATORS.contains(&&input[i..j]) {
                    break;
                }
            }
            // One expression token: runs to whitespace or a top-level
            // separator, with commas inside parens kept intact.
            let start = i;
            let mut depth = 0usize;
            while i < n {
                match b[i] {
                    b'(' => depth += 1,
                    b')' => {
                        if depth == 0 {
                            break;
                        }
                        depth -= 1;
                    }
                    b',' | b';' if depth == 0 => break,
                    b' ' if depth == 0 => break,
                    _ => {}
                }
                i += 1;
            }
            if i == start {
                break;
            }
            tokens.push(&input[start..i]);
        }

        if tokens.last() == Some(&"asc") {
            tokens.pop();
        }
        if !tokens.is_empty() {
            items.push(tokens.join(" "));
        }

        if i < n && b[i] == b',' {
            i += 1;
            continue 'items;
        }
        break;
    }

    if !items.is_empty() {
        out.push(' ');
        out.push_str(&items.join(", "));
    }
    // Keep a separator before a trailing keyword such as LIMIT.
    if i < n && is_word_byte(b[i]) {
        out.push(' ');
    }
    i
}
