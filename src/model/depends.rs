use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref DOC_REFERENCE: Regex = Regex::new(r"\bdoc\.([A-Za-z_][A-Za-z0-9_]*)").expect("static regex");
    static ref PLAIN_FIELDNAME: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex");
}

/// Fieldnames a dependency expression reads.
///
/// `eval:` expressions reference fields as `doc.<fieldname>`; anything else
/// is taken as a bare fieldname (optionally negated with `!`). Expressions
/// that are neither yield nothing.
pub fn referenced_fieldnames(expression: &str) -> Vec<String> {
    let expression = expression.trim();
    if let Some(code) = expression.strip_prefix("eval:") {
        let mut names: Vec<String> = Vec::new();
        for caps in DOC_REFERENCE.captures_iter(code) {
            let name = caps[1].to_string();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        return names;
    }
    let bare = expression.trim_start_matches('!').trim();
    if PLAIN_FIELDNAME.is_match(bare) {
        vec![bare.to_string()]
    } else {
        Vec::new()
    }
}

/// Link field a `fetch_from` declaration reads through (`customer.customer_name` -> `customer`).
pub fn fetch_source(fetch_from: &str) -> Option<&str> {
    let (source, rest) = fetch_from.trim().split_once('.')?;
    if PLAIN_FIELDNAME.is_match(source) && !rest.is_empty() {
        Some(source)
    } else {
        None
    }
}

pub fn is_valid_fieldname(name: &str) -> bool {
    PLAIN_FIELDNAME.is_match(name)
}
