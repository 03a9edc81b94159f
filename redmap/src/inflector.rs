//! English inflection for default association and foreign-key names.

const UNCOUNTABLE: &[&str] = &["equipment", "information", "rice", "money", "species", "series", "fish", "sheep", "data"];

const IRREGULAR: &[(&str, &str)] = &[
    ("person", "people"),
    ("man", "men"),
    ("child", "children"),
    ("sex", "sexes"),
    ("move", "moves"),
    ("ox", "oxen"),
    ("mouse", "mice"),
    ("louse", "lice"),
    ("quiz", "quizzes"),
];

// (suffix, chars to strip, replacement), first match wins
const PLURAL_RULES: &[(&str, usize, &str)] = &[
    ("matrix", 1, "ces"),
    ("vertex", 2, "ices"),
    ("index", 2, "ices"),
    ("alias", 0, "es"),
    ("status", 0, "es"),
    ("bus", 0, "es"),
    ("axis", 2, "es"),
    ("testis", 2, "es"),
    ("sis", 2, "es"),
    ("tomato", 0, "es"),
    ("potato", 0, "es"),
    ("echo", 0, "es"),
    ("hero", 0, "es"),
    ("veto", 0, "es"),
    ("hive", 0, "s"),
    ("ium", 2, "a"),
    ("tum", 2, "a"),
    ("quy", 1, "ies"),
    ("lf", 1, "ves"),
    ("rf", 1, "ves"),
    ("fe", 2, "ves"),
    ("ch", 0, "es"),
    ("sh", 0, "es"),
    ("ss", 0, "es"),
    ("us", 0, "es"),
    ("x", 0, "es"),
    ("s", 0, ""),
];

const SINGULAR_RULES: &[(&str, usize, &str)] = &[
    ("matrices", 3, "x"),
    ("vertices", 4, "ex"),
    ("indices", 4, "ex"),
    ("aliases", 2, ""),
    ("statuses", 2, ""),
    ("buses", 2, ""),
    ("axes", 2, "is"),
    ("testes", 2, "is"),
    ("theses", 2, "is"),
    ("crises", 2, "is"),
    ("yses", 2, "is"),
    ("oes", 2, ""),
    ("hives", 1, ""),
    ("quies", 3, "y"),
    ("ives", 3, "fe"),
    ("lves", 3, "f"),
    ("rves", 3, "f"),
    ("ches", 2, ""),
    ("shes", 2, ""),
    ("sses", 2, ""),
    ("xes", 2, ""),
    ("ia", 1, "um"),
    ("ta", 1, "um"),
    ("ies", 3, "y"),
    ("ss", 0, ""),
    ("s", 1, ""),
];

fn apply(word: &str, rules: &[(&str, usize, &str)]) -> Option<String> {
    let lower = word.to_ascii_lowercase();
    rules
        .iter()
        .find(|(suffix, _, _)| lower.ends_with(suffix))
        .map(|(_, strip, replacement)| format!("{}{}", &word[..word.len() - strip], replacement))
}

fn is_vowel(c: char) -> bool {
    matches!(c.to_ascii_lowercase(), 'a' | 'e' | 'i' | 'o' | 'u')
}

fn match_case(template: &str, word: &str) -> String {
    match template.chars().next() {
        Some(c) if c.is_uppercase() => ucfirst(word),
        _ => word.to_string(),
    }
}

pub fn pluralize(word: &str) -> String {
    let lower = word.to_ascii_lowercase();
    if word.is_empty() || UNCOUNTABLE.contains(&lower.as_str()) {
        return word.to_string();
    }
    if let Some((_, plural)) = IRREGULAR.iter().find(|(single, _)| *single == lower) {
        return match_case(word, plural);
    }
    // consonant + y
    if lower.ends_with('y') && !lower[..lower.len() - 1].ends_with(is_vowel) {
        return format!("{}ies", &word[..word.len() - 1]);
    }
    apply(word, PLURAL_RULES).unwrap_or_else(|| format!("{word}s"))
}

pub fn singularize(word: &str) -> String {
    let lower = word.to_ascii_lowercase();
    if word.is_empty() || UNCOUNTABLE.contains(&lower.as_str()) {
        return word.to_string();
    }
    if let Some((single, _)) = IRREGULAR.iter().find(|(_, plural)| *plural == lower) {
        return match_case(word, single);
    }
    apply(word, SINGULAR_RULES).unwrap_or_else(|| word.to_string())
}

pub fn lcfirst(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn ucfirst(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// `BlogPost` -> `blog_post`
pub fn snake_case(word: &str) -> String {
    let mut out = String::with_capacity(word.len() + 4);
    let mut prev_lower = false;
    for c in word.chars() {
        if c.is_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.extend(c.to_lowercase());
            prev_lower = false;
        } else {
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
            out.push(c);
        }
    }
    out
}
