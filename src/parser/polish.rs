/// Fold Polish diacritics to plain ASCII letters, case-insensitively (`Ł` → `l`).
/// Every other character passes through untouched; a missing value folds to "".
pub fn fold_diacritics(input: Option<&str>) -> String {
    match input {
        Some(s) => s.chars().map(fold_char).collect(),
        None => String::new(),
    }
}

fn fold_char(c: char) -> char {
    match c {
        'ą' | 'Ą' => 'a',
        'ć' | 'Ć' => 'c',
        'ę' | 'Ę' => 'e',
        'ł' | 'Ł' => 'l',
        'ń' | 'Ń' => 'n',
        'ó' | 'Ó' => 'o',
        'ś' | 'Ś' => 's',
        'ź' | 'Ź' | 'ż' | 'Ż' => 'z',
        other => other,
    }
}
