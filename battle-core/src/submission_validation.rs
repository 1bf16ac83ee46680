/// Strip every whitespace character and lower-case what remains.
pub fn normalize_output(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Judge a submission against the challenge's expected output.
///
/// The comparison ignores whitespace, indentation and letter case; anything else
/// must match exactly. There is no partial credit.
pub fn is_correct_submission(submitted: &str, expected: &str) -> bool {
    normalize_output(submitted) == normalize_output(expected)
}
