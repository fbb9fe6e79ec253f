//! `EHLO` keyword line grammar.

/// Splits an `EHLO` line into an upper-cased keyword and its parameters.
///
/// Tokens are separated by single spaces, so doubled spaces yield an empty
/// parameter and the line is rejected.
pub(super) fn parse_ehlo_line(line: &str) -> Result<(String, Vec<String>), &'static str> {
    let mut parts = line.split(' ');
    let keyword = parts.next().unwrap_or_default().to_ascii_uppercase();
    check_keyword(&keyword)?;

    let parameters: Vec<String> = parts.map(ToString::to_string).collect();
    for parameter in &parameters {
        check_parameter(parameter)?;
    }

    Ok((keyword, parameters))
}

fn check_keyword(keyword: &str) -> Result<(), &'static str> {
    let mut bytes = keyword.bytes();
    let valid = bytes.next().is_some_and(is_capital_alpha_digit)
        && bytes.all(|b| is_capital_alpha_digit(b) || b == b'-');
    if valid {
        Ok(())
    } else {
        Err("EHLO keyword contains invalid character")
    }
}

fn check_parameter(parameter: &str) -> Result<(), &'static str> {
    if parameter.is_empty() {
        return Err("EHLO parameter must not be empty");
    }
    if parameter.bytes().any(|b| !(33..=126).contains(&b)) {
        return Err("EHLO parameter contains invalid character");
    }
    Ok(())
}

const fn is_capital_alpha_digit(b: u8) -> bool {
    b.is_ascii_digit() || b.is_ascii_uppercase()
}
