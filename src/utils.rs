use crate::error::{Error, Result, ValidateError};

/// Wrap `value` in double quotes, escaping backslashes and quotes, as an IMAP quoted string.
macro_rules! quote {
    ($x:expr) => {
        format!("\"{}\"", $x.replace(r"\", r"\\").replace("\"", "\\\""))
    };
}

pub(crate) use quote;

/// Quote `value` for use as an IMAP quoted string, refusing characters that cannot appear in one.
pub(crate) fn validate_str(value: &str) -> Result<String> {
    let quoted = quote!(value);
    if quoted.find('\n').is_some() {
        return Err(Error::Validate(ValidateError('\n')));
    }
    if quoted.find('\r').is_some() {
        return Err(Error::Validate(ValidateError('\r')));
    }
    Ok(quoted)
}
