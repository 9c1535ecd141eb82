//! Command implementations.

mod info;
mod run;
mod validate;

pub use info::run_info;
pub use run::run_pipeline;
pub use validate::run_validate;

/// Attribute keys whose values never reach the terminal
const SECRET_ATTRS: &[&str] = &["db_url", "password"];

/// Attribute value safe to print
pub(crate) fn display_attr<'a>(key: &str, value: &'a str) -> &'a str {
    if SECRET_ATTRS.contains(&key) {
        "<redacted>"
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_attr_redacts_secrets() {
        assert_eq!(display_attr("db_url", "postgres://u:p@h/db"), "<redacted>");
        assert_eq!(display_attr("path", "/tmp/out.log"), "/tmp/out.log");
    }
}
