//! Error helpers shared across the crate.
//!
//! Migration units report failures as `anyhow` chains. The runner stores them
//! on the execution record and in `MigrationError::MigrationFailed` as a single
//! line produced by [`AnyhowErrorExt::to_generic_message`].

/// Helper trait for converting anyhow errors to flat error messages
pub trait AnyhowErrorExt {
    /// Convert an anyhow error to a string, preserving the error chain
    fn to_generic_message(&self) -> String;
}

impl AnyhowErrorExt for anyhow::Error {
    fn to_generic_message(&self) -> String {
        let mut message = self.to_string();

        let chain: Vec<String> = self.chain().skip(1).map(ToString::to_string).collect();
        if !chain.is_empty() {
            message.push_str(" (caused by: ");
            message.push_str(&chain.join(" -> "));
            message.push(')');
        }

        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anyhow_error_ext() {
        let error = anyhow::anyhow!("base error")
            .context("middle context")
            .context("outer context");

        let message = error.to_generic_message();
        assert_eq!(
            message,
            "outer context (caused by: middle context -> base error)"
        );
    }

    #[test]
    fn test_anyhow_error_ext_without_chain() {
        let error = anyhow::anyhow!("collection users is locked");
        assert_eq!(error.to_generic_message(), "collection users is locked");
    }
}
