//! Error normalization shared by every module that writes to the trade log.
//!
//! Propagation leans on `anyhow::Context`, with a single string-normalizer
//! at the logging boundary so every failure reason ends up as a short,
//! greppable string instead of a `Debug`-formatted chain.

/// Flattens an `anyhow::Error` chain into a single line suitable for the
/// trade log's `note.error` field and for a `tracing::error!` call.
pub fn normalize_error(err: &anyhow::Error) -> String {
    err.chain()
        .map(|cause| cause.to_string())
        .collect::<Vec<_>>()
        .join(": ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn flattens_context_chain_into_one_line() {
        let base: Result<(), _> = Err(std::io::Error::new(std::io::ErrorKind::Other, "timed out"));
        let err = base.context("fetching order book").unwrap_err();
        assert_eq!(normalize_error(&err), "fetching order book: timed out");
    }
}
