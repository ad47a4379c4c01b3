//! Log output for binaries and tests.

use tracing::Level;

/// Installs a `fmt` subscriber printing thread names.
///
/// Returns `false` if a global subscriber was already installed, which makes
/// repeated calls harmless.
pub fn init(level: Level) -> bool {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_thread_names(true)
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_rejected() {
        init(Level::WARN);
        assert!(!init(Level::WARN));
    }
}
