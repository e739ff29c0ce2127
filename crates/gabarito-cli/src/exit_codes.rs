//! Process exit codes. Part of the public contract: scripts and CI rely on them.

use gabarito_core::{RunError, RunErrorKind};

pub const SUCCESS: i32 = 0;
pub const PARTIAL: i32 = 1; // A response set failed to load or evaluate, or has inconclusive tasks
pub const CONFIG_ERROR: i32 = 2; // Bad answer key, prompt file, arguments or missing credentials
pub const PROVIDER_ERROR: i32 = 3; // Fatal provider error or failed batch

/// Exit code a recorded failure contributes.
pub fn for_error(err: &RunError) -> i32 {
    match err.kind {
        RunErrorKind::AnswerKey | RunErrorKind::JudgeUnavailable => CONFIG_ERROR,
        RunErrorKind::ProviderAuth
        | RunErrorKind::ProviderRequest
        | RunErrorKind::ProviderQuota
        | RunErrorKind::BatchFailed => PROVIDER_ERROR,
        _ => PARTIAL,
    }
}

/// Codes are ordered by severity; the session reports the worst one.
pub fn worst(a: i32, b: i32) -> i32 {
    a.max(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gabarito_core::{LoadError, ProviderError};

    #[test]
    fn provider_fatal_outranks_partial() {
        let auth = RunError::from_provider(&ProviderError::Unauthorized {
            status: 401,
            message: "bad key".into(),
        });
        assert_eq!(for_error(&auth), PROVIDER_ERROR);

        let server = RunError::from_provider(&ProviderError::Server {
            status: 502,
            message: "bad gateway".into(),
        });
        assert_eq!(for_error(&server), PARTIAL);
        assert_eq!(worst(PARTIAL, for_error(&auth)), PROVIDER_ERROR);
    }

    #[test]
    fn response_file_errors_are_partial() {
        let err = RunError::response_file(&LoadError::Invalid {
            path: "a.json".into(),
            message: "missing metadata.id".into(),
        });
        assert_eq!(for_error(&err), PARTIAL);
    }
}
