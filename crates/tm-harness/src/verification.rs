//! Verification transcript parsing.
//!
//! The verification phase asks the agent to check the success criteria and
//! end its answer with an explicit `verification_result: pass` or
//! `verification_result: fail` marker. Agents do not always comply, so a
//! keyword fallback handles transcripts without the marker. Negative
//! indicators are checked first and are disqualifying: a transcript saying
//! "Overall Success: NO" must never count as a pass just because it also
//! contains the word "success".

/// Outcome of the verification phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOutcome {
    pub success: bool,
    /// Full transcript, kept for the progress log.
    pub details: String,
}

const NEGATIVE_INDICATORS: &[&str] = &[
    "not met",
    "not all criteria",
    "criteria not met",
    "overall success: no",
    "criteria not satisfied",
    "verification failed",
    "cannot verify",
];

const POSITIVE_INDICATORS: &[&str] = &[
    "all criteria met",
    "all criteria verified",
    "overall success: yes",
    "verification successful",
    "success",
];

/// Decide pass/fail from a verification transcript.
///
/// The explicit marker wins when present; otherwise the transcript passes
/// only if it contains a positive indicator and no negative one.
pub fn parse_verification_output(transcript: &str) -> VerifyOutcome {
    let lower = transcript.to_lowercase();

    let success = if lower.contains("verification_result: pass") {
        true
    } else if lower.contains("verification_result: fail") {
        false
    } else {
        let has_negative = NEGATIVE_INDICATORS.iter().any(|ind| lower.contains(ind));
        let has_positive = POSITIVE_INDICATORS.iter().any(|ind| lower.contains(ind));
        has_positive && !has_negative
    };

    VerifyOutcome {
        success,
        details: transcript.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_pass_marker() {
        let out = parse_verification_output("Checked everything.\nVERIFICATION_RESULT: PASS");
        assert!(out.success);
    }

    #[test]
    fn explicit_fail_marker() {
        let out = parse_verification_output("verification_result: fail\nTwo tests broken.");
        assert!(!out.success);
    }

    #[test]
    fn pass_marker_wins_over_fail_marker() {
        // First marker branch checked wins.
        let out =
            parse_verification_output("verification_result: pass (was verification_result: fail)");
        assert!(out.success);
    }

    #[test]
    fn marker_beats_negative_keywords() {
        let out = parse_verification_output(
            "Earlier run said criteria not met, but now: verification_result: pass",
        );
        assert!(out.success);
    }

    #[test]
    fn overall_success_no_is_disqualifying() {
        // "Overall Success: NO" contains the substring "success" but the
        // negative indicator must take precedence.
        let out = parse_verification_output("Overall Success: NO\nSome tests failed.");
        assert!(!out.success);
    }

    #[test]
    fn positive_indicator_without_negatives_passes() {
        let out = parse_verification_output("All criteria met. Ship it.");
        assert!(out.success);
    }

    #[test]
    fn generic_success_word_passes() {
        let out = parse_verification_output("The build was a success across the board.");
        assert!(out.success);
    }

    #[test]
    fn no_indicators_at_all_fails() {
        let out = parse_verification_output("I looked at the code. It has functions.");
        assert!(!out.success);
    }

    #[test]
    fn mixed_indicators_fail() {
        let out =
            parse_verification_output("Verification successful for task 1, but criteria not met for task 2.");
        assert!(!out.success);
    }

    #[test]
    fn empty_transcript_fails() {
        let out = parse_verification_output("");
        assert!(!out.success);
        assert!(out.details.is_empty());
    }

    #[test]
    fn details_preserve_original_case() {
        let text = "VERIFICATION_RESULT: PASS\nAll Good";
        let out = parse_verification_output(text);
        assert_eq!(out.details, text);
    }
}
